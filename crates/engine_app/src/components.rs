//! Component types of the demo simulation.

use engine_component::{EntityRef, component};

component! {
    /// World-space position.
    pub struct Position {
        pub x: f32,
        pub y: f32,
    }
    storage = Columnar;
}

component! {
    /// Units per second.
    pub struct Velocity {
        pub vx: f32,
        pub vy: f32,
    }
    storage = Columnar;
}

component! {
    /// Seconds until the entity is destroyed.
    pub struct Lifetime {
        pub remaining: f32,
    }
}

component! {
    /// Entity this one trails behind.
    pub struct Follow {
        pub target: Option<EntityRef>,
        pub distance: f32,
    }
}

component! {
    pub struct Label {
        pub text: String,
        pub tags: Vec<String>,
    }
    name = "demo.Label";
}
