//! Helpers for deriving stable names and identities from component types.
//!
//! ## Type identity
//!
//! A component type is identified two ways:
//!
//! - [`TypeIdentity`]: *which* definition registered a name. Two different
//!   Rust structs that both call themselves `"Position"` have different
//!   identities; this is what hot reload swaps under a stable name.
//! - [`ComponentTypeId`]: a hash of the **name** only, computed with FNV-1a
//!   64-bit. Deterministic and language-neutral, so saved data and external
//!   tooling can agree on it without sharing Rust type information.

use std::any::TypeId;
use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentDescriptor};

/// A name-derived identifier for a component type, computed with the FNV-1a
/// 64-bit hash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ComponentTypeId(pub u64);

impl ComponentTypeId {
    /// FNV-1a 64-bit offset basis.
    const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

    /// FNV-1a 64-bit prime.
    const FNV_PRIME: u64 = 0x0100_0000_01b3;

    /// Compute the [`ComponentTypeId`] from a component's string name.
    ///
    /// # Algorithm (FNV-1a 64-bit)
    ///
    /// ```text
    /// hash = 0xcbf29ce484222325          (offset basis)
    /// for each byte in name.as_bytes():
    ///     hash = hash XOR byte
    ///     hash = hash * 0x00000100000001b3  (prime)
    /// return hash
    /// ```
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash = Self::FNV_OFFSET_BASIS;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u64;
            hash = hash.wrapping_mul(Self::FNV_PRIME);
            i += 1;
        }
        Self(hash)
    }

    /// Compute the [`ComponentTypeId`] for a declared component type `T`.
    #[must_use]
    pub fn of<T: ComponentDescriptor>() -> Self {
        Self::from_name(T::NAME)
    }
}

/// The definition behind a registered component name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeIdentity {
    /// A concrete Rust type.
    Native(TypeId),
    /// A name-only placeholder, registered before (or without) a Rust type.
    Named(Cow<'static, str>),
}

impl TypeIdentity {
    /// Returns `true` for name-only placeholders.
    #[must_use]
    pub fn is_named(&self) -> bool {
        matches!(self, Self::Named(_))
    }
}

/// The identity of the Rust type `T`.
#[must_use]
pub fn type_identity_of<T: 'static>() -> TypeIdentity {
    TypeIdentity::Native(TypeId::of::<T>())
}

/// `std::any::type_name` with module paths stripped, including inside generic
/// arguments: `my_game::physics::Body<alloc::string::String>` becomes
/// `Body<String>`.
#[must_use]
pub fn short_type_name<T: ?Sized>() -> String {
    strip_module_paths(std::any::type_name::<T>())
}

/// The registered name of a component instance.
#[must_use]
pub fn component_name(component: &dyn Component) -> String {
    component.component_type().name().to_string()
}

fn strip_module_paths(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment = String::new();
    for ch in full.chars() {
        match ch {
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | '&' | ';' => {
                out.push_str(last_path_segment(&segment));
                segment.clear();
                out.push(ch);
            }
            _ => segment.push(ch),
        }
    }
    out.push_str(last_path_segment(&segment));
    out
}

fn last_path_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}
