//! # engine_command
//!
//! Deferred structural mutation for the ECS core.
//!
//! Systems record component adds, removes, activation changes and destroys
//! in a [`CommandBuffer`] while they iterate; the owning scene applies them
//! in one [`flush`](CommandBuffer::flush) at the end of the frame through the
//! [`EntityHandle`] trait.

pub mod buffer;
pub mod command;
pub mod config;
pub mod entity;
pub mod error;

pub use buffer::CommandBuffer;
pub use command::Command;
pub use config::{CommandBufferConfig, CommandMode};
pub use entity::{EntityHandle, SharedEntity, SharedRegistry};
pub use error::{CommandError, EntityError};
