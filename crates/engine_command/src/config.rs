//! Command buffer configuration.

use serde::{Deserialize, Serialize};

/// How a [`CommandBuffer`](crate::CommandBuffer) records operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandMode {
    /// One bucket per entity; later operations overwrite or cancel earlier
    /// ones and destroy wins over everything.
    #[default]
    Deduplicated,
    /// Flat queue applied in recording order with no merging.
    Queued,
}

/// Configuration for [`CommandBuffer`](crate::CommandBuffer).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBufferConfig {
    pub mode: CommandMode,
}

impl CommandBufferConfig {
    #[must_use]
    pub fn with_mode(mut self, mode: CommandMode) -> Self {
        self.mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_deduplicated() {
        assert_eq!(CommandBufferConfig::default().mode, CommandMode::Deduplicated);
    }

    #[test]
    fn test_mode_serialises_by_name() {
        let config = CommandBufferConfig::default().with_mode(CommandMode::Queued);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"mode":"Queued"}"#);
    }
}
