//! Replication engine configuration
//!
//! Author: Moroya Sakamoto

use serde::{Deserialize, Serialize};

use crate::error::{Result, VcsError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Compare-and-set attempts per push before giving up
    pub max_push_attempts: u32,
    /// Branch created by `init_repository`
    pub default_branch: String,
    /// Versions searched for an earlier copy of a resubmitted push
    pub duplicate_search_depth: usize,
    /// Versions visited when looking for a common ancestor
    pub ancestry_search_limit: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_push_attempts: 5,
            default_branch: String::from("default"),
            duplicate_search_depth: 64,
            ancestry_search_limit: 10_000,
        }
    }
}

impl ReplicationConfig {
    /// Parse and validate; omitted fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| VcsError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_push_attempts == 0 {
            return Err(VcsError::InvalidConfig(String::from(
                "max_push_attempts must be at least 1",
            )));
        }
        if self.default_branch.trim().is_empty() {
            return Err(VcsError::InvalidConfig(String::from(
                "default_branch must not be empty",
            )));
        }
        if self.ancestry_search_limit == 0 {
            return Err(VcsError::InvalidConfig(String::from(
                "ancestry_search_limit must be at least 1",
            )));
        }
        Ok(())
    }
}
