//! Read/write environment classification
//!
//! Every routed operation runs in exactly one environment: the write
//! primary or one of the read classes. The environment is part of the pool
//! key, so the same shard is served by a different pool per environment.

use crate::{Result, RouterError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classification of the current operation
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Write primary
    #[default]
    #[serde(alias = "master")]
    Primary,
    /// General read replica
    #[serde(alias = "slave", alias = "secondary")]
    Replica,
    /// Replica class reserved for deploy-time work (migrations, backfills)
    Deploy,
}

impl Environment {
    /// All environments, primary first
    pub const ALL: [Environment; 3] = [
        Environment::Primary,
        Environment::Replica,
        Environment::Deploy,
    ];

    /// Canonical configuration name
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Primary => "primary",
            Environment::Replica => "replica",
            Environment::Deploy => "deploy",
        }
    }

    /// Whether this is the write primary
    pub fn is_primary(&self) -> bool {
        matches!(self, Environment::Primary)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "primary" | "master" => Ok(Environment::Primary),
            "replica" | "slave" | "secondary" => Ok(Environment::Replica),
            "deploy" => Ok(Environment::Deploy),
            _ => Err(RouterError::validation_error(
                format!("Unknown environment: {}", s),
                Some("Valid environments: primary, replica, deploy".to_string()),
            )),
        }
    }
}
