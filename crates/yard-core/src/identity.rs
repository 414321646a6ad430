//! # Run Identity
//!
//! The [`RunId`] newtype identifies one training run across the whole
//! system: queue entries, progress updates, archived artifacts, and
//! tracking records all key off it. UUID-based, always valid by
//! construction — you cannot pass an arbitrary string where a `RunId`
//! is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for a single training run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random run identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a run identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RunId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}
