use serde::{Deserialize, Serialize};
use std::fmt;

use crate::membership::types::SlaveEndpoint;

/// Opaque, globally unique name of one unit of content.
///
/// Minted by the master at placement time from a random 128-bit UUID. The
/// slave only ever sees content under its tag, never under its path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Tag(pub String);

impl Tag {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Tag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a path's content lives. Created once per path and never changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathLocation {
    pub slave: SlaveEndpoint,
    pub tag: Tag,
}

impl fmt::Display for PathLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.tag, self.slave)
    }
}
