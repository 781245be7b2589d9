use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one data-producing stream within a file: a device/source type
/// plus an instance index so several producers of the same type can coexist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId {
    pub type_id: u16,
    pub instance: u16,
}

impl StreamId {
    pub fn new(type_id: u16, instance: u16) -> Self {
        Self { type_id, instance }
    }

    /// Stable human-readable name derived from the type id.
    pub fn type_name(&self) -> &'static str {
        match self.type_id {
            100 => "camera",
            101 => "imu",
            102 => "audio",
            103 => "gps",
            200 => "annotation",
            _ => "stream",
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}-{}", self.type_name(), self.type_id, self.instance)
    }
}
