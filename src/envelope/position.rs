use std::fmt;

use serde::{Deserialize, Serialize};

/// Location of a record inside an endpoint: a partition and an offset in it.
///
/// Offsets are only comparable within a single partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub partition: u32,
    pub offset: u64,
}

impl Position {
    pub fn new(partition: u32, offset: u64) -> Self {
        Self { partition, offset }
    }

    /// True when `self` is strictly after `offset` on the same partition.
    pub fn is_newer_than(&self, offset: u64) -> bool {
        self.offset > offset
    }

    /// The position right after this one.
    pub fn next(&self) -> Self {
        Self::new(self.partition, self.offset + 1)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]@{}", self.partition, self.offset)
    }
}
