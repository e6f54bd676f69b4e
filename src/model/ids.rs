//! Newtype IDs for geometries and labels.
//!
//! Keeps instance identifiers (label values, shape and point ids) from being
//! mixed up with row indices.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one geometry, point or label value within an element.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub i64);

impl InstanceId {
    /// Creates a new InstanceId.
    #[inline]
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the underlying i64 value.
    #[inline]
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Label value `0` marks background in label rasters.
    #[inline]
    pub fn is_background(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for InstanceId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Sequential ids `0..n`, used when data arrives without explicit ids.
pub fn sequential_ids(n: usize) -> Vec<InstanceId> {
    (0..n as i64).map(InstanceId).collect()
}
