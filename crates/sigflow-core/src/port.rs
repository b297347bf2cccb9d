//! Typed vertex ports and sub-range restrictions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::connection_type::ConnectionType;

/// Typed port of a vertex: `size` elements of type `connection_type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    /// Number of elements.
    pub size: usize,
    /// Element type.
    pub connection_type: ConnectionType,
}

impl Port {
    /// Creates a port.
    pub const fn new(size: usize, connection_type: ConnectionType) -> Self {
        Self {
            size,
            connection_type,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port({}, {:?})", self.size, self.connection_type)
    }
}

/// Contiguous sub-range `[min, max]` (inclusive) of a source output used as input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRestriction {
    /// First element.
    pub min: usize,
    /// Last element, inclusive.
    pub max: usize,
}

impl PortRestriction {
    /// Creates a restriction covering `[min, max]`.
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    /// Number of elements covered; zero for an inverted range.
    pub const fn size(&self) -> usize {
        if self.max < self.min {
            0
        } else {
            self.max - self.min + 1
        }
    }

    /// Whether this restriction is a valid sub-range of `port`.
    pub const fn is_restriction_of(&self, port: &Port) -> bool {
        self.min <= self.max && self.max < port.size
    }

    /// Element indices covered.
    pub fn range(&self) -> std::ops::RangeInclusive<usize> {
        self.min..=self.max
    }
}
