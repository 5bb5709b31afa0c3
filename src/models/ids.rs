//! Strongly-typed positional id wrappers
//!
//! Category and subcategory ids are dense positions inside one taxonomy
//! snapshot. Wrapping them keeps the two from being swapped at call sites.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate positional id newtype wrappers
macro_rules! define_id {
    ($name:ident, $display_prefix:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Create an id from a raw position
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Raw position
            pub const fn get(&self) -> u32 {
                self.0
            }

            /// Position as a slice index
            pub const fn index(&self) -> usize {
                self.0 as usize
            }

            /// Build an id from a slice index, if it fits in 32 bits
            pub fn from_index(index: usize) -> Option<Self> {
                u32::try_from(index).ok().map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $display_prefix, self.0)
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }
    };
}

define_id!(CategoryId, "cat-");
define_id!(SubCategoryId, "sub-");
