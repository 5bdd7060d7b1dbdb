//! Error types shared by the configuration and media stores.

use crate::character::{CharacterId, MediaRef};
use std::fmt;

/// A single rejected field on a character configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} is not a finite number")]
    NotFinite { field: &'static str },

    #[error("name must be 1..={max} characters, got {len}")]
    InvalidName { len: usize, max: usize },

    #[error("object detection is enabled but no target class is set")]
    MissingTargetClass,
}

/// Every violation found on one configuration, in field order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationErrors(pub Vec<ConfigValidationError>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConfigValidationError> {
        self.0.iter()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("character {0} not found")]
    NotFound(CharacterId),

    #[error("media {0} not found")]
    MediaNotFound(MediaRef),

    #[error("version conflict on character {id}: expected {expected}, found {found}")]
    VersionConflict {
        id: CharacterId,
        expected: u64,
        found: u64,
    },

    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationErrors),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record: {0}")]
    Parse(String),
}
