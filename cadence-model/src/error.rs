use std::fmt::{self, Display};

/// Errors produced when parsing model values from their wire or column form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    UnknownStatus(String),
    UnknownEvent(String),
    UnknownCreativeKind(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnknownStatus(value) => write!(f, "unknown campaign status: {value}"),
            ModelError::UnknownEvent(value) => write!(f, "unknown mutation event: {value}"),
            ModelError::UnknownCreativeKind(value) => {
                write!(f, "unknown creative kind: {value}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
