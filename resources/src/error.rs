use std::fmt;

/// Errors returned by [`ResourceManager::acquire`](crate::ResourceManager::acquire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// The handle does not refer to a resource.
    InvalidHandle,
    /// The resource is not of the requested type.
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    /// Loading finished but the data could not be found or decoded.
    Missing(String),
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquireError::InvalidHandle => write!(f, "invalid resource handle"),
            AcquireError::TypeMismatch { expected, found } => {
                write!(f, "resource type mismatch: expected {expected}, found {found}")
            }
            AcquireError::Missing(id) => write!(f, "resource is missing: {id}"),
        }
    }
}

impl std::error::Error for AcquireError {}
