use thiserror::Error;

/// Core error types for replaygate operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid Todo id: {0}")]
    InvalidId(String),

    #[error("Todo not found: {id}")]
    TodoNotFound { id: String },
}

impl CoreError {
    /// Create a new InvalidId error
    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::InvalidId(id.into())
    }

    /// Create a new TodoNotFound error
    pub fn todo_not_found(id: impl Into<String>) -> Self {
        Self::TodoNotFound { id: id.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_todo_not_found_error() {
        let err = CoreError::todo_not_found("123");
        assert_eq!(err.to_string(), "Todo not found: 123");
    }

    #[test]
    fn test_invalid_id_error() {
        let err = CoreError::invalid_id("abc");
        assert_eq!(err.to_string(), "Invalid Todo id: abc");
    }
}
