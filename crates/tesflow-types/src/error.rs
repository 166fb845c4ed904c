use thiserror::Error;

/// Errors raised while converting a raw definition document into the typed AST.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("invalid task node '{id}': {message}")]
    InvalidNode { id: String, message: String },

    #[error("invalid condition: {0}")]
    InvalidCondition(String),
}

/// Errors related to run-state persistence.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("run not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_error_display() {
        let err = DefinitionError::InvalidNode {
            id: "fetch".to_string(),
            message: "missing 'tool'".to_string(),
        };
        assert_eq!(err.to_string(), "invalid task node 'fetch': missing 'tool'");
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Storage("disk full".to_string());
        assert_eq!(err.to_string(), "storage error: disk full");
        assert_eq!(RepositoryError::NotFound.to_string(), "run not found");
    }
}
