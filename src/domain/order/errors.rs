// ============================================================================
// Order Message Errors
// ============================================================================

/// Every field-level violation found in one inbound message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}", .violations.join("; "))]
pub struct ValidationError {
    pub violations: Vec<String>,
}

impl ValidationError {
    #[cfg(test)]
    pub fn contains(&self, violation: &str) -> bool {
        self.violations.iter().any(|v| v == violation)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("parse order_uid: {0}")]
    InvalidOrderUid(#[from] uuid::Error),

    #[error("date_created is missing")]
    MissingDateCreated,
}
