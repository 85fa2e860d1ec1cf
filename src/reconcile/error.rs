/// A reconciliation defect. Unlike a degraded evidence source this is never expected
/// and always aborts the analysis.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReconciliationError {
    #[error("size total of {partition} files overflowed")]
    Overflow { partition: &'static str },

    #[error("partition invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, ReconciliationError>;
