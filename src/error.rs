use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The bitset or ring for a window of `period` slots could not be reserved.
    #[error("failed to allocate id window of {period} slots")]
    AllocationFailure { period: usize },

    #[error("random id period {requested} outside of [{min}, {max}]")]
    InvalidPeriod {
        requested: usize,
        min: usize,
        max: usize,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, IdError>;
