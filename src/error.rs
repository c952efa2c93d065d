use thiserror::Error;

/// Errors returned by the fitting, persistence and sampling routines in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Input slice is empty.
    #[error("empty input")]
    EmptyInput,

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Human-readable explanation.
        message: &'static str,
    },

    /// Samples in a dataset (or a model and a sample) have inconsistent dimensionality.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected dimensionality.
        expected: usize,
        /// Found dimensionality.
        found: usize,
    },

    /// The group-id sequence breaks the layout contract (non-decreasing, `< group_count`).
    #[error("input contract violation at index {index}: {message}")]
    InputContract {
        /// Position in the input sequence where the violation was detected.
        index: usize,
        /// Human-readable explanation.
        message: String,
    },

    /// Samples and group ids are not parallel arrays.
    #[error("length mismatch: {samples} samples but {group_ids} group ids")]
    LengthMismatch {
        /// Number of samples.
        samples: usize,
        /// Number of group ids.
        group_ids: usize,
    },

    /// A group id does not address a model in the collection.
    #[error("group {group} out of range for {group_count} groups")]
    InvalidGroup {
        /// Requested group.
        group: usize,
        /// Number of groups available.
        group_count: usize,
    },

    /// The mixture of a group has no positive weight and cannot be sampled.
    #[error("group {group} has an empty mixture (all weights are zero)")]
    EmptyMixture {
        /// Group whose mixture is empty.
        group: usize,
    },

    /// Reading or writing a model file failed (including truncated files).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A model file is not in the expected format.
    #[error("format error: {0}")]
    Format(String),

    /// The executor could not be set up.
    #[error("executor error: {0}")]
    Executor(String),
}

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;
