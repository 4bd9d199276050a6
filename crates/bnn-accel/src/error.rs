//! Error types for the accelerator
//!
//! Every variant is a violated precondition. Callers abort the run on error.

use crate::engine::{LayerKind, NormMode};

/// Accelerator-specific errors
#[derive(thiserror::Error, Debug)]
pub enum AccelError {
    /// Image width has no width-mode encoding
    #[error("unsupported image width {0}: expected 8, 16 or 32")]
    UnsupportedWidth(usize),

    /// Layer with zero inputs or outputs
    #[error("empty layer: {n_inputs} inputs, {n_outputs} outputs")]
    EmptyLayer { n_inputs: usize, n_outputs: usize },

    /// Input channels cannot be spread evenly across lanes
    #[error("input channel count {n_inputs} is not divisible by {lanes} lanes")]
    InputsNotLaneAligned { n_inputs: usize, lanes: usize },

    /// Dense input is not a whole number of words per lane
    #[error("dense input of {n_inputs} bits is not a whole number of words across {lanes} lanes")]
    DenseInputNotAligned { n_inputs: usize, lanes: usize },

    /// The first layer is fixed to three channels
    #[error("first layer takes 3 input channels, got {0}")]
    FirstLayerChannels(usize),

    /// Batch size search found no divisor
    #[error("no batch size divides {n_outputs} outputs within bound {bound}")]
    NoBatchDivisor { n_outputs: usize, bound: usize },

    /// Input feature maps exceed the feature-map store
    #[error("input does not fit the feature-map store: need {required}, capacity {capacity}")]
    InputTooLarge { required: usize, capacity: usize },

    /// Output feature maps exceed the feature-map store
    #[error("output does not fit the feature-map store: need {required}, capacity {capacity}")]
    OutputTooLarge { required: usize, capacity: usize },

    /// Weight slice exceeds the weight store
    #[error("weight slice overflow: need {required} words per lane, capacity {capacity}")]
    WeightOverflow { required: usize, capacity: usize },

    /// Threshold slice exceeds the threshold store
    #[error("threshold slice overflow: need {required} words, capacity {capacity}")]
    ThresholdOverflow { required: usize, capacity: usize },

    /// Layer cursor points before the loaded slice
    #[error("{store} cursor {cursor} precedes the loaded slice starting at {base}")]
    CursorBeforeSlice {
        store: &'static str,
        cursor: usize,
        base: usize,
    },

    /// Dense weight rows must start on a lane boundary
    #[error("dense weight offset {offset} is not aligned to {lanes} lanes")]
    WeightsNotLaneAligned { offset: usize, lanes: usize },

    /// Quarter-word pooling needs whole output words
    #[error("pooling at width 8 needs an output count divisible by 4, got {0}")]
    PoolingNotQuarterAligned(usize),

    /// Normalization mode not applicable to the layer kind
    #[error("norm mode {mode:?} is not valid for {kind:?} layers")]
    UnsupportedNormMode { kind: LayerKind, mode: NormMode },

    /// Caller-supplied array has the wrong length
    #[error("{what} has {actual} elements, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for accelerator operations
pub type Result<T> = std::result::Result<T, AccelError>;
