use crate::mixer::PartitionKind;
use thiserror::Error;

/// Errors reported by the mixers and the mixer factory.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MixerError {
    #[error("unknown mixer type `{0}`, choose one of: linear, broyden1, broyden2")]
    UnknownType(String),
    #[error("invalid mixer configuration: {0}")]
    Config(String),
    #[error("{partition} index {index} is out of range, the partition has {size} elements")]
    OutOfRange {
        partition: PartitionKind,
        index: usize,
        size: usize,
    },
    #[error("weight {weight} of {partition} element {index} has to be finite and non-negative")]
    InvalidWeight {
        partition: PartitionKind,
        index: usize,
        weight: f64,
    },
    #[error("the mixer has to be initialized before it is used")]
    NotInitialized,
    #[error("numerical instability in {context}: {reason}")]
    NumericalInstability {
        context: &'static str,
        reason: String,
    },
}
