use thiserror::Error;

use crate::swap::{SubTxId, TxParameterId};

/// Failure surface reported to the outer transaction. The driver never
/// panics on node replies; everything consensus- or configuration-shaped
/// lands here and `is_fatal` tells the caller whether retrying the advance
/// can ever succeed.
#[derive(Debug, Error)]
pub enum SwapFailure {
    #[error("mandatory swap parameter {id:?} ({sub_tx:?}) is missing")]
    MissingParameter {
        id: TxParameterId,
        sub_tx: Option<SubTxId>,
    },

    #[error("bitcoin node call {method} failed: {message}")]
    Rpc {
        method: &'static str,
        message: String,
    },

    #[error("{sub_tx:?} broadcast was not accepted by the node")]
    FailedToRegister { sub_tx: SubTxId },

    #[error("{sub_tx:?} conflicts with an already broadcast withdraw")]
    ConflictingWithdraw { sub_tx: SubTxId },

    #[error("on-chain lock script does not match the expected contract")]
    ContractMismatch,

    #[error("lock output holds {actual} sats, expected at least {expected}")]
    UnexpectedAmount { expected: u64, actual: u64 },

    #[error("funded lock transaction has {outputs} outputs, expected at most 2")]
    UnexpectedFunding { outputs: usize },

    #[error("transaction signing failed: {0}")]
    Signing(String),

    #[error("swap was cancelled")]
    Cancelled,

    #[error("driver is halted after a fatal failure")]
    Halted,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SwapFailure {
    /// Transport and node errors are worth retrying from the outer
    /// transaction; everything else ends the swap path it occurred on.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SwapFailure::Rpc { .. } | SwapFailure::Other(_))
    }
}
