use super::coordinator::BatchId;
use crate::convert::ConversionError;
use crate::offsets::LedgerError;
use crate::registry::RegistryError;
use crate::task::TaskError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Invalid bridge configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("Source task error: {0}")]
    Task(#[from] TaskError),
    #[error("Offset ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Record conversion failed: {0}")]
    Conversion(#[from] ConversionError),
    #[error("Batch {batch} was fully acknowledged but had no offsets to flush")]
    NoOffsetsPending { batch: BatchId },
    #[error("Batch {batch} received more acknowledgments than records")]
    DoubleAcknowledgment { batch: BatchId },
    #[error("Batch {batch} is still open")]
    BatchStillOpen { batch: BatchId },
    #[error("Bridge is closed")]
    Closed,
}

impl BridgeError {
    /// Whether the bridge must stop. Everything `read()` returns is fatal;
    /// the distinction matters to callers that also see `open()` errors.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BridgeError::Closed)
    }

    /// Logic errors in the bridge or its callers, as opposed to failures of
    /// an external collaborator.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            BridgeError::NoOffsetsPending { .. }
                | BridgeError::DoubleAcknowledgment { .. }
                | BridgeError::BatchStillOpen { .. }
        )
    }
}
