use thiserror::Error;

use crate::common::Phase;
use crate::pool::TxId;

/// A phase arrived where the receiving state machine forbids it. These are
/// defects of the simulated system and end the run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("{endpoint}: illegal transaction phase {phase} received")]
    IllegalPhase { endpoint: String, phase: Phase },

    #[error("{endpoint}: {phase} received for {tx}, which is not in flight here")]
    UnexpectedTransaction { endpoint: String, tx: TxId, phase: Phase },

    #[error("{endpoint}: illegal transaction phase END_RESP received for {tx} with no response in progress")]
    NoResponseInProgress { endpoint: String, tx: TxId },

    #[error("{endpoint}: attempt to have two pending responses ({tx} would be the third in flight)")]
    ResponseOverflow { endpoint: String, tx: TxId },

    #[error("{endpoint}: no room to defer {tx}, {depth} request(s) already wait for END_REQ")]
    AcceptOverflow { endpoint: String, tx: TxId, depth: usize },

    #[error("{endpoint}: BEGIN_REQ for {tx} issued while {outstanding} still waits for END_REQ")]
    ExclusionViolated { endpoint: String, tx: TxId, outstanding: TxId },

    #[error("{endpoint}: no route recorded for {tx} ({phase})")]
    UnknownRoute { endpoint: String, tx: TxId, phase: Phase },

    #[error("{endpoint}: socket is not bound")]
    Unbound { endpoint: String },
}

/// Misuse of pooled transactions. Always a defect of the calling state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("{0} used after it was returned to the pool")]
    Stale(TxId),

    #[error("reference count of {0} released below zero")]
    Underflow(TxId),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("{endpoint}: write operation failed, read back {actual:02x?} from {address:#x}, expected {expected:02x?}")]
    Readback { endpoint: String, address: u64, expected: Vec<u8>, actual: Vec<u8> },
}
