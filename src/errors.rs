//! Error taxonomy of a keeper run.
//!
//! Only an unavailable gas oracle is absorbed (see [`crate::gas::OracleUnavailable`]);
//! everything here ends the run and is reported by the controller.

use alloy::primitives::B256;

/// Node or ABI failure while checking whether execution is due.
#[derive(Debug, thiserror::Error)]
#[error("failed to read execution predicate: {0:#}")]
pub struct PredicateReadError(pub anyhow::Error);

/// Coarse classification of a node's rejection message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    InsufficientFunds,
    ReplacementUnderpriced,
    NonceTooLow,
    AlreadyKnown,
    Other,
}

impl RpcErrorKind {
    pub fn classify(message: &str) -> Self {
        let message = message.to_lowercase();
        if message.contains("insufficient funds") {
            RpcErrorKind::InsufficientFunds
        } else if message.contains("underpriced") {
            RpcErrorKind::ReplacementUnderpriced
        } else if message.contains("nonce too low") {
            RpcErrorKind::NonceTooLow
        } else if message.contains("already known") || message.contains("known transaction") {
            RpcErrorKind::AlreadyKnown
        } else {
            RpcErrorKind::Other
        }
    }
}

/// Human-readable message for a node error
pub fn describe_rpc_error(error: &anyhow::Error) -> String {
    let message = format!("{error:#}");
    match RpcErrorKind::classify(&message) {
        RpcErrorKind::InsufficientFunds => {
            "Insufficient ETH for gas. Please fund the account.".to_string()
        }
        RpcErrorKind::ReplacementUnderpriced => {
            "Transaction underpriced. A pending transaction may be blocking.".to_string()
        }
        RpcErrorKind::NonceTooLow => {
            "Nonce too low. A transaction may have been confirmed already.".to_string()
        }
        RpcErrorKind::AlreadyKnown => "Transaction already known to the node.".to_string(),
        RpcErrorKind::Other => message,
    }
}

/// Signing, broadcast or node failure during submission. Terminal for the run.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error(
        "a transaction is already pending for this account (latest nonce {latest}, pending nonce {pending})"
    )]
    PendingTransaction { latest: u64, pending: u64 },
    #[error("call would revert: {0}")]
    WouldRevert(String),
    #[error("failed to sign transaction: {0}")]
    Signing(String),
    #[error("broadcast rejected: {message}")]
    Broadcast { kind: RpcErrorKind, message: String },
    #[error("node error while {stage}: {message}")]
    Node { stage: &'static str, message: String },
    #[error("nonce {nonce} was consumed by a transaction not sent in this run")]
    NonceConsumed { nonce: u64 },
    #[error("not mined after {waited_secs}s{}", pending_suffix(.last_tx))]
    Timeout {
        waited_secs: u64,
        last_tx: Option<B256>,
    },
}

fn pending_suffix(last_tx: &Option<B256>) -> String {
    match last_tx {
        Some(tx_hash) => format!(", transaction {tx_hash:?} remains pending"),
        None => ", no transaction was accepted by the node".to_string(),
    }
}

impl SubmissionError {
    pub(crate) fn node(stage: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |error| SubmissionError::Node {
            stage,
            message: describe_rpc_error(&error),
        }
    }

    pub(crate) fn broadcast(error: anyhow::Error) -> Self {
        let raw = format!("{error:#}");
        SubmissionError::Broadcast {
            kind: RpcErrorKind::classify(&raw),
            message: describe_rpc_error(&error),
        }
    }
}

/// Why a run ended as `Failed`
#[derive(Debug, thiserror::Error)]
pub enum FailureReason {
    #[error(transparent)]
    PredicateRead(#[from] PredicateReadError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    /// Mined but reverted; gas was spent
    #[error("transaction {tx_hash:?} reverted on-chain (gas used {gas_used})")]
    OnChainRevert { tx_hash: B256, gas_used: u64 },
    #[error("interrupted before completion; any broadcast transaction remains pending")]
    Interrupted,
}
