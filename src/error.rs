//! Error types for the risk-analyzer client core.

use alloy_primitives::U256;
use thiserror::Error;

/// Errors surfaced by the client core.
///
/// Staleness is deliberately absent: a stale operation is not an error, its
/// result is silently dropped and the outcome is reported as
/// [`OpOutcome::Discarded`](crate::OpOutcome::Discarded).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The loaded runtime module does not satisfy the structural contract.
    #[error("invalid runtime shape: {0}")]
    InvalidRuntimeShape(String),

    /// Fetching the runtime module failed.
    #[error("failed to load runtime module: {0}")]
    LoadFailure(String),

    /// An operation required the connector before it was ready.
    #[error("connector is not ready")]
    NoConnector,

    /// The user declined the authorization signature request.
    #[error("decryption authorization signature rejected")]
    SignatureRejected,

    /// Transaction reverted or failed to confirm.
    #[error("submission failed: {0}")]
    SubmissionFailure(String),

    /// Batched decrypt call failed or returned an incomplete set.
    #[error("decryption failed: {0}")]
    DecryptionFailure(String),

    /// No contract deployment exists for the given chain.
    #[error("contract not deployed on chain {0}")]
    NotDeployed(u64),

    /// The contract is backed by a confidential-compute protocol instance
    /// this client does not support.
    #[error("unsupported confidential protocol id {0}")]
    UnsupportedProtocol(U256),

    /// A read-only RPC call failed.
    #[error("rpc call failed: {0}")]
    Rpc(String),

    /// The pluggable grant store failed.
    #[error("storage error: {0}")]
    Storage(String),
}
