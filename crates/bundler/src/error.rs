//! Closed error taxonomy for the bundler core, mapped 1:1 onto a fixed table
//! of JSON-RPC error codes. Every variant carries its own `code()` so the
//! RPC layer can serialize a [`bundler_rpc::RpcError`] without a second
//! lookup table, the same convention `robzajac-rundler`'s `rpc/eth/error.rs`
//! uses for its `JsonRpcError` impls.

use alloy_primitives::{Address, B256};
use bundler_rpc::RpcError;
use thiserror::Error;

/// Validation and bundling errors a caller can receive back over JSON-RPC.
#[derive(Debug, Error)]
pub enum BundlerError {
    #[error("method not supported: {0}")]
    MethodNotSupported(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("simulate validation failed: {0}")]
    SimulateValidation(String),

    #[error("paymaster simulate validation failed: {0}")]
    PaymasterSimulateValidation(String),

    #[error("opcode or storage rule violation: {0}")]
    OpcodeValidation(String),

    #[error("user operation outside its valid time range")]
    NotInTimeRange,

    #[error("entity {0} has reputation status {1:?}")]
    Reputation(Address, bundler_types::ReputationStatus),

    #[error("insufficient stake for entity {0}")]
    InsufficientStake(Address),

    #[error("unsupported signature aggregator")]
    UnsupportedSignatureAggregator,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("user operation reverted during gas estimation: {0}")]
    UserOperationReverted(String),

    #[error("replacement underpriced: new fees must be at least 1.1x the existing entry")]
    InvalidFields,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl BundlerError {
    pub fn code(&self) -> i64 {
        match self {
            Self::MethodNotSupported(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::InvalidFields => -32602,
            Self::SimulateValidation(_) => -32500,
            Self::PaymasterSimulateValidation(_) => -32501,
            Self::OpcodeValidation(_) => -32502,
            Self::NotInTimeRange => -32503,
            Self::Reputation(..) => -32504,
            Self::InsufficientStake(_) => -32505,
            Self::UnsupportedSignatureAggregator => -32506,
            Self::InvalidSignature => -32507,
            Self::UserOperationReverted(_) => -32521,
            Self::Provider(_) => -32601,
        }
    }
}

impl From<BundlerError> for RpcError {
    fn from(err: BundlerError) -> Self {
        RpcError::new(err.code(), err.to_string())
    }
}

/// Errors talking to the external node collaborator, specified only at its
/// interface. A `MethodNotFound` from the node is
/// fatal and re-raised: a node returning -32601 means it doesn't implement
/// the method at all, not that this particular call failed.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("node RPC call failed: {0}")]
    Rpc(#[from] eyre::Report),

    #[error("node does not support method: {0}")]
    MethodNotFound(String),

    #[error("unknown user operation hash: {0}")]
    UnknownUserOperation(B256),
}
