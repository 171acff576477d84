//! Seam to the underlying Ethereum node, specified only at its interface:
//! `eth_call`, `eth_estimateGas`, `eth_getCode`, `eth_getBalance`,
//! `eth_getBlockByNumber`, `eth_sendRawTransaction`, `debug_traceCall`,
//! `eth_sendRawTransactionConditional`, event log queries, transaction
//! signing. Every component that needs the node takes an `Arc<dyn
//! NodeProvider>`, mirroring the `Arc<Provider<Http>>` / generic `M:
//! Middleware` pattern the rundler examples use throughout
//! `common/simulation.rs` and `uopool.rs`.

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use bundler_types::{ConditionalOptions, StakeInfo, TracerResult};

use crate::error::ProviderError;

/// One ERC-4337 EntryPoint log of interest to the Events Manager.
#[derive(Clone, Debug)]
pub enum EntryPointLog {
    UserOperationEvent { user_op_hash: B256, tx_hash: B256, block_number: u64 },
    AccountDeployed { factory: Address, tx_hash: B256, block_number: u64 },
    SignatureAggregatorForUserOperations { aggregator: Address, tx_hash: B256, block_number: u64 },
}

/// Outcome of `simulateValidation`, decoded from either a `callStatic` revert
/// (unsafe mode) or the final tracer frame (safe mode).
#[derive(Clone, Debug)]
pub struct ValidationResult {
    pub pre_op_gas: U256,
    pub valid_after: u64,
    pub valid_until: u64,
    pub sig_failed: bool,
    pub aggregator: Option<Address>,
}

/// Decoded `FailedOp(opIndex, reason)` revert from `handleOps`.
#[derive(Clone, Debug)]
pub struct FailedOp {
    pub op_index: u64,
    pub reason: String,
}

/// Fee data as reported by the node for populating a `handleOps` transaction.
#[derive(Clone, Copy, Debug, Default)]
pub struct FeeData {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Outcome of dispatching a `handleOps` transaction.
#[derive(Clone, Debug)]
pub enum SendBundleOutcome {
    Sent { transaction_hash: B256, user_op_hashes: Vec<B256> },
    Failed(FailedOp),
}

#[async_trait]
#[auto_impl::auto_impl(Arc)]
pub trait NodeProvider: Send + Sync {
    /// `debug_traceCall(EntryPoint.simulateValidation(userOp))` with the
    /// instrumented tracer attached (safe mode). The
    /// final trace frame's revert payload is ABI-decoded into a
    /// [`ValidationResult`] by the provider, which alone knows the
    /// EntryPoint's `ValidationResult`/`FailedOp` error ABI.
    async fn trace_simulate_validation(
        &self,
        entry_point: Address,
        packed_user_op: &[u8],
    ) -> Result<(TracerResult, ValidationResult), ProviderError>;

    /// `callStatic simulateValidation(userOp, gasLimit=10_000_000)` (unsafe
    /// mode).
    async fn call_simulate_validation(
        &self,
        entry_point: Address,
        packed_user_op: &[u8],
    ) -> Result<ValidationResult, ProviderError>;

    async fn get_code(&self, address: Address) -> Result<Bytes, ProviderError>;

    async fn get_balance(&self, address: Address) -> Result<U256, ProviderError>;

    async fn balance_of(&self, entry_point: Address, account: Address) -> Result<U256, ProviderError>;

    async fn get_deposit_info(
        &self,
        entry_point: Address,
        account: Address,
    ) -> Result<StakeInfo, ProviderError>;

    async fn get_block_number(&self) -> Result<u64, ProviderError>;

    async fn fee_data(&self) -> Result<FeeData, ProviderError>;

    async fn signer_address(&self) -> Result<Address, ProviderError>;

    async fn signer_nonce(&self) -> Result<U256, ProviderError>;

    /// `eth_getProof(sender)`, used for the optional account-root mode of the
    /// bundle's storage map.
    async fn get_proof_storage_root(&self, address: Address) -> Result<B256, ProviderError>;

    /// Query `[from_block, to_block]` for the EntryPoint's log events.
    async fn get_entry_point_logs(
        &self,
        entry_point: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EntryPointLog>, ProviderError>;

    /// Sign and dispatch a `handleOps(ops, beneficiary)` transaction, either
    /// via `eth_sendRawTransactionConditional` or plain
    /// `eth_sendRawTransaction` depending on `conditional`.
    async fn send_handle_ops(
        &self,
        entry_point: Address,
        packed_user_ops: Vec<Vec<u8>>,
        beneficiary: Address,
        fee_data: FeeData,
        conditional: Option<ConditionalOptions>,
    ) -> Result<SendBundleOutcome, ProviderError>;
}
