//! In-process fake standing in for the Ethereum node collaborator, the same
//! role `NodeConfig::test()` plays for `anvil`'s own test suite. Not gated
//! behind `#[cfg(test)]` so both in-crate unit tests and the `tests/`
//! integration suite can share one implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use bundler_types::{ConditionalOptions, StakeInfo, TracerResult};

use crate::error::ProviderError;
use crate::provider::{EntryPointLog, FeeData, NodeProvider, SendBundleOutcome, ValidationResult};

#[derive(Default)]
pub struct MockNodeProvider {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    code: HashMap<Address, Bytes>,
    balances: HashMap<Address, U256>,
    proof_storage_roots: HashMap<Address, B256>,
    deposits: HashMap<(Address, Address), StakeInfo>,
    traces: HashMap<Vec<u8>, (TracerResult, ValidationResult)>,
    unsafe_results: HashMap<Vec<u8>, ValidationResult>,
    logs: Vec<EntryPointLog>,
    block_number: u64,
    signer: Address,
    nonce: U256,
    next_send_outcome: Option<SendBundleOutcome>,
    last_conditional: Option<Option<ConditionalOptions>>,
}

impl MockNodeProvider {
    pub fn set_code(&self, addr: Address, code: Bytes) {
        self.state.lock().unwrap().code.insert(addr, code);
    }

    pub fn set_balance(&self, addr: Address, balance: U256) {
        self.state.lock().unwrap().balances.insert(addr, balance);
    }

    pub fn set_proof_storage_root(&self, addr: Address, root: B256) {
        self.state.lock().unwrap().proof_storage_roots.insert(addr, root);
    }

    pub fn set_deposit(&self, entry_point: Address, addr: Address, info: StakeInfo) {
        self.state.lock().unwrap().deposits.insert((entry_point, addr), info);
    }

    pub fn queue_trace(&self, packed_user_op: Vec<u8>, trace: TracerResult, result: ValidationResult) {
        self.state.lock().unwrap().traces.insert(packed_user_op, (trace, result));
    }

    pub fn queue_unsafe_result(&self, packed_user_op: Vec<u8>, result: ValidationResult) {
        self.state.lock().unwrap().unsafe_results.insert(packed_user_op, result);
    }

    pub fn push_log(&self, log: EntryPointLog) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn set_block_number(&self, n: u64) {
        self.state.lock().unwrap().block_number = n;
    }

    pub fn set_signer(&self, addr: Address, nonce: U256) {
        let mut state = self.state.lock().unwrap();
        state.signer = addr;
        state.nonce = nonce;
    }

    pub fn queue_send_outcome(&self, outcome: SendBundleOutcome) {
        self.state.lock().unwrap().next_send_outcome = Some(outcome);
    }

    /// The `conditional` argument of the most recent `send_handle_ops` call.
    pub fn last_conditional(&self) -> Option<Option<ConditionalOptions>> {
        self.state.lock().unwrap().last_conditional.clone()
    }
}

#[async_trait]
impl NodeProvider for MockNodeProvider {
    async fn trace_simulate_validation(
        &self,
        _entry_point: Address,
        packed_user_op: &[u8],
    ) -> Result<(TracerResult, ValidationResult), ProviderError> {
        self.state
            .lock()
            .unwrap()
            .traces
            .get(packed_user_op)
            .cloned()
            .ok_or_else(|| ProviderError::MethodNotFound("debug_traceCall".into()))
    }

    async fn call_simulate_validation(
        &self,
        _entry_point: Address,
        packed_user_op: &[u8],
    ) -> Result<ValidationResult, ProviderError> {
        self.state
            .lock()
            .unwrap()
            .unsafe_results
            .get(packed_user_op)
            .cloned()
            .ok_or_else(|| ProviderError::MethodNotFound("eth_call".into()))
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, ProviderError> {
        Ok(self.state.lock().unwrap().code.get(&address).cloned().unwrap_or_default())
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ProviderError> {
        Ok(self.state.lock().unwrap().balances.get(&address).copied().unwrap_or_default())
    }

    async fn balance_of(&self, _entry_point: Address, account: Address) -> Result<U256, ProviderError> {
        Ok(self.state.lock().unwrap().balances.get(&account).copied().unwrap_or_default())
    }

    async fn get_deposit_info(
        &self,
        entry_point: Address,
        account: Address,
    ) -> Result<StakeInfo, ProviderError> {
        self.state
            .lock()
            .unwrap()
            .deposits
            .get(&(entry_point, account))
            .copied()
            .ok_or(ProviderError::UnknownUserOperation(B256::ZERO))
    }

    async fn get_block_number(&self) -> Result<u64, ProviderError> {
        Ok(self.state.lock().unwrap().block_number)
    }

    async fn fee_data(&self) -> Result<FeeData, ProviderError> {
        Ok(FeeData {
            max_fee_per_gas: U256::from(2_000_000_000u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
        })
    }

    async fn signer_address(&self) -> Result<Address, ProviderError> {
        Ok(self.state.lock().unwrap().signer)
    }

    async fn signer_nonce(&self) -> Result<U256, ProviderError> {
        Ok(self.state.lock().unwrap().nonce)
    }

    async fn get_proof_storage_root(&self, address: Address) -> Result<B256, ProviderError> {
        Ok(self.state.lock().unwrap().proof_storage_roots.get(&address).copied().unwrap_or_default())
    }

    async fn get_entry_point_logs(
        &self,
        _entry_point: Address,
        _from_block: u64,
        _to_block: u64,
    ) -> Result<Vec<EntryPointLog>, ProviderError> {
        Ok(self.state.lock().unwrap().logs.clone())
    }

    async fn send_handle_ops(
        &self,
        _entry_point: Address,
        _packed_user_ops: Vec<Vec<u8>>,
        _beneficiary: Address,
        _fee_data: FeeData,
        conditional: Option<ConditionalOptions>,
    ) -> Result<SendBundleOutcome, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.last_conditional = Some(conditional);
        state
            .next_send_outcome
            .take()
            .ok_or_else(|| ProviderError::MethodNotFound("eth_sendRawTransaction".into()))
    }
}
