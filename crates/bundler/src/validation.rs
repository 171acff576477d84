//! Validation Manager (Component C): input checks, `simulateValidation`
//! dispatch (safe vs. unsafe mode), and the post-checks required before a
//! UserOperation is admitted to the mempool.

use std::sync::Arc;

use alloy_primitives::{keccak256, Address, B256, U256};
use bundler_types::{ReferencedContracts, UserOperation};
use tracing::instrument;

use crate::error::BundlerError;
use crate::provider::NodeProvider;
use crate::tracer::{parse_tracer_result, EntityAddresses};

/// Parameters for `calcPreVerificationGas`. Fixed per the bundler's
/// configured profile; not user-configurable.
#[derive(Clone, Copy, Debug)]
pub struct GasOverheadParams {
    pub fixed: u64,
    pub per_user_op: u64,
    pub per_user_op_word: u64,
    pub zero_byte: u64,
    pub non_zero_byte: u64,
    pub bundle_size: u64,
    pub sig_size: usize,
}

impl Default for GasOverheadParams {
    fn default() -> Self {
        Self {
            fixed: 21_000,
            per_user_op: 18_300,
            per_user_op_word: 4,
            zero_byte: 4,
            non_zero_byte: 16,
            bundle_size: 1,
            sig_size: 65,
        }
    }
}

/// Deterministic function of the packed UO. The
/// signature is replaced with `sig_size` zero bytes so the estimate does not
/// depend on the actual (variable-length) signature content.
pub fn calc_pre_verification_gas(op: &UserOperation, params: GasOverheadParams) -> U256 {
    let mut packed = Vec::new();
    packed.extend_from_slice(op.sender.as_slice());
    packed.extend_from_slice(&op.nonce.to_be_bytes::<32>());
    packed.extend_from_slice(&op.init_code);
    packed.extend_from_slice(&op.call_data);
    packed.extend_from_slice(&op.call_gas_limit.to_be_bytes::<32>());
    packed.extend_from_slice(&op.verification_gas_limit.to_be_bytes::<32>());
    packed.extend_from_slice(&op.pre_verification_gas.to_be_bytes::<32>());
    packed.extend_from_slice(&op.max_fee_per_gas.to_be_bytes::<32>());
    packed.extend_from_slice(&op.max_priority_fee_per_gas.to_be_bytes::<32>());
    packed.extend_from_slice(&op.paymaster_and_data);
    packed.extend(std::iter::repeat(0u8).take(params.sig_size));

    let call_data_cost: u64 = packed
        .iter()
        .map(|&b| if b == 0 { params.zero_byte } else { params.non_zero_byte })
        .sum();
    let words = (packed.len() as u64 + 31) / 32;

    let total = call_data_cost
        + params.fixed / params.bundle_size
        + params.per_user_op
        + params.per_user_op_word * words;
    U256::from(total)
}

/// `requiredPrefund = (callGasLimit + verificationGasLimit·(paymaster present ? 3 : 1) +
/// preVerificationGas) · maxFeePerGas`, the deposit the sender or paymaster
/// must cover (EntryPoint's own `_getRequiredPrefund`). Feeds
/// `MempoolEntry::prefund` and the paymaster-balance tracking during bundle
/// building.
pub fn required_prefund(op: &UserOperation) -> U256 {
    let verification_multiplier = if op.paymaster().is_some() { 3u64 } else { 1 };
    let total_gas =
        op.call_gas_limit + op.verification_gas_limit * U256::from(verification_multiplier) + op.pre_verification_gas;
    total_gas * op.max_fee_per_gas
}

/// Result of a completed `simulateValidation` plus the parsed tracer output,
/// feeding straight into a `MempoolEntry`.
#[derive(Clone, Debug)]
pub struct ValidationOutput {
    pub pre_op_gas: U256,
    pub valid_after: u64,
    pub valid_until: u64,
    pub referenced_contracts: ReferencedContracts,
    pub storage_map: bundler_types::StorageMap,
}

pub struct ValidationManager<P> {
    provider: Arc<P>,
    entry_point: Address,
    unsafe_mode: bool,
}

impl<P: NodeProvider> ValidationManager<P> {
    pub fn new(provider: Arc<P>, entry_point: Address, unsafe_mode: bool) -> Self {
        Self { provider, entry_point, unsafe_mode }
    }

    /// Static input check, ahead of any simulation.
    pub fn check_input(&self, entry_point: Address, op: &UserOperation) -> Result<(), BundlerError> {
        if entry_point != self.entry_point {
            return Err(BundlerError::InvalidParams("entry point mismatch".into()));
        }
        check_variable_length(&op.init_code, "initCode")?;
        check_variable_length(&op.paymaster_and_data, "paymasterAndData")?;

        let min_pre_verification_gas = calc_pre_verification_gas(op, GasOverheadParams::default());
        if op.pre_verification_gas < min_pre_verification_gas {
            return Err(BundlerError::InvalidParams(format!(
                "preVerificationGas too low: {} < {min_pre_verification_gas}",
                op.pre_verification_gas
            )));
        }
        Ok(())
    }

    /// Drives simulation, parses the result, and runs the post-checks.
    /// `now` is the current unix timestamp in seconds, passed in rather than
    /// read from the clock so tests are deterministic.
    #[instrument(skip_all, fields(sender = %op.sender))]
    pub async fn validate(
        &self,
        op: &UserOperation,
        now: u64,
        expected_code_hash: Option<B256>,
    ) -> Result<ValidationOutput, BundlerError> {
        let entities = EntityAddresses {
            sender: op.sender,
            factory: op.factory(),
            paymaster: op.paymaster(),
            aggregator: None,
            entry_point: self.entry_point,
        };

        let (result, referenced_contracts, storage_map) = if self.unsafe_mode {
            let res = self
                .provider
                .call_simulate_validation(self.entry_point, &op_bytes(op))
                .await?;
            (res, ReferencedContracts::default(), bundler_types::StorageMap::new())
        } else {
            let (trace, result) = self
                .provider
                .trace_simulate_validation(self.entry_point, &op_bytes(op))
                .await?;
            let parsed = parse_tracer_result(&trace, &entities, |_addr| false)
                .map_err(|e| BundlerError::OpcodeValidation(e.to_string()))?;

            let fingerprint_hash = self.fingerprint(&parsed.touched_addresses).await?;
            if let Some(expected) = expected_code_hash {
                if expected != fingerprint_hash {
                    return Err(BundlerError::OpcodeValidation(
                        "referenced contract code changed since last validation".into(),
                    ));
                }
            }

            (
                result,
                ReferencedContracts { addresses: parsed.touched_addresses, hash: fingerprint_hash },
                parsed.storage_map,
            )
        };

        if result.sig_failed {
            return Err(BundlerError::InvalidSignature);
        }
        let time_range = bundler_types::ValidTimeRange::new(result.valid_after, result.valid_until);
        if !time_range.is_valid_at(now, 30) {
            return Err(BundlerError::NotInTimeRange);
        }
        if result.aggregator.is_some() {
            return Err(BundlerError::UnsupportedSignatureAggregator);
        }
        let gas_slack = op.verification_gas_limit.saturating_sub(result.pre_op_gas.saturating_sub(op.pre_verification_gas));
        if gas_slack < U256::from(2000) {
            return Err(BundlerError::SimulateValidation(
                "verificationGasLimit too close to preOpGas".into(),
            ));
        }

        Ok(ValidationOutput {
            pre_op_gas: result.pre_op_gas,
            valid_after: result.valid_after,
            valid_until: result.valid_until,
            referenced_contracts,
            storage_map,
        })
    }

    /// Re-validation anti-griefing fingerprint: the concatenated bytecode of
    /// every referenced address, hashed. Unlike hashing the address list
    /// itself, this changes if an attacker swaps the code at a previously
    /// validated address between two simulations of the same op.
    async fn fingerprint(&self, addresses: &[Address]) -> Result<B256, BundlerError> {
        let mut buf = Vec::new();
        for addr in addresses {
            let code = self.provider.get_code(*addr).await?;
            buf.extend_from_slice(&code);
        }
        Ok(keccak256(buf))
    }
}

fn check_variable_length(data: &[u8], field: &str) -> Result<(), BundlerError> {
    match data.len() {
        0 | 20.. => Ok(()),
        n => Err(BundlerError::InvalidParams(format!(
            "{field} length {n} must be 0 or at least 20 bytes"
        ))),
    }
}

fn op_bytes(op: &UserOperation) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(op.sender.as_slice());
    buf.extend_from_slice(&op.nonce.to_be_bytes::<32>());
    buf.extend_from_slice(&op.init_code);
    buf.extend_from_slice(&op.call_data);
    buf.extend_from_slice(&op.paymaster_and_data);
    buf.extend_from_slice(&op.signature);
    buf
}
