//! Wire/internal boundary conversions for the JSON-RPC surface: the mixed
//! hex-string-and-number `UserOperation` JSON shape, decoded into the
//! canonical internal record and back.

use alloy_primitives::{Address, Bytes, B256, U256};
use bundler_types::hex::{decode_u256, encode_u256, HexError};
use bundler_types::{ReputationEntry, UserOperation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid hex field {0}: {1}")]
    Hex(&'static str, HexError),
    #[error("missing field {0}")]
    Missing(&'static str),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationWire {
    pub sender: Address,
    pub nonce: String,
    #[serde(default)]
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: String,
    pub verification_gas_limit: String,
    pub pre_verification_gas: String,
    pub max_fee_per_gas: String,
    pub max_priority_fee_per_gas: String,
    #[serde(default)]
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl TryFrom<UserOperationWire> for UserOperation {
    type Error = WireError;

    fn try_from(wire: UserOperationWire) -> Result<Self, Self::Error> {
        Ok(UserOperation {
            sender: wire.sender,
            nonce: parse_u256(&wire.nonce, "nonce")?,
            init_code: wire.init_code,
            call_data: wire.call_data,
            call_gas_limit: parse_u256(&wire.call_gas_limit, "callGasLimit")?,
            verification_gas_limit: parse_u256(&wire.verification_gas_limit, "verificationGasLimit")?,
            pre_verification_gas: parse_u256(&wire.pre_verification_gas, "preVerificationGas")?,
            max_fee_per_gas: parse_u256(&wire.max_fee_per_gas, "maxFeePerGas")?,
            max_priority_fee_per_gas: parse_u256(&wire.max_priority_fee_per_gas, "maxPriorityFeePerGas")?,
            paymaster_and_data: wire.paymaster_and_data,
            signature: wire.signature,
        })
    }
}

impl From<&UserOperation> for UserOperationWire {
    fn from(op: &UserOperation) -> Self {
        Self {
            sender: op.sender,
            nonce: encode_u256(op.nonce),
            init_code: op.init_code.clone(),
            call_data: op.call_data.clone(),
            call_gas_limit: encode_u256(op.call_gas_limit),
            verification_gas_limit: encode_u256(op.verification_gas_limit),
            pre_verification_gas: encode_u256(op.pre_verification_gas),
            max_fee_per_gas: encode_u256(op.max_fee_per_gas),
            max_priority_fee_per_gas: encode_u256(op.max_priority_fee_per_gas),
            paymaster_and_data: op.paymaster_and_data.clone(),
            signature: op.signature.clone(),
        }
    }
}

fn parse_u256(s: &str, field: &'static str) -> Result<U256, WireError> {
    decode_u256(s).map_err(|e| WireError::Hex(field, e))
}

pub fn parse_send_params(params: Value) -> Result<(UserOperation, Address), WireError> {
    let mut arr = match params {
        Value::Array(arr) => arr,
        _ => return Err(WireError::Missing("params")),
    };
    if arr.len() < 2 {
        return Err(WireError::Missing("entryPoint"));
    }
    let entry_point_value = arr.remove(1);
    let op_value = arr.remove(0);

    let wire: UserOperationWire =
        serde_json::from_value(op_value).map_err(|_| WireError::Missing("userOperation"))?;
    let entry_point: Address =
        serde_json::from_value(entry_point_value).map_err(|_| WireError::Missing("entryPoint"))?;
    Ok((UserOperation::try_from(wire)?, entry_point))
}

pub fn parse_hash_param(params: Value) -> Option<B256> {
    let arr = params.as_array()?;
    let first = arr.first()?;
    serde_json::from_value(first.clone()).ok()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub pre_verification_gas: String,
    pub verification_gas_limit: String,
    pub call_gas_limit: String,
}

pub fn reputation_entries_to_value(entries: &[ReputationEntry]) -> Value {
    serde_json::to_value(entries).expect("ReputationEntry serializes")
}
