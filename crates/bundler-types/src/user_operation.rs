use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// The four entities whose reputation and storage access this bundler tracks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Sender,
    Factory,
    Paymaster,
    Aggregator,
}

/// Canonical internal record for an EntryPoint v0.6 `UserOperation`.
///
/// This is the one record every component in this crate operates on; the wire
/// format (hex strings mixed with numbers) and the v0.7 `PackedUserOperation`
/// shape are boundary concerns only (see [`crate::wire`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// First 20 bytes of `initCode`, if present.
    pub fn factory(&self) -> Option<Address> {
        leading_address(&self.init_code)
    }

    /// First 20 bytes of `paymasterAndData`, if present.
    pub fn paymaster(&self) -> Option<Address> {
        leading_address(&self.paymaster_and_data)
    }

    /// Deterministic keccak256-based identifier for this operation, scoped to an
    /// entry point and chain id (mirrors `EntryPoint.getUserOpHash`).
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> B256 {
        let packed = self.pack();
        let op_hash = keccak256(packed);
        let mut buf = Vec::with_capacity(32 + 20 + 32);
        buf.extend_from_slice(op_hash.as_slice());
        buf.extend_from_slice(entry_point.as_slice());
        buf.extend_from_slice(&U256::from(chain_id).to_be_bytes::<32>());
        keccak256(buf)
    }

    /// ABI-style packing of the fields that feed into `getUserOpHash`
    /// (`initCode`/`callData`/`paymasterAndData` are hashed, not embedded raw).
    fn pack(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.sender.as_slice());
        buf.extend_from_slice(&[0u8; 12]);
        buf.extend_from_slice(&self.nonce.to_be_bytes::<32>());
        buf.extend_from_slice(keccak256(&self.init_code).as_slice());
        buf.extend_from_slice(keccak256(&self.call_data).as_slice());
        buf.extend_from_slice(&self.call_gas_limit.to_be_bytes::<32>());
        buf.extend_from_slice(&self.verification_gas_limit.to_be_bytes::<32>());
        buf.extend_from_slice(&self.pre_verification_gas.to_be_bytes::<32>());
        buf.extend_from_slice(&self.max_fee_per_gas.to_be_bytes::<32>());
        buf.extend_from_slice(&self.max_priority_fee_per_gas.to_be_bytes::<32>());
        buf.extend_from_slice(keccak256(&self.paymaster_and_data).as_slice());
        buf
    }
}

fn leading_address(data: &Bytes) -> Option<Address> {
    if data.len() >= 20 {
        Some(Address::from_slice(&data[..20]))
    } else {
        None
    }
}

/// `[validAfter, validUntil)` window returned by `simulateValidation`.
/// `valid_until == 0` means "no expiry".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ValidTimeRange {
    pub valid_after: u64,
    pub valid_until: u64,
}

impl ValidTimeRange {
    pub fn new(valid_after: u64, valid_until: u64) -> Self {
        Self { valid_after, valid_until }
    }

    /// `now` must be inside `[valid_after, valid_until)`, with at least
    /// `min_remaining_secs` of slack before expiry unless `valid_until == 0`.
    pub fn is_valid_at(&self, now: u64, min_remaining_secs: u64) -> bool {
        if now < self.valid_after {
            return false;
        }
        self.valid_until == 0 || self.valid_until >= now + min_remaining_secs
    }
}

/// EntryPoint v0.7 `PackedUserOperation` wire shape. Only the conversion to/from
/// the canonical [`UserOperation`] is implemented; v0.7 execution semantics are
/// not re-implemented (out of this crate's scope).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackedUserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    /// `verificationGasLimit (16 bytes) || callGasLimit (16 bytes)`.
    pub account_gas_limits: B256,
    pub pre_verification_gas: U256,
    /// `maxPriorityFeePerGas (16 bytes) || maxFeePerGas (16 bytes)`.
    pub gas_fees: B256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl From<&UserOperation> for PackedUserOperation {
    fn from(op: &UserOperation) -> Self {
        Self {
            sender: op.sender,
            nonce: op.nonce,
            init_code: op.init_code.clone(),
            call_data: op.call_data.clone(),
            account_gas_limits: pack_two(op.verification_gas_limit, op.call_gas_limit),
            pre_verification_gas: op.pre_verification_gas,
            gas_fees: pack_two(op.max_priority_fee_per_gas, op.max_fee_per_gas),
            paymaster_and_data: op.paymaster_and_data.clone(),
            signature: op.signature.clone(),
        }
    }
}

impl From<&PackedUserOperation> for UserOperation {
    fn from(op: &PackedUserOperation) -> Self {
        let (verification_gas_limit, call_gas_limit) = unpack_two(op.account_gas_limits);
        let (max_priority_fee_per_gas, max_fee_per_gas) = unpack_two(op.gas_fees);
        Self {
            sender: op.sender,
            nonce: op.nonce,
            init_code: op.init_code.clone(),
            call_data: op.call_data.clone(),
            call_gas_limit,
            verification_gas_limit,
            pre_verification_gas: op.pre_verification_gas,
            max_fee_per_gas,
            max_priority_fee_per_gas,
            paymaster_and_data: op.paymaster_and_data.clone(),
            signature: op.signature.clone(),
        }
    }
}

fn pack_two(hi: U256, lo: U256) -> B256 {
    let mut out = [0u8; 32];
    out[..16].copy_from_slice(&hi.to_be_bytes::<32>()[16..]);
    out[16..].copy_from_slice(&lo.to_be_bytes::<32>()[16..]);
    B256::from(out)
}

fn unpack_two(packed: B256) -> (U256, U256) {
    let bytes = packed.as_slice();
    (
        U256::from_be_slice(&bytes[..16]),
        U256::from_be_slice(&bytes[16..]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UserOperation {
        UserOperation {
            sender: Address::repeat_byte(0xA),
            nonce: U256::from(0),
            init_code: Bytes::new(),
            call_data: Bytes::new(),
            call_gas_limit: U256::from(100_000),
            verification_gas_limit: U256::from(200_000),
            pre_verification_gas: U256::from(50_000),
            max_fee_per_gas: U256::from(2_000_000_000u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            paymaster_and_data: Bytes::new(),
            signature: Bytes::new(),
        }
    }

    #[test]
    fn factory_and_paymaster_absent_below_20_bytes() {
        let mut op = sample();
        op.init_code = Bytes::from(vec![1, 2, 3]);
        assert_eq!(op.factory(), None);
    }

    #[test]
    fn factory_present_at_20_bytes() {
        let mut op = sample();
        let addr = Address::repeat_byte(0xB);
        op.init_code = Bytes::from([addr.as_slice(), &[9, 9]].concat());
        assert_eq!(op.factory(), Some(addr));
    }

    #[test]
    fn pack_unpack_round_trips() {
        let op = sample();
        let packed = PackedUserOperation::from(&op);
        let back = UserOperation::from(&packed);
        assert_eq!(op.call_gas_limit, back.call_gas_limit);
        assert_eq!(op.verification_gas_limit, back.verification_gas_limit);
        assert_eq!(op.max_fee_per_gas, back.max_fee_per_gas);
        assert_eq!(op.max_priority_fee_per_gas, back.max_priority_fee_per_gas);
    }

    #[test]
    fn valid_time_range_zero_until_means_no_expiry() {
        let range = ValidTimeRange::new(0, 0);
        assert!(range.is_valid_at(1_000_000, 30));
    }

    #[test]
    fn valid_time_range_rejects_too_close_to_expiry() {
        let range = ValidTimeRange::new(0, 1_000_029);
        assert!(!range.is_valid_at(1_000_000, 30));
        let range = ValidTimeRange::new(0, 1_000_030);
        assert!(range.is_valid_at(1_000_000, 30));
    }
}
