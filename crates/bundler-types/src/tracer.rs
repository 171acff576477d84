use std::collections::HashMap;

use alloy_primitives::{Address, Bytes, U256};

/// A single opcode, counted per top-level call frame. `Gas` is tracked
/// separately, so it is excluded here.
pub type Opcode = String;

/// Per-address access record for one top-level call frame.
#[derive(Clone, Debug, Default)]
pub struct AddressAccess {
    /// `slot -> pre-transaction value`, recorded on first read or write.
    pub reads: HashMap<U256, U256>,
    /// `slot -> write count`.
    pub writes: HashMap<U256, u32>,
}

/// Contract size observed the first time an address is reached via
/// `CALL`/`STATICCALL`/`CALLCODE`/`DELEGATECALL`/`EXT*` at depth > 1.
#[derive(Clone, Copy, Debug)]
pub struct ContractSizeInfo {
    pub opcode: u8,
    pub size: u64,
}

/// Aggregated trace data for one depth-1 call frame (one of sender/factory,
/// paymaster, or aggregator's validation call).
#[derive(Clone, Debug, Default)]
pub struct CallFrame {
    pub top_level_method_sig: Bytes,
    pub top_level_target_address: Address,
    pub opcodes: HashMap<Opcode, u32>,
    pub access: HashMap<Address, AddressAccess>,
    pub contract_size: HashMap<Address, ContractSizeInfo>,
    pub ext_code_access_info: HashMap<Address, Opcode>,
    pub oog: bool,
}

/// Full output of one `debug_traceCall(simulateValidation)` run.
#[derive(Clone, Debug, Default)]
pub struct TracerResult {
    pub calls: Vec<CallFrame>,
    /// Keccak preimages of length in `(20, 512)`, captured for associated
    /// storage analysis.
    pub keccak_preimages: Vec<Bytes>,
    /// Raw return data of the last `REVERT`/`RETURN`, truncated to 4000 bytes.
    pub revert_data: Option<Bytes>,
}

impl TracerResult {
    /// Top-level call frames in order (one per depth-1 `CALL`/`STATICCALL`).
    pub fn phases(&self) -> &[CallFrame] {
        &self.calls
    }
}
