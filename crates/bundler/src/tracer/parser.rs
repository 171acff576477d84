//! Tracer-Result Parser (Component B): enforces the ERC-4337 §5 opcode,
//! storage and contract-existence rules over the [`TracerResult`] the
//! collector produced. The storage-access decision table here collapses
//! `samailamalima-rundler`'s three-way `get_storage_restriction`
//! (Allowed/NeedsStake/Banned) classification into a simpler
//! Allowed/Violation split.

use std::collections::HashSet;

use alloy_primitives::{keccak256, Address, B256, U256};
use bundler_types::{CallFrame, StorageMap, TracerResult};

use crate::error::BundlerError;

/// The entities whose call frames are subject to the opcode/storage rules,
/// in the order their frames appear in `TracerResult::calls` (set by the
/// simulated call sequence: factory deploy, if any, then sender
/// `validateUserOp`, then paymaster `validatePaymasterUserOp`, if any).
#[derive(Clone, Debug, Default)]
pub struct EntityAddresses {
    pub sender: Address,
    pub factory: Option<Address>,
    pub paymaster: Option<Address>,
    pub aggregator: Option<Address>,
    pub entry_point: Address,
}

impl EntityAddresses {
    /// `(entity, address, is_staked)` for each traced frame, in call order.
    fn sequence(&self, staked: &dyn Fn(Address) -> bool) -> Vec<(bundler_types::Entity, Address, bool)> {
        use bundler_types::Entity;
        let mut out = Vec::with_capacity(3);
        if let Some(factory) = self.factory {
            out.push((Entity::Factory, factory, staked(factory)));
        }
        out.push((Entity::Sender, self.sender, staked(self.sender)));
        if let Some(paymaster) = self.paymaster {
            out.push((Entity::Paymaster, paymaster, staked(paymaster)));
        }
        out
    }
}

/// Banned opcodes: GASPRICE, GASLIMIT, DIFFICULTY,
/// TIMESTAMP, BASEFEE, BLOCKHASH, NUMBER, SELFBALANCE, BALANCE, ORIGIN,
/// CREATE, COINBASE, SELFDESTRUCT.
const BANNED_OPCODES: &[u8] = &[
    0x3a, // GASPRICE
    0x45, // GASLIMIT
    0x44, // DIFFICULTY / PREVRANDAO
    0x42, // TIMESTAMP
    0x48, // BASEFEE
    0x40, // BLOCKHASH
    0x43, // NUMBER
    0x47, // SELFBALANCE
    0x31, // BALANCE
    0x32, // ORIGIN
    0xf0, // CREATE
    0x41, // COINBASE
    0xff, // SELFDESTRUCT
];

const OP_EXTCODESIZE: u8 = 0x3b;

/// Output of a successful parse: addresses actually touched (for code-hash
/// fingerprinting) and the merged storage map for the bundler's conflict
/// check.
#[derive(Clone, Debug, Default)]
pub struct ParsedTrace {
    pub touched_addresses: Vec<Address>,
    pub storage_map: StorageMap,
    /// Entities whose storage access required them to be staked, even if no
    /// violation resulted (used by the Validation Manager's stake checks).
    pub entities_needing_stake: Vec<bundler_types::Entity>,
}

/// Enforce the opcode/storage/contract rules over one `simulateValidation`
/// trace. `is_staked` answers whether a given entity address currently meets
/// the stake threshold (Component D).
pub fn parse_tracer_result(
    result: &TracerResult,
    entities: &EntityAddresses,
    is_staked: impl Fn(Address) -> bool,
) -> Result<ParsedTrace, BundlerError> {
    let sequence = entities.sequence(&is_staked);
    let mut touched = Vec::new();
    let mut storage_map = StorageMap::new();
    let mut entities_needing_stake = Vec::new();

    for (entity, addr, staked) in sequence {
        let Some(frame) = result.calls.get(touched_index(&sequence_entities(entities), entity)) else {
            continue;
        };

        check_banned_opcodes(frame, entity)?;
        check_ext_code_access(frame, addr, entities.entry_point, entity)?;
        check_contract_existence(frame, entity)?;

        if frame.oog {
            return Err(BundlerError::OpcodeValidation(format!(
                "{entity:?} ran out of gas during validation"
            )));
        }

        let mut needs_stake = false;
        for (access_addr, access) in &frame.access {
            touched.push(*access_addr);
            for (&slot, &pre_value) in &access.reads {
                let allowed = *access_addr == entities.sender
                    || (staked && *access_addr == addr)
                    || is_associated_storage(result, entities.sender, slot);
                if !allowed {
                    return Err(BundlerError::OpcodeValidation(format!(
                        "{entity:?} read unassociated storage of {access_addr}"
                    )));
                }
                if *access_addr != entities.sender && !is_associated_storage(result, entities.sender, slot) {
                    needs_stake = true;
                }
                storage_map.set_slot(*access_addr, slot, B256::from(pre_value.to_be_bytes::<32>()));
            }
            for (&slot, _) in &access.writes {
                let allowed = *access_addr == entities.sender
                    || (staked && *access_addr == addr)
                    || is_associated_storage(result, entities.sender, slot);
                if !allowed {
                    return Err(BundlerError::OpcodeValidation(format!(
                        "{entity:?} wrote unassociated storage of {access_addr}"
                    )));
                }
            }
        }
        if needs_stake {
            entities_needing_stake.push(entity);
        }
    }

    Ok(ParsedTrace { touched_addresses: touched, storage_map, entities_needing_stake })
}

fn sequence_entities(entities: &EntityAddresses) -> Vec<bundler_types::Entity> {
    use bundler_types::Entity;
    let mut out = Vec::with_capacity(3);
    if entities.factory.is_some() {
        out.push(Entity::Factory);
    }
    out.push(Entity::Sender);
    if entities.paymaster.is_some() {
        out.push(Entity::Paymaster);
    }
    out
}

fn touched_index(order: &[bundler_types::Entity], entity: bundler_types::Entity) -> usize {
    order.iter().position(|e| *e == entity).unwrap_or(usize::MAX)
}

fn check_banned_opcodes(frame: &CallFrame, entity: bundler_types::Entity) -> Result<(), BundlerError> {
    for (opcode, count) in &frame.opcodes {
        if *count == 0 {
            continue;
        }
        if opcode == "GAS" {
            return Err(BundlerError::OpcodeValidation(format!(
                "{entity:?} used GAS not immediately followed by a call"
            )));
        }
        if let Some(byte) = hex_tag_to_byte(opcode) {
            if BANNED_OPCODES.contains(&byte) {
                return Err(BundlerError::OpcodeValidation(format!(
                    "{entity:?} used banned opcode {opcode}"
                )));
            }
        }
    }
    Ok(())
}

fn check_ext_code_access(
    frame: &CallFrame,
    entity_addr: Address,
    entry_point: Address,
    entity: bundler_types::Entity,
) -> Result<(), BundlerError> {
    for addr in frame.ext_code_access_info.keys() {
        if *addr != entity_addr && *addr != entry_point {
            return Err(BundlerError::OpcodeValidation(format!(
                "{entity:?} probed code existence of {addr}"
            )));
        }
    }
    Ok(())
}

fn check_contract_existence(frame: &CallFrame, entity: bundler_types::Entity) -> Result<(), BundlerError> {
    for (addr, info) in &frame.contract_size {
        if info.size == 0 && info.opcode != OP_EXTCODESIZE {
            return Err(BundlerError::OpcodeValidation(format!(
                "{entity:?} called into non-existent contract {addr}"
            )));
        }
    }
    Ok(())
}

/// ERC-4337 "associated storage" rule:
/// `slot` is associated with `sender` if some captured keccak preimage
/// begins with `sender`'s address and hashes to within 128 of `slot`.
fn is_associated_storage(result: &TracerResult, sender: Address, slot: U256) -> bool {
    result.keccak_preimages.iter().any(|preimage| {
        preimage.len() >= 20
            && preimage[..20] == sender.0[..]
            && {
                let hash = U256::from_be_slice(keccak256(preimage).as_slice());
                let diff = if hash > slot { hash - slot } else { slot - hash };
                diff <= U256::from(128)
            }
    })
}

fn hex_tag_to_byte(tag: &str) -> Option<u8> {
    u8::from_str_radix(tag.strip_prefix("0x")?, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundler_types::ContractSizeInfo;
    use std::collections::HashMap;

    fn frame_with_opcode(tag: &str) -> CallFrame {
        let mut opcodes = HashMap::new();
        opcodes.insert(tag.to_string(), 1);
        CallFrame { opcodes, ..Default::default() }
    }

    #[test]
    fn banned_opcode_is_rejected() {
        let frame = frame_with_opcode("0x45"); // GASLIMIT
        assert!(check_banned_opcodes(&frame, bundler_types::Entity::Sender).is_err());
    }

    #[test]
    fn ordinary_opcode_is_allowed() {
        let frame = frame_with_opcode("0x60"); // PUSH1 (not in banned set)
        assert!(check_banned_opcodes(&frame, bundler_types::Entity::Sender).is_ok());
    }

    #[test]
    fn leaking_gas_counter_is_rejected() {
        let frame = frame_with_opcode("GAS");
        assert!(check_banned_opcodes(&frame, bundler_types::Entity::Sender).is_err());
    }

    #[test]
    fn zero_size_contract_access_is_rejected_unless_extcodesize() {
        let sender = Address::repeat_byte(1);
        let other = Address::repeat_byte(2);
        let mut contract_size = HashMap::new();
        contract_size.insert(other, ContractSizeInfo { opcode: 0xf1, size: 0 });
        let frame = CallFrame { contract_size, ..Default::default() };
        assert!(check_contract_existence(&frame, bundler_types::Entity::Sender).is_err());

        let mut contract_size = HashMap::new();
        contract_size.insert(other, ContractSizeInfo { opcode: OP_EXTCODESIZE, size: 0 });
        let frame = CallFrame { contract_size, ..Default::default() };
        assert!(check_contract_existence(&frame, bundler_types::Entity::Sender).is_ok());

        let _ = sender;
    }

    #[test]
    fn ext_code_access_on_own_address_is_allowed() {
        let entity_addr = Address::repeat_byte(3);
        let mut ext_code_access_info = HashMap::new();
        ext_code_access_info.insert(entity_addr, "0x3b".to_string());
        let frame = CallFrame { ext_code_access_info, ..Default::default() };
        assert!(check_ext_code_access(&frame, entity_addr, Address::ZERO, bundler_types::Entity::Sender).is_ok());
    }

    #[test]
    fn associated_storage_within_128_is_recognized() {
        let sender = Address::repeat_byte(7);
        let mut preimage = sender.0.to_vec();
        preimage.extend_from_slice(&[0u8; 12]);
        let hash = keccak256(&preimage);
        let hash_value = U256::from_be_slice(hash.as_slice());
        let result = TracerResult { keccak_preimages: vec![preimage.into()], ..Default::default() };
        assert!(is_associated_storage(&result, sender, hash_value));
        assert!(is_associated_storage(&result, sender, hash_value + U256::from(50)));
        assert!(!is_associated_storage(&result, sender, hash_value + U256::from(500)));
    }

}
