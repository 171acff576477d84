use std::collections::HashMap;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Per-address storage snapshot: either an account-level state root, or a set
/// of explicit slot/value pairs. An address-level root always beats any
/// slot-level entry for that address on merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccountStorage {
    RootHash(B256),
    Slots(HashMap<U256, B256>),
}

/// Mapping from address to [`AccountStorage`], used both for
/// `eth_sendRawTransactionConditional`'s `knownAccounts` payload and for
/// cross-UO conflict detection in the bundle builder.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageMap {
    #[serde(flatten)]
    entries: HashMap<Address, AccountStorage>,
}

impl StorageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.entries.keys()
    }

    pub fn get(&self, addr: &Address) -> Option<&AccountStorage> {
        self.entries.get(addr)
    }

    pub fn set_root(&mut self, addr: Address, root: B256) {
        self.entries.insert(addr, AccountStorage::RootHash(root));
    }

    pub fn set_slot(&mut self, addr: Address, slot: U256, value: B256) {
        match self.entries.get_mut(&addr) {
            Some(AccountStorage::RootHash(_)) => {
                // an address-level root already wins for this address; ignore.
            }
            Some(AccountStorage::Slots(slots)) => {
                slots.insert(slot, value);
            }
            None => {
                let mut slots = HashMap::new();
                slots.insert(slot, value);
                self.entries.insert(addr, AccountStorage::Slots(slots));
            }
        }
    }

    /// Merge `other` into `self`. A root on either side wins over slots for
    /// the same address.
    pub fn merge(&mut self, other: StorageMap) {
        for (addr, value) in other.entries {
            match (self.entries.get(&addr), &value) {
                (Some(AccountStorage::RootHash(_)), _) => {}
                (_, AccountStorage::RootHash(_)) => {
                    self.entries.insert(addr, value);
                }
                (Some(AccountStorage::Slots(existing)), AccountStorage::Slots(new_slots)) => {
                    let mut merged = existing.clone();
                    merged.extend(new_slots.clone());
                    self.entries.insert(addr, AccountStorage::Slots(merged));
                }
                (None, AccountStorage::Slots(_)) => {
                    self.entries.insert(addr, value);
                }
            }
        }
    }
}

/// Options for `eth_sendRawTransactionConditional`
/// (<https://notes.ethereum.org/@yoav/SkaX2lS9j#>).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalOptions {
    #[serde(default)]
    pub known_accounts: HashMap<Address, AccountStorage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number_min: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number_max: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_min: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_max: Option<u64>,
}

impl From<StorageMap> for ConditionalOptions {
    fn from(map: StorageMap) -> Self {
        Self { known_accounts: map.entries, ..Default::default() }
    }
}
