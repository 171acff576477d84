use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Reputation status, derived from `opsSeen`/`opsIncluded` unless the address
/// is on an explicit whitelist/blacklist.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReputationStatus {
    Ok,
    Throttled,
    Banned,
}

/// Persisted per-address reputation counters. `status` is derived, never
/// stored; it is included on the wire (e.g. `debug_bundler_dumpReputation`)
/// for convenience only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationEntry {
    pub address: Address,
    pub ops_seen: u32,
    pub ops_included: u32,
}

impl ReputationEntry {
    pub fn new(address: Address) -> Self {
        Self { address, ops_seen: 0, ops_included: 0 }
    }

    pub fn is_dead(&self) -> bool {
        self.ops_seen == 0 && self.ops_included == 0
    }
}

/// `EntryPoint.getDepositInfo` read path result for a staked entity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StakeInfo {
    pub addr: Address,
    pub stake: U256,
    pub unstake_delay_sec: u32,
}
