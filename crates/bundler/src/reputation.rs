//! Reputation Manager (Component D): per-address `opsSeen`/`opsIncluded`
//! counters, OK/THROTTLED/BANNED classification, and stake-gated quota
//! expansion. Method names (`increment_seen`/`increment_included`/
//! `get_status`/`clear`) follow `silius-rs`'s `Reputation` object
//! (`crates/mempool/src/uopool.rs`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy_primitives::Address;
use bundler_types::{ReputationEntry, ReputationStatus, StakeInfo};
use parking_lot::RwLock;

use crate::error::{BundlerError, ProviderError};
use crate::provider::NodeProvider;

/// Aging/throttling parameters. Two profiles: `bundler` entities (the
/// sender's own factory/paymaster) get a generous slack; everything else
/// uses the stricter non-bundler profile.
#[derive(Clone, Copy, Debug)]
pub struct ReputationParams {
    pub min_inclusion_denom: u32,
    pub throttling_slack: u32,
    pub ban_slack: u32,
}

impl ReputationParams {
    pub const BUNDLER: Self = Self { min_inclusion_denom: 10, throttling_slack: 10, ban_slack: 50 };
    pub const NON_BUNDLER: Self = Self { min_inclusion_denom: 100, throttling_slack: 10, ban_slack: 10 };
}

struct Inner {
    entries: HashMap<Address, ReputationEntry>,
    whitelist: HashSet<Address>,
    blacklist: HashSet<Address>,
}

pub struct ReputationManager<P> {
    inner: RwLock<Inner>,
    params: ReputationParams,
    provider: Arc<P>,
    min_stake: alloy_primitives::U256,
    min_unstake_delay_sec: u32,
}

impl<P: NodeProvider> ReputationManager<P> {
    pub fn new(
        provider: Arc<P>,
        params: ReputationParams,
        whitelist: Vec<Address>,
        blacklist: Vec<Address>,
        min_stake: alloy_primitives::U256,
        min_unstake_delay_sec: u32,
    ) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                whitelist: whitelist.into_iter().collect(),
                blacklist: blacklist.into_iter().collect(),
            }),
            params,
            provider,
            min_stake,
            min_unstake_delay_sec,
        }
    }

    pub fn get_status(&self, addr: Address) -> ReputationStatus {
        let inner = self.inner.read();
        if inner.whitelist.contains(&addr) {
            return ReputationStatus::Ok;
        }
        if inner.blacklist.contains(&addr) {
            return ReputationStatus::Banned;
        }
        let Some(entry) = inner.entries.get(&addr) else { return ReputationStatus::Ok };
        let m = entry.ops_seen / self.params.min_inclusion_denom;
        if m <= entry.ops_included + self.params.throttling_slack {
            ReputationStatus::Ok
        } else if m <= entry.ops_included + self.params.ban_slack {
            ReputationStatus::Throttled
        } else {
            ReputationStatus::Banned
        }
    }

    pub fn update_seen_status(&self, addr: Option<Address>) {
        let Some(addr) = addr else { return };
        let mut inner = self.inner.write();
        inner.entries.entry(addr).or_insert_with(|| ReputationEntry::new(addr)).ops_seen += 1;
    }

    pub fn update_included_status(&self, addr: Option<Address>) {
        let Some(addr) = addr else { return };
        let mut inner = self.inner.write();
        inner.entries.entry(addr).or_insert_with(|| ReputationEntry::new(addr)).ops_included += 1;
    }

    /// Punitive update applied when `handleOps` reverts and blame is
    /// attributable to `addr`.
    pub fn crashed_handle_ops(&self, addr: Address) {
        let mut inner = self.inner.write();
        let entry = inner.entries.entry(addr).or_insert_with(|| ReputationEntry::new(addr));
        entry.ops_seen += 10_000;
        entry.ops_included = 0;
    }

    /// `opsIncluded := floor(opsIncluded * 23/24)` — the corrected behavior
    /// documented in DESIGN.md (the source reuses `opsSeen`, which this
    /// implementation treats as a bug). Dead entries are garbage collected.
    pub fn hourly_cron(&self) {
        let mut inner = self.inner.write();
        inner.entries.retain(|_, entry| {
            entry.ops_seen = entry.ops_seen * 23 / 24;
            entry.ops_included = entry.ops_included * 23 / 24;
            !entry.is_dead()
        });
    }

    pub fn dump(&self) -> Vec<ReputationEntry> {
        self.inner.read().entries.values().cloned().collect()
    }

    pub fn set_entries(&self, entries: Vec<ReputationEntry>) {
        let mut inner = self.inner.write();
        for entry in entries {
            inner.entries.insert(entry.address, entry);
        }
    }

    pub fn clear(&self) {
        self.inner.write().entries.clear();
    }

    /// `isStaked := stake >= minStake && unstakeDelaySec >= minUnstakeDelay`
    pub async fn get_stake_status(
        &self,
        addr: Address,
        entry_point: Address,
    ) -> Result<(StakeInfo, bool), ProviderError> {
        let stake_info = self.provider.get_deposit_info(entry_point, addr).await?;
        let is_staked =
            stake_info.stake >= self.min_stake && stake_info.unstake_delay_sec >= self.min_unstake_delay_sec;
        Ok((stake_info, is_staked))
    }

    /// `10 + floor(inclusionRate * 10) + min(opsIncluded, 10000)` with
    /// `inclusionRate = opsIncluded/opsSeen` (0 if `opsSeen == 0`).
    pub fn max_allowed_mempool_ops_unstaked(&self, addr: Address) -> u32 {
        let inner = self.inner.read();
        let Some(entry) = inner.entries.get(&addr) else { return 10 };
        let inclusion_rate = if entry.ops_seen == 0 {
            0.0
        } else {
            entry.ops_included as f64 / entry.ops_seen as f64
        };
        10 + (inclusion_rate * 10.0) as u32 + entry.ops_included.min(10_000)
    }

    pub fn check_not_banned(&self, addr: Address) -> Result<(), BundlerError> {
        if self.get_status(addr) == ReputationStatus::Banned {
            return Err(BundlerError::Reputation(addr, ReputationStatus::Banned));
        }
        Ok(())
    }

    pub fn check_not_throttled(&self, addr: Address) -> Result<(), BundlerError> {
        match self.get_status(addr) {
            ReputationStatus::Banned => Err(BundlerError::Reputation(addr, ReputationStatus::Banned)),
            ReputationStatus::Throttled => Err(BundlerError::Reputation(addr, ReputationStatus::Throttled)),
            ReputationStatus::Ok => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockNodeProvider;

    fn manager() -> ReputationManager<MockNodeProvider> {
        ReputationManager::new(
            Arc::new(MockNodeProvider::default()),
            ReputationParams::NON_BUNDLER,
            vec![],
            vec![],
            alloy_primitives::U256::from(1_000_000_000_000_000_000u64),
            84_600,
        )
    }

    #[test]
    fn whitelist_always_ok_blacklist_always_banned() {
        let addr_w = Address::repeat_byte(1);
        let addr_b = Address::repeat_byte(2);
        let mgr = ReputationManager::new(
            Arc::new(MockNodeProvider::default()),
            ReputationParams::NON_BUNDLER,
            vec![addr_w],
            vec![addr_b],
            alloy_primitives::U256::from(1u64),
            0,
        );
        for _ in 0..1000 {
            mgr.update_seen_status(Some(addr_w));
        }
        assert_eq!(mgr.get_status(addr_w), ReputationStatus::Ok);
        assert_eq!(mgr.get_status(addr_b), ReputationStatus::Banned);
    }

    #[test]
    fn unseen_address_is_ok() {
        let mgr = manager();
        assert_eq!(mgr.get_status(Address::repeat_byte(9)), ReputationStatus::Ok);
    }

    #[test]
    fn heavy_seen_light_included_throttles_then_bans() {
        let mgr = manager();
        let addr = Address::repeat_byte(3);
        for _ in 0..1100 {
            mgr.update_seen_status(Some(addr));
        }
        // m = floor(1100/100) = 11; opsIncluded=0, throttling_slack=10 -> THROTTLED
        assert_eq!(mgr.get_status(addr), ReputationStatus::Throttled);
        for _ in 0..1000 {
            mgr.update_seen_status(Some(addr));
        }
        // m = floor(2100/100) = 21 > opsIncluded(0) + ban_slack(10) -> BANNED
        assert_eq!(mgr.get_status(addr), ReputationStatus::Banned);
    }

    #[test]
    fn hourly_cron_never_increases_and_collects_dead_entries() {
        let mgr = manager();
        let addr = Address::repeat_byte(4);
        mgr.update_seen_status(Some(addr));
        let before = mgr.dump();
        assert_eq!(before.len(), 1);
        for _ in 0..200 {
            mgr.hourly_cron();
        }
        assert!(mgr.dump().is_empty());
    }

    #[test]
    fn crashed_handle_ops_is_punitive() {
        let mgr = manager();
        let addr = Address::repeat_byte(5);
        mgr.update_included_status(Some(addr));
        mgr.crashed_handle_ops(addr);
        let entry = mgr.dump().into_iter().find(|e| e.address == addr).unwrap();
        assert_eq!(entry.ops_included, 0);
        assert_eq!(entry.ops_seen, 10_000);
    }

    #[test]
    fn dump_then_set_then_dump_round_trips() {
        let mgr = manager();
        let addr = Address::repeat_byte(6);
        mgr.update_seen_status(Some(addr));
        mgr.update_included_status(Some(addr));
        let dumped = mgr.dump();

        let mgr2 = manager();
        mgr2.set_entries(dumped.clone());
        let mut redumped = mgr2.dump();
        let mut original = dumped;
        redumped.sort_by_key(|e| e.address);
        original.sort_by_key(|e| e.address);
        assert_eq!(redumped, original);
    }
}
