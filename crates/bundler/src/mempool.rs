//! Mempool Manager (Component E): entry storage, replacement policy,
//! per-entity quotas, multi-role violation detection, and inclusion
//! ordering. Method naming (`add_user_operation`/`remove_user_operation`/
//! `get_sorted_user_operations`) follows `silius-rs`'s `UoPool`
//! (`crates/mempool/src/uopool.rs`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use bundler_types::{Entity, MempoolEntry, ReputationStatus};
use parking_lot::RwLock;

use crate::error::BundlerError;
use crate::reputation::ReputationManager;

const THROTTLED_ENTITY_MEMPOOL_COUNT: u32 = 4;

struct Inner {
    by_key: HashMap<(Address, U256), MempoolEntry>,
    by_hash: HashMap<B256, (Address, U256)>,
    entry_count: HashMap<Address, u32>,
}

impl Inner {
    fn bump_entry_count(&mut self, addr: Address, delta: i32) {
        let count = self.entry_count.entry(addr).or_insert(0);
        *count = (*count as i32 + delta).max(0) as u32;
        if *count == 0 {
            self.entry_count.remove(&addr);
        }
    }
}

pub struct MempoolManager<P> {
    inner: RwLock<Inner>,
    reputation: Arc<ReputationManager<P>>,
}

impl<P: crate::provider::NodeProvider> MempoolManager<P> {
    pub fn new(reputation: Arc<ReputationManager<P>>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_key: HashMap::new(),
                by_hash: HashMap::new(),
                entry_count: HashMap::new(),
            }),
            reputation,
        }
    }

    pub fn entry_count(&self, addr: Address) -> u32 {
        self.inner.read().entry_count.get(&addr).copied().unwrap_or(0)
    }

    /// Reverses the speculative entryCount bump applied before quota checks
    /// when one of those checks ends up rejecting the op.
    fn undo_bump(&self, sender: Address, factory: Option<Address>, paymaster: Option<Address>) {
        let mut inner = self.inner.write();
        inner.bump_entry_count(sender, -1);
        if let Some(f) = factory {
            inner.bump_entry_count(f, -1);
        }
        if let Some(p) = paymaster {
            inner.bump_entry_count(p, -1);
        }
    }

    /// Admits a validated op into the mempool. Returns `Ok(true)` if this replaced an existing
    /// entry in place, `Ok(false)` if it was a fresh insert. `entry_point` is
    /// needed for the on-chain stake lookup when an entity's quota is
    /// already saturated.
    pub async fn add_user_operation(
        &self,
        entry: MempoolEntry,
        entry_point: Address,
    ) -> Result<bool, BundlerError> {
        let key = entry.key();

        {
            let mut inner = self.inner.write();
            if let Some(existing) = inner.by_key.get(&key) {
                let min_fee = existing.user_op.max_fee_per_gas * U256::from(110) / U256::from(100);
                let min_prio = existing.user_op.max_priority_fee_per_gas * U256::from(110) / U256::from(100);
                if entry.user_op.max_fee_per_gas < min_fee || entry.user_op.max_priority_fee_per_gas < min_prio {
                    return Err(BundlerError::InvalidFields);
                }
                let old_hash = existing.user_op_hash;
                inner.by_hash.remove(&old_hash);
                inner.by_hash.insert(entry.user_op_hash, key);
                inner.by_key.insert(key, entry);
                return Ok(true);
            }
        }

        let sender = entry.user_op.sender;
        let factory = entry.user_op.factory();
        let paymaster = entry.user_op.paymaster();
        let aggregator = entry.aggregator;

        // Bump entryCount before checking it: an entity already sitting
        // exactly at a threshold must be rejected by this admission, not
        // let through one entry past the limit.
        let quota_checks = {
            let mut inner = self.inner.write();
            self.check_multi_role(&inner, sender, factory, paymaster)?;
            inner.bump_entry_count(sender, 1);
            if let Some(f) = factory {
                inner.bump_entry_count(f, 1);
            }
            if let Some(p) = paymaster {
                inner.bump_entry_count(p, 1);
            }
            [Some(sender), factory, paymaster, aggregator]
                .into_iter()
                .flatten()
                .map(|addr| (addr, inner.entry_count.get(&addr).copied().unwrap_or(0)))
                .collect::<Vec<_>>()
        };

        for (addr, count) in &quota_checks {
            let (addr, count) = (*addr, *count);
            if let Err(e) = self.reputation.check_not_banned(addr) {
                self.undo_bump(sender, factory, paymaster);
                return Err(e);
            }
            if count > THROTTLED_ENTITY_MEMPOOL_COUNT {
                if let Err(e) = self.reputation.check_not_throttled(addr) {
                    self.undo_bump(sender, factory, paymaster);
                    return Err(e);
                }
            }
            if count > self.reputation.max_allowed_mempool_ops_unstaked(addr) {
                let is_staked = match self.reputation.get_stake_status(addr, entry_point).await {
                    Ok((_, is_staked)) => is_staked,
                    Err(e) => {
                        self.undo_bump(sender, factory, paymaster);
                        return Err(e.into());
                    }
                };
                if !is_staked {
                    self.undo_bump(sender, factory, paymaster);
                    return Err(BundlerError::InsufficientStake(addr));
                }
            }
        }

        {
            let mut inner = self.inner.write();
            inner.by_hash.insert(entry.user_op_hash, key);
            inner.by_key.insert(key, entry);
        }

        self.reputation.update_seen_status(Some(sender));
        self.reputation.update_seen_status(aggregator);
        self.reputation.update_seen_status(paymaster);
        self.reputation.update_seen_status(factory);

        Ok(false)
    }

    /// Multi-role violation: reject if the new op's sender is
    /// a known paymaster/factory elsewhere, or its paymaster/factory is a
    /// known sender elsewhere.
    fn check_multi_role(
        &self,
        inner: &Inner,
        sender: Address,
        factory: Option<Address>,
        paymaster: Option<Address>,
    ) -> Result<(), BundlerError> {
        let mut known_entities = HashSet::new();
        let mut known_senders = HashSet::new();
        for entry in inner.by_key.values() {
            known_senders.insert(entry.user_op.sender);
            if let Some(p) = entry.user_op.paymaster() {
                known_entities.insert(p);
            }
            if let Some(f) = entry.user_op.factory() {
                known_entities.insert(f);
            }
        }
        if known_entities.contains(&sender)
            || paymaster.is_some_and(|p| known_senders.contains(&p))
            || factory.is_some_and(|f| known_senders.contains(&f))
        {
            return Err(BundlerError::OpcodeValidation(
                "multi-role violation: entity plays more than one role across the mempool".into(),
            ));
        }
        Ok(())
    }

    pub fn remove_by_hash(&self, hash: B256) -> Option<MempoolEntry> {
        let mut inner = self.inner.write();
        let key = inner.by_hash.remove(&hash)?;
        self.remove_by_key_locked(&mut inner, key)
    }

    pub fn remove_by_key(&self, sender: Address, nonce: U256) -> Option<MempoolEntry> {
        let mut inner = self.inner.write();
        self.remove_by_key_locked(&mut inner, (sender, nonce))
    }

    fn remove_by_key_locked(&self, inner: &mut Inner, key: (Address, U256)) -> Option<MempoolEntry> {
        let entry = inner.by_key.remove(&key)?;
        inner.by_hash.remove(&entry.user_op_hash);
        inner.bump_entry_count(entry.user_op.sender, -1);
        if let Some(f) = entry.user_op.factory() {
            inner.bump_entry_count(f, -1);
        }
        if let Some(p) = entry.user_op.paymaster() {
            inner.bump_entry_count(p, -1);
        }
        Some(entry)
    }

    pub fn get_by_hash(&self, hash: B256) -> Option<MempoolEntry> {
        let inner = self.inner.read();
        let key = inner.by_hash.get(&hash)?;
        inner.by_key.get(key).cloned()
    }

    pub fn dump(&self) -> Vec<MempoolEntry> {
        self.inner.read().by_key.values().cloned().collect()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_key.clear();
        inner.by_hash.clear();
        inner.entry_count.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `getSortedForInclusion`: a stable copy sorted by
    /// `maxPriorityFeePerGas` **descending** — the revenue-maximizing policy
    /// (resolved Open Question 1, documented in DESIGN.md).
    pub fn get_sorted_for_inclusion(&self) -> Vec<MempoolEntry> {
        let mut entries: Vec<_> = self.inner.read().by_key.values().cloned().collect();
        entries.sort_by(|a, b| b.user_op.max_priority_fee_per_gas.cmp(&a.user_op.max_priority_fee_per_gas));
        entries
    }

    pub fn known_senders(&self) -> HashSet<Address> {
        self.inner.read().by_key.values().map(|e| e.user_op.sender).collect()
    }
}

pub fn entity_addresses(entry: &MempoolEntry) -> Vec<(Entity, Address)> {
    let mut out = vec![(Entity::Sender, entry.user_op.sender)];
    if let Some(f) = entry.user_op.factory() {
        out.push((Entity::Factory, f));
    }
    if let Some(p) = entry.user_op.paymaster() {
        out.push((Entity::Paymaster, p));
    }
    if let Some(a) = entry.aggregator {
        out.push((Entity::Aggregator, a));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reputation::ReputationParams;
    use crate::testutil::MockNodeProvider;
    use alloy_primitives::Bytes;
    use bundler_types::ReferencedContracts;

    fn mempool() -> MempoolManager<MockNodeProvider> {
        let reputation = Arc::new(ReputationManager::new(
            Arc::new(MockNodeProvider::default()),
            ReputationParams::NON_BUNDLER,
            vec![],
            vec![],
            U256::from(1u64),
            0,
        ));
        MempoolManager::new(reputation)
    }

    fn entry(sender: Address, nonce: u64, max_fee: u64, max_prio: u64) -> MempoolEntry {
        MempoolEntry {
            user_op: bundler_types::UserOperation {
                sender,
                nonce: U256::from(nonce),
                init_code: Bytes::new(),
                call_data: Bytes::new(),
                call_gas_limit: U256::from(100_000),
                verification_gas_limit: U256::from(100_000),
                pre_verification_gas: U256::from(50_000),
                max_fee_per_gas: U256::from(max_fee),
                max_priority_fee_per_gas: U256::from(max_prio),
                paymaster_and_data: Bytes::new(),
                signature: Bytes::new(),
            },
            user_op_hash: B256::random(),
            prefund: U256::ZERO,
            referenced_contracts: ReferencedContracts::default(),
            aggregator: None,
        }
    }

    const EP: Address = Address::repeat_byte(0xEE);

    #[tokio::test]
    async fn entry_count_matches_role_occupancy() {
        let pool = mempool();
        let sender = Address::repeat_byte(1);
        pool.add_user_operation(entry(sender, 0, 100, 10), EP).await.unwrap();
        assert_eq!(pool.entry_count(sender), 1);
        pool.remove_by_key(sender, U256::ZERO);
        assert_eq!(pool.entry_count(sender), 0);
    }

    #[tokio::test]
    async fn at_most_one_entry_per_sender_nonce() {
        let pool = mempool();
        let sender = Address::repeat_byte(2);
        pool.add_user_operation(entry(sender, 0, 100, 10), EP).await.unwrap();
        let replaced = pool.add_user_operation(entry(sender, 0, 111, 11), EP).await.unwrap();
        assert!(replaced);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn replacement_requires_strictly_10_percent_bump() {
        let pool = mempool();
        let sender = Address::repeat_byte(3);
        pool.add_user_operation(entry(sender, 0, 10, 1), EP).await.unwrap();
        let bumped_too_little = entry(sender, 0, 11, 1); // 1.0 vs required 1.1
        assert!(pool.add_user_operation(bumped_too_little, EP).await.is_err());
        let bumped_enough = entry(sender, 0, 11, 2); // 11/10=1.1, 2/1=2.0
        assert!(pool.add_user_operation(bumped_enough, EP).await.is_ok());
    }

    #[tokio::test]
    async fn multi_role_violation_is_rejected() {
        let pool = mempool();
        let sender = Address::repeat_byte(4);
        pool.add_user_operation(entry(sender, 0, 100, 10), EP).await.unwrap();

        let mut second = entry(Address::repeat_byte(5), 0, 100, 10);
        second.user_op.paymaster_and_data = Bytes::from([sender.as_slice(), &[1, 2]].concat());
        assert!(pool.add_user_operation(second, EP).await.is_err());
    }

    #[tokio::test]
    async fn sorted_for_inclusion_is_descending_by_priority_fee() {
        let pool = mempool();
        pool.add_user_operation(entry(Address::repeat_byte(6), 0, 100, 1), EP).await.unwrap();
        pool.add_user_operation(entry(Address::repeat_byte(7), 0, 100, 5), EP).await.unwrap();
        pool.add_user_operation(entry(Address::repeat_byte(8), 0, 100, 3), EP).await.unwrap();
        let sorted = pool.get_sorted_for_inclusion();
        let fees: Vec<_> = sorted.iter().map(|e| e.user_op.max_priority_fee_per_gas).collect();
        assert_eq!(fees, vec![U256::from(5), U256::from(3), U256::from(1)]);
    }

    #[tokio::test]
    async fn clear_then_dump_is_empty() {
        let pool = mempool();
        pool.add_user_operation(entry(Address::repeat_byte(9), 0, 100, 1), EP).await.unwrap();
        pool.clear();
        assert!(pool.dump().is_empty());
    }

    #[tokio::test]
    async fn removed_op_does_not_resurface_in_sorted_view() {
        let pool = mempool();
        let sender = Address::repeat_byte(10);
        pool.add_user_operation(entry(sender, 0, 100, 1), EP).await.unwrap();
        pool.remove_by_key(sender, U256::ZERO);
        assert!(pool.get_sorted_for_inclusion().is_empty());
    }
}
