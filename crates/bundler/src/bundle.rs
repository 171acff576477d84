//! Bundle Manager (Component F): greedy gas-bounded packing, paymaster
//! balance tracking, storage-conflict detection, send and failure
//! attribution. Loop structure grounded on `silius-rs`'s
//! `bundle_user_operations` (`crates/mempool/src/uopool.rs`), which tracks
//! `paymaster_dep`/`staked_entity_c`/`senders_all` the same way.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use bundler_types::{MempoolEntry, ReputationStatus, StorageMap};
use tracing::{info, instrument, warn};

use crate::error::BundlerError;
use crate::mempool::MempoolManager;
use crate::provider::{FailedOp, NodeProvider, SendBundleOutcome};
use crate::reputation::ReputationManager;
use crate::validation::ValidationManager;

const MAX_STAKED_ENTITY_PER_BUNDLE: u32 = 4;

#[derive(Clone, Debug, Default)]
pub struct BuiltBundle {
    pub entries: Vec<MempoolEntry>,
    pub storage_map: StorageMap,
}

pub struct BundleManager<P> {
    provider: Arc<P>,
    mempool: Arc<MempoolManager<P>>,
    reputation: Arc<ReputationManager<P>>,
    validation: Arc<ValidationManager<P>>,
    entry_point: Address,
    beneficiary: Address,
    min_signer_balance: U256,
    max_bundle_gas: U256,
    conditional_rpc: bool,
    account_root_mode: bool,
}

impl<P: NodeProvider> BundleManager<P> {
    pub fn new(
        provider: Arc<P>,
        mempool: Arc<MempoolManager<P>>,
        reputation: Arc<ReputationManager<P>>,
        validation: Arc<ValidationManager<P>>,
        entry_point: Address,
        beneficiary: Address,
        min_signer_balance: U256,
        max_bundle_gas: U256,
        conditional_rpc: bool,
        account_root_mode: bool,
    ) -> Self {
        Self {
            provider,
            mempool,
            reputation,
            validation,
            entry_point,
            beneficiary,
            min_signer_balance,
            max_bundle_gas,
            conditional_rpc,
            account_root_mode,
        }
    }

    /// Iterates the sorted mempool admitting entries until the
    /// gas budget, paymaster balance, or per-bundle stake quota is exhausted.
    #[instrument(skip_all)]
    pub async fn build(&self, now: u64) -> Result<BuiltBundle, BundlerError> {
        let sorted = self.mempool.get_sorted_for_inclusion();
        let known_senders = self.mempool.known_senders();

        let mut paymaster_deposit: HashMap<Address, U256> = HashMap::new();
        let mut staked_entity_count: HashMap<Address, u32> = HashMap::new();
        let mut senders_included: HashSet<Address> = HashSet::new();
        let mut storage_map = StorageMap::new();
        let mut total_gas = U256::ZERO;
        let mut bundle = Vec::new();

        for entry in sorted {
            let sender = entry.user_op.sender;
            let factory = entry.user_op.factory();
            let paymaster = entry.user_op.paymaster();

            if [paymaster, factory]
                .into_iter()
                .flatten()
                .any(|addr| self.reputation.get_status(addr) == ReputationStatus::Banned)
            {
                self.mempool.remove_by_hash(entry.user_op_hash);
                continue;
            }

            let throttled_or_over_quota = [paymaster, factory].into_iter().flatten().any(|addr| {
                self.reputation.get_status(addr) == ReputationStatus::Throttled
                    || staked_entity_count.get(&addr).copied().unwrap_or(0) > MAX_STAKED_ENTITY_PER_BUNDLE
            });
            if throttled_or_over_quota {
                continue;
            }

            if senders_included.contains(&sender) {
                continue;
            }

            let revalidated = self
                .validation
                .validate(&entry.user_op, now, Some(entry.referenced_contracts.hash))
                .await;
            let output = match revalidated {
                Ok(output) => output,
                Err(_) => {
                    self.mempool.remove_by_hash(entry.user_op_hash);
                    continue;
                }
            };

            if output
                .storage_map
                .addresses()
                .any(|addr| *addr != sender && known_senders.contains(addr))
            {
                // Storage conflict with another sender in the pool: skip
                // without removing, it may clear up by the next build.
                continue;
            }

            let user_op_gas_cost = output.pre_op_gas + entry.user_op.call_gas_limit;
            if total_gas + user_op_gas_cost > self.max_bundle_gas {
                break;
            }

            if let Some(paymaster) = paymaster {
                let remaining = match paymaster_deposit.get(&paymaster) {
                    Some(r) => *r,
                    None => {
                        let balance = self.provider.balance_of(self.entry_point, paymaster).await?;
                        paymaster_deposit.insert(paymaster, balance);
                        balance
                    }
                };
                if remaining < entry.prefund {
                    continue;
                }
                paymaster_deposit.insert(paymaster, remaining - entry.prefund);
                *staked_entity_count.entry(paymaster).or_insert(0) += 1;
            }
            if let Some(factory) = factory {
                *staked_entity_count.entry(factory).or_insert(0) += 1;
            }

            storage_map.merge(output.storage_map);

            if self.account_root_mode {
                let root = self.provider.get_proof_storage_root(sender).await?;
                storage_map.set_root(sender, root);
            }

            senders_included.insert(sender);
            total_gas += user_op_gas_cost;
            bundle.push(entry);
        }

        Ok(BuiltBundle { entries: bundle, storage_map })
    }

    /// Sends a built bundle, picks a beneficiary, and attributes failures.
    #[instrument(skip_all, fields(size = built.entries.len()))]
    pub async fn send(&self, built: BuiltBundle) -> Result<Option<(alloy_primitives::B256, Vec<alloy_primitives::B256>)>, BundlerError> {
        if built.entries.is_empty() {
            return Ok(None);
        }

        let signer = self.provider.signer_address().await?;
        let signer_balance = self.provider.get_balance(signer).await?;
        let beneficiary = if signer_balance <= self.min_signer_balance { signer } else { self.beneficiary };

        let fee_data = self.provider.fee_data().await?;
        let packed_ops: Vec<Vec<u8>> = built.entries.iter().map(|e| pack_op(&e.user_op)).collect();
        let conditional = self.conditional_rpc.then(|| built.storage_map.clone().into());

        let outcome = self
            .provider
            .send_handle_ops(self.entry_point, packed_ops, beneficiary, fee_data, conditional)
            .await?;

        match outcome {
            SendBundleOutcome::Sent { transaction_hash, user_op_hashes } => {
                info!(%transaction_hash, ops = user_op_hashes.len(), "bundle sent");
                Ok(Some((transaction_hash, user_op_hashes)))
            }
            SendBundleOutcome::Failed(failed) => {
                self.attribute_failure(&built.entries, &failed);
                Ok(None)
            }
        }
    }

    fn attribute_failure(&self, entries: &[MempoolEntry], failed: &FailedOp) {
        let Some(entry) = entries.get(failed.op_index as usize) else { return };
        warn!(reason = %failed.reason, sender = %entry.user_op.sender, "handleOps reverted");

        if failed.reason.starts_with("AA1") {
            if let Some(factory) = entry.user_op.factory() {
                self.reputation.crashed_handle_ops(factory);
            }
        } else if failed.reason.starts_with("AA2") {
            self.reputation.crashed_handle_ops(entry.user_op.sender);
        } else if failed.reason.starts_with("AA3") {
            if let Some(paymaster) = entry.user_op.paymaster() {
                self.reputation.crashed_handle_ops(paymaster);
            }
        } else {
            self.mempool.remove_by_hash(entry.user_op_hash);
        }
    }
}

fn pack_op(op: &bundler_types::UserOperation) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(op.sender.as_slice());
    buf.extend_from_slice(&op.nonce.to_be_bytes::<32>());
    buf.extend_from_slice(&op.init_code);
    buf.extend_from_slice(&op.call_data);
    buf.extend_from_slice(&op.paymaster_and_data);
    buf.extend_from_slice(&op.signature);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reputation::ReputationParams;
    use crate::testutil::MockNodeProvider;
    use alloy_primitives::{B256, Bytes};
    use bundler_types::ReferencedContracts;

    const EP: Address = Address::repeat_byte(0xEE);

    fn entry(sender: Address, prefund: u64, max_prio: u64) -> MempoolEntry {
        MempoolEntry {
            user_op: bundler_types::UserOperation {
                sender,
                nonce: U256::ZERO,
                init_code: Bytes::new(),
                call_data: Bytes::new(),
                call_gas_limit: U256::from(50_000),
                verification_gas_limit: U256::from(100_000),
                pre_verification_gas: U256::from(21_000),
                max_fee_per_gas: U256::from(2_000_000_000u64),
                max_priority_fee_per_gas: U256::from(max_prio),
                paymaster_and_data: Bytes::new(),
                signature: Bytes::new(),
            },
            user_op_hash: B256::random(),
            prefund: U256::from(prefund),
            referenced_contracts: ReferencedContracts::default(),
            aggregator: None,
        }
    }

    fn harness() -> (Arc<MockNodeProvider>, Arc<MempoolManager<MockNodeProvider>>, Arc<ReputationManager<MockNodeProvider>>, Arc<ValidationManager<MockNodeProvider>>) {
        let provider = Arc::new(MockNodeProvider::default());
        let reputation = Arc::new(ReputationManager::new(
            provider.clone(),
            ReputationParams::NON_BUNDLER,
            vec![],
            vec![],
            U256::from(1u64),
            0,
        ));
        let mempool = Arc::new(MempoolManager::new(reputation.clone()));
        let validation = Arc::new(ValidationManager::new(provider.clone(), EP, true));
        (provider, mempool, reputation, validation)
    }

    fn queue_trivial_simulation(provider: &MockNodeProvider, op: &bundler_types::UserOperation) {
        let packed = pack_op(op);
        provider.queue_unsafe_result(
            packed,
            crate::provider::ValidationResult {
                pre_op_gas: U256::from(30_000),
                valid_after: 0,
                valid_until: 0,
                sig_failed: false,
                aggregator: None,
            },
        );
    }

    #[tokio::test]
    async fn build_admits_every_distinct_sender_in_priority_order() {
        let (provider, mempool, reputation, validation) = harness();
        let e1 = entry(Address::repeat_byte(1), 0, 5);
        let e2 = entry(Address::repeat_byte(2), 0, 1);
        queue_trivial_simulation(&provider, &e1.user_op);
        queue_trivial_simulation(&provider, &e2.user_op);
        mempool.add_user_operation(e1, EP).await.unwrap();
        mempool.add_user_operation(e2, EP).await.unwrap();

        let manager = BundleManager::new(
            provider,
            mempool,
            reputation,
            validation,
            EP,
            Address::repeat_byte(0xBE),
            U256::ZERO,
            U256::from(5_000_000u64),
            false,
            false,
        );
        let built = manager.build(1_000).await.unwrap();
        assert_eq!(built.entries.len(), 2);
        assert_eq!(built.entries[0].user_op.sender, Address::repeat_byte(1));
    }

    #[tokio::test]
    async fn paymaster_balance_starves_second_op() {
        let (provider, mempool, reputation, validation) = harness();
        let paymaster = Address::repeat_byte(0xAA);
        let mut e1 = entry(Address::repeat_byte(1), 1_000, 5);
        e1.user_op.paymaster_and_data = Bytes::from([paymaster.as_slice(), &[0u8; 4]].concat());
        let mut e2 = entry(Address::repeat_byte(2), 1_000, 4);
        e2.user_op.paymaster_and_data = Bytes::from([paymaster.as_slice(), &[0u8; 4]].concat());
        queue_trivial_simulation(&provider, &e1.user_op);
        queue_trivial_simulation(&provider, &e2.user_op);
        provider.set_balance(paymaster, U256::from(1_000u64));

        mempool.add_user_operation(e1, EP).await.unwrap();
        mempool.add_user_operation(e2, EP).await.unwrap();

        let manager = BundleManager::new(
            provider,
            mempool,
            reputation,
            validation,
            EP,
            Address::repeat_byte(0xBE),
            U256::ZERO,
            U256::from(5_000_000u64),
            false,
            false,
        );
        let built = manager.build(1_000).await.unwrap();
        assert_eq!(built.entries.len(), 1);
        assert_eq!(built.entries[0].user_op.sender, Address::repeat_byte(1));
    }

    #[tokio::test]
    async fn build_stops_at_first_op_exceeding_gas_budget() {
        let (provider, mempool, reputation, validation) = harness();
        let e1 = entry(Address::repeat_byte(1), 0, 5);
        let e2 = entry(Address::repeat_byte(2), 0, 4);
        queue_trivial_simulation(&provider, &e1.user_op);
        queue_trivial_simulation(&provider, &e2.user_op);
        mempool.add_user_operation(e1, EP).await.unwrap();
        mempool.add_user_operation(e2, EP).await.unwrap();

        let manager = BundleManager::new(
            provider,
            mempool,
            reputation,
            validation,
            EP,
            Address::repeat_byte(0xBE),
            U256::ZERO,
            U256::from(80_000u64), // one op costs 30_000+50_000=80_000; second would overflow
            false,
            false,
        );
        let built = manager.build(1_000).await.unwrap();
        assert_eq!(built.entries.len(), 1);
    }

    #[tokio::test]
    async fn account_root_mode_stores_the_proof_root_instead_of_slots() {
        let (provider, mempool, reputation, validation) = harness();
        let sender = Address::repeat_byte(1);
        let e1 = entry(sender, 0, 5);
        queue_trivial_simulation(&provider, &e1.user_op);
        mempool.add_user_operation(e1, EP).await.unwrap();

        let root = B256::repeat_byte(0x42);
        provider.set_proof_storage_root(sender, root);

        let manager = BundleManager::new(
            provider,
            mempool,
            reputation,
            validation,
            EP,
            Address::repeat_byte(0xBE),
            U256::ZERO,
            U256::from(5_000_000u64),
            false,
            true,
        );
        let built = manager.build(1_000).await.unwrap();
        assert_eq!(built.entries.len(), 1);
        assert_eq!(
            built.storage_map.get(&sender),
            Some(&bundler_types::AccountStorage::RootHash(root))
        );
    }
}
