//! Events Manager (Component G): replays `EntryPoint` logs to clear
//! completed UserOperations out of the mempool and credit inclusion
//! reputation. Cursor/replay shape grounded on `anvil`'s own log-filter
//! polling loop (`crates/anvil/src/eth/backend/notifications.rs` pattern:
//! track a cursor, query `[cursor, latest]`, advance past every handled
//! block).

use std::sync::Arc;

use alloy_primitives::{Address, B256};
use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::error::ProviderError;
use crate::mempool::MempoolManager;
use crate::provider::{EntryPointLog, NodeProvider};
use crate::reputation::ReputationManager;

pub struct EventsManager<P> {
    provider: Arc<P>,
    mempool: Arc<MempoolManager<P>>,
    reputation: Arc<ReputationManager<P>>,
    entry_point: Address,
    last_block: Mutex<Option<u64>>,
}

impl<P: NodeProvider> EventsManager<P> {
    pub fn new(
        provider: Arc<P>,
        mempool: Arc<MempoolManager<P>>,
        reputation: Arc<ReputationManager<P>>,
        entry_point: Address,
    ) -> Self {
        Self { provider, mempool, reputation, entry_point, last_block: Mutex::new(None) }
    }

    /// Queries `[lastBlock, latest]`, dispatches every log, and advances
    /// the cursor past the last block it handled. On the very first call
    /// `lastBlock` is seeded to `current - 1000`.
    #[instrument(skip_all)]
    pub async fn handle_past_events(&self) -> Result<u64, ProviderError> {
        let latest = self.provider.get_block_number().await?;
        let from_block = {
            let mut cursor = self.last_block.lock();
            let from = cursor.unwrap_or_else(|| latest.saturating_sub(1000));
            *cursor = Some(from);
            from
        };

        let logs = self.provider.get_entry_point_logs(self.entry_point, from_block, latest).await?;

        let mut pending_aggregator: Option<(B256, Address)> = None;
        let mut highest_handled = from_block;

        for log in logs {
            match log {
                EntryPointLog::SignatureAggregatorForUserOperations { aggregator, tx_hash, block_number } => {
                    pending_aggregator = Some((tx_hash, aggregator));
                    highest_handled = highest_handled.max(block_number);
                }
                EntryPointLog::UserOperationEvent { user_op_hash, tx_hash, block_number } => {
                    let aggregator = match pending_aggregator {
                        Some((agg_tx, addr)) if agg_tx == tx_hash => Some(addr),
                        _ => None,
                    };
                    self.handle_user_op_event(user_op_hash, aggregator);
                    highest_handled = highest_handled.max(block_number);
                }
                EntryPointLog::AccountDeployed { factory, block_number, .. } => {
                    self.reputation.update_included_status(Some(factory));
                    highest_handled = highest_handled.max(block_number);
                }
            }
        }

        let new_cursor = highest_handled + 1;
        *self.last_block.lock() = Some(new_cursor);
        Ok(new_cursor)
    }

    fn handle_user_op_event(&self, user_op_hash: B256, aggregator: Option<Address>) {
        let Some(entry) = self.mempool.remove_by_hash(user_op_hash) else {
            debug!(%user_op_hash, "UserOperationEvent for an op not tracked in the mempool");
            return;
        };
        self.reputation.update_included_status(Some(entry.user_op.sender));
        self.reputation.update_included_status(entry.user_op.paymaster());
        self.reputation.update_included_status(aggregator);
    }

    pub fn last_block(&self) -> Option<u64> {
        *self.last_block.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reputation::ReputationParams;
    use crate::testutil::MockNodeProvider;
    use alloy_primitives::{Bytes, U256};
    use bundler_types::{MempoolEntry, ReferencedContracts};

    const EP: Address = Address::repeat_byte(0xEE);

    fn harness() -> (Arc<MockNodeProvider>, EventsManager<MockNodeProvider>) {
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
        let events = EventsManager::new(provider.clone(), mempool, reputation, EP);
        (provider, events)
    }

    fn entry(sender: Address, hash: B256) -> MempoolEntry {
        MempoolEntry {
            user_op: bundler_types::UserOperation {
                sender,
                nonce: U256::ZERO,
                init_code: Bytes::new(),
                call_data: Bytes::new(),
                call_gas_limit: U256::from(1),
                verification_gas_limit: U256::from(1),
                pre_verification_gas: U256::from(1),
                max_fee_per_gas: U256::from(1),
                max_priority_fee_per_gas: U256::from(1),
                paymaster_and_data: Bytes::new(),
                signature: Bytes::new(),
            },
            user_op_hash: hash,
            prefund: U256::ZERO,
            referenced_contracts: ReferencedContracts::default(),
            aggregator: None,
        }
    }

    #[tokio::test]
    async fn first_call_seeds_cursor_1000_blocks_back() {
        let (provider, events) = harness();
        provider.set_block_number(5_000);
        let cursor = events.handle_past_events().await.unwrap();
        assert_eq!(cursor, 4_001);
    }

    #[tokio::test]
    async fn user_operation_event_removes_from_mempool_and_credits_inclusion() {
        let (provider, events) = harness();
        provider.set_block_number(100);
        let sender = Address::repeat_byte(1);
        let hash = B256::repeat_byte(9);
        events.mempool.add_user_operation(entry(sender, hash), EP).await.unwrap();
        provider.push_log(EntryPointLog::UserOperationEvent {
            user_op_hash: hash,
            tx_hash: B256::repeat_byte(1),
            block_number: 50,
        });

        events.handle_past_events().await.unwrap();
        assert!(events.mempool.get_by_hash(hash).is_none());
        let reputation = events.reputation.dump();
        let sender_rep = reputation.iter().find(|e| e.address == sender).unwrap();
        assert_eq!(sender_rep.ops_included, 1);
    }

    #[tokio::test]
    async fn aggregator_credited_only_when_sharing_tx_hash() {
        let (provider, events) = harness();
        provider.set_block_number(100);
        let sender = Address::repeat_byte(2);
        let hash = B256::repeat_byte(8);
        let aggregator = Address::repeat_byte(0xAB);
        events.mempool.add_user_operation(entry(sender, hash), EP).await.unwrap();

        let tx_hash = B256::repeat_byte(3);
        provider.push_log(EntryPointLog::SignatureAggregatorForUserOperations {
            aggregator,
            tx_hash,
            block_number: 40,
        });
        provider.push_log(EntryPointLog::UserOperationEvent { user_op_hash: hash, tx_hash, block_number: 40 });

        events.handle_past_events().await.unwrap();
        let reputation = events.reputation.dump();
        let agg_rep = reputation.iter().find(|e| e.address == aggregator).unwrap();
        assert_eq!(agg_rep.ops_included, 1);
    }

    #[tokio::test]
    async fn cursor_advances_past_highest_handled_block() {
        let (provider, events) = harness();
        provider.set_block_number(100);
        provider.push_log(EntryPointLog::AccountDeployed {
            factory: Address::repeat_byte(3),
            tx_hash: B256::repeat_byte(1),
            block_number: 77,
        });
        let cursor = events.handle_past_events().await.unwrap();
        assert_eq!(cursor, 78);
    }
}
