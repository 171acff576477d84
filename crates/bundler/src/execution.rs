//! Execution Manager (Component H): the single-writer lock every
//! mutating RPC handler and the auto-bundler timer serialize through.
//! Timer lifecycle (spawn, replace-on-reconfigure, abort-on-drop) is a
//! plain `tokio::time::interval` loop held in a `JoinHandle`, aborted and
//! respawned rather than mutated in place whenever the interval changes.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, B256, U256};
use bundler_types::{MempoolEntry, UserOperation};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::bundle::BundleManager;
use crate::error::BundlerError;
use crate::events::EventsManager;
use crate::mempool::MempoolManager;
use crate::provider::NodeProvider;
use crate::reputation::ReputationManager;
use crate::validation::{required_prefund, ValidationManager};

/// Outcome of `sendUserOperation`, handed back to the RPC layer.
pub struct IntakeOutcome {
    pub user_op_hash: B256,
}

pub struct ExecutionManager<P> {
    provider: Arc<P>,
    mempool: Arc<MempoolManager<P>>,
    reputation: Arc<ReputationManager<P>>,
    validation: Arc<ValidationManager<P>>,
    bundle: Arc<BundleManager<P>>,
    events: Arc<EventsManager<P>>,
    entry_point: Address,
    chain_id: u64,
    /// Serializes every mutating operation.
    lock: Mutex<()>,
    auto_bundle_timer: SyncMutex<Option<JoinHandle<()>>>,
    reputation_cron_timer: SyncMutex<Option<JoinHandle<()>>>,
    max_pool_size: SyncMutex<u64>,
}

impl<P: NodeProvider + 'static> ExecutionManager<P> {
    pub fn new(
        provider: Arc<P>,
        mempool: Arc<MempoolManager<P>>,
        reputation: Arc<ReputationManager<P>>,
        validation: Arc<ValidationManager<P>>,
        bundle: Arc<BundleManager<P>>,
        events: Arc<EventsManager<P>>,
        entry_point: Address,
        chain_id: u64,
    ) -> Self {
        Self {
            provider,
            mempool,
            reputation,
            validation,
            bundle,
            events,
            entry_point,
            chain_id,
            lock: Mutex::new(()),
            auto_bundle_timer: SyncMutex::new(None),
            reputation_cron_timer: SyncMutex::new(None),
            max_pool_size: SyncMutex::new(0),
        }
    }

    /// Validates, admits to the mempool, and returns the op hash.
    #[instrument(skip_all, fields(sender = %op.sender))]
    pub async fn send_user_operation(
        self: &Arc<Self>,
        op: UserOperation,
        entry_point: Address,
        now: u64,
    ) -> Result<IntakeOutcome, BundlerError> {
        let _guard = self.lock.lock().await;

        self.validation.check_input(entry_point, &op)?;
        let output = self.validation.validate(&op, now, None).await?;

        let user_op_hash = op.hash(entry_point, self.chain_id);
        let prefund = required_prefund(&op);
        let entry = MempoolEntry {
            user_op: op,
            user_op_hash,
            prefund,
            referenced_contracts: output.referenced_contracts,
            aggregator: None,
        };
        self.mempool.add_user_operation(entry, entry_point).await?;

        self.attempt_bundle_locked(false).await;
        Ok(IntakeOutcome { user_op_hash })
    }

    /// Builds and sends a bundle if one is ready. Public entry point acquires the lock; callers
    /// already holding it (like `send_user_operation`) use the `_locked`
    /// variant directly.
    pub async fn attempt_bundle(self: &Arc<Self>, force: bool) {
        let _guard = self.lock.lock().await;
        self.attempt_bundle_locked(force).await;
    }

    async fn attempt_bundle_locked(self: &Arc<Self>, force: bool) {
        let max_pool_size = *self.max_pool_size.lock();
        if !(force || self.mempool.len() as u64 >= max_pool_size) {
            return;
        }

        let now = SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs();

        match self.bundle.build(now).await {
            Ok(built) if !built.entries.is_empty() => {
                if let Err(e) = self.bundle.send(built).await {
                    error!(error = %e, "bundle send failed");
                }
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "bundle build failed"),
        }

        if max_pool_size == 0 {
            if let Err(e) = self.events.handle_past_events().await {
                error!(error = %e, "handlePastEvents failed after auto-mine");
            }
        }
    }

    /// Reconfigures auto-bundling, replacing any running timer. `interval_s=0`
    /// disables it (size-triggered only).
    pub fn set_auto_bundler(self: &Arc<Self>, interval_s: u64, max_pool_size: u64) {
        *self.max_pool_size.lock() = max_pool_size;

        let mut slot = self.auto_bundle_timer.lock();
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        if interval_s == 0 {
            return;
        }

        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_s));
            loop {
                ticker.tick().await;
                info!("auto-bundler tick");
                this.attempt_bundle(true).await;
            }
        });
        *slot = Some(handle);
    }

    /// Reconfigures the periodic reputation-aging job.
    pub fn set_reputation_cron(self: &Arc<Self>, interval_ms: u64) {
        let mut slot = self.reputation_cron_timer.lock();
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        if interval_ms == 0 {
            return;
        }

        let reputation = self.reputation.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                reputation.hourly_cron();
            }
        });
        *slot = Some(handle);
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    pub fn mempool(&self) -> &Arc<MempoolManager<P>> {
        &self.mempool
    }

    pub fn reputation(&self) -> &Arc<ReputationManager<P>> {
        &self.reputation
    }

    pub fn events(&self) -> &Arc<EventsManager<P>> {
        &self.events
    }

    pub fn validation(&self) -> &Arc<ValidationManager<P>> {
        &self.validation
    }

    pub fn bundle(&self) -> &Arc<BundleManager<P>> {
        &self.bundle
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }
}

impl<P> Drop for ExecutionManager<P> {
    fn drop(&mut self) {
        if let Some(handle) = self.auto_bundle_timer.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.reputation_cron_timer.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reputation::ReputationParams;
    use crate::testutil::MockNodeProvider;
    use alloy_primitives::Bytes;

    const EP: Address = Address::repeat_byte(0xEE);

    fn harness() -> Arc<ExecutionManager<MockNodeProvider>> {
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
        let bundle = Arc::new(BundleManager::new(
            provider.clone(),
            mempool.clone(),
            reputation.clone(),
            validation.clone(),
            EP,
            Address::repeat_byte(0xBE),
            U256::ZERO,
            U256::from(5_000_000u64),
            false,
            false,
        ));
        let events = Arc::new(EventsManager::new(provider.clone(), mempool.clone(), reputation.clone(), EP));
        Arc::new(ExecutionManager::new(provider, mempool, reputation, validation, bundle, events, EP, 1))
    }

    fn sample_op(sender: Address) -> UserOperation {
        UserOperation {
            sender,
            nonce: U256::ZERO,
            init_code: Bytes::new(),
            call_data: Bytes::new(),
            call_gas_limit: U256::from(50_000),
            verification_gas_limit: U256::from(100_000),
            pre_verification_gas: U256::from(60_000),
            max_fee_per_gas: U256::from(2_000_000_000u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            paymaster_and_data: Bytes::new(),
            signature: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn send_user_operation_admits_to_mempool_without_force_bundling() {
        let exec = harness();
        let op = sample_op(Address::repeat_byte(1));
        let packed = {
            let mut buf = Vec::new();
            buf.extend_from_slice(op.sender.as_slice());
            buf.extend_from_slice(&op.nonce.to_be_bytes::<32>());
            buf.extend_from_slice(&op.init_code);
            buf.extend_from_slice(&op.call_data);
            buf.extend_from_slice(&op.paymaster_and_data);
            buf.extend_from_slice(&op.signature);
            buf
        };
        exec.provider.queue_unsafe_result(
            packed,
            crate::provider::ValidationResult {
                pre_op_gas: U256::from(30_000),
                valid_after: 0,
                valid_until: 0,
                sig_failed: false,
                aggregator: None,
            },
        );

        let outcome = exec.send_user_operation(op, EP, 1_000).await.unwrap();
        assert_ne!(outcome.user_op_hash, B256::ZERO);
        assert_eq!(exec.mempool().len(), 1);
    }

    #[tokio::test]
    async fn set_auto_bundler_zero_disables_timer() {
        let exec = harness();
        exec.set_auto_bundler(0, 5);
        assert!(exec.auto_bundle_timer.lock().is_none());
    }

    #[tokio::test]
    async fn attempt_bundle_without_force_and_empty_pool_is_a_no_op() {
        let exec = harness();
        exec.attempt_bundle(false).await;
        assert_eq!(exec.mempool().len(), 0);
    }
}
