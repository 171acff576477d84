//! ERC-4337 account-abstraction bundler core: mempool, stack-level opcode
//! tracer, reputation, bundle building and the JSON-RPC surface that drives
//! them. The node itself (`NodeProvider`) is a seam, not a dependency — see
//! `provider` for the boundary this crate expects.

pub mod bundle;
pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod logging;
pub mod mempool;
pub mod provider;
pub mod reputation;
pub mod rpc;
pub mod tracer;
pub mod validation;

pub mod testutil;

use std::sync::Arc;

use config::BundlerConfig;
use execution::ExecutionManager;
use provider::NodeProvider;

pub use error::{BundlerError, ProviderError};

/// Wires a [`NodeProvider`] and [`BundlerConfig`] into the full component
/// graph: independent components holding capability handles passed at
/// construction, mediated by the Execution Manager.
pub fn build<P: NodeProvider + 'static>(provider: Arc<P>, config: BundlerConfig) -> Arc<ExecutionManager<P>> {
    // Permissionless mempool profile; the stricter `BUNDLER` profile is for
    // a node that only ever sees its own trusted traffic, not modeled as a
    // config option here.
    let reputation = Arc::new(reputation::ReputationManager::new(
        provider.clone(),
        reputation::ReputationParams::NON_BUNDLER,
        config.whitelist.clone(),
        config.blacklist.clone(),
        config.min_stake,
        config.min_unstake_delay_sec,
    ));
    let mempool = Arc::new(mempool::MempoolManager::new(reputation.clone()));
    let validation =
        Arc::new(validation::ValidationManager::new(provider.clone(), config.entry_point, config.unsafe_mode));
    let bundle = Arc::new(bundle::BundleManager::new(
        provider.clone(),
        mempool.clone(),
        reputation.clone(),
        validation.clone(),
        config.entry_point,
        config.beneficiary,
        config.min_signer_balance,
        config.max_bundle_gas,
        config.conditional_rpc,
        config.account_root_mode,
    ));
    let events = Arc::new(events::EventsManager::new(provider.clone(), mempool.clone(), reputation.clone(), config.entry_point));

    let exec = Arc::new(ExecutionManager::new(
        provider,
        mempool,
        reputation,
        validation,
        bundle,
        events,
        config.entry_point,
        config.chain_id,
    ));

    let (interval_s, max_pool_size) = config.bundling_mode.resolve();
    exec.set_auto_bundler(interval_s, max_pool_size);
    exec.set_reputation_cron(config.reputation_cron_interval_ms);

    exec
}
