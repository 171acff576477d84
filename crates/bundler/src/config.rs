//! `BundlerConfig`: every option the bundler recognizes plus the
//! bundling-mode enum, built as a `with_*` chain the way `anvil`'s
//! `NodeConfig` exposes its own options (see
//! `crates/anvil/tests/it/anvil_api.rs`'s `NodeConfig::test().with_*(...)`
//! pattern) with a `test()` convenience constructor for the test suite.

use alloy_primitives::{Address, U256};

/// Bundling mode, externally exposed as `'auto'`, `'manual'`, or a numeric
/// interval: resolves to `(autoBundleInterval, autoBundleMempoolSize)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BundlingMode {
    /// `(0, 0)`: size-triggered on every intake, no timer.
    Auto,
    /// `(0, 1000)`: effectively never auto-triggers; only `sendBundleNow`.
    Manual,
    /// `(interval_s, max_pool_size)`.
    Interval { interval_s: u64, max_pool_size: u64 },
}

impl BundlingMode {
    pub fn resolve(self) -> (u64, u64) {
        match self {
            Self::Auto => (0, 0),
            Self::Manual => (0, 1000),
            Self::Interval { interval_s, max_pool_size } => (interval_s, max_pool_size),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BundlerConfig {
    pub beneficiary: Address,
    pub entry_point: Address,
    pub chain_id: u64,
    pub gas_factor: f64,
    pub min_signer_balance: U256,
    pub network: String,
    pub port: u16,
    /// Skip the stack-level tracer ("unsafe" mode).
    pub unsafe_mode: bool,
    /// Expose the `debug_bundler_*` method family.
    pub debug_rpc: bool,
    /// Dispatch bundles via `eth_sendRawTransactionConditional`.
    pub conditional_rpc: bool,
    pub whitelist: Vec<Address>,
    pub blacklist: Vec<Address>,
    pub max_bundle_gas: U256,
    pub min_stake: U256,
    pub min_unstake_delay_sec: u32,
    pub bundling_mode: BundlingMode,
    pub reputation_cron_interval_ms: u64,
    /// When set, `BundleManager::build()` fetches `eth_getProof(sender)` for
    /// every admitted sender and stores the resulting state root as the
    /// address-level entry in the bundle's storage map, instead of the
    /// slot-level entries the tracer collects.
    pub account_root_mode: bool,
    /// `RUST_LOG`-style filter directive string, ambient observability
    /// plumbing rather than a bundler feature.
    pub log_filter: String,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            beneficiary: Address::ZERO,
            entry_point: Address::ZERO,
            chain_id: 1,
            gas_factor: 1.0,
            min_signer_balance: U256::from(100_000_000_000_000_000u64),
            network: "http://127.0.0.1:8545".to_string(),
            port: 3000,
            unsafe_mode: false,
            debug_rpc: false,
            conditional_rpc: false,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            max_bundle_gas: U256::from(5_000_000u64),
            min_stake: U256::from(1_000_000_000_000_000_000u64),
            min_unstake_delay_sec: 84_600,
            bundling_mode: BundlingMode::Auto,
            reputation_cron_interval_ms: 60 * 60 * 1000,
            account_root_mode: false,
            log_filter: "info".to_string(),
        }
    }
}

impl BundlerConfig {
    /// Convenience constructor for tests: a deterministic config pointed at
    /// a placeholder entry point, mirroring `NodeConfig::test()`'s role in
    /// `anvil`'s own test suite.
    pub fn test() -> Self {
        Self { entry_point: Address::repeat_byte(0xEE), ..Self::default() }
    }

    pub fn with_beneficiary(mut self, beneficiary: Address) -> Self {
        self.beneficiary = beneficiary;
        self
    }

    pub fn with_entry_point(mut self, entry_point: Address) -> Self {
        self.entry_point = entry_point;
        self
    }

    pub fn with_unsafe_mode(mut self, unsafe_mode: bool) -> Self {
        self.unsafe_mode = unsafe_mode;
        self
    }

    pub fn with_conditional_rpc(mut self, conditional_rpc: bool) -> Self {
        self.conditional_rpc = conditional_rpc;
        self
    }

    pub fn with_max_bundle_gas(mut self, max_bundle_gas: U256) -> Self {
        self.max_bundle_gas = max_bundle_gas;
        self
    }

    pub fn with_bundling_mode(mut self, mode: BundlingMode) -> Self {
        self.bundling_mode = mode;
        self
    }

    pub fn with_whitelist(mut self, whitelist: Vec<Address>) -> Self {
        self.whitelist = whitelist;
        self
    }

    pub fn with_blacklist(mut self, blacklist: Vec<Address>) -> Self {
        self.blacklist = blacklist;
        self
    }

    pub fn with_account_root_mode(mut self, account_root_mode: bool) -> Self {
        self.account_root_mode = account_root_mode;
        self
    }
}
