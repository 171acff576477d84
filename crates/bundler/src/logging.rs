//! Tracing setup, grounded on `crates/test-utils/src/lib.rs`'s `init_tracing`
//! helper: an `EnvFilter` built from a directive string, falling back to
//! `RUST_LOG` when the caller passes `None`.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber. `directive` is the configured
/// `log_filter`; pass `None` to defer entirely to `RUST_LOG`.
pub fn init(directive: Option<&str>) {
    let filter = match directive {
        Some(d) => EnvFilter::try_new(d).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::from_default_env(),
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
