//! Tracing bootstrap

use crate::config::LogConfig;
use std::sync::Once;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. Only the first call has any
/// effect.
pub fn init_tracing(config: &LogConfig) {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
        let registry = tracing_subscriber::registry().with(filter);
        let result = if config.json {
            registry.with(fmt::layer().json()).try_init()
        } else {
            registry.with(fmt::layer().with_target(true)).try_init()
        };
        if let Err(e) = result {
            eprintln!("tracing already initialised: {e}");
        }
    });
}
