pub mod config;
pub mod handlers;
pub mod monitor;
pub mod server;
pub mod timing;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use config::RuntimeConfig;
use handlers::accounts::Account;
use monitor::PerformanceMonitor;
use timing::TimingNormalizer;

/// Shared application state, constructed once at bootstrap and handed to
/// every handler via `State<Arc<AppState>>`. The two instruments are
/// explicit service instances — not module globals — so tests build
/// isolated stacks and the admin reset has an obvious owner.
pub struct AppState {
    pub config: RuntimeConfig,

    /// Always-on latency/memory instrumentation.
    pub monitor: Arc<PerformanceMonitor>,

    /// Policy-driven latency reshaping.
    pub normalizer: Arc<TimingNormalizer>,

    /// Demo-domain stores; the real persistence layer is out of scope.
    pub accounts: RwLock<HashMap<String, Account>>,
    pub users: RwLock<HashMap<String, String>>,
}

impl AppState {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            monitor: Arc::new(PerformanceMonitor::new(config.clone())),
            normalizer: Arc::new(TimingNormalizer::new()),
            accounts: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            config,
        }
    }
}
