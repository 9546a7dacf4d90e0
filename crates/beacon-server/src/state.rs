//! Shared server state.

use beacon_core::Broker;

use crate::config::Config;

/// State shared by all three listeners.
pub struct AppState {
    /// The event broker.
    pub broker: Broker,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            broker: Broker::new(config.broker_config()),
            config,
        }
    }
}
