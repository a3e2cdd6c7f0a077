mod settings;


use config::{Config, ConfigError, Environment, File};
use std::path::Path;

use crate::messaging::topology::unique_queues;

pub use settings::{
    BrokerSettings, CircuitBreakerSettings, MetricsSettings, ProviderSettings, RouterSettings, Settings,
    WorkerDefaults, WorkerSettings,
};

/// Optional file read when no path is given on the command line.
const DEFAULT_CONFIG_FILE: &str = "config/provider_relay";

/// Loads configuration from `path` (or `config/provider_relay.*` when
/// present) and `RELAY_*` environment variables, on top of the built-in
/// defaults. Nested keys use a double underscore: `RELAY_BROKER__URL`.
pub fn load_config_from(path: Option<&Path>) -> Result<Settings, ConfigError> {
    load(path, environment())
}

fn environment() -> Environment {
    Environment::with_prefix("RELAY")
        .prefix_separator("_")
        .separator("__")
}

fn load(path: Option<&Path>, environment: Environment) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };

    let settings: Settings = Config::builder()
        .add_source(file)
        .add_source(environment)
        .build()?
        .try_deserialize()?;

    settings.validate().map_err(ConfigError::Message)?;
    Ok(settings)
}

impl Settings {
    /// Every queue referenced by the configured components, in first-seen
    /// order.
    pub fn all_queues(&self) -> Vec<String> {
        let router_queues = self.routers.iter().flat_map(|router| router.route_table().queues());
        let worker_queues = self
            .workers
            .iter()
            .flat_map(|worker| [worker.input.clone(), worker.output.clone()]);
        let queues: Vec<String> = router_queues.chain(worker_queues).collect();

        unique_queues(queues.iter().map(String::as_str))
    }
}
