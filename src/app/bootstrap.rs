use std::sync::Arc;

use log::info;

use crate::app::controller::AppController;
use crate::cache::{JsonFileStore, KeyValueStore};
use crate::cli::Cli;
use crate::config::registry::ConfigRegistry;
use crate::config::Config;
use crate::coordinator::FetchCoordinator;
use crate::error::Result;
use crate::fetch::ReqwestTransport;

/// Entry point used by `main`: assemble configuration, persistence and transport, then run the command.
pub async fn run(cli: Cli) -> Result<()> {
    let (config, registry) = match &cli.config_root {
        Some(root) => {
            let registry = Arc::new(ConfigRegistry::new(root.clone())?);
            info!("Loaded provider descriptors from {}", root.display());
            (registry.snapshot().as_ref().clone(), Some(registry))
        }
        None => (Config::builtin(), None),
    };

    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(cli.state_file.clone()));
    let transport = Arc::new(ReqwestTransport::new()?);
    let coordinator = Arc::new(FetchCoordinator::new(config, transport, Some(store)));

    let controller = AppController::new(Arc::clone(&coordinator), registry);
    let result = controller.run(cli.command).await;
    coordinator.cache().flush();
    result
}
