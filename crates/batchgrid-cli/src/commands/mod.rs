pub mod queue;
pub mod submit;

use std::path::Path;

use anyhow::Context;
use batchgrid_core::DispatchConfig;
use batchgrid_dispatch::Dispatcher;

pub(crate) fn load_dispatcher(config: &Path) -> anyhow::Result<Dispatcher> {
    tracing::debug!(path = %config.display(), "loading configuration");
    let config = DispatchConfig::from_file(config)
        .with_context(|| format!("failed to load {}", config.display()))?;
    Ok(Dispatcher::new(config)?)
}
