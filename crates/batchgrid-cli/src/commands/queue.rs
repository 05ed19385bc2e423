use std::path::Path;

use batchgrid_core::Backend;

pub async fn status(config: &Path, job_name: &str) -> anyhow::Result<()> {
    let dispatcher = super::load_dispatcher(config)?;
    let running = dispatcher.count_running(job_name).await?;
    println!("{job_name}: {running} job(s) listed");
    Ok(())
}

pub async fn cancel(config: &Path, job_name: &str) -> anyhow::Result<()> {
    let dispatcher = super::load_dispatcher(config)?;
    dispatcher.cancel(job_name).await?;
    println!("✓ Cancelled jobs named {job_name}");
    Ok(())
}

pub async fn probe(config: &Path) -> anyhow::Result<()> {
    let dispatcher = super::load_dispatcher(config)?;
    let backend = dispatcher.probe().await;
    let configured = dispatcher.config().scheduler.kind;
    match backend {
        Backend::Local => println!("local pool (configured scheduler: {configured:?})"),
        other => println!("{other}"),
    }
    Ok(())
}
