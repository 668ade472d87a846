//! Resource acquisition and pipeline wiring.
//!
//! Brings up logging, loads configuration, connects the catalog, resolves
//! the pool pair, opens both drives, and hands the pair to the orchestrator.
//! Resources acquired before a startup failure are released before the error
//! reaches the operator.

use crate::error::CliError;
use crate::Cli;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tapeline::catalog::{CatalogStore, PgCatalog};
use tapeline::changer::{Changer, MtxChanger};
use tapeline::config::ConfigFile;
use tapeline::logging;
use tapeline::orchestrator::{Orchestrator, RunOutcome};
use tapeline::pair::{ArmLock, BackupPipeline};
use tapeline::source::{LocalSource, SourceStore};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn run(cli: Cli) -> Result<RunOutcome, CliError> {
    let _logging = logging::init_logging(logging::default_log_dir(), logging::default_log_file())
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

    let config = match &cli.config {
        Some(path) => ConfigFile::load_from(Path::new(path))?,
        None => ConfigFile::load()?,
    };

    info!(
        version = tapeline::VERSION,
        pool = cli.pool_id,
        once = cli.once,
        "tapeline starting"
    );

    let auth_file = cli
        .auth_file
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&config.catalog.auth_file));

    let pg = Arc::new(
        PgCatalog::connect(&auth_file, &config.catalog.host, config.catalog.port).await?,
    );
    pg.ensure_schema().await?;

    let outcome = run_pipelines(&cli, &config, Arc::clone(&pg)).await;

    pg.close().await;
    outcome
}

async fn run_pipelines(
    cli: &Cli,
    config: &ConfigFile,
    pg: Arc<PgCatalog>,
) -> Result<RunOutcome, CliError> {
    let catalog: Arc<dyn CatalogStore> = pg;

    // The sibling pool shares our content at the other location.
    let pair_pool = catalog.find_pair(cli.pool_id).await?;
    info!(pool_a = cli.pool_id, pool_b = pair_pool, "pool pair resolved");

    let source: Arc<dyn SourceStore> = Arc::new(LocalSource::new(&config.source.mount));
    let changer: Arc<dyn Changer> = Arc::new(MtxChanger::new(
        &config.changer.mtx_binary,
        &config.changer.device,
    ));

    // One arm, shared by reference between the two pipelines.
    let arm: ArmLock = Arc::new(Mutex::new(()));
    let cancel = CancellationToken::new();

    let pipeline_a = Arc::new(
        BackupPipeline::initialize(
            Arc::clone(&catalog),
            Arc::clone(&source),
            Arc::clone(&changer),
            config,
            cli.pool_id,
            Arc::clone(&arm),
            cancel.clone(),
        )
        .await?,
    );
    let pipeline_b = Arc::new(
        BackupPipeline::initialize(
            Arc::clone(&catalog),
            Arc::clone(&source),
            Arc::clone(&changer),
            config,
            pair_pool,
            Arc::clone(&arm),
            cancel.clone(),
        )
        .await?,
    );

    let orchestrator = Orchestrator::new(
        pipeline_a,
        pipeline_b,
        config.schedules.clone(),
        config.source.roots.clone(),
        cancel,
    );

    let outcome = if cli.once {
        orchestrator.run_once_now().await
    } else {
        orchestrator.run().await
    };
    Ok(outcome)
}
