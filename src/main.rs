use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::runtime::Runtime;

use artifact_collector::cli::{Args, CollectOpts, Commands};
use artifact_collector::config::{load_or_create_config, parse_definitions, CollectorConfig};
use artifact_collector::constants::FLOW_SUMMARY_FILE;
use artifact_collector::flow::{output_path, FileOutputAggregator, FlowArgs, FlowRunner, FlowStatus};
use artifact_collector::knowledge_base::KnowledgeBase;
use artifact_collector::registry::{
    ArtifactRegistry, DefinitionStore, DirectoryDefinitionStore, LoadReport, REGISTRY,
};
use artifact_collector::transport::{LocalBulkTransfer, LocalTransport};
use artifact_collector::utils::paths::resolve_within;
use artifact_collector::utils::summary::create_flow_summary;

fn main() -> Result<()> {
    let args = Args::parse();

    initialize_logging(args.verbose)?;

    if let Commands::InitConfig { path } = &args.command {
        return init_config(path);
    }

    let config = load_or_create_config(args.config.as_deref())?;
    let runtime = Runtime::new().context("Failed to create tokio runtime")?;

    runtime.block_on(async {
        match &args.command {
            Commands::Collect(opts) => collect(&config, opts).await,
            Commands::List => list(&config).await,
            Commands::Validate { files } => validate(files).await,
            Commands::Upload { file } => upload(&config, file).await,
            Commands::Delete { name } => delete(&config, name).await,
            Commands::InitConfig { .. } => Ok(()),
        }
    })
}

/// Initialize logging with the specified verbosity level
fn initialize_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(log_level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto)
        .context("Failed to initialize logger")?;
    Ok(())
}

fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("Refusing to overwrite existing config {}", path.display());
    }
    CollectorConfig::default().save_to_yaml_file(path)?;
    info!("Configuration created at {}", path.display());
    Ok(())
}

fn log_report(report: &LoadReport) {
    info!("{}: {} artifact(s) loaded", report.path.display(), report.loaded.len());
    for err in &report.errors {
        warn!("{}: {}", report.path.display(), err);
    }
}

/// Populate the process-wide registry from the configured sources.
async fn build_registry(config: &CollectorConfig) -> Result<Arc<ArtifactRegistry>> {
    let registry = REGISTRY.clone();

    if config.load_bundled_definitions {
        let count = registry.load_bundled().await.context("Failed to load bundled definitions")?;
        info!("Registered {} bundled artifact(s)", count);
    }

    for path in &config.definition_paths {
        if path.is_dir() {
            for report in registry.add_dir_source(path).await? {
                log_report(&report);
            }
        } else {
            let report = registry
                .add_file_source(path)
                .await
                .context(format!("Failed to load definitions from {}", path.display()))?;
            log_report(&report);
        }
    }

    if let Some(dir) = &config.datastore_dir {
        registry.set_store(Some(Arc::new(DirectoryDefinitionStore::new(dir)))).await;
    }

    Ok(registry)
}

fn datastore(config: &CollectorConfig) -> Result<DirectoryDefinitionStore> {
    match &config.datastore_dir {
        Some(dir) => Ok(DirectoryDefinitionStore::new(dir)),
        None => bail!("No datastore_dir configured"),
    }
}

async fn collect(config: &CollectorConfig, opts: &CollectOpts) -> Result<()> {
    let registry = build_registry(config).await?;
    let kb = KnowledgeBase::from_local_host();

    let client_id = opts.client_id.clone().unwrap_or_else(|| kb.hostname.clone());
    let user = opts
        .user
        .clone()
        .or_else(|| kb.users.first().map(|u| u.username.clone()))
        .unwrap_or_else(|| "unknown".to_string());

    let flow_args = FlowArgs::new(client_id, opts.artifacts.iter().cloned())
        .with_output_template(
            opts.output_template
                .clone()
                .unwrap_or_else(|| config.output_template.clone()),
        )
        .with_split_output(opts.split_output || config.split_output_by_artifact)
        .with_user(user);

    info!("Collecting {} artifact(s) from {}", flow_args.artifact_list.len(), flow_args.client_id);

    let runner = FlowRunner::new(
        registry,
        Arc::new(LocalTransport::new()),
        Arc::new(LocalBulkTransfer::new(config.output_dir.join("files"))),
        Arc::new(FileOutputAggregator::new(&config.output_dir)),
    )
    .with_config(config);

    let state = runner.collect_artifacts(flow_args, kb).wait().await?;

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let summary = create_flow_summary(&state, &hostname)?;
    let summary_dir = resolve_within(&config.output_dir, Path::new(&output_path(&state, None)))?;
    tokio::fs::create_dir_all(&summary_dir)
        .await
        .context(format!("Failed to create directory: {}", summary_dir.display()))?;
    let summary_path = summary_dir.join(FLOW_SUMMARY_FILE);
    tokio::fs::write(&summary_path, summary)
        .await
        .context(format!("Failed to write {}", summary_path.display()))?;
    info!("Flow summary written to {}", summary_path.display());

    for failure in &state.failures {
        warn!("{}: {}", failure.artifact, failure.error);
    }
    for name in &state.skipped {
        info!("{} does not apply to this host", name);
    }

    match state.status() {
        FlowStatus::Error => {
            let reason = state.error.map(|e| e.to_string()).unwrap_or_default();
            error!("Flow {} failed: {}", state.flow_id, reason);
            bail!("Collection failed: {}", reason)
        }
        _ => {
            info!("Flow {} complete, {} output(s) written", state.flow_id, state.outputs.len());
            Ok(())
        }
    }
}

async fn list(config: &CollectorConfig) -> Result<()> {
    let registry = build_registry(config).await?;
    if registry.store().await.is_some() {
        registry.reconcile().await.context("Failed to reconcile with the definition store")?;
    }

    for entry in registry.entries().await {
        let os = if entry.definition.supported_os.is_empty() {
            "any".to_string()
        } else {
            entry.definition.supported_os.iter().cloned().collect::<Vec<_>>().join(",")
        };
        let origin = format!("{:?}", entry.origin);
        println!("{:<40} {:<12} {}", entry.definition.name, origin, os);
    }
    Ok(())
}

async fn validate(files: &[PathBuf]) -> Result<()> {
    let mut invalid = 0;
    for file in files {
        let text = tokio::fs::read_to_string(file)
            .await
            .context(format!("Failed to read {}", file.display()))?;
        let context = file.display().to_string();

        match parse_definitions(&text, &context) {
            Ok(parsed) => {
                info!("{}: {} valid definition(s)", context, parsed.definitions.len());
                for err in &parsed.errors {
                    error!("{}", err);
                }
                invalid += parsed.errors.len();
            }
            Err(e) => {
                error!("{}", e);
                invalid += 1;
            }
        }
    }

    if invalid > 0 {
        bail!("{} invalid definition(s)", invalid);
    }
    Ok(())
}

async fn upload(config: &CollectorConfig, file: &Path) -> Result<()> {
    let store = datastore(config)?;
    let text = tokio::fs::read_to_string(file)
        .await
        .context(format!("Failed to read {}", file.display()))?;
    let parsed = parse_definitions(&text, &file.display().to_string())?;

    for err in &parsed.errors {
        warn!("Not uploading: {}", err);
    }
    let count = parsed.definitions.len();
    for definition in parsed.definitions {
        let name = definition.name.clone();
        store
            .put(definition)
            .await
            .context(format!("Failed to store {}", name))?;
        info!("Uploaded {}", name);
    }

    info!("{} definition(s) persisted to {}", count, store.root().display());
    Ok(())
}

async fn delete(config: &CollectorConfig, name: &str) -> Result<()> {
    let store = datastore(config)?;
    store.delete(name).await.context(format!("Failed to delete {}", name))?;
    info!("Deleted {} from {}", name, store.root().display());
    Ok(())
}
