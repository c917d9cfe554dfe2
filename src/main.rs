//! Stratus CLI entrypoint.
//!
//! This is the main entrypoint for the stratus command-line tool.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use stratus_deploy::cli::{Cli, Commands, OutputFormatter, StateCommands};
use stratus_deploy::error::Result;
use stratus_deploy::graph::DependencyGraph;
use stratus_deploy::model::{
    find_manifest_file, Manifest, ManifestParser, ModelValidator, ResourceModel,
};
use stratus_deploy::plan::{ApplyExecutor, DiffEngine, Plan, DEFAULT_WORKERS};
use stratus_deploy::provider::HttpProvisioner;
use stratus_deploy::state::{LocalStateStore, StateStore};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force).map(|()| ExitCode::SUCCESS),
        Commands::Validate { warnings } => {
            cmd_validate(cli.config.as_ref(), warnings).map(|()| ExitCode::SUCCESS)
        }
        Commands::Plan { detailed } => {
            cmd_plan(cli.config.as_ref(), detailed, &formatter)
                .await
                .map(|()| ExitCode::SUCCESS)
        }
        Commands::Apply { yes, workers } => {
            cmd_apply(cli.config.as_ref(), yes, workers, &formatter).await
        }
        Commands::Destroy { yes } => cmd_destroy(cli.config.as_ref(), yes, &formatter).await,
        Commands::State { command } => {
            cmd_state(cli.config.as_ref(), command, &formatter)
                .await
                .map(|()| ExitCode::SUCCESS)
        }
    }
}

/// Initialize a new project.
fn cmd_init(path: &PathBuf, force: bool) -> Result<()> {
    info!("Initializing new Stratus project in: {}", path.display());

    let manifest_path = path.join("stratus.deploy.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    // Check if files exist
    if !force && manifest_path.exists() {
        eprintln!("Manifest file already exists: {}", manifest_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    // Create directory if needed
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    // Write manifest template
    let manifest_template = include_str!("../templates/stratus.deploy.yaml");
    std::fs::write(&manifest_path, manifest_template)?;
    eprintln!("Created: {}", manifest_path.display());

    // Write .env.example
    let env_template = include_str!("../templates/.env.example");
    std::fs::write(&env_path, env_template)?;
    eprintln!("Created: {}", env_path.display());

    // Write/update .gitignore
    let gitignore_content = ".env\n.stratus/\n";
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".env") || !existing.contains(".stratus") {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Stratus")?;
            if !existing.contains(".env") {
                writeln!(file, ".env")?;
            }
            if !existing.contains(".stratus") {
                writeln!(file, ".stratus/")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, gitignore_content)?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and fill in your API credentials");
    eprintln!("  2. Edit stratus.deploy.yaml with your resource declarations");
    eprintln!("  3. Run 'stratus validate' to check your manifest");
    eprintln!("  4. Run 'stratus plan' to see what will change");
    eprintln!("  5. Run 'stratus apply' to provision your resources");

    Ok(())
}

/// Validate the manifest.
fn cmd_validate(config_path: Option<&PathBuf>, show_warnings: bool) -> Result<()> {
    let manifest_file = resolve_manifest_path(config_path)?;
    info!("Validating manifest: {}", manifest_file.display());

    // Load .env
    let parser = ManifestParser::new().with_base_path(
        manifest_file
            .parent()
            .unwrap_or_else(|| std::path::Path::new(".")),
    );
    parser.load_dotenv()?;

    // Parse manifest
    let manifest = parser.load_with_env(&manifest_file)?;

    // Validate field constraints, then structure: duplicate identifiers
    // and unknown references surface from the model build, cycles from
    // the graph build.
    let validator = ModelValidator::new();
    let result = validator.validate(&manifest)?;
    let model = ResourceModel::from_manifest(&manifest)?;
    DependencyGraph::build(&model)?;

    eprintln!("Manifest is valid!");
    if show_warnings && !result.warnings.is_empty() {
        eprintln!("\nWarnings:");
        for warning in &result.warnings {
            eprintln!("  - {warning}");
        }
    }

    // Show summary
    eprintln!("\nManifest summary:");
    eprintln!("  Project: {}", manifest.project.name);
    eprintln!("  Environment: {}", manifest.project.environment);
    eprintln!("  Resources: {}", model.len());

    Ok(())
}

/// Show the execution plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (model, _manifest, store) = load_model_and_store(config_path)?;
    let graph = DependencyGraph::build(&model)?;

    // Load state
    let snapshot = store.load().await?;

    // Compute diff and plan
    let diff_engine = DiffEngine::new();
    let diff = diff_engine.compute_diff(&model, &snapshot);
    let plan = Plan::from_diff(&diff, &graph, &snapshot)?;

    // Output
    let output = formatter.format_plan(&plan);
    eprintln!("{output}");

    if detailed && diff.has_changes() {
        eprintln!("\nDetailed changes:");
        for d in diff.actionable_diffs() {
            eprintln!("  {d}");
        }
    }

    Ok(())
}

/// Apply the execution plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    workers: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (model, _manifest, store) = load_model_and_store(config_path)?;
    let graph = DependencyGraph::build(&model)?;
    let provisioner = Arc::new(create_provisioner()?);

    // Load state and plan
    let snapshot = store.load().await?;
    let diff_engine = DiffEngine::new();
    let diff = diff_engine.compute_diff(&model, &snapshot);
    let plan = Plan::from_diff(&diff, &graph, &snapshot)?;

    if plan.is_changeless() {
        eprintln!("No changes to apply.");
        return Ok(ExitCode::SUCCESS);
    }

    // Show plan
    let output = formatter.format_plan(&plan);
    eprintln!("{output}");

    // Confirm
    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let report = execute_locked(&plan, &model, snapshot, store, provisioner, workers).await?;

    // Show result
    let output = formatter.format_report(&report);
    eprintln!("{output}");

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Destroy all recorded resources.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (_model, manifest, store) = load_model_and_store(config_path)?;
    let provisioner = Arc::new(create_provisioner()?);

    // Load state
    let snapshot = store.load().await?;
    if snapshot.is_empty() {
        eprintln!("Nothing to destroy.");
        return Ok(ExitCode::SUCCESS);
    }

    let plan = Plan::destroy(&snapshot)?;

    eprintln!("The following resources will be destroyed:");
    for record in snapshot.records() {
        eprintln!("  - {} ({})", record.id, record.remote_id);
    }

    // Confirm
    if !auto_approve
        && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")?
    {
        eprintln!("Destruction cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    // Deletions never resolve attributes, so an empty model suffices.
    let empty = Manifest {
        project: manifest.project.clone(),
        state: manifest.state.clone(),
        resources: vec![],
    };
    let empty_model = ResourceModel::from_manifest(&empty)?;

    let report = execute_locked(&plan, &empty_model, snapshot, store, provisioner, None).await?;

    let output = formatter.format_report(&report);
    eprintln!("{output}");

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (_model, _manifest, store) = load_model_and_store(config_path)?;

    match command {
        StateCommands::Show => {
            let snapshot = store.load().await?;
            let output = formatter.format_state(&snapshot);
            eprintln!("{output}");
        }
        StateCommands::Lock { holder } => {
            let holder_str = holder.as_deref().unwrap_or("");
            let lock = store.acquire_lock(holder_str).await?;
            eprintln!("State locked: {}", lock.lock_id);
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if let Some(lock_info) = store.get_lock_info().await? {
                    store.release_lock(&lock_info.lock_id).await?;
                    eprintln!("State forcefully unlocked.");
                } else {
                    eprintln!("State is not locked.");
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the manifest file path.
fn resolve_manifest_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_manifest_file("."), |path| Ok(path.clone()))
}

/// Loads the manifest, builds the model, and creates the state store.
fn load_model_and_store(
    config_path: Option<&PathBuf>,
) -> Result<(ResourceModel, Manifest, Arc<dyn StateStore>)> {
    let manifest_file = resolve_manifest_path(config_path)?;
    debug!("Loading manifest from: {}", manifest_file.display());

    let parser = ManifestParser::new().with_base_path(
        manifest_file
            .parent()
            .unwrap_or_else(|| std::path::Path::new(".")),
    );
    parser.load_dotenv()?;

    let manifest = parser.load_with_env(&manifest_file)?;

    // Validate
    let validator = ModelValidator::new();
    validator.validate(&manifest)?;
    let model = ResourceModel::from_manifest(&manifest)?;

    // Create state store rooted next to the manifest unless overridden
    let state_path = manifest.state.path.as_ref().map_or_else(
        || {
            manifest_file
                .parent()
                .unwrap_or_else(|| std::path::Path::new("."))
                .join(".stratus")
        },
        PathBuf::from,
    );
    let store: Arc<dyn StateStore> = Arc::new(LocalStateStore::with_base_dir(state_path));

    Ok((model, manifest, store))
}

/// Creates the provisioning API client from the environment.
fn create_provisioner() -> Result<HttpProvisioner> {
    let api_url = ManifestParser::get_api_url()?;
    let api_token = ManifestParser::get_api_token()?;
    HttpProvisioner::new(&api_url, &api_token)
}

/// Prompts for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Runs a plan under the state lock, honoring Ctrl-C.
async fn execute_locked(
    plan: &Plan,
    model: &ResourceModel,
    snapshot: stratus_deploy::state::StateSnapshot,
    store: Arc<dyn StateStore>,
    provisioner: Arc<HttpProvisioner>,
    workers: Option<usize>,
) -> Result<stratus_deploy::plan::ApplyReport> {
    let lock = store.acquire_lock("").await?;
    debug!("State lock acquired: {}", lock.lock_id);

    // A first Ctrl-C stops dispatching new operations; in-flight ones
    // are allowed to finish so state stays consistent.
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; waiting for in-flight operations");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let executor = ApplyExecutor::new(provisioner, Arc::clone(&store))
        .with_workers(workers.unwrap_or(DEFAULT_WORKERS));

    let result = executor.execute(plan, model, snapshot, &cancel).await;

    store.release_lock(&lock.lock_id).await?;
    debug!("State lock released");

    result
}
