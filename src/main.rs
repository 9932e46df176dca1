//! orch CLI entrypoint.
//!
//! This is the main entrypoint for the `orch` command-line tool.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use policy_orchestrator::apply::guard;
use policy_orchestrator::cli::{Cli, Commands, OutputFormatter, StateCommands};
use policy_orchestrator::config::{
    find_config_file, ConfigLoader, EngineConfig, PolicyLoader, StateBackend,
};
use policy_orchestrator::error::Result;
use policy_orchestrator::external::{ExternalData, StaticSecretLoader, StaticUserLoader};
use policy_orchestrator::plugin::StaticPluginRegistry;
use policy_orchestrator::policy::{Policy, PolicyValidator};
use policy_orchestrator::reconciler::Reconciler;
use policy_orchestrator::state::{LocalStateStore, MemoryStateStore, StateStore};

use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, base_dir) = match load_config(cli.config.as_ref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(cli.verbose, config.logging.json, &config.logging.level);
    guard::install_panic_hook();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli, config, &base_dir)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over the configured level; `--verbose` forces debug.
fn init_logging(verbose: bool, json: bool, level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Everything a command needs, loaded once.
struct Workspace {
    config: EngineConfig,
    policy: Arc<Policy>,
    external: ExternalData,
    state_store: Box<dyn StateStore>,
}

/// Main async entry point. Returns whether the command succeeded.
async fn run(cli: Cli, config: EngineConfig, base_dir: &Path) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);

    if let Commands::Validate { warnings } = cli.command {
        let policy = PolicyLoader::new().load_policy(&base_dir.join(&config.policy.path))?;
        let result = PolicyValidator::new().check(&policy);
        formatter.emit(&formatter.format_validation(&result, warnings));
        return Ok(result.is_valid());
    }

    let workspace = Workspace::load(config, base_dir)?;
    let reconciler = workspace.reconciler();

    match cli.command {
        Commands::Validate { .. } => Ok(true),
        Commands::Resolve {
            dependency,
            instances,
        } => {
            workspace.warn_on_policy_problems();
            let (_, desired) = reconciler.resolve().await?;
            formatter.emit(&formatter.format_resolution(&desired, dependency.as_deref(), instances));
            Ok(true)
        }
        Commands::Plan { detailed } => {
            workspace.warn_on_policy_problems();
            let pass = reconciler.plan().await?;
            formatter.emit(&formatter.format_plan(&pass.plan, detailed));
            Ok(true)
        }
        Commands::Apply {
            fail_fast,
            max_parallel,
        } => {
            workspace.warn_on_policy_problems();
            let mut reconciler = reconciler;
            if fail_fast {
                reconciler = reconciler.with_continue_on_error(false);
            }
            if let Some(max) = max_parallel {
                reconciler = reconciler.with_max_parallel_actions(max);
            }
            let result = reconciler.reconcile().await?;
            formatter.emit(&formatter.format_reconciliation(&result));
            Ok(result.success)
        }
        Commands::Drift => {
            let report = reconciler.check_drift().await?;
            formatter.emit(&formatter.format_drift(&report));
            Ok(report.is_converged())
        }
        Commands::Endpoints { dependency } => {
            let mut endpoints = reconciler.endpoints().await?;
            if let Some(dependency) = dependency {
                endpoints.retain(|key, _| *key == dependency);
            }
            formatter.emit(&formatter.format_endpoints(&endpoints));
            Ok(true)
        }
        Commands::Resources { dependency } => {
            let collected = reconciler.dependency_resources(&dependency).await?;
            let complete = collected.error.is_none();
            formatter.emit(&formatter.format_resources(&collected));
            Ok(complete)
        }
        Commands::State { command } => cmd_state(&workspace, command, &formatter).await,
    }
}

/// State management commands.
async fn cmd_state(
    workspace: &Workspace,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let state_store = &workspace.state_store;

    match command {
        StateCommands::Show { revisions } => {
            if let Some(state) = state_store.load().await? {
                formatter.emit(&formatter.format_state(&state, revisions));
            } else {
                formatter.warning("No state found.");
            }
        }
        StateCommands::Unlock { lock_id: Some(id) } => {
            state_store.release_lock(&id).await?;
            formatter.success("State unlocked.");
        }
        StateCommands::Unlock { lock_id: None } => match state_store.force_unlock().await? {
            Some(lock) => formatter.success(&format!("Released lock held by {}.", lock.holder)),
            None => formatter.warning("State is not locked."),
        },
    }

    Ok(true)
}

impl Workspace {
    /// Loads the policy, users, secrets and state backend named by the
    /// configuration. Relative paths are taken from `base_dir`.
    fn load(config: EngineConfig, base_dir: &Path) -> Result<Self> {
        let loader = PolicyLoader::new();
        let policy = loader.load_policy(&base_dir.join(&config.policy.path))?;

        let users = match &config.policy.users {
            Some(path) => loader.load_users(&base_dir.join(path))?,
            None => Vec::new(),
        };
        let secrets: HashMap<String, BTreeMap<String, String>> = match &config.policy.secrets {
            Some(path) => loader.load_secrets(&base_dir.join(path))?,
            None => HashMap::new(),
        };
        let external = ExternalData::new(
            Arc::new(StaticUserLoader::new(users)),
            Arc::new(StaticSecretLoader::new(secrets)),
        );

        let state_store: Box<dyn StateStore> = match config.state.backend {
            StateBackend::Local => Box::new(LocalStateStore::with_state_path(
                base_dir.join(&config.state.path),
            )),
            StateBackend::Memory => Box::new(MemoryStateStore::new()),
        };
        debug!("Using {} state backend", state_store.backend_type());

        Ok(Self {
            config,
            policy: Arc::new(policy),
            external,
            state_store,
        })
    }

    fn reconciler(&self) -> Reconciler<'_, dyn StateStore> {
        Reconciler::new(
            Arc::clone(&self.policy),
            self.external.clone(),
            Arc::new(StaticPluginRegistry::dry_run()),
            self.state_store.as_ref(),
        )
        .with_max_parallel_actions(self.config.apply.max_parallel_actions)
        .with_continue_on_error(self.config.apply.continue_on_error)
    }

    fn warn_on_policy_problems(&self) {
        let result = PolicyValidator::new().check(&self.policy);
        for error in &result.errors {
            warn!("Policy problem at {}: {}", error.field, error.message);
        }
        for warning in &result.warnings {
            warn!("{}", warning);
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads the configuration and the directory its relative paths start from.
///
/// An explicit path must exist; otherwise `orchestrator.yaml` is searched
/// upwards from the current directory and defaults apply when none exists.
fn load_config(config_path: Option<&PathBuf>) -> Result<(EngineConfig, PathBuf)> {
    let config_file = match config_path {
        Some(path) => Some(path.clone()),
        None => find_config_file(".").ok(),
    };

    let base_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let loader = ConfigLoader::new().with_base_path(&base_dir);
    loader.load_dotenv()?;
    let config = loader.load_with_env(config_file.as_deref())?;
    Ok((config, base_dir))
}
