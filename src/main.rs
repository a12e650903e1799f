//! nodeplan CLI entrypoint.
//!
//! This is the main entrypoint for the nodeplan command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use nodeplan::cli::{Cli, Commands, FactsSummary, OutputFormatter, StateCommands, UpgradeArgs};
use nodeplan::config::{
    ConfigHasher, ConfigParser, ConfigValidator, NodePlanConfig, Transport, find_config_file,
};
use nodeplan::error::{ConfigError, NodePlanError, Result};
use nodeplan::plan::{ExecutionReport, Plan, PlanBuilder, PlanExecutor};
use nodeplan::recipe::build_upgrade_plan;
use nodeplan::resource::Os;
use nodeplan::runner::{Context, LocalRunner, Runner, SshRunner};
use nodeplan::state::{
    LOCK_REFRESH_SECS, LocalStateStore, LockKeepalive, NodeRecord, RunOperation, StateStore,
};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Name of the single step executed by the `run` command.
const RUN_STEP: &str = "run";

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over the verbosity flag when set.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

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

/// Main async entry point. Returns whether the command succeeded.
async fn run(cli: Cli) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);
    let (config, base_dir) = load_config(cli.config.as_deref())?;

    let interrupt = CancellationToken::new();
    let ctx = build_context(&config, interrupt.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight commands");
            interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Plan(args) => cmd_plan(&config, &args, &formatter),
        Commands::Upgrade { args, rollback, yes } => {
            cmd_upgrade(&config, &base_dir, &ctx, &args, rollback, yes, &formatter).await
        }
        Commands::Facts => cmd_facts(&config, &ctx, &formatter).await,
        Commands::Run { script, undo } => {
            cmd_run(&config, &base_dir, &ctx, script, undo, &formatter).await
        }
        Commands::State { command } => cmd_state(&config, &base_dir, command, &formatter).await,
    }
}

/// Print the upgrade plan without touching the node.
fn cmd_plan(
    config: &NodePlanConfig,
    args: &UpgradeArgs,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let plan = upgrade_plan(config, args)?;
    let fingerprint = ConfigHasher::new().hash_plan(&plan);
    println!("{}", formatter.format_plan(&plan, &fingerprint));
    Ok(true)
}

/// Execute the upgrade plan against the configured node.
async fn cmd_upgrade(
    config: &NodePlanConfig,
    base_dir: &Path,
    ctx: &Context,
    args: &UpgradeArgs,
    rollback: bool,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let plan = upgrade_plan(config, args)?;
    let fingerprint = ConfigHasher::new().hash_plan(&plan);
    eprintln!("{}", formatter.format_plan(&plan, &fingerprint));

    if !auto_approve
        && !confirm(&format!(
            "Upgrade {} with this plan? [y/N]: ",
            config.node.record_name()
        ))?
    {
        eprintln!("Upgrade cancelled.");
        return Ok(true);
    }

    let executor = PlanExecutor::new().with_rollback(rollback || config.execution.rollback);
    execute_recorded(
        config,
        base_dir,
        ctx,
        &plan,
        &fingerprint,
        RunOperation::Upgrade,
        executor,
        formatter,
    )
    .await
}

/// Execute a single script as a one-step plan.
async fn cmd_run(
    config: &NodePlanConfig,
    base_dir: &Path,
    ctx: &Context,
    script: String,
    undo: Option<String>,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let mut run = nodeplan::resource::Run::new(script);
    if let Some(undo) = undo {
        run = run.with_undo_script(undo);
    }

    let mut builder = PlanBuilder::new();
    builder.add_resource(RUN_STEP, run, []);
    let plan = builder.plan()?;
    let fingerprint = ConfigHasher::new().hash_plan(&plan);

    execute_recorded(
        config,
        base_dir,
        ctx,
        &plan,
        &fingerprint,
        RunOperation::Run,
        PlanExecutor::new(),
        formatter,
    )
    .await
}

/// Runs `plan` under the node lock and folds the report into the node record.
#[allow(clippy::too_many_arguments)]
async fn execute_recorded(
    config: &NodePlanConfig,
    base_dir: &Path,
    ctx: &Context,
    plan: &Plan,
    fingerprint: &str,
    operation: RunOperation,
    executor: PlanExecutor,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let node = config.node.record_name();
    let store = open_store(config, base_dir);
    let runner = build_runner(config)?;

    let lock = store.acquire_lock(node, "").await?;
    let keepalive = LockKeepalive::start(
        Arc::clone(&store),
        &lock,
        Duration::from_secs(LOCK_REFRESH_SECS),
    );
    let outcome = async {
        let mut record = store
            .load(node)
            .await?
            .unwrap_or_else(|| NodeRecord::new(node));

        let executor = executor
            .with_max_concurrency(config.execution.max_concurrency)
            .with_recorded_states(record.states.clone());

        info!(node, target = %runner.target(), steps = plan.len(), "executing plan");
        let report = executor.execute(plan, ctx, &*runner).await?;

        record.record_run(operation, fingerprint, &report);
        store.save(&record).await?;
        Ok::<ExecutionReport, NodePlanError>(report)
    }
    .await;

    keepalive.stop().await;
    if let Err(e) = store.release_lock(node, &lock.lock_id).await {
        warn!(error = %e, "failed to release node lock");
    }

    let report = outcome?;
    println!("{}", formatter.format_report(&report));
    Ok(report.success())
}

/// Gather and print OS facts.
async fn cmd_facts(
    config: &NodePlanConfig,
    ctx: &Context,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let runner = build_runner(config)?;
    let runner: &dyn Runner = &*runner;

    let os = Os::detect(ctx, runner).await?;
    let (selinux_status, selinux_mode) = Os::selinux_status(ctx, runner).await?;
    let container = match Os::is_in_container_vm(ctx, runner).await {
        Ok(container) => Some(container),
        Err(e) => {
            debug!(error = %e, "container detection inconclusive");
            None
        }
    };

    let summary = FactsSummary {
        node: config.node.record_name().to_string(),
        facts: os.facts().clone(),
        selinux_status,
        selinux_mode,
        container,
    };
    println!("{}", formatter.format_facts(&summary));
    Ok(true)
}

/// Node record commands.
async fn cmd_state(
    config: &NodePlanConfig,
    base_dir: &Path,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let node = config.node.record_name();
    let store = open_store(config, base_dir);

    match command {
        StateCommands::Show => {
            if let Some(record) = store.load(node).await? {
                println!("{}", formatter.format_record(&record));
            } else {
                eprintln!("{}", formatter.warning(&format!("No record for node {node}.")));
            }
        }
        StateCommands::Clear { yes } => {
            if !store.exists(node).await? {
                eprintln!("{}", formatter.warning(&format!("No record for node {node}.")));
                return Ok(true);
            }
            if !yes && !confirm(&format!("Delete the record of {node}? [y/N]: "))? {
                eprintln!("Clear cancelled.");
                return Ok(true);
            }
            store.delete(node).await?;
            eprintln!("{}", formatter.success(&format!("Record of {node} deleted.")));
        }
        StateCommands::Unlock { lock_id, force } => {
            let lock_id = if force {
                store.lock_info(node).await?.map(|lock| lock.lock_id)
            } else {
                lock_id
            };
            match lock_id {
                Some(id) => {
                    store.release_lock(node, &id).await?;
                    eprintln!("{}", formatter.success(&format!("Node {node} unlocked.")));
                }
                None if force => {
                    eprintln!("{}", formatter.warning(&format!("Node {node} is not locked.")));
                }
                None => {
                    eprintln!("{}", formatter.warning("Please provide --lock-id or use --force"));
                    return Ok(false);
                }
            }
        }
    }

    Ok(true)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads, overrides and validates the configuration.
///
/// Without `--config` and without a file in the working tree, defaults plus
/// environment overrides are used.
fn load_config(config_path: Option<&Path>) -> Result<(NodePlanConfig, PathBuf)> {
    let config_file = match config_path {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(".").ok(),
    };

    let base_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let parser = ConfigParser::new().with_base_path(&base_dir);
    parser.load_dotenv()?;

    let config = if let Some(file) = &config_file {
        debug!("Loading configuration from: {}", file.display());
        parser.load_with_env(file)?
    } else {
        info!("No configuration file found, using defaults and environment");
        let mut config = NodePlanConfig::default();
        ConfigParser::apply_overrides(&mut config, |key| std::env::var(key).ok())?;
        config
    };

    ConfigValidator::new().validate(&config)?;
    Ok((config, base_dir))
}

/// Builds the caller context from the execution settings.
fn build_context(config: &NodePlanConfig, interrupt: CancellationToken) -> Context {
    let ctx = Context::new().with_cancellation(interrupt);
    match config.execution.command_timeout() {
        Some(timeout) => ctx.with_timeout(timeout),
        None => ctx,
    }
}

/// Builds the runner for the configured transport.
fn build_runner(config: &NodePlanConfig) -> Result<Box<dyn Runner>> {
    let node = &config.node;
    match node.transport {
        Transport::Local => Ok(Box::new(LocalRunner::new())),
        Transport::Ssh => {
            let host = node.host.as_deref().ok_or_else(|| {
                ConfigError::validation("A host is required for the ssh transport", "node.host")
            })?;
            let mut runner = SshRunner::new(host, node.user.as_str()).with_port(node.port);
            if let Some(identity) = &node.identity_file {
                runner = runner.with_identity_file(identity);
            }
            Ok(Box::new(runner))
        }
    }
}

/// Opens the state store, resolving a relative directory against the config file.
fn open_store(config: &NodePlanConfig, base_dir: &Path) -> Arc<dyn StateStore> {
    let dir = if config.state.dir.is_absolute() {
        config.state.dir.clone()
    } else {
        base_dir.join(&config.state.dir)
    };
    Arc::new(LocalStateStore::with_base_dir(dir))
}

/// Builds the upgrade plan, filling missing arguments from the configuration.
fn upgrade_plan(config: &NodePlanConfig, args: &UpgradeArgs) -> Result<Plan> {
    let target = args
        .target
        .as_deref()
        .or(config.node.version.as_deref())
        .ok_or_else(|| {
            ConfigError::validation(
                "A target version is required (--version or node.version)",
                "node.version",
            )
        })?;
    let pkg_type = args.pkg_type.or(config.node.pkg_type).ok_or_else(|| {
        ConfigError::validation(
            "A package type is required (--pkg-type or node.pkg_type)",
            "node.pkg_type",
        )
    })?;
    let role = args.role.or(config.node.role).ok_or_else(|| {
        ConfigError::validation("A node role is required (--role or node.role)", "node.role")
    })?;

    build_upgrade_plan(pkg_type, target, role)
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
