//! Hostwright CLI entrypoint.
//!
//! This is the main entrypoint for the hostwright command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use hostwright::cli::{
    Cli, Commands, LogFormat, LookupCommands, OutputFormatter, StateCommands,
};
use hostwright::config::{
    ConfigParser, ConfigValidator, DesiredConfig, ResourceAddress, find_config_file,
};
use hostwright::error::{ConfigError, HostwrightError, ReconcileError, Result};
use hostwright::hosting::{Hosting, HttpHosting, HttpHostingOptions, SandboxHosting};
use hostwright::lifecycle::DataSources;
use hostwright::reconciler::Reconciler;
use hostwright::state::{
    HistoryEntry, LocalStateStore, Operation, STATE_DIR, StateStore, generate_holder_id,
};

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Where remote calls go.
enum Backend {
    /// In-memory sandbox persisted to a file.
    Sandbox(SandboxHosting),
    /// The hosting API.
    Remote(HttpHosting),
}

impl Backend {
    fn hosting(&self) -> &dyn Hosting {
        match self {
            Self::Sandbox(sandbox) => sandbox,
            Self::Remote(client) => client,
        }
    }

    /// Saves the sandbox world, if any.
    async fn finish(&self) -> Result<()> {
        if let Self::Sandbox(sandbox) = self {
            sandbox.persist().await?;
        }
        Ok(())
    }
}

/// Everything a command needs to talk to the hosting service.
struct Context {
    config: DesiredConfig,
    state_store: LocalStateStore,
    backend: Backend,
}

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose, cli.log_format);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` overrides the level.
fn init_logging(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_ref();
    let sandbox = cli.sandbox.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Plan { no_refresh } => {
            let ctx = load_context(config_path, sandbox).await?;
            let result = cmd_plan(&ctx, no_refresh, &formatter).await;
            ctx.backend.finish().await?;
            result
        }
        Commands::Apply {
            yes,
            fail_fast,
            no_refresh,
        } => {
            let ctx = load_context(config_path, sandbox).await?;
            let result = cmd_apply(&ctx, yes, fail_fast, no_refresh, &formatter).await;
            ctx.backend.finish().await?;
            result
        }
        Commands::Refresh => {
            let ctx = load_context(config_path, sandbox).await?;
            let report = reconciler(&ctx).refresh().await;
            ctx.backend.finish().await?;
            println!("{}", formatter.format_refresh(&report?));
            Ok(())
        }
        Commands::Status => cmd_status(config_path, &formatter).await,
        Commands::Drift => {
            let ctx = load_context(config_path, sandbox).await?;
            let report = reconciler(&ctx).check_drift().await;
            ctx.backend.finish().await?;
            println!("{}", formatter.format_drift(&report?));
            Ok(())
        }
        Commands::Destroy { yes } => {
            let ctx = load_context(config_path, sandbox).await?;
            let result = cmd_destroy(&ctx, yes, &formatter).await;
            ctx.backend.finish().await?;
            result
        }
        Commands::Lookup { command } => cmd_lookup(config_path, sandbox, command, &formatter).await,
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new Hostwright project in: {}", path.display());

    let config_path = path.join("hostwright.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/hostwright.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".env") || !existing.contains(STATE_DIR) {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Hostwright")?;
            if !existing.contains(".env") {
                writeln!(file, ".env")?;
            }
            if !existing.contains(STATE_DIR) {
                writeln!(file, "{state_entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and fill in your API key");
    eprintln!("  2. Edit hostwright.yaml with your resources");
    eprintln!("  3. Run 'hostwright validate' to check your configuration");
    eprintln!("  4. Run 'hostwright plan' to see what will change");
    eprintln!("  5. Run 'hostwright apply' to create your resources");

    Ok(())
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let validator = ConfigValidator::new();
    let result = validator.check(&config);
    println!("{}", formatter.format_validation(&result, show_warnings));
    validator.validate(&config)?;

    eprintln!("\nConfiguration summary:");
    eprintln!("  SSH keys: {}", config.ssh_keys.len());
    eprintln!("  VLANs: {}", config.vlans.len());
    eprintln!("  Disks: {}", config.disks.len());
    eprintln!("  IPs: {}", config.ips.len());
    eprintln!("  Private IPs: {}", config.private_ips.len());
    eprintln!("  VMs: {}", config.vms.len());
    Ok(())
}

/// Show the execution plan.
async fn cmd_plan(ctx: &Context, no_refresh: bool, formatter: &OutputFormatter) -> Result<()> {
    let preview = reconciler(ctx).with_refresh(!no_refresh).plan().await?;
    println!("{}", formatter.format_plan(&preview));
    Ok(())
}

/// Apply the execution plan.
async fn cmd_apply(
    ctx: &Context,
    auto_approve: bool,
    fail_fast: bool,
    no_refresh: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let reconciler = reconciler(ctx)
        .with_refresh(!no_refresh)
        .with_continue_on_error(!fail_fast);

    let preview = reconciler.plan().await?;
    if preview.plan.is_empty() {
        println!("{}", formatter.success("No changes to apply."));
        return Ok(());
    }
    println!("{}", formatter.format_plan(&preview));

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    let result = reconciler.apply().await?;
    println!("{}", formatter.format_reconciliation(&result));

    if result.success {
        Ok(())
    } else {
        Err(HostwrightError::Reconcile(ReconcileError::Aborted {
            reason: format!("{} actions failed", result.errors.len()),
        }))
    }
}

/// Show managed resources.
async fn cmd_status(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (_config, state_store) = load_config_and_state(config_path)?;
    let state = state_store.load().await?.unwrap_or_default();
    println!("{}", formatter.format_status(&state));
    Ok(())
}

/// Destroy every managed resource.
async fn cmd_destroy(ctx: &Context, auto_approve: bool, formatter: &OutputFormatter) -> Result<()> {
    let state = ctx.state_store.load().await?.unwrap_or_default();
    if state.is_empty() {
        eprintln!("No resources to destroy.");
        return Ok(());
    }

    eprintln!("The following resources will be destroyed:");
    for resource in state.resources.values() {
        eprintln!("  - {} ({})", resource.address, resource.id);
    }

    if !auto_approve
        && !confirm(
            "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
            "destroy",
        )?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    let result = reconciler(ctx).destroy().await?;
    println!("{}", formatter.format_reconciliation(&result));
    Ok(())
}

/// Query data sources.
async fn cmd_lookup(
    config_path: Option<&PathBuf>,
    sandbox: Option<&Path>,
    command: LookupCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    // Lookups need no configuration unless it carries the endpoint.
    let config = match resolve_config_path(config_path) {
        Ok(path) => load_config(&path)?,
        Err(_) => DesiredConfig::default(),
    };
    let backend = create_backend(&config, sandbox).await?;
    let sources = DataSources::new(backend.hosting());

    match command {
        LookupCommands::Region { code } => {
            let region = sources.region(&code).await?;
            println!("{}", formatter.format_region(&region));
        }
        LookupCommands::Image { name, region } => {
            let image = sources.image(&name, &region).await?;
            println!("{}", formatter.format_image(&image));
        }
    }
    backend.finish().await
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (_config, state_store) = load_config_and_state(config_path)?;

    match command {
        StateCommands::Show => {
            if let Some(state) = state_store.load().await? {
                println!("{}", formatter.format_state(&state));
            } else {
                eprintln!("No state found at {}.", state_store.location());
            }
            if let Some(lock) = state_store.lock_info().await? {
                eprintln!(
                    "Locked by {} for {} ({}s remaining)",
                    lock.holder,
                    lock.operation,
                    lock.remaining_secs()
                );
            }
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = state_store.acquire_lock(&holder, "manual").await?;
            println!("{}", formatter.success(&format!("State locked: {}", lock.lock_id)));
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                state_store.force_unlock().await?;
                println!("{}", formatter.warning("State forcefully unlocked."));
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                println!("{}", formatter.success("State unlocked."));
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
        StateCommands::Rm { address } => {
            let address: ResourceAddress = address
                .parse()
                .map_err(|message: String| ConfigError::validation(message, "address"))?;
            forget(&state_store, &address).await?;
            println!("{}", formatter.success(&format!("{address} removed from state")));
        }
    }

    Ok(())
}

/// Drops one record from the state without touching the remote resource.
async fn forget(state_store: &LocalStateStore, address: &ResourceAddress) -> Result<()> {
    let lock = state_store.acquire_lock(&generate_holder_id(), "forget").await?;
    let result = forget_locked(state_store, address).await;
    state_store.release_lock(&lock.lock_id).await?;
    result
}

async fn forget_locked(state_store: &LocalStateStore, address: &ResourceAddress) -> Result<()> {
    let mut state = state_store.load().await?.unwrap_or_default();
    if state.remove(address).is_none() {
        return Err(ReconcileError::not_found("managed resource", address.to_string()).into());
    }
    let hash = state.config_hash.clone();
    state.add_history(HistoryEntry::new(
        Operation::Forget,
        &hash,
        vec![address.to_string()],
        None,
    ));
    state_store.save(&state).await
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Asks for confirmation on stderr and compares the answer.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

fn reconciler(ctx: &Context) -> Reconciler<'_, LocalStateStore> {
    Reconciler::new(&ctx.config, &ctx.state_store, ctx.backend.hosting())
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

fn config_dir(config_file: &Path) -> &Path {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Loads `.env`, the configuration and its environment overrides, then
/// validates it.
fn load_config(config_file: &Path) -> Result<DesiredConfig> {
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(config_file)?;

    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        tracing::warn!("{warning}");
    }
    Ok(config)
}

/// Loads configuration and creates the state store it points at.
fn load_config_and_state(config_path: Option<&PathBuf>) -> Result<(DesiredConfig, LocalStateStore)> {
    let config_file = resolve_config_path(config_path)?;
    let config = load_config(&config_file)?;

    let base = config_dir(&config_file);
    let state_store = config.state.path.as_ref().map_or_else(
        || LocalStateStore::with_base_dir(base.join(STATE_DIR)),
        |path| LocalStateStore::with_state_path(base.join(path)),
    );
    debug!("Using state at {}", state_store.location());

    Ok((config, state_store))
}

async fn load_context(config_path: Option<&PathBuf>, sandbox: Option<&Path>) -> Result<Context> {
    let (config, state_store) = load_config_and_state(config_path)?;
    let backend = create_backend(&config, sandbox).await?;
    Ok(Context {
        config,
        state_store,
        backend,
    })
}

/// Opens the sandbox, or creates a hosting API client.
async fn create_backend(config: &DesiredConfig, sandbox: Option<&Path>) -> Result<Backend> {
    if let Some(path) = sandbox {
        info!("Using sandbox hosting at {}", path.display());
        return Ok(Backend::Sandbox(SandboxHosting::open(path).await?));
    }

    let api_key = ConfigParser::get_api_key()?;
    let mut options = HttpHostingOptions {
        timeout_secs: config.provider.timeout_secs,
        max_retries: config.provider.max_retries,
        ..HttpHostingOptions::default()
    };
    if let Some(url) = &config.provider.url {
        options.url.clone_from(url);
    }
    let client = HttpHosting::with_options(&api_key, options)?;
    info!("Using hosting API at {}", client.url());
    Ok(Backend::Remote(client))
}
