//! CLI command definitions, routing, and tracing setup.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, bail};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use wayback_core::{Channel, Policy, Reply, ReplySink, ServiceContext, render_text};
use wayback_matrix::MatrixBot;
use wayback_shared::{
    AppConfig, Slot, SlotRegistry, WaybackError, config_file_path, init_config, init_config_at,
    load_config, load_config_from,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Wayback: relay URLs to web archives.
#[derive(Parser)]
#[command(
    name = "wayback",
    version,
    about = "Send URLs to the Internet Archive, archive.today, IPFS and Telegraph.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.wayback/wayback.toml).
    #[arg(long, env = "WAYBACK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Only use these slots (comma-separated: ia,is,ip,ph).
    #[arg(long, value_delimiter = ',', global = true)]
    pub slots: Vec<Slot>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Archive URLs with every enabled slot and print the results.
    Archive {
        /// URLs to archive.
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Serve the web front-end and/or the Matrix bot until stopped.
    Serve {
        /// Serve the anonymized web front-end.
        #[arg(long)]
        web: bool,

        /// Serve the Matrix bot.
        #[arg(long)]
        matrix: bool,

        /// Web listen address (overrides `[web] listen`).
        #[arg(long)]
        listen: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "wayback=info",
        1 => "wayback=debug",
        _ => "wayback=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    // stdout carries `archive` results; logs go to stderr.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Archive { urls } => {
            let config = resolve_config(config_path)?;
            cmd_archive(config, &cli.slots, &urls).await
        }
        Command::Serve { web, matrix, listen } => {
            let config = resolve_config(config_path)?;
            cmd_serve(config, &cli.slots, web, matrix, listen).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path).await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// The configured slots, narrowed by `--slots` when given.
fn registry(config: &AppConfig, slots: &[Slot]) -> SlotRegistry {
    let mut registry = SlotRegistry::from(config);
    if !slots.is_empty() {
        registry.restrict_to(slots);
    }
    registry
}

// ---------------------------------------------------------------------------
// archive
// ---------------------------------------------------------------------------

/// Writes archived results as text; errors surface through the exit path.
struct TextSink<W> {
    out: Mutex<W>,
}

#[async_trait]
impl<W: Write + Send> ReplySink for TextSink<W> {
    fn channel(&self) -> Channel {
        Channel::Cli
    }

    async fn render(&self, reply: &Reply<'_>) -> wayback_shared::Result<()> {
        if let Reply::Archived { results, .. } = reply {
            let mut out = self
                .out
                .lock()
                .map_err(|_| WaybackError::Render("output lock poisoned".into()))?;
            out.write_all(render_text(results).as_bytes())
                .and_then(|()| out.flush())
                .map_err(|e| WaybackError::io("<stdout>", e))?;
        }
        Ok(())
    }
}

async fn cmd_archive(config: AppConfig, slots: &[Slot], urls: &[String]) -> Result<()> {
    let registry = registry(&config, slots);
    let ctx = ServiceContext::new(config, registry, Policy::Strict)?;
    archive(ctx, urls, std::io::stdout()).await
}

/// Archive `urls`, write the results to `out`, then drain the context.
async fn archive<W: Write + Send>(ctx: ServiceContext, urls: &[String], out: W) -> Result<()> {
    let sink = TextSink {
        out: Mutex::new(out),
    };
    let outcome = ctx.pipeline.run(&urls.join(" "), &sink).await;
    ctx.shutdown().await;

    match outcome.error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

async fn cmd_serve(
    config: AppConfig,
    slots: &[Slot],
    web: bool,
    matrix: bool,
    listen: Option<String>,
) -> Result<()> {
    if !web && !matrix {
        bail!("nothing to serve: pass --web and/or --matrix");
    }

    let listen = listen.unwrap_or_else(|| config.web.listen.clone());
    let registry = registry(&config, slots);
    let ctx = ServiceContext::new(config, registry, Policy::Tolerant)?;

    let bot = if matrix {
        Some(MatrixBot::connect(ctx.clone()).await?)
    } else {
        None
    };

    tokio::spawn(stop_on_signal(ctx.cancel.clone()));

    let mut services = JoinSet::new();
    if web {
        let ctx = ctx.clone();
        services.spawn(async move { wayback_web::serve(ctx, &listen).await });
    }
    if let Some(bot) = bot {
        services.spawn(bot.serve());
    }

    let mut outcome: Result<()> = Ok(());
    while let Some(joined) = services.join_next().await {
        let result: Result<()> = match joined {
            Ok(result) => result.map_err(Into::into),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            error!(error = %e, "service stopped with an error");
            ctx.cancel.cancel();
            if outcome.is_ok() {
                outcome = Err(e);
            }
        }
    }

    ctx.shutdown().await;
    outcome
}

/// Cancel `cancel` on Ctrl-C or SIGTERM.
async fn stop_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
        () = cancel.cancelled() => return,
    }
    info!("stop signal received, shutting down");
    cancel.cancel();
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => {
            init_config_at(path)?;
            path.to_path_buf()
        }
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let source = match path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };
    let toml_str = toml::to_string_pretty(&config)?;
    println!("# {}", source.display());
    println!("{toml_str}");
    Ok(())
}
