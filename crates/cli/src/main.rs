//! assetsync: sync static assets to object storage
//!
//! Walks a media directory, assembles joined CSS/JS bundles, runs them
//! through minifiers and uploads everything that changed, with far-future
//! cache headers and gzip companions for text assets.

mod progress;
mod session;

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use assetsync_core::config::{CONFIG_FILE, ConfigError, Settings};
use assetsync_core::walk::is_syncable_name;
use assetsync_sync::{Source, Syncer};
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand, builder::Styles};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr as _, bail};
use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tracing::{debug, error, info};

use crate::progress::SyncProgress;
use crate::session::{Session, Verbosity};

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "assetsync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Sync static assets to S3, Cloud Files or a local mirror")]
#[command(long_about = r#"
assetsync uploads a directory of static assets to object storage.

Features:
  • Change detection - only uploads assets whose checksum changed
  • Joined bundles   - concatenates CSS/JS sources into one file
  • Minification     - CSS and JS minified before upload
  • Gzip companions  - `.gz` copies of large text assets

Examples:
  assetsync sync                 Upload changed assets
  assetsync sync --force         Upload everything
  assetsync watch                Re-sync whenever the media root changes
  assetsync list --format json   Show what would be synced
"#)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload new and changed assets
    Sync {
        /// Upload every asset, even if unchanged
        #[arg(short, long)]
        force: bool,

        /// Do not print uploaded assets
        #[arg(short, long)]
        quiet: bool,
    },

    /// Sync, then keep syncing on changes
    Watch {
        /// Debounce delay in milliseconds
        #[arg(short, long, default_value = "300")]
        debounce: u64,
    },

    /// List the assets a sync would consider
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the base URL assets are served from
    Url {
        /// Prefer an HTTPS URL
        #[arg(long)]
        secure: bool,
    },

    /// Write a processed joined bundle to stdout
    Bundle {
        /// Bundle name as configured under [joined]
        name: String,
    },

    /// Show version and build info
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error reporter: {e}");
    }

    let cli = Cli::parse();
    let quiet = matches!(cli.command, Commands::Sync { quiet: true, .. });
    let session = Session::start(Verbosity::from_flags(cli.verbose, quiet));

    let code = match run(cli, &session).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:?}");
            eprintln!(
                "Trace log for session {}: {}",
                session.id(),
                session.log_path().display()
            );
            ExitCode::from(exit_code(&e))
        }
    };
    drop(session);
    code
}

/// Configuration problems exit with 2, everything else with 1
fn exit_code(err: &color_eyre::Report) -> u8 {
    if err.downcast_ref::<ConfigError>().is_some() {
        2
    } else {
        1
    }
}

async fn run(cli: Cli, session: &Session) -> Result<()> {
    if matches!(cli.command, Commands::Version) {
        eprintln!("assetsync {}", env!("CARGO_PKG_VERSION"));
        eprintln!("Built with Rust {}", env!("CARGO_PKG_RUST_VERSION"));
        return Ok(());
    }

    let settings = Settings::load_file(&cli.config)?;
    let syncer = build_syncer(settings)?;

    match cli.command {
        Commands::Version => {}
        Commands::Sync { force, quiet } => {
            let progress = SyncProgress::new(quiet).with_log_path(session.log_path());
            sync_command(syncer, progress, force).await?;
        }
        Commands::Watch { debounce } => {
            let progress = SyncProgress::new(false).with_log_path(session.log_path());
            watch_command(syncer, progress, debounce).await?;
        }
        Commands::List { format } => list_command(&syncer, &format)?,
        Commands::Url { secure } => println!("{}", syncer.media_url(secure).await?),
        Commands::Bundle { name } => bundle_command(&syncer, &name)?,
    }

    Ok(())
}

fn build_syncer(settings: Settings) -> Result<Syncer> {
    let storage = assetsync_storage::client(&settings)?;
    Syncer::new(settings, storage)
}

async fn sync_command(syncer: Syncer, progress: SyncProgress, force: bool) -> Result<()> {
    info!("Syncing {}...", syncer.settings().media_root.display());

    let syncer = syncer.with_observer(Arc::new(progress));
    let report = syncer.run(force).await?;
    progress::close_warning(&report);
    Ok(())
}

async fn watch_command(syncer: Syncer, progress: SyncProgress, debounce_ms: u64) -> Result<()> {
    let syncer = syncer.with_observer(Arc::new(progress));
    let root = syncer.settings().media_root.clone();

    // Initial sync
    let report = syncer.run(false).await?;
    progress::close_warning(&report);

    // Setup file watcher
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let mut debouncer = new_debouncer(
        Duration::from_millis(debounce_ms),
        None,
        move |result: DebounceEventResult| match result {
            Ok(events) => {
                let _ = tx.send(events);
            }
            Err(errors) => {
                for e in errors {
                    error!("Watch error: {e}");
                }
            }
        },
    )?;

    debouncer
        .watch(&root, RecursiveMode::Recursive)
        .wrap_err_with(|| format!("failed to watch {}", root.display()))?;

    info!("Watching {} for changes (Ctrl+C to stop)...", root.display());

    // Process file change events
    while let Some(events) = rx.recv().await {
        let paths: Vec<_> = events
            .iter()
            .flat_map(|e| e.paths.iter())
            .filter(|path| is_relevant_change(&root, path))
            .collect();

        if paths.is_empty() {
            continue;
        }

        info!("Detected {} changed paths, syncing...", paths.len());
        for path in &paths {
            debug!("  Changed: {}", path.display());
        }

        // Re-sync
        match syncer.run(false).await {
            Ok(report) => progress::close_warning(&report),
            Err(e) => error!("Sync failed: {e:#}"),
        }
    }

    Ok(())
}

/// Whether a changed path can affect a sync (no hidden or private component)
fn is_relevant_change(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    relative
        .components()
        .all(|c| is_syncable_name(&c.as_os_str().to_string_lossy()))
}

fn list_command(syncer: &Syncer, format: &str) -> Result<()> {
    let plan = syncer.plan();

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&plan)?;
            println!("{json}");
        }
        "text" => {
            for asset in &plan {
                match &asset.source {
                    Source::Bundle { sources, .. } => println!(
                        "{:<28} {} (bundle of {})",
                        asset.content_type,
                        asset.remote_path,
                        sources.len()
                    ),
                    Source::File { local_path } => {
                        let size = std::fs::metadata(local_path).map(|m| m.len()).unwrap_or(0);
                        println!(
                            "{:<28} {} ({})",
                            asset.content_type,
                            asset.remote_path,
                            humansize::format_size(size, humansize::BINARY)
                        );
                    }
                }
            }
            eprintln!("Assets: {}", plan.len());
        }
        other => bail!("unknown format `{other}` (expected text or json)"),
    }

    Ok(())
}

fn bundle_command(syncer: &Syncer, name: &str) -> Result<()> {
    let Some(asset) = syncer.render_bundle(name)? else {
        bail!("bundle `{name}` is neither css nor js");
    };

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&asset.bytes)?;
    stdout.flush()?;
    Ok(())
}
