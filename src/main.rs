mod app;
mod clipboard;
mod config;
mod event;
mod floats;
mod input;
mod ipc;
mod keys;
mod layout;
mod mux;
mod names;
mod pane;
mod pop;
mod render;
mod select;
mod ses;
mod session;
mod status;
mod tab;
mod tui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mux", about = "A terminal multiplexer with a detachable session daemon")]
struct Cli {
    /// Send one notification to the mux owning this shell and exit.
    #[arg(short = 'n', long)]
    notify: Option<String>,
    /// List detached sessions and orphaned panes.
    #[arg(short = 'l', long)]
    list: bool,
    /// Reattach a detached session by name or UUID prefix (>= 3 chars).
    #[arg(short = 'a', long)]
    attach: Option<String>,
    /// Session name for a fresh mux.
    #[arg(short = 'N', long)]
    name: Option<String>,
    #[arg(short = 'd', long)]
    debug: bool,
    #[arg(short = 'L', long)]
    logfile: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Session daemon control (autostarted; rarely run by hand).
    #[command(hide = true)]
    Ses {
        #[command(subcommand)]
        command: SesCommands,
    },
}

#[derive(Subcommand)]
enum SesCommands {
    /// Run the session daemon in the foreground.
    Daemon {
        #[arg(short = 'd', long)]
        debug: bool,
        #[arg(short = 'L', long)]
        logfile: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (debug, logfile) = match &cli.command {
        Some(Commands::Ses {
            command: SesCommands::Daemon { debug, logfile },
        }) => (*debug, logfile.clone()),
        _ => (cli.debug, cli.logfile.clone()),
    };
    init_tracing(debug, logfile.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Some(Commands::Ses {
            command: SesCommands::Daemon { .. },
        }) => rt.block_on(ses::daemon::run()),
        None if cli.notify.is_some() => {
            rt.block_on(ipc::send_notify(cli.notify.as_deref().unwrap_or_default()))
        }
        None if cli.list => rt.block_on(list_sessions()),
        None => {
            tui::install_panic_hook();
            rt.block_on(mux::run(mux::MuxOptions {
                attach: cli.attach,
                name: cli.name,
                debug: cli.debug,
                logfile: cli.logfile,
            }))
        }
    }
}

async fn list_sessions() -> Result<()> {
    let path = ses::spawn::socket_path();
    let mut client = ses::client::SesClient::connect(&path)
        .await
        .context("no session daemon running")?;

    let sessions = client.list_sessions().await?;
    if sessions.is_empty() {
        println!("no detached sessions");
    } else {
        println!("detached sessions:");
        for s in sessions {
            println!(
                "  {}  {}  ({} panes)",
                &s.uuid.simple().to_string()[..8],
                s.name,
                s.pane_count
            );
        }
    }

    let orphans = client.list_orphaned().await?;
    if !orphans.is_empty() {
        println!("orphaned panes:");
        for o in orphans {
            let sticky = if o.sticky { " sticky" } else { "" };
            println!(
                "  {}  {}{}",
                &o.uuid.simple().to_string()[..8],
                o.cwd,
                sticky
            );
        }
    }
    Ok(())
}

fn init_tracing(debug: bool, logfile: Option<&str>) -> Result<()> {
    use tracing_subscriber::filter::LevelFilter;

    let level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    match logfile {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open logfile {}", path))?;
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None if debug => {
            // Without a logfile the terminal belongs to the renderer, so
            // debug output only goes to stderr before raw mode.
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .init();
        }
        None => {}
    }
    Ok(())
}
