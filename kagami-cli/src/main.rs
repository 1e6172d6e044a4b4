//! Kagami CLI - コマンドラインインターフェース
//!
//! 調査対象プロセスにGDBをアタッチし、フロントエンドからのリクエスト行を1行ずつ処理します。

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kagami_core::{Dispatcher, Session, SessionConfig};
use kagami_target::Process;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use tracing::info;

/// Kagami - process inspection and instruction tracing
#[derive(Parser)]
#[command(name = "kagami")]
#[command(version = "0.1.0")]
#[command(about = "Inspection and instruction tracing back end driven through GDB", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: InspectCommand,
}

#[derive(Subcommand)]
enum InspectCommand {
    /// Attach to an existing process
    Attach {
        /// Process ID to attach to
        #[arg(short, long)]
        pid: i32,

        /// Path to the GDB executable
        #[arg(long, env = "KAGAMI_GDB")]
        gdb: Option<PathBuf>,

        /// Directory for the mailbox files and artifacts
        #[arg(long, env = "KAGAMI_IPC_DIR")]
        ipc_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = session_config(cli.command)?;

    println!("Kagami - process inspection back end");
    println!("Attaching to process: {}", config.pid);

    let session = Session::attach(&config)
        .with_context(|| format!("Failed to attach to process {}", config.pid))?;
    println!("IPC directory: {}", session.paths().dir().display());
    println!();

    let mut dispatcher = Dispatcher::new(session);
    run_repl(&mut dispatcher, Process::new(config.pid))?;

    Ok(())
}

/// コマンドライン引数からセッション設定を作る
fn session_config(command: InspectCommand) -> Result<SessionConfig> {
    match command {
        InspectCommand::Attach { pid, gdb, ipc_dir } => {
            let gdb = match gdb {
                Some(gdb) => gdb,
                None => which::which("gdb").context("gdb was not found in PATH; use --gdb")?,
            };
            Ok(SessionConfig { pid, gdb, ipc_dir })
        }
    }
}

/// REPLループを実行する
fn run_repl<H, M>(dispatcher: &mut Dispatcher<H, M>, process: Process) -> Result<()>
where
    H: kagami_core::HostDebugger,
    M: kagami_core::MemoryAccess,
{
    println!("Type 'help' for available requests, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline("(kagami) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                if !process.is_alive() {
                    println!("Process {} has exited", process.pid());
                    break;
                }

                let outcome = dispatcher.handle_line(line);
                for message in &outcome.console {
                    println!("{}", message);
                }
                if outcome.quit {
                    break;
                }
                if outcome.exited {
                    info!("inferior exited, closing the session");
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}
