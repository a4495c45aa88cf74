use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;
mod prompts;

use output::{OutputFormat, print_error};

/// cairn - Declarative infrastructure orchestrator
#[derive(Parser)]
#[command(name = "cairn")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Directory holding persisted state (default: .cairn/state next to the project)
  #[arg(long, global = true, value_name = "DIR")]
  state_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Show what `up` would change
  Plan {
    /// Path to the project tree (default: cairn.json)
    #[arg(default_value = "cairn.json")]
    project: PathBuf,
  },

  /// Apply the project
  Up {
    /// Path to the project tree (default: cairn.json)
    #[arg(default_value = "cairn.json")]
    project: PathBuf,

    /// Apply without asking for confirmation
    #[arg(short, long)]
    yes: bool,
  },

  /// List persisted resources
  State {
    /// Path to the project tree (default: cairn.json)
    #[arg(default_value = "cairn.json")]
    project: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
  },

  /// Release a stale state lock
  Unlock {
    /// Lock id, as named by the contention error
    id: String,

    /// Project whose state is locked (default: cairn.json)
    #[arg(long, default_value = "cairn.json")]
    project: PathBuf,

    /// Remove the lock whoever holds it
    #[arg(short, long)]
    force: bool,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let state_dir = cli.state_dir.as_deref();
  let result = match cli.command {
    Commands::Plan { project } => cmd::cmd_plan(&project, state_dir, cli.verbose),
    Commands::Up { project, yes } => cmd::cmd_up(&project, state_dir, yes, cli.verbose),
    Commands::State { project, format } => cmd::cmd_state(&project, state_dir, format),
    Commands::Unlock { id, project, force } => cmd::cmd_unlock(&id, &project, state_dir, force),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}

/// Logs go to stderr so stdout stays reserved for plans and listings.
fn init_tracing(verbose: bool) {
  let filter = if verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}
