pub mod config;
pub mod run;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use tl_domain::config::Config;

/// Threadline: a conversational turn engine with rolling summaries.
#[derive(Debug, Parser)]
#[command(name = "threadline", version, about)]
pub struct Cli {
    /// Path to the config file (overrides THREADLINE_CONFIG).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP server (default when no subcommand is given).
    Serve,
    /// Send a single message and print the reply.
    Run {
        /// The message to send.
        #[arg(long, short)]
        message: String,
        /// Continue an existing session instead of starting a new chat.
        #[arg(long)]
        session: Option<String>,
        /// Client id the session belongs to.
        #[arg(long, default_value = "cli")]
        user: String,
        /// Print the full result as JSON instead of streaming text.
        #[arg(long)]
        json: bool,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration. Lookup order: `--config`, `THREADLINE_CONFIG`,
/// `./config.toml`, then built-in defaults. Returns the config and a label
/// for where it came from.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<(Config, String)> {
    let candidate = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("THREADLINE_CONFIG").map(PathBuf::from));

    let path = match candidate {
        // An explicitly named file must exist.
        Some(path) => path,
        None => {
            let default = PathBuf::from("config.toml");
            if !default.exists() {
                return Ok((Config::default(), "<defaults>".into()));
            }
            default
        }
    };

    let label = path.display().to_string();
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {label}"))?;
    let config = Config::from_toml(&raw).with_context(|| format!("parsing {label}"))?;
    Ok((config, label))
}
