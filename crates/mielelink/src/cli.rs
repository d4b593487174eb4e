//! Clap derive structures for the `mielelink` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// mielelink -- mirror Miele cloud appliances into a local state tree
#[derive(Debug, Parser)]
#[command(
    name = "mielelink",
    version,
    about = "Mirror Miele cloud appliances into a local state tree",
    long_about = "Logs in to the Miele cloud API, follows device updates through the\n\
        event stream (or by polling), and prints every node change.\n\n\
        Write intents are read from stdin, one `path=value` per line, e.g.\n\
        `000123456789.ACTIONS.Power=true`.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Account profile to use
    #[arg(long, short = 'p', env = "MIELELINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "MIELELINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format for node changes
    #[arg(
        long,
        short = 'o',
        env = "MIELELINK_OUTPUT",
        default_value = "text",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, env = "MIELELINK_LOG_JSON", global = true)]
    pub log_json: bool,

    /// Suppress node change output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// `path = value`, one change per line
    Text,
    /// One JSON object per change
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to the cloud and mirror devices until interrupted
    Run(RunArgs),

    /// Feed recorded device/action events through the reconciler offline
    Replay(ReplayArgs),

    /// Inspect and edit configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// API base URL (overrides profile)
    #[arg(long, env = "MIELELINK_BASE_URL")]
    pub base_url: Option<String>,

    /// Language of localized values (overrides profile)
    #[arg(long, env = "MIELELINK_LOCALE")]
    pub locale: Option<String>,

    /// Poll instead of following the event stream
    #[arg(long)]
    pub poll: bool,

    /// Poll cadence in seconds (implies --poll)
    #[arg(long, value_name = "SECS")]
    pub poll_interval: Option<u64>,

    /// Coalesce bursts of device updates
    #[arg(long)]
    pub debounce: bool,

    /// Ignore stdin instead of reading write intents from it
    #[arg(long)]
    pub no_stdin: bool,
}

// ── Replay ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// JSON files holding `{"event": "devices"|"actions", "data": {...}}`
    /// records, a single record or an array of them
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Language used for node names
    #[arg(long, default_value = "en")]
    pub locale: String,

    /// Coalesce device batches like a live run would
    #[arg(long)]
    pub debounce: bool,

    /// Debounce window in milliseconds
    #[arg(long, default_value = "1000", value_name = "MS")]
    pub debounce_window_ms: u64,

    /// Print the final tree instead of every change
    #[arg(long)]
    pub summary: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Show the loaded configuration with secrets masked
    Show,

    /// List profiles, marking the default
    Profiles,

    /// Check the active profile and resolve its secrets
    Validate,

    /// Store a profile secret in the system keyring
    SetSecret {
        /// Which secret to store
        kind: SecretArg,

        /// Profile to store it for (defaults to the active profile)
        #[arg(long)]
        profile: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SecretArg {
    /// Account password
    Password,
    /// Application client secret
    ClientSecret,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn poll_interval_parses_as_seconds() {
        let cli = Cli::try_parse_from(["mielelink", "run", "--poll-interval", "90"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.poll_interval, Some(90));
        assert!(!args.poll);
    }

    #[test]
    fn replay_requires_files() {
        assert!(Cli::try_parse_from(["mielelink", "replay"]).is_err());
    }
}
