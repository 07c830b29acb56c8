//! CLI command definitions

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for orchestration results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Summary, bundle digest and content
    #[default]
    Full,
    /// Only the produced content
    Content,
    /// The whole output as JSON
    Json,
}

/// Tool Orchestra - run tools with retries, circuit breakers and evidence bundles
#[derive(Parser, Debug)]
#[command(name = "orchestra")]
#[command(author, version, about)]
#[command(long_about = r#"
Tool Orchestra selects a registered tool for a payload, runs it (as a
K-replica evidence bundle when the tool supports it) and returns a
normalized result.

The reliable mode adds classified retries, a circuit breaker per backend
and idempotency keys.

Example:
  orchestra run --payload '{"text": "hello"}'
  orchestra run --tool echo_bundle --k 5 --payload '{"text": "hi"}'
  orchestra tools
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file (overrides default locations)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable loading of configuration files
    #[arg(long, global = true)]
    pub no_config: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one orchestration request
    Run(RunArgs),

    /// List registered tools
    Tools,

    /// Show configuration file locations and the effective configuration
    Config,
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Tool to run (the planner chooses when omitted)
    #[arg(short, long)]
    pub tool: Option<String>,

    /// Request payload as JSON
    #[arg(short, long)]
    pub payload: String,

    /// Tool options as JSON
    #[arg(long)]
    pub options: Option<String>,

    /// Number of bundle replicas
    #[arg(short, long)]
    pub k: Option<usize>,

    /// Early-stop threshold for bundles
    #[arg(long)]
    pub epsilon: Option<f64>,

    /// Disable early stopping for bundles
    #[arg(long, conflicts_with = "epsilon")]
    pub no_early_stop: bool,

    /// Output schema URI every replica is validated against
    #[arg(long)]
    pub schema: Option<String>,

    /// Idempotency key (reliable mode only)
    #[arg(long)]
    pub idempotency_key: Option<String>,

    /// Wall-clock limit for the run, in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Token budget for the run
    #[arg(long)]
    pub budget_tokens: Option<u64>,

    /// Cost budget for the run, in USD
    #[arg(long)]
    pub budget_cost: Option<f64>,

    /// Trace id to correlate events with
    #[arg(long)]
    pub trace_id: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "full")]
    pub output: OutputFormat,
}

impl RunArgs {
    pub fn has_bundle_overrides(&self) -> bool {
        self.k.is_some() || self.epsilon.is_some() || self.no_early_stop || self.schema.is_some()
    }

    pub fn has_budget(&self) -> bool {
        self.budget_tokens.is_some() || self.budget_cost.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "orchestra",
            "-vv",
            "run",
            "--tool",
            "echo_bundle",
            "--payload",
            r#"{"text":"hi"}"#,
            "-k",
            "5",
            "--budget-tokens",
            "100",
            "-o",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.tool.as_deref(), Some("echo_bundle"));
        assert_eq!(args.k, Some(5));
        assert_eq!(args.output, OutputFormat::Json);
        assert!(args.has_bundle_overrides());
        assert!(args.has_budget());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["orchestra", "tools", "--no-config"]).unwrap();
        assert!(cli.no_config);
        assert!(matches!(cli.command, Command::Tools));
    }

    #[test]
    fn test_payload_is_required() {
        assert!(Cli::try_parse_from(["orchestra", "run"]).is_err());
    }

    #[test]
    fn test_no_early_stop_conflicts_with_epsilon() {
        let result = Cli::try_parse_from([
            "orchestra",
            "run",
            "--payload",
            "{}",
            "--epsilon",
            "0.1",
            "--no-early-stop",
        ]);
        assert!(result.is_err());
    }
}
