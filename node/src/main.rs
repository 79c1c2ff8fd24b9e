use anyhow::{Context, Result};
use clap::Parser;
use keel_node::{build_registry, parse_calls, replay, NodeConfig};
use keel_types::GenesisRecord;
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay genesis and ordered calls through keel.", long_about = None)]
struct Args {
    /// YAML node configuration (defaults apply when omitted).
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON genesis record keyed by module name.
    #[arg(long)]
    genesis: PathBuf,

    /// JSON-lines call log.
    #[arg(long)]
    calls: Option<PathBuf>,

    /// Overrides `log_level` from the config file.
    #[arg(long)]
    log_level: Option<String>,

    /// Print the parsed configuration and exit.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn init_tracing(level: Level, json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read(path: &Path, what: &str) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Could not read {what} file {}", path.display()))
}

fn main() {
    if let Err(err) = main_result() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn main_result() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NodeConfig::from_yaml(&read(path, "config")?)?,
        None => NodeConfig::default(),
    };
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if args.dry_run {
        println!("{config:#?}");
        return Ok(());
    }
    let config = config.validate().context("Invalid config")?;
    init_tracing(config.log_level, config.json_logs);

    let genesis = GenesisRecord::from_json(&read(&args.genesis, "genesis")?)
        .context("Could not parse genesis file")?;
    let calls = match &args.calls {
        Some(path) => parse_calls(&read(path, "calls")?)?,
        None => Vec::new(),
    };
    info!(
        modules = genesis.len(),
        calls = calls.len(),
        level = %config.log_level,
        "replaying"
    );

    let registry = build_registry().context("failed to build registry")?;
    let (report, registry) = replay(&config, registry, &genesis, &calls)?;
    for line in report.to_json_lines(&registry) {
        println!("{line}");
    }
    if let Some(reason) = report.halted {
        anyhow::bail!("runtime halted: {reason}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_genesis() {
        let args = Args::try_parse_from(["keel-node", "--genesis", "genesis.json"])
            .expect("args should parse");
        assert_eq!(args.genesis, PathBuf::from("genesis.json"));
        assert!(args.config.is_none());
        assert!(args.calls.is_none());
        assert!(!args.dry_run);
    }

    #[test]
    fn rejects_missing_genesis() {
        assert!(Args::try_parse_from(["keel-node", "--calls", "calls.jsonl"]).is_err());
    }

    #[test]
    fn parses_overrides() {
        let args = Args::try_parse_from([
            "keel-node",
            "--config",
            "node.yaml",
            "--genesis",
            "genesis.json",
            "--calls",
            "calls.jsonl",
            "--log-level",
            "debug",
            "--dry-run",
        ])
        .expect("args should parse");
        assert_eq!(args.config, Some(PathBuf::from("node.yaml")));
        assert_eq!(args.calls, Some(PathBuf::from("calls.jsonl")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.dry_run);
    }
}
