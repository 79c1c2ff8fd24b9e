//! Replays a genesis record and an ordered call log through the keel runtime.
//!
//! The node stands in for the sequencer: it loads a YAML [NodeConfig], a JSON
//! [GenesisRecord] and a JSON-lines file of [CallRecord]s, then feeds them to a
//! [Runtime] over an in-memory backend and reports every receipt with the digests that
//! followed it.

use anyhow::Context as _;
use commonware_cryptography::Digestible;
use commonware_utils::{from_hex_formatted, hex};
use keel_execution::{
    modules::{Bank, ValueSetter},
    DispatchResult, GenesisResult, Memory, Registry, Runtime, RuntimeConfig,
};
use keel_types::{Address, BlockHeader, GenesisRecord, ModuleId, Outcome, RuntimeCall};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{fmt, str::FromStr};
use thiserror::Error;
use tracing::{debug, error, info, Level};


/// Arbitrary bytes carried as a hex string in configuration and call files.
#[derive(Clone, PartialEq, Eq)]
pub struct HexBytes(Vec<u8>);

impl From<Vec<u8>> for HexBytes {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for HexBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HexBytes({})", hex(&self.0))
    }
}

impl Serialize for HexBytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&hex(self.as_ref()))
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        // An empty payload is a valid call body.
        if value.is_empty() {
            return Ok(Self(Vec::new()));
        }
        let bytes = from_hex_formatted(&value)
            .ok_or_else(|| serde::de::Error::custom("expected a hex string"))?;
        Ok(Self(bytes))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("log_level is invalid: {value}")]
    InvalidLogLevel { value: String },
    #[error(transparent)]
    Runtime(#[from] keel_execution::ConfigError),
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration for a replay, read from YAML.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub genesis_timestamp_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            runtime: RuntimeConfig::default(),
            genesis_timestamp_ms: 0,
        }
    }
}

/// A [NodeConfig] whose fields have been checked.
#[derive(Clone, Debug)]
pub struct ValidatedNodeConfig {
    pub log_level: Level,
    pub json_logs: bool,
    pub runtime: RuntimeConfig,
    pub genesis_timestamp_ms: u64,
}

impl NodeConfig {
    pub fn from_yaml(contents: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(contents).context("Could not parse config file")
    }

    pub fn validate(self) -> Result<ValidatedNodeConfig, ConfigError> {
        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;
        self.runtime.validate()?;
        Ok(ValidatedNodeConfig {
            log_level,
            json_logs: self.json_logs,
            runtime: self.runtime,
            genesis_timestamp_ms: self.genesis_timestamp_ms,
        })
    }
}

/// One line of the call log.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CallRecord {
    /// Block the call was sequenced in. Calls must be ordered by height.
    pub height: u64,
    /// Block timestamp; defaults to the previous block's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    /// Target module name.
    pub module: String,
    pub sender: Address,
    /// Encoded call body.
    pub payload: HexBytes,
}

impl CallRecord {
    pub fn call(&self) -> RuntimeCall {
        RuntimeCall::raw(ModuleId::from_name(&self.module), self.payload.as_ref().to_vec())
    }
}

/// Parse a JSON-lines call log. Blank lines are skipped.
pub fn parse_calls(contents: &str) -> anyhow::Result<Vec<CallRecord>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Could not parse call on line {}", i + 1))
        })
        .collect()
}

/// Registry with the modules a replay node knows about.
pub fn build_registry() -> Result<Registry, keel_execution::Error> {
    let mut registry = Registry::new();
    registry.register(ValueSetter::new())?;
    registry.register(Bank::new())?;
    Ok(registry)
}

/// Everything a replay produced.
#[derive(Debug)]
pub struct Report {
    pub genesis: GenesisResult,
    pub results: Vec<DispatchResult>,
    /// Set when the runtime halted before the call log was exhausted.
    pub halted: Option<String>,
    pub state_root: String,
    pub events_root: String,
    pub events: u64,
}

impl Report {
    /// One JSON object per line: genesis, each receipt, then a summary.
    pub fn to_json_lines(&self, registry: &Registry) -> Vec<Value> {
        let mut lines = Vec::with_capacity(self.results.len() + 2);
        lines.push(json!({
            "genesis": {
                "steps": self
                    .genesis
                    .steps
                    .iter()
                    .map(|(id, root)| json!({
                        "module": registry.name(id).map(str::to_string).unwrap_or_else(|| id.to_string()),
                        "state_root": hex(root.as_ref()),
                    }))
                    .collect::<Vec<_>>(),
                "state_root": hex(self.genesis.state_root.as_ref()),
                "events_root": hex(self.genesis.events_root.as_ref()),
            }
        }));
        for result in &self.results {
            let receipt = &result.receipt;
            let outcome = match &receipt.outcome {
                Outcome::Committed {
                    first_event,
                    event_count,
                } => json!({ "committed": { "first_event": first_event, "event_count": event_count } }),
                Outcome::Reverted(err) => json!({ "reverted": err.to_json() }),
            };
            lines.push(json!({
                "tx_index": receipt.tx_index,
                "module": registry.name(&receipt.module).map(str::to_string).unwrap_or_else(|| receipt.module.to_string()),
                "sender": receipt.sender.to_string(),
                "outcome": outcome,
                "state_root": hex(result.state_root.as_ref()),
                "events_root": hex(result.events_root.as_ref()),
            }));
        }
        lines.push(json!({
            "summary": {
                "transactions": self.results.len(),
                "events": self.events,
                "state_root": self.state_root,
                "events_root": self.events_root,
                "halted": self.halted,
            }
        }));
        lines
    }
}

/// Run genesis and every call in `calls` against a fresh in-memory backend.
///
/// A halt stops the replay and is reported rather than returned as an error, since the
/// receipts before it are still meaningful.
pub fn replay(
    config: &ValidatedNodeConfig,
    registry: Registry,
    genesis: &GenesisRecord,
    calls: &[CallRecord],
) -> anyhow::Result<(Report, Registry)> {
    let mut runtime = Runtime::start(config.runtime.clone(), registry, Box::new(Memory::new()))
        .context("failed to start runtime")?;
    let genesis = runtime
        .run_genesis(genesis, BlockHeader::genesis(config.genesis_timestamp_ms))
        .context("genesis failed")?;
    info!(
        modules = genesis.steps.len(),
        state_root = %hex(genesis.state_root.as_ref()),
        "genesis applied"
    );

    let mut results = Vec::with_capacity(calls.len());
    let mut halted = None;
    for record in calls {
        let header = runtime.header();
        if record.height > header.height {
            let timestamp_ms = record.timestamp_ms.unwrap_or(header.timestamp_ms);
            let next = BlockHeader::new(record.height, timestamp_ms, header.digest());
            debug!(height = next.height, timestamp_ms, "beginning block");
            runtime.begin_block(next).context("failed to begin block")?;
        } else if record.height < header.height {
            anyhow::bail!(
                "call at height {} follows block {}",
                record.height,
                header.height
            );
        }

        let tx_index = runtime.next_tx_index();
        match runtime.dispatch(&record.call(), record.sender, tx_index) {
            Ok(result) => results.push(result),
            Err(err) => {
                error!(tx_index, ?err, "replay halted");
                halted = Some(format!("{:#}", anyhow::Error::new(err)));
                break;
            }
        }
    }

    let report = Report {
        genesis,
        results,
        halted,
        state_root: hex(runtime.state_root().as_ref()),
        events_root: hex(runtime.events_root().as_ref()),
        events: runtime.events().len(),
    };
    let (registry, _) = runtime.shutdown();
    Ok((report, registry))
}
