//! Keel execution layer.
//!
//! This crate contains the module execution and state-commit engine: the [Runtime]
//! dispatcher, the checkpointed [StateStore], typed state containers, the [EventLog], and
//! the error taxonomy shared by modules and the dispatcher.
//!
//! ## Determinism requirements
//! - Do not use wall-clock time inside execution; use [Context::header].
//! - Do not use randomness inside execution.
//! - Avoid iteration order of hash-based collections influencing outputs.
//!
//! ## Atomicity invariants
//! Every call runs inside a checkpoint. State changes, events, and the transaction receipt
//! of a committed call reach the backend as a single batch; events only become visible to
//! readers after that batch was applied. A reverted call leaves the state root and the
//! event log untouched and only records its receipt in accessory space.
//!
//! The primary entrypoint is [`Runtime`].
//!
//! ## Minimal execution pipeline (example)
//! ```rust
//! use keel_execution::{modules::ValueSetter, Memory, Registry, Runtime, RuntimeConfig};
//! use keel_types::{Address, BlockHeader, GenesisRecord, ModuleId, RuntimeCall};
//! use keel_execution::modules::value_setter::{ValueSetterCall, NAME};
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let admin = Address::new([1u8; 32]);
//! let mut registry = Registry::new();
//! registry.register(ValueSetter::new())?;
//!
//! let mut runtime = Runtime::start(RuntimeConfig::default(), registry, Box::new(Memory::new()))?;
//! let genesis = GenesisRecord::new().with(NAME, json!({ "admin": admin.to_string() }));
//! runtime.run_genesis(&genesis, BlockHeader::genesis(0))?;
//!
//! let call = RuntimeCall::new(ModuleId::from_name(NAME), &ValueSetterCall::SetValue(99));
//! let result = runtime.dispatch(&call, admin, 0)?;
//! assert!(result.receipt.is_committed());
//! assert_eq!(ValueSetter::new().value(&runtime.query())?, Some(99));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod containers;
pub mod context;
pub mod error;
pub mod events;
pub mod module;
pub mod modules;
pub mod registry;
pub mod runtime;
pub mod state;
pub mod store;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

#[cfg(test)]
mod atomicity_tests;
#[cfg(test)]
mod replay_tests;

pub use config::{ConfigError, RuntimeConfig};
pub use containers::{
    AccessoryReader, AccessoryStateMap, AccessoryStateValue, AccessoryStateVec, Shape,
    StateDecl, StateMap, StateReader, StateValue, StateVec,
};
pub use context::{CallMetadata, Context};
pub use error::{CallError, ErrorPolicy, Severity};
pub use events::{EventLog, EventReader};
pub use module::Module;
pub use registry::{ModuleInfo, Registry};
pub use runtime::{DispatchResult, Error, GenesisResult, Phase, Query, Runtime};
pub use state::{Batch, Memory, Space, Status, Storage};
pub use store::{Checkpoint, StateStore, StoreError};
