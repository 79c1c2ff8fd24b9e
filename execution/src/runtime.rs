use crate::{
    config::{ConfigError, RuntimeConfig},
    containers::{AccessoryReader, AccessoryStateMap, AccessoryStateValue, AccessoryStateVec},
    containers::{StateReader, StateValue},
    context::{CallMetadata, Context},
    error::{CallError, Fault, Severity},
    events::{EventLog, EventReader},
    registry::{ModuleInfo, Registry},
    state::{Space, Storage},
    store::{Checkpoint, StateStore, StoreError},
};
use commonware_cryptography::sha256::Digest;
use keel_types::{
    Address, BlockHeader, ErrorOutcome, EventEntry, GenesisRecord, ModuleId, Origin, Outcome,
    Receipt, RuntimeCall,
};
use std::cmp::Ordering;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Name of the namespace holding the runtime's own bookkeeping.
pub const RUNTIME_NAMESPACE: &str = "__runtime";

#[derive(Debug, Error)]
pub enum Error {
    #[error("registry is sealed")]
    RegistrySealed,
    #[error("module {0} is already registered")]
    DuplicateModule(String),
    #[error("module {module} declares field {field} more than once")]
    DuplicateField { module: String, field: String },
    #[error("module {module} declares invalid field {field:?}")]
    InvalidField { module: String, field: String },
    #[error("module name {0:?} is reserved")]
    ReservedName(String),
    #[error("invalid runtime config: {0}")]
    Config(#[from] ConfigError),
    #[error("genesis has already been applied")]
    AlreadyInitialized,
    #[error("genesis has not been applied")]
    NotInitialized,
    #[error("backend holds an incomplete genesis")]
    IncompleteGenesis,
    #[error("genesis record references unknown module {0}")]
    UnknownGenesisModule(ModuleId),
    #[error("genesis failed in module {module}: {error}")]
    Genesis {
        module: &'static str,
        #[source]
        error: CallError,
    },
    #[error("transaction {tx_index} was already processed (next is {next})")]
    AlreadyProcessed { tx_index: u64, next: u64 },
    #[error("transaction {tx_index} skips ahead of {next}")]
    IndexGap { tx_index: u64, next: u64 },
    #[error("block height {got} does not follow {current}")]
    NonIncreasingHeight { current: u64, got: u64 },
    #[error("runtime is halted")]
    Halted,
    #[error("fatal error during {context}: {error:#}")]
    Fatal {
        context: &'static str,
        #[source]
        error: anyhow::Error,
    },
}

/// Lifecycle phase of a [Runtime].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    AwaitingGenesis,
    Ready,
    Halted,
}

/// Output of a successful genesis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenesisResult {
    /// State root after each module's genesis step, in registry order.
    pub steps: Vec<(ModuleId, Digest)>,
    /// State root after the genesis marker was written.
    pub state_root: Digest,
    pub events_root: Digest,
}

/// Output of a processed transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchResult {
    pub receipt: Receipt,
    pub state_root: Digest,
    pub events_root: Digest,
}

/// Bookkeeping the runtime keeps about itself.
///
/// Only the genesis marker is consensus state. Everything else lives in accessory space so
/// that a reverted transaction leaves the state root untouched.
struct Ledger {
    /// Written before the first genesis step, so a backend left behind by a failed
    /// genesis can be told apart from an empty one.
    started: AccessoryStateValue<BlockHeader>,
    genesis: StateValue<BlockHeader>,
    header: AccessoryStateValue<BlockHeader>,
    next_tx_index: AccessoryStateValue<u64>,
    receipts: AccessoryStateMap<u64, Receipt>,
    events: AccessoryStateVec<EventEntry>,
}

impl Ledger {
    fn new() -> Self {
        let id = ModuleId::from_name(RUNTIME_NAMESPACE);
        Self {
            started: AccessoryStateValue::new(id, "genesis_started"),
            genesis: StateValue::new(id, "genesis"),
            header: AccessoryStateValue::new(id, "header"),
            next_tx_index: AccessoryStateValue::new(id, "next_tx_index"),
            receipts: AccessoryStateMap::new(id, "receipts"),
            events: AccessoryStateVec::new(id, "events"),
        }
    }
}

/// Read-only view over committed state.
pub struct Query<'a> {
    store: &'a StateStore,
    registry: &'a Registry,
    ledger: &'a Ledger,
}

impl Query<'_> {
    pub fn receipt(&self, tx_index: u64) -> Result<Option<Receipt>, StoreError> {
        self.ledger.receipts.get(self, &tx_index)
    }

    /// Header genesis was applied with, if any.
    pub fn genesis_header(&self) -> Result<Option<BlockHeader>, StoreError> {
        self.ledger.genesis.get(self)
    }

    /// Header genesis was started with, set even if it never completed.
    pub fn genesis_started(&self) -> Result<Option<BlockHeader>, StoreError> {
        self.ledger.started.get(self)
    }

    /// Header of the latest block.
    pub fn header(&self) -> Result<Option<BlockHeader>, StoreError> {
        self.ledger.header.get(self)
    }

    pub fn next_tx_index(&self) -> Result<u64, StoreError> {
        Ok(self.ledger.next_tx_index.get(self)?.unwrap_or(0))
    }

    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.registry.describe()
    }

    fn resume(&self) -> Result<Resume, StoreError> {
        Ok(Resume {
            started: self.genesis_started()?,
            genesis: self.genesis_header()?,
            header: self.header()?,
            next_tx_index: self.next_tx_index()?,
            events: self.ledger.events.items(self)?,
        })
    }
}

/// Committed bookkeeping a runtime resumes from.
struct Resume {
    started: Option<BlockHeader>,
    genesis: Option<BlockHeader>,
    header: Option<BlockHeader>,
    next_tx_index: u64,
    events: Vec<EventEntry>,
}

impl StateReader for Query<'_> {
    fn read_state(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.store.read_committed(Space::State, key)
    }
}

impl AccessoryReader for Query<'_> {
    fn read_accessory(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.store.read_committed(Space::Accessory, key)
    }
}

/// Routes calls to modules and commits or reverts their effects.
///
/// Execution is strictly sequential. Every call runs inside a checkpoint: on success its
/// state changes, events, and receipt are committed to the backend as one batch; on a
/// business error the changes are discarded and only the receipt is committed.
pub struct Runtime {
    config: RuntimeConfig,
    registry: Registry,
    store: StateStore,
    events: EventLog,
    ledger: Ledger,
    fault: Fault,
    phase: Phase,
    header: BlockHeader,
    next_tx_index: u64,
}

impl Runtime {
    /// Start a runtime over `storage`, resuming from whatever it already holds.
    ///
    /// A backend on which genesis was started but never completed is refused.
    pub fn start(
        config: RuntimeConfig,
        mut registry: Registry,
        storage: Box<dyn Storage + Send>,
    ) -> Result<Self, Error> {
        config.validate()?;
        registry.seal();

        let store = StateStore::new(storage);
        let ledger = Ledger::new();
        let Resume {
            started,
            genesis,
            header,
            next_tx_index,
            events,
        } = Query {
            store: &store,
            registry: &registry,
            ledger: &ledger,
        }
        .resume()
        .map_err(|err| Error::Fatal {
            context: "start",
            error: err.into(),
        })?;

        if started.is_some() && genesis.is_none() {
            error!("backend holds an incomplete genesis");
            return Err(Error::IncompleteGenesis);
        }
        let phase = match genesis {
            Some(_) => Phase::Ready,
            None => Phase::AwaitingGenesis,
        };
        let header = header
            .or(genesis)
            .unwrap_or_else(|| BlockHeader::genesis(0));
        info!(
            ?phase,
            modules = registry.len(),
            height = header.height,
            next_tx_index,
            events = events.len(),
            "runtime started"
        );
        Ok(Self {
            config,
            registry,
            store,
            events: EventLog::restore(events),
            ledger,
            fault: Fault::default(),
            phase,
            header,
            next_tx_index,
        })
    }

    /// Stop the runtime and release the registry and backend.
    pub fn shutdown(self) -> (Registry, Box<dyn Storage + Send>) {
        info!(next_tx_index = self.next_tx_index, "runtime shut down");
        (self.registry, self.store.into_backend())
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn next_tx_index(&self) -> u64 {
        self.next_tx_index
    }

    pub fn state_root(&self) -> Digest {
        self.store.root()
    }

    pub fn events_root(&self) -> Digest {
        self.events.root()
    }

    pub fn events(&self) -> EventReader {
        self.events.reader()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn query(&self) -> Query<'_> {
        Query {
            store: &self.store,
            registry: &self.registry,
            ledger: &self.ledger,
        }
    }

    /// Apply every module's genesis, in registry order, exactly once.
    pub fn run_genesis(
        &mut self,
        record: &GenesisRecord,
        header: BlockHeader,
    ) -> Result<GenesisResult, Error> {
        match self.phase {
            Phase::Halted => return Err(Error::Halted),
            Phase::Ready => return Err(Error::AlreadyInitialized),
            Phase::AwaitingGenesis => {}
        }
        if let Some(unknown) = record.modules().find(|id| !self.registry.contains(id)) {
            let unknown = *unknown;
            self.phase = Phase::Halted;
            error!(module = %unknown, "genesis record references unknown module");
            return Err(Error::UnknownGenesisModule(unknown));
        }

        let started = self.query().genesis_started().map_err(|err| Error::Fatal {
            context: "genesis",
            error: err.into(),
        })?;
        if started.is_some() {
            self.phase = Phase::Halted;
            return Err(Error::IncompleteGenesis);
        }

        let meta = CallMetadata {
            sender: Address::ZERO,
            origin: Origin::Genesis,
            header: header.clone(),
        };
        let checkpoint = self.store.checkpoint();
        let written = self.with_ledger(&meta, |ledger, ctx| ledger.started.set(ctx, &header));
        if let Err(err) = written {
            self.abandon(checkpoint);
            return Err(self.halt("genesis", err.into()));
        }
        self.store
            .commit(checkpoint)
            .map_err(|err| self.halt("genesis", err.into()))?;

        let mut steps = Vec::with_capacity(self.registry.len());
        let modules: Vec<ModuleId> = self.registry.ids().collect();
        for id in modules {
            let Some(module) = self.registry.resolve(&id) else {
                continue;
            };
            let name = module.name();
            let config = record.get(&id).cloned().unwrap_or(serde_json::Value::Null);
            let checkpoint = self.store.checkpoint();
            self.fault.take();
            let result = {
                let mut ctx = Context::new(
                    &mut self.store,
                    &mut self.events,
                    &self.fault,
                    &self.registry,
                    &self.config,
                    &meta,
                    id,
                );
                module.genesis(config, &mut ctx)
            };
            if let Err(err) = self.fault.settle(result) {
                self.abandon(checkpoint);
                self.phase = Phase::Halted;
                error!(module = name, error = %err, "genesis failed");
                return Err(Error::Genesis {
                    module: name,
                    error: err,
                });
            }
            self.commit(checkpoint, &meta, None, "genesis")?;
            let root = self.store.root();
            debug!(module = name, root = ?root, "genesis step committed");
            steps.push((id, root));
        }

        let checkpoint = self.store.checkpoint();
        let written = self.with_ledger(&meta, |ledger, ctx| {
            ledger.genesis.set(ctx, &header)?;
            ledger.header.set(ctx, &header)
        });
        if let Err(err) = written {
            self.abandon(checkpoint);
            return Err(self.halt("genesis", err.into()));
        }
        self.store
            .commit(checkpoint)
            .map_err(|err| self.halt("genesis", err.into()))?;

        self.phase = Phase::Ready;
        self.header = header;
        let result = GenesisResult {
            steps,
            state_root: self.store.root(),
            events_root: self.events.root(),
        };
        info!(
            modules = result.steps.len(),
            events = self.events.len(),
            root = ?result.state_root,
            "genesis applied"
        );
        Ok(result)
    }

    /// Set the header visible to subsequent calls.
    pub fn begin_block(&mut self, header: BlockHeader) -> Result<(), Error> {
        self.ensure_ready()?;
        if header.height <= self.header.height {
            return Err(Error::NonIncreasingHeight {
                current: self.header.height,
                got: header.height,
            });
        }
        let meta = self.metadata(Address::ZERO, Origin::Block(header.height));
        let checkpoint = self.store.checkpoint();
        if let Err(err) = self.with_ledger(&meta, |ledger, ctx| ledger.header.set(ctx, &header)) {
            self.abandon(checkpoint);
            return Err(self.halt("begin_block", err.into()));
        }
        self.store
            .commit(checkpoint)
            .map_err(|err| self.halt("begin_block", err.into()))?;
        debug!(height = header.height, "began block");
        self.header = header;
        Ok(())
    }

    /// Process the transaction at `tx_index`, which must be the next expected index.
    pub fn dispatch(
        &mut self,
        call: &RuntimeCall,
        sender: Address,
        tx_index: u64,
    ) -> Result<DispatchResult, Error> {
        self.ensure_ready()?;
        let next = self.next_tx_index;
        match tx_index.cmp(&next) {
            Ordering::Less => return Err(Error::AlreadyProcessed { tx_index, next }),
            Ordering::Greater => return Err(Error::IndexGap { tx_index, next }),
            Ordering::Equal => {}
        }

        let meta = self.metadata(sender, Origin::Transaction(tx_index));
        let first_event = self.events.next_sequence();
        let checkpoint = self.store.checkpoint();
        self.fault.take();
        let result = match self.registry.resolve(&call.module) {
            Some(module) => {
                debug!(tx_index, module = module.name(), %sender, "dispatching");
                let mut ctx = Context::new(
                    &mut self.store,
                    &mut self.events,
                    &self.fault,
                    &self.registry,
                    &self.config,
                    &meta,
                    call.module,
                );
                module.dispatch(&call.payload, &mut ctx)
            }
            None => Err(ErrorOutcome::new("unknown_module", "no module registered for id")
                .with_field("module", call.module)
                .into()),
        };
        // A fatal error the module caught and dropped still halts.
        let result = self.fault.settle(result);

        let outcome = match result {
            Ok(()) => Outcome::Committed {
                first_event,
                event_count: self.events.pending_len() as u64,
            },
            Err(err) => {
                self.abandon(checkpoint);
                let outcome = match (self.config.policy.classify(&err), err) {
                    (Severity::Revert, CallError::Rejected(outcome)) => outcome,
                    (_, err) => return Err(self.halt("dispatch", err.into_anyhow())),
                };
                warn!(tx_index, error = %outcome, "transaction reverted");
                let receipt = Receipt {
                    tx_index,
                    sender,
                    module: call.module,
                    outcome: Outcome::Reverted(outcome),
                };
                let checkpoint = self.store.checkpoint();
                self.commit(checkpoint, &meta, Some(&receipt), "dispatch")?;
                return Ok(self.dispatched(receipt));
            }
        };

        let receipt = Receipt {
            tx_index,
            sender,
            module: call.module,
            outcome,
        };
        self.commit(checkpoint, &meta, Some(&receipt), "dispatch")?;
        Ok(self.dispatched(receipt))
    }

    /// Dispatch `calls` in order, starting at the next expected index.
    pub fn execute(
        &mut self,
        calls: impl IntoIterator<Item = (RuntimeCall, Address)>,
    ) -> Result<Vec<DispatchResult>, Error> {
        calls
            .into_iter()
            .map(|(call, sender)| {
                let tx_index = self.next_tx_index;
                self.dispatch(&call, sender, tx_index)
            })
            .collect()
    }

    fn ensure_ready(&self) -> Result<(), Error> {
        match self.phase {
            Phase::Ready => Ok(()),
            Phase::Halted => Err(Error::Halted),
            Phase::AwaitingGenesis => Err(Error::NotInitialized),
        }
    }

    fn metadata(&self, sender: Address, origin: Origin) -> CallMetadata {
        CallMetadata {
            sender,
            origin,
            header: self.header.clone(),
        }
    }

    fn dispatched(&mut self, receipt: Receipt) -> DispatchResult {
        self.next_tx_index = receipt.tx_index + 1;
        DispatchResult {
            receipt,
            state_root: self.store.root(),
            events_root: self.events.root(),
        }
    }

    /// Run `f` against the runtime's own namespace inside the innermost open checkpoint.
    fn with_ledger<T>(
        &mut self,
        meta: &CallMetadata,
        f: impl FnOnce(&Ledger, &mut Context<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let result = {
            let mut ctx = Context::new(
                &mut self.store,
                &mut self.events,
                &self.fault,
                &self.registry,
                &self.config,
                meta,
                ModuleId::from_name(RUNTIME_NAMESPACE),
            );
            f(&self.ledger, &mut ctx)
        };
        // Failures are already in `result`.
        self.fault.take();
        result
    }

    /// Persist staged events and the receipt alongside the checkpoint's changes, commit
    /// everything to the backend, then publish the events.
    fn commit(
        &mut self,
        checkpoint: Checkpoint,
        meta: &CallMetadata,
        receipt: Option<&Receipt>,
        context: &'static str,
    ) -> Result<(), Error> {
        let pending = self.events.pending().to_vec();
        let written = self.with_ledger(meta, |ledger, ctx| {
            for entry in &pending {
                ledger.events.push(ctx, entry)?;
            }
            if let Some(receipt) = receipt {
                ledger.receipts.set(ctx, &receipt.tx_index, receipt)?;
                ledger.next_tx_index.set(ctx, &(receipt.tx_index + 1))?;
            }
            Ok(())
        });
        if let Err(err) = written {
            self.abandon(checkpoint);
            return Err(self.halt(context, err.into()));
        }
        if let Err(err) = self.store.commit(checkpoint) {
            self.events.truncate(0);
            return Err(self.halt(context, err.into()));
        }
        self.events.publish();
        Ok(())
    }

    /// Drop a checkpoint along with every event staged since the last commit.
    fn abandon(&mut self, checkpoint: Checkpoint) {
        self.events.truncate(0);
        if let Err(err) = self.store.discard(checkpoint) {
            error!(error = %err, "failed to discard checkpoint");
            self.phase = Phase::Halted;
        }
    }

    fn halt(&mut self, context: &'static str, error: anyhow::Error) -> Error {
        self.phase = Phase::Halted;
        error!(context, error = %format!("{error:#}"), "runtime halted");
        Error::Fatal { context, error }
    }
}
