use crate::{
    config::RuntimeConfig,
    containers::StateReader,
    error::{CallError, Fault},
    events::EventLog,
    registry::Registry,
    state::Space,
    store::{Checkpoint, StateStore, StoreError},
};
use commonware_codec::Encode;
use keel_types::{
    execution::MAX_EVENT_PAYLOAD_LENGTH, Address, BlockHeader, ErrorOutcome, ModuleId, Origin,
    RuntimeCall,
};
use tracing::debug;

/// Immutable data describing the call being executed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallMetadata {
    pub sender: Address,
    pub origin: Origin,
    pub header: BlockHeader,
}

/// Scoped handle through which a module reads and writes state and emits events.
///
/// A context only exists while a checkpoint is open, so every change made through it is
/// either committed or discarded with the call that produced it. Store failures and fatal
/// errors of nested calls are also latched for the whole call, so a module cannot
/// hide them by ignoring the error it was handed.
pub struct Context<'a> {
    store: &'a mut StateStore,
    events: &'a mut EventLog,
    fault: &'a Fault,
    registry: &'a Registry,
    config: &'a RuntimeConfig,
    meta: &'a CallMetadata,
    module: ModuleId,
    depth: usize,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        store: &'a mut StateStore,
        events: &'a mut EventLog,
        fault: &'a Fault,
        registry: &'a Registry,
        config: &'a RuntimeConfig,
        meta: &'a CallMetadata,
        module: ModuleId,
    ) -> Self {
        Self {
            store,
            events,
            fault,
            registry,
            config,
            meta,
            module,
            depth: 1,
        }
    }

    pub fn sender(&self) -> &Address {
        &self.meta.sender
    }

    pub fn origin(&self) -> Origin {
        self.meta.origin
    }

    /// Index of the enclosing transaction, if not running genesis.
    pub fn tx_index(&self) -> Option<u64> {
        self.meta.origin.tx_index()
    }

    pub fn header(&self) -> &BlockHeader {
        &self.meta.header
    }

    /// The module currently executing.
    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// Nesting level of the current call (1 for the outermost call).
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Record an event for the executing module and return its sequence number.
    pub fn emit<E: Encode>(&mut self, event: &E) -> Result<u64, CallError> {
        let limit = self.config.max_events_per_call;
        if self.events.pending_len() >= limit {
            return Err(ErrorOutcome::new("too_many_events", "event limit reached")
                .with_field("limit", limit)
                .into());
        }
        let payload = event.encode().to_vec();
        if payload.len() > MAX_EVENT_PAYLOAD_LENGTH {
            return Err(ErrorOutcome::new("event_too_large", "event payload too large")
                .with_field("limit", MAX_EVENT_PAYLOAD_LENGTH)
                .with_field("size", payload.len())
                .into());
        }
        Ok(self.events.append(self.meta.origin, self.module, payload))
    }

    /// Run `f` in a nested checkpoint: its changes and events are kept if it returns `Ok`
    /// and dropped if it returns `Err`.
    pub fn atomic<T, F>(&mut self, f: F) -> Result<T, CallError>
    where
        F: FnOnce(&mut Self) -> Result<T, CallError>,
    {
        let checkpoint = self.store.checkpoint();
        let mark = self.events.mark();
        let result = f(self);
        self.settle(checkpoint, mark, result)
    }

    /// Call another module on behalf of the same sender, in a nested checkpoint.
    ///
    /// A failure of the callee is returned to the caller, which may recover from it; the
    /// callee's changes are dropped either way.
    pub fn invoke(&mut self, call: &RuntimeCall) -> Result<(), CallError> {
        let limit = self.config.max_call_depth;
        if self.depth >= limit {
            return Err(
                ErrorOutcome::new("call_depth_exceeded", "nested call limit reached")
                    .with_field("limit", limit)
                    .into(),
            );
        }
        let registry = self.registry;
        let module = registry.resolve(&call.module).ok_or_else(|| {
            ErrorOutcome::new("unknown_module", "no module registered for id")
                .with_field("module", call.module)
        })?;
        debug!(
            caller = %self.module,
            callee = module.name(),
            depth = self.depth + 1,
            "invoking module"
        );

        let checkpoint = self.store.checkpoint();
        let mark = self.events.mark();
        let result = {
            let mut child = Context {
                store: &mut *self.store,
                events: &mut *self.events,
                fault: self.fault,
                registry,
                config: self.config,
                meta: self.meta,
                module: call.module,
                depth: self.depth + 1,
            };
            module.dispatch(&call.payload, &mut child)
        };
        self.settle(checkpoint, mark, result)
    }

    /// Close a nested checkpoint: commit on success, otherwise drop its changes and
    /// events. Fatal errors are latched before they are handed back.
    fn settle<T>(
        &mut self,
        checkpoint: Checkpoint,
        mark: usize,
        result: Result<T, CallError>,
    ) -> Result<T, CallError> {
        match result {
            Ok(value) => {
                self.store
                    .commit(checkpoint)
                    .map_err(|err| self.fault(err))?;
                Ok(value)
            }
            Err(error) => {
                if let CallError::Fatal(fatal) = &error {
                    self.fault.record(fatal);
                }
                self.events.truncate(mark);
                self.store
                    .discard(checkpoint)
                    .map_err(|err| self.fault(err))?;
                Err(error)
            }
        }
    }

    fn fault(&self, error: StoreError) -> StoreError {
        self.fault.record(&error);
        error
    }

    pub(crate) fn read(&self, space: Space, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.store.read(space, key).map_err(|err| self.fault(err))
    }

    pub(crate) fn write(
        &mut self,
        space: Space,
        owner: ModuleId,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.check_owner(owner)?;
        self.store
            .write(space, key, value)
            .map_err(|err| self.fault(err))
    }

    pub(crate) fn remove(
        &mut self,
        space: Space,
        owner: ModuleId,
        key: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.check_owner(owner)?;
        self.store.remove(space, key).map_err(|err| self.fault(err))
    }

    fn check_owner(&self, owner: ModuleId) -> Result<(), StoreError> {
        if owner != self.module {
            return Err(self.fault(StoreError::Namespace {
                owner,
                writer: self.module,
            }));
        }
        Ok(())
    }
}

impl StateReader for Context<'_> {
    fn read_state(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.read(Space::State, key)
    }
}
