use crate::state::{Batch, Space, Status, Storage};
use commonware_cryptography::sha256::Digest;
use keel_types::ModuleId;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("checkpoint at depth {got} is not the innermost (depth {expected})")]
    Layering { expected: usize, got: usize },
    #[error("write outside of an open checkpoint")]
    NoCheckpoint,
    #[error("module {writer} cannot write state owned by {owner}")]
    Namespace { owner: ModuleId, writer: ModuleId },
    #[error("failed to decode stored value: {0}")]
    Decode(#[from] commonware_codec::Error),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Handle to an open checkpoint.
///
/// Must be passed back to exactly one of [StateStore::commit] or [StateStore::discard], and
/// only while it is the innermost open checkpoint.
#[must_use = "a checkpoint must be committed or discarded"]
#[derive(Debug, PartialEq, Eq)]
pub struct Checkpoint {
    depth: usize,
}

impl Checkpoint {
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Versioned view over a [Storage] backend.
///
/// Every open checkpoint owns a layer of pending changes. Reads resolve from the innermost
/// layer outwards and fall through to the backend. Committing a nested checkpoint folds its
/// layer into the parent; committing the outermost one hands a single [Batch] to the backend.
pub struct StateStore {
    backend: Box<dyn Storage + Send>,
    layers: Vec<Batch>,
}

impl StateStore {
    pub fn new(backend: Box<dyn Storage + Send>) -> Self {
        Self {
            backend,
            layers: Vec::new(),
        }
    }

    /// Number of open checkpoints.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn checkpoint(&mut self) -> Checkpoint {
        self.layers.push(Batch::default());
        Checkpoint {
            depth: self.layers.len(),
        }
    }

    pub fn commit(&mut self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        let layer = self.pop(checkpoint)?;
        match self.layers.last_mut() {
            Some(parent) => {
                parent.state.extend(layer.state);
                parent.accessory.extend(layer.accessory);
            }
            None => {
                trace!(changes = layer.len(), "applying batch");
                if !layer.is_empty() {
                    self.backend.apply(layer)?;
                }
            }
        }
        Ok(())
    }

    pub fn discard(&mut self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        let layer = self.pop(checkpoint)?;
        trace!(changes = layer.len(), "discarded checkpoint");
        Ok(())
    }

    fn pop(&mut self, checkpoint: Checkpoint) -> Result<Batch, StoreError> {
        let expected = self.layers.len();
        if checkpoint.depth != expected {
            return Err(StoreError::Layering {
                expected,
                got: checkpoint.depth,
            });
        }
        self.layers.pop().ok_or(StoreError::NoCheckpoint)
    }

    /// Read through every open checkpoint.
    pub fn read(&self, space: Space, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        for layer in self.layers.iter().rev() {
            if let Some(status) = layer.space(space).get(key) {
                return Ok(status.value().map(<[u8]>::to_vec));
            }
        }
        self.read_committed(space, key)
    }

    /// Read committed data only, ignoring open checkpoints.
    pub fn read_committed(
        &self,
        space: Space,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.backend.get(space, key)?)
    }

    pub fn write(&mut self, space: Space, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        self.stage(space, key, Status::Update(value))
    }

    pub fn remove(&mut self, space: Space, key: Vec<u8>) -> Result<(), StoreError> {
        self.stage(space, key, Status::Delete)
    }

    fn stage(&mut self, space: Space, key: Vec<u8>, status: Status) -> Result<(), StoreError> {
        let layer = self.layers.last_mut().ok_or(StoreError::NoCheckpoint)?;
        layer.space_mut(space).insert(key, status);
        Ok(())
    }

    /// Root of committed state.
    pub fn root(&self) -> Digest {
        self.backend.root()
    }

    /// Release the backend. Open checkpoints are dropped.
    pub fn into_backend(self) -> Box<dyn Storage + Send> {
        self.backend
    }
}
