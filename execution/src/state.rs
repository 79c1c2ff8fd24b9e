use anyhow::Result;
use commonware_cryptography::{
    sha256::{Digest, Sha256},
    Hasher,
};
use std::collections::BTreeMap;

/// Keyspace of a stored entry.
///
/// `State` entries are consensus-critical and covered by [Storage::root]. `Accessory`
/// entries are written by calls but only ever read by external queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Space {
    State,
    Accessory,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Update(Vec<u8>),
    Delete,
}

impl Status {
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Status::Update(value) => Some(value),
            Status::Delete => None,
        }
    }
}

/// Changes folded out of a committed checkpoint, applied to a backend in one step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    pub state: BTreeMap<Vec<u8>, Status>,
    pub accessory: BTreeMap<Vec<u8>, Status>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.state.is_empty() && self.accessory.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.len() + self.accessory.len()
    }

    pub(crate) fn space_mut(&mut self, space: Space) -> &mut BTreeMap<Vec<u8>, Status> {
        match space {
            Space::State => &mut self.state,
            Space::Accessory => &mut self.accessory,
        }
    }

    pub(crate) fn space(&self, space: Space) -> &BTreeMap<Vec<u8>, Status> {
        match space {
            Space::State => &self.state,
            Space::Accessory => &self.accessory,
        }
    }
}

/// Logical contract required from a persistence engine.
pub trait Storage {
    fn get(&self, space: Space, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Apply every change in `batch`, or none of them.
    fn apply(&mut self, batch: Batch) -> Result<()>;

    /// Deterministic digest over committed [Space::State] entries.
    fn root(&self) -> Digest;
}

/// In-memory backend.
#[derive(Clone, Debug)]
pub struct Memory {
    state: BTreeMap<Vec<u8>, Vec<u8>>,
    accessory: BTreeMap<Vec<u8>, Vec<u8>>,
    root: Digest,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        let state = BTreeMap::new();
        let root = Self::compute_root(&state);
        Self {
            state,
            accessory: BTreeMap::new(),
            root,
        }
    }

    /// Committed state entries in key order.
    pub fn entries(&self, space: Space) -> impl Iterator<Item = (&Vec<u8>, &Vec<u8>)> {
        match space {
            Space::State => self.state.iter(),
            Space::Accessory => self.accessory.iter(),
        }
    }

    fn compute_root(state: &BTreeMap<Vec<u8>, Vec<u8>>) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(&(state.len() as u64).to_be_bytes());
        for (key, value) in state {
            hasher.update(&(key.len() as u32).to_be_bytes());
            hasher.update(key);
            hasher.update(&(value.len() as u32).to_be_bytes());
            hasher.update(value);
        }
        hasher.finalize()
    }

    fn fold(target: &mut BTreeMap<Vec<u8>, Vec<u8>>, changes: BTreeMap<Vec<u8>, Status>) {
        for (key, status) in changes {
            match status {
                Status::Update(value) => {
                    target.insert(key, value);
                }
                Status::Delete => {
                    target.remove(&key);
                }
            }
        }
    }
}

impl Storage for Memory {
    fn get(&self, space: Space, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(match space {
            Space::State => self.state.get(key).cloned(),
            Space::Accessory => self.accessory.get(key).cloned(),
        })
    }

    fn apply(&mut self, batch: Batch) -> Result<()> {
        let Batch { state, accessory } = batch;
        let state_changed = !state.is_empty();
        Self::fold(&mut self.state, state);
        Self::fold(&mut self.accessory, accessory);
        if state_changed {
            self.root = Self::compute_root(&self.state);
        }
        Ok(())
    }

    fn root(&self) -> Digest {
        self.root
    }
}
