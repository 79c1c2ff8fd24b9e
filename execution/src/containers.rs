//! Typed state containers.
//!
//! Every container is bound to the module that owns it and a field name, and stores its
//! entries under `module id ‖ len(field) ‖ field ‖ suffix`. Values and map keys use the
//! `commonware-codec` encoding, so keys of a map sort the way their encodings sort.
//!
//! Consensus containers are read through any [StateReader] and written through a
//! [Context]. Accessory containers are written the same way but can only be read through
//! an [AccessoryReader], which the execution [Context] does not implement.

use crate::{context::Context, state::Space, store::StoreError};
use anyhow::anyhow;
use commonware_codec::{DecodeExt, Encode, Read};
use keel_types::ModuleId;
use std::marker::PhantomData;

/// Read access to committed (or, during execution, checkpointed) consensus state.
pub trait StateReader {
    fn read_state(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Read access to committed accessory state. Only external queries implement this.
pub trait AccessoryReader {
    fn read_accessory(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Shape of a declared container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Value,
    Map,
    Vec,
}

/// One entry of a module's state declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateDecl {
    pub field: &'static str,
    pub shape: Shape,
    pub accessory: bool,
}

const VEC_LEN: u8 = 0;
const VEC_ITEM: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
struct Prefix {
    module: ModuleId,
    field: &'static str,
    bytes: Vec<u8>,
}

impl Prefix {
    fn new(module: ModuleId, field: &'static str) -> Self {
        let mut bytes = Vec::with_capacity(module.as_ref().len() + 1 + field.len());
        bytes.extend_from_slice(module.as_ref());
        // Registration rejects fields longer than `u8::MAX` bytes.
        bytes.push(field.len() as u8);
        bytes.extend_from_slice(field.as_bytes());
        Self {
            module,
            field,
            bytes,
        }
    }

    fn key(&self, suffix: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.bytes.len() + suffix.len());
        key.extend_from_slice(&self.bytes);
        key.extend_from_slice(suffix);
        key
    }

    fn item(&self, index: u64) -> Vec<u8> {
        let mut suffix = [0u8; 9];
        suffix[0] = VEC_ITEM;
        suffix[1..].copy_from_slice(&index.to_be_bytes());
        self.key(&suffix)
    }

    fn decl(&self, shape: Shape, accessory: bool) -> StateDecl {
        StateDecl {
            field: self.field,
            shape,
            accessory,
        }
    }
}

fn decode<T: Read<Cfg = ()>>(bytes: Vec<u8>) -> Result<T, StoreError> {
    Ok(T::decode(bytes.as_slice())?)
}

fn get<T: Read<Cfg = ()>>(
    read: impl Fn(&[u8]) -> Result<Option<Vec<u8>>, StoreError>,
    key: &[u8],
) -> Result<Option<T>, StoreError> {
    read(key)?.map(decode).transpose()
}

fn vec_len(
    read: impl Fn(&[u8]) -> Result<Option<Vec<u8>>, StoreError>,
    prefix: &Prefix,
) -> Result<u64, StoreError> {
    Ok(get::<u64>(read, &prefix.key(&[VEC_LEN]))?.unwrap_or(0))
}

fn put(
    ctx: &mut Context<'_>,
    space: Space,
    prefix: &Prefix,
    key: Vec<u8>,
    value: &impl Encode,
) -> Result<(), StoreError> {
    ctx.write(space, prefix.module, key, value.encode().to_vec())
}

fn push<T: Encode>(
    ctx: &mut Context<'_>,
    space: Space,
    prefix: &Prefix,
    value: &T,
) -> Result<u64, StoreError> {
    let index = vec_len(|key| ctx.read(space, key), prefix)?;
    put(ctx, space, prefix, prefix.item(index), value)?;
    put(ctx, space, prefix, prefix.key(&[VEC_LEN]), &(index + 1))?;
    Ok(index)
}

fn pop<T: Read<Cfg = ()>>(
    ctx: &mut Context<'_>,
    space: Space,
    prefix: &Prefix,
) -> Result<Option<T>, StoreError> {
    let len = vec_len(|key| ctx.read(space, key), prefix)?;
    let Some(last) = len.checked_sub(1) else {
        return Ok(None);
    };
    let value = get(|key| ctx.read(space, key), &prefix.item(last))?;
    ctx.remove(space, prefix.module, prefix.item(last))?;
    put(ctx, space, prefix, prefix.key(&[VEC_LEN]), &last)?;
    Ok(value)
}

/// A single consensus value.
pub struct StateValue<T> {
    prefix: Prefix,
    _value: PhantomData<fn() -> T>,
}

impl<T: Encode + Read<Cfg = ()>> StateValue<T> {
    pub fn new(module: ModuleId, field: &'static str) -> Self {
        Self {
            prefix: Prefix::new(module, field),
            _value: PhantomData,
        }
    }

    pub fn decl(&self) -> StateDecl {
        self.prefix.decl(Shape::Value, false)
    }

    pub fn get(&self, reader: &impl StateReader) -> Result<Option<T>, StoreError> {
        get(|key| reader.read_state(key), &self.prefix.bytes)
    }

    pub fn set(&self, ctx: &mut Context<'_>, value: &T) -> Result<(), StoreError> {
        put(ctx, Space::State, &self.prefix, self.prefix.bytes.clone(), value)
    }

    pub fn remove(&self, ctx: &mut Context<'_>) -> Result<(), StoreError> {
        ctx.remove(Space::State, self.prefix.module, self.prefix.bytes.clone())
    }
}

/// A consensus key to value mapping.
pub struct StateMap<K, V> {
    prefix: Prefix,
    _entry: PhantomData<fn() -> (K, V)>,
}

impl<K: Encode, V: Encode + Read<Cfg = ()>> StateMap<K, V> {
    pub fn new(module: ModuleId, field: &'static str) -> Self {
        Self {
            prefix: Prefix::new(module, field),
            _entry: PhantomData,
        }
    }

    pub fn decl(&self) -> StateDecl {
        self.prefix.decl(Shape::Map, false)
    }

    pub fn get(&self, reader: &impl StateReader, key: &K) -> Result<Option<V>, StoreError> {
        get(|raw| reader.read_state(raw), &self.prefix.key(&key.encode()))
    }

    pub fn set(&self, ctx: &mut Context<'_>, key: &K, value: &V) -> Result<(), StoreError> {
        put(
            ctx,
            Space::State,
            &self.prefix,
            self.prefix.key(&key.encode()),
            value,
        )
    }

    pub fn remove(&self, ctx: &mut Context<'_>, key: &K) -> Result<(), StoreError> {
        ctx.remove(
            Space::State,
            self.prefix.module,
            self.prefix.key(&key.encode()),
        )
    }
}

/// An ordered, indexed consensus sequence.
pub struct StateVec<T> {
    prefix: Prefix,
    _item: PhantomData<fn() -> T>,
}

impl<T: Encode + Read<Cfg = ()>> StateVec<T> {
    pub fn new(module: ModuleId, field: &'static str) -> Self {
        Self {
            prefix: Prefix::new(module, field),
            _item: PhantomData,
        }
    }

    pub fn decl(&self) -> StateDecl {
        self.prefix.decl(Shape::Vec, false)
    }

    pub fn len(&self, reader: &impl StateReader) -> Result<u64, StoreError> {
        vec_len(|key| reader.read_state(key), &self.prefix)
    }

    pub fn get(&self, reader: &impl StateReader, index: u64) -> Result<Option<T>, StoreError> {
        get(|key| reader.read_state(key), &self.prefix.item(index))
    }

    /// Append `value` and return its index.
    pub fn push(&self, ctx: &mut Context<'_>, value: &T) -> Result<u64, StoreError> {
        push(ctx, Space::State, &self.prefix, value)
    }

    pub fn pop(&self, ctx: &mut Context<'_>) -> Result<Option<T>, StoreError> {
        pop(ctx, Space::State, &self.prefix)
    }

    /// Overwrite an existing item. Returns `false` if `index` is out of bounds.
    pub fn set(&self, ctx: &mut Context<'_>, index: u64, value: &T) -> Result<bool, StoreError> {
        if index >= self.len(&*ctx)? {
            return Ok(false);
        }
        put(ctx, Space::State, &self.prefix, self.prefix.item(index), value)?;
        Ok(true)
    }
}

/// A single value only visible to external queries.
pub struct AccessoryStateValue<T> {
    prefix: Prefix,
    _value: PhantomData<fn() -> T>,
}

impl<T: Encode + Read<Cfg = ()>> AccessoryStateValue<T> {
    pub fn new(module: ModuleId, field: &'static str) -> Self {
        Self {
            prefix: Prefix::new(module, field),
            _value: PhantomData,
        }
    }

    pub fn decl(&self) -> StateDecl {
        self.prefix.decl(Shape::Value, true)
    }

    pub fn get(&self, reader: &impl AccessoryReader) -> Result<Option<T>, StoreError> {
        get(|key| reader.read_accessory(key), &self.prefix.bytes)
    }

    pub fn set(&self, ctx: &mut Context<'_>, value: &T) -> Result<(), StoreError> {
        put(
            ctx,
            Space::Accessory,
            &self.prefix,
            self.prefix.bytes.clone(),
            value,
        )
    }
}

/// A key to value mapping only visible to external queries.
pub struct AccessoryStateMap<K, V> {
    prefix: Prefix,
    _entry: PhantomData<fn() -> (K, V)>,
}

impl<K: Encode, V: Encode + Read<Cfg = ()>> AccessoryStateMap<K, V> {
    pub fn new(module: ModuleId, field: &'static str) -> Self {
        Self {
            prefix: Prefix::new(module, field),
            _entry: PhantomData,
        }
    }

    pub fn decl(&self) -> StateDecl {
        self.prefix.decl(Shape::Map, true)
    }

    pub fn get(&self, reader: &impl AccessoryReader, key: &K) -> Result<Option<V>, StoreError> {
        get(|raw| reader.read_accessory(raw), &self.prefix.key(&key.encode()))
    }

    pub fn set(&self, ctx: &mut Context<'_>, key: &K, value: &V) -> Result<(), StoreError> {
        put(
            ctx,
            Space::Accessory,
            &self.prefix,
            self.prefix.key(&key.encode()),
            value,
        )
    }

    pub fn remove(&self, ctx: &mut Context<'_>, key: &K) -> Result<(), StoreError> {
        ctx.remove(
            Space::Accessory,
            self.prefix.module,
            self.prefix.key(&key.encode()),
        )
    }
}

/// An ordered sequence only visible to external queries.
pub struct AccessoryStateVec<T> {
    prefix: Prefix,
    _item: PhantomData<fn() -> T>,
}

impl<T: Encode + Read<Cfg = ()>> AccessoryStateVec<T> {
    pub fn new(module: ModuleId, field: &'static str) -> Self {
        Self {
            prefix: Prefix::new(module, field),
            _item: PhantomData,
        }
    }

    pub fn decl(&self) -> StateDecl {
        self.prefix.decl(Shape::Vec, true)
    }

    pub fn len(&self, reader: &impl AccessoryReader) -> Result<u64, StoreError> {
        vec_len(|key| reader.read_accessory(key), &self.prefix)
    }

    pub fn get(&self, reader: &impl AccessoryReader, index: u64) -> Result<Option<T>, StoreError> {
        get(|key| reader.read_accessory(key), &self.prefix.item(index))
    }

    /// Every item in index order.
    pub fn items(&self, reader: &impl AccessoryReader) -> Result<Vec<T>, StoreError> {
        let len = self.len(reader)?;
        let mut items = Vec::new();
        for index in 0..len {
            let item = self.get(reader, index)?.ok_or_else(|| {
                StoreError::Backend(anyhow!("missing item {index} of {}", self.prefix.field))
            })?;
            items.push(item);
        }
        Ok(items)
    }

    /// Append `value`. The new index is only observable through an [AccessoryReader].
    pub fn push(&self, ctx: &mut Context<'_>, value: &T) -> Result<(), StoreError> {
        push(ctx, Space::Accessory, &self.prefix, value).map(|_| ())
    }
}
