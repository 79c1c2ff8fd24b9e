use crate::{
    address::Address,
    codec::{bytes_encode_size, read_bytes, write_bytes},
    error::ErrorOutcome,
};
use bytes::{Buf, BufMut};
use commonware_codec::{DecodeExt, Encode, EncodeSize, Error, FixedSize, Read, ReadExt, Write};
use commonware_cryptography::{
    sha256::{Digest, Sha256},
    Digestible, Hasher,
};
use commonware_utils::{hex, union};
use std::fmt;

pub const NAMESPACE: &[u8] = b"_KEEL";
pub const MODULE_SUFFIX: &[u8] = b"_MODULE";

/// Message hashed to produce the parent of the genesis header.
const GENESIS: &[u8] = b"keel genesis";

/// Maximum encoded size of a call payload.
pub const MAX_CALL_PAYLOAD_LENGTH: usize = 64 * 1024;

/// Maximum encoded size of a single event payload.
pub const MAX_EVENT_PAYLOAD_LENGTH: usize = 64 * 1024;

pub const MODULE_ID_LENGTH: usize = 32;

/// Stable identifier of a module, derived from its name.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId([u8; MODULE_ID_LENGTH]);

impl ModuleId {
    pub fn from_name(name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(&union(NAMESPACE, MODULE_SUFFIX));
        hasher.update(name.as_bytes());
        let digest = hasher.finalize();
        let digest: &[u8] = digest.as_ref();

        let mut bytes = [0u8; MODULE_ID_LENGTH];
        bytes.copy_from_slice(digest);
        Self(bytes)
    }

    pub const fn new(bytes: [u8; MODULE_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; MODULE_ID_LENGTH] {
        &self.0
    }
}

impl AsRef<[u8]> for ModuleId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.0))
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({})", hex(&self.0[..8]))
    }
}

impl Write for ModuleId {
    fn write(&self, writer: &mut impl BufMut) {
        self.0.write(writer);
    }
}

impl Read for ModuleId {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self(<[u8; MODULE_ID_LENGTH]>::read(reader)?))
    }
}

impl FixedSize for ModuleId {
    const SIZE: usize = MODULE_ID_LENGTH;
}

/// Ambient block data visible to every call executed in that block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: u64,
    pub timestamp_ms: u64,
    pub parent: Digest,
}

impl BlockHeader {
    pub fn new(height: u64, timestamp_ms: u64, parent: Digest) -> Self {
        Self {
            height,
            timestamp_ms,
            parent,
        }
    }

    /// The canonical header handed to genesis handlers.
    pub fn genesis(timestamp_ms: u64) -> Self {
        Self::new(0, timestamp_ms, Sha256::hash(GENESIS))
    }

    /// Header of the block following `self`.
    pub fn child(&self, timestamp_ms: u64) -> Self {
        Self::new(self.height + 1, timestamp_ms, self.digest())
    }
}

impl Write for BlockHeader {
    fn write(&self, writer: &mut impl BufMut) {
        self.height.write(writer);
        self.timestamp_ms.write(writer);
        self.parent.write(writer);
    }
}

impl Read for BlockHeader {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            height: u64::read(reader)?,
            timestamp_ms: u64::read(reader)?,
            parent: Digest::read(reader)?,
        })
    }
}

impl FixedSize for BlockHeader {
    const SIZE: usize = u64::SIZE + u64::SIZE + Digest::SIZE;
}

impl Digestible for BlockHeader {
    type Digest = Digest;

    fn digest(&self) -> Digest {
        Sha256::hash(&self.encode())
    }
}

/// A decoded routing envelope: the target module plus its module-defined call bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeCall {
    pub module: ModuleId,
    pub payload: Vec<u8>,
}

impl RuntimeCall {
    pub fn new(module: ModuleId, call: &impl Encode) -> Self {
        Self {
            module,
            payload: call.encode().to_vec(),
        }
    }

    pub fn raw(module: ModuleId, payload: Vec<u8>) -> Self {
        Self { module, payload }
    }
}

impl Write for RuntimeCall {
    fn write(&self, writer: &mut impl BufMut) {
        self.module.write(writer);
        write_bytes(&self.payload, writer);
    }
}

impl Read for RuntimeCall {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            module: ModuleId::read(reader)?,
            payload: read_bytes(reader, MAX_CALL_PAYLOAD_LENGTH)?,
        })
    }
}

impl EncodeSize for RuntimeCall {
    fn encode_size(&self) -> usize {
        ModuleId::SIZE + bytes_encode_size(&self.payload)
    }
}

/// What produced an event or a state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Origin {
    Genesis,
    Transaction(u64),
    /// Runtime bookkeeping when the block at this height begins.
    Block(u64),
}

impl Origin {
    pub fn tx_index(&self) -> Option<u64> {
        match self {
            Self::Transaction(index) => Some(*index),
            Self::Genesis | Self::Block(_) => None,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Genesis => f.write_str("genesis"),
            Self::Transaction(index) => write!(f, "tx {index}"),
            Self::Block(height) => write!(f, "block {height}"),
        }
    }
}

impl Write for Origin {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Genesis => 0u8.write(writer),
            Self::Transaction(index) => {
                1u8.write(writer);
                index.write(writer);
            }
            Self::Block(height) => {
                2u8.write(writer);
                height.write(writer);
            }
        }
    }
}

impl Read for Origin {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Self::Genesis),
            1 => Ok(Self::Transaction(u64::read(reader)?)),
            2 => Ok(Self::Block(u64::read(reader)?)),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl EncodeSize for Origin {
    fn encode_size(&self) -> usize {
        u8::SIZE
            + match self {
                Self::Genesis => 0,
                Self::Transaction(_) | Self::Block(_) => u64::SIZE,
            }
    }
}

/// A committed event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventEntry {
    pub sequence: u64,
    pub origin: Origin,
    pub module: ModuleId,
    pub payload: Vec<u8>,
}

impl EventEntry {
    /// Decode the payload as the emitting module's event type.
    pub fn decode<E: Read<Cfg = ()>>(&self) -> Result<E, Error> {
        E::decode(self.payload.as_slice())
    }
}

impl Write for EventEntry {
    fn write(&self, writer: &mut impl BufMut) {
        self.sequence.write(writer);
        self.origin.write(writer);
        self.module.write(writer);
        write_bytes(&self.payload, writer);
    }
}

impl Read for EventEntry {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            sequence: u64::read(reader)?,
            origin: Origin::read(reader)?,
            module: ModuleId::read(reader)?,
            payload: read_bytes(reader, MAX_EVENT_PAYLOAD_LENGTH)?,
        })
    }
}

impl EncodeSize for EventEntry {
    fn encode_size(&self) -> usize {
        u64::SIZE
            + self.origin.encode_size()
            + ModuleId::SIZE
            + bytes_encode_size(&self.payload)
    }
}

/// Result of a processed transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The call committed and emitted events `first_event..first_event + event_count`.
    Committed { first_event: u64, event_count: u64 },
    /// The call was reverted; no state or events survived.
    Reverted(ErrorOutcome),
}

impl Write for Outcome {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Committed {
                first_event,
                event_count,
            } => {
                0u8.write(writer);
                first_event.write(writer);
                event_count.write(writer);
            }
            Self::Reverted(outcome) => {
                1u8.write(writer);
                outcome.write(writer);
            }
        }
    }
}

impl Read for Outcome {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Self::Committed {
                first_event: u64::read(reader)?,
                event_count: u64::read(reader)?,
            }),
            1 => Ok(Self::Reverted(ErrorOutcome::read(reader)?)),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl EncodeSize for Outcome {
    fn encode_size(&self) -> usize {
        u8::SIZE
            + match self {
                Self::Committed { .. } => u64::SIZE + u64::SIZE,
                Self::Reverted(outcome) => outcome.encode_size(),
            }
    }
}

/// Record kept for every processed transaction, committed or reverted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub tx_index: u64,
    pub sender: Address,
    pub module: ModuleId,
    pub outcome: Outcome,
}

impl Receipt {
    pub fn is_committed(&self) -> bool {
        matches!(self.outcome, Outcome::Committed { .. })
    }

    pub fn error(&self) -> Option<&ErrorOutcome> {
        match &self.outcome {
            Outcome::Reverted(outcome) => Some(outcome),
            Outcome::Committed { .. } => None,
        }
    }
}

impl Write for Receipt {
    fn write(&self, writer: &mut impl BufMut) {
        self.tx_index.write(writer);
        self.sender.write(writer);
        self.module.write(writer);
        self.outcome.write(writer);
    }
}

impl Read for Receipt {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            tx_index: u64::read(reader)?,
            sender: Address::read(reader)?,
            module: ModuleId::read(reader)?,
            outcome: Outcome::read(reader)?,
        })
    }
}

impl EncodeSize for Receipt {
    fn encode_size(&self) -> usize {
        u64::SIZE + Address::SIZE + ModuleId::SIZE + self.outcome.encode_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_ids_are_derived_from_names() {
        assert_eq!(ModuleId::from_name("bank"), ModuleId::from_name("bank"));
        assert_ne!(ModuleId::from_name("bank"), ModuleId::from_name("Bank"));
    }

    #[test]
    fn header_child_links_to_parent() {
        let genesis = BlockHeader::genesis(0);
        let child = genesis.child(1_000);
        assert_eq!(child.height, 1);
        assert_eq!(child.parent, genesis.digest());
        assert_eq!(child.encode().len(), BlockHeader::SIZE);
    }

    #[test]
    fn runtime_call_rejects_oversized_payload() {
        let mut buf = Vec::new();
        ModuleId::from_name("bank").write(&mut buf);
        ((MAX_CALL_PAYLOAD_LENGTH + 1) as u32).write(&mut buf);
        assert!(matches!(
            RuntimeCall::decode(buf.as_slice()),
            Err(Error::Invalid("Bytes", "too long"))
        ));
    }

    #[test]
    fn origin_rejects_unknown_tag() {
        assert!(matches!(
            Origin::decode([7u8].as_slice()),
            Err(Error::InvalidEnum(7))
        ));
    }

    #[test]
    fn block_origin_is_distinct_from_genesis() {
        let origin = Origin::Block(4);
        assert_ne!(origin, Origin::Genesis);
        assert_eq!(origin.tx_index(), None);
        assert_eq!(origin.to_string(), "block 4");
        assert_eq!(Origin::decode(origin.encode().as_ref()).unwrap(), origin);
    }

    #[test]
    fn receipt_round_trips_reverted_outcome() {
        let receipt = Receipt {
            tx_index: 3,
            sender: Address::new([1u8; 32]),
            module: ModuleId::from_name("value-setter"),
            outcome: Outcome::Reverted(
                ErrorOutcome::new("unauthorized", "sender is not the admin")
                    .with_field("sender", "01"),
            ),
        };
        let decoded = Receipt::decode(receipt.encode().as_ref()).expect("decode receipt");
        assert_eq!(decoded, receipt);
        assert_eq!(decoded.error().map(|e| e.kind()), Some("unauthorized"));
    }

    #[test]
    fn event_entry_decodes_typed_payload() {
        let entry = EventEntry {
            sequence: 0,
            origin: Origin::Transaction(9),
            module: ModuleId::from_name("value-setter"),
            payload: 99u64.encode().to_vec(),
        };
        assert_eq!(entry.decode::<u64>().expect("u64 payload"), 99);
        assert!(entry.decode::<u32>().is_err());
    }
}
