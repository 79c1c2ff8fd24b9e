//! Common types used throughout keel.
//!
//! Everything that reaches consensus-relevant bytes (calls, events, receipts, headers)
//! is encoded with `commonware-codec`; identical values always produce identical bytes.

pub mod address;
pub mod codec;
pub mod error;
pub mod execution;
pub mod genesis;

mod compat;

pub use address::{Address, AddressError, ADDRESS_LENGTH};
pub use error::ErrorOutcome;
pub use execution::{
    BlockHeader, EventEntry, ModuleId, Origin, Outcome, Receipt, RuntimeCall, NAMESPACE,
};
pub use genesis::GenesisRecord;
