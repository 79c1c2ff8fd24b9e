//! Reference modules.

pub mod bank;
pub mod value_setter;

pub use bank::{Bank, BankCall, BankConfig, BankEvent};
pub use value_setter::{ValueSetter, ValueSetterCall, ValueSetterConfig, ValueUpdated};
