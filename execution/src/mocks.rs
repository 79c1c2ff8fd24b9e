//! Helpers and modules for exercising the runtime in tests.

use crate::{
    config::RuntimeConfig,
    containers::{AccessoryStateValue, AccessoryStateVec, StateDecl, StateValue, StateVec},
    context::Context,
    error::CallError,
    module::Module,
    modules::{bank, value_setter, Bank, ValueSetter},
    registry::Registry,
    runtime::Runtime,
    state::Memory,
};
use anyhow::anyhow;
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use commonware_cryptography::{
    ed25519::{PrivateKey, PublicKey},
    Signer,
};
use keel_types::{Address, BlockHeader, ErrorOutcome, GenesisRecord, ModuleId, RuntimeCall};
use serde::Deserialize;
use serde_json::json;

/// Creates an account keypair for Ed25519 signatures used by users
pub fn create_account_keypair(seed: u64) -> (PrivateKey, PublicKey) {
    let private = PrivateKey::from_seed(seed);
    let public = private.public_key();
    (private, public)
}

/// Address of the account derived from `seed`.
pub fn create_account(seed: u64) -> Address {
    let (_, public) = create_account_keypair(seed);
    Address::from_public_key(&public)
}

/// Registry with the reference modules followed by [TestModule].
pub fn create_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(ValueSetter::new())
        .expect("register value-setter");
    registry.register(Bank::new()).expect("register bank");
    registry
        .register(TestModule::new())
        .expect("register test module");
    registry
}

/// Genesis record making account 1 the value-setter admin and funding accounts 1 and 2.
pub fn create_genesis() -> GenesisRecord {
    GenesisRecord::new()
        .with(
            value_setter::NAME,
            json!({ "admin": create_account(1).to_string() }),
        )
        .with(
            bank::NAME,
            json!({ "balances": [
                [create_account(1).to_string(), 1_000],
                [create_account(2).to_string(), 500],
            ] }),
        )
}

/// Runtime over an empty in-memory backend with [create_registry], before genesis.
pub fn create_runtime(config: RuntimeConfig) -> Runtime {
    Runtime::start(config, create_registry(), Box::new(Memory::new())).expect("start runtime")
}

/// Runtime with [create_genesis] applied at [BlockHeader::genesis].
pub fn create_initialized_runtime(config: RuntimeConfig) -> Runtime {
    let mut runtime = create_runtime(config);
    runtime
        .run_genesis(&create_genesis(), BlockHeader::genesis(0))
        .expect("genesis");
    runtime
}

pub fn set_value(value: u64) -> RuntimeCall {
    RuntimeCall::new(
        ModuleId::from_name(value_setter::NAME),
        &value_setter::ValueSetterCall::SetValue(value),
    )
}

pub fn transfer(to: Address, amount: u64) -> RuntimeCall {
    RuntimeCall::new(
        ModuleId::from_name(bank::NAME),
        &bank::BankCall::Transfer { to, amount },
    )
}

pub fn test_call(call: TestCall) -> RuntimeCall {
    RuntimeCall::new(ModuleId::from_name(TEST_NAME), &call)
}

pub const TEST_NAME: &str = "test";

/// Error kind returned by [TestCall::Fail].
pub const TEST_FAILURE: &str = "test_failure";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestConfig {
    pub counter: u64,
    pub fail: bool,
}

/// Calls understood by [TestModule]. Every call that touches state bumps `counter` first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestCall {
    /// Increment and emit `count` events.
    Emit(u8),
    /// Increment, emit `emit` events, then fail with [TEST_FAILURE].
    Fail { emit: u8 },
    /// Increment, then fail fatally.
    Fatal,
    /// Increment, then invoke `call` and propagate its result.
    Forward(Box<RuntimeCall>),
    /// Increment, then invoke `call` and swallow a business error.
    Recover(Box<RuntimeCall>),
    /// Increment, then append `value` to `log` inside an atomic block that fails if `fail`.
    Atomic { value: u64, fail: bool },
    /// Write into another module's namespace.
    Trespass,
    /// Increment, then append `value` to the accessory `notes`.
    Note(u64),
    /// Increment, then fail with a message and field value of `length` characters.
    Explain(u32),
    /// Increment, then invoke `call` and ignore whatever it returns.
    Swallow(Box<RuntimeCall>),
}

impl Write for TestCall {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Emit(count) => {
                0u8.write(writer);
                count.write(writer);
            }
            Self::Fail { emit } => {
                1u8.write(writer);
                emit.write(writer);
            }
            Self::Fatal => 2u8.write(writer),
            Self::Forward(call) => {
                3u8.write(writer);
                call.write(writer);
            }
            Self::Recover(call) => {
                4u8.write(writer);
                call.write(writer);
            }
            Self::Atomic { value, fail } => {
                5u8.write(writer);
                value.write(writer);
                fail.write(writer);
            }
            Self::Trespass => 6u8.write(writer),
            Self::Note(value) => {
                7u8.write(writer);
                value.write(writer);
            }
            Self::Explain(length) => {
                8u8.write(writer);
                length.write(writer);
            }
            Self::Swallow(call) => {
                9u8.write(writer);
                call.write(writer);
            }
        }
    }
}

impl Read for TestCall {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Self::Emit(u8::read(reader)?)),
            1 => Ok(Self::Fail {
                emit: u8::read(reader)?,
            }),
            2 => Ok(Self::Fatal),
            3 => Ok(Self::Forward(Box::new(RuntimeCall::read(reader)?))),
            4 => Ok(Self::Recover(Box::new(RuntimeCall::read(reader)?))),
            5 => Ok(Self::Atomic {
                value: u64::read(reader)?,
                fail: bool::read(reader)?,
            }),
            6 => Ok(Self::Trespass),
            7 => Ok(Self::Note(u64::read(reader)?)),
            8 => Ok(Self::Explain(u32::read(reader)?)),
            9 => Ok(Self::Swallow(Box::new(RuntimeCall::read(reader)?))),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl EncodeSize for TestCall {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Emit(_) | Self::Fail { .. } => 1,
            Self::Fatal | Self::Trespass => 0,
            Self::Forward(call) | Self::Recover(call) | Self::Swallow(call) => call.encode_size(),
            Self::Atomic { .. } => 8 + 1,
            Self::Note(_) => 8,
            Self::Explain(_) => 4,
        }
    }
}

/// Module with configurable failure behaviour.
pub struct TestModule {
    counter: StateValue<u64>,
    log: StateVec<u64>,
    recovered: AccessoryStateValue<u64>,
    notes: AccessoryStateVec<u64>,
    foreign: StateValue<u64>,
}

impl Default for TestModule {
    fn default() -> Self {
        Self::new()
    }
}

impl TestModule {
    pub fn new() -> Self {
        let id = ModuleId::from_name(TEST_NAME);
        Self {
            counter: StateValue::new(id, "counter"),
            log: StateVec::new(id, "log"),
            recovered: AccessoryStateValue::new(id, "recovered"),
            notes: AccessoryStateVec::new(id, "notes"),
            foreign: StateValue::new(ModuleId::from_name(bank::NAME), "supply"),
        }
    }

    pub fn counter(&self) -> &StateValue<u64> {
        &self.counter
    }

    pub fn log(&self) -> &StateVec<u64> {
        &self.log
    }

    pub fn recovered(&self) -> &AccessoryStateValue<u64> {
        &self.recovered
    }

    pub fn notes(&self) -> &AccessoryStateVec<u64> {
        &self.notes
    }

    fn bump(&self, ctx: &mut Context<'_>) -> Result<u64, CallError> {
        let next = self.counter.get(ctx)?.unwrap_or(0) + 1;
        self.counter.set(ctx, &next)?;
        Ok(next)
    }

    fn emit(&self, ctx: &mut Context<'_>, count: u8) -> Result<(), CallError> {
        for i in 0..count {
            ctx.emit(&u64::from(i))?;
        }
        Ok(())
    }
}

impl Module for TestModule {
    type Config = Option<TestConfig>;
    type Call = TestCall;

    fn name(&self) -> &'static str {
        TEST_NAME
    }

    fn state(&self) -> Vec<StateDecl> {
        vec![
            self.counter.decl(),
            self.log.decl(),
            self.recovered.decl(),
            self.notes.decl(),
        ]
    }

    fn genesis(&self, config: Self::Config, ctx: &mut Context<'_>) -> Result<(), CallError> {
        let config = config.unwrap_or_default();
        self.counter.set(ctx, &config.counter)?;
        if config.fail {
            return Err(ErrorOutcome::new(TEST_FAILURE, "configured to fail").into());
        }
        Ok(())
    }

    fn call(&self, call: Self::Call, ctx: &mut Context<'_>) -> Result<(), CallError> {
        match call {
            TestCall::Trespass => {
                self.foreign.set(ctx, &0)?;
                return Ok(());
            }
            TestCall::Emit(count) => {
                self.bump(ctx)?;
                self.emit(ctx, count)?;
            }
            TestCall::Fail { emit } => {
                self.bump(ctx)?;
                self.emit(ctx, emit)?;
                return Err(ErrorOutcome::new(TEST_FAILURE, "configured to fail").into());
            }
            TestCall::Fatal => {
                self.bump(ctx)?;
                return Err(anyhow!("configured to halt").into());
            }
            TestCall::Forward(call) => {
                self.bump(ctx)?;
                ctx.invoke(&call)?;
            }
            TestCall::Recover(call) => {
                let count = self.bump(ctx)?;
                match ctx.invoke(&call) {
                    Ok(()) => {}
                    Err(CallError::Rejected(_)) => self.recovered.set(ctx, &count)?,
                    Err(err) => return Err(err),
                }
            }
            TestCall::Note(value) => {
                self.bump(ctx)?;
                self.notes.push(ctx, &value)?;
            }
            TestCall::Explain(length) => {
                self.bump(ctx)?;
                let text = "é".repeat(length as usize);
                return Err(ErrorOutcome::new(TEST_FAILURE, text.clone())
                    .with_field("detail", text)
                    .into());
            }
            TestCall::Swallow(call) => {
                self.bump(ctx)?;
                let _ = ctx.invoke(&call);
            }
            TestCall::Atomic { value, fail } => {
                self.bump(ctx)?;
                let log = &self.log;
                let result = ctx.atomic(|ctx| {
                    log.push(ctx, &value)?;
                    ctx.emit(&value)?;
                    if fail {
                        return Err(ErrorOutcome::new(TEST_FAILURE, "atomic block failed").into());
                    }
                    Ok(())
                });
                if let Err(CallError::Fatal(err)) = result {
                    return Err(CallError::Fatal(err));
                }
            }
        }
        Ok(())
    }
}

/// Module with a configurable name and declared fields and no behaviour.
pub struct Named {
    name: &'static str,
    fields: Vec<&'static str>,
}

impl Named {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
        }
    }

    pub fn with_fields(mut self, fields: &[&'static str]) -> Self {
        self.fields = fields.to_vec();
        self
    }
}

impl Module for Named {
    type Config = serde_json::Value;
    type Call = u8;

    fn name(&self) -> &'static str {
        self.name
    }

    fn state(&self) -> Vec<StateDecl> {
        let id = ModuleId::from_name(self.name);
        self.fields
            .iter()
            .map(|field| StateValue::<u64>::new(id, *field).decl())
            .collect()
    }

    fn genesis(&self, _: Self::Config, _: &mut Context<'_>) -> Result<(), CallError> {
        Ok(())
    }

    fn call(&self, _: Self::Call, _: &mut Context<'_>) -> Result<(), CallError> {
        Ok(())
    }
}
