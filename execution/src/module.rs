use crate::{containers::StateDecl, context::Context, error::CallError};
use anyhow::Context as _;
use commonware_codec::{DecodeExt, Read};
use keel_types::{ErrorOutcome, ModuleId};
use serde::de::DeserializeOwned;

/// A unit of business logic owning a namespaced slice of state.
///
/// Modules are registered once at startup and live as long as the runtime. They must be
/// deterministic: handlers may only depend on their input, the [Context] and their own
/// immutable configuration.
pub trait Module: 'static {
    /// Configuration consumed once at genesis. Deserialized from the module's entry of the
    /// genesis record, or from JSON `null` when the record has no entry for it.
    type Config: DeserializeOwned;

    /// Call message decoded from the payload of a
    /// [RuntimeCall](keel_types::RuntimeCall).
    type Call: Read<Cfg = ()>;

    /// Unique name; the module id is derived from it.
    fn name(&self) -> &'static str;

    /// Containers owned by this module, in declaration order.
    fn state(&self) -> Vec<StateDecl>;

    fn genesis(&self, config: Self::Config, ctx: &mut Context<'_>) -> Result<(), CallError>;

    fn call(&self, call: Self::Call, ctx: &mut Context<'_>) -> Result<(), CallError>;

    fn id(&self) -> ModuleId {
        ModuleId::from_name(self.name())
    }
}

/// Object-safe view of a [Module] used by the registry.
pub(crate) trait DynModule {
    fn name(&self) -> &'static str;

    fn state(&self) -> Vec<StateDecl>;

    fn genesis(&self, config: serde_json::Value, ctx: &mut Context<'_>) -> Result<(), CallError>;

    fn dispatch(&self, payload: &[u8], ctx: &mut Context<'_>) -> Result<(), CallError>;
}

impl<M: Module> DynModule for M {
    fn name(&self) -> &'static str {
        Module::name(self)
    }

    fn state(&self) -> Vec<StateDecl> {
        Module::state(self)
    }

    fn genesis(&self, config: serde_json::Value, ctx: &mut Context<'_>) -> Result<(), CallError> {
        let config = serde_json::from_value(config)
            .with_context(|| format!("invalid genesis config for {}", Module::name(self)))?;
        Module::genesis(self, config, ctx)
    }

    fn dispatch(&self, payload: &[u8], ctx: &mut Context<'_>) -> Result<(), CallError> {
        let call = M::Call::decode(payload).map_err(|err| {
            ErrorOutcome::new("malformed_call", "call payload could not be decoded")
                .with_field("module", Module::name(self))
                .with_field("reason", err)
        })?;
        Module::call(self, call, ctx)
    }
}
