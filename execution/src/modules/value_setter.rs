use crate::{
    containers::{AccessoryStateVec, StateDecl, StateReader, StateValue},
    context::Context,
    error::CallError,
    module::Module,
    store::StoreError,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, Write};
use keel_types::{Address, ErrorOutcome, ModuleId};
use serde::{Deserialize, Serialize};

pub const NAME: &str = "value-setter";

/// Maximum number of values in a single [ValueSetterCall::SetValues].
pub const MAX_VALUES: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueSetterConfig {
    pub admin: Address,
    #[serde(default)]
    pub value: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueSetterCall {
    SetValue(u64),
    /// Set each value in turn, emitting one event per value.
    SetValues(Vec<u64>),
}

impl Write for ValueSetterCall {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::SetValue(value) => {
                0u8.write(writer);
                value.write(writer);
            }
            Self::SetValues(values) => {
                1u8.write(writer);
                (values.len() as u32).write(writer);
                for value in values {
                    value.write(writer);
                }
            }
        }
    }
}

impl Read for ValueSetterCall {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Self::SetValue(u64::read(reader)?)),
            1 => {
                let count = u32::read(reader)? as usize;
                if count > MAX_VALUES {
                    return Err(Error::Invalid("ValueSetterCall", "too many values"));
                }
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(u64::read(reader)?);
                }
                Ok(Self::SetValues(values))
            }
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl EncodeSize for ValueSetterCall {
    fn encode_size(&self) -> usize {
        u8::SIZE
            + match self {
                Self::SetValue(_) => u64::SIZE,
                Self::SetValues(values) => u32::SIZE + values.len() * u64::SIZE,
            }
    }
}

/// Emitted every time the value changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValueUpdated(pub u64);

impl Write for ValueUpdated {
    fn write(&self, writer: &mut impl BufMut) {
        self.0.write(writer);
    }
}

impl Read for ValueUpdated {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self(u64::read(reader)?))
    }
}

impl FixedSize for ValueUpdated {
    const SIZE: usize = u64::SIZE;
}

/// A single admin-controlled value.
pub struct ValueSetter {
    admin: StateValue<Address>,
    value: StateValue<u64>,
    history: AccessoryStateVec<u64>,
}

impl Default for ValueSetter {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueSetter {
    pub fn new() -> Self {
        let id = ModuleId::from_name(NAME);
        Self {
            admin: StateValue::new(id, "admin"),
            value: StateValue::new(id, "value"),
            history: AccessoryStateVec::new(id, "history"),
        }
    }

    pub fn admin(&self, reader: &impl StateReader) -> Result<Option<Address>, StoreError> {
        self.admin.get(reader)
    }

    pub fn value(&self, reader: &impl StateReader) -> Result<Option<u64>, StoreError> {
        self.value.get(reader)
    }

    /// Every value ever set, oldest first.
    pub fn history(&self) -> &AccessoryStateVec<u64> {
        &self.history
    }

    fn set(&self, ctx: &mut Context<'_>, value: u64) -> Result<(), CallError> {
        self.value.set(ctx, &value)?;
        self.history.push(ctx, &value)?;
        ctx.emit(&ValueUpdated(value))?;
        Ok(())
    }
}

impl Module for ValueSetter {
    type Config = ValueSetterConfig;
    type Call = ValueSetterCall;

    fn name(&self) -> &'static str {
        NAME
    }

    fn state(&self) -> Vec<StateDecl> {
        vec![self.admin.decl(), self.value.decl(), self.history.decl()]
    }

    fn genesis(&self, config: Self::Config, ctx: &mut Context<'_>) -> Result<(), CallError> {
        self.admin.set(ctx, &config.admin)?;
        if let Some(value) = config.value {
            self.value.set(ctx, &value)?;
        }
        Ok(())
    }

    fn call(&self, call: Self::Call, ctx: &mut Context<'_>) -> Result<(), CallError> {
        let admin = self.admin.get(ctx)?;
        if admin.as_ref() != Some(ctx.sender()) {
            return Err(
                ErrorOutcome::new("unauthorized", "only the admin can set the value")
                    .with_field("sender", ctx.sender())
                    .into(),
            );
        }
        match call {
            ValueSetterCall::SetValue(value) => self.set(ctx, value),
            ValueSetterCall::SetValues(values) => {
                for value in values {
                    self.set(ctx, value)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};

    #[test]
    fn set_values_rejects_oversized_batches() {
        let mut buf = Vec::new();
        1u8.write(&mut buf);
        ((MAX_VALUES + 1) as u32).write(&mut buf);
        assert!(matches!(
            ValueSetterCall::decode(buf.as_slice()),
            Err(Error::Invalid("ValueSetterCall", "too many values"))
        ));
    }

    #[test]
    fn call_encoding_is_tagged() {
        assert_eq!(
            ValueSetterCall::SetValue(99).encode().as_ref(),
            &[0u8, 0, 0, 0, 0, 0, 0, 0, 99]
        );
        let call = ValueSetterCall::SetValues(vec![1, 2]);
        assert_eq!(call.encode().len(), call.encode_size());
        assert_eq!(ValueSetterCall::decode(call.encode().as_ref()).unwrap(), call);
    }

    #[test]
    fn config_requires_admin() {
        assert!(serde_json::from_value::<ValueSetterConfig>(serde_json::Value::Null).is_err());
        let admin = Address::new([7u8; 32]);
        let config: ValueSetterConfig =
            serde_json::from_value(serde_json::json!({ "admin": admin.to_string() }))
                .expect("config");
        assert_eq!(config.admin, admin);
        assert_eq!(config.value, None);
    }
}
