use crate::{
    containers::{AccessoryStateMap, StateDecl, StateMap, StateReader, StateValue},
    context::Context,
    error::CallError,
    module::Module,
    store::StoreError,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, Write};
use keel_types::{Address, ErrorOutcome, ModuleId};
use serde::{Deserialize, Serialize};

pub const NAME: &str = "bank";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BankConfig {
    pub balances: Vec<(Address, u64)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BankCall {
    Transfer { to: Address, amount: u64 },
    Burn { amount: u64 },
}

impl Write for BankCall {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Transfer { to, amount } => {
                0u8.write(writer);
                to.write(writer);
                amount.write(writer);
            }
            Self::Burn { amount } => {
                1u8.write(writer);
                amount.write(writer);
            }
        }
    }
}

impl Read for BankCall {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Self::Transfer {
                to: Address::read(reader)?,
                amount: u64::read(reader)?,
            }),
            1 => Ok(Self::Burn {
                amount: u64::read(reader)?,
            }),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl EncodeSize for BankCall {
    fn encode_size(&self) -> usize {
        u8::SIZE
            + match self {
                Self::Transfer { .. } => Address::SIZE + u64::SIZE,
                Self::Burn { .. } => u64::SIZE,
            }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BankEvent {
    Transferred {
        from: Address,
        to: Address,
        amount: u64,
    },
    Burned {
        from: Address,
        amount: u64,
    },
}

impl Write for BankEvent {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Transferred { from, to, amount } => {
                0u8.write(writer);
                from.write(writer);
                to.write(writer);
                amount.write(writer);
            }
            Self::Burned { from, amount } => {
                1u8.write(writer);
                from.write(writer);
                amount.write(writer);
            }
        }
    }
}

impl Read for BankEvent {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Self::Transferred {
                from: Address::read(reader)?,
                to: Address::read(reader)?,
                amount: u64::read(reader)?,
            }),
            1 => Ok(Self::Burned {
                from: Address::read(reader)?,
                amount: u64::read(reader)?,
            }),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl EncodeSize for BankEvent {
    fn encode_size(&self) -> usize {
        u8::SIZE
            + match self {
                Self::Transferred { .. } => Address::SIZE * 2 + u64::SIZE,
                Self::Burned { .. } => Address::SIZE + u64::SIZE,
            }
    }
}

/// Fungible balances with a tracked total supply.
pub struct Bank {
    balances: StateMap<Address, u64>,
    supply: StateValue<u64>,
    transfers: AccessoryStateMap<u64, u64>,
}

impl Default for Bank {
    fn default() -> Self {
        Self::new()
    }
}

impl Bank {
    pub fn new() -> Self {
        let id = ModuleId::from_name(NAME);
        Self {
            balances: StateMap::new(id, "balances"),
            supply: StateValue::new(id, "supply"),
            transfers: AccessoryStateMap::new(id, "transfers"),
        }
    }

    pub fn balance(&self, reader: &impl StateReader, account: &Address) -> Result<u64, StoreError> {
        Ok(self.balances.get(reader, account)?.unwrap_or(0))
    }

    pub fn supply(&self, reader: &impl StateReader) -> Result<u64, StoreError> {
        Ok(self.supply.get(reader)?.unwrap_or(0))
    }

    /// Amount moved by each committed transfer, keyed by transaction index.
    pub fn transfers(&self) -> &AccessoryStateMap<u64, u64> {
        &self.transfers
    }

    fn debit(&self, ctx: &mut Context<'_>, amount: u64) -> Result<(), CallError> {
        if amount == 0 {
            return Err(ErrorOutcome::new("zero_amount", "amount must be positive").into());
        }
        let from = *ctx.sender();
        let available = self.balance(ctx, &from)?;
        let Some(remaining) = available.checked_sub(amount) else {
            return Err(ErrorOutcome::new("insufficient_funds", "balance too low")
                .with_field("available", available)
                .with_field("required", amount)
                .into());
        };
        self.balances.set(ctx, &from, &remaining)?;
        Ok(())
    }
}

impl Module for Bank {
    type Config = Option<BankConfig>;
    type Call = BankCall;

    fn name(&self) -> &'static str {
        NAME
    }

    fn state(&self) -> Vec<StateDecl> {
        vec![
            self.balances.decl(),
            self.supply.decl(),
            self.transfers.decl(),
        ]
    }

    fn genesis(&self, config: Self::Config, ctx: &mut Context<'_>) -> Result<(), CallError> {
        let config = config.unwrap_or_default();
        let mut supply = 0u64;
        for (account, amount) in &config.balances {
            let balance = self.balance(ctx, account)?;
            let (Some(balance), Some(total)) =
                (balance.checked_add(*amount), supply.checked_add(*amount))
            else {
                return Err(ErrorOutcome::new("supply_overflow", "genesis supply overflows").into());
            };
            self.balances.set(ctx, account, &balance)?;
            supply = total;
        }
        self.supply.set(ctx, &supply)?;
        Ok(())
    }

    fn call(&self, call: Self::Call, ctx: &mut Context<'_>) -> Result<(), CallError> {
        match call {
            BankCall::Transfer { to, amount } => {
                self.debit(ctx, amount)?;
                let credited = self.balance(ctx, &to)?.checked_add(amount).ok_or_else(|| {
                    ErrorOutcome::new("balance_overflow", "recipient balance overflows")
                        .with_field("to", to)
                })?;
                self.balances.set(ctx, &to, &credited)?;
                if let Some(tx_index) = ctx.tx_index() {
                    self.transfers.set(ctx, &tx_index, &amount)?;
                }
                let from = *ctx.sender();
                ctx.emit(&BankEvent::Transferred { from, to, amount })?;
            }
            BankCall::Burn { amount } => {
                self.debit(ctx, amount)?;
                let supply = self.supply(ctx)?;
                let supply = supply.checked_sub(amount).ok_or_else(|| {
                    CallError::Fatal(anyhow::anyhow!("supply {supply} below burned {amount}"))
                })?;
                self.supply.set(ctx, &supply)?;
                let from = *ctx.sender();
                ctx.emit(&BankEvent::Burned { from, amount })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};

    #[test]
    fn config_accepts_null_and_pairs() {
        let config: Option<BankConfig> =
            serde_json::from_value(serde_json::Value::Null).expect("null config");
        assert!(config.is_none());

        let account = Address::new([3u8; 32]);
        let config: Option<BankConfig> = serde_json::from_value(serde_json::json!({
            "balances": [[account.to_string(), 100]]
        }))
        .expect("config");
        assert_eq!(config.map(|c| c.balances), Some(vec![(account, 100)]));
    }

    #[test]
    fn event_decodes_from_entry_payload() {
        let event = BankEvent::Burned {
            from: Address::new([1u8; 32]),
            amount: 5,
        };
        let bytes = event.encode();
        assert_eq!(bytes.len(), event.encode_size());
        assert_eq!(BankEvent::decode(bytes.as_ref()).unwrap(), event);
        assert!(matches!(
            BankCall::decode([9u8].as_slice()),
            Err(Error::InvalidEnum(9))
        ));
    }
}
