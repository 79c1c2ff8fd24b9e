use crate::execution::NAMESPACE;
use bytes::{Buf, BufMut};
use commonware_codec::{Error, FixedSize, Read, ReadExt, Write};
use commonware_cryptography::{ed25519::PublicKey, sha256::Sha256, Hasher};
use commonware_utils::{from_hex_formatted, hex, union};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error as ThisError;

pub const ADDRESS_LENGTH: usize = 32;
pub const ADDRESS_SUFFIX: &[u8] = b"_ADDRESS";

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must be hex: {0}")]
    InvalidHex(String),
    #[error("address must be {expected} bytes (got {got})")]
    InvalidLength { expected: usize, got: usize },
}

/// Identity of a call sender.
///
/// Addresses are opaque to the runtime. Accounts backed by an ed25519 key use
/// [Address::from_public_key]; the all-zero [Address::ZERO] is the sender seen by genesis
/// handlers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    pub const ZERO: Self = Self([0u8; ADDRESS_LENGTH]);

    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_public_key(public: &PublicKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(&union(NAMESPACE, ADDRESS_SUFFIX));
        hasher.update(public.as_ref());
        let digest = hasher.finalize();
        let digest: &[u8] = digest.as_ref();

        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }
}

impl From<[u8; ADDRESS_LENGTH]> for Address {
    fn from(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex(&self.0))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let bytes =
            from_hex_formatted(value).ok_or_else(|| AddressError::InvalidHex(value.to_string()))?;
        let bytes: [u8; ADDRESS_LENGTH] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| AddressError::InvalidLength {
                    expected: ADDRESS_LENGTH,
                    got: bytes.len(),
                })?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex(&self.0))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

impl Write for Address {
    fn write(&self, writer: &mut impl BufMut) {
        self.0.write(writer);
    }
}

impl Read for Address {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self(<[u8; ADDRESS_LENGTH]>::read(reader)?))
    }
}

impl FixedSize for Address {
    const SIZE: usize = ADDRESS_LENGTH;
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};
    use commonware_cryptography::{ed25519::PrivateKey, Signer};

    #[test]
    fn address_parses_display_output() {
        let address = Address::new([7u8; ADDRESS_LENGTH]);
        let parsed: Address = address.to_string().parse().expect("valid address");
        assert_eq!(parsed, address);
        let prefixed: Address = format!("0x{address}").parse().expect("0x prefix accepted");
        assert_eq!(prefixed, address);
    }

    #[test]
    fn address_rejects_wrong_length() {
        let err = "deadbeef".parse::<Address>().unwrap_err();
        assert_eq!(
            err,
            AddressError::InvalidLength {
                expected: ADDRESS_LENGTH,
                got: 4
            }
        );
        assert!(matches!(
            "not-hex".parse::<Address>(),
            Err(AddressError::InvalidHex(_))
        ));
    }

    #[test]
    fn address_from_public_key_is_stable_and_distinct() {
        let first = PrivateKey::from_seed(1).public_key();
        let second = PrivateKey::from_seed(2).public_key();
        assert_eq!(
            Address::from_public_key(&first),
            Address::from_public_key(&first)
        );
        assert_ne!(
            Address::from_public_key(&first),
            Address::from_public_key(&second)
        );
    }

    #[test]
    fn address_serde_uses_hex() {
        let address = Address::new([0xab; ADDRESS_LENGTH]);
        let json = serde_json::to_string(&address).expect("serialize");
        assert_eq!(json, format!("\"{}\"", "ab".repeat(ADDRESS_LENGTH)));
        let back: Address = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, address);
    }

    #[test]
    fn address_codec_is_fixed_size() {
        let address = Address::new([3u8; ADDRESS_LENGTH]);
        let encoded = address.encode();
        assert_eq!(encoded.len(), Address::SIZE);
        assert_eq!(Address::decode(encoded.as_ref()).expect("decode"), address);
    }
}
