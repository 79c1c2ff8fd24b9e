use crate::codec::{read_string, string_encode_size, write_string};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, Write};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

pub const MAX_KIND_LENGTH: usize = 64;
pub const MAX_MESSAGE_LENGTH: usize = 1024;
pub const MAX_FIELDS: usize = 32;
pub const MAX_FIELD_NAME_LENGTH: usize = 64;
pub const MAX_FIELD_VALUE_LENGTH: usize = 1024;

/// Structured, module-defined reason a call did not succeed.
///
/// `kind` is a short machine-readable tag (`unauthorized`, `insufficient_funds`, ...),
/// `fields` carries named context, and `message` is meant for humans. Fields are kept in
/// a sorted map so the encoding of a given outcome is unique.
///
/// Constructors clamp every part to the limits [Read] enforces: strings are cut at the
/// last character boundary within their limit and fields past [MAX_FIELDS] are dropped.
/// A stored outcome therefore always decodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorOutcome {
    kind: String,
    message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    fields: BTreeMap<String, String>,
}

impl ErrorOutcome {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: truncate(kind.into(), MAX_KIND_LENGTH),
            message: truncate(message.into(), MAX_MESSAGE_LENGTH),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        let name = truncate(name.into(), MAX_FIELD_NAME_LENGTH);
        if self.fields.len() >= MAX_FIELDS && !self.fields.contains_key(&name) {
            return self;
        }
        let value = truncate(value.to_string(), MAX_FIELD_VALUE_LENGTH);
        self.fields.insert(name, value);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Structured object for API consumers.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind,
            "message": self.message,
            "fields": self.fields,
        })
    }
}

fn truncate(mut value: String, max: usize) -> String {
    if value.len() > max {
        let mut end = max;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value.truncate(end);
    }
    value
}

impl fmt::Display for ErrorOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        for (name, value) in &self.fields {
            write!(f, " {name}={value}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorOutcome {}

impl Write for ErrorOutcome {
    fn write(&self, writer: &mut impl BufMut) {
        write_string(&self.kind, writer);
        write_string(&self.message, writer);
        (self.fields.len() as u32).write(writer);
        for (name, value) in &self.fields {
            write_string(name, writer);
            write_string(value, writer);
        }
    }
}

impl Read for ErrorOutcome {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = read_string(reader, MAX_KIND_LENGTH)?;
        let message = read_string(reader, MAX_MESSAGE_LENGTH)?;
        let count = u32::read(reader)? as usize;
        if count > MAX_FIELDS {
            return Err(Error::Invalid("ErrorOutcome", "too many fields"));
        }
        let mut fields = BTreeMap::new();
        let mut last: Option<String> = None;
        for _ in 0..count {
            let name = read_string(reader, MAX_FIELD_NAME_LENGTH)?;
            let value = read_string(reader, MAX_FIELD_VALUE_LENGTH)?;
            // Names must be strictly increasing so every outcome has one encoding.
            if last.as_ref().is_some_and(|last| *last >= name) {
                return Err(Error::Invalid("ErrorOutcome", "fields not sorted"));
            }
            last = Some(name.clone());
            fields.insert(name, value);
        }
        Ok(Self {
            kind,
            message,
            fields,
        })
    }
}

impl EncodeSize for ErrorOutcome {
    fn encode_size(&self) -> usize {
        string_encode_size(&self.kind)
            + string_encode_size(&self.message)
            + u32::SIZE
            + self
                .fields
                .iter()
                .map(|(name, value)| string_encode_size(name) + string_encode_size(value))
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};
    use proptest::prelude::*;

    fn outcome() -> ErrorOutcome {
        ErrorOutcome::new("insufficient_funds", "balance too low")
            .with_field("required", 10u64)
            .with_field("available", 3u64)
    }

    #[test]
    fn json_object_exposes_kind_and_fields() {
        let json = outcome().to_json();
        assert_eq!(json["kind"], "insufficient_funds");
        assert_eq!(json["message"], "balance too low");
        assert_eq!(json["fields"]["available"], "3");
        assert_eq!(json["fields"]["required"], "10");
    }

    #[test]
    fn display_includes_fields() {
        assert_eq!(
            outcome().to_string(),
            "insufficient_funds: balance too low available=3 required=10"
        );
    }

    #[test]
    fn decode_rejects_unsorted_fields() {
        let mut buf = Vec::new();
        write_string("kind", &mut buf);
        write_string("message", &mut buf);
        2u32.write(&mut buf);
        write_string("b", &mut buf);
        write_string("1", &mut buf);
        write_string("a", &mut buf);
        write_string("2", &mut buf);

        assert!(matches!(
            ErrorOutcome::decode(buf.as_slice()),
            Err(Error::Invalid("ErrorOutcome", "fields not sorted"))
        ));
    }

    #[test]
    fn decode_rejects_too_many_fields() {
        let mut buf = Vec::new();
        write_string("kind", &mut buf);
        write_string("message", &mut buf);
        ((MAX_FIELDS + 1) as u32).write(&mut buf);

        assert!(matches!(
            ErrorOutcome::decode(buf.as_slice()),
            Err(Error::Invalid("ErrorOutcome", "too many fields"))
        ));
    }

    #[test]
    fn encoding_is_independent_of_insertion_order() {
        let reversed = ErrorOutcome::new("insufficient_funds", "balance too low")
            .with_field("available", 3u64)
            .with_field("required", 10u64);
        assert_eq!(outcome().encode(), reversed.encode());
        let decoded = ErrorOutcome::decode(outcome().encode().as_ref()).expect("decode");
        assert_eq!(decoded, reversed);
    }

    #[test]
    fn oversized_parts_are_clamped() {
        let mut outcome = ErrorOutcome::new("k".repeat(100), "x".repeat(2_000));
        for i in 0..40 {
            outcome = outcome.with_field(format!("field{i:02}"), "v".repeat(2_000));
        }
        assert_eq!(outcome.kind().len(), MAX_KIND_LENGTH);
        assert_eq!(outcome.message().len(), MAX_MESSAGE_LENGTH);
        assert_eq!(outcome.fields().len(), MAX_FIELDS);
        assert!(outcome
            .fields()
            .values()
            .all(|value| value.len() == MAX_FIELD_VALUE_LENGTH));

        // An existing field can still be overwritten once the map is full.
        let outcome = outcome.with_field("field00", "short");
        assert_eq!(outcome.field("field00"), Some("short"));

        let decoded = ErrorOutcome::decode(outcome.encode().as_ref()).expect("decode");
        assert_eq!(decoded, outcome);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // Each 'é' is two bytes, so the limit falls inside a character.
        let outcome = ErrorOutcome::new("é".repeat(40), "ok");
        assert_eq!(outcome.kind().len(), MAX_KIND_LENGTH);
        assert!(outcome.kind().chars().all(|c| c == 'é'));

        let outcome = ErrorOutcome::new(format!("a{}", "é".repeat(40)), "ok");
        assert_eq!(outcome.kind().len(), MAX_KIND_LENGTH - 1);
    }

    proptest! {
        #[test]
        fn constructed_outcomes_always_decode(
            kind in ".{0,80}",
            message in ".{0,1200}",
            fields in prop::collection::vec((".{0,80}", ".{0,1100}"), 0..40),
        ) {
            let outcome = fields
                .into_iter()
                .fold(ErrorOutcome::new(kind, message), |outcome, (name, value)| {
                    outcome.with_field(name, value)
                });
            let decoded = ErrorOutcome::decode(outcome.encode().as_ref());
            prop_assert_eq!(decoded.ok(), Some(outcome));
        }
    }
}
