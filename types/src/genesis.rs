use crate::execution::ModuleId;
use serde_json::Value;
use std::collections::BTreeMap;

/// Per-module configuration consumed once by genesis.
///
/// Configs are canonical JSON values: `serde_json` keeps object keys sorted, so a given
/// record always serializes to the same bytes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenesisRecord {
    configs: BTreeMap<ModuleId, Value>,
}

impl GenesisRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `{ "<module name>": <config>, ... }`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let named: BTreeMap<String, Value> = serde_json::from_str(json)?;
        Ok(named
            .into_iter()
            .fold(Self::new(), |record, (name, config)| record.with(&name, config)))
    }

    pub fn with(mut self, name: &str, config: Value) -> Self {
        self.insert(ModuleId::from_name(name), config);
        self
    }

    pub fn insert(&mut self, module: ModuleId, config: Value) -> Option<Value> {
        self.configs.insert(module, config)
    }

    pub fn get(&self, module: &ModuleId) -> Option<&Value> {
        self.configs.get(module)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleId> {
        self.configs.keys()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_keys_configs_by_module_id() {
        let record = GenesisRecord::from_json(r#"{"bank": {"balances": []}, "value-setter": null}"#)
            .expect("valid record");
        assert_eq!(record.len(), 2);
        assert_eq!(
            record.get(&ModuleId::from_name("bank")),
            Some(&json!({"balances": []}))
        );
        assert_eq!(
            record.get(&ModuleId::from_name("value-setter")),
            Some(&Value::Null)
        );
        assert!(record.get(&ModuleId::from_name("missing")).is_none());
    }

    #[test]
    fn from_json_rejects_non_objects() {
        assert!(GenesisRecord::from_json("[1, 2]").is_err());
    }
}
