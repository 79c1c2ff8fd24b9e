use crate::{
    containers::StateDecl,
    module::{DynModule, Module},
    runtime::Error,
};
use keel_types::ModuleId;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Prefix of names reserved for the runtime's own namespace.
pub const RESERVED_PREFIX: &str = "__";

/// Description of a registered module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub name: &'static str,
    pub state: Vec<StateDecl>,
}

/// Ordered set of modules known to the runtime.
///
/// Modules are registered at process start. The registry is sealed when a runtime starts
/// with it and accepts no further modules afterwards.
#[derive(Default)]
pub struct Registry {
    modules: Vec<(ModuleId, Box<dyn DynModule>)>,
    index: BTreeMap<ModuleId, usize>,
    sealed: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<M: Module>(&mut self, module: M) -> Result<ModuleId, Error> {
        if self.sealed {
            return Err(Error::RegistrySealed);
        }
        let name = Module::name(&module);
        if name.is_empty() || name.starts_with(RESERVED_PREFIX) {
            return Err(Error::ReservedName(name.to_string()));
        }
        let id = ModuleId::from_name(name);
        if self.index.contains_key(&id) {
            return Err(Error::DuplicateModule(name.to_string()));
        }
        let mut fields = BTreeSet::new();
        for decl in Module::state(&module) {
            if decl.field.is_empty() || decl.field.len() > u8::MAX as usize {
                return Err(Error::InvalidField {
                    module: name.to_string(),
                    field: decl.field.to_string(),
                });
            }
            if !fields.insert(decl.field) {
                return Err(Error::DuplicateField {
                    module: name.to_string(),
                    field: decl.field.to_string(),
                });
            }
        }

        info!(name, %id, fields = fields.len(), "registered module");
        self.index.insert(id, self.modules.len());
        self.modules.push((id, Box::new(module)));
        Ok(id)
    }

    pub(crate) fn resolve(&self, id: &ModuleId) -> Option<&dyn DynModule> {
        let position = *self.index.get(id)?;
        self.modules.get(position).map(|(_, module)| module.as_ref())
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.index.contains_key(id)
    }

    /// Name of a registered module.
    pub fn name(&self, id: &ModuleId) -> Option<&'static str> {
        self.resolve(id).map(|module| module.name())
    }

    /// Module ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.modules.iter().map(|(id, _)| *id)
    }

    pub(crate) fn all(&self) -> impl Iterator<Item = (ModuleId, &dyn DynModule)> {
        self.modules.iter().map(|(id, module)| (*id, module.as_ref()))
    }

    pub fn describe(&self) -> Vec<ModuleInfo> {
        self.all()
            .map(|(id, module)| ModuleInfo {
                id,
                name: module.name(),
                state: module.state(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{Named, TestModule};
    use crate::modules::{Bank, ValueSetter};

    #[test]
    fn resolves_in_registration_order() {
        let mut registry = Registry::new();
        let bank = registry.register(Bank::new()).expect("bank");
        let setter = registry.register(ValueSetter::new()).expect("value-setter");

        assert_eq!(registry.ids().collect::<Vec<_>>(), vec![bank, setter]);
        assert_eq!(registry.name(&setter), Some("value-setter"));
        assert!(registry.contains(&bank));
        assert!(registry.name(&ModuleId::from_name("missing")).is_none());

        let described = registry.describe();
        assert_eq!(described[1].name, "value-setter");
        assert!(described[1]
            .state
            .iter()
            .any(|decl| decl.field == "history" && decl.accessory));
    }

    #[test]
    fn rejects_duplicates_and_reserved_names() {
        let mut registry = Registry::new();
        registry.register(ValueSetter::new()).expect("first");
        assert!(matches!(
            registry.register(ValueSetter::new()),
            Err(Error::DuplicateModule(name)) if name == "value-setter"
        ));
        assert!(matches!(
            registry.register(Named::new("__runtime")),
            Err(Error::ReservedName(_))
        ));
        assert!(matches!(
            registry.register(Named::new("twice").with_fields(&["a", "a"])),
            Err(Error::DuplicateField { field, .. }) if field == "a"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn sealed_registry_rejects_modules() {
        let mut registry = Registry::new();
        registry.seal();
        assert!(matches!(
            registry.register(TestModule::new()),
            Err(Error::RegistrySealed)
        ));
        assert!(registry.is_empty());
    }
}
