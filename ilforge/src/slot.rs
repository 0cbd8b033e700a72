//! Write-once cells holding the native handle produced for each key.

use std::cell::OnceCell;
use std::collections::BTreeMap;

use crate::backend::Backend;
use crate::error::{BuildError, BuildResult};
use crate::key::{
    CompletedTypeKey, ConstructorKey, FieldKey, ItemKey, MethodKey, PropertyKey, TypeKey,
};

pub struct Slot<T> {
    key: ItemKey,
    cell: OnceCell<T>,
}

impl<T: Clone> Slot<T> {
    pub fn new(key: ItemKey) -> Self {
        Self {
            key,
            cell: OnceCell::new(),
        }
    }

    pub fn key(&self) -> &ItemKey {
        &self.key
    }

    pub fn is_written(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn write(&self, value: T) -> BuildResult<()> {
        self.cell.set(value).map_err(|_| BuildError::SingleAssignment {
            key: self.key.clone(),
        })
    }

    pub fn read(&self) -> BuildResult<T> {
        self.cell.get().cloned().ok_or_else(|| BuildError::Uninitialized {
            key: self.key.clone(),
        })
    }
}

/// One slot per key some compile step produces.
///
/// Slots are created up front by the scheduler; steps write through a shared
/// reference.
pub struct SlotTable<B: Backend> {
    types: BTreeMap<TypeKey, Slot<B::Type>>,
    completed: BTreeMap<CompletedTypeKey, Slot<B::CompletedType>>,
    methods: BTreeMap<MethodKey, Slot<B::Method>>,
    constructors: BTreeMap<ConstructorKey, Slot<B::Constructor>>,
    fields: BTreeMap<FieldKey, Slot<B::Field>>,
    properties: BTreeMap<PropertyKey, Slot<B::Property>>,
}

impl<B: Backend> Default for SlotTable<B> {
    fn default() -> Self {
        Self {
            types: BTreeMap::new(),
            completed: BTreeMap::new(),
            methods: BTreeMap::new(),
            constructors: BTreeMap::new(),
            fields: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }
}

fn lookup<'a, K: Ord, T>(
    map: &'a BTreeMap<K, Slot<T>>,
    key: &K,
    item: impl FnOnce() -> ItemKey,
) -> BuildResult<&'a Slot<T>> {
    map.get(key)
        .ok_or_else(|| BuildError::Uninitialized { key: item() })
}

fn missing_slot(key: ItemKey) -> BuildError {
    BuildError::structural(format!("no slot was created for {key}"))
}

impl<B: Backend> SlotTable<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty slot for `key`. Creating an existing slot is a no-op.
    pub fn create(&mut self, key: &ItemKey) {
        let slot_key = key.clone();
        match key {
            ItemKey::Type(k) => {
                self.types.entry(k.clone()).or_insert_with(|| Slot::new(slot_key));
            }
            ItemKey::CompletedType(k) => {
                self.completed
                    .entry(k.clone())
                    .or_insert_with(|| Slot::new(slot_key));
            }
            ItemKey::Method(k) => {
                self.methods.entry(k.clone()).or_insert_with(|| Slot::new(slot_key));
            }
            ItemKey::Constructor(k) => {
                self.constructors
                    .entry(k.clone())
                    .or_insert_with(|| Slot::new(slot_key));
            }
            ItemKey::Field(k) => {
                self.fields.entry(k.clone()).or_insert_with(|| Slot::new(slot_key));
            }
            ItemKey::Property(k) => {
                self.properties
                    .entry(k.clone())
                    .or_insert_with(|| Slot::new(slot_key));
            }
        }
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        match key {
            ItemKey::Type(k) => self.types.contains_key(k),
            ItemKey::CompletedType(k) => self.completed.contains_key(k),
            ItemKey::Method(k) => self.methods.contains_key(k),
            ItemKey::Constructor(k) => self.constructors.contains_key(k),
            ItemKey::Field(k) => self.fields.contains_key(k),
            ItemKey::Property(k) => self.properties.contains_key(k),
        }
    }

    pub fn is_written(&self, key: &ItemKey) -> bool {
        match key {
            ItemKey::Type(k) => self.types.get(k).is_some_and(Slot::is_written),
            ItemKey::CompletedType(k) => {
                self.completed.get(k).is_some_and(Slot::is_written)
            }
            ItemKey::Method(k) => self.methods.get(k).is_some_and(Slot::is_written),
            ItemKey::Constructor(k) => {
                self.constructors.get(k).is_some_and(Slot::is_written)
            }
            ItemKey::Field(k) => self.fields.get(k).is_some_and(Slot::is_written),
            ItemKey::Property(k) => {
                self.properties.get(k).is_some_and(Slot::is_written)
            }
        }
    }

    // ── readers ─────────────────────────────────────────────────────

    pub fn ty(&self, key: &TypeKey) -> BuildResult<B::Type> {
        lookup(&self.types, key, || key.clone().into())?.read()
    }

    pub fn completed(&self, key: &CompletedTypeKey) -> BuildResult<B::CompletedType> {
        lookup(&self.completed, key, || key.clone().into())?.read()
    }

    pub fn method(&self, key: &MethodKey) -> BuildResult<B::Method> {
        lookup(&self.methods, key, || key.clone().into())?.read()
    }

    pub fn constructor(&self, key: &ConstructorKey) -> BuildResult<B::Constructor> {
        lookup(&self.constructors, key, || key.clone().into())?.read()
    }

    pub fn field(&self, key: &FieldKey) -> BuildResult<B::Field> {
        lookup(&self.fields, key, || key.clone().into())?.read()
    }

    pub fn property(&self, key: &PropertyKey) -> BuildResult<B::Property> {
        lookup(&self.properties, key, || key.clone().into())?.read()
    }

    // ── writers ─────────────────────────────────────────────────────

    pub fn write_type(&self, key: &TypeKey, value: B::Type) -> BuildResult<()> {
        self.types
            .get(key)
            .ok_or_else(|| missing_slot(key.clone().into()))?
            .write(value)
    }

    pub fn write_completed(
        &self,
        key: &CompletedTypeKey,
        value: B::CompletedType,
    ) -> BuildResult<()> {
        self.completed
            .get(key)
            .ok_or_else(|| missing_slot(key.clone().into()))?
            .write(value)
    }

    pub fn write_method(&self, key: &MethodKey, value: B::Method) -> BuildResult<()> {
        self.methods
            .get(key)
            .ok_or_else(|| missing_slot(key.clone().into()))?
            .write(value)
    }

    pub fn write_constructor(
        &self,
        key: &ConstructorKey,
        value: B::Constructor,
    ) -> BuildResult<()> {
        self.constructors
            .get(key)
            .ok_or_else(|| missing_slot(key.clone().into()))?
            .write(value)
    }

    pub fn write_field(&self, key: &FieldKey, value: B::Field) -> BuildResult<()> {
        self.fields
            .get(key)
            .ok_or_else(|| missing_slot(key.clone().into()))?
            .write(value)
    }

    pub fn write_property(&self, key: &PropertyKey, value: B::Property) -> BuildResult<()> {
        self.properties
            .get(key)
            .ok_or_else(|| missing_slot(key.clone().into()))?
            .write(value)
    }

    /// Every completed type written so far.
    pub fn completed_types(
        &self,
    ) -> impl Iterator<Item = (&CompletedTypeKey, B::CompletedType)> + '_ {
        self.completed
            .iter()
            .filter_map(|(key, slot)| slot.read().ok().map(|handle| (key, handle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_is_write_once() {
        let slot = Slot::new(TypeKey::new("A").into());
        assert!(matches!(
            slot.read(),
            Err(BuildError::Uninitialized { .. })
        ));
        slot.write(7u32).unwrap();
        assert_eq!(slot.read().unwrap(), 7);
        assert_eq!(slot.read().unwrap(), 7);
        assert!(matches!(
            slot.write(8),
            Err(BuildError::SingleAssignment { key: ItemKey::Type(_) })
        ));
        assert_eq!(slot.read().unwrap(), 7);
    }
}
