use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::attributes::TypeAttributes;
use crate::reference::{ExistingType, PrimitiveType, TypeReference};
use crate::table::SymbolTable;

/// What the core needs to know about types it did not declare itself.
pub trait TypeMetadata {
    fn is_value_type(&self, ty: &ExistingType) -> bool;
    fn is_interface(&self, ty: &ExistingType) -> bool;
    fn base_type(&self, ty: &ExistingType) -> Option<TypeReference>;
    fn interfaces(&self, ty: &ExistingType) -> Vec<TypeReference>;
}

#[derive(Debug, Clone, Default)]
pub struct NamedTypeInfo {
    pub is_value_type: bool,
    pub is_interface: bool,
    pub base: Option<TypeReference>,
    pub interfaces: Vec<TypeReference>,
}

/// Metadata for primitives, cells and delegates, plus any registered named
/// types. Unregistered named types are plain classes deriving from `object`.
#[derive(Debug, Clone, Default)]
pub struct BuiltinMetadata {
    named: FxHashMap<Arc<str>, NamedTypeInfo>,
}

impl BuiltinMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, name: &str, info: NamedTypeInfo) -> Self {
        self.named.insert(Arc::from(name), info);
        self
    }
}

impl TypeMetadata for BuiltinMetadata {
    fn is_value_type(&self, ty: &ExistingType) -> bool {
        match ty {
            ExistingType::Primitive(p) => p.is_value_type(),
            ExistingType::Named(name) => {
                self.named.get(name).is_some_and(|info| info.is_value_type)
            }
            ExistingType::Cell(_) | ExistingType::Delegate { .. } => false,
        }
    }

    fn is_interface(&self, ty: &ExistingType) -> bool {
        match ty {
            ExistingType::Named(name) => {
                self.named.get(name).is_some_and(|info| info.is_interface)
            }
            _ => false,
        }
    }

    fn base_type(&self, ty: &ExistingType) -> Option<TypeReference> {
        match ty {
            ExistingType::Primitive(PrimitiveType::String) => Some(TypeReference::object()),
            ExistingType::Primitive(_) => None,
            ExistingType::Named(name) => match self.named.get(name) {
                Some(info) if info.is_interface || info.is_value_type => info.base.clone(),
                Some(info) => info.base.clone().or_else(|| Some(TypeReference::object())),
                None => Some(TypeReference::object()),
            },
            ExistingType::Cell(_) | ExistingType::Delegate { .. } => {
                Some(TypeReference::object())
            }
        }
    }

    fn interfaces(&self, ty: &ExistingType) -> Vec<TypeReference> {
        match ty {
            ExistingType::Named(name) => self
                .named
                .get(name)
                .map(|info| info.interfaces.clone())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

/// Answers type questions uniformly for new and pre-existing types.
#[derive(Clone, Copy)]
pub struct TypeOracle<'a> {
    table: &'a SymbolTable,
    metadata: &'a dyn TypeMetadata,
}

impl<'a> TypeOracle<'a> {
    pub fn new(table: &'a SymbolTable, metadata: &'a dyn TypeMetadata) -> Self {
        Self { table, metadata }
    }

    pub fn table(&self) -> &'a SymbolTable {
        self.table
    }

    pub fn is_value_type(&self, ty: &TypeReference) -> bool {
        match ty {
            TypeReference::Key(key) => self
                .table
                .ty(key)
                .is_some_and(|decl| decl.attributes.contains(TypeAttributes::VALUE_TYPE)),
            TypeReference::Existing(existing) => self.metadata.is_value_type(existing),
        }
    }

    pub fn is_interface(&self, ty: &TypeReference) -> bool {
        match ty {
            TypeReference::Key(key) => self
                .table
                .ty(key)
                .is_some_and(|decl| decl.attributes.contains(TypeAttributes::INTERFACE)),
            TypeReference::Existing(existing) => self.metadata.is_interface(existing),
        }
    }

    pub fn is_reference_type(&self, ty: &TypeReference) -> bool {
        !ty.is_void() && !self.is_value_type(ty)
    }

    pub fn base_type(&self, ty: &TypeReference) -> Option<TypeReference> {
        match ty {
            TypeReference::Key(key) => {
                let decl = self.table.ty(key)?;
                if decl.attributes.contains(TypeAttributes::INTERFACE) {
                    return None;
                }
                decl.base.clone().or_else(|| Some(TypeReference::object()))
            }
            TypeReference::Existing(existing) => self.metadata.base_type(existing),
        }
    }

    pub fn interfaces(&self, ty: &TypeReference) -> Vec<TypeReference> {
        match ty {
            TypeReference::Key(key) => self
                .table
                .ty(key)
                .map(|decl| decl.interfaces.clone())
                .unwrap_or_default(),
            TypeReference::Existing(existing) => self.metadata.interfaces(existing),
        }
    }

    /// Whether a value of type `from` may be stored where `to` is expected.
    pub fn is_assignable(&self, from: &TypeReference, to: &TypeReference) -> bool {
        if from == to {
            return true;
        }
        if !self.is_reference_type(from) || !self.is_reference_type(to) {
            return false;
        }
        if *to == TypeReference::object() {
            return true;
        }
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([from.clone()]);
        while let Some(ty) = queue.pop_front() {
            if !seen.insert(ty.clone()) {
                continue;
            }
            if ty == *to {
                return true;
            }
            queue.extend(self.base_type(&ty));
            queue.extend(self.interfaces(&ty));
        }
        false
    }
}
