use std::collections::BTreeMap;
use std::sync::Arc;

use crate::attributes::{
    FieldAttributes, MethodAttributes, PropertyAttributes, TypeAttributes,
};
use crate::error::{BuildError, BuildResult};
use crate::key::{ConstructorKey, FieldKey, ItemKey, MethodKey, PropertyKey, TypeKey};
use crate::reference::{MethodReference, TypeReference};

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDeclaration {
    pub attributes: TypeAttributes,
    pub base: Option<TypeReference>,
    pub interfaces: Vec<TypeReference>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDeclaration {
    pub attributes: MethodAttributes,
    pub return_type: TypeReference,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstructorDeclaration {
    pub attributes: MethodAttributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDeclaration {
    pub attributes: FieldAttributes,
    pub field_type: TypeReference,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDeclaration {
    pub attributes: PropertyAttributes,
    pub property_type: TypeReference,
    pub getter: Option<MethodReference>,
    pub setter: Option<MethodReference>,
}

/// Declared metadata for one key.
#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Type(TypeDeclaration),
    Method(MethodDeclaration),
    Constructor(ConstructorDeclaration),
    Field(FieldDeclaration),
    Property(PropertyDeclaration),
}

/// Persistent single-assignment map from keys to declarations.
///
/// Cloning is cheap; `declare` copies the underlying map only when another
/// clone still shares it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolTable {
    entries: Arc<BTreeMap<ItemKey, Declaration>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(
        mut self,
        key: impl Into<ItemKey>,
        declaration: Declaration,
    ) -> BuildResult<Self> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(BuildError::Declaration { key });
        }
        log::trace!("declare {key}");
        Arc::make_mut(&mut self.entries).insert(key, declaration);
        Ok(self)
    }

    pub fn get(&self, key: &ItemKey) -> Option<&Declaration> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemKey, &Declaration)> {
        self.entries.iter()
    }

    pub fn ty(&self, key: &TypeKey) -> Option<&TypeDeclaration> {
        match self.entries.get(&ItemKey::Type(key.clone()))? {
            Declaration::Type(decl) => Some(decl),
            _ => None,
        }
    }

    pub fn method(&self, key: &MethodKey) -> Option<&MethodDeclaration> {
        match self.entries.get(&ItemKey::Method(key.clone()))? {
            Declaration::Method(decl) => Some(decl),
            _ => None,
        }
    }

    pub fn constructor(&self, key: &ConstructorKey) -> Option<&ConstructorDeclaration> {
        match self.entries.get(&ItemKey::Constructor(key.clone()))? {
            Declaration::Constructor(decl) => Some(decl),
            _ => None,
        }
    }

    pub fn field(&self, key: &FieldKey) -> Option<&FieldDeclaration> {
        match self.entries.get(&ItemKey::Field(key.clone()))? {
            Declaration::Field(decl) => Some(decl),
            _ => None,
        }
    }

    pub fn property(&self, key: &PropertyKey) -> Option<&PropertyDeclaration> {
        match self.entries.get(&ItemKey::Property(key.clone()))? {
            Declaration::Property(decl) => Some(decl),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_field() -> Declaration {
        Declaration::Field(FieldDeclaration {
            attributes: FieldAttributes::PUBLIC,
            field_type: TypeReference::i32(),
        })
    }

    #[test]
    fn duplicate_declaration_fails() {
        let acc = TypeKey::new("Acc");
        let table = SymbolTable::new().declare(acc.field("a"), int_field()).unwrap();
        let err = table.declare(acc.field("a"), int_field()).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Declaration { key: ItemKey::Field(ref f) } if f.name.as_ref() == "a"
        ));
    }

    #[test]
    fn declare_leaves_earlier_tables_untouched() {
        let acc = TypeKey::new("Acc");
        let first = SymbolTable::new().declare(acc.field("a"), int_field()).unwrap();
        let second = first.clone().declare(acc.field("b"), int_field()).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        assert!(second.field(&acc.field("a")).is_some());
        assert!(first.field(&acc.field("b")).is_none());
    }

    #[test]
    fn typed_lookup_checks_kind() {
        let acc = TypeKey::new("Acc");
        let table = SymbolTable::new()
            .declare(
                acc.clone(),
                Declaration::Type(TypeDeclaration {
                    attributes: TypeAttributes::SEALED,
                    base: None,
                    interfaces: vec![],
                }),
            )
            .unwrap();
        assert_eq!(
            table.ty(&acc).map(|t| t.attributes),
            Some(TypeAttributes::SEALED)
        );
        assert!(table.field(&acc.field("a")).is_none());
    }
}
