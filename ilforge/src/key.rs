//! Structural identities for entities that may not exist yet.
//!
//! Two keys of the same kind with equal constituents name the same entity.
//! All keys are totally ordered so diagnostics and set operations are
//! deterministic.

use std::fmt;
use std::sync::Arc;

use crate::reference::TypeReference;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey {
    name: Arc<str>,
}

impl TypeKey {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn completed(&self) -> CompletedTypeKey {
        CompletedTypeKey { ty: self.clone() }
    }

    pub fn method(
        &self,
        name: &str,
        params: Vec<TypeReference>,
        is_instance: bool,
    ) -> MethodKey {
        MethodKey {
            owner: self.clone(),
            name: Arc::from(name),
            params,
            is_instance,
        }
    }

    pub fn constructor(&self, params: Vec<TypeReference>) -> ConstructorKey {
        ConstructorKey {
            owner: self.clone(),
            params,
        }
    }

    pub fn field(&self, name: &str) -> FieldKey {
        FieldKey {
            owner: self.clone(),
            name: Arc::from(name),
        }
    }

    pub fn property(&self, name: &str) -> PropertyKey {
        PropertyKey {
            owner: self.clone(),
            name: Arc::from(name),
        }
    }
}

/// The finalized form of a type; produced once every member is emitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompletedTypeKey {
    pub ty: TypeKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey {
    pub owner: TypeKey,
    pub name: Arc<str>,
    /// Parameter types, not counting the receiver.
    pub params: Vec<TypeReference>,
    pub is_instance: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstructorKey {
    pub owner: TypeKey,
    /// Parameter types, not counting the receiver.
    pub params: Vec<TypeReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey {
    pub owner: TypeKey,
    pub name: Arc<str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyKey {
    pub owner: TypeKey,
    pub name: Arc<str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKey {
    Type(TypeKey),
    CompletedType(CompletedTypeKey),
    Method(MethodKey),
    Constructor(ConstructorKey),
    Field(FieldKey),
    Property(PropertyKey),
}

impl ItemKey {
    /// The new type this key belongs to.
    pub fn owner(&self) -> &TypeKey {
        match self {
            ItemKey::Type(key) => key,
            ItemKey::CompletedType(key) => &key.ty,
            ItemKey::Method(key) => &key.owner,
            ItemKey::Constructor(key) => &key.owner,
            ItemKey::Field(key) => &key.owner,
            ItemKey::Property(key) => &key.owner,
        }
    }
}

impl From<TypeKey> for ItemKey {
    fn from(key: TypeKey) -> Self {
        ItemKey::Type(key)
    }
}

impl From<CompletedTypeKey> for ItemKey {
    fn from(key: CompletedTypeKey) -> Self {
        ItemKey::CompletedType(key)
    }
}

impl From<MethodKey> for ItemKey {
    fn from(key: MethodKey) -> Self {
        ItemKey::Method(key)
    }
}

impl From<ConstructorKey> for ItemKey {
    fn from(key: ConstructorKey) -> Self {
        ItemKey::Constructor(key)
    }
}

impl From<FieldKey> for ItemKey {
    fn from(key: FieldKey) -> Self {
        ItemKey::Field(key)
    }
}

impl From<PropertyKey> for ItemKey {
    fn from(key: PropertyKey) -> Self {
        ItemKey::Property(key)
    }
}

fn write_params(
    f: &mut fmt::Formatter<'_>,
    params: &[TypeReference],
) -> fmt::Result {
    write!(f, "(")?;
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{param}")?;
    }
    write!(f, ")")
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl fmt::Display for CompletedTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!", self.ty)
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_instance {
            write!(f, "static ")?;
        }
        write!(f, "{}::{}", self.owner, self.name)?;
        write_params(f, &self.params)
    }
}

impl fmt::Display for ConstructorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::.ctor", self.owner)?;
        write_params(f, &self.params)
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.name)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.name)
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKey::Type(key) => write!(f, "type {key}"),
            ItemKey::CompletedType(key) => write!(f, "completed type {}", key.ty),
            ItemKey::Method(key) => write!(f, "method {key}"),
            ItemKey::Constructor(key) => write!(f, "constructor {key}"),
            ItemKey::Field(key) => write!(f, "field {key}"),
            ItemKey::Property(key) => write!(f, "property {key}"),
        }
    }
}
