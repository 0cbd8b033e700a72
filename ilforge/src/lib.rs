//! Declarative construction of managed-code modules.
//!
//! Callers describe types whose members may refer to each other before any
//! of them exist. Every entity is named by a structural key; a build
//! declares all keys, turns each definition into phase-tagged compile steps
//! and runs them in dependency order against a [`Backend`], resolving
//! forward references through write-once slots.

pub mod attributes;
pub mod backend;
pub mod element;
pub mod error;
pub mod expr;
pub mod ir;
pub mod key;
pub mod metadata;
pub mod module;
pub mod reference;
pub mod schedule;
pub mod slot;
pub mod symbol;
pub mod table;

#[cfg(test)]
mod testing;

pub use backend::{Backend, IlSink, NativeOp};
pub use element::{
    ConstructorBody, ConstructorDefinition, FieldDefinition, Member, MethodBody,
    MethodDefinition, ModuleElement, PropertyDefinition, TypeDefinition,
};
pub use error::{BuildError, BuildResult};
pub use key::{
    CompletedTypeKey, ConstructorKey, FieldKey, ItemKey, MethodKey, PropertyKey, TypeKey,
};
pub use module::{BuildOptions, BuiltModule, Module};
pub use reference::{
    ConstructorReference, ExistingConstructor, ExistingField, ExistingMethod, ExistingType,
    FieldReference, MethodReference, PrimitiveType, TypeReference,
};
pub use symbol::{Symbol, SymbolGenerator};
