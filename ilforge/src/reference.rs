//! References to entities: either a deferred key resolved through the slot
//! table, or an entity that already exists in the target runtime.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::attributes::{FieldAttributes, MethodAttributes};
use crate::backend::Backend;
use crate::error::{BuildError, BuildResult};
use crate::key::{ConstructorKey, FieldKey, ItemKey, MethodKey, TypeKey};
use crate::slot::SlotTable;
use crate::table::SymbolTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveType {
    Void,
    Bool,
    Char,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    String,
    Object,
}

impl PrimitiveType {
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Void => "void",
            PrimitiveType::Bool => "bool",
            PrimitiveType::Char => "char",
            PrimitiveType::I8 => "i8",
            PrimitiveType::I16 => "i16",
            PrimitiveType::I32 => "i32",
            PrimitiveType::I64 => "i64",
            PrimitiveType::U8 => "u8",
            PrimitiveType::U16 => "u16",
            PrimitiveType::U32 => "u32",
            PrimitiveType::U64 => "u64",
            PrimitiveType::F32 => "f32",
            PrimitiveType::F64 => "f64",
            PrimitiveType::String => "string",
            PrimitiveType::Object => "object",
        }
    }

    pub fn is_value_type(self) -> bool {
        !matches!(
            self,
            PrimitiveType::Void | PrimitiveType::String | PrimitiveType::Object
        )
    }

    pub fn is_integer(self) -> bool {
        self.is_signed_integer() || self.is_unsigned_integer()
    }

    pub fn is_signed_integer(self) -> bool {
        matches!(
            self,
            PrimitiveType::I8
                | PrimitiveType::I16
                | PrimitiveType::I32
                | PrimitiveType::I64
        )
    }

    pub fn is_unsigned_integer(self) -> bool {
        matches!(
            self,
            PrimitiveType::U8
                | PrimitiveType::U16
                | PrimitiveType::U32
                | PrimitiveType::U64
                | PrimitiveType::Char
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, PrimitiveType::F32 | PrimitiveType::F64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }
}

/// A type that exists independently of the module being built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExistingType {
    Primitive(PrimitiveType),
    /// A pre-existing class or interface, by its runtime name.
    Named(Arc<str>),
    /// Shared indirection cell holding a captured variable.
    Cell(Box<TypeReference>),
    Delegate {
        params: Vec<TypeReference>,
        ret: Box<TypeReference>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeReference {
    Key(TypeKey),
    Existing(ExistingType),
}

impl TypeReference {
    pub fn new_type(name: &str) -> Self {
        TypeReference::Key(TypeKey::new(name))
    }

    pub fn primitive(primitive: PrimitiveType) -> Self {
        TypeReference::Existing(ExistingType::Primitive(primitive))
    }

    pub fn void() -> Self {
        Self::primitive(PrimitiveType::Void)
    }

    pub fn bool() -> Self {
        Self::primitive(PrimitiveType::Bool)
    }

    pub fn i32() -> Self {
        Self::primitive(PrimitiveType::I32)
    }

    pub fn i64() -> Self {
        Self::primitive(PrimitiveType::I64)
    }

    pub fn u32() -> Self {
        Self::primitive(PrimitiveType::U32)
    }

    pub fn u64() -> Self {
        Self::primitive(PrimitiveType::U64)
    }

    pub fn f64() -> Self {
        Self::primitive(PrimitiveType::F64)
    }

    pub fn string() -> Self {
        Self::primitive(PrimitiveType::String)
    }

    pub fn object() -> Self {
        Self::primitive(PrimitiveType::Object)
    }

    pub fn named(name: &str) -> Self {
        TypeReference::Existing(ExistingType::Named(Arc::from(name)))
    }

    pub fn cell(content: TypeReference) -> Self {
        TypeReference::Existing(ExistingType::Cell(Box::new(content)))
    }

    pub fn delegate(params: Vec<TypeReference>, ret: TypeReference) -> Self {
        TypeReference::Existing(ExistingType::Delegate {
            params,
            ret: Box::new(ret),
        })
    }

    pub fn as_primitive(&self) -> Option<PrimitiveType> {
        match self {
            TypeReference::Existing(ExistingType::Primitive(p)) => Some(*p),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<&TypeKey> {
        match self {
            TypeReference::Key(key) => Some(key),
            TypeReference::Existing(_) => None,
        }
    }

    pub fn is_void(&self) -> bool {
        self.as_primitive() == Some(PrimitiveType::Void)
    }

    pub fn is_bool(&self) -> bool {
        self.as_primitive() == Some(PrimitiveType::Bool)
    }

    /// The content type when this is a capture cell.
    pub fn cell_content(&self) -> Option<&TypeReference> {
        match self {
            TypeReference::Existing(ExistingType::Cell(content)) => Some(content),
            _ => None,
        }
    }

    pub fn delegate_signature(
        &self,
    ) -> Option<(&[TypeReference], &TypeReference)> {
        match self {
            TypeReference::Existing(ExistingType::Delegate { params, ret }) => {
                Some((params, ret))
            }
            _ => None,
        }
    }

    pub fn collect_keys(&self, out: &mut BTreeSet<ItemKey>) {
        match self {
            TypeReference::Key(key) => {
                out.insert(ItemKey::Type(key.clone()));
            }
            TypeReference::Existing(ExistingType::Cell(content)) => {
                content.collect_keys(out)
            }
            TypeReference::Existing(ExistingType::Delegate { params, ret }) => {
                for param in params {
                    param.collect_keys(out);
                }
                ret.collect_keys(out);
            }
            TypeReference::Existing(_) => {}
        }
    }

    pub fn depends_on(&self) -> BTreeSet<ItemKey> {
        let mut keys = BTreeSet::new();
        self.collect_keys(&mut keys);
        keys
    }

    pub fn resolve<B: Backend>(
        &self,
        backend: &mut B,
        slots: &SlotTable<B>,
    ) -> BuildResult<B::Type> {
        match self {
            TypeReference::Key(key) => slots.ty(key),
            TypeReference::Existing(ExistingType::Primitive(p)) => {
                backend.primitive_type(*p)
            }
            TypeReference::Existing(ExistingType::Named(name)) => {
                backend.named_type(name)
            }
            TypeReference::Existing(ExistingType::Cell(content)) => {
                let content = content.resolve(backend, slots)?;
                backend.cell_type(&content)
            }
            TypeReference::Existing(ExistingType::Delegate { params, ret }) => {
                let params = resolve_all(params, backend, slots)?;
                let ret = ret.resolve(backend, slots)?;
                backend.delegate_type(&params, &ret)
            }
        }
    }
}

pub(crate) fn resolve_all<B: Backend>(
    types: &[TypeReference],
    backend: &mut B,
    slots: &SlotTable<B>,
) -> BuildResult<Vec<B::Type>> {
    types.iter().map(|ty| ty.resolve(backend, slots)).collect()
}

fn collect_all(types: &[TypeReference], out: &mut BTreeSet<ItemKey>) {
    for ty in types {
        ty.collect_keys(out);
    }
}

// ── Existing members ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExistingMethod {
    pub owner: TypeReference,
    pub name: Arc<str>,
    pub params: Vec<TypeReference>,
    pub return_type: TypeReference,
    pub is_instance: bool,
    pub is_virtual: bool,
}

impl ExistingMethod {
    pub fn new_static(
        owner: TypeReference,
        name: &str,
        params: Vec<TypeReference>,
        return_type: TypeReference,
    ) -> Self {
        Self {
            owner,
            name: Arc::from(name),
            params,
            return_type,
            is_instance: false,
            is_virtual: false,
        }
    }

    pub fn new_instance(
        owner: TypeReference,
        name: &str,
        params: Vec<TypeReference>,
        return_type: TypeReference,
    ) -> Self {
        Self {
            is_instance: true,
            ..Self::new_static(owner, name, params, return_type)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExistingConstructor {
    pub owner: TypeReference,
    pub params: Vec<TypeReference>,
}

impl ExistingConstructor {
    /// The parameterless constructor of `object`.
    pub fn object() -> Self {
        Self {
            owner: TypeReference::object(),
            params: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExistingField {
    pub owner: TypeReference,
    pub name: Arc<str>,
    pub field_type: TypeReference,
    pub is_instance: bool,
}

// ── Member references ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MethodReference {
    Key(MethodKey),
    Existing(ExistingMethod),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstructorReference {
    Key(ConstructorKey),
    Existing(ExistingConstructor),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldReference {
    Key(FieldKey),
    Existing(ExistingField),
}

/// What the expression compiler needs to know about a callable.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub owner: TypeReference,
    pub params: Vec<TypeReference>,
    pub return_type: TypeReference,
    pub is_instance: bool,
    pub is_virtual: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub owner: TypeReference,
    pub field_type: TypeReference,
    pub is_instance: bool,
}

impl MethodReference {
    pub fn collect_keys(&self, out: &mut BTreeSet<ItemKey>) {
        match self {
            MethodReference::Key(key) => {
                out.insert(ItemKey::Method(key.clone()));
            }
            MethodReference::Existing(method) => {
                method.owner.collect_keys(out);
                collect_all(&method.params, out);
                method.return_type.collect_keys(out);
            }
        }
    }

    pub fn depends_on(&self) -> BTreeSet<ItemKey> {
        let mut keys = BTreeSet::new();
        self.collect_keys(&mut keys);
        keys
    }

    pub fn info(&self, table: &SymbolTable) -> BuildResult<MethodInfo> {
        match self {
            MethodReference::Key(key) => {
                let decl = table.method(key).ok_or_else(|| {
                    BuildError::type_error(format!("undeclared method {key}"))
                })?;
                Ok(MethodInfo {
                    owner: TypeReference::Key(key.owner.clone()),
                    params: key.params.clone(),
                    return_type: decl.return_type.clone(),
                    is_instance: key.is_instance,
                    is_virtual: decl.attributes.contains(MethodAttributes::VIRTUAL),
                })
            }
            MethodReference::Existing(method) => Ok(MethodInfo {
                owner: method.owner.clone(),
                params: method.params.clone(),
                return_type: method.return_type.clone(),
                is_instance: method.is_instance,
                is_virtual: method.is_virtual,
            }),
        }
    }

    pub fn resolve<B: Backend>(
        &self,
        backend: &mut B,
        slots: &SlotTable<B>,
    ) -> BuildResult<B::Method> {
        match self {
            MethodReference::Key(key) => slots.method(key),
            MethodReference::Existing(method) => {
                let owner = method.owner.resolve(backend, slots)?;
                let params = resolve_all(&method.params, backend, slots)?;
                let ret = method.return_type.resolve(backend, slots)?;
                backend.existing_method(
                    &owner,
                    &method.name,
                    &params,
                    &ret,
                    method.is_instance,
                )
            }
        }
    }
}

impl ConstructorReference {
    pub fn collect_keys(&self, out: &mut BTreeSet<ItemKey>) {
        match self {
            ConstructorReference::Key(key) => {
                out.insert(ItemKey::Constructor(key.clone()));
            }
            ConstructorReference::Existing(ctor) => {
                ctor.owner.collect_keys(out);
                collect_all(&ctor.params, out);
            }
        }
    }

    pub fn depends_on(&self) -> BTreeSet<ItemKey> {
        let mut keys = BTreeSet::new();
        self.collect_keys(&mut keys);
        keys
    }

    pub fn owner(&self) -> TypeReference {
        match self {
            ConstructorReference::Key(key) => TypeReference::Key(key.owner.clone()),
            ConstructorReference::Existing(ctor) => ctor.owner.clone(),
        }
    }

    pub fn params(&self) -> &[TypeReference] {
        match self {
            ConstructorReference::Key(key) => &key.params,
            ConstructorReference::Existing(ctor) => &ctor.params,
        }
    }

    /// Checks that a deferred constructor was declared.
    pub fn check_declared(&self, table: &SymbolTable) -> BuildResult<()> {
        match self {
            ConstructorReference::Key(key) if table.constructor(key).is_none() => {
                Err(BuildError::type_error(format!("undeclared constructor {key}")))
            }
            _ => Ok(()),
        }
    }

    pub fn resolve<B: Backend>(
        &self,
        backend: &mut B,
        slots: &SlotTable<B>,
    ) -> BuildResult<B::Constructor> {
        match self {
            ConstructorReference::Key(key) => slots.constructor(key),
            ConstructorReference::Existing(ctor) => {
                let owner = ctor.owner.resolve(backend, slots)?;
                let params = resolve_all(&ctor.params, backend, slots)?;
                backend.existing_constructor(&owner, &params)
            }
        }
    }
}

impl FieldReference {
    pub fn collect_keys(&self, out: &mut BTreeSet<ItemKey>) {
        match self {
            FieldReference::Key(key) => {
                out.insert(ItemKey::Field(key.clone()));
            }
            FieldReference::Existing(field) => {
                field.owner.collect_keys(out);
                field.field_type.collect_keys(out);
            }
        }
    }

    pub fn depends_on(&self) -> BTreeSet<ItemKey> {
        let mut keys = BTreeSet::new();
        self.collect_keys(&mut keys);
        keys
    }

    pub fn info(&self, table: &SymbolTable) -> BuildResult<FieldInfo> {
        match self {
            FieldReference::Key(key) => {
                let decl = table.field(key).ok_or_else(|| {
                    BuildError::type_error(format!("undeclared field {key}"))
                })?;
                Ok(FieldInfo {
                    owner: TypeReference::Key(key.owner.clone()),
                    field_type: decl.field_type.clone(),
                    is_instance: !decl.attributes.contains(FieldAttributes::STATIC),
                })
            }
            FieldReference::Existing(field) => Ok(FieldInfo {
                owner: field.owner.clone(),
                field_type: field.field_type.clone(),
                is_instance: field.is_instance,
            }),
        }
    }

    pub fn resolve<B: Backend>(
        &self,
        backend: &mut B,
        slots: &SlotTable<B>,
    ) -> BuildResult<B::Field> {
        match self {
            FieldReference::Key(key) => slots.field(key),
            FieldReference::Existing(field) => {
                let owner = field.owner.resolve(backend, slots)?;
                let ty = field.field_type.resolve(backend, slots)?;
                backend.existing_field(&owner, &field.name, &ty, field.is_instance)
            }
        }
    }
}

impl From<MethodKey> for MethodReference {
    fn from(key: MethodKey) -> Self {
        MethodReference::Key(key)
    }
}

impl From<ExistingMethod> for MethodReference {
    fn from(method: ExistingMethod) -> Self {
        MethodReference::Existing(method)
    }
}

impl From<ConstructorKey> for ConstructorReference {
    fn from(key: ConstructorKey) -> Self {
        ConstructorReference::Key(key)
    }
}

impl From<ExistingConstructor> for ConstructorReference {
    fn from(ctor: ExistingConstructor) -> Self {
        ConstructorReference::Existing(ctor)
    }
}

impl From<FieldKey> for FieldReference {
    fn from(key: FieldKey) -> Self {
        FieldReference::Key(key)
    }
}

impl From<ExistingField> for FieldReference {
    fn from(field: ExistingField) -> Self {
        FieldReference::Existing(field)
    }
}

impl From<TypeKey> for TypeReference {
    fn from(key: TypeKey) -> Self {
        TypeReference::Key(key)
    }
}

// ── Display ─────────────────────────────────────────────────────────

fn write_list(f: &mut fmt::Formatter<'_>, types: &[TypeReference]) -> fmt::Result {
    for (i, ty) in types.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{ty}")?;
    }
    Ok(())
}

impl fmt::Display for TypeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeReference::Key(key) => write!(f, "{key}"),
            TypeReference::Existing(ExistingType::Primitive(p)) => {
                write!(f, "{}", p.name())
            }
            TypeReference::Existing(ExistingType::Named(name)) => write!(f, "{name}"),
            TypeReference::Existing(ExistingType::Cell(content)) => {
                write!(f, "cell<{content}>")
            }
            TypeReference::Existing(ExistingType::Delegate { params, ret }) => {
                write!(f, "fn(")?;
                write_list(f, params)?;
                write!(f, ") -> {ret}")
            }
        }
    }
}

impl fmt::Display for MethodReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodReference::Key(key) => write!(f, "{key}"),
            MethodReference::Existing(method) => {
                if !method.is_instance {
                    write!(f, "static ")?;
                }
                write!(f, "{}::{}(", method.owner, method.name)?;
                write_list(f, &method.params)?;
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for ConstructorReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstructorReference::Key(key) => write!(f, "{key}"),
            ConstructorReference::Existing(ctor) => {
                write!(f, "{}::.ctor(", ctor.owner)?;
                write_list(f, &ctor.params)?;
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for FieldReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldReference::Key(key) => write!(f, "{key}"),
            FieldReference::Existing(field) => {
                write!(f, "{}::{}", field.owner, field.name)
            }
        }
    }
}
