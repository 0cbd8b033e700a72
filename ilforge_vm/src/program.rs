//! The materialized program: every type, field and method the backend was
//! asked to create, addressed by index handles.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use ilforge::attributes::TypeAttributes;
use ilforge::backend::NativeOp;
use ilforge::PrimitiveType;

use crate::backend::VmBackend;

macro_rules! handle {
    ($name:ident) => {
        #[derive(Clone, PartialEq, Eq, Hash)]
        pub struct $name {
            pub(crate) index: usize,
            pub(crate) name: Arc<str>,
        }

        impl $name {
            pub fn index(&self) -> usize {
                self.index
            }

            pub fn name(&self) -> &str {
                &self.name
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.name)
            }
        }
    };
}

handle!(TypeId);
handle!(FieldId);
handle!(MethodId);
handle!(PropertyId);

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub(crate) usize);

impl fmt::Debug for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(pub(crate) usize);

impl fmt::Debug for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A runtime type.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    Primitive(PrimitiveType),
    /// A class provided by the runtime itself, like `Console`.
    Named(Arc<str>),
    Cell(Box<Ty>),
    Delegate(Vec<Ty>, Box<Ty>),
    Defined(TypeId),
}

impl Ty {
    pub fn object() -> Self {
        Ty::Primitive(PrimitiveType::Object)
    }

    pub fn is_void(&self) -> bool {
        *self == Ty::Primitive(PrimitiveType::Void)
    }

    /// The name natives are registered under.
    pub fn native_name(&self) -> String {
        format!("{self:?}")
    }
}

impl fmt::Debug for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => f.write_str(p.name()),
            Self::Named(name) => f.write_str(name),
            Self::Cell(content) => write!(f, "cell<{content:?}>"),
            Self::Delegate(params, ret) => {
                f.write_str("fn(")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{param:?}")?;
                }
                write!(f, ") -> {ret:?}")
            }
            Self::Defined(id) => write!(f, "{id:?}"),
        }
    }
}

// ── code ───────────────────────────────────────────────────────────

pub enum Op {
    Native(NativeOp<VmBackend>),
    /// Closes a finally handler and resumes whatever was pending.
    EndFinally,
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(op) => write!(f, "{op:?}"),
            Self::EndFinally => f.write_str("endfinally"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerKind {
    Catch(Ty),
    Finally,
}

#[derive(Debug, Clone)]
pub struct Handler {
    pub kind: HandlerKind,
    pub start: usize,
    pub end: usize,
}

/// One protected region. Regions are stored innermost first.
#[derive(Debug, Clone)]
pub struct Region {
    pub try_start: usize,
    pub try_end: usize,
    pub handlers: Vec<Handler>,
}

impl Region {
    pub fn in_try(&self, pc: usize) -> bool {
        (self.try_start..self.try_end).contains(&pc)
    }

    /// The handler whose code contains `pc`.
    pub fn handler_at(&self, pc: usize) -> Option<&Handler> {
        self.handlers
            .iter()
            .find(|handler| (handler.start..handler.end).contains(&pc))
    }

    pub fn contains(&self, pc: usize) -> bool {
        self.in_try(pc) || self.handler_at(pc).is_some()
    }

    pub fn finally(&self) -> Option<&Handler> {
        self.handlers
            .iter()
            .find(|handler| handler.kind == HandlerKind::Finally)
    }
}

#[derive(Debug)]
pub struct Code {
    pub ops: Vec<Op>,
    /// Instruction index of every label.
    pub labels: Vec<usize>,
    pub locals: Vec<Ty>,
    pub regions: Vec<Region>,
}

// ── entities ───────────────────────────────────────────────────────

#[derive(Debug)]
pub struct TypeInfo {
    pub name: Arc<str>,
    pub attributes: TypeAttributes,
    pub base: Option<Ty>,
    pub interfaces: Vec<Ty>,
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
    pub properties: Vec<PropertyId>,
    /// Instance fields including inherited ones, set at finalization.
    pub layout: Option<Vec<FieldId>>,
}

#[derive(Debug)]
pub struct FieldInfo {
    pub owner: Ty,
    pub name: Arc<str>,
    pub ty: Ty,
    pub is_static: bool,
    /// Index into the object's field vector; set when the owner finalizes.
    pub slot: Option<usize>,
}

#[derive(Debug)]
pub enum MethodKind {
    /// Defined by the module; `None` until its body is emitted.
    Defined(Option<Rc<Code>>),
    Abstract,
    /// Implemented by the runtime.
    Native,
}

#[derive(Debug)]
pub struct MethodInfo {
    pub owner: Ty,
    pub name: Arc<str>,
    pub params: Vec<Ty>,
    pub ret: Ty,
    pub is_static: bool,
    pub is_virtual: bool,
    pub kind: MethodKind,
}

impl MethodInfo {
    /// Argument count including the receiver.
    pub fn arity(&self) -> usize {
        self.params.len() + usize::from(!self.is_static)
    }
}

#[derive(Debug)]
pub struct PropertyInfo {
    pub owner: Ty,
    pub name: Arc<str>,
    pub ty: Ty,
    pub getter: Option<MethodId>,
    pub setter: Option<MethodId>,
}

#[derive(Debug, Default)]
pub struct Program {
    pub types: Vec<TypeInfo>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub properties: Vec<PropertyInfo>,
}

impl Program {
    pub fn ty(&self, id: &TypeId) -> &TypeInfo {
        &self.types[id.index]
    }

    pub fn field(&self, id: &FieldId) -> &FieldInfo {
        &self.fields[id.index]
    }

    pub fn method(&self, id: &MethodId) -> &MethodInfo {
        &self.methods[id.index]
    }

    pub fn find_type(&self, name: &str) -> Option<TypeId> {
        self.types
            .iter()
            .position(|ty| &*ty.name == name)
            .map(|index| TypeId {
                index,
                name: self.types[index].name.clone(),
            })
    }

    /// Looks up a method declared directly on `ty`.
    pub fn find_method(&self, ty: &TypeId, name: &str, params: &[Ty]) -> Option<MethodId> {
        self.ty(ty)
            .methods
            .iter()
            .find(|id| {
                let method = self.method(id);
                &*method.name == name && method.params == params
            })
            .cloned()
    }

    pub fn base_of(&self, ty: &Ty) -> Option<Ty> {
        match ty {
            Ty::Defined(id) => Some(self.ty(id).base.clone().unwrap_or_else(Ty::object)),
            Ty::Primitive(PrimitiveType::Object) => None,
            _ => Some(Ty::object()),
        }
    }

    /// Whether a value of type `from` may be used where `to` is expected.
    pub fn is_subtype(&self, from: &Ty, to: &Ty) -> bool {
        let mut pending = vec![from.clone()];
        while let Some(ty) = pending.pop() {
            if ty == *to {
                return true;
            }
            if let Ty::Defined(id) = &ty {
                pending.extend(self.ty(id).interfaces.iter().cloned());
            }
            pending.extend(self.base_of(&ty));
        }
        false
    }

    /// Picks the implementation of `method` for a receiver of type `ty`.
    pub fn dispatch(&self, ty: &Ty, method: &MethodId) -> MethodId {
        let declared = self.method(method);
        if !declared.is_virtual {
            return method.clone();
        }
        let mut current = Some(ty.clone());
        while let Some(Ty::Defined(id)) = current {
            if let Some(found) = self.find_method(&id, &declared.name, &declared.params) {
                if !matches!(self.method(&found).kind, MethodKind::Abstract) {
                    return found;
                }
            }
            current = self.ty(&id).base.clone();
        }
        method.clone()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ty in &self.types {
            write!(f, "type {}", ty.name)?;
            if let Some(base) = &ty.base {
                write!(f, " : {base:?}")?;
            }
            writeln!(f)?;
            for field in &ty.fields {
                let info = self.field(field);
                let slot = info.slot.map(|slot| format!(" @{slot}")).unwrap_or_default();
                writeln!(f, "  field {}: {:?}{slot}", info.name, info.ty)?;
            }
            for method in &ty.methods {
                let info = self.method(method);
                let prefix = if info.is_static { "static " } else { "" };
                writeln!(f, "  {prefix}method {}{:?} -> {:?}", info.name, info.params, info.ret)?;
                let MethodKind::Defined(Some(code)) = &info.kind else {
                    continue;
                };
                for (pc, op) in code.ops.iter().enumerate() {
                    for (label, _) in code.labels.iter().enumerate().filter(|(_, at)| **at == pc) {
                        writeln!(f, "   L{label}:")?;
                    }
                    writeln!(f, "    {pc:>3}  {op:?}")?;
                }
            }
        }
        Ok(())
    }
}
