//! The code-generation collaborator that materializes native entities.
//!
//! The core never inspects a handle; it only threads them from the slots a
//! step reads into the calls that step makes.

use std::fmt;
use std::sync::Arc;

use crate::attributes::{
    FieldAttributes, MethodAttributes, PropertyAttributes, TypeAttributes,
};
use crate::error::BuildResult;
use crate::ir::{BranchKind, Opcode, TypeOp};
use crate::reference::PrimitiveType;

pub struct FieldSignature<B: Backend> {
    pub name: Arc<str>,
    pub attributes: FieldAttributes,
    pub field_type: B::Type,
}

/// `params` never include the receiver; instance methods are those
/// without `MethodAttributes::STATIC`.
pub struct MethodSignature<B: Backend> {
    pub name: Arc<str>,
    pub attributes: MethodAttributes,
    pub params: Vec<B::Type>,
    pub return_type: B::Type,
}

pub struct ConstructorSignature<B: Backend> {
    pub attributes: MethodAttributes,
    pub params: Vec<B::Type>,
}

pub struct PropertySignature<B: Backend> {
    pub name: Arc<str>,
    pub attributes: PropertyAttributes,
    pub property_type: B::Type,
    pub getter: Option<B::Method>,
    pub setter: Option<B::Method>,
}

pub trait Backend: Sized + 'static {
    type Type: Clone + fmt::Debug;
    type CompletedType: Clone + fmt::Debug;
    type Field: Clone + fmt::Debug;
    type Method: Clone + fmt::Debug;
    type Constructor: Clone + fmt::Debug;
    type Property: Clone + fmt::Debug;
    type Label: Clone + fmt::Debug;
    type Local: Clone + fmt::Debug;
    type Body: IlSink<Self>;

    // ── existing entities ───────────────────────────────────────────

    fn primitive_type(&mut self, primitive: PrimitiveType) -> BuildResult<Self::Type>;
    fn named_type(&mut self, name: &str) -> BuildResult<Self::Type>;
    fn cell_type(&mut self, content: &Self::Type) -> BuildResult<Self::Type>;
    fn delegate_type(
        &mut self,
        params: &[Self::Type],
        ret: &Self::Type,
    ) -> BuildResult<Self::Type>;
    fn existing_method(
        &mut self,
        owner: &Self::Type,
        name: &str,
        params: &[Self::Type],
        ret: &Self::Type,
        is_instance: bool,
    ) -> BuildResult<Self::Method>;
    fn existing_constructor(
        &mut self,
        owner: &Self::Type,
        params: &[Self::Type],
    ) -> BuildResult<Self::Constructor>;
    fn existing_field(
        &mut self,
        owner: &Self::Type,
        name: &str,
        field_type: &Self::Type,
        is_instance: bool,
    ) -> BuildResult<Self::Field>;

    // ── new entities ────────────────────────────────────────────────

    fn define_type(
        &mut self,
        name: &str,
        attributes: TypeAttributes,
        base: Option<&Self::Type>,
        interfaces: &[Self::Type],
    ) -> BuildResult<Self::Type>;
    fn finalize_type(&mut self, ty: &Self::Type) -> BuildResult<Self::CompletedType>;
    fn define_field(
        &mut self,
        owner: &Self::Type,
        signature: FieldSignature<Self>,
    ) -> BuildResult<Self::Field>;
    fn define_method(
        &mut self,
        owner: &Self::Type,
        signature: MethodSignature<Self>,
    ) -> BuildResult<Self::Method>;
    fn define_constructor(
        &mut self,
        owner: &Self::Type,
        signature: ConstructorSignature<Self>,
    ) -> BuildResult<Self::Constructor>;
    fn define_property(
        &mut self,
        owner: &Self::Type,
        signature: PropertySignature<Self>,
    ) -> BuildResult<Self::Property>;

    // ── bodies ──────────────────────────────────────────────────────

    fn begin_body(&mut self) -> Self::Body;
    fn method_body(&mut self, method: &Self::Method, body: Self::Body) -> BuildResult<()>;
    fn constructor_body(
        &mut self,
        ctor: &Self::Constructor,
        body: Self::Body,
    ) -> BuildResult<()>;
}

/// Receives one method or constructor body, one instruction at a time.
pub trait IlSink<B: Backend> {
    fn define_label(&mut self) -> B::Label;
    fn mark_label(&mut self, label: &B::Label) -> BuildResult<()>;
    fn declare_local(&mut self, ty: &B::Type) -> BuildResult<B::Local>;
    /// Opens a protected region and returns the label its handlers leave to.
    fn begin_try(&mut self) -> BuildResult<B::Label>;
    fn begin_catch(&mut self, exception: &B::Type) -> BuildResult<()>;
    fn begin_finally(&mut self) -> BuildResult<()>;
    fn end_try(&mut self) -> BuildResult<()>;
    fn emit(&mut self, op: NativeOp<B>) -> BuildResult<()>;
}

/// An instruction whose operands are native handles.
pub enum NativeOp<B: Backend> {
    Op(Opcode),
    LoadI32(i32),
    LoadI64(i64),
    LoadF64(f64),
    LoadString(Arc<str>),
    LoadNull,
    LoadArg(u16),
    StoreArg(u16),
    LoadLocal(B::Local),
    StoreLocal(B::Local),
    Branch(BranchKind, B::Label),
    Switch(Vec<B::Label>),
    Leave(B::Label),
    LoadField(B::Field),
    StoreField(B::Field),
    LoadStaticField(B::Field),
    StoreStaticField(B::Field),
    NewObject(B::Constructor),
    CallConstructor(B::Constructor),
    Call { method: B::Method, tail: bool },
    CallVirtual { method: B::Method, tail: bool },
    TypeOp(TypeOp, B::Type),
    NewDelegate { delegate: B::Type, method: B::Method },
    InvokeDelegate { delegate: B::Type, tail: bool },
}

impl<B: Backend> fmt::Debug for NativeOp<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tail = |tail: &bool| if *tail { "tail. " } else { "" };
        match self {
            Self::Op(op) => write!(f, "{op}"),
            Self::LoadI32(v) => write!(f, "ldc.i4 {v}"),
            Self::LoadI64(v) => write!(f, "ldc.i8 {v}"),
            Self::LoadF64(v) => write!(f, "ldc.r8 {v}"),
            Self::LoadString(s) => write!(f, "ldstr {s:?}"),
            Self::LoadNull => write!(f, "ldnull"),
            Self::LoadArg(i) => write!(f, "ldarg {i}"),
            Self::StoreArg(i) => write!(f, "starg {i}"),
            Self::LoadLocal(l) => write!(f, "ldloc {l:?}"),
            Self::StoreLocal(l) => write!(f, "stloc {l:?}"),
            Self::Branch(kind, l) => write!(f, "{kind} {l:?}"),
            Self::Switch(ls) => write!(f, "switch {ls:?}"),
            Self::Leave(l) => write!(f, "leave {l:?}"),
            Self::LoadField(x) => write!(f, "ldfld {x:?}"),
            Self::StoreField(x) => write!(f, "stfld {x:?}"),
            Self::LoadStaticField(x) => write!(f, "ldsfld {x:?}"),
            Self::StoreStaticField(x) => write!(f, "stsfld {x:?}"),
            Self::NewObject(c) => write!(f, "newobj {c:?}"),
            Self::CallConstructor(c) => write!(f, "call {c:?}"),
            Self::Call { method, tail: t } => write!(f, "{}call {method:?}", tail(t)),
            Self::CallVirtual { method, tail: t } => {
                write!(f, "{}callvirt {method:?}", tail(t))
            }
            Self::TypeOp(op, ty) => write!(f, "{op} {ty:?}"),
            Self::NewDelegate { delegate, method } => {
                write!(f, "newdelegate {delegate:?} {method:?}")
            }
            Self::InvokeDelegate { delegate, tail: t } => {
                write!(f, "{}invokedelegate {delegate:?}", tail(t))
            }
        }
    }
}
