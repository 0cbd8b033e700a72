use core::fmt;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::ir::{BranchKind, Opcode, TypeOp};
use crate::key::ItemKey;
use crate::reference::{ConstructorReference, FieldReference, MethodReference, TypeReference};
use crate::symbol::Symbol;

/// A symbolic stack-machine instruction.
///
/// Labels and locals are named by [`Symbol`]; entity operands are
/// references resolved through the slot table at emission time.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Op(Opcode),
    LoadI32(i32),
    LoadI64(i64),
    LoadF64(f64),
    LoadString(Arc<str>),
    LoadNull,
    LoadArg(u16),
    StoreArg(u16),
    LoadLocal(Symbol),
    StoreLocal(Symbol),
    Label(Symbol),
    Branch(BranchKind, Symbol),
    Switch(Vec<Symbol>),
    Leave(Symbol),
    LoadField(FieldReference),
    StoreField(FieldReference),
    LoadStaticField(FieldReference),
    StoreStaticField(FieldReference),
    NewObject(ConstructorReference),
    /// Calls a constructor on an existing receiver (base initializers).
    CallConstructor(ConstructorReference),
    Call {
        method: MethodReference,
        tail: bool,
    },
    CallVirtual {
        method: MethodReference,
        tail: bool,
    },
    TypeOp(TypeOp, TypeReference),
    NewDelegate {
        delegate: TypeReference,
        method: MethodReference,
    },
    InvokeDelegate {
        delegate: TypeReference,
        tail: bool,
    },
    /// Opens a protected region; `end` is the label its handlers leave to.
    BeginTry {
        end: Symbol,
    },
    BeginCatch(TypeReference),
    BeginFinally,
    /// Closes the region opened with the same `end` and defines that label.
    EndTry {
        end: Symbol,
    },
}

impl Instruction {
    pub fn op(opcode: Opcode) -> Self {
        Self::Op(opcode)
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Op(Opcode::Ret | Opcode::Throw)
                | Self::Branch(BranchKind::Always, _)
                | Self::Leave(_)
        )
    }

    pub fn defined_label(&self) -> Option<&Symbol> {
        match self {
            Self::Label(label) | Self::EndTry { end: label } => Some(label),
            _ => None,
        }
    }

    pub fn used_labels(&self) -> Vec<&Symbol> {
        match self {
            Self::Branch(_, label) | Self::Leave(label) | Self::BeginTry { end: label } => {
                vec![label]
            }
            Self::Switch(labels) => labels.iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn local(&self) -> Option<&Symbol> {
        match self {
            Self::LoadLocal(local) | Self::StoreLocal(local) => Some(local),
            _ => None,
        }
    }

    pub fn collect_references(&self, out: &mut BTreeSet<ItemKey>) {
        match self {
            Self::LoadField(field)
            | Self::StoreField(field)
            | Self::LoadStaticField(field)
            | Self::StoreStaticField(field) => field.collect_keys(out),
            Self::NewObject(ctor) | Self::CallConstructor(ctor) => ctor.collect_keys(out),
            Self::Call { method, .. } | Self::CallVirtual { method, .. } => {
                method.collect_keys(out)
            }
            Self::TypeOp(_, ty) | Self::BeginCatch(ty) => ty.collect_keys(out),
            Self::NewDelegate { delegate, method } => {
                delegate.collect_keys(out);
                method.collect_keys(out);
            }
            Self::InvokeDelegate { delegate, .. } => delegate.collect_keys(out),
            _ => {}
        }
    }
}

impl From<Opcode> for Instruction {
    fn from(opcode: Opcode) -> Self {
        Self::Op(opcode)
    }
}

fn tail_prefix(tail: bool) -> &'static str {
    if tail { "tail. " } else { "" }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Op(op) => write!(f, "{op}"),
            Self::LoadI32(v) => write!(f, "ldc.i4 {v}"),
            Self::LoadI64(v) => write!(f, "ldc.i8 {v}"),
            Self::LoadF64(v) => write!(f, "ldc.r8 {v}"),
            Self::LoadString(s) => write!(f, "ldstr {s:?}"),
            Self::LoadNull => write!(f, "ldnull"),
            Self::LoadArg(i) => write!(f, "ldarg {i}"),
            Self::StoreArg(i) => write!(f, "starg {i}"),
            Self::LoadLocal(local) => write!(f, "ldloc {local}"),
            Self::StoreLocal(local) => write!(f, "stloc {local}"),
            Self::Label(label) => write!(f, "{label}:"),
            Self::Branch(kind, label) => write!(f, "{kind} {label}"),
            Self::Switch(labels) => {
                write!(f, "switch (")?;
                for (i, label) in labels.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{label}")?;
                }
                write!(f, ")")
            }
            Self::Leave(label) => write!(f, "leave {label}"),
            Self::LoadField(field) => write!(f, "ldfld {field}"),
            Self::StoreField(field) => write!(f, "stfld {field}"),
            Self::LoadStaticField(field) => write!(f, "ldsfld {field}"),
            Self::StoreStaticField(field) => write!(f, "stsfld {field}"),
            Self::NewObject(ctor) => write!(f, "newobj {ctor}"),
            Self::CallConstructor(ctor) => write!(f, "call {ctor}"),
            Self::Call { method, tail } => {
                write!(f, "{}call {method}", tail_prefix(*tail))
            }
            Self::CallVirtual { method, tail } => {
                write!(f, "{}callvirt {method}", tail_prefix(*tail))
            }
            Self::TypeOp(op, ty) => write!(f, "{op} {ty}"),
            Self::NewDelegate { delegate, method } => {
                write!(f, "newdelegate {delegate} {method}")
            }
            Self::InvokeDelegate { delegate, tail } => {
                write!(f, "{}invokedelegate {delegate}", tail_prefix(*tail))
            }
            Self::BeginTry { end } => write!(f, ".try (end {end})"),
            Self::BeginCatch(ty) => write!(f, ".catch {ty}"),
            Self::BeginFinally => write!(f, ".finally"),
            Self::EndTry { end } => write!(f, ".end {end}:"),
        }
    }
}
