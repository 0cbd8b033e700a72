//! A small typed expression language that lowers to the instruction IR.
//!
//! Expressions are plain immutable data. Each one can report its free
//! variables ([`env`]), compute its type ([`typing`]) and lower itself into
//! instructions ([`lower`]). Nested lambdas become synthesized closure types
//! ([`closure`]); variables they capture live in shared cells ([`storage`]).

mod closure;
mod display;
mod env;
mod lower;
mod storage;
mod typing;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::key::ItemKey;
use crate::reference::{
    ConstructorReference, FieldReference, MethodReference, PrimitiveType, TypeReference,
};
use crate::symbol::{Symbol, SymbolGenerator};

pub use closure::{ClosureLayout, collect_closures};
pub(crate) use closure::INVOKE;
pub use env::{EnvSpec, VarUsage};
pub use lower::{
    BaseInitializer, CapturedField, LambdaBody, compile_constructor_body, compile_method_body,
};
pub use storage::{Location, VariableStorage};
pub use typing::TypeEnv;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Bool(bool),
    Char(char),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(Arc<str>),
    /// The null reference of the given reference type.
    Null(TypeReference),
}

impl Literal {
    pub fn primitive(&self) -> Option<PrimitiveType> {
        Some(match self {
            Literal::Bool(_) => PrimitiveType::Bool,
            Literal::Char(_) => PrimitiveType::Char,
            Literal::I8(_) => PrimitiveType::I8,
            Literal::I16(_) => PrimitiveType::I16,
            Literal::I32(_) => PrimitiveType::I32,
            Literal::I64(_) => PrimitiveType::I64,
            Literal::U8(_) => PrimitiveType::U8,
            Literal::U16(_) => PrimitiveType::U16,
            Literal::U32(_) => PrimitiveType::U32,
            Literal::U64(_) => PrimitiveType::U64,
            Literal::F32(_) => PrimitiveType::F32,
            Literal::F64(_) => PrimitiveType::F64,
            Literal::String(_) => PrimitiveType::String,
            Literal::Null(_) => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    Convert(PrimitiveType),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Symbol,
    pub ty: TypeReference,
}

impl Param {
    pub fn new(name: impl Into<Symbol>, ty: TypeReference) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: Symbol,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub values: BTreeSet<u32>,
    pub body: Expr,
}

/// An anonymous function. `closure` names the synthesized closure type and
/// is allocated when the tree is built, so every pass over the tree agrees.
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub closure: Symbol,
    pub params: Vec<Param>,
    pub body: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Var(Symbol),
    Assign {
        var: Symbol,
        value: Box<Expr>,
    },
    Begin(Vec<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    If {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Switch {
        value: Box<Expr>,
        cases: Vec<SwitchCase>,
        default: Box<Expr>,
    },
    /// Parallel bindings: every value is evaluated in the enclosing scope.
    Let {
        bindings: Vec<Binding>,
        body: Box<Expr>,
    },
    Lambda(Lambda),
    Invoke {
        function: Box<Expr>,
        args: Vec<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `target` is `None` for static fields.
    FieldGet {
        target: Option<Box<Expr>>,
        field: FieldReference,
    },
    FieldSet {
        target: Option<Box<Expr>>,
        field: FieldReference,
        value: Box<Expr>,
    },
    New {
        ctor: ConstructorReference,
        args: Vec<Expr>,
    },
    /// `target` is `None` for static methods.
    Call {
        target: Option<Box<Expr>>,
        method: MethodReference,
        args: Vec<Expr>,
    },
}

// ── constructors ────────────────────────────────────────────────────

impl Expr {
    pub fn bool(value: bool) -> Self {
        Expr::Literal(Literal::Bool(value))
    }

    pub fn i32(value: i32) -> Self {
        Expr::Literal(Literal::I32(value))
    }

    pub fn i64(value: i64) -> Self {
        Expr::Literal(Literal::I64(value))
    }

    pub fn u32(value: u32) -> Self {
        Expr::Literal(Literal::U32(value))
    }

    pub fn u64(value: u64) -> Self {
        Expr::Literal(Literal::U64(value))
    }

    pub fn string(value: &str) -> Self {
        Expr::Literal(Literal::String(Arc::from(value)))
    }

    pub fn null(ty: TypeReference) -> Self {
        Expr::Literal(Literal::Null(ty))
    }

    pub fn var(name: impl Into<Symbol>) -> Self {
        Expr::Var(name.into())
    }

    pub fn assign(var: impl Into<Symbol>, value: Expr) -> Self {
        Expr::Assign {
            var: var.into(),
            value: Box::new(value),
        }
    }

    pub fn begin(exprs: Vec<Expr>) -> Self {
        Expr::Begin(exprs)
    }

    pub fn and(exprs: Vec<Expr>) -> Self {
        Expr::And(exprs)
    }

    pub fn or(exprs: Vec<Expr>) -> Self {
        Expr::Or(exprs)
    }

    pub fn if_(condition: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::If {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn switch(value: Expr, cases: Vec<(Vec<u32>, Expr)>, default: Expr) -> Self {
        Expr::Switch {
            value: Box::new(value),
            cases: cases
                .into_iter()
                .map(|(values, body)| SwitchCase {
                    values: values.into_iter().collect(),
                    body,
                })
                .collect(),
            default: Box::new(default),
        }
    }

    pub fn let_(bindings: Vec<(Symbol, Expr)>, body: Expr) -> Self {
        Expr::Let {
            bindings: bindings
                .into_iter()
                .map(|(name, value)| Binding { name, value })
                .collect(),
            body: Box::new(body),
        }
    }

    pub fn lambda(symbols: &SymbolGenerator, params: Vec<Param>, body: Expr) -> Self {
        Expr::Lambda(Lambda {
            closure: symbols.fresh_named("lambda"),
            params,
            body: Box::new(body),
        })
    }

    pub fn invoke(function: Expr, args: Vec<Expr>) -> Self {
        Expr::Invoke {
            function: Box::new(function),
            args,
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn field(target: Expr, field: impl Into<FieldReference>) -> Self {
        Expr::FieldGet {
            target: Some(Box::new(target)),
            field: field.into(),
        }
    }

    pub fn static_field(field: impl Into<FieldReference>) -> Self {
        Expr::FieldGet {
            target: None,
            field: field.into(),
        }
    }

    pub fn set_field(target: Expr, field: impl Into<FieldReference>, value: Expr) -> Self {
        Expr::FieldSet {
            target: Some(Box::new(target)),
            field: field.into(),
            value: Box::new(value),
        }
    }

    pub fn set_static_field(field: impl Into<FieldReference>, value: Expr) -> Self {
        Expr::FieldSet {
            target: None,
            field: field.into(),
            value: Box::new(value),
        }
    }

    pub fn new_object(ctor: impl Into<ConstructorReference>, args: Vec<Expr>) -> Self {
        Expr::New {
            ctor: ctor.into(),
            args,
        }
    }

    pub fn call(target: Expr, method: impl Into<MethodReference>, args: Vec<Expr>) -> Self {
        Expr::Call {
            target: Some(Box::new(target)),
            method: method.into(),
            args,
        }
    }

    pub fn call_static(method: impl Into<MethodReference>, args: Vec<Expr>) -> Self {
        Expr::Call {
            target: None,
            method: method.into(),
            args,
        }
    }

    /// Immediate sub-expressions, in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_) | Expr::Var(_) => Vec::new(),
            Expr::Assign { value, .. } => vec![&**value],
            Expr::Begin(exprs) | Expr::And(exprs) | Expr::Or(exprs) => exprs.iter().collect(),
            Expr::If {
                condition,
                then,
                otherwise,
            } => vec![&**condition, &**then, &**otherwise],
            Expr::Switch {
                value,
                cases,
                default,
            } => std::iter::once(&**value)
                .chain(cases.iter().map(|case| &case.body))
                .chain(std::iter::once(&**default))
                .collect(),
            Expr::Let { bindings, body } => bindings
                .iter()
                .map(|binding| &binding.value)
                .chain(std::iter::once(&**body))
                .collect(),
            Expr::Lambda(lambda) => vec![&*lambda.body],
            Expr::Invoke { function, args } => std::iter::once(&**function)
                .chain(args.iter())
                .collect(),
            Expr::Binary { left, right, .. } => vec![&**left, &**right],
            Expr::Unary { operand, .. } => vec![&**operand],
            Expr::FieldGet { target, .. } => target.iter().map(|t| &**t).collect(),
            Expr::FieldSet { target, value, .. } => target
                .iter()
                .map(|t| &**t)
                .chain(std::iter::once(&**value))
                .collect(),
            Expr::New { args, .. } => args.iter().collect(),
            Expr::Call { target, args, .. } => target
                .iter()
                .map(|t| &**t)
                .chain(args.iter())
                .collect(),
        }
    }

    /// Every key this expression refers to directly, excluding the
    /// synthesized closure types of nested lambdas.
    pub fn references(&self) -> BTreeSet<ItemKey> {
        let mut keys = BTreeSet::new();
        self.collect_references(&mut keys);
        keys
    }

    fn collect_references(&self, out: &mut BTreeSet<ItemKey>) {
        match self {
            Expr::Literal(Literal::Null(ty)) => ty.collect_keys(out),
            Expr::Lambda(lambda) => {
                for param in &lambda.params {
                    param.ty.collect_keys(out);
                }
            }
            Expr::FieldGet { field, .. } | Expr::FieldSet { field, .. } => {
                field.collect_keys(out)
            }
            Expr::New { ctor, .. } => ctor.collect_keys(out),
            Expr::Call { method, .. } => method.collect_keys(out),
            _ => {}
        }
        for child in self.children() {
            child.collect_references(out);
        }
    }
}

impl From<Literal> for Expr {
    fn from(literal: Literal) -> Self {
        Expr::Literal(literal)
    }
}
