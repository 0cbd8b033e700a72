use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::program::{MethodId, Ty};

pub struct Object {
    pub ty: Ty,
    pub fields: RefCell<Vec<Value>>,
}

pub struct Delegate {
    pub target: Value,
    pub method: MethodId,
}

/// A stack value. Integers narrower than 64 bits travel as `I32`.
#[derive(Clone)]
pub enum Value {
    Null,
    I32(i32),
    I64(i64),
    F64(f64),
    Str(Arc<str>),
    Object(Rc<Object>),
    Cell(Rc<RefCell<Value>>),
    Delegate(Rc<Delegate>),
    /// A boxed value-type value.
    Boxed(Ty, Rc<Value>),
}

impl Value {
    pub fn bool(value: bool) -> Self {
        Value::I32(i32::from(value))
    }

    /// The zero value a slot of type `ty` starts with.
    pub fn default_for(ty: &Ty) -> Self {
        use ilforge::PrimitiveType as P;
        match ty {
            Ty::Primitive(P::I64 | P::U64) => Value::I64(0),
            Ty::Primitive(P::F32 | P::F64) => Value::F64(0.0),
            Ty::Primitive(P::String | P::Object | P::Void) => Value::Null,
            Ty::Primitive(_) => Value::I32(0),
            _ => Value::Null,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::I32(v) => *v != 0,
            Value::I64(v) => *v != 0,
            Value::F64(v) => *v != 0.0,
            _ => true,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::I32(_) => "int32",
            Value::I64(_) => "int64",
            Value::F64(_) => "float",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::Cell(_) => "cell",
            Value::Delegate(_) => "delegate",
            Value::Boxed(..) => "boxed value",
        }
    }

    pub fn same_reference(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Cell(a), Value::Cell(b)) => Rc::ptr_eq(a, b),
            (Value::Delegate(a), Value::Delegate(b)) => Rc::ptr_eq(a, b),
            (Value::Boxed(_, a), Value::Boxed(_, b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            _ => self.same_reference(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
            Value::Object(object) => write!(f, "{:?}", object.ty),
            Value::Cell(cell) => write!(f, "{}", cell.borrow()),
            Value::Delegate(delegate) => write!(f, "{:?}", delegate.method),
            Value::Boxed(_, value) => write!(f, "{value}"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Str(s) => write!(f, "{s:?}"),
            other => write!(f, "{}({other})", other.kind()),
        }
    }
}
