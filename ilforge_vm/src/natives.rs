//! Methods the runtime implements itself.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use ilforge::metadata::{BuiltinMetadata, NamedTypeInfo};
use ilforge::TypeReference;
use rustc_hash::FxHashMap;

use crate::error::RuntimeError;
use crate::program::Ty;
use crate::value::{Object, Value};

pub const EXCEPTION: &str = "Exception";
pub const CONSOLE: &str = "Console";

/// Lines written by the program. Echoed to stdout when asked to.
#[derive(Debug, Default)]
pub struct Output {
    pub lines: Vec<String>,
    partial: String,
    echo: bool,
}

impl Output {
    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    fn write(&mut self, text: &str) {
        self.partial.push_str(text);
    }

    fn write_line(&mut self, text: &str) {
        let mut line = std::mem::take(&mut self.partial);
        line.push_str(text);
        if self.echo {
            println!("{line}");
        }
        self.lines.push(line);
    }
}

/// `args` always start with the receiver slot; it is `Null` for static
/// methods and for constructors invoked through `newobj`.
pub type NativeFn = fn(&mut Output, &[Value]) -> Result<Value, RuntimeError>;

#[derive(Clone, Copy)]
pub struct NativeDesc {
    pub name: &'static str,
    pub arity: u8,
    pub func: NativeFn,
}

impl NativeDesc {
    pub const fn new(name: &'static str, arity: u8, func: NativeFn) -> Self {
        Self { name, arity, func }
    }
}

pub fn default_natives() -> Vec<NativeDesc> {
    vec![
        NativeDesc::new("object::.ctor", 0, object_ctor),
        NativeDesc::new("object::ToString", 0, object_to_string),
        NativeDesc::new("Console::WriteLine", 1, console_write_line),
        NativeDesc::new("Console::Write", 1, console_write),
        NativeDesc::new("string::Concat", 2, string_concat),
        NativeDesc::new("string::get_Length", 0, string_length),
        NativeDesc::new("Exception::.ctor", 1, exception_ctor),
        NativeDesc::new("Exception::get_Message", 0, exception_message),
    ]
}

pub struct Natives {
    table: FxHashMap<&'static str, NativeDesc>,
}

impl Default for Natives {
    fn default() -> Self {
        let mut table = FxHashMap::default();
        for desc in default_natives() {
            table.insert(desc.name, desc);
        }
        Self { table }
    }
}

impl Natives {
    pub fn register(&mut self, desc: NativeDesc) {
        self.table.insert(desc.name, desc);
    }

    pub fn call(
        &self,
        name: &str,
        output: &mut Output,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let desc = self.table.get(name).ok_or_else(|| RuntimeError::MissingNative {
            name: name.to_string(),
        })?;
        // The receiver slot is not counted.
        if args.len() != usize::from(desc.arity) + 1 {
            return Err(RuntimeError::InvalidOperand {
                method: name.to_string(),
                detail: format!(
                    "expected {} arguments, got {}",
                    desc.arity,
                    args.len().saturating_sub(1)
                ),
            });
        }
        (desc.func)(output, args)
    }
}

/// Metadata for the named types the natives provide.
pub fn metadata() -> BuiltinMetadata {
    BuiltinMetadata::new()
        .with_type(
            EXCEPTION,
            NamedTypeInfo {
                base: Some(TypeReference::object()),
                ..NamedTypeInfo::default()
            },
        )
        .with_type(CONSOLE, NamedTypeInfo::default())
}

/// The message of a thrown value, for reporting uncaught exceptions.
pub fn describe_exception(value: &Value) -> String {
    match value {
        Value::Object(object) if object.ty == Ty::Named(Arc::from(EXCEPTION)) => {
            format!("{EXCEPTION}: {}", object.fields.borrow()[0])
        }
        other => format!("{other:?}"),
    }
}

fn string_arg(args: &[Value], index: usize) -> Result<Arc<str>, RuntimeError> {
    match &args[index] {
        Value::Str(s) => Ok(s.clone()),
        Value::Null => Ok(Arc::from("")),
        other => Err(RuntimeError::TypeConfusion {
            expected: "string",
            found: other.clone(),
        }),
    }
}

fn object_ctor(_: &mut Output, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Null)
}

fn object_to_string(_: &mut Output, args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Null => Err(RuntimeError::NullReference {
            context: "object::ToString".into(),
        }),
        receiver => Ok(Value::Str(Arc::from(receiver.to_string()))),
    }
}

fn console_write_line(out: &mut Output, args: &[Value]) -> Result<Value, RuntimeError> {
    out.write_line(&args[1].to_string());
    Ok(Value::Null)
}

fn console_write(out: &mut Output, args: &[Value]) -> Result<Value, RuntimeError> {
    out.write(&args[1].to_string());
    Ok(Value::Null)
}

fn string_concat(_: &mut Output, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut joined = string_arg(args, 1)?.to_string();
    joined.push_str(&string_arg(args, 2)?);
    Ok(Value::Str(Arc::from(joined)))
}

fn string_length(_: &mut Output, args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Null => Err(RuntimeError::NullReference {
            context: "string::get_Length".into(),
        }),
        _ => {
            let length = string_arg(args, 0)?.chars().count();
            Ok(Value::I32(i32::try_from(length).unwrap_or(i32::MAX)))
        }
    }
}

fn exception_ctor(_: &mut Output, args: &[Value]) -> Result<Value, RuntimeError> {
    let message = Value::Str(string_arg(args, 1)?);
    match &args[0] {
        Value::Null => Ok(Value::Object(Rc::new(Object {
            ty: Ty::Named(Arc::from(EXCEPTION)),
            fields: RefCell::new(vec![message]),
        }))),
        receiver => Ok(receiver.clone()),
    }
}

fn exception_message(_: &mut Output, args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Object(object) if object.ty == Ty::Named(Arc::from(EXCEPTION)) => {
            Ok(object.fields.borrow()[0].clone())
        }
        other => Err(RuntimeError::TypeConfusion {
            expected: "Exception",
            found: other.clone(),
        }),
    }
}
