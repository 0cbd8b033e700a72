//! A backend that records what it is asked to do, for unit tests.

use std::fmt;

use crate::attributes::TypeAttributes;
use crate::backend::{
    Backend, ConstructorSignature, FieldSignature, IlSink, MethodSignature, NativeOp,
    PropertySignature,
};
use crate::error::{BuildError, BuildResult};
use crate::reference::PrimitiveType;

#[derive(Clone, PartialEq, Eq)]
pub struct Handle(pub String);

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn handle(name: impl Into<String>) -> Handle {
    Handle(name.into())
}

fn list(types: &[Handle]) -> String {
    types.iter().map(|t| t.0.as_str()).collect::<Vec<_>>().join(", ")
}

#[derive(Default)]
pub struct RecordingBackend {
    /// Definition calls in the order they happened.
    pub events: Vec<String>,
    /// Emitted bodies keyed by member name.
    pub bodies: Vec<(String, Vec<String>)>,
}

#[derive(Default)]
pub struct RecordingBody {
    pub lines: Vec<String>,
    labels: usize,
    locals: usize,
}

impl RecordingBackend {
    pub fn body(&self, member: &str) -> Option<&[String]> {
        self.bodies
            .iter()
            .find(|(name, _)| name == member)
            .map(|(_, lines)| lines.as_slice())
    }
}

impl Backend for RecordingBackend {
    type Type = Handle;
    type CompletedType = Handle;
    type Field = Handle;
    type Method = Handle;
    type Constructor = Handle;
    type Property = Handle;
    type Label = Handle;
    type Local = Handle;
    type Body = RecordingBody;

    fn primitive_type(&mut self, primitive: PrimitiveType) -> BuildResult<Handle> {
        Ok(handle(primitive.name()))
    }

    fn named_type(&mut self, name: &str) -> BuildResult<Handle> {
        if name.is_empty() {
            return Err(BuildError::backend("empty type name"));
        }
        Ok(handle(name))
    }

    fn cell_type(&mut self, content: &Handle) -> BuildResult<Handle> {
        Ok(handle(format!("cell<{}>", content.0)))
    }

    fn delegate_type(&mut self, params: &[Handle], ret: &Handle) -> BuildResult<Handle> {
        Ok(handle(format!("fn({}) -> {}", list(params), ret.0)))
    }

    fn existing_method(
        &mut self,
        owner: &Handle,
        name: &str,
        _params: &[Handle],
        _ret: &Handle,
        _is_instance: bool,
    ) -> BuildResult<Handle> {
        Ok(handle(format!("{}::{name}", owner.0)))
    }

    fn existing_constructor(
        &mut self,
        owner: &Handle,
        _params: &[Handle],
    ) -> BuildResult<Handle> {
        Ok(handle(format!("{}::.ctor", owner.0)))
    }

    fn existing_field(
        &mut self,
        owner: &Handle,
        name: &str,
        _field_type: &Handle,
        _is_instance: bool,
    ) -> BuildResult<Handle> {
        Ok(handle(format!("{}::{name}", owner.0)))
    }

    fn define_type(
        &mut self,
        name: &str,
        _attributes: TypeAttributes,
        base: Option<&Handle>,
        interfaces: &[Handle],
    ) -> BuildResult<Handle> {
        let base = base.map(|b| b.0.as_str()).unwrap_or("-");
        self.events
            .push(format!("define type {name} : {base} [{}]", list(interfaces)));
        Ok(handle(name))
    }

    fn finalize_type(&mut self, ty: &Handle) -> BuildResult<Handle> {
        self.events.push(format!("finalize {}", ty.0));
        Ok(handle(format!("{}!", ty.0)))
    }

    fn define_field(
        &mut self,
        owner: &Handle,
        signature: FieldSignature<Self>,
    ) -> BuildResult<Handle> {
        let name = format!("{}::{}", owner.0, signature.name);
        self.events
            .push(format!("define field {name}: {}", signature.field_type.0));
        Ok(handle(name))
    }

    fn define_method(
        &mut self,
        owner: &Handle,
        signature: MethodSignature<Self>,
    ) -> BuildResult<Handle> {
        let name = format!("{}::{}", owner.0, signature.name);
        self.events.push(format!(
            "define method {name}({}) -> {}",
            list(&signature.params),
            signature.return_type.0
        ));
        Ok(handle(name))
    }

    fn define_constructor(
        &mut self,
        owner: &Handle,
        signature: ConstructorSignature<Self>,
    ) -> BuildResult<Handle> {
        let name = format!("{}::.ctor", owner.0);
        self.events
            .push(format!("define constructor {name}({})", list(&signature.params)));
        Ok(handle(name))
    }

    fn define_property(
        &mut self,
        owner: &Handle,
        signature: PropertySignature<Self>,
    ) -> BuildResult<Handle> {
        let name = format!("{}::{}", owner.0, signature.name);
        self.events.push(format!("define property {name}"));
        Ok(handle(name))
    }

    fn begin_body(&mut self) -> RecordingBody {
        RecordingBody::default()
    }

    fn method_body(&mut self, method: &Handle, body: RecordingBody) -> BuildResult<()> {
        self.events.push(format!("body {}", method.0));
        self.bodies.push((method.0.clone(), body.lines));
        Ok(())
    }

    fn constructor_body(&mut self, ctor: &Handle, body: RecordingBody) -> BuildResult<()> {
        self.events.push(format!("body {}", ctor.0));
        self.bodies.push((ctor.0.clone(), body.lines));
        Ok(())
    }
}

impl IlSink<RecordingBackend> for RecordingBody {
    fn define_label(&mut self) -> Handle {
        let label = handle(format!("L{}", self.labels));
        self.labels += 1;
        label
    }

    fn mark_label(&mut self, label: &Handle) -> BuildResult<()> {
        self.lines.push(format!("{}:", label.0));
        Ok(())
    }

    fn declare_local(&mut self, ty: &Handle) -> BuildResult<Handle> {
        let local = handle(self.locals.to_string());
        self.lines.push(format!("local {}: {}", self.locals, ty.0));
        self.locals += 1;
        Ok(local)
    }

    fn begin_try(&mut self) -> BuildResult<Handle> {
        let end = self.define_label();
        self.lines.push(format!(".try {}", end.0));
        Ok(end)
    }

    fn begin_catch(&mut self, exception: &Handle) -> BuildResult<()> {
        self.lines.push(format!(".catch {}", exception.0));
        Ok(())
    }

    fn begin_finally(&mut self) -> BuildResult<()> {
        self.lines.push(".finally".to_string());
        Ok(())
    }

    fn end_try(&mut self) -> BuildResult<()> {
        self.lines.push(".end".to_string());
        Ok(())
    }

    fn emit(&mut self, op: NativeOp<RecordingBackend>) -> BuildResult<()> {
        self.lines.push(format!("{op:?}"));
        Ok(())
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
