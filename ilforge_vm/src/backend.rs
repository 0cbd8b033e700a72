//! The reference code-generation backend.
//!
//! Types, fields and methods are appended to a [`Program`]; bodies are
//! recorded as native instruction lists with resolved label targets.

use std::rc::Rc;
use std::sync::Arc;

use ilforge::attributes::{MethodAttributes, TypeAttributes};
use ilforge::backend::{
    ConstructorSignature, FieldSignature, IlSink, MethodSignature, NativeOp, PropertySignature,
};
use ilforge::{Backend, BuildError, BuildResult, PrimitiveType};

use crate::program::{
    Code, FieldId, FieldInfo, Handler, HandlerKind, LabelId, LocalId, MethodId, MethodInfo,
    MethodKind, Op, Program, PropertyId, PropertyInfo, Region, Ty, TypeId, TypeInfo,
};

pub const CONSTRUCTOR: &str = ".ctor";

#[derive(Debug, Default)]
pub struct VmBackend {
    pub program: Program,
}

impl VmBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_program(self) -> Program {
        self.program
    }

    fn defined<'a>(&'a mut self, ty: &Ty, action: &str) -> BuildResult<&'a mut TypeInfo> {
        let Ty::Defined(id) = ty else {
            return Err(BuildError::backend(format!(
                "cannot {action} on runtime type {ty:?}"
            )));
        };
        let info = &mut self.program.types[id.index];
        if info.layout.is_some() {
            return Err(BuildError::backend(format!(
                "cannot {action} on finalized type {}",
                info.name
            )));
        }
        Ok(info)
    }

    /// Registers a runtime-provided method once per signature.
    fn native_method(&mut self, info: MethodInfo) -> MethodId {
        let known = self.program.methods.iter().position(|method| {
            matches!(method.kind, MethodKind::Native)
                && method.owner == info.owner
                && method.name == info.name
                && method.params == info.params
                && method.is_static == info.is_static
        });
        match known {
            Some(index) => MethodId {
                index,
                name: Arc::from(format!("{:?}::{}", info.owner, info.name)),
            },
            None => self.add_method(info),
        }
    }

    fn add_method(&mut self, info: MethodInfo) -> MethodId {
        let id = MethodId {
            index: self.program.methods.len(),
            name: Arc::from(format!("{:?}::{}", info.owner, info.name)),
        };
        if let Ty::Defined(owner) = &info.owner {
            self.program.types[owner.index].methods.push(id.clone());
        }
        self.program.methods.push(info);
        id
    }

    fn set_body(&mut self, method: &MethodId, body: CodeBuilder) -> BuildResult<()> {
        let code = body.finish()?;
        let info = &mut self.program.methods[method.index];
        match &info.kind {
            MethodKind::Defined(None) => {
                log::debug!("body of {method:?}: {} ops", code.ops.len());
                info.kind = MethodKind::Defined(Some(Rc::new(code)));
                Ok(())
            }
            _ => Err(BuildError::backend(format!(
                "method {method:?} cannot take a body"
            ))),
        }
    }
}

impl Backend for VmBackend {
    type Type = Ty;
    type CompletedType = TypeId;
    type Field = FieldId;
    type Method = MethodId;
    type Constructor = MethodId;
    type Property = PropertyId;
    type Label = LabelId;
    type Local = LocalId;
    type Body = CodeBuilder;

    fn primitive_type(&mut self, primitive: PrimitiveType) -> BuildResult<Ty> {
        Ok(Ty::Primitive(primitive))
    }

    fn named_type(&mut self, name: &str) -> BuildResult<Ty> {
        // A defined type may be reached by name too.
        Ok(match self.program.find_type(name) {
            Some(id) => Ty::Defined(id),
            None => Ty::Named(Arc::from(name)),
        })
    }

    fn cell_type(&mut self, content: &Ty) -> BuildResult<Ty> {
        Ok(Ty::Cell(Box::new(content.clone())))
    }

    fn delegate_type(&mut self, params: &[Ty], ret: &Ty) -> BuildResult<Ty> {
        Ok(Ty::Delegate(params.to_vec(), Box::new(ret.clone())))
    }

    fn existing_method(
        &mut self,
        owner: &Ty,
        name: &str,
        params: &[Ty],
        ret: &Ty,
        is_instance: bool,
    ) -> BuildResult<MethodId> {
        if let Ty::Defined(id) = owner {
            return self.program.find_method(id, name, params).ok_or_else(|| {
                BuildError::backend(format!("{owner:?} has no method {name}"))
            });
        }
        Ok(self.native_method(MethodInfo {
            owner: owner.clone(),
            name: Arc::from(name),
            params: params.to_vec(),
            ret: ret.clone(),
            is_static: !is_instance,
            is_virtual: false,
            kind: MethodKind::Native,
        }))
    }

    fn existing_constructor(&mut self, owner: &Ty, params: &[Ty]) -> BuildResult<MethodId> {
        if let Ty::Defined(id) = owner {
            return self
                .program
                .find_method(id, CONSTRUCTOR, params)
                .ok_or_else(|| BuildError::backend(format!("{owner:?} has no such constructor")));
        }
        Ok(self.native_method(MethodInfo {
            owner: owner.clone(),
            name: Arc::from(CONSTRUCTOR),
            params: params.to_vec(),
            ret: Ty::Primitive(PrimitiveType::Void),
            is_static: false,
            is_virtual: false,
            kind: MethodKind::Native,
        }))
    }

    fn existing_field(
        &mut self,
        owner: &Ty,
        name: &str,
        field_type: &Ty,
        is_instance: bool,
    ) -> BuildResult<FieldId> {
        if let Ty::Defined(id) = owner {
            let found = self
                .program
                .ty(id)
                .fields
                .iter()
                .find(|field| &*self.program.field(field).name == name)
                .cloned();
            return found
                .ok_or_else(|| BuildError::backend(format!("{owner:?} has no field {name}")));
        }
        Err(BuildError::backend(format!(
            "runtime type {owner:?} exposes no field {name}: {field_type:?} (instance: {is_instance})"
        )))
    }

    fn define_type(
        &mut self,
        name: &str,
        attributes: TypeAttributes,
        base: Option<&Ty>,
        interfaces: &[Ty],
    ) -> BuildResult<Ty> {
        if self.program.find_type(name).is_some() {
            return Err(BuildError::backend(format!("type {name} defined twice")));
        }
        let id = TypeId {
            index: self.program.types.len(),
            name: Arc::from(name),
        };
        self.program.types.push(TypeInfo {
            name: id.name.clone(),
            attributes,
            base: base.cloned(),
            interfaces: interfaces.to_vec(),
            fields: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            layout: None,
        });
        log::debug!("defined type {name}");
        Ok(Ty::Defined(id))
    }

    fn finalize_type(&mut self, ty: &Ty) -> BuildResult<TypeId> {
        let Ty::Defined(id) = ty else {
            return Err(BuildError::backend(format!("cannot finalize {ty:?}")));
        };
        let info = self.program.ty(id);
        let mut layout = match &info.base {
            Some(Ty::Defined(base)) => self.program.ty(base).layout.clone().ok_or_else(|| {
                BuildError::backend(format!("base {base:?} of {id:?} is not finalized"))
            })?,
            _ => Vec::new(),
        };
        let is_abstract = info
            .attributes
            .intersects(TypeAttributes::ABSTRACT | TypeAttributes::INTERFACE);
        for method in &info.methods {
            match self.program.method(method).kind {
                MethodKind::Defined(None) => {
                    return Err(BuildError::backend(format!("{method:?} has no body")));
                }
                MethodKind::Abstract if !is_abstract => {
                    return Err(BuildError::backend(format!(
                        "concrete type {id:?} has abstract method {method:?}"
                    )));
                }
                _ => {}
            }
        }
        let own: Vec<FieldId> = info
            .fields
            .iter()
            .filter(|field| !self.program.field(field).is_static)
            .cloned()
            .collect();
        for field in own {
            self.program.fields[field.index].slot = Some(layout.len());
            layout.push(field);
        }
        self.program.types[id.index].layout = Some(layout);
        Ok(id.clone())
    }

    fn define_field(
        &mut self,
        owner: &Ty,
        signature: FieldSignature<Self>,
    ) -> BuildResult<FieldId> {
        let index = self.program.fields.len();
        let info = self.defined(owner, "define a field")?;
        let id = FieldId {
            index,
            name: Arc::from(format!("{}::{}", info.name, signature.name)),
        };
        info.fields.push(id.clone());
        self.program.fields.push(FieldInfo {
            owner: owner.clone(),
            name: signature.name,
            ty: signature.field_type,
            is_static: signature
                .attributes
                .contains(ilforge::attributes::FieldAttributes::STATIC),
            slot: None,
        });
        Ok(id)
    }

    fn define_method(
        &mut self,
        owner: &Ty,
        signature: MethodSignature<Self>,
    ) -> BuildResult<MethodId> {
        let interface = self
            .defined(owner, "define a method")?
            .attributes
            .contains(TypeAttributes::INTERFACE);
        let attributes = signature.attributes;
        let is_abstract = interface || attributes.contains(MethodAttributes::ABSTRACT);
        Ok(self.add_method(MethodInfo {
            owner: owner.clone(),
            name: signature.name,
            params: signature.params,
            ret: signature.return_type,
            is_static: attributes.contains(MethodAttributes::STATIC),
            is_virtual: interface
                || attributes.intersects(MethodAttributes::VIRTUAL | MethodAttributes::ABSTRACT),
            kind: if is_abstract {
                MethodKind::Abstract
            } else {
                MethodKind::Defined(None)
            },
        }))
    }

    fn define_constructor(
        &mut self,
        owner: &Ty,
        signature: ConstructorSignature<Self>,
    ) -> BuildResult<MethodId> {
        self.defined(owner, "define a constructor")?;
        Ok(self.add_method(MethodInfo {
            owner: owner.clone(),
            name: Arc::from(CONSTRUCTOR),
            params: signature.params,
            ret: Ty::Primitive(PrimitiveType::Void),
            is_static: false,
            is_virtual: false,
            kind: MethodKind::Defined(None),
        }))
    }

    fn define_property(
        &mut self,
        owner: &Ty,
        signature: PropertySignature<Self>,
    ) -> BuildResult<PropertyId> {
        let index = self.program.properties.len();
        let info = self.defined(owner, "define a property")?;
        let id = PropertyId {
            index,
            name: Arc::from(format!("{}::{}", info.name, signature.name)),
        };
        info.properties.push(id.clone());
        self.program.properties.push(PropertyInfo {
            owner: owner.clone(),
            name: signature.name,
            ty: signature.property_type,
            getter: signature.getter,
            setter: signature.setter,
        });
        Ok(id)
    }

    fn begin_body(&mut self) -> CodeBuilder {
        CodeBuilder::default()
    }

    fn method_body(&mut self, method: &MethodId, body: CodeBuilder) -> BuildResult<()> {
        self.set_body(method, body)
    }

    fn constructor_body(&mut self, ctor: &MethodId, body: CodeBuilder) -> BuildResult<()> {
        self.set_body(ctor, body)
    }
}

// ── bodies ─────────────────────────────────────────────────────────

struct OpenRegion {
    try_start: usize,
    try_end: Option<usize>,
    end: LabelId,
    handlers: Vec<Handler>,
}

impl OpenRegion {
    fn close_handler(&mut self, pc: usize) {
        if let Some(handler) = self.handlers.last_mut() {
            handler.end = pc;
        }
    }
}

/// Collects one body; labels resolve when the body is finished.
#[derive(Default)]
pub struct CodeBuilder {
    ops: Vec<Op>,
    labels: Vec<Option<usize>>,
    locals: Vec<Ty>,
    open: Vec<OpenRegion>,
    regions: Vec<Region>,
}

impl CodeBuilder {
    fn pc(&self) -> usize {
        self.ops.len()
    }

    fn current(&mut self) -> BuildResult<&mut OpenRegion> {
        self.open
            .last_mut()
            .ok_or_else(|| BuildError::backend("handler outside of a protected region"))
    }

    /// Ends the protected block or handler that is running.
    fn leave_block(&mut self) -> BuildResult<()> {
        let region = self.current()?;
        let end = region.end;
        let in_finally = region
            .handlers
            .last()
            .is_some_and(|handler| handler.kind == HandlerKind::Finally);
        self.ops.push(if in_finally {
            Op::EndFinally
        } else {
            Op::Native(NativeOp::Leave(end))
        });
        let pc = self.pc();
        let region = self.current()?;
        if region.try_end.is_none() {
            region.try_end = Some(pc);
        }
        region.close_handler(pc);
        Ok(())
    }

    fn begin_handler(&mut self, kind: HandlerKind) -> BuildResult<()> {
        self.leave_block()?;
        let pc = self.pc();
        self.current()?.handlers.push(Handler {
            kind,
            start: pc,
            end: pc,
        });
        Ok(())
    }

    pub fn finish(self) -> BuildResult<Code> {
        if !self.open.is_empty() {
            return Err(BuildError::backend("protected region left open"));
        }
        let labels = self
            .labels
            .iter()
            .enumerate()
            .map(|(index, target)| {
                target.ok_or_else(|| BuildError::backend(format!("label L{index} never marked")))
            })
            .collect::<BuildResult<Vec<_>>>()?;
        Ok(Code {
            ops: self.ops,
            labels,
            locals: self.locals,
            regions: self.regions,
        })
    }
}

impl IlSink<VmBackend> for CodeBuilder {
    fn define_label(&mut self) -> LabelId {
        self.labels.push(None);
        LabelId(self.labels.len() - 1)
    }

    fn mark_label(&mut self, label: &LabelId) -> BuildResult<()> {
        let pc = self.pc();
        match self.labels.get_mut(label.0) {
            Some(slot @ None) => {
                *slot = Some(pc);
                Ok(())
            }
            Some(Some(_)) => Err(BuildError::backend(format!("{label:?} marked twice"))),
            None => Err(BuildError::backend(format!("{label:?} was never defined"))),
        }
    }

    fn declare_local(&mut self, ty: &Ty) -> BuildResult<LocalId> {
        self.locals.push(ty.clone());
        Ok(LocalId(self.locals.len() - 1))
    }

    fn begin_try(&mut self) -> BuildResult<LabelId> {
        let end = self.define_label();
        self.open.push(OpenRegion {
            try_start: self.pc(),
            try_end: None,
            end,
            handlers: Vec::new(),
        });
        Ok(end)
    }

    fn begin_catch(&mut self, exception: &Ty) -> BuildResult<()> {
        self.begin_handler(HandlerKind::Catch(exception.clone()))
    }

    fn begin_finally(&mut self) -> BuildResult<()> {
        self.begin_handler(HandlerKind::Finally)
    }

    fn end_try(&mut self) -> BuildResult<()> {
        if self.current()?.handlers.is_empty() {
            return Err(BuildError::backend("protected region without handlers"));
        }
        self.leave_block()?;
        let pc = self.pc();
        let region = self
            .open
            .pop()
            .ok_or_else(|| BuildError::backend("no protected region to end"))?;
        self.labels[region.end.0] = Some(pc);
        self.regions.push(Region {
            try_start: region.try_start,
            try_end: region.try_end.unwrap_or(pc),
            handlers: region.handlers,
        });
        Ok(())
    }

    fn emit(&mut self, op: NativeOp<VmBackend>) -> BuildResult<()> {
        let targets: &[LabelId] = match &op {
            NativeOp::Branch(_, label) | NativeOp::Leave(label) => std::slice::from_ref(label),
            NativeOp::Switch(labels) => labels.as_slice(),
            _ => &[],
        };
        if let Some(label) = targets.iter().find(|label| label.0 >= self.labels.len()) {
            return Err(BuildError::backend(format!("{label:?} was never defined")));
        }
        self.ops.push(Op::Native(op));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilforge::ir::{BranchKind, Opcode};

    #[test]
    fn try_catch_records_region_bounds() {
        let mut body = CodeBuilder::default();
        let end = body.begin_try().unwrap();
        body.emit(NativeOp::Op(Opcode::Nop)).unwrap();
        body.begin_catch(&Ty::Named("Exception".into())).unwrap();
        body.emit(NativeOp::Op(Opcode::Pop)).unwrap();
        body.end_try().unwrap();
        body.emit(NativeOp::Op(Opcode::Ret)).unwrap();
        let code = body.finish().unwrap();

        // nop, leave, pop, leave, ret
        assert_eq!(code.ops.len(), 5);
        assert_eq!(code.labels[end.0], 4);
        let region = &code.regions[0];
        assert_eq!((region.try_start, region.try_end), (0, 2));
        assert_eq!((region.handlers[0].start, region.handlers[0].end), (2, 4));
    }

    #[test]
    fn handler_without_region_fails() {
        let mut body = CodeBuilder::default();
        assert!(body.begin_finally().is_err());
        assert!(body.end_try().is_err());
    }

    #[test]
    fn unmarked_label_fails_to_finish() {
        let mut body = CodeBuilder::default();
        let label = body.define_label();
        body.emit(NativeOp::Branch(BranchKind::Always, label)).unwrap();
        assert!(body.finish().is_err());
    }

    #[test]
    fn finalize_lays_out_inherited_fields_first() {
        let mut backend = VmBackend::new();
        let base = backend
            .define_type("Base", TypeAttributes::PUBLIC, None, &[])
            .unwrap();
        let i32_ty = Ty::Primitive(PrimitiveType::I32);
        let a = backend
            .define_field(
                &base,
                FieldSignature {
                    name: "a".into(),
                    attributes: Default::default(),
                    field_type: i32_ty.clone(),
                },
            )
            .unwrap();
        backend.finalize_type(&base).unwrap();
        let derived = backend
            .define_type("Derived", TypeAttributes::PUBLIC, Some(&base), &[])
            .unwrap();
        let b = backend
            .define_field(
                &derived,
                FieldSignature {
                    name: "b".into(),
                    attributes: Default::default(),
                    field_type: i32_ty,
                },
            )
            .unwrap();
        let id = backend.finalize_type(&derived).unwrap();
        assert_eq!(backend.program.ty(&id).layout, Some(vec![a, b.clone()]));
        assert_eq!(backend.program.field(&b).slot, Some(1));
        assert!(backend.define_field(&derived, FieldSignature {
            name: "c".into(),
            attributes: Default::default(),
            field_type: Ty::object(),
        }).is_err());
    }
}
