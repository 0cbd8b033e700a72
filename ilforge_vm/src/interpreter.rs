use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use ilforge::attributes::TypeAttributes;
use ilforge::ir::{BranchKind, Opcode, TypeOp};
use ilforge::{NativeOp, PrimitiveType};
use rustc_hash::FxHashMap;

use crate::error::RuntimeError;
use crate::natives::{describe_exception, NativeDesc, Natives, Output};
use crate::program::{
    Code, FieldId, HandlerKind, LabelId, MethodId, MethodKind, Op, Program, Ty,
};
use crate::value::{Delegate, Object, Value};

pub const MAX_FRAMES: usize = 512;

enum Resume {
    /// Continue a `leave` towards this instruction.
    Continue(usize),
    Rethrow(Value),
}

/// What to do once the finally handler covering `within` completes.
struct Pending {
    within: Range<usize>,
    resume: Resume,
}

enum OnReturn {
    Discard,
    Push,
    /// Constructors invoked through `newobj` yield the new object.
    Object(Value),
}

struct Frame {
    method: MethodId,
    code: Rc<Code>,
    pc: usize,
    args: Vec<Value>,
    locals: Vec<Value>,
    stack: Vec<Value>,
    pending: Vec<Pending>,
    returns_value: bool,
    on_return: OnReturn,
}

impl Frame {
    fn underflow(&self) -> RuntimeError {
        RuntimeError::StackUnderflow {
            method: self.method.name().to_string(),
        }
    }

    fn bad_operand(&self, detail: impl Into<String>) -> RuntimeError {
        RuntimeError::InvalidOperand {
            method: self.method.name().to_string(),
            detail: detail.into(),
        }
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or_else(|| self.underflow())
    }

    fn pop_n(&mut self, count: usize) -> Result<Vec<Value>, RuntimeError> {
        let split = self
            .stack
            .len()
            .checked_sub(count)
            .ok_or_else(|| self.underflow())?;
        Ok(self.stack.split_off(split))
    }

    fn pop_i32(&mut self) -> Result<i32, RuntimeError> {
        match self.pop()? {
            Value::I32(v) => Ok(v),
            found => Err(RuntimeError::TypeConfusion {
                expected: "int32",
                found,
            }),
        }
    }

    fn arg(&mut self, index: u16) -> Result<&mut Value, RuntimeError> {
        let index = usize::from(index);
        if index >= self.args.len() {
            return Err(self.bad_operand(format!("no argument {index}")));
        }
        Ok(&mut self.args[index])
    }

    fn local(&mut self, index: usize) -> Result<&mut Value, RuntimeError> {
        if index >= self.locals.len() {
            return Err(self.bad_operand(format!("no local {index}")));
        }
        Ok(&mut self.locals[index])
    }

    fn target(&self, label: LabelId) -> Result<usize, RuntimeError> {
        self.code
            .labels
            .get(label.0)
            .copied()
            .ok_or_else(|| self.bad_operand(format!("unknown label {label:?}")))
    }
}

enum Flow {
    Next,
    Return(Value),
    Invoke {
        method: MethodId,
        args: Vec<Value>,
        on_return: OnReturn,
        tail: bool,
    },
    Throw(Value),
}

enum HandlerTarget {
    Catch(usize),
    Finally(Range<usize>),
}

/// Executes methods of a built [`Program`].
pub struct Interpreter<'p> {
    program: &'p Program,
    natives: Natives,
    statics: FxHashMap<usize, Value>,
    output: Output,
}

impl<'p> Interpreter<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self {
            program,
            natives: Natives::default(),
            statics: FxHashMap::default(),
            output: Output::default(),
        }
    }

    /// Also prints every written line to stdout.
    pub fn echoing(mut self) -> Self {
        self.output = Output::echoing();
        self
    }

    pub fn register_native(&mut self, desc: NativeDesc) {
        self.natives.register(desc);
    }

    pub fn output(&self) -> &[String] {
        &self.output.lines
    }

    pub fn call(&mut self, method: &MethodId, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let on_return = self.on_return_for(method);
        self.enter(method.clone(), args, on_return)
    }

    pub fn construct(
        &mut self,
        ctor: &MethodId,
        mut args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let info = self.program.method(ctor);
        let on_return = if matches!(info.kind, MethodKind::Native) {
            args.insert(0, Value::Null);
            OnReturn::Push
        } else {
            let object = self.allocate(&info.owner)?;
            args.insert(0, object.clone());
            OnReturn::Object(object)
        };
        self.enter(ctor.clone(), args, on_return)
    }

    /// Calls the first method named `method` declared on `type_name`.
    pub fn run_static(
        &mut self,
        type_name: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let program = self.program;
        let ty = program
            .find_type(type_name)
            .ok_or_else(|| RuntimeError::UnknownType {
                name: type_name.to_string(),
            })?;
        let id = program
            .ty(&ty)
            .methods
            .iter()
            .find(|id| &*program.method(id).name == method)
            .cloned()
            .ok_or_else(|| RuntimeError::MissingBody {
                name: format!("{type_name}::{method}"),
            })?;
        self.call(&id, args)
    }

    fn enter(
        &mut self,
        method: MethodId,
        args: Vec<Value>,
        on_return: OnReturn,
    ) -> Result<Value, RuntimeError> {
        let mut frames = Vec::new();
        match self.invoke(&mut frames, method, args, on_return, false)? {
            Some(value) => Ok(value),
            None => self.run(&mut frames),
        }
    }

    fn run(&mut self, frames: &mut Vec<Frame>) -> Result<Value, RuntimeError> {
        loop {
            let Some(frame) = frames.last_mut() else {
                return Ok(Value::Null);
            };
            match self.step(frame)? {
                Flow::Next => {}
                Flow::Return(value) => {
                    if let Some(result) = Self::finish_frame(frames, value) {
                        return Ok(result);
                    }
                }
                Flow::Invoke {
                    method,
                    args,
                    on_return,
                    tail,
                } => {
                    if let Some(result) = self.invoke(frames, method, args, on_return, tail)? {
                        return Ok(result);
                    }
                }
                Flow::Throw(exception) => self.unwind(frames, exception)?,
            }
        }
    }

    fn on_return_for(&self, method: &MethodId) -> OnReturn {
        if self.program.method(method).ret.is_void() {
            OnReturn::Discard
        } else {
            OnReturn::Push
        }
    }

    /// Pops the top frame and hands `value` to its caller. Yields the
    /// result once no frames remain.
    fn finish_frame(frames: &mut Vec<Frame>, value: Value) -> Option<Value> {
        let frame = frames.pop()?;
        let result = match frame.on_return {
            OnReturn::Discard => None,
            OnReturn::Push => Some(value),
            OnReturn::Object(object) => Some(object),
        };
        match frames.last_mut() {
            Some(caller) => {
                caller.stack.extend(result);
                None
            }
            None => Some(result.unwrap_or(Value::Null)),
        }
    }

    fn invoke(
        &mut self,
        frames: &mut Vec<Frame>,
        method: MethodId,
        mut args: Vec<Value>,
        mut on_return: OnReturn,
        tail: bool,
    ) -> Result<Option<Value>, RuntimeError> {
        let program = self.program;
        let info = program.method(&method);
        match &info.kind {
            MethodKind::Native => {
                if info.is_static {
                    args.insert(0, Value::Null);
                }
                let value = self.natives.call(method.name(), &mut self.output, &args)?;
                let result = match on_return {
                    OnReturn::Discard => None,
                    OnReturn::Push => Some(value),
                    OnReturn::Object(object) => Some(object),
                };
                if tail && !frames.is_empty() {
                    return Ok(Self::finish_frame(frames, result.unwrap_or(Value::Null)));
                }
                match frames.last_mut() {
                    Some(frame) => {
                        frame.stack.extend(result);
                        Ok(None)
                    }
                    None => Ok(Some(result.unwrap_or(Value::Null))),
                }
            }
            MethodKind::Defined(Some(code)) => {
                if args.len() != info.arity() {
                    return Err(RuntimeError::InvalidOperand {
                        method: method.name().to_string(),
                        detail: format!("expected {} arguments, got {}", info.arity(), args.len()),
                    });
                }
                if tail {
                    if let Some(replaced) = frames.pop() {
                        on_return = replaced.on_return;
                    }
                }
                if frames.len() >= MAX_FRAMES {
                    return Err(RuntimeError::StackOverflow);
                }
                log::trace!("enter {method:?} at depth {}", frames.len());
                frames.push(Frame {
                    code: code.clone(),
                    pc: 0,
                    args,
                    locals: code.locals.iter().map(Value::default_for).collect(),
                    stack: Vec::new(),
                    pending: Vec::new(),
                    returns_value: !info.ret.is_void(),
                    on_return,
                    method,
                });
                Ok(None)
            }
            MethodKind::Defined(None) | MethodKind::Abstract => Err(RuntimeError::MissingBody {
                name: method.name().to_string(),
            }),
        }
    }

    fn step(&mut self, frame: &mut Frame) -> Result<Flow, RuntimeError> {
        let program = self.program;
        let code = frame.code.clone();
        let pc = frame.pc;
        let Some(op) = code.ops.get(pc) else {
            return Err(frame.bad_operand("execution ran past the end of the body"));
        };
        frame.pc += 1;
        let op = match op {
            Op::Native(op) => op,
            Op::EndFinally => return Ok(Self::end_finally(frame, pc)),
        };
        match op {
            NativeOp::Op(opcode) => return self.opcode(frame, *opcode),
            NativeOp::LoadI32(v) => frame.push(Value::I32(*v)),
            NativeOp::LoadI64(v) => frame.push(Value::I64(*v)),
            NativeOp::LoadF64(v) => frame.push(Value::F64(*v)),
            NativeOp::LoadString(s) => frame.push(Value::Str(s.clone())),
            NativeOp::LoadNull => frame.push(Value::Null),
            NativeOp::LoadArg(index) => {
                let value = frame.arg(*index)?.clone();
                frame.push(value);
            }
            NativeOp::StoreArg(index) => {
                let value = frame.pop()?;
                *frame.arg(*index)? = value;
            }
            NativeOp::LoadLocal(local) => {
                let value = frame.local(local.0)?.clone();
                frame.push(value);
            }
            NativeOp::StoreLocal(local) => {
                let value = frame.pop()?;
                *frame.local(local.0)? = value;
            }
            NativeOp::Branch(kind, label) => {
                if self.branch_taken(frame, *kind)? {
                    frame.pc = frame.target(*label)?;
                }
            }
            NativeOp::Switch(labels) => {
                let index = frame.pop_i32()?;
                if let Some(label) = usize::try_from(index).ok().and_then(|i| labels.get(i)) {
                    frame.pc = frame.target(*label)?;
                }
            }
            NativeOp::Leave(label) => {
                let target = frame.target(*label)?;
                Self::leave(frame, pc, target);
            }
            NativeOp::LoadField(field) => {
                let object = frame.pop()?;
                let slot = self.field_slot(field)?;
                frame.push(with_fields(&object, field.name(), |fields| {
                    fields.get(slot).cloned()
                })?);
            }
            NativeOp::StoreField(field) => {
                let value = frame.pop()?;
                let object = frame.pop()?;
                let slot = self.field_slot(field)?;
                with_fields(&object, field.name(), |fields| {
                    fields.get_mut(slot).map(|target| *target = value)
                })?;
            }
            NativeOp::LoadStaticField(field) => {
                let value = self
                    .statics
                    .get(&field.index())
                    .cloned()
                    .unwrap_or_else(|| Value::default_for(&program.field(field).ty));
                frame.push(value);
            }
            NativeOp::StoreStaticField(field) => {
                let value = frame.pop()?;
                self.statics.insert(field.index(), value);
            }
            NativeOp::NewObject(ctor) => {
                let info = program.method(ctor);
                let mut args = frame.pop_n(info.params.len())?;
                let on_return = if matches!(info.kind, MethodKind::Native) {
                    args.insert(0, Value::Null);
                    OnReturn::Push
                } else {
                    let object = self.allocate(&info.owner)?;
                    args.insert(0, object.clone());
                    OnReturn::Object(object)
                };
                return Ok(Flow::Invoke {
                    method: ctor.clone(),
                    args,
                    on_return,
                    tail: false,
                });
            }
            NativeOp::CallConstructor(ctor) => {
                let args = frame.pop_n(program.method(ctor).arity())?;
                return Ok(Flow::Invoke {
                    method: ctor.clone(),
                    args,
                    on_return: OnReturn::Discard,
                    tail: false,
                });
            }
            NativeOp::Call { method, tail } => {
                let args = frame.pop_n(program.method(method).arity())?;
                return Ok(Flow::Invoke {
                    method: method.clone(),
                    args,
                    on_return: self.on_return_for(method),
                    tail: *tail,
                });
            }
            NativeOp::CallVirtual { method, tail } => {
                let args = frame.pop_n(program.method(method).arity())?;
                let target = match args.first() {
                    None | Some(Value::Null) => {
                        return Err(RuntimeError::NullReference {
                            context: format!("callvirt {method:?}"),
                        });
                    }
                    Some(receiver) => program.dispatch(&runtime_type(receiver), method),
                };
                return Ok(Flow::Invoke {
                    on_return: self.on_return_for(&target),
                    method: target,
                    args,
                    tail: *tail,
                });
            }
            NativeOp::TypeOp(op, ty) => self.type_op(frame, *op, ty)?,
            NativeOp::NewDelegate { method, .. } => {
                let target = frame.pop()?;
                frame.push(Value::Delegate(Rc::new(Delegate {
                    target,
                    method: method.clone(),
                })));
            }
            NativeOp::InvokeDelegate { delegate, tail } => {
                let Ty::Delegate(params, _) = delegate else {
                    return Err(frame.bad_operand(format!("{delegate:?} is not a delegate type")));
                };
                let mut args = frame.pop_n(params.len())?;
                let callee = match frame.pop()? {
                    Value::Delegate(callee) => callee,
                    Value::Null => {
                        return Err(RuntimeError::NullReference {
                            context: format!("invoke {delegate:?}"),
                        });
                    }
                    found => {
                        return Err(RuntimeError::TypeConfusion {
                            expected: "delegate",
                            found,
                        });
                    }
                };
                if !program.method(&callee.method).is_static {
                    args.insert(0, callee.target.clone());
                }
                return Ok(Flow::Invoke {
                    method: callee.method.clone(),
                    on_return: self.on_return_for(&callee.method),
                    args,
                    tail: *tail,
                });
            }
        }
        Ok(Flow::Next)
    }

    fn opcode(&mut self, frame: &mut Frame, opcode: Opcode) -> Result<Flow, RuntimeError> {
        use Opcode::*;
        match opcode {
            Nop => {}
            Dup => {
                let value = frame.stack.last().cloned().ok_or_else(|| frame.underflow())?;
                frame.push(value);
            }
            Pop => {
                frame.pop()?;
            }
            Ret => {
                let value = if frame.returns_value {
                    frame.pop()?
                } else {
                    Value::Null
                };
                return Ok(Flow::Return(value));
            }
            Throw => {
                let exception = frame.pop()?;
                if matches!(exception, Value::Null) {
                    return Err(RuntimeError::NullReference {
                        context: "throw".into(),
                    });
                }
                return Ok(Flow::Throw(exception));
            }
            Neg | Not => {
                let value = frame.pop()?;
                frame.push(unary(opcode, value)?);
            }
            Add | Sub | Mul | Div | DivUn | Rem | RemUn | And | Or | Xor | Shl | Shr | ShrUn => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                frame.push(arithmetic(opcode, lhs, rhs)?);
            }
            Ceq | Cgt | CgtUn | Clt | CltUn => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                frame.push(Value::bool(compare(opcode, &lhs, &rhs)?));
            }
            ConvI1 | ConvI2 | ConvI4 | ConvI8 | ConvU1 | ConvU2 | ConvU4 | ConvU8 | ConvR4
            | ConvR8 => {
                let value = frame.pop()?;
                frame.push(convert(opcode, value)?);
            }
        }
        Ok(Flow::Next)
    }

    fn branch_taken(&self, frame: &mut Frame, kind: BranchKind) -> Result<bool, RuntimeError> {
        if kind == BranchKind::Always {
            return Ok(true);
        }
        if matches!(kind, BranchKind::True | BranchKind::False) {
            let truthy = frame.pop()?.is_truthy();
            return Ok(truthy == (kind == BranchKind::True));
        }
        let rhs = frame.pop()?;
        let lhs = frame.pop()?;
        let float = matches!(lhs, Value::F64(_));
        Ok(match kind {
            BranchKind::Eq => compare(Opcode::Ceq, &lhs, &rhs)?,
            BranchKind::NeUn => !compare(Opcode::Ceq, &lhs, &rhs)?,
            BranchKind::Lt => compare(Opcode::Clt, &lhs, &rhs)?,
            BranchKind::Gt => compare(Opcode::Cgt, &lhs, &rhs)?,
            BranchKind::Le if float => !compare(Opcode::CgtUn, &lhs, &rhs)?,
            BranchKind::Ge if float => !compare(Opcode::CltUn, &lhs, &rhs)?,
            BranchKind::Le => !compare(Opcode::Cgt, &lhs, &rhs)?,
            BranchKind::Ge => !compare(Opcode::Clt, &lhs, &rhs)?,
            BranchKind::Always | BranchKind::True | BranchKind::False => true,
        })
    }

    fn type_op(&self, frame: &mut Frame, op: TypeOp, ty: &Ty) -> Result<(), RuntimeError> {
        let value = frame.pop()?;
        let result = match op {
            TypeOp::Box if self.is_value_type(ty) => Value::Boxed(ty.clone(), Rc::new(value)),
            TypeOp::Box => value,
            TypeOp::UnboxAny if self.is_value_type(ty) => match value {
                Value::Boxed(boxed, inner) if boxed == *ty => (*inner).clone(),
                Value::Null => {
                    return Err(RuntimeError::NullReference {
                        context: format!("unbox.any {ty:?}"),
                    });
                }
                value => {
                    return Err(RuntimeError::InvalidCast {
                        value,
                        target: format!("{ty:?}"),
                    });
                }
            },
            TypeOp::UnboxAny | TypeOp::CastClass => {
                if matches!(value, Value::Null) || self.instance_of(&value, ty) {
                    value
                } else {
                    return Err(RuntimeError::InvalidCast {
                        value,
                        target: format!("{ty:?}"),
                    });
                }
            }
            TypeOp::IsInst => {
                if !matches!(value, Value::Null) && self.instance_of(&value, ty) {
                    value
                } else {
                    Value::Null
                }
            }
            TypeOp::NewCell => Value::Cell(Rc::new(RefCell::new(value))),
            TypeOp::LoadCell => cell(&value)?.borrow().clone(),
            TypeOp::StoreCell => {
                let target = frame.pop()?;
                *cell(&target)?.borrow_mut() = value;
                return Ok(());
            }
        };
        frame.push(result);
        Ok(())
    }

    fn is_value_type(&self, ty: &Ty) -> bool {
        match ty {
            Ty::Primitive(primitive) => primitive.is_value_type(),
            Ty::Defined(id) => self
                .program
                .ty(id)
                .attributes
                .contains(TypeAttributes::VALUE_TYPE),
            _ => false,
        }
    }

    fn instance_of(&self, value: &Value, ty: &Ty) -> bool {
        self.program.is_subtype(&runtime_type(value), ty)
    }

    fn field_slot(&self, field: &FieldId) -> Result<usize, RuntimeError> {
        self.program
            .field(field)
            .slot
            .ok_or_else(|| RuntimeError::UnknownType {
                name: format!("{:?}", self.program.field(field).owner),
            })
    }

    fn allocate(&self, owner: &Ty) -> Result<Value, RuntimeError> {
        let layout = match owner {
            Ty::Defined(id) => self.program.ty(id).layout.as_ref(),
            _ => None,
        };
        let layout = layout.ok_or_else(|| RuntimeError::UnknownType {
            name: format!("{owner:?}"),
        })?;
        let fields = layout
            .iter()
            .map(|field| Value::default_for(&self.program.field(field).ty))
            .collect();
        Ok(Value::Object(Rc::new(Object {
            ty: owner.clone(),
            fields: RefCell::new(fields),
        })))
    }

    // ── protected regions ───────────────────────────────────────────

    /// Moves to `target`, running every finally handler being exited.
    fn leave(frame: &mut Frame, pc: usize, target: usize) {
        frame.stack.clear();
        let finally = frame.code.regions.iter().find_map(|region| {
            if !region.contains(pc) || region.contains(target) {
                return None;
            }
            let handler = region.finally()?;
            let range = handler.start..handler.end;
            (!range.contains(&pc)).then_some(range)
        });
        match finally {
            Some(range) => {
                frame.pc = range.start;
                frame.pending.push(Pending {
                    within: range,
                    resume: Resume::Continue(target),
                });
            }
            None => frame.pc = target,
        }
    }

    fn end_finally(frame: &mut Frame, pc: usize) -> Flow {
        match frame.pending.pop() {
            Some(Pending {
                resume: Resume::Continue(target),
                ..
            }) => {
                Self::leave(frame, pc, target);
                Flow::Next
            }
            Some(Pending {
                resume: Resume::Rethrow(exception),
                ..
            }) => Flow::Throw(exception),
            None => Flow::Next,
        }
    }

    fn handler_for(&self, code: &Code, pc: usize, exception: &Value) -> Option<HandlerTarget> {
        let thrown = runtime_type(exception);
        for region in &code.regions {
            if region.in_try(pc) {
                for handler in &region.handlers {
                    if let HandlerKind::Catch(ty) = &handler.kind {
                        if self.program.is_subtype(&thrown, ty) {
                            return Some(HandlerTarget::Catch(handler.start));
                        }
                    }
                }
            } else if !region
                .handler_at(pc)
                .is_some_and(|handler| matches!(handler.kind, HandlerKind::Catch(_)))
            {
                continue;
            }
            if let Some(finally) = region.finally() {
                return Some(HandlerTarget::Finally(finally.start..finally.end));
            }
        }
        None
    }

    fn unwind(&self, frames: &mut Vec<Frame>, exception: Value) -> Result<(), RuntimeError> {
        while let Some(frame) = frames.last_mut() {
            // Every frame's pc already points past the faulting instruction.
            let pc = frame.pc.saturating_sub(1);
            match self.handler_for(&frame.code, pc, &exception) {
                Some(HandlerTarget::Catch(start)) => {
                    log::debug!("{:?} catches {exception:?}", frame.method);
                    frame.stack.clear();
                    frame.pending.retain(|pending| pending.within.contains(&start));
                    frame.stack.push(exception);
                    frame.pc = start;
                    return Ok(());
                }
                Some(HandlerTarget::Finally(range)) => {
                    frame.stack.clear();
                    frame.pc = range.start;
                    frame.pending.push(Pending {
                        within: range,
                        resume: Resume::Rethrow(exception),
                    });
                    return Ok(());
                }
                None => {
                    frames.pop();
                }
            }
        }
        Err(RuntimeError::Uncaught {
            message: describe_exception(&exception),
        })
    }
}

fn runtime_type(value: &Value) -> Ty {
    match value {
        Value::I32(_) => Ty::Primitive(PrimitiveType::I32),
        Value::I64(_) => Ty::Primitive(PrimitiveType::I64),
        Value::F64(_) => Ty::Primitive(PrimitiveType::F64),
        Value::Str(_) => Ty::Primitive(PrimitiveType::String),
        Value::Object(object) => object.ty.clone(),
        Value::Boxed(ty, _) => ty.clone(),
        Value::Null | Value::Cell(_) | Value::Delegate(_) => Ty::object(),
    }
}

fn cell(value: &Value) -> Result<&Rc<RefCell<Value>>, RuntimeError> {
    match value {
        Value::Cell(cell) => Ok(cell),
        Value::Null => Err(RuntimeError::NullReference {
            context: "cell access".into(),
        }),
        found => Err(RuntimeError::TypeConfusion {
            expected: "cell",
            found: found.clone(),
        }),
    }
}

fn with_fields<T>(
    object: &Value,
    field: &str,
    access: impl FnOnce(&mut Vec<Value>) -> Option<T>,
) -> Result<T, RuntimeError> {
    match object {
        Value::Object(object) => {
            access(&mut object.fields.borrow_mut()).ok_or_else(|| RuntimeError::InvalidOperand {
                method: field.to_string(),
                detail: format!("{:?} has no such field", object.ty),
            })
        }
        Value::Null => Err(RuntimeError::NullReference {
            context: format!("field {field}"),
        }),
        found => Err(RuntimeError::TypeConfusion {
            expected: "object",
            found: found.clone(),
        }),
    }
}

// ── numerics ───────────────────────────────────────────────────────

macro_rules! integer_arithmetic {
    ($name:ident, $int:ty, $uint:ty) => {
        fn $name(op: Opcode, x: $int, y: $int) -> Option<Result<$int, RuntimeError>> {
            let zero = y == 0;
            Some(Ok(match op {
                Opcode::Add => x.wrapping_add(y),
                Opcode::Sub => x.wrapping_sub(y),
                Opcode::Mul => x.wrapping_mul(y),
                Opcode::Div | Opcode::DivUn | Opcode::Rem | Opcode::RemUn if zero => {
                    return Some(Err(RuntimeError::DivideByZero));
                }
                Opcode::Div => x.wrapping_div(y),
                Opcode::DivUn => ((x as $uint) / (y as $uint)) as $int,
                Opcode::Rem => x.wrapping_rem(y),
                Opcode::RemUn => ((x as $uint) % (y as $uint)) as $int,
                Opcode::And => x & y,
                Opcode::Or => x | y,
                Opcode::Xor => x ^ y,
                Opcode::Shl => x.wrapping_shl(y as u32),
                Opcode::Shr => x.wrapping_shr(y as u32),
                Opcode::ShrUn => (x as $uint).wrapping_shr(y as u32) as $int,
                _ => return None,
            }))
        }
    };
}

integer_arithmetic!(arithmetic_i32, i32, u32);
integer_arithmetic!(arithmetic_i64, i64, u64);

fn arithmetic(op: Opcode, lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
    let shift = matches!(op, Opcode::Shl | Opcode::Shr | Opcode::ShrUn);
    let result = match (&lhs, &rhs) {
        (Value::I32(x), Value::I32(y)) => arithmetic_i32(op, *x, *y).map(|r| r.map(Value::I32)),
        (Value::I64(x), Value::I64(y)) => arithmetic_i64(op, *x, *y).map(|r| r.map(Value::I64)),
        (Value::I64(x), Value::I32(y)) if shift => {
            arithmetic_i64(op, *x, i64::from(*y)).map(|r| r.map(Value::I64))
        }
        (Value::F64(x), Value::F64(y)) => match op {
            Opcode::Add => Some(Ok(Value::F64(x + y))),
            Opcode::Sub => Some(Ok(Value::F64(x - y))),
            Opcode::Mul => Some(Ok(Value::F64(x * y))),
            Opcode::Div => Some(Ok(Value::F64(x / y))),
            Opcode::Rem => Some(Ok(Value::F64(x % y))),
            _ => None,
        },
        _ => None,
    };
    result.unwrap_or_else(|| Err(RuntimeError::InvalidOpcode { op, operand: rhs }))
}

fn unary(op: Opcode, value: Value) -> Result<Value, RuntimeError> {
    match (op, &value) {
        (Opcode::Neg, Value::I32(v)) => Ok(Value::I32(v.wrapping_neg())),
        (Opcode::Neg, Value::I64(v)) => Ok(Value::I64(v.wrapping_neg())),
        (Opcode::Neg, Value::F64(v)) => Ok(Value::F64(-v)),
        (Opcode::Not, Value::I32(v)) => Ok(Value::I32(!v)),
        (Opcode::Not, Value::I64(v)) => Ok(Value::I64(!v)),
        _ => Err(RuntimeError::InvalidOpcode { op, operand: value }),
    }
}

fn compare(op: Opcode, lhs: &Value, rhs: &Value) -> Result<bool, RuntimeError> {
    let result = match (lhs, rhs) {
        (Value::I32(x), Value::I32(y)) => match op {
            Opcode::Cgt => Some(x > y),
            Opcode::Clt => Some(x < y),
            Opcode::CgtUn => Some((*x as u32) > (*y as u32)),
            Opcode::CltUn => Some((*x as u32) < (*y as u32)),
            _ => None,
        },
        (Value::I64(x), Value::I64(y)) => match op {
            Opcode::Cgt => Some(x > y),
            Opcode::Clt => Some(x < y),
            Opcode::CgtUn => Some((*x as u64) > (*y as u64)),
            Opcode::CltUn => Some((*x as u64) < (*y as u64)),
            _ => None,
        },
        (Value::F64(x), Value::F64(y)) => {
            let unordered = x.is_nan() || y.is_nan();
            match op {
                Opcode::Cgt => Some(x > y),
                Opcode::Clt => Some(x < y),
                Opcode::CgtUn => Some(unordered || x > y),
                Opcode::CltUn => Some(unordered || x < y),
                _ => None,
            }
        }
        // `cgt.un` against null tests a reference for non-null.
        (_, Value::Null) if op == Opcode::CgtUn => Some(!matches!(lhs, Value::Null)),
        _ => None,
    };
    match result {
        Some(result) => Ok(result),
        None if op == Opcode::Ceq => Ok(lhs == rhs),
        None => Err(RuntimeError::InvalidOpcode {
            op,
            operand: rhs.clone(),
        }),
    }
}

fn convert(op: Opcode, value: Value) -> Result<Value, RuntimeError> {
    let (integer, float) = match &value {
        Value::I32(v) => (i64::from(*v), f64::from(*v)),
        Value::I64(v) => (*v, *v as f64),
        Value::F64(v) => (*v as i64, *v),
        _ => return Err(RuntimeError::InvalidOpcode { op, operand: value }),
    };
    Ok(match op {
        Opcode::ConvI1 => Value::I32(i32::from(integer as i8)),
        Opcode::ConvI2 => Value::I32(i32::from(integer as i16)),
        Opcode::ConvI4 => Value::I32(integer as i32),
        Opcode::ConvU1 => Value::I32(i32::from(integer as u8)),
        Opcode::ConvU2 => Value::I32(i32::from(integer as u16)),
        Opcode::ConvU4 => Value::I32(integer as u32 as i32),
        Opcode::ConvI8 => Value::I64(integer),
        Opcode::ConvU8 => match value {
            Value::I32(v) => Value::I64(i64::from(v as u32)),
            Value::F64(v) => Value::I64(v as u64 as i64),
            _ => Value::I64(integer),
        },
        Opcode::ConvR4 => Value::F64(f64::from(float as f32)),
        Opcode::ConvR8 => Value::F64(float),
        _ => return Err(RuntimeError::InvalidOpcode { op, operand: value }),
    })
}
