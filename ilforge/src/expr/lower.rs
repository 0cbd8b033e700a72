//! Lowering of typed expressions into instruction blocks.
//!
//! Every construct passes a tail flag to the sub-expressions whose value is
//! its own value. Code lowered in tail position never falls through: each
//! path ends in `ret`, preceded by a tail-flagged call when the last thing
//! evaluated is a call.

use std::collections::BTreeMap;

use super::closure::{INVOKE, closure_key};
use super::storage::Emit;
use super::typing::primitive_matches;
use super::{BinaryOp, EnvSpec, Expr, Literal, Param, UnaryOp, VariableStorage};
use crate::error::{BuildError, BuildResult};
use crate::ir::{BranchKind, Instruction, InstructionBlock, LocalDeclaration, Opcode, TypeOp};
use crate::metadata::TypeOracle;
use crate::module::BuildOptions;
use crate::reference::{ConstructorReference, FieldReference, PrimitiveType, TypeReference};
use crate::symbol::Symbol;

use super::TypeEnv;

/// A variable reached through a field of the receiver (argument 0).
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedField {
    pub name: Symbol,
    /// The variable's value type; the field holds a cell of it.
    pub ty: TypeReference,
    pub field: FieldReference,
}

/// An expression body with its parameters. Instance members list the
/// receiver as the first parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaBody {
    pub params: Vec<Param>,
    pub captures: Vec<CapturedField>,
    pub body: Expr,
}

impl LambdaBody {
    pub fn new(params: Vec<Param>, body: Expr) -> Self {
        Self {
            params,
            captures: Vec::new(),
            body,
        }
    }
}

/// The base-class constructor a constructor body chains to.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseInitializer {
    pub ctor: ConstructorReference,
    pub args: Vec<Expr>,
}

#[derive(Clone)]
struct Scope<'a> {
    types: TypeEnv<'a>,
    vars: BTreeMap<Symbol, VariableStorage>,
}

impl<'a> Scope<'a> {
    fn bind(&mut self, name: Symbol, storage: VariableStorage) {
        self.types.bind(name.clone(), storage.ty.clone());
        self.vars.insert(name, storage);
    }

    fn storage(&self, name: &Symbol, expr: &Expr) -> BuildResult<&VariableStorage> {
        self.vars.get(name).ok_or_else(|| {
            BuildError::type_error_in(format!("unbound variable {name}"), expr)
        })
    }
}

struct Lowering<'o> {
    options: &'o BuildOptions,
    code: Vec<Instruction>,
    locals: Vec<LocalDeclaration>,
}

impl Emit for Lowering<'_> {
    fn emit(&mut self, instruction: Instruction) {
        self.code.push(instruction);
    }
}

/// Compiles a method body. A non-void body of a void method is evaluated
/// and dropped.
pub fn compile_method_body(
    oracle: TypeOracle<'_>,
    options: &BuildOptions,
    body: &LambdaBody,
    return_type: &TypeReference,
) -> BuildResult<InstructionBlock> {
    let mut lowering = Lowering::new(options);
    let scope = lowering.enter(oracle, body, body.body.env_spec())?;
    let ty = body.body.return_type(&scope.types)?;
    if return_type.is_void() && !ty.is_void() {
        lowering.lower(&body.body, &scope, false)?;
        lowering.emit(Instruction::Op(Opcode::Pop));
        lowering.emit(Instruction::Op(Opcode::Ret));
    } else {
        if !oracle.is_assignable(&ty, return_type) {
            return Err(BuildError::type_error_in(
                format!("body has type {ty}, expected {return_type}"),
                &body.body,
            ));
        }
        lowering.lower(&body.body, &scope, true)?;
    }
    Ok(lowering.finish())
}

/// Compiles a constructor body: the base initializer runs on the receiver
/// first, then the body, whose value is dropped.
pub fn compile_constructor_body(
    oracle: TypeOracle<'_>,
    options: &BuildOptions,
    body: &LambdaBody,
    base: &BaseInitializer,
) -> BuildResult<InstructionBlock> {
    let Some(this) = body.params.first() else {
        return Err(BuildError::structural(
            "constructor body has no receiver parameter",
        ));
    };
    // Base arguments see the constructor parameters too.
    let spec = base
        .args
        .iter()
        .map(Expr::env_spec)
        .fold(body.body.env_spec(), EnvSpec::union);
    let mut lowering = Lowering::new(options);
    let scope = lowering.enter(oracle, body, spec)?;

    base.ctor.check_declared(oracle.table())?;
    let params = base.ctor.params();
    if params.len() != base.args.len() {
        return Err(BuildError::type_error(format!(
            "base constructor {} expects {} arguments, found {}",
            base.ctor,
            params.len(),
            base.args.len()
        )));
    }
    for (param, arg) in params.iter().zip(&base.args) {
        let ty = arg.return_type(&scope.types)?;
        if !oracle.is_assignable(&ty, param) {
            return Err(BuildError::type_error_in(
                format!("base constructor argument has type {ty}, expected {param}"),
                arg,
            ));
        }
    }
    let ty = body.body.return_type(&scope.types)?;

    scope.storage(&this.name, &body.body)?.fetch(&mut lowering);
    for arg in &base.args {
        lowering.lower(arg, &scope, false)?;
    }
    lowering.emit(Instruction::CallConstructor(base.ctor.clone()));
    lowering.lower(&body.body, &scope, false)?;
    if !ty.is_void() {
        lowering.emit(Instruction::Op(Opcode::Pop));
    }
    lowering.emit(Instruction::Op(Opcode::Ret));
    Ok(lowering.finish())
}

fn narrowing(ty: PrimitiveType) -> Option<Opcode> {
    match ty {
        PrimitiveType::I8 => Some(Opcode::ConvI1),
        PrimitiveType::I16 => Some(Opcode::ConvI2),
        PrimitiveType::U8 => Some(Opcode::ConvU1),
        PrimitiveType::U16 | PrimitiveType::Char => Some(Opcode::ConvU2),
        _ => None,
    }
}

fn conversion(to: PrimitiveType) -> Option<Opcode> {
    match to {
        PrimitiveType::I8 => Some(Opcode::ConvI1),
        PrimitiveType::I16 => Some(Opcode::ConvI2),
        PrimitiveType::I32 => Some(Opcode::ConvI4),
        PrimitiveType::I64 => Some(Opcode::ConvI8),
        PrimitiveType::U8 => Some(Opcode::ConvU1),
        PrimitiveType::U16 | PrimitiveType::Char => Some(Opcode::ConvU2),
        PrimitiveType::U32 => Some(Opcode::ConvU4),
        PrimitiveType::U64 => Some(Opcode::ConvU8),
        PrimitiveType::F32 => Some(Opcode::ConvR4),
        PrimitiveType::F64 => Some(Opcode::ConvR8),
        _ => None,
    }
}

impl<'o> Lowering<'o> {
    fn new(options: &'o BuildOptions) -> Self {
        Self {
            options,
            code: Vec::new(),
            locals: Vec::new(),
        }
    }

    fn finish(self) -> InstructionBlock {
        InstructionBlock::new(self.locals, self.code)
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn label(&self) -> Symbol {
        self.options.symbols.fresh_named("L")
    }

    fn mark(&mut self, label: Symbol) {
        self.emit(Instruction::Label(label));
    }

    fn branch(&mut self, kind: BranchKind, label: &Symbol) {
        self.emit(Instruction::Branch(kind, label.clone()));
    }

    fn op(&mut self, opcode: Opcode) {
        self.emit(Instruction::Op(opcode));
    }

    fn ret_if(&mut self, tail: bool) {
        if tail {
            self.op(Opcode::Ret);
        }
    }

    fn declare_local(&mut self, hint: &Symbol, ty: TypeReference) -> Symbol {
        let name = self.options.symbols.fresh_named(hint.name().unwrap_or("t"));
        self.locals.push(LocalDeclaration {
            name: name.clone(),
            ty,
        });
        name
    }

    fn call_tail(&self, tail: bool) -> bool {
        tail && self.options.tail_calls
    }

    /// Binds parameters and captures. Captured parameters are copied into
    /// fresh cells before anything else runs.
    fn enter<'a>(
        &mut self,
        oracle: TypeOracle<'a>,
        body: &LambdaBody,
        spec: EnvSpec,
    ) -> BuildResult<Scope<'a>> {
        let mut scope = Scope {
            types: TypeEnv::new(oracle),
            vars: BTreeMap::new(),
        };
        for (index, param) in body.params.iter().enumerate() {
            let index = u16::try_from(index)
                .map_err(|_| BuildError::structural("too many parameters"))?;
            if spec.is_captured(&param.name) {
                let cell = self.declare_local(&param.name, TypeReference::cell(param.ty.clone()));
                self.emit(Instruction::LoadArg(index));
                self.emit(Instruction::TypeOp(TypeOp::NewCell, param.ty.clone()));
                self.emit(Instruction::StoreLocal(cell.clone()));
                scope.bind(param.name.clone(), VariableStorage::local(cell, param.ty.clone(), true));
            } else {
                scope.bind(
                    param.name.clone(),
                    VariableStorage::argument(index, param.ty.clone()),
                );
            }
        }
        if body.captures.is_empty() {
            return Ok(scope);
        }
        let Some(receiver) = body.params.first() else {
            return Err(BuildError::structural(
                "captured variables need a receiver parameter",
            ));
        };
        let receiver = scope.storage(&receiver.name, &body.body)?.clone();
        for capture in &body.captures {
            let expected = TypeReference::cell(capture.ty.clone());
            let declared = capture.field.info(oracle.table())?.field_type;
            if declared != expected {
                return Err(BuildError::type_error(format!(
                    "boxed field {} has type {declared}, expected {expected}",
                    capture.field
                )));
            }
            scope.bind(
                capture.name.clone(),
                VariableStorage::field(receiver.clone(), capture.field.clone(), capture.ty.clone()),
            );
        }
        Ok(scope)
    }

    fn lower(&mut self, expr: &Expr, scope: &Scope<'_>, tail: bool) -> BuildResult<()> {
        match expr {
            Expr::Literal(literal) => {
                self.literal(literal);
                self.ret_if(tail);
            }
            Expr::Var(name) => {
                scope.storage(name, expr)?.fetch(self);
                self.ret_if(tail);
            }
            Expr::Assign { var, value } => {
                let storage = scope.storage(var, expr)?;
                storage.store(self, |this| this.lower(value, scope, false))?;
                self.ret_if(tail);
            }
            Expr::Begin(exprs) => {
                let Some((last, init)) = exprs.split_last() else {
                    self.ret_if(tail);
                    return Ok(());
                };
                for expr in init {
                    let ty = expr.return_type(&scope.types)?;
                    self.lower(expr, scope, false)?;
                    if !ty.is_void() {
                        self.op(Opcode::Pop);
                    }
                }
                self.lower(last, scope, tail)?;
            }
            Expr::And(exprs) => self.short_circuit(exprs, scope, tail, false)?,
            Expr::Or(exprs) => self.short_circuit(exprs, scope, tail, true)?,
            Expr::If {
                condition,
                then,
                otherwise,
            } => {
                let otherwise_label = self.label();
                self.lower(condition, scope, false)?;
                self.branch(BranchKind::False, &otherwise_label);
                self.lower(then, scope, tail)?;
                if tail {
                    self.mark(otherwise_label);
                    self.lower(otherwise, scope, true)?;
                } else {
                    let end = self.label();
                    self.branch(BranchKind::Always, &end);
                    self.mark(otherwise_label);
                    self.lower(otherwise, scope, false)?;
                    self.mark(end);
                }
            }
            Expr::Switch {
                value,
                cases,
                default,
            } => self.switch(value, cases, default, scope, tail)?,
            Expr::Let { bindings, body } => {
                let spec = body.env_spec();
                let mut inner = scope.clone();
                for binding in bindings {
                    let ty = binding.value.return_type(&scope.types)?;
                    let boxed = spec.is_captured(&binding.name);
                    let slot_type = if boxed {
                        TypeReference::cell(ty.clone())
                    } else {
                        ty.clone()
                    };
                    let local = self.declare_local(&binding.name, slot_type);
                    self.lower(&binding.value, scope, false)?;
                    if boxed {
                        self.emit(Instruction::TypeOp(TypeOp::NewCell, ty.clone()));
                    }
                    self.emit(Instruction::StoreLocal(local.clone()));
                    inner.bind(binding.name.clone(), VariableStorage::local(local, ty, boxed));
                }
                self.lower(body, &inner, tail)?;
            }
            Expr::Lambda(lambda) => {
                let delegate = expr.return_type(&scope.types)?;
                let params = lambda.params.iter().map(|param| param.ty.clone()).collect();
                let mut cells = Vec::new();
                for name in expr.env_spec().names() {
                    let storage = scope.storage(name, expr)?;
                    storage.fetch_box(self)?;
                    cells.push(storage.slot_type());
                }
                let key = closure_key(&lambda.closure);
                self.emit(Instruction::NewObject(key.constructor(cells).into()));
                self.emit(Instruction::NewDelegate {
                    delegate,
                    method: key.method(INVOKE, params, true).into(),
                });
                self.ret_if(tail);
            }
            Expr::Invoke { function, args } => {
                let delegate = function.return_type(&scope.types)?;
                self.lower(function, scope, false)?;
                for arg in args {
                    self.lower(arg, scope, false)?;
                }
                self.emit(Instruction::InvokeDelegate {
                    delegate,
                    tail: self.call_tail(tail),
                });
                self.ret_if(tail);
            }
            Expr::Binary { op, left, right } => {
                let ty = left.return_type(&scope.types)?;
                self.lower(left, scope, false)?;
                self.lower(right, scope, false)?;
                self.binary(*op, ty.as_primitive());
                self.ret_if(tail);
            }
            Expr::Unary { op, operand } => {
                let ty = operand.return_type(&scope.types)?;
                self.lower(operand, scope, false)?;
                self.unary(*op, ty.as_primitive());
                self.ret_if(tail);
            }
            Expr::FieldGet { target, field } => {
                match target {
                    Some(target) => {
                        self.lower(target, scope, false)?;
                        self.emit(Instruction::LoadField(field.clone()));
                    }
                    None => self.emit(Instruction::LoadStaticField(field.clone())),
                }
                self.ret_if(tail);
            }
            Expr::FieldSet {
                target,
                field,
                value,
            } => {
                match target {
                    Some(target) => {
                        self.lower(target, scope, false)?;
                        self.lower(value, scope, false)?;
                        self.emit(Instruction::StoreField(field.clone()));
                    }
                    None => {
                        self.lower(value, scope, false)?;
                        self.emit(Instruction::StoreStaticField(field.clone()));
                    }
                }
                self.ret_if(tail);
            }
            Expr::New { ctor, args } => {
                for arg in args {
                    self.lower(arg, scope, false)?;
                }
                self.emit(Instruction::NewObject(ctor.clone()));
                self.ret_if(tail);
            }
            Expr::Call {
                target,
                method,
                args,
            } => {
                if let Some(target) = target {
                    self.lower(target, scope, false)?;
                }
                for arg in args {
                    self.lower(arg, scope, false)?;
                }
                let call_tail = self.call_tail(tail);
                self.emit(match target {
                    Some(_) => Instruction::CallVirtual {
                        method: method.clone(),
                        tail: call_tail,
                    },
                    None => Instruction::Call {
                        method: method.clone(),
                        tail: call_tail,
                    },
                });
                self.ret_if(tail);
            }
        }
        Ok(())
    }

    fn literal(&mut self, literal: &Literal) {
        let instruction = match literal {
            Literal::Bool(v) => Instruction::LoadI32(i32::from(*v)),
            Literal::Char(v) => Instruction::LoadI32(*v as i32),
            Literal::I8(v) => Instruction::LoadI32(i32::from(*v)),
            Literal::I16(v) => Instruction::LoadI32(i32::from(*v)),
            Literal::I32(v) => Instruction::LoadI32(*v),
            Literal::U8(v) => Instruction::LoadI32(i32::from(*v)),
            Literal::U16(v) => Instruction::LoadI32(i32::from(*v)),
            Literal::U32(v) => Instruction::LoadI32(*v as i32),
            Literal::I64(v) => Instruction::LoadI64(*v),
            Literal::U64(v) => Instruction::LoadI64(*v as i64),
            Literal::F32(v) => {
                self.emit(Instruction::LoadF64(f64::from(*v)));
                Instruction::Op(Opcode::ConvR4)
            }
            Literal::F64(v) => Instruction::LoadF64(*v),
            Literal::String(v) => Instruction::LoadString(v.clone()),
            Literal::Null(_) => Instruction::LoadNull,
        };
        self.emit(instruction);
    }

    /// `and` stops at the first false, `or` at the first true. An empty
    /// operand list is true.
    fn short_circuit(
        &mut self,
        exprs: &[Expr],
        scope: &Scope<'_>,
        tail: bool,
        is_or: bool,
    ) -> BuildResult<()> {
        let Some((last, init)) = exprs.split_last() else {
            self.emit(Instruction::LoadI32(1));
            self.ret_if(tail);
            return Ok(());
        };
        if init.is_empty() {
            return self.lower(last, scope, tail);
        }
        let decided = self.label();
        let deciding_branch = if is_or {
            BranchKind::True
        } else {
            BranchKind::False
        };
        for expr in init {
            self.lower(expr, scope, false)?;
            self.branch(deciding_branch, &decided);
        }
        self.lower(last, scope, tail)?;
        let end = (!tail).then(|| self.label());
        if let Some(end) = &end {
            self.branch(BranchKind::Always, end);
        }
        self.mark(decided);
        self.emit(Instruction::LoadI32(i32::from(is_or)));
        match end {
            Some(end) => self.mark(end),
            None => self.op(Opcode::Ret),
        }
        Ok(())
    }

    fn switch(
        &mut self,
        value: &Expr,
        cases: &[super::SwitchCase],
        default: &Expr,
        scope: &Scope<'_>,
        tail: bool,
    ) -> BuildResult<()> {
        let mut owners: BTreeMap<u32, usize> = BTreeMap::new();
        for (index, case) in cases.iter().enumerate() {
            for &v in &case.values {
                if let Some(previous) = owners.insert(v, index) {
                    return Err(BuildError::structural(format!(
                        "switch value {v} is claimed by cases {previous} and {index}"
                    )));
                }
            }
        }
        let table_len = owners.last_key_value().map_or(0, |(&max, _)| max as usize + 1);
        if table_len > self.options.max_switch_cases {
            return Err(BuildError::structural(format!(
                "switch needs a table of {table_len} entries, the maximum is {}",
                self.options.max_switch_cases
            )));
        }

        let wide = primitive_matches(&value.return_type(&scope.types)?, |p| {
            p == PrimitiveType::U64
        });
        self.lower(value, scope, false)?;
        let default_label = self.label();
        let case_labels: Vec<Symbol> = cases.iter().map(|_| self.label()).collect();
        if table_len == 0 {
            self.op(Opcode::Pop);
        } else {
            if wide {
                // 64-bit values past the table go to the default before narrowing.
                let in_range = self.label();
                self.op(Opcode::Dup);
                self.emit(Instruction::LoadI64(table_len as i64));
                self.op(Opcode::CltUn);
                self.branch(BranchKind::True, &in_range);
                self.op(Opcode::Pop);
                self.branch(BranchKind::Always, &default_label);
                self.mark(in_range);
                self.op(Opcode::ConvU4);
            }
            let table = (0..table_len as u32)
                .map(|v| match owners.get(&v) {
                    Some(&index) => case_labels[index].clone(),
                    None => default_label.clone(),
                })
                .collect();
            self.emit(Instruction::Switch(table));
        }

        let end = (!tail).then(|| self.label());
        self.mark(default_label);
        self.lower(default, scope, tail)?;
        if let Some(end) = &end {
            self.branch(BranchKind::Always, end);
        }
        for (index, (case, label)) in cases.iter().zip(case_labels).enumerate() {
            if case.values.is_empty() {
                log::warn!("switch case {index} matches no value and is dropped");
                continue;
            }
            self.mark(label);
            self.lower(&case.body, scope, tail)?;
            if let Some(end) = &end {
                self.branch(BranchKind::Always, end);
            }
        }
        if let Some(end) = end {
            self.mark(end);
        }
        Ok(())
    }

    fn binary(&mut self, op: BinaryOp, ty: Option<PrimitiveType>) {
        let unsigned = ty.is_some_and(PrimitiveType::is_unsigned_integer);
        let float = ty.is_some_and(PrimitiveType::is_float);
        let pick = |signed: Opcode, unsigned_op: Opcode| if unsigned { unsigned_op } else { signed };
        match op {
            BinaryOp::Add => self.op(Opcode::Add),
            BinaryOp::Sub => self.op(Opcode::Sub),
            BinaryOp::Mul => self.op(Opcode::Mul),
            BinaryOp::Div => self.op(pick(Opcode::Div, Opcode::DivUn)),
            BinaryOp::Rem => self.op(pick(Opcode::Rem, Opcode::RemUn)),
            BinaryOp::BitAnd => self.op(Opcode::And),
            BinaryOp::BitOr => self.op(Opcode::Or),
            BinaryOp::BitXor => self.op(Opcode::Xor),
            BinaryOp::Shl => self.op(Opcode::Shl),
            BinaryOp::Shr => self.op(pick(Opcode::Shr, Opcode::ShrUn)),
            BinaryOp::Eq => self.op(Opcode::Ceq),
            BinaryOp::Ne => self.negated(Opcode::Ceq),
            BinaryOp::Lt => self.op(pick(Opcode::Clt, Opcode::CltUn)),
            BinaryOp::Gt => self.op(pick(Opcode::Cgt, Opcode::CgtUn)),
            // Unordered forms keep NaN comparisons false.
            BinaryOp::Le if float => self.negated(Opcode::CgtUn),
            BinaryOp::Ge if float => self.negated(Opcode::CltUn),
            BinaryOp::Le => self.negated(pick(Opcode::Cgt, Opcode::CgtUn)),
            BinaryOp::Ge => self.negated(pick(Opcode::Clt, Opcode::CltUn)),
        }
        if !op.is_comparison() {
            if let Some(narrow) = ty.and_then(narrowing) {
                self.op(narrow);
            }
        }
    }

    fn negated(&mut self, compare: Opcode) {
        self.op(compare);
        self.emit(Instruction::LoadI32(0));
        self.op(Opcode::Ceq);
    }

    fn unary(&mut self, op: UnaryOp, ty: Option<PrimitiveType>) {
        match op {
            UnaryOp::Not if ty == Some(PrimitiveType::Bool) => {
                self.emit(Instruction::LoadI32(0));
                self.op(Opcode::Ceq);
            }
            UnaryOp::Not | UnaryOp::Negate => {
                self.op(if op == UnaryOp::Not {
                    Opcode::Not
                } else {
                    Opcode::Neg
                });
                if let Some(narrow) = ty.and_then(narrowing) {
                    self.op(narrow);
                }
            }
            UnaryOp::Convert(to) => {
                if ty != Some(to) {
                    if let Some(conv) = conversion(to) {
                        self.op(conv);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{FieldAttributes, MethodAttributes, TypeAttributes};
    use crate::key::TypeKey;
    use crate::metadata::BuiltinMetadata;
    use crate::reference::ExistingMethod;
    use crate::symbol::SymbolGenerator;
    use crate::table::{
        Declaration, FieldDeclaration, MethodDeclaration, SymbolTable, TypeDeclaration,
    };
    use Instruction::*;

    fn options() -> BuildOptions {
        BuildOptions {
            symbols: SymbolGenerator::isolated(),
            ..BuildOptions::default()
        }
    }

    fn acc_table() -> SymbolTable {
        let acc = TypeKey::new("Acc");
        SymbolTable::new()
            .declare(
                acc.clone(),
                Declaration::Type(TypeDeclaration {
                    attributes: TypeAttributes::SEALED,
                    base: None,
                    interfaces: vec![],
                }),
            )
            .unwrap()
            .declare(
                acc.field("a"),
                Declaration::Field(FieldDeclaration {
                    attributes: FieldAttributes::PRIVATE,
                    field_type: TypeReference::i32(),
                }),
            )
            .unwrap()
            .declare(
                acc.method("step", vec![TypeReference::i32()], true),
                Declaration::Method(MethodDeclaration {
                    attributes: MethodAttributes::VIRTUAL,
                    return_type: TypeReference::i32(),
                }),
            )
            .unwrap()
    }

    fn compile(
        table: &SymbolTable,
        options: &BuildOptions,
        params: Vec<Param>,
        body: Expr,
        ret: TypeReference,
    ) -> BuildResult<InstructionBlock> {
        let metadata = BuiltinMetadata::new();
        let oracle = TypeOracle::new(table, &metadata);
        compile_method_body(oracle, options, &LambdaBody::new(params, body), &ret)
    }

    fn this() -> Param {
        Param::new("this", TypeReference::new_type("Acc"))
    }

    fn boxed_names(block: &InstructionBlock) -> Vec<String> {
        block
            .locals
            .iter()
            .filter(|local| local.ty.cell_content().is_some())
            .filter_map(|local| local.name.name().map(str::to_string))
            .collect()
    }

    #[test]
    fn field_arithmetic_lowers_to_stack_code() {
        let acc = TypeKey::new("Acc");
        let body = Expr::binary(
            BinaryOp::Mul,
            Expr::var("i"),
            Expr::field(Expr::var("this"), acc.field("a")),
        );
        let block = compile(
            &acc_table(),
            &options(),
            vec![this(), Param::new("i", TypeReference::i32())],
            body,
            TypeReference::i32(),
        )
        .unwrap();
        assert!(block.locals.is_empty());
        assert_eq!(
            block.instructions,
            vec![
                LoadArg(1),
                LoadArg(0),
                LoadField(acc.field("a").into()),
                Op(Opcode::Mul),
                Op(Opcode::Ret),
            ]
        );
    }

    #[test]
    fn if_in_tail_position_returns_from_both_branches() {
        let body = Expr::if_(Expr::var("c"), Expr::i32(1), Expr::i32(2));
        let block = compile(
            &SymbolTable::new(),
            &options(),
            vec![Param::new("c", TypeReference::bool())],
            body,
            TypeReference::i32(),
        )
        .unwrap();
        let else_label = match &block.instructions[1] {
            Branch(BranchKind::False, label) => label.clone(),
            other => panic!("unexpected {other}"),
        };
        assert_eq!(
            block.instructions,
            vec![
                LoadArg(0),
                Branch(BranchKind::False, else_label.clone()),
                LoadI32(1),
                Op(Opcode::Ret),
                Label(else_label),
                LoadI32(2),
                Op(Opcode::Ret),
            ]
        );
        block.check_labels().unwrap();
    }

    #[test]
    fn tail_call_is_flagged() {
        let acc = TypeKey::new("Acc");
        let step = acc.method("step", vec![TypeReference::i32()], true);
        let body = Expr::call(Expr::var("this"), step.clone(), vec![Expr::i32(1)]);
        let params = vec![this()];
        let block = compile(
            &acc_table(),
            &options(),
            params.clone(),
            body.clone(),
            TypeReference::i32(),
        )
        .unwrap();
        assert_eq!(
            &block.instructions[2..],
            &[
                CallVirtual {
                    method: step.clone().into(),
                    tail: true
                },
                Op(Opcode::Ret)
            ]
        );

        let no_tail = BuildOptions {
            tail_calls: false,
            ..options()
        };
        let block =
            compile(&acc_table(), &no_tail, params, body, TypeReference::i32()).unwrap();
        assert!(matches!(
            block.instructions[2],
            CallVirtual { tail: false, .. }
        ));
    }

    #[test]
    fn only_the_last_begin_element_is_in_tail_position() {
        let print = ExistingMethod::new_static(
            TypeReference::named("Console"),
            "WriteLine",
            vec![TypeReference::string()],
            TypeReference::void(),
        );
        let body = Expr::begin(vec![
            Expr::i32(7),
            Expr::call_static(print.clone(), vec![Expr::string("a")]),
            Expr::call_static(print.clone(), vec![Expr::string("b")]),
        ]);
        let block = compile(&SymbolTable::new(), &options(), vec![], body, TypeReference::void())
            .unwrap();
        assert_eq!(
            block.instructions,
            vec![
                LoadI32(7),
                Op(Opcode::Pop),
                LoadString("a".into()),
                Call {
                    method: print.clone().into(),
                    tail: false
                },
                LoadString("b".into()),
                Call {
                    method: print.into(),
                    tail: true
                },
                Op(Opcode::Ret),
            ]
        );
    }

    #[test]
    fn value_of_void_method_body_is_dropped() {
        let block = compile(
            &SymbolTable::new(),
            &options(),
            vec![],
            Expr::i32(3),
            TypeReference::void(),
        )
        .unwrap();
        assert_eq!(
            block.instructions,
            vec![LoadI32(3), Op(Opcode::Pop), Op(Opcode::Ret)]
        );
    }

    #[test]
    fn body_type_must_match_return_type() {
        let err = compile(
            &SymbolTable::new(),
            &options(),
            vec![],
            Expr::string("x"),
            TypeReference::i32(),
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::Type { .. }));
    }

    #[test]
    fn and_short_circuits_to_false() {
        let body = Expr::and(vec![Expr::var("p"), Expr::var("q")]);
        let block = compile(
            &SymbolTable::new(),
            &options(),
            vec![
                Param::new("p", TypeReference::bool()),
                Param::new("q", TypeReference::bool()),
            ],
            body,
            TypeReference::bool(),
        )
        .unwrap();
        let decided = match &block.instructions[1] {
            Branch(BranchKind::False, label) => label.clone(),
            other => panic!("unexpected {other}"),
        };
        assert_eq!(
            block.instructions,
            vec![
                LoadArg(0),
                Branch(BranchKind::False, decided.clone()),
                LoadArg(1),
                Op(Opcode::Ret),
                Label(decided),
                LoadI32(0),
                Op(Opcode::Ret),
            ]
        );
    }

    #[test]
    fn empty_and_or_are_true() {
        for expr in [Expr::and(vec![]), Expr::or(vec![])] {
            let block =
                compile(&SymbolTable::new(), &options(), vec![], expr, TypeReference::bool())
                    .unwrap();
            assert_eq!(block.instructions, vec![LoadI32(1), Op(Opcode::Ret)]);
        }
    }

    #[test]
    fn switch_builds_a_dense_table() {
        let body = Expr::switch(
            Expr::var("v"),
            vec![(vec![0, 2], Expr::i32(10)), (vec![3], Expr::i32(30))],
            Expr::i32(-1),
        );
        let block = compile(
            &SymbolTable::new(),
            &options(),
            vec![Param::new("v", TypeReference::u32())],
            body,
            TypeReference::i32(),
        )
        .unwrap();
        block.check_labels().unwrap();
        let Switch(table) = &block.instructions[1] else {
            panic!("expected a switch");
        };
        assert_eq!(table.len(), 4);
        assert_eq!(table[0], table[2]);
        assert_ne!(table[0], table[1]);
        assert_ne!(table[0], table[3]);
        // Gap 1 goes to the default, which directly follows the switch.
        assert_eq!(block.instructions[2], Label(table[1].clone()));
        assert_eq!(block.instructions[3], LoadI32(-1));
        let rets = block
            .instructions
            .iter()
            .filter(|i| **i == Op(Opcode::Ret))
            .count();
        assert_eq!(rets, 3);
    }

    #[test]
    fn wide_switch_checks_the_range_before_narrowing() {
        let body = Expr::switch(
            Expr::var("v"),
            vec![(vec![0], Expr::i32(10)), (vec![1], Expr::i32(20))],
            Expr::i32(-1),
        );
        let block = compile(
            &SymbolTable::new(),
            &options(),
            vec![Param::new("v", TypeReference::u64())],
            body,
            TypeReference::i32(),
        )
        .unwrap();
        block.check_labels().unwrap();
        let Branch(BranchKind::True, in_range) = &block.instructions[4] else {
            panic!("expected a range check");
        };
        let Branch(BranchKind::Always, default) = &block.instructions[6] else {
            panic!("expected a jump to the default");
        };
        assert_eq!(
            block.instructions[..6],
            [
                LoadArg(0),
                Op(Opcode::Dup),
                LoadI64(2),
                Op(Opcode::CltUn),
                Branch(BranchKind::True, in_range.clone()),
                Op(Opcode::Pop),
            ]
        );
        assert_eq!(block.instructions[7], Label(in_range.clone()));
        assert_eq!(block.instructions[8], Op(Opcode::ConvU4));
        assert!(matches!(&block.instructions[9], Switch(table) if table.len() == 2));
        assert_eq!(block.instructions[10], Label(default.clone()));
    }

    #[test]
    fn overlapping_switch_cases_fail() {
        let body = Expr::switch(
            Expr::u32(1),
            vec![(vec![0, 1], Expr::i32(1)), (vec![1, 2], Expr::i32(2))],
            Expr::i32(0),
        );
        let err = compile(&SymbolTable::new(), &options(), vec![], body, TypeReference::i32())
            .unwrap_err();
        assert!(matches!(err, BuildError::Structural { .. }));
    }

    #[test]
    fn switch_table_is_bounded() {
        let body = Expr::switch(
            Expr::u32(1),
            vec![(vec![256], Expr::i32(1))],
            Expr::i32(0),
        );
        let err = compile(
            &SymbolTable::new(),
            &options(),
            vec![],
            body.clone(),
            TypeReference::i32(),
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::Structural { .. }));

        let wide = BuildOptions {
            max_switch_cases: 1024,
            ..options()
        };
        compile(&SymbolTable::new(), &wide, vec![], body, TypeReference::i32()).unwrap();
    }

    #[test]
    fn every_switch_value_reaches_one_case() {
        let cases: Vec<(Vec<u32>, Expr)> = (0..5u32)
            .map(|c| (vec![c, c + 5, c + 10], Expr::i32(c as i32)))
            .collect();
        let body = Expr::switch(Expr::var("v"), cases, Expr::i32(-1));
        let block = compile(
            &SymbolTable::new(),
            &options(),
            vec![Param::new("v", TypeReference::u32())],
            body,
            TypeReference::i32(),
        )
        .unwrap();
        let Switch(table) = &block.instructions[1] else {
            panic!("expected a switch");
        };
        for (value, label) in table.iter().enumerate() {
            let at = block
                .instructions
                .iter()
                .position(|i| *i == Label(label.clone()))
                .unwrap();
            assert_eq!(block.instructions[at + 1], LoadI32(value as i32 % 5));
        }
    }

    #[test]
    fn uncaptured_let_binding_is_not_boxed() {
        let body = Expr::let_(
            vec![(Symbol::new("x"), Expr::i32(4))],
            Expr::binary(BinaryOp::Add, Expr::var("x"), Expr::var("x")),
        );
        let block = compile(&SymbolTable::new(), &options(), vec![], body, TypeReference::i32())
            .unwrap();
        assert_eq!(block.locals.len(), 1);
        assert_eq!(block.locals[0].ty, TypeReference::i32());
        assert!(boxed_names(&block).is_empty());
        assert!(!block.instructions.iter().any(|i| matches!(i, TypeOp(..))));
    }

    #[test]
    fn captured_let_binding_is_boxed() {
        let symbols = SymbolGenerator::isolated();
        let body = Expr::let_(
            vec![
                (Symbol::new("x"), Expr::i32(4)),
                (Symbol::new("y"), Expr::i32(5)),
            ],
            Expr::begin(vec![
                Expr::var("y"),
                Expr::lambda(&symbols, vec![], Expr::var("x")),
            ]),
        );
        let block = compile(
            &SymbolTable::new(),
            &options(),
            vec![],
            body,
            TypeReference::delegate(vec![], TypeReference::i32()),
        )
        .unwrap();
        assert_eq!(boxed_names(&block), vec!["x".to_string()]);
        assert!(block.instructions.contains(&TypeOp(
            crate::ir::TypeOp::NewCell,
            TypeReference::i32()
        )));
    }

    #[test]
    fn captured_parameter_is_copied_into_a_cell() {
        let symbols = SymbolGenerator::isolated();
        let lambda = Expr::lambda(&symbols, vec![], Expr::var("n"));
        let Expr::Lambda(inner) = &lambda else {
            unreachable!()
        };
        let key = closure_key(&inner.closure);
        let block = compile(
            &SymbolTable::new(),
            &options(),
            vec![Param::new("n", TypeReference::i32())],
            lambda.clone(),
            TypeReference::delegate(vec![], TypeReference::i32()),
        )
        .unwrap();
        let cell = block.locals[0].name.clone();
        assert_eq!(
            block.instructions,
            vec![
                LoadArg(0),
                TypeOp(crate::ir::TypeOp::NewCell, TypeReference::i32()),
                StoreLocal(cell.clone()),
                LoadLocal(cell),
                NewObject(
                    key.constructor(vec![TypeReference::cell(TypeReference::i32())])
                        .into()
                ),
                NewDelegate {
                    delegate: TypeReference::delegate(vec![], TypeReference::i32()),
                    method: key.method(INVOKE, vec![], true).into(),
                },
                Op(Opcode::Ret),
            ]
        );
    }

    #[test]
    fn assignment_goes_through_the_cell() {
        let symbols = SymbolGenerator::isolated();
        // (let ((x 0)) (begin (set! x 1) (lambda () x)))
        let body = Expr::let_(
            vec![(Symbol::new("x"), Expr::i32(0))],
            Expr::begin(vec![
                Expr::assign("x", Expr::i32(1)),
                Expr::lambda(&symbols, vec![], Expr::var("x")),
            ]),
        );
        let block = compile(
            &SymbolTable::new(),
            &options(),
            vec![],
            body,
            TypeReference::delegate(vec![], TypeReference::i32()),
        )
        .unwrap();
        let cell = block.locals[0].name.clone();
        assert_eq!(
            &block.instructions[..6],
            &[
                LoadI32(0),
                TypeOp(crate::ir::TypeOp::NewCell, TypeReference::i32()),
                StoreLocal(cell.clone()),
                LoadLocal(cell),
                LoadI32(1),
                TypeOp(crate::ir::TypeOp::StoreCell, TypeReference::i32()),
            ]
        );
    }

    #[test]
    fn boxed_field_type_mismatch_is_a_type_error() {
        let closure = TypeKey::new("<closure>c");
        let table = SymbolTable::new()
            .declare(
                closure.field("n"),
                Declaration::Field(FieldDeclaration {
                    attributes: FieldAttributes::PRIVATE,
                    field_type: TypeReference::i32(),
                }),
            )
            .unwrap();
        let metadata = BuiltinMetadata::new();
        let body = LambdaBody {
            params: vec![Param::new("self", TypeReference::Key(closure.clone()))],
            captures: vec![CapturedField {
                name: Symbol::new("n"),
                ty: TypeReference::i32(),
                field: closure.field("n").into(),
            }],
            body: Expr::var("n"),
        };
        let err = compile_method_body(
            TypeOracle::new(&table, &metadata),
            &options(),
            &body,
            &TypeReference::i32(),
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::Type { .. }));
    }

    #[test]
    fn captures_read_through_receiver_fields() {
        let closure = TypeKey::new("<closure>c");
        let table = SymbolTable::new()
            .declare(
                closure.field("n"),
                Declaration::Field(FieldDeclaration {
                    attributes: FieldAttributes::PRIVATE,
                    field_type: TypeReference::cell(TypeReference::i32()),
                }),
            )
            .unwrap();
        let metadata = BuiltinMetadata::new();
        let body = LambdaBody {
            params: vec![Param::new("self", TypeReference::Key(closure.clone()))],
            captures: vec![CapturedField {
                name: Symbol::new("n"),
                ty: TypeReference::i32(),
                field: closure.field("n").into(),
            }],
            body: Expr::var("n"),
        };
        let block = compile_method_body(
            TypeOracle::new(&table, &metadata),
            &options(),
            &body,
            &TypeReference::i32(),
        )
        .unwrap();
        assert_eq!(
            block.instructions,
            vec![
                LoadArg(0),
                LoadField(closure.field("n").into()),
                TypeOp(crate::ir::TypeOp::LoadCell, TypeReference::i32()),
                Op(Opcode::Ret),
            ]
        );
    }

    #[test]
    fn constructor_chains_to_base_then_drops_nothing() {
        let acc = TypeKey::new("Acc");
        let table = acc_table();
        let metadata = BuiltinMetadata::new();
        let body = LambdaBody::new(
            vec![this(), Param::new("a", TypeReference::i32())],
            Expr::set_field(Expr::var("this"), acc.field("a"), Expr::var("a")),
        );
        let base = BaseInitializer {
            ctor: crate::reference::ExistingConstructor::object().into(),
            args: vec![],
        };
        let block = compile_constructor_body(
            TypeOracle::new(&table, &metadata),
            &options(),
            &body,
            &base,
        )
        .unwrap();
        assert_eq!(
            block.instructions,
            vec![
                LoadArg(0),
                CallConstructor(base.ctor.clone()),
                LoadArg(0),
                LoadArg(1),
                StoreField(acc.field("a").into()),
                Op(Opcode::Ret),
            ]
        );
    }

    #[test]
    fn base_argument_lambda_boxes_constructor_parameter() {
        let symbols = SymbolGenerator::isolated();
        let lambda = Expr::lambda(&symbols, vec![], Expr::var("n"));
        let Expr::Lambda(inner) = &lambda else {
            unreachable!()
        };
        let key = closure_key(&inner.closure);
        let delegate = TypeReference::delegate(vec![], TypeReference::i32());
        let table = SymbolTable::new();
        let metadata = BuiltinMetadata::new();
        let body = LambdaBody::new(
            vec![
                Param::new("this", TypeReference::named("Derived")),
                Param::new("n", TypeReference::i32()),
            ],
            Expr::begin(vec![]),
        );
        let base = BaseInitializer {
            ctor: crate::reference::ExistingConstructor {
                owner: TypeReference::named("Base"),
                params: vec![delegate.clone()],
            }
            .into(),
            args: vec![lambda.clone()],
        };
        let block = compile_constructor_body(
            TypeOracle::new(&table, &metadata),
            &options(),
            &body,
            &base,
        )
        .unwrap();
        assert_eq!(boxed_names(&block), vec!["n".to_string()]);
        let cell = block.locals[0].name.clone();
        assert_eq!(
            block.instructions,
            vec![
                LoadArg(1),
                TypeOp(crate::ir::TypeOp::NewCell, TypeReference::i32()),
                StoreLocal(cell.clone()),
                LoadArg(0),
                LoadLocal(cell),
                NewObject(
                    key.constructor(vec![TypeReference::cell(TypeReference::i32())])
                        .into()
                ),
                NewDelegate {
                    delegate,
                    method: key.method(INVOKE, vec![], true).into(),
                },
                CallConstructor(base.ctor.clone()),
                Op(Opcode::Ret),
            ]
        );
    }

    #[test]
    fn constructor_without_receiver_is_structural() {
        let table = SymbolTable::new();
        let metadata = BuiltinMetadata::new();
        let err = compile_constructor_body(
            TypeOracle::new(&table, &metadata),
            &options(),
            &LambdaBody::new(vec![], Expr::begin(vec![])),
            &BaseInitializer {
                ctor: crate::reference::ExistingConstructor::object().into(),
                args: vec![],
            },
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::Structural { .. }));
    }

    /// Every binding is boxed exactly when a nested lambda refers to it.
    #[test]
    fn boxing_matches_capture_over_many_trees() {
        let symbols = SymbolGenerator::isolated();
        for seed in 0u32..64 {
            let names = ["a", "b", "c", "d"];
            let mut body = Expr::i32(0);
            let mut expected_boxed = Vec::new();
            for (i, name) in names.iter().enumerate() {
                let captured = (seed >> i) & 1 == 1;
                let used = if captured {
                    Expr::invoke(Expr::lambda(&symbols, vec![], Expr::var(*name)), vec![])
                } else {
                    Expr::var(*name)
                };
                body = Expr::let_(
                    vec![(Symbol::new(name), Expr::i32(i as i32))],
                    Expr::binary(BinaryOp::Add, used, body),
                );
                if captured {
                    expected_boxed.push(name.to_string());
                }
            }
            let block = compile(&SymbolTable::new(), &options(), vec![], body, TypeReference::i32())
                .unwrap();
            let mut boxed = boxed_names(&block);
            boxed.sort();
            expected_boxed.sort();
            assert_eq!(boxed, expected_boxed, "seed {seed}");
            block.validate().unwrap();
        }
    }
}
