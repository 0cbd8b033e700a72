use std::collections::BTreeMap;

use crate::backend::{Backend, IlSink, NativeOp};
use crate::error::{BuildError, BuildResult};
use crate::ir::{Instruction, InstructionBlock};
use crate::slot::SlotTable;
use crate::symbol::Symbol;

struct Emitter<'a, B: Backend> {
    backend: &'a mut B,
    slots: &'a SlotTable<B>,
    sink: &'a mut B::Body,
    labels: BTreeMap<Symbol, B::Label>,
    locals: BTreeMap<Symbol, B::Local>,
}

/// Lowers a validated block into `sink`, resolving every symbolic operand.
pub fn emit_block<B: Backend>(
    backend: &mut B,
    slots: &SlotTable<B>,
    sink: &mut B::Body,
    block: &InstructionBlock,
) -> BuildResult<()> {
    block.validate()?;
    let mut emitter = Emitter {
        backend,
        slots,
        sink,
        labels: BTreeMap::new(),
        locals: BTreeMap::new(),
    };
    for local in &block.locals {
        let ty = local.ty.resolve(emitter.backend, emitter.slots)?;
        let handle = emitter.sink.declare_local(&ty)?;
        emitter.locals.insert(local.name.clone(), handle);
    }
    // Try-end labels are allocated by their region, not here.
    for instruction in &block.instructions {
        if let Instruction::Label(label) = instruction {
            let handle = emitter.sink.define_label();
            emitter.labels.insert(label.clone(), handle);
        }
    }
    for instruction in &block.instructions {
        emitter.emit(instruction)?;
    }
    Ok(())
}

impl<B: Backend> Emitter<'_, B> {
    fn label(&self, label: &Symbol) -> BuildResult<B::Label> {
        self.labels.get(label).cloned().ok_or_else(|| {
            BuildError::structural(format!(
                "label {label} is used outside its protected region"
            ))
        })
    }

    fn local(&self, local: &Symbol) -> BuildResult<B::Local> {
        self.locals.get(local).cloned().ok_or_else(|| {
            BuildError::structural(format!("local {local} is used but not declared"))
        })
    }

    fn emit(&mut self, instruction: &Instruction) -> BuildResult<()> {
        let op = match instruction {
            Instruction::Label(label) => {
                let handle = self.label(label)?;
                return self.sink.mark_label(&handle);
            }
            Instruction::BeginTry { end } => {
                let handle = self.sink.begin_try()?;
                self.labels.insert(end.clone(), handle);
                return Ok(());
            }
            Instruction::BeginCatch(ty) => {
                let ty = ty.resolve(self.backend, self.slots)?;
                return self.sink.begin_catch(&ty);
            }
            Instruction::BeginFinally => return self.sink.begin_finally(),
            Instruction::EndTry { .. } => return self.sink.end_try(),

            Instruction::Op(op) => NativeOp::Op(*op),
            Instruction::LoadI32(v) => NativeOp::LoadI32(*v),
            Instruction::LoadI64(v) => NativeOp::LoadI64(*v),
            Instruction::LoadF64(v) => NativeOp::LoadF64(*v),
            Instruction::LoadString(s) => NativeOp::LoadString(s.clone()),
            Instruction::LoadNull => NativeOp::LoadNull,
            Instruction::LoadArg(i) => NativeOp::LoadArg(*i),
            Instruction::StoreArg(i) => NativeOp::StoreArg(*i),
            Instruction::LoadLocal(local) => NativeOp::LoadLocal(self.local(local)?),
            Instruction::StoreLocal(local) => NativeOp::StoreLocal(self.local(local)?),
            Instruction::Branch(kind, label) => NativeOp::Branch(*kind, self.label(label)?),
            Instruction::Switch(labels) => NativeOp::Switch(
                labels
                    .iter()
                    .map(|label| self.label(label))
                    .collect::<BuildResult<_>>()?,
            ),
            Instruction::Leave(label) => NativeOp::Leave(self.label(label)?),
            Instruction::LoadField(field) => {
                NativeOp::LoadField(field.resolve(self.backend, self.slots)?)
            }
            Instruction::StoreField(field) => {
                NativeOp::StoreField(field.resolve(self.backend, self.slots)?)
            }
            Instruction::LoadStaticField(field) => {
                NativeOp::LoadStaticField(field.resolve(self.backend, self.slots)?)
            }
            Instruction::StoreStaticField(field) => {
                NativeOp::StoreStaticField(field.resolve(self.backend, self.slots)?)
            }
            Instruction::NewObject(ctor) => {
                NativeOp::NewObject(ctor.resolve(self.backend, self.slots)?)
            }
            Instruction::CallConstructor(ctor) => {
                NativeOp::CallConstructor(ctor.resolve(self.backend, self.slots)?)
            }
            Instruction::Call { method, tail } => NativeOp::Call {
                method: method.resolve(self.backend, self.slots)?,
                tail: *tail,
            },
            Instruction::CallVirtual { method, tail } => NativeOp::CallVirtual {
                method: method.resolve(self.backend, self.slots)?,
                tail: *tail,
            },
            Instruction::TypeOp(op, ty) => {
                NativeOp::TypeOp(*op, ty.resolve(self.backend, self.slots)?)
            }
            Instruction::NewDelegate { delegate, method } => NativeOp::NewDelegate {
                delegate: delegate.resolve(self.backend, self.slots)?,
                method: method.resolve(self.backend, self.slots)?,
            },
            Instruction::InvokeDelegate { delegate, tail } => NativeOp::InvokeDelegate {
                delegate: delegate.resolve(self.backend, self.slots)?,
                tail: *tail,
            },
        };
        log::trace!("  {op:?}");
        self.sink.emit(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BranchKind, LocalDeclaration, Opcode};
    use crate::key::TypeKey;
    use crate::reference::TypeReference;
    use crate::testing::RecordingBackend;

    #[test]
    fn labels_and_locals_are_realized_before_use() {
        let mut backend = RecordingBackend::default();
        let slots = SlotTable::new();
        let mut body = backend.begin_body();
        let skip = Symbol::new("skip");
        let t = Symbol::new("t");
        let block = InstructionBlock::new(
            vec![LocalDeclaration {
                name: t.clone(),
                ty: TypeReference::i32(),
            }],
            vec![
                Instruction::Branch(BranchKind::Always, skip.clone()),
                Instruction::LoadI32(1),
                Instruction::StoreLocal(t.clone()),
                Instruction::Label(skip),
                Instruction::LoadLocal(t),
                Instruction::Op(Opcode::Ret),
            ],
        );
        emit_block(&mut backend, &slots, &mut body, &block).unwrap();
        assert_eq!(
            body.lines,
            vec![
                "local 0: i32",
                "br L0",
                "ldc.i4 1",
                "stloc 0",
                "L0:",
                "ldloc 0",
                "ret",
            ]
        );
    }

    #[test]
    fn try_end_label_comes_from_the_region() {
        let mut backend = RecordingBackend::default();
        let slots = SlotTable::new();
        let mut body = backend.begin_body();
        let end = Symbol::new("end");
        let block = InstructionBlock::new(
            vec![],
            vec![
                Instruction::BeginTry { end: end.clone() },
                Instruction::Leave(end.clone()),
                Instruction::BeginCatch(TypeReference::named("Exception")),
                Instruction::Op(Opcode::Pop),
                Instruction::Leave(end.clone()),
                Instruction::EndTry { end },
                Instruction::Op(Opcode::Ret),
            ],
        );
        emit_block(&mut backend, &slots, &mut body, &block).unwrap();
        assert_eq!(
            body.lines,
            vec![
                ".try L0",
                "leave L0",
                ".catch Exception",
                "pop",
                "leave L0",
                ".end",
                "ret",
            ]
        );
    }

    #[test]
    fn unwritten_forward_reference_fails() {
        let mut backend = RecordingBackend::default();
        let mut slots = SlotTable::new();
        let later = TypeKey::new("Later");
        slots.create(&later.clone().into());
        let mut body = backend.begin_body();
        let block = InstructionBlock::new(
            vec![],
            vec![Instruction::NewObject(later.constructor(vec![]).into())],
        );
        assert!(matches!(
            emit_block(&mut backend, &slots, &mut body, &block),
            Err(BuildError::Uninitialized { .. })
        ));
    }
}
