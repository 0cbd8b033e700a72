use crate::error::{BuildError, BuildResult};
use crate::ir::{Instruction, TypeOp};
use crate::reference::{FieldReference, TypeReference};
use crate::symbol::Symbol;

/// Anything instructions can be appended to.
pub trait Emit {
    fn emit(&mut self, instruction: Instruction);
}

impl Emit for Vec<Instruction> {
    fn emit(&mut self, instruction: Instruction) {
        self.push(instruction);
    }
}

/// Where a variable's storage physically lives.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Argument(u16),
    Local(Symbol),
    /// A field of the object held by another storage.
    Field {
        target: Box<VariableStorage>,
        field: FieldReference,
    },
}

/// How to read and write one variable.
///
/// A boxed storage holds a cell; reads and writes go through it.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableStorage {
    pub ty: TypeReference,
    pub location: Location,
    pub boxed: bool,
}

impl VariableStorage {
    pub fn argument(index: u16, ty: TypeReference) -> Self {
        Self {
            ty,
            location: Location::Argument(index),
            boxed: false,
        }
    }

    pub fn local(name: Symbol, ty: TypeReference, boxed: bool) -> Self {
        Self {
            ty,
            location: Location::Local(name),
            boxed,
        }
    }

    pub fn field(target: VariableStorage, field: FieldReference, ty: TypeReference) -> Self {
        Self {
            ty,
            location: Location::Field {
                target: Box::new(target),
                field,
            },
            boxed: true,
        }
    }

    /// The type of the physical slot: the cell type when boxed.
    pub fn slot_type(&self) -> TypeReference {
        if self.boxed {
            TypeReference::cell(self.ty.clone())
        } else {
            self.ty.clone()
        }
    }

    fn load_slot<E: Emit>(&self, out: &mut E) {
        match &self.location {
            Location::Argument(index) => out.emit(Instruction::LoadArg(*index)),
            Location::Local(name) => out.emit(Instruction::LoadLocal(name.clone())),
            Location::Field { target, field } => {
                target.fetch(out);
                out.emit(Instruction::LoadField(field.clone()));
            }
        }
    }

    /// Pushes the current value.
    pub fn fetch<E: Emit>(&self, out: &mut E) {
        self.load_slot(out);
        if self.boxed {
            out.emit(Instruction::TypeOp(TypeOp::LoadCell, self.ty.clone()));
        }
    }

    /// Pushes the cell itself.
    pub fn fetch_box<E: Emit>(&self, out: &mut E) -> BuildResult<()> {
        if !self.boxed {
            return Err(BuildError::structural(format!(
                "storage {:?} is not boxed",
                self.location
            )));
        }
        self.load_slot(out);
        Ok(())
    }

    /// Writes the value pushed by `value`.
    pub fn store<E: Emit>(
        &self,
        out: &mut E,
        value: impl FnOnce(&mut E) -> BuildResult<()>,
    ) -> BuildResult<()> {
        if self.boxed {
            self.load_slot(out);
            value(out)?;
            out.emit(Instruction::TypeOp(TypeOp::StoreCell, self.ty.clone()));
            return Ok(());
        }
        match &self.location {
            Location::Argument(index) => {
                value(out)?;
                out.emit(Instruction::StoreArg(*index));
            }
            Location::Local(name) => {
                value(out)?;
                out.emit(Instruction::StoreLocal(name.clone()));
            }
            Location::Field { target, field } => {
                target.fetch(out);
                value(out)?;
                out.emit(Instruction::StoreField(field.clone()));
            }
        }
        Ok(())
    }
}
