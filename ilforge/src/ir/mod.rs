//! The symbolic stack-machine instruction IR.

mod block;
mod emit;
mod instruction;
mod opcode;

pub use block::{InstructionBlock, LocalDeclaration};
pub use emit::emit_block;
pub use instruction::Instruction;
pub use opcode::{BranchKind, Opcode, TypeOp};
