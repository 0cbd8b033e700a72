use thiserror::Error;

use ilforge::ir::Opcode;

use crate::value::Value;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("null reference in {context}")]
    NullReference { context: String },
    #[error("no native implementation of {name}")]
    MissingNative { name: String },
    #[error("method {name} has no body")]
    MissingBody { name: String },
    #[error("uncaught exception: {message}")]
    Uncaught { message: String },
    #[error("stack underflow in {method}")]
    StackUnderflow { method: String },
    #[error("stack overflow")]
    StackOverflow,
    #[error("expected {expected}, found {found:?}")]
    TypeConfusion { expected: &'static str, found: Value },
    #[error("cannot cast {value:?} to {target}")]
    InvalidCast { value: Value, target: String },
    #[error("cannot apply {op} to {operand:?}")]
    InvalidOpcode { op: Opcode, operand: Value },
    #[error("division by zero")]
    DivideByZero,
    #[error("invalid operand in {method}: {detail}")]
    InvalidOperand { method: String, detail: String },
    #[error("type {name} is not part of the program")]
    UnknownType { name: String },
}

/// Anything that can go wrong between describing a module and running it.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Build(#[from] ilforge::BuildError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
