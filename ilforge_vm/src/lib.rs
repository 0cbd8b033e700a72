//! A reference backend and interpreter for `ilforge` modules.
//!
//! [`VmBackend`] materializes built modules into an in-memory [`Program`];
//! [`Interpreter`] runs it.

pub mod backend;
pub mod demo;
pub mod error;
pub mod interpreter;
pub mod natives;
pub mod program;
pub mod value;

pub use backend::VmBackend;
pub use error::{Error, RuntimeError};
pub use interpreter::{Interpreter, MAX_FRAMES};
pub use program::{Program, Ty};
pub use value::Value;
