use std::fmt;

use thiserror::Error;

use crate::key::ItemKey;
use crate::symbol::Symbol;

/// Why a compile step could not consume one of its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmetReason {
    /// No step anywhere produces the key.
    NoProducer,
    /// Only a step of the given later phase produces the key.
    LaterPhase(u32),
    /// A step of the same phase produces the key but never became ready.
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckStep {
    pub description: String,
    pub unmet: Vec<(ItemKey, UnmetReason)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelErrorKind {
    Undefined,
    DefinedTwice,
}

#[derive(Debug, Clone, Error)]
pub enum BuildError {
    #[error("DeclarationError: {key} is declared more than once")]
    Declaration { key: ItemKey },

    #[error("SchedulingError: phase {phase} cannot make progress:{}", StuckList(.stuck))]
    Scheduling { phase: u32, stuck: Vec<StuckStep> },

    #[error("LabelError: label {label} is {kind}")]
    Label { label: Symbol, kind: LabelErrorKind },

    #[error("TypeError: {message}{}", in_expr(.expr))]
    Type {
        message: String,
        expr: Option<String>,
    },

    #[error("StructuralError: {message}")]
    Structural { message: String },

    #[error("UninitializedError: slot for {key} read before it was written")]
    Uninitialized { key: ItemKey },

    #[error("SingleAssignmentError: slot for {key} written twice")]
    SingleAssignment { key: ItemKey },

    #[error("BackendError: {message}")]
    Backend { message: String },
}

impl BuildError {
    pub fn type_error(message: impl Into<String>) -> Self {
        BuildError::Type {
            message: message.into(),
            expr: None,
        }
    }

    pub fn type_error_in(
        message: impl Into<String>,
        expr: &impl fmt::Display,
    ) -> Self {
        BuildError::Type {
            message: message.into(),
            expr: Some(expr.to_string()),
        }
    }

    pub fn structural(message: impl Into<String>) -> Self {
        BuildError::Structural {
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        BuildError::Backend {
            message: message.into(),
        }
    }
}

impl fmt::Display for LabelErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelErrorKind::Undefined => write!(f, "used but never defined"),
            LabelErrorKind::DefinedTwice => write!(f, "defined more than once"),
        }
    }
}

fn in_expr(expr: &Option<String>) -> String {
    expr.as_ref().map(|e| format!(" in {e}")).unwrap_or_default()
}

struct StuckList<'a>(&'a [StuckStep]);

impl fmt::Display for StuckList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in self.0 {
            write!(f, "\n  {} waits for", step.description)?;
            for (i, (key, reason)) in step.unmet.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                match reason {
                    UnmetReason::NoProducer => {
                        write!(f, "{sep}{key} (never produced)")?
                    }
                    UnmetReason::LaterPhase(phase) => {
                        write!(f, "{sep}{key} (produced in phase {phase})")?
                    }
                    UnmetReason::Blocked => write!(f, "{sep}{key} (blocked)")?,
                }
            }
        }
        Ok(())
    }
}

pub type BuildResult<T> = Result<T, BuildError>;
