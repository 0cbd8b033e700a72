use std::collections::BTreeSet;

use crate::error::{BuildError, BuildResult, LabelErrorKind};
use crate::ir::Instruction;
use crate::key::ItemKey;
use crate::reference::TypeReference;
use crate::symbol::Symbol;

#[derive(Debug, Clone, PartialEq)]
pub struct LocalDeclaration {
    pub name: Symbol,
    pub ty: TypeReference,
}

/// A body fragment: declared locals plus the instructions that use them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstructionBlock {
    pub locals: Vec<LocalDeclaration>,
    pub instructions: Vec<Instruction>,
}

impl InstructionBlock {
    pub fn new(locals: Vec<LocalDeclaration>, instructions: Vec<Instruction>) -> Self {
        Self {
            locals,
            instructions,
        }
    }

    /// Every label must be defined exactly once, and every used label defined.
    pub fn check_labels(&self) -> BuildResult<()> {
        let mut defined = BTreeSet::new();
        for instruction in &self.instructions {
            if let Some(label) = instruction.defined_label() {
                if !defined.insert(label) {
                    return Err(BuildError::Label {
                        label: label.clone(),
                        kind: LabelErrorKind::DefinedTwice,
                    });
                }
            }
        }
        let used: BTreeSet<&Symbol> = self
            .instructions
            .iter()
            .flat_map(Instruction::used_labels)
            .collect();
        match used.difference(&defined).next() {
            Some(label) => Err(BuildError::Label {
                label: (*label).clone(),
                kind: LabelErrorKind::Undefined,
            }),
            None => Ok(()),
        }
    }

    pub fn check_locals(&self) -> BuildResult<()> {
        let mut declared = BTreeSet::new();
        for local in &self.locals {
            if !declared.insert(&local.name) {
                return Err(BuildError::structural(format!(
                    "local {} is declared more than once",
                    local.name
                )));
            }
        }
        for instruction in &self.instructions {
            if let Some(local) = instruction.local() {
                if !declared.contains(local) {
                    return Err(BuildError::structural(format!(
                        "local {local} is used but not declared"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> BuildResult<()> {
        self.check_labels()?;
        self.check_locals()
    }

    pub fn collect_references(&self, out: &mut BTreeSet<ItemKey>) {
        for local in &self.locals {
            local.ty.collect_keys(out);
        }
        for instruction in &self.instructions {
            instruction.collect_references(out);
        }
    }

    pub fn references(&self) -> BTreeSet<ItemKey> {
        let mut keys = BTreeSet::new();
        self.collect_references(&mut keys);
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BranchKind, Opcode};

    fn block(instructions: Vec<Instruction>) -> InstructionBlock {
        InstructionBlock::new(vec![], instructions)
    }

    #[test]
    fn used_label_without_definition_fails() {
        let target = Symbol::new("missing");
        let err = block(vec![
            Instruction::Branch(BranchKind::Always, target.clone()),
            Instruction::Op(Opcode::Ret),
        ])
        .check_labels()
        .unwrap_err();
        assert!(matches!(
            err,
            BuildError::Label { ref label, kind: LabelErrorKind::Undefined } if *label == target
        ));
    }

    #[test]
    fn label_defined_twice_fails() {
        let l = Symbol::new("l");
        let err = block(vec![Instruction::Label(l.clone()), Instruction::Label(l)])
            .check_labels()
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::Label {
                kind: LabelErrorKind::DefinedTwice,
                ..
            }
        ));
    }

    #[test]
    fn balanced_sequences_pass() {
        let top = Symbol::new("top");
        let out = Symbol::new("out");
        let end = Symbol::new("end");
        block(vec![
            Instruction::Label(top.clone()),
            Instruction::LoadArg(0),
            Instruction::Branch(BranchKind::True, out.clone()),
            Instruction::Branch(BranchKind::Always, top),
            Instruction::Label(out),
            Instruction::BeginTry { end: end.clone() },
            Instruction::Leave(end.clone()),
            Instruction::BeginFinally,
            Instruction::EndTry { end },
            Instruction::Op(Opcode::Ret),
        ])
        .check_labels()
        .unwrap();
    }

    #[test]
    fn undeclared_local_is_structural() {
        let err = block(vec![Instruction::LoadLocal(Symbol::new("t"))])
            .check_locals()
            .unwrap_err();
        assert!(matches!(err, BuildError::Structural { .. }));

        InstructionBlock::new(
            vec![LocalDeclaration {
                name: Symbol::new("t"),
                ty: TypeReference::i32(),
            }],
            vec![Instruction::LoadLocal(Symbol::new("t"))],
        )
        .check_locals()
        .unwrap();
    }
}
