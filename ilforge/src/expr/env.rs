//! Free-variable analysis.
//!
//! A variable is *captured* when some reference to it sits inside a lambda
//! nested in the expression. Captured variables are stored in cells; every
//! other variable keeps plain argument or local storage.

use std::collections::BTreeMap;
use std::collections::btree_map;

use super::Expr;
use crate::symbol::Symbol;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VarUsage {
    pub written: bool,
    pub captured: bool,
}

impl VarUsage {
    fn merge(self, other: VarUsage) -> VarUsage {
        VarUsage {
            written: self.written || other.written,
            captured: self.captured || other.captured,
        }
    }
}

/// The free variables of an expression and how each is used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSpec {
    vars: BTreeMap<Symbol, VarUsage>,
}

impl EnvSpec {
    pub fn get(&self, name: &Symbol) -> Option<VarUsage> {
        self.vars.get(name).copied()
    }

    pub fn is_captured(&self, name: &Symbol) -> bool {
        self.get(name).is_some_and(|usage| usage.captured)
    }

    pub fn is_written(&self, name: &Symbol) -> bool {
        self.get(name).is_some_and(|usage| usage.written)
    }

    pub fn contains(&self, name: &Symbol) -> bool {
        self.vars.contains_key(name)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Symbol, VarUsage> {
        self.vars.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &Symbol> {
        self.vars.keys()
    }

    fn add(&mut self, name: &Symbol, usage: VarUsage) {
        let entry = self.vars.entry(name.clone()).or_default();
        *entry = entry.merge(usage);
    }

    pub(crate) fn union(mut self, other: EnvSpec) -> EnvSpec {
        for (name, usage) in other.vars {
            self.add(&name, usage);
        }
        self
    }

    fn without<'a>(mut self, bound: impl IntoIterator<Item = &'a Symbol>) -> EnvSpec {
        for name in bound {
            self.vars.remove(name);
        }
        self
    }

    fn captured(mut self) -> EnvSpec {
        for usage in self.vars.values_mut() {
            usage.captured = true;
        }
        self
    }
}

impl Expr {
    pub fn env_spec(&self) -> EnvSpec {
        match self {
            Expr::Var(name) => {
                let mut spec = EnvSpec::default();
                spec.add(name, VarUsage::default());
                spec
            }
            Expr::Assign { var, value } => {
                let mut spec = value.env_spec();
                spec.add(
                    var,
                    VarUsage {
                        written: true,
                        captured: false,
                    },
                );
                spec
            }
            Expr::Let { bindings, body } => {
                let inits = bindings
                    .iter()
                    .fold(EnvSpec::default(), |spec, b| spec.union(b.value.env_spec()));
                let body = body
                    .env_spec()
                    .without(bindings.iter().map(|binding| &binding.name));
                inits.union(body)
            }
            Expr::Lambda(lambda) => lambda
                .body
                .env_spec()
                .without(lambda.params.iter().map(|param| &param.name))
                .captured(),
            _ => self
                .children()
                .into_iter()
                .fold(EnvSpec::default(), |spec, child| spec.union(child.env_spec())),
        }
    }
}
