//! Lambdas become synthesized closure types.
//!
//! A closure type has one field per captured variable holding that
//! variable's cell, a constructor taking the cells in capture order and an
//! `Invoke` instance method compiled from the lambda body.

use std::collections::BTreeMap;

use super::lower::{CapturedField, LambdaBody};
use super::{Expr, Lambda, Param, TypeEnv};
use crate::error::{BuildError, BuildResult};
use crate::key::{ConstructorKey, FieldKey, ItemKey, MethodKey, TypeKey};
use crate::reference::TypeReference;
use crate::symbol::Symbol;

pub(crate) const INVOKE: &str = "Invoke";

pub(crate) fn closure_key(closure: &Symbol) -> TypeKey {
    TypeKey::new(&format!("<closure>{closure}"))
}

pub(crate) fn receiver() -> Symbol {
    Symbol::new("<closure-self>")
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosureLayout {
    pub key: TypeKey,
    /// Captured variables and their value types, in symbol order.
    pub captures: Vec<(Symbol, TypeReference)>,
    pub params: Vec<Param>,
    pub return_type: TypeReference,
    pub body: Expr,
}

impl ClosureLayout {
    pub fn of(lambda: &Lambda, env: &TypeEnv<'_>) -> BuildResult<Self> {
        let expr = Expr::Lambda(lambda.clone());
        let captures = expr
            .env_spec()
            .names()
            .map(|name| match env.lookup(name) {
                Some(ty) => Ok((name.clone(), ty.clone())),
                None => Err(BuildError::type_error_in(
                    format!("unbound variable {name}"),
                    &expr,
                )),
            })
            .collect::<BuildResult<Vec<_>>>()?;
        let ty = expr.return_type(env)?;
        let return_type = ty
            .delegate_signature()
            .map(|(_, ret)| ret.clone())
            .unwrap_or_else(TypeReference::void);
        Ok(Self {
            key: closure_key(&lambda.closure),
            captures,
            params: lambda.params.clone(),
            return_type,
            body: (*lambda.body).clone(),
        })
    }

    pub fn field(&self, capture: &Symbol) -> FieldKey {
        self.key.field(&capture.to_string())
    }

    pub fn cell_types(&self) -> Vec<TypeReference> {
        self.captures
            .iter()
            .map(|(_, ty)| TypeReference::cell(ty.clone()))
            .collect()
    }

    pub fn constructor(&self) -> ConstructorKey {
        self.key.constructor(self.cell_types())
    }

    pub fn invoke(&self) -> MethodKey {
        let params = self.params.iter().map(|param| param.ty.clone()).collect();
        self.key.method(INVOKE, params, true)
    }

    pub fn delegate_type(&self) -> TypeReference {
        TypeReference::delegate(
            self.params.iter().map(|param| param.ty.clone()).collect(),
            self.return_type.clone(),
        )
    }

    /// The `Invoke` body: receiver first, captures reached through it.
    pub fn invoke_body(&self) -> LambdaBody {
        let mut params = vec![Param::new(receiver(), TypeReference::Key(self.key.clone()))];
        params.extend(self.params.iter().cloned());
        LambdaBody {
            params,
            captures: self
                .captures
                .iter()
                .map(|(name, ty)| CapturedField {
                    name: name.clone(),
                    ty: ty.clone(),
                    field: self.field(name).into(),
                })
                .collect(),
            body: self.body.clone(),
        }
    }
}

/// Finds every lambda in `expr`, including lambdas nested in lambdas.
pub fn collect_closures(expr: &Expr, env: &TypeEnv<'_>) -> BuildResult<Vec<ClosureLayout>> {
    let mut found = BTreeMap::new();
    walk(expr, env, &mut found)?;
    Ok(found.into_values().collect())
}

fn walk(
    expr: &Expr,
    env: &TypeEnv<'_>,
    found: &mut BTreeMap<TypeKey, ClosureLayout>,
) -> BuildResult<()> {
    match expr {
        Expr::Let { bindings, body } => {
            let mut inner = env.clone();
            for binding in bindings {
                walk(&binding.value, env, found)?;
                inner.bind(binding.name.clone(), binding.value.return_type(env)?);
            }
            walk(body, &inner, found)
        }
        Expr::Lambda(lambda) => {
            let layout = ClosureLayout::of(lambda, env)?;
            let mut inner = env.clone();
            for param in &lambda.params {
                inner.bind(param.name.clone(), param.ty.clone());
            }
            match found.get(&layout.key) {
                Some(existing) if *existing != layout => {
                    return Err(BuildError::Declaration {
                        key: ItemKey::Type(layout.key),
                    });
                }
                Some(_) => {}
                None => {
                    found.insert(layout.key.clone(), layout);
                }
            }
            walk(&lambda.body, &inner, found)
        }
        _ => {
            for child in expr.children() {
                walk(child, env, found)?;
            }
            Ok(())
        }
    }
}
