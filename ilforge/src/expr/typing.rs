use std::collections::{BTreeMap, BTreeSet};

use super::{BinaryOp, Expr, Literal, UnaryOp};
use crate::error::{BuildError, BuildResult};
use crate::metadata::TypeOracle;
use crate::reference::{PrimitiveType, TypeReference};
use crate::symbol::Symbol;

/// Variable types in scope plus the oracle for everything else.
#[derive(Clone)]
pub struct TypeEnv<'a> {
    oracle: TypeOracle<'a>,
    vars: BTreeMap<Symbol, TypeReference>,
}

impl<'a> TypeEnv<'a> {
    pub fn new(oracle: TypeOracle<'a>) -> Self {
        Self {
            oracle,
            vars: BTreeMap::new(),
        }
    }

    pub fn oracle(&self) -> TypeOracle<'a> {
        self.oracle
    }

    pub fn lookup(&self, name: &Symbol) -> Option<&TypeReference> {
        self.vars.get(name)
    }

    pub fn bind(&mut self, name: Symbol, ty: TypeReference) {
        self.vars.insert(name, ty);
    }

    pub fn with(&self, name: Symbol, ty: TypeReference) -> Self {
        let mut env = self.clone();
        env.bind(name, ty);
        env
    }
}

pub(super) fn primitive_matches(ty: &TypeReference, test: impl Fn(PrimitiveType) -> bool) -> bool {
    ty.as_primitive().is_some_and(test)
}

impl Expr {
    /// The static type of this expression, checking every sub-expression.
    pub fn return_type(&self, env: &TypeEnv<'_>) -> BuildResult<TypeReference> {
        let oracle = env.oracle();
        let fail = |message: String| Err(BuildError::type_error_in(message, self));
        match self {
            Expr::Literal(Literal::Null(ty)) => {
                if !oracle.is_reference_type(ty) {
                    return fail(format!("unsupported literal: null of value type {ty}"));
                }
                Ok(ty.clone())
            }
            Expr::Literal(literal) => match literal.primitive() {
                Some(primitive) => Ok(TypeReference::primitive(primitive)),
                None => fail("unsupported literal".to_string()),
            },
            Expr::Var(name) => match env.lookup(name) {
                Some(ty) => Ok(ty.clone()),
                None => fail(format!("unbound variable {name}")),
            },
            Expr::Assign { var, value } => {
                let Some(target) = env.lookup(var) else {
                    return fail(format!("unbound variable {var}"));
                };
                let value = value.return_type(env)?;
                if !oracle.is_assignable(&value, target) {
                    return fail(format!("cannot assign {value} to {var}: {target}"));
                }
                Ok(TypeReference::void())
            }
            Expr::Begin(exprs) => {
                let mut ty = TypeReference::void();
                for expr in exprs {
                    ty = expr.return_type(env)?;
                }
                Ok(ty)
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                for expr in exprs {
                    let ty = expr.return_type(env)?;
                    if !ty.is_bool() {
                        return fail(format!("operand {expr} has type {ty}, expected bool"));
                    }
                }
                Ok(TypeReference::bool())
            }
            Expr::If {
                condition,
                then,
                otherwise,
            } => {
                let cond = condition.return_type(env)?;
                if !cond.is_bool() {
                    return fail(format!("condition has type {cond}, expected bool"));
                }
                let then = then.return_type(env)?;
                let otherwise = otherwise.return_type(env)?;
                if then != otherwise {
                    return fail(format!("branches have different types {then} and {otherwise}"));
                }
                Ok(then)
            }
            Expr::Switch {
                value,
                cases,
                default,
            } => {
                let value = value.return_type(env)?;
                if !primitive_matches(&value, |p| {
                    matches!(
                        p,
                        PrimitiveType::U8
                            | PrimitiveType::U16
                            | PrimitiveType::U32
                            | PrimitiveType::U64
                    )
                }) {
                    return fail(format!(
                        "switch value has type {value}, expected an unsigned integer"
                    ));
                }
                let ty = default.return_type(env)?;
                for case in cases {
                    let case_ty = case.body.return_type(env)?;
                    if case_ty != ty {
                        return fail(format!(
                            "switch case has type {case_ty}, default has type {ty}"
                        ));
                    }
                }
                Ok(ty)
            }
            Expr::Let { bindings, body } => {
                let mut inner = env.clone();
                let mut seen = BTreeSet::new();
                for binding in bindings {
                    if !seen.insert(&binding.name) {
                        return fail(format!("{} is bound twice", binding.name));
                    }
                    let ty = binding.value.return_type(env)?;
                    if ty.is_void() {
                        return fail(format!("{} is bound to a void value", binding.name));
                    }
                    inner.bind(binding.name.clone(), ty);
                }
                body.return_type(&inner)
            }
            Expr::Lambda(lambda) => {
                let mut inner = env.clone();
                for param in &lambda.params {
                    inner.bind(param.name.clone(), param.ty.clone());
                }
                let ret = lambda.body.return_type(&inner)?;
                let params = lambda.params.iter().map(|param| param.ty.clone()).collect();
                Ok(TypeReference::delegate(params, ret))
            }
            Expr::Invoke { function, args } => {
                let function = function.return_type(env)?;
                let Some((params, ret)) = function.delegate_signature() else {
                    return fail(format!("cannot invoke a value of type {function}"));
                };
                check_args(env, self, params, args)?;
                Ok(ret.clone())
            }
            Expr::Binary { op, left, right } => {
                let l = left.return_type(env)?;
                let r = right.return_type(env)?;
                binary_type(env, *op, &l, &r).ok_or_else(|| {
                    BuildError::type_error_in(
                        format!("operator {op} does not apply to {l} and {r}"),
                        self,
                    )
                })
            }
            Expr::Unary { op, operand } => {
                let ty = operand.return_type(env)?;
                let ok = match op {
                    UnaryOp::Not => primitive_matches(&ty, |p| {
                        p == PrimitiveType::Bool || p.is_integer()
                    }),
                    UnaryOp::Negate => primitive_matches(&ty, |p| {
                        p.is_signed_integer() || p.is_float()
                    }),
                    UnaryOp::Convert(to) => {
                        to.is_numeric() && primitive_matches(&ty, PrimitiveType::is_numeric)
                    }
                };
                if !ok {
                    return fail(format!("{op} does not apply to {ty}"));
                }
                Ok(match op {
                    UnaryOp::Convert(to) => TypeReference::primitive(*to),
                    _ => ty,
                })
            }
            Expr::FieldGet { target, field } => {
                let info = field.info(oracle.table())?;
                check_target(env, self, target.as_deref(), &info.owner, info.is_instance)?;
                Ok(info.field_type)
            }
            Expr::FieldSet {
                target,
                field,
                value,
            } => {
                let info = field.info(oracle.table())?;
                check_target(env, self, target.as_deref(), &info.owner, info.is_instance)?;
                let value = value.return_type(env)?;
                if !oracle.is_assignable(&value, &info.field_type) {
                    return fail(format!(
                        "cannot store {value} into {field}: {}",
                        info.field_type
                    ));
                }
                Ok(TypeReference::void())
            }
            Expr::New { ctor, args } => {
                ctor.check_declared(oracle.table())?;
                let owner = ctor.owner();
                if oracle.is_interface(&owner) {
                    return fail(format!("cannot construct interface {owner}"));
                }
                check_args(env, self, ctor.params(), args)?;
                Ok(owner)
            }
            Expr::Call {
                target,
                method,
                args,
            } => {
                let info = method.info(oracle.table())?;
                check_target(env, self, target.as_deref(), &info.owner, info.is_instance)?;
                check_args(env, self, &info.params, args)?;
                Ok(info.return_type)
            }
        }
    }
}

fn check_args(
    env: &TypeEnv<'_>,
    expr: &Expr,
    params: &[TypeReference],
    args: &[Expr],
) -> BuildResult<()> {
    if params.len() != args.len() {
        return Err(BuildError::type_error_in(
            format!("expected {} arguments, found {}", params.len(), args.len()),
            expr,
        ));
    }
    for (param, arg) in params.iter().zip(args) {
        let ty = arg.return_type(env)?;
        if !env.oracle().is_assignable(&ty, param) {
            return Err(BuildError::type_error_in(
                format!("argument {arg} has type {ty}, expected {param}"),
                expr,
            ));
        }
    }
    Ok(())
}

fn check_target(
    env: &TypeEnv<'_>,
    expr: &Expr,
    target: Option<&Expr>,
    owner: &TypeReference,
    is_instance: bool,
) -> BuildResult<()> {
    match (target, is_instance) {
        (Some(target), true) => {
            let ty = target.return_type(env)?;
            if !env.oracle().is_assignable(&ty, owner) {
                return Err(BuildError::type_error_in(
                    format!("receiver has type {ty}, expected {owner}"),
                    expr,
                ));
            }
            Ok(())
        }
        (None, false) => Ok(()),
        (Some(_), false) => Err(BuildError::type_error_in(
            "static member accessed through an instance",
            expr,
        )),
        (None, true) => Err(BuildError::type_error_in(
            "instance member accessed without a receiver",
            expr,
        )),
    }
}

fn binary_type(
    env: &TypeEnv<'_>,
    op: BinaryOp,
    l: &TypeReference,
    r: &TypeReference,
) -> Option<TypeReference> {
    let numeric = primitive_matches(l, PrimitiveType::is_numeric);
    let integer = primitive_matches(l, PrimitiveType::is_integer);
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            (l == r && numeric).then(|| l.clone())
        }
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
            (l == r && (integer || l.is_bool())).then(|| l.clone())
        }
        BinaryOp::Shl | BinaryOp::Shr => {
            (integer && *r == TypeReference::i32()).then(|| l.clone())
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            let comparable =
                numeric || l.is_bool() || env.oracle().is_reference_type(l);
            (l == r && comparable).then(TypeReference::bool)
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            (l == r && numeric).then(TypeReference::bool)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{FieldAttributes, TypeAttributes};
    use crate::key::TypeKey;
    use crate::metadata::BuiltinMetadata;
    use crate::table::{Declaration, FieldDeclaration, SymbolTable, TypeDeclaration};

    fn table() -> SymbolTable {
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
                    attributes: FieldAttributes::PUBLIC,
                    field_type: TypeReference::i32(),
                }),
            )
            .unwrap()
    }

    fn check(expr: &Expr) -> BuildResult<TypeReference> {
        let table = table();
        let metadata = BuiltinMetadata::new();
        let env = TypeEnv::new(TypeOracle::new(&table, &metadata))
            .with(Symbol::new("this"), TypeReference::new_type("Acc"))
            .with(Symbol::new("n"), TypeReference::i32())
            .with(Symbol::new("s"), TypeReference::string());
        expr.return_type(&env)
    }

    fn is_type_error(result: BuildResult<TypeReference>) -> bool {
        matches!(result, Err(BuildError::Type { .. }))
    }

    #[test]
    fn if_branches_must_agree() {
        let ok = Expr::if_(Expr::bool(true), Expr::i32(1), Expr::var("n"));
        assert_eq!(check(&ok).unwrap(), TypeReference::i32());
        let bad = Expr::if_(Expr::bool(true), Expr::i32(1), Expr::var("s"));
        assert!(is_type_error(check(&bad)));
        let cond = Expr::if_(Expr::i32(0), Expr::i32(1), Expr::i32(2));
        assert!(is_type_error(check(&cond)));
    }

    #[test]
    fn assignment_requires_assignable_value() {
        assert_eq!(
            check(&Expr::assign("n", Expr::i32(2))).unwrap(),
            TypeReference::void()
        );
        assert!(is_type_error(check(&Expr::assign("n", Expr::string("x")))));
        assert!(is_type_error(check(&Expr::assign("missing", Expr::i32(1)))));
    }

    #[test]
    fn switch_needs_unsigned_value_and_agreeing_cases() {
        let ok = Expr::switch(Expr::u32(1), vec![(vec![0], Expr::i32(5))], Expr::i32(6));
        assert_eq!(check(&ok).unwrap(), TypeReference::i32());
        let signed = Expr::switch(Expr::i32(1), vec![], Expr::i32(6));
        assert!(is_type_error(check(&signed)));
        let mixed = Expr::switch(Expr::u32(1), vec![(vec![0], Expr::string("a"))], Expr::i32(6));
        assert!(is_type_error(check(&mixed)));
    }

    #[test]
    fn field_access_uses_declared_type() {
        let acc = TypeKey::new("Acc");
        let get = Expr::field(Expr::var("this"), acc.field("a"));
        assert_eq!(check(&get).unwrap(), TypeReference::i32());
        let no_receiver = Expr::static_field(acc.field("a"));
        assert!(is_type_error(check(&no_receiver)));
        let wrong = Expr::set_field(Expr::var("this"), acc.field("a"), Expr::bool(false));
        assert!(is_type_error(check(&wrong)));
    }

    #[test]
    fn null_of_value_type_is_rejected() {
        assert!(is_type_error(check(&Expr::null(TypeReference::i32()))));
        assert_eq!(
            check(&Expr::null(TypeReference::string())).unwrap(),
            TypeReference::string()
        );
    }

    #[test]
    fn let_is_parallel() {
        // (let ((n "text") (m n)) m): m sees the outer n.
        let expr = Expr::let_(
            vec![
                (Symbol::new("n"), Expr::string("text")),
                (Symbol::new("m"), Expr::var("n")),
            ],
            Expr::var("m"),
        );
        assert_eq!(check(&expr).unwrap(), TypeReference::i32());
    }

    #[test]
    fn and_or_need_booleans() {
        assert_eq!(check(&Expr::and(vec![])).unwrap(), TypeReference::bool());
        assert!(is_type_error(check(&Expr::or(vec![Expr::bool(true), Expr::i32(1)]))));
    }

    #[test]
    fn type_error_renders_the_expression() {
        let err = check(&Expr::if_(Expr::bool(true), Expr::i32(1), Expr::string("x")))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: branches have different types i32 and string in (if true 1 \"x\")"
        );
    }
}
