use core::fmt;

use super::{BinaryOp, Expr, Literal, UnaryOp};

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(v) => write!(f, "{v}"),
            Literal::Char(v) => write!(f, "{v:?}"),
            Literal::I8(v) => write!(f, "{v}i8"),
            Literal::I16(v) => write!(f, "{v}i16"),
            Literal::I32(v) => write!(f, "{v}"),
            Literal::I64(v) => write!(f, "{v}i64"),
            Literal::U8(v) => write!(f, "{v}u8"),
            Literal::U16(v) => write!(f, "{v}u16"),
            Literal::U32(v) => write!(f, "{v}u32"),
            Literal::U64(v) => write!(f, "{v}u64"),
            Literal::F32(v) => write!(f, "{v:?}f32"),
            Literal::F64(v) => write!(f, "{v:?}"),
            Literal::String(v) => write!(f, "{v:?}"),
            Literal::Null(ty) => write!(f, "(null {ty})"),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Not => write!(f, "not"),
            UnaryOp::Negate => write!(f, "neg"),
            UnaryOp::Convert(ty) => write!(f, "as-{}", ty.name()),
        }
    }
}

fn spaced(f: &mut fmt::Formatter<'_>, exprs: &[Expr]) -> fmt::Result {
    for expr in exprs {
        write!(f, " {expr}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(literal) => write!(f, "{literal}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Assign { var, value } => write!(f, "(set! {var} {value})"),
            Expr::Begin(exprs) => {
                write!(f, "(begin")?;
                spaced(f, exprs)?;
                write!(f, ")")
            }
            Expr::And(exprs) => {
                write!(f, "(and")?;
                spaced(f, exprs)?;
                write!(f, ")")
            }
            Expr::Or(exprs) => {
                write!(f, "(or")?;
                spaced(f, exprs)?;
                write!(f, ")")
            }
            Expr::If {
                condition,
                then,
                otherwise,
            } => write!(f, "(if {condition} {then} {otherwise})"),
            Expr::Switch {
                value,
                cases,
                default,
            } => {
                write!(f, "(switch {value}")?;
                for case in cases {
                    write!(f, " ((")?;
                    for (i, v) in case.values.iter().enumerate() {
                        if i > 0 {
                            write!(f, " ")?;
                        }
                        write!(f, "{v}")?;
                    }
                    write!(f, ") {})", case.body)?;
                }
                write!(f, " (else {default}))")
            }
            Expr::Let { bindings, body } => {
                write!(f, "(let (")?;
                for (i, binding) in bindings.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "({} {})", binding.name, binding.value)?;
                }
                write!(f, ") {body})")
            }
            Expr::Lambda(lambda) => {
                write!(f, "(lambda (")?;
                for (i, param) in lambda.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "({} {})", param.name, param.ty)?;
                }
                write!(f, ") {})", lambda.body)
            }
            Expr::Invoke { function, args } => {
                write!(f, "(invoke {function}")?;
                spaced(f, args)?;
                write!(f, ")")
            }
            Expr::Binary { op, left, right } => write!(f, "({op} {left} {right})"),
            Expr::Unary { op, operand } => write!(f, "({op} {operand})"),
            Expr::FieldGet { target, field } => match target {
                Some(target) => write!(f, "(field {target} {field})"),
                None => write!(f, "(field {field})"),
            },
            Expr::FieldSet {
                target,
                field,
                value,
            } => match target {
                Some(target) => write!(f, "(set-field! {target} {field} {value})"),
                None => write!(f, "(set-field! {field} {value})"),
            },
            Expr::New { ctor, args } => {
                write!(f, "(new {}", ctor.owner())?;
                spaced(f, args)?;
                write!(f, ")")
            }
            Expr::Call {
                target,
                method,
                args,
            } => {
                write!(f, "(call")?;
                if let Some(target) = target {
                    write!(f, " {target}")?;
                }
                write!(f, " {method}")?;
                spaced(f, args)?;
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::TypeKey;
    use crate::symbol::Symbol;

    #[test]
    fn renders_s_expressions() {
        let acc = TypeKey::new("Acc");
        let expr = Expr::let_(
            vec![(Symbol::new("x"), Expr::i32(3))],
            Expr::if_(
                Expr::binary(BinaryOp::Lt, Expr::var("x"), Expr::i32(4)),
                Expr::field(Expr::var("this"), acc.field("a")),
                Expr::unary(UnaryOp::Negate, Expr::var("x")),
            ),
        );
        assert_eq!(
            expr.to_string(),
            "(let ((x 3)) (if (< x 4) (field this Acc::a) (neg x)))"
        );
        assert_eq!(
            Expr::switch(Expr::u32(2), vec![(vec![0, 1], Expr::string("low"))], Expr::string("hi"))
                .to_string(),
            "(switch 2u32 ((0 1) \"low\") (else \"hi\"))"
        );
    }
}
