use core::fmt;

/// Stack-machine operations without operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    Nop,
    Dup,
    Pop,
    Ret,
    Throw,
    Add,
    Sub,
    Mul,
    Div,
    DivUn,
    Rem,
    RemUn,
    Neg,
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    ShrUn,
    Ceq,
    Cgt,
    CgtUn,
    Clt,
    CltUn,
    ConvI1,
    ConvI2,
    ConvI4,
    ConvI8,
    ConvU1,
    ConvU2,
    ConvU4,
    ConvU8,
    ConvR4,
    ConvR8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BranchKind {
    Always,
    True,
    False,
    Eq,
    NeUn,
    Lt,
    Gt,
    Le,
    Ge,
}

/// Operations taking a type operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeOp {
    Box,
    UnboxAny,
    CastClass,
    IsInst,
    /// Pops a value and pushes a fresh capture cell of the given content type
    /// holding it.
    NewCell,
    LoadCell,
    /// Pops a value then a cell, writes the value into the cell.
    StoreCell,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nop => "nop",
            Self::Dup => "dup",
            Self::Pop => "pop",
            Self::Ret => "ret",
            Self::Throw => "throw",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::DivUn => "div.un",
            Self::Rem => "rem",
            Self::RemUn => "rem.un",
            Self::Neg => "neg",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Not => "not",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::ShrUn => "shr.un",
            Self::Ceq => "ceq",
            Self::Cgt => "cgt",
            Self::CgtUn => "cgt.un",
            Self::Clt => "clt",
            Self::CltUn => "clt.un",
            Self::ConvI1 => "conv.i1",
            Self::ConvI2 => "conv.i2",
            Self::ConvI4 => "conv.i4",
            Self::ConvI8 => "conv.i8",
            Self::ConvU1 => "conv.u1",
            Self::ConvU2 => "conv.u2",
            Self::ConvU4 => "conv.u4",
            Self::ConvU8 => "conv.u8",
            Self::ConvR4 => "conv.r4",
            Self::ConvR8 => "conv.r8",
        };
        f.write_str(name)
    }
}

impl fmt::Display for BranchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Always => "br",
            Self::True => "brtrue",
            Self::False => "brfalse",
            Self::Eq => "beq",
            Self::NeUn => "bne.un",
            Self::Lt => "blt",
            Self::Gt => "bgt",
            Self::Le => "ble",
            Self::Ge => "bge",
        };
        f.write_str(name)
    }
}

impl fmt::Display for TypeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Box => "box",
            Self::UnboxAny => "unbox.any",
            Self::CastClass => "castclass",
            Self::IsInst => "isinst",
            Self::NewCell => "newcell",
            Self::LoadCell => "ldcell",
            Self::StoreCell => "stcell",
        };
        f.write_str(name)
    }
}
