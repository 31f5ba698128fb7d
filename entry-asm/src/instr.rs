use std::fmt::{Display, Formatter};

use crate::registers::{FloatRegister, Register, RSCRATCH2};
use crate::runtime_entry::RuntimeEntry;
use crate::{CodeAddress, LabelName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Size {
    Byte,
    X86Word,
    X86DWord,
    X86QWord,
}

impl Size {
    pub fn bytes(&self) -> usize {
        match self {
            Size::Byte => 1,
            Size::X86Word => 2,
            Size::X86DWord => 4,
            Size::X86QWord => 8,
        }
    }

    pub fn bits(&self) -> u32 {
        self.bytes() as u32 * 8
    }

    pub fn mask(&self) -> u64 {
        match self {
            Size::X86QWord => u64::MAX,
            _ => (1u64 << self.bits()) - 1,
        }
    }

    /// Reinterprets the low bits as a signed value of this size.
    pub fn sign_extend(&self, value: u64) -> i64 {
        let shift = 64 - self.bits();
        ((value << shift) as i64) >> shift
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extension {
    Zero,
    Sign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scale {
    Times1,
    Times2,
    Times4,
    Times8,
}

impl Scale {
    pub fn factor(&self) -> u32 {
        match self {
            Scale::Times1 => 1,
            Scale::Times2 => 2,
            Scale::Times4 => 4,
            Scale::Times8 => 8,
        }
    }
}

/// `[base + index * scale + disp]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub base: Register,
    pub index: Option<(Register, Scale)>,
    pub disp: i32,
}

impl Address {
    pub fn new(base: Register, disp: i32) -> Self {
        Self { base, index: None, disp }
    }

    pub fn indexed(base: Register, index: Register, scale: Scale, disp: i32) -> Self {
        Self { base, index: Some((index, scale)), disp }
    }

    pub fn plus_disp(&self, extra: i32) -> Self {
        Self { disp: self.disp + extra, ..*self }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}", self.base)?;
        if let Some((index, scale)) = self.index {
            write!(f, " + {}*{}", index, scale.factor())?;
        }
        if self.disp != 0 {
            write!(f, " {} {:#x}", if self.disp < 0 { '-' } else { '+' }, (self.disp as i64).abs())?;
        }
        write!(f, "]")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Reg(Register),
    Mem(Address),
    /// Sign extended to the operation size.
    Imm(i32),
}

impl From<Register> for Operand {
    fn from(register: Register) -> Self {
        Operand::Reg(register)
    }
}

impl From<Address> for Operand {
    fn from(address: Address) -> Self {
        Operand::Mem(address)
    }
}

impl From<i32> for Operand {
    fn from(imm: i32) -> Self {
        Operand::Imm(imm)
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Reg(register) => write!(f, "{}", register),
            Operand::Mem(address) => write!(f, "{}", address),
            Operand::Imm(imm) => write!(f, "{:#x}", imm),
        }
    }
}

/// Where control goes: a label of the same buffer, an already generated entry, or an address
/// outside generated code (native functions, dispatch tables, compiled code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Label(LabelName),
    Code(CodeAddress),
    External(u64),
}

impl From<LabelName> for Target {
    fn from(label: LabelName) -> Self {
        Target::Label(label)
    }
}

impl From<CodeAddress> for Target {
    fn from(address: CodeAddress) -> Self {
        Target::Code(address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Immediate {
    Value(u64),
    Code(CodeAddress),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Below,
    BelowEqual,
    Above,
    AboveEqual,
}

impl Condition {
    pub fn negate(&self) -> Condition {
        match self {
            Condition::Equal => Condition::NotEqual,
            Condition::NotEqual => Condition::Equal,
            Condition::Less => Condition::GreaterEqual,
            Condition::LessEqual => Condition::Greater,
            Condition::Greater => Condition::LessEqual,
            Condition::GreaterEqual => Condition::Less,
            Condition::Below => Condition::AboveEqual,
            Condition::BelowEqual => Condition::Above,
            Condition::Above => Condition::BelowEqual,
            Condition::AboveEqual => Condition::Below,
        }
    }

    /// Compares `a` against `b`, both holding `size` bits.
    pub fn holds(&self, a: u64, b: u64, size: Size) -> bool {
        let (ua, ub) = (a & size.mask(), b & size.mask());
        let (sa, sb) = (size.sign_extend(a), size.sign_extend(b));
        match self {
            Condition::Equal => ua == ub,
            Condition::NotEqual => ua != ub,
            Condition::Less => sa < sb,
            Condition::LessEqual => sa <= sb,
            Condition::Greater => sa > sb,
            Condition::GreaterEqual => sa >= sb,
            Condition::Below => ua < ub,
            Condition::BelowEqual => ua <= ub,
            Condition::Above => ua > ub,
            Condition::AboveEqual => ua >= ub,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatPrecision {
    Single,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatUnaryOp {
    Sqrt,
    /// Clears the sign bit in a general purpose register, destroying r11.
    Abs,
}

impl FloatUnaryOp {
    /// General purpose register the native code of the operation overwrites.
    pub fn clobbers(&self) -> Option<Register> {
        match self {
            FloatUnaryOp::Sqrt => None,
            FloatUnaryOp::Abs => Some(RSCRATCH2),
        }
    }
}

/// One machine level instruction of generated code. Control flow is compare-and-branch, there
/// are no flags between instructions.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Label {
        name: LabelName,
    },
    Mov {
        to: Register,
        from: Register,
    },
    MovImm {
        to: Register,
        value: Immediate,
    },
    /// Byte/word/dword loads widen to 64 bits per `extension`.
    Load {
        to: Register,
        from: Address,
        size: Size,
        extension: Extension,
    },
    Store {
        to: Address,
        from: Register,
        size: Size,
    },
    StoreImm {
        to: Address,
        value: i32,
        size: Size,
    },
    Lea {
        to: Register,
        from: Address,
    },
    /// Widens the low `from_size` bits of `from`. A dword destination clears the upper half.
    Extend {
        to: Register,
        from: Register,
        from_size: Size,
        to_size: Size,
        extension: Extension,
    },
    Push {
        from: Operand,
    },
    Pop {
        to: Register,
    },
    Alu {
        op: AluOp,
        to: Operand,
        from: Operand,
        size: Size,
    },
    BranchCmp {
        a: Operand,
        b: Operand,
        size: Size,
        condition: Condition,
        target: Target,
    },
    /// Branches on `a & b` being zero (`Equal`) or non-zero (`NotEqual`).
    BranchTest {
        a: Operand,
        b: Operand,
        size: Size,
        condition: Condition,
        target: Target,
    },
    Jump {
        target: Target,
    },
    JumpReg {
        from: Register,
    },
    JumpMem {
        from: Address,
    },
    Call {
        target: Target,
    },
    CallReg {
        from: Register,
    },
    CallRuntime {
        entry: RuntimeEntry,
    },
    Ret,
    LoadFloat {
        to: FloatRegister,
        from: Address,
        precision: FloatPrecision,
    },
    StoreFloat {
        to: Address,
        from: FloatRegister,
        precision: FloatPrecision,
    },
    MovGprToXmm {
        to: FloatRegister,
        from: Register,
        size: Size,
    },
    MovXmmToGpr {
        to: Register,
        from: FloatRegister,
        size: Size,
    },
    FloatUnary {
        op: FloatUnaryOp,
        register: FloatRegister,
    },
    Stop {
        reason: &'static str,
    },
}

impl Instr {
    pub fn targets(&self) -> Option<Target> {
        match self {
            Instr::BranchCmp { target, .. } | Instr::BranchTest { target, .. } | Instr::Jump { target } | Instr::Call { target } => Some(*target),
            Instr::MovImm { value: Immediate::Code(address), .. } => Some(Target::Code(*address)),
            _ => None,
        }
    }
}

impl Display for Instr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Instr::Label { name } => write!(f, "{}:", name),
            Instr::Mov { to, from } => write!(f, "mov {}, {}", to, from),
            Instr::MovImm { to, value: Immediate::Value(value) } => write!(f, "mov {}, {:#x}", to, value),
            Instr::MovImm { to, value: Immediate::Code(address) } => write!(f, "lea {}, {}", to, address),
            Instr::Load { to, from, size, extension } => write!(f, "load{:?}{:?} {}, {}", size, extension, to, from),
            Instr::Store { to, from, size } => write!(f, "store{:?} {}, {}", size, to, from),
            Instr::StoreImm { to, value, size } => write!(f, "store{:?} {}, {:#x}", size, to, value),
            Instr::Lea { to, from } => write!(f, "lea {}, {}", to, from),
            Instr::Extend { to, from, from_size, to_size, extension } => write!(f, "extend{:?} {:?}->{:?} {}, {}", extension, from_size, to_size, to, from),
            Instr::Push { from } => write!(f, "push {}", from),
            Instr::Pop { to } => write!(f, "pop {}", to),
            Instr::Alu { op, to, from, size } => write!(f, "{:?}{:?} {}, {}", op, size, to, from),
            Instr::BranchCmp { a, b, size, condition, target } => write!(f, "cmp{:?} {}, {}; j{:?} {:?}", size, a, b, condition, target),
            Instr::BranchTest { a, b, size, condition, target } => write!(f, "test{:?} {}, {}; j{:?} {:?}", size, a, b, condition, target),
            Instr::Jump { target } => write!(f, "jmp {:?}", target),
            Instr::JumpReg { from } => write!(f, "jmp {}", from),
            Instr::JumpMem { from } => write!(f, "jmp {}", from),
            Instr::Call { target } => write!(f, "call {:?}", target),
            Instr::CallReg { from } => write!(f, "call {}", from),
            Instr::CallRuntime { entry } => write!(f, "call {}", entry.name()),
            Instr::Ret => write!(f, "ret"),
            Instr::LoadFloat { to, from, precision } => write!(f, "load{:?} {}, {}", precision, to, from),
            Instr::StoreFloat { to, from, precision } => write!(f, "store{:?} {}, {}", precision, to, from),
            Instr::MovGprToXmm { to, from, size } => write!(f, "mov{:?} {}, {}", size, to, from),
            Instr::MovXmmToGpr { to, from, size } => write!(f, "mov{:?} {}, {}", size, to, from),
            Instr::FloatUnary { op, register } => write!(f, "{:?} {}", op, register),
            Instr::Stop { reason } => write!(f, "stop \"{}\"", reason),
        }
    }
}
