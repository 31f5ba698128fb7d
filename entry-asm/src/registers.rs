use std::fmt::{Display, Formatter};

use iced_x86::code_asm::*;

/// General purpose register, numbered by hardware encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register(pub u8);

pub const RAX: Register = Register(0);
pub const RCX: Register = Register(1);
pub const RDX: Register = Register(2);
pub const RBX: Register = Register(3);
pub const RSP: Register = Register(4);
pub const RBP: Register = Register(5);
pub const RSI: Register = Register(6);
pub const RDI: Register = Register(7);
pub const R8: Register = Register(8);
pub const R9: Register = Register(9);
pub const R10: Register = Register(10);
pub const R11: Register = Register(11);
pub const R12: Register = Register(12);
pub const R13: Register = Register(13);
pub const R14: Register = Register(14);
pub const R15: Register = Register(15);

pub const NUMBER_OF_REGISTERS: usize = 16;

/// Integer argument registers of the C calling convention.
pub const C_RARG0: Register = RDI;
pub const C_RARG1: Register = RSI;
pub const C_RARG2: Register = RDX;
pub const C_RARG3: Register = RCX;
pub const C_RARG4: Register = R8;
pub const C_RARG5: Register = R9;
pub const C_INT_ARGUMENT_REGISTERS: [Register; 6] = [C_RARG0, C_RARG1, C_RARG2, C_RARG3, C_RARG4, C_RARG5];
pub const N_INT_REGISTER_PARAMETERS_C: usize = 6;
pub const N_FLOAT_REGISTER_PARAMETERS_C: usize = 8;

/// Fixed roles inside generated interpreter code.
pub const METHOD: Register = RBX;
pub const SENDER_SP: Register = R13;
pub const BCP: Register = R13;
pub const LOCALS: Register = R14;
pub const THREAD: Register = R15;
pub const HEAP_BASE: Register = R12;
pub const RSCRATCH1: Register = R10;
/// Owned by the lowering for far jumps and calls, never live across an instruction.
pub const RSCRATCH2: Register = R11;

/// Caller saved registers a C call may clobber, the result register excluded.
pub const CALL_CLOBBERED: [Register; 8] = [RCX, RDX, RSI, RDI, R8, R9, R10, R11];

const NAMES: [&str; NUMBER_OF_REGISTERS] = ["rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15"];

impl Register {
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    pub fn name(&self) -> &'static str {
        NAMES[self.index() & 0xF]
    }

    pub fn to_native_64(&self) -> AsmRegister64 {
        match self.0 {
            0 => rax,
            1 => rcx,
            2 => rdx,
            3 => rbx,
            4 => rsp,
            5 => rbp,
            6 => rsi,
            7 => rdi,
            8 => r8,
            9 => r9,
            10 => r10,
            11 => r11,
            12 => r12,
            13 => r13,
            14 => r14,
            _ => r15,
        }
    }

    pub fn to_native_32(&self) -> AsmRegister32 {
        match self.0 {
            0 => eax,
            1 => ecx,
            2 => edx,
            3 => ebx,
            4 => esp,
            5 => ebp,
            6 => esi,
            7 => edi,
            8 => r8d,
            9 => r9d,
            10 => r10d,
            11 => r11d,
            12 => r12d,
            13 => r13d,
            14 => r14d,
            _ => r15d,
        }
    }

    pub fn to_native_16(&self) -> AsmRegister16 {
        match self.0 {
            0 => ax,
            1 => cx,
            2 => dx,
            3 => bx,
            4 => sp,
            5 => bp,
            6 => si,
            7 => di,
            8 => r8w,
            9 => r9w,
            10 => r10w,
            11 => r11w,
            12 => r12w,
            13 => r13w,
            14 => r14w,
            _ => r15w,
        }
    }

    pub fn to_native_8(&self) -> AsmRegister8 {
        match self.0 {
            0 => al,
            1 => cl,
            2 => dl,
            3 => bl,
            4 => spl,
            5 => bpl,
            6 => sil,
            7 => dil,
            8 => r8b,
            9 => r9b,
            10 => r10b,
            11 => r11b,
            12 => r12b,
            13 => r13b,
            14 => r14b,
            _ => r15b,
        }
    }
}

impl Display for Register {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FloatRegister(pub u8);

pub const XMM0: FloatRegister = FloatRegister(0);
pub const XMM1: FloatRegister = FloatRegister(1);
pub const XMM15: FloatRegister = FloatRegister(15);
pub const NUMBER_OF_FLOAT_REGISTERS: usize = 16;

impl FloatRegister {
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    pub fn to_xmm(&self) -> AsmRegisterXmm {
        match self.0 {
            0 => xmm0,
            1 => xmm1,
            2 => xmm2,
            3 => xmm3,
            4 => xmm4,
            5 => xmm5,
            6 => xmm6,
            7 => xmm7,
            8 => xmm8,
            9 => xmm9,
            10 => xmm10,
            11 => xmm11,
            12 => xmm12,
            13 => xmm13,
            14 => xmm14,
            _ => xmm15,
        }
    }
}

impl Display for FloatRegister {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "xmm{}", self.0)
    }
}

/// Float argument register `index` of the C calling convention.
pub fn c_farg(index: usize) -> FloatRegister {
    FloatRegister(index as u8)
}
