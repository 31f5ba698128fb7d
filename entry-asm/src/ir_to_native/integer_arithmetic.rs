use iced_x86::code_asm::{byte_ptr, dword_ptr, qword_ptr, word_ptr, CodeAssembler};

use crate::error::LoweringError;
use crate::instr::{AluOp, Extension, Operand, Size};
use crate::ir_to_native::load_store::memory_operand;
use crate::registers::Register;

/// Expands to the sized form of a two operand instruction, or `None` for operand kinds x86
/// cannot encode.
macro_rules! sized_binary {
    ($assembler:expr, $op:ident, $a:expr, $b:expr, $size:expr) => {
        match ($a, $b, $size) {
            (Operand::Reg(a), Operand::Reg(b), Size::Byte) => Some($assembler.$op(a.to_native_8(), b.to_native_8())),
            (Operand::Reg(a), Operand::Reg(b), Size::X86Word) => Some($assembler.$op(a.to_native_16(), b.to_native_16())),
            (Operand::Reg(a), Operand::Reg(b), Size::X86DWord) => Some($assembler.$op(a.to_native_32(), b.to_native_32())),
            (Operand::Reg(a), Operand::Reg(b), Size::X86QWord) => Some($assembler.$op(a.to_native_64(), b.to_native_64())),
            (Operand::Reg(a), Operand::Imm(imm), Size::Byte) => Some($assembler.$op(a.to_native_8(), *imm)),
            (Operand::Reg(a), Operand::Imm(imm), Size::X86Word) => Some($assembler.$op(a.to_native_16(), *imm)),
            (Operand::Reg(a), Operand::Imm(imm), Size::X86DWord) => Some($assembler.$op(a.to_native_32(), *imm)),
            (Operand::Reg(a), Operand::Imm(imm), Size::X86QWord) => Some($assembler.$op(a.to_native_64(), *imm)),
            (Operand::Mem(a), Operand::Reg(b), Size::Byte) => Some($assembler.$op(byte_ptr(memory_operand(a)), b.to_native_8())),
            (Operand::Mem(a), Operand::Reg(b), Size::X86Word) => Some($assembler.$op(word_ptr(memory_operand(a)), b.to_native_16())),
            (Operand::Mem(a), Operand::Reg(b), Size::X86DWord) => Some($assembler.$op(dword_ptr(memory_operand(a)), b.to_native_32())),
            (Operand::Mem(a), Operand::Reg(b), Size::X86QWord) => Some($assembler.$op(qword_ptr(memory_operand(a)), b.to_native_64())),
            (Operand::Mem(a), Operand::Imm(imm), Size::Byte) => Some($assembler.$op(byte_ptr(memory_operand(a)), *imm)),
            (Operand::Mem(a), Operand::Imm(imm), Size::X86Word) => Some($assembler.$op(word_ptr(memory_operand(a)), *imm)),
            (Operand::Mem(a), Operand::Imm(imm), Size::X86DWord) => Some($assembler.$op(dword_ptr(memory_operand(a)), *imm)),
            (Operand::Mem(a), Operand::Imm(imm), Size::X86QWord) => Some($assembler.$op(qword_ptr(memory_operand(a)), *imm)),
            (Operand::Reg(a), Operand::Mem(b), Size::Byte) => Some($assembler.$op(a.to_native_8(), byte_ptr(memory_operand(b)))),
            (Operand::Reg(a), Operand::Mem(b), Size::X86Word) => Some($assembler.$op(a.to_native_16(), word_ptr(memory_operand(b)))),
            (Operand::Reg(a), Operand::Mem(b), Size::X86DWord) => Some($assembler.$op(a.to_native_32(), dword_ptr(memory_operand(b)))),
            (Operand::Reg(a), Operand::Mem(b), Size::X86QWord) => Some($assembler.$op(a.to_native_64(), qword_ptr(memory_operand(b)))),
            _ => None,
        }
    };
}

pub(crate) use sized_binary;

macro_rules! sized_shift {
    ($assembler:expr, $op:ident, $a:expr, $count:expr, $size:expr) => {
        match ($a, $size) {
            (Operand::Reg(a), Size::Byte) => Some($assembler.$op(a.to_native_8(), $count)),
            (Operand::Reg(a), Size::X86Word) => Some($assembler.$op(a.to_native_16(), $count)),
            (Operand::Reg(a), Size::X86DWord) => Some($assembler.$op(a.to_native_32(), $count)),
            (Operand::Reg(a), Size::X86QWord) => Some($assembler.$op(a.to_native_64(), $count)),
            (Operand::Mem(a), Size::Byte) => Some($assembler.$op(byte_ptr(memory_operand(a)), $count)),
            (Operand::Mem(a), Size::X86Word) => Some($assembler.$op(word_ptr(memory_operand(a)), $count)),
            (Operand::Mem(a), Size::X86DWord) => Some($assembler.$op(dword_ptr(memory_operand(a)), $count)),
            (Operand::Mem(a), Size::X86QWord) => Some($assembler.$op(qword_ptr(memory_operand(a)), $count)),
            _ => None,
        }
    };
}

pub fn alu(assembler: &mut CodeAssembler, op: AluOp, to: &Operand, from: &Operand, size: Size) -> Result<(), LoweringError> {
    let emitted = match (op, from) {
        (AluOp::Add, _) => sized_binary!(assembler, add, to, from, size),
        (AluOp::Sub, _) => sized_binary!(assembler, sub, to, from, size),
        (AluOp::And, _) => sized_binary!(assembler, and, to, from, size),
        (AluOp::Or, _) => sized_binary!(assembler, or, to, from, size),
        (AluOp::Xor, _) => sized_binary!(assembler, xor, to, from, size),
        (AluOp::Shl, Operand::Imm(count)) => sized_shift!(assembler, shl, to, *count as u32, size),
        (AluOp::Shr, Operand::Imm(count)) => sized_shift!(assembler, shr, to, *count as u32, size),
        (AluOp::Sar, Operand::Imm(count)) => sized_shift!(assembler, sar, to, *count as u32, size),
        _ => None,
    };
    match emitted {
        Some(result) => Ok(result?),
        None => Err(LoweringError::Unsupported(format!("{:?}{:?} {}, {}", op, size, to, from))),
    }
}

pub fn extend(assembler: &mut CodeAssembler, to: Register, from: Register, from_size: Size, to_size: Size, extension: Extension) -> Result<(), LoweringError> {
    let result = match (from_size, to_size, extension) {
        (Size::Byte, Size::Byte, _) => assembler.mov(to.to_native_8(), from.to_native_8()),
        (Size::Byte, Size::X86Word, Extension::Zero) => assembler.movzx(to.to_native_16(), from.to_native_8()),
        (Size::Byte, Size::X86Word, Extension::Sign) => assembler.movsx(to.to_native_16(), from.to_native_8()),
        (Size::Byte, Size::X86DWord | Size::X86QWord, Extension::Zero) => assembler.movzx(to.to_native_32(), from.to_native_8()),
        (Size::Byte, Size::X86DWord, Extension::Sign) => assembler.movsx(to.to_native_32(), from.to_native_8()),
        (Size::Byte, Size::X86QWord, Extension::Sign) => assembler.movsx(to.to_native_64(), from.to_native_8()),
        (Size::X86Word, Size::X86Word, _) => assembler.mov(to.to_native_16(), from.to_native_16()),
        (Size::X86Word, Size::X86DWord | Size::X86QWord, Extension::Zero) => assembler.movzx(to.to_native_32(), from.to_native_16()),
        (Size::X86Word, Size::X86DWord, Extension::Sign) => assembler.movsx(to.to_native_32(), from.to_native_16()),
        (Size::X86Word, Size::X86QWord, Extension::Sign) => assembler.movsx(to.to_native_64(), from.to_native_16()),
        (Size::X86DWord, Size::X86DWord, _) | (Size::X86DWord, Size::X86QWord, Extension::Zero) => assembler.mov(to.to_native_32(), from.to_native_32()),
        (Size::X86DWord, Size::X86QWord, Extension::Sign) => assembler.movsxd(to.to_native_64(), from.to_native_32()),
        (Size::X86QWord, Size::X86QWord, _) => assembler.mov(to.to_native_64(), from.to_native_64()),
        _ => return Err(LoweringError::Unsupported(format!("extend {:?} to {:?}", from_size, to_size))),
    };
    Ok(result?)
}
