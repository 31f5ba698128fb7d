use iced_x86::code_asm::{byte_ptr, dword_ptr, qword_ptr, r11, word_ptr, CodeAssembler, CodeLabel};
use iced_x86::IcedError;

use crate::error::LoweringError;
use crate::instr::{Condition, Operand, Size, Target};
use crate::ir_to_native::integer_arithmetic::sized_binary;
use crate::ir_to_native::load_store::memory_operand;
use crate::ir_to_native::{LoweringContext, NativeTarget};

fn jcc(assembler: &mut CodeAssembler, condition: Condition, label: CodeLabel) -> Result<(), IcedError> {
    match condition {
        Condition::Equal => assembler.je(label),
        Condition::NotEqual => assembler.jne(label),
        Condition::Less => assembler.jl(label),
        Condition::LessEqual => assembler.jle(label),
        Condition::Greater => assembler.jg(label),
        Condition::GreaterEqual => assembler.jge(label),
        Condition::Below => assembler.jb(label),
        Condition::BelowEqual => assembler.jbe(label),
        Condition::Above => assembler.ja(label),
        Condition::AboveEqual => assembler.jae(label),
    }
}

/// Far targets go through r11, so the condition is inverted to skip over the indirect jump.
fn jcc_target(assembler: &mut CodeAssembler, context: &mut LoweringContext, condition: Condition, target: &Target) -> Result<(), LoweringError> {
    match context.target(assembler, target)? {
        NativeTarget::Label(label) => jcc(assembler, condition, label)?,
        NativeTarget::Absolute(address) => {
            let mut skip = assembler.create_label();
            jcc(assembler, condition.negate(), skip)?;
            assembler.mov(r11, address)?;
            assembler.jmp(r11)?;
            assembler.set_label(&mut skip)?;
            assembler.nop()?;
        }
    }
    Ok(())
}

pub fn branch_cmp(assembler: &mut CodeAssembler, context: &mut LoweringContext, a: &Operand, b: &Operand, size: Size, condition: Condition, target: &Target) -> Result<(), LoweringError> {
    match sized_binary!(assembler, cmp, a, b, size) {
        Some(result) => result?,
        None => return Err(LoweringError::Unsupported(format!("cmp{:?} {}, {}", size, a, b))),
    }
    jcc_target(assembler, context, condition, target)
}

pub fn branch_test(assembler: &mut CodeAssembler, context: &mut LoweringContext, a: &Operand, b: &Operand, size: Size, condition: Condition, target: &Target) -> Result<(), LoweringError> {
    let (a, b) = match (a, b) {
        (Operand::Reg(_) | Operand::Imm(_), Operand::Mem(_)) | (Operand::Imm(_), Operand::Reg(_)) => (b, a),
        _ => (a, b),
    };
    let emitted = match (a, b, size) {
        (Operand::Reg(a), Operand::Reg(b), Size::Byte) => assembler.test(a.to_native_8(), b.to_native_8()),
        (Operand::Reg(a), Operand::Reg(b), Size::X86Word) => assembler.test(a.to_native_16(), b.to_native_16()),
        (Operand::Reg(a), Operand::Reg(b), Size::X86DWord) => assembler.test(a.to_native_32(), b.to_native_32()),
        (Operand::Reg(a), Operand::Reg(b), Size::X86QWord) => assembler.test(a.to_native_64(), b.to_native_64()),
        (Operand::Reg(a), Operand::Imm(imm), Size::Byte) => assembler.test(a.to_native_8(), *imm),
        (Operand::Reg(a), Operand::Imm(imm), Size::X86Word) => assembler.test(a.to_native_16(), *imm),
        (Operand::Reg(a), Operand::Imm(imm), Size::X86DWord) => assembler.test(a.to_native_32(), *imm),
        (Operand::Reg(a), Operand::Imm(imm), Size::X86QWord) => assembler.test(a.to_native_64(), *imm),
        (Operand::Mem(a), Operand::Reg(b), Size::Byte) => assembler.test(byte_ptr(memory_operand(a)), b.to_native_8()),
        (Operand::Mem(a), Operand::Reg(b), Size::X86Word) => assembler.test(word_ptr(memory_operand(a)), b.to_native_16()),
        (Operand::Mem(a), Operand::Reg(b), Size::X86DWord) => assembler.test(dword_ptr(memory_operand(a)), b.to_native_32()),
        (Operand::Mem(a), Operand::Reg(b), Size::X86QWord) => assembler.test(qword_ptr(memory_operand(a)), b.to_native_64()),
        (Operand::Mem(a), Operand::Imm(imm), Size::Byte) => assembler.test(byte_ptr(memory_operand(a)), *imm),
        (Operand::Mem(a), Operand::Imm(imm), Size::X86Word) => assembler.test(word_ptr(memory_operand(a)), *imm),
        (Operand::Mem(a), Operand::Imm(imm), Size::X86DWord) => assembler.test(dword_ptr(memory_operand(a)), *imm),
        (Operand::Mem(a), Operand::Imm(imm), Size::X86QWord) => assembler.test(qword_ptr(memory_operand(a)), *imm),
        _ => return Err(LoweringError::Unsupported(format!("test{:?} {}, {}", size, a, b))),
    };
    emitted?;
    jcc_target(assembler, context, condition, target)
}

pub fn jump(assembler: &mut CodeAssembler, context: &mut LoweringContext, target: &Target) -> Result<(), LoweringError> {
    match context.target(assembler, target)? {
        NativeTarget::Label(label) => assembler.jmp(label)?,
        NativeTarget::Absolute(address) => {
            assembler.mov(r11, address)?;
            assembler.jmp(r11)?;
        }
    }
    Ok(())
}

pub fn call(assembler: &mut CodeAssembler, context: &mut LoweringContext, target: &Target) -> Result<(), LoweringError> {
    match context.target(assembler, target)? {
        NativeTarget::Label(label) => assembler.call(label)?,
        NativeTarget::Absolute(address) => {
            assembler.mov(r11, address)?;
            assembler.call(r11)?;
        }
    }
    Ok(())
}
