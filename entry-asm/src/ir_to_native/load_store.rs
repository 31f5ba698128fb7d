use iced_x86::code_asm::{byte_ptr, dword_ptr, qword_ptr, word_ptr, AsmMemoryOperand, CodeAssembler};
use iced_x86::IcedError;

use crate::instr::{Address, Extension, Operand, Size};
use crate::registers::Register;

pub fn memory_operand(address: &Address) -> AsmMemoryOperand {
    let base = address.base.to_native_64();
    match address.index {
        None => base + address.disp,
        Some((index, scale)) => base + index.to_native_64() * scale.factor() + address.disp,
    }
}

pub fn load(assembler: &mut CodeAssembler, to: Register, from: &Address, size: Size, extension: Extension) -> Result<(), IcedError> {
    let memory = memory_operand(from);
    match (size, extension) {
        (Size::Byte, Extension::Zero) => assembler.movzx(to.to_native_32(), byte_ptr(memory)),
        (Size::Byte, Extension::Sign) => assembler.movsx(to.to_native_64(), byte_ptr(memory)),
        (Size::X86Word, Extension::Zero) => assembler.movzx(to.to_native_32(), word_ptr(memory)),
        (Size::X86Word, Extension::Sign) => assembler.movsx(to.to_native_64(), word_ptr(memory)),
        (Size::X86DWord, Extension::Zero) => assembler.mov(to.to_native_32(), dword_ptr(memory)),
        (Size::X86DWord, Extension::Sign) => assembler.movsxd(to.to_native_64(), dword_ptr(memory)),
        (Size::X86QWord, _) => assembler.mov(to.to_native_64(), qword_ptr(memory)),
    }
}

pub fn store(assembler: &mut CodeAssembler, to: &Address, from: Register, size: Size) -> Result<(), IcedError> {
    let memory = memory_operand(to);
    match size {
        Size::Byte => assembler.mov(byte_ptr(memory), from.to_native_8()),
        Size::X86Word => assembler.mov(word_ptr(memory), from.to_native_16()),
        Size::X86DWord => assembler.mov(dword_ptr(memory), from.to_native_32()),
        Size::X86QWord => assembler.mov(qword_ptr(memory), from.to_native_64()),
    }
}

pub fn store_imm(assembler: &mut CodeAssembler, to: &Address, value: i32, size: Size) -> Result<(), IcedError> {
    let memory = memory_operand(to);
    match size {
        Size::Byte => assembler.mov(byte_ptr(memory), value),
        Size::X86Word => assembler.mov(word_ptr(memory), value),
        Size::X86DWord => assembler.mov(dword_ptr(memory), value),
        Size::X86QWord => assembler.mov(qword_ptr(memory), value),
    }
}

pub fn lea(assembler: &mut CodeAssembler, to: Register, from: &Address) -> Result<(), IcedError> {
    assembler.lea(to.to_native_64(), memory_operand(from))
}

pub fn push(assembler: &mut CodeAssembler, from: &Operand) -> Result<(), IcedError> {
    match from {
        Operand::Reg(register) => assembler.push(register.to_native_64()),
        Operand::Mem(address) => assembler.push(qword_ptr(memory_operand(address))),
        Operand::Imm(imm) => assembler.push(*imm),
    }
}
