use iced_x86::code_asm::{dword_ptr, qword_ptr, CodeAssembler};
use iced_x86::IcedError;

use crate::error::LoweringError;
use crate::instr::{Address, FloatPrecision, FloatUnaryOp, Size};
use crate::ir_to_native::load_store::memory_operand;
use crate::registers::{FloatRegister, Register, RSCRATCH2};

pub fn load_float(assembler: &mut CodeAssembler, to: FloatRegister, from: &Address, precision: FloatPrecision) -> Result<(), IcedError> {
    match precision {
        FloatPrecision::Single => assembler.movss(to.to_xmm(), dword_ptr(memory_operand(from))),
        FloatPrecision::Double => assembler.movsd_2(to.to_xmm(), qword_ptr(memory_operand(from))),
    }
}

pub fn store_float(assembler: &mut CodeAssembler, to: &Address, from: FloatRegister, precision: FloatPrecision) -> Result<(), IcedError> {
    match precision {
        FloatPrecision::Single => assembler.movss(dword_ptr(memory_operand(to)), from.to_xmm()),
        FloatPrecision::Double => assembler.movsd_2(qword_ptr(memory_operand(to)), from.to_xmm()),
    }
}

pub fn mov_gpr_to_xmm(assembler: &mut CodeAssembler, to: FloatRegister, from: Register, size: Size) -> Result<(), LoweringError> {
    match size {
        Size::X86DWord => assembler.movd(to.to_xmm(), from.to_native_32())?,
        Size::X86QWord => assembler.movq(to.to_xmm(), from.to_native_64())?,
        _ => return Err(LoweringError::Unsupported(format!("mov{:?} {}, {}", size, to, from))),
    }
    Ok(())
}

pub fn mov_xmm_to_gpr(assembler: &mut CodeAssembler, to: Register, from: FloatRegister, size: Size) -> Result<(), LoweringError> {
    match size {
        Size::X86DWord => assembler.movd(to.to_native_32(), from.to_xmm())?,
        Size::X86QWord => assembler.movq(to.to_native_64(), from.to_xmm())?,
        _ => return Err(LoweringError::Unsupported(format!("mov{:?} {}, {}", size, to, from))),
    }
    Ok(())
}

pub fn float_unary(assembler: &mut CodeAssembler, op: FloatUnaryOp, register: FloatRegister) -> Result<(), IcedError> {
    match op {
        FloatUnaryOp::Sqrt => assembler.sqrtsd(register.to_xmm(), register.to_xmm()),
        FloatUnaryOp::Abs => {
            let scratch = RSCRATCH2.to_native_64();
            assembler.movq(scratch, register.to_xmm())?;
            assembler.btr(scratch, 63u32)?;
            assembler.movq(register.to_xmm(), scratch)
        }
    }
}
