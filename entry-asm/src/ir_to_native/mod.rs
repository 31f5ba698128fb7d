use std::collections::HashMap;

use iced_x86::code_asm::{r11, CodeAssembler, CodeLabel};
use iced_x86::{BlockEncoder, BlockEncoderOptions, InstructionBlock};
use itertools::Itertools;

use crate::code_space::CodeBlob;
use crate::error::LoweringError;
use crate::instr::{Immediate, Instr, Target};
use crate::ir_to_native::branches::{branch_cmp, branch_test, call, jump};
use crate::ir_to_native::float::{float_unary, load_float, mov_gpr_to_xmm, mov_xmm_to_gpr, store_float};
use crate::ir_to_native::integer_arithmetic::{alu, extend};
use crate::ir_to_native::load_store::{lea, load, push, store, store_imm};
use crate::runtime_entry::RuntimeEntry;
use crate::{CodeAddress, LabelName};

pub mod branches;
pub mod float;
pub mod integer_arithmetic;
pub mod load_store;

/// Native addresses of everything a blob references outside itself.
pub trait AddressResolver {
    fn runtime_entry(&self, entry: RuntimeEntry) -> u64;

    fn code_address(&self, address: CodeAddress) -> Option<u64>;
}

/// Encoded machine code of one blob.
#[derive(Debug, Clone)]
pub struct NativeCode {
    pub base: u64,
    pub bytes: Vec<u8>,
    /// Byte offset of the first native instruction of each blob instruction.
    pub instruction_offsets: Vec<usize>,
}

impl NativeCode {
    pub fn native_address(&self, index: usize) -> Option<u64> {
        self.instruction_offsets.get(index).map(|offset| self.base + *offset as u64)
    }
}

pub(crate) enum NativeTarget {
    Label(CodeLabel),
    Absolute(u64),
}

pub(crate) struct LoweringContext<'l> {
    blob: &'l CodeBlob,
    resolver: &'l dyn AddressResolver,
    labels: HashMap<LabelName, CodeLabel>,
    index_labels: HashMap<usize, CodeLabel>,
}

impl LoweringContext<'_> {
    pub(crate) fn target(&mut self, assembler: &mut CodeAssembler, target: &Target) -> Result<NativeTarget, LoweringError> {
        Ok(match target {
            Target::Label(label) => NativeTarget::Label(*self.labels.entry(*label).or_insert_with(|| assembler.create_label())),
            Target::Code(address) => match self.blob.index_of(*address) {
                Some(index) => NativeTarget::Label(*self.index_labels.get(&index).ok_or(LoweringError::UnresolvedCode(*address))?),
                None => NativeTarget::Absolute(self.resolver.code_address(*address).ok_or(LoweringError::UnresolvedCode(*address))?),
            },
            Target::External(address) => NativeTarget::Absolute(*address),
        })
    }

    pub(crate) fn runtime_entry(&self, entry: RuntimeEntry) -> u64 {
        self.resolver.runtime_entry(entry)
    }
}

/// Instructions some code address inside the blob refers to get a label of their own.
fn index_labels(assembler: &mut CodeAssembler, blob: &CodeBlob, labels: &mut HashMap<LabelName, CodeLabel>) -> HashMap<usize, CodeLabel> {
    let mut index_labels = HashMap::new();
    let targeted = blob
        .instructions
        .iter()
        .filter_map(|instr| match instr.targets() {
            Some(Target::Code(address)) => blob.index_of(address),
            _ => None,
        })
        .unique()
        .collect_vec();
    for index in targeted {
        let label = match &blob.instructions[index] {
            Instr::Label { name } => *labels.entry(*name).or_insert_with(|| assembler.create_label()),
            _ => assembler.create_label(),
        };
        index_labels.insert(index, label);
    }
    index_labels
}

pub fn lower_blob(blob: &CodeBlob, base: u64, resolver: &dyn AddressResolver) -> Result<NativeCode, LoweringError> {
    let mut assembler = CodeAssembler::new(64)?;
    let mut labels = HashMap::new();
    let index_labels = index_labels(&mut assembler, blob, &mut labels);
    let mut context = LoweringContext { blob, resolver, labels, index_labels };
    let mut ir_index_to_assembly_index = vec![];
    for (i, instr) in blob.instructions.iter().enumerate() {
        ir_index_to_assembly_index.push(assembler.instructions().len());
        let is_label = matches!(instr, Instr::Label { .. });
        if !is_label {
            if let Some(label) = context.index_labels.get_mut(&i) {
                assembler.set_label(label)?;
            }
        }
        single_instr_to_native(&mut assembler, &mut context, i, instr)?;
    }
    assembler.int3()?;
    let block = InstructionBlock::new(assembler.instructions(), base);
    let result = BlockEncoder::encode(64, block, BlockEncoderOptions::RETURN_NEW_INSTRUCTION_OFFSETS)?;
    let instruction_offsets = ir_index_to_assembly_index.into_iter().map(|assembly_index| result.new_instruction_offsets[assembly_index] as usize).collect_vec();
    tracing::debug!(blob = blob.name.as_str(), bytes = result.code_buffer.len(), base = %format!("{:#x}", base), "lowered blob");
    Ok(NativeCode { base, bytes: result.code_buffer, instruction_offsets })
}

fn single_instr_to_native(assembler: &mut CodeAssembler, context: &mut LoweringContext, index: usize, instr: &Instr) -> Result<(), LoweringError> {
    match instr {
        Instr::Label { name } => {
            let code_label = context.labels.entry(*name).or_insert_with(|| assembler.create_label());
            assembler.set_label(code_label)?;
            assembler.nop()?;
        }
        Instr::Mov { to, from } => assembler.mov(to.to_native_64(), from.to_native_64())?,
        Instr::MovImm { to, value: Immediate::Value(value) } => assembler.mov(to.to_native_64(), *value)?,
        Instr::MovImm { to, value: Immediate::Code(address) } => match context.target(assembler, &Target::Code(*address))? {
            NativeTarget::Label(label) => assembler.lea(to.to_native_64(), iced_x86::code_asm::ptr(label))?,
            NativeTarget::Absolute(absolute) => assembler.mov(to.to_native_64(), absolute)?,
        },
        Instr::Load { to, from, size, extension } => load(assembler, *to, from, *size, *extension)?,
        Instr::Store { to, from, size } => store(assembler, to, *from, *size)?,
        Instr::StoreImm { to, value, size } => store_imm(assembler, to, *value, *size)?,
        Instr::Lea { to, from } => lea(assembler, *to, from)?,
        Instr::Extend { to, from, from_size, to_size, extension } => extend(assembler, *to, *from, *from_size, *to_size, *extension)?,
        Instr::Push { from } => push(assembler, from)?,
        Instr::Pop { to } => assembler.pop(to.to_native_64())?,
        Instr::Alu { op, to, from, size } => alu(assembler, *op, to, from, *size)?,
        Instr::BranchCmp { a, b, size, condition, target } => branch_cmp(assembler, context, a, b, *size, *condition, target)?,
        Instr::BranchTest { a, b, size, condition, target } => branch_test(assembler, context, a, b, *size, *condition, target)?,
        Instr::Jump { target } => jump(assembler, context, target)?,
        Instr::JumpReg { from } => assembler.jmp(from.to_native_64())?,
        Instr::JumpMem { from } => assembler.jmp(iced_x86::code_asm::qword_ptr(load_store::memory_operand(from)))?,
        Instr::Call { target } => call(assembler, context, target)?,
        Instr::CallReg { from } => assembler.call(from.to_native_64())?,
        Instr::CallRuntime { entry } => {
            assembler.mov(r11, context.runtime_entry(*entry))?;
            assembler.call(r11)?;
        }
        Instr::Ret => assembler.ret()?,
        Instr::LoadFloat { to, from, precision } => load_float(assembler, *to, from, *precision)?,
        Instr::StoreFloat { to, from, precision } => store_float(assembler, to, *from, *precision)?,
        Instr::MovGprToXmm { to, from, size } => mov_gpr_to_xmm(assembler, *to, *from, *size)?,
        Instr::MovXmmToGpr { to, from, size } => mov_xmm_to_gpr(assembler, *to, *from, *size)?,
        Instr::FloatUnary { op, register } => float_unary(assembler, *op, *register)?,
        Instr::Stop { reason } => {
            tracing::trace!(index, reason, "lowering stop to ud2");
            assembler.ud2()?;
        }
    }
    Ok(())
}
