use std::sync::Arc;

use entry_asm::code_space::{CodeBlob, CodeSpace};
use entry_asm::instr::{Address, Condition};
use entry_asm::masm::MacroAssembler;
use entry_asm::registers::{LOCALS, RAX, RSCRATCH1, RSP};
use interpreter_common::flags::ExternalAddresses;
use interpreter_common::fingerprint::Fingerprint;
use interpreter_common::{local_offset_in_bytes, WORD_SIZE};

use crate::iterator::{ArgumentCursor, ArgumentVisitor, NativeSignatureIterator};
use crate::plan::{FloatLocation, IntLocation, NativeArgumentAllocator};
use crate::result_handlers::ResultHandlerTable;
use crate::SignatureHandlerError;

/// Emits a signature handler: called with r14 pointing at local 0 and rsp at the outgoing
/// argument area (below the return address), it fills c_rarg1..c_rarg5, xmm0..xmm7 and the
/// stack arguments, then returns the result handler address in rax.
///
/// Clobbers rax and r10 besides the argument registers. rbx is left alone.
pub struct SignatureHandlerGenerator<'l> {
    masm: &'l mut MacroAssembler,
    allocator: NativeArgumentAllocator,
    is_static: bool,
}

impl<'l> SignatureHandlerGenerator<'l> {
    pub fn new(masm: &'l mut MacroAssembler, is_static: bool) -> Self {
        Self { masm, allocator: NativeArgumentAllocator::new(is_static), is_static }
    }

    fn source(slot: usize) -> Address {
        Address::new(LOCALS, local_offset_in_bytes(slot as i32))
    }

    fn stack_slot(word: usize) -> Address {
        Address::new(RSP, (word as i32 + 1) * WORD_SIZE)
    }

    pub fn generate(mut self, iterator: &NativeSignatureIterator, result_handlers: &ResultHandlerTable) {
        iterator.iterate(&mut self);
        let result_handler = result_handlers.handler_for(iterator.result_type());
        self.masm.mov_code(RAX, result_handler);
        self.masm.ret();
    }
}

impl ArgumentVisitor for SignatureHandlerGenerator<'_> {
    fn pass_int(&mut self, cursor: ArgumentCursor) {
        let src = Self::source(cursor.java_offset);
        match self.allocator.next_int() {
            IntLocation::Register(register) => self.masm.movslq(register, src),
            IntLocation::Stack(word) => {
                self.masm.movslq(RAX, src);
                self.masm.movptr_store(Self::stack_slot(word), RAX);
            }
        }
    }

    fn pass_long(&mut self, cursor: ArgumentCursor) {
        let src = Self::source(cursor.java_offset + 1);
        match self.allocator.next_int() {
            IntLocation::Register(register) => self.masm.movptr(register, src),
            IntLocation::Stack(word) => {
                self.masm.movptr(RAX, src);
                self.masm.movptr_store(Self::stack_slot(word), RAX);
            }
        }
    }

    fn pass_float(&mut self, cursor: ArgumentCursor) {
        let src = Self::source(cursor.java_offset);
        match self.allocator.next_float() {
            FloatLocation::Register(register) => self.masm.movflt(register, src),
            FloatLocation::Stack(word) => {
                self.masm.movl(RAX, src);
                self.masm.movptr_store(Self::stack_slot(word), RAX);
            }
        }
    }

    fn pass_double(&mut self, cursor: ArgumentCursor) {
        let src = Self::source(cursor.java_offset + 1);
        match self.allocator.next_float() {
            FloatLocation::Register(register) => self.masm.movdbl(register, src),
            FloatLocation::Stack(word) => {
                self.masm.movptr(RAX, src);
                self.masm.movptr_store(Self::stack_slot(word), RAX);
            }
        }
    }

    fn pass_object(&mut self, cursor: ArgumentCursor) {
        let src = Self::source(cursor.java_offset);
        let receiver = !self.is_static && cursor.java_offset == 0;
        match self.allocator.next_int() {
            // the receiver is never null
            IntLocation::Register(register) if receiver => self.masm.lea(register, src),
            IntLocation::Register(register) => {
                let null = self.masm.new_label();
                self.masm.mov_imm(register, 0);
                self.masm.cmpptr_jcc(src, 0, Condition::Equal, null);
                self.masm.lea(register, src);
                self.masm.bind(null);
            }
            IntLocation::Stack(word) => {
                let null = self.masm.new_label();
                self.masm.mov_imm(RAX, 0);
                self.masm.cmpptr_jcc(src, 0, Condition::Equal, null);
                self.masm.lea(RSCRATCH1, src);
                self.masm.mov(RAX, RSCRATCH1);
                self.masm.bind(null);
                self.masm.movptr_store(Self::stack_slot(word), RAX);
            }
        }
    }
}

/// Generates the shared handler of one fingerprint into a blob of its own.
pub fn generate_signature_handler(
    fingerprint: Fingerprint,
    result_handlers: &ResultHandlerTable,
    code_space: &CodeSpace,
    capacity: usize,
    external: ExternalAddresses,
) -> Result<Arc<CodeBlob>, SignatureHandlerError> {
    let iterator = NativeSignatureIterator::from_fingerprint(fingerprint).ok_or(SignatureHandlerError::TooComplex)?;
    let name = format!("signature handler {:#x}", fingerprint.to_raw());
    let mut masm = MacroAssembler::new(name.as_str(), code_space.reserve(), capacity, external);
    masm.begin_codelet(name.as_str());
    SignatureHandlerGenerator::new(&mut masm, iterator.is_static()).generate(&iterator, result_handlers);
    masm.end_codelet();
    let blob = code_space.install(masm.finish()?);
    tracing::debug!(fingerprint = %format!("{:#x}", fingerprint.to_raw()), result = ?iterator.result_type(), entry = %blob.base, "generated signature handler");
    Ok(blob)
}
