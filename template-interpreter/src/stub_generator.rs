use std::sync::Arc;

use entry_asm::code_space::{CodeBlob, CodeSpace};
use entry_asm::error::GenerationError;
use entry_asm::instr::{Address, Condition, Instr, Scale};
use entry_asm::masm::MacroAssembler;
use entry_asm::registers::{Register, C_RARG0, C_RARG1, C_RARG2, C_RARG3, C_RARG4, C_RARG5, R12, R13, R14, R15, RAX, RBP, RBX, RCX, RDX, RSCRATCH1, RSP, THREAD, XMM0};
use entry_asm::runtime_entry::RuntimeEntry;
use entry_asm::CodeAddress;
use interpreter_common::basic_type::BasicType;
use interpreter_common::flags::{ExternalAddresses, GeneratorFlags};
use interpreter_common::frame_layout::{
    slot_byte_offset, CALL_STUB_CALL_WRAPPER_OFFSET, CALL_STUB_ENTRY_POINT_OFFSET, CALL_STUB_METHOD_OFFSET, CALL_STUB_PARAMETERS_OFFSET, CALL_STUB_PARAMETER_SIZE_OFFSET, CALL_STUB_R12_OFFSET,
    CALL_STUB_R13_OFFSET, CALL_STUB_R14_OFFSET, CALL_STUB_R15_OFFSET, CALL_STUB_RBX_OFFSET, CALL_STUB_RESULT_OFFSET, CALL_STUB_RESULT_TYPE_OFFSET, CALL_STUB_RSP_AFTER_CALL_OFFSET,
    CALL_STUB_THREAD_OFFSET,
};
use interpreter_common::vm_layout::THREAD_PENDING_EXCEPTION_OFFSET;
use interpreter_common::{STACK_ALIGNMENT_IN_BYTES, WORD_SIZE};

/// Entries of the stubs everything else is generated against.
#[derive(Debug, Clone)]
pub struct StubRoutines {
    pub blob: Arc<CodeBlob>,
    pub call_stub_entry: CodeAddress,
    /// Where Java code called from the call stub returns to. Exceptions reaching it go to
    /// `catch_exception_entry`.
    pub call_stub_return_address: CodeAddress,
    pub catch_exception_entry: CodeAddress,
    pub forward_exception_entry: CodeAddress,
    pub throw_stack_overflow_error_entry: CodeAddress,
    pub throw_abstract_method_error_entry: CodeAddress,
    pub update_bytes_crc32: Option<CodeAddress>,
    pub update_bytes_crc32c: Option<CodeAddress>,
}

fn call_stub_slot(offset: i32) -> Address {
    Address::new(RBP, slot_byte_offset(offset))
}

struct StubGenerator {
    masm: MacroAssembler,
}

impl StubGenerator {
    /// Called with the return address into Java code on top of the stack and a pending exception.
    /// Continues at the handler of that return address with rax the exception, rdx the throwing
    /// pc and the return address popped.
    fn generate_forward_exception(&mut self) -> CodeAddress {
        let masm = &mut self.masm;
        let start = masm.begin_codelet("forward_exception");
        masm.movptr(C_RARG0, Address::new(RSP, 0));
        masm.call_vm_leaf(RuntimeEntry::ExceptionHandlerForReturnAddress, &[THREAD, C_RARG0]);
        masm.mov(RBX, RAX);
        masm.pop(RDX);
        masm.movptr(RAX, Address::new(THREAD, THREAD_PENDING_EXCEPTION_OFFSET));
        masm.movptr_imm(Address::new(THREAD, THREAD_PENDING_EXCEPTION_OFFSET), 0);
        masm.jmp_reg(RBX);
        masm.end_codelet();
        start
    }

    /// C entry into Java:
    /// `call_stub(call_wrapper, result, result_type, method, entry_point, parameters, parameter_size, thread)`.
    /// Returns the call stub entry and the return address Java code comes back to.
    fn generate_call_stub(&mut self) -> (CodeAddress, CodeAddress) {
        let masm = &mut self.masm;
        let start = masm.begin_codelet("call_stub");
        let rsp_after_call = call_stub_slot(CALL_STUB_RSP_AFTER_CALL_OFFSET);
        let frame_bytes = -CALL_STUB_RSP_AFTER_CALL_OFFSET * WORD_SIZE;

        masm.enter();
        masm.subptr(RSP, frame_bytes);

        masm.movptr_store(call_stub_slot(CALL_STUB_PARAMETERS_OFFSET), C_RARG5);
        masm.movptr_store(call_stub_slot(CALL_STUB_ENTRY_POINT_OFFSET), C_RARG4);
        masm.movptr_store(call_stub_slot(CALL_STUB_METHOD_OFFSET), C_RARG3);
        masm.movl_store(call_stub_slot(CALL_STUB_RESULT_TYPE_OFFSET), C_RARG2);
        masm.movptr_store(call_stub_slot(CALL_STUB_RESULT_OFFSET), C_RARG1);
        masm.movptr_store(call_stub_slot(CALL_STUB_CALL_WRAPPER_OFFSET), C_RARG0);

        masm.movptr_store(call_stub_slot(CALL_STUB_RBX_OFFSET), RBX);
        masm.movptr_store(call_stub_slot(CALL_STUB_R12_OFFSET), R12);
        masm.movptr_store(call_stub_slot(CALL_STUB_R13_OFFSET), R13);
        masm.movptr_store(call_stub_slot(CALL_STUB_R14_OFFSET), R14);
        masm.movptr_store(call_stub_slot(CALL_STUB_R15_OFFSET), R15);

        masm.movptr(THREAD, call_stub_slot(CALL_STUB_THREAD_OFFSET));
        masm.reinit_heapbase();

        // parameter 0 ends up at the highest address
        let parameters_done = masm.new_label();
        let loop_ = masm.new_label();
        masm.movl(C_RARG3, call_stub_slot(CALL_STUB_PARAMETER_SIZE_OFFSET));
        masm.testl_jcc(C_RARG3, C_RARG3, Condition::Equal, parameters_done);
        masm.movptr(C_RARG2, call_stub_slot(CALL_STUB_PARAMETERS_OFFSET));
        masm.mov(C_RARG1, C_RARG3);
        masm.bind(loop_);
        masm.movptr(RAX, Address::new(C_RARG2, 0));
        masm.addptr(C_RARG2, WORD_SIZE);
        masm.push(RAX);
        masm.decrementl(C_RARG1, 1);
        masm.cmpl_jcc(C_RARG1, 0, Condition::NotEqual, loop_);
        masm.bind(parameters_done);

        masm.movptr(RBX, call_stub_slot(CALL_STUB_METHOD_OFFSET));
        masm.movptr(C_RARG1, call_stub_slot(CALL_STUB_ENTRY_POINT_OFFSET));
        masm.mov(R13, RSP);
        masm.call_reg(C_RARG1);
        let return_address = masm.pc();

        // everything that is not an object, long, float or double is stored as an int
        let is_long = masm.new_label();
        let is_float = masm.new_label();
        let is_double = masm.new_label();
        let exit = masm.new_label();
        masm.movptr(C_RARG0, call_stub_slot(CALL_STUB_RESULT_OFFSET));
        masm.movl(C_RARG1, call_stub_slot(CALL_STUB_RESULT_TYPE_OFFSET));
        masm.cmpl_jcc(C_RARG1, BasicType::Object.code() as i32, Condition::Equal, is_long);
        masm.cmpl_jcc(C_RARG1, BasicType::Long.code() as i32, Condition::Equal, is_long);
        masm.cmpl_jcc(C_RARG1, BasicType::Float.code() as i32, Condition::Equal, is_float);
        masm.cmpl_jcc(C_RARG1, BasicType::Double.code() as i32, Condition::Equal, is_double);
        masm.movl_store(Address::new(C_RARG0, 0), RAX);

        masm.bind(exit);
        masm.lea(RSP, rsp_after_call);
        masm.movptr(R15, call_stub_slot(CALL_STUB_R15_OFFSET));
        masm.movptr(R14, call_stub_slot(CALL_STUB_R14_OFFSET));
        masm.movptr(R13, call_stub_slot(CALL_STUB_R13_OFFSET));
        masm.movptr(R12, call_stub_slot(CALL_STUB_R12_OFFSET));
        masm.movptr(RBX, call_stub_slot(CALL_STUB_RBX_OFFSET));
        masm.addptr(RSP, frame_bytes);
        masm.pop(RBP);
        masm.ret();

        masm.bind(is_long);
        masm.movptr_store(Address::new(C_RARG0, 0), RAX);
        masm.jmp(exit);
        masm.bind(is_float);
        masm.movflt_store(Address::new(C_RARG0, 0), XMM0);
        masm.jmp(exit);
        masm.bind(is_double);
        masm.movdbl_store(Address::new(C_RARG0, 0), XMM0);
        masm.jmp(exit);
        masm.end_codelet();
        (start, return_address)
    }

    /// Exceptions whose handler is the call stub: make the exception pending and return to C
    /// through the normal return path.
    fn generate_catch_exception(&mut self, call_stub_return_address: CodeAddress) -> CodeAddress {
        let masm = &mut self.masm;
        let start = masm.begin_codelet("catch_exception");
        masm.movptr_store(Address::new(THREAD, THREAD_PENDING_EXCEPTION_OFFSET), RAX);
        masm.jmp(call_stub_return_address);
        masm.end_codelet();
        start
    }

    /// Calls `entry`, which only creates and installs the exception, with a walkable frame and
    /// then forwards it to the caller of whoever jumped here.
    fn generate_throw_exception(&mut self, name: &str, entry: RuntimeEntry, forward_exception: CodeAddress) -> CodeAddress {
        let masm = &mut self.masm;
        let start = masm.begin_codelet(name);
        masm.enter();
        let the_pc = masm.pc();
        masm.set_last_java_frame(Some(RSP), Some(RBP), Some(the_pc));
        masm.andptr(RSP, -STACK_ALIGNMENT_IN_BYTES);
        masm.mov(C_RARG0, THREAD);
        masm.emit(Instr::CallRuntime { entry });
        masm.reset_last_java_frame(true);
        masm.leave();
        masm.jmp(forward_exception);
        masm.end_codelet();
        start
    }

    /// `crc = update(crc, buf, len)` with c_rarg0 the crc, c_rarg1 the buffer and c_rarg2 the
    /// length. The result is in rax.
    ///
    /// java.util.zip.CRC32 keeps the crc uninverted between calls, CRC32C keeps it inverted.
    fn generate_update_bytes(&mut self, name: &str, table: u64, invert: bool) -> CodeAddress {
        let masm = &mut self.masm;
        let start = masm.begin_codelet(name);
        let loop_ = masm.new_label();
        let done = masm.new_label();
        masm.mov(RAX, C_RARG0);
        if invert {
            masm.xorl(RAX, -1);
        }
        masm.mov_imm(RSCRATCH1, table);
        masm.bind(loop_);
        masm.cmpl_jcc(C_RARG2, 0, Condition::LessEqual, done);
        masm.load_unsigned_byte(RCX, Address::new(C_RARG1, 0));
        update_byte_crc32(masm, RAX, RCX, RSCRATCH1);
        masm.addptr(C_RARG1, 1);
        masm.decrementl(C_RARG2, 1);
        masm.jmp(loop_);
        masm.bind(done);
        if invert {
            masm.xorl(RAX, -1);
        }
        masm.ret();
        masm.end_codelet();
        start
    }
}

/// One table step of a reflected crc: `crc = table[(crc ^ val) & 0xff] ^ (crc >> 8)`. Clobbers
/// `val`.
pub fn update_byte_crc32(masm: &mut MacroAssembler, crc: Register, val: Register, table: Register) {
    masm.xorl(val, crc);
    masm.andl(val, 0xff);
    masm.shrl(crc, 8);
    masm.xorl(crc, Address::indexed(table, val, Scale::Times4, 0));
}

/// Generates the stubs blob. forward_exception comes first since every later VM call of the
/// interpreter and the throw stubs jump to it.
pub fn generate_stubs(code_space: &CodeSpace, flags: &GeneratorFlags, external: ExternalAddresses) -> Result<StubRoutines, GenerationError> {
    let masm = MacroAssembler::new("stubs", code_space.reserve(), flags.stub_code_size, external);
    let mut generator = StubGenerator { masm };
    let forward_exception_entry = generator.generate_forward_exception();
    generator.masm.set_forward_exception_entry(forward_exception_entry);
    let (call_stub_entry, call_stub_return_address) = generator.generate_call_stub();
    let catch_exception_entry = generator.generate_catch_exception(call_stub_return_address);
    let throw_stack_overflow_error_entry = generator.generate_throw_exception("throw_StackOverflowError", RuntimeEntry::ThrowStackOverflowError, forward_exception_entry);
    let throw_abstract_method_error_entry = generator.generate_throw_exception("throw_AbstractMethodError", RuntimeEntry::ThrowAbstractMethodError, forward_exception_entry);
    let update_bytes_crc32 = flags.use_crc32_intrinsics.then(|| generator.generate_update_bytes("updateBytesCRC32", external.crc_table, true));
    let update_bytes_crc32c = flags.use_crc32c_intrinsics.then(|| generator.generate_update_bytes("updateBytesCRC32C", external.crc32c_table, false));
    let blob = code_space.install(generator.masm.finish()?);
    tracing::debug!(base = %blob.base, instructions = blob.instructions.len(), "generated stubs");
    Ok(StubRoutines {
        blob,
        call_stub_entry,
        call_stub_return_address,
        catch_exception_entry,
        forward_exception_entry,
        throw_stack_overflow_error_entry,
        throw_abstract_method_error_entry,
        update_bytes_crc32,
        update_bytes_crc32c,
    })
}
