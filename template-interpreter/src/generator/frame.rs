use entry_asm::instr::{Address, Condition, Scale};
use entry_asm::registers::{BCP, C_RARG1, LOCALS, METHOD, RAX, RCX, RDX, RSP, SENDER_SP, THREAD};
use interpreter_common::frame_layout::{BASIC_OBJECT_LOCK_OBJ_OFFSET, INTERPRETER_FRAME_MONITOR_BLOCK_TOP_OFFSET, INTERPRETER_FRAME_MONITOR_SIZE, OVERFLOW_CHECK_OVERHEAD_SIZE};
use interpreter_common::vm_layout::{
    ACC_STATIC, CONSTANT_POOL_CACHE_OFFSET, CONST_METHOD_CODES_OFFSET, CONST_METHOD_CONSTANTS_OFFSET, METHOD_ACCESS_FLAGS_OFFSET, METHOD_CONST_OFFSET, METHOD_DATA_DATA_OFFSET,
    METHOD_METHOD_DATA_OFFSET, THREAD_STACK_BASE_OFFSET, THREAD_STACK_SIZE_OFFSET,
};
use interpreter_common::{local_offset_in_bytes, LOG_STACK_ELEMENT_SIZE, WORD_SIZE};

use crate::generator::TemplateInterpreterGenerator;
use crate::interp_masm::frame_slot;

impl TemplateInterpreterGenerator<'_> {
    /// Builds the fixed part of an interpreter frame. Expects the return address in rax, the
    /// Method* in rbx, the sender sp in r13 and the locals in r14. Leaves r13 at the first
    /// bytecode for interpreted methods.
    pub(super) fn generate_fixed_frame(&mut self, native_call: bool) {
        let masm = &mut self.masm;
        masm.push(RAX);
        masm.enter();
        masm.push(SENDER_SP);
        // last sp
        masm.push_imm(0);
        masm.movptr(BCP, Address::new(METHOD, METHOD_CONST_OFFSET));
        masm.lea(BCP, Address::new(BCP, CONST_METHOD_CODES_OFFSET));
        masm.push(METHOD);
        if self.flags.profile_interpreter {
            let method_data_continue = masm.new_label();
            masm.movptr(RDX, Address::new(METHOD, METHOD_METHOD_DATA_OFFSET));
            masm.testptr_jcc(RDX, RDX, Condition::Equal, method_data_continue);
            masm.addptr(RDX, METHOD_DATA_DATA_OFFSET);
            masm.bind(method_data_continue);
            masm.push(RDX);
        } else {
            masm.push_imm(0);
        }
        masm.movptr(RDX, Address::new(METHOD, METHOD_CONST_OFFSET));
        masm.movptr(RDX, Address::new(RDX, CONST_METHOD_CONSTANTS_OFFSET));
        masm.movptr(RDX, Address::new(RDX, CONSTANT_POOL_CACHE_OFFSET));
        masm.push(RDX);
        masm.push(LOCALS);
        if native_call {
            masm.push_imm(0);
        } else {
            masm.push(BCP);
        }
        // expression stack bottom
        masm.push_imm(0);
        masm.movptr_store(Address::new(RSP, 0), RSP);
    }

    /// Checks that `rdx` additional locals plus the frame overhead fit above the guard zones and
    /// throws StackOverflowError from the caller's state if not. Runs before the frame exists,
    /// with the return address still on top of the stack. Clobbers rax.
    pub(super) fn generate_stack_overflow_check(&mut self) {
        let page_size = self.flags.page_size as i32;
        let bang_size = self.flags.max_bang_size() as i32;
        let throw_stack_overflow_error = self.stubs.throw_stack_overflow_error_entry;
        let masm = &mut self.masm;
        let after_frame_check = masm.new_label();

        // a frame smaller than a page is covered by the shadow zone banging
        masm.cmpl_jcc(RDX, (page_size - OVERFLOW_CHECK_OVERHEAD_SIZE) / WORD_SIZE, Condition::BelowEqual, after_frame_check);

        masm.mov(RAX, RDX);
        masm.shlptr(RAX, LOG_STACK_ELEMENT_SIZE as i32);
        masm.addptr(RAX, OVERFLOW_CHECK_OVERHEAD_SIZE);
        masm.addptr(RAX, Address::new(THREAD, THREAD_STACK_BASE_OFFSET));
        masm.subptr(RAX, Address::new(THREAD, THREAD_STACK_SIZE_OFFSET));
        masm.addptr(RAX, bang_size);
        masm.cmpptr_jcc(RSP, RAX, Condition::AboveEqual, after_frame_check);

        // unwind to the caller's sp, keeping the return address
        masm.pop(RAX);
        masm.mov(RSP, SENDER_SP);
        masm.push(RAX);
        masm.jmp(throw_stack_overflow_error);

        masm.bind(after_frame_check);
    }

    /// Touches every page of the shadow zone so a fault happens while the frame is walkable.
    pub(super) fn bang_stack_shadow_pages(&mut self, native_call: bool) {
        if !self.flags.use_stack_banging {
            return;
        }
        let page_size = self.flags.page_size as i32;
        let shadow_pages = (self.flags.stack_shadow_zone_size() as i32) / page_size;
        let start_page = if native_call { shadow_pages } else { 1 };
        for page in start_page..=shadow_pages {
            self.masm.bang_stack_with_offset(page * page_size);
        }
    }

    /// Allocates the method's monitor next to the fixed frame and locks the receiver, or the
    /// mirror of a static method. Expects the Method* in rbx and the locals in r14.
    pub(super) fn lock_method(&mut self) {
        let masm = &mut self.masm;
        let not_static = masm.new_label();
        let receiver_loaded = masm.new_label();
        masm.movl(RAX, Address::new(METHOD, METHOD_ACCESS_FLAGS_OFFSET));
        masm.testl_jcc(RAX, ACC_STATIC as i32, Condition::Equal, not_static);
        masm.load_mirror(RAX, METHOD);
        masm.jmp(receiver_loaded);
        masm.bind(not_static);
        masm.movptr(RAX, Address::new(LOCALS, local_offset_in_bytes(0)));
        masm.bind(receiver_loaded);

        masm.subptr(RSP, INTERPRETER_FRAME_MONITOR_SIZE * WORD_SIZE);
        masm.movptr_store(frame_slot(INTERPRETER_FRAME_MONITOR_BLOCK_TOP_OFFSET), RSP);
        masm.movptr_store(Address::new(RSP, BASIC_OBJECT_LOCK_OBJ_OFFSET), RAX);
        masm.mov(C_RARG1, RSP);
        masm.lock_object(C_RARG1);
    }

    /// Points r14 at local 0 of a method whose `rcx` parameters sit above the return address,
    /// after the return address has been popped into rax.
    pub(super) fn compute_locals(&mut self) {
        self.masm.lea(LOCALS, Address::indexed(RSP, RCX, Scale::Times8, -WORD_SIZE));
    }
}
