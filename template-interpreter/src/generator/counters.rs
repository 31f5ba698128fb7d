use entry_asm::instr::{Address, Condition};
use entry_asm::registers::{C_RARG1, METHOD, RAX, RCX, RDX, RSP, SENDER_SP};
use entry_asm::runtime_entry::RuntimeEntry;
use entry_asm::LabelName;
use interpreter_common::frame_layout::{INTERPRETER_FRAME_SENDER_SP_OFFSET, RETURN_ADDR_OFFSET};
use interpreter_common::vm_layout::{
    INVOCATION_COUNTER_COUNT_INCREMENT, INVOCATION_COUNTER_COUNT_MASK_VALUE, METHOD_COUNTERS_BACKEDGE_COUNTER_OFFSET, METHOD_COUNTERS_INTERPRETER_INVOCATION_COUNT_OFFSET,
    METHOD_COUNTERS_INTERPRETER_INVOCATION_LIMIT_OFFSET, METHOD_COUNTERS_INTERPRETER_PROFILE_LIMIT_OFFSET, METHOD_COUNTERS_INVOCATION_COUNTER_OFFSET, METHOD_COUNTERS_INVOKE_MASK_OFFSET,
    METHOD_DATA_INVOCATION_COUNTER_OFFSET, METHOD_DATA_INVOKE_MASK_OFFSET, METHOD_METHOD_COUNTERS_OFFSET, METHOD_METHOD_DATA_OFFSET, THREAD_DO_NOT_UNLOCK_IF_SYNCHRONIZED_OFFSET,
};

use crate::generator::TemplateInterpreterGenerator;
use crate::interp_masm::{frame_slot, thread_field, InterpreterFrameAccess};

/// Labels of the "start profiling this method" detour of interpreted entries.
#[derive(Debug, Clone, Copy)]
pub(super) struct ProfileMethodLabels {
    pub profile_method: LabelName,
    pub profile_method_continue: LabelName,
}

impl TemplateInterpreterGenerator<'_> {
    /// Counts an invocation of the method in rbx and jumps to `overflow` once it should be
    /// compiled. Clobbers rax and rcx.
    ///
    /// With tiered compilation the count lives in the method data when there is one and in the
    /// method counters otherwise. Without it the method counters always count, and `profile`
    /// additionally diverts to profiling once the lower profile limit is crossed.
    pub(super) fn generate_counter_incr(&mut self, overflow: LabelName, profile: Option<ProfileMethodLabels>) {
        let increment = INVOCATION_COUNTER_COUNT_INCREMENT as i32;
        let profile_interpreter = self.flags.profile_interpreter;
        let masm = &mut self.masm;
        let done = masm.new_label();

        if self.flags.tiered_compilation {
            let no_mdo = masm.new_label();
            if profile_interpreter {
                masm.movptr(RAX, Address::new(METHOD, METHOD_METHOD_DATA_OFFSET));
                masm.testptr_jcc(RAX, RAX, Condition::Equal, no_mdo);
                let counter = Address::new(RAX, METHOD_DATA_INVOCATION_COUNTER_OFFSET);
                let mask = Address::new(RAX, METHOD_DATA_INVOKE_MASK_OFFSET);
                masm.increment_mask_and_jump(counter, increment, mask, RCX, overflow);
                masm.jmp(done);
            }
            masm.bind(no_mdo);
            masm.get_method_counters(METHOD, RAX, done);
            let counter = Address::new(RAX, METHOD_COUNTERS_INVOCATION_COUNTER_OFFSET);
            let mask = Address::new(RAX, METHOD_COUNTERS_INVOKE_MASK_OFFSET);
            masm.increment_mask_and_jump(counter, increment, mask, RCX, overflow);
        } else {
            let invocation_counter = Address::new(RAX, METHOD_COUNTERS_INVOCATION_COUNTER_OFFSET);
            masm.get_method_counters(METHOD, RAX, done);
            if profile_interpreter {
                masm.increment_saturating(Address::new(RAX, METHOD_COUNTERS_INTERPRETER_INVOCATION_COUNT_OFFSET), 1, RCX);
            }
            masm.movl(RCX, invocation_counter);
            masm.cmpl_jcc(RCX, -increment, Condition::AboveEqual, overflow);
            masm.addl(RCX, increment);
            masm.movl_store(invocation_counter, RCX);
            masm.movl(RAX, Address::new(RAX, METHOD_COUNTERS_BACKEDGE_COUNTER_OFFSET));
            masm.andl(RAX, INVOCATION_COUNTER_COUNT_MASK_VALUE as i32);
            masm.addl(RCX, RAX);

            if let (true, Some(labels)) = (profile_interpreter, profile) {
                masm.movptr(RAX, Address::new(METHOD, METHOD_METHOD_COUNTERS_OFFSET));
                masm.cmpl_jcc(RCX, Address::new(RAX, METHOD_COUNTERS_INTERPRETER_PROFILE_LIMIT_OFFSET), Condition::Below, labels.profile_method_continue);
                masm.test_method_data_pointer(RAX, labels.profile_method);
            }
            masm.movptr(RAX, Address::new(METHOD, METHOD_METHOD_COUNTERS_OFFSET));
            masm.cmpl_jcc(RCX, Address::new(RAX, METHOD_COUNTERS_INTERPRETER_INVOCATION_LIMIT_OFFSET), Condition::AboveEqual, overflow);
        }
        masm.bind(done);
    }

    /// Asks the runtime to compile the method. Without compiled code interpretation resumes at
    /// `do_continue`; otherwise the frame is dropped and the call is redone in the returned code,
    /// exactly as the caller made it.
    pub(super) fn generate_counter_overflow(&mut self, do_continue: LabelName) {
        let masm = &mut self.masm;
        let compiled = masm.new_label();

        // not a backedge
        masm.mov_imm(C_RARG1, 0);
        masm.call_vm(None, RuntimeEntry::FrequencyCounterOverflow, &[C_RARG1]);
        masm.testptr_jcc(RAX, RAX, Condition::NotEqual, compiled);
        masm.get_method(METHOD);
        masm.jmp(do_continue);

        masm.bind(compiled);
        masm.movptr(RCX, frame_slot(RETURN_ADDR_OFFSET));
        masm.movptr(RDX, frame_slot(INTERPRETER_FRAME_SENDER_SP_OFFSET));
        masm.get_method(METHOD);
        masm.movb_imm(thread_field(THREAD_DO_NOT_UNLOCK_IF_SYNCHRONIZED_OFFSET), 0);
        masm.leave();
        masm.mov(RSP, RDX);
        masm.push(RCX);
        masm.mov(SENDER_SP, RDX);
        masm.jmp_reg(RAX);
    }
}
