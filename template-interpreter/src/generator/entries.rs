use entry_asm::instr::{Address, Condition, Scale, Size};
use entry_asm::registers::{METHOD, RBX, RCX, RSI, RSP};
use entry_asm::runtime_entry::RuntimeEntry;
use entry_asm::CodeAddress;
use interpreter_common::basic_type::{TosState, NUMBER_OF_STATES};
use interpreter_common::frame_layout::INTERPRETER_FRAME_LAST_SP_OFFSET;
use interpreter_common::vm_layout::{CP_CACHE_BASE_OFFSET, CP_CACHE_ENTRY_FLAGS_OFFSET, CP_CACHE_ENTRY_PARAMETER_SIZE_MASK, THREAD_PENDING_EXCEPTION_OFFSET, THREAD_PENDING_MONITORENTER_OFFSET};
use strum::IntoEnumIterator;

use crate::generator::TemplateInterpreterGenerator;
use crate::interp_masm::{frame_slot, thread_field, InterpreterFrameAccess};

impl TemplateInterpreterGenerator<'_> {
    /// Continuation after an invoke of length `step` returned with a `state` result: pops the
    /// arguments the callee left behind and dispatches the next bytecode.
    pub(super) fn generate_return_entry_for(&mut self, state: TosState, step: i32, index_size: usize) -> CodeAddress {
        let hooks = self.masm.hooks();
        let masm = &mut self.masm;
        let entry = masm.pc();

        // rsp may have been moved by a compiled callee
        masm.movptr(RSP, frame_slot(INTERPRETER_FRAME_LAST_SP_OFFSET));
        masm.movptr_imm(frame_slot(INTERPRETER_FRAME_LAST_SP_OFFSET), 0);
        masm.restore_bcp();
        masm.restore_locals();

        masm.get_cache_and_index_at_bcp(RBX, RCX, 1, index_size);
        masm.movl(RBX, Address::indexed(RBX, RCX, Scale::Times8, CP_CACHE_BASE_OFFSET + CP_CACHE_ENTRY_FLAGS_OFFSET));
        masm.andl(RBX, CP_CACHE_ENTRY_PARAMETER_SIZE_MASK as i32);
        masm.lea(RSP, Address::indexed(RSP, RBX, Scale::Times8, 0));

        hooks.check_and_handle_popframe(masm);
        hooks.check_and_handle_earlyret(masm);
        masm.dispatch_next(state, step);
        entry
    }

    /// One ForceEarlyReturn continuation per tos state. The frame's method returns the value the
    /// debugger stored in the thread's JVMTI state.
    pub(super) fn codelet_earlyret_entries(&mut self) -> [CodeAddress; NUMBER_OF_STATES] {
        let hooks = self.masm.hooks();
        let masm = &mut self.masm;
        let mut entries = [CodeAddress(0); NUMBER_OF_STATES];
        masm.begin_codelet("earlyret entry points");
        for state in TosState::iter() {
            entries[state.index()] = masm.pc();
            masm.bind(hooks.earlyret[state.index()]);
            masm.restore_bcp();
            masm.restore_locals();
            masm.empty_expression_stack();
            masm.load_earlyret_value(state);
            masm.clear_earlyret_state();
            masm.remove_activation(state, RSI, true);
            masm.jmp_reg(RSI);
        }
        masm.end_codelet();
        entries
    }

    /// Where a deoptimized frame resumes: right after an instruction of length `step` that
    /// produced a `state` result, or at method entry for `(Vtos, 0)`.
    pub(super) fn generate_deopt_entry_for(&mut self, state: TosState, step: i32) -> CodeAddress {
        let enable_jvmci = self.flags.enable_jvmci;
        let entry = self.masm.pc();
        let masm = &mut self.masm;
        masm.movptr_imm(frame_slot(INTERPRETER_FRAME_LAST_SP_OFFSET), 0);
        masm.restore_bcp();
        masm.restore_locals();

        if enable_jvmci && state == TosState::Vtos && step == 0 {
            // deoptimized before the compiled code took the method's lock
            let no_pending_lock = masm.new_label();
            masm.cmp_jcc(Size::Byte, thread_field(THREAD_PENDING_MONITORENTER_OFFSET), 0, Condition::Equal, no_pending_lock);
            masm.movb_imm(thread_field(THREAD_PENDING_MONITORENTER_OFFSET), 0);
            masm.get_method(METHOD);
            self.lock_method();
            self.masm.bind(no_pending_lock);
        }

        let masm = &mut self.masm;
        let no_exception = masm.new_label();
        masm.cmpptr_jcc(thread_field(THREAD_PENDING_EXCEPTION_OFFSET), 0, Condition::Equal, no_exception);
        masm.call_vm(None, RuntimeEntry::ThrowPendingException, &[]);
        masm.stop("pending exception survived its rethrow");
        masm.bind(no_exception);

        masm.dispatch_next(state, step);
        entry
    }
}
