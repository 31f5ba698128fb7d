use entry_asm::instr::{Address, Condition};
use entry_asm::registers::{METHOD, RAX, RCX, RDX};
use entry_asm::runtime_entry::RuntimeEntry;
use interpreter_common::basic_type::TosState;
use interpreter_common::vm_layout::{CONST_METHOD_SIZE_OF_LOCALS_OFFSET, CONST_METHOD_SIZE_OF_PARAMETERS_OFFSET, METHOD_CONST_OFFSET, THREAD_DO_NOT_UNLOCK_IF_SYNCHRONIZED_OFFSET};

use crate::generator::counters::ProfileMethodLabels;
use crate::generator::TemplateInterpreterGenerator;
use crate::interp_masm::{thread_field, InterpreterFrameAccess};

impl TemplateInterpreterGenerator<'_> {
    /// Entry of interpreted methods. Expects the Method* in rbx, the sender sp in r13 and the
    /// return address on top of the parameters. Ends by dispatching the first bytecode.
    pub(super) fn generate_normal_entry(&mut self, synchronized: bool) {
        let inc_counter = self.flags.use_compiler;
        let profile_interpreter = self.flags.profile_interpreter;

        let masm = &mut self.masm;
        masm.movptr(RDX, Address::new(METHOD, METHOD_CONST_OFFSET));
        masm.load_unsigned_short(RCX, Address::new(RDX, CONST_METHOD_SIZE_OF_PARAMETERS_OFFSET));
        masm.load_unsigned_short(RDX, Address::new(RDX, CONST_METHOD_SIZE_OF_LOCALS_OFFSET));
        masm.subl(RDX, RCX);

        self.generate_stack_overflow_check();

        self.masm.pop(RAX);
        self.compute_locals();

        let masm = &mut self.masm;
        {
            let exit = masm.new_label();
            let loop_ = masm.new_label();
            masm.testl_jcc(RDX, RDX, Condition::LessEqual, exit);
            masm.bind(loop_);
            masm.push_imm(0);
            masm.decrementl(RDX, 1);
            masm.testl_jcc(RDX, RDX, Condition::Greater, loop_);
            masm.bind(exit);
        }

        self.generate_fixed_frame(false);

        // an exception thrown before the monitor is taken must not release it
        self.masm.movb_imm(thread_field(THREAD_DO_NOT_UNLOCK_IF_SYNCHRONIZED_OFFSET), 1);

        let invocation_counter_overflow = self.masm.new_label();
        let profile = ProfileMethodLabels { profile_method: self.masm.new_label(), profile_method_continue: self.masm.new_label() };
        if inc_counter {
            self.generate_counter_incr(invocation_counter_overflow, Some(profile));
            if profile_interpreter {
                self.masm.bind(profile.profile_method_continue);
            }
        }
        let continue_after_compile = self.masm.new_label();
        self.masm.bind(continue_after_compile);

        self.bang_stack_shadow_pages(false);
        self.masm.movb_imm(thread_field(THREAD_DO_NOT_UNLOCK_IF_SYNCHRONIZED_OFFSET), 0);

        if synchronized {
            self.lock_method();
        }

        self.masm.dispatch_next(TosState::Vtos, 0);

        if inc_counter {
            if profile_interpreter {
                let masm = &mut self.masm;
                masm.bind(profile.profile_method);
                masm.call_vm(None, RuntimeEntry::ProfileMethod, &[]);
                masm.set_method_data_pointer_for_bcp();
                masm.get_method(METHOD);
                masm.jmp(profile.profile_method_continue);
            }
            self.masm.bind(invocation_counter_overflow);
            self.generate_counter_overflow(continue_after_compile);
        }
    }
}
