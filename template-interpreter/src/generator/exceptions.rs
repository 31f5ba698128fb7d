use entry_asm::instr::{Address, Condition};
use entry_asm::registers::{C_RARG1, C_RARG2, LOCALS, METHOD, RAX, RBP, RBX, RDX, RSP, THREAD};
use entry_asm::runtime_entry::{RuntimeEntry, ThrowableKind};
use entry_asm::CodeAddress;
use interpreter_common::basic_type::TosState;
use interpreter_common::frame_layout::{INTERPRETER_FRAME_LAST_SP_OFFSET, RETURN_ADDR_OFFSET};
use interpreter_common::vm_layout::{
    CONST_METHOD_SIZE_OF_PARAMETERS_OFFSET, METHOD_CONST_OFFSET, POPFRAME_FORCE_DEOPT_REEXECUTION_BIT, POPFRAME_INACTIVE, POPFRAME_PROCESSING_BIT, THREAD_POPFRAME_CONDITION_OFFSET,
    THREAD_VM_RESULT_OFFSET,
};
use interpreter_common::{LOG_STACK_ELEMENT_SIZE, WORD_SIZE};

use crate::generator::TemplateInterpreterGenerator;
use crate::interp_masm::{frame_slot, thread_field, InterpreterFrameAccess};

/// Entries of the shared exception path.
#[derive(Debug, Clone, Copy)]
pub(super) struct ThrowEntries {
    pub rethrow_exception: CodeAddress,
    pub throw_exception: CodeAddress,
    pub remove_activation_preserving_args: CodeAddress,
    pub remove_activation: CodeAddress,
}

/// Entries bytecode templates jump to when they detect an exceptional condition.
#[derive(Debug, Clone, Copy)]
pub(super) struct ExceptionHandlers {
    pub array_index_out_of_bounds: CodeAddress,
    pub array_store: CodeAddress,
    pub arithmetic: CodeAddress,
    pub class_cast: CodeAddress,
    pub null_pointer: CodeAddress,
    pub stack_overflow: CodeAddress,
}

impl TemplateInterpreterGenerator<'_> {
    /// Generates the exception entries, in the order control falls through them:
    ///
    /// - rethrow: the exception (rax) arrives in a caller frame through a return; the bcp of
    ///   that frame still points at the invoke.
    /// - throw: the exception (rax) was raised in this frame. The runtime picks the handler,
    ///   which continues with the exception as the only stack element.
    /// - remove activation preserving args: a PopFrame request. The frame goes away and the
    ///   caller re-executes its invoke.
    /// - remove activation: the method has no handler. The frame goes away and the exception is
    ///   rethrown in the caller.
    pub(super) fn generate_throw_exception(&mut self) -> ThrowEntries {
        let popframe_label = self.masm.hooks().remove_activation_preserving_args;
        let profile_interpreter = self.flags.profile_interpreter;
        let masm = &mut self.masm;

        let rethrow_exception = masm.pc();
        masm.movptr_imm(frame_slot(INTERPRETER_FRAME_LAST_SP_OFFSET), 0);
        masm.restore_bcp();
        masm.restore_locals();
        masm.reinit_heapbase();

        let throw_exception = masm.pc();
        masm.mov(C_RARG1, RAX);
        masm.empty_expression_stack();
        // handler in rax, exception back in rdx
        masm.call_vm(Some(RDX), RuntimeEntry::ExceptionHandlerForException, &[C_RARG1]);
        masm.push(RDX);
        masm.jmp_reg(RAX);

        let remove_activation_preserving_args = masm.pc();
        masm.bind(popframe_label);
        masm.empty_expression_stack();
        masm.movl(RDX, thread_field(THREAD_POPFRAME_CONDITION_OFFSET));
        masm.orl(RDX, POPFRAME_PROCESSING_BIT as i32);
        masm.movl_store(thread_field(THREAD_POPFRAME_CONDITION_OFFSET), RDX);

        {
            // a caller outside the interpreter is a deoptimized frame, which restores the
            // arguments itself once told to re-execute
            let caller_not_deoptimized = masm.new_label();
            masm.movptr(C_RARG1, frame_slot(RETURN_ADDR_OFFSET));
            masm.call_vm_leaf(RuntimeEntry::InterpreterContains, &[C_RARG1]);
            masm.testl_jcc(RAX, RAX, Condition::NotEqual, caller_not_deoptimized);

            masm.get_method(RAX);
            masm.movptr(RAX, Address::new(RAX, METHOD_CONST_OFFSET));
            masm.load_unsigned_short(RAX, Address::new(RAX, CONST_METHOD_SIZE_OF_PARAMETERS_OFFSET));
            masm.shlptr(RAX, LOG_STACK_ELEMENT_SIZE as i32);
            masm.restore_locals();
            masm.subptr(LOCALS, RAX);
            masm.addptr(LOCALS, WORD_SIZE);
            masm.call_vm_leaf(RuntimeEntry::PopframePreserveArgs, &[THREAD, RAX, LOCALS]);

            masm.remove_activation(TosState::Vtos, RDX, false);
            masm.movl_imm(thread_field(THREAD_POPFRAME_CONDITION_OFFSET), POPFRAME_FORCE_DEOPT_REEXECUTION_BIT as i32);
            masm.jmp_reg(RDX);

            masm.bind(caller_not_deoptimized);
        }

        masm.remove_activation(TosState::Vtos, RDX, false);

        // the caller's expression stack has to end exactly at its outgoing arguments
        masm.mov(C_RARG1, RSP);
        masm.movptr(C_RARG2, frame_slot(INTERPRETER_FRAME_LAST_SP_OFFSET));
        let pc = masm.pc();
        masm.set_last_java_frame(None, Some(RBP), Some(pc));
        masm.call_vm_leaf(RuntimeEntry::PopframeMoveOutgoingArgs, &[THREAD, C_RARG1, C_RARG2]);
        masm.reset_last_java_frame(true);
        masm.movptr(RSP, frame_slot(INTERPRETER_FRAME_LAST_SP_OFFSET));
        masm.movptr_imm(frame_slot(INTERPRETER_FRAME_LAST_SP_OFFSET), 0);
        masm.restore_bcp();
        masm.restore_locals();
        if profile_interpreter {
            masm.set_method_data_pointer_for_bcp();
        }
        masm.movl_imm(thread_field(THREAD_POPFRAME_CONDITION_OFFSET), POPFRAME_INACTIVE as i32);
        masm.dispatch_next(TosState::Vtos, 0);

        let remove_activation = masm.pc();
        // keep the exception where a gc finds it
        masm.pop(RAX);
        masm.movptr_store(thread_field(THREAD_VM_RESULT_OFFSET), RAX);
        masm.remove_activation(TosState::Vtos, RDX, true);
        masm.get_vm_result(RAX);
        // in between activations: rax exception, rdx the pc that threw in the caller
        masm.push(RAX);
        masm.push(RDX);
        masm.call_vm_leaf(RuntimeEntry::ExceptionHandlerForReturnAddress, &[THREAD, RDX]);
        masm.mov(RBX, RAX);
        masm.pop(RDX);
        masm.pop(RAX);
        masm.jmp_reg(RBX);

        ThrowEntries { rethrow_exception, throw_exception, remove_activation_preserving_args, remove_activation }
    }

    pub(super) fn generate_exception_handlers(&mut self, throw_exception: CodeAddress) -> ExceptionHandlers {
        ExceptionHandlers {
            array_index_out_of_bounds: self.generate_array_index_out_of_bounds_handler(),
            array_store: self.generate_exception_handler_common(ThrowableKind::ArrayStoreException, true, throw_exception),
            arithmetic: self.generate_exception_handler_common(ThrowableKind::ArithmeticException, false, throw_exception),
            class_cast: self.generate_class_cast_exception_handler(),
            null_pointer: self.generate_exception_handler_common(ThrowableKind::NullPointerException, false, throw_exception),
            stack_overflow: self.generate_stack_overflow_error_handler(),
        }
    }

    /// Expects the array in c_rarg1 and the offending index in rbx.
    fn generate_array_index_out_of_bounds_handler(&mut self) -> CodeAddress {
        let masm = &mut self.masm;
        let entry = masm.pc();
        masm.empty_expression_stack();
        masm.call_vm(None, RuntimeEntry::ThrowArrayIndexOutOfBoundsException, &[C_RARG1, RBX]);
        masm.stop("ArrayIndexOutOfBoundsException handler returned");
        entry
    }

    /// Expects the object that failed the cast on top of the stack.
    fn generate_class_cast_exception_handler(&mut self) -> CodeAddress {
        let masm = &mut self.masm;
        let entry = masm.pc();
        masm.pop(C_RARG1);
        masm.empty_expression_stack();
        masm.call_vm(None, RuntimeEntry::ThrowClassCastException, &[C_RARG1]);
        masm.stop("ClassCastException handler returned");
        entry
    }

    /// Creates an exception of `kind` and throws it in the current frame. With `pass_oop` the
    /// object on top of the stack names the exception's detail message through its class.
    fn generate_exception_handler_common(&mut self, kind: ThrowableKind, pass_oop: bool, throw_exception: CodeAddress) -> CodeAddress {
        let masm = &mut self.masm;
        let entry = masm.pc();
        if pass_oop {
            masm.pop(C_RARG2);
        }
        masm.empty_expression_stack();
        masm.mov_imm(C_RARG1, kind as u64);
        if pass_oop {
            masm.call_vm(Some(RAX), RuntimeEntry::CreateKlassException, &[C_RARG1, C_RARG2]);
        } else {
            masm.mov_imm(C_RARG2, kind.default_message().is_some() as u64);
            masm.call_vm(Some(RAX), RuntimeEntry::CreateException, &[C_RARG1, C_RARG2]);
        }
        masm.jmp(throw_exception);
        entry
    }

    fn generate_stack_overflow_error_handler(&mut self) -> CodeAddress {
        let masm = &mut self.masm;
        let entry = masm.pc();
        masm.restore_bcp();
        masm.empty_expression_stack();
        masm.call_vm(None, RuntimeEntry::ThrowStackOverflowError, &[]);
        masm.stop("StackOverflowError handler returned");
        entry
    }

    /// Entry of abstract methods. Runs in the caller's frame, so bcp and locals are the ones of
    /// the invoke that reached it.
    pub(super) fn generate_abstract_entry(&mut self) -> CodeAddress {
        let masm = &mut self.masm;
        let entry = masm.pc();
        masm.empty_expression_stack();
        masm.restore_bcp();
        masm.restore_locals();
        masm.call_vm(None, RuntimeEntry::ThrowAbstractMethodError, &[METHOD]);
        masm.stop("AbstractMethodError not thrown");
        entry
    }
}
