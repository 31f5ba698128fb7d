use entry_asm::instr::{Address, Condition, Extension, Size};
use entry_asm::registers::{BCP, C_RARG0, C_RARG1, METHOD, RAX, RBP, RCX, RDI, RSCRATCH1, RSP, THREAD};
use entry_asm::runtime_entry::RuntimeEntry;
use entry_asm::CodeAddress;
use interpreter_common::basic_type::{BasicType, TosState};
use interpreter_common::frame_layout::{BASIC_OBJECT_LOCK_OBJ_OFFSET, INTERPRETER_FRAME_OOP_TEMP_OFFSET, INTERPRETER_FRAME_RESULT_HANDLER_OFFSET, INTERPRETER_FRAME_SENDER_SP_OFFSET};
use interpreter_common::vm_layout::{
    ThreadState, ACC_STATIC, ACC_SYNCHRONIZED, CONST_METHOD_CODES_OFFSET, CONST_METHOD_SIZE_OF_PARAMETERS_OFFSET, JNI_HANDLE_BLOCK_TOP_OFFSET, METHOD_ACCESS_FLAGS_OFFSET, METHOD_CONST_OFFSET,
    METHOD_NATIVE_FUNCTION_OFFSET, METHOD_SIGNATURE_HANDLER_OFFSET, SAFEPOINT_NOT_SYNCHRONIZED, STACK_GUARD_YELLOW_RESERVED_DISABLED, THREAD_ACTIVE_HANDLES_OFFSET,
    THREAD_DO_NOT_UNLOCK_IF_SYNCHRONIZED_OFFSET, THREAD_JNI_ENVIRONMENT_OFFSET, THREAD_PENDING_EXCEPTION_OFFSET, THREAD_STACK_GUARD_STATE_OFFSET, THREAD_STATE_OFFSET,
    THREAD_SUSPEND_FLAGS_OFFSET,
};
use interpreter_common::{LOG_STACK_ELEMENT_SIZE, STACK_ALIGNMENT_IN_BYTES};

use crate::generator::TemplateInterpreterGenerator;
use crate::interp_masm::{frame_slot, method_monitor, thread_field, InterpreterFrameAccess};

impl TemplateInterpreterGenerator<'_> {
    /// Converts the raw native result in rax/xmm0 into its interpreter form. Called with the
    /// native frame still in place.
    pub(super) fn generate_result_handler_for(&mut self, type_: BasicType) -> CodeAddress {
        let masm = &mut self.masm;
        let entry = masm.pc();
        match type_ {
            BasicType::Boolean => {
                let done = masm.new_label();
                masm.andl(RAX, 0xff);
                masm.testl_jcc(RAX, RAX, Condition::Equal, done);
                masm.mov_imm(RAX, 1);
                masm.bind(done);
            }
            BasicType::Char => masm.extend(RAX, RAX, Size::X86Word, Size::X86QWord, Extension::Zero),
            BasicType::Byte => masm.extend(RAX, RAX, Size::Byte, Size::X86QWord, Extension::Sign),
            BasicType::Short => masm.extend(RAX, RAX, Size::X86Word, Size::X86QWord, Extension::Sign),
            BasicType::Int => masm.extend(RAX, RAX, Size::X86DWord, Size::X86QWord, Extension::Sign),
            BasicType::Object | BasicType::Array => masm.movptr(RAX, frame_slot(INTERPRETER_FRAME_OOP_TEMP_OFFSET)),
            BasicType::Long | BasicType::Float | BasicType::Double | BasicType::Void => {}
        }
        masm.ret();
        entry
    }

    /// Entry of native methods: builds a native frame, marshals the arguments through the
    /// method's signature handler, calls the native function with the thread state moved to
    /// native and back through native-trans (the one safepoint check), then converts the
    /// result and returns to the caller.
    pub(super) fn generate_native_entry(&mut self, synchronized: bool, object_result_handler: CodeAddress) {
        let inc_counter = self.flags.use_compiler;
        let unsatisfied_link_error_entry = self.masm.external().native_method_throw_unsatisfied_link_error_entry;
        let safepoint_state = self.masm.external().safepoint_state;
        // scratch across the whole entry; signature handlers clobber it too
        let t = RSCRATCH1;

        let masm = &mut self.masm;
        masm.movptr(RCX, Address::new(METHOD, METHOD_CONST_OFFSET));
        masm.load_unsigned_short(RCX, Address::new(RCX, CONST_METHOD_SIZE_OF_PARAMETERS_OFFSET));
        // no stack check: the parameters are already on the stack and the frame is small
        masm.pop(RAX);
        self.compute_locals();
        let masm = &mut self.masm;
        // result handler, then oop temp
        masm.push_imm(0);
        masm.push_imm(0);

        self.generate_fixed_frame(true);

        self.masm.movb_imm(thread_field(THREAD_DO_NOT_UNLOCK_IF_SYNCHRONIZED_OFFSET), 1);
        let invocation_counter_overflow = self.masm.new_label();
        if inc_counter {
            self.generate_counter_incr(invocation_counter_overflow, None);
        }
        let continue_after_compile = self.masm.new_label();
        self.masm.bind(continue_after_compile);

        self.bang_stack_shadow_pages(true);
        self.masm.movb_imm(thread_field(THREAD_DO_NOT_UNLOCK_IF_SYNCHRONIZED_OFFSET), 0);

        if synchronized {
            self.lock_method();
        }

        let masm = &mut self.masm;

        // outgoing argument area
        masm.get_method(METHOD);
        masm.movptr(t, Address::new(METHOD, METHOD_CONST_OFFSET));
        masm.load_unsigned_short(t, Address::new(t, CONST_METHOD_SIZE_OF_PARAMETERS_OFFSET));
        masm.shlptr(t, LOG_STACK_ELEMENT_SIZE as i32);
        masm.subptr(RSP, t);
        masm.andptr(RSP, -STACK_ALIGNMENT_IN_BYTES);

        {
            let has_handler = masm.new_label();
            masm.movptr(t, Address::new(METHOD, METHOD_SIGNATURE_HANDLER_OFFSET));
            masm.testptr_jcc(t, t, Condition::NotEqual, has_handler);
            masm.call_vm(None, RuntimeEntry::PrepareNativeCall, &[METHOD]);
            masm.get_method(METHOD);
            masm.movptr(t, Address::new(METHOD, METHOD_SIGNATURE_HANDLER_OFFSET));
            masm.bind(has_handler);
        }
        masm.call_reg(t);
        // the slow handler can reach a safepoint
        masm.get_method(METHOD);
        masm.movptr_store(frame_slot(INTERPRETER_FRAME_RESULT_HANDLER_OFFSET), RAX);

        {
            let not_static = masm.new_label();
            masm.movl(t, Address::new(METHOD, METHOD_ACCESS_FLAGS_OFFSET));
            masm.testl_jcc(t, ACC_STATIC as i32, Condition::Equal, not_static);
            masm.load_mirror(t, METHOD);
            masm.movptr_store(frame_slot(INTERPRETER_FRAME_OOP_TEMP_OFFSET), t);
            masm.lea(C_RARG1, frame_slot(INTERPRETER_FRAME_OOP_TEMP_OFFSET));
            masm.bind(not_static);
        }

        {
            let linked = masm.new_label();
            masm.movptr(RAX, Address::new(METHOD, METHOD_NATIVE_FUNCTION_OFFSET));
            masm.mov_imm(t, unsatisfied_link_error_entry);
            masm.cmpptr_jcc(RAX, t, Condition::NotEqual, linked);
            masm.call_vm(None, RuntimeEntry::PrepareNativeCall, &[METHOD]);
            masm.get_method(METHOD);
            masm.movptr(RAX, Address::new(METHOD, METHOD_NATIVE_FUNCTION_OFFSET));
            masm.bind(linked);
        }

        masm.lea(C_RARG0, thread_field(THREAD_JNI_ENVIRONMENT_OFFSET));
        let pc = masm.pc();
        masm.set_last_java_frame(Some(RSP), Some(RBP), Some(pc));
        masm.movl_imm(thread_field(THREAD_STATE_OFFSET), ThreadState::InNative as i32);
        masm.call_reg(RAX);

        masm.push_tos(TosState::Dtos);
        masm.push_tos(TosState::Ltos);
        masm.movl_imm(thread_field(THREAD_STATE_OFFSET), ThreadState::InNativeTrans as i32);

        {
            let continue_ = masm.new_label();
            let slow_path = masm.new_label();
            masm.mov_imm(t, safepoint_state);
            masm.cmpl_jcc(Address::new(t, 0), SAFEPOINT_NOT_SYNCHRONIZED as i32, Condition::NotEqual, slow_path);
            masm.cmpl_jcc(thread_field(THREAD_SUSPEND_FLAGS_OFFSET), 0, Condition::Equal, continue_);
            masm.bind(slow_path);
            // by hand: a pending exception must not be forwarded before the frame is cleaned up
            masm.call_vm_leaf(RuntimeEntry::CheckSpecialConditionForNativeTrans, &[THREAD]);
            masm.bind(continue_);
        }

        masm.movl_imm(thread_field(THREAD_STATE_OFFSET), ThreadState::InJava as i32);
        masm.reset_last_java_frame(true);

        masm.movptr(t, thread_field(THREAD_ACTIVE_HANDLES_OFFSET));
        masm.movl_imm(Address::new(t, JNI_HANDLE_BLOCK_TOP_OFFSET), 0);

        {
            // an oop result is a handle; resolve it into the oop temp where the gc sees it
            let no_oop = masm.new_label();
            let store_result = masm.new_label();
            masm.mov_code(t, object_result_handler);
            masm.cmpptr_jcc(frame_slot(INTERPRETER_FRAME_RESULT_HANDLER_OFFSET), t, Condition::NotEqual, no_oop);
            masm.pop_tos(TosState::Ltos);
            masm.testptr_jcc(RAX, RAX, Condition::Equal, store_result);
            masm.movptr(RAX, Address::new(RAX, 0));
            masm.bind(store_result);
            masm.movptr_store(frame_slot(INTERPRETER_FRAME_OOP_TEMP_OFFSET), RAX);
            masm.push_tos(TosState::Ltos);
            masm.bind(no_oop);
        }

        {
            let no_reguard = masm.new_label();
            masm.cmpl_jcc(thread_field(THREAD_STACK_GUARD_STATE_OFFSET), STACK_GUARD_YELLOW_RESERVED_DISABLED as i32, Condition::NotEqual, no_reguard);
            masm.pusha();
            masm.call_vm_leaf(RuntimeEntry::ReguardYellowPages, &[]);
            masm.popa();
            masm.bind(no_reguard);
        }

        // a legal interpreter frame again: bci 0
        masm.get_method(METHOD);
        masm.movptr(BCP, Address::new(METHOD, METHOD_CONST_OFFSET));
        masm.lea(BCP, Address::new(BCP, CONST_METHOD_CODES_OFFSET));

        {
            let no_exception = masm.new_label();
            masm.cmpptr_jcc(thread_field(THREAD_PENDING_EXCEPTION_OFFSET), 0, Condition::Equal, no_exception);
            masm.super_call_vm(None, RuntimeEntry::ThrowPendingException, &[]);
            masm.stop("native method returned into a pending exception");
            masm.bind(no_exception);
        }

        {
            let not_synchronized = masm.new_label();
            let unlock = masm.new_label();
            masm.movl(t, Address::new(METHOD, METHOD_ACCESS_FLAGS_OFFSET));
            masm.testl_jcc(t, ACC_SYNCHRONIZED as i32, Condition::Equal, not_synchronized);
            masm.lea(C_RARG1, method_monitor());
            masm.movptr(t, Address::new(C_RARG1, BASIC_OBJECT_LOCK_OBJ_OFFSET));
            masm.testptr_jcc(t, t, Condition::NotEqual, unlock);
            // released by an explicit monitorexit
            masm.super_call_vm(None, RuntimeEntry::ThrowIllegalMonitorStateException, &[]);
            masm.stop("unbalanced monitor in native method");
            masm.bind(unlock);
            masm.unlock_object(C_RARG1);
            masm.bind(not_synchronized);
        }

        masm.pop_tos(TosState::Ltos);
        masm.pop_tos(TosState::Dtos);
        masm.movptr(t, frame_slot(INTERPRETER_FRAME_RESULT_HANDLER_OFFSET));
        masm.call_reg(t);

        masm.movptr(t, frame_slot(INTERPRETER_FRAME_SENDER_SP_OFFSET));
        masm.leave();
        masm.pop(RDI);
        masm.mov(RSP, t);
        masm.jmp_reg(RDI);

        if inc_counter {
            self.masm.bind(invocation_counter_overflow);
            self.generate_counter_overflow(continue_after_compile);
        }
    }
}
