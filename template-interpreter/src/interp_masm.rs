use std::ops::{Deref, DerefMut};

use entry_asm::code_space::CodeBlob;
use entry_asm::error::GenerationError;
use entry_asm::instr::{Address, Condition, Extension, Scale, Size};
use entry_asm::masm::{CallVmHooks, MacroAssembler};
use entry_asm::registers::{Register, BCP, C_RARG0, C_RARG1, LOCALS, RAX, RBX, RBP, RSCRATCH1, RSP, THREAD, XMM0};
use entry_asm::runtime_entry::RuntimeEntry;
use entry_asm::{CodeAddress, LabelName};
use interpreter_common::basic_type::{TosState, NUMBER_OF_STATES};
use interpreter_common::frame_layout::{
    slot_byte_offset, BASIC_OBJECT_LOCK_OBJ_OFFSET, INTERPRETER_FRAME_BCP_OFFSET, INTERPRETER_FRAME_CACHE_OFFSET, INTERPRETER_FRAME_INITIAL_SP_OFFSET, INTERPRETER_FRAME_LAST_SP_OFFSET,
    INTERPRETER_FRAME_LOCALS_OFFSET, INTERPRETER_FRAME_MDP_OFFSET, INTERPRETER_FRAME_METHOD_OFFSET, INTERPRETER_FRAME_MONITOR_BLOCK_BOTTOM_OFFSET, INTERPRETER_FRAME_MONITOR_BLOCK_TOP_OFFSET,
    INTERPRETER_FRAME_MONITOR_SIZE, INTERPRETER_FRAME_SENDER_SP_OFFSET,
};
use interpreter_common::vm_layout::{
    ACC_SYNCHRONIZED, CONSTANT_POOL_POOL_HOLDER_OFFSET, CONST_METHOD_CONSTANTS_OFFSET, EARLYRET_INACTIVE, EARLYRET_PENDING, ILLEGAL_TOS, JVMTI_EARLYRET_OOP_OFFSET,
    JVMTI_EARLYRET_STATE_OFFSET, JVMTI_EARLYRET_TOS_OFFSET, JVMTI_EARLYRET_VALUE_OFFSET, KLASS_JAVA_MIRROR_OFFSET, METHOD_ACCESS_FLAGS_OFFSET, METHOD_CONST_OFFSET, METHOD_DATA_DATA_OFFSET,
    METHOD_METHOD_COUNTERS_OFFSET, METHOD_METHOD_DATA_OFFSET, POPFRAME_PENDING_BIT, POPFRAME_PROCESSING_BIT, THREAD_DO_NOT_UNLOCK_IF_SYNCHRONIZED_OFFSET, THREAD_JVMTI_THREAD_STATE_OFFSET,
    THREAD_POPFRAME_CONDITION_OFFSET,
};
use interpreter_common::WORD_SIZE;
use strum::IntoEnumIterator;

/// Slot of the current interpreter frame, `offset` words away from rbp.
pub fn frame_slot(offset: i32) -> Address {
    Address::new(RBP, slot_byte_offset(offset))
}

/// The monitor a synchronized method locks on entry. It is always the one next to the fixed frame.
pub fn method_monitor() -> Address {
    frame_slot(INTERPRETER_FRAME_INITIAL_SP_OFFSET - INTERPRETER_FRAME_MONITOR_SIZE)
}

pub fn thread_field(offset: i32) -> Address {
    Address::new(THREAD, offset)
}

/// Frame accessors shared by the interpreter assembler and the hooks it runs around VM calls,
/// which only see the plain assembler.
pub trait InterpreterFrameAccess {
    fn save_bcp(&mut self);
    fn restore_bcp(&mut self);
    fn restore_locals(&mut self);
    fn get_method(&mut self, to: Register);
    fn get_constant_pool_cache(&mut self, to: Register);
    /// Drops the expression stack down to the monitor block and forgets the last sp.
    fn empty_expression_stack(&mut self);
}

impl InterpreterFrameAccess for MacroAssembler {
    fn save_bcp(&mut self) {
        self.movptr_store(frame_slot(INTERPRETER_FRAME_BCP_OFFSET), BCP);
    }

    fn restore_bcp(&mut self) {
        self.movptr(BCP, frame_slot(INTERPRETER_FRAME_BCP_OFFSET));
    }

    fn restore_locals(&mut self) {
        self.movptr(LOCALS, frame_slot(INTERPRETER_FRAME_LOCALS_OFFSET));
    }

    fn get_method(&mut self, to: Register) {
        self.movptr(to, frame_slot(INTERPRETER_FRAME_METHOD_OFFSET));
    }

    fn get_constant_pool_cache(&mut self, to: Register) {
        self.movptr(to, frame_slot(INTERPRETER_FRAME_CACHE_OFFSET));
    }

    fn empty_expression_stack(&mut self) {
        self.movptr(RSP, frame_slot(INTERPRETER_FRAME_MONITOR_BLOCK_TOP_OFFSET));
        self.movptr_imm(frame_slot(INTERPRETER_FRAME_LAST_SP_OFFSET), 0);
    }
}

/// What every interpreter VM call does around the call itself: publish the bcp before, reload
/// bcp and locals after, then divert into a requested PopFrame or ForceEarlyReturn.
#[derive(Debug, Clone, Copy)]
pub struct InterpreterHooks {
    pub remove_activation_preserving_args: LabelName,
    pub earlyret: [LabelName; NUMBER_OF_STATES],
}

impl InterpreterHooks {
    pub fn check_and_handle_popframe(&self, masm: &mut MacroAssembler) {
        let done = masm.new_label();
        masm.movl(C_RARG0, thread_field(THREAD_POPFRAME_CONDITION_OFFSET));
        masm.testl_jcc(C_RARG0, POPFRAME_PENDING_BIT as i32, Condition::Equal, done);
        // already popping, don't reenter
        masm.testl_jcc(C_RARG0, POPFRAME_PROCESSING_BIT as i32, Condition::NotEqual, done);
        masm.jmp(self.remove_activation_preserving_args);
        masm.bind(done);
    }

    pub fn check_and_handle_earlyret(&self, masm: &mut MacroAssembler) {
        let done = masm.new_label();
        masm.movptr(C_RARG0, thread_field(THREAD_JVMTI_THREAD_STATE_OFFSET));
        masm.testptr_jcc(C_RARG0, C_RARG0, Condition::Equal, done);
        masm.cmpl_jcc(Address::new(C_RARG0, JVMTI_EARLYRET_STATE_OFFSET), EARLYRET_PENDING as i32, Condition::NotEqual, done);
        masm.movl(C_RARG0, Address::new(C_RARG0, JVMTI_EARLYRET_TOS_OFFSET));
        for state in TosState::iter() {
            masm.cmpl_jcc(C_RARG0, state.index() as i32, Condition::Equal, self.earlyret[state.index()]);
        }
        masm.stop("early return requested with an illegal tos state");
        masm.bind(done);
    }
}

impl CallVmHooks for InterpreterHooks {
    fn before_call(&self, masm: &mut MacroAssembler) {
        masm.save_bcp();
    }

    fn after_call(&self, masm: &mut MacroAssembler) {
        masm.restore_bcp();
        masm.restore_locals();
        self.check_and_handle_popframe(masm);
        self.check_and_handle_earlyret(masm);
    }
}

/// Assembler for code running inside interpreter frames: rbp is an interpreter frame, r13 holds
/// the bcp and r14 the locals.
pub struct InterpreterMacroAssembler {
    masm: MacroAssembler,
    hooks: InterpreterHooks,
}

impl Deref for InterpreterMacroAssembler {
    type Target = MacroAssembler;

    fn deref(&self) -> &Self::Target {
        &self.masm
    }
}

impl DerefMut for InterpreterMacroAssembler {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.masm
    }
}

impl InterpreterMacroAssembler {
    pub fn new(mut masm: MacroAssembler, forward_exception: CodeAddress) -> Self {
        masm.set_method_reload(Some(frame_slot(INTERPRETER_FRAME_METHOD_OFFSET)));
        masm.set_forward_exception_entry(forward_exception);
        let remove_activation_preserving_args = masm.new_label();
        let earlyret = [(); NUMBER_OF_STATES].map(|_| masm.new_label());
        Self { masm, hooks: InterpreterHooks { remove_activation_preserving_args, earlyret } }
    }

    pub fn hooks(&self) -> InterpreterHooks {
        self.hooks
    }

    pub fn finish(self) -> Result<CodeBlob, GenerationError> {
        self.masm.finish()
    }

    /// VM call that keeps the interpreter state consistent and honors PopFrame/ForceEarlyReturn
    /// requests raised while in the VM.
    pub fn call_vm(&mut self, oop_result: Option<Register>, entry: RuntimeEntry, args: &[Register]) {
        let hooks = self.hooks;
        self.masm.call_vm_base(oop_result, entry, args, true, &hooks);
    }

    /// Plain VM call, without any of the interpreter bookkeeping.
    pub fn super_call_vm(&mut self, oop_result: Option<Register>, entry: RuntimeEntry, args: &[Register]) {
        self.masm.call_vm(oop_result, entry, args);
    }

    // dispatch

    /// Advances the bcp by `step` and jumps through `state`'s dispatch table.
    pub fn dispatch_next(&mut self, state: TosState, step: i32) {
        self.load_unsigned_byte(RBX, Address::new(BCP, step));
        if step != 0 {
            self.addptr(BCP, step);
        }
        let table = self.external().dispatch_table(state.index());
        self.mov_imm(RSCRATCH1, table);
        self.jmp_mem(Address::indexed(RSCRATCH1, RBX, Scale::Times8, 0));
    }

    // expression stack

    pub fn push_tos(&mut self, state: TosState) {
        match state {
            TosState::Atos | TosState::Btos | TosState::Ztos | TosState::Ctos | TosState::Stos | TosState::Itos => self.push(RAX),
            TosState::Ltos => {
                self.subptr(RSP, 2 * WORD_SIZE);
                self.movptr_store(Address::new(RSP, 0), RAX);
            }
            TosState::Ftos => {
                self.subptr(RSP, WORD_SIZE);
                self.movflt_store(Address::new(RSP, 0), XMM0);
            }
            TosState::Dtos => {
                self.subptr(RSP, 2 * WORD_SIZE);
                self.movdbl_store(Address::new(RSP, 0), XMM0);
            }
            TosState::Vtos => {}
        }
    }

    pub fn pop_tos(&mut self, state: TosState) {
        match state {
            TosState::Atos | TosState::Btos | TosState::Ztos | TosState::Ctos | TosState::Stos | TosState::Itos => self.pop(RAX),
            TosState::Ltos => {
                self.movptr(RAX, Address::new(RSP, 0));
                self.addptr(RSP, 2 * WORD_SIZE);
            }
            TosState::Ftos => {
                self.movflt(XMM0, Address::new(RSP, 0));
                self.addptr(RSP, WORD_SIZE);
            }
            TosState::Dtos => {
                self.movdbl(XMM0, Address::new(RSP, 0));
                self.addptr(RSP, 2 * WORD_SIZE);
            }
            TosState::Vtos => {}
        }
    }

    // constant pool cache

    /// Loads the cp cache and the scaled cache index of the instruction at bcp. A u4 index is an
    /// invokedynamic index stored inverted.
    pub fn get_cache_and_index_at_bcp(&mut self, cache: Register, index: Register, bcp_offset: i32, index_size: usize) {
        self.get_constant_pool_cache(cache);
        if index_size == 4 {
            self.movl(index, Address::new(BCP, bcp_offset));
            self.xorl(index, -1);
        } else {
            self.load_unsigned_short(index, Address::new(BCP, bcp_offset));
        }
        // cache entries are four words
        self.shlptr(index, 2);
    }

    pub fn load_mirror(&mut self, to: Register, method: Register) {
        self.movptr(to, Address::new(method, METHOD_CONST_OFFSET));
        self.movptr(to, Address::new(to, CONST_METHOD_CONSTANTS_OFFSET));
        self.movptr(to, Address::new(to, CONSTANT_POOL_POOL_HOLDER_OFFSET));
        self.movptr(to, Address::new(to, KLASS_JAVA_MIRROR_OFFSET));
    }

    // jvmti early return

    pub fn load_earlyret_value(&mut self, state: TosState) {
        self.movptr(RSCRATCH1, thread_field(THREAD_JVMTI_THREAD_STATE_OFFSET));
        let oop = Address::new(RSCRATCH1, JVMTI_EARLYRET_OOP_OFFSET);
        let value = Address::new(RSCRATCH1, JVMTI_EARLYRET_VALUE_OFFSET);
        match state {
            TosState::Atos => {
                self.movptr(RAX, oop);
                self.movptr_imm(oop, 0);
            }
            TosState::Ltos => self.movptr(RAX, value),
            TosState::Btos | TosState::Ztos | TosState::Ctos | TosState::Stos | TosState::Itos => self.movl(RAX, value),
            TosState::Ftos => self.movflt(XMM0, value),
            TosState::Dtos => self.movdbl(XMM0, value),
            TosState::Vtos => {}
        }
        self.movl_imm(Address::new(RSCRATCH1, JVMTI_EARLYRET_TOS_OFFSET), ILLEGAL_TOS as i32);
        self.movptr_imm(value, 0);
    }

    pub fn clear_earlyret_state(&mut self) {
        self.movptr(RSCRATCH1, thread_field(THREAD_JVMTI_THREAD_STATE_OFFSET));
        self.movl_imm(Address::new(RSCRATCH1, JVMTI_EARLYRET_STATE_OFFSET), EARLYRET_INACTIVE as i32);
    }

    // locking

    /// `lock_reg` points at a monitor whose object field is filled in.
    pub fn lock_object(&mut self, lock_reg: Register) {
        self.call_vm(None, RuntimeEntry::Monitorenter, &[lock_reg]);
    }

    pub fn unlock_object(&mut self, lock_reg: Register) {
        self.call_vm(None, RuntimeEntry::Monitorexit, &[lock_reg]);
    }

    /// Removes the current activation, leaving the return address in `ret_addr` and rsp at the
    /// sender sp. The tos value of `state` is preserved.
    ///
    /// A synchronized method's monitor is released unless the method never got far enough to take
    /// it. Any other monitor still held is released too; with `install_monitor_exception` an
    /// IllegalMonitorStateException replaces the exception in flight whenever the monitors did
    /// not balance.
    pub fn remove_activation(&mut self, state: TosState, ret_addr: Register, install_monitor_exception: bool) {
        let unlocked = self.new_label();
        let unlock = self.new_label();
        let no_unlock = self.new_label();

        self.load(RBX, thread_field(THREAD_DO_NOT_UNLOCK_IF_SYNCHRONIZED_OFFSET), Size::Byte, Extension::Zero);
        self.movb_imm(thread_field(THREAD_DO_NOT_UNLOCK_IF_SYNCHRONIZED_OFFSET), 0);

        self.get_method(RSCRATCH1);
        self.movl(RSCRATCH1, Address::new(RSCRATCH1, METHOD_ACCESS_FLAGS_OFFSET));
        self.testl_jcc(RSCRATCH1, ACC_SYNCHRONIZED as i32, Condition::Equal, unlocked);
        self.testl_jcc(RBX, RBX, Condition::NotEqual, no_unlock);

        self.push_tos(state);
        self.lea(C_RARG1, method_monitor());
        self.movptr(RAX, Address::new(C_RARG1, BASIC_OBJECT_LOCK_OBJ_OFFSET));
        self.testptr_jcc(RAX, RAX, Condition::NotEqual, unlock);
        self.pop_tos(state);
        // released early by an explicit monitorexit
        if install_monitor_exception {
            self.call_vm(None, RuntimeEntry::NewIllegalMonitorStateException, &[]);
        }
        self.jmp(unlocked);

        self.bind(unlock);
        self.unlock_object(C_RARG1);
        self.pop_tos(state);

        self.bind(unlocked);
        {
            let restart = self.new_label();
            let loop_ = self.new_label();
            let entry = self.new_label();
            let held = self.new_label();
            self.bind(restart);
            self.movptr(C_RARG1, frame_slot(INTERPRETER_FRAME_MONITOR_BLOCK_TOP_OFFSET));
            self.lea(RBX, frame_slot(INTERPRETER_FRAME_MONITOR_BLOCK_BOTTOM_OFFSET));
            self.jmp(entry);

            self.bind(held);
            self.push_tos(state);
            self.unlock_object(C_RARG1);
            self.pop_tos(state);
            if install_monitor_exception {
                self.call_vm(None, RuntimeEntry::NewIllegalMonitorStateException, &[]);
            }
            self.jmp(restart);

            self.bind(loop_);
            self.cmpptr_jcc(Address::new(C_RARG1, BASIC_OBJECT_LOCK_OBJ_OFFSET), 0, Condition::NotEqual, held);
            self.addptr(C_RARG1, INTERPRETER_FRAME_MONITOR_SIZE * WORD_SIZE);
            self.bind(entry);
            self.cmpptr_jcc(C_RARG1, RBX, Condition::NotEqual, loop_);
        }

        self.bind(no_unlock);
        self.movptr(RBX, frame_slot(INTERPRETER_FRAME_SENDER_SP_OFFSET));
        self.leave();
        self.pop(ret_addr);
        self.mov(RSP, RBX);
    }

    // profiling and counters

    /// Increments the 32 bit counter at `counter` unless that would wrap, then jumps to `overflow`
    /// when the count masked with `mask` is zero. A saturated counter always overflows.
    pub fn increment_mask_and_jump(&mut self, counter: Address, increment: i32, mask: Address, scratch: Register, overflow: LabelName) {
        self.movl(scratch, counter);
        self.cmpl_jcc(scratch, -increment, Condition::AboveEqual, overflow);
        self.addl(scratch, increment);
        self.movl_store(counter, scratch);
        self.andl(scratch, mask);
        self.testl_jcc(scratch, scratch, Condition::Equal, overflow);
    }

    /// Adds `increment` to the counter at `counter` unless that would wrap.
    pub fn increment_saturating(&mut self, counter: Address, increment: i32, scratch: Register) {
        let saturated = self.new_label();
        self.movl(scratch, counter);
        self.cmpl_jcc(scratch, -increment, Condition::AboveEqual, saturated);
        self.addl(scratch, increment);
        self.movl_store(counter, scratch);
        self.bind(saturated);
    }

    /// Loads the method counters into `mcs`, allocating them on first use. Jumps to `skip` when
    /// they could not be allocated.
    pub fn get_method_counters(&mut self, method: Register, mcs: Register, skip: LabelName) {
        let has_counters = self.new_label();
        self.movptr(mcs, Address::new(method, METHOD_METHOD_COUNTERS_OFFSET));
        self.testptr_jcc(mcs, mcs, Condition::NotEqual, has_counters);
        self.call_vm(None, RuntimeEntry::BuildMethodCounters, &[method]);
        self.movptr(mcs, Address::new(method, METHOD_METHOD_COUNTERS_OFFSET));
        self.testptr_jcc(mcs, mcs, Condition::Equal, skip);
        self.bind(has_counters);
    }

    pub fn test_method_data_pointer(&mut self, mdp: Register, zero: LabelName) {
        self.movptr(mdp, frame_slot(INTERPRETER_FRAME_MDP_OFFSET));
        self.testptr_jcc(mdp, mdp, Condition::Equal, zero);
    }

    /// Points the frame's mdp at the profile cell of the current bcp.
    pub fn set_method_data_pointer_for_bcp(&mut self) {
        let set_mdp = self.new_label();
        self.push(RAX);
        self.push(RBX);
        self.get_method(RBX);
        self.movptr(RAX, Address::new(RBX, METHOD_METHOD_DATA_OFFSET));
        self.testptr_jcc(RAX, RAX, Condition::Equal, set_mdp);
        self.call_vm_leaf(RuntimeEntry::BcpToDi, &[RBX, BCP]);
        self.movptr(RBX, Address::new(RBX, METHOD_METHOD_DATA_OFFSET));
        self.addptr(RBX, METHOD_DATA_DATA_OFFSET);
        self.addptr(RAX, RBX);
        self.bind(set_mdp);
        self.movptr_store(frame_slot(INTERPRETER_FRAME_MDP_OFFSET), RAX);
        self.pop(RBX);
        self.pop(RAX);
    }
}
