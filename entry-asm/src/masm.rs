use std::collections::{HashMap, HashSet};

use interpreter_common::flags::ExternalAddresses;
use interpreter_common::vm_layout::{THREAD_LAST_JAVA_FP_OFFSET, THREAD_LAST_JAVA_PC_OFFSET, THREAD_LAST_JAVA_SP_OFFSET, THREAD_PENDING_EXCEPTION_OFFSET, THREAD_VM_RESULT_OFFSET};

use crate::code_space::{CodeBlob, Codelet};
use crate::error::GenerationError;
use crate::instr::{Address, AluOp, Condition, Extension, FloatPrecision, FloatUnaryOp, Immediate, Instr, Operand, Size, Target};
use crate::registers::{FloatRegister, Register, C_INT_ARGUMENT_REGISTERS, C_RARG0, HEAP_BASE, METHOD, R10, R11, R12, R13, R14, R15, R8, R9, RAX, RBP, RBX, RCX, RDI, RDX, RSI, RSP, THREAD};
use crate::runtime_entry::{InvalidatedRegister, RuntimeEntry};
use crate::{CodeAddress, LabelName};

/// Work wrapped around a VM call by frames that keep state in callee saved registers.
pub trait CallVmHooks {
    fn before_call(&self, masm: &mut MacroAssembler);
    fn after_call(&self, masm: &mut MacroAssembler);
}

pub struct NoHooks;

impl CallVmHooks for NoHooks {
    fn before_call(&self, _masm: &mut MacroAssembler) {}

    fn after_call(&self, _masm: &mut MacroAssembler) {}
}

/// Registers saved by `pusha`, in push order. rsp is skipped and replaced by a pad word.
const PUSHA_ORDER: [Register; 15] = [RAX, RCX, RDX, RBX, RBP, RSI, RDI, R8, R9, R10, R11, R12, R13, R14, R15];

/// Label-based assembler emitting into one fixed-capacity code buffer.
pub struct MacroAssembler {
    name: String,
    base: CodeAddress,
    capacity: usize,
    instructions: Vec<Instr>,
    labels: HashMap<LabelName, usize>,
    referenced_labels: HashSet<LabelName>,
    next_label: u32,
    codelets: Vec<Codelet>,
    open_codelet: Option<(String, usize)>,
    errors: Vec<GenerationError>,
    external: ExternalAddresses,
    method_reload: Option<Address>,
    forward_exception_entry: Option<CodeAddress>,
}

impl MacroAssembler {
    pub fn new(name: impl Into<String>, base: CodeAddress, capacity: usize, external: ExternalAddresses) -> Self {
        Self {
            name: name.into(),
            base,
            capacity,
            instructions: vec![],
            labels: HashMap::new(),
            referenced_labels: HashSet::new(),
            next_label: 0,
            codelets: vec![],
            open_codelet: None,
            errors: vec![],
            external,
            method_reload: None,
            forward_exception_entry: None,
        }
    }

    pub fn external(&self) -> &ExternalAddresses {
        &self.external
    }

    /// After calls that invalidate the method register, reload it from `slot`.
    pub fn set_method_reload(&mut self, slot: Option<Address>) {
        self.method_reload = slot;
    }

    pub fn set_forward_exception_entry(&mut self, entry: CodeAddress) {
        self.forward_exception_entry = Some(entry);
    }

    pub fn pc(&self) -> CodeAddress {
        self.base.offset(self.instructions.len())
    }

    pub fn instructions_emitted(&self) -> usize {
        self.instructions.len()
    }

    pub fn emit(&mut self, instr: Instr) {
        if self.instructions.len() >= self.capacity {
            if !self.errors.iter().any(|err| matches!(err, GenerationError::CodeBufferFull { .. })) {
                self.errors.push(GenerationError::CodeBufferFull { name: self.name.clone(), capacity: self.capacity });
            }
            return;
        }
        if let Some(Target::Label(label)) = instr.targets() {
            self.referenced_labels.insert(label);
        }
        self.instructions.push(instr);
    }

    pub fn record_error(&mut self, error: GenerationError) {
        self.errors.push(error);
    }

    pub fn new_label(&mut self) -> LabelName {
        let label = LabelName(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn bind(&mut self, label: LabelName) {
        if self.labels.contains_key(&label) {
            self.errors.push(GenerationError::LabelBoundTwice(label));
            return;
        }
        self.labels.insert(label, self.instructions.len());
        self.emit(Instr::Label { name: label });
    }

    pub fn begin_codelet(&mut self, name: impl Into<String>) -> CodeAddress {
        if let Some((open, _)) = self.open_codelet.take() {
            self.errors.push(GenerationError::OpenCodelet(open));
        }
        self.open_codelet = Some((name.into(), self.instructions.len()));
        self.pc()
    }

    pub fn end_codelet(&mut self) {
        if let Some((name, start)) = self.open_codelet.take() {
            if start == self.instructions.len() {
                return;
            }
            let codelet = Codelet { name, start: self.base.offset(start), end: self.pc() };
            tracing::debug!(codelet = codelet.name.as_str(), start = %codelet.start, end = %codelet.end, "generated codelet");
            self.codelets.push(codelet);
        }
    }

    pub fn finish(mut self) -> Result<CodeBlob, GenerationError> {
        if let Some((open, _)) = self.open_codelet.take() {
            self.errors.push(GenerationError::OpenCodelet(open));
        }
        let mut unbound = self.referenced_labels.iter().filter(|label| !self.labels.contains_key(label)).copied().collect::<Vec<_>>();
        unbound.sort();
        if let Some(label) = unbound.first() {
            self.errors.push(GenerationError::UnboundLabel(*label));
        }
        if !self.errors.is_empty() {
            return Err(self.errors.remove(0));
        }
        Ok(CodeBlob { name: self.name, base: self.base, instructions: self.instructions, labels: self.labels, codelets: self.codelets })
    }

    // moves

    pub fn mov(&mut self, to: Register, from: Register) {
        if to != from {
            self.emit(Instr::Mov { to, from });
        }
    }

    pub fn mov_imm(&mut self, to: Register, value: u64) {
        self.emit(Instr::MovImm { to, value: Immediate::Value(value) });
    }

    pub fn mov_code(&mut self, to: Register, address: CodeAddress) {
        self.emit(Instr::MovImm { to, value: Immediate::Code(address) });
    }

    pub fn load(&mut self, to: Register, from: Address, size: Size, extension: Extension) {
        self.emit(Instr::Load { to, from, size, extension });
    }

    pub fn store(&mut self, to: Address, from: Register, size: Size) {
        self.emit(Instr::Store { to, from, size });
    }

    pub fn store_imm(&mut self, to: Address, value: i32, size: Size) {
        self.emit(Instr::StoreImm { to, value, size });
    }

    pub fn movptr(&mut self, to: Register, from: Address) {
        self.load(to, from, Size::X86QWord, Extension::Zero);
    }

    pub fn movptr_store(&mut self, to: Address, from: Register) {
        self.store(to, from, Size::X86QWord);
    }

    pub fn movptr_imm(&mut self, to: Address, value: i32) {
        self.store_imm(to, value, Size::X86QWord);
    }

    pub fn movl(&mut self, to: Register, from: Address) {
        self.load(to, from, Size::X86DWord, Extension::Zero);
    }

    pub fn movl_store(&mut self, to: Address, from: Register) {
        self.store(to, from, Size::X86DWord);
    }

    pub fn movl_imm(&mut self, to: Address, value: i32) {
        self.store_imm(to, value, Size::X86DWord);
    }

    pub fn movb_imm(&mut self, to: Address, value: i32) {
        self.store_imm(to, value, Size::Byte);
    }

    pub fn movslq(&mut self, to: Register, from: Address) {
        self.load(to, from, Size::X86DWord, Extension::Sign);
    }

    pub fn load_unsigned_short(&mut self, to: Register, from: Address) {
        self.load(to, from, Size::X86Word, Extension::Zero);
    }

    pub fn load_unsigned_byte(&mut self, to: Register, from: Address) {
        self.load(to, from, Size::Byte, Extension::Zero);
    }

    pub fn lea(&mut self, to: Register, from: Address) {
        self.emit(Instr::Lea { to, from });
    }

    pub fn extend(&mut self, to: Register, from: Register, from_size: Size, to_size: Size, extension: Extension) {
        self.emit(Instr::Extend { to, from, from_size, to_size, extension });
    }

    pub fn store_code_address(&mut self, to: Address, address: CodeAddress, scratch: Register) {
        self.mov_code(scratch, address);
        self.movptr_store(to, scratch);
    }

    // floats

    pub fn movflt(&mut self, to: FloatRegister, from: Address) {
        self.emit(Instr::LoadFloat { to, from, precision: FloatPrecision::Single });
    }

    pub fn movdbl(&mut self, to: FloatRegister, from: Address) {
        self.emit(Instr::LoadFloat { to, from, precision: FloatPrecision::Double });
    }

    pub fn movflt_store(&mut self, to: Address, from: FloatRegister) {
        self.emit(Instr::StoreFloat { to, from, precision: FloatPrecision::Single });
    }

    pub fn movdbl_store(&mut self, to: Address, from: FloatRegister) {
        self.emit(Instr::StoreFloat { to, from, precision: FloatPrecision::Double });
    }

    pub fn movq_to_xmm(&mut self, to: FloatRegister, from: Register) {
        self.emit(Instr::MovGprToXmm { to, from, size: Size::X86QWord });
    }

    pub fn movd_to_xmm(&mut self, to: FloatRegister, from: Register) {
        self.emit(Instr::MovGprToXmm { to, from, size: Size::X86DWord });
    }

    pub fn movq_from_xmm(&mut self, to: Register, from: FloatRegister) {
        self.emit(Instr::MovXmmToGpr { to, from, size: Size::X86QWord });
    }

    pub fn movd_from_xmm(&mut self, to: Register, from: FloatRegister) {
        self.emit(Instr::MovXmmToGpr { to, from, size: Size::X86DWord });
    }

    pub fn sqrtsd(&mut self, register: FloatRegister) {
        self.emit(Instr::FloatUnary { op: FloatUnaryOp::Sqrt, register });
    }

    /// Clobbers r11.
    pub fn abssd(&mut self, register: FloatRegister) {
        self.emit(Instr::FloatUnary { op: FloatUnaryOp::Abs, register });
    }

    // stack

    pub fn push(&mut self, from: Register) {
        self.emit(Instr::Push { from: Operand::Reg(from) });
    }

    pub fn push_imm(&mut self, value: i32) {
        self.emit(Instr::Push { from: Operand::Imm(value) });
    }

    pub fn push_mem(&mut self, from: Address) {
        self.emit(Instr::Push { from: Operand::Mem(from) });
    }

    pub fn pop(&mut self, to: Register) {
        self.emit(Instr::Pop { to });
    }

    pub fn enter(&mut self) {
        self.push(RBP);
        self.mov(RBP, RSP);
    }

    pub fn leave(&mut self) {
        self.mov(RSP, RBP);
        self.pop(RBP);
    }

    /// Saves every general purpose register, 16 words including a pad for rsp.
    pub fn pusha(&mut self) {
        for register in PUSHA_ORDER {
            self.push(register);
        }
        self.subptr(RSP, 8);
    }

    pub fn popa(&mut self) {
        self.addptr(RSP, 8);
        for register in PUSHA_ORDER.iter().rev() {
            self.pop(*register);
        }
    }

    // arithmetic

    pub fn alu(&mut self, op: AluOp, to: impl Into<Operand>, from: impl Into<Operand>, size: Size) {
        self.emit(Instr::Alu { op, to: to.into(), from: from.into(), size });
    }

    pub fn addptr(&mut self, to: impl Into<Operand>, from: impl Into<Operand>) {
        self.alu(AluOp::Add, to, from, Size::X86QWord);
    }

    pub fn subptr(&mut self, to: impl Into<Operand>, from: impl Into<Operand>) {
        self.alu(AluOp::Sub, to, from, Size::X86QWord);
    }

    pub fn andptr(&mut self, to: impl Into<Operand>, from: impl Into<Operand>) {
        self.alu(AluOp::And, to, from, Size::X86QWord);
    }

    pub fn orptr(&mut self, to: impl Into<Operand>, from: impl Into<Operand>) {
        self.alu(AluOp::Or, to, from, Size::X86QWord);
    }

    pub fn xorptr(&mut self, to: impl Into<Operand>, from: impl Into<Operand>) {
        self.alu(AluOp::Xor, to, from, Size::X86QWord);
    }

    pub fn shlptr(&mut self, to: Register, count: i32) {
        self.alu(AluOp::Shl, to, count, Size::X86QWord);
    }

    pub fn shrptr(&mut self, to: Register, count: i32) {
        self.alu(AluOp::Shr, to, count, Size::X86QWord);
    }

    pub fn addl(&mut self, to: impl Into<Operand>, from: impl Into<Operand>) {
        self.alu(AluOp::Add, to, from, Size::X86DWord);
    }

    pub fn subl(&mut self, to: impl Into<Operand>, from: impl Into<Operand>) {
        self.alu(AluOp::Sub, to, from, Size::X86DWord);
    }

    pub fn andl(&mut self, to: impl Into<Operand>, from: impl Into<Operand>) {
        self.alu(AluOp::And, to, from, Size::X86DWord);
    }

    pub fn orl(&mut self, to: impl Into<Operand>, from: impl Into<Operand>) {
        self.alu(AluOp::Or, to, from, Size::X86DWord);
    }

    pub fn xorl(&mut self, to: impl Into<Operand>, from: impl Into<Operand>) {
        self.alu(AluOp::Xor, to, from, Size::X86DWord);
    }

    pub fn shrl(&mut self, to: Register, count: i32) {
        self.alu(AluOp::Shr, to, count, Size::X86DWord);
    }

    pub fn incrementl(&mut self, to: impl Into<Operand>, value: i32) {
        self.addl(to, value);
    }

    pub fn decrementl(&mut self, to: impl Into<Operand>, value: i32) {
        self.subl(to, value);
    }

    // control flow

    pub fn cmp_jcc(&mut self, size: Size, a: impl Into<Operand>, b: impl Into<Operand>, condition: Condition, target: impl Into<Target>) {
        self.emit(Instr::BranchCmp { a: a.into(), b: b.into(), size, condition, target: target.into() });
    }

    pub fn cmpptr_jcc(&mut self, a: impl Into<Operand>, b: impl Into<Operand>, condition: Condition, target: impl Into<Target>) {
        self.cmp_jcc(Size::X86QWord, a, b, condition, target);
    }

    pub fn cmpl_jcc(&mut self, a: impl Into<Operand>, b: impl Into<Operand>, condition: Condition, target: impl Into<Target>) {
        self.cmp_jcc(Size::X86DWord, a, b, condition, target);
    }

    pub fn test_jcc(&mut self, size: Size, a: impl Into<Operand>, b: impl Into<Operand>, condition: Condition, target: impl Into<Target>) {
        self.emit(Instr::BranchTest { a: a.into(), b: b.into(), size, condition, target: target.into() });
    }

    pub fn testptr_jcc(&mut self, a: impl Into<Operand>, b: impl Into<Operand>, condition: Condition, target: impl Into<Target>) {
        self.test_jcc(Size::X86QWord, a, b, condition, target);
    }

    pub fn testl_jcc(&mut self, a: impl Into<Operand>, b: impl Into<Operand>, condition: Condition, target: impl Into<Target>) {
        self.test_jcc(Size::X86DWord, a, b, condition, target);
    }

    pub fn testb_jcc(&mut self, a: impl Into<Operand>, b: impl Into<Operand>, condition: Condition, target: impl Into<Target>) {
        self.test_jcc(Size::Byte, a, b, condition, target);
    }

    pub fn jmp(&mut self, target: impl Into<Target>) {
        self.emit(Instr::Jump { target: target.into() });
    }

    pub fn jump_external(&mut self, address: u64) {
        self.emit(Instr::Jump { target: Target::External(address) });
    }

    pub fn jmp_reg(&mut self, from: Register) {
        self.emit(Instr::JumpReg { from });
    }

    pub fn jmp_mem(&mut self, from: Address) {
        self.emit(Instr::JumpMem { from });
    }

    pub fn call(&mut self, target: impl Into<Target>) {
        self.emit(Instr::Call { target: target.into() });
    }

    pub fn call_reg(&mut self, from: Register) {
        self.emit(Instr::CallReg { from });
    }

    pub fn ret(&mut self) {
        self.emit(Instr::Ret);
    }

    pub fn stop(&mut self, reason: &'static str) {
        self.emit(Instr::Stop { reason });
    }

    // runtime calls

    /// Moves `args` into the C argument registers starting at `first`. Later arguments are
    /// placed first so earlier sources are not overwritten.
    pub fn pass_args(&mut self, args: &[Register], first: usize) {
        for (i, arg) in args.iter().enumerate().rev() {
            let destination = C_INT_ARGUMENT_REGISTERS[first + i];
            if args[..i].contains(&destination) && *arg != destination {
                self.errors.push(GenerationError::ArgumentShuffle(destination));
            }
            self.mov(destination, *arg);
        }
    }

    pub fn reinit_heapbase(&mut self) {
        self.mov_imm(HEAP_BASE, self.external.narrow_oop_base);
        self.movptr(HEAP_BASE, Address::new(HEAP_BASE, 0));
    }

    fn reload_invalidated(&mut self, entry: RuntimeEntry) {
        for register in entry.invalidates() {
            match register {
                InvalidatedRegister::HeapBase => self.reinit_heapbase(),
                InvalidatedRegister::Method => {
                    if let Some(slot) = self.method_reload {
                        self.movptr(METHOD, slot);
                    }
                }
            }
        }
    }

    /// Calls `entry` with a 16 byte aligned stack and reloads whatever the entry declares stale.
    pub fn call_vm_leaf_base(&mut self, entry: RuntimeEntry) {
        let aligned = self.new_label();
        let done = self.new_label();
        self.testl_jcc(RSP, 15, Condition::Equal, aligned);
        self.subptr(RSP, 8);
        self.emit(Instr::CallRuntime { entry });
        self.addptr(RSP, 8);
        self.jmp(done);
        self.bind(aligned);
        self.emit(Instr::CallRuntime { entry });
        self.bind(done);
        self.reload_invalidated(entry);
    }

    pub fn call_vm_leaf(&mut self, entry: RuntimeEntry, args: &[Register]) {
        self.pass_args(args, 0);
        self.call_vm_leaf_base(entry);
    }

    pub fn set_last_java_frame(&mut self, last_java_sp: Option<Register>, last_java_fp: Option<Register>, last_java_pc: Option<CodeAddress>) {
        if let Some(fp) = last_java_fp {
            self.movptr_store(Address::new(THREAD, THREAD_LAST_JAVA_FP_OFFSET), fp);
        }
        if let Some(pc) = last_java_pc {
            self.store_code_address(Address::new(THREAD, THREAD_LAST_JAVA_PC_OFFSET), pc, R10);
        }
        self.movptr_store(Address::new(THREAD, THREAD_LAST_JAVA_SP_OFFSET), last_java_sp.unwrap_or(RSP));
    }

    pub fn reset_last_java_frame(&mut self, clear_fp: bool) {
        self.movptr_imm(Address::new(THREAD, THREAD_LAST_JAVA_SP_OFFSET), 0);
        if clear_fp {
            self.movptr_imm(Address::new(THREAD, THREAD_LAST_JAVA_FP_OFFSET), 0);
        }
        self.movptr_imm(Address::new(THREAD, THREAD_LAST_JAVA_PC_OFFSET), 0);
    }

    pub fn get_vm_result(&mut self, to: Register) {
        self.movptr(to, Address::new(THREAD, THREAD_VM_RESULT_OFFSET));
        self.movptr_imm(Address::new(THREAD, THREAD_VM_RESULT_OFFSET), 0);
    }

    /// The call-into-VM protocol: record the last Java frame, call with the thread as first
    /// argument, forget the frame, forward a pending exception, fetch the oop result.
    pub fn call_vm_base(&mut self, oop_result: Option<Register>, entry: RuntimeEntry, args: &[Register], check_exceptions: bool, hooks: &dyn CallVmHooks) {
        let c = self.new_label();
        let e = self.new_label();
        self.call(c);
        self.jmp(e);
        self.bind(c);
        self.pass_args(args, 1);
        hooks.before_call(self);
        self.lea(RAX, Address::new(RSP, 8));
        self.set_last_java_frame(Some(RAX), Some(RBP), None);
        self.mov(C_RARG0, THREAD);
        self.call_vm_leaf_base(entry);
        self.reset_last_java_frame(true);
        if check_exceptions {
            match self.forward_exception_entry {
                Some(forward) => self.cmpptr_jcc(Address::new(THREAD, THREAD_PENDING_EXCEPTION_OFFSET), 0, Condition::NotEqual, forward),
                None => self.errors.push(GenerationError::MissingDependency("forward_exception")),
            }
        }
        if let Some(result) = oop_result {
            self.get_vm_result(result);
        }
        hooks.after_call(self);
        self.ret();
        self.bind(e);
    }

    pub fn call_vm(&mut self, oop_result: Option<Register>, entry: RuntimeEntry, args: &[Register]) {
        self.call_vm_base(oop_result, entry, args, true, &NoHooks);
    }

    /// Writes into the page `offset` bytes below the stack pointer so a guard page fault happens
    /// here rather than somewhere unexpected.
    pub fn bang_stack_with_offset(&mut self, offset: i32) {
        self.movl_store(Address::new(RSP, -offset), RAX);
    }
}
