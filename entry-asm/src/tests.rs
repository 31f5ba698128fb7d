use std::sync::Arc;

use iced_x86::{Decoder, DecoderOptions, Mnemonic, OpKind, Register as NativeRegister};
use interpreter_common::flags::ExternalAddresses;

use crate::code_space::CodeSpace;
use crate::error::{GenerationError, SimulationError};
use crate::instr::{Address, Condition, Scale};
use crate::ir_to_native::{lower_blob, AddressResolver};
use crate::masm::MacroAssembler;
use crate::native_buffer::NativeCodeBuffer;
use crate::registers::{C_RARG0, C_RARG1, C_RARG2, R11, R12, RAX, RBP, RBX, RCX, RDX, RSI, RSP, XMM0};
use crate::runtime_entry::RuntimeEntry;
use crate::simulator::{Cpu, ExternalOutcome, Runtime, SimulatedMemory, Simulator, POISON};
use crate::CodeAddress;

const EXIT: u64 = 0x0000_0000_e417_0000;
const STACK_BASE: u64 = 0x7000_0000;
const STACK_SIZE: usize = 0x1_0000;
const DATA: u64 = 0x5000_0000;
const HEAP_BASE_WORD: u64 = 0x5800_0000;

#[derive(Default)]
struct RecordingRuntime {
    calls: Vec<(RuntimeEntry, u64)>,
}

impl Runtime for RecordingRuntime {
    fn call_runtime(&mut self, entry: RuntimeEntry, cpu: &mut Cpu, _memory: &mut SimulatedMemory) -> Result<(), SimulationError> {
        self.calls.push((entry, cpu.get(C_RARG0)));
        cpu.set(RAX, 42);
        Ok(())
    }

    fn enter_external(&mut self, address: u64, _cpu: &mut Cpu, _memory: &mut SimulatedMemory) -> Result<ExternalOutcome, SimulationError> {
        if address == EXIT {
            Ok(ExternalOutcome::Halt)
        } else {
            Err(SimulationError::NotCode(address))
        }
    }
}

fn external() -> ExternalAddresses {
    ExternalAddresses { narrow_oop_base: HEAP_BASE_WORD, ..ExternalAddresses::default() }
}

fn machine() -> (Cpu, SimulatedMemory) {
    let mut memory = SimulatedMemory::new();
    memory.map("stack", STACK_BASE, STACK_SIZE).unwrap();
    memory.map("data", DATA, 0x1000).unwrap();
    memory.map("heap base", HEAP_BASE_WORD, 8).unwrap();
    memory.write_u64(HEAP_BASE_WORD, 0x1234_0000).unwrap();
    let mut cpu = Cpu::default();
    cpu.set(RSP, STACK_BASE + STACK_SIZE as u64);
    cpu.push(&mut memory, EXIT).unwrap();
    (cpu, memory)
}

fn run(code_space: Arc<CodeSpace>, entry: CodeAddress, cpu: &mut Cpu, memory: &mut SimulatedMemory, runtime: &mut RecordingRuntime) -> Result<u64, SimulationError> {
    cpu.rip = entry.0;
    Simulator::new(code_space).run(cpu, memory, runtime, 10_000)
}

#[test]
fn unbound_label_is_reported_at_finish() {
    let code_space = CodeSpace::new();
    let mut masm = MacroAssembler::new("test", code_space.reserve(), 100, external());
    let label = masm.new_label();
    masm.jmp(label);
    assert!(matches!(masm.finish(), Err(GenerationError::UnboundLabel(l)) if l == label));
}

#[test]
fn label_bound_twice_is_reported() {
    let code_space = CodeSpace::new();
    let mut masm = MacroAssembler::new("test", code_space.reserve(), 100, external());
    let label = masm.new_label();
    masm.bind(label);
    masm.bind(label);
    assert!(matches!(masm.finish(), Err(GenerationError::LabelBoundTwice(_))));
}

#[test]
fn overflowing_the_buffer_fails() {
    let code_space = CodeSpace::new();
    let mut masm = MacroAssembler::new("tiny", code_space.reserve(), 4, external());
    for _ in 0..10 {
        masm.push(RAX);
    }
    assert!(matches!(masm.finish(), Err(GenerationError::CodeBufferFull { capacity: 4, .. })));
}

#[test]
fn codelets_cover_their_instructions() {
    let code_space = CodeSpace::new();
    let mut masm = MacroAssembler::new("test", code_space.reserve(), 100, external());
    let first = masm.begin_codelet("first");
    masm.push(RAX);
    masm.pop(RAX);
    masm.end_codelet();
    let second = masm.begin_codelet("second");
    masm.ret();
    masm.end_codelet();
    let blob = code_space.install(masm.finish().unwrap());
    assert_eq!(blob.codelet_named("first").unwrap().start, first);
    assert_eq!(blob.codelet_at(second.0).unwrap().name, "second");
    assert_eq!(code_space.describe(first.0 + 1).unwrap(), "first+1");
}

#[test]
fn conflicting_argument_shuffle_is_rejected() {
    let code_space = CodeSpace::new();
    let mut masm = MacroAssembler::new("test", code_space.reserve(), 100, external());
    // moving rax into c_rarg1 would clobber the first argument before it is passed
    masm.pass_args(&[C_RARG1, RAX], 0);
    masm.ret();
    assert!(matches!(masm.finish(), Err(GenerationError::ArgumentShuffle(_))));
}

#[test]
fn argument_shuffle_in_reverse_order() {
    let code_space = Arc::new(CodeSpace::new());
    let mut masm = MacroAssembler::new("test", code_space.reserve(), 100, external());
    let entry = masm.pc();
    // rsi -> rdx must happen before rdi -> rsi
    masm.pass_args(&[C_RARG0, C_RARG1], 1);
    masm.ret();
    code_space.install(masm.finish().unwrap());
    let (mut cpu, mut memory) = machine();
    cpu.set(C_RARG0, 1);
    cpu.set(C_RARG1, 2);
    run(code_space, entry, &mut cpu, &mut memory, &mut RecordingRuntime::default()).unwrap();
    assert_eq!(cpu.get(C_RARG1), 1);
    assert_eq!(cpu.get(C_RARG2), 2);
}

#[test]
fn arithmetic_and_branches() {
    let code_space = Arc::new(CodeSpace::new());
    let mut masm = MacroAssembler::new("test", code_space.reserve(), 100, external());
    let entry = masm.pc();
    let lp = masm.new_label();
    let done = masm.new_label();
    masm.mov_imm(RAX, 0);
    masm.mov_imm(RCX, 5);
    masm.bind(lp);
    masm.cmpl_jcc(RCX, 0, Condition::Equal, done);
    masm.addptr(RAX, RCX);
    masm.subl(RCX, 1);
    masm.jmp(lp);
    masm.bind(done);
    masm.ret();
    code_space.install(masm.finish().unwrap());
    let (mut cpu, mut memory) = machine();
    assert_eq!(run(code_space, entry, &mut cpu, &mut memory, &mut RecordingRuntime::default()).unwrap(), EXIT);
    assert_eq!(cpu.get(RAX), 15);
}

#[test]
fn dword_writes_clear_the_upper_half() {
    let code_space = Arc::new(CodeSpace::new());
    let mut masm = MacroAssembler::new("test", code_space.reserve(), 100, external());
    let entry = masm.pc();
    masm.mov_imm(RAX, u64::MAX);
    masm.addl(RAX, 1);
    masm.mov_imm(RCX, 0xFFFF_FFFF_0000_0000);
    masm.alu(crate::instr::AluOp::Or, RCX, 0x7F, crate::instr::Size::Byte);
    masm.mov_imm(RDX, DATA);
    masm.movl_imm(Address::new(RDX, 0), -2);
    masm.movslq(RSI, Address::new(RDX, 0));
    masm.movl(RBX, Address::new(RDX, 0));
    masm.ret();
    code_space.install(masm.finish().unwrap());
    let (mut cpu, mut memory) = machine();
    run(code_space, entry, &mut cpu, &mut memory, &mut RecordingRuntime::default()).unwrap();
    assert_eq!(cpu.get(RAX), 0);
    assert_eq!(cpu.get(RCX), 0xFFFF_FFFF_0000_007F);
    assert_eq!(cpu.get(RSI), (-2i64) as u64);
    assert_eq!(cpu.get(RBX), 0xFFFF_FFFE);
}

#[test]
fn indexed_addressing() {
    let code_space = Arc::new(CodeSpace::new());
    let mut masm = MacroAssembler::new("test", code_space.reserve(), 100, external());
    let entry = masm.pc();
    masm.mov_imm(RDX, DATA);
    masm.mov_imm(RCX, 3);
    masm.movptr_imm(Address::indexed(RDX, RCX, Scale::Times8, 8), 77);
    masm.movptr(RAX, Address::new(RDX, 32));
    masm.ret();
    code_space.install(masm.finish().unwrap());
    let (mut cpu, mut memory) = machine();
    run(code_space, entry, &mut cpu, &mut memory, &mut RecordingRuntime::default()).unwrap();
    assert_eq!(cpu.get(RAX), 77);
}

#[test]
fn leaf_calls_are_aligned_either_way() {
    for misalign in [false, true] {
        let code_space = Arc::new(CodeSpace::new());
        let mut masm = MacroAssembler::new("test", code_space.reserve(), 100, external());
        let entry = masm.pc();
        if misalign {
            masm.push(RAX);
        }
        masm.call_vm_leaf(RuntimeEntry::BcpToDi, &[RBP]);
        if misalign {
            masm.pop(RCX);
        }
        masm.ret();
        code_space.install(masm.finish().unwrap());
        let (mut cpu, mut memory) = machine();
        // the caller's call left rsp at 8 mod 16
        cpu.set(RBP, 99);
        let mut runtime = RecordingRuntime::default();
        run(code_space, entry, &mut cpu, &mut memory, &mut runtime).unwrap();
        assert_eq!(runtime.calls, vec![(RuntimeEntry::BcpToDi, 99)]);
        assert_eq!(cpu.get(RAX), 42);
    }
}

#[test]
fn unaligned_runtime_call_is_caught() {
    let code_space = Arc::new(CodeSpace::new());
    let mut masm = MacroAssembler::new("test", code_space.reserve(), 100, external());
    let entry = masm.pc();
    masm.emit(crate::instr::Instr::CallRuntime { entry: RuntimeEntry::BcpToDi });
    masm.ret();
    code_space.install(masm.finish().unwrap());
    let (mut cpu, mut memory) = machine();
    let result = run(code_space, entry, &mut cpu, &mut memory, &mut RecordingRuntime::default());
    assert!(matches!(result, Err(SimulationError::MisalignedCall { .. })));
}

#[test]
fn gc_capable_calls_reload_invalidated_registers() {
    let code_space = Arc::new(CodeSpace::new());
    let mut masm = MacroAssembler::new("test", code_space.reserve(), 100, external());
    masm.set_method_reload(Some(Address::new(RBP, -24)));
    let entry = masm.pc();
    masm.enter();
    masm.push_imm(0);
    masm.push_imm(0);
    masm.push(RBX);
    masm.call_vm_leaf(RuntimeEntry::Monitorenter, &[]);
    masm.leave();
    masm.ret();
    code_space.install(masm.finish().unwrap());
    let (mut cpu, mut memory) = machine();
    cpu.set(RBX, 0xABCD);
    let mut runtime = RecordingRuntime::default();
    run(code_space, entry, &mut cpu, &mut memory, &mut runtime).unwrap();
    assert_eq!(cpu.get(RBX), 0xABCD);
    assert_eq!(cpu.get(R12), 0x1234_0000);
    assert_eq!(cpu.get(RCX), POISON);
}

#[test]
fn stop_is_an_error() {
    let code_space = Arc::new(CodeSpace::new());
    let mut masm = MacroAssembler::new("test", code_space.reserve(), 100, external());
    let entry = masm.pc();
    masm.stop("unreachable");
    code_space.install(masm.finish().unwrap());
    let (mut cpu, mut memory) = machine();
    let result = run(code_space, entry, &mut cpu, &mut memory, &mut RecordingRuntime::default());
    assert!(matches!(result, Err(SimulationError::ShouldNotReachHere { reason: "unreachable", .. })));
}

#[test]
fn float_moves_and_sqrt() {
    let code_space = Arc::new(CodeSpace::new());
    let mut masm = MacroAssembler::new("test", code_space.reserve(), 100, external());
    let entry = masm.pc();
    masm.mov_imm(RDX, DATA);
    masm.movdbl(XMM0, Address::new(RDX, 0));
    masm.sqrtsd(XMM0);
    masm.movq_from_xmm(RAX, XMM0);
    masm.ret();
    code_space.install(masm.finish().unwrap());
    let (mut cpu, mut memory) = machine();
    memory.write_u64(DATA, 16.0f64.to_bits()).unwrap();
    run(code_space, entry, &mut cpu, &mut memory, &mut RecordingRuntime::default()).unwrap();
    assert_eq!(f64::from_bits(cpu.get(RAX)), 4.0);
}

fn abs_of(code_space: &Arc<CodeSpace>) -> CodeAddress {
    let mut masm = MacroAssembler::new("abs", code_space.reserve(), 100, external());
    let entry = masm.pc();
    masm.mov_imm(RDX, DATA);
    masm.movdbl(XMM0, Address::new(RDX, 0));
    masm.abssd(XMM0);
    masm.movq_from_xmm(RAX, XMM0);
    masm.ret();
    code_space.install(masm.finish().unwrap());
    entry
}

#[test]
fn abs_destroys_r11() {
    let code_space = Arc::new(CodeSpace::new());
    let entry = abs_of(&code_space);
    let (mut cpu, mut memory) = machine();
    memory.write_u64(DATA, (-2.5f64).to_bits()).unwrap();
    cpu.set(R11, 0x1111);
    cpu.set(RCX, 0x2222);
    run(code_space, entry, &mut cpu, &mut memory, &mut RecordingRuntime::default()).unwrap();
    assert_eq!(f64::from_bits(cpu.get(RAX)), 2.5);
    assert_eq!(cpu.get(R11), POISON);
    assert_eq!(cpu.get(RCX), 0x2222);
}

#[test]
fn abs_lowers_through_r11() {
    let code_space = Arc::new(CodeSpace::new());
    abs_of(&code_space);
    let blob = code_space.blobs().into_iter().next().unwrap();
    let native = lower_blob(&blob, 0x4000_0000, &FixedResolver).unwrap();
    let decoder = Decoder::with_ip(64, &native.bytes, native.base, DecoderOptions::NONE);
    let btr = decoder.into_iter().find(|instruction| instruction.mnemonic() == Mnemonic::Btr).unwrap();
    assert_eq!(btr.op0_kind(), OpKind::Register);
    assert_eq!(btr.op0_register(), NativeRegister::R11);
}

#[test]
fn watched_writes_are_recorded() {
    let mut memory = SimulatedMemory::new();
    memory.map("data", DATA, 64).unwrap();
    memory.watch(DATA + 8..DATA + 16);
    memory.write_u64(DATA, 1).unwrap();
    memory.write_u32(DATA + 12, 1).unwrap();
    assert_eq!(memory.watched_writes().len(), 1);
    assert!(memory.map("overlap", DATA + 32, 64).is_err());
    assert!(memory.read_u64(DATA + 60).is_err());
}

struct FixedResolver;

impl AddressResolver for FixedResolver {
    fn runtime_entry(&self, entry: RuntimeEntry) -> u64 {
        0x1000_0000 + entry.ordinal() as u64 * 16
    }

    fn code_address(&self, _address: CodeAddress) -> Option<u64> {
        None
    }
}

#[test]
fn lowering_produces_decodable_code() {
    let code_space = CodeSpace::new();
    let mut masm = MacroAssembler::new("test", code_space.reserve(), 200, external());
    let entry = masm.pc();
    let done = masm.new_label();
    masm.enter();
    masm.testl_jcc(RAX, RAX, Condition::Equal, done);
    masm.call_vm_leaf(RuntimeEntry::Dsin, &[]);
    masm.cmpptr_jcc(Address::new(RBP, 16), 0, Condition::NotEqual, entry);
    masm.bind(done);
    masm.mov_code(RAX, entry);
    masm.jump_external(0xdead_beef);
    let blob = masm.finish().unwrap();
    let native = lower_blob(&blob, 0x4000_0000, &FixedResolver).unwrap();
    assert_eq!(native.instruction_offsets.len(), blob.instructions.len());
    assert!(native.instruction_offsets.windows(2).all(|pair| pair[0] <= pair[1]));
    let mut decoder = Decoder::with_ip(64, &native.bytes, native.base, DecoderOptions::NONE);
    let first = decoder.decode();
    assert_eq!(first.mnemonic(), Mnemonic::Push);
    let mnemonics = decoder.iter().map(|instruction| instruction.mnemonic()).collect::<Vec<_>>();
    assert!(!mnemonics.contains(&Mnemonic::INVALID));
    assert_eq!(mnemonics.last(), Some(&Mnemonic::Int3));
}

#[test]
fn unresolved_cross_blob_target_fails_lowering() {
    let code_space = CodeSpace::new();
    let elsewhere = code_space.reserve();
    let mut masm = MacroAssembler::new("test", code_space.reserve(), 10, external());
    masm.jmp(elsewhere);
    let blob = masm.finish().unwrap();
    assert!(lower_blob(&blob, 0x4000_0000, &FixedResolver).is_err());
}

#[test]
fn native_buffer_takes_lowered_code() {
    let code_space = CodeSpace::new();
    let mut masm = MacroAssembler::new("test", code_space.reserve(), 10, external());
    masm.mov_imm(RAX, 7);
    masm.ret();
    let blob = masm.finish().unwrap();
    let mut buffer = NativeCodeBuffer::reserve(4096).unwrap();
    let native = lower_blob(&blob, buffer.address(), &FixedResolver).unwrap();
    buffer.install(&native).unwrap();
    assert_eq!(buffer.code(), native.bytes.as_slice());
}
