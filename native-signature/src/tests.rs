use std::sync::Arc;

use entry_asm::code_space::CodeSpace;
use entry_asm::error::SimulationError;
use entry_asm::instr::Address;
use entry_asm::masm::{MacroAssembler, NoHooks};
use entry_asm::registers::{FloatRegister, C_RARG1, C_RARG2, C_RARG3, LOCALS, METHOD, RBP, RSP, THREAD};
use entry_asm::runtime_entry::RuntimeEntry;
use entry_asm::simulator::{Cpu, ExternalOutcome, Runtime, SimulatedMemory, Simulator};
use entry_asm::CodeAddress;
use interpreter_common::basic_type::{BasicType, RESULT_HANDLER_TYPES};
use interpreter_common::descriptor_parser::MethodSignature;
use interpreter_common::fingerprint::Fingerprint;
use interpreter_common::flags::ExternalAddresses;
use interpreter_common::vm_layout::{ACC_NATIVE, ACC_STATIC, JAVA_THREAD_SIZE, METHOD_ACCESS_FLAGS_OFFSET, METHOD_SIZE};
use proptest::prelude::*;

use crate::generator::generate_signature_handler;
use crate::iterator::{iterate_fingerprint, ArgumentCursor, ArgumentVisitor, NativeSignatureIterator};
use crate::library::{HandlerLookup, SignatureHandlerLibrary};
use crate::plan::{MarshalingPlan, Placement};
use crate::result_handlers::ResultHandlerTable;
use crate::slow_handler::generate_slow_signature_handler;

const EXIT: u64 = 0xe417_0000;
const STACK_BASE: u64 = 0x7000_0000;
const STACK_SIZE: u64 = 0x1_0000;
/// Stack pointer after the handler returns, the first outgoing stack argument.
const OUTGOING: u64 = STACK_BASE + 0x8000;
const FRAME: u64 = STACK_BASE + 0xC000;
const LOCALS_TOP: u64 = 0x6000_1000;
const THREAD_ADDRESS: u64 = 0x6100_0000;
const METHOD_ADDRESS: u64 = 0x6200_0000;
const HEAP_BASE_WORD: u64 = 0x6300_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Callback {
    Int(ArgumentCursor),
    Long(ArgumentCursor),
    Float(ArgumentCursor),
    Double(ArgumentCursor),
    Object(ArgumentCursor),
}

#[derive(Default)]
struct Recorder(Vec<Callback>);

impl ArgumentVisitor for Recorder {
    fn pass_int(&mut self, cursor: ArgumentCursor) {
        self.0.push(Callback::Int(cursor))
    }

    fn pass_long(&mut self, cursor: ArgumentCursor) {
        self.0.push(Callback::Long(cursor))
    }

    fn pass_float(&mut self, cursor: ArgumentCursor) {
        self.0.push(Callback::Float(cursor))
    }

    fn pass_double(&mut self, cursor: ArgumentCursor) {
        self.0.push(Callback::Double(cursor))
    }

    fn pass_object(&mut self, cursor: ArgumentCursor) {
        self.0.push(Callback::Object(cursor))
    }
}

fn result_handlers() -> ResultHandlerTable {
    let mut handlers = [CodeAddress(0); RESULT_HANDLER_TYPES.len()];
    for (i, handler) in handlers.iter_mut().enumerate() {
        *handler = CodeAddress(0x9000_0000 + i as u64 * 0x100);
    }
    ResultHandlerTable::new(handlers)
}

fn external() -> ExternalAddresses {
    ExternalAddresses { narrow_oop_base: HEAP_BASE_WORD, ..ExternalAddresses::default() }
}

struct SlowPathRuntime {
    iterator: NativeSignatureIterator,
    result_handlers: ResultHandlerTable,
}

impl Runtime for SlowPathRuntime {
    fn call_runtime(&mut self, entry: RuntimeEntry, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<(), SimulationError> {
        assert_eq!(entry, RuntimeEntry::SlowSignatureHandler);
        assert_eq!(cpu.get(C_RARG1), METHOD_ADDRESS);
        let buffer = crate::slow_handler::SlowSignatureHandler::new(memory, cpu.get(C_RARG2), self.iterator.is_static()).marshal(&self.iterator)?;
        buffer.write_to(memory, cpu.get(C_RARG3))?;
        cpu.set(entry_asm::registers::RAX, self.result_handlers.handler_for(self.iterator.result_type()).0);
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

/// Local slot `k` of a test activation. Int slots carry garbage in their upper half, every third
/// slot is a null reference when read as an object.
fn local_value(slot: usize) -> u64 {
    if slot % 3 == 2 {
        0
    } else {
        0xDEAD_BEEF_8000_0000 | (slot as u64 * 0x1111)
    }
}

fn machine(is_static: bool, receiver_present: bool) -> (Cpu, SimulatedMemory) {
    let mut memory = SimulatedMemory::new();
    memory.map("stack", STACK_BASE, STACK_SIZE as usize).unwrap();
    memory.map("locals", LOCALS_TOP - 0x1000, 0x1008).unwrap();
    memory.map("thread", THREAD_ADDRESS, JAVA_THREAD_SIZE).unwrap();
    memory.map("method", METHOD_ADDRESS, METHOD_SIZE).unwrap();
    memory.map("heap base", HEAP_BASE_WORD, 8).unwrap();
    let flags = ACC_NATIVE | if is_static { ACC_STATIC } else { 0 };
    memory.write_u32(METHOD_ADDRESS + METHOD_ACCESS_FLAGS_OFFSET as u64, flags).unwrap();
    for slot in 0..64 {
        memory.write_u64(LOCALS_TOP - slot * 8, local_value(slot as usize)).unwrap();
    }
    if receiver_present {
        memory.write_u64(LOCALS_TOP, 0x4000_0000).unwrap();
    }
    memory.write_u64(FRAME - 24, METHOD_ADDRESS).unwrap();
    let mut cpu = Cpu::default();
    cpu.set(RSP, OUTGOING);
    cpu.push(&mut memory, EXIT).unwrap();
    cpu.set(LOCALS, LOCALS_TOP);
    cpu.set(METHOD, METHOD_ADDRESS);
    cpu.set(THREAD, THREAD_ADDRESS);
    cpu.set(RBP, FRAME);
    (cpu, memory)
}

struct Handlers {
    code_space: Arc<CodeSpace>,
    fast: Option<CodeAddress>,
    slow: CodeAddress,
}

fn handlers_for(iterator: &NativeSignatureIterator) -> Handlers {
    let code_space = Arc::new(CodeSpace::new());
    let fast = match iterator.fingerprint() {
        Fingerprint::TooComplex => None,
        fingerprint => Some(generate_signature_handler(fingerprint, &result_handlers(), &code_space, 1024, external()).unwrap().base),
    };
    let mut masm = MacroAssembler::new("slow signature handler", code_space.reserve(), 1024, external());
    masm.set_method_reload(Some(Address::new(RBP, -24)));
    masm.set_forward_exception_entry(code_space.reserve());
    let slow = masm.pc();
    generate_slow_signature_handler(&mut masm, &NoHooks);
    code_space.install(masm.finish().unwrap());
    Handlers { code_space, fast, slow }
}

/// Runs one handler and reads back every destination of the plan, plus the returned rax.
fn run_handler(handlers: &Handlers, entry: CodeAddress, iterator: &NativeSignatureIterator, plan: &MarshalingPlan) -> (Vec<u64>, u64) {
    let (mut cpu, mut memory) = machine(iterator.is_static(), !iterator.is_static());
    cpu.rip = entry.0;
    let mut runtime = SlowPathRuntime { iterator: iterator.clone(), result_handlers: result_handlers() };
    Simulator::new(handlers.code_space.clone()).run(&mut cpu, &mut memory, &mut runtime, 10_000).unwrap();
    assert_eq!(cpu.rsp(), OUTGOING);
    let values = plan
        .moves
        .iter()
        .map(|move_| match move_.destination {
            Placement::IntRegister(register) => cpu.get(register),
            Placement::FloatRegister(register) => cpu.xmm(register),
            Placement::Stack(word) => memory.read_u64(OUTGOING + word as u64 * 8).unwrap(),
        })
        .collect();
    (values, cpu.get(entry_asm::registers::RAX))
}

/// What the plan says each destination must hold for the locals of [`machine`].
fn expected_values(plan: &MarshalingPlan) -> Vec<u64> {
    plan.moves
        .iter()
        .map(|move_| {
            let slot_address = (LOCALS_TOP as i64 + move_.source as i64) as u64;
            let raw = if !plan.is_static && move_.cursor.java_offset == 0 { 0x4000_0000 } else { local_value(((LOCALS_TOP - slot_address) / 8) as usize) };
            match move_.type_ {
                BasicType::Object => {
                    if raw == 0 {
                        0
                    } else {
                        slot_address
                    }
                }
                BasicType::Int => raw as u32 as i32 as i64 as u64,
                BasicType::Float => raw as u32 as u64,
                _ => raw,
            }
        })
        .collect()
}

fn check_equivalence(descriptor: &str, is_static: bool) {
    let iterator = NativeSignatureIterator::from_descriptor(descriptor, is_static).unwrap();
    let plan = MarshalingPlan::of(&iterator);
    let handlers = handlers_for(&iterator);
    let expected = expected_values(&plan);
    let expected_handler = result_handlers().handler_for(iterator.result_type()).0;
    let (slow, slow_handler) = run_handler(&handlers, handlers.slow, &iterator, &plan);
    assert_eq!(slow, expected, "slow path of {} static={}", descriptor, is_static);
    assert_eq!(slow_handler, expected_handler);
    if let Some(fast_entry) = handlers.fast {
        let (fast, fast_handler) = run_handler(&handlers, fast_entry, &iterator, &plan);
        assert_eq!(fast, slow, "fast and slow path disagree on {} static={}", descriptor, is_static);
        assert_eq!(fast_handler, expected_handler);
    }
}

#[test]
fn fast_and_slow_handlers_marshal_identically() {
    let descriptors = [
        "()V",
        "(I)I",
        "(IIII)V",
        "(IIIII)V",
        "(IIIIII)V",
        "(JJJJJJ)J",
        "(ZBCSI)Z",
        "(FFFFFFFF)F",
        "(FFFFFFFFF)F",
        "(DDDDDDDDD)D",
        "(FDFDFDFDFD)V",
        "(Ljava/lang/Object;[ILjava/lang/String;Ljava/lang/Object;)Ljava/lang/Object;",
        "(ILjava/lang/Object;DFJ[IZ)V",
        "(IJFDLjava/lang/Object;IJFDLjava/lang/Object;)V",
    ];
    for descriptor in descriptors {
        check_equivalence(descriptor, true);
        check_equivalence(descriptor, false);
    }
}

#[test]
fn too_complex_signature_uses_only_the_slow_path() {
    let descriptor = "(JJJJJJJJ)V";
    let iterator = NativeSignatureIterator::from_descriptor(descriptor, true).unwrap();
    assert_eq!(iterator.fingerprint(), Fingerprint::TooComplex);
    check_equivalence(descriptor, true);
}

#[test]
fn object_arguments_are_handlized() {
    let iterator = NativeSignatureIterator::from_descriptor("(Ljava/lang/Object;Ljava/lang/Object;)V", true).unwrap();
    let plan = MarshalingPlan::of(&iterator);
    let handlers = handlers_for(&iterator);
    let (mut cpu, mut memory) = machine(true, false);
    memory.write_u64(LOCALS_TOP, 0x4000_1000).unwrap();
    memory.write_u64(LOCALS_TOP - 8, 0).unwrap();
    cpu.rip = handlers.fast.unwrap().0;
    let mut runtime = SlowPathRuntime { iterator: iterator.clone(), result_handlers: result_handlers() };
    Simulator::new(handlers.code_space.clone()).run(&mut cpu, &mut memory, &mut runtime, 1000).unwrap();
    assert_eq!(plan.moves[0].destination, Placement::IntRegister(C_RARG2));
    let handle = cpu.get(C_RARG2);
    assert_eq!(handle, LOCALS_TOP);
    assert_eq!(cpu.get(C_RARG3), 0);
    // a collection moves the object and updates the slot, the handle follows
    memory.write_u64(LOCALS_TOP, 0x4800_0000).unwrap();
    assert_eq!(memory.read_u64(handle).unwrap(), 0x4800_0000);
}

#[test]
fn plan_places_static_and_instance_arguments() {
    let static_plan = MarshalingPlan::of(&NativeSignatureIterator::from_descriptor("(IIIIII)V", true).unwrap());
    let destinations = static_plan.moves.iter().map(|move_| move_.destination).collect::<Vec<_>>();
    assert_eq!(destinations[0], Placement::IntRegister(C_RARG2));
    assert_eq!(destinations[3], Placement::IntRegister(entry_asm::registers::C_RARG5));
    assert_eq!(destinations[4], Placement::Stack(0));
    assert_eq!(destinations[5], Placement::Stack(1));
    assert_eq!(static_plan.stack_words, 2);

    let instance_plan = MarshalingPlan::of(&NativeSignatureIterator::from_descriptor("(JD)V", false).unwrap());
    assert_eq!(instance_plan.moves[0].destination, Placement::IntRegister(C_RARG1));
    assert!(instance_plan.moves[0].handlized);
    assert_eq!(instance_plan.moves[1].destination, Placement::IntRegister(C_RARG2));
    // a long occupies slots 1 and 2 and is read from the lower address
    assert_eq!(instance_plan.moves[1].source, -16);
    assert_eq!(instance_plan.moves[2].destination, Placement::FloatRegister(FloatRegister(0)));
    assert_eq!(instance_plan.moves[2].cursor.java_offset, 3);
    assert_eq!(instance_plan.moves[2].cursor.native_offset, 3);
}

#[test]
fn receiver_comes_first_and_mirror_is_prepended() {
    let mut recorder = Recorder::default();
    NativeSignatureIterator::from_descriptor("(I)V", false).unwrap().iterate(&mut recorder);
    assert_eq!(
        recorder.0,
        vec![
            Callback::Object(ArgumentCursor { java_offset: 0, native_offset: 1 }),
            Callback::Int(ArgumentCursor { java_offset: 1, native_offset: 2 }),
        ]
    );
    let mut recorder = Recorder::default();
    NativeSignatureIterator::from_descriptor("(I)V", true).unwrap().iterate(&mut recorder);
    assert_eq!(recorder.0, vec![Callback::Int(ArgumentCursor { java_offset: 0, native_offset: 2 })]);
}

#[test]
fn too_complex_fingerprint_is_not_walked() {
    let mut recorder = Recorder::default();
    assert!(!iterate_fingerprint(Fingerprint::TooComplex, &mut recorder));
    assert!(recorder.0.is_empty());
    assert!(NativeSignatureIterator::from_fingerprint(Fingerprint::TooComplex).is_none());
}

#[test]
fn library_promotes_after_the_slow_path() {
    let code_space = Arc::new(CodeSpace::new());
    let slow = CodeAddress(0x9100_0000);
    let library = SignatureHandlerLibrary::new(code_space.clone(), external(), result_handlers(), slow, 1024);
    let fingerprint = NativeSignatureIterator::from_descriptor("(IJ)D", true).unwrap().fingerprint();
    assert_eq!(library.lookup(fingerprint), HandlerLookup::Slow(slow));
    assert!(library.has_seen(fingerprint));
    let generated = library.promote(fingerprint).unwrap().unwrap();
    assert!(code_space.contains(generated.0));
    assert_eq!(library.lookup(fingerprint), HandlerLookup::Generated(generated));
    assert_eq!(library.promote(fingerprint).unwrap(), Some(generated));
    assert_eq!(library.generated_handlers(), 1);

    assert_eq!(library.lookup(Fingerprint::TooComplex), HandlerLookup::Slow(slow));
    assert_eq!(library.promote(Fingerprint::TooComplex).unwrap(), None);
}

#[test]
fn result_handler_table_maps_arrays_to_objects() {
    let table = result_handlers();
    assert_eq!(table.handler_for(BasicType::Array), table.handler_for(BasicType::Object));
    assert_eq!(table.type_of(table.handler_for(BasicType::Float)), Some(BasicType::Float));
}

fn parameter_type() -> impl Strategy<Value = BasicType> {
    prop_oneof![
        Just(BasicType::Boolean),
        Just(BasicType::Char),
        Just(BasicType::Byte),
        Just(BasicType::Short),
        Just(BasicType::Int),
        Just(BasicType::Long),
        Just(BasicType::Float),
        Just(BasicType::Double),
        Just(BasicType::Object),
    ]
}

proptest! {
    #[test]
    fn fingerprint_walk_matches_descriptor_walk(parameters in prop::collection::vec(parameter_type(), 0..13), is_static in any::<bool>()) {
        let iterator = NativeSignatureIterator::from_signature(MethodSignature::new(parameters, BasicType::Void), is_static);
        let mut from_descriptor = Recorder::default();
        iterator.iterate(&mut from_descriptor);
        let mut from_fingerprint = Recorder::default();
        let fingerprint = iterator.fingerprint();
        if iterate_fingerprint(fingerprint, &mut from_fingerprint) {
            prop_assert_eq!(from_descriptor.0, from_fingerprint.0);
        } else {
            prop_assert!(iterator.size_of_parameters() > 13);
        }
    }

    #[test]
    fn marshaling_paths_agree_on_random_signatures(parameters in prop::collection::vec(parameter_type(), 0..10), is_static in any::<bool>()) {
        let descriptor = MethodSignature::new(parameters, BasicType::Int).jvm_representation();
        check_equivalence(&descriptor, is_static);
    }
}
