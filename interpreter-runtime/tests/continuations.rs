use entry_asm::registers::{BCP, RAX, RBP, RSP};
use entry_asm::runtime_entry::{RuntimeEntry, ThrowableKind};
use interpreter_common::basic_type::{BasicType, TosState};
use interpreter_common::frame_layout::{slot_byte_offset, INTERPRETER_FRAME_LAST_SP_OFFSET};
use interpreter_common::vm_layout::{
    ACC_STATIC, EARLYRET_INACTIVE, EARLYRET_PENDING, ILLEGAL_TOS, JVMTI_EARLYRET_OOP_OFFSET, JVMTI_EARLYRET_STATE_OFFSET, JVMTI_EARLYRET_TOS_OFFSET, JVMTI_EARLYRET_VALUE_OFFSET,
    THREAD_JVMTI_THREAD_STATE_OFFSET, THREAD_PENDING_EXCEPTION_OFFSET, THREAD_PENDING_MONITORENTER_OFFSET,
};
use interpreter_runtime::raw::field;
use interpreter_runtime::{CallOutcome, ExceptionTableEntry, JavaValue, MethodBuilder, MethodRef, ThreadId, Vm, VmEvent, VmOptions};
use template_interpreter::generator::InvokeKind;

fn vm_with(options: VmOptions) -> (Vm, ThreadId, u64) {
    let mut vm = Vm::new(options).unwrap();
    let thread = vm.spawn_thread().unwrap();
    let holder = vm.define_class("Resumed").unwrap();
    (vm, thread, holder)
}

fn vm() -> (Vm, ThreadId, u64) {
    vm_with(VmOptions::default())
}

/// Calls `method` and leaves the thread at the dispatch of its first bytecode.
fn enter(vm: &mut Vm, thread: ThreadId, method: &MethodRef, args: &[JavaValue], result: BasicType) {
    let outcome = vm.call_java(thread, method, args, result).unwrap();
    assert!(matches!(outcome, CallOutcome::Dispatched { .. }), "{:?}", outcome);
}

fn resume_at(vm: &mut Vm, thread: ThreadId, entry: u64) -> CallOutcome {
    vm.cpu_mut(thread).unwrap().rip = entry;
    vm.run(thread).unwrap()
}

#[test]
fn return_entry_pops_the_arguments_and_continues_after_the_invoke() {
    let (mut vm, thread, holder) = vm();
    let caller = vm.define_method(MethodBuilder::new("caller", "()I", ACC_STATIC).code([0xb8, 0x00, 0x00, 0xac]).invoke_site(0, 2), holder).unwrap();
    let callee = vm.define_method(MethodBuilder::new("callee", "(II)I", ACC_STATIC).code([0x1a, 0xac]), holder).unwrap();
    enter(&mut vm, thread, &caller, &[], BasicType::Int);
    let before_invoke = vm.cpu(thread).unwrap().rsp();

    vm.invoke_from_interpreter(thread, &callee, &[JavaValue::Int(1), JavaValue::Int(2)], InvokeKind::Invoke, TosState::Itos).unwrap();
    let outgoing = vm.current_frame(thread).unwrap().last_sp;
    assert_eq!(outgoing, before_invoke - 16);

    // the callee's return: rsp anywhere below the arguments, the result in rax
    let rsp = vm.cpu(thread).unwrap().rsp();
    let return_entry = vm.memory.read_u64(rsp).unwrap();
    let cpu = vm.cpu_mut(thread).unwrap();
    cpu.set(RAX, 42);
    cpu.set(RSP, rsp - 64);
    assert_eq!(Some(return_entry), vm.registry.interpreter.return_entry(InvokeKind::Invoke, TosState::Itos).map(|entry| entry.raw()));

    assert_eq!(resume_at(&mut vm, thread, return_entry), CallOutcome::Dispatched { state: TosState::Itos, bytecode: 0xac });
    let frame = vm.current_frame(thread).unwrap();
    assert_eq!(frame.method, caller.address);
    assert_eq!(frame.last_sp, 0);
    let cpu = vm.cpu(thread).unwrap();
    assert_eq!(cpu.get(BCP), caller.bcp(3));
    assert_eq!(cpu.rsp(), before_invoke);
    assert_eq!(cpu.get(RAX), 42);
}

#[test]
fn deopt_entry_dispatches_after_the_instruction() {
    let (mut vm, thread, holder) = vm();
    let method = vm.define_method(MethodBuilder::new("resumed", "()V", ACC_STATIC).code([0x00, 0x03, 0x57, 0xb1]), holder).unwrap();
    enter(&mut vm, thread, &method, &[], BasicType::Void);
    let fp = vm.cpu(thread).unwrap().get(RBP);
    vm.memory.write_u64(fp.wrapping_add(slot_byte_offset(INTERPRETER_FRAME_LAST_SP_OFFSET) as i64 as u64), 0x1234).unwrap();

    let entry = vm.registry.interpreter.deopt_entry(TosState::Itos, 1).unwrap().raw();
    assert_eq!(resume_at(&mut vm, thread, entry), CallOutcome::Dispatched { state: TosState::Itos, bytecode: 0x03 });
    assert_eq!(vm.cpu(thread).unwrap().get(BCP), method.bcp(1));
    assert_eq!(vm.current_frame(thread).unwrap().last_sp, 0);
}

#[test]
fn deopt_entry_with_a_pending_exception_takes_the_throw_path() {
    let (mut vm, thread, holder) = vm();
    let handler = ExceptionTableEntry { start_bci: 0, end_bci: 2, handler_bci: 2, catch_kind: Some(ThrowableKind::ArithmeticException) };
    let method = vm.define_method(MethodBuilder::new("resumed", "()V", ACC_STATIC).code([0x00, 0x00, 0x57, 0xb1]).exception_handler(handler), holder).unwrap();
    enter(&mut vm, thread, &method, &[], BasicType::Void);
    let exception = vm.new_exception(ThrowableKind::ArithmeticException, Some("/ by zero")).unwrap();
    let layout = vm.runtime.thread(thread).unwrap().clone();
    vm.memory.write_u64(layout.field(THREAD_PENDING_EXCEPTION_OFFSET), exception).unwrap();

    let entry = vm.registry.interpreter.deopt_entry(TosState::Vtos, 1).unwrap().raw();
    assert_eq!(resume_at(&mut vm, thread, entry), CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x57 });
    assert!(vm.events().contains(&VmEvent::RuntimeCall(RuntimeEntry::ThrowPendingException)));
    assert_eq!(vm.current_frame(thread).unwrap().bcp, method.bcp(2));
    assert_eq!(vm.memory.read_u64(vm.cpu(thread).unwrap().rsp()).unwrap(), exception);
    assert_eq!(vm.pending_exception(thread).unwrap(), 0);
}

#[test]
fn deopt_entry_with_a_pending_exception_and_no_handler_unwinds() {
    let (mut vm, thread, holder) = vm();
    let method = vm.define_method(MethodBuilder::new("resumed", "()V", ACC_STATIC).code([0x00, 0xb1]), holder).unwrap();
    enter(&mut vm, thread, &method, &[], BasicType::Void);
    let exception = vm.new_exception(ThrowableKind::NullPointerException, None).unwrap();
    let layout = vm.runtime.thread(thread).unwrap().clone();
    vm.memory.write_u64(layout.field(THREAD_PENDING_EXCEPTION_OFFSET), exception).unwrap();

    let entry = vm.registry.interpreter.deopt_entry(TosState::Vtos, 0).unwrap().raw();
    let thrown = resume_at(&mut vm, thread, entry).thrown().unwrap();
    assert_eq!(vm.exception_kind(thrown), Some(ThrowableKind::NullPointerException));
    assert!(vm.events().contains(&VmEvent::RuntimeCall(RuntimeEntry::ThrowPendingException)));
}

fn pending_monitorenter(vm: &mut Vm, thread: ThreadId) -> u8 {
    let layout = vm.runtime.thread(thread).unwrap().clone();
    vm.memory.read_u8(layout.field(THREAD_PENDING_MONITORENTER_OFFSET)).unwrap()
}

fn request_monitorenter(vm: &mut Vm, thread: ThreadId) {
    let layout = vm.runtime.thread(thread).unwrap().clone();
    vm.memory.write_u8(layout.field(THREAD_PENDING_MONITORENTER_OFFSET), 1).unwrap();
}

#[test]
fn method_entry_deopt_takes_a_pending_method_lock() {
    let mut options = VmOptions::default();
    options.flags.enable_jvmci = true;
    let (mut vm, thread, holder) = vm_with(options);
    let method = vm.define_method(MethodBuilder::new("resumed", "()V", ACC_STATIC).code([0x00, 0xb1]), holder).unwrap();
    enter(&mut vm, thread, &method, &[], BasicType::Void);
    assert!(vm.current_frame(thread).unwrap().monitors.is_empty());
    request_monitorenter(&mut vm, thread);

    let entry = vm.registry.interpreter.deopt_entry(TosState::Vtos, 0).unwrap().raw();
    assert_eq!(resume_at(&mut vm, thread, entry), CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x00 });
    assert_eq!(pending_monitorenter(&mut vm, thread), 0);
    let mirror = vm.runtime.universe.mirror_of(holder).unwrap();
    let monitors = vm.current_frame(thread).unwrap().monitors;
    assert_eq!(monitors.len(), 1);
    assert_eq!(monitors[0].obj, mirror);
    assert!(vm.runtime.monitor(mirror).is_some());
    assert!(vm.events().contains(&VmEvent::RuntimeCall(RuntimeEntry::Monitorenter)));
}

#[test]
fn pending_method_lock_is_left_alone_without_jvmci() {
    let (mut vm, thread, holder) = vm();
    let method = vm.define_method(MethodBuilder::new("resumed", "()V", ACC_STATIC).code([0x00, 0xb1]), holder).unwrap();
    enter(&mut vm, thread, &method, &[], BasicType::Void);
    request_monitorenter(&mut vm, thread);

    let entry = vm.registry.interpreter.deopt_entry(TosState::Vtos, 0).unwrap().raw();
    assert_eq!(resume_at(&mut vm, thread, entry), CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x00 });
    assert_eq!(pending_monitorenter(&mut vm, thread), 1);
    assert!(vm.current_frame(thread).unwrap().monitors.is_empty());
}

/// Points the thread at its JVMTI state and requests an early return of `value` in `state`.
fn force_early_return(vm: &mut Vm, thread: ThreadId, state: TosState, value: u64) -> u64 {
    let layout = vm.runtime.thread(thread).unwrap().clone();
    let jvmti = layout.jvmti_state;
    vm.memory.write_u64(layout.field(THREAD_JVMTI_THREAD_STATE_OFFSET), jvmti).unwrap();
    vm.memory.write_u32(field(jvmti, JVMTI_EARLYRET_STATE_OFFSET), EARLYRET_PENDING).unwrap();
    vm.memory.write_u32(field(jvmti, JVMTI_EARLYRET_TOS_OFFSET), state.index() as u32).unwrap();
    let slot = if state == TosState::Atos { JVMTI_EARLYRET_OOP_OFFSET } else { JVMTI_EARLYRET_VALUE_OFFSET };
    vm.memory.write_u64(field(jvmti, slot), value).unwrap();
    jvmti
}

fn assert_early_return_cleared(vm: &Vm, jvmti: u64) {
    assert_eq!(vm.memory.read_u32(field(jvmti, JVMTI_EARLYRET_STATE_OFFSET)).unwrap(), EARLYRET_INACTIVE);
    assert_eq!(vm.memory.read_u32(field(jvmti, JVMTI_EARLYRET_TOS_OFFSET)).unwrap(), ILLEGAL_TOS);
    assert_eq!(vm.memory.read_u64(field(jvmti, JVMTI_EARLYRET_VALUE_OFFSET)).unwrap(), 0);
    assert_eq!(vm.memory.read_u64(field(jvmti, JVMTI_EARLYRET_OOP_OFFSET)).unwrap(), 0);
}

#[test]
fn earlyret_entry_returns_the_forced_int() {
    let (mut vm, thread, holder) = vm();
    let method = vm.define_method(MethodBuilder::new("forced", "(I)I", ACC_STATIC).code([0x1a, 0xac]), holder).unwrap();
    enter(&mut vm, thread, &method, &[JavaValue::Int(5)], BasicType::Int);
    let jvmti = force_early_return(&mut vm, thread, TosState::Itos, 77);

    let entry = vm.registry.interpreter.earlyret_entry(TosState::Itos).raw();
    assert_eq!(resume_at(&mut vm, thread, entry), CallOutcome::Returned(77));
    assert_early_return_cleared(&vm, jvmti);
}

#[test]
fn earlyret_entry_returns_the_forced_object() {
    let (mut vm, thread, holder) = vm();
    let object = vm.new_object(holder, 1).unwrap();
    let method = vm.define_method(MethodBuilder::new("forced", "()Ljava/lang/Object;", ACC_STATIC).code([0x01, 0xb0]), holder).unwrap();
    enter(&mut vm, thread, &method, &[], BasicType::Object);
    let jvmti = force_early_return(&mut vm, thread, TosState::Atos, object);

    let entry = vm.registry.interpreter.earlyret_entry(TosState::Atos).raw();
    assert_eq!(resume_at(&mut vm, thread, entry), CallOutcome::Returned(object));
    assert_early_return_cleared(&vm, jvmti);
}
