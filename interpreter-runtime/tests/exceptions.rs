use entry_asm::registers::RSP;
use entry_asm::runtime_entry::{RuntimeEntry, ThrowableKind};
use interpreter_common::basic_type::{BasicType, TosState};
use interpreter_common::frame_layout::{slot_byte_offset, INTERPRETER_FRAME_LAST_SP_OFFSET, OVERFLOW_CHECK_OVERHEAD_SIZE};
use interpreter_common::vm_layout::{
    ACC_STATIC, METHOD_INTERPRETER_ENTRY_OFFSET, POPFRAME_FORCE_DEOPT_REEXECUTION_BIT, POPFRAME_INACTIVE, THREAD_POPFRAME_CONDITION_OFFSET, THREAD_POPFRAME_PRESERVED_ARGS_OFFSET,
    THREAD_POPFRAME_PRESERVED_ARGS_SIZE_OFFSET, THREAD_STACK_BASE_OFFSET, THREAD_STACK_SIZE_OFFSET,
};
use interpreter_runtime::raw::field;
use interpreter_runtime::{CallOutcome, ExceptionTableEntry, JavaValue, MethodBuilder, ThreadId, Vm, VmEvent, VmOptions};
use template_interpreter::generator::InvokeKind;

fn vm() -> (Vm, ThreadId, u64) {
    let mut vm = Vm::new(VmOptions::default()).unwrap();
    let thread = vm.spawn_thread().unwrap();
    let holder = vm.define_class("Thrower").unwrap();
    (vm, thread, holder)
}

fn catch_npe(start_bci: u16, end_bci: u16, handler_bci: u16) -> ExceptionTableEntry {
    ExceptionTableEntry { start_bci, end_bci, handler_bci, catch_kind: Some(ThrowableKind::NullPointerException) }
}

fn throw_npe(vm: &mut Vm, thread: ThreadId) -> CallOutcome {
    vm.cpu_mut(thread).unwrap().rip = vm.registry.interpreter.exceptions.throw_null_pointer_exception.raw();
    vm.run(thread).unwrap()
}

#[test]
fn handler_in_the_throwing_frame() {
    let (mut vm, thread, holder) = vm();
    let method = vm.define_method(MethodBuilder::new("guarded", "()V", ACC_STATIC).code([0x01, 0x57, 0xb1]).exception_handler(catch_npe(0, 2, 1)), holder).unwrap();
    let outcome = vm.call_java(thread, &method, &[], BasicType::Void).unwrap();
    assert_eq!(outcome, CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x01 });

    let outcome = throw_npe(&mut vm, thread);
    assert_eq!(outcome, CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x57 });
    let frame = vm.current_frame(thread).unwrap();
    assert_eq!(frame.bcp, method.bcp(1));
    let exception = vm.memory.read_u64(vm.cpu(thread).unwrap().rsp()).unwrap();
    assert_eq!(vm.exception_kind(exception), Some(ThrowableKind::NullPointerException));
    assert_eq!(vm.pending_exception(thread).unwrap(), 0);
}

#[test]
fn handler_of_another_kind_does_not_catch() {
    let (mut vm, thread, holder) = vm();
    let arithmetic = ExceptionTableEntry { start_bci: 0, end_bci: 2, handler_bci: 1, catch_kind: Some(ThrowableKind::ArithmeticException) };
    let method = vm.define_method(MethodBuilder::new("guarded", "()V", ACC_STATIC).code([0x00, 0x00, 0xb1]).exception_handler(arithmetic), holder).unwrap();
    vm.call_java(thread, &method, &[], BasicType::Void).unwrap();

    let exception = throw_npe(&mut vm, thread).thrown().unwrap();
    assert_eq!(vm.exception_kind(exception), Some(ThrowableKind::NullPointerException));
}

#[test]
fn exception_is_rethrown_in_the_interpreted_caller() {
    let (mut vm, thread, holder) = vm();
    let catch_all = ExceptionTableEntry { start_bci: 0, end_bci: 3, handler_bci: 3, catch_kind: None };
    let caller = vm
        .define_method(MethodBuilder::new("caller", "()V", ACC_STATIC).code([0xb8, 0x00, 0x00, 0x57, 0xb1]).invoke_site(0, 0).exception_handler(catch_all), holder)
        .unwrap();
    let callee = vm.define_method(MethodBuilder::new("callee", "()V", ACC_STATIC).code([0x00, 0xb1]), holder).unwrap();

    assert_eq!(vm.call_java(thread, &caller, &[], BasicType::Void).unwrap(), CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0xb8 });
    vm.invoke_from_interpreter(thread, &callee, &[], InvokeKind::Invoke, TosState::Vtos).unwrap();
    assert_eq!(vm.run(thread).unwrap(), CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x00 });
    assert_eq!(vm.current_frame(thread).unwrap().method, callee.address);

    let outcome = throw_npe(&mut vm, thread);
    assert_eq!(outcome, CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x57 });
    let frame = vm.current_frame(thread).unwrap();
    assert_eq!(frame.method, caller.address);
    assert_eq!(frame.bcp, caller.bcp(3));
    assert_eq!(frame.last_sp, 0);
    let exception = vm.memory.read_u64(vm.cpu(thread).unwrap().rsp()).unwrap();
    assert_eq!(vm.exception_kind(exception), Some(ThrowableKind::NullPointerException));
    assert_eq!(vm.interpreter_frames(thread).unwrap().len(), 1);
}

#[test]
fn uncaught_exception_reaches_the_call_stub() {
    let (mut vm, thread, holder) = vm();
    let method = vm.define_method(MethodBuilder::new("plain", "(I)V", ACC_STATIC).code([0x00, 0xb1]), holder).unwrap();
    vm.call_java(thread, &method, &[JavaValue::Int(4)], BasicType::Void).unwrap();

    let exception = throw_npe(&mut vm, thread).thrown().unwrap();
    assert_eq!(vm.exception_kind(exception), Some(ThrowableKind::NullPointerException));
    assert!(vm.events().contains(&VmEvent::RuntimeCall(RuntimeEntry::ExceptionHandlerForReturnAddress)));
}

#[test]
fn exception_unwinds_into_a_compiled_caller() {
    let (mut vm, thread, holder) = vm();
    let method = vm.define_method(MethodBuilder::new("plain", "()V", ACC_STATIC).code([0x00, 0xb1]), holder).unwrap();
    assert_eq!(vm.call_from_compiled(thread, &method, &[]).unwrap(), CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x00 });

    let exception = throw_npe(&mut vm, thread).thrown().unwrap();
    assert_eq!(vm.exception_kind(exception), Some(ThrowableKind::NullPointerException));
}

const EXTRA_LOCALS: u16 = 600;

fn deep(vm: &mut Vm, holder: u64, extra_locals: u16) -> interpreter_runtime::MethodRef {
    vm.define_method(MethodBuilder::new("deep", "()V", ACC_STATIC).code([0x00, 0xb1]).max_locals(extra_locals), holder).unwrap()
}

/// Stops `thread` at the interpreter entry of `method` and answers rsp there.
fn stop_at_entry(vm: &mut Vm, thread: ThreadId, method: &interpreter_runtime::MethodRef) -> u64 {
    vm.prepare_call(thread, method, &[], BasicType::Void).unwrap();
    let entry = vm.memory.read_u64(field(method.address, METHOD_INTERPRETER_ENTRY_OFFSET)).unwrap();
    vm.run_to(thread, entry).unwrap();
    vm.cpu(thread).unwrap().rsp()
}

/// Sets the stack size so the overflow limit for `EXTRA_LOCALS` lands `offset` bytes above `rsp`.
fn limit_at(vm: &mut Vm, thread: ThreadId, rsp: u64, offset: i64) {
    let layout = vm.runtime.thread(thread).unwrap().clone();
    let stack_base = vm.memory.read_u64(layout.field(THREAD_STACK_BASE_OFFSET)).unwrap();
    let frame_bytes = EXTRA_LOCALS as u64 * 8 + OVERFLOW_CHECK_OVERHEAD_SIZE as u64;
    let stack_size = (frame_bytes + stack_base + vm.options().flags.max_bang_size() as u64 - rsp) as i64 - offset;
    vm.memory.write_u64(layout.field(THREAD_STACK_SIZE_OFFSET), stack_size as u64).unwrap();
}

#[test]
fn frame_ending_exactly_at_the_stack_limit_fits() {
    let (mut vm, thread, holder) = vm();
    let method = deep(&mut vm, holder, EXTRA_LOCALS);
    let rsp = stop_at_entry(&mut vm, thread, &method);
    limit_at(&mut vm, thread, rsp, 0);
    assert_eq!(vm.run(thread).unwrap(), CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x00 });
    assert!(!vm.events().contains(&VmEvent::RuntimeCall(RuntimeEntry::ThrowStackOverflowError)));
}

#[test]
fn frame_one_word_short_of_the_stack_limit_fits() {
    let (mut vm, thread, holder) = vm();
    let method = deep(&mut vm, holder, EXTRA_LOCALS);
    let rsp = stop_at_entry(&mut vm, thread, &method);
    limit_at(&mut vm, thread, rsp, -8);
    assert_eq!(vm.run(thread).unwrap(), CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x00 });
}

#[test]
fn frame_one_word_past_the_stack_limit_throws() {
    let (mut vm, thread, holder) = vm();
    let method = deep(&mut vm, holder, EXTRA_LOCALS);
    let rsp = stop_at_entry(&mut vm, thread, &method);
    limit_at(&mut vm, thread, rsp, 8);

    vm.run_to(thread, vm.registry.stubs.catch_exception_entry.raw()).unwrap();
    // the caller's sp, without the return address
    assert_eq!(vm.cpu(thread).unwrap().rsp(), rsp + 8);
    let exception = vm.run(thread).unwrap().thrown().unwrap();
    assert_eq!(vm.exception_kind(exception), Some(ThrowableKind::StackOverflowError));
    assert!(vm.events().contains(&VmEvent::RuntimeCall(RuntimeEntry::ThrowStackOverflowError)));

    // same thread, same limit: one local fewer moves the frame end back onto the limit
    let fits = deep(&mut vm, holder, EXTRA_LOCALS - 1);
    assert_eq!(stop_at_entry(&mut vm, thread, &fits), rsp);
    assert_eq!(vm.run(thread).unwrap(), CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x00 });
}

#[test]
fn small_frames_skip_the_stack_overflow_check() {
    let (mut vm, thread, holder) = vm();
    let method = deep(&mut vm, holder, 8);
    let layout = vm.runtime.thread(thread).unwrap().clone();
    // a limit that any checked frame would exceed
    vm.memory.write_u64(layout.field(THREAD_STACK_SIZE_OFFSET), 0).unwrap();
    assert_eq!(vm.call_java(thread, &method, &[], BasicType::Void).unwrap(), CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x00 });
}

#[test]
fn pop_frame_reexecutes_the_interpreted_invoke() {
    let (mut vm, thread, holder) = vm();
    let caller = vm.define_method(MethodBuilder::new("caller", "()V", ACC_STATIC).code([0xb8, 0x00, 0x00, 0xb1]).max_locals(2).invoke_site(0, 2), holder).unwrap();
    let callee = vm.define_method(MethodBuilder::new("callee", "(II)V", ACC_STATIC).code([0x00, 0xb1]), holder).unwrap();

    assert_eq!(vm.call_java(thread, &caller, &[], BasicType::Void).unwrap(), CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0xb8 });
    // two expression stack words of the caller: the slots its invoke takes the arguments from
    let expression_stack = vm.cpu(thread).unwrap().rsp() - 16;
    vm.memory.write_u64(expression_stack, 0xdead).unwrap();
    vm.memory.write_u64(expression_stack + 8, 0xbeef).unwrap();
    vm.cpu_mut(thread).unwrap().set(RSP, expression_stack);

    // the arguments land below them, as when the call went through an extending adapter
    vm.invoke_from_interpreter(thread, &callee, &[JavaValue::Int(11), JavaValue::Int(22)], InvokeKind::Invoke, TosState::Vtos).unwrap();
    assert_eq!(vm.run(thread).unwrap(), CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x00 });

    let frames = vm.interpreter_frames(thread).unwrap();
    assert_eq!(frames.len(), 2);
    let caller_frame = &frames[1];
    let outgoing = caller_frame.last_sp;
    assert_eq!(outgoing, expression_stack - 16);
    assert_eq!(vm.memory.read_u64(outgoing).unwrap(), 22);
    assert_eq!(vm.memory.read_u64(outgoing + 8).unwrap(), 11);
    let last_sp_slot = caller_frame.fp.wrapping_add(slot_byte_offset(INTERPRETER_FRAME_LAST_SP_OFFSET) as i64 as u64);
    vm.memory.write_u64(last_sp_slot, expression_stack).unwrap();

    vm.cpu_mut(thread).unwrap().rip = vm.registry.interpreter.exceptions.remove_activation_preserving_args.raw();
    assert_eq!(vm.run(thread).unwrap(), CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0xb8 });

    let frame = vm.current_frame(thread).unwrap();
    assert_eq!(frame.method, caller.address);
    assert_eq!(frame.bcp, caller.bcp(0));
    assert_eq!(frame.last_sp, 0);
    assert_eq!(vm.cpu(thread).unwrap().rsp(), expression_stack);
    assert_eq!(vm.memory.read_u64(expression_stack).unwrap(), 22);
    assert_eq!(vm.memory.read_u64(expression_stack + 8).unwrap(), 11);
    let layout = vm.runtime.thread(thread).unwrap().clone();
    assert_eq!(vm.memory.read_u32(layout.field(THREAD_POPFRAME_CONDITION_OFFSET)).unwrap(), POPFRAME_INACTIVE);
    assert!(vm.events().contains(&VmEvent::RuntimeCall(RuntimeEntry::PopframeMoveOutgoingArgs)));
    assert_eq!(vm.interpreter_frames(thread).unwrap().len(), 1);
}

#[test]
fn pop_frame_preserves_arguments_for_a_compiled_caller() {
    let (mut vm, thread, holder) = vm();
    let method = vm.define_method(MethodBuilder::new("callee", "(II)V", ACC_STATIC).code([0x00, 0xb1]), holder).unwrap();
    assert_eq!(vm.call_from_compiled(thread, &method, &[JavaValue::Int(9), JavaValue::Int(7)]).unwrap(), CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x00 });

    vm.cpu_mut(thread).unwrap().rip = vm.registry.interpreter.exceptions.remove_activation_preserving_args.raw();
    assert!(matches!(vm.run(thread).unwrap(), CallOutcome::Returned(_)));

    let layout = vm.runtime.thread(thread).unwrap().clone();
    let preserved = vm.memory.read_u64(layout.field(THREAD_POPFRAME_PRESERVED_ARGS_OFFSET)).unwrap();
    assert_eq!(preserved, layout.preserved_args);
    assert_eq!(vm.memory.read_u64(layout.field(THREAD_POPFRAME_PRESERVED_ARGS_SIZE_OFFSET)).unwrap(), 16);
    // lowest address first: the last argument, then the first
    assert_eq!(vm.memory.read_u64(preserved).unwrap(), 7);
    assert_eq!(vm.memory.read_u64(preserved + 8).unwrap(), 9);
    assert_eq!(vm.memory.read_u32(layout.field(THREAD_POPFRAME_CONDITION_OFFSET)).unwrap(), POPFRAME_FORCE_DEOPT_REEXECUTION_BIT);
}
