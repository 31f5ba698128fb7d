use std::cell::RefCell;
use std::rc::Rc;

use entry_asm::registers::{BCP, METHOD, SENDER_SP};
use entry_asm::runtime_entry::{RuntimeEntry, ThrowableKind};
use interpreter_common::basic_type::{BasicType, TosState};
use interpreter_common::method_kind::IntrinsicId;
use interpreter_common::vm_layout::{
    ThreadState, ACC_ABSTRACT, ACC_NATIVE, ACC_STATIC, ACC_SYNCHRONIZED, ARRAY_BASE_OFFSET, INVOCATION_COUNTER_COUNT_INCREMENT, METHOD_COUNTERS_INVOCATION_COUNTER_OFFSET,
    METHOD_DATA_INVOCATION_COUNTER_OFFSET, METHOD_METHOD_COUNTERS_OFFSET, METHOD_METHOD_DATA_OFFSET, METHOD_SIGNATURE_HANDLER_OFFSET, OOP_MARK_OFFSET, REFERENCE_REFERENT_OFFSET,
    STACK_GUARD_ENABLED, STACK_GUARD_YELLOW_RESERVED_DISABLED, THREAD_SATB_MARK_QUEUE_ACTIVE_OFFSET, THREAD_SATB_MARK_QUEUE_INDEX_OFFSET, THREAD_STACK_GUARD_STATE_OFFSET,
};
use template_interpreter::generator::InvokeKind;

use crate::address_map::COMPILED_CALLER_RETURN;
use crate::crc::{crc_table, update, CRC32_POLYNOMIAL};
use crate::heap::UNLOCKED_MARK;
use crate::metadata::MethodBuilder;
use crate::options::{CounterPolicy, VmOptions};
use crate::raw::field;
use crate::runtime::VmEvent;
use crate::thread::{ThreadId, SATB_BUFFER_SIZE};
use crate::vm::{CallOutcome, JavaValue, Vm};

fn vm() -> (Vm, ThreadId, u64) {
    let mut vm = Vm::new(VmOptions::default()).unwrap();
    let thread = vm.spawn_thread().unwrap();
    let holder = vm.define_class("Test").unwrap();
    (vm, thread, holder)
}

fn runtime_calls(events: &[VmEvent]) -> Vec<RuntimeEntry> {
    events
        .iter()
        .filter_map(|event| match event {
            VmEvent::RuntimeCall(entry) => Some(*entry),
            _ => None,
        })
        .collect()
}

fn count(events: &[VmEvent], matches: impl Fn(&VmEvent) -> bool) -> usize {
    events.iter().filter(|event| matches(event)).count()
}

/// A method whose first call overflows its profile's invocation counter.
fn about_to_overflow() -> MethodBuilder {
    let method_data = CounterPolicy::default().method_data();
    // the next increment leaves only zero bits under the mask
    let invocation_counter = method_data.invoke_mask;
    MethodBuilder::new("hot", "(I)V", ACC_STATIC).code([0x00, 0xb1]).method_data(interpreter_common::vm_layout::MethodData { invocation_counter, ..method_data })
}

#[test]
fn interpreted_call_builds_the_frame_and_dispatches_the_first_bytecode() {
    let (mut vm, thread, holder) = vm();
    let method = vm.define_method(MethodBuilder::new("add", "(II)I", ACC_STATIC).code([0x1a, 0x1b, 0x60, 0xac]).max_locals(4), holder).unwrap();
    let outcome = vm.call_java(thread, &method, &[JavaValue::Int(3), JavaValue::Int(-4)], BasicType::Int).unwrap();
    assert_eq!(outcome, CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x1a });

    let frame = vm.current_frame(thread).unwrap();
    assert_eq!(frame.method, method.address);
    assert_eq!(frame.bcp, method.code);
    assert_eq!(frame.bci(&vm.memory).unwrap(), Some(0));
    assert_eq!(frame.cache, method.cache);
    assert_eq!(frame.last_sp, 0);
    assert_eq!(frame.return_address, vm.registry.stubs.call_stub_return_address.raw());
    assert!(frame.monitors.is_empty());
    assert_eq!(vm.memory.read_u64(frame.local_address(0)).unwrap(), 3);
    assert_eq!(vm.memory.read_u64(frame.local_address(1)).unwrap() as i64, -4);
    for local in 2..4 {
        assert_eq!(vm.memory.read_u64(frame.local_address(local)).unwrap(), 0, "local {}", local);
    }
    assert_eq!(vm.cpu(thread).unwrap().get(BCP), method.code);
    assert!(vm.events().contains(&VmEvent::DispatchStarted { state: TosState::Vtos, bytecode: 0x1a }));
}

#[test]
fn method_counters_are_built_once() {
    let (mut vm, thread, holder) = vm();
    let method = vm.define_method(MethodBuilder::new("run", "()V", ACC_STATIC).code([0x00, 0xb1]), holder).unwrap();
    vm.call_java(thread, &method, &[], BasicType::Void).unwrap();
    assert!(runtime_calls(&vm.take_events()).contains(&RuntimeEntry::BuildMethodCounters));

    let counters = vm.memory.read_u64(field(method.address, METHOD_METHOD_COUNTERS_OFFSET)).unwrap();
    assert_ne!(counters, 0);
    let counter = field(counters, METHOD_COUNTERS_INVOCATION_COUNTER_OFFSET);
    assert_eq!(vm.memory.read_u32(counter).unwrap(), INVOCATION_COUNTER_COUNT_INCREMENT);

    vm.call_java(thread, &method, &[], BasicType::Void).unwrap();
    assert!(!runtime_calls(vm.events()).contains(&RuntimeEntry::BuildMethodCounters));
    assert_eq!(vm.memory.read_u32(counter).unwrap(), 2 * INVOCATION_COUNTER_COUNT_INCREMENT);
}

#[test]
fn saturated_counter_overflows_without_wrapping() {
    let (mut vm, thread, holder) = vm();
    let method_data = interpreter_common::vm_layout::MethodData { invocation_counter: 0xFFFF_FFE0, ..CounterPolicy::default().method_data() };
    let method = vm.define_method(MethodBuilder::new("busy", "()V", ACC_STATIC).code([0x00, 0xb1]).method_data(method_data), holder).unwrap();
    let mdo = vm.memory.read_u64(field(method.address, METHOD_METHOD_DATA_OFFSET)).unwrap();
    let counter = field(mdo, METHOD_DATA_INVOCATION_COUNTER_OFFSET);

    for expected in [0xFFFF_FFE8u32, 0xFFFF_FFF0, 0xFFFF_FFF8] {
        let outcome = vm.call_java(thread, &method, &[], BasicType::Void).unwrap();
        assert_eq!(outcome, CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x00 });
        assert_eq!(vm.memory.read_u32(counter).unwrap(), expected);
    }
    assert_eq!(count(&vm.take_events(), |event| matches!(event, VmEvent::CounterOverflow { .. })), 0);

    for _ in 0..2 {
        let outcome = vm.call_java(thread, &method, &[], BasicType::Void).unwrap();
        assert_eq!(outcome, CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x00 });
        assert_eq!(vm.memory.read_u32(counter).unwrap(), 0xFFFF_FFF8);
    }
    assert_eq!(count(vm.events(), |event| *event == VmEvent::CounterOverflow { method: method.address }), 2);
}

#[test]
fn counter_overflow_without_compiled_code_keeps_interpreting() {
    let (mut vm, thread, holder) = vm();
    let method = vm.define_method(about_to_overflow(), holder).unwrap();
    let outcome = vm.call_java(thread, &method, &[JavaValue::Int(1)], BasicType::Void).unwrap();
    assert_eq!(outcome, CallOutcome::Dispatched { state: TosState::Vtos, bytecode: 0x00 });
    assert!(runtime_calls(vm.events()).contains(&RuntimeEntry::FrequencyCounterOverflow));
    assert_eq!(vm.current_frame(thread).unwrap().method, method.address);
}

#[test]
fn counter_overflow_redoes_the_call_in_compiled_code() {
    let (mut vm, thread, holder) = vm();
    let method = vm.define_method(about_to_overflow(), holder).unwrap();
    let compiled = vm.set_compiled_entry(&method);
    let initial_sp = vm.runtime.thread(thread).unwrap().initial_sp();

    let outcome = vm.call_from_compiled(thread, &method, &[JavaValue::Int(5)]).unwrap();
    assert_eq!(outcome, CallOutcome::Compiled { entry: compiled });

    // exactly the state the compiled caller made the call in
    let cpu = vm.cpu(thread).unwrap();
    let sender_sp = initial_sp - 8;
    assert_eq!(cpu.get(SENDER_SP), sender_sp);
    assert_eq!(cpu.rsp(), sender_sp - 8);
    assert_eq!(cpu.get(METHOD), method.address);
    assert_eq!(vm.memory.read_u64(cpu.rsp()).unwrap(), COMPILED_CALLER_RETURN);
    assert_eq!(vm.memory.read_u64(sender_sp).unwrap(), 5);
}

#[test]
fn static_native_receives_mirror_and_arguments() {
    let (mut vm, thread, holder) = vm();
    let seen = Rc::new(RefCell::new(vec![]));
    let recorded = seen.clone();
    let native = vm.register_native("Test.sub", move |call| {
        let mirror = call.resolve(call.int_arg(1))?;
        recorded.borrow_mut().push((mirror, call.thread_state()?));
        let (a, b) = (call.int_arg(2) as i32, call.int_arg(3) as i32);
        call.return_value(a.wrapping_sub(b) as u32 as u64);
        Ok(())
    });
    let method = vm.define_method(MethodBuilder::new("sub", "(II)I", ACC_STATIC | ACC_NATIVE).native(native), holder).unwrap();

    let outcome = vm.call_java(thread, &method, &[JavaValue::Int(2), JavaValue::Int(9)], BasicType::Int).unwrap();
    assert_eq!(outcome.returned().map(|value| value as u32 as i32), Some(-7));
    let mirror = vm.runtime.universe.mirror_of(holder).unwrap();
    assert_eq!(seen.borrow().as_slice(), &[(mirror, Some(ThreadState::InNative))]);

    let transitions: Vec<_> = vm
        .events()
        .iter()
        .filter_map(|event| match event {
            VmEvent::ThreadStateChanged { to, .. } => *to,
            _ => None,
        })
        .collect();
    assert_eq!(transitions, vec![ThreadState::InNative, ThreadState::InNativeTrans, ThreadState::InJava]);
    assert_eq!(vm.runtime.thread(thread).unwrap().state(&vm.memory).unwrap(), Some(ThreadState::InJava));
}

#[test]
fn second_native_call_skips_the_slow_signature_handler() {
    let (mut vm, thread, holder) = vm();
    let native = vm.register_native("Test.mix", |call| {
        call.return_value(call.int_arg(2).wrapping_add(call.int_arg(3)));
        Ok(())
    });
    let method = vm.define_method(MethodBuilder::new("mix", "(JI)J", ACC_STATIC | ACC_NATIVE).native(native), holder).unwrap();
    let args = [JavaValue::Long(1 << 40), JavaValue::Int(3)];

    assert_eq!(vm.call_java(thread, &method, &args, BasicType::Long).unwrap().returned(), Some((1 << 40) + 3));
    let first = vm.take_events();
    assert!(runtime_calls(&first).contains(&RuntimeEntry::PrepareNativeCall));
    assert!(runtime_calls(&first).contains(&RuntimeEntry::SlowSignatureHandler));
    let handler = vm.memory.read_u64(field(method.address, METHOD_SIGNATURE_HANDLER_OFFSET)).unwrap();
    assert!(first.contains(&VmEvent::SignatureHandlerPromoted { method: method.address, handler: entry_asm::CodeAddress(handler) }));
    assert_ne!(handler, vm.registry.signature_handlers.slow_handler().raw());

    assert_eq!(vm.call_java(thread, &method, &args, BasicType::Long).unwrap().returned(), Some((1 << 40) + 3));
    let second = runtime_calls(vm.events());
    assert!(!second.contains(&RuntimeEntry::PrepareNativeCall));
    assert!(!second.contains(&RuntimeEntry::SlowSignatureHandler));
}

#[test]
fn unlinked_native_throws_unsatisfied_link_error() {
    let (mut vm, thread, holder) = vm();
    let method = vm.define_method(MethodBuilder::new("missing", "()V", ACC_STATIC | ACC_NATIVE), holder).unwrap();
    let exception = vm.call_java(thread, &method, &[], BasicType::Void).unwrap().thrown().unwrap();
    assert_eq!(vm.exception_kind(exception), Some(ThrowableKind::UnsatisfiedLinkError));
    assert_eq!(vm.exception_message(exception).as_deref(), Some("missing"));
    assert_eq!(vm.pending_exception(thread).unwrap(), 0);
}

#[test]
fn synchronized_native_holds_the_receiver_monitor_while_it_runs() {
    let (mut vm, thread, holder) = vm();
    let receiver = vm.new_object(holder, 1).unwrap();
    let marks = Rc::new(RefCell::new(vec![]));
    let recorded = marks.clone();
    let native = vm.register_native("Test.locked", move |call| {
        let receiver = call.resolve(call.int_arg(1))?;
        recorded.borrow_mut().push(call.memory.read_u64(field(receiver, OOP_MARK_OFFSET))?);
        Ok(())
    });
    let method = vm.define_method(MethodBuilder::new("locked", "()V", ACC_NATIVE | ACC_SYNCHRONIZED).native(native), holder).unwrap();

    let outcome = vm.call_java(thread, &method, &[JavaValue::Object(receiver)], BasicType::Void).unwrap();
    assert!(outcome.returned().is_some());
    let mark = marks.borrow()[0];
    assert_ne!(mark, UNLOCKED_MARK);
    assert_eq!(mark & 0b11, 0);

    let events = vm.events();
    assert_eq!(count(events, |event| matches!(event, VmEvent::MonitorEnter { obj, .. } if *obj == receiver)), 1);
    assert_eq!(count(events, |event| *event == VmEvent::MonitorExit { obj: receiver }), 1);
    assert!(vm.runtime.monitor(receiver).is_none());
    assert_eq!(vm.memory.read_u64(field(receiver, OOP_MARK_OFFSET)).unwrap(), UNLOCKED_MARK);
}

#[test]
fn exception_from_a_synchronized_native_releases_the_monitor() {
    let (mut vm, thread, holder) = vm();
    let native = vm.register_native("Test.fail", |call| call.throw_new(ThrowableKind::ArithmeticException, Some("/ by zero")));
    let method = vm.define_method(MethodBuilder::new("fail", "()I", ACC_STATIC | ACC_NATIVE | ACC_SYNCHRONIZED).native(native), holder).unwrap();
    let mirror = vm.runtime.universe.mirror_of(holder).unwrap();

    let exception = vm.call_java(thread, &method, &[], BasicType::Int).unwrap().thrown().unwrap();
    assert_eq!(vm.exception_kind(exception), Some(ThrowableKind::ArithmeticException));
    assert_eq!(vm.exception_message(exception).as_deref(), Some("/ by zero"));
    assert_eq!(count(vm.events(), |event| *event == VmEvent::MonitorExit { obj: mirror }), 1);
    assert!(vm.runtime.monitor(mirror).is_none());
    assert!(runtime_calls(vm.events()).contains(&RuntimeEntry::ThrowPendingException));
}

#[test]
fn yellow_zone_is_reguarded_after_the_native_returns() {
    let (mut vm, thread, holder) = vm();
    let native = vm.register_native("Test.deep", |call| {
        // what a stack overflow inside the native leaves behind
        call.memory.write_u32(call.thread.field(THREAD_STACK_GUARD_STATE_OFFSET), STACK_GUARD_YELLOW_RESERVED_DISABLED)?;
        call.return_double(2.5);
        Ok(())
    });
    let method = vm.define_method(MethodBuilder::new("deep", "()D", ACC_STATIC | ACC_NATIVE).native(native), holder).unwrap();

    let result = vm.call_java(thread, &method, &[], BasicType::Double).unwrap().returned().unwrap();
    assert_eq!(f64::from_bits(result), 2.5);
    assert!(vm.events().contains(&VmEvent::Reguard));
    let guard = vm.runtime.thread(thread).unwrap().field(THREAD_STACK_GUARD_STATE_OFFSET);
    assert_eq!(vm.memory.read_u32(guard).unwrap(), STACK_GUARD_ENABLED);
}

#[test]
fn object_result_survives_a_safepoint_during_the_transition() {
    let (mut vm, thread, holder) = vm();
    let object = vm.new_object(holder, 2).unwrap();
    let native = vm.register_native("Test.identity", |call| {
        let handle = call.int_arg(2);
        let object = call.resolve(handle)?;
        call.relocate_at_safepoint(object)?;
        call.return_value(handle);
        Ok(())
    });
    let method = vm.define_method(MethodBuilder::new("identity", "(Ljava/lang/Object;)Ljava/lang/Object;", ACC_STATIC | ACC_NATIVE).native(native), holder).unwrap();

    let result = vm.call_java(thread, &method, &[JavaValue::Object(object)], BasicType::Object).unwrap().returned().unwrap();
    let moved = vm
        .events()
        .iter()
        .find_map(|event| match event {
            VmEvent::ObjectRelocated { from, to } if *from == object => Some(*to),
            _ => None,
        })
        .unwrap();
    assert_ne!(moved, object);
    assert_eq!(result, moved);
    assert!(vm.events().contains(&VmEvent::NativeTransition { state: Some(ThreadState::InNativeTrans) }));
    assert!(runtime_calls(vm.events()).contains(&RuntimeEntry::CheckSpecialConditionForNativeTrans));
}

#[test]
fn reference_get_logs_the_referent_while_marking() {
    let (mut vm, thread, holder) = vm();
    let referent = vm.new_object(holder, 0).unwrap();
    let reference = vm.new_object(holder, 1).unwrap();
    vm.memory.write_u64(field(reference, REFERENCE_REFERENT_OFFSET), referent).unwrap();
    let method = vm.define_method(MethodBuilder::new("get", "()Ljava/lang/Object;", 0).intrinsic(IntrinsicId::ReferenceGet), holder).unwrap();
    let layout = vm.runtime.thread(thread).unwrap().clone();
    vm.memory.write_u8(layout.field(THREAD_SATB_MARK_QUEUE_ACTIVE_OFFSET), 1).unwrap();

    let result = vm.call_java(thread, &method, &[JavaValue::Object(reference)], BasicType::Object).unwrap();
    assert_eq!(result.returned(), Some(referent));
    let index = vm.memory.read_u64(layout.field(THREAD_SATB_MARK_QUEUE_INDEX_OFFSET)).unwrap();
    assert_eq!(index, SATB_BUFFER_SIZE - 8);
    assert_eq!(vm.memory.read_u64(layout.satb_buffer + index).unwrap(), referent);

    // a full buffer goes to the runtime
    vm.memory.write_u64(layout.field(THREAD_SATB_MARK_QUEUE_INDEX_OFFSET), 0).unwrap();
    vm.take_events();
    assert_eq!(vm.call_java(thread, &method, &[JavaValue::Object(reference)], BasicType::Object).unwrap().returned(), Some(referent));
    assert!(vm.events().contains(&VmEvent::G1PreBarrier { obj: referent }));
    assert_eq!(vm.memory.read_u64(layout.field(THREAD_SATB_MARK_QUEUE_INDEX_OFFSET)).unwrap(), SATB_BUFFER_SIZE);
}

#[test]
fn crc32_update_bytes_matches_the_table_driven_crc() {
    let (mut vm, thread, holder) = vm();
    let data = b"interpreter entries";
    let array = vm.runtime.universe.heap.allocate_array(&mut vm.memory, holder, "[B", 1, data.len() as u32).unwrap();
    vm.memory.write_bytes(array + ARRAY_BASE_OFFSET as u64, data).unwrap();
    let method = vm.define_method(MethodBuilder::new("updateBytes", "(I[BII)I", ACC_STATIC | ACC_NATIVE).intrinsic(IntrinsicId::UpdateBytesCrc32), holder).unwrap();

    let seed = update(&crc_table(CRC32_POLYNOMIAL), 0, b"the ");
    let args = [JavaValue::Int(seed as i32), JavaValue::Object(array), JavaValue::Int(12), JavaValue::Int(7)];
    let result = vm.call_java(thread, &method, &args, BasicType::Int).unwrap().returned().unwrap();
    assert_eq!(result as u32, update(&crc_table(CRC32_POLYNOMIAL), seed, b"entries"));
    assert!(runtime_calls(vm.events()).is_empty());
}

#[test]
fn math_intrinsics_agree_with_the_shared_runtime() {
    let (mut vm, thread, holder) = vm();
    let cases = [
        ("sin", IntrinsicId::Dsin, RuntimeEntry::Dsin, 0.75),
        ("cos", IntrinsicId::Dcos, RuntimeEntry::Dcos, -3.0),
        ("tan", IntrinsicId::Dtan, RuntimeEntry::Dtan, 1.25),
        ("log", IntrinsicId::Dlog, RuntimeEntry::Dlog, 10.0),
        ("log10", IntrinsicId::Dlog10, RuntimeEntry::Dlog10, 0.001),
        ("exp", IntrinsicId::Dexp, RuntimeEntry::Dexp, 2.0),
    ];
    for (name, intrinsic, entry, x) in cases {
        let method = vm.define_intrinsic(name, "(D)D", intrinsic, holder).unwrap();
        let result = vm.call_java(thread, &method, &[JavaValue::Double(x)], BasicType::Double).unwrap().returned().unwrap();
        assert_eq!(result, crate::entries::shared_math(entry, x, 0.0).to_bits(), "{:?}", intrinsic);
    }
    let pow = vm.define_intrinsic("pow", "(DD)D", IntrinsicId::Dpow, holder).unwrap();
    let result = vm.call_java(thread, &pow, &[JavaValue::Double(3.0), JavaValue::Double(0.5)], BasicType::Double).unwrap().returned().unwrap();
    assert_eq!(f64::from_bits(result), 3.0f64.powf(0.5));
}

#[test]
fn abstract_method_throws_in_its_caller() {
    let (mut vm, thread, holder) = vm();
    let callee = vm.define_method(MethodBuilder::new("shape", "()I", ACC_ABSTRACT), holder).unwrap();
    let caller = vm.define_method(MethodBuilder::new("draw", "(Ljava/lang/Object;)V", ACC_STATIC).code([0xb6, 0x00, 0x00, 0xb1]).invoke_site(0, 1), holder).unwrap();
    let receiver = vm.new_object(holder, 0).unwrap();

    vm.call_java(thread, &caller, &[JavaValue::Object(receiver)], BasicType::Void).unwrap();
    vm.invoke_from_interpreter(thread, &callee, &[JavaValue::Object(receiver)], InvokeKind::Invoke, TosState::Itos).unwrap();
    let exception = vm.run(thread).unwrap().thrown().unwrap();
    assert_eq!(vm.exception_kind(exception), Some(ThrowableKind::AbstractMethodError));
    assert_eq!(vm.exception_message(exception).as_deref(), Some("shape"));
}

#[test]
fn arguments_must_match_the_parameter_size() {
    let (mut vm, thread, holder) = vm();
    let method = vm.define_method(MethodBuilder::new("two", "(JI)V", ACC_STATIC).code([0xb1]), holder).unwrap();
    assert!(matches!(vm.call_java(thread, &method, &[JavaValue::Int(1), JavaValue::Int(2)], BasicType::Void), Err(crate::RuntimeError::ArgumentCount(_, 2))));
}
