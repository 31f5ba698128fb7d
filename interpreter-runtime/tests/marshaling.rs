use std::cell::RefCell;
use std::rc::Rc;

use entry_asm::runtime_entry::RuntimeEntry;
use interpreter_common::basic_type::BasicType;
use interpreter_common::fingerprint::Fingerprint;
use interpreter_common::vm_layout::{ACC_NATIVE, ACC_STATIC, CONST_METHOD_FINGERPRINT_OFFSET};
use interpreter_runtime::raw::field;
use interpreter_runtime::{JavaValue, MethodBuilder, NativeCall, RuntimeError, Vm, VmEvent, VmOptions};
use native_signature::iterator::NativeSignatureIterator;
use native_signature::plan::{MarshalingPlan, Placement};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Argument {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Object(bool),
}

impl Argument {
    fn descriptor(&self) -> &'static str {
        match self {
            Argument::Boolean(_) => "Z",
            Argument::Byte(_) => "B",
            Argument::Char(_) => "C",
            Argument::Short(_) => "S",
            Argument::Int(_) => "I",
            Argument::Long(_) => "J",
            Argument::Float(_) => "F",
            Argument::Double(_) => "D",
            Argument::Object(_) => "Ljava/lang/Object;",
        }
    }

    fn value(&self, object: u64) -> JavaValue {
        match *self {
            Argument::Boolean(value) => JavaValue::Int(value as i32),
            Argument::Byte(value) => JavaValue::Int(value as i32),
            Argument::Char(value) => JavaValue::Int(value as i32),
            Argument::Short(value) => JavaValue::Int(value as i32),
            Argument::Int(value) => JavaValue::Int(value),
            Argument::Long(value) => JavaValue::Long(value),
            Argument::Float(value) => JavaValue::Float(value),
            Argument::Double(value) => JavaValue::Double(value),
            Argument::Object(present) => JavaValue::Object(if present { object } else { 0 }),
        }
    }
}

fn argument() -> impl Strategy<Value = Argument> {
    prop_oneof![
        any::<bool>().prop_map(Argument::Boolean),
        any::<i8>().prop_map(Argument::Byte),
        any::<u16>().prop_map(Argument::Char),
        any::<i16>().prop_map(Argument::Short),
        any::<i32>().prop_map(Argument::Int),
        any::<i64>().prop_map(Argument::Long),
        any::<u32>().prop_map(|bits| Argument::Float(f32::from_bits(bits))),
        any::<u64>().prop_map(|bits| Argument::Double(f64::from_bits(bits))),
        any::<bool>().prop_map(Argument::Object),
    ]
}

/// What the native saw at every location the marshaling plan names, cut to the argument's
/// width. Handles are resolved, since the two calls may use different slots.
fn recorder(plan: MarshalingPlan, seen: Rc<RefCell<Vec<Vec<u64>>>>) -> impl FnMut(&mut NativeCall<'_>) -> Result<(), RuntimeError> + 'static {
    move |call| {
        let mut values = vec![];
        for move_ in &plan.moves {
            let raw = match move_.destination {
                Placement::IntRegister(register) => call.cpu.get(register),
                Placement::FloatRegister(register) => call.cpu.xmm(register),
                Placement::Stack(word) => call.stack_arg(word)?,
            };
            let value = if move_.handlized {
                call.resolve(raw)?
            } else if move_.width.bytes() < 8 {
                raw & ((1u64 << (move_.width.bytes() * 8)) - 1)
            } else {
                raw
            };
            values.push(value);
        }
        seen.borrow_mut().push(values);
        Ok(())
    }
}

fn check_both_handler_paths(arguments: &[Argument]) -> Result<(), TestCaseError> {
    let descriptor = format!("({})V", arguments.iter().map(Argument::descriptor).collect::<String>());
    let plan = MarshalingPlan::of(&NativeSignatureIterator::from_descriptor(&descriptor, true).unwrap());

    let mut vm = Vm::new(VmOptions::default()).unwrap();
    let thread = vm.spawn_thread().unwrap();
    let holder = vm.define_class("Marshal").unwrap();
    let object = vm.new_object(holder, 1).unwrap();
    let seen = Rc::new(RefCell::new(vec![]));
    let first = vm.register_native("Marshal.first", recorder(plan.clone(), seen.clone()));
    let second = vm.register_native("Marshal.second", recorder(plan, seen.clone()));
    let first = vm.define_method(MethodBuilder::new("first", descriptor.as_str(), ACC_STATIC | ACC_NATIVE).native(first), holder).unwrap();
    let second = vm.define_method(MethodBuilder::new("second", descriptor.as_str(), ACC_STATIC | ACC_NATIVE).native(second), holder).unwrap();
    let args = arguments.iter().map(|argument| argument.value(object)).collect::<Vec<_>>();

    prop_assert!(vm.call_java(thread, &first, &args, BasicType::Void).unwrap().returned().is_some());
    let first_events = vm.take_events();
    prop_assert!(first_events.contains(&VmEvent::RuntimeCall(RuntimeEntry::SlowSignatureHandler)));
    let promoted = first_events.iter().any(|event| matches!(event, VmEvent::SignatureHandlerPromoted { .. }));

    prop_assert!(vm.call_java(thread, &second, &args, BasicType::Void).unwrap().returned().is_some());
    if promoted {
        prop_assert!(!vm.events().contains(&VmEvent::RuntimeCall(RuntimeEntry::SlowSignatureHandler)));
    }

    let seen = seen.borrow();
    prop_assert_eq!(seen.len(), 2);
    prop_assert_eq!(&seen[0], &seen[1]);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn generated_and_slow_handlers_marshal_alike(arguments in prop::collection::vec(argument(), 0..12)) {
        check_both_handler_paths(&arguments)?;
    }
}

#[test]
fn arguments_beyond_the_registers_go_to_the_stack() {
    let arguments = [
        Argument::Long(-1),
        Argument::Int(2),
        Argument::Object(true),
        Argument::Int(-3),
        Argument::Short(-4),
        Argument::Double(0.5),
        Argument::Byte(-6),
        Argument::Object(false),
        Argument::Float(-0.0),
    ];
    check_both_handler_paths(&arguments).unwrap();
}

#[test]
fn cached_fingerprint_is_replayed_instead_of_the_descriptor() {
    let mut vm = Vm::new(VmOptions::default()).unwrap();
    let thread = vm.spawn_thread().unwrap();
    let holder = vm.define_class("Marshal").unwrap();
    let seen = Rc::new(RefCell::new(vec![]));
    let record = seen.clone();
    let native = vm.register_native("Marshal.shape", move |call: &mut NativeCall<'_>| {
        record.borrow_mut().push(call.float_arg(0) & 0xffff_ffff);
        Ok(())
    });
    let method = vm.define_method(MethodBuilder::new("shape", "(I)V", ACC_STATIC | ACC_NATIVE).native(native), holder).unwrap();
    let cache = field(method.const_method, CONST_METHOD_FINGERPRINT_OFFSET);
    assert_eq!(Fingerprint::from_raw(vm.memory.read_u64(cache).unwrap()), None);

    // a float shape of the same size: only the cached word can send the argument to xmm0
    let cached = NativeSignatureIterator::from_descriptor("(F)V", true).unwrap().fingerprint();
    vm.memory.write_u64(cache, cached.to_raw()).unwrap();
    let bits = 1.5f32.to_bits();
    for _ in 0..2 {
        assert!(vm.call_java(thread, &method, &[JavaValue::Int(bits as i32)], BasicType::Void).unwrap().returned().is_some());
    }
    assert_eq!(*seen.borrow(), vec![bits as u64, bits as u64]);
    assert_eq!(Fingerprint::from_raw(vm.memory.read_u64(cache).unwrap()), Some(cached));
    assert!(vm.events().contains(&VmEvent::RuntimeCall(RuntimeEntry::SlowSignatureHandler)));
}

#[test]
fn fingerprint_is_cached_on_the_first_call() {
    let mut vm = Vm::new(VmOptions::default()).unwrap();
    let thread = vm.spawn_thread().unwrap();
    let holder = vm.define_class("Marshal").unwrap();
    let native = vm.register_native("Marshal.pair", |_call: &mut NativeCall<'_>| Ok(()));
    let method = vm.define_method(MethodBuilder::new("pair", "(JLjava/lang/Object;)V", ACC_STATIC | ACC_NATIVE).native(native), holder).unwrap();
    vm.call_java(thread, &method, &[JavaValue::Long(3), JavaValue::Object(0)], BasicType::Void).unwrap();

    let expected = NativeSignatureIterator::from_descriptor("(JLjava/lang/Object;)V", true).unwrap().fingerprint();
    let cached = vm.memory.read_u64(field(method.const_method, CONST_METHOD_FINGERPRINT_OFFSET)).unwrap();
    assert_eq!(Fingerprint::from_raw(cached), Some(expected));
}
