use proptest::prelude::*;
use strum::IntoEnumIterator;

use crate::basic_type::{result_handler_index, BasicType, TosState, RESULT_HANDLER_TYPES};
use crate::descriptor_parser::{parse_method_descriptor, DescriptorError, MethodSignature};
use crate::fingerprint::{Fingerprint, MAX_SIZE_OF_PARAMETERS};
use crate::method_kind::{IntrinsicId, MethodKind};
use crate::vm_layout::{ACC_ABSTRACT, ACC_NATIVE, ACC_STATIC, ACC_SYNCHRONIZED};

#[test]
fn parses_mixed_descriptor() {
    let signature = parse_method_descriptor("(IJ[Ljava/lang/String;DLjava/lang/Object;ZF)V").unwrap();
    assert_eq!(
        signature.parameter_types,
        vec![BasicType::Int, BasicType::Long, BasicType::Array, BasicType::Double, BasicType::Object, BasicType::Boolean, BasicType::Float]
    );
    assert_eq!(signature.return_type, BasicType::Void);
    assert_eq!(signature.size_of_parameters(), 9);
}

#[test]
fn rejects_malformed_descriptors() {
    assert!(matches!(parse_method_descriptor("I)V"), Err(DescriptorError::MissingOpenParen(_))));
    assert!(matches!(parse_method_descriptor("(Ljava/lang/String)V"), Err(DescriptorError::UnterminatedObject(_))));
    assert!(matches!(parse_method_descriptor("(Q)V"), Err(DescriptorError::InvalidType { .. })));
    assert!(matches!(parse_method_descriptor("(I)VV"), Err(DescriptorError::TrailingCharacters(_))));
    assert!(parse_method_descriptor("(I").is_err());
    assert!(parse_method_descriptor("").is_err());
    assert!(parse_method_descriptor("()").is_err());
}

#[test]
fn fingerprint_layout() {
    let signature = parse_method_descriptor("(IJ)D").unwrap();
    let fingerprint = Fingerprint::compute(&signature, true);
    // static bit, result type 7 (double), int 5, long 6, done 10
    let expected = 1 | (7 << 1) | (5 << 5) | (6 << 9) | (10 << 13);
    assert_eq!(fingerprint, Fingerprint::Fingerprint(expected));
    assert_eq!(fingerprint.is_static(), Some(true));
    assert_eq!(fingerprint.result_type(), Some(BasicType::Double));
    assert_eq!(fingerprint.parameters().unwrap().collect::<Vec<_>>(), vec![BasicType::Int, BasicType::Long]);
}

#[test]
fn fingerprint_ceiling_counts_receiver_and_wide_slots() {
    let at_ceiling = MethodSignature::new(vec![BasicType::Int; MAX_SIZE_OF_PARAMETERS as usize], BasicType::Int);
    assert!(matches!(Fingerprint::compute(&at_ceiling, true), Fingerprint::Fingerprint(_)));
    assert_eq!(Fingerprint::compute(&at_ceiling, false), Fingerprint::TooComplex);

    let longs = MethodSignature::new(vec![BasicType::Long; 7], BasicType::Void);
    assert_eq!(Fingerprint::compute(&longs, true), Fingerprint::TooComplex);
    let longs = MethodSignature::new(vec![BasicType::Long; 6], BasicType::Void);
    assert!(matches!(Fingerprint::compute(&longs, false), Fingerprint::Fingerprint(_)));
}

#[test]
fn fingerprint_cache_word() {
    assert_eq!(Fingerprint::from_raw(0), None);
    assert_eq!(Fingerprint::from_raw(u64::MAX), Some(Fingerprint::TooComplex));
    assert_eq!(Fingerprint::TooComplex.to_raw(), u64::MAX);
    assert_eq!(Fingerprint::TooComplex.parameters().map(|it| it.count()), None);
}

#[test]
fn arrays_share_object_result_handler() {
    assert_eq!(result_handler_index(BasicType::Array), result_handler_index(BasicType::Object));
    for (index, type_) in RESULT_HANDLER_TYPES.iter().enumerate() {
        assert_eq!(result_handler_index(*type_), index);
    }
}

#[test]
fn tos_states_round_trip_through_basic_types() {
    for state in TosState::iter() {
        assert_eq!(TosState::from_basic_type(state.as_basic_type()), state);
        assert_eq!(TosState::from_index(state.index()), Some(state));
    }
}

#[test]
fn method_kind_selection() {
    assert_eq!(MethodKind::select(ACC_ABSTRACT, IntrinsicId::None, &[]), MethodKind::Abstract);
    assert_eq!(MethodKind::select(ACC_NATIVE | ACC_STATIC, IntrinsicId::None, &[]), MethodKind::Native);
    assert_eq!(MethodKind::select(ACC_NATIVE | ACC_SYNCHRONIZED, IntrinsicId::None, &[]), MethodKind::NativeSynchronized);
    assert_eq!(MethodKind::select(ACC_NATIVE | ACC_STATIC, IntrinsicId::UpdateCrc32, &[]), MethodKind::JavaUtilZipCrc32Update);
    assert_eq!(MethodKind::select(ACC_SYNCHRONIZED, IntrinsicId::Dsqrt, &[0x2a, 0xb0]), MethodKind::ZerolocalsSynchronized);
    assert_eq!(MethodKind::select(ACC_STATIC, IntrinsicId::Dsqrt, &[0x18, 0x00, 0xaf]), MethodKind::JavaLangMathSqrt);
    assert_eq!(MethodKind::select(0, IntrinsicId::None, &[0xb1]), MethodKind::Empty);
    assert_eq!(MethodKind::select(0, IntrinsicId::None, &[0x2a, 0xb4, 0x00, 0x02, 0xac]), MethodKind::Accessor);
    assert_eq!(MethodKind::select(0, IntrinsicId::None, &[0x03, 0xac]), MethodKind::Zerolocals);
    assert_eq!(MethodKind::JavaLangMathSqrt.name(), "java_lang_math_sqrt");
}

fn field_type() -> impl Strategy<Value = (String, BasicType)> {
    prop_oneof![
        Just(("Z".to_string(), BasicType::Boolean)),
        Just(("B".to_string(), BasicType::Byte)),
        Just(("C".to_string(), BasicType::Char)),
        Just(("S".to_string(), BasicType::Short)),
        Just(("I".to_string(), BasicType::Int)),
        Just(("J".to_string(), BasicType::Long)),
        Just(("F".to_string(), BasicType::Float)),
        Just(("D".to_string(), BasicType::Double)),
        "[a-z]{1,8}(/[A-Z][a-z]{0,6}){0,2}".prop_map(|name| (format!("L{};", name), BasicType::Object)),
        Just(("[[I".to_string(), BasicType::Array)),
        Just(("[Ljava/lang/Object;".to_string(), BasicType::Array)),
    ]
}

proptest! {
    #[test]
    fn parsed_descriptor_matches_generated_types(parameters in prop::collection::vec(field_type(), 0..20), returns in field_type()) {
        let descriptor = format!("({}){}", parameters.iter().map(|(text, _)| text.as_str()).collect::<String>(), returns.0);
        let signature = parse_method_descriptor(descriptor.as_str()).unwrap();
        prop_assert_eq!(signature.parameter_types, parameters.iter().map(|(_, type_)| *type_).collect::<Vec<_>>());
        prop_assert_eq!(signature.return_type, returns.1);
    }

    #[test]
    fn fingerprint_keeps_parameter_order(parameters in prop::collection::vec(field_type(), 0..14), is_static: bool) {
        let signature = MethodSignature::new(parameters.iter().map(|(_, type_)| *type_).collect(), BasicType::Int);
        let receiver_slots = if is_static { 0 } else { 1 };
        match Fingerprint::compute(&signature, is_static) {
            Fingerprint::Fingerprint(raw) => {
                let fingerprint = Fingerprint::Fingerprint(raw);
                prop_assert!(signature.size_of_parameters() + receiver_slots <= MAX_SIZE_OF_PARAMETERS);
                prop_assert_eq!(fingerprint.is_static(), Some(is_static));
                let expected = signature.parameter_types.iter().map(|type_| type_.canonical_result_type()).collect::<Vec<_>>();
                prop_assert_eq!(fingerprint.parameters().unwrap().collect::<Vec<_>>(), expected);
            }
            Fingerprint::TooComplex => {
                prop_assert!(signature.size_of_parameters() + receiver_slots > MAX_SIZE_OF_PARAMETERS);
            }
        }
    }
}
