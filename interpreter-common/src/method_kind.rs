use strum_macros::{EnumCount, EnumIter, IntoStaticStr};

use crate::vm_layout::{ACC_ABSTRACT, ACC_NATIVE, ACC_SYNCHRONIZED};

/// Which generated entry a method is routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumCount, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum MethodKind {
    Zerolocals,
    ZerolocalsSynchronized,
    Native,
    NativeSynchronized,
    Empty,
    Accessor,
    Abstract,
    JavaLangMathSin,
    JavaLangMathCos,
    JavaLangMathTan,
    JavaLangMathAbs,
    JavaLangMathSqrt,
    JavaLangMathLog,
    JavaLangMathLog10,
    JavaLangMathPow,
    JavaLangMathExp,
    JavaLangRefReferenceGet,
    JavaUtilZipCrc32Update,
    JavaUtilZipCrc32UpdateBytes,
    JavaUtilZipCrc32UpdateByteBuffer,
    JavaUtilZipCrc32cUpdateBytes,
    JavaUtilZipCrc32cUpdateDirectByteBuffer,
    JavaLangFloatIntBitsToFloat,
    JavaLangFloatFloatToRawIntBits,
    JavaLangDoubleLongBitsToDouble,
    JavaLangDoubleDoubleToRawLongBits,
}

/// Intrinsic ids the runtime tags methods with. Stored as a u16 on the method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[repr(u16)]
pub enum IntrinsicId {
    None = 0,
    Dsin = 1,
    Dcos = 2,
    Dtan = 3,
    Dabs = 4,
    Dsqrt = 5,
    Dlog = 6,
    Dlog10 = 7,
    Dpow = 8,
    Dexp = 9,
    ReferenceGet = 10,
    UpdateCrc32 = 11,
    UpdateBytesCrc32 = 12,
    UpdateByteBufferCrc32 = 13,
    UpdateBytesCrc32c = 14,
    UpdateDirectByteBufferCrc32c = 15,
    IntBitsToFloat = 16,
    FloatToRawIntBits = 17,
    LongBitsToDouble = 18,
    DoubleToRawLongBits = 19,
}

impl IntrinsicId {
    pub fn from_raw(raw: u16) -> IntrinsicId {
        use strum::IntoEnumIterator;
        IntrinsicId::iter().find(|id| *id as u16 == raw).unwrap_or(IntrinsicId::None)
    }
}

const ALOAD_0: u8 = 0x2a;
const GETFIELD: u8 = 0xb4;
const IRETURN: u8 = 0xac;
const ARETURN: u8 = 0xb0;
const RETURN: u8 = 0xb1;

impl MethodKind {
    /// Picks the entry for a method from its access flags, intrinsic id and bytecodes.
    pub fn select(access_flags: u32, intrinsic: IntrinsicId, code: &[u8]) -> MethodKind {
        if access_flags & ACC_ABSTRACT != 0 {
            return MethodKind::Abstract;
        }
        let synchronized = access_flags & ACC_SYNCHRONIZED != 0;
        if access_flags & ACC_NATIVE != 0 {
            // crc natives have interpreter intrinsics that fall back to the native entry
            if let Some(kind) = Self::for_native_intrinsic(intrinsic) {
                return kind;
            }
            return if synchronized { MethodKind::NativeSynchronized } else { MethodKind::Native };
        }
        if synchronized {
            return MethodKind::ZerolocalsSynchronized;
        }
        if let Some(kind) = Self::for_java_intrinsic(intrinsic) {
            return kind;
        }
        if code == [RETURN] {
            return MethodKind::Empty;
        }
        if code.len() == 5 && code[0] == ALOAD_0 && code[1] == GETFIELD && (code[4] == ARETURN || code[4] == IRETURN) {
            return MethodKind::Accessor;
        }
        MethodKind::Zerolocals
    }

    fn for_native_intrinsic(intrinsic: IntrinsicId) -> Option<MethodKind> {
        Some(match intrinsic {
            IntrinsicId::UpdateCrc32 => MethodKind::JavaUtilZipCrc32Update,
            IntrinsicId::UpdateBytesCrc32 => MethodKind::JavaUtilZipCrc32UpdateBytes,
            IntrinsicId::UpdateByteBufferCrc32 => MethodKind::JavaUtilZipCrc32UpdateByteBuffer,
            IntrinsicId::IntBitsToFloat => MethodKind::JavaLangFloatIntBitsToFloat,
            IntrinsicId::FloatToRawIntBits => MethodKind::JavaLangFloatFloatToRawIntBits,
            IntrinsicId::LongBitsToDouble => MethodKind::JavaLangDoubleLongBitsToDouble,
            IntrinsicId::DoubleToRawLongBits => MethodKind::JavaLangDoubleDoubleToRawLongBits,
            _ => return None,
        })
    }

    fn for_java_intrinsic(intrinsic: IntrinsicId) -> Option<MethodKind> {
        Some(match intrinsic {
            IntrinsicId::Dsin => MethodKind::JavaLangMathSin,
            IntrinsicId::Dcos => MethodKind::JavaLangMathCos,
            IntrinsicId::Dtan => MethodKind::JavaLangMathTan,
            IntrinsicId::Dabs => MethodKind::JavaLangMathAbs,
            IntrinsicId::Dsqrt => MethodKind::JavaLangMathSqrt,
            IntrinsicId::Dlog => MethodKind::JavaLangMathLog,
            IntrinsicId::Dlog10 => MethodKind::JavaLangMathLog10,
            IntrinsicId::Dpow => MethodKind::JavaLangMathPow,
            IntrinsicId::Dexp => MethodKind::JavaLangMathExp,
            IntrinsicId::ReferenceGet => MethodKind::JavaLangRefReferenceGet,
            IntrinsicId::UpdateBytesCrc32c => MethodKind::JavaUtilZipCrc32cUpdateBytes,
            IntrinsicId::UpdateDirectByteBufferCrc32c => MethodKind::JavaUtilZipCrc32cUpdateDirectByteBuffer,
            _ => return None,
        })
    }

    pub fn is_native(&self) -> bool {
        matches!(self, MethodKind::Native | MethodKind::NativeSynchronized)
    }

    pub fn is_synchronized(&self) -> bool {
        matches!(self, MethodKind::ZerolocalsSynchronized | MethodKind::NativeSynchronized)
    }

    pub fn is_math(&self) -> bool {
        matches!(
            self,
            MethodKind::JavaLangMathSin
                | MethodKind::JavaLangMathCos
                | MethodKind::JavaLangMathTan
                | MethodKind::JavaLangMathAbs
                | MethodKind::JavaLangMathSqrt
                | MethodKind::JavaLangMathLog
                | MethodKind::JavaLangMathLog10
                | MethodKind::JavaLangMathPow
                | MethodKind::JavaLangMathExp
        )
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }
}
