use crate::basic_type::BasicType;
use crate::descriptor_parser::MethodSignature;

pub const STATIC_FEATURE_SIZE: u32 = 1;
pub const IS_STATIC_BIT: u64 = 1;
pub const RESULT_FEATURE_SIZE: u32 = 4;
pub const RESULT_FEATURE_MASK: u64 = 0xF;
pub const PARAMETER_FEATURE_SIZE: u32 = 4;
pub const PARAMETER_FEATURE_MASK: u64 = 0xF;

/// The sign bit, the done marker, the result type and the static bit are reserved.
pub const MAX_SIZE_OF_PARAMETERS: i32 = ((64 - 1 - RESULT_FEATURE_SIZE - PARAMETER_FEATURE_SIZE - STATIC_FEATURE_SIZE) / PARAMETER_FEATURE_SIZE) as i32;

/// In-memory spelling of [`Fingerprint::TooComplex`] in the cached fingerprint word.
pub const TOO_COMPLEX_RAW: u64 = u64::MAX;
/// A zero cached word means the fingerprint has not been computed yet.
pub const NOT_COMPUTED_RAW: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ParameterCode {
    Bool = 1,
    Byte = 2,
    Char = 3,
    Short = 4,
    Int = 5,
    Long = 6,
    Float = 7,
    Double = 8,
    Object = 9,
    Done = 10,
}

impl ParameterCode {
    pub fn from_basic_type(type_: BasicType) -> Option<Self> {
        Some(match type_ {
            BasicType::Boolean => ParameterCode::Bool,
            BasicType::Byte => ParameterCode::Byte,
            BasicType::Char => ParameterCode::Char,
            BasicType::Short => ParameterCode::Short,
            BasicType::Int => ParameterCode::Int,
            BasicType::Long => ParameterCode::Long,
            BasicType::Float => ParameterCode::Float,
            BasicType::Double => ParameterCode::Double,
            BasicType::Object | BasicType::Array => ParameterCode::Object,
            BasicType::Void => return None,
        })
    }

    pub fn from_bits(bits: u64) -> Option<Self> {
        Some(match bits {
            1 => ParameterCode::Bool,
            2 => ParameterCode::Byte,
            3 => ParameterCode::Char,
            4 => ParameterCode::Short,
            5 => ParameterCode::Int,
            6 => ParameterCode::Long,
            7 => ParameterCode::Float,
            8 => ParameterCode::Double,
            9 => ParameterCode::Object,
            10 => ParameterCode::Done,
            _ => return None,
        })
    }

    pub fn basic_type(&self) -> Option<BasicType> {
        Some(match self {
            ParameterCode::Bool => BasicType::Boolean,
            ParameterCode::Byte => BasicType::Byte,
            ParameterCode::Char => BasicType::Char,
            ParameterCode::Short => BasicType::Short,
            ParameterCode::Int => BasicType::Int,
            ParameterCode::Long => BasicType::Long,
            ParameterCode::Float => BasicType::Float,
            ParameterCode::Double => BasicType::Double,
            ParameterCode::Object => BasicType::Object,
            ParameterCode::Done => return None,
        })
    }
}

/// Packed signature key. Anything that does not fit is `TooComplex` and must be walked from the
/// descriptor instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    Fingerprint(u64),
    TooComplex,
}

impl Fingerprint {
    pub fn compute(signature: &MethodSignature, is_static: bool) -> Fingerprint {
        let receiver_slots = if is_static { 0 } else { 1 };
        if signature.size_of_parameters() + receiver_slots > MAX_SIZE_OF_PARAMETERS {
            return Fingerprint::TooComplex;
        }
        let mut fingerprint = if is_static { IS_STATIC_BIT } else { 0 };
        fingerprint |= (signature.return_type.code() as u64 & RESULT_FEATURE_MASK) << STATIC_FEATURE_SIZE;
        let mut shift_count = STATIC_FEATURE_SIZE + RESULT_FEATURE_SIZE;
        for parameter in signature.parameter_types.iter() {
            let code = match ParameterCode::from_basic_type(*parameter) {
                Some(code) => code,
                None => return Fingerprint::TooComplex,
            };
            fingerprint |= (code as u64) << shift_count;
            shift_count += PARAMETER_FEATURE_SIZE;
        }
        fingerprint |= (ParameterCode::Done as u64) << shift_count;
        Fingerprint::Fingerprint(fingerprint)
    }

    /// Decodes the cached word of a method. `None` means nothing has been cached yet.
    pub fn from_raw(raw: u64) -> Option<Fingerprint> {
        match raw {
            NOT_COMPUTED_RAW => None,
            TOO_COMPLEX_RAW => Some(Fingerprint::TooComplex),
            raw => Some(Fingerprint::Fingerprint(raw)),
        }
    }

    pub fn to_raw(&self) -> u64 {
        match self {
            Fingerprint::Fingerprint(raw) => *raw,
            Fingerprint::TooComplex => TOO_COMPLEX_RAW,
        }
    }

    pub fn is_static(&self) -> Option<bool> {
        match self {
            Fingerprint::Fingerprint(raw) => Some(raw & IS_STATIC_BIT != 0),
            Fingerprint::TooComplex => None,
        }
    }

    pub fn result_type(&self) -> Option<BasicType> {
        match self {
            Fingerprint::Fingerprint(raw) => BasicType::from_code((raw >> STATIC_FEATURE_SIZE) & RESULT_FEATURE_MASK),
            Fingerprint::TooComplex => None,
        }
    }

    pub fn parameters(&self) -> Option<FingerprintParameters> {
        match self {
            Fingerprint::Fingerprint(raw) => Some(FingerprintParameters { remaining: raw >> (STATIC_FEATURE_SIZE + RESULT_FEATURE_SIZE) }),
            Fingerprint::TooComplex => None,
        }
    }

    /// Rebuilds the reduced signature. Objects and arrays both come back as `Object`.
    pub fn signature(&self) -> Option<MethodSignature> {
        Some(MethodSignature::new(self.parameters()?.collect(), self.result_type()?))
    }
}

/// Parameter walk over a fingerprint, stopping at the done marker.
#[derive(Debug, Clone)]
pub struct FingerprintParameters {
    remaining: u64,
}

impl Iterator for FingerprintParameters {
    type Item = BasicType;

    fn next(&mut self) -> Option<Self::Item> {
        let code = ParameterCode::from_bits(self.remaining & PARAMETER_FEATURE_MASK)?;
        self.remaining >>= PARAMETER_FEATURE_SIZE;
        code.basic_type()
    }
}
