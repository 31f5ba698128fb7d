use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use strum_macros::{EnumIter, IntoStaticStr};

/// Basic types, numbered the way the rest of the runtime numbers them. These values end up in
/// fingerprints and in the result type word read by the call stub, so they are not renumberable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive, EnumIter, IntoStaticStr)]
#[repr(u8)]
pub enum BasicType {
    Boolean = 4,
    Char = 5,
    Float = 6,
    Double = 7,
    Byte = 8,
    Short = 9,
    Int = 10,
    Long = 11,
    Object = 12,
    Array = 13,
    Void = 14,
}

impl BasicType {
    pub fn from_code(code: u64) -> Option<Self> {
        Self::from_u64(code)
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_descriptor_char(char_: char) -> Option<Self> {
        Some(match char_ {
            'Z' => BasicType::Boolean,
            'B' => BasicType::Byte,
            'C' => BasicType::Char,
            'S' => BasicType::Short,
            'I' => BasicType::Int,
            'J' => BasicType::Long,
            'F' => BasicType::Float,
            'D' => BasicType::Double,
            'L' => BasicType::Object,
            '[' => BasicType::Array,
            'V' => BasicType::Void,
            _ => return None,
        })
    }

    pub fn descriptor_char(&self) -> char {
        match self {
            BasicType::Boolean => 'Z',
            BasicType::Byte => 'B',
            BasicType::Char => 'C',
            BasicType::Short => 'S',
            BasicType::Int => 'I',
            BasicType::Long => 'J',
            BasicType::Float => 'F',
            BasicType::Double => 'D',
            BasicType::Object => 'L',
            BasicType::Array => '[',
            BasicType::Void => 'V',
        }
    }

    /// Number of interpreter stack slots a value of this type occupies.
    pub fn size_in_slots(&self) -> i32 {
        match self {
            BasicType::Long | BasicType::Double => 2,
            BasicType::Void => 0,
            _ => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, BasicType::Object | BasicType::Array)
    }

    /// Types that travel in integer registers as 32 bit values.
    pub fn is_int_family(&self) -> bool {
        matches!(self, BasicType::Boolean | BasicType::Byte | BasicType::Char | BasicType::Short | BasicType::Int)
    }

    /// Arrays share the object result handler, everything else maps to itself.
    pub fn canonical_result_type(&self) -> BasicType {
        match self {
            BasicType::Array => BasicType::Object,
            other => *other,
        }
    }
}

/// The types that own a native result handler, in table order.
pub const RESULT_HANDLER_TYPES: [BasicType; 10] = [
    BasicType::Boolean,
    BasicType::Char,
    BasicType::Byte,
    BasicType::Short,
    BasicType::Int,
    BasicType::Long,
    BasicType::Void,
    BasicType::Float,
    BasicType::Double,
    BasicType::Object,
];

pub fn result_handler_index(type_: BasicType) -> usize {
    match type_.canonical_result_type() {
        BasicType::Boolean => 0,
        BasicType::Char => 1,
        BasicType::Byte => 2,
        BasicType::Short => 3,
        BasicType::Int => 4,
        BasicType::Long => 5,
        BasicType::Void => 6,
        BasicType::Float => 7,
        BasicType::Double => 8,
        BasicType::Object | BasicType::Array => 9,
    }
}

/// Top-of-stack state: what the interpreter caches in rax/xmm0 between bytecodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, EnumIter, IntoStaticStr)]
#[repr(u8)]
pub enum TosState {
    Btos = 0,
    Ztos = 1,
    Ctos = 2,
    Stos = 3,
    Itos = 4,
    Ltos = 5,
    Ftos = 6,
    Dtos = 7,
    Atos = 8,
    Vtos = 9,
}

pub const NUMBER_OF_STATES: usize = 10;

impl TosState {
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::from_usize(index)
    }

    pub fn as_basic_type(&self) -> BasicType {
        match self {
            TosState::Btos => BasicType::Byte,
            TosState::Ztos => BasicType::Boolean,
            TosState::Ctos => BasicType::Char,
            TosState::Stos => BasicType::Short,
            TosState::Itos => BasicType::Int,
            TosState::Ltos => BasicType::Long,
            TosState::Ftos => BasicType::Float,
            TosState::Dtos => BasicType::Double,
            TosState::Atos => BasicType::Object,
            TosState::Vtos => BasicType::Void,
        }
    }

    pub fn from_basic_type(type_: BasicType) -> Self {
        match type_ {
            BasicType::Byte => TosState::Btos,
            BasicType::Boolean => TosState::Ztos,
            BasicType::Char => TosState::Ctos,
            BasicType::Short => TosState::Stos,
            BasicType::Int => TosState::Itos,
            BasicType::Long => TosState::Ltos,
            BasicType::Float => TosState::Ftos,
            BasicType::Double => TosState::Dtos,
            BasicType::Object | BasicType::Array => TosState::Atos,
            BasicType::Void => TosState::Vtos,
        }
    }

    /// Sub-int states are carried in rax exactly like ints.
    pub fn is_int_like(&self) -> bool {
        matches!(self, TosState::Btos | TosState::Ztos | TosState::Ctos | TosState::Stos | TosState::Itos)
    }
}
