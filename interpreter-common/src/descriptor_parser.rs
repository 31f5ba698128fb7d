use std::fmt::{Display, Formatter};

use itertools::Itertools;
use thiserror::Error;

use crate::basic_type::BasicType;

/// A method descriptor reduced to what calling convention code cares about: arrays and classes
/// are both references, and class names are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub parameter_types: Vec<BasicType>,
    pub return_type: BasicType,
}

impl MethodSignature {
    pub fn new(parameter_types: Vec<BasicType>, return_type: BasicType) -> Self {
        Self { parameter_types, return_type }
    }

    /// Parameter slots, receiver excluded.
    pub fn size_of_parameters(&self) -> i32 {
        self.parameter_types.iter().map(|type_| type_.size_in_slots()).sum()
    }

    pub fn jvm_representation(&self) -> String {
        format!(
            "({}){}",
            self.parameter_types.iter().map(|type_| shape_representation(*type_)).join(""),
            shape_representation(self.return_type)
        )
    }
}

impl Display for MethodSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.jvm_representation())
    }
}

fn shape_representation(type_: BasicType) -> String {
    match type_ {
        BasicType::Object => "Ljava/lang/Object;".to_string(),
        BasicType::Array => "[Ljava/lang/Object;".to_string(),
        other => other.descriptor_char().to_string(),
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("method descriptor must start with '(': {0}")]
    MissingOpenParen(String),
    #[error("unterminated class name in descriptor: {0}")]
    UnterminatedObject(String),
    #[error("invalid type in descriptor {descriptor} at {remaining}")]
    InvalidType { descriptor: String, remaining: String },
    #[error("trailing characters after return type in descriptor {0}")]
    TrailingCharacters(String),
}

pub fn eat_one(str_: &str) -> &str {
    let mut chars = str_.chars();
    chars.next();
    chars.as_str()
}

pub fn parse_base_type(str_: &str) -> Option<(&str, BasicType)> {
    let first = str_.chars().next()?;
    Some((
        eat_one(str_),
        match first {
            'B' => BasicType::Byte,
            'C' => BasicType::Char,
            'D' => BasicType::Double,
            'F' => BasicType::Float,
            'I' => BasicType::Int,
            'J' => BasicType::Long,
            'S' => BasicType::Short,
            'Z' => BasicType::Boolean,
            _ => return None,
        },
    ))
}

pub fn parse_object_type(str_: &str) -> Option<Result<(&str, BasicType), DescriptorError>> {
    match str_.chars().next()? {
        'L' => {
            let str_without_l = eat_one(str_);
            Some(match str_without_l.find(';') {
                Some(end_index) if end_index > 0 => Ok((&str_without_l[(end_index + 1)..], BasicType::Object)),
                _ => Err(DescriptorError::UnterminatedObject(str_.to_string())),
            })
        }
        _ => None,
    }
}

pub fn parse_array_type(str_: &str) -> Option<Result<(&str, BasicType), DescriptorError>> {
    match str_.chars().next()? {
        '[' => Some(parse_field_type(eat_one(str_)).map(|(remaining_to_parse, _component)| (remaining_to_parse, BasicType::Array))),
        _ => None,
    }
}

pub fn parse_field_type(str_: &str) -> Result<(&str, BasicType), DescriptorError> {
    if let Some(array) = parse_array_type(str_) {
        return array;
    }
    if let Some(base) = parse_base_type(str_) {
        return Ok(base);
    }
    if let Some(object) = parse_object_type(str_) {
        return object;
    }
    Err(DescriptorError::InvalidType { descriptor: str_.to_string(), remaining: str_.to_string() })
}

pub fn parse_void_descriptor(str_: &str) -> Option<(&str, BasicType)> {
    match str_.chars().next()? {
        'V' => Some((eat_one(str_), BasicType::Void)),
        _ => None,
    }
}

pub fn parse_return_descriptor(str_: &str) -> Result<(&str, BasicType), DescriptorError> {
    match parse_void_descriptor(str_) {
        Some(void) => Ok(void),
        None => parse_field_type(str_),
    }
}

pub fn parse_method_descriptor(str_: &str) -> Result<MethodSignature, DescriptorError> {
    if !str_.starts_with('(') {
        return Err(DescriptorError::MissingOpenParen(str_.to_string()));
    }
    let mut remaining_to_parse = eat_one(str_);
    let mut parameter_types = Vec::new();
    loop {
        match remaining_to_parse.chars().next() {
            Some(')') => break,
            Some(_) => {
                let (rem, type_) = parse_field_type(remaining_to_parse).map_err(|err| with_descriptor(err, str_))?;
                remaining_to_parse = rem;
                parameter_types.push(type_);
            }
            None => {
                return Err(DescriptorError::InvalidType { descriptor: str_.to_string(), remaining: String::new() });
            }
        }
    }
    remaining_to_parse = eat_one(remaining_to_parse);
    let (should_be_empty, return_type) = parse_return_descriptor(remaining_to_parse).map_err(|err| with_descriptor(err, str_))?;
    if !should_be_empty.is_empty() {
        return Err(DescriptorError::TrailingCharacters(str_.to_string()));
    }
    Ok(MethodSignature { parameter_types, return_type })
}

fn with_descriptor(err: DescriptorError, descriptor: &str) -> DescriptorError {
    match err {
        DescriptorError::InvalidType { remaining, .. } => DescriptorError::InvalidType { descriptor: descriptor.to_string(), remaining },
        other => other,
    }
}
