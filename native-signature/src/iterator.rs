use interpreter_common::basic_type::BasicType;
use interpreter_common::descriptor_parser::{parse_method_descriptor, DescriptorError, MethodSignature};
use interpreter_common::fingerprint::Fingerprint;

/// JNIEnv* is always the first native argument.
pub const JNI_ENV_WORDS: usize = 1;
/// The class mirror handle of a static method follows JNIEnv*.
pub const MIRROR_WORDS: usize = 1;

/// Where the argument being passed sits on both sides of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentCursor {
    /// Interpreter slot index of the argument's first slot, receiver at 0.
    pub java_offset: usize,
    /// Position in the native argument list, JNIEnv* at 0.
    pub native_offset: usize,
}

/// One callback per argument of a native call. The receiver of an instance method arrives as the
/// first `pass_object`.
pub trait ArgumentVisitor {
    fn pass_int(&mut self, cursor: ArgumentCursor);
    fn pass_long(&mut self, cursor: ArgumentCursor);
    fn pass_float(&mut self, cursor: ArgumentCursor);
    fn pass_double(&mut self, cursor: ArgumentCursor);
    fn pass_object(&mut self, cursor: ArgumentCursor);
}

/// Walks a native method's parameters either from its descriptor or from its fingerprint. Both
/// walks produce the same callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeSignatureIterator {
    is_static: bool,
    signature: MethodSignature,
}

impl NativeSignatureIterator {
    pub fn from_descriptor(descriptor: &str, is_static: bool) -> Result<Self, DescriptorError> {
        Ok(Self { is_static, signature: parse_method_descriptor(descriptor)? })
    }

    pub fn from_signature(signature: MethodSignature, is_static: bool) -> Self {
        Self { is_static, signature }
    }

    /// `None` for `TooComplex`, which has to be walked from the descriptor.
    pub fn from_fingerprint(fingerprint: Fingerprint) -> Option<Self> {
        Some(Self { is_static: fingerprint.is_static()?, signature: fingerprint.signature()? })
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn result_type(&self) -> BasicType {
        self.signature.return_type
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.signature, self.is_static)
    }

    /// Native arguments ahead of the first Java one.
    pub fn prepended_words(&self) -> usize {
        if self.is_static {
            JNI_ENV_WORDS + MIRROR_WORDS
        } else {
            JNI_ENV_WORDS
        }
    }

    pub fn size_of_parameters(&self) -> usize {
        self.signature.size_of_parameters() as usize + if self.is_static { 0 } else { 1 }
    }

    pub fn iterate(&self, visitor: &mut impl ArgumentVisitor) {
        walk(self.is_static, self.signature.parameter_types.iter().copied(), visitor)
    }
}

/// Walks a fingerprint without rebuilding the signature. `false` if it is `TooComplex`.
pub fn iterate_fingerprint(fingerprint: Fingerprint, visitor: &mut impl ArgumentVisitor) -> bool {
    match (fingerprint.is_static(), fingerprint.parameters()) {
        (Some(is_static), Some(parameters)) => {
            walk(is_static, parameters, visitor);
            true
        }
        _ => false,
    }
}

fn walk(is_static: bool, parameters: impl Iterator<Item = BasicType>, visitor: &mut impl ArgumentVisitor) {
    let mut cursor = ArgumentCursor { java_offset: 0, native_offset: if is_static { JNI_ENV_WORDS + MIRROR_WORDS } else { JNI_ENV_WORDS } };
    if !is_static {
        visitor.pass_object(cursor);
        cursor.java_offset += 1;
        cursor.native_offset += 1;
    }
    for parameter in parameters {
        match parameter {
            BasicType::Boolean | BasicType::Char | BasicType::Byte | BasicType::Short | BasicType::Int => visitor.pass_int(cursor),
            BasicType::Long => visitor.pass_long(cursor),
            BasicType::Float => visitor.pass_float(cursor),
            BasicType::Double => visitor.pass_double(cursor),
            BasicType::Object | BasicType::Array => visitor.pass_object(cursor),
            BasicType::Void => continue,
        }
        cursor.java_offset += parameter.size_in_slots() as usize;
        cursor.native_offset += 1;
    }
}
