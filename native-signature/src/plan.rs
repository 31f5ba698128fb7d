use std::fmt::{Display, Formatter};

use entry_asm::instr::{Extension, FloatPrecision, Size};
use entry_asm::registers::{c_farg, FloatRegister, Register, C_INT_ARGUMENT_REGISTERS, N_FLOAT_REGISTER_PARAMETERS_C, N_INT_REGISTER_PARAMETERS_C};
use interpreter_common::basic_type::BasicType;
use interpreter_common::{local_offset_in_bytes, WORD_SIZE};

use crate::iterator::{ArgumentCursor, ArgumentVisitor, NativeSignatureIterator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntLocation {
    Register(Register),
    Stack(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatLocation {
    Register(FloatRegister),
    Stack(usize),
}

/// Hands out native argument locations in call order. rdi is JNIEnv* and never handed out.
#[derive(Debug, Clone)]
pub struct NativeArgumentAllocator {
    num_int_args: usize,
    num_fp_args: usize,
    stack_words: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    IntRegister(Register),
    FloatRegister(FloatRegister),
    /// Word index in the outgoing stack argument area.
    Stack(usize),
}

impl From<IntLocation> for Placement {
    fn from(location: IntLocation) -> Self {
        match location {
            IntLocation::Register(register) => Placement::IntRegister(register),
            IntLocation::Stack(word) => Placement::Stack(word),
        }
    }
}

impl From<FloatLocation> for Placement {
    fn from(location: FloatLocation) -> Self {
        match location {
            FloatLocation::Register(register) => Placement::FloatRegister(register),
            FloatLocation::Stack(word) => Placement::Stack(word),
        }
    }
}

impl NativeArgumentAllocator {
    /// c_rarg1 is reserved for the mirror of a static method.
    pub fn new(is_static: bool) -> Self {
        Self { num_int_args: if is_static { 1 } else { 0 }, num_fp_args: 0, stack_words: 0 }
    }

    pub fn num_int_args(&self) -> usize {
        self.num_int_args
    }

    pub fn num_fp_args(&self) -> usize {
        self.num_fp_args
    }

    pub fn next_int(&mut self) -> IntLocation {
        if self.num_int_args < N_INT_REGISTER_PARAMETERS_C - 1 {
            let register = C_INT_ARGUMENT_REGISTERS[self.num_int_args + 1];
            self.num_int_args += 1;
            IntLocation::Register(register)
        } else {
            IntLocation::Stack(self.next_stack())
        }
    }

    pub fn next_float(&mut self) -> FloatLocation {
        if self.num_fp_args < N_FLOAT_REGISTER_PARAMETERS_C {
            let register = c_farg(self.num_fp_args);
            self.num_fp_args += 1;
            FloatLocation::Register(register)
        } else {
            FloatLocation::Stack(self.next_stack())
        }
    }

    fn next_stack(&mut self) -> usize {
        let word = self.stack_words;
        self.stack_words += 1;
        word
    }

    pub fn stack_words(&self) -> usize {
        self.stack_words
    }
}

/// One argument moved from an interpreter local to its native location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentMove {
    pub type_: BasicType,
    pub cursor: ArgumentCursor,
    /// Byte offset from the locals pointer of the slot holding the value.
    pub source: i32,
    pub destination: Placement,
    pub width: Size,
    pub extension: Extension,
    /// The slot's address is passed instead of its contents, zero for a null reference.
    pub handlized: bool,
    pub precision: Option<FloatPrecision>,
}

impl Display for ArgumentMove {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let destination = match self.destination {
            Placement::IntRegister(register) => register.to_string(),
            Placement::FloatRegister(register) => register.to_string(),
            Placement::Stack(word) => format!("[sp + {}]", (word as i32 + 1) * WORD_SIZE),
        };
        let source = if self.handlized { format!("&locals[{}]", self.cursor.java_offset) } else { format!("locals[{}]", self.cursor.java_offset) };
        write!(f, "{:<8} {:<14} -> {:<10} {:?} {:?}", format!("{:?}", self.type_), source, destination, self.width, self.extension)
    }
}

/// The full marshaling of one signature, the contract both signature handler paths implement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarshalingPlan {
    pub is_static: bool,
    pub result_type: BasicType,
    pub moves: Vec<ArgumentMove>,
    pub stack_words: usize,
}

struct PlanBuilder {
    allocator: NativeArgumentAllocator,
    moves: Vec<ArgumentMove>,
}

impl PlanBuilder {
    fn push(&mut self, type_: BasicType, cursor: ArgumentCursor, slot: usize, destination: Placement, width: Size, extension: Extension, handlized: bool, precision: Option<FloatPrecision>) {
        self.moves.push(ArgumentMove { type_, cursor, source: local_offset_in_bytes(slot as i32), destination, width, extension, handlized, precision });
    }
}

impl ArgumentVisitor for PlanBuilder {
    fn pass_int(&mut self, cursor: ArgumentCursor) {
        let destination = self.allocator.next_int().into();
        self.push(BasicType::Int, cursor, cursor.java_offset, destination, Size::X86DWord, Extension::Sign, false, None);
    }

    fn pass_long(&mut self, cursor: ArgumentCursor) {
        let destination = self.allocator.next_int().into();
        self.push(BasicType::Long, cursor, cursor.java_offset + 1, destination, Size::X86QWord, Extension::Zero, false, None);
    }

    fn pass_float(&mut self, cursor: ArgumentCursor) {
        let destination = self.allocator.next_float().into();
        self.push(BasicType::Float, cursor, cursor.java_offset, destination, Size::X86DWord, Extension::Zero, false, Some(FloatPrecision::Single));
    }

    fn pass_double(&mut self, cursor: ArgumentCursor) {
        let destination = self.allocator.next_float().into();
        self.push(BasicType::Double, cursor, cursor.java_offset + 1, destination, Size::X86QWord, Extension::Zero, false, Some(FloatPrecision::Double));
    }

    fn pass_object(&mut self, cursor: ArgumentCursor) {
        let destination = self.allocator.next_int().into();
        self.push(BasicType::Object, cursor, cursor.java_offset, destination, Size::X86QWord, Extension::Zero, true, None);
    }
}

impl MarshalingPlan {
    pub fn of(iterator: &NativeSignatureIterator) -> MarshalingPlan {
        let mut builder = PlanBuilder { allocator: NativeArgumentAllocator::new(iterator.is_static()), moves: vec![] };
        iterator.iterate(&mut builder);
        MarshalingPlan { is_static: iterator.is_static(), result_type: iterator.result_type(), stack_words: builder.allocator.stack_words(), moves: builder.moves }
    }

    pub fn register_moves(&self) -> impl Iterator<Item = &ArgumentMove> {
        self.moves.iter().filter(|move_| !matches!(move_.destination, Placement::Stack(_)))
    }
}

impl Display for MarshalingPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "rdi      JNIEnv*")?;
        if self.is_static {
            writeln!(f, "rsi      class mirror handle")?;
        }
        for move_ in &self.moves {
            writeln!(f, "{}", move_)?;
        }
        write!(f, "result   {:?}, {} stack words", self.result_type, self.stack_words)
    }
}
