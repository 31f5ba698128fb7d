use entry_asm::error::SimulationError;
use entry_asm::instr::{Address, Condition};
use entry_asm::masm::{CallVmHooks, MacroAssembler};
use entry_asm::registers::{c_farg, C_INT_ARGUMENT_REGISTERS, C_RARG1, C_RARG2, C_RARG3, C_RARG4, C_RARG5, LOCALS, METHOD, N_FLOAT_REGISTER_PARAMETERS_C, RSP};
use entry_asm::runtime_entry::RuntimeEntry;
use entry_asm::simulator::SimulatedMemory;
use interpreter_common::local_offset_in_bytes;
use interpreter_common::vm_layout::{ACC_STATIC, METHOD_ACCESS_FLAGS_OFFSET};
use interpreter_common::WORD_SIZE;

use crate::iterator::{ArgumentCursor, ArgumentVisitor, NativeSignatureIterator};
use crate::plan::{FloatLocation, IntLocation, NativeArgumentAllocator};

/// Scratch area the slow path reserves below its return address:
/// 5 integer argument words (the first unused for static methods), the float/double
/// identifier word, then 8 float argument words.
pub const SLOW_HANDLER_FRAME_WORDS: i32 = 14;
pub const INT_ARGS_WORD: i32 = 0;
pub const INT_ARGS_COUNT: usize = 5;
pub const FP_IDENTIFIERS_WORD: i32 = 5;
pub const FP_ARGS_WORD: i32 = 6;

/// What the slow path computed for one call, before it is copied to its scratch area.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeArgumentBuffer {
    /// Index i feeds c_rarg(i + 1).
    pub int_args: [u64; INT_ARGS_COUNT],
    /// Bit i set means xmm i holds a double.
    pub fp_identifiers: u32,
    pub fp_args: [u64; N_FLOAT_REGISTER_PARAMETERS_C],
    pub stack_args: Vec<u64>,
}

impl NativeArgumentBuffer {
    /// `to` is the stack pointer at slow handler entry, pointing at its return address. Stack
    /// arguments start one word above it.
    pub fn write_to(&self, memory: &mut SimulatedMemory, to: u64) -> Result<(), SimulationError> {
        let base = to - (SLOW_HANDLER_FRAME_WORDS * WORD_SIZE) as u64;
        for (i, value) in self.int_args.iter().enumerate() {
            memory.write_u64(base + ((INT_ARGS_WORD as usize + i) * 8) as u64, *value)?;
        }
        memory.write_u64(base + (FP_IDENTIFIERS_WORD * WORD_SIZE) as u64, self.fp_identifiers as u64)?;
        for (i, value) in self.fp_args.iter().enumerate() {
            memory.write_u64(base + ((FP_ARGS_WORD as usize + i) * 8) as u64, *value)?;
        }
        for (i, value) in self.stack_args.iter().enumerate() {
            memory.write_u64(to + ((i + 1) * 8) as u64, *value)?;
        }
        Ok(())
    }
}

/// Marshals arguments by walking the signature at call time, reading the interpreter's locals.
pub struct SlowSignatureHandler<'l> {
    memory: &'l SimulatedMemory,
    locals: u64,
    allocator: NativeArgumentAllocator,
    buffer: NativeArgumentBuffer,
    error: Option<SimulationError>,
}

impl<'l> SlowSignatureHandler<'l> {
    pub fn new(memory: &'l SimulatedMemory, locals: u64, is_static: bool) -> Self {
        Self { memory, locals, allocator: NativeArgumentAllocator::new(is_static), buffer: NativeArgumentBuffer::default(), error: None }
    }

    pub fn marshal(mut self, iterator: &NativeSignatureIterator) -> Result<NativeArgumentBuffer, SimulationError> {
        iterator.iterate(&mut self);
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.buffer),
        }
    }

    fn slot_address(&self, slot: usize) -> u64 {
        self.locals.wrapping_add(local_offset_in_bytes(slot as i32) as i64 as u64)
    }

    fn read(&mut self, address: u64, size: usize) -> u64 {
        match self.memory.read(address, size) {
            Ok(value) => value,
            Err(error) => {
                self.error.get_or_insert(error);
                0
            }
        }
    }

    fn place_int(&mut self, value: u64) {
        match self.allocator.next_int() {
            IntLocation::Register(register) => {
                if let Some(position) = C_INT_ARGUMENT_REGISTERS.iter().position(|candidate| *candidate == register) {
                    self.buffer.int_args[position - 1] = value;
                }
            }
            IntLocation::Stack(_) => self.buffer.stack_args.push(value),
        }
    }

    fn place_float(&mut self, value: u64, is_double: bool) {
        match self.allocator.next_float() {
            FloatLocation::Register(register) => {
                self.buffer.fp_args[register.index()] = value;
                if is_double {
                    self.buffer.fp_identifiers |= 1 << register.index();
                }
            }
            FloatLocation::Stack(_) => self.buffer.stack_args.push(value),
        }
    }
}

impl ArgumentVisitor for SlowSignatureHandler<'_> {
    fn pass_int(&mut self, cursor: ArgumentCursor) {
        let value = self.read(self.slot_address(cursor.java_offset), 4) as u32 as i32 as i64 as u64;
        self.place_int(value);
    }

    fn pass_long(&mut self, cursor: ArgumentCursor) {
        let value = self.read(self.slot_address(cursor.java_offset + 1), 8);
        self.place_int(value);
    }

    fn pass_float(&mut self, cursor: ArgumentCursor) {
        let value = self.read(self.slot_address(cursor.java_offset), 4);
        self.place_float(value, false);
    }

    fn pass_double(&mut self, cursor: ArgumentCursor) {
        let value = self.read(self.slot_address(cursor.java_offset + 1), 8);
        self.place_float(value, true);
    }

    fn pass_object(&mut self, cursor: ArgumentCursor) {
        let address = self.slot_address(cursor.java_offset);
        let value = if self.read(address, 8) == 0 { 0 } else { address };
        self.place_int(value);
    }
}

/// Emits the slow signature handler stub. Same register contract as a generated handler: called
/// with rbx = Method*, r14 = locals and rsp at the outgoing argument area; returns the result
/// handler in rax.
pub fn generate_slow_signature_handler(masm: &mut MacroAssembler, hooks: &dyn CallVmHooks) {
    masm.mov(C_RARG3, RSP);
    masm.subptr(RSP, SLOW_HANDLER_FRAME_WORDS * WORD_SIZE);
    masm.call_vm_base(None, RuntimeEntry::SlowSignatureHandler, &[METHOD, LOCALS, C_RARG3], true, hooks);
    // float registers first, c_rarg3 is free as scratch until the integer loads
    masm.movl(C_RARG3, Address::new(RSP, FP_IDENTIFIERS_WORD * WORD_SIZE));
    for i in 0..N_FLOAT_REGISTER_PARAMETERS_C {
        let register = c_farg(i);
        let is_double = masm.new_label();
        let done = masm.new_label();
        let slot = Address::new(RSP, (FP_ARGS_WORD + i as i32) * WORD_SIZE);
        masm.testl_jcc(C_RARG3, 1 << i, Condition::NotEqual, is_double);
        masm.movflt(register, slot);
        masm.jmp(done);
        masm.bind(is_double);
        masm.movdbl(register, slot);
        masm.bind(done);
    }
    let is_static = masm.new_label();
    masm.movl(C_RARG3, Address::new(METHOD, METHOD_ACCESS_FLAGS_OFFSET));
    masm.testl_jcc(C_RARG3, ACC_STATIC as i32, Condition::NotEqual, is_static);
    masm.movptr(C_RARG1, Address::new(RSP, INT_ARGS_WORD * WORD_SIZE));
    masm.bind(is_static);
    masm.movptr(C_RARG2, Address::new(RSP, (INT_ARGS_WORD + 1) * WORD_SIZE));
    masm.movptr(C_RARG3, Address::new(RSP, (INT_ARGS_WORD + 2) * WORD_SIZE));
    masm.movptr(C_RARG4, Address::new(RSP, (INT_ARGS_WORD + 3) * WORD_SIZE));
    masm.movptr(C_RARG5, Address::new(RSP, (INT_ARGS_WORD + 4) * WORD_SIZE));
    masm.addptr(RSP, SLOW_HANDLER_FRAME_WORDS * WORD_SIZE);
    masm.ret();
}
