use std::ops::Range;

use entry_asm::registers::RSP;
use entry_asm::simulator::{Cpu, SimulatedMemory};
use interpreter_common::vm_layout::{
    JavaThread, JniHandleBlock, JvmtiThreadState, ThreadState, ILLEGAL_TOS, JAVA_THREAD_SIZE, JNI_HANDLE_BLOCK_HANDLES_OFFSET, STACK_GUARD_ENABLED, THREAD_PENDING_EXCEPTION_OFFSET,
    THREAD_STATE_OFFSET, THREAD_VM_RESULT_OFFSET,
};
use interpreter_common::STACK_ALIGNMENT_IN_BYTES;

use crate::address_map::{stack_region, STACK_STRIDE, THREADS_BASE, THREAD_AREA_SIZE};
use crate::error::RuntimeError;
use crate::raw::{field, write_layout};

/// Fill of fresh stack memory, so that code relying on zeroed slots shows up.
pub const STACK_FILL: u8 = 0xCD;
pub const JNI_HANDLE_CAPACITY: usize = 64;
/// Value of the JNIEnv function table pointer.
pub const JNI_FUNCTIONS: u64 = 0x0000_4a4e_4945_0000;

const HANDLE_BLOCK_OFFSET: u64 = 0x400;
const JVMTI_STATE_OFFSET: u64 = 0x800;
const SATB_BUFFER_OFFSET: u64 = 0x1000;
pub const SATB_BUFFER_SIZE: u64 = 0x800;
const PRESERVED_ARGS_OFFSET: u64 = 0x2000;
pub const PRESERVED_ARGS_CAPACITY: u64 = THREAD_AREA_SIZE - PRESERVED_ARGS_OFFSET;
/// Bytes above the initial stack pointer where C callers keep arguments and results.
const C_SCRATCH_SIZE: u64 = 0x1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub usize);

/// Where a Java thread lives: its `JavaThread` structure and side tables in the thread area, and
/// its stack.
#[derive(Debug, Clone)]
pub struct ThreadLayout {
    pub id: ThreadId,
    pub address: u64,
    pub stack: Range<u64>,
    pub handle_block: u64,
    pub jvmti_state: u64,
    pub preserved_args: u64,
    pub satb_buffer: u64,
}

impl ThreadLayout {
    pub fn create(memory: &mut SimulatedMemory, id: ThreadId, stack_size: usize) -> Result<Self, RuntimeError> {
        let area = THREADS_BASE + id.0 as u64 * THREAD_AREA_SIZE;
        let stack_size = stack_size.min(STACK_STRIDE as usize);
        let stack_base = stack_region(id.0) + STACK_STRIDE;
        let stack = stack_base - stack_size as u64..stack_base;
        memory.map(format!("stack of thread {}", id.0), stack.start, stack_size)?;
        memory.write_bytes(stack.start, &vec![STACK_FILL; stack_size])?;

        let address = area;
        let handle_block = area + HANDLE_BLOCK_OFFSET;
        let jvmti_state = area + JVMTI_STATE_OFFSET;
        let satb_buffer = area + SATB_BUFFER_OFFSET;
        write_layout(memory, handle_block, &JniHandleBlock { top: 0, padding: 0, next: 0 })?;
        write_layout(memory, jvmti_state, &JvmtiThreadState { earlyret_state: 0, earlyret_tos: ILLEGAL_TOS, earlyret_value: 0, earlyret_oop: 0 })?;
        write_layout(
            memory,
            address,
            &JavaThread {
                active_handles: handle_block,
                jni_environment: JNI_FUNCTIONS,
                stack_base,
                stack_size: stack_size as u64,
                satb_mark_queue_index: SATB_BUFFER_SIZE,
                satb_mark_queue_buffer: satb_buffer,
                thread_state: ThreadState::InJava as u32,
                stack_guard_state: STACK_GUARD_ENABLED,
                ..JavaThread::default()
            },
        )?;
        debug_assert!(JAVA_THREAD_SIZE as u64 <= HANDLE_BLOCK_OFFSET);
        tracing::debug!(thread = id.0, address = %format!("{:#x}", address), stack = ?stack, "created thread");
        Ok(Self { id, address, stack, handle_block, jvmti_state, preserved_args: area + PRESERVED_ARGS_OFFSET, satb_buffer })
    }

    /// Registers of a thread that has not run anything yet.
    pub fn initial_cpu(&self) -> Cpu {
        let mut cpu = Cpu::default();
        cpu.set(RSP, self.initial_sp());
        cpu
    }

    /// Stack pointer a C caller starts from, 16 byte aligned.
    pub fn initial_sp(&self) -> u64 {
        (self.stack.end - C_SCRATCH_SIZE) & !(STACK_ALIGNMENT_IN_BYTES as u64 - 1)
    }

    /// Where the C caller of the call stub keeps the parameter array.
    pub fn parameter_area(&self) -> u64 {
        self.stack.end - C_SCRATCH_SIZE / 2
    }

    pub fn result_slot(&self) -> u64 {
        self.stack.end - 16
    }

    /// The words the thread area can hold references in.
    pub fn area(&self) -> Range<u64> {
        self.address..self.address + THREAD_AREA_SIZE
    }

    pub fn handle_slots(&self) -> Range<u64> {
        let first = self.handle_block + JNI_HANDLE_BLOCK_HANDLES_OFFSET as u64;
        first..first + (JNI_HANDLE_CAPACITY * 8) as u64
    }

    pub fn field(&self, offset: i32) -> u64 {
        field(self.address, offset)
    }

    pub fn state(&self, memory: &SimulatedMemory) -> Result<Option<ThreadState>, RuntimeError> {
        Ok(ThreadState::from_raw(memory.read_u32(self.field(THREAD_STATE_OFFSET))?))
    }

    pub fn pending_exception(&self, memory: &SimulatedMemory) -> Result<u64, RuntimeError> {
        Ok(memory.read_u64(self.field(THREAD_PENDING_EXCEPTION_OFFSET))?)
    }

    pub fn vm_result(&self, memory: &SimulatedMemory) -> Result<u64, RuntimeError> {
        Ok(memory.read_u64(self.field(THREAD_VM_RESULT_OFFSET))?)
    }
}
