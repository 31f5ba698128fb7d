use std::collections::HashMap;
use std::ops::Range;

use entry_asm::registers::{c_farg, C_INT_ARGUMENT_REGISTERS, RAX, XMM0};
use entry_asm::runtime_entry::ThrowableKind;
use entry_asm::simulator::{Cpu, SimulatedMemory};
use interpreter_common::vm_layout::{ThreadState, JNI_HANDLE_BLOCK_HANDLES_OFFSET, JNI_HANDLE_BLOCK_TOP_OFFSET, THREAD_LAST_JAVA_FP_OFFSET, THREAD_PENDING_EXCEPTION_OFFSET};
use template_interpreter::frame_walk::InterpreterFrame;

use crate::address_map::{NATIVES_BASE, NATIVE_STRIDE};
use crate::error::RuntimeError;
use crate::heap::Universe;
use crate::raw::field;
use crate::thread::{ThreadLayout, JNI_HANDLE_CAPACITY};

pub type NativeFunction = Box<dyn FnMut(&mut NativeCall<'_>) -> Result<(), RuntimeError>>;

/// What a native function sees while it runs: the C argument registers, its stack arguments and
/// the VM it was called from.
pub struct NativeCall<'l> {
    pub cpu: &'l mut Cpu,
    pub memory: &'l mut SimulatedMemory,
    pub universe: &'l mut Universe,
    pub thread: &'l ThreadLayout,
    pub(crate) roots: Vec<Range<u64>>,
    pub(crate) safepoint_state: u64,
    pub(crate) deferred_relocations: Vec<u64>,
}

impl NativeCall<'_> {
    /// C argument `i`, rdi being 0.
    pub fn int_arg(&self, i: usize) -> u64 {
        self.cpu.get(C_INT_ARGUMENT_REGISTERS[i])
    }

    pub fn float_arg(&self, i: usize) -> u64 {
        self.cpu.xmm(c_farg(i))
    }

    /// Stack argument `word`. The return address is on top of the stack.
    pub fn stack_arg(&self, word: usize) -> Result<u64, RuntimeError> {
        Ok(self.memory.read_u64(self.cpu.rsp() + 8 * (word as u64 + 1))?)
    }

    /// Resolves a JNI handle. The null handle resolves to null.
    pub fn resolve(&self, handle: u64) -> Result<u64, RuntimeError> {
        if handle == 0 {
            return Ok(0);
        }
        Ok(self.memory.read_u64(handle)?)
    }

    pub fn thread_state(&self) -> Result<Option<ThreadState>, RuntimeError> {
        self.thread.state(self.memory)
    }

    /// The native method's own frame, found the way a stack walker finds it.
    pub fn last_java_frame(&self) -> Result<InterpreterFrame, RuntimeError> {
        let fp = self.memory.read_u64(self.thread.field(THREAD_LAST_JAVA_FP_OFFSET))?;
        Ok(InterpreterFrame::read(self.memory, fp)?)
    }

    /// Moves `object` as a collection would while this native runs.
    pub fn relocate(&mut self, object: u64) -> Result<u64, RuntimeError> {
        self.universe.heap.relocate(self.memory, object, &self.roots)
    }

    /// Moves `object` at the safepoint the native's transition back into Java stops at. Requests
    /// that safepoint.
    pub fn relocate_at_safepoint(&mut self, object: u64) -> Result<(), RuntimeError> {
        self.deferred_relocations.push(object);
        self.request_safepoint()
    }

    /// A local JNI handle for `object`, freed when the native returns.
    pub fn new_local_handle(&mut self, object: u64) -> Result<u64, RuntimeError> {
        let top_address = field(self.thread.handle_block, JNI_HANDLE_BLOCK_TOP_OFFSET);
        let top = self.memory.read_u32(top_address)? as usize;
        if top >= JNI_HANDLE_CAPACITY {
            return Err(RuntimeError::OutOfMemory("jni handle block"));
        }
        let handle = self.thread.handle_block + JNI_HANDLE_BLOCK_HANDLES_OFFSET as u64 + (top * 8) as u64;
        self.memory.write_u64(handle, object)?;
        self.memory.write_u32(top_address, top as u32 + 1)?;
        Ok(handle)
    }

    pub fn return_value(&mut self, value: u64) {
        self.cpu.set(RAX, value);
    }

    pub fn return_float(&mut self, value: f32) {
        self.cpu.set_xmm(XMM0, value.to_bits() as u64);
    }

    pub fn return_double(&mut self, value: f64) {
        self.cpu.set_xmm(XMM0, value.to_bits());
    }

    /// Makes an exception pending, as `JNIEnv::ThrowNew` does.
    pub fn throw_new(&mut self, kind: ThrowableKind, message: Option<&str>) -> Result<(), RuntimeError> {
        let exception = self.universe.new_exception(self.memory, kind, message.map(str::to_string))?;
        self.memory.write_u64(self.thread.field(THREAD_PENDING_EXCEPTION_OFFSET), exception)?;
        Ok(())
    }

    /// Starts a safepoint synchronization that the native's transition back has to wait for.
    pub fn request_safepoint(&mut self) -> Result<(), RuntimeError> {
        self.memory.write_u32(self.safepoint_state, 1)?;
        Ok(())
    }
}

/// Native functions by the address methods are linked to.
#[derive(Default)]
pub struct NativeRegistry {
    functions: HashMap<u64, Option<NativeFunction>>,
    names: HashMap<u64, String>,
}

impl NativeRegistry {
    pub fn register(&mut self, name: impl Into<String>, function: NativeFunction) -> u64 {
        let address = NATIVES_BASE + self.functions.len() as u64 * NATIVE_STRIDE;
        self.functions.insert(address, Some(function));
        self.names.insert(address, name.into());
        address
    }

    pub fn contains(&self, address: u64) -> bool {
        self.functions.contains_key(&address)
    }

    pub fn name(&self, address: u64) -> Option<&str> {
        self.names.get(&address).map(String::as_str)
    }

    /// Takes the function out for the duration of a call.
    pub(crate) fn take(&mut self, address: u64) -> Result<NativeFunction, RuntimeError> {
        self.functions.get_mut(&address).and_then(Option::take).ok_or(RuntimeError::ReentrantNative(address))
    }

    pub(crate) fn put_back(&mut self, address: u64, function: NativeFunction) {
        self.functions.insert(address, Some(function));
    }
}
