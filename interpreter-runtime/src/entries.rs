use entry_asm::registers::{C_RARG0, C_RARG1, C_RARG2, C_RARG3, RAX, XMM0, XMM1};
use entry_asm::runtime_entry::{RuntimeEntry, ThrowableKind};
use entry_asm::simulator::{Cpu, SimulatedMemory};
use interpreter_common::basic_type::TosState;
use interpreter_common::fingerprint::Fingerprint;
use interpreter_common::frame_layout::{slot_byte_offset, BASIC_OBJECT_LOCK_DISPLACED_HEADER_OFFSET, BASIC_OBJECT_LOCK_OBJ_OFFSET, INTERPRETER_FRAME_BCP_OFFSET};
use interpreter_common::vm_layout::{
    CONST_METHOD_CODES_OFFSET, CONST_METHOD_CODE_SIZE_OFFSET, CONST_METHOD_FINGERPRINT_OFFSET, CP_CACHE_BASE_OFFSET, CP_CACHE_ENTRY_FLAGS_OFFSET, CP_CACHE_ENTRY_PARAMETER_SIZE_MASK, CP_CACHE_ENTRY_SIZE_IN_WORDS,
    METHOD_CONST_OFFSET, METHOD_METHOD_COUNTERS_OFFSET, METHOD_METHOD_DATA_OFFSET, METHOD_NATIVE_FUNCTION_OFFSET, METHOD_SIGNATURE_HANDLER_OFFSET, OOP_MARK_OFFSET,
    POPFRAME_PENDING_BIT, SAFEPOINT_NOT_SYNCHRONIZED, STACK_GUARD_ENABLED, THREAD_PENDING_EXCEPTION_OFFSET, THREAD_POPFRAME_CONDITION_OFFSET, THREAD_POPFRAME_PRESERVED_ARGS_OFFSET, THREAD_POPFRAME_PRESERVED_ARGS_SIZE_OFFSET, THREAD_SATB_MARK_QUEUE_INDEX_OFFSET,
    THREAD_STACK_GUARD_STATE_OFFSET, THREAD_SUSPEND_FLAGS_OFFSET, THREAD_VM_RESULT_OFFSET,
};
use interpreter_common::WORD_SIZE;
use native_signature::iterator::NativeSignatureIterator;
use native_signature::slow_handler::SlowSignatureHandler;

use crate::address_map::{COMPILED_CALLER_EXCEPTION_LANDING, COMPILED_CALLER_RETURN, UNSATISFIED_LINK_ERROR_ENTRY};
use crate::error::RuntimeError;
use crate::metadata::MethodInfo;
use crate::raw::field;
use crate::runtime::{MonitorOwner, VmEvent, VmRuntime};
use crate::thread::{ThreadLayout, PRESERVED_ARGS_CAPACITY, SATB_BUFFER_SIZE};

/// Bytecode of `invokedynamic`, the only invoke with a four byte cp cache index.
const INVOKEDYNAMIC: u8 = 0xba;

/// Mark word of an object locked by the monitor at `lock`.
fn stack_locked_mark(lock: u64) -> u64 {
    lock & !0b11
}

/// The parameter shape of a native method. A cached fingerprint is replayed, the descriptor is
/// only parsed when there is none yet or the shape does not fit one.
fn native_signature(memory: &mut SimulatedMemory, info: &MethodInfo) -> Result<NativeSignatureIterator, RuntimeError> {
    let cache = field(info.method.const_method, CONST_METHOD_FINGERPRINT_OFFSET);
    let cached = Fingerprint::from_raw(memory.read_u64(cache)?);
    if let Some(iterator) = cached.and_then(NativeSignatureIterator::from_fingerprint) {
        return Ok(iterator);
    }
    let iterator = NativeSignatureIterator::from_descriptor(&info.descriptor, info.method.is_static())?;
    if cached.is_none() {
        memory.write_u64(cache, iterator.fingerprint().to_raw())?;
        tracing::trace!(method = %info.name, fingerprint = ?iterator.fingerprint(), "cached fingerprint");
    }
    Ok(iterator)
}

impl VmRuntime {
    pub(crate) fn dispatch(&mut self, entry: RuntimeEntry, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<(), RuntimeError> {
        match entry {
            RuntimeEntry::FrequencyCounterOverflow => self.frequency_counter_overflow(cpu, memory),
            RuntimeEntry::ProfileMethod => self.profile_method(cpu, memory),
            RuntimeEntry::BuildMethodCounters => self.build_method_counters(cpu, memory),
            RuntimeEntry::BcpToDi => self.bcp_to_di(cpu, memory),
            RuntimeEntry::PrepareNativeCall => self.prepare_native_call(cpu, memory),
            RuntimeEntry::SlowSignatureHandler => self.slow_signature_handler(cpu, memory),
            RuntimeEntry::Monitorenter => self.monitorenter(cpu, memory),
            RuntimeEntry::Monitorexit => self.monitorexit(cpu, memory),
            RuntimeEntry::ThrowStackOverflowError => {
                let thread = self.thread_arg(cpu)?;
                self.throw(memory, &thread, ThrowableKind::StackOverflowError, None)
            }
            RuntimeEntry::ThrowAbstractMethodError => {
                let thread = self.thread_arg(cpu)?;
                // the shared stub does not pass the method
                let message = self.universe.metaspace.method(cpu.get(C_RARG1)).ok().map(|info| info.name.clone());
                self.throw(memory, &thread, ThrowableKind::AbstractMethodError, message)
            }
            RuntimeEntry::ThrowArrayIndexOutOfBoundsException => {
                let thread = self.thread_arg(cpu)?;
                let length = self.universe.heap.array_length(memory, cpu.get(C_RARG1))?;
                let index = cpu.get(C_RARG2) as i32;
                self.throw(memory, &thread, ThrowableKind::ArrayIndexOutOfBoundsException, Some(format!("Index {} out of bounds for length {}", index, length)))
            }
            RuntimeEntry::ThrowClassCastException => {
                let thread = self.thread_arg(cpu)?;
                let class_name = self.universe.class_name_of(cpu.get(C_RARG1))?;
                self.throw(memory, &thread, ThrowableKind::ClassCastException, Some(format!("class {} cannot be cast", class_name)))
            }
            RuntimeEntry::CreateException => {
                let thread = self.thread_arg(cpu)?;
                let kind = ThrowableKind::from_raw(cpu.get(C_RARG1)).ok_or(RuntimeError::UnknownThrowable(cpu.get(C_RARG1)))?;
                let message = if cpu.get(C_RARG2) != 0 { kind.default_message().map(str::to_string) } else { None };
                let exception = self.new_exception(memory, kind, message)?;
                memory.write_u64(thread.field(THREAD_VM_RESULT_OFFSET), exception)?;
                Ok(())
            }
            RuntimeEntry::CreateKlassException => {
                let thread = self.thread_arg(cpu)?;
                let kind = ThrowableKind::from_raw(cpu.get(C_RARG1)).ok_or(RuntimeError::UnknownThrowable(cpu.get(C_RARG1)))?;
                let class_name = self.universe.class_name_of(cpu.get(C_RARG2))?;
                let exception = self.new_exception(memory, kind, Some(class_name))?;
                memory.write_u64(thread.field(THREAD_VM_RESULT_OFFSET), exception)?;
                Ok(())
            }
            RuntimeEntry::ThrowIllegalMonitorStateException => {
                let thread = self.thread_arg(cpu)?;
                self.throw(memory, &thread, ThrowableKind::IllegalMonitorStateException, None)
            }
            RuntimeEntry::NewIllegalMonitorStateException => {
                let thread = self.thread_arg(cpu)?;
                let exception = self.new_exception(memory, ThrowableKind::IllegalMonitorStateException, None)?;
                memory.write_u64(thread.field(THREAD_VM_RESULT_OFFSET), exception)?;
                Ok(())
            }
            // the exception is pending already, the call only exists to reach the pending check
            RuntimeEntry::ThrowPendingException => Ok(()),
            RuntimeEntry::ExceptionHandlerForException => self.exception_handler_for_exception(cpu, memory),
            RuntimeEntry::InterpreterContains => {
                let contains = self.registry.interpreter.contains(cpu.get(C_RARG0));
                cpu.set(RAX, contains as u64);
                Ok(())
            }
            RuntimeEntry::PopframeMoveOutgoingArgs => self.popframe_move_outgoing_args(cpu, memory),
            RuntimeEntry::PopframePreserveArgs => self.popframe_preserve_args(cpu, memory),
            RuntimeEntry::ExceptionHandlerForReturnAddress => {
                let handler = self.exception_handler_for_return_address(cpu.get(C_RARG1))?;
                cpu.set(RAX, handler);
                Ok(())
            }
            RuntimeEntry::ReguardYellowPages => {
                let thread = self.current_thread()?;
                memory.write_u32(thread.field(THREAD_STACK_GUARD_STATE_OFFSET), STACK_GUARD_ENABLED)?;
                self.events.push(VmEvent::Reguard);
                cpu.set(RAX, 1);
                Ok(())
            }
            RuntimeEntry::CheckSpecialConditionForNativeTrans => self.check_special_condition_for_native_trans(cpu, memory),
            RuntimeEntry::G1WbPre => {
                let thread = self.thread_at(cpu.get(C_RARG1))?;
                self.events.push(VmEvent::G1PreBarrier { obj: cpu.get(C_RARG0) });
                // the full buffer is handed to the collector and starts over
                memory.write_u64(thread.field(THREAD_SATB_MARK_QUEUE_INDEX_OFFSET), SATB_BUFFER_SIZE)?;
                Ok(())
            }
            RuntimeEntry::Dsin | RuntimeEntry::Dcos | RuntimeEntry::Dtan | RuntimeEntry::Dlog | RuntimeEntry::Dlog10 | RuntimeEntry::Dexp | RuntimeEntry::Dpow => {
                let x = f64::from_bits(cpu.xmm(XMM0));
                let result = shared_math(entry, x, f64::from_bits(cpu.xmm(XMM1)));
                cpu.set_xmm(XMM0, result.to_bits());
                Ok(())
            }
        }
    }

    /// The thread a `call_vm` passes in rdi.
    fn thread_arg(&self, cpu: &Cpu) -> Result<ThreadLayout, RuntimeError> {
        self.thread_at(cpu.get(C_RARG0))
    }

    fn current_thread(&self) -> Result<ThreadLayout, RuntimeError> {
        let id = self.current.ok_or(RuntimeError::UnknownThread(u64::MAX))?;
        self.thread(id).cloned()
    }

    pub(crate) fn new_exception(&mut self, memory: &mut SimulatedMemory, kind: ThrowableKind, message: Option<String>) -> Result<u64, RuntimeError> {
        let exception = self.universe.new_exception(memory, kind, message)?;
        self.events.push(VmEvent::ExceptionCreated { kind, exception });
        Ok(exception)
    }

    /// Makes a new exception pending on `thread`.
    fn throw(&mut self, memory: &mut SimulatedMemory, thread: &ThreadLayout, kind: ThrowableKind, message: Option<String>) -> Result<(), RuntimeError> {
        let exception = self.new_exception(memory, kind, message)?;
        memory.write_u64(thread.field(THREAD_PENDING_EXCEPTION_OFFSET), exception)?;
        Ok(())
    }

    fn frequency_counter_overflow(&mut self, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<(), RuntimeError> {
        let thread = self.thread_arg(cpu)?;
        let frame = self.last_java_frame(memory, &thread)?;
        self.events.push(VmEvent::CounterOverflow { method: frame.method });
        let compiled = self.compiled.get(&frame.method).copied().unwrap_or(0);
        tracing::debug!(method = %format!("{:#x}", frame.method), compiled = %format!("{:#x}", compiled), "invocation counter overflow");
        cpu.set(RAX, compiled);
        Ok(())
    }

    fn profile_method(&mut self, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<(), RuntimeError> {
        let thread = self.thread_arg(cpu)?;
        let method = self.last_java_frame(memory, &thread)?.method;
        if memory.read_u64(field(method, METHOD_METHOD_DATA_OFFSET))? == 0 {
            let const_method = self.universe.metaspace.method(method)?.method.const_method;
            let code_size = memory.read_u16(field(const_method, CONST_METHOD_CODE_SIZE_OFFSET))?;
            let method_data = self.universe.metaspace.new_method_data(memory, self.counters.method_data(), code_size as usize)?;
            memory.write_u64(field(method, METHOD_METHOD_DATA_OFFSET), method_data)?;
        }
        self.events.push(VmEvent::MethodProfiled { method });
        Ok(())
    }

    fn build_method_counters(&mut self, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<(), RuntimeError> {
        let method = cpu.get(C_RARG1);
        self.universe.metaspace.method(method)?;
        if memory.read_u64(field(method, METHOD_METHOD_COUNTERS_OFFSET))? == 0 {
            let counters = self.universe.metaspace.new_method_counters(memory, self.counters.method_counters())?;
            memory.write_u64(field(method, METHOD_METHOD_COUNTERS_OFFSET), counters)?;
        }
        Ok(())
    }

    /// Offset of the profile cell of `bcp` from the start of the profile data.
    fn bcp_to_di(&mut self, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<(), RuntimeError> {
        let method = cpu.get(C_RARG0);
        let bcp = cpu.get(C_RARG1);
        let code = memory.read_u64(field(method, METHOD_CONST_OFFSET))? + CONST_METHOD_CODES_OFFSET as u64;
        cpu.set(RAX, (bcp - code) * WORD_SIZE as u64);
        Ok(())
    }

    /// Links the native function and installs a signature handler.
    fn prepare_native_call(&mut self, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<(), RuntimeError> {
        let thread = self.thread_arg(cpu)?;
        let method = cpu.get(C_RARG1);
        let info = self.universe.metaspace.method(method)?.clone();

        if memory.read_u64(field(method, METHOD_NATIVE_FUNCTION_OFFSET))? == UNSATISFIED_LINK_ERROR_ENTRY {
            match info.native.filter(|native| self.natives.contains(*native)) {
                Some(native) => {
                    memory.write_u64(field(method, METHOD_NATIVE_FUNCTION_OFFSET), native)?;
                    tracing::debug!(method = %info.name, native = %format!("{:#x}", native), "linked native");
                }
                None => return self.throw(memory, &thread, ThrowableKind::UnsatisfiedLinkError, Some(info.name)),
            }
        }

        if memory.read_u64(field(method, METHOD_SIGNATURE_HANDLER_OFFSET))? == 0 {
            let fingerprint = native_signature(memory, &info)?.fingerprint();
            let handler = self.registry.signature_handlers.lookup(fingerprint).address();
            memory.write_u64(field(method, METHOD_SIGNATURE_HANDLER_OFFSET), handler.raw())?;
        }
        Ok(())
    }

    /// Marshals the Java arguments at `locals` into the buffer at `to` and answers the result
    /// handler. Shapes that fit a fingerprint get a generated handler for their next call.
    fn slow_signature_handler(&mut self, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<(), RuntimeError> {
        let method = cpu.get(C_RARG1);
        let locals = cpu.get(C_RARG2);
        let to = cpu.get(C_RARG3);
        let info = self.universe.metaspace.method(method)?.clone();
        let iterator = native_signature(memory, &info)?;

        let buffer = SlowSignatureHandler::new(memory, locals, info.method.is_static()).marshal(&iterator)?;
        buffer.write_to(memory, to)?;
        let result_handler = self.registry.interpreter.result_handlers.handler_for(iterator.result_type());

        let slow_handler = self.registry.signature_handlers.slow_handler();
        if memory.read_u64(field(method, METHOD_SIGNATURE_HANDLER_OFFSET))? == slow_handler.raw() {
            if let Some(handler) = self.registry.signature_handlers.promote(iterator.fingerprint())? {
                memory.write_u64(field(method, METHOD_SIGNATURE_HANDLER_OFFSET), handler.raw())?;
                self.events.push(VmEvent::SignatureHandlerPromoted { method, handler });
            }
        }
        cpu.set(RAX, result_handler.raw());
        Ok(())
    }

    fn monitorenter(&mut self, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<(), RuntimeError> {
        let thread = self.thread_arg(cpu)?;
        let lock = cpu.get(C_RARG1);
        let obj = memory.read_u64(lock + BASIC_OBJECT_LOCK_OBJ_OFFSET as u64)?;
        if obj == 0 {
            return self.throw(memory, &thread, ThrowableKind::NullPointerException, None);
        }
        match self.monitors.get_mut(&obj) {
            Some(owner) if owner.thread != thread.id => return Err(RuntimeError::MonitorContended(obj)),
            Some(owner) => {
                owner.recursions += 1;
                memory.write_u64(lock + BASIC_OBJECT_LOCK_DISPLACED_HEADER_OFFSET as u64, 0)?;
            }
            None => {
                let mark = memory.read_u64(field(obj, OOP_MARK_OFFSET))?;
                memory.write_u64(lock + BASIC_OBJECT_LOCK_DISPLACED_HEADER_OFFSET as u64, mark)?;
                memory.write_u64(field(obj, OOP_MARK_OFFSET), stack_locked_mark(lock))?;
                self.monitors.insert(obj, MonitorOwner { thread: thread.id, recursions: 1, displaced_header: mark });
            }
        }
        self.events.push(VmEvent::MonitorEnter { obj, lock });
        Ok(())
    }

    /// Releases the monitor at `lock` and clears its object field, so unwinding does not release
    /// it again.
    fn monitorexit(&mut self, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<(), RuntimeError> {
        let thread = self.thread_arg(cpu)?;
        let lock = cpu.get(C_RARG1);
        let obj = memory.read_u64(lock + BASIC_OBJECT_LOCK_OBJ_OFFSET as u64)?;
        let owner = match self.monitors.get_mut(&obj) {
            Some(owner) if obj != 0 && owner.thread == thread.id => owner,
            _ => return self.throw(memory, &thread, ThrowableKind::IllegalMonitorStateException, None),
        };
        owner.recursions -= 1;
        if owner.recursions == 0 {
            let displaced_header = owner.displaced_header;
            self.monitors.remove(&obj);
            memory.write_u64(field(obj, OOP_MARK_OFFSET), displaced_header)?;
        }
        memory.write_u64(lock + BASIC_OBJECT_LOCK_OBJ_OFFSET as u64, 0)?;
        self.events.push(VmEvent::MonitorExit { obj });
        Ok(())
    }

    /// Finds the handler of the exception in c_rarg1 in the frame that raised it. A handler in the
    /// same method continues at the dispatch of its first bytecode with the frame's bcp moved to
    /// it. Without one the frame is removed and the exception rethrown in the caller.
    fn exception_handler_for_exception(&mut self, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<(), RuntimeError> {
        let thread = self.thread_arg(cpu)?;
        let exception = cpu.get(C_RARG1);
        let kind = self.universe.heap.object(exception)?.throwable;
        let frame = self.last_java_frame(memory, &thread)?;
        let info = self.universe.metaspace.method(frame.method)?;

        let handler_bci = match frame.bci(memory)? {
            Some(bci) => info.exception_table.iter().find(|entry| entry.covers(bci, kind)).map(|entry| entry.handler_bci),
            None => None,
        };
        let continuation = match handler_bci {
            Some(handler_bci) => {
                let bcp = info.method.bcp(handler_bci);
                memory.write_u64(frame.fp.wrapping_add(slot_byte_offset(INTERPRETER_FRAME_BCP_OFFSET) as i64 as u64), bcp)?;
                let bytecode = memory.read_u8(bcp)?;
                let table = self.registry.external.dispatch_table(TosState::Vtos.index());
                tracing::debug!(method = %info.name, handler_bci, "exception caught");
                memory.read_u64(table + bytecode as u64 * WORD_SIZE as u64)?
            }
            None => {
                tracing::debug!(method = %info.name, "exception unwinds the frame");
                self.registry.interpreter.exceptions.remove_activation.raw()
            }
        };
        memory.write_u64(thread.field(THREAD_VM_RESULT_OFFSET), exception)?;
        cpu.set(RAX, continuation);
        Ok(())
    }

    /// Where an exception continues that is thrown into the code at `return_address`.
    fn exception_handler_for_return_address(&self, return_address: u64) -> Result<u64, RuntimeError> {
        if self.registry.interpreter.contains(return_address) {
            Ok(self.registry.interpreter.exceptions.rethrow_exception.raw())
        } else if return_address == self.registry.stubs.call_stub_return_address.raw() {
            Ok(self.registry.stubs.catch_exception_entry.raw())
        } else if return_address == COMPILED_CALLER_RETURN {
            Ok(COMPILED_CALLER_EXCEPTION_LANDING)
        } else {
            Err(RuntimeError::UnknownReturnAddress(return_address))
        }
    }

    /// Copies the outgoing arguments of the caller's invoke from `src` (c_rarg1) to `dest`
    /// (c_rarg2). The caller is the frame the thread's last Java frame points at, stopped at the
    /// invoke.
    fn popframe_move_outgoing_args(&mut self, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<(), RuntimeError> {
        let thread = self.thread_arg(cpu)?;
        let src = cpu.get(C_RARG1);
        let dest = cpu.get(C_RARG2);
        let caller = self.last_java_frame(memory, &thread)?;

        let index = if memory.read_u8(caller.bcp)? == INVOKEDYNAMIC { !memory.read_u32(caller.bcp + 1)? as u64 } else { memory.read_u16(caller.bcp + 1)? as u64 };
        let entry = caller.cache + CP_CACHE_BASE_OFFSET as u64 + index * (CP_CACHE_ENTRY_SIZE_IN_WORDS * WORD_SIZE) as u64;
        let parameter_size = memory.read_u64(entry + CP_CACHE_ENTRY_FLAGS_OFFSET as u64)? & CP_CACHE_ENTRY_PARAMETER_SIZE_MASK as u64;
        let size = (parameter_size * WORD_SIZE as u64) as usize;

        if src != dest && size != 0 {
            let arguments = memory.read_bytes(src, size)?.to_vec();
            memory.write_bytes(dest, &arguments)?;
        }
        tracing::debug!(src = %format!("{:#x}", src), dest = %format!("{:#x}", dest), size, "moved outgoing arguments of popped frame");
        Ok(())
    }

    /// Saves the arguments of a frame popped back into a deoptimized caller, which reinstalls
    /// them itself.
    fn popframe_preserve_args(&mut self, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<(), RuntimeError> {
        let thread = self.thread_arg(cpu)?;
        let bytes = cpu.get(C_RARG1);
        let start = cpu.get(C_RARG2);
        if bytes > PRESERVED_ARGS_CAPACITY {
            return Err(RuntimeError::OutOfMemory("popframe argument area"));
        }
        let arguments = memory.read_bytes(start, bytes as usize)?.to_vec();
        memory.write_bytes(thread.preserved_args, &arguments)?;
        memory.write_u64(thread.field(THREAD_POPFRAME_PRESERVED_ARGS_OFFSET), thread.preserved_args)?;
        memory.write_u64(thread.field(THREAD_POPFRAME_PRESERVED_ARGS_SIZE_OFFSET), bytes)?;
        let condition = memory.read_u32(thread.field(THREAD_POPFRAME_CONDITION_OFFSET))?;
        memory.write_u32(thread.field(THREAD_POPFRAME_CONDITION_OFFSET), condition & !POPFRAME_PENDING_BIT)?;
        Ok(())
    }

    /// Runs what a thread returning from native code has to wait for: the safepoint in progress
    /// and any suspension.
    fn check_special_condition_for_native_trans(&mut self, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<(), RuntimeError> {
        let thread = self.thread_arg(cpu)?;
        let state = thread.state(memory)?;
        self.events.push(VmEvent::NativeTransition { state });

        let roots = self.roots();
        for object in std::mem::take(&mut self.pending_relocations) {
            let moved = self.universe.heap.relocate(memory, object, &roots)?;
            self.events.push(VmEvent::ObjectRelocated { from: object, to: moved });
        }
        memory.write_u32(self.registry.external.safepoint_state, SAFEPOINT_NOT_SYNCHRONIZED)?;
        memory.write_u32(thread.field(THREAD_SUSPEND_FLAGS_OFFSET), 0)?;
        Ok(())
    }
}

/// The shared runtime's math, which compiled code and the interpreter intrinsics both call.
pub fn shared_math(entry: RuntimeEntry, x: f64, y: f64) -> f64 {
    match entry {
        RuntimeEntry::Dsin => x.sin(),
        RuntimeEntry::Dcos => x.cos(),
        RuntimeEntry::Dtan => x.tan(),
        RuntimeEntry::Dlog => x.ln(),
        RuntimeEntry::Dlog10 => x.log10(),
        RuntimeEntry::Dexp => x.exp(),
        RuntimeEntry::Dpow => x.powf(y),
        _ => f64::NAN,
    }
}
