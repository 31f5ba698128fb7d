use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use entry_asm::error::SimulationError;
use entry_asm::registers::C_RARG0;
use entry_asm::runtime_entry::{RuntimeEntry, ThrowableKind};
use entry_asm::simulator::{Cpu, ExternalOutcome, Runtime, SimulatedMemory};
use entry_asm::CodeAddress;
use interpreter_common::basic_type::TosState;
use interpreter_common::vm_layout::{ThreadState, THREAD_JNI_ENVIRONMENT_OFFSET, THREAD_LAST_JAVA_FP_OFFSET};
use template_interpreter::frame_walk::InterpreterFrame;
use template_interpreter::registry::InterpreterRegistry;

use crate::address_map::{template_at, COMPILED_BASE, COMPILED_CALLER_EXCEPTION_LANDING, COMPILED_CALLER_RETURN, COMPILED_STRIDE, EXIT};
use crate::error::RuntimeError;
use crate::heap::Universe;
use crate::natives::{NativeCall, NativeRegistry};
use crate::options::CounterPolicy;
use crate::thread::{ThreadId, ThreadLayout};

/// Something the generated code made the runtime do, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmEvent {
    RuntimeCall(RuntimeEntry),
    ThreadStateChanged { thread: ThreadId, from: Option<ThreadState>, to: Option<ThreadState> },
    MonitorEnter { obj: u64, lock: u64 },
    MonitorExit { obj: u64 },
    CounterOverflow { method: u64 },
    MethodProfiled { method: u64 },
    NativeCalled { address: u64, state: Option<ThreadState> },
    /// The transition back from a native stopped for a safepoint or suspension.
    NativeTransition { state: Option<ThreadState> },
    SignatureHandlerPromoted { method: u64, handler: CodeAddress },
    DispatchStarted { state: TosState, bytecode: u8 },
    ExceptionCreated { kind: ThrowableKind, exception: u64 },
    G1PreBarrier { obj: u64 },
    Reguard,
    ObjectRelocated { from: u64, to: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOwner {
    pub thread: ThreadId,
    pub recursions: u32,
    /// Mark word the object had before it was first locked.
    pub displaced_header: u64,
}

/// The runtime side of generated code: everything behind the runtime entries, plus the code that
/// is not generated (templates, natives, compiled code and the C caller of the call stub).
pub struct VmRuntime {
    pub(crate) registry: Arc<InterpreterRegistry>,
    pub universe: Universe,
    pub natives: NativeRegistry,
    pub(crate) threads: Vec<ThreadLayout>,
    /// The thread being stepped, for the entries that are not told.
    pub(crate) current: Option<ThreadId>,
    pub(crate) counters: CounterPolicy,
    pub(crate) compiled: HashMap<u64, u64>,
    pub(crate) monitors: HashMap<u64, MonitorOwner>,
    pub(crate) pending_relocations: Vec<u64>,
    pub(crate) events: Vec<VmEvent>,
}

impl VmRuntime {
    pub fn new(registry: Arc<InterpreterRegistry>, counters: CounterPolicy) -> Self {
        Self {
            registry,
            universe: Universe::default(),
            natives: NativeRegistry::default(),
            threads: vec![],
            current: None,
            counters,
            compiled: HashMap::new(),
            monitors: HashMap::new(),
            pending_relocations: vec![],
            events: vec![],
        }
    }

    pub fn registry(&self) -> &InterpreterRegistry {
        &self.registry
    }

    pub fn events(&self) -> &[VmEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<VmEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn thread(&self, id: ThreadId) -> Result<&ThreadLayout, RuntimeError> {
        self.threads.get(id.0).ok_or(RuntimeError::UnknownThread(id.0 as u64))
    }

    pub(crate) fn thread_at(&self, address: u64) -> Result<ThreadLayout, RuntimeError> {
        self.threads.iter().find(|thread| thread.address == address).cloned().ok_or(RuntimeError::UnknownThread(address))
    }

    pub fn monitor(&self, obj: u64) -> Option<MonitorOwner> {
        self.monitors.get(&obj).copied()
    }

    /// Gives `method` compiled code: a counter overflow from now on continues there.
    pub fn set_compiled_entry(&mut self, method: u64) -> u64 {
        let next = COMPILED_BASE + self.compiled.len() as u64 * COMPILED_STRIDE;
        *self.compiled.entry(method).or_insert(next)
    }

    fn is_compiled_entry(&self, address: u64) -> bool {
        self.compiled.values().any(|entry| *entry == address)
    }

    /// Every range a moving collection has to update: the stacks and the thread areas, where
    /// handles and thread-local oops live.
    pub(crate) fn roots(&self) -> Vec<Range<u64>> {
        self.threads.iter().flat_map(|thread| [thread.stack.clone(), thread.area()]).collect()
    }

    /// The interpreter frame the thread published before calling into the runtime.
    pub(crate) fn last_java_frame(&self, memory: &SimulatedMemory, thread: &ThreadLayout) -> Result<InterpreterFrame, RuntimeError> {
        let fp = memory.read_u64(thread.field(THREAD_LAST_JAVA_FP_OFFSET))?;
        Ok(InterpreterFrame::read(memory, fp)?)
    }

    fn call_native(&mut self, address: u64, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<(), RuntimeError> {
        let jni_environment = cpu.get(C_RARG0);
        let thread = self.thread_at(jni_environment.wrapping_sub(THREAD_JNI_ENVIRONMENT_OFFSET as u64))?;
        let state = thread.state(memory)?;
        self.events.push(VmEvent::NativeCalled { address, state });
        tracing::debug!(native = self.natives.name(address).unwrap_or("<unnamed>"), thread = thread.id.0, state = ?state, "calling native");

        let roots = self.roots();
        let safepoint_state = self.registry.external.safepoint_state;
        let mut function = self.natives.take(address)?;
        let mut call = NativeCall { cpu, memory, universe: &mut self.universe, thread: &thread, roots, safepoint_state, deferred_relocations: vec![] };
        let result = function(&mut call);
        let deferred = std::mem::take(&mut call.deferred_relocations);
        self.natives.put_back(address, function);
        self.pending_relocations.extend(deferred);
        result
    }
}

impl Runtime for VmRuntime {
    fn call_runtime(&mut self, entry: RuntimeEntry, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<(), SimulationError> {
        self.events.push(VmEvent::RuntimeCall(entry));
        tracing::trace!(entry = entry.name(), "runtime entry");
        Ok(self.dispatch(entry, cpu, memory)?)
    }

    fn enter_external(&mut self, address: u64, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<ExternalOutcome, SimulationError> {
        if let Some((state, bytecode)) = template_at(address) {
            tracing::debug!(state = ?state, bytecode = %format!("{:#04x}", bytecode), "reached bytecode template");
            self.events.push(VmEvent::DispatchStarted { state, bytecode });
            return Ok(ExternalOutcome::Halt);
        }
        if address == EXIT || address == COMPILED_CALLER_RETURN || address == COMPILED_CALLER_EXCEPTION_LANDING || self.is_compiled_entry(address) {
            return Ok(ExternalOutcome::Halt);
        }
        if self.natives.contains(address) {
            self.call_native(address, cpu, memory)?;
            return Ok(ExternalOutcome::Return);
        }
        Err(SimulationError::NotCode(address))
    }
}
