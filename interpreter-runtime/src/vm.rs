use std::collections::HashMap;
use std::sync::Arc;

use entry_asm::error::SimulationError;
use entry_asm::registers::{C_RARG0, C_RARG1, C_RARG2, C_RARG3, C_RARG4, C_RARG5, HEAP_BASE as HEAP_BASE_REGISTER, METHOD, RAX, RBP, SENDER_SP, THREAD};
use entry_asm::runtime_entry::ThrowableKind;
use entry_asm::simulator::{Cpu, SimulatedMemory, Simulator, StepOutcome};
use interpreter_common::basic_type::{BasicType, TosState, NUMBER_OF_STATES};
use interpreter_common::frame_layout::{slot_byte_offset, INTERPRETER_FRAME_BCP_OFFSET, INTERPRETER_FRAME_LAST_SP_OFFSET};
use interpreter_common::method_kind::IntrinsicId;
use interpreter_common::vm_layout::{ACC_STATIC, METHOD_INTERPRETER_ENTRY_OFFSET, THREAD_PENDING_EXCEPTION_OFFSET};
use interpreter_common::WORD_SIZE;
use template_interpreter::frame_walk::{walk_interpreter_frames, InterpreterFrame};
use template_interpreter::generator::InvokeKind;
use template_interpreter::registry::InterpreterRegistry;

use crate::address_map::{
    external_addresses, template_address, template_at, COMPILED_CALLER_EXCEPTION_LANDING, COMPILED_CALLER_RETURN, EXIT, HEAP_BASE, HEAP_SIZE, METASPACE_BASE, METASPACE_SIZE, TABLES_BASE,
    TABLES_SIZE, THREADS_BASE, THREADS_SIZE, THREAD_AREA_SIZE,
};
use crate::crc::{crc_table, CRC32C_POLYNOMIAL, CRC32_POLYNOMIAL};
use crate::error::RuntimeError;
use crate::metadata::{MethodBuilder, MethodRef};
use crate::natives::{NativeCall, NativeFunction};
use crate::options::VmOptions;
use crate::raw::field;
use crate::runtime::{VmEvent, VmRuntime};
use crate::thread::{ThreadId, ThreadLayout};

/// A Java argument as the call stub receives it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JavaValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Object(u64),
}

impl JavaValue {
    /// Stack words of the value, lowest local first. Longs and doubles keep their value in the
    /// second word.
    pub fn words(&self) -> Vec<u64> {
        match *self {
            JavaValue::Int(value) => vec![value as i64 as u64],
            JavaValue::Long(value) => vec![0, value as u64],
            JavaValue::Float(value) => vec![value.to_bits() as u64],
            JavaValue::Double(value) => vec![0, value.to_bits()],
            JavaValue::Object(value) => vec![value],
        }
    }
}

/// How control left generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The call returned to its caller with this result. Results narrower than a word are zero
    /// extended from what the call stub stored.
    Returned(u64),
    Threw(u64),
    /// The method reached its first bytecode, or the bytecode after an invoke.
    Dispatched { state: TosState, bytecode: u8 },
    /// A counter overflow continued in compiled code.
    Compiled { entry: u64 },
}

impl CallOutcome {
    pub fn returned(&self) -> Option<u64> {
        match self {
            CallOutcome::Returned(value) => Some(*value),
            _ => None,
        }
    }

    pub fn thrown(&self) -> Option<u64> {
        match self {
            CallOutcome::Threw(exception) => Some(*exception),
            _ => None,
        }
    }
}

/// Who a thread's current call returns to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Caller {
    CallStub { result: BasicType },
    Compiled,
}

/// Generated entries, the memory they run against and the runtime behind them.
pub struct Vm {
    pub registry: Arc<InterpreterRegistry>,
    pub memory: SimulatedMemory,
    pub runtime: VmRuntime,
    simulator: Simulator,
    cpus: Vec<Cpu>,
    callers: HashMap<ThreadId, Caller>,
    options: VmOptions,
}

impl Vm {
    pub fn new(options: VmOptions) -> Result<Self, RuntimeError> {
        let external = external_addresses();
        let mut memory = SimulatedMemory::new();
        memory.map("tables", TABLES_BASE, TABLES_SIZE)?;
        memory.map("metaspace", METASPACE_BASE, METASPACE_SIZE)?;
        memory.map("threads", THREADS_BASE, THREADS_SIZE)?;
        memory.map("java heap", HEAP_BASE, HEAP_SIZE)?;

        memory.write_u64(external.narrow_oop_base, HEAP_BASE)?;
        for (table, polynomial) in [(external.crc_table, CRC32_POLYNOMIAL), (external.crc32c_table, CRC32C_POLYNOMIAL)] {
            for (i, entry) in crc_table(polynomial).iter().enumerate() {
                memory.write_u32(table + i as u64 * 4, *entry)?;
            }
        }
        for state in (0..NUMBER_OF_STATES).filter_map(TosState::from_index) {
            let table = external.dispatch_table(state.index());
            for bytecode in 0..=u8::MAX {
                memory.write_u64(table + bytecode as u64 * WORD_SIZE as u64, template_address(state, bytecode))?;
            }
        }

        let registry = Arc::new(InterpreterRegistry::initialize(options.flags.clone(), external)?);
        let runtime = VmRuntime::new(registry.clone(), options.counters);
        let simulator = Simulator::new(registry.code_space.clone());
        Ok(Self { registry, memory, runtime, simulator, cpus: vec![], callers: HashMap::new(), options })
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    pub fn spawn_thread(&mut self) -> Result<ThreadId, RuntimeError> {
        let id = ThreadId(self.runtime.threads.len());
        if (id.0 as u64 + 1) * THREAD_AREA_SIZE > THREADS_SIZE as u64 {
            return Err(RuntimeError::OutOfMemory("thread area"));
        }
        let thread = ThreadLayout::create(&mut self.memory, id, self.options.stack_size)?;
        self.cpus.push(thread.initial_cpu());
        self.runtime.threads.push(thread);
        Ok(id)
    }

    pub fn define_class(&mut self, name: &str) -> Result<u64, RuntimeError> {
        self.runtime.universe.define_class(&mut self.memory, name)
    }

    pub fn define_method(&mut self, builder: MethodBuilder, holder: u64) -> Result<MethodRef, RuntimeError> {
        self.runtime.universe.metaspace.define_method(&mut self.memory, &self.registry, builder, holder)
    }

    /// A static method of the given intrinsic kind, with no bytecodes.
    pub fn define_intrinsic(&mut self, name: &str, descriptor: &str, intrinsic: IntrinsicId, holder: u64) -> Result<MethodRef, RuntimeError> {
        let builder = MethodBuilder::new(name, descriptor, ACC_STATIC).intrinsic(intrinsic);
        self.define_method(builder, holder)
    }

    pub fn register_native(&mut self, name: impl Into<String>, function: impl FnMut(&mut NativeCall<'_>) -> Result<(), RuntimeError> + 'static) -> u64 {
        let function: NativeFunction = Box::new(function);
        self.runtime.natives.register(name, function)
    }

    pub fn new_object(&mut self, klass: u64, field_words: usize) -> Result<u64, RuntimeError> {
        self.runtime.universe.new_instance(&mut self.memory, klass, field_words)
    }

    pub fn new_exception(&mut self, kind: ThrowableKind, message: Option<&str>) -> Result<u64, RuntimeError> {
        self.runtime.new_exception(&mut self.memory, kind, message.map(str::to_string))
    }

    pub fn cpu(&self, thread: ThreadId) -> Result<&Cpu, RuntimeError> {
        self.cpus.get(thread.0).ok_or(RuntimeError::UnknownThread(thread.0 as u64))
    }

    pub fn cpu_mut(&mut self, thread: ThreadId) -> Result<&mut Cpu, RuntimeError> {
        self.cpus.get_mut(thread.0).ok_or(RuntimeError::UnknownThread(thread.0 as u64))
    }

    pub fn events(&self) -> &[VmEvent] {
        self.runtime.events()
    }

    pub fn take_events(&mut self) -> Vec<VmEvent> {
        self.runtime.take_events()
    }

    /// Makes `method` continue in compiled code on its next counter overflow.
    pub fn set_compiled_entry(&mut self, method: &MethodRef) -> u64 {
        self.runtime.set_compiled_entry(method.address)
    }

    fn arguments(method: &MethodRef, args: &[JavaValue]) -> Result<Vec<u64>, RuntimeError> {
        let words: Vec<u64> = args.iter().flat_map(JavaValue::words).collect();
        if words.len() != method.size_of_parameters as usize {
            return Err(RuntimeError::ArgumentCount("java call", words.len()));
        }
        Ok(words)
    }

    fn interpreter_entry(&self, method: &MethodRef) -> Result<u64, RuntimeError> {
        Ok(self.memory.read_u64(field(method.address, METHOD_INTERPRETER_ENTRY_OFFSET))?)
    }

    /// Sets `thread` up to enter `method` through the call stub, the way `JavaCalls::call` does.
    /// Nothing runs until [`Vm::run`].
    pub fn prepare_call(&mut self, thread: ThreadId, method: &MethodRef, args: &[JavaValue], result: BasicType) -> Result<(), RuntimeError> {
        let words = Self::arguments(method, args)?;
        let layout = self.runtime.thread(thread)?.clone();
        for (i, word) in words.iter().enumerate() {
            self.memory.write_u64(layout.parameter_area() + (i * WORD_SIZE as usize) as u64, *word)?;
        }
        self.memory.write_u64(layout.result_slot(), 0)?;
        let result = if result.is_reference() { BasicType::Object } else { result };

        let mut cpu = layout.initial_cpu();
        cpu.set(C_RARG0, 0);
        cpu.set(C_RARG1, layout.result_slot());
        cpu.set(C_RARG2, result.code() as u64);
        cpu.set(C_RARG3, method.address);
        cpu.set(C_RARG4, self.interpreter_entry(method)?);
        cpu.set(C_RARG5, layout.parameter_area());
        cpu.push(&mut self.memory, layout.address)?;
        cpu.push(&mut self.memory, words.len() as u64)?;
        cpu.push(&mut self.memory, EXIT)?;
        cpu.rip = self.registry.stubs.call_stub_entry.raw();
        self.cpus[thread.0] = cpu;
        self.callers.insert(thread, Caller::CallStub { result });
        Ok(())
    }

    /// Calls `method` from C and runs until control leaves generated code.
    pub fn call_java(&mut self, thread: ThreadId, method: &MethodRef, args: &[JavaValue], result: BasicType) -> Result<CallOutcome, RuntimeError> {
        self.prepare_call(thread, method, args, result)?;
        self.run(thread)
    }

    /// Calls `method` the way compiled code does: arguments on the stack, r13 the sender sp and
    /// Method* in rbx. The result is rax as the method left it.
    pub fn call_from_compiled(&mut self, thread: ThreadId, method: &MethodRef, args: &[JavaValue]) -> Result<CallOutcome, RuntimeError> {
        let words = Self::arguments(method, args)?;
        let entry = self.interpreter_entry(method)?;
        let layout = self.runtime.thread(thread)?.clone();
        let mut cpu = layout.initial_cpu();
        cpu.set(THREAD, layout.address);
        cpu.set(HEAP_BASE_REGISTER, HEAP_BASE);
        for word in &words {
            cpu.push(&mut self.memory, *word)?;
        }
        cpu.set(SENDER_SP, cpu.rsp());
        cpu.push(&mut self.memory, COMPILED_CALLER_RETURN)?;
        cpu.set(METHOD, method.address);
        cpu.rip = entry;
        self.cpus[thread.0] = cpu;
        self.callers.insert(thread, Caller::Compiled);
        self.run(thread)
    }

    /// Runs one instruction of `thread`.
    pub fn step(&mut self, thread: ThreadId) -> Result<StepOutcome, RuntimeError> {
        let layout = self.runtime.thread(thread)?.clone();
        let cpu = self.cpus.get_mut(thread.0).ok_or(RuntimeError::UnknownThread(thread.0 as u64))?;
        self.runtime.current = Some(thread);
        let before = layout.state(&self.memory)?;
        let outcome = self.simulator.step(cpu, &mut self.memory, &mut self.runtime)?;
        let after = layout.state(&self.memory)?;
        if before != after {
            tracing::trace!(thread = thread.0, from = ?before, to = ?after, "thread state changed");
            self.runtime.events.push(VmEvent::ThreadStateChanged { thread, from: before, to: after });
        }
        Ok(outcome)
    }

    fn run_until_halt(&mut self, thread: ThreadId) -> Result<u64, RuntimeError> {
        for _ in 0..self.options.max_steps {
            if let StepOutcome::Halted { address } = self.step(thread)? {
                return Ok(address);
            }
        }
        Err(RuntimeError::Simulation(SimulationError::StepLimit(self.options.max_steps)))
    }

    /// Runs `thread` until control leaves generated code.
    pub fn run(&mut self, thread: ThreadId) -> Result<CallOutcome, RuntimeError> {
        let address = self.run_until_halt(thread)?;
        self.classify(thread, address)
    }

    /// Runs `thread` until it is about to execute `address`.
    pub fn run_to(&mut self, thread: ThreadId, address: u64) -> Result<(), RuntimeError> {
        for _ in 0..self.options.max_steps {
            if self.cpu(thread)?.rip == address {
                return Ok(());
            }
            if let StepOutcome::Halted { address: halted } = self.step(thread)? {
                return Err(RuntimeError::UnexpectedHalt(halted));
            }
        }
        Err(RuntimeError::Simulation(SimulationError::StepLimit(self.options.max_steps)))
    }

    fn classify(&mut self, thread: ThreadId, address: u64) -> Result<CallOutcome, RuntimeError> {
        if let Some((state, bytecode)) = template_at(address) {
            return Ok(CallOutcome::Dispatched { state, bytecode });
        }
        let caller = self.callers.get(&thread).copied();
        match (address, caller) {
            (EXIT, Some(Caller::CallStub { result })) => {
                let layout = self.runtime.thread(thread)?.clone();
                let pending = layout.pending_exception(&self.memory)?;
                if pending != 0 {
                    self.memory.write_u64(layout.field(THREAD_PENDING_EXCEPTION_OFFSET), 0)?;
                    return Ok(CallOutcome::Threw(pending));
                }
                let size = match result {
                    BasicType::Object | BasicType::Long | BasicType::Double => 8,
                    _ => 4,
                };
                Ok(CallOutcome::Returned(self.memory.read(layout.result_slot(), size)?))
            }
            (COMPILED_CALLER_RETURN, Some(Caller::Compiled)) => Ok(CallOutcome::Returned(self.cpu(thread)?.get(RAX))),
            (COMPILED_CALLER_EXCEPTION_LANDING, Some(Caller::Compiled)) => Ok(CallOutcome::Threw(self.cpu(thread)?.get(RAX))),
            (address, _) if self.runtime.compiled.values().any(|entry| *entry == address) => Ok(CallOutcome::Compiled { entry: address }),
            (address, _) => Err(RuntimeError::UnexpectedHalt(address)),
        }
    }

    /// Performs an invoke for a thread stopped at the dispatch of an invoke bytecode: pushes the
    /// arguments, returns to the return entry of `kind` and `state` and enters `callee`. Nothing
    /// runs until [`Vm::run`].
    pub fn invoke_from_interpreter(&mut self, thread: ThreadId, callee: &MethodRef, args: &[JavaValue], kind: InvokeKind, state: TosState) -> Result<(), RuntimeError> {
        let words = Self::arguments(callee, args)?;
        let entry = self.interpreter_entry(callee)?;
        let return_entry = self.registry.interpreter.return_entry(kind, state).ok_or(RuntimeError::NoReturnEntry(state))?;
        let cpu = self.cpus.get_mut(thread.0).ok_or(RuntimeError::UnknownThread(thread.0 as u64))?;
        if template_at(cpu.rip).is_none() {
            return Err(RuntimeError::NotAtDispatch(thread.0));
        }

        let fp = cpu.get(RBP);
        self.memory.write_u64(fp.wrapping_add(slot_byte_offset(INTERPRETER_FRAME_BCP_OFFSET) as i64 as u64), cpu.get(SENDER_SP))?;
        for word in &words {
            cpu.push(&mut self.memory, *word)?;
        }
        let sender_sp = cpu.rsp();
        self.memory.write_u64(fp.wrapping_add(slot_byte_offset(INTERPRETER_FRAME_LAST_SP_OFFSET) as i64 as u64), sender_sp)?;
        cpu.push(&mut self.memory, return_entry.raw())?;
        cpu.set(SENDER_SP, sender_sp);
        cpu.set(METHOD, callee.address);
        cpu.rip = entry;
        Ok(())
    }

    /// The interpreter frame `thread` is executing in.
    pub fn current_frame(&self, thread: ThreadId) -> Result<InterpreterFrame, RuntimeError> {
        Ok(InterpreterFrame::read(&self.memory, self.cpu(thread)?.get(RBP))?)
    }

    /// Interpreter frames of `thread` from the current one outwards.
    pub fn interpreter_frames(&self, thread: ThreadId) -> Result<Vec<InterpreterFrame>, RuntimeError> {
        Ok(walk_interpreter_frames(&self.memory, &self.registry.interpreter, self.cpu(thread)?.get(RBP))?)
    }

    pub fn pending_exception(&self, thread: ThreadId) -> Result<u64, RuntimeError> {
        self.runtime.thread(thread)?.pending_exception(&self.memory)
    }

    pub fn exception_kind(&self, exception: u64) -> Option<ThrowableKind> {
        self.runtime.universe.heap.object(exception).ok().and_then(|info| info.throwable)
    }

    pub fn exception_message(&self, exception: u64) -> Option<String> {
        self.runtime.universe.heap.object(exception).ok().and_then(|info| info.message.clone())
    }
}
