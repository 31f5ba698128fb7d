use std::sync::Arc;

use crate::code_space::{CodeBlob, CodeSpace};
use crate::error::SimulationError;
use crate::instr::{Address, AluOp, Extension, FloatPrecision, FloatUnaryOp, Immediate, Instr, Operand, Size, Target};
use crate::registers::{FloatRegister, Register, CALL_CLOBBERED, HEAP_BASE, METHOD, NUMBER_OF_FLOAT_REGISTERS, NUMBER_OF_REGISTERS, RSP};
use crate::runtime_entry::{InvalidatedRegister, RuntimeEntry};

pub mod memory;

pub use memory::SimulatedMemory;

/// Value left in registers a call is allowed to destroy.
pub const POISON: u64 = 0xBAD0_BAD0_BAD0_BAD0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cpu {
    pub gpr: [u64; NUMBER_OF_REGISTERS],
    /// Low 64 bits of each xmm register.
    pub xmm: [u64; NUMBER_OF_FLOAT_REGISTERS],
    pub rip: u64,
}

impl Default for Cpu {
    fn default() -> Self {
        Self { gpr: [0; NUMBER_OF_REGISTERS], xmm: [0; NUMBER_OF_FLOAT_REGISTERS], rip: 0 }
    }
}

impl Cpu {
    pub fn get(&self, register: Register) -> u64 {
        self.gpr[register.index()]
    }

    pub fn set(&mut self, register: Register, value: u64) {
        self.gpr[register.index()] = value;
    }

    pub fn xmm(&self, register: FloatRegister) -> u64 {
        self.xmm[register.index()]
    }

    pub fn set_xmm(&mut self, register: FloatRegister, value: u64) {
        self.xmm[register.index()] = value;
    }

    pub fn rsp(&self) -> u64 {
        self.get(RSP)
    }

    pub fn push(&mut self, memory: &mut SimulatedMemory, value: u64) -> Result<(), SimulationError> {
        let rsp = self.rsp().wrapping_sub(8);
        memory.write_u64(rsp, value)?;
        self.set(RSP, rsp);
        Ok(())
    }

    pub fn pop(&mut self, memory: &mut SimulatedMemory) -> Result<u64, SimulationError> {
        let rsp = self.rsp();
        let value = memory.read_u64(rsp)?;
        self.set(RSP, rsp.wrapping_add(8));
        Ok(value)
    }

    pub fn effective_address(&self, address: &Address) -> u64 {
        let mut result = self.get(address.base).wrapping_add(address.disp as i64 as u64);
        if let Some((index, scale)) = address.index {
            result = result.wrapping_add(self.get(index).wrapping_mul(scale.factor() as u64));
        }
        result
    }

    /// Trashes what the C calling convention lets a callee trash. The result registers survive.
    pub fn poison_caller_saved(&mut self) {
        for register in CALL_CLOBBERED {
            self.set(register, POISON);
        }
        for xmm in 1..NUMBER_OF_FLOAT_REGISTERS {
            self.xmm[xmm] = POISON;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalOutcome {
    /// Behave like a C function: the return address on top of the stack is popped and execution
    /// continues there.
    Return,
    Halt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Halted { address: u64 },
}

/// Everything generated code reaches outside itself.
pub trait Runtime {
    /// Called with the return address pushed, so `rsp + 8` is the caller's stack pointer.
    fn call_runtime(&mut self, entry: RuntimeEntry, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<(), SimulationError>;

    /// Control reached `address`, which is not generated code. The return address of a call, if
    /// any, is on top of the stack.
    fn enter_external(&mut self, address: u64, cpu: &mut Cpu, memory: &mut SimulatedMemory) -> Result<ExternalOutcome, SimulationError>;
}

/// Executes generated instructions one at a time against simulated registers and memory.
pub struct Simulator {
    code_space: Arc<CodeSpace>,
    current: Option<Arc<CodeBlob>>,
    steps: u64,
}

impl Simulator {
    pub fn new(code_space: Arc<CodeSpace>) -> Self {
        Self { code_space, current: None, steps: 0 }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Runs until the runtime halts, returning the address that halted.
    pub fn run(&mut self, cpu: &mut Cpu, memory: &mut SimulatedMemory, runtime: &mut dyn Runtime, max_steps: u64) -> Result<u64, SimulationError> {
        for _ in 0..max_steps {
            if let StepOutcome::Halted { address } = self.step(cpu, memory, runtime)? {
                return Ok(address);
            }
        }
        Err(SimulationError::StepLimit(max_steps))
    }

    fn blob_for(&mut self, address: u64) -> Option<Arc<CodeBlob>> {
        if let Some(current) = &self.current {
            if current.contains(address) {
                return Some(current.clone());
            }
        }
        let blob = self.code_space.blob_for(address)?;
        self.current = Some(blob.clone());
        Some(blob)
    }

    pub fn step(&mut self, cpu: &mut Cpu, memory: &mut SimulatedMemory, runtime: &mut dyn Runtime) -> Result<StepOutcome, SimulationError> {
        self.steps += 1;
        let address = cpu.rip;
        let blob = match self.blob_for(address) {
            Some(blob) => blob,
            None => {
                return match runtime.enter_external(address, cpu, memory)? {
                    ExternalOutcome::Halt => Ok(StepOutcome::Halted { address }),
                    ExternalOutcome::Return => {
                        cpu.rip = cpu.pop(memory)?;
                        cpu.poison_caller_saved();
                        Ok(StepOutcome::Continue)
                    }
                };
            }
        };
        let instr = blob.instruction_at(address).ok_or(SimulationError::NotCode(address))?;
        tracing::trace!(address = %format!("{:#x}", address), instr = %instr, "step");
        let next = address + 1;
        cpu.rip = next;
        match instr {
            Instr::Label { .. } => {}
            Instr::Mov { to, from } => cpu.set(*to, cpu.get(*from)),
            Instr::MovImm { to, value } => {
                let value = match value {
                    Immediate::Value(value) => *value,
                    Immediate::Code(code) => code.0,
                };
                cpu.set(*to, value)
            }
            Instr::Load { to, from, size, extension } => {
                let raw = memory.read(cpu.effective_address(from), size.bytes())?;
                cpu.set(*to, extend(raw, *size, *extension));
            }
            Instr::Store { to, from, size } => memory.write(cpu.effective_address(to), size.bytes(), cpu.get(*from))?,
            Instr::StoreImm { to, value, size } => memory.write(cpu.effective_address(to), size.bytes(), *value as i64 as u64)?,
            Instr::Lea { to, from } => cpu.set(*to, cpu.effective_address(from)),
            Instr::Extend { to, from, from_size, to_size, extension } => {
                let widened = extend(cpu.get(*from) & from_size.mask(), *from_size, *extension);
                let old = cpu.get(*to);
                cpu.set(*to, write_register_part(old, widened, *to_size));
            }
            Instr::Push { from } => {
                let value = read_operand(cpu, memory, from, Size::X86QWord)?;
                cpu.push(memory, value)?;
            }
            Instr::Pop { to } => {
                let value = cpu.pop(memory)?;
                cpu.set(*to, value);
            }
            Instr::Alu { op, to, from, size } => self.alu(cpu, memory, *op, to, from, *size)?,
            Instr::BranchCmp { a, b, size, condition, target } => {
                check_operands(a, b)?;
                let a = read_operand(cpu, memory, a, *size)?;
                let b = read_operand(cpu, memory, b, *size)?;
                if condition.holds(a, b, *size) {
                    cpu.rip = resolve(&blob, target)?;
                }
            }
            Instr::BranchTest { a, b, size, condition, target } => {
                check_operands(a, b)?;
                let a = read_operand(cpu, memory, a, *size)?;
                let b = read_operand(cpu, memory, b, *size)?;
                if condition.holds(a & b, 0, *size) {
                    cpu.rip = resolve(&blob, target)?;
                }
            }
            Instr::Jump { target } => cpu.rip = resolve(&blob, target)?,
            Instr::JumpReg { from } => cpu.rip = cpu.get(*from),
            Instr::JumpMem { from } => cpu.rip = memory.read_u64(cpu.effective_address(from))?,
            Instr::Call { target } => {
                let target = resolve(&blob, target)?;
                cpu.push(memory, next)?;
                cpu.rip = target;
            }
            Instr::CallReg { from } => {
                let target = cpu.get(*from);
                cpu.push(memory, next)?;
                cpu.rip = target;
            }
            Instr::CallRuntime { entry } => {
                if cpu.rsp() % 16 != 0 {
                    return Err(SimulationError::MisalignedCall { address, rsp: cpu.rsp() });
                }
                cpu.push(memory, next)?;
                tracing::trace!(entry = entry.name(), "runtime call");
                runtime.call_runtime(*entry, cpu, memory)?;
                cpu.rip = cpu.pop(memory)?;
                cpu.poison_caller_saved();
                for register in entry.invalidates() {
                    match register {
                        InvalidatedRegister::Method => cpu.set(METHOD, POISON),
                        InvalidatedRegister::HeapBase => cpu.set(HEAP_BASE, POISON),
                    }
                }
            }
            Instr::Ret => cpu.rip = cpu.pop(memory)?,
            Instr::LoadFloat { to, from, precision } => {
                let size = match precision {
                    FloatPrecision::Single => 4,
                    FloatPrecision::Double => 8,
                };
                let value = memory.read(cpu.effective_address(from), size)?;
                cpu.set_xmm(*to, value);
            }
            Instr::StoreFloat { to, from, precision } => {
                let size = match precision {
                    FloatPrecision::Single => 4,
                    FloatPrecision::Double => 8,
                };
                memory.write(cpu.effective_address(to), size, cpu.xmm(*from))?;
            }
            Instr::MovGprToXmm { to, from, size } => cpu.set_xmm(*to, cpu.get(*from) & size.mask()),
            Instr::MovXmmToGpr { to, from, size } => cpu.set(*to, cpu.xmm(*from) & size.mask()),
            Instr::FloatUnary { op, register } => {
                let value = f64::from_bits(cpu.xmm(*register));
                let result = match op {
                    FloatUnaryOp::Sqrt => value.sqrt(),
                    FloatUnaryOp::Abs => value.abs(),
                };
                cpu.set_xmm(*register, result.to_bits());
                if let Some(clobbered) = op.clobbers() {
                    cpu.set(clobbered, POISON);
                }
            }
            Instr::Stop { reason } => return Err(SimulationError::ShouldNotReachHere { reason: *reason, address }),
        }
        Ok(StepOutcome::Continue)
    }

    fn alu(&self, cpu: &mut Cpu, memory: &mut SimulatedMemory, op: AluOp, to: &Operand, from: &Operand, size: Size) -> Result<(), SimulationError> {
        check_operands(to, from)?;
        let a = read_operand(cpu, memory, to, size)?;
        let b = read_operand(cpu, memory, from, size)?;
        let count_mask = if size == Size::X86QWord { 63 } else { 31 };
        let result = match op {
            AluOp::Add => a.wrapping_add(b),
            AluOp::Sub => a.wrapping_sub(b),
            AluOp::And => a & b,
            AluOp::Or => a | b,
            AluOp::Xor => a ^ b,
            AluOp::Shl => a.wrapping_shl((b & count_mask) as u32),
            AluOp::Shr => (a & size.mask()).wrapping_shr((b & count_mask) as u32),
            AluOp::Sar => (size.sign_extend(a) >> (b & count_mask)) as u64,
        } & size.mask();
        match to {
            Operand::Reg(register) => {
                let old = cpu.get(*register);
                cpu.set(*register, write_register_part(old, result, size));
            }
            Operand::Mem(address) => memory.write(cpu.effective_address(address), size.bytes(), result)?,
            Operand::Imm(_) => return Err(SimulationError::InvalidOperands(format!("immediate destination in {:?}", op))),
        }
        Ok(())
    }
}

fn check_operands(a: &Operand, b: &Operand) -> Result<(), SimulationError> {
    match (a, b) {
        (Operand::Mem(_), Operand::Mem(_)) => Err(SimulationError::InvalidOperands(format!("{}, {}", a, b))),
        _ => Ok(()),
    }
}

fn extend(raw: u64, size: Size, extension: Extension) -> u64 {
    match extension {
        Extension::Zero => raw & size.mask(),
        Extension::Sign => size.sign_extend(raw) as u64,
    }
}

/// Dword writes clear the upper half, byte and word writes keep it.
fn write_register_part(old: u64, value: u64, size: Size) -> u64 {
    match size {
        Size::X86QWord => value,
        Size::X86DWord => value & Size::X86DWord.mask(),
        Size::Byte | Size::X86Word => (old & !size.mask()) | (value & size.mask()),
    }
}

fn read_operand(cpu: &Cpu, memory: &SimulatedMemory, operand: &Operand, size: Size) -> Result<u64, SimulationError> {
    Ok(match operand {
        Operand::Reg(register) => cpu.get(*register) & size.mask(),
        Operand::Mem(address) => memory.read(cpu.effective_address(address), size.bytes())?,
        Operand::Imm(imm) => (*imm as i64 as u64) & size.mask(),
    })
}

fn resolve(blob: &CodeBlob, target: &Target) -> Result<u64, SimulationError> {
    match target {
        Target::Label(label) => blob.label_address(*label).map(|address| address.0).ok_or(SimulationError::UnboundLabel(*label)),
        Target::Code(address) => Ok(address.0),
        Target::External(address) => Ok(*address),
    }
}
