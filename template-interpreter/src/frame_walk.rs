use entry_asm::error::SimulationError;
use entry_asm::simulator::SimulatedMemory;
use interpreter_common::frame_layout::{
    slot_byte_offset, BASIC_OBJECT_LOCK_DISPLACED_HEADER_OFFSET, BASIC_OBJECT_LOCK_OBJ_OFFSET, INTERPRETER_FRAME_BCP_OFFSET, INTERPRETER_FRAME_CACHE_OFFSET, INTERPRETER_FRAME_LAST_SP_OFFSET,
    INTERPRETER_FRAME_LOCALS_OFFSET, INTERPRETER_FRAME_MDP_OFFSET, INTERPRETER_FRAME_METHOD_OFFSET, INTERPRETER_FRAME_MONITOR_BLOCK_BOTTOM_OFFSET, INTERPRETER_FRAME_MONITOR_BLOCK_TOP_OFFSET,
    INTERPRETER_FRAME_MONITOR_SIZE, INTERPRETER_FRAME_OOP_TEMP_OFFSET, INTERPRETER_FRAME_RESULT_HANDLER_OFFSET, INTERPRETER_FRAME_SENDER_SP_OFFSET, LINK_OFFSET, RETURN_ADDR_OFFSET,
};
use interpreter_common::vm_layout::{CONST_METHOD_CODES_OFFSET, METHOD_CONST_OFFSET};
use interpreter_common::WORD_SIZE;

use crate::generator::TemplateInterpreter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSlot {
    pub address: u64,
    pub displaced_header: u64,
    pub obj: u64,
}

/// The fixed part of an interpreter frame as found in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterFrame {
    pub fp: u64,
    pub method: u64,
    pub locals: u64,
    pub cache: u64,
    pub sender_sp: u64,
    pub last_sp: u64,
    pub bcp: u64,
    pub mdp: u64,
    pub return_address: u64,
    pub sender_fp: u64,
    /// Innermost monitor first.
    pub monitors: Vec<MonitorSlot>,
}

fn slot(memory: &SimulatedMemory, fp: u64, offset: i32) -> Result<u64, SimulationError> {
    memory.read_u64(fp.wrapping_add(slot_byte_offset(offset) as i64 as u64))
}

impl InterpreterFrame {
    pub fn read(memory: &SimulatedMemory, fp: u64) -> Result<Self, SimulationError> {
        let monitor_top = slot(memory, fp, INTERPRETER_FRAME_MONITOR_BLOCK_TOP_OFFSET)?;
        let monitor_bottom = fp.wrapping_add(slot_byte_offset(INTERPRETER_FRAME_MONITOR_BLOCK_BOTTOM_OFFSET) as i64 as u64);
        let mut monitors = vec![];
        let mut current = monitor_top;
        while current < monitor_bottom {
            monitors.push(MonitorSlot {
                address: current,
                displaced_header: memory.read_u64(current + BASIC_OBJECT_LOCK_DISPLACED_HEADER_OFFSET as u64)?,
                obj: memory.read_u64(current + BASIC_OBJECT_LOCK_OBJ_OFFSET as u64)?,
            });
            current += (INTERPRETER_FRAME_MONITOR_SIZE * WORD_SIZE) as u64;
        }
        Ok(Self {
            fp,
            method: slot(memory, fp, INTERPRETER_FRAME_METHOD_OFFSET)?,
            locals: slot(memory, fp, INTERPRETER_FRAME_LOCALS_OFFSET)?,
            cache: slot(memory, fp, INTERPRETER_FRAME_CACHE_OFFSET)?,
            sender_sp: slot(memory, fp, INTERPRETER_FRAME_SENDER_SP_OFFSET)?,
            last_sp: slot(memory, fp, INTERPRETER_FRAME_LAST_SP_OFFSET)?,
            bcp: slot(memory, fp, INTERPRETER_FRAME_BCP_OFFSET)?,
            mdp: slot(memory, fp, INTERPRETER_FRAME_MDP_OFFSET)?,
            return_address: slot(memory, fp, RETURN_ADDR_OFFSET)?,
            sender_fp: slot(memory, fp, LINK_OFFSET)?,
            monitors,
        })
    }

    /// Bytecode index of the frame. Native frames keep a zero bcp and have none.
    pub fn bci(&self, memory: &SimulatedMemory) -> Result<Option<u64>, SimulationError> {
        if self.bcp == 0 {
            return Ok(None);
        }
        let const_method = memory.read_u64(self.method + METHOD_CONST_OFFSET as u64)?;
        Ok(Some(self.bcp - (const_method + CONST_METHOD_CODES_OFFSET as u64)))
    }

    /// Address of local `n`.
    pub fn local_address(&self, n: u64) -> u64 {
        self.locals - n * WORD_SIZE as u64
    }

    /// Words of the native frame extension: the result handler and the oop temp.
    pub fn native_extension(&self, memory: &SimulatedMemory) -> Result<(u64, u64), SimulationError> {
        Ok((slot(memory, self.fp, INTERPRETER_FRAME_RESULT_HANDLER_OFFSET)?, slot(memory, self.fp, INTERPRETER_FRAME_OOP_TEMP_OFFSET)?))
    }
}

/// Interpreter frames from `fp` outwards, stopping at the first frame that does not return into
/// the interpreter.
pub fn walk_interpreter_frames(memory: &SimulatedMemory, interpreter: &TemplateInterpreter, fp: u64) -> Result<Vec<InterpreterFrame>, SimulationError> {
    let mut frames = vec![];
    let mut current = fp;
    loop {
        let frame = InterpreterFrame::read(memory, current)?;
        let next = frame.sender_fp;
        let returns_into_interpreter = interpreter.contains(frame.return_address);
        frames.push(frame);
        if !returns_into_interpreter {
            return Ok(frames);
        }
        current = next;
    }
}
