use std::mem::size_of;

use memoffset::offset_of;
use static_assertions::const_assert_eq;

use crate::WORD_SIZE;

/// Fixed part of an interpreter activation, lowest address first. The frame pointer points at
/// `link`; everything below it is written by the frame prologue.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InterpreterFrameFixedPart {
    pub monitor_block_top: u64,
    pub bcp: u64,
    pub locals: u64,
    pub cache: u64,
    pub mdp: u64,
    pub method: u64,
    pub last_sp: u64,
    pub sender_sp: u64,
    pub link: u64,
    pub return_address: u64,
}

/// Words native entries push above the return address before building the fixed part.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NativeFrameExtension {
    pub oop_temp: u64,
    pub result_handler: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BasicObjectLock {
    pub displaced_header: u64,
    pub obj: u64,
}

pub const BASIC_OBJECT_LOCK_DISPLACED_HEADER_OFFSET: i32 = offset_of!(BasicObjectLock, displaced_header) as i32;
pub const BASIC_OBJECT_LOCK_OBJ_OFFSET: i32 = offset_of!(BasicObjectLock, obj) as i32;

const LINK_BYTE_OFFSET: i32 = offset_of!(InterpreterFrameFixedPart, link) as i32;

const fn word_offset(byte_offset: usize) -> i32 {
    (byte_offset as i32 - LINK_BYTE_OFFSET) / WORD_SIZE
}

pub const LINK_OFFSET: i32 = 0;
pub const RETURN_ADDR_OFFSET: i32 = word_offset(offset_of!(InterpreterFrameFixedPart, return_address));
pub const SENDER_SP_OFFSET: i32 = RETURN_ADDR_OFFSET + 1;

pub const INTERPRETER_FRAME_RESULT_HANDLER_OFFSET: i32 = SENDER_SP_OFFSET + (offset_of!(NativeFrameExtension, result_handler) as i32) / WORD_SIZE;
pub const INTERPRETER_FRAME_OOP_TEMP_OFFSET: i32 = SENDER_SP_OFFSET + (offset_of!(NativeFrameExtension, oop_temp) as i32) / WORD_SIZE;

pub const INTERPRETER_FRAME_SENDER_SP_OFFSET: i32 = word_offset(offset_of!(InterpreterFrameFixedPart, sender_sp));
pub const INTERPRETER_FRAME_LAST_SP_OFFSET: i32 = word_offset(offset_of!(InterpreterFrameFixedPart, last_sp));
pub const INTERPRETER_FRAME_METHOD_OFFSET: i32 = word_offset(offset_of!(InterpreterFrameFixedPart, method));
pub const INTERPRETER_FRAME_MDP_OFFSET: i32 = word_offset(offset_of!(InterpreterFrameFixedPart, mdp));
pub const INTERPRETER_FRAME_CACHE_OFFSET: i32 = word_offset(offset_of!(InterpreterFrameFixedPart, cache));
pub const INTERPRETER_FRAME_LOCALS_OFFSET: i32 = word_offset(offset_of!(InterpreterFrameFixedPart, locals));
pub const INTERPRETER_FRAME_BCP_OFFSET: i32 = word_offset(offset_of!(InterpreterFrameFixedPart, bcp));
pub const INTERPRETER_FRAME_INITIAL_SP_OFFSET: i32 = word_offset(offset_of!(InterpreterFrameFixedPart, monitor_block_top));
pub const INTERPRETER_FRAME_MONITOR_BLOCK_TOP_OFFSET: i32 = INTERPRETER_FRAME_INITIAL_SP_OFFSET;
pub const INTERPRETER_FRAME_MONITOR_BLOCK_BOTTOM_OFFSET: i32 = INTERPRETER_FRAME_INITIAL_SP_OFFSET;

/// Monitor entry size in words.
pub const INTERPRETER_FRAME_MONITOR_SIZE: i32 = (size_of::<BasicObjectLock>() as i32) / WORD_SIZE;

const_assert_eq!(RETURN_ADDR_OFFSET, 1);
const_assert_eq!(INTERPRETER_FRAME_OOP_TEMP_OFFSET, 2);
const_assert_eq!(INTERPRETER_FRAME_RESULT_HANDLER_OFFSET, 3);
const_assert_eq!(INTERPRETER_FRAME_SENDER_SP_OFFSET, -1);
const_assert_eq!(INTERPRETER_FRAME_LAST_SP_OFFSET, -2);
const_assert_eq!(INTERPRETER_FRAME_METHOD_OFFSET, -3);
const_assert_eq!(INTERPRETER_FRAME_MDP_OFFSET, -4);
const_assert_eq!(INTERPRETER_FRAME_CACHE_OFFSET, -5);
const_assert_eq!(INTERPRETER_FRAME_LOCALS_OFFSET, -6);
const_assert_eq!(INTERPRETER_FRAME_BCP_OFFSET, -7);
const_assert_eq!(INTERPRETER_FRAME_INITIAL_SP_OFFSET, -8);
const_assert_eq!(INTERPRETER_FRAME_MONITOR_SIZE, 2);

/// Byte offset from the frame pointer of a slot given in words.
pub const fn slot_byte_offset(word_offset: i32) -> i32 {
    word_offset * WORD_SIZE
}

/// Stack an activation needs beyond its locals: the fixed part below the link plus one monitor.
pub const OVERFLOW_CHECK_OVERHEAD_SIZE: i32 = -(INTERPRETER_FRAME_INITIAL_SP_OFFSET * WORD_SIZE) + INTERPRETER_FRAME_MONITOR_SIZE * WORD_SIZE;

const_assert_eq!(OVERFLOW_CHECK_OVERHEAD_SIZE, 80);

/// Frame of the call stub, lowest address first. rbp points at `saved_rbp`; the words above the
/// return address are the stack arguments of the C caller.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CallStubFrame {
    pub mxcsr: u64,
    pub saved_r15: u64,
    pub saved_r14: u64,
    pub saved_r13: u64,
    pub saved_r12: u64,
    pub saved_rbx: u64,
    pub call_wrapper: u64,
    pub result: u64,
    pub result_type: u64,
    pub method: u64,
    pub entry_point: u64,
    pub parameters: u64,
    pub saved_rbp: u64,
    pub return_address: u64,
    pub parameter_size: u64,
    pub thread: u64,
}

const CALL_STUB_RBP_BYTE_OFFSET: i32 = offset_of!(CallStubFrame, saved_rbp) as i32;

const fn call_stub_word_offset(byte_offset: usize) -> i32 {
    (byte_offset as i32 - CALL_STUB_RBP_BYTE_OFFSET) / WORD_SIZE
}

pub const CALL_STUB_RSP_AFTER_CALL_OFFSET: i32 = call_stub_word_offset(offset_of!(CallStubFrame, mxcsr));
pub const CALL_STUB_R15_OFFSET: i32 = call_stub_word_offset(offset_of!(CallStubFrame, saved_r15));
pub const CALL_STUB_R14_OFFSET: i32 = call_stub_word_offset(offset_of!(CallStubFrame, saved_r14));
pub const CALL_STUB_R13_OFFSET: i32 = call_stub_word_offset(offset_of!(CallStubFrame, saved_r13));
pub const CALL_STUB_R12_OFFSET: i32 = call_stub_word_offset(offset_of!(CallStubFrame, saved_r12));
pub const CALL_STUB_RBX_OFFSET: i32 = call_stub_word_offset(offset_of!(CallStubFrame, saved_rbx));
pub const CALL_STUB_CALL_WRAPPER_OFFSET: i32 = call_stub_word_offset(offset_of!(CallStubFrame, call_wrapper));
pub const CALL_STUB_RESULT_OFFSET: i32 = call_stub_word_offset(offset_of!(CallStubFrame, result));
pub const CALL_STUB_RESULT_TYPE_OFFSET: i32 = call_stub_word_offset(offset_of!(CallStubFrame, result_type));
pub const CALL_STUB_METHOD_OFFSET: i32 = call_stub_word_offset(offset_of!(CallStubFrame, method));
pub const CALL_STUB_ENTRY_POINT_OFFSET: i32 = call_stub_word_offset(offset_of!(CallStubFrame, entry_point));
pub const CALL_STUB_PARAMETERS_OFFSET: i32 = call_stub_word_offset(offset_of!(CallStubFrame, parameters));
pub const CALL_STUB_PARAMETER_SIZE_OFFSET: i32 = call_stub_word_offset(offset_of!(CallStubFrame, parameter_size));
pub const CALL_STUB_THREAD_OFFSET: i32 = call_stub_word_offset(offset_of!(CallStubFrame, thread));

const_assert_eq!(CALL_STUB_RSP_AFTER_CALL_OFFSET, -12);
const_assert_eq!(CALL_STUB_PARAMETERS_OFFSET, -1);
const_assert_eq!(CALL_STUB_PARAMETER_SIZE_OFFSET, 2);
const_assert_eq!(CALL_STUB_THREAD_OFFSET, 3);
