use std::mem::size_of;

use memoffset::offset_of;
use static_assertions::const_assert_eq;

pub const ACC_PUBLIC: u32 = 0x0001;
pub const ACC_STATIC: u32 = 0x0008;
pub const ACC_SYNCHRONIZED: u32 = 0x0020;
pub const ACC_NATIVE: u32 = 0x0100;
pub const ACC_ABSTRACT: u32 = 0x0400;

/// Thread states written into `JavaThread::thread_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ThreadState {
    New = 2,
    InNative = 4,
    InNativeTrans = 5,
    InVm = 6,
    InJava = 8,
    Blocked = 10,
}

impl ThreadState {
    pub fn from_raw(raw: u32) -> Option<ThreadState> {
        Some(match raw {
            2 => ThreadState::New,
            4 => ThreadState::InNative,
            5 => ThreadState::InNativeTrans,
            6 => ThreadState::InVm,
            8 => ThreadState::InJava,
            10 => ThreadState::Blocked,
            _ => return None,
        })
    }
}

pub const STACK_GUARD_UNUSED: u32 = 0;
pub const STACK_GUARD_RESERVED_DISABLED: u32 = 1;
pub const STACK_GUARD_YELLOW_RESERVED_DISABLED: u32 = 2;
pub const STACK_GUARD_ENABLED: u32 = 3;

pub const POPFRAME_INACTIVE: u32 = 0;
pub const POPFRAME_PENDING_BIT: u32 = 1 << 0;
pub const POPFRAME_PROCESSING_BIT: u32 = 1 << 1;
pub const POPFRAME_FORCE_DEOPT_REEXECUTION_BIT: u32 = 1 << 2;

pub const SAFEPOINT_NOT_SYNCHRONIZED: u32 = 0;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct JavaThread {
    pub pending_exception: u64,
    pub vm_result: u64,
    pub last_java_sp: u64,
    pub last_java_fp: u64,
    pub last_java_pc: u64,
    pub active_handles: u64,
    /// The JNIEnv handed to natives is the address of this word.
    pub jni_environment: u64,
    pub stack_base: u64,
    pub stack_size: u64,
    pub jvmti_thread_state: u64,
    pub satb_mark_queue_index: u64,
    pub satb_mark_queue_buffer: u64,
    pub popframe_preserved_args: u64,
    pub popframe_preserved_args_size: u64,
    pub thread_state: u32,
    pub suspend_flags: u32,
    pub stack_guard_state: u32,
    pub popframe_condition: u32,
    pub do_not_unlock_if_synchronized: u8,
    pub pending_monitorenter: u8,
    pub satb_mark_queue_active: u8,
    pub padding: [u8; 5],
}

pub const THREAD_PENDING_EXCEPTION_OFFSET: i32 = offset_of!(JavaThread, pending_exception) as i32;
pub const THREAD_VM_RESULT_OFFSET: i32 = offset_of!(JavaThread, vm_result) as i32;
pub const THREAD_LAST_JAVA_SP_OFFSET: i32 = offset_of!(JavaThread, last_java_sp) as i32;
pub const THREAD_LAST_JAVA_FP_OFFSET: i32 = offset_of!(JavaThread, last_java_fp) as i32;
pub const THREAD_LAST_JAVA_PC_OFFSET: i32 = offset_of!(JavaThread, last_java_pc) as i32;
pub const THREAD_ACTIVE_HANDLES_OFFSET: i32 = offset_of!(JavaThread, active_handles) as i32;
pub const THREAD_JNI_ENVIRONMENT_OFFSET: i32 = offset_of!(JavaThread, jni_environment) as i32;
pub const THREAD_STACK_BASE_OFFSET: i32 = offset_of!(JavaThread, stack_base) as i32;
pub const THREAD_STACK_SIZE_OFFSET: i32 = offset_of!(JavaThread, stack_size) as i32;
pub const THREAD_JVMTI_THREAD_STATE_OFFSET: i32 = offset_of!(JavaThread, jvmti_thread_state) as i32;
pub const THREAD_SATB_MARK_QUEUE_INDEX_OFFSET: i32 = offset_of!(JavaThread, satb_mark_queue_index) as i32;
pub const THREAD_SATB_MARK_QUEUE_BUFFER_OFFSET: i32 = offset_of!(JavaThread, satb_mark_queue_buffer) as i32;
pub const THREAD_SATB_MARK_QUEUE_ACTIVE_OFFSET: i32 = offset_of!(JavaThread, satb_mark_queue_active) as i32;
pub const THREAD_POPFRAME_PRESERVED_ARGS_OFFSET: i32 = offset_of!(JavaThread, popframe_preserved_args) as i32;
pub const THREAD_POPFRAME_PRESERVED_ARGS_SIZE_OFFSET: i32 = offset_of!(JavaThread, popframe_preserved_args_size) as i32;
pub const THREAD_STATE_OFFSET: i32 = offset_of!(JavaThread, thread_state) as i32;
pub const THREAD_SUSPEND_FLAGS_OFFSET: i32 = offset_of!(JavaThread, suspend_flags) as i32;
pub const THREAD_STACK_GUARD_STATE_OFFSET: i32 = offset_of!(JavaThread, stack_guard_state) as i32;
pub const THREAD_POPFRAME_CONDITION_OFFSET: i32 = offset_of!(JavaThread, popframe_condition) as i32;
pub const THREAD_DO_NOT_UNLOCK_IF_SYNCHRONIZED_OFFSET: i32 = offset_of!(JavaThread, do_not_unlock_if_synchronized) as i32;
pub const THREAD_PENDING_MONITORENTER_OFFSET: i32 = offset_of!(JavaThread, pending_monitorenter) as i32;
pub const JAVA_THREAD_SIZE: usize = size_of::<JavaThread>();

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Method {
    pub const_method: u64,
    pub method_data: u64,
    pub method_counters: u64,
    pub access_flags: u32,
    pub intrinsic_id: u16,
    pub flags: u16,
    pub interpreter_entry: u64,
    pub native_function: u64,
    pub signature_handler: u64,
}

pub const METHOD_CONST_OFFSET: i32 = offset_of!(Method, const_method) as i32;
pub const METHOD_METHOD_DATA_OFFSET: i32 = offset_of!(Method, method_data) as i32;
pub const METHOD_METHOD_COUNTERS_OFFSET: i32 = offset_of!(Method, method_counters) as i32;
pub const METHOD_ACCESS_FLAGS_OFFSET: i32 = offset_of!(Method, access_flags) as i32;
pub const METHOD_INTRINSIC_ID_OFFSET: i32 = offset_of!(Method, intrinsic_id) as i32;
pub const METHOD_INTERPRETER_ENTRY_OFFSET: i32 = offset_of!(Method, interpreter_entry) as i32;
pub const METHOD_NATIVE_FUNCTION_OFFSET: i32 = offset_of!(Method, native_function) as i32;
pub const METHOD_SIGNATURE_HANDLER_OFFSET: i32 = offset_of!(Method, signature_handler) as i32;
pub const METHOD_SIZE: usize = size_of::<Method>();

/// Read-only part of a method. The bytecodes follow the header at [`CONST_METHOD_CODES_OFFSET`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstMethod {
    pub fingerprint: u64,
    pub constants: u64,
    /// Address of a [`Symbol`] holding the method descriptor.
    pub signature: u64,
    pub code_size: u16,
    pub max_stack: u16,
    pub max_locals: u16,
    pub size_of_parameters: u16,
}

pub const CONST_METHOD_FINGERPRINT_OFFSET: i32 = offset_of!(ConstMethod, fingerprint) as i32;
pub const CONST_METHOD_CONSTANTS_OFFSET: i32 = offset_of!(ConstMethod, constants) as i32;
pub const CONST_METHOD_SIGNATURE_OFFSET: i32 = offset_of!(ConstMethod, signature) as i32;
pub const CONST_METHOD_CODE_SIZE_OFFSET: i32 = offset_of!(ConstMethod, code_size) as i32;
pub const CONST_METHOD_MAX_STACK_OFFSET: i32 = offset_of!(ConstMethod, max_stack) as i32;
pub const CONST_METHOD_SIZE_OF_LOCALS_OFFSET: i32 = offset_of!(ConstMethod, max_locals) as i32;
pub const CONST_METHOD_SIZE_OF_PARAMETERS_OFFSET: i32 = offset_of!(ConstMethod, size_of_parameters) as i32;
pub const CONST_METHOD_CODES_OFFSET: i32 = size_of::<ConstMethod>() as i32;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Symbol {
    pub length: u16,
    pub padding: [u8; 6],
}

pub const SYMBOL_LENGTH_OFFSET: i32 = offset_of!(Symbol, length) as i32;
pub const SYMBOL_BODY_OFFSET: i32 = size_of::<Symbol>() as i32;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantPool {
    pub pool_holder: u64,
    pub cache: u64,
    pub length: u64,
}

pub const CONSTANT_POOL_POOL_HOLDER_OFFSET: i32 = offset_of!(ConstantPool, pool_holder) as i32;
pub const CONSTANT_POOL_CACHE_OFFSET: i32 = offset_of!(ConstantPool, cache) as i32;

/// Header of the cp cache; entries follow at [`CP_CACHE_BASE_OFFSET`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantPoolCache {
    pub constant_pool: u64,
    pub length: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantPoolCacheEntry {
    pub indices: u64,
    pub f1: u64,
    pub f2: u64,
    pub flags: u64,
}

pub const CP_CACHE_BASE_OFFSET: i32 = size_of::<ConstantPoolCache>() as i32;
pub const CP_CACHE_ENTRY_SIZE_IN_WORDS: i32 = (size_of::<ConstantPoolCacheEntry>() / 8) as i32;
pub const CP_CACHE_ENTRY_FLAGS_OFFSET: i32 = offset_of!(ConstantPoolCacheEntry, flags) as i32;
pub const CP_CACHE_ENTRY_PARAMETER_SIZE_MASK: u32 = 0xFF;
const_assert_eq!(CP_CACHE_ENTRY_SIZE_IN_WORDS, 4);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Klass {
    pub java_mirror: u64,
    pub super_klass: u64,
    pub name: u64,
}

pub const KLASS_JAVA_MIRROR_OFFSET: i32 = offset_of!(Klass, java_mirror) as i32;
pub const KLASS_SUPER_OFFSET: i32 = offset_of!(Klass, super_klass) as i32;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodCounters {
    pub interpreter_invocation_count: u32,
    pub invocation_counter: u32,
    pub backedge_counter: u32,
    pub interpreter_invocation_limit: u32,
    pub interpreter_profile_limit: u32,
    pub invoke_mask: u32,
    pub backedge_mask: u32,
    pub padding: u32,
}

pub const METHOD_COUNTERS_INTERPRETER_INVOCATION_COUNT_OFFSET: i32 = offset_of!(MethodCounters, interpreter_invocation_count) as i32;
pub const METHOD_COUNTERS_INVOCATION_COUNTER_OFFSET: i32 = offset_of!(MethodCounters, invocation_counter) as i32;
pub const METHOD_COUNTERS_BACKEDGE_COUNTER_OFFSET: i32 = offset_of!(MethodCounters, backedge_counter) as i32;
pub const METHOD_COUNTERS_INTERPRETER_INVOCATION_LIMIT_OFFSET: i32 = offset_of!(MethodCounters, interpreter_invocation_limit) as i32;
pub const METHOD_COUNTERS_INTERPRETER_PROFILE_LIMIT_OFFSET: i32 = offset_of!(MethodCounters, interpreter_profile_limit) as i32;
pub const METHOD_COUNTERS_INVOKE_MASK_OFFSET: i32 = offset_of!(MethodCounters, invoke_mask) as i32;

/// Profile header. Profile data cells follow at [`METHOD_DATA_DATA_OFFSET`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodData {
    pub invocation_counter: u32,
    pub backedge_counter: u32,
    pub invoke_mask: u32,
    pub backedge_mask: u32,
    pub data_size: u64,
}

pub const METHOD_DATA_INVOCATION_COUNTER_OFFSET: i32 = offset_of!(MethodData, invocation_counter) as i32;
pub const METHOD_DATA_INVOKE_MASK_OFFSET: i32 = offset_of!(MethodData, invoke_mask) as i32;
pub const METHOD_DATA_DATA_OFFSET: i32 = size_of::<MethodData>() as i32;

pub const INVOCATION_COUNTER_COUNT_SHIFT: u32 = 3;
pub const INVOCATION_COUNTER_COUNT_INCREMENT: u32 = 1 << INVOCATION_COUNTER_COUNT_SHIFT;
/// Clears the status bits below the count.
pub const INVOCATION_COUNTER_COUNT_MASK_VALUE: u32 = !(INVOCATION_COUNTER_COUNT_INCREMENT - 1);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct JniHandleBlock {
    pub top: u32,
    pub padding: u32,
    pub next: u64,
}

pub const JNI_HANDLE_BLOCK_TOP_OFFSET: i32 = offset_of!(JniHandleBlock, top) as i32;
/// Handle slots follow the header.
pub const JNI_HANDLE_BLOCK_HANDLES_OFFSET: i32 = size_of::<JniHandleBlock>() as i32;

pub const EARLYRET_INACTIVE: u32 = 0;
pub const EARLYRET_PENDING: u32 = 1;
/// `TosState` value meaning "no value".
pub const ILLEGAL_TOS: u32 = 10;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct JvmtiThreadState {
    pub earlyret_state: u32,
    pub earlyret_tos: u32,
    pub earlyret_value: u64,
    pub earlyret_oop: u64,
}

pub const JVMTI_EARLYRET_STATE_OFFSET: i32 = offset_of!(JvmtiThreadState, earlyret_state) as i32;
pub const JVMTI_EARLYRET_TOS_OFFSET: i32 = offset_of!(JvmtiThreadState, earlyret_tos) as i32;
pub const JVMTI_EARLYRET_VALUE_OFFSET: i32 = offset_of!(JvmtiThreadState, earlyret_value) as i32;
pub const JVMTI_EARLYRET_OOP_OFFSET: i32 = offset_of!(JvmtiThreadState, earlyret_oop) as i32;

/// Object header: a mark word followed by an uncompressed klass pointer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectHeader {
    pub mark: u64,
    pub klass: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayHeader {
    pub object: ObjectHeader,
    pub length: u32,
    pub padding: u32,
}

pub const OOP_MARK_OFFSET: i32 = offset_of!(ObjectHeader, mark) as i32;
pub const OOP_KLASS_OFFSET: i32 = offset_of!(ObjectHeader, klass) as i32;
pub const OBJECT_HEADER_SIZE: i32 = size_of::<ObjectHeader>() as i32;
pub const ARRAY_LENGTH_OFFSET: i32 = offset_of!(ArrayHeader, length) as i32;
pub const ARRAY_BASE_OFFSET: i32 = size_of::<ArrayHeader>() as i32;

/// `java.lang.ref.Reference.referent` is the first field.
pub const REFERENCE_REFERENT_OFFSET: i32 = OBJECT_HEADER_SIZE;
/// `java.nio.Buffer.address` of direct buffers.
pub const BUFFER_ADDRESS_OFFSET: i32 = OBJECT_HEADER_SIZE;

const_assert_eq!(ARRAY_LENGTH_OFFSET, 16);
const_assert_eq!(ARRAY_BASE_OFFSET, 24);
