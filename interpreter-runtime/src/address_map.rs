use interpreter_common::basic_type::{TosState, NUMBER_OF_STATES};
use interpreter_common::flags::ExternalAddresses;

/// Safepoint state, heap base word, CRC tables and dispatch tables.
pub const TABLES_BASE: u64 = 0x5000_0000;
pub const TABLES_SIZE: usize = 0x1_0000;
const SAFEPOINT_STATE: u64 = TABLES_BASE;
const NARROW_OOP_BASE: u64 = TABLES_BASE + 0x8;
const CRC_TABLE: u64 = TABLES_BASE + 0x100;
const CRC32C_TABLE: u64 = TABLES_BASE + 0x500;
const DISPATCH_TABLES: u64 = TABLES_BASE + 0x1000;

pub const METASPACE_BASE: u64 = 0x4000_0000;
pub const METASPACE_SIZE: usize = 0x10_0000;

/// Thread structures, JNI handle blocks and JVMTI states.
pub const THREADS_BASE: u64 = 0x4800_0000;
pub const THREADS_SIZE: usize = 0x4_0000;
pub const THREAD_AREA_SIZE: u64 = 0x4000;

pub const HEAP_BASE: u64 = 0x5800_0000;
pub const HEAP_SIZE: usize = 0x40_0000;

pub const STACKS_BASE: u64 = 0x7000_0000;
pub const STACK_STRIDE: u64 = 0x10_0000;

// Addresses below are never mapped and never generated code. Control reaching them leaves the
// generated code.

/// First bytecode template. Each (state, bytecode) pair gets its own address.
pub const TEMPLATES_BASE: u64 = 0xe000_0000;
const TEMPLATE_SIZE: u64 = 16;
const TEMPLATES_END: u64 = TEMPLATES_BASE + (NUMBER_OF_STATES as u64 * 256) * TEMPLATE_SIZE;
/// The C caller of the call stub returns here.
pub const EXIT: u64 = 0xe417_0000;
pub const NATIVES_BASE: u64 = 0xe800_0000;
pub const NATIVE_STRIDE: u64 = 0x10;
pub const COMPILED_BASE: u64 = 0xec00_0000;
pub const COMPILED_STRIDE: u64 = 0x100;
/// Return address of a compiled caller, and where exceptions thrown into it land.
pub const COMPILED_CALLER_RETURN: u64 = 0xef00_0000;
pub const COMPILED_CALLER_EXCEPTION_LANDING: u64 = 0xef00_1000;
pub const UNSATISFIED_LINK_ERROR_ENTRY: u64 = 0xdead_0000;

pub fn external_addresses() -> ExternalAddresses {
    ExternalAddresses {
        safepoint_state: SAFEPOINT_STATE,
        narrow_oop_base: NARROW_OOP_BASE,
        crc_table: CRC_TABLE,
        crc32c_table: CRC32C_TABLE,
        dispatch_tables: DISPATCH_TABLES,
        native_method_throw_unsatisfied_link_error_entry: UNSATISFIED_LINK_ERROR_ENTRY,
    }
}

pub fn template_address(state: TosState, bytecode: u8) -> u64 {
    TEMPLATES_BASE + (state.index() as u64 * 256 + bytecode as u64) * TEMPLATE_SIZE
}

/// The template a dispatch reached, if `address` is one.
pub fn template_at(address: u64) -> Option<(TosState, u8)> {
    if !(TEMPLATES_BASE..TEMPLATES_END).contains(&address) || (address - TEMPLATES_BASE) % TEMPLATE_SIZE != 0 {
        return None;
    }
    let index = (address - TEMPLATES_BASE) / TEMPLATE_SIZE;
    Some((TosState::from_index((index / 256) as usize)?, (index % 256) as u8))
}

pub fn stack_region(index: usize) -> u64 {
    STACKS_BASE + index as u64 * STACK_STRIDE
}
