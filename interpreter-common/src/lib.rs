pub mod basic_type;
pub mod descriptor_parser;
pub mod fingerprint;
pub mod flags;
pub mod frame_layout;
pub mod method_kind;
pub mod vm_layout;

#[cfg(test)]
pub mod tests;

/// Size of an interpreter stack element and of every native argument slot.
pub const WORD_SIZE: i32 = 8;
pub const LOG_STACK_ELEMENT_SIZE: u32 = 3;
pub const STACK_ALIGNMENT_IN_BYTES: i32 = 16;

/// Byte offset of local `n` relative to the locals base. Locals grow toward lower addresses.
pub const fn local_offset_in_bytes(n: i32) -> i32 {
    -n * WORD_SIZE
}
