use std::cmp::max;

/// Switches that change which code the generators emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorFlags {
    pub profile_interpreter: bool,
    pub tiered_compilation: bool,
    /// Emit invocation counters at all.
    pub use_compiler: bool,
    pub inline_intrinsics: bool,
    pub use_crc32_intrinsics: bool,
    pub use_crc32c_intrinsics: bool,
    /// Emit the SATB pre-barrier in the `Reference.get` entry.
    pub use_g1_gc: bool,
    pub use_stack_banging: bool,
    pub enable_jvmci: bool,
    pub page_size: usize,
    pub stack_red_pages: usize,
    pub stack_yellow_pages: usize,
    pub stack_reserved_pages: usize,
    pub stack_shadow_pages: usize,
    /// Instruction capacity of the interpreter code buffer.
    pub interpreter_code_size: usize,
    pub stub_code_size: usize,
    pub signature_handler_code_size: usize,
}

impl Default for GeneratorFlags {
    fn default() -> Self {
        Self {
            profile_interpreter: true,
            tiered_compilation: true,
            use_compiler: true,
            inline_intrinsics: true,
            use_crc32_intrinsics: true,
            use_crc32c_intrinsics: true,
            use_g1_gc: true,
            use_stack_banging: true,
            enable_jvmci: false,
            page_size: 4096,
            stack_red_pages: 1,
            stack_yellow_pages: 2,
            stack_reserved_pages: 1,
            stack_shadow_pages: 20,
            interpreter_code_size: 64 * 1024,
            stub_code_size: 8 * 1024,
            signature_handler_code_size: 1024,
        }
    }
}

impl GeneratorFlags {
    pub fn stack_guard_zone_size(&self) -> usize {
        (self.stack_red_pages + self.stack_yellow_pages + self.stack_reserved_pages) * self.page_size
    }

    pub fn stack_shadow_zone_size(&self) -> usize {
        self.stack_shadow_pages * self.page_size
    }

    /// The larger of the zones the overflow check keeps clear below a new frame.
    pub fn max_bang_size(&self) -> usize {
        max(self.stack_shadow_zone_size(), self.stack_guard_zone_size())
    }
}

/// Addresses of runtime data the generated code reads directly. They are published by the
/// runtime before any generator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExternalAddresses {
    /// u32 safepoint state, zero while not synchronizing.
    pub safepoint_state: u64,
    /// Word holding the heap base reloaded into r12.
    pub narrow_oop_base: u64,
    /// 256 u32 entries, reflected CRC-32 polynomial.
    pub crc_table: u64,
    /// 256 u32 entries, reflected CRC-32C polynomial.
    pub crc32c_table: u64,
    /// One 256-word table per `TosState`, laid out back to back.
    pub dispatch_tables: u64,
    /// `native_function` value of a method whose native has not been linked yet.
    pub native_method_throw_unsatisfied_link_error_entry: u64,
}

impl ExternalAddresses {
    pub const DISPATCH_TABLE_LENGTH: u64 = 256;

    pub fn dispatch_table(&self, state_index: usize) -> u64 {
        self.dispatch_tables + state_index as u64 * Self::DISPATCH_TABLE_LENGTH * 8
    }
}
