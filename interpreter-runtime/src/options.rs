use interpreter_common::flags::GeneratorFlags;
use interpreter_common::vm_layout::{MethodCounters, MethodData, INVOCATION_COUNTER_COUNT_SHIFT};

/// Thresholds the runtime fills fresh counters and profiles with. Limits and masks are in counter
/// units, already shifted past the status bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterPolicy {
    pub invoke_mask: u32,
    pub backedge_mask: u32,
    pub interpreter_invocation_limit: u32,
    pub interpreter_profile_limit: u32,
    pub method_data_invoke_mask: u32,
    pub method_data_backedge_mask: u32,
}

impl Default for CounterPolicy {
    fn default() -> Self {
        Self {
            invoke_mask: ((1 << 7) - 1) << INVOCATION_COUNTER_COUNT_SHIFT,
            backedge_mask: ((1 << 10) - 1) << INVOCATION_COUNTER_COUNT_SHIFT,
            interpreter_invocation_limit: 10_000 << INVOCATION_COUNTER_COUNT_SHIFT,
            interpreter_profile_limit: 3_300 << INVOCATION_COUNTER_COUNT_SHIFT,
            method_data_invoke_mask: ((1 << 10) - 1) << INVOCATION_COUNTER_COUNT_SHIFT,
            method_data_backedge_mask: ((1 << 13) - 1) << INVOCATION_COUNTER_COUNT_SHIFT,
        }
    }
}

impl CounterPolicy {
    pub fn method_counters(&self) -> MethodCounters {
        MethodCounters {
            invoke_mask: self.invoke_mask,
            backedge_mask: self.backedge_mask,
            interpreter_invocation_limit: self.interpreter_invocation_limit,
            interpreter_profile_limit: self.interpreter_profile_limit,
            ..MethodCounters::default()
        }
    }

    pub fn method_data(&self) -> MethodData {
        MethodData { invoke_mask: self.method_data_invoke_mask, backedge_mask: self.method_data_backedge_mask, ..MethodData::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmOptions {
    pub flags: GeneratorFlags,
    /// Mapped stack of every thread, in bytes.
    pub stack_size: usize,
    pub counters: CounterPolicy,
    /// Instructions a single call may run before it is considered hung.
    pub max_steps: u64,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self { flags: GeneratorFlags::default(), stack_size: 512 * 1024, counters: CounterPolicy::default(), max_steps: 1_000_000 }
    }
}
