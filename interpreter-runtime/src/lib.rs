//! A small VM behind the generated interpreter entries: metadata and heap in simulated memory,
//! Java threads, native functions and every runtime entry the generated code calls.

pub mod address_map;
pub mod crc;
pub mod entries;
pub mod error;
pub mod heap;
pub mod metadata;
pub mod natives;
pub mod options;
pub mod raw;
pub mod runtime;
pub mod thread;
pub mod vm;

pub use error::RuntimeError;
pub use metadata::{ExceptionTableEntry, MethodBuilder, MethodRef};
pub use natives::NativeCall;
pub use options::{CounterPolicy, VmOptions};
pub use runtime::{VmEvent, VmRuntime};
pub use thread::ThreadId;
pub use vm::{CallOutcome, JavaValue, Vm};

#[cfg(test)]
pub mod tests;
