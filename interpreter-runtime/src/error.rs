use entry_asm::error::{GenerationError, SimulationError};
use interpreter_common::basic_type::TosState;
use interpreter_common::descriptor_parser::DescriptorError;
use native_signature::SignatureHandlerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    SignatureHandler(#[from] SignatureHandlerError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("{0:#x} is not a method")]
    UnknownMethod(u64),
    #[error("{0:#x} is not an object")]
    UnknownObject(u64),
    #[error("{0:#x} is not a java thread")]
    UnknownThread(u64),
    #[error("{0} exhausted")]
    OutOfMemory(&'static str),
    #[error("no handler for return address {0:#x}")]
    UnknownReturnAddress(u64),
    #[error("control reached {0:#x}, which no caller expects")]
    UnexpectedHalt(u64),
    #[error("native {0:#x} is already running")]
    ReentrantNative(u64),
    #[error("{0} called with {1} arguments")]
    ArgumentCount(&'static str, usize),
    #[error("{0} is not a throwable kind")]
    UnknownThrowable(u64),
    #[error("monitor of {0:#x} is held by another thread")]
    MonitorContended(u64),
    #[error("thread {0} is not at a dispatch")]
    NotAtDispatch(usize),
    #[error("no return entry for {0:?}")]
    NoReturnEntry(TosState),
}

/// Generated code only sees simulation errors.
impl From<RuntimeError> for SimulationError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::Simulation(error) => error,
            other => SimulationError::Runtime(other.to_string()),
        }
    }
}
