use iced_x86::IcedError;
use thiserror::Error;

use crate::registers::Register;
use crate::{CodeAddress, LabelName};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("code buffer {name} overflowed its capacity of {capacity} instructions")]
    CodeBufferFull { name: String, capacity: usize },
    #[error("label {0} bound twice")]
    LabelBoundTwice(LabelName),
    #[error("label {0} used but never bound")]
    UnboundLabel(LabelName),
    #[error("argument register {0} would be clobbered while passing arguments")]
    ArgumentShuffle(Register),
    #[error("codelet {0} was never closed")]
    OpenCodelet(String),
    #[error("{0} has to be generated first")]
    MissingDependency(&'static str),
}

#[derive(Debug, Error)]
pub enum LoweringError {
    #[error(transparent)]
    Iced(#[from] IcedError),
    #[error("no native address known for {0}")]
    UnresolvedCode(CodeAddress),
    #[error("unsupported operands: {0}")]
    Unsupported(String),
    #[error("executable memory: {0}")]
    Mmap(#[from] std::io::Error),
    #[error("code of {needed} bytes does not fit a buffer of {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimulationError {
    #[error("unmapped access of {size} bytes at {address:#x}")]
    UnmappedAccess { address: u64, size: usize },
    #[error("region {name} at {base:#x} overlaps an existing region")]
    RegionOverlap { name: String, base: u64 },
    #[error("{0:#x} is not generated code")]
    NotCode(u64),
    #[error("label {0} is not bound in its blob")]
    UnboundLabel(LabelName),
    #[error("should not reach here: {reason} at {address:#x}")]
    ShouldNotReachHere { reason: &'static str, address: u64 },
    #[error("runtime call at {address:#x} with misaligned stack pointer {rsp:#x}")]
    MisalignedCall { address: u64, rsp: u64 },
    #[error("no halt after {0} steps")]
    StepLimit(u64),
    #[error("invalid operands: {0}")]
    InvalidOperands(String),
    #[error("runtime: {0}")]
    Runtime(String),
}
