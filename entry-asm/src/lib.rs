use std::fmt::{Display, Formatter};

pub mod code_space;
pub mod error;
pub mod instr;
pub mod ir_to_native;
pub mod masm;
pub mod native_buffer;
pub mod registers;
pub mod runtime_entry;
pub mod simulator;

#[cfg(test)]
pub mod tests;

/// Address of a generated instruction: the owning blob's base plus the instruction index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeAddress(pub u64);

impl CodeAddress {
    pub fn offset(&self, instructions: usize) -> CodeAddress {
        CodeAddress(self.0 + instructions as u64)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Display for CodeAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelName(pub u32);

impl Display for LabelName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}
