use entry_asm::CodeAddress;
use interpreter_common::basic_type::{result_handler_index, BasicType, RESULT_HANDLER_TYPES};

/// Addresses of the per result type stubs that turn a raw native return value into what the
/// interpreter expects on its stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultHandlerTable {
    handlers: [CodeAddress; RESULT_HANDLER_TYPES.len()],
}

impl ResultHandlerTable {
    pub fn new(handlers: [CodeAddress; RESULT_HANDLER_TYPES.len()]) -> Self {
        Self { handlers }
    }

    pub fn handler_for(&self, type_: BasicType) -> CodeAddress {
        self.handlers[result_handler_index(type_)]
    }

    pub fn iter(&self) -> impl Iterator<Item = (BasicType, CodeAddress)> + '_ {
        RESULT_HANDLER_TYPES.iter().copied().zip(self.handlers.iter().copied())
    }

    /// The result type a handler address belongs to.
    pub fn type_of(&self, handler: CodeAddress) -> Option<BasicType> {
        self.iter().find(|(_, address)| *address == handler).map(|(type_, _)| type_)
    }
}
