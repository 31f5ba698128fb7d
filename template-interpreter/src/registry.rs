use std::sync::Arc;

use entry_asm::code_space::CodeSpace;
use entry_asm::error::GenerationError;
use entry_asm::CodeAddress;
use interpreter_common::flags::{ExternalAddresses, GeneratorFlags};
use interpreter_common::method_kind::{IntrinsicId, MethodKind};
use native_signature::library::SignatureHandlerLibrary;

use crate::generator::{generate_interpreter, TemplateInterpreter};
use crate::stub_generator::{generate_stubs, StubRoutines};

/// All generated code and the tables describing it, built once at startup and read-only
/// afterwards. Consumers get it passed in instead of reaching for globals.
pub struct InterpreterRegistry {
    pub code_space: Arc<CodeSpace>,
    pub flags: GeneratorFlags,
    pub external: ExternalAddresses,
    pub stubs: StubRoutines,
    pub interpreter: TemplateInterpreter,
    pub signature_handlers: SignatureHandlerLibrary,
}

impl InterpreterRegistry {
    /// Generates the stubs, then the interpreter against them.
    pub fn initialize(flags: GeneratorFlags, external: ExternalAddresses) -> Result<Self, GenerationError> {
        let code_space = Arc::new(CodeSpace::new());
        let stubs = generate_stubs(&code_space, &flags, external)?;
        let interpreter = generate_interpreter(&code_space, &flags, external, &stubs)?;
        let signature_handlers =
            SignatureHandlerLibrary::new(code_space.clone(), external, interpreter.result_handlers.clone(), interpreter.slow_signature_handler, flags.signature_handler_code_size);
        tracing::info!(
            blobs = code_space.blobs().len(),
            call_stub = %stubs.call_stub_entry,
            zerolocals = %interpreter.entry_for(MethodKind::Zerolocals),
            "interpreter initialized"
        );
        Ok(Self { code_space, flags, external, stubs, interpreter, signature_handlers })
    }

    /// The entry a method with these properties is invoked through.
    pub fn method_entry(&self, access_flags: u32, intrinsic: IntrinsicId, code: &[u8]) -> CodeAddress {
        self.interpreter.entry_for(MethodKind::select(access_flags, intrinsic, code))
    }

    /// Codelet and offset of a generated address, for diagnostics.
    pub fn describe(&self, address: u64) -> Option<String> {
        self.code_space.describe(address)
    }
}
