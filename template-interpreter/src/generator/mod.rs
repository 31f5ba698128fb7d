use std::collections::HashMap;
use std::sync::Arc;

use entry_asm::code_space::{CodeBlob, CodeSpace};
use entry_asm::error::GenerationError;
use entry_asm::masm::MacroAssembler;
use entry_asm::CodeAddress;
use interpreter_common::basic_type::{BasicType, TosState, NUMBER_OF_STATES, RESULT_HANDLER_TYPES};
use interpreter_common::flags::{ExternalAddresses, GeneratorFlags};
use interpreter_common::method_kind::MethodKind;
use native_signature::result_handlers::ResultHandlerTable;
use native_signature::slow_handler::generate_slow_signature_handler;
use strum::{EnumCount, IntoEnumIterator};
use strum_macros::{EnumIter, IntoStaticStr};

use crate::interp_masm::InterpreterMacroAssembler;
use crate::stub_generator::StubRoutines;

mod counters;
mod entries;
mod exceptions;
mod frame;
mod intrinsics;
mod native_entry;
mod normal_entry;

/// Deopt entries exist for every bytecode length up to this one.
pub const NUMBER_OF_DEOPT_ENTRIES: usize = 7;

/// The invoke bytecode a return entry continues after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum InvokeKind {
    #[strum(serialize = "invoke")]
    Invoke,
    #[strum(serialize = "invokeinterface")]
    InvokeInterface,
    #[strum(serialize = "invokedynamic")]
    InvokeDynamic,
}

impl InvokeKind {
    pub fn length(&self) -> i32 {
        match self {
            InvokeKind::Invoke => 3,
            InvokeKind::InvokeInterface | InvokeKind::InvokeDynamic => 5,
        }
    }

    pub fn index_size(&self) -> usize {
        match self {
            InvokeKind::InvokeDynamic => 4,
            InvokeKind::Invoke | InvokeKind::InvokeInterface => 2,
        }
    }
}

/// Sub-int states share the int entries.
pub fn canonical_state(state: TosState) -> TosState {
    if state.is_int_like() {
        TosState::Itos
    } else {
        state
    }
}

const DISTINCT_STATES: [TosState; 6] = [TosState::Itos, TosState::Ltos, TosState::Ftos, TosState::Dtos, TosState::Atos, TosState::Vtos];

/// Where exceptions enter and leave interpreted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntries {
    pub rethrow_exception: CodeAddress,
    pub throw_exception: CodeAddress,
    pub remove_activation_preserving_args: CodeAddress,
    pub remove_activation: CodeAddress,
    pub throw_array_index_out_of_bounds_exception: CodeAddress,
    pub throw_array_store_exception: CodeAddress,
    pub throw_arithmetic_exception: CodeAddress,
    pub throw_class_cast_exception: CodeAddress,
    pub throw_null_pointer_exception: CodeAddress,
    pub throw_stack_overflow_error: CodeAddress,
}

/// Everything the interpreter generator published.
#[derive(Debug, Clone)]
pub struct TemplateInterpreter {
    pub blob: Arc<CodeBlob>,
    pub slow_signature_handler: CodeAddress,
    pub result_handlers: ResultHandlerTable,
    pub exceptions: ExceptionEntries,
    method_entries: [CodeAddress; MethodKind::COUNT],
    return_entries: HashMap<(InvokeKind, TosState), CodeAddress>,
    deopt_entries: HashMap<(TosState, usize), CodeAddress>,
    earlyret_entries: [CodeAddress; NUMBER_OF_STATES],
}

impl TemplateInterpreter {
    pub fn entry_for(&self, kind: MethodKind) -> CodeAddress {
        self.method_entries[kind as usize]
    }

    pub fn method_entries(&self) -> impl Iterator<Item = (MethodKind, CodeAddress)> + '_ {
        MethodKind::iter().map(move |kind| (kind, self.entry_for(kind)))
    }

    pub fn return_entry(&self, kind: InvokeKind, state: TosState) -> Option<CodeAddress> {
        self.return_entries.get(&(kind, canonical_state(state))).copied()
    }

    /// Step 0 only exists for vtos, where a deoptimized method entry resumes.
    pub fn deopt_entry(&self, state: TosState, step: usize) -> Option<CodeAddress> {
        self.deopt_entries.get(&(canonical_state(state), step)).copied()
    }

    pub fn earlyret_entry(&self, state: TosState) -> CodeAddress {
        self.earlyret_entries[state.index()]
    }

    pub fn contains(&self, address: u64) -> bool {
        self.blob.contains(address)
    }

    /// Native method entries, which frames of native methods return into.
    pub fn is_native_entry(&self, address: u64) -> bool {
        [MethodKind::Native, MethodKind::NativeSynchronized]
            .iter()
            .filter_map(|kind| self.blob.codelet_at(self.entry_for(*kind).raw()))
            .any(|codelet| codelet.contains(address))
    }
}

pub(crate) struct TemplateInterpreterGenerator<'l> {
    masm: InterpreterMacroAssembler,
    flags: &'l GeneratorFlags,
    stubs: &'l StubRoutines,
}

impl<'l> TemplateInterpreterGenerator<'l> {
    fn codelet(&mut self, name: impl Into<String>, body: impl FnOnce(&mut Self)) -> CodeAddress {
        let start = self.masm.begin_codelet(name);
        body(self);
        self.masm.end_codelet();
        start
    }

    fn generate_slow_signature_handler(&mut self) -> CodeAddress {
        let hooks = self.masm.hooks();
        self.codelet("slow signature handler", |generator| generate_slow_signature_handler(&mut generator.masm, &hooks))
    }

    fn generate_result_handlers(&mut self) -> ResultHandlerTable {
        self.masm.begin_codelet("result handlers for native calls");
        let handlers = RESULT_HANDLER_TYPES.map(|type_| self.generate_result_handler_for(type_));
        self.masm.end_codelet();
        ResultHandlerTable::new(handlers)
    }

    /// Entry for `kind`, or `None` when the kind is served by a general entry under the current
    /// flags.
    fn generate_special_entry(&mut self, kind: MethodKind, zerolocals: CodeAddress, native: CodeAddress) -> Option<CodeAddress> {
        match kind {
            MethodKind::Abstract => Some(self.generate_abstract_entry()),
            kind if kind.is_math() => self.generate_math_entry(kind),
            MethodKind::JavaLangRefReferenceGet => self.generate_reference_get_entry(zerolocals),
            MethodKind::JavaUtilZipCrc32Update => self.generate_crc32_update_entry(native),
            MethodKind::JavaUtilZipCrc32UpdateBytes | MethodKind::JavaUtilZipCrc32UpdateByteBuffer => self.generate_crc32_update_bytes_entry(kind, native),
            MethodKind::JavaUtilZipCrc32cUpdateBytes | MethodKind::JavaUtilZipCrc32cUpdateDirectByteBuffer => self.generate_crc32c_update_bytes_entry(kind),
            MethodKind::JavaLangFloatIntBitsToFloat
            | MethodKind::JavaLangFloatFloatToRawIntBits
            | MethodKind::JavaLangDoubleLongBitsToDouble
            | MethodKind::JavaLangDoubleDoubleToRawLongBits => self.generate_bits_entry(kind),
            _ => None,
        }
    }

    /// The general entry a kind without its own code falls back to.
    fn fallback_kind(kind: MethodKind) -> MethodKind {
        match kind {
            MethodKind::JavaUtilZipCrc32Update
            | MethodKind::JavaUtilZipCrc32UpdateBytes
            | MethodKind::JavaUtilZipCrc32UpdateByteBuffer
            | MethodKind::JavaLangFloatIntBitsToFloat
            | MethodKind::JavaLangFloatFloatToRawIntBits
            | MethodKind::JavaLangDoubleLongBitsToDouble
            | MethodKind::JavaLangDoubleDoubleToRawLongBits
            | MethodKind::Native => MethodKind::Native,
            MethodKind::NativeSynchronized => MethodKind::NativeSynchronized,
            MethodKind::ZerolocalsSynchronized => MethodKind::ZerolocalsSynchronized,
            _ => MethodKind::Zerolocals,
        }
    }

    fn generate_method_entries(&mut self, object_result_handler: CodeAddress) -> [CodeAddress; MethodKind::COUNT] {
        let zerolocals = self.codelet("method entry point (kind = zerolocals)", |generator| generator.generate_normal_entry(false));
        let zerolocals_synchronized = self.codelet("method entry point (kind = zerolocals_synchronized)", |generator| generator.generate_normal_entry(true));
        let native = self.codelet("method entry point (kind = native)", |generator| generator.generate_native_entry(false, object_result_handler));
        let native_synchronized = self.codelet("method entry point (kind = native_synchronized)", |generator| generator.generate_native_entry(true, object_result_handler));

        let mut entries = [zerolocals; MethodKind::COUNT];
        entries[MethodKind::ZerolocalsSynchronized as usize] = zerolocals_synchronized;
        entries[MethodKind::Native as usize] = native;
        entries[MethodKind::NativeSynchronized as usize] = native_synchronized;
        for kind in MethodKind::iter() {
            if matches!(kind, MethodKind::Zerolocals | MethodKind::ZerolocalsSynchronized | MethodKind::Native | MethodKind::NativeSynchronized) {
                continue;
            }
            self.masm.begin_codelet(format!("method entry point (kind = {})", kind.name()));
            let special = self.generate_special_entry(kind, zerolocals, native);
            self.masm.end_codelet();
            entries[kind as usize] = special.unwrap_or(entries[Self::fallback_kind(kind) as usize]);
        }
        entries
    }
}

/// Generates the interpreter against already generated stubs and installs it in `code_space`.
pub fn generate_interpreter(code_space: &CodeSpace, flags: &GeneratorFlags, external: ExternalAddresses, stubs: &StubRoutines) -> Result<TemplateInterpreter, GenerationError> {
    let masm = MacroAssembler::new("interpreter", code_space.reserve(), flags.interpreter_code_size, external);
    let masm = InterpreterMacroAssembler::new(masm, stubs.forward_exception_entry);
    let mut generator = TemplateInterpreterGenerator { masm, flags, stubs };

    let slow_signature_handler = generator.generate_slow_signature_handler();
    let result_handlers = generator.generate_result_handlers();

    let mut return_entries = HashMap::new();
    generator.masm.begin_codelet("invoke return entry points");
    for state in DISTINCT_STATES {
        for kind in InvokeKind::iter() {
            let entry = generator.generate_return_entry_for(state, kind.length(), kind.index_size());
            return_entries.insert((kind, state), entry);
        }
    }
    generator.masm.end_codelet();

    let earlyret_entries = generator.codelet_earlyret_entries();

    let mut deopt_entries = HashMap::new();
    generator.masm.begin_codelet("deoptimization entry points");
    deopt_entries.insert((TosState::Vtos, 0), generator.generate_deopt_entry_for(TosState::Vtos, 0));
    for step in 1..NUMBER_OF_DEOPT_ENTRIES {
        for state in DISTINCT_STATES {
            deopt_entries.insert((state, step), generator.generate_deopt_entry_for(state, step as i32));
        }
    }
    generator.masm.end_codelet();

    generator.masm.begin_codelet("exception handling");
    let throw = generator.generate_throw_exception();
    generator.masm.end_codelet();

    generator.masm.begin_codelet("throw exception entrypoints");
    let handlers = generator.generate_exception_handlers(throw.throw_exception);
    generator.masm.end_codelet();

    let method_entries = generator.generate_method_entries(result_handlers.handler_for(BasicType::Object));

    let blob = code_space.install(generator.masm.finish()?);
    tracing::debug!(base = %blob.base, instructions = blob.instructions.len(), codelets = blob.codelets.len(), "generated interpreter");
    Ok(TemplateInterpreter {
        blob,
        slow_signature_handler,
        result_handlers,
        exceptions: ExceptionEntries {
            rethrow_exception: throw.rethrow_exception,
            throw_exception: throw.throw_exception,
            remove_activation_preserving_args: throw.remove_activation_preserving_args,
            remove_activation: throw.remove_activation,
            throw_array_index_out_of_bounds_exception: handlers.array_index_out_of_bounds,
            throw_array_store_exception: handlers.array_store,
            throw_arithmetic_exception: handlers.arithmetic,
            throw_class_cast_exception: handlers.class_cast,
            throw_null_pointer_exception: handlers.null_pointer,
            throw_stack_overflow_error: handlers.stack_overflow,
        },
        method_entries,
        return_entries,
        deopt_entries,
        earlyret_entries,
    })
}
