use strum_macros::{EnumCount, EnumIter, IntoStaticStr};

/// Registers whose contents a runtime call may leave stale, beyond the caller saved ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidatedRegister {
    /// rbx: the Method* may have been moved or redefined.
    Method,
    /// r12: the heap base is reloaded after anything that can reach a safepoint.
    HeapBase,
}

const GC_CAPABLE: &[InvalidatedRegister] = &[InvalidatedRegister::Method, InvalidatedRegister::HeapBase];
const NOTHING: &[InvalidatedRegister] = &[];

/// Every function of the runtime that generated code calls. The first C argument of non-leaf
/// entries is always the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumCount, IntoStaticStr)]
pub enum RuntimeEntry {
    #[strum(serialize = "InterpreterRuntime::frequency_counter_overflow")]
    FrequencyCounterOverflow,
    #[strum(serialize = "InterpreterRuntime::profile_method")]
    ProfileMethod,
    #[strum(serialize = "InterpreterRuntime::build_method_counters")]
    BuildMethodCounters,
    #[strum(serialize = "InterpreterRuntime::bcp_to_di")]
    BcpToDi,
    #[strum(serialize = "InterpreterRuntime::prepare_native_call")]
    PrepareNativeCall,
    #[strum(serialize = "InterpreterRuntime::slow_signature_handler")]
    SlowSignatureHandler,
    #[strum(serialize = "InterpreterRuntime::monitorenter")]
    Monitorenter,
    #[strum(serialize = "InterpreterRuntime::monitorexit")]
    Monitorexit,
    #[strum(serialize = "InterpreterRuntime::throw_StackOverflowError")]
    ThrowStackOverflowError,
    #[strum(serialize = "InterpreterRuntime::throw_AbstractMethodError")]
    ThrowAbstractMethodError,
    #[strum(serialize = "InterpreterRuntime::throw_ArrayIndexOutOfBoundsException")]
    ThrowArrayIndexOutOfBoundsException,
    #[strum(serialize = "InterpreterRuntime::throw_ClassCastException")]
    ThrowClassCastException,
    #[strum(serialize = "InterpreterRuntime::create_exception")]
    CreateException,
    #[strum(serialize = "InterpreterRuntime::create_klass_exception")]
    CreateKlassException,
    #[strum(serialize = "InterpreterRuntime::throw_illegal_monitor_state_exception")]
    ThrowIllegalMonitorStateException,
    #[strum(serialize = "InterpreterRuntime::new_illegal_monitor_state_exception")]
    NewIllegalMonitorStateException,
    #[strum(serialize = "InterpreterRuntime::throw_pending_exception")]
    ThrowPendingException,
    #[strum(serialize = "InterpreterRuntime::exception_handler_for_exception")]
    ExceptionHandlerForException,
    #[strum(serialize = "InterpreterRuntime::interpreter_contains")]
    InterpreterContains,
    #[strum(serialize = "InterpreterRuntime::popframe_move_outgoing_args")]
    PopframeMoveOutgoingArgs,
    #[strum(serialize = "Deoptimization::popframe_preserve_args")]
    PopframePreserveArgs,
    #[strum(serialize = "SharedRuntime::exception_handler_for_return_address")]
    ExceptionHandlerForReturnAddress,
    #[strum(serialize = "SharedRuntime::reguard_yellow_pages")]
    ReguardYellowPages,
    #[strum(serialize = "JavaThread::check_special_condition_for_native_trans")]
    CheckSpecialConditionForNativeTrans,
    #[strum(serialize = "SharedRuntime::g1_wb_pre")]
    G1WbPre,
    #[strum(serialize = "SharedRuntime::dsin")]
    Dsin,
    #[strum(serialize = "SharedRuntime::dcos")]
    Dcos,
    #[strum(serialize = "SharedRuntime::dtan")]
    Dtan,
    #[strum(serialize = "SharedRuntime::dlog")]
    Dlog,
    #[strum(serialize = "SharedRuntime::dlog10")]
    Dlog10,
    #[strum(serialize = "SharedRuntime::dexp")]
    Dexp,
    #[strum(serialize = "SharedRuntime::dpow")]
    Dpow,
}

impl RuntimeEntry {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Leaf entries take no thread argument, never throw and are called without a last Java frame.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            RuntimeEntry::BcpToDi
                | RuntimeEntry::InterpreterContains
                | RuntimeEntry::PopframeMoveOutgoingArgs
                | RuntimeEntry::PopframePreserveArgs
                | RuntimeEntry::ExceptionHandlerForReturnAddress
                | RuntimeEntry::ReguardYellowPages
                | RuntimeEntry::CheckSpecialConditionForNativeTrans
                | RuntimeEntry::G1WbPre
                | RuntimeEntry::Dsin
                | RuntimeEntry::Dcos
                | RuntimeEntry::Dtan
                | RuntimeEntry::Dlog
                | RuntimeEntry::Dlog10
                | RuntimeEntry::Dexp
                | RuntimeEntry::Dpow
        )
    }

    /// The registers a caller has to reload after this entry returns. Every call wrapper consults
    /// this instead of reloading ad hoc.
    pub fn invalidates(&self) -> &'static [InvalidatedRegister] {
        match self {
            RuntimeEntry::CheckSpecialConditionForNativeTrans => GC_CAPABLE,
            entry if entry.is_leaf() => NOTHING,
            _ => GC_CAPABLE,
        }
    }

    pub fn returns_double(&self) -> bool {
        matches!(
            self,
            RuntimeEntry::Dsin | RuntimeEntry::Dcos | RuntimeEntry::Dtan | RuntimeEntry::Dlog | RuntimeEntry::Dlog10 | RuntimeEntry::Dexp | RuntimeEntry::Dpow
        )
    }

    pub fn ordinal(&self) -> usize {
        *self as usize
    }
}

/// Exceptions the interpreter's error exits create by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[repr(u32)]
pub enum ThrowableKind {
    #[strum(serialize = "java/lang/NullPointerException")]
    NullPointerException = 1,
    #[strum(serialize = "java/lang/ArithmeticException")]
    ArithmeticException = 2,
    #[strum(serialize = "java/lang/ArrayStoreException")]
    ArrayStoreException = 3,
    #[strum(serialize = "java/lang/ArrayIndexOutOfBoundsException")]
    ArrayIndexOutOfBoundsException = 4,
    #[strum(serialize = "java/lang/ClassCastException")]
    ClassCastException = 5,
    #[strum(serialize = "java/lang/StackOverflowError")]
    StackOverflowError = 6,
    #[strum(serialize = "java/lang/AbstractMethodError")]
    AbstractMethodError = 7,
    #[strum(serialize = "java/lang/IllegalMonitorStateException")]
    IllegalMonitorStateException = 8,
    #[strum(serialize = "java/lang/UnsatisfiedLinkError")]
    UnsatisfiedLinkError = 9,
}

impl ThrowableKind {
    pub fn class_name(&self) -> &'static str {
        self.into()
    }

    pub fn from_raw(raw: u64) -> Option<ThrowableKind> {
        use strum::IntoEnumIterator;
        ThrowableKind::iter().find(|kind| *kind as u64 == raw)
    }

    pub fn default_message(&self) -> Option<&'static str> {
        match self {
            ThrowableKind::ArithmeticException => Some("/ by zero"),
            _ => None,
        }
    }
}
