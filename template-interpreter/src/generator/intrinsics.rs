use entry_asm::instr::{Address, Condition, Size};
use entry_asm::registers::{C_RARG0, C_RARG1, C_RARG2, C_RARG3, RAX, RBX, RDI, RSCRATCH1, RSP, SENDER_SP, THREAD, XMM0, XMM1};
use entry_asm::runtime_entry::RuntimeEntry;
use entry_asm::{CodeAddress, LabelName};
use interpreter_common::method_kind::MethodKind;
use interpreter_common::vm_layout::{
    ARRAY_BASE_OFFSET, REFERENCE_REFERENT_OFFSET, SAFEPOINT_NOT_SYNCHRONIZED, THREAD_SATB_MARK_QUEUE_ACTIVE_OFFSET, THREAD_SATB_MARK_QUEUE_BUFFER_OFFSET, THREAD_SATB_MARK_QUEUE_INDEX_OFFSET,
};
use interpreter_common::WORD_SIZE;

use crate::generator::TemplateInterpreterGenerator;
use crate::interp_masm::thread_field;
use crate::stub_generator::update_byte_crc32;

/// Argument `n` words above the return address on the caller's expression stack. Arguments are
/// reversed there, so the last one is at 1.
fn arg(n: i32) -> Address {
    Address::new(RSP, n * WORD_SIZE)
}

impl TemplateInterpreterGenerator<'_> {
    /// Returns to the caller with the result in rax/xmm0, dropping the arguments.
    fn return_to_sender_sp(&mut self) {
        self.masm.pop(RDI);
        self.masm.mov(RSP, SENDER_SP);
        self.masm.jmp_reg(RDI);
    }

    fn safepoint_poll(&mut self, slow_path: LabelName) {
        let safepoint_state = self.masm.external().safepoint_state;
        self.masm.mov_imm(RSCRATCH1, safepoint_state);
        self.masm.cmpl_jcc(Address::new(RSCRATCH1, 0), SAFEPOINT_NOT_SYNCHRONIZED as i32, Condition::NotEqual, slow_path);
    }

    /// Math intrinsics compute without a frame and produce the same bits as the runtime's
    /// `SharedRuntime` functions the compilers use.
    pub(super) fn generate_math_entry(&mut self, kind: MethodKind) -> Option<CodeAddress> {
        if !self.flags.inline_intrinsics {
            return None;
        }
        let masm = &mut self.masm;
        let entry = masm.pc();
        match kind {
            MethodKind::JavaLangMathSqrt => {
                masm.movdbl(XMM0, arg(1));
                masm.sqrtsd(XMM0);
            }
            MethodKind::JavaLangMathAbs => {
                masm.movdbl(XMM0, arg(1));
                masm.abssd(XMM0);
            }
            MethodKind::JavaLangMathPow => {
                masm.movdbl(XMM1, arg(1));
                masm.movdbl(XMM0, arg(3));
                masm.call_vm_leaf_base(RuntimeEntry::Dpow);
            }
            _ => {
                let function = match kind {
                    MethodKind::JavaLangMathSin => RuntimeEntry::Dsin,
                    MethodKind::JavaLangMathCos => RuntimeEntry::Dcos,
                    MethodKind::JavaLangMathTan => RuntimeEntry::Dtan,
                    MethodKind::JavaLangMathLog => RuntimeEntry::Dlog,
                    MethodKind::JavaLangMathLog10 => RuntimeEntry::Dlog10,
                    MethodKind::JavaLangMathExp => RuntimeEntry::Dexp,
                    _ => return None,
                };
                masm.movdbl(XMM0, arg(1));
                masm.call_vm_leaf_base(function);
            }
        }
        self.return_to_sender_sp();
        Some(entry)
    }

    /// `Reference.get` loads the referent without a frame. Under G1 the referent is handed to
    /// the SATB pre-barrier so a concurrent mark keeps it alive. Without G1 the plain accessor
    /// path is just as good, so no entry is generated.
    pub(super) fn generate_reference_get_entry(&mut self, zerolocals: CodeAddress) -> Option<CodeAddress> {
        if !self.flags.use_g1_gc {
            return None;
        }
        let masm = &mut self.masm;
        let entry = masm.pc();
        let slow_path = masm.new_label();
        let done = masm.new_label();
        let runtime = masm.new_label();

        // receiver; a null one throws through the general entry
        masm.movptr(RAX, arg(1));
        masm.testptr_jcc(RAX, RAX, Condition::Equal, slow_path);

        masm.push(SENDER_SP);
        masm.movptr(RAX, Address::new(RAX, REFERENCE_REFERENT_OFFSET));

        masm.cmp_jcc(Size::Byte, thread_field(THREAD_SATB_MARK_QUEUE_ACTIVE_OFFSET), 0, Condition::Equal, done);
        masm.testptr_jcc(RAX, RAX, Condition::Equal, done);
        masm.movptr(RBX, thread_field(THREAD_SATB_MARK_QUEUE_INDEX_OFFSET));
        masm.testptr_jcc(RBX, RBX, Condition::Equal, runtime);
        masm.subptr(RBX, WORD_SIZE);
        masm.movptr_store(thread_field(THREAD_SATB_MARK_QUEUE_INDEX_OFFSET), RBX);
        masm.addptr(RBX, thread_field(THREAD_SATB_MARK_QUEUE_BUFFER_OFFSET));
        masm.movptr_store(Address::new(RBX, 0), RAX);
        masm.jmp(done);

        // buffer full
        masm.bind(runtime);
        masm.push(RAX);
        masm.call_vm_leaf(RuntimeEntry::G1WbPre, &[RAX, THREAD]);
        masm.pop(RAX);

        masm.bind(done);
        masm.pop(SENDER_SP);
        self.return_to_sender_sp();

        self.masm.bind(slow_path);
        self.masm.jmp(zerolocals);
        Some(entry)
    }

    /// `CRC32.update(int crc, int b)`, folded in place.
    pub(super) fn generate_crc32_update_entry(&mut self, native: CodeAddress) -> Option<CodeAddress> {
        if !self.flags.use_crc32_intrinsics {
            return None;
        }
        let crc_table = self.masm.external().crc_table;
        let entry = self.masm.pc();
        let slow_path = self.masm.new_label();
        self.safepoint_poll(slow_path);

        let masm = &mut self.masm;
        masm.movl(C_RARG0, arg(1));
        masm.movl(RAX, arg(2));
        masm.mov_imm(C_RARG1, crc_table);
        masm.xorl(RAX, -1);
        update_byte_crc32(masm, RAX, C_RARG0, C_RARG1);
        masm.xorl(RAX, -1);
        self.return_to_sender_sp();

        self.masm.bind(slow_path);
        self.masm.jmp(native);
        Some(entry)
    }

    /// `CRC32.updateBytes(int crc, byte[] b, int off, int len)` and
    /// `CRC32.updateByteBuffer(int crc, long addr, int off, int len)` through the stub.
    pub(super) fn generate_crc32_update_bytes_entry(&mut self, kind: MethodKind, native: CodeAddress) -> Option<CodeAddress> {
        let stub = self.stubs.update_bytes_crc32?;
        if !self.flags.use_crc32_intrinsics {
            return None;
        }
        let entry = self.masm.pc();
        let slow_path = self.masm.new_label();
        self.safepoint_poll(slow_path);

        let masm = &mut self.masm;
        let (crc, buf, len, off) = (C_RARG0, C_RARG1, C_RARG2, C_RARG2);
        masm.movptr(buf, arg(3));
        let crc_slot = if kind == MethodKind::JavaUtilZipCrc32UpdateByteBuffer {
            5
        } else {
            masm.addptr(buf, ARRAY_BASE_OFFSET);
            4
        };
        masm.movslq(off, arg(2));
        masm.addptr(buf, off);
        masm.movl(crc, arg(crc_slot));
        // off is dead now
        masm.movl(len, arg(1));
        masm.call(stub);
        self.return_to_sender_sp();

        self.masm.bind(slow_path);
        self.masm.jmp(native);
        Some(entry)
    }

    /// `CRC32C.updateBytes(int crc, byte[] b, int off, int end)` and
    /// `CRC32C.updateDirectByteBuffer(int crc, long addr, int off, int end)`. No safepoint check,
    /// as in the compiled intrinsic.
    pub(super) fn generate_crc32c_update_bytes_entry(&mut self, kind: MethodKind) -> Option<CodeAddress> {
        let stub = self.stubs.update_bytes_crc32c?;
        if !self.flags.use_crc32c_intrinsics {
            return None;
        }
        let masm = &mut self.masm;
        let entry = masm.pc();
        let (crc, buf, end, off) = (C_RARG0, C_RARG1, C_RARG2, C_RARG3);
        masm.movptr(buf, arg(3));
        let crc_slot = if kind == MethodKind::JavaUtilZipCrc32cUpdateDirectByteBuffer {
            5
        } else {
            masm.addptr(buf, ARRAY_BASE_OFFSET);
            4
        };
        masm.movslq(off, arg(2));
        masm.addptr(buf, off);
        masm.movl(crc, arg(crc_slot));
        masm.movl(end, arg(1));
        masm.subl(end, off);
        masm.call(stub);
        self.return_to_sender_sp();
        Some(entry)
    }

    /// Raw bit conversions between int/long and float/double. The value only changes register
    /// file.
    pub(super) fn generate_bits_entry(&mut self, kind: MethodKind) -> Option<CodeAddress> {
        if !self.flags.inline_intrinsics {
            return None;
        }
        let masm = &mut self.masm;
        let entry = masm.pc();
        match kind {
            MethodKind::JavaLangFloatIntBitsToFloat => masm.movflt(XMM0, arg(1)),
            MethodKind::JavaLangFloatFloatToRawIntBits => masm.movl(RAX, arg(1)),
            MethodKind::JavaLangDoubleLongBitsToDouble => masm.movdbl(XMM0, arg(1)),
            MethodKind::JavaLangDoubleDoubleToRawLongBits => masm.movptr(RAX, arg(1)),
            _ => return None,
        }
        self.return_to_sender_sp();
        Some(entry)
    }
}
