use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use entry_asm::code_space::Codelet;
use entry_asm::CodeAddress;
use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, IntelFormatter, SymbolResolver, SymbolResult};
use interpreter_common::basic_type::{TosState, NUMBER_OF_STATES};
use interpreter_common::fingerprint::Fingerprint;
use interpreter_common::flags::ExternalAddresses;
use itertools::Itertools;
use native_signature::iterator::NativeSignatureIterator;
use native_signature::plan::MarshalingPlan;
use strum::IntoEnumIterator;
use template_interpreter::generator::{canonical_state, InvokeKind, NUMBER_OF_DEOPT_ENTRIES};
use template_interpreter::registry::InterpreterRegistry;

use crate::image::{LoweredBlob, NativeImage, SymbolTable};

/// Every published entry point, in the order the interpreter is usually read.
pub fn entry_points(registry: &InterpreterRegistry) -> Vec<(String, CodeAddress)> {
    let stubs = &registry.stubs;
    let interpreter = &registry.interpreter;
    let exceptions = &interpreter.exceptions;
    let mut entries = vec![];
    for (kind, address) in interpreter.method_entries() {
        entries.push((format!("method entry {}", kind.name()), address));
    }
    entries.push(("call stub".to_string(), stubs.call_stub_entry));
    entries.push(("call stub return address".to_string(), stubs.call_stub_return_address));
    entries.push(("catch exception".to_string(), stubs.catch_exception_entry));
    entries.push(("forward exception".to_string(), stubs.forward_exception_entry));
    entries.push(("throw StackOverflowError".to_string(), stubs.throw_stack_overflow_error_entry));
    entries.push(("throw AbstractMethodError".to_string(), stubs.throw_abstract_method_error_entry));
    if let Some(address) = stubs.update_bytes_crc32 {
        entries.push(("updateBytesCRC32".to_string(), address));
    }
    if let Some(address) = stubs.update_bytes_crc32c {
        entries.push(("updateBytesCRC32C".to_string(), address));
    }
    entries.push(("slow signature handler".to_string(), interpreter.slow_signature_handler));
    for (type_, address) in interpreter.result_handlers.iter() {
        entries.push((format!("result handler {:?}", type_), address));
    }
    for (name, address) in [
        ("rethrow exception", exceptions.rethrow_exception),
        ("throw exception", exceptions.throw_exception),
        ("remove activation preserving args", exceptions.remove_activation_preserving_args),
        ("remove activation", exceptions.remove_activation),
        ("throw ArrayIndexOutOfBoundsException", exceptions.throw_array_index_out_of_bounds_exception),
        ("throw ArrayStoreException", exceptions.throw_array_store_exception),
        ("throw ArithmeticException", exceptions.throw_arithmetic_exception),
        ("throw ClassCastException", exceptions.throw_class_cast_exception),
        ("throw NullPointerException", exceptions.throw_null_pointer_exception),
        ("throw StackOverflowError from the interpreter", exceptions.throw_stack_overflow_error),
    ] {
        entries.push((name.to_string(), address));
    }
    let states = TosState::iter().filter(|state| canonical_state(*state) == *state).collect_vec();
    for kind in InvokeKind::iter() {
        for state in &states {
            if let Some(address) = interpreter.return_entry(kind, *state) {
                entries.push((format!("return entry {} {:?}", <&'static str>::from(kind), state), address));
            }
        }
    }
    for step in 0..NUMBER_OF_DEOPT_ENTRIES {
        for state in &states {
            if let Some(address) = interpreter.deopt_entry(*state, step) {
                entries.push((format!("deopt entry {:?} step {}", state, step), address));
            }
        }
    }
    for state in TosState::iter() {
        entries.push((format!("earlyret entry {:?}", state), interpreter.earlyret_entry(state)));
    }
    entries
}

pub fn write_entries(out: &mut impl Write, registry: &InterpreterRegistry, image: Option<&NativeImage>) -> anyhow::Result<()> {
    for blob in registry.code_space.blobs() {
        writeln!(out, "{:<48} {} .. {} ({} instructions, {} codelets)", blob.name, blob.base, blob.end(), blob.instructions.len(), blob.codelets.len())?;
    }
    writeln!(out)?;
    for (name, address) in entry_points(registry) {
        let described = registry.describe(address.raw()).unwrap_or_default();
        match image.and_then(|image| image.native_address(address)) {
            Some(native) => writeln!(out, "{:<48} {:<20} {:#016x} {}", name, address.to_string(), native, described)?,
            None => writeln!(out, "{:<48} {:<20} {}", name, address.to_string(), described)?,
        }
    }
    Ok(())
}

/// External data the generated code reads, added to the image's own symbols.
pub fn external_symbols(symbols: &mut SymbolTable, external: &ExternalAddresses) {
    symbols.insert(external.safepoint_state, "SafepointSynchronize::_state", 4);
    symbols.insert(external.narrow_oop_base, "CompressedOops::_base", 8);
    symbols.insert(external.crc_table, "StubRoutines::_crc_table", 256 * 4);
    symbols.insert(external.crc32c_table, "StubRoutines::_crc32c_table", 256 * 4);
    symbols.insert(external.dispatch_tables, "TemplateInterpreter::_active_table", (NUMBER_OF_STATES * 256 * 8) as u64);
    symbols.insert(external.native_method_throw_unsatisfied_link_error_entry, "native_method_throw_unsatisfied_link_error_entry", 1);
}

struct ImageSymbols(Arc<SymbolTable>);

impl SymbolResolver for ImageSymbols {
    fn symbol(&mut self, _instruction: &Instruction, _operand: u32, _instruction_operand: Option<u32>, address: u64, _address_size: u32) -> Option<SymbolResult<'_>> {
        let (start, symbol) = self.0.lookup(address)?;
        Some(SymbolResult::with_string(start, symbol.name.clone()))
    }
}

/// Intel syntax listing of `codelets` (the whole blob when `None`). With `with_ir` every blob
/// instruction is printed as a comment above the machine code it lowered to.
pub fn write_disassembly(out: &mut impl Write, lowered: &LoweredBlob, codelets: Option<&[&Codelet]>, symbols: Arc<SymbolTable>, with_ir: bool) -> anyhow::Result<()> {
    let ranges = match codelets {
        Some(codelets) => codelets.iter().map(|codelet| (codelet.name.as_str(), lowered.native_range(codelet))).collect_vec(),
        None => vec![(lowered.blob.name.as_str(), lowered.code.base..lowered.native_end())],
    };
    let mut ir_at: HashMap<u64, Vec<usize>> = HashMap::new();
    if with_ir {
        for (index, offset) in lowered.code.instruction_offsets.iter().enumerate() {
            ir_at.entry(lowered.code.base + *offset as u64).or_default().push(index);
        }
    }
    let mut formatter = IntelFormatter::with_options(Some(Box::new(ImageSymbols(symbols.clone()))), None);
    let mut text = String::new();
    for (name, range) in ranges {
        writeln!(out, "{}: {:#x} .. {:#x}", name, range.start, range.end)?;
        let start = (range.start - lowered.code.base) as usize;
        let end = (range.end - lowered.code.base) as usize;
        let bytes = lowered.code.bytes.get(start..end).ok_or_else(|| anyhow!("{} lies outside the code of {}", name, lowered.blob.name))?;
        let mut decoder = Decoder::with_ip(64, bytes, range.start, DecoderOptions::NONE);
        let mut instruction = Instruction::default();
        while decoder.can_decode() {
            decoder.decode_out(&mut instruction);
            let ip = instruction.ip();
            if let Some(symbol) = symbols.exact(ip).filter(|_| ip != range.start) {
                writeln!(out, "{}:", symbol.name)?;
            }
            for index in ir_at.get(&ip).into_iter().flatten() {
                writeln!(out, "                                  ; {}", lowered.blob.instructions[*index])?;
            }
            text.clear();
            formatter.format(&instruction, &mut text);
            let offset = (ip - lowered.code.base) as usize;
            let encoded = lowered.code.bytes[offset..offset + instruction.len()].iter().map(|byte| format!("{:02x}", byte)).join("");
            writeln!(out, "  {:016x} {:<30} {}", ip, encoded, text)?;
        }
    }
    Ok(())
}

/// Fingerprint and native argument placement of a method descriptor. With an image, also lists
/// the signature handler generated for it.
pub fn write_signature(out: &mut impl Write, registry: &InterpreterRegistry, descriptor: &str, is_static: bool, with_handler: bool) -> anyhow::Result<()> {
    let iterator = NativeSignatureIterator::from_descriptor(descriptor, is_static).with_context(|| format!("parsing {}", descriptor))?;
    let fingerprint = iterator.fingerprint();
    writeln!(out, "descriptor   {}", descriptor)?;
    writeln!(out, "static       {}", is_static)?;
    writeln!(out, "parameters   {} slots", iterator.size_of_parameters())?;
    match fingerprint {
        Fingerprint::Fingerprint(raw) => writeln!(out, "fingerprint  {:#018x}", raw)?,
        Fingerprint::TooComplex => writeln!(out, "fingerprint  too complex, slow handler only")?,
    }
    writeln!(out, "{}", MarshalingPlan::of(&iterator))?;
    if !with_handler {
        return Ok(());
    }
    let handler = match registry.signature_handlers.promote(fingerprint)? {
        Some(handler) => handler,
        None => {
            writeln!(out, "no generated handler")?;
            return Ok(());
        }
    };
    let image = NativeImage::lower(&registry.code_space.blobs())?;
    let lowered = image.lowered_for(handler).ok_or_else(|| anyhow!("handler {} was not lowered", handler))?;
    let mut symbols = image.symbols();
    external_symbols(&mut symbols, &registry.external);
    writeln!(out)?;
    write_disassembly(out, lowered, None, Arc::new(symbols), false)
}
