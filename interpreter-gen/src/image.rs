use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use entry_asm::code_space::{CodeBlob, Codelet};
use entry_asm::error::LoweringError;
use entry_asm::ir_to_native::{lower_blob, AddressResolver, NativeCode};
use entry_asm::native_buffer::NativeCodeBuffer;
use entry_asm::runtime_entry::RuntimeEntry;
use entry_asm::CodeAddress;
use itertools::Itertools;
use strum::IntoEnumIterator;
use thiserror::Error;

/// Where blobs are laid out when the image is not installed.
pub const IMAGE_BASE: u64 = 0x7e00_0000_0000;
pub const BLOB_WINDOW: u64 = 1 << 24;
/// Runtime entries have no native code of their own, each gets a distinct fake address.
pub const RUNTIME_ENTRIES_BASE: u64 = 0x7f00_0000_0000;
const RUNTIME_ENTRY_STRIDE: u64 = 0x100;

const MAX_PASSES: usize = 6;
const ESTIMATED_INSTRUCTION_SIZE: usize = 8;
const PAGE_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error(transparent)]
    Lowering(#[from] LoweringError),
    #[error("native offsets still moving after {0} lowering passes")]
    Unstable(usize),
}

pub fn runtime_entry_address(entry: RuntimeEntry) -> u64 {
    RUNTIME_ENTRIES_BASE + entry as u64 * RUNTIME_ENTRY_STRIDE
}

/// One blob and the machine code it lowered to.
#[derive(Debug, Clone)]
pub struct LoweredBlob {
    pub blob: Arc<CodeBlob>,
    pub code: NativeCode,
}

impl LoweredBlob {
    pub fn native_address(&self, address: CodeAddress) -> Option<u64> {
        self.code.native_address(self.blob.index_of(address)?)
    }

    pub fn native_end(&self) -> u64 {
        self.code.base + self.code.bytes.len() as u64
    }

    pub fn native_range(&self, codelet: &Codelet) -> Range<u64> {
        let start = self.native_address(codelet.start).unwrap_or(self.code.base);
        let end = self.native_address(codelet.end).unwrap_or_else(|| self.native_end());
        start..end
    }

    pub fn contains_native(&self, address: u64) -> bool {
        (self.code.base..self.native_end()).contains(&address)
    }
}

struct Placed {
    blob: Arc<CodeBlob>,
    native_base: u64,
    offsets: Vec<usize>,
}

/// Answers cross-blob references with the offsets of the previous pass.
struct PassResolver<'l> {
    placed: &'l [Placed],
}

impl AddressResolver for PassResolver<'_> {
    fn runtime_entry(&self, entry: RuntimeEntry) -> u64 {
        runtime_entry_address(entry)
    }

    fn code_address(&self, address: CodeAddress) -> Option<u64> {
        let placed = self.placed.iter().find(|placed| placed.blob.contains(address.raw()))?;
        let index = placed.blob.index_of(address)?;
        placed.offsets.get(index).map(|offset| placed.native_base + *offset as u64)
    }
}

/// Lowers every blob until no native offset moves. Jumps between blobs are encoded against the
/// previous pass, so a pass that reproduces its inputs has every reference right.
fn converge(mut placed: Vec<Placed>) -> Result<Vec<LoweredBlob>, ImageError> {
    for pass in 0..MAX_PASSES {
        let lowered = {
            let resolver = PassResolver { placed: &placed };
            placed.iter().map(|placed| lower_blob(&placed.blob, placed.native_base, &resolver)).collect::<Result<Vec<_>, _>>()?
        };
        let stable = placed.iter().zip(lowered.iter()).all(|(placed, code)| placed.offsets == code.instruction_offsets);
        tracing::debug!(pass, stable, "lowered code image");
        if stable {
            return Ok(placed.into_iter().zip(lowered).map(|(placed, code)| LoweredBlob { blob: placed.blob, code }).collect());
        }
        for (placed, code) in placed.iter_mut().zip(lowered) {
            placed.offsets = code.instruction_offsets;
        }
    }
    Err(ImageError::Unstable(MAX_PASSES))
}

fn estimated_offsets(blob: &CodeBlob) -> Vec<usize> {
    (0..blob.instructions.len()).map(|index| index * ESTIMATED_INSTRUCTION_SIZE).collect()
}

/// The whole code space as x86-64, optionally copied into executable memory. Installed code is
/// never run: runtime entries point at addresses with nothing behind them.
pub struct NativeImage {
    blobs: Vec<LoweredBlob>,
    buffers: Vec<NativeCodeBuffer>,
}

impl NativeImage {
    pub fn lower(blobs: &[Arc<CodeBlob>]) -> Result<Self, ImageError> {
        let placed = blobs
            .iter()
            .enumerate()
            .map(|(i, blob)| Placed { blob: blob.clone(), native_base: IMAGE_BASE + i as u64 * BLOB_WINDOW, offsets: estimated_offsets(blob) })
            .collect_vec();
        Ok(Self { blobs: converge(placed)?, buffers: vec![] })
    }

    /// Lowers once to learn the sizes, then again against freshly mapped buffers, and copies the
    /// result in.
    pub fn install(blobs: &[Arc<CodeBlob>]) -> Result<Self, ImageError> {
        let sized = Self::lower(blobs)?;
        let mut buffers = vec![];
        let mut placed = vec![];
        for lowered in sized.blobs {
            // absolute targets may encode longer once the real addresses are known
            let capacity = (lowered.code.bytes.len() * 2 + PAGE_SIZE).next_multiple_of(PAGE_SIZE);
            let buffer = NativeCodeBuffer::reserve(capacity)?;
            placed.push(Placed { native_base: buffer.address(), offsets: lowered.code.instruction_offsets, blob: lowered.blob });
            buffers.push(buffer);
        }
        let blobs = converge(placed)?;
        for (buffer, lowered) in buffers.iter_mut().zip(blobs.iter()) {
            buffer.install(&lowered.code)?;
            tracing::info!(blob = lowered.blob.name.as_str(), address = %format!("{:#x}", buffer.address()), bytes = lowered.code.bytes.len(), "installed");
        }
        Ok(Self { blobs, buffers })
    }

    pub fn blobs(&self) -> &[LoweredBlob] {
        &self.blobs
    }

    pub fn is_installed(&self) -> bool {
        !self.buffers.is_empty()
    }

    pub fn lowered_for(&self, address: CodeAddress) -> Option<&LoweredBlob> {
        self.blobs.iter().find(|lowered| lowered.blob.contains(address.raw()))
    }

    pub fn native_address(&self, address: CodeAddress) -> Option<u64> {
        self.lowered_for(address)?.native_address(address)
    }

    /// Installed bytes of a blob, as read back from its buffer.
    pub fn installed_code(&self, blob: &CodeBlob) -> Option<&[u8]> {
        let index = self.blobs.iter().position(|lowered| lowered.blob.base == blob.base)?;
        self.buffers.get(index).map(|buffer| buffer.code())
    }

    /// Codelets and runtime entries by native address.
    pub fn symbols(&self) -> SymbolTable {
        let mut symbols = SymbolTable::default();
        for entry in RuntimeEntry::iter() {
            symbols.insert(runtime_entry_address(entry), entry.name(), 1);
        }
        for lowered in &self.blobs {
            symbols.insert(lowered.code.base, lowered.blob.name.as_str(), lowered.code.bytes.len() as u64);
            for codelet in &lowered.blob.codelets {
                let range = lowered.native_range(codelet);
                symbols.insert(range.start, codelet.name.as_str(), range.end - range.start);
            }
        }
        symbols
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub size: u64,
}

/// Later inserts at the same address win, so codelets shadow the blob they start.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: BTreeMap<u64, Symbol>,
}

impl SymbolTable {
    pub fn insert(&mut self, address: u64, name: impl Into<String>, size: u64) {
        self.symbols.insert(address, Symbol { name: name.into(), size: size.max(1) });
    }

    pub fn lookup(&self, address: u64) -> Option<(u64, &Symbol)> {
        let (start, symbol) = self.symbols.range(..=address).next_back()?;
        if address < start + symbol.size {
            Some((*start, symbol))
        } else {
            None
        }
    }

    pub fn exact(&self, address: u64) -> Option<&Symbol> {
        self.symbols.get(&address)
    }
}
