use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use itertools::Itertools;
use parking_lot::RwLock;

use crate::instr::Instr;
use crate::{CodeAddress, LabelName};

pub const CODE_SPACE_BASE: u64 = 0x0000_6000_0000_0000;
/// Each blob owns a window of this many instruction addresses.
pub const BLOB_STRIDE: u64 = 1 << 32;

/// A named range inside a blob, one per generated entry or stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codelet {
    pub name: String,
    pub start: CodeAddress,
    pub end: CodeAddress,
}

impl Codelet {
    pub fn contains(&self, address: u64) -> bool {
        self.start.0 <= address && address < self.end.0
    }
}

/// Immutable generated code. Never freed while its code space lives.
#[derive(Debug)]
pub struct CodeBlob {
    pub name: String,
    pub base: CodeAddress,
    pub instructions: Vec<Instr>,
    pub labels: HashMap<LabelName, usize>,
    pub codelets: Vec<Codelet>,
}

impl CodeBlob {
    pub fn end(&self) -> CodeAddress {
        self.base.offset(self.instructions.len())
    }

    pub fn contains(&self, address: u64) -> bool {
        self.base.0 <= address && address < self.end().0
    }

    pub fn instruction_at(&self, address: u64) -> Option<&Instr> {
        if !self.contains(address) {
            return None;
        }
        self.instructions.get((address - self.base.0) as usize)
    }

    pub fn index_of(&self, address: CodeAddress) -> Option<usize> {
        if self.contains(address.0) {
            Some((address.0 - self.base.0) as usize)
        } else {
            None
        }
    }

    pub fn label_address(&self, label: LabelName) -> Option<CodeAddress> {
        self.labels.get(&label).map(|index| self.base.offset(*index))
    }

    pub fn codelet_at(&self, address: u64) -> Option<&Codelet> {
        self.codelets.iter().find(|codelet| codelet.contains(address))
    }

    pub fn codelet_named(&self, name: &str) -> Option<&Codelet> {
        self.codelets.iter().find(|codelet| codelet.name == name)
    }
}

/// All generated code of one runtime. Blobs are appended, looked up by address, and never
/// removed.
#[derive(Debug)]
pub struct CodeSpace {
    next_blob: AtomicU64,
    blobs: RwLock<HashMap<u64, Arc<CodeBlob>>>,
}

impl Default for CodeSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeSpace {
    pub fn new() -> Self {
        Self { next_blob: AtomicU64::new(0), blobs: RwLock::new(HashMap::new()) }
    }

    /// Reserves the address window of a new blob.
    pub fn reserve(&self) -> CodeAddress {
        let index = self.next_blob.fetch_add(1, Ordering::SeqCst);
        CodeAddress(CODE_SPACE_BASE + index * BLOB_STRIDE)
    }

    pub fn install(&self, blob: CodeBlob) -> Arc<CodeBlob> {
        let blob = Arc::new(blob);
        let key = Self::blob_key(blob.base.0);
        tracing::debug!(name = blob.name.as_str(), base = %blob.base, instructions = blob.instructions.len(), "installed code blob");
        self.blobs.write().insert(key, blob.clone());
        blob
    }

    fn blob_key(address: u64) -> u64 {
        (address - CODE_SPACE_BASE) / BLOB_STRIDE
    }

    pub fn blob_for(&self, address: u64) -> Option<Arc<CodeBlob>> {
        if address < CODE_SPACE_BASE {
            return None;
        }
        let blob = self.blobs.read().get(&Self::blob_key(address)).cloned()?;
        if blob.contains(address) {
            Some(blob)
        } else {
            None
        }
    }

    pub fn contains(&self, address: u64) -> bool {
        self.blob_for(address).is_some()
    }

    /// Blobs in installation address order.
    pub fn blobs(&self) -> Vec<Arc<CodeBlob>> {
        self.blobs.read().values().cloned().sorted_by_key(|blob| blob.base).collect()
    }

    pub fn describe(&self, address: u64) -> Option<String> {
        let blob = self.blob_for(address)?;
        Some(match blob.codelet_at(address) {
            Some(codelet) => format!("{}+{}", codelet.name, address - codelet.start.0),
            None => format!("{}+{}", blob.name, address - blob.base.0),
        })
    }
}
