use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use entry_asm::code_space::CodeSpace;
use entry_asm::CodeAddress;
use interpreter_common::fingerprint::Fingerprint;
use interpreter_common::flags::ExternalAddresses;
use parking_lot::{Mutex, RwLock};

use crate::generator::generate_signature_handler;
use crate::result_handlers::ResultHandlerTable;
use crate::SignatureHandlerError;

/// Shared signature handlers keyed by fingerprint.
///
/// The first native method of a shape gets the slow handler. Once the slow handler has run for a
/// representable fingerprint the shape is promoted: a handler is generated and every later lookup
/// of that shape gets it directly.
pub struct SignatureHandlerLibrary {
    code_space: Arc<CodeSpace>,
    external: ExternalAddresses,
    result_handlers: ResultHandlerTable,
    slow_handler: CodeAddress,
    handler_capacity: usize,
    handlers: RwLock<HashMap<u64, CodeAddress>>,
    seen: Mutex<HashSet<u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerLookup {
    Generated(CodeAddress),
    Slow(CodeAddress),
}

impl HandlerLookup {
    pub fn address(&self) -> CodeAddress {
        match self {
            HandlerLookup::Generated(address) | HandlerLookup::Slow(address) => *address,
        }
    }
}

impl SignatureHandlerLibrary {
    pub fn new(code_space: Arc<CodeSpace>, external: ExternalAddresses, result_handlers: ResultHandlerTable, slow_handler: CodeAddress, handler_capacity: usize) -> Self {
        Self { code_space, external, result_handlers, slow_handler, handler_capacity, handlers: RwLock::new(HashMap::new()), seen: Mutex::new(HashSet::new()) }
    }

    pub fn slow_handler(&self) -> CodeAddress {
        self.slow_handler
    }

    pub fn result_handlers(&self) -> &ResultHandlerTable {
        &self.result_handlers
    }

    /// The handler to install on a method that has none yet.
    pub fn lookup(&self, fingerprint: Fingerprint) -> HandlerLookup {
        let raw = match fingerprint {
            Fingerprint::TooComplex => return HandlerLookup::Slow(self.slow_handler),
            Fingerprint::Fingerprint(raw) => raw,
        };
        if let Some(handler) = self.handlers.read().get(&raw) {
            tracing::trace!(fingerprint = %format!("{:#x}", raw), "signature handler hit");
            return HandlerLookup::Generated(*handler);
        }
        self.seen.lock().insert(raw);
        tracing::trace!(fingerprint = %format!("{:#x}", raw), "signature handler miss");
        HandlerLookup::Slow(self.slow_handler)
    }

    /// Called after the slow handler ran for `fingerprint`. Returns the generated handler, or
    /// `None` when the shape stays on the slow path.
    ///
    /// Concurrent promotions of one shape may both generate code; the first one installed wins and
    /// the other blob stays unused.
    pub fn promote(&self, fingerprint: Fingerprint) -> Result<Option<CodeAddress>, SignatureHandlerError> {
        let raw = match fingerprint {
            Fingerprint::TooComplex => return Ok(None),
            Fingerprint::Fingerprint(raw) => raw,
        };
        if let Some(handler) = self.handlers.read().get(&raw) {
            return Ok(Some(*handler));
        }
        let blob = generate_signature_handler(fingerprint, &self.result_handlers, &self.code_space, self.handler_capacity, self.external)?;
        let handler = *self.handlers.write().entry(raw).or_insert(blob.base);
        tracing::debug!(fingerprint = %format!("{:#x}", raw), handler = %handler, "promoted signature to generated handler");
        Ok(Some(handler))
    }

    pub fn generated_handlers(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn has_seen(&self, fingerprint: Fingerprint) -> bool {
        self.seen.lock().contains(&fingerprint.to_raw())
    }
}
