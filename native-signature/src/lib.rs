use entry_asm::error::GenerationError;
use thiserror::Error;

pub mod generator;
pub mod iterator;
pub mod library;
pub mod plan;
pub mod result_handlers;
pub mod slow_handler;

#[cfg(test)]
pub mod tests;

#[derive(Debug, Error)]
pub enum SignatureHandlerError {
    #[error("signature does not fit a fingerprint")]
    TooComplex,
    #[error(transparent)]
    Generation(#[from] GenerationError),
}
