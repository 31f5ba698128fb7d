//! Offline view of the generated interpreter: entry tables, lowered x86-64 and the marshaling of
//! native signatures.

pub mod image;
pub mod listing;
pub mod options;
