//! Output artifact writers.
//!
//! The compiler's deliverable is the cell library; these writers turn it
//! into a binary GDSII stream file or per-cell PDF plots. Both are
//! deterministic when a fixed timestamp is supplied.

pub mod gds;
pub mod pdf;
