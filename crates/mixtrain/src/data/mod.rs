//! Batch types, loader capability, and label construction for the two
//! training sources.

pub mod batch;
pub mod labels;
pub mod loader;
