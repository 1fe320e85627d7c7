//! Epoch training: configuration, the interleaving driver, gradient
//! accumulation, loss, metric sinks and checkpoint filtering.

pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod grads;
pub mod loss;
pub mod metrics;
