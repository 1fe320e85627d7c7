//! Model-side capabilities: the multimodal model trait, text-derived vision
//! features, and the frozen text-to-image projection.

pub mod features;
pub mod multimodal;
pub mod projection;
