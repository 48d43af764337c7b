//! Face swap demo workflow: two image slots, validation, previews and a
//! simulated processing run with progress reporting.

pub mod artifact;
pub mod session;
pub mod upload;
pub mod workflow;
