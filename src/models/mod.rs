//! Value model shared by the VM and native functions.

pub mod preview;
pub mod value;

pub use preview::PREVIEW_WIDTH;
pub use value::{OpaqueValue, Value};
