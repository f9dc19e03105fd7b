//! Raw UEFI bindings
//!
//! Unsafe, ABI-exact definitions of the tables and protocols the
//! chainloader touches. Everything above this module works with the HAL
//! value types.
//!
//! # Safety
//!
//! All types in this module are raw FFI types. Using them directly is unsafe
//! and requires understanding the UEFI specification.

pub mod boot_services;
pub mod protocols;
pub mod system_table;
pub mod types;

pub use boot_services::EfiBootServices;
pub use system_table::EfiSystemTable;
pub use types::*;
