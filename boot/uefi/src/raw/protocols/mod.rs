//! Protocol interfaces used by the chainloader

pub mod dns4;
pub mod loaded_image;
pub mod pxe;
pub mod shim_lock;
pub mod simple_network;
