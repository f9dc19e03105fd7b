//! # netchain PE/COFF Image Loader
//!
//! Loads a PE/COFF executable fetched over the network into loader-owned
//! memory and runs it in place of the chainloader.
//!
//! ## Stages
//!
//! 1. [`fat`]: pick the native sub-image of a fat binary
//! 2. [`header`]: validate the headers, extract layout and entry point
//! 3. [`mapper`]: copy headers and sections into aligned pages
//! 4. [`relocate`]: apply base relocations for the actual load address
//! 5. [`launch`]: swap the loaded-image record, call the entry point,
//!    collect the exit status and restore
//!
//! Under Secure Boot, [`secure`] checks the signature instead and the
//! firmware loads the image. [`loader::Loader`] ties the stages together.
//!
//! Every offset taken from the image is bounds checked before use; a
//! failure at any stage releases what the attempt allocated.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod arch;
pub mod error;
pub mod fat;
pub mod header;
pub mod launch;
pub mod loader;
pub mod mapper;
pub mod relocate;
pub mod secure;

#[cfg(any(test, feature = "testimage"))]
#[doc(hidden)]
pub mod testimage;

pub use arch::{Machine, RelocArch};
pub use error::{Error, Result};
pub use fat::{select_arch_image, select_arch_image_for, Selection};
pub use header::{parse_header, parse_header_with, ImageHeader, SectionDescriptor};
pub use launch::{launch, ExitDisposition, ExitStatus, ExitToken, ExitTraps, LaunchContext};
pub use loader::{load_and_launch, LoadState, Loader, LoaderConfig};
pub use mapper::{map_sections, map_sections_with, MappedImage};
pub use relocate::{apply_relocations, load_delta, relocate};
