//! Physical-memory management: page-frame allocation with per-frame
//! reference counts, copy-on-write fault resolution, and page swapping to a
//! backing block device.
//!
//! The embedding kernel supplies the collaborators (victim selection,
//! page-table access, block I/O) through the traits in [`system`],
//! [`swapping::page_replacement`] and [`block`].

#![cfg_attr(target_os = "none", no_std)]

pub mod block;
pub mod mem;
pub mod swapping;
pub mod sync;
pub mod system;

#[cfg(test)]
mod test_support;

extern crate alloc;
