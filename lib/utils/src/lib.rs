#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod arena;
pub mod handle;
pub mod registry;
