//! Configurations for the device model.
//! The module is divided as a library for better organization and independence.
//!
//! Every constant is generated by `build.rs` from the selected profile of the workspace
//! `config.json` (profile chosen by the `DEVMODEL_PROFILE` environment variable at build time,
//! `"default"` otherwise).

#![no_std]
#![deny(missing_docs)]

/// Constants generated from `config.json`.
#[allow(missing_docs)]
pub mod build_flags {
    include!(concat!(env!("OUT_DIR"), "/build_flags.rs"));
}

pub use build_flags::*;
