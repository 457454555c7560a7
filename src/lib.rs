//! polboot — boot-time security policy loader.
//!
//! Selects, transforms, and commits a binary security policy image to an
//! enforcement kernel, and resolves the desired enforcement mode at early
//! boot from layered configuration sources.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod boot;
pub mod config;
pub mod image;
pub mod kernel;
pub mod logging;
pub mod negotiate;
pub mod provider;
