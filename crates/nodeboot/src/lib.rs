//! `nodeboot` bootstrap binary support.
//!
//! Everything with side effects lives here: downloads, child processes, the
//! tunnel supervisor, outbound publishing and file cleanup. The pure parts
//! come from `nodeboot-core`.

pub mod bootstrap;
pub mod cleanup;
pub mod cli;
pub mod fetch;
pub mod metadata;
pub mod process;
pub mod tunnel;
pub mod upload;
