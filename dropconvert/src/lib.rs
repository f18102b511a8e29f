//! Bridge between a desktop drop target and an external document converter.
//!
//! Dropped paths are classified, a script interpreter and its conversion
//! package are located (and installed if missing), and each batch is handed to a
//! conversion entrypoint script through two JSON path-list files. The crate is
//! split the usual way:
//!
//! - **[`core`]**: Pure data model and path rules. No I/O.
//! - **[`io`]**: Child processes, exchange files, config on disk.
//!
//! The components ([`intake`], [`environment`], [`dependencies`], [`bootstrap`],
//! [`orchestrator`]) combine the two, and [`worker`] runs them off the caller's
//! thread. Every component reports progress through a [`sink::LogSink`].

pub mod bootstrap;
pub mod core;
pub mod dependencies;
pub mod environment;
pub mod error;
pub mod exit_codes;
pub mod intake;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod sink;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod worker;
