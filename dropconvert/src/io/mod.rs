//! Side-effecting building blocks: child processes, exchange files, config on disk.

pub mod config;
pub mod exchange;
pub mod process;
