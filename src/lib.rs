//! kettle: an interactive test shell that keeps a warm test environment in
//! a long-lived worker process and runs every test batch in a disposable
//! child of it.

pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod framework;
pub mod ipc;
pub mod process;
pub mod reporter;
pub mod result;
pub mod signals;
pub mod supervisor;
pub mod worker;
