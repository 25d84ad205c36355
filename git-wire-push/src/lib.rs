//! git-wire-push: the client side of `git-receive-pack`.
//!
//! Generates delta-compressed v2 packfiles for the objects the server lacks,
//! sends ref update commands, and parses the per-ref report-status reply.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod commands;
pub mod error;
pub mod ops;
pub mod pack;
pub mod report;

pub use commands::Command;
pub use error::{Error, Result};
pub use ops::{push, update_and_create, PushDelegate, PushOptions, UpdateOutcome};
pub use report::{PushOutcome, RefResult, RefStatus};
