//! git-wire-fetch: the client side of `git-upload-pack`.
//!
//! Streams v2 packfiles into an object store, drives the want/have
//! negotiation with a pluggable negotiator, and offers the high-level
//! `ls`/`fetch`/`clone` operations on top.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;
pub mod negotiate;
pub mod ops;
pub mod pack;

mod engine;

pub use error::{Error, Result};
pub use negotiate::{Ack, AckKind, Acks, DeepenSpec, Negotiator, Round, ShallowUpdate};
pub use ops::{
    clone, fetch, fetch_all, fetch_one, fetch_some, ls, FetchDelegate, FetchOptions,
    FetchOutcome, RefUpdateOutcome,
};
