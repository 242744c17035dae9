//! `kvcli` is an interactive shell and one-shot command runner for the `kv`
//! transactional key-value store.
//!
//! ## Getting started
//!
//! ```doc
//! ❯ ./kvcli
//!
//! ██  ██  █        █
//! ██ ██   ██      ██
//! ███      ██    ██
//! ██ ██     ██  ██
//! ██  ██     ████  KV Storage CLI
//!
//! kvcli > SET order_key xxx
//! OK
//!
//! kvcli > GET order_key
//! xxx
//!
//! kvcli > DEL order_key
//! OK
//!
//! kvcli > GET order_key
//! (nil)
//! ```

pub mod command;
pub mod config;
pub mod rusty;
pub mod session;
pub mod trace;
