#![forbid(unsafe_code)]
//! Asynchronous 9P2000.u filesystem server library exporting a FAT32 volume.
//!
//! This crate serves a single FAT32-formatted block device (an SD card image,
//! on a hosted build; a real SD card, on the embedded target this is meant
//! for) over the 9P2000.u wire protocol. Unlike a 9P2000.L server, which
//! targets the Linux kernel's v9fs client and drops the classic 9P2000
//! `open`/`create`/`stat`/`wstat` operations in favor of `l*` equivalents,
//! this server speaks plain 9P2000.u to any client that negotiates it
//! (including 9P2000 clients that never propose `.u` at all).
//!
//! # Getting Started
//!
//! Build a [`server::Server`] from a [`config::Config`] and an open handle to
//! the FAT32 volume, then call [`server::Server::start`] with a bind address:
//!
//! ```no_run
//! use p9fs::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let file = std::fs::OpenOptions::new()
//!         .read(true)
//!         .write(true)
//!         .open("sdcard.img")?;
//!     let server = Server::new(Config::default(), file).map_err(std::io::Error::other)?;
//!     server.start("0.0.0.0:564".parse().unwrap()).await
//! }
//! ```
//!
//! # Message Flow
//!
//! 1. **Version Negotiation**: client sends `Tversion`, server responds `Rversion`
//! 2. **Attach**: client attaches to the volume root with `Tattach`
//! 3. **Operations**: `Twalk`, `Topen`/`Tcreate`, `Tread`/`Twrite`, `Tstat`/`Twstat`
//! 4. **Cleanup**: client clunks fids with `Tclunk` to release resources
//!
//! # Concurrency
//!
//! Every request on a connection is handled to completion, including its
//! response write, before the next one starts — see [`dispatch`] for why.
//! The FAT32 volume is guarded by a single [`lock::FatLock`] shared by every
//! connection the server instance accepts.
//!
//! # Error Handling
//!
//! Handlers return a [`error::Result`]; the dispatcher folds any `Err` into
//! an `Rerror` carrying one of a fixed set of client-visible strings (see
//! [`error::Error::ename`]) rather than a numeric errno, the 9P2000.u way.
//!
//! # Safety
//!
//! This crate forbids unsafe code (`#![forbid(unsafe_code)]`).

pub mod config;
pub mod dispatch;
pub mod error;
pub mod fcall;
pub mod handlers;
pub mod lock;
pub mod mapper;
pub mod serialize;
pub mod server;
pub mod session;

pub use crate::error::{Error, Result};
pub use crate::fcall::*;
