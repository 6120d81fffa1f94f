//! webmforge - fetch an online video and re-encode it to WebM
//!
//! A small HTTP service: `POST /convert` downloads a source with yt-dlp and
//! encodes it with ffmpeg (VP9 + Opus), `GET /download/<file>` hands the result
//! out exactly once and deletes it.
//!
//! This library crate exposes the pieces for integration testing.

pub mod command;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod server;
pub mod storage;
pub mod tools;
pub mod transcoder;

pub use error::{Error, Result};
