//! # dlhd-rs
//!
//! This crate turns a DLHD watch page link into a directly playable HLS
//! manifest URL, together with the headers a player has to send to fetch
//! it.
//!
//! Getting there takes a walk through several embedding pages (watch page,
//! player page, player iframe), a signed auth request with parameters dug
//! out of obfuscated data in the iframe, and a server lookup that picks the
//! CDN edge. Results are cached on disk and re-validated before reuse.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dlhd_rs::{config::ExtractorConfig, pipeline::Extractor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let extractor = Extractor::new(ExtractorConfig::default()).unwrap();
//!
//!     let stream = extractor
//!         .extract("https://dlhd.dad/watch.php?id=51", false)
//!         .await
//!         .unwrap();
//!
//!     println!("{}", stream.destination_url);
//!     for (name, value) in &stream.request_headers {
//!         println!("{}: {}", name, value);
//!     }
//!
//!     extractor.close().await;
//! }
//! ```
//!
//! Concurrent calls for the same channel are collapsed into one upstream
//! resolution, so a single `Extractor` can be shared behind an `Arc`.

#![forbid(unsafe_code)]

#[macro_use]
extern crate log;

pub mod auth;
pub mod cache;
pub mod channel;
pub mod config;
pub mod domain;
pub mod error;
pub mod gate;
pub mod page_chain;
pub mod params;
pub mod pipeline;
pub mod synth;
pub mod transport;
