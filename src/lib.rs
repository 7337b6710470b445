//! Fetcher Core Library
//!
//! A Fetch-style HTTP client engine: `Request`/`Response`/`Headers` with
//! single-use streaming bodies, cooperative cancellation through
//! `AbortSignal`, and a composable middleware pipeline with HTTP caching,
//! cookies and retry.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`body`] - Single-consumption body streams and the stream fork
//! - [`message`] - Headers, requests and responses
//! - [`abort`] - Cancellation signals and timeout races
//! - [`middleware`] - The pipeline contract and bundled middlewares
//! - [`cache`] - Cache-Control aware response caching
//! - [`cookie`] - Set-Cookie parsing, cookie jars and the cookie middleware
//! - [`retry`] - Retry policy, failure classification and the retry loop
//! - [`transport`] - The wire seam and the reqwest transport
//! - [`client`] - The client facade and its error policy

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod abort;
pub mod body;
pub mod cache;
pub mod client;
pub mod clock;
pub mod cookie;
pub mod error;
pub mod message;
pub mod middleware;
pub mod retry;
pub mod transport;

mod user_agent;

// Re-export commonly used types
pub use abort::{AbortReason, AbortSignal};
pub use body::Body;
pub use client::{
    ClientBuilder, ClientConfig, FetchClient, FetchResult, RequestOptions, decode, decode_with,
    default_client,
};
pub use error::{FetchError, RetryFailure, TimeoutPhase};
pub use message::{Headers, Method, Request, Response};
pub use middleware::{Middleware, Next};
pub use retry::{RetryPolicy, classify_error};
