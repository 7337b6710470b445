//! Cookie handling.
//!
//! [`Cookie::parse`] turns a `Set-Cookie` header into a scoped cookie,
//! [`CookieJar`] stores them, and [`CookieMiddleware`] wires both into the
//! request pipeline.

mod jar;
mod middleware;
mod parse;

pub use jar::{CookieJar, CookieJarError, MemoryCookieJar};
pub use middleware::CookieMiddleware;
pub use parse::{Cookie, CookieParseError, SameSite};
