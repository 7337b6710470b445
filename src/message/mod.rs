//! Request, response and header value types.

mod headers;
mod request;
mod response;

pub use headers::Headers;
pub use request::{RedirectPolicy, Request, RequestCache};
pub use response::{Response, ResponseBuilder};

pub use reqwest::Method;
