//! Transport layer: the live HTTP client plus the retry policy the
//! scheduler applies to its classified errors.

pub mod classify;
pub mod http;
pub mod retry;
pub mod wire;

pub use self::http::HttpTransport;
pub use self::retry::RetryPolicy;
