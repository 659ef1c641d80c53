//! HTTP transport shared by the hosted-backend adapters.

mod http;

pub use http::{classify_reqwest_error, classify_status, HttpTransport, TransportError};
