//! Shared helpers.
//!
//! - **URL validation**: scheme checks and SSRF protection for feed URLs

mod url_validator;

pub use url_validator::{validate_url, UrlValidationError};
