use http::{request::Parts, Method};

use crate::ports::Header;

/// [`Header`] implementation over the parsed head of an `http` request.
///
/// Whatever HTTP stack produced the request, `http::request::Parts` is the
/// common denominator; the path is taken from the URI with any query string
/// already stripped, which is what the pattern engine expects.
pub struct RequestHeader {
    path: String,
    parts: Parts,
}

impl RequestHeader {
    pub fn new(parts: Parts) -> Self {
        let path = parts.uri.path().to_string();
        Self { path, parts }
    }
}

impl Header for RequestHeader {
    fn path(&self) -> &str {
        &self.path
    }

    fn method(&self) -> &Method {
        &self.parts.method
    }

    fn header(&self, name: &str) -> Option<String> {
        self.parts
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(String::from)
    }
}
