use http::Method;

/// Header defines the port (interface) for the parsed request head an
/// upstream HTTP layer delivers to the router. The routing logic only needs
/// the path, the method, and header lookup; it is indifferent to which HTTP
/// stack produced them.
pub trait Header: Send + Sync {
    /// The request path, without any query string.
    fn path(&self) -> &str;

    fn method(&self) -> &Method;

    /// Look up a request header by name, case-insensitively.
    fn header(&self, name: &str) -> Option<String>;
}
