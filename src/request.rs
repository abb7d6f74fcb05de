use bytes::Bytes;
use std::fmt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Patch,
    Options,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
        })
    }
}

/// A request the caller wants admitted as an HTTP/2 stream. Pseudo-headers
/// (`:method`, `:scheme`, `:path`, `:authority`) are derived from `method`
/// and `url` rather than carried in `headers`.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Request {
    #[must_use]
    pub fn new(method: Method, url: Url, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            url,
            headers,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url, Vec::new(), Bytes::new())
    }

    #[must_use]
    pub fn post(url: Url, body: impl Into<Bytes>) -> Self {
        Self::new(Method::Post, url, Vec::new(), body)
    }

    /// The full pseudo-header-prefixed header list HPACK should encode,
    /// in the order RFC 7540 §8.1.2.3 requires (pseudo-headers first).
    /// `scheme_override` is [`crate::connection::ConnectionConfig::scheme`]:
    /// when set, it replaces the URL's own scheme on the wire (e.g. a
    /// connection behind a TLS-terminating proxy that still advertises
    /// `:scheme: https` to the origin).
    pub fn header_block(&self, scheme_override: Option<&str>) -> Vec<(&str, &str)> {
        let authority: &str = self.url.host_str().unwrap_or("");
        let mut out = vec![
            (":method", self.method_str()),
            (":scheme", scheme_override.unwrap_or_else(|| self.url.scheme())),
            (":authority", authority),
            (":path", self.path()),
        ];
        out.extend(self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        out
    }

    fn method_str(&self) -> &'static str {
        match self.method {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
        }
    }

    fn path(&self) -> &str {
        let path = self.url.path();
        if path.is_empty() {
            "/"
        } else {
            path
        }
    }
}

fn method_from_str(s: &str) -> Method {
    match s {
        "POST" => Method::Post,
        "PUT" => Method::Put,
        "DELETE" => Method::Delete,
        "HEAD" => Method::Head,
        "PATCH" => Method::Patch,
        "OPTIONS" => Method::Options,
        _ => Method::Get,
    }
}

/// Reconstructs the request a PUSH_PROMISE describes from its decoded
/// pseudo-headers, for surfacing as [`crate::events::ConnectionEvent::PushPromise`].
#[must_use]
pub fn pushed_request(headers: &[(String, String)]) -> Option<Request> {
    let method = headers.iter().find(|(k, _)| k == ":method").map(|(_, v)| method_from_str(v))?;
    let scheme = headers.iter().find(|(k, _)| k == ":scheme").map(|(_, v)| v.as_str())?;
    let authority = headers.iter().find(|(k, _)| k == ":authority").map(|(_, v)| v.as_str())?;
    let path = headers.iter().find(|(k, _)| k == ":path").map(|(_, v)| v.as_str())?;
    let url = Url::parse(&format!("{scheme}://{authority}{path}")).ok()?;
    let rest: Vec<(String, String)> = headers
        .iter()
        .filter(|(k, _)| !k.starts_with(':'))
        .cloned()
        .collect();
    Some(Request::new(method, url, rest, Bytes::new()))
}
