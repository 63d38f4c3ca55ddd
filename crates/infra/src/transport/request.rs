//! Outbound request description
//!
//! An [`OutboundRequest`] is backend-agnostic: a method, a path relative to
//! the backend's base URL, query pairs, headers and an optional buffered
//! body. Buffering the body lets the same request be decorated and sent a
//! second time after a credential refresh.

use carelink_domain::constants::NO_AUTH_HEADER;
use carelink_domain::{Result, TransportError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::Serialize;
use url::Url;

use crate::errors::InfraError;

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    credential_exempt: bool,
}

impl OutboundRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            credential_exempt: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header. A `No-Auth` header (any case, any value) marks the
    /// request credential-exempt instead of being added.
    ///
    /// # Errors
    /// Returns `TransportError::InvalidRequest` for an invalid name or value.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        if name.eq_ignore_ascii_case(NO_AUTH_HEADER) {
            self.credential_exempt = true;
            return Ok(self);
        }
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("invalid header name: {e}")))?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            TransportError::InvalidRequest(format!("invalid value for header {name}: {e}"))
        })?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Raw body. The backend's content type is applied at send time unless
    /// a decorator is told otherwise.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body.
    ///
    /// # Errors
    /// Returns `TransportError::Protocol` if serialization fails.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value).map_err(InfraError::from)?;
        self.body = Some(body);
        Ok(self)
    }

    /// Send without injected credential headers, whatever the store holds.
    /// Headers set by the caller are sent as given.
    #[must_use]
    pub fn credential_exempt(mut self) -> Self {
        self.credential_exempt = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path without query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn is_credential_exempt(&self) -> bool {
        self.credential_exempt
    }

    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.headers.get(CONTENT_TYPE)
    }

    /// Fold a `No-Auth` header set through [`headers_mut`](Self::headers_mut)
    /// into the exemption flag. The marker never reaches the network.
    #[must_use]
    pub(crate) fn consume_exemption_marker(mut self) -> Self {
        if self.headers.remove(NO_AUTH_HEADER).is_some() {
            self.credential_exempt = true;
        }
        self
    }

    /// Absolute URL against `base`. The base path is kept, so
    /// `https://host/api` + `/users` gives `https://host/api/users`.
    ///
    /// # Errors
    /// Returns `TransportError::InvalidRequest` if the result does not parse.
    pub fn url(&self, base: &Url) -> Result<Url> {
        let joined = format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            self.path.trim_start_matches('/')
        );
        let mut url = Url::parse(&joined).map_err(|e| {
            TransportError::InvalidRequest(format!("invalid request path '{}': {e}", self.path))
        })?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        Ok(url)
    }
}
