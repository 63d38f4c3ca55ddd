//! Per-attempt request logging
//!
//! One structured line for the request and one for its outcome, at the
//! configured [`HttpLogLevel`]. Credential headers are always redacted and
//! bodies are truncated to [`MAX_LOGGED_BODY_BYTES`].

use std::fmt::Write as _;
use std::time::Duration;

use carelink_domain::constants::MAX_LOGGED_BODY_BYTES;
use carelink_domain::{Backend, HttpLogLevel, TransportError};
use reqwest::header::HeaderMap;
use reqwest::{Method, Request};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use super::decorator::is_credential_header;
use super::response::TransportResponse;

const REDACTED: &str = "<redacted>";

/// Identifies one attempt in log lines.
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext<'a> {
    pub backend: Backend,
    pub attempt: u8,
    pub correlation_id: Uuid,
    pub method: &'a Method,
    pub url: &'a Url,
}

#[derive(Debug, Clone, Copy)]
pub struct RequestLogger {
    level: HttpLogLevel,
}

impl RequestLogger {
    pub fn new(level: HttpLogLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> HttpLogLevel {
        self.level
    }

    pub fn log_request(&self, ctx: &AttemptContext<'_>, request: &Request) {
        if self.level == HttpLogLevel::None {
            return;
        }
        let headers = self.headers_field(request.headers());
        let body = self.body_field(request.body().and_then(reqwest::Body::as_bytes));
        info!(
            backend = %ctx.backend,
            method = %ctx.method,
            url = %ctx.url,
            attempt = ctx.attempt,
            correlation_id = %ctx.correlation_id,
            headers = headers.as_deref(),
            body = body.as_deref(),
            "--> HTTP request"
        );
    }

    pub fn log_response(
        &self,
        ctx: &AttemptContext<'_>,
        response: &TransportResponse,
        elapsed: Duration,
    ) {
        if self.level == HttpLogLevel::None {
            return;
        }
        let headers = self.headers_field(response.headers());
        let body = self.body_field(Some(response.body()));
        info!(
            backend = %ctx.backend,
            method = %ctx.method,
            url = %ctx.url,
            attempt = ctx.attempt,
            correlation_id = %ctx.correlation_id,
            status = response.status(),
            elapsed_ms = elapsed_ms(elapsed),
            headers = headers.as_deref(),
            body = body.as_deref(),
            "<-- HTTP response"
        );
    }

    pub fn log_failure(&self, ctx: &AttemptContext<'_>, error: &TransportError, elapsed: Duration) {
        if self.level == HttpLogLevel::None {
            return;
        }
        warn!(
            backend = %ctx.backend,
            method = %ctx.method,
            url = %ctx.url,
            attempt = ctx.attempt,
            correlation_id = %ctx.correlation_id,
            elapsed_ms = elapsed_ms(elapsed),
            error = %error,
            "<-- HTTP failed"
        );
    }

    fn headers_field(&self, headers: &HeaderMap) -> Option<String> {
        (self.level >= HttpLogLevel::Headers).then(|| render_headers(headers))
    }

    fn body_field(&self, body: Option<&[u8]>) -> Option<String> {
        if self.level < HttpLogLevel::Body {
            return None;
        }
        body.filter(|bytes| !bytes.is_empty()).map(render_body)
    }
}

fn render_headers(headers: &HeaderMap) -> String {
    let mut rendered = String::new();
    for (name, value) in headers {
        if !rendered.is_empty() {
            rendered.push_str("; ");
        }
        let value = if is_credential_header(name) || value.is_sensitive() {
            REDACTED
        } else {
            value.to_str().unwrap_or("<binary>")
        };
        let _ = write!(rendered, "{name}: {value}");
    }
    rendered
}

fn render_body(body: &[u8]) -> String {
    if body.len() <= MAX_LOGGED_BODY_BYTES {
        return String::from_utf8_lossy(body).into_owned();
    }
    let mut rendered = String::from_utf8_lossy(&body[..MAX_LOGGED_BODY_BYTES]).into_owned();
    let _ = write!(rendered, "... ({} bytes truncated)", body.len() - MAX_LOGGED_BODY_BYTES);
    rendered
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderName, HeaderValue};

    use super::*;

    #[test]
    fn credential_headers_are_redacted() {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("jwttoken"), HeaderValue::from_static("T1"));
        headers.insert(
            HeaderName::from_static("authorization"),
            HeaderValue::from_static("Bearer abha"),
        );
        headers.insert(HeaderName::from_static("userid"), HeaderValue::from_static("42"));

        let rendered = render_headers(&headers);

        assert!(!rendered.contains("T1"));
        assert!(!rendered.contains("abha"));
        assert!(rendered.contains("userid: 42"));
        assert_eq!(rendered.matches(REDACTED).count(), 2);
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = vec![b'a'; MAX_LOGGED_BODY_BYTES + 10];
        let rendered = render_body(&body);

        assert!(rendered.ends_with("... (10 bytes truncated)"));
        assert!(rendered.len() < body.len() + 30);
    }

    #[test]
    fn fields_follow_the_level() {
        let headers = HeaderMap::new();

        assert!(RequestLogger::new(HttpLogLevel::Basic).headers_field(&headers).is_none());
        assert!(RequestLogger::new(HttpLogLevel::Headers).headers_field(&headers).is_some());
        assert!(RequestLogger::new(HttpLogLevel::Headers).body_field(Some(b"{}")).is_none());
        assert_eq!(
            RequestLogger::new(HttpLogLevel::Body).body_field(Some(b"{}")).as_deref(),
            Some("{}")
        );
    }
}
