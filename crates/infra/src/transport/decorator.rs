//! Request decorator chain
//!
//! Decorators are pure transforms of an [`OutboundRequest`]. They read the
//! credential and session handed to them in a [`DecorationContext`] and never
//! touch the network or the credential store.
//!
//! Every backend runs the same fixed order:
//! content type → credential injection → analytics tag.

use carelink_domain::constants::{
    BEARER_PREFIX, CORRELATION_ID_HEADER, IDENTITY_TOKEN_HEADER, PRIMARY_TOKEN_HEADER,
    PRIMARY_USER_ID_HEADER,
};
use carelink_domain::{Backend, Credential, Result, Session, TransportError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use uuid::Uuid;

use super::request::OutboundRequest;

/// Everything a decorator may read.
#[derive(Debug, Clone, Copy)]
pub struct DecorationContext<'a> {
    pub backend: Backend,
    /// Content type the backend expects
    pub content_type: &'a str,
    pub credential: Option<&'a Credential>,
    pub session: Option<&'a Session>,
    /// Stable for every attempt of one exchange
    pub correlation_id: Uuid,
}

pub trait RequestDecorator: Send + Sync {
    fn name(&self) -> &'static str;

    /// # Errors
    /// Returns `TransportError::InvalidRequest` if a header cannot be encoded.
    fn decorate(
        &self,
        request: OutboundRequest,
        ctx: &DecorationContext<'_>,
    ) -> Result<OutboundRequest>;
}

/// Sets `Content-Type` to the backend's expected value.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentTypeDecorator;

impl RequestDecorator for ContentTypeDecorator {
    fn name(&self) -> &'static str {
        "content_type"
    }

    fn decorate(
        &self,
        mut request: OutboundRequest,
        ctx: &DecorationContext<'_>,
    ) -> Result<OutboundRequest> {
        let value = plain_value(ctx.content_type)?;
        request.headers_mut().insert(CONTENT_TYPE, value);
        Ok(request)
    }
}

/// Primary sync: `Jwttoken` plus `userId`.
///
/// The user id comes from the logged-in session, falling back to the user the
/// credential was issued for; the header is omitted when neither is known.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrimaryCredentialDecorator;

impl RequestDecorator for PrimaryCredentialDecorator {
    fn name(&self) -> &'static str {
        "primary_credential"
    }

    fn decorate(
        &self,
        mut request: OutboundRequest,
        ctx: &DecorationContext<'_>,
    ) -> Result<OutboundRequest> {
        if request.is_credential_exempt() {
            return Ok(request);
        }
        strip_credentials(request.headers_mut());

        let Some(credential) = ctx.credential else {
            return Ok(request);
        };

        let headers = request.headers_mut();
        headers.insert(header_name(PRIMARY_TOKEN_HEADER)?, secret_value(&credential.access_token)?);

        let user_id = ctx
            .session
            .map(|session| &session.user_id)
            .or(credential.issued_for.as_ref());
        if let Some(user_id) = user_id {
            headers.insert(header_name(PRIMARY_USER_ID_HEADER)?, plain_value(user_id.as_str())?);
        }
        Ok(request)
    }
}

/// Identity registry: `Authorization: Bearer <token>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCredentialDecorator;

impl RequestDecorator for IdentityCredentialDecorator {
    fn name(&self) -> &'static str {
        "identity_credential"
    }

    fn decorate(
        &self,
        mut request: OutboundRequest,
        ctx: &DecorationContext<'_>,
    ) -> Result<OutboundRequest> {
        if request.is_credential_exempt() {
            return Ok(request);
        }
        strip_credentials(request.headers_mut());

        if let Some(credential) = ctx.credential {
            let value = secret_value(&format!("{BEARER_PREFIX}{}", credential.access_token))?;
            request.headers_mut().insert(header_name(IDENTITY_TOKEN_HEADER)?, value);
        }
        Ok(request)
    }
}

/// Attaches the exchange's correlation id.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnalyticsTagDecorator;

impl RequestDecorator for AnalyticsTagDecorator {
    fn name(&self) -> &'static str {
        "analytics_tag"
    }

    fn decorate(
        &self,
        mut request: OutboundRequest,
        ctx: &DecorationContext<'_>,
    ) -> Result<OutboundRequest> {
        let value = plain_value(&ctx.correlation_id.to_string())?;
        request.headers_mut().insert(header_name(CORRELATION_ID_HEADER)?, value);
        Ok(request)
    }
}

/// Ordered decorators for one backend.
pub struct DecoratorChain {
    decorators: Vec<Box<dyn RequestDecorator>>,
}

impl DecoratorChain {
    pub fn for_backend(backend: Backend) -> Self {
        let mut decorators: Vec<Box<dyn RequestDecorator>> = Vec::with_capacity(3);
        decorators.push(Box::new(ContentTypeDecorator));
        match backend {
            Backend::PrimarySync => decorators.push(Box::new(PrimaryCredentialDecorator)),
            Backend::IdentityRegistry => decorators.push(Box::new(IdentityCredentialDecorator)),
        }
        decorators.push(Box::new(AnalyticsTagDecorator));
        Self { decorators }
    }

    /// Run every decorator in order.
    pub fn apply(
        &self,
        request: OutboundRequest,
        ctx: &DecorationContext<'_>,
    ) -> Result<OutboundRequest> {
        self.decorators
            .iter()
            .try_fold(request, |request, decorator| decorator.decorate(request, ctx))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.decorators.iter().map(|d| d.name()).collect()
    }
}

impl std::fmt::Debug for DecoratorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Whether `name` carries credential material on any backend.
pub(crate) fn is_credential_header(name: &HeaderName) -> bool {
    [PRIMARY_TOKEN_HEADER, IDENTITY_TOKEN_HEADER]
        .iter()
        .any(|candidate| name.as_str().eq_ignore_ascii_case(candidate))
}

/// Credentials of both backends are removed before injection, so a
/// decorated request never carries the other backend's headers. Exempt
/// requests are not decorated and keep whatever the caller set.
fn strip_credentials(headers: &mut HeaderMap) {
    for name in [PRIMARY_TOKEN_HEADER, PRIMARY_USER_ID_HEADER, IDENTITY_TOKEN_HEADER] {
        headers.remove(name);
    }
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| TransportError::InvalidRequest(format!("invalid header name '{name}': {e}")))
}

fn plain_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::InvalidRequest(format!("value not valid in a header: {e}")))
}

fn secret_value(value: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(value).map_err(|_| {
        TransportError::InvalidRequest("credential is not valid in a header".into())
    })?;
    value.set_sensitive(true);
    Ok(value)
}
