//! Authenticated transport
//!
//! [`TransportStack`] wires one [`TransportClient`] per backend. Requests
//! are described by [`OutboundRequest`], decorated by the backend's
//! [`DecoratorChain`] and answered with a buffered [`TransportResponse`].

pub mod client;
pub mod decorator;
pub mod logging;
pub mod refresher;
pub mod request;
pub mod response;
pub mod stack;

pub use client::TransportClient;
pub use decorator::{
    AnalyticsTagDecorator, ContentTypeDecorator, DecorationContext, DecoratorChain,
    IdentityCredentialDecorator, PrimaryCredentialDecorator, RequestDecorator,
};
pub use logging::{AttemptContext, RequestLogger};
pub use refresher::HttpTokenRefresher;
pub use request::OutboundRequest;
pub use response::TransportResponse;
pub use stack::{TransportStack, TransportStackBuilder};
