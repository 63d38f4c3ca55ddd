//! Transport constants
//!
//! Header names and defaults shared by every layer.

// Primary-sync credential headers
pub const PRIMARY_TOKEN_HEADER: &str = "Jwttoken";
pub const PRIMARY_USER_ID_HEADER: &str = "userId";

// Identity-registry credential header (bearer scheme)
pub const IDENTITY_TOKEN_HEADER: &str = "Authorization";
pub const BEARER_PREFIX: &str = "Bearer ";

/// Marker header that exempts a request from credential injection.
/// Consumed by the transport, never sent.
pub const NO_AUTH_HEADER: &str = "No-Auth";

/// Correlation tag attached to every outbound request.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-Id";

pub const DEFAULT_CONTENT_TYPE: &str = "application/json";
pub const DEFAULT_REFRESH_PATH: &str = "/common-api/user/refreshToken";
pub const DEFAULT_USER_AGENT: &str = concat!("carelink/", env!("CARGO_PKG_VERSION"));

// Timeout profiles (seconds)
pub const PRIMARY_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const PRIMARY_READ_TIMEOUT_SECS: u64 = 120;
pub const PRIMARY_WRITE_TIMEOUT_SECS: u64 = 120;
pub const IDENTITY_TIMEOUT_SECS: u64 = 20;
pub const REFRESH_TIMEOUT_SECS: u64 = 30;

// Connection pool
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;
pub const DEFAULT_POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// Bodies longer than this are truncated in request logs.
pub const MAX_LOGGED_BODY_BYTES: usize = 4096;
