//! Upgrade handshake parsing.
//!
//! A client connects to `/{route}/{client_id}` with a
//! `Sec-WebSocket-Protocol` header naming the OCPP sub-versions it speaks
//! and, unless disabled, a Basic Authorization header whose subject must
//! equal the client id from the path.

use axum::http::StatusCode;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ocppd_core::{ClientId, ProtocolVersion};

/// Why an upgrade request was refused before authentication ran.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpgradeError {
    /// The request path does not start with the configured route.
    #[error("request path does not match route /{0}")]
    RouteMismatch(String),

    /// The request path carries no client identity segment.
    #[error("request path carries no client identity")]
    MissingClientId,

    /// The `Sec-WebSocket-Protocol` header is absent.
    #[error("missing Sec-WebSocket-Protocol header")]
    MissingProtocolHeader,

    /// None of the offered subprotocols is supported.
    #[error("no mutually supported subprotocol")]
    NoProtocolOverlap,

    /// Basic credentials are required but absent.
    #[error("missing Basic Authorization header")]
    MissingCredentials,

    /// The Authorization header is present but not parseable.
    #[error("malformed Basic Authorization header")]
    InvalidCredentials,

    /// The credential subject does not match the path identity.
    #[error("credential subject does not match client identity")]
    SubjectMismatch,
}

impl UpgradeError {
    /// The HTTP status the refusal is answered with.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            UpgradeError::RouteMismatch(_)
            | UpgradeError::MissingClientId
            | UpgradeError::MissingProtocolHeader
            | UpgradeError::NoProtocolOverlap => StatusCode::BAD_REQUEST,
            UpgradeError::MissingCredentials
            | UpgradeError::InvalidCredentials
            | UpgradeError::SubjectMismatch => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Basic credentials carried on the upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// The subject (username); must equal the path client id.
    pub subject: String,
    /// The password, passed opaque to the authentication chain.
    pub password: String,
}

/// A parsed, structurally valid upgrade request.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Identity from the request path.
    pub client: ClientId,
    /// Supported subprotocols offered by the client, in its preference
    /// order, filtered to the server's supported set.
    pub protocols: Vec<ProtocolVersion>,
    /// Password from the Basic credentials, if any were supplied.
    pub password: Option<String>,
}

/// Extract the client identity from the request path.
///
/// The path must be `/{route}/{client_id}`; a trailing slash after the
/// identity is tolerated.
pub fn client_id_from_path(path: &str, route: &str) -> Result<ClientId, UpgradeError> {
    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    let Some(rest) = trimmed.strip_prefix(route) else {
        return Err(UpgradeError::RouteMismatch(route.to_owned()));
    };
    let Some(id) = rest.strip_prefix('/') else {
        // Path is exactly the route with no identity segment
        if rest.is_empty() {
            return Err(UpgradeError::MissingClientId);
        }
        return Err(UpgradeError::RouteMismatch(route.to_owned()));
    };
    if id.is_empty() || id.contains('/') {
        return Err(UpgradeError::MissingClientId);
    }
    Ok(ClientId::from(id))
}

/// Intersect the client's offered subprotocols with the supported set.
///
/// Unknown names are skipped; order follows the client's preference. An
/// empty intersection refuses the upgrade.
pub fn negotiate_protocols(
    header: Option<&str>,
    supported: &[ProtocolVersion],
) -> Result<Vec<ProtocolVersion>, UpgradeError> {
    let header = header.ok_or(UpgradeError::MissingProtocolHeader)?;

    let offered: Vec<ProtocolVersion> = header
        .split(',')
        .filter_map(|name| name.trim().parse().ok())
        .filter(|version| supported.contains(version))
        .collect();
    if offered.is_empty() {
        return Err(UpgradeError::NoProtocolOverlap);
    }
    Ok(offered)
}

/// Parse a Basic Authorization header, if present.
pub fn basic_credentials(header: Option<&str>) -> Result<Option<Credentials>, UpgradeError> {
    let Some(header) = header else {
        return Ok(None);
    };
    let encoded = header
        .strip_prefix("Basic ")
        .ok_or(UpgradeError::InvalidCredentials)?;
    let decoded = BASE64
        .decode(encoded.trim())
        .map_err(|_| UpgradeError::InvalidCredentials)?;
    let text = String::from_utf8(decoded).map_err(|_| UpgradeError::InvalidCredentials)?;
    let (subject, password) = text
        .split_once(':')
        .ok_or(UpgradeError::InvalidCredentials)?;
    Ok(Some(Credentials {
        subject: subject.to_owned(),
        password: password.to_owned(),
    }))
}

/// Validate a full upgrade request into a [`Handshake`].
pub fn parse_upgrade(
    path: &str,
    protocol_header: Option<&str>,
    authorization_header: Option<&str>,
    route: &str,
    supported: &[ProtocolVersion],
    require_basic_auth: bool,
) -> Result<Handshake, UpgradeError> {
    let client = client_id_from_path(path, route)?;
    let protocols = negotiate_protocols(protocol_header, supported)?;
    let credentials = basic_credentials(authorization_header)?;

    if require_basic_auth && credentials.is_none() {
        return Err(UpgradeError::MissingCredentials);
    }
    if let Some(credentials) = &credentials {
        if credentials.subject != client.as_str() {
            return Err(UpgradeError::SubjectMismatch);
        }
    }

    Ok(Handshake {
        client,
        protocols,
        password: credentials.map(|c| c.password),
    })
}
