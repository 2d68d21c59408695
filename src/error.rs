use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// A required call argument was missing or empty. Raised before any network I/O.
    MissingParam(String),
    InvalidAccount(String),
    RegionNotFound(String),
    Auth(String),
    TokenRefresh(String),
    /// Well-formed envelope whose `result` flag is not `true`.
    Api {
        description: String,
        method: String,
        path: String,
        status: u16,
    },
    /// Non-success HTTP status or a body that is not JSON.
    Transport {
        description: String,
        method: String,
        path: String,
        status: u16,
    },
    Http(reqwest::Error),
    Json(serde_json::Error),
    Header(reqwest::header::InvalidHeaderValue),
}

impl Error {
    /// Human-readable description without the request context.
    pub fn description(&self) -> String {
        match self {
            Error::Api { description, .. } | Error::Transport { description, .. } => {
                description.clone()
            }
            Error::MissingParam(msg)
            | Error::InvalidAccount(msg)
            | Error::RegionNotFound(msg)
            | Error::Auth(msg)
            | Error::TokenRefresh(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// HTTP status carried by envelope errors, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } | Error::Transport { status, .. } => Some(*status),
            Error::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_parameter_error(&self) -> bool {
        matches!(
            self,
            Error::MissingParam(_) | Error::InvalidAccount(_) | Error::RegionNotFound(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MissingParam(msg) => write!(f, "Missing parameter: {}", msg),
            Error::InvalidAccount(msg) => write!(f, "Invalid account number: {}", msg),
            Error::RegionNotFound(msg) => write!(f, "Region not found: {}", msg),
            Error::Auth(msg) => write!(f, "Authentication error: {}", msg),
            Error::TokenRefresh(msg) => write!(f, "Token refresh error: {}", msg),
            Error::Api {
                description,
                method,
                path,
                status,
            } => write!(
                f,
                "API error: {} ({} {}, status {})",
                description, method, path, status
            ),
            Error::Transport {
                description,
                method,
                path,
                status,
            } => write!(
                f,
                "HTTP error: {} ({} {}, status {})",
                description, method, path, status
            ),
            Error::Http(err) => write!(f, "HTTP error: {}", err),
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
            Error::Header(err) => write!(f, "Invalid header value: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Header(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<reqwest::header::InvalidHeaderValue> for Error {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        Error::Header(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
