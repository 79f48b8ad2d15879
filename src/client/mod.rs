//! Typed client for the backend plus an explicit mirror of the state a
//! front end keeps: the signed-in user, the user's projects and the project
//! currently open for editing.

mod api;
mod subscription;
mod workspace;

pub use api::*;
pub use subscription::*;
pub use workspace::*;

use std::fmt;

/// Errors surfaced by the client.
#[derive(Debug)]
pub enum ClientError {
    /// Transport failure talking to the backend
    Http(reqwest::Error),
    /// The backend answered with an error envelope
    Api {
        status: u16,
        code: String,
        message: String,
    },
    /// The response could not be decoded
    Decode(String),
    /// Required inputs were not supplied
    MissingParams(Vec<&'static str>),
    /// An operation that needs a session was called while signed out
    NotSignedIn,
    /// An operation that needs an open project was called without one
    NoCurrentProject,
    /// The live subscription has stopped publishing
    SubscriptionClosed,
}

impl ClientError {
    /// HTTP status of an API error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Http(e) => write!(f, "HTTP error: {}", e),
            ClientError::Api {
                status,
                code,
                message,
            } => write!(f, "{} ({}): {}", code, status, message),
            ClientError::Decode(msg) => write!(f, "Invalid response: {}", msg),
            ClientError::MissingParams(names) => {
                write!(f, "The following params are missing: {}", names.join(", "))
            }
            ClientError::NotSignedIn => write!(f, "No user is signed in"),
            ClientError::NoCurrentProject => write!(f, "No project is open"),
            ClientError::SubscriptionClosed => write!(f, "Project subscription closed"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Http(err)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}
