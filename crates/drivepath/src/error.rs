use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// A name query matched more than one object in the given scope.
    AmbiguousName {
        name: String,
        parent: Option<String>,
        matches: usize,
    },
    /// A path could not be walked far enough to anchor the operation.
    PathResolution { path: String, reason: String },
    InvalidPath(String),
    InvalidReference(String),
    /// Non-success status returned by the remote service.
    Remote { status: u16, body: String },
    Http(reqwest::Error),
    Io(std::io::Error),
    Msg(String),
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::Msg(msg.into())
    }

    pub fn path_resolution(path: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::PathResolution {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::AmbiguousName { .. })
    }

    pub fn is_path_resolution(&self) -> bool {
        matches!(self, Self::PathResolution { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AmbiguousName {
                name,
                parent: Some(parent),
                matches,
            } => write!(
                f,
                "multiple '{name}' files found in '{parent}' ({matches} matches)"
            ),
            Self::AmbiguousName {
                name,
                parent: None,
                matches,
            } => write!(f, "multiple '{name}' files found ({matches} matches)"),
            Self::PathResolution { path, reason } => {
                write!(f, "cannot resolve remote path '{path}': {reason}")
            }
            Self::InvalidPath(p) => write!(f, "invalid remote path '{p}'"),
            Self::InvalidReference(r) => write!(f, "invalid remote reference '{r}'"),
            Self::Remote { status, body } if body.is_empty() => {
                write!(f, "remote request failed with status {status}")
            }
            Self::Remote { status, body } => {
                write!(f, "remote request failed with status {status}: {body}")
            }
            Self::Http(e) => write!(f, "HTTP request failed: {e}"),
            Self::Io(e) => write!(f, "{e}"),
            Self::Msg(m) => write!(f, "{m}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
