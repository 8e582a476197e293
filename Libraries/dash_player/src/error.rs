use shared_utils::ErrorKind;
use thiserror::Error;

pub type DashResult<T> = Result<T, DashError>;

/// Errors of a tiled DASH session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DashError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The request could not be sent.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Non-success status, empty or malformed payload.
    #[error("bad response: {0}")]
    BadResponse(String),
    #[error("session closed")]
    SessionClosed,
    #[error("aborted")]
    Aborted,
    #[error("stream drained")]
    StreamDrained,
}

/// The manifest could not be turned into a [`crate::mpd::Manifest`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("malformed manifest: {0}")]
    Xml(String),
    #[error("manifest is missing element <{0}>")]
    MissingElement(&'static str),
    #[error("<{element}> is missing attribute `{attribute}`")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
    #[error("invalid value {value:?} for `{attribute}`")]
    InvalidValue { attribute: &'static str, value: String },
    #[error("invalid tile layout: {0}")]
    Layout(String),
    #[error(transparent)]
    Duration(#[from] DurationParseError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("duration {0:?} does not match PT[nH][nM]n.nnnS")]
pub struct DurationParseError(pub String);

impl From<DurationParseError> for DashError {
    fn from(error: DurationParseError) -> Self {
        DashError::Parse(ParseError::Duration(error))
    }
}

impl From<quick_xml::Error> for ParseError {
    fn from(error: quick_xml::Error) -> Self {
        ParseError::Xml(error.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for ParseError {
    fn from(error: quick_xml::events::attributes::AttrError) -> Self {
        ParseError::Xml(error.to_string())
    }
}

impl DashError {
    pub fn bad_status(url: &str, status: u16) -> Self {
        DashError::BadResponse(format!("HTTP {status} for {url}"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DashError::Parse(_) => ErrorKind::Parse,
            DashError::BadRequest(_) => ErrorKind::BadRequest,
            DashError::BadResponse(_) => ErrorKind::BadResponse,
            DashError::SessionClosed => ErrorKind::SessionClosed,
            DashError::Aborted => ErrorKind::Aborted,
            DashError::StreamDrained => ErrorKind::StreamDrained,
        }
    }

    /// Errors that end one tile's stream without affecting the others.
    pub fn is_tile_local(&self) -> bool {
        matches!(
            self,
            DashError::BadRequest(_) | DashError::BadResponse(_) | DashError::Aborted
        )
    }

    /// A tile that hits this error has simply run out of segments.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, DashError::BadResponse(_))
    }
}
