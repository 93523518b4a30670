use quick_xml::Error as XMLError;
use std::path::PathBuf;
use std::{str::Utf8Error, string::FromUtf8Error};

/// Wrapper around `std::Result`
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// [`std::io`] related error.
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    /// Decoding related error.
    /// Maybe the XML declaration has an encoding value that it doesn't recognize,
    /// or it doesn't match its actual encoding,
    #[error("Cannot decode XML")]
    CannotDecode,
    /// The declared encoding label is not known to `encoding_rs`.
    #[error("Unsupported encoding '{0}'")]
    UnsupportedEncoding(String),
    /// Assorted errors while parsing XML.
    #[error("Malformed XML: {0}")]
    MalformedXML(String),
    /// The container element cannot have a parent.
    /// Use `element.is_container()` to check if it is a container before
    /// assigning it to another parent.
    #[error("Container element cannot move")]
    ContainerCannotMove,
    /// An element can only be attached to one parent.
    #[error("Element already has a parent")]
    HasAParent,
    /// Building or evaluating an XPath expression failed.
    #[error("{0}")]
    XPath(String),
    /// A rule was created with an empty match pattern.
    #[error("Rule pattern must not be empty")]
    EmptyPattern,
    /// Rule preset could not be read or written.
    #[error("Invalid preset: {0}")]
    Preset(#[from] serde_json::Error),
    /// Zip error while reading or writing a single entry.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// The input archive could not be opened.
    #[error("Cannot open input archive {}: {source}", path.display())]
    InputArchive {
        path: PathBuf,
        source: zip::result::ZipError,
    },
    /// The output archive could not be created or finalized.
    #[error("Cannot write output archive {}: {source}", path.display())]
    OutputArchive {
        path: PathBuf,
        source: zip::result::ZipError,
    },
    /// A later central directory record reuses the entry's name, and the
    /// zip reader only exposes one record per name.
    #[error("Duplicate entry name '{0}', only one record per name can be read")]
    DuplicateEntry(String),
    /// The run was stopped through its [`CancelToken`](crate::CancelToken).
    #[error("Run cancelled")]
    Cancelled,
}

impl From<XMLError> for Error {
    fn from(err: XMLError) -> Error {
        match err {
            XMLError::EndEventMismatch { expected, found } => Error::MalformedXML(format!(
                "Closing tag mismatch. Expected {}, found {}",
                expected, found,
            )),
            XMLError::Io(err) => Error::Io(err),
            XMLError::Utf8(_) => Error::CannotDecode,
            err => Error::MalformedXML(err.to_string()),
        }
    }
}

impl From<FromUtf8Error> for Error {
    fn from(_: FromUtf8Error) -> Error {
        Error::CannotDecode
    }
}

impl From<Utf8Error> for Error {
    fn from(_: Utf8Error) -> Error {
        Error::CannotDecode
    }
}
