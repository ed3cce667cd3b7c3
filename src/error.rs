use std::fmt::Display;

/// kilndb errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The key is empty.
    EmptyKey,
    /// The key exceeds the configured maximum length.
    KeyTooLarge,
    /// The value exceeds the configured maximum length.
    ValueTooLarge,
    /// The key does not exist. Distinct from a key holding an empty value.
    KeyNotFound,
    /// The key's expiration deadline has passed.
    KeyExpired,
    /// Expire was called with a zero duration.
    InvalidTtl,
    /// A record header could not be decoded.
    InvalidEntry,
    /// A record's checksum did not match its payload.
    InvalidCrc,
    /// An entry with an empty key was handed to the encoder.
    EmptyEntry,
    /// Reserved: an extra payload embedded the legacy separator.
    ExtraContainsSeparator,
    /// Reopen was called on a directory with no persisted config.
    CfgNotFound,
    /// Reclaim was requested below the archived-segment threshold.
    ReclaimUnreached,
    /// A command had the wrong shape (wire boundary only).
    Syntax,
    /// Invalid data, typically corruption or unexpected internal values.
    InvalidData(String),
    /// An IO error.
    Io(String),
    /// End of a segment. Internal replay/scan terminator, never user-facing.
    Eof,
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::EmptyKey => write!(f, "the key is empty"),
            Error::KeyTooLarge => write!(f, "key exceeded the max length"),
            Error::ValueTooLarge => write!(f, "value exceeded the max length"),
            Error::KeyNotFound => write!(f, "key not found"),
            Error::KeyExpired => write!(f, "key is expired"),
            Error::InvalidTtl => write!(f, "invalid ttl"),
            Error::InvalidEntry => write!(f, "invalid entry"),
            Error::InvalidCrc => write!(f, "invalid crc"),
            Error::EmptyEntry => write!(f, "entry or the key of entry is empty"),
            Error::ExtraContainsSeparator => write!(f, "extra contains separator"),
            Error::CfgNotFound => write!(f, "the config file does not exist"),
            Error::ReclaimUnreached => {
                write!(f, "archived segments have not reached the reclaim threshold")
            }
            Error::Syntax => write!(f, "incorrect number of arguments"),
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::Eof => write!(f, "end of segment"),
        }
    }
}

/// Constructs an Error::InvalidData for the given format string.
#[macro_export]
macro_rules! errdata {
    ($($args:tt)*) => { $crate::error::Error::InvalidData(format!($($args)*)) };
}

/// A kilndb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}
