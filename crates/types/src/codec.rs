//! Encoding of stored records.
//!
//! Every typed record written to either store, and every sync token payload,
//! goes through [`encode`] and [`decode`]. The bytes are one format byte
//! followed by the postcard encoding of the value. A reader that meets a
//! format it does not know fails instead of misreading fields written by a
//! newer schema.

use serde::{Serialize, de::DeserializeOwned};
use snafu::{OptionExt, ResultExt, Snafu, ensure};

/// Format byte written in front of every encoded value.
pub const RECORD_FORMAT: u8 = 1;

/// Error type for codec operations.
#[derive(Debug, Snafu)]
pub enum CodecError {
    /// Encoding failed.
    #[snafu(display("Encoding failed: {source}"))]
    Encode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// Decoding failed.
    #[snafu(display("Decoding failed: {source}"))]
    Decode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// The input was empty.
    #[snafu(display("Decoding failed: no format byte"))]
    Empty,

    /// The value was written in a format this build does not read.
    #[snafu(display("Unsupported record format {format}, expected {RECORD_FORMAT}"))]
    UnsupportedFormat {
        /// The format byte found.
        format: u8,
    },
}

/// Encodes a value behind the current format byte.
///
/// # Errors
///
/// Returns `CodecError::Encode` if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_extend(value, vec![RECORD_FORMAT]).context(EncodeSnafu)
}

/// Decodes a value written by [`encode`].
///
/// # Errors
///
/// Returns `CodecError::Empty` or `CodecError::UnsupportedFormat` if the
/// format byte is missing or unknown, and `CodecError::Decode` if the rest is
/// not a valid encoding of `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let (&format, body) = bytes.split_first().context(EmptySnafu)?;
    ensure!(format == RECORD_FORMAT, UnsupportedFormatSnafu { format });
    postcard::from_bytes(body).context(DecodeSnafu)
}
