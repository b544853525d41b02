//! # infinitetcp Wire Format
//!
//! Line codec abstraction for infinitetcp. Every application object travels
//! as exactly one line of text; the transport appends and strips the `\n`
//! terminator, so an encoded record must never contain one itself. A `\r`
//! is treated as a terminator too (a trailing one is stripped on receipt),
//! and blank lines are skipped by the receiver, so neither is a valid record.
//!
//! ## Usage
//!
//! ```rust
//! use infinitetcp_wire::{Codec, JsonCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Chat {
//!     from: String,
//!     body: String,
//! }
//!
//! let codec = JsonCodec::new();
//! let msg = Chat { from: "ada".into(), body: "hello\nworld".into() };
//!
//! let line = codec.encode(&msg).unwrap();
//! assert!(!line.contains('\n'));
//!
//! let decoded: Chat = codec.decode(&line).unwrap();
//! assert_eq!(decoded, msg);
//! ```
//!
//! ## Implementors
//!
//! - [`JsonCodec`] - compact JSON via serde_json (default)
//! - [`TextCodec`] - raw `String` records, passed through unchanged

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::fmt;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// The record terminator used on the wire.
pub const LINE_TERMINATOR: char = '\n';

/// Wire format codec error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    /// The value could not be encoded.
    #[error("encode: {0}")]
    Encode(String),

    /// The line could not be turned back into a value.
    #[error("decode: {0}")]
    Decode(String),

    /// An encoded record contained `\n` or `\r` and would not arrive intact.
    #[error("encoded record contains a line terminator at byte {position}")]
    EmbeddedNewline {
        /// Byte offset of the first terminator
        position: usize,
    },

    /// An encoded record was empty or whitespace only; receivers skip such lines.
    #[error("encoded record is blank")]
    BlankRecord,
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Line codec trait
///
/// Converts one application object to and from one line of text. The
/// returned line must not contain [`LINE_TERMINATOR`]; [`ensure_single_line`]
/// is the check the transport applies before writing.
///
/// Codecs are shared between the accept loop, every receive loop and any
/// sender, hence the `Send + Sync` bounds.
pub trait Codec<T>: Send + Sync + 'static {
    /// Encode a value to a single line (without terminator)
    fn encode(&self, value: &T) -> CodecResult<String>;

    /// Decode a single line (terminator already stripped) to a value
    fn decode(&self, line: &str) -> CodecResult<T>;

    /// Get codec name for debugging
    fn name(&self) -> &'static str;
}

/// Reject an encoded record that would not survive newline framing.
///
/// A record must be non-blank and free of `\n` and `\r`.
pub fn ensure_single_line(line: &str) -> CodecResult<()> {
    if let Some(position) = line.find([LINE_TERMINATOR, '\r']) {
        return Err(CodecError::EmbeddedNewline { position });
    }
    if line.trim().is_empty() {
        return Err(CodecError::BlankRecord);
    }
    Ok(())
}

/// JSON codec using serde_json
///
/// Always produces compact output: serde_json escapes control characters
/// inside strings, so a compact document never contains a raw newline.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Create a new JSON codec
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec")
            .field("item", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn encode(&self, value: &T) -> CodecResult<String> {
        serde_json::to_string(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, line: &str) -> CodecResult<T> {
        serde_json::from_str(line).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Plain text codec
///
/// Records are `String`s sent as-is. Encoding a string the receiver would
/// split, alter or skip (a `\n` or `\r` anywhere, or nothing but whitespace)
/// fails instead of being sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl TextCodec {
    /// Create a new text codec
    pub fn new() -> Self {
        Self
    }
}

impl Codec<String> for TextCodec {
    fn encode(&self, value: &String) -> CodecResult<String> {
        ensure_single_line(value)?;
        Ok(value.clone())
    }

    fn decode(&self, line: &str) -> CodecResult<String> {
        Ok(line.to_owned())
    }

    fn name(&self) -> &'static str {
        "text"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestMessage {
        id: u32,
        method: String,
        params: Option<serde_json::Value>,
    }

    #[test]
    fn test_json_codec_roundtrip() {
        let codec = JsonCodec::new();
        let msg = TestMessage {
            id: 42,
            method: "test/method".into(),
            params: Some(serde_json::json!({"key": "value"})),
        };

        let encoded = codec.encode(&msg).unwrap();
        let decoded: TestMessage = codec.decode(&encoded).unwrap();

        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_json_codec_escapes_newlines() {
        let codec = JsonCodec::new();
        let msg = TestMessage {
            id: 1,
            method: "multi\nline\r\ntext".into(),
            params: None,
        };

        let encoded = codec.encode(&msg).unwrap();
        assert!(ensure_single_line(&encoded).is_ok());
        assert_eq!(codec.decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_json_codec_decode_error() {
        let codec = JsonCodec::<TestMessage>::new();
        let err = codec.decode("invalid json").unwrap_err();

        assert!(matches!(err, CodecError::Decode(_)));
        assert!(err.to_string().starts_with("decode:"));
    }

    #[test]
    fn test_text_codec_rejects_newline() {
        let codec = TextCodec::new();
        let err = codec.encode(&"two\nlines".to_string()).unwrap_err();
        assert_eq!(err, CodecError::EmbeddedNewline { position: 3 });

        assert_eq!(codec.encode(&"one line".to_string()).unwrap(), "one line");
        assert_eq!(codec.encode(&"  padded ".to_string()).unwrap(), "  padded ");
        assert_eq!(codec.decode("  padded ").unwrap(), "  padded ");
    }

    #[test]
    fn test_text_codec_rejects_records_receivers_would_alter() {
        let codec = TextCodec::new();
        assert_eq!(
            codec.encode(&"abc\r".to_string()).unwrap_err(),
            CodecError::EmbeddedNewline { position: 3 }
        );
        assert_eq!(
            codec.encode(&"a\rb".to_string()).unwrap_err(),
            CodecError::EmbeddedNewline { position: 1 }
        );
        assert_eq!(codec.encode(&String::new()).unwrap_err(), CodecError::BlankRecord);
        assert_eq!(codec.encode(&" \t ".to_string()).unwrap_err(), CodecError::BlankRecord);
    }

    #[test]
    fn test_codec_names() {
        assert_eq!(Codec::<TestMessage>::name(&JsonCodec::new()), "json");
        assert_eq!(TextCodec.name(), "text");
    }
}
