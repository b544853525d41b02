//! Inbound line framing.
//!
//! Wraps [`LinesCodec`] so that a malformed line is an item rather than a
//! stream error: lines already buffered behind a bad one are decoded
//! without waiting for more bytes from the socket.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

/// One inbound line, or the reason it was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Inbound {
    Line(String),
    /// Longer than the configured maximum; discarded up to the next terminator.
    Oversized,
    /// Not valid UTF-8.
    NotUtf8,
}

#[derive(Debug)]
pub(crate) struct InboundLines {
    lines: LinesCodec,
}

impl InboundLines {
    pub(crate) fn new(max_line_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_line_length),
        }
    }

    fn classify(result: Result<Option<String>, LinesCodecError>) -> io::Result<Option<Inbound>> {
        match result {
            Ok(line) => Ok(line.map(Inbound::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Inbound::Oversized)),
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(Inbound::NotUtf8))
            }
            Err(LinesCodecError::Io(e)) => Err(e),
        }
    }
}

impl Decoder for InboundLines {
    type Item = Inbound;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Inbound>> {
        Self::classify(self.lines.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<Inbound>> {
        Self::classify(self.lines.decode_eof(buf))
    }
}
