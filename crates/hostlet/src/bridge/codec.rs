//! Framed codec for the controller pipe.
//!
//! Every command is an 8-byte ASCII decimal length header (left-justified,
//! space padded) followed by the body: one command-code byte, a NUL, then
//! each field terminated by a NUL. The header counts only the body.
//!
//! Two commands end in a raw byte tail that may itself contain NUL bytes
//! (`UrlData`, `PutData`). The decoder takes the number of delimited fields
//! before the tail from [`raw_tail_fields`] and hands the rest, minus the
//! final terminator, back as one field.

use std::io;

use tokio_util::bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::protocol::raw_tail_fields;

/// Width of the ASCII length header.
pub const LENGTH_HEADER_LEN: usize = 8;

/// Largest body an 8-digit header can describe.
pub const DEFAULT_MAX_FRAME_LEN: usize = 99_999_999;

/// Default upper bound on the number of fields in one frame.
pub const DEFAULT_MAX_FIELDS: usize = 4096;

const SEPARATOR: u8 = 0;

/// One undecoded wire command: the code byte and its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: u8,
    pub fields: Vec<Bytes>,
}

impl Frame {
    pub fn new(code: u8) -> Self {
        Self {
            code,
            fields: Vec::new(),
        }
    }

    /// Append a field.
    pub fn field(mut self, value: impl Into<Bytes>) -> Self {
        self.fields.push(value.into());
        self
    }

    /// Append a field from anything displayable (ids, numbers, codes).
    pub fn display_field(self, value: impl std::fmt::Display) -> Self {
        self.field(value.to_string())
    }

    pub fn fields<I, B>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        self.fields.extend(values.into_iter().map(Into::into));
        self
    }

    /// Size of the encoded body (everything after the header).
    pub fn body_len(&self) -> usize {
        2 + self.fields.iter().map(|f| f.len() + 1).sum::<usize>()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid length header {header:?}")]
    InvalidLength { header: String },

    #[error("frame declared an empty body")]
    EmptyFrame,

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("command {code} is missing the separator after its code byte")]
    MissingSeparator { code: u8 },

    #[error("command {code} has an unterminated field")]
    UnterminatedField { code: u8 },

    #[error("command {code} carries {count} fields, limit is {max}")]
    TooManyFields { code: u8, count: usize, max: usize },

    #[error("field {index} of command {code} contains a NUL separator")]
    EmbeddedSeparator { code: u8, index: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Length-header plus NUL-delimited field codec.
///
/// Works over any AsyncRead/AsyncWrite through `FramedRead`/`FramedWrite`.
/// `decode` returns `Ok(None)` until the whole declared body has arrived, so
/// a frame split across any number of reads still decodes as one command.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_len: usize,
    max_fields: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_fields: DEFAULT_MAX_FIELDS,
        }
    }

    pub fn with_limits(max_frame_len: usize, max_fields: usize) -> Self {
        Self {
            max_frame_len: max_frame_len.min(DEFAULT_MAX_FRAME_LEN),
            max_fields,
        }
    }

    fn parse_body(&self, body: Bytes) -> Result<Frame, FrameError> {
        let Some(&code) = body.first() else {
            return Err(FrameError::EmptyFrame);
        };
        let mut frame = Frame::new(code);
        if body.len() == 1 {
            return Ok(frame);
        }
        if body[1] != SEPARATOR {
            return Err(FrameError::MissingSeparator { code });
        }

        let tail_after = raw_tail_fields(code);
        let mut rest = body.slice(2..);
        while !rest.is_empty() {
            if frame.fields.len() >= self.max_fields {
                return Err(FrameError::TooManyFields {
                    code,
                    count: frame.fields.len() + 1,
                    max: self.max_fields,
                });
            }
            if tail_after == Some(frame.fields.len()) {
                // Raw tail: everything up to the final terminator.
                if rest[rest.len() - 1] != SEPARATOR {
                    return Err(FrameError::UnterminatedField { code });
                }
                frame.fields.push(rest.slice(..rest.len() - 1));
                break;
            }
            match rest.iter().position(|&b| b == SEPARATOR) {
                Some(end) => {
                    frame.fields.push(rest.slice(..end));
                    rest.advance(end + 1);
                }
                None => return Err(FrameError::UnterminatedField { code }),
            }
        }
        Ok(frame)
    }
}

fn parse_length(header: &[u8]) -> Result<usize, FrameError> {
    let invalid = || FrameError::InvalidLength {
        header: String::from_utf8_lossy(header).into_owned(),
    };
    let text = std::str::from_utf8(header).map_err(|_| invalid())?;
    let digits = text.trim_matches(' ');
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    digits.parse().map_err(|_| invalid())
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_HEADER_LEN {
            src.reserve(LENGTH_HEADER_LEN - src.len());
            return Ok(None);
        }

        let len = parse_length(&src[..LENGTH_HEADER_LEN])?;
        if len == 0 {
            return Err(FrameError::EmptyFrame);
        }
        if len > self.max_frame_len {
            return Err(FrameError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        let total = LENGTH_HEADER_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_HEADER_LEN);
        let body = src.split_to(len).freeze();
        tracing::trace!(frame_len = len, code = body[0], "Decoding frame");
        self.parse_body(body).map(Some)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let tail_at = raw_tail_fields(item.code);
        if let Some(index) = item
            .fields
            .iter()
            .enumerate()
            .position(|(i, f)| tail_at != Some(i) && f.contains(&SEPARATOR))
        {
            return Err(FrameError::EmbeddedSeparator {
                code: item.code,
                index,
            });
        }
        if item.fields.len() > self.max_fields {
            return Err(FrameError::TooManyFields {
                code: item.code,
                count: item.fields.len(),
                max: self.max_fields,
            });
        }

        let len = item.body_len();
        if len > self.max_frame_len {
            return Err(FrameError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        tracing::trace!(frame_len = len, code = item.code, "Encoding frame");
        if len > 1_000_000 {
            tracing::info!(
                frame_len = len,
                frame_len_kb = len / 1024,
                code = item.code,
                "Large frame being encoded"
            );
        }

        dst.reserve(LENGTH_HEADER_LEN + len);
        dst.put_slice(format!("{len:<width$}", width = LENGTH_HEADER_LEN).as_bytes());
        dst.put_u8(item.code);
        dst.put_u8(SEPARATOR);
        for field in &item.fields {
            dst.put_slice(field);
            dst.put_u8(SEPARATOR);
        }
        Ok(())
    }
}
