//! Newline-delimited framing for stream transports.
//!
//! Wraps `LinesCodec` so that a bad line costs only that line. Lines that are not UTF-8, or
//! that run past the length limit, come out as [`Frame::Malformed`] and the stream keeps going.
use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::connection::MAX_FRAME_LENGTH;

/// One inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Message(String),
    /// The line could not be read as text. Carries a short description.
    Malformed(String),
}

/// Line codec that reports bad lines as frames instead of failing the stream.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    lines: LinesCodec,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_FRAME_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }

    pub fn max_length(&self) -> usize {
        self.lines.max_length()
    }

    fn frame(
        &self,
        decoded: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Frame>, LinesCodecError> {
        match decoded {
            Ok(line) => Ok(line.map(Frame::Message)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Malformed(format!(
                "message exceeds {} bytes",
                self.max_length()
            )))),
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(Frame::Malformed(format!("message is not UTF-8: {}", e))))
            }
            Err(e) => Err(e),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        let decoded = self.lines.decode(buf);
        self.frame(decoded)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        let decoded = self.lines.decode_eof(buf);
        self.frame(decoded)
    }
}

impl Encoder<String> for FrameCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), LinesCodecError> {
        self.lines.encode(line, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    async fn frames(codec: FrameCodec, input: &'static [u8]) -> Vec<Frame> {
        FramedRead::new(input, codec)
            .map(|frame| frame.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_bad_lines_do_not_end_the_stream() {
        let frames = frames(FrameCodec::new(), b"one\r\n\xff\xfe\ntwo\nthree").await;
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0], Frame::Message("one".into()));
        assert!(matches!(frames[1], Frame::Malformed(_)));
        assert_eq!(frames[2], Frame::Message("two".into()));
        assert_eq!(frames[3], Frame::Message("three".into()));
    }

    #[tokio::test]
    async fn test_long_lines_are_skipped() {
        let input = b"short\nfar too long a line\nok\n";
        let frames = frames(FrameCodec::with_max_length(8), input).await;
        assert_eq!(
            frames,
            vec![
                Frame::Message("short".into()),
                Frame::Malformed("message exceeds 8 bytes".into()),
                Frame::Message("ok".into()),
            ]
        );
    }
}
