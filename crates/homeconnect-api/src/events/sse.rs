// Server-sent events framing.
//
// Lines are `field: value`, a blank line ends a frame and a line starting
// with `:` is a comment. Anything else (notably a line with no colon) is
// treated as corruption: the recent lines are logged and the stream ends
// with an error so the caller reconnects from a clean state.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tracing::{trace, warn};

use crate::error::Error;

/// One complete event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub event: Option<String>,
    /// `data` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Line<'a> {
    Blank,
    Comment,
    Field { name: &'a str, value: &'a str },
}

pub(crate) fn parse_line(line: &str) -> Result<Line<'_>, Error> {
    if line.is_empty() {
        return Ok(Line::Blank);
    }
    if line.starts_with(':') {
        return Ok(Line::Comment);
    }
    let Some((name, value)) = line.split_once(':') else {
        return Err(Error::StreamProtocol(format!("malformed line: {line:?}")));
    };
    // A single space after the colon is part of the framing.
    let value = value.strip_prefix(' ').unwrap_or(value);
    Ok(Line::Field { name, value })
}

/// Accumulates fields until a blank line.
#[derive(Debug, Default)]
pub(crate) struct FrameBuilder {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl FrameBuilder {
    pub fn field(&mut self, name: &str, value: &str) {
        match name {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            "id" => self.id = Some(value.to_owned()),
            // `retry` and extensions are not used by the vendor.
            other => trace!(field = other, "ignoring SSE field"),
        }
    }

    /// The frame, unless nothing was accumulated.
    pub fn finish(&mut self) -> Option<Frame> {
        let builder = std::mem::take(self);
        if builder.event.is_none() && builder.data.is_empty() && builder.id.is_none() {
            return None;
        }
        Some(Frame {
            event: builder.event,
            data: builder.data.join("\n"),
            id: builder.id,
        })
    }
}

/// Splits a byte stream into lines, accepting `\n` and `\r\n`.
#[derive(Debug, Default)]
pub(crate) struct LineDecoder {
    buf: BytesMut,
}

impl LineDecoder {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn next_line(&mut self) -> Option<Result<String, Error>> {
        let end = self.buf.iter().position(|b| *b == b'\n')?;
        let mut line = self.buf.split_to(end);
        self.buf.advance(1);
        if line.last() == Some(&b'\r') {
            line.truncate(end - 1);
        }
        Some(
            String::from_utf8(line.to_vec())
                .map_err(|e| Error::StreamProtocol(format!("invalid UTF-8 in stream: {e}"))),
        )
    }

    /// Bytes received after the last newline.
    pub fn remainder(&self) -> &[u8] {
        &self.buf
    }
}

/// Ring buffer of the most recent raw lines, for diagnostics.
#[derive(Debug)]
pub(crate) struct LineHistory {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LineHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: &str) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_owned());
    }

    pub fn render(&self) -> String {
        self.lines
            .iter()
            .map(|l| format!("  | {l}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Decode a byte stream into frames. Ends after the first error.
pub(crate) fn frames<S>(bytes: S, history_lines: usize) -> impl Stream<Item = Result<Frame, Error>>
where
    S: Stream<Item = Result<Bytes, Error>>,
{
    async_stream::try_stream! {
        let mut bytes = std::pin::pin!(bytes);
        let mut decoder = LineDecoder::default();
        let mut history = LineHistory::new(history_lines);
        let mut builder = FrameBuilder::default();

        while let Some(chunk) = bytes.next().await {
            decoder.push(&chunk?);
            while let Some(line) = decoder.next_line() {
                let line = line?;
                history.push(&line);
                match parse_line(&line) {
                    Ok(Line::Blank) => {
                        if let Some(frame) = builder.finish() {
                            yield frame;
                        }
                    }
                    Ok(Line::Comment) => {}
                    Ok(Line::Field { name, value }) => builder.field(name, value),
                    Err(e) => {
                        warn!(
                            error = %e,
                            "event stream corrupted, recent lines:\n{}",
                            history.render()
                        );
                        Err::<(), Error>(e)?;
                    }
                }
            }
        }

        if !decoder.remainder().is_empty() {
            trace!(bytes = decoder.remainder().len(), "discarding partial line at end of stream");
        }
    }
}
