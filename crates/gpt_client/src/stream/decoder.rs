use log::{trace, warn};
use serde_json::Value;
use thiserror::Error;

use super::frame::{decode_frame, detail_message, DecodedFrame, FrameShape};

const DATA_PREFIX: &str = "data: ";
const EVENT_PREFIX: &str = "event: ";
const DONE_SENTINEL: &str = "[DONE]";
const DETAIL_MARKER: &str = "{\"detail\"";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("provider reported an error: {0}")]
    Detail(String),

    #[error("failed to read response body: {0}")]
    Read(String),

    #[error("stream ended without any message")]
    NoFrames,

    #[error("stream decoding was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    AwaitFirstLine,
    Scanning,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Skip,
    Frame(DecodedFrame),
    Finished,
}

/// Find a `{"detail": ...}` object anywhere in `line` and return its message.
fn embedded_detail(line: &str) -> Option<String> {
    let start = line.find(DETAIL_MARKER)?;
    let rest = &line[start..];
    let mut values = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
    match values.next() {
        Some(Ok(Value::Object(map))) => Some(
            map.get("detail")
                .map(detail_message)
                .unwrap_or_else(|| rest.to_string()),
        ),
        _ => Some(rest.to_string()),
    }
}

/// Line state machine of the conversation stream.
#[derive(Debug)]
pub struct LineDecoder {
    state: DecoderState,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::AwaitFirstLine,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, DecoderState::Done | DecoderState::Failed)
    }

    /// Feed one line without its terminator.
    pub fn feed_line(&mut self, line: &str) -> Result<LineOutcome, StreamError> {
        if self.is_finished() {
            return Ok(LineOutcome::Finished);
        }
        let line = line.trim_end_matches('\r');

        if self.state == DecoderState::AwaitFirstLine {
            self.state = DecoderState::Scanning;
            if let Some(detail) = embedded_detail(line) {
                return Err(self.fail(StreamError::Detail(detail)));
            }
        }

        if line.trim().is_empty() || line.starts_with(EVENT_PREFIX) {
            return Ok(LineOutcome::Skip);
        }
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            trace!("Skipping non-data line");
            return Ok(LineOutcome::Skip);
        };

        if let Some(detail) = embedded_detail(payload) {
            return Err(self.fail(StreamError::Detail(detail)));
        }
        if payload.trim() == DONE_SENTINEL {
            self.state = DecoderState::Done;
            return Ok(LineOutcome::Finished);
        }

        match decode_frame(payload) {
            FrameShape::Text(frame) => Ok(LineOutcome::Frame(frame)),
            FrameShape::Detail(detail) => Err(self.fail(StreamError::Detail(detail))),
            FrameShape::NonText(content_type) => {
                warn!("Unsupported message type: {content_type}");
                Ok(LineOutcome::Skip)
            }
            FrameShape::Empty => Ok(LineOutcome::Skip),
            FrameShape::Mismatch(reason) => {
                trace!("Skipping data line: {reason}");
                Ok(LineOutcome::Skip)
            }
        }
    }

    /// End of input. Reaching it without the sentinel is still a normal end.
    pub fn finish(&mut self) {
        if !self.is_finished() {
            self.state = DecoderState::Done;
        }
    }

    pub fn fail(&mut self, err: StreamError) -> StreamError {
        self.state = DecoderState::Failed;
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: &str = r#"data: {"message":{"id":"m1","content":{"content_type":"text","parts":["Hi"]}},"conversation_id":"c1"}"#;

    #[test]
    fn first_line_detail_is_fatal() {
        let mut decoder = LineDecoder::new();
        let err = decoder.feed_line(r#"{"detail":"rate limited"}"#).unwrap_err();

        assert_eq!(err, StreamError::Detail("rate limited".into()));
        assert_eq!(decoder.state(), DecoderState::Failed);
    }

    #[test]
    fn first_line_is_otherwise_processed() {
        let mut decoder = LineDecoder::new();
        assert!(matches!(decoder.feed_line(FRAME), Ok(LineOutcome::Frame(_))));
        assert_eq!(decoder.state(), DecoderState::Scanning);
    }

    #[test]
    fn ignorable_lines_are_skipped() {
        let mut decoder = LineDecoder::new();
        for line in ["", "   ", "event: ping", ": keep-alive", "id: 3", "data: {malformed}"] {
            assert_eq!(decoder.feed_line(line), Ok(LineOutcome::Skip), "line {line:?}");
        }
        assert_eq!(decoder.state(), DecoderState::Scanning);
    }

    #[test]
    fn sentinel_ends_and_later_lines_are_ignored() {
        let mut decoder = LineDecoder::new();
        assert_eq!(decoder.feed_line("data: [DONE]\r"), Ok(LineOutcome::Finished));
        assert_eq!(decoder.state(), DecoderState::Done);
        assert_eq!(decoder.feed_line(FRAME), Ok(LineOutcome::Finished));
    }

    #[test]
    fn detail_inside_data_line_is_fatal() {
        let mut decoder = LineDecoder::new();
        decoder.feed_line(FRAME).unwrap();
        let err = decoder
            .feed_line(r#"data: {"detail":{"code":"too_many"}}"#)
            .unwrap_err();

        assert_eq!(err, StreamError::Detail(r#"{"code":"too_many"}"#.into()));
        assert_eq!(decoder.state(), DecoderState::Failed);
    }

    #[test]
    fn end_of_input_without_sentinel_is_done() {
        let mut decoder = LineDecoder::new();
        decoder.feed_line(FRAME).unwrap();
        decoder.finish();
        assert_eq!(decoder.state(), DecoderState::Done);
    }

    #[test]
    fn unterminated_detail_is_still_fatal() {
        assert_eq!(
            embedded_detail(r#"oops {"detail": "cut off"#).as_deref(),
            Some(r#"{"detail": "cut off"#)
        );
    }
}
