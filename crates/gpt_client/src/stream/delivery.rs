use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use log::debug;
use tokio::io::{AsyncBufReadExt, Lines};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use super::decoder::{DecoderState, LineDecoder, LineOutcome, StreamError};
use super::frame::DecodedFrame;

/// Default capacity of the live frame queue.
pub const LIVE_QUEUE_CAPACITY: usize = 60;

pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;
pub type FrameResult = Result<DecodedFrame, StreamError>;
pub type FrameReceiver = mpsc::Receiver<FrameResult>;

/// Box any chunked body (e.g. `reqwest::Response::bytes_stream`) for decoding.
pub fn into_byte_stream<S, E>(stream: S) -> ByteStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    Box::pin(stream.map_err(|err| io::Error::new(io::ErrorKind::Other, err)))
}

/// Decodes one response body. The body is owned here and dropped with it.
pub struct StreamDecoder {
    lines: Lines<StreamReader<ByteStream, Bytes>>,
    decoder: LineDecoder,
}

impl StreamDecoder {
    pub fn new(body: ByteStream) -> Self {
        Self {
            lines: StreamReader::new(body).lines(),
            decoder: LineDecoder::new(),
        }
    }

    pub fn from_response(response: reqwest::Response) -> Self {
        Self::new(into_byte_stream(response.bytes_stream()))
    }

    pub fn state(&self) -> DecoderState {
        self.decoder.state()
    }

    /// The next frame, `Ok(None)` once the stream has ended normally.
    pub async fn next_frame(&mut self) -> Result<Option<DecodedFrame>, StreamError> {
        loop {
            if self.decoder.is_finished() {
                return Ok(None);
            }
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.decoder.finish();
                    return Ok(None);
                }
                Err(err) => return Err(self.decoder.fail(StreamError::Read(err.to_string()))),
            };
            match self.decoder.feed_line(&line)? {
                LineOutcome::Frame(frame) => return Ok(Some(frame)),
                LineOutcome::Finished => return Ok(None),
                LineOutcome::Skip => {}
            }
        }
    }

    /// Buffered mode: every frame in order, or the error with nothing partial.
    pub async fn collect(mut self) -> Result<Vec<DecodedFrame>, StreamError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame().await? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Live mode: decode on a separate task into a bounded queue.
    pub fn spawn_live(self, capacity: usize, cancel: CancellationToken) -> FrameReceiver {
        self.spawn_live_with(capacity, cancel, |_| {})
    }

    /// Like [`Self::spawn_live`]; `on_finished` sees the last frame when the
    /// stream ends normally.
    pub fn spawn_live_with<F>(
        self,
        capacity: usize,
        cancel: CancellationToken,
        on_finished: F,
    ) -> FrameReceiver
    where
        F: FnOnce(&DecodedFrame) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(self.pump(tx, cancel, on_finished));
        rx
    }

    async fn pump<F>(
        mut self,
        tx: mpsc::Sender<FrameResult>,
        cancel: CancellationToken,
        on_finished: F,
    ) where
        F: FnOnce(&DecodedFrame) + Send + 'static,
    {
        let mut last: Option<DecodedFrame> = None;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(StreamError::Cancelled),
                next = self.next_frame() => next,
            };

            match next {
                Ok(Some(frame)) => {
                    last = Some(frame.clone());
                    if tx.send(Ok(frame)).await.is_err() {
                        debug!("Live stream receiver dropped, stopping decode");
                        return;
                    }
                }
                Ok(None) => {
                    if let Some(frame) = &last {
                        on_finished(frame);
                    }
                    return;
                }
                Err(err) => {
                    debug!("Live stream failed: {err}");
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
        }
    }
}
