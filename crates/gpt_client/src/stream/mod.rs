//! Decoding of the backend's line-oriented conversation stream.

mod decoder;
mod delivery;
mod frame;

pub use decoder::{DecoderState, LineDecoder, LineOutcome, StreamError};
pub use delivery::{
    into_byte_stream, ByteStream, FrameReceiver, FrameResult, StreamDecoder, LIVE_QUEUE_CAPACITY,
};
pub use frame::DecodedFrame;
