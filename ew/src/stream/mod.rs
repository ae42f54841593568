//! Streamed-response parsing
//!
//! Raw transport chunks flow through [`ChunkReassembler`] into protocol lines,
//! and each line through the frame decoder into a [`StreamFrame`].

mod chat;
mod error;
pub mod frame;
mod reassembler;

pub use chat::{ChatClient, ChatRequest, StreamSummary, pump};
pub use error::{DecodeError, StreamError};
pub use frame::{DATA_MARKER, DONE_SENTINEL, Decoded, LineKind, StreamFrame, decode, decode_as, decode_final};
pub use reassembler::ChunkReassembler;
