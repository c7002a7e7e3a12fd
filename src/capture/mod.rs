//! Capture file decoding and per-frame event extraction

pub mod decoder;
pub mod extractor;

#[cfg(test)]
pub(crate) mod fixtures;

pub use decoder::{CaptureSource, DecodeError, Frame, Frames, NetworkLayer};
pub use extractor::{extract_event, UNKNOWN_PROTOCOL};
