use super::decoder::Frame;
use crate::pipeline::types::Event;

/// Protocol recorded when a frame has a network layer but no transport layer
pub const UNKNOWN_PROTOCOL: &str = "unknown";

/// Map a frame to the event it produces
///
/// Frames without a network layer (including malformed ones) produce nothing.
pub fn extract_event(frame: &Frame) -> Option<Event> {
    let network = frame.network.as_ref()?;

    Some(Event {
        source_ip: network.source.to_string(),
        protocol: network.transport.unwrap_or(UNKNOWN_PROTOCOL).to_string(),
        timestamp: frame.timestamp,
    })
}
