//! The stream bridge: a bounded byte conduit and the producer/consumer pair that
//! runs the codec between a source and a sink.

pub mod bridge;
pub mod conduit;
