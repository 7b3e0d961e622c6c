//! Frames pushed to stream connections.

pub mod frame;

pub use frame::StreamFrame;
