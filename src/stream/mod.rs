//! Stream primitives shared by links and the transport engine

mod frame_stream;

pub use frame_stream::FrameStream;
