//! Protocol module containing the frame codec and the JSON wire messages.

pub mod frame;
pub mod messages;

pub use frame::{decode_frame, encode_frame, FrameReader, FrameWriter, FramingError};
pub use messages::*;
