//! Wire protocol between sibling nodes
//!
//! Requests travel from the dialing node to the listener as
//! [`ForwardRequest`] frames; the listener answers REGISTER and PING
//! with a [`LoadReport`]. Frames are length-prefixed JSON.

mod framing;
mod messages;

pub use framing::*;
pub use messages::*;
