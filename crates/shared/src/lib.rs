//! Tabletop Protocol - shared wire types for Engine and Player
//!
//! - `ClientMessage` / `ServerMessage`: the tagged JSON messages
//! - `codec`: one message per line, with typed decode errors
//!
//! No I/O here; both sides frame lines with `LinesCodec`.

pub mod codec;
pub mod messages;

pub use codec::{
    decode_client_line, decode_server_line, encode_line, encoded_len, ProtocolError,
    MAX_LINE_BYTES, MAX_SERVER_LINE_BYTES,
};
pub use messages::{ClientMessage, ServerMessage, SERVER_SENDER};
pub use tabletop_domain::PROTOCOL_VERSION;
