//! Frame layer: wire format types and the codec for the shared fabric.

mod codec;
mod types;

pub use codec::{decode_payload, encode, read_frame, write_frame, HEADER_LEN};
pub use types::{
    Frame, FRAME_TYPE_DATA, FRAME_TYPE_FIN, FRAME_TYPE_RESULT, FRAME_TYPE_RST, FRAME_TYPE_SYN,
    FRAME_TYPE_WND,
};
