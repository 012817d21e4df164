//! # Frame Codec
//!
//! Encoding and decoding between [`Frame`] values and the fabric's byte
//! stream. Decoding distinguishes I/O faults from malformed frames; either
//! one tears down the fabric, but only malformed frames indicate a
//! misbehaving peer.

#![forbid(unsafe_code)]

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::types::*;
use crate::error::{Error, Result};
use crate::types::StreamId;

/// Fixed header length: type (u8) + payload length (u16) + stream id (u16).
pub const HEADER_LEN: usize = 5;

/// Read exactly one frame from the fabric.
///
/// Payloads longer than `max_payload` are rejected before being read.
///
/// # Errors
/// `Error::Io` on a transport fault, `Error::Malformed` on a framing
/// violation. Both are fatal to the fabric.
pub fn read_frame<R: Read>(reader: &mut R, max_payload: usize) -> Result<Frame> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;

    let frame_type = header[0];
    let length = u16::from_be_bytes([header[1], header[2]]) as usize;
    let stream_id = StreamId(u16::from_be_bytes([header[3], header[4]]));

    if length > max_payload {
        return Err(Error::Malformed("payload length exceeds cap"));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload)?;

    decode_payload(frame_type, stream_id, Bytes::from(payload))
}

/// Decode a frame from its already-read header fields and payload.
pub fn decode_payload(frame_type: u8, stream_id: StreamId, payload: Bytes) -> Result<Frame> {
    match frame_type {
        FRAME_TYPE_SYN => decode_syn(stream_id, payload),
        FRAME_TYPE_RESULT => {
            if payload.len() != 4 {
                return Err(Error::Malformed("RESULT payload must be 4 bytes"));
            }
            let errno = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            Ok(Frame::Result { stream_id, errno })
        }
        FRAME_TYPE_DATA => Ok(Frame::Data { stream_id, payload }),
        FRAME_TYPE_WND => {
            if payload.len() != 4 {
                return Err(Error::Malformed("WND payload must be 4 bytes"));
            }
            let credit = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            Ok(Frame::Wnd { stream_id, credit })
        }
        FRAME_TYPE_FIN => {
            if !payload.is_empty() {
                return Err(Error::Malformed("FIN carries no payload"));
            }
            Ok(Frame::Fin { stream_id })
        }
        FRAME_TYPE_RST => {
            if !payload.is_empty() {
                return Err(Error::Malformed("RST carries no payload"));
            }
            Ok(Frame::Rst { stream_id })
        }
        _ => Err(Error::Malformed("unknown frame type")),
    }
}

fn decode_syn(stream_id: StreamId, mut payload: Bytes) -> Result<Frame> {
    if payload.is_empty() {
        return Err(Error::Malformed("SYN truncated at network length"));
    }
    let network_len = payload.get_u8() as usize;
    if payload.len() < network_len {
        return Err(Error::Malformed("SYN truncated in network tag"));
    }
    let network = payload.split_to(network_len);

    if payload.len() < 2 {
        return Err(Error::Malformed("SYN truncated at address length"));
    }
    let address_len = payload.get_u16() as usize;
    if payload.len() != address_len {
        return Err(Error::Malformed("SYN address length mismatch"));
    }

    let network = String::from_utf8(network.to_vec())
        .map_err(|_| Error::Malformed("SYN network tag is not UTF-8"))?;
    let address = String::from_utf8(payload.to_vec())
        .map_err(|_| Error::Malformed("SYN address is not UTF-8"))?;

    Ok(Frame::Syn {
        stream_id,
        network,
        address,
    })
}

/// Encode a frame into a fresh buffer, header included.
///
/// Callers keep payloads within the length field's range; the write
/// chunker never produces more than `MAX_FRAME_PAYLOAD` bytes per frame.
pub fn encode(frame: &Frame) -> BytesMut {
    let payload_len = payload_len(frame);
    debug_assert!(payload_len <= usize::from(u16::MAX));
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload_len);

    buf.put_u8(frame.type_code());
    buf.put_u16(payload_len as u16);
    buf.put_u16(frame.stream_id().value());

    match frame {
        Frame::Syn {
            network, address, ..
        } => {
            buf.put_u8(network.len() as u8);
            buf.put_slice(network.as_bytes());
            buf.put_u16(address.len() as u16);
            buf.put_slice(address.as_bytes());
        }
        Frame::Result { errno, .. } => buf.put_u32(*errno),
        Frame::Data { payload, .. } => buf.put_slice(payload),
        Frame::Wnd { credit, .. } => buf.put_u32(*credit),
        Frame::Fin { .. } | Frame::Rst { .. } => {}
    }

    buf
}

fn payload_len(frame: &Frame) -> usize {
    match frame {
        Frame::Syn {
            network, address, ..
        } => 1 + network.len() + 2 + address.len(),
        Frame::Result { .. } | Frame::Wnd { .. } => 4,
        Frame::Data { payload, .. } => payload.len(),
        Frame::Fin { .. } | Frame::Rst { .. } => 0,
    }
}

/// Write one frame to the fabric.
///
/// The caller must hold the fabric write lock: the single `write_all`
/// keeps the frame atomic with respect to other writers.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    let buf = encode(frame);
    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MAX_FRAME_PAYLOAD;
    use std::io::Cursor;

    fn roundtrip(frame: Frame) -> Frame {
        let encoded = encode(&frame);
        let mut cursor = Cursor::new(encoded.to_vec());
        read_frame(&mut cursor, MAX_FRAME_PAYLOAD).unwrap()
    }

    // ==========================================================================
    // Roundtrip Law
    // ==========================================================================

    #[test]
    fn test_roundtrip_syn() {
        let frame = Frame::Syn {
            stream_id: StreamId(42),
            network: "tcp".to_string(),
            address: "198.51.100.7:8080".to_string(),
        };
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn test_roundtrip_result() {
        let frame = Frame::Result {
            stream_id: StreamId(1),
            errno: 3,
        };
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn test_roundtrip_data() {
        let frame = Frame::Data {
            stream_id: StreamId(9),
            payload: Bytes::from_static(b"hello fabric"),
        };
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn test_roundtrip_wnd() {
        let frame = Frame::Wnd {
            stream_id: StreamId(0xffff),
            credit: 256 * 1024,
        };
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn test_roundtrip_fin_rst() {
        assert_eq!(
            roundtrip(Frame::Fin {
                stream_id: StreamId(5)
            }),
            Frame::Fin {
                stream_id: StreamId(5)
            }
        );
        assert_eq!(
            roundtrip(Frame::Rst {
                stream_id: StreamId(5)
            }),
            Frame::Rst {
                stream_id: StreamId(5)
            }
        );
    }

    #[test]
    fn test_roundtrip_empty_strings() {
        let frame = Frame::Syn {
            stream_id: StreamId(0),
            network: String::new(),
            address: String::new(),
        };
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    // ==========================================================================
    // Wire Layout
    // ==========================================================================

    #[test]
    fn test_header_layout_big_endian() {
        let frame = Frame::Wnd {
            stream_id: StreamId(0x0102),
            credit: 0x0a0b0c0d,
        };
        let buf = encode(&frame);
        assert_eq!(
            &buf[..],
            &[0x04, 0x00, 0x04, 0x01, 0x02, 0x0a, 0x0b, 0x0c, 0x0d]
        );
    }

    #[test]
    fn test_data_length_field() {
        let frame = Frame::Data {
            stream_id: StreamId(1),
            payload: Bytes::from_static(&[0xaa; 300]),
        };
        let buf = encode(&frame);
        assert_eq!(buf[0], FRAME_TYPE_DATA);
        assert_eq!(u16::from_be_bytes([buf[1], buf[2]]), 300);
        assert_eq!(buf.len(), HEADER_LEN + 300);
    }

    #[test]
    fn test_syn_payload_layout() {
        let frame = Frame::Syn {
            stream_id: StreamId(2),
            network: "tcp".to_string(),
            address: "x:1".to_string(),
        };
        let buf = encode(&frame);
        // network: 1-byte length prefix
        assert_eq!(buf[HEADER_LEN], 3);
        assert_eq!(&buf[HEADER_LEN + 1..HEADER_LEN + 4], b"tcp");
        // address: 2-byte length prefix
        assert_eq!(
            u16::from_be_bytes([buf[HEADER_LEN + 4], buf[HEADER_LEN + 5]]),
            3
        );
        assert_eq!(&buf[HEADER_LEN + 6..], b"x:1");
    }

    // ==========================================================================
    // Malformed Frames
    // ==========================================================================

    #[test]
    fn test_unknown_type_rejected() {
        let raw = [0x07u8, 0x00, 0x00, 0x00, 0x01];
        let mut cursor = Cursor::new(raw.to_vec());
        let err = read_frame(&mut cursor, MAX_FRAME_PAYLOAD).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut raw = vec![FRAME_TYPE_DATA, 0xff, 0xff, 0x00, 0x01];
        raw.extend_from_slice(&[0u8; 0xffff]);
        let mut cursor = Cursor::new(raw);
        let err = read_frame(&mut cursor, MAX_FRAME_PAYLOAD).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn test_truncated_payload_is_io_error() {
        let raw = [FRAME_TYPE_DATA, 0x00, 0x10, 0x00, 0x01, 0xaa];
        let mut cursor = Cursor::new(raw.to_vec());
        let err = read_frame(&mut cursor, MAX_FRAME_PAYLOAD).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_result_wrong_size_rejected() {
        let raw = [FRAME_TYPE_RESULT, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00];
        let mut cursor = Cursor::new(raw.to_vec());
        let err = read_frame(&mut cursor, MAX_FRAME_PAYLOAD).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn test_fin_with_payload_rejected() {
        let raw = [FRAME_TYPE_FIN, 0x00, 0x01, 0x00, 0x01, 0xcc];
        let mut cursor = Cursor::new(raw.to_vec());
        let err = read_frame(&mut cursor, MAX_FRAME_PAYLOAD).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn test_syn_truncated_in_address() {
        // network "tcp" ok, address length says 10 but only 2 bytes follow
        let payload = [3u8, b't', b'c', b'p', 0x00, 0x0a, b'x', b'y'];
        let mut raw = vec![FRAME_TYPE_SYN, 0x00, payload.len() as u8, 0x00, 0x01];
        raw.extend_from_slice(&payload);
        let mut cursor = Cursor::new(raw);
        let err = read_frame(&mut cursor, MAX_FRAME_PAYLOAD).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn test_syn_non_utf8_rejected() {
        let payload = [2u8, 0xff, 0xfe, 0x00, 0x00];
        let mut raw = vec![FRAME_TYPE_SYN, 0x00, payload.len() as u8, 0x00, 0x01];
        raw.extend_from_slice(&payload);
        let mut cursor = Cursor::new(raw);
        let err = read_frame(&mut cursor, MAX_FRAME_PAYLOAD).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let first = Frame::Data {
            stream_id: StreamId(1),
            payload: Bytes::from_static(b"one"),
        };
        let second = Frame::Fin {
            stream_id: StreamId(1),
        };
        let mut raw = encode(&first).to_vec();
        raw.extend_from_slice(&encode(&second));
        let mut cursor = Cursor::new(raw);
        assert_eq!(read_frame(&mut cursor, MAX_FRAME_PAYLOAD).unwrap(), first);
        assert_eq!(read_frame(&mut cursor, MAX_FRAME_PAYLOAD).unwrap(), second);
    }
}
