//! Message schema carried inside segmented frames.
//!
//! A message is a tagged union with a 32-bit sequence header. The first
//! segment holds the tag, sequence, and fixed fields plus the object name;
//! bulk data (write payloads, read reply payloads) travels as its own
//! segment so it stays zero-copy from the stream to the consumer. All
//! integers are little-endian.

use crate::frame::WORD;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crimson_common::{Error, Result};

/// Write reply stage: the write is visible to reads.
pub const FLAG_ON_APPLY: u32 = 0x1;
/// Write reply stage: the write is durable. The memory store acknowledges
/// both stages together.
pub const FLAG_ON_COMMIT: u32 = 0x2;

const TAG_OSD_READ: u32 = 1;
const TAG_OSD_READ_REPLY: u32 = 2;
const TAG_OSD_WRITE: u32 = 3;
const TAG_OSD_WRITE_REPLY: u32 = 4;

/// A protocol message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Read `length` bytes of an object at `offset`
    OsdRead {
        sequence: u32,
        object: String,
        offset: u64,
        length: u64,
    },
    /// Reply to [`Message::OsdRead`]; `error_code` of zero means success
    OsdReadReply {
        sequence: u32,
        error_code: u32,
        data: Bytes,
    },
    /// Write `data` to an object at `offset`, requesting the reply stages
    /// in `flags`
    OsdWrite {
        sequence: u32,
        object: String,
        offset: u64,
        flags: u32,
        data: Bytes,
    },
    /// Reply to [`Message::OsdWrite`]; `flags` carries the acknowledged
    /// stages
    OsdWriteReply {
        sequence: u32,
        flags: u32,
        error_code: u32,
    },
}

impl Message {
    /// The sequence number in the message header
    #[must_use]
    pub fn sequence(&self) -> u32 {
        match self {
            Self::OsdRead { sequence, .. }
            | Self::OsdReadReply { sequence, .. }
            | Self::OsdWrite { sequence, .. }
            | Self::OsdWriteReply { sequence, .. } => *sequence,
        }
    }

    /// Short name of the variant, for logging
    #[must_use]
    pub fn tag_name(&self) -> &'static str {
        match self {
            Self::OsdRead { .. } => "osd_read",
            Self::OsdReadReply { .. } => "osd_read_reply",
            Self::OsdWrite { .. } => "osd_write",
            Self::OsdWriteReply { .. } => "osd_write_reply",
        }
    }

    /// Encode into frame segments
    #[must_use]
    pub fn encode(&self) -> Vec<Bytes> {
        match self {
            Self::OsdRead {
                sequence,
                object,
                offset,
                length,
            } => {
                let mut header = BytesMut::with_capacity(32 + object.len() + WORD);
                header.put_u32_le(TAG_OSD_READ);
                header.put_u32_le(*sequence);
                header.put_u64_le(*offset);
                header.put_u64_le(*length);
                put_name(&mut header, object);
                vec![header.freeze()]
            }
            Self::OsdReadReply {
                sequence,
                error_code,
                data,
            } => {
                let mut header = BytesMut::with_capacity(24);
                header.put_u32_le(TAG_OSD_READ_REPLY);
                header.put_u32_le(*sequence);
                header.put_u32_le(*error_code);
                header.put_u32_le(0);
                header.put_u64_le(data.len() as u64);
                let mut segments = vec![header.freeze()];
                if !data.is_empty() {
                    segments.push(pad_data(data));
                }
                segments
            }
            Self::OsdWrite {
                sequence,
                object,
                offset,
                flags,
                data,
            } => {
                let mut header = BytesMut::with_capacity(36 + object.len() + WORD);
                header.put_u32_le(TAG_OSD_WRITE);
                header.put_u32_le(*sequence);
                header.put_u64_le(*offset);
                header.put_u64_le(data.len() as u64);
                header.put_u32_le(*flags);
                put_name(&mut header, object);
                let mut segments = vec![header.freeze()];
                if !data.is_empty() {
                    segments.push(pad_data(data));
                }
                segments
            }
            Self::OsdWriteReply {
                sequence,
                flags,
                error_code,
            } => {
                let mut header = BytesMut::with_capacity(16);
                header.put_u32_le(TAG_OSD_WRITE_REPLY);
                header.put_u32_le(*sequence);
                header.put_u32_le(*flags);
                header.put_u32_le(*error_code);
                vec![header.freeze()]
            }
        }
    }

    /// Decode from frame segments, keeping payload segments zero-copy.
    pub fn decode(segments: Vec<Bytes>) -> Result<Message> {
        let mut segments = segments.into_iter();
        let mut header = segments
            .next()
            .ok_or_else(|| Error::protocol("message frame has no header segment"))?;

        need(&header, 8, "message header")?;
        let tag = header.get_u32_le();
        let sequence = header.get_u32_le();
        match tag {
            TAG_OSD_READ => {
                need(&header, 16, "osd_read header")?;
                let offset = header.get_u64_le();
                let length = header.get_u64_le();
                let object = get_name(&mut header)?;
                Ok(Message::OsdRead {
                    sequence,
                    object,
                    offset,
                    length,
                })
            }
            TAG_OSD_READ_REPLY => {
                need(&header, 16, "osd_read_reply header")?;
                let error_code = header.get_u32_le();
                let _pad = header.get_u32_le();
                let length = header.get_u64_le();
                let data = get_data(length, segments.next())?;
                Ok(Message::OsdReadReply {
                    sequence,
                    error_code,
                    data,
                })
            }
            TAG_OSD_WRITE => {
                need(&header, 20, "osd_write header")?;
                let offset = header.get_u64_le();
                let length = header.get_u64_le();
                let flags = header.get_u32_le();
                let object = get_name(&mut header)?;
                let data = get_data(length, segments.next())?;
                Ok(Message::OsdWrite {
                    sequence,
                    object,
                    offset,
                    flags,
                    data,
                })
            }
            TAG_OSD_WRITE_REPLY => {
                need(&header, 8, "osd_write_reply header")?;
                let flags = header.get_u32_le();
                let error_code = header.get_u32_le();
                Ok(Message::OsdWriteReply {
                    sequence,
                    flags,
                    error_code,
                })
            }
            other => Err(Error::protocol(format!("unknown message tag {other}"))),
        }
    }
}

fn put_name(header: &mut BytesMut, name: &str) {
    header.put_u32_le(name.len() as u32);
    header.put_slice(name.as_bytes());
    let padded = header.len().next_multiple_of(WORD);
    header.put_bytes(0, padded - header.len());
}

fn get_name(header: &mut Bytes) -> Result<String> {
    need(header, 4, "object name length")?;
    let len = header.get_u32_le() as usize;
    need(header, len, "object name")?;
    let name = header.split_to(len);
    String::from_utf8(name.to_vec())
        .map_err(|_| Error::protocol("object name is not valid UTF-8"))
}

/// Reassemble a payload: `length` true bytes inside a word-padded segment.
fn get_data(length: u64, segment: Option<Bytes>) -> Result<Bytes> {
    if length == 0 {
        return Ok(Bytes::new());
    }
    let segment =
        segment.ok_or_else(|| Error::protocol("message is missing its data segment"))?;
    let padded = (length as usize).next_multiple_of(WORD);
    if segment.len() != padded {
        return Err(Error::protocol(format!(
            "data segment is {} bytes, expected {padded} for a {length}-byte payload",
            segment.len()
        )));
    }
    Ok(segment.slice(..length as usize))
}

/// Word-pad a payload for its own segment; aligned payloads stay zero-copy.
fn pad_data(data: &Bytes) -> Bytes {
    if data.len() % WORD == 0 {
        return data.clone();
    }
    let padded = data.len().next_multiple_of(WORD);
    let mut out = BytesMut::with_capacity(padded);
    out.put_slice(data);
    out.put_bytes(0, padded - data.len());
    out.freeze()
}

fn need(buf: &Bytes, len: usize, what: &str) -> Result<()> {
    if buf.remaining() < len {
        return Err(Error::protocol(format!(
            "{what}: need {len} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}
