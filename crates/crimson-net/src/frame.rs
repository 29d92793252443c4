//! Segment framing over an ordered byte stream.
//!
//! All integers are unsigned and little-endian. A frame is laid out as:
//!
//! 1. 4 bytes: segment count minus one (there is always at least one).
//! 2. N * 4 bytes: each segment's size in 8-byte words.
//! 3. 0 or 4 bytes of zero padding, so the table occupies whole words
//!    (present exactly when N is even).
//! 4. The segment bodies in declared order, each `size * 8` bytes.
//!
//! Truncated input and zero-sized segments are protocol errors; end of
//! stream before the first byte of a frame is a clean EOF.

use bytes::{BufMut, Bytes, BytesMut};
use crimson_common::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bytes per word; segment sizes are counted in words.
pub const WORD: usize = 8;

/// Upper bound on segments per frame, to keep hostile input from forcing
/// large allocations.
pub const MAX_SEGMENTS: usize = 512;

/// Upper bound on a single segment, in words (64 MiB).
pub const MAX_SEGMENT_WORDS: u32 = (64 * 1024 * 1024 / WORD) as u32;

/// Read one frame. Returns `None` on a clean end of stream; a stream that
/// ends mid-frame is a protocol error.
pub async fn read_frame<R>(input: &mut R) -> Result<Option<Vec<Bytes>>>
where
    R: AsyncRead + Unpin,
{
    let mut count_buf = [0u8; 4];
    if !read_exact_or_eof(input, &mut count_buf).await? {
        return Ok(None);
    }
    let count = u32::from_le_bytes(count_buf) as usize + 1;
    if count > MAX_SEGMENTS {
        return Err(Error::protocol(format!(
            "frame declares {count} segments, limit {MAX_SEGMENTS}"
        )));
    }

    // the size table plus its leading count occupy whole words
    let table_len = (4 + 4 * count).next_multiple_of(WORD) - 4;
    let mut table = vec![0u8; table_len];
    input
        .read_exact(&mut table)
        .await
        .map_err(|err| Error::protocol(format!("failed to read segment sizes: {err}")))?;

    let mut sizes = Vec::with_capacity(count);
    for index in 0..count {
        let words = u32::from_le_bytes(table[4 * index..4 * index + 4].try_into().unwrap());
        if words == 0 {
            return Err(Error::protocol(format!("segment {index} has size zero")));
        }
        if words > MAX_SEGMENT_WORDS {
            return Err(Error::protocol(format!(
                "segment {index} declares {words} words, limit {MAX_SEGMENT_WORDS}"
            )));
        }
        sizes.push(words as usize * WORD);
    }

    let mut segments = Vec::with_capacity(count);
    for (index, size) in sizes.into_iter().enumerate() {
        let mut body = BytesMut::zeroed(size);
        input
            .read_exact(&mut body)
            .await
            .map_err(|err| Error::protocol(format!("failed to read segment {index}: {err}")))?;
        segments.push(body.freeze());
    }
    Ok(Some(segments))
}

/// Write one frame. Every segment length must be a whole number of words.
pub async fn write_frame<W>(output: &mut W, segments: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if segments.is_empty() || segments.len() > MAX_SEGMENTS {
        return Err(Error::invalid_argument(format!(
            "frame must carry 1..={MAX_SEGMENTS} segments"
        )));
    }

    let mut table = BytesMut::with_capacity(4 + 4 * segments.len() + 4);
    table.put_u32_le(segments.len() as u32 - 1);
    for segment in segments {
        if segment.is_empty() || segment.len() % WORD != 0 {
            return Err(Error::invalid_argument(format!(
                "segment length {} is not a positive multiple of {WORD}",
                segment.len()
            )));
        }
        table.put_u32_le((segment.len() / WORD) as u32);
    }
    if segments.len() % 2 == 0 {
        table.put_u32_le(0);
    }

    output.write_all(&table).await?;
    for segment in segments {
        output.write_all(segment).await?;
    }
    Ok(())
}

/// Fill `buf` from the stream. `Ok(false)` means the stream ended before the
/// first byte; ending partway through is a protocol error.
async fn read_exact_or_eof<R>(input: &mut R, buf: &mut [u8]) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = input.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(Error::protocol("stream ended mid-frame"));
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn round_trip(segments: Vec<Bytes>) -> Vec<Bytes> {
        let mut wire = Vec::new();
        write_frame(&mut wire, &segments).await.unwrap();
        let mut cursor = wire.as_slice();
        read_frame(&mut cursor).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_two_segment_frame_bytes() {
        // two segments: 8 bytes of 0x11, 16 bytes of 0x22; even count pads
        let segments = vec![Bytes::from(vec![0x11u8; 8]), Bytes::from(vec![0x22u8; 16])];
        let mut wire = Vec::new();
        write_frame(&mut wire, &segments).await.unwrap();

        let mut expected = vec![
            0x01, 0x00, 0x00, 0x00, // count - 1
            0x01, 0x00, 0x00, 0x00, // segment 0: 1 word
            0x02, 0x00, 0x00, 0x00, // segment 1: 2 words
            0x00, 0x00, 0x00, 0x00, // pad
        ];
        expected.extend(std::iter::repeat(0x11).take(8));
        expected.extend(std::iter::repeat(0x22).take(16));
        assert_eq!(wire, expected);

        let mut cursor = wire.as_slice();
        let decoded = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded, segments);
        assert!(cursor.is_empty());
    }

    #[tokio::test]
    async fn test_odd_segment_count_has_no_pad() {
        let segments = vec![Bytes::from(vec![0xaau8; 8])];
        let mut wire = Vec::new();
        write_frame(&mut wire, &segments).await.unwrap();
        // 4 count + 4 size + 8 body
        assert_eq!(wire.len(), 16);
        assert_eq!(round_trip(segments.clone()).await, segments);

        let three: Vec<Bytes> = (1..=3).map(|i| Bytes::from(vec![i as u8; 8])).collect();
        let mut wire = Vec::new();
        write_frame(&mut wire, &three).await.unwrap();
        // 4 count + 12 sizes + 24 bodies, already word aligned
        assert_eq!(wire.len(), 40);
        assert_eq!(round_trip(three.clone()).await, three);
    }

    #[tokio::test]
    async fn test_encoded_length_formula() {
        for count in 1..=5usize {
            let segments: Vec<Bytes> = (0..count).map(|_| Bytes::from(vec![0u8; 24])).collect();
            let mut wire = Vec::new();
            write_frame(&mut wire, &segments).await.unwrap();
            let pad = if count % 2 == 0 { 4 } else { 0 };
            assert_eq!(wire.len(), 4 * (1 + count) + pad + 24 * count);
        }
    }

    #[tokio::test]
    async fn test_clean_eof_is_none() {
        let mut cursor: &[u8] = &[];
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_frames_are_protocol_errors() {
        let segments = vec![Bytes::from(vec![0x33u8; 8]), Bytes::from(vec![0x44u8; 8])];
        let mut wire = Vec::new();
        write_frame(&mut wire, &segments).await.unwrap();

        for cut in 1..wire.len() {
            let mut cursor = &wire[..cut];
            let err = read_frame(&mut cursor).await.unwrap_err();
            assert!(matches!(err, Error::Protocol(_)), "cut at {cut}: {err}");
        }
    }

    #[tokio::test]
    async fn test_zero_size_segment_rejected() {
        // count = 1 segment, size table declares zero words
        let wire: Vec<u8> = vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut cursor = wire.as_slice();
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_unaligned_segment_rejected_on_write() {
        let mut wire = Vec::new();
        let err = write_frame(&mut wire, &[Bytes::from_static(b"seven b")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_hostile_segment_count_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&u32::MAX.to_le_bytes());
        let mut cursor = wire.as_slice();
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(Error::Protocol(_))
        ));
    }
}
