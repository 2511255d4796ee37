//! Length-prefixed frames with optional zlib compression.
//!
//! [`FrameCodec`] plugs into `tokio_util::codec::{FramedRead, FramedWrite}`
//! and turns a TCP byte stream into packet bodies (opcode + payload) and
//! back.
//!
//! ```text
//! uncompressed:  VarInt length │ body
//! compressed:    VarInt length │ VarInt data_length │ zlib(body)   (data_length > 0)
//!                VarInt length │ VarInt 0           │ body         (below threshold)
//! ```
//!
//! Compression starts out disabled. The writer switches it on by calling
//! [`FrameCodec::set_threshold`] right after the `SetCompression` packet is
//! encoded, so that packet itself still goes out in the old format. The
//! reader splits frames with compression off and runs [`decompress`] per
//! frame, since the threshold may change while a read is pending.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use tokio_util::codec::{Decoder, Encoder};

use crate::FrameError;
use crate::varint::{peek_varint, read_varint, varint_len, write_varint};

/// Largest frame length a 3-byte `VarInt` prefix can carry.
pub const MAX_FRAME_LEN: usize = 2_097_151;

/// Largest body a compressed frame may inflate to.
pub const MAX_UNCOMPRESSED_LEN: usize = 8_388_608;

/// Bytes allowed for the frame length prefix.
const MAX_LENGTH_PREFIX: usize = 3;

/// Frame encoder/decoder for one direction of one connection.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// `None` while compression is disabled.
    threshold: Option<usize>,
    level: Compression,
}

impl FrameCodec {
    /// Creates a codec with compression disabled.
    pub fn new() -> Self {
        Self {
            threshold: None,
            level: Compression::default(),
        }
    }

    /// Creates a codec with the given threshold already applied.
    pub fn with_threshold(threshold: i32) -> Self {
        let mut codec = Self::new();
        codec.set_threshold(threshold);
        codec
    }

    /// Sets the compression threshold. Negative values disable compression.
    pub fn set_threshold(&mut self, threshold: i32) {
        self.threshold = usize::try_from(threshold).ok();
    }

    /// Current threshold, `-1` when compression is disabled.
    pub fn threshold(&self) -> i32 {
        self.threshold.map_or(-1, |t| t as i32)
    }

    fn deflate(&self, body: &[u8]) -> Result<BytesMut, FrameError> {
        let mut encoder = ZlibEncoder::new(
            BytesMut::with_capacity(body.len() / 2).writer(),
            self.level,
        );
        encoder.write_all(body)?;
        Ok(encoder.finish()?.into_inner())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Undoes the compression layer of a frame read with compression off.
///
/// With `threshold < 0` the frame is returned unchanged. Otherwise the
/// frame starts with its `data_length`: `0` means the rest is the raw
/// body, anything else is the size the zlib stream must inflate to.
///
/// [`FrameCodec`] applies this itself when it has a threshold. A reader
/// whose threshold can change between frames, while a read is already
/// pending, instead decodes with compression off and calls this per frame
/// with the threshold current at that moment.
pub fn decompress(
    threshold: i32,
    mut frame: BytesMut,
) -> Result<BytesMut, FrameError> {
    let Ok(threshold) = usize::try_from(threshold) else {
        return Ok(frame);
    };

    let data_len = read_varint(&mut frame)?;
    if data_len == 0 {
        return Ok(frame);
    }

    let data_len = usize::try_from(data_len).map_err(|_| {
        FrameError::BadCompression(format!("negative data length {data_len}"))
    })?;
    if data_len < threshold {
        return Err(FrameError::BadCompression(format!(
            "data length {data_len} is below threshold {threshold}"
        )));
    }
    if data_len > MAX_UNCOMPRESSED_LEN {
        return Err(FrameError::BadCompression(format!(
            "data length {data_len} exceeds {MAX_UNCOMPRESSED_LEN}"
        )));
    }

    // Read one byte past the declared size so an oversized stream is
    // detected instead of silently truncated.
    let mut out = BytesMut::with_capacity(data_len).writer();
    let mut inflater = ZlibDecoder::new(&frame[..]).take(data_len as u64 + 1);
    let mut chunk = [0u8; 4096];
    loop {
        let n = inflater
            .read(&mut chunk)
            .map_err(|e| FrameError::BadCompression(e.to_string()))?;
        if n == 0 {
            break;
        }
        out.write_all(&chunk[..n])?;
    }
    let body = out.into_inner();

    if body.len() != data_len {
        return Err(FrameError::BadCompression(format!(
            "declared {data_len} bytes, inflated {}",
            body.len()
        )));
    }
    Ok(body)
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = FrameError;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<BytesMut>, FrameError> {
        let (len, prefix) = match peek_varint(src)? {
            Some(found) => found,
            None if src.len() >= MAX_LENGTH_PREFIX => {
                return Err(FrameError::FrameTooLarge(MAX_FRAME_LEN + 1));
            }
            None => return Ok(None),
        };

        let len = usize::try_from(len)
            .map_err(|_| FrameError::NegativeLength(len))?;
        if prefix > MAX_LENGTH_PREFIX || len > MAX_FRAME_LEN {
            return Err(FrameError::FrameTooLarge(len));
        }

        if src.len() < prefix + len {
            src.reserve(prefix + len - src.len());
            return Ok(None);
        }

        src.advance(prefix);
        let frame = src.split_to(len);

        decompress(self.threshold(), frame).map(Some)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(
        &mut self,
        body: Bytes,
        dst: &mut BytesMut,
    ) -> Result<(), FrameError> {
        match self.threshold {
            None => {
                check_frame_len(body.len())?;
                dst.reserve(varint_len(body.len() as i32) + body.len());
                write_varint(dst, body.len() as i32);
                dst.extend_from_slice(&body);
            }
            Some(threshold) if body.len() >= threshold => {
                if body.len() > MAX_UNCOMPRESSED_LEN {
                    return Err(FrameError::FrameTooLarge(body.len()));
                }
                let compressed = self.deflate(&body)?;
                let frame_len =
                    varint_len(body.len() as i32) + compressed.len();
                check_frame_len(frame_len)?;
                dst.reserve(varint_len(frame_len as i32) + frame_len);
                write_varint(dst, frame_len as i32);
                write_varint(dst, body.len() as i32);
                dst.extend_from_slice(&compressed);
            }
            Some(_) => {
                let frame_len = 1 + body.len();
                check_frame_len(frame_len)?;
                dst.reserve(varint_len(frame_len as i32) + frame_len);
                write_varint(dst, frame_len as i32);
                write_varint(dst, 0);
                dst.extend_from_slice(&body);
            }
        }
        Ok(())
    }
}

fn check_frame_len(len: usize) -> Result<(), FrameError> {
    if len > MAX_FRAME_LEN {
        return Err(FrameError::FrameTooLarge(len));
    }
    Ok(())
}
