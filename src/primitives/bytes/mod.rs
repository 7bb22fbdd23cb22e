#![forbid(unsafe_code)]
//! Fixed-width encoders and framing helpers shared by blocks and undo payloads.

pub mod ord {
    //! Order-preserving fixed-width encoders for numeric block payloads.
    //!
    //! Encoded bytes compare lexicographically in the same order as the
    //! values they encode, so a block image can be range-checked without
    //! decoding.

    use core::convert::TryInto;

    const U64_LEN: usize = core::mem::size_of::<u64>();
    const U32_LEN: usize = core::mem::size_of::<u32>();
    const SIGN_BIT: u64 = 1 << 63;
    const SIGN_BIT_32: u32 = 1 << 31;

    /// Big-endian encoding for lexicographic order preservation.
    pub fn put_u64_be(dst: &mut [u8], v: u64) {
        assert!(dst.len() >= U64_LEN, "destination too small");
        dst[..U64_LEN].copy_from_slice(&v.to_be_bytes());
    }

    /// Decodes a u64 from big-endian byte order.
    pub fn get_u64_be(src: &[u8]) -> u64 {
        let head: [u8; U64_LEN] = src
            .get(..U64_LEN)
            .and_then(|head| head.try_into().ok())
            .unwrap_or_else(|| panic!("u64 source shorter than 8 bytes (have {})", src.len()));
        u64::from_be_bytes(head)
    }

    /// Encodes a signed i64 with order preservation (flip sign bit for sorting).
    pub fn put_i64_be(dst: &mut [u8], v: i64) {
        put_u64_be(dst, (v as u64) ^ SIGN_BIT);
    }

    /// Decodes a signed i64 with order preservation.
    pub fn get_i64_be(src: &[u8]) -> i64 {
        (get_u64_be(src) ^ SIGN_BIT) as i64
    }

    /// Encodes a signed i32 with order preservation.
    pub fn put_i32_be(dst: &mut [u8], v: i32) {
        assert!(dst.len() >= U32_LEN, "destination too small");
        let flipped = (v as u32) ^ SIGN_BIT_32;
        dst[..U32_LEN].copy_from_slice(&flipped.to_be_bytes());
    }

    /// Decodes a signed i32 with order preservation.
    pub fn get_i32_be(src: &[u8]) -> i32 {
        let head: [u8; U32_LEN] = src
            .get(..U32_LEN)
            .and_then(|head| head.try_into().ok())
            .unwrap_or_else(|| panic!("i32 source shorter than 4 bytes (have {})", src.len()));
        (u32::from_be_bytes(head) ^ SIGN_BIT_32) as i32
    }

    /// Encodes an f64 with order preservation.
    ///
    /// NaN payloads are stored bit-exact and sort above positive infinity.
    pub fn put_f64_be(dst: &mut [u8], v: f64) {
        put_u64_be(dst, encode_f64_bits(v));
    }

    /// Decodes an f64 with order preservation.
    pub fn get_f64_be(src: &[u8]) -> f64 {
        f64::from_bits(decode_f64_bits(get_u64_be(src)))
    }

    fn encode_f64_bits(v: f64) -> u64 {
        let bits = v.to_bits();
        if bits & SIGN_BIT != 0 {
            !bits
        } else {
            bits ^ SIGN_BIT
        }
    }

    fn decode_f64_bits(encoded: u64) -> u64 {
        if encoded & SIGN_BIT != 0 {
            encoded ^ SIGN_BIT
        } else {
            !encoded
        }
    }
}

pub mod frame {
    //! Length-prefixed blobs: a big-endian `u64` byte count followed by the body.

    use super::ord;
    use crate::types::{Result, StratumError};

    /// Size of the length prefix in bytes.
    pub const PREFIX_LEN: usize = core::mem::size_of::<u64>();

    /// Appends `body` to `dst` behind its length prefix.
    pub fn put(dst: &mut Vec<u8>, body: &[u8]) {
        let mut prefix = [0u8; PREFIX_LEN];
        ord::put_u64_be(&mut prefix, body.len() as u64);
        dst.extend_from_slice(&prefix);
        dst.extend_from_slice(body);
    }

    /// Splits one framed blob off the front of `src`.
    ///
    /// Returns the body and the total number of bytes consumed.
    pub fn split(src: &[u8]) -> Result<(&[u8], usize)> {
        if src.len() < PREFIX_LEN {
            return Err(StratumError::Corruption("frame shorter than length prefix"));
        }
        let len = usize::try_from(ord::get_u64_be(src))
            .map_err(|_| StratumError::Corruption("frame length overflows usize"))?;
        let end = PREFIX_LEN
            .checked_add(len)
            .ok_or(StratumError::Corruption("frame length overflows usize"))?;
        let body = src
            .get(PREFIX_LEN..end)
            .ok_or(StratumError::Corruption("frame body truncated"))?;
        Ok((body, end))
    }
}
