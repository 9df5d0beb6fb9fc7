//! Variable length integer codings used by WOFF2: 255UInt16 and UIntBase128

use arrayvec::ArrayVec;
use bytes::{Buf, BufMut};

use crate::error::{Error, bail_if};

const WORD_CODE: u8 = 253;
const ONE_MORE_BYTE_CODE2: u8 = 254;
const ONE_MORE_BYTE_CODE1: u8 = 255;
const LOWEST_U_CODE: u16 = 253;

/// Extension methods for reading the WOFF2 variable-length codings off any
/// [`Buf`].
pub(crate) trait BufVariableExt: Buf {
    /// Read a UIntBase128: big-endian base-128 with MSB continuation.
    ///
    /// Leading zero bytes (a `0x80` first byte) are invalid, as are values
    /// that exceed `u32::MAX` or span more than 5 bytes.
    fn try_get_base128_u32(&mut self) -> Result<u32, Error> {
        let mut result: u32 = 0;
        for i in 0..5 {
            let code = self.try_get_u8()?;
            bail_if!(i == 0 && code == 0x80, Error::ReservedBitsSet);
            // If any of the top seven bits are set then we're about to overflow.
            bail_if!(result & 0xFE00_0000 != 0, Error::VarIntOverflow);
            result = (result << 7) | u32::from(code & 0x7F);
            if code & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(Error::VarIntOverflow)
    }

    /// Read a 255UInt16.
    ///
    /// Based on section 6.1.1 of the MicroType Express draft spec. The coding
    /// is ambiguous (506 has three encodings); all of them are accepted.
    fn try_get_255_u16(&mut self) -> Result<u16, Error> {
        let code = self.try_get_u8()?;
        let value = match code {
            WORD_CODE => self.try_get_u16()?,
            ONE_MORE_BYTE_CODE1 => u16::from(self.try_get_u8()?) + LOWEST_U_CODE,
            ONE_MORE_BYTE_CODE2 => u16::from(self.try_get_u8()?) + LOWEST_U_CODE * 2,
            _ => u16::from(code),
        };
        Ok(value)
    }

    /// Copy `count` bytes from this buffer into `dst`.
    fn try_read_bytes_into(&mut self, count: usize, dst: &mut impl BufMut) -> Result<(), Error> {
        bail_if!(self.remaining() < count, Error::TruncatedInput);
        let mut remaining = count;
        while remaining > 0 {
            let chunk = self.chunk();
            let n = chunk.len().min(remaining);
            dst.put_slice(&chunk[..n]);
            self.advance(n);
            remaining -= n;
        }
        Ok(())
    }
}

impl<B: Buf + ?Sized> BufVariableExt for B {}

/// Number of bytes `pack_base128` emits for `n`.
pub fn base128_size(n: u32) -> usize {
    let mut n = n >> 7;
    let mut size = 1;
    while n > 0 {
        n >>= 7;
        size += 1;
    }
    size
}

/// Encode `n` as a UIntBase128 using the minimum number of bytes.
pub fn pack_base128(n: u32) -> ArrayVec<u8, 5> {
    let size = base128_size(n);
    let mut packed: ArrayVec<u8, 5> = ArrayVec::new();
    for i in 0..size {
        let mut b = ((n >> (7 * (size - i - 1))) & 0x7F) as u8;
        if i < size - 1 {
            b |= 0x80;
        }
        packed.push(b);
    }
    packed
}

/// Encode `n` in the canonical 255UInt16 form: a bare byte below 253,
/// otherwise the 253 escape followed by a big-endian u16.
pub fn pack_255_u16(n: u16) -> ArrayVec<u8, 3> {
    let mut packed: ArrayVec<u8, 3> = ArrayVec::new();
    if n < u16::from(WORD_CODE) {
        packed.push(n as u8);
    } else {
        packed.push(WORD_CODE);
        packed.push((n >> 8) as u8);
        packed.push((n & 0xFF) as u8);
    }
    packed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unpack_base128(bytes: &[u8]) -> Result<u32, Error> {
        let mut buf = bytes;
        buf.try_get_base128_u32()
    }

    fn unpack_255_u16(bytes: &[u8]) -> Result<u16, Error> {
        let mut buf = bytes;
        buf.try_get_255_u16()
    }

    #[test]
    fn base128_zero() {
        assert_eq!(pack_base128(0).as_slice(), &[0x00]);
        assert_eq!(unpack_base128(&[0x00]).unwrap(), 0);
    }

    #[test]
    fn base128_max() {
        assert_eq!(
            unpack_base128(&[0x8F, 0xFF, 0xFF, 0xFF, 0x7F]).unwrap(),
            4_294_967_295
        );
    }

    #[test]
    fn base128_overflow() {
        assert!(matches!(
            unpack_base128(&[0x90, 0x80, 0x80, 0x80, 0x00]),
            Err(Error::VarIntOverflow)
        ));
        // More than 5 bytes of continuation.
        assert!(matches!(
            unpack_base128(&[0x81, 0x80, 0x80, 0x80, 0x80, 0x00]),
            Err(Error::VarIntOverflow)
        ));
    }

    #[test]
    fn base128_leading_zero_byte() {
        assert!(matches!(
            unpack_base128(&[0x80, 0x3F]),
            Err(Error::ReservedBitsSet)
        ));
    }

    #[test]
    fn base128_roundtrip() {
        for n in [0, 1, 127, 128, 16_383, 16_384, 2_097_151, u32::MAX] {
            let packed = pack_base128(n);
            assert_eq!(packed.len(), base128_size(n));
            assert_eq!(unpack_base128(&packed).unwrap(), n);
        }
    }

    #[test]
    fn u255_all_escapes_of_506() {
        assert_eq!(unpack_255_u16(&[0xFC]).unwrap(), 252);
        assert_eq!(unpack_255_u16(&[0xFE, 0x00]).unwrap(), 506);
        assert_eq!(unpack_255_u16(&[0xFF, 0xFD]).unwrap(), 506);
        assert_eq!(unpack_255_u16(&[0xFD, 0x01, 0xFA]).unwrap(), 506);
    }

    #[test]
    fn u255_canonical_encoder() {
        assert_eq!(pack_255_u16(252).as_slice(), &[252]);
        assert_eq!(pack_255_u16(253).as_slice(), &[253, 0, 253]);
        assert_eq!(pack_255_u16(506).as_slice(), &[253, 1, 250]);
        assert_eq!(pack_255_u16(65535).as_slice(), &[253, 255, 255]);
    }

    #[test]
    fn u255_roundtrip() {
        for n in [0u16, 1, 252, 253, 505, 506, 507, 761, 762, 5000, 65535] {
            assert_eq!(unpack_255_u16(&pack_255_u16(n)).unwrap(), n);
        }
    }
}
