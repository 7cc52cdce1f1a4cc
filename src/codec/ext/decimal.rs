//! DECIMAL extension type: packed-BCD fixed point with a leading scale byte
//! and a trailing sign nibble, round-tripping arbitrary-precision decimals.

use crate::error::{Error, Result};
use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use std::io::{Read, Write};
use std::str::FromStr;

const SIGN_POSITIVE: u8 = 0xc;
const SIGN_POSITIVE_ALT: u8 = 0xa;
const SIGN_NEGATIVE: u8 = 0xd;
const SIGN_NEGATIVE_ALT: u8 = 0xb;

pub fn encode(out: &mut impl Write, value: &BigDecimal) -> Result<()> {
    let (unscaled, exponent) = value.as_bigint_and_exponent();
    // `as_bigint_and_exponent` can return a negative exponent for values
    // whose magnitude is a positive power of ten (e.g. "1e33" is
    // unscaled=1, exponent=-33). Tarantool's packed-BCD scale byte only
    // holds a non-negative digit count, so fold a negative exponent into
    // the unscaled digits instead of rejecting it.
    let (unscaled, scale) = if exponent < 0 {
        let shift = (-exponent) as usize;
        let multiplier = BigInt::from_str(&format!("1{}", "0".repeat(shift))).expect("power-of-ten literal");
        (unscaled * multiplier, 0i64)
    } else {
        (unscaled, exponent)
    };
    let scale: u8 = scale.try_into().map_err(|_| Error::Value("decimal scale out of range".into()))?;

    use num_bigint::Sign;
    let negative = unscaled.sign() == Sign::Minus;
    let digits = unscaled.abs().to_str_radix(10);

    let mut nibbles: Vec<u8> = digits.bytes().map(|b| b - b'0').collect();
    nibbles.push(if negative { SIGN_NEGATIVE } else { SIGN_POSITIVE });
    if nibbles.len() % 2 != 0 {
        nibbles.insert(0, 0);
    }

    let mut bytes = Vec::with_capacity(1 + nibbles.len() / 2);
    bytes.push(scale);
    for pair in nibbles.chunks_exact(2) {
        bytes.push((pair[0] << 4) | pair[1]);
    }

    rmp::encode::write_ext_meta(out, bytes.len() as u32, super::EXT_DECIMAL)
        .map_err(|_| Error::Protocol("failed to write decimal ext header"))?;
    out.write_all(&bytes)?;
    Ok(())
}

pub fn decode(payload: &[u8]) -> Result<BigDecimal> {
    let mut reader = payload;
    let mut scale_buf = [0u8; 1];
    reader
        .read_exact(&mut scale_buf)
        .map_err(|_| Error::Protocol("truncated decimal payload"))?;
    let scale = scale_buf[0] as i64;

    let mut nibbles = Vec::with_capacity((payload.len() - 1) * 2);
    for &byte in reader {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    let sign_nibble = *nibbles.last().ok_or(Error::Protocol("empty decimal payload"))?;
    let negative = match sign_nibble {
        SIGN_NEGATIVE | SIGN_NEGATIVE_ALT => true,
        SIGN_POSITIVE | SIGN_POSITIVE_ALT => false,
        _ => return Err(Error::Protocol("invalid decimal sign nibble")),
    };
    let digit_nibbles = &nibbles[..nibbles.len() - 1];

    let mut digits = String::with_capacity(digit_nibbles.len());
    for (i, &nibble) in digit_nibbles.iter().enumerate() {
        if i == 0 && nibble == 0 && digit_nibbles.len() > 1 {
            continue; // drop the padding nibble inserted to byte-align.
        }
        digits.push((b'0' + nibble) as char);
    }
    if digits.is_empty() {
        digits.push('0');
    }

    let text = format!("{}{}E-{}", if negative { "-" } else { "" }, digits, scale);
    use std::str::FromStr;
    BigDecimal::from_str(&text).map_err(|_| Error::Protocol("decimal payload did not parse"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn roundtrip(s: &str) {
        let value = BigDecimal::from_str(s).unwrap();
        let mut buf = Vec::new();
        encode(&mut buf, &value).unwrap();
        // Strip the ext header (type + length prefix) that rmp prepended.
        let mut cursor = std::io::Cursor::new(&buf[..]);
        let meta = rmp::decode::read_ext_meta(&mut cursor).unwrap();
        let payload = &buf[buf.len() - meta.size as usize..];
        let decoded = decode(payload).unwrap();
        assert_eq!(decoded, value, "round trip of {s}");
    }

    #[test]
    fn decimal_round_trip() {
        roundtrip("-12.345");
        roundtrip("0.000");
        roundtrip("1");
        roundtrip("99999999999999999999999999999999999999");
        roundtrip("1e33");
    }
}
