//! UUID extension type: 16 raw bytes in RFC-4122 field order.

use crate::error::{Error, Result};
use std::io::Write;
use uuid::Uuid;

pub fn encode(out: &mut impl Write, value: &Uuid) -> Result<()> {
    rmp::encode::write_ext_meta(out, 16, super::EXT_UUID)
        .map_err(|_| Error::Protocol("failed to write uuid ext header"))?;
    out.write_all(value.as_bytes())?;
    Ok(())
}

pub fn decode(payload: &[u8]) -> Result<Uuid> {
    let bytes: [u8; 16] = payload
        .try_into()
        .map_err(|_| Error::Protocol("uuid payload must be exactly 16 bytes"))?;
    Ok(Uuid::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_round_trip() {
        let id = Uuid::new_v4();
        let mut buf = Vec::new();
        encode(&mut buf, &id).unwrap();
        let payload = &buf[buf.len() - 16..];
        assert_eq!(decode(payload).unwrap(), id);
    }
}
