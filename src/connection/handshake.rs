//! Greeting parsing and the CHAP-SHA1 authentication handshake.

use crate::error::{Error, Result};
use sha1::{Digest, Sha1};

pub const GREETING_LEN: usize = 128;
const BANNER_LEN: usize = 64;
const SALT_LINE_LEN: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

pub struct Greeting {
    pub version: Option<ServerVersion>,
    pub salt: [u8; 20],
}

/// Parses the 128-byte greeting: a 64-byte ASCII banner followed by a
/// 64-byte line carrying the base64-encoded salt.
pub fn parse_greeting(bytes: &[u8; GREETING_LEN]) -> Result<Greeting> {
    let banner = std::str::from_utf8(&bytes[..BANNER_LEN]).map_err(|_| Error::BadGreeting)?;
    if !banner.contains("Tarantool") {
        return Err(Error::BadGreeting);
    }
    let version = parse_version(banner);

    let salt_line = std::str::from_utf8(&bytes[BANNER_LEN..BANNER_LEN + SALT_LINE_LEN])
        .map_err(|_| Error::BadGreeting)?
        .trim_end();
    let decoded = base64::decode(salt_line).map_err(|_| Error::BadGreeting)?;
    if decoded.len() < 20 {
        return Err(Error::BadGreeting);
    }
    let mut salt = [0u8; 20];
    salt.copy_from_slice(&decoded[..20]);

    Ok(Greeting { version, salt })
}

/// Parses `Tarantool <major>.<minor>.<patch>` out of the banner line.
fn parse_version(banner: &str) -> Option<ServerVersion> {
    let after = banner.split("Tarantool").nth(1)?;
    let token = after.split_whitespace().next()?;
    let mut parts = token.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts
        .next()
        .and_then(|p| p.split(|c: char| !c.is_ascii_digit()).next())
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);
    Some(ServerVersion { major, minor, patch })
}

/// Computes the CHAP-SHA1 scramble:
/// `SHA1(password) XOR SHA1(salt[..20] || SHA1(SHA1(password)))`.
pub fn scramble(password: &[u8], salt: &[u8; 20]) -> [u8; 20] {
    let hash1 = Sha1::digest(password);
    let hash2 = Sha1::digest(hash1);

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(hash2);
    let hash3 = hasher.finalize();

    let mut scramble = [0u8; 20];
    for i in 0..20 {
        scramble[i] = hash1[i] ^ hash3[i];
    }
    scramble
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_greeting(version_line: &str, salt_b64: &str) -> [u8; GREETING_LEN] {
        let mut bytes = [b' '; GREETING_LEN];
        let line1 = version_line.as_bytes();
        bytes[..line1.len()].copy_from_slice(line1);
        bytes[BANNER_LEN - 1] = b'\n';
        let line2 = salt_b64.as_bytes();
        bytes[BANNER_LEN..BANNER_LEN + line2.len()].copy_from_slice(line2);
        bytes[BANNER_LEN + SALT_LINE_LEN - 1] = b'\n';
        bytes
    }

    #[test]
    fn parses_version_and_salt() {
        let salt = base64::encode([7u8; 32]);
        let greeting_bytes = fixed_greeting("Tarantool 2.10.1 (Binary) abc-uuid", &salt);
        let greeting = parse_greeting(&greeting_bytes).unwrap();
        assert_eq!(
            greeting.version,
            Some(ServerVersion {
                major: 2,
                minor: 10,
                patch: 1
            })
        );
        assert_eq!(greeting.salt, [7u8; 20]);
    }

    #[test]
    fn rejects_non_tarantool_banner() {
        let bytes = fixed_greeting("SomeOtherServer 1.0", &base64::encode([0u8; 32]));
        assert!(parse_greeting(&bytes).is_err());
    }

    #[test]
    fn scramble_is_deterministic() {
        let salt = [1u8; 20];
        let a = scramble(b"secret", &salt);
        let b = scramble(b"secret", &salt);
        assert_eq!(a, b);
        assert_ne!(a, scramble(b"other", &salt));
    }
}
