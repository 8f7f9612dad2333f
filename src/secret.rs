//! Shared secrets, either "raw" key bytes or a base32 encoded string as found in
//! configuration files and otpauth URLs.
//!
//! Encoded secrets are forgiving: case is ignored, whitespace anywhere in the
//! string is dropped, and the `=` padding may be omitted.
//!
//! # Examples
//!
//! ```
//! use gauth::secret;
//!
//! assert_eq!(secret::normalize("abcd efgh ij"), "ABCDEFGHIJ======");
//! assert_eq!(secret::decode("mzxw 6ytb").unwrap(), b"fooba".to_vec());
//! assert!(secret::decode("blargh!").is_err());
//! ```
//!
//! ```
//! use gauth::Secret;
//!
//! let raw = Secret::Raw(b"Hello!\xde\xad\xbe\xef".to_vec());
//! let encoded = Secret::Encoded("jbsw y3dp ehpk 3pxp".to_string());
//! assert_eq!(raw, encoded);
//! assert_eq!(raw.to_encoded().to_string(), "JBSWY3DPEHPK3PXP");
//! ```

use base32::{self, Alphabet};

use constant_time_eq::constant_time_eq;

const BASE32_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
const BLOCK: usize = 8;

/// Different ways secret parsing failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretParseError {
    /// A character outside of the RFC 4648 base32 alphabet.
    InvalidCharacter(char),
    /// The number of significant characters can't be produced by base32.
    InvalidLength(usize),
    /// The secret decodes to zero bytes, which can't key an HMAC.
    Empty,
}

impl std::error::Error for SecretParseError {}

impl std::fmt::Display for SecretParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretParseError::InvalidCharacter(c) => {
                write!(f, "Could not decode base32 secret: illegal character {:?}", c)
            }
            SecretParseError::InvalidLength(len) => write!(
                f,
                "Could not decode base32 secret: {} characters is not a valid length",
                len
            ),
            SecretParseError::Empty => write!(f, "Secret is empty"),
        }
    }
}

/// Upper-case `secret`, strip every whitespace character and pad it with `=`
/// up to the next multiple of 8 characters.
pub fn normalize(secret: &str) -> String {
    let mut clean: String = secret
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let rem = clean.len() % BLOCK;
    if rem != 0 {
        clean.push_str(&"========"[..BLOCK - rem]);
    }
    clean
}

/// Decode a base32 secret into raw key bytes, after [normalize]-ing it.
///
/// # Errors
///
/// Fails when the cleaned string holds anything but base32 digits followed by
/// trailing padding, when the final group has a length base32 can't produce,
/// or when nothing is left to decode.
pub fn decode(secret: &str) -> Result<Vec<u8>, SecretParseError> {
    let clean = normalize(secret);
    let data = clean.trim_end_matches('=');

    if let Some(c) = data.chars().find(|c| !BASE32_ALPHABET.contains(*c)) {
        return Err(SecretParseError::InvalidCharacter(c));
    }
    // More padding than a single group can carry means `=` showed up mid-string.
    if clean.len() - data.len() >= BLOCK {
        return Err(SecretParseError::InvalidLength(data.len()));
    }
    // A trailing group of 1, 3 or 6 characters doesn't map onto whole bytes.
    if matches!(data.len() % BLOCK, 1 | 3 | 6) {
        return Err(SecretParseError::InvalidLength(data.len()));
    }

    if data.is_empty() {
        return Err(SecretParseError::Empty);
    }

    base32::decode(Alphabet::Rfc4648 { padding: false }, data)
        .ok_or(SecretParseError::InvalidLength(data.len()))
}

/// Encode raw key bytes as upper-case base32 without padding.
pub fn encode(key: &[u8]) -> String {
    base32::encode(Alphabet::Rfc4648 { padding: false }, key)
}

/// Shared secret between the authenticator and the service.
#[derive(Debug, Clone, Eq)]
pub enum Secret {
    /// Non-encoded "raw" secret.
    Raw(Vec<u8>),
    /// Base32 encoded secret.
    Encoded(String),
}

impl PartialEq for Secret {
    /// Compares decoded bytes, so a Raw and an Encoded secret may be equal.
    /// Secrets that don't decode only equal each other when their normalized
    /// text matches.
    fn eq(&self, other: &Self) -> bool {
        match (self.to_bytes(), other.to_bytes()) {
            (Ok(a), Ok(b)) => constant_time_eq(&a, &b),
            (Err(_), Err(_)) => match (self, other) {
                (Secret::Encoded(a), Secret::Encoded(b)) => normalize(a) == normalize(b),
                _ => false,
            },
            _ => false,
        }
    }
}

impl Secret {
    /// Get the key bytes, decoding base32 if needed.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SecretParseError> {
        match self {
            Secret::Raw(s) if s.is_empty() => Err(SecretParseError::Empty),
            Secret::Raw(s) => Ok(s.to_vec()),
            Secret::Encoded(s) => decode(s),
        }
    }

    /// Try to transform a `Secret::Encoded` into a `Secret::Raw`
    pub fn to_raw(&self) -> Result<Self, SecretParseError> {
        match self {
            Secret::Raw(_) => Ok(self.clone()),
            Secret::Encoded(s) => Ok(Secret::Raw(decode(s)?)),
        }
    }

    /// Transform into the canonical `Secret::Encoded` form: upper-case,
    /// no whitespace and no padding.
    pub fn to_encoded(&self) -> Self {
        match self {
            Secret::Raw(s) => Secret::Encoded(encode(s)),
            Secret::Encoded(s) => Secret::Encoded(normalize(s).trim_end_matches('=').to_string()),
        }
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Secret::Raw(bytes) => {
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Secret::Encoded(s) => write!(f, "{}", s),
        }
    }
}
