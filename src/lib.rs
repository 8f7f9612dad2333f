//! This library computes the one-time codes of a Google Authenticator style
//! secrets file: HOTP ([rfc-4226](https://tools.ietf.org/html/rfc4226)) and
//! TOTP ([rfc-6238](https://tools.ietf.org/html/rfc6238)) codes, the
//! `name:secret` / `otpauth://` configuration format, and the openssl
//! compatible `Salted__` encryption the file may be stored with.
//!
//! Be aware that some authenticator apps will accept the `SHA256`
//! and `SHA512` algorithms but silently fallback to `SHA1`, so the codes shown
//! here may disagree with the app for such accounts.
//!
//! # Examples
//!
//! ```rust
//! use gauth::{codes_at_time_step, config, hotp, secret, Algorithm};
//!
//! let key = secret::decode("ABCDEFGH").unwrap();
//! assert_eq!(hotp(&key, 51790421, Algorithm::SHA1, 6), "305441");
//!
//! let accounts = config::parse(b"github:ABCDEFGH\n").unwrap();
//! let codes = codes_at_time_step(&accounts[0], 51790421).unwrap();
//! assert_eq!(codes.curr, "305441");
//! ```
//!
//! ```rust,no_run
//! use gauth::{config, Session};
//!
//! let path = config::config_path().unwrap();
//! let mut session = Session::new(path, || {
//!     rpassword::prompt_password("Encryption password: ").map(String::into_bytes)
//! });
//! for account in session.accounts().unwrap() {
//!     let codes = gauth::codes(account).unwrap();
//!     println!("{}\t{}", account.account_name, codes.curr);
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod otpauth;
pub mod secret;
mod session;
mod url_error;

pub use config::ParseError;
pub use crypto::CryptoError;
pub use otpauth::{decode_url, encode_url, Account};
pub use secret::{Secret, SecretParseError};
pub use session::{PasswordSource, Session, SessionError};
pub use url_error::UrlError;

#[cfg(feature = "serde_support")]
use serde::{Deserialize, Serialize};

use core::fmt;
use std::str::FromStr;

use hmac::Mac;
use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};

pub use otpauth::{DEFAULT_DIGITS, DEFAULT_PERIOD};

/// Widest code [codes_at_time_step] produces: a truncated value has 31 bits.
pub const MAX_DIGITS: usize = 10;

type HmacSha1 = hmac::Hmac<sha1::Sha1>;
type HmacSha256 = hmac::Hmac<sha2::Sha256>;
type HmacSha512 = hmac::Hmac<sha2::Sha512>;

/// Algorithm enum holds the three standards algorithms for TOTP as per the [reference implementation](https://tools.ietf.org/html/rfc6238#appendix-A)
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub enum Algorithm {
    #[default]
    SHA1,
    SHA256,
    SHA512,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::SHA1 => f.write_str("SHA1"),
            Algorithm::SHA256 => f.write_str("SHA256"),
            Algorithm::SHA512 => f.write_str("SHA512"),
        }
    }
}

impl FromStr for Algorithm {
    type Err = OtpError;

    /// Case-insensitive. An empty name means the default, SHA1.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "" | "SHA1" => Ok(Algorithm::SHA1),
            "SHA256" => Ok(Algorithm::SHA256),
            "SHA512" => Ok(Algorithm::SHA512),
            _ => Err(OtpError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl Algorithm {
    fn hash<D>(mut digest: D, data: &[u8]) -> Vec<u8>
    where
        D: Mac,
    {
        digest.update(data);
        digest.finalize().into_bytes().to_vec()
    }

    fn sign(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        const ANY_KEY: &str = "HMAC can take a key of any size";
        match self {
            Algorithm::SHA1 => Algorithm::hash(HmacSha1::new_from_slice(key).expect(ANY_KEY), data),
            Algorithm::SHA256 => {
                Algorithm::hash(HmacSha256::new_from_slice(key).expect(ANY_KEY), data)
            }
            Algorithm::SHA512 => {
                Algorithm::hash(HmacSha512::new_from_slice(key).expect(ANY_KEY), data)
            }
        }
    }
}

/// Why codes could not be produced for an account.
#[derive(Debug)]
pub enum OtpError {
    /// Only `totp` accounts get a previous/current/next preview.
    UnsupportedType(String),
    /// Hash other than SHA1, SHA256 or SHA512.
    UnsupportedAlgorithm(String),
    /// More digits than a 31-bit truncated value can fill, see [MAX_DIGITS].
    InvalidDigits(usize),
    InvalidSecret(SecretParseError),
    /// The system clock reads before the Unix epoch.
    Clock(SystemTimeError),
}

impl std::error::Error for OtpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OtpError::InvalidSecret(e) => Some(e),
            OtpError::Clock(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for OtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtpError::UnsupportedType(otp_type) => write!(f, "unsupported type: {:?}", otp_type),
            OtpError::UnsupportedAlgorithm(algorithm) => {
                write!(f, "unsupported algorithm: {:?}", algorithm)
            }
            OtpError::InvalidDigits(digits) => {
                write!(f, "{} digits requested, at most {} are supported", digits, MAX_DIGITS)
            }
            OtpError::InvalidSecret(e) => write!(f, "invalid secret: {}", e),
            OtpError::Clock(e) => write!(f, "system clock error: {}", e),
        }
    }
}

impl From<SecretParseError> for OtpError {
    fn from(e: SecretParseError) -> Self {
        OtpError::InvalidSecret(e)
    }
}

impl From<SystemTimeError> for OtpError {
    fn from(e: SystemTimeError) -> Self {
        OtpError::Clock(e)
    }
}

fn system_time() -> Result<u64, SystemTimeError> {
    let t = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    Ok(t)
}

fn effective_period(period: u64) -> u64 {
    if period == 0 {
        DEFAULT_PERIOD
    } else {
        period
    }
}

/// Dynamic truncation of [rfc-4226](https://tools.ietf.org/html/rfc4226#section-5.3):
/// the low nibble of the last byte picks 4 bytes, read as a big-endian 31-bit number.
///
/// The same truncation applies whatever the digest length, as long as it is
/// one of the 20, 32 or 64 bytes HMAC digests produced by [Algorithm].
fn truncate(digest: &[u8]) -> u32 {
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | (digest[offset + 3] as u32)
}

/// HOTP code of `key` for `counter`, left-padded with zeros to `digits`
/// characters. `digits == 0` means the default of 6. Past [MAX_DIGITS] the
/// code only gains leading zeros.
///
/// ```
/// use gauth::{hotp, Algorithm};
///
/// assert_eq!(hotp(b"12345678901234567890", 0, Algorithm::SHA1, 6), "755224");
/// assert_eq!(hotp(b"12345678901234567890", 0, Algorithm::SHA1, 0), "755224");
/// ```
pub fn hotp(key: &[u8], counter: u64, algorithm: Algorithm, digits: usize) -> String {
    let digits = if digits == 0 { DEFAULT_DIGITS } else { digits };
    let code = truncate(&algorithm.sign(key, &counter.to_be_bytes())) as u64;
    // Past 9 digits the modulus exceeds any 31-bit value.
    let code = match u32::try_from(digits).ok().and_then(|d| 10_u64.checked_pow(d)) {
        Some(modulus) => code % modulus,
        None => code,
    }
    .to_string();
    "0".repeat(digits.saturating_sub(code.len())) + &code
}

/// TOTP code of `key` for the given time step, which is the HOTP code with
/// the step as counter. See [time_step_at].
pub fn totp(key: &[u8], time_step: u64, algorithm: Algorithm, digits: usize) -> String {
    hotp(key, time_step, algorithm, digits)
}

/// Number of whole `period`-second steps since the epoch at `unix_seconds`.
/// A zero period means the default of 30 seconds.
pub fn time_step_at(unix_seconds: u64, period: u64) -> u64 {
    unix_seconds / effective_period(period)
}

/// Seconds left in the step running at `unix_seconds`.
pub fn remaining(unix_seconds: u64, period: u64) -> u64 {
    let period = effective_period(period);
    period - unix_seconds % period
}

/// The current 30-second time step and the seconds elapsed within it.
///
/// This only suits a global indicator: accounts with their own period must
/// use [time_step_at] with it.
pub fn current_time_step_and_elapsed() -> Result<(u64, u64), SystemTimeError> {
    let t = system_time()?;
    Ok((t / DEFAULT_PERIOD, t % DEFAULT_PERIOD))
}

/// Codes of the steps around a given one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codes {
    pub prev: String,
    pub curr: String,
    pub next: String,
}

/// Previous, current and next codes of `account` around `time_step`.
///
/// The neighbouring steps wrap around the 64-bit counter, so step 0 has
/// `u64::MAX` as its previous step.
///
/// # Errors
///
/// Fails for accounts that aren't `totp`, for unknown algorithms, for more
/// than [MAX_DIGITS] digits, and for secrets that don't decode.
pub fn codes_at_time_step(account: &Account, time_step: u64) -> Result<Codes, OtpError> {
    if !account.otp_type.eq_ignore_ascii_case("totp") {
        return Err(OtpError::UnsupportedType(account.otp_type.clone()));
    }
    if account.digits > MAX_DIGITS {
        return Err(OtpError::InvalidDigits(account.digits));
    }
    let algorithm: Algorithm = account.algorithm.parse()?;
    let key = account.secret()?;

    Ok(Codes {
        prev: totp(&key, time_step.wrapping_sub(1), algorithm, account.digits),
        curr: totp(&key, time_step, algorithm, account.digits),
        next: totp(&key, time_step.wrapping_add(1), algorithm, account.digits),
    })
}

/// [codes_at_time_step] for the account's own period at `unix_seconds`.
pub fn codes_at(account: &Account, unix_seconds: u64) -> Result<Codes, OtpError> {
    codes_at_time_step(account, time_step_at(unix_seconds, account.period))
}

/// [codes_at_time_step] for the account's own period, according to system time.
pub fn codes(account: &Account) -> Result<Codes, OtpError> {
    let t = system_time()?;
    codes_at(account, t)
}
