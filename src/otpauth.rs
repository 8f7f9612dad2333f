//! The `otpauth://TYPE/LABEL?PARAMETERS` URL format used to exchange OTP
//! parameters, as popularised by Google Authenticator.
//!
//! Decoding is strict about syntax (unknown parameters and non-numeric values
//! are rejected) but does not validate the type or algorithm names: those are
//! only checked when codes are generated. Percent-escapes that don't form
//! valid UTF-8 are decoded lossily.
//!
//! Encoding leaves `@`, `$` and `+` readable like a path-segment escape would,
//! but still escapes `&`, `=` and `?` so query values decode back unchanged.
//!
//! ```
//! use gauth::otpauth::{decode_url, encode_url};
//!
//! let account = decode_url("otpauth://totp/Example:alice%40example.com?secret=JBSWY3DPEHPK3PXP")
//!     .unwrap();
//! assert_eq!(account.issuer.as_deref(), Some("Example"));
//! assert_eq!(account.account_name, "alice@example.com");
//! assert_eq!(account.digits, 6);
//! assert_eq!(
//!     encode_url(&account),
//!     "otpauth://totp/Example:alice@example.com?issuer=Example&secret=JBSWY3DPEHPK3PXP"
//! );
//! ```

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde_support")]
use serde::{Deserialize, Serialize};

use crate::secret::{self, SecretParseError};
use crate::UrlError;

pub const DEFAULT_TYPE: &str = "totp";
pub const DEFAULT_ALGORITHM: &str = "SHA1";
pub const DEFAULT_DIGITS: usize = 6;
pub const DEFAULT_PERIOD: u64 = 30;

const SCHEME: &str = "otpauth";

/// Percent-escape everything but unreserved characters and `@$+`.
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || b"-_.~@$+".contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// Undo percent-escapes. `None` when a `%` isn't followed by two hex digits.
fn unescape(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let malformed = bytes.iter().enumerate().any(|(i, &b)| {
        b == b'%'
            && !matches!(
                bytes.get(i + 1..i + 3),
                Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit()
            )
    });
    if malformed {
        return None;
    }
    Some(String::from_utf8_lossy(&urlencoding::decode_binary(bytes)).into_owned())
}

/// One account's OTP parameters, as found on a configuration line.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub struct Account {
    /// Lower-cased, `totp` or `hotp`. Anything else is kept as-is and refused
    /// when generating codes.
    pub otp_type: String,
    /// The "Github" part of "Github:alice@example.com".
    pub issuer: Option<String>,
    /// The "alice@example.com" part of "Github:alice@example.com". Never empty once decoded.
    pub account_name: String,
    /// Base32 key as written by the user, see [secret::decode].
    pub raw_secret: String,
    /// Upper-cased hash name, `SHA1` unless stated otherwise.
    pub algorithm: String,
    pub digits: usize,
    /// Step length in seconds, TOTP only.
    pub period: u64,
    /// Moving factor, HOTP only.
    pub counter: u64,
}

impl Default for Account {
    fn default() -> Self {
        Account {
            otp_type: DEFAULT_TYPE.to_string(),
            issuer: None,
            account_name: String::new(),
            raw_secret: String::new(),
            algorithm: DEFAULT_ALGORITHM.to_string(),
            digits: DEFAULT_DIGITS,
            period: DEFAULT_PERIOD,
            counter: 0,
        }
    }
}

impl Account {
    /// A TOTP account with every optional parameter at its default, which is
    /// what a `name:secret` configuration line describes.
    pub fn new(account_name: impl Into<String>, raw_secret: impl Into<String>) -> Self {
        Account {
            account_name: account_name.into(),
            raw_secret: raw_secret.into(),
            ..Default::default()
        }
    }

    /// Decode [raw_secret](Account::raw_secret) into key bytes.
    pub fn secret(&self) -> Result<Vec<u8>, SecretParseError> {
        secret::decode(&self.raw_secret)
    }

    /// Store `key` as unpadded base32.
    pub fn set_secret(&mut self, key: &[u8]) {
        self.raw_secret = secret::encode(key);
    }

    /// `issuer:account_name`, or just the account name without an issuer.
    pub fn label(&self) -> String {
        match self.issuer.as_deref() {
            Some(issuer) if !issuer.is_empty() => format!("{}:{}", issuer, self.account_name),
            _ => self.account_name.clone(),
        }
    }

    fn parse_label(&mut self, label: &str) -> Result<(), UrlError> {
        let decoded =
            unescape(label).ok_or_else(|| UrlError::LabelDecoding(label.to_string()))?;
        let name = match decoded.split_once(':') {
            Some((issuer, name)) => {
                let issuer = issuer.trim();
                if issuer.is_empty() {
                    return Err(UrlError::EmptyIssuer);
                }
                self.issuer = Some(issuer.to_string());
                name
            }
            None => decoded.as_str(),
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(UrlError::EmptyAccount);
        }
        self.account_name = name.to_string();
        Ok(())
    }

    fn label_string(&self) -> String {
        let account_name = escape(&self.account_name);
        match self.issuer.as_deref() {
            Some(issuer) if !issuer.is_empty() => format!("{}:{}", escape(issuer), account_name),
            _ => account_name,
        }
    }
}

fn parse_number<N: FromStr>(name: &str, value: &str) -> Result<N, UrlError> {
    value
        .parse::<N>()
        .map_err(|_| UrlError::InvalidParameter(name.to_string(), value.to_string()))
}

/// Parse `s` as an otpauth URL.
///
/// The `otpauth://` prefix may be omitted, but any other scheme is refused.
/// Parameters that aren't given keep their defaults. An `issuer` parameter
/// takes priority over an issuer found in the label.
///
/// # Errors
///
/// Unknown parameter names are reported before a bad numeric value, so
/// `foo=bar` is an [UrlError::UnknownParameter] rather than an
/// [UrlError::InvalidParameter].
pub fn decode_url(s: &str) -> Result<Account, UrlError> {
    let rest = match s.split_once("://") {
        Some((scheme, _)) if scheme != SCHEME => {
            return Err(UrlError::Scheme(scheme.to_string()));
        }
        Some((_, rest)) => rest,
        None => s,
    };

    let (type_label, params) = rest.split_once('?').unwrap_or((rest, ""));

    // The "//" authority marker is optional.
    let trimmed = type_label.strip_prefix("//").unwrap_or(type_label);
    let (otp_type, label) = match trimmed.split_once('/') {
        Some((otp_type, label)) if !otp_type.is_empty() && !label.is_empty() => (otp_type, label),
        _ => return Err(UrlError::TypeLabel(type_label.to_string())),
    };

    let mut account = Account {
        otp_type: otp_type.to_lowercase(),
        ..Default::default()
    };
    account.parse_label(label)?;
    if params.is_empty() {
        return Ok(account);
    }

    for param in params.split('&') {
        let (name, raw) = param.split_once('=').unwrap_or((param, ""));
        let value = unescape(raw).ok_or_else(|| UrlError::ValueDecoding(raw.to_string()))?;

        match name {
            "algorithm" => account.algorithm = value.to_uppercase(),
            "issuer" => account.issuer = Some(value).filter(|issuer| !issuer.is_empty()),
            "secret" => account.raw_secret = value,
            "counter" => account.counter = parse_number(name, &value)?,
            "digits" => account.digits = parse_number(name, &value)?,
            "period" => account.period = parse_number(name, &value)?,
            _ => return Err(UrlError::UnknownParameter(name.to_string())),
        }
    }
    Ok(account)
}

/// Render `account` as an otpauth URL.
///
/// Only values that differ from the defaults are emitted, in a stable order.
/// The secret is upper-cased and loses its whitespace and padding.
pub fn encode_url(account: &Account) -> String {
    let otp_type = account.otp_type.to_lowercase();
    let mut url = format!("{}://{}/{}", SCHEME, otp_type, account.label_string());

    let mut params = Vec::new();
    let algorithm = account.algorithm.to_uppercase();
    if !algorithm.is_empty() && algorithm != DEFAULT_ALGORITHM {
        params.push(format!("algorithm={}", escape(&algorithm)));
    }
    if account.counter > 0 || otp_type == "hotp" {
        params.push(format!("counter={}", account.counter));
    }
    if account.digits > 0 && account.digits != DEFAULT_DIGITS {
        params.push(format!("digits={}", account.digits));
    }
    if let Some(issuer) = account.issuer.as_deref().filter(|i| !i.is_empty()) {
        params.push(format!("issuer={}", escape(issuer)));
    }
    if account.period > 0 && account.period != DEFAULT_PERIOD {
        params.push(format!("period={}", account.period));
    }
    let secret: String = account
        .raw_secret
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .trim_end_matches('=')
        .to_uppercase();
    if !secret.is_empty() {
        params.push(format!("secret={}", escape(&secret)));
    }

    if !params.is_empty() {
        url.push('?');
        url.push_str(&params.join("&"));
    }
    url
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_url(self))
    }
}

impl FromStr for Account {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_url(s)
    }
}
