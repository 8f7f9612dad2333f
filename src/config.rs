//! The plaintext configuration format: one account per line, either a
//! `name:secret` pair or a full `otpauth://` URL. Blank lines are ignored.
//!
//! ```text
//! github:JBSWY3DPEHPK3PXP
//! otpauth://totp/Example:alice%40example.com?secret=JBSWY3DPEHPK3PXP&issuer=Example
//! ```

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

use tracing::debug;

use crate::otpauth::{decode_url, Account};
use crate::UrlError;

/// Environment variable overriding the configuration path.
pub const CONFIG_ENV: &str = "GAUTH_CONFIG";

const URL_PREFIX: &str = "otpauth://";

/// A line of the configuration could not be understood. Lines are 1-indexed
/// and blank lines count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A shorthand line without a colon, or with nothing before it.
    MalformedLine { line: usize },
    InvalidUrl { line: usize, source: UrlError },
}

impl ParseError {
    pub fn line(&self) -> usize {
        match self {
            ParseError::MalformedLine { line } | ParseError::InvalidUrl { line, .. } => *line,
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::InvalidUrl { source, .. } => Some(source),
            ParseError::MalformedLine { .. } => None,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::MalformedLine { line } => {
                write!(f, "line {}: expected name:secret or an otpauth:// URL", line)
            }
            ParseError::InvalidUrl { line, source } => write!(f, "line {}: {}", line, source),
        }
    }
}

pub(crate) fn parse_line(line: &str, number: usize) -> Result<Account, ParseError> {
    if line.starts_with(URL_PREFIX) {
        return decode_url(line).map_err(|source| ParseError::InvalidUrl {
            line: number,
            source,
        });
    }
    match line.split_once(':') {
        Some((name, secret)) if !name.trim().is_empty() => {
            Ok(Account::new(name.trim(), secret.trim()))
        }
        _ => Err(ParseError::MalformedLine { line: number }),
    }
}

/// Parse decrypted configuration bytes into accounts, in file order.
///
/// Invalid UTF-8 is replaced rather than rejected; secrets are not decoded
/// here, so a bad secret only shows up when codes are computed.
///
/// # Errors
///
/// Stops at the first line that is neither shorthand nor a valid URL.
pub fn parse(data: &[u8]) -> Result<Vec<Account>, ParseError> {
    let text = String::from_utf8_lossy(data);
    let mut accounts = Vec::new();
    for (i, line) in text.split('\n').enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        accounts.push(parse_line(line, i + 1)?);
    }
    debug!(accounts = accounts.len(), "parsed config");
    Ok(accounts)
}

fn resolve_path(env: Option<OsString>, home: Option<PathBuf>) -> io::Result<PathBuf> {
    match env {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => home
            .map(|home| home.join(".config").join("gauth.csv"))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no home directory to look for a config in, set {}", CONFIG_ENV),
                )
            }),
    }
}

/// Location of the configuration file: `$GAUTH_CONFIG` when set and
/// non-empty, `~/.config/gauth.csv` otherwise.
pub fn config_path() -> io::Result<PathBuf> {
    resolve_path(std::env::var_os(CONFIG_ENV), dirs::home_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shorthand_and_urls() {
        let accounts = parse(include_bytes!("../testdata/plaintext.csv")).unwrap();
        assert_eq!(accounts.len(), 2);

        assert_eq!(accounts[0], Account::new("github", "ABCDEFGH"));

        assert_eq!(accounts[1].issuer.as_deref(), Some("Example"));
        assert_eq!(accounts[1].account_name, "alice@example.com");
        assert_eq!(accounts[1].raw_secret, "JBSWY3DPEHPK3PXP");
        assert_eq!(accounts[1].otp_type, "totp");
    }

    #[test]
    fn trims_and_skips_blank_lines() {
        let data = b"\n  \t\r\n  work : abcd efgh \r\n\n\nhome:MZXW6\n";
        let accounts = parse(data).unwrap();
        assert_eq!(
            accounts,
            vec![
                Account::new("work", "abcd efgh"),
                Account::new("home", "MZXW6")
            ]
        );
    }

    #[test]
    fn splits_on_first_colon() {
        let accounts = parse(b"a:b:c").unwrap();
        assert_eq!(accounts[0].account_name, "a");
        assert_eq!(accounts[0].raw_secret, "b:c");
    }

    #[test]
    fn keeps_duplicates_in_order() {
        let accounts = parse(b"x:AAAA\ny:BBBB\nx:CCCC").unwrap();
        let names: Vec<_> = accounts.iter().map(|a| a.account_name.as_str()).collect();
        assert_eq!(names, ["x", "y", "x"]);
    }

    #[test]
    fn empty_input() {
        assert!(parse(b"").unwrap().is_empty());
        assert!(parse(b"\n\n  \n").unwrap().is_empty());
    }

    #[test]
    fn malformed_line_counts_blank_lines() {
        let err = parse(b"a:AAAA\n\n\nnocolon\nb:BBBB").unwrap_err();
        assert_eq!(err, ParseError::MalformedLine { line: 4 });
        assert_eq!(err.line(), 4);
        assert_eq!(
            err.to_string(),
            "line 4: expected name:secret or an otpauth:// URL"
        );
    }

    #[test]
    fn empty_name_is_malformed() {
        assert_eq!(
            parse(b"  :ABCDEFGH").unwrap_err(),
            ParseError::MalformedLine { line: 1 }
        );
    }

    #[test]
    fn invalid_url_carries_line() {
        let err = parse(b"a:AAAA\notpauth://totp/x?foo=bar").unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidUrl {
                line: 2,
                source: UrlError::UnknownParameter("foo".to_string()),
            }
        );
        assert_eq!(err.to_string(), "line 2: Unknown parameter \"foo\"");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn secrets_are_not_validated() {
        let accounts = parse(b"bad:blargh!").unwrap();
        assert!(accounts[0].secret().is_err());
    }

    #[test]
    fn path_from_env() {
        let path = resolve_path(Some("/tmp/x.csv".into()), Some("/home/u".into())).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/x.csv"));
    }

    #[test]
    fn path_from_home() {
        let expected = PathBuf::from("/home/u/.config/gauth.csv");
        assert_eq!(resolve_path(None, Some("/home/u".into())).unwrap(), expected);
        assert_eq!(
            resolve_path(Some(OsString::new()), Some("/home/u".into())).unwrap(),
            expected
        );
    }

    #[test]
    fn path_without_home() {
        let err = resolve_path(None, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
