use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::config::{self, ParseError};
use crate::crypto::{self, CryptoError, StoredConfig};
use crate::otpauth::Account;
use crate::{codes_at_time_step, OtpError};

/// Supplies the password of an encrypted configuration.
///
/// Any `FnMut() -> io::Result<Vec<u8>>` closure is a source, which is how the
/// binary plugs in its terminal prompt.
pub trait PasswordSource {
    fn password(&mut self) -> io::Result<Vec<u8>>;
}

impl<F> PasswordSource for F
where
    F: FnMut() -> io::Result<Vec<u8>>,
{
    fn password(&mut self) -> io::Result<Vec<u8>> {
        self()
    }
}

#[derive(Debug)]
pub enum SessionError {
    Crypto(CryptoError),
    Parse(ParseError),
    /// A new account has a secret no code can be computed from.
    Otp(OtpError),
    /// An account of that name, ignoring case, is already configured.
    DuplicateAccount(String),
}

impl SessionError {
    /// Whether the configuration file doesn't exist yet.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SessionError::Crypto(CryptoError::NotFound(_)))
    }
}

// The wrapping variants are transparent: they display as, and report the
// source of, the error they carry.
impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Crypto(e) => std::error::Error::source(e),
            SessionError::Parse(e) => std::error::Error::source(e),
            SessionError::Otp(e) => std::error::Error::source(e),
            SessionError::DuplicateAccount(_) => None,
        }
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Crypto(e) => std::fmt::Display::fmt(e, f),
            SessionError::Parse(e) => std::fmt::Display::fmt(e, f),
            SessionError::Otp(e) => std::fmt::Display::fmt(e, f),
            SessionError::DuplicateAccount(name) => {
                write!(f, "an account named \"{}\" already exists", name)
            }
        }
    }
}

impl From<CryptoError> for SessionError {
    fn from(e: CryptoError) -> Self {
        SessionError::Crypto(e)
    }
}

impl From<ParseError> for SessionError {
    fn from(e: ParseError) -> Self {
        SessionError::Parse(e)
    }
}

impl From<OtpError> for SessionError {
    fn from(e: OtpError) -> Self {
        SessionError::Otp(e)
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// One invocation's view of the configuration file.
///
/// The file is read, decrypted and parsed at most once, the first time any of
/// it is needed. The password is asked for the first time an encrypted file
/// has to be opened and kept for the rest of the session; a password the file
/// rejects is forgotten, so the next call asks again.
///
/// ```no_run
/// use gauth::Session;
///
/// let mut session = Session::new("/home/me/.config/gauth.csv", || {
///     rpassword::prompt_password("Encryption password: ").map(String::into_bytes)
/// });
/// if let Some(account) = session.find("github").unwrap() {
///     println!("{}", gauth::codes(account).unwrap().curr);
/// }
/// ```
pub struct Session<P> {
    path: PathBuf,
    source: P,
    password: Option<Zeroizing<Vec<u8>>>,
    stored: Option<StoredConfig>,
    plaintext: Option<Zeroizing<Vec<u8>>>,
    accounts: Option<Vec<Account>>,
}

impl<P: PasswordSource> Session<P> {
    pub fn new(path: impl Into<PathBuf>, source: P) -> Self {
        Session {
            path: path.into(),
            source,
            password: None,
            stored: None,
            plaintext: None,
            accounts: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stored(&mut self) -> Result<&StoredConfig, SessionError> {
        let stored = match self.stored.take() {
            Some(stored) => stored,
            None => crypto::read_raw(&self.path)?,
        };
        Ok(self.stored.insert(stored))
    }

    fn password(&mut self) -> Result<Zeroizing<Vec<u8>>, SessionError> {
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }
        debug!(path = %self.path.display(), "asking for the config password");
        let password = Zeroizing::new(self.source.password().map_err(CryptoError::Password)?);
        self.password = Some(password.clone());
        Ok(password)
    }

    fn decrypt_stored(&mut self) -> Result<Zeroizing<Vec<u8>>, SessionError> {
        if !self.stored()?.encrypted {
            return Ok(Zeroizing::new(self.stored()?.data.clone()));
        }
        let password = self.password()?;
        let result = crypto::decrypt(&self.stored()?.data, &password);
        match result {
            Ok(plaintext) => Ok(Zeroizing::new(plaintext)),
            Err(e) => {
                warn!(path = %self.path.display(), "could not decrypt config");
                self.password = None;
                Err(e.into())
            }
        }
    }

    /// Whether the file on disk is encrypted. Never asks for a password.
    pub fn is_encrypted(&mut self) -> Result<bool, SessionError> {
        Ok(self.stored()?.encrypted)
    }

    /// Decrypted bytes of the configuration.
    pub fn contents(&mut self) -> Result<&[u8], SessionError> {
        let plaintext = match self.plaintext.take() {
            Some(plaintext) => plaintext,
            None => self.decrypt_stored()?,
        };
        Ok(self.plaintext.insert(plaintext).as_slice())
    }

    fn contents_or_empty(&mut self) -> Result<Zeroizing<Vec<u8>>, SessionError> {
        match self.contents() {
            Ok(contents) => Ok(Zeroizing::new(contents.to_vec())),
            Err(e) if e.is_not_found() => {
                debug!(path = %self.path.display(), "no config yet, starting an empty one");
                Ok(Zeroizing::new(Vec::new()))
            }
            Err(e) => Err(e),
        }
    }

    /// Configured accounts, in file order.
    pub fn accounts(&mut self) -> Result<&[Account], SessionError> {
        let accounts = match self.accounts.take() {
            Some(accounts) => accounts,
            None => config::parse(self.contents()?)?,
        };
        Ok(self.accounts.insert(accounts).as_slice())
    }

    /// First account whose name matches `name`, ignoring case.
    pub fn find(&mut self, name: &str) -> Result<Option<&Account>, SessionError> {
        Ok(self
            .accounts()?
            .iter()
            .find(|account| same_name(&account.account_name, name)))
    }

    /// Replace the whole configuration with `plaintext`.
    ///
    /// The contents must parse. An encrypted file stays encrypted under the
    /// session's password and salt; this opens the file first if it wasn't,
    /// so a wrong password can't re-key it. A missing file is created in
    /// plaintext.
    pub fn save(&mut self, plaintext: &[u8]) -> Result<(), SessionError> {
        let plaintext = Zeroizing::new(plaintext.to_vec());
        let accounts = config::parse(&plaintext)?;

        let encrypted = match self.stored() {
            Ok(stored) => stored.encrypted,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };
        let password = if encrypted {
            self.contents()?;
            self.password()?
        } else {
            Zeroizing::new(Vec::new())
        };

        crypto::write_config(&self.path, &password, &plaintext)?;
        debug!(path = %self.path.display(), accounts = accounts.len(), "saved config");

        self.stored = None;
        self.plaintext = Some(plaintext);
        self.accounts = Some(accounts);
        Ok(())
    }

    /// Append a `name:secret` line and write the configuration back.
    ///
    /// A missing configuration is created. The new account is returned.
    ///
    /// # Errors
    ///
    /// Refuses a name that is already configured, ignoring case, a name or
    /// secret that wouldn't survive as a single line, and a secret that
    /// can't produce codes. The file is left untouched in every case.
    pub fn add_account(&mut self, name: &str, secret: &str) -> Result<Account, SessionError> {
        let (name, secret) = (name.trim(), secret.trim());
        let mut plaintext = self.contents_or_empty()?;

        if let Some(existing) = config::parse(&plaintext)?
            .into_iter()
            .find(|account| same_name(&account.account_name, name))
        {
            return Err(SessionError::DuplicateAccount(existing.account_name));
        }

        if !plaintext.is_empty() && !plaintext.ends_with(b"\n") {
            plaintext.push(b'\n');
        }
        let number = plaintext.iter().filter(|&&b| b == b'\n').count() + 1;
        if name.contains([':', '\n', '\r']) || secret.contains(['\n', '\r']) {
            return Err(ParseError::MalformedLine { line: number }.into());
        }
        let line = Zeroizing::new(format!("{}:{}", name, secret));
        let account = config::parse_line(&line, number)?;
        codes_at_time_step(&account, 0)?;

        plaintext.extend_from_slice(line.as_bytes());
        plaintext.push(b'\n');
        self.save(&plaintext)?;
        debug!(line = number, "added account");
        Ok(account)
    }

    /// Drop every line configuring `name`, ignoring case, and write the
    /// configuration back. Returns false, without writing, when nothing
    /// matched.
    pub fn remove_account(&mut self, name: &str) -> Result<bool, SessionError> {
        self.accounts()?;
        let text = Zeroizing::new(String::from_utf8_lossy(self.contents()?).into_owned());

        let mut kept = Vec::new();
        let mut removed = 0;
        for (i, line) in text.split('\n').enumerate() {
            let trimmed = line.trim();
            if !trimmed.is_empty()
                && same_name(&config::parse_line(trimmed, i + 1)?.account_name, name)
            {
                removed += 1;
                continue;
            }
            kept.push(line);
        }
        if removed == 0 {
            return Ok(false);
        }

        let remaining = Zeroizing::new(kept.join("\n"));
        self.save(remaining.as_bytes())?;
        debug!(removed, "removed account");
        Ok(true)
    }

    /// Encrypt the configuration with `password`.
    ///
    /// A plaintext file gets a fresh random salt. An encrypted file is opened
    /// with the current password and re-encrypted with the new one under its
    /// existing salt.
    pub fn encrypt_with(&mut self, password: &[u8]) -> Result<(), SessionError> {
        let plaintext = Zeroizing::new(self.contents()?.to_vec());
        crypto::write_encrypted(&self.path, password, &plaintext)?;
        debug!(path = %self.path.display(), "encrypted config");

        self.password = Some(Zeroizing::new(password.to_vec()));
        self.stored = None;
        Ok(())
    }
}
