//! Encryption at rest of the configuration file.
//!
//! The format is the one written by
//! `openssl enc -aes-128-cbc -md sha256 -pass pass:PASSWORD`:
//!
//! ```text
//! "Salted__" | salt (8 bytes) | AES-128-CBC ciphertext, PKCS#7 padded
//! ```
//!
//! Key and IV are the two halves of `SHA-256(password || salt)`. That is a
//! single hash application, not a password hashing function, so the file is
//! only as strong as the password is long and random. Files written here can
//! be read back with `openssl enc -d` and vice versa.
//!
//! A wrong password and a corrupted file can't be told apart: both end up as
//! [CryptoError::InvalidPassword].

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use aes::cipher::generic_array::GenericArray;
use aes::Aes128;
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Marker opening every encrypted file.
pub const MAGIC: &[u8; 8] = b"Salted__";
pub const SALT_LEN: usize = 8;
pub const BLOCK_SIZE: usize = 16;
const HEADER_LEN: usize = MAGIC.len() + SALT_LEN;

pub type Salt = [u8; SALT_LEN];

/// Failures reading, decrypting or writing the configuration file.
#[derive(Debug)]
pub enum CryptoError {
    /// No file at this path. Callers may treat it as an empty configuration.
    NotFound(PathBuf),
    Io(PathBuf, io::Error),
    /// Padding check failed after decryption: wrong password or corrupt file.
    InvalidPassword,
    /// The password could not be obtained.
    Password(io::Error),
}

impl std::error::Error for CryptoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CryptoError::Io(_, e) | CryptoError::Password(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::NotFound(path) => write!(f, "{} does not exist", path.display()),
            CryptoError::Io(path, e) => write!(f, "{}: {}", path.display(), e),
            CryptoError::InvalidPassword => {
                write!(f, "invalid decryption key (wrong password or corrupt file)")
            }
            CryptoError::Password(e) => write!(f, "reading passphrase: {}", e),
        }
    }
}

/// Bytes of the configuration file as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredConfig {
    pub data: Vec<u8>,
    pub encrypted: bool,
}

impl StoredConfig {
    /// Salt of an encrypted file, `None` for plaintext or truncated files.
    pub fn salt(&self) -> Option<Salt> {
        if !self.encrypted {
            return None;
        }
        self.data.get(MAGIC.len()..HEADER_LEN)?.try_into().ok()
    }
}

/// Whether `data` starts with the `Salted__` marker.
pub fn is_encrypted(data: &[u8]) -> bool {
    data.starts_with(MAGIC)
}

/// Read the file at `path` and tell whether it is encrypted.
pub fn read_raw(path: &Path) -> Result<StoredConfig, CryptoError> {
    let data = fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => CryptoError::NotFound(path.to_path_buf()),
        _ => CryptoError::Io(path.to_path_buf(), e),
    })?;
    let encrypted = is_encrypted(&data);
    debug!(path = %path.display(), len = data.len(), encrypted, "read config file");
    Ok(StoredConfig { data, encrypted })
}

/// A fresh salt from the thread-local CSPRNG.
pub fn new_salt() -> Salt {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill(&mut salt[..]);
    salt
}

fn derive_key_iv(password: &[u8], salt: &[u8]) -> (Zeroizing<[u8; 16]>, Zeroizing<[u8; 16]>) {
    let mut digest = Sha256::new().chain_update(password).chain_update(salt).finalize();
    let mut key = Zeroizing::new([0u8; 16]);
    let mut iv = Zeroizing::new([0u8; 16]);
    key.copy_from_slice(&digest[..16]);
    iv.copy_from_slice(&digest[16..]);
    digest.as_mut_slice().zeroize();
    (key, iv)
}

/// Length of `plaintext` once its PKCS#7 padding is removed.
///
/// The last byte `p` must be in `1..=BLOCK_SIZE`, no longer than the text, and
/// the last `p` bytes must all equal `p`.
fn unpadded_len(plaintext: &[u8]) -> Result<usize, CryptoError> {
    let pad = *plaintext.last().ok_or(CryptoError::InvalidPassword)? as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > plaintext.len() {
        return Err(CryptoError::InvalidPassword);
    }
    let start = plaintext.len() - pad;
    if plaintext[start..].iter().any(|&b| b as usize != pad) {
        return Err(CryptoError::InvalidPassword);
    }
    Ok(start)
}

/// Decrypt the contents of an encrypted file.
pub fn decrypt(data: &[u8], password: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < HEADER_LEN || !is_encrypted(data) {
        return Err(CryptoError::InvalidPassword);
    }
    let (salt, ciphertext) = data[MAGIC.len()..].split_at(SALT_LEN);
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidPassword);
    }

    let (key, iv) = derive_key_iv(password, salt);
    let mut plaintext = Aes128CbcDec::new(
        GenericArray::from_slice(&key[..]),
        GenericArray::from_slice(&iv[..]),
    )
    .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
    .map_err(|_| CryptoError::InvalidPassword)?;

    let len = unpadded_len(&plaintext)?;
    plaintext.truncate(len);
    Ok(plaintext)
}

/// Encrypt `plaintext` into the `Salted__` file format.
pub fn encrypt(plaintext: &[u8], password: &[u8], salt: &Salt) -> Vec<u8> {
    let (key, iv) = derive_key_iv(password, salt);
    let ciphertext = Aes128CbcEnc::new(
        GenericArray::from_slice(&key[..]),
        GenericArray::from_slice(&iv[..]),
    )
    .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(salt);
    out.extend_from_slice(&ciphertext);
    out
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies to newly created files.
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

fn write_private(path: &Path, data: &[u8]) -> Result<(), CryptoError> {
    let io_err = |e| CryptoError::Io(path.to_path_buf(), e);
    let mut file = open_private(path).map_err(io_err)?;
    file.write_all(data).map_err(io_err)?;
    file.sync_all().map_err(io_err)
}

/// Salt of the file at `path`, `None` when it is missing or in plaintext.
///
/// A file with the `Salted__` marker but no room for a salt is corrupt, and
/// is refused rather than overwritten.
fn existing_salt(path: &Path) -> Result<Option<Salt>, CryptoError> {
    let stored = match read_raw(path) {
        Ok(stored) => stored,
        Err(CryptoError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    match stored.salt() {
        None if stored.encrypted => {
            warn!(path = %path.display(), "encrypted config too short to hold a salt");
            Err(CryptoError::InvalidPassword)
        }
        salt => Ok(salt),
    }
}

/// Replace the configuration at `path` with `plaintext`, keeping its format.
///
/// A missing or plaintext file is written verbatim and `password` is unused.
/// An encrypted file is re-encrypted with `password` under its existing salt,
/// and one too short to hold a salt is refused with
/// [CryptoError::InvalidPassword]. The file ends up readable and writable by
/// its owner only.
pub fn write_config(path: &Path, password: &[u8], plaintext: &[u8]) -> Result<(), CryptoError> {
    match existing_salt(path)? {
        Some(salt) => {
            debug!(path = %path.display(), "writing encrypted config");
            write_private(path, &encrypt(plaintext, password, &salt))
        }
        None => {
            debug!(path = %path.display(), "writing plaintext config");
            write_private(path, plaintext)
        }
    }
}

/// Write `plaintext` to `path` encrypted with `password`.
///
/// The salt of an already encrypted file is kept; otherwise a fresh one is
/// drawn. A corrupt encrypted file is refused as in [write_config].
pub fn write_encrypted(path: &Path, password: &[u8], plaintext: &[u8]) -> Result<(), CryptoError> {
    let salt = match existing_salt(path)? {
        Some(salt) => salt,
        None => {
            debug!(path = %path.display(), "drawing a new salt");
            new_salt()
        }
    };
    write_private(path, &encrypt(plaintext, password, &salt))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAINTEXT: &[u8] = include_bytes!("../testdata/plaintext.csv");
    // openssl enc -aes-128-cbc -md sha256 -pass pass:x -in plaintext.csv
    const ENCRYPTED: &[u8] = include_bytes!("../testdata/encrypted.csv");
    const SALT: Salt = [1, 2, 3, 4, 5, 6, 7, 8];

    fn encrypt_unpadded(block: &[u8], password: &[u8], salt: &Salt) -> Vec<u8> {
        let (key, iv) = derive_key_iv(password, salt);
        let ciphertext = Aes128CbcEnc::new(
            GenericArray::from_slice(&key[..]),
            GenericArray::from_slice(&iv[..]),
        )
        .encrypt_padded_vec_mut::<NoPadding>(block);
        [&MAGIC[..], &salt[..], &ciphertext[..]].concat()
    }

    #[test]
    fn decrypts_openssl_output() {
        assert!(is_encrypted(ENCRYPTED));
        assert_eq!(decrypt(ENCRYPTED, b"x").unwrap(), PLAINTEXT.to_vec());
    }

    #[test]
    fn wrong_password_never_yields_plaintext() {
        match decrypt(ENCRYPTED, b"y") {
            Err(CryptoError::InvalidPassword) => {}
            Err(e) => panic!("unexpected error {}", e),
            Ok(p) => assert_ne!(p, PLAINTEXT.to_vec()),
        }
    }

    #[test]
    fn round_trip() {
        for len in [0, 1, 15, 16, 17, 31, 32, 100] {
            let plaintext: Vec<u8> = (0..len).map(|i| i as u8).collect();
            for salt in [SALT, [0; SALT_LEN], [0xff; SALT_LEN], new_salt()] {
                let data = encrypt(&plaintext, b"hunter2", &salt);
                assert_eq!(&data[..8], MAGIC);
                assert_eq!(&data[8..16], &salt);
                assert_eq!((data.len() - HEADER_LEN) % BLOCK_SIZE, 0);
                assert!(data.len() - HEADER_LEN > plaintext.len());
                assert_eq!(decrypt(&data, b"hunter2").unwrap(), plaintext);
            }
        }
    }

    #[test]
    fn encrypt_matches_openssl() {
        let salt: Salt = ENCRYPTED[8..16].try_into().unwrap();
        assert_eq!(encrypt(PLAINTEXT, b"x", &salt), ENCRYPTED.to_vec());
    }

    #[test]
    fn rejects_zero_padding_byte() {
        let mut block = [b'a'; BLOCK_SIZE];
        block[BLOCK_SIZE - 1] = 0;
        let data = encrypt_unpadded(&block, b"pw", &SALT);
        assert!(matches!(decrypt(&data, b"pw"), Err(CryptoError::InvalidPassword)));
    }

    #[test]
    fn rejects_oversized_padding_byte() {
        let block = [BLOCK_SIZE as u8 + 1; BLOCK_SIZE];
        let data = encrypt_unpadded(&block, b"pw", &SALT);
        assert!(matches!(decrypt(&data, b"pw"), Err(CryptoError::InvalidPassword)));
    }

    #[test]
    fn rejects_inconsistent_padding() {
        let mut block = [3u8; BLOCK_SIZE];
        block[BLOCK_SIZE - 2] = 2;
        let data = encrypt_unpadded(&block, b"pw", &SALT);
        assert!(matches!(decrypt(&data, b"pw"), Err(CryptoError::InvalidPassword)));
    }

    #[test]
    fn padding_boundaries() {
        assert_eq!(unpadded_len(&[1]).unwrap(), 0);
        assert_eq!(unpadded_len(&[16; 16]).unwrap(), 0);
        assert_eq!(unpadded_len(b"abc\x02\x02").unwrap(), 3);
        assert!(unpadded_len(&[]).is_err());
        assert!(unpadded_len(&[0; 16]).is_err());
        assert!(unpadded_len(&[17; 32]).is_err());
        assert!(unpadded_len(&[4, 4, 4]).is_err());
    }

    #[test]
    fn rejects_truncated_input() {
        for data in [
            &b"Salted__"[..],
            &b"Salted__1234567"[..],
            &b"Salted__12345678"[..],
            &ENCRYPTED[..ENCRYPTED.len() - 1],
            &PLAINTEXT[..],
        ] {
            assert!(matches!(decrypt(data, b"x"), Err(CryptoError::InvalidPassword)));
        }
    }

    #[test]
    fn read_raw_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gauth.csv");
        assert!(matches!(read_raw(&path), Err(CryptoError::NotFound(p)) if p == path));
    }

    #[test]
    fn read_raw_detects_encryption() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.csv");
        let enc = dir.path().join("enc.csv");
        fs::write(&plain, PLAINTEXT).unwrap();
        fs::write(&enc, ENCRYPTED).unwrap();

        let stored = read_raw(&plain).unwrap();
        assert!(!stored.encrypted);
        assert_eq!(stored.salt(), None);
        assert_eq!(stored.data, PLAINTEXT.to_vec());

        let stored = read_raw(&enc).unwrap();
        assert!(stored.encrypted);
        assert_eq!(stored.salt().unwrap()[..], ENCRYPTED[8..16]);
    }

    #[test]
    fn write_config_new_file_is_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gauth.csv");
        write_config(&path, b"", b"github:ABCDEFGH\n").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"github:ABCDEFGH\n".to_vec());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn write_config_keeps_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gauth.csv");
        fs::write(&path, PLAINTEXT).unwrap();
        write_config(&path, b"ignored", b"a:MZXW6\n").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"a:MZXW6\n".to_vec());
    }

    #[test]
    fn write_config_reencrypts_with_same_salt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gauth.csv");
        fs::write(&path, ENCRYPTED).unwrap();

        write_config(&path, b"x", b"a:MZXW6\n").unwrap();
        let data = fs::read(&path).unwrap();
        assert_eq!(&data[..16], &ENCRYPTED[..16]);
        assert_eq!(decrypt(&data, b"x").unwrap(), b"a:MZXW6\n".to_vec());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn writes_refuse_saltless_encrypted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gauth.csv");
        for corrupt in [&b"Salted__"[..], &b"Salted__123"[..]] {
            fs::write(&path, corrupt).unwrap();
            assert!(matches!(
                write_config(&path, b"pw", b"github:ABCDEFGH\n"),
                Err(CryptoError::InvalidPassword)
            ));
            assert!(matches!(
                write_encrypted(&path, b"pw", b"github:ABCDEFGH\n"),
                Err(CryptoError::InvalidPassword)
            ));
            assert_eq!(fs::read(&path).unwrap(), corrupt.to_vec());
        }
    }

    #[test]
    fn write_encrypted_draws_salt_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gauth.csv");
        fs::write(&path, PLAINTEXT).unwrap();

        write_encrypted(&path, b"pw", PLAINTEXT).unwrap();
        let first = fs::read(&path).unwrap();
        assert!(is_encrypted(&first));
        assert_eq!(decrypt(&first, b"pw").unwrap(), PLAINTEXT.to_vec());

        write_encrypted(&path, b"pw", b"b:MZXW6\n").unwrap();
        let second = fs::read(&path).unwrap();
        assert_eq!(&first[..16], &second[..16]);
        assert_eq!(decrypt(&second, b"pw").unwrap(), b"b:MZXW6\n".to_vec());
    }
}
