// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Authentication interface (C2) and its two built-in implementations.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use openssl::hash::{Hasher, MessageDigest};
use rand::RngCore;

use crate::error::{Error, ErrorKind};

const SALT_LEN: usize = 12;
const HASH_LEN: usize = 64;

/// Opaque accept/reject decision for a CONNECT attempt. Constructed once
/// from configuration and called exactly once per CONNECT, after decoding
/// and before CONNACK is sent.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, client_ip: &str, username: Option<&str>, password: Option<&[u8]>) -> bool;
}

/// Default authenticator: every connection is accepted.
#[derive(Debug, Default)]
pub struct AcceptAll;

impl Authenticator for AcceptAll {
    fn authenticate(&self, _client_ip: &str, _username: Option<&str>, _password: Option<&[u8]>) -> bool {
        true
    }
}

fn sha512(password: &[u8], salt: &[u8; SALT_LEN]) -> Result<[u8; HASH_LEN], Error> {
    let mut hasher = Hasher::new(MessageDigest::sha512())
        .map_err(|err| Error::new(ErrorKind::AuthError, &err.to_string()))?;
    hasher
        .update(password)
        .and_then(|()| hasher.update(salt))
        .map_err(|err| Error::new(ErrorKind::AuthError, &err.to_string()))?;
    let digest = hasher
        .finish()
        .map_err(|err| Error::new(ErrorKind::AuthError, &err.to_string()))?;
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(digest.as_ref());
    Ok(out)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(s: &str, out: &mut [u8]) -> Result<(), Error> {
    if s.len() != out.len() * 2 {
        return Err(Error::new(ErrorKind::AuthError, "hex field has wrong length"));
    }
    for (i, slot) in out.iter_mut().enumerate() {
        let byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
            .map_err(|_| Error::new(ErrorKind::AuthError, "invalid hex digit"))?;
        *slot = byte;
    }
    Ok(())
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct PasswordEntry {
    salt: [u8; SALT_LEN],
    hash: [u8; HASH_LEN],
}

impl PasswordEntry {
    fn generate(password: &[u8]) -> Result<Self, Error> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let hash = sha512(password, &salt)?;
        Ok(Self { salt, hash })
    }

    /// Parse a `username:salt_hex:hash_hex` line.
    fn parse(line: &str) -> Result<Option<(String, Self)>, Error> {
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() != 3 || parts[0].is_empty() {
            return Err(Error::new(
                ErrorKind::AuthError,
                &format!("malformed password entry: {line:?}"),
            ));
        }
        let mut salt = [0u8; SALT_LEN];
        from_hex(parts[1], &mut salt)?;
        let mut hash = [0u8; HASH_LEN];
        from_hex(parts[2], &mut hash)?;
        Ok(Some((parts[0].to_string(), Self { salt, hash })))
    }

    fn dump(&self, username: &str) -> String {
        format!("{}:{}:{}", username, to_hex(&self.salt), to_hex(&self.hash))
    }

    fn matches(&self, password: &[u8]) -> Result<bool, Error> {
        Ok(sha512(password, &self.salt)? == self.hash)
    }
}

/// File-backed authenticator. Reads a colon-separated password file on
/// construction; the in-memory copy is immutable for the life of the
/// broker process (a config reload would reconstruct it).
#[derive(Debug)]
pub struct FileAuth {
    users: BTreeMap<String, PasswordEntry>,
}

impl FileAuth {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        let mut users = BTreeMap::new();
        for line in contents.lines() {
            if let Some((username, entry)) = PasswordEntry::parse(line)? {
                users.insert(username, entry);
            }
        }
        Ok(Self { users })
    }

    /// Add or update a user's password in a password file on disk, creating
    /// the file if it does not exist yet.
    pub fn add_user<P: AsRef<Path>>(path: P, username: &str, password: &[u8]) -> Result<(), Error> {
        let mut users = Self::read_entries(&path)?;
        users.insert(username.to_string(), PasswordEntry::generate(password)?);
        Self::write_entries(path, &users)
    }

    /// Remove a user's entry from a password file on disk.
    pub fn delete_user<P: AsRef<Path>>(path: P, username: &str) -> Result<(), Error> {
        let mut users = Self::read_entries(&path)?;
        users.remove(username);
        Self::write_entries(path, &users)
    }

    fn read_entries<P: AsRef<Path>>(path: P) -> Result<BTreeMap<String, PasswordEntry>, Error> {
        let mut users = BTreeMap::new();
        if !path.as_ref().exists() {
            return Ok(users);
        }
        let contents = fs::read_to_string(path)?;
        for line in contents.lines() {
            if let Some((username, entry)) = PasswordEntry::parse(line)? {
                users.insert(username, entry);
            }
        }
        Ok(users)
    }

    fn write_entries<P: AsRef<Path>>(
        path: P,
        users: &BTreeMap<String, PasswordEntry>,
    ) -> Result<(), Error> {
        let mut out = String::new();
        for (username, entry) in users {
            out.push_str(&entry.dump(username));
            out.push('\n');
        }
        fs::write(path, out)?;
        Ok(())
    }
}

impl Authenticator for FileAuth {
    fn authenticate(&self, _client_ip: &str, username: Option<&str>, password: Option<&[u8]>) -> bool {
        let (Some(username), Some(password)) = (username, password) else {
            return false;
        };
        self.users
            .get(username)
            .is_some_and(|entry| entry.matches(password).unwrap_or(false))
    }
}

/// Construct the configured authenticator by name, per `[security]` in C10.
pub fn build(service: &str, password_file: Option<&Path>) -> Result<Box<dyn Authenticator>, Error> {
    match service {
        "accept_all" => Ok(Box::new(AcceptAll)),
        "file" => {
            let path = password_file.ok_or_else(|| {
                Error::new(ErrorKind::ConfigError, "auth.service = \"file\" requires security.password_file")
            })?;
            Ok(Box::new(FileAuth::load(path)?))
        }
        other => Err(Error::new(
            ErrorKind::ConfigError,
            &format!("unknown auth service {other:?}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_all() {
        let auth = AcceptAll;
        assert!(auth.authenticate("127.0.0.1", None, None));
    }

    #[test]
    fn test_password_entry_round_trip() {
        let entry = PasswordEntry::generate(b"hunter2").unwrap();
        let line = entry.dump("alice");
        let (username, parsed) = PasswordEntry::parse(&line).unwrap().unwrap();
        assert_eq!(username, "alice");
        assert!(parsed.matches(b"hunter2").unwrap());
        assert!(!parsed.matches(b"wrong").unwrap());
    }

    #[test]
    fn test_file_auth_add_and_authenticate() {
        let dir = std::env::temp_dir().join(format!("mqttd-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("passwd");

        FileAuth::add_user(&path, "alice", b"hunter2").unwrap();
        let auth = FileAuth::load(&path).unwrap();
        assert!(auth.authenticate("127.0.0.1", Some("alice"), Some(b"hunter2")));
        assert!(!auth.authenticate("127.0.0.1", Some("alice"), Some(b"wrong")));
        assert!(!auth.authenticate("127.0.0.1", Some("bob"), Some(b"hunter2")));

        FileAuth::delete_user(&path, "alice").unwrap();
        let auth = FileAuth::load(&path).unwrap();
        assert!(!auth.authenticate("127.0.0.1", Some("alice"), Some(b"hunter2")));

        fs::remove_dir_all(&dir).ok();
    }
}
