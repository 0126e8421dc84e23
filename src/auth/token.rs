use std::fmt;
use std::str::FromStr;

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use rand::RngCore;

use crate::error::{Error, Result};

const ARGON2_MEMORY_KIB: u32 = 19 * 1024;
const ARGON2_ITERATIONS: u32 = 2;
const ARGON2_PARALLELISM: u32 = 1;
const ARGON2_OUTPUT_LEN: usize = 32;

const TOKEN_PREFIX: &str = "dockhand";
const LOOKUP_LENGTH: usize = 8;
const SECRET_BYTES: usize = 16;

/// A bearer token as handed to clients: `dockhand_<lookup>_<secret>`.
///
/// The lookup part is stored in clear to find the row; only an Argon2id
/// hash of the whole token is persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct RawToken {
    lookup: String,
    secret: String,
}

impl RawToken {
    fn random() -> Self {
        let lookup = uuid::Uuid::new_v4().simple().to_string()[..LOOKUP_LENGTH].to_string();
        let mut bytes = [0u8; SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            lookup,
            secret: hex::encode(bytes),
        }
    }

    pub fn lookup(&self) -> &str {
        &self.lookup
    }
}

impl fmt::Display for RawToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TOKEN_PREFIX}_{}_{}", self.lookup, self.secret)
    }
}

impl fmt::Debug for RawToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawToken({TOKEN_PREFIX}_{}_***)", self.lookup)
    }
}

impl FromStr for RawToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix(TOKEN_PREFIX)
            .and_then(|r| r.strip_prefix('_'))
            .ok_or(Error::InvalidTokenFormat)?;
        let (lookup, secret) = rest.split_once('_').ok_or(Error::InvalidTokenFormat)?;

        let valid = lookup.len() == LOOKUP_LENGTH
            && secret.len() == SECRET_BYTES * 2
            && lookup.chars().chain(secret.chars()).all(|c| c.is_ascii_hexdigit());
        if !valid {
            return Err(Error::InvalidTokenFormat);
        }

        Ok(Self {
            lookup: lookup.to_string(),
            secret: secret.to_string(),
        })
    }
}

/// A freshly issued token: the raw value (shown once) and what gets stored.
#[derive(Debug)]
pub struct IssuedToken {
    pub raw: RawToken,
    pub hash: String,
}

pub struct TokenGenerator {
    argon2: Argon2<'static>,
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenGenerator {
    #[must_use]
    pub fn new() -> Self {
        let params = Params::new(
            ARGON2_MEMORY_KIB,
            ARGON2_ITERATIONS,
            ARGON2_PARALLELISM,
            Some(ARGON2_OUTPUT_LEN),
        )
        .unwrap_or_default();

        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    pub fn issue(&self) -> Result<IssuedToken> {
        let raw = RawToken::random();
        let hash = self.hash(&raw.to_string())?;
        Ok(IssuedToken { raw, hash })
    }

    fn hash(&self, token: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(token.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| Error::Config(format!("failed to hash token: {e}")))
    }

    pub fn verify(&self, token: &RawToken, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| Error::Config(format!("invalid hash format: {e}")))?;

        match self
            .argon2
            .verify_password(token.to_string().as_bytes(), &parsed_hash)
        {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::Config(format!("failed to verify token: {e}"))),
        }
    }
}
