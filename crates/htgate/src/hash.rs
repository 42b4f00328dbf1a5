use crate::compare::constant_time_eq;
use crate::md5_crypt;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use std::str::FromStr;

const BCRYPT_COST: u32 = 12;
const SHA_PREFIX: &str = "{SHA}";

/// Errors from hashing or verifying a password.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The stored value cannot be parsed by the scheme it was routed to.
    #[snafu(display("Malformed {scheme} hash"))]
    MalformedStoredHash { scheme: Scheme },

    /// The stored value is well formed but the password does not match.
    #[snafu(display("Password does not match {scheme} hash"))]
    HashMismatch { scheme: Scheme },

    /// bcrypt failed to produce a hash.
    #[snafu(display("Failed to hash password with bcrypt"))]
    Bcrypt { source: bcrypt::BcryptError },

    /// Salt generation for MD5-crypt failed.
    #[snafu(display("Failed to hash password with MD5-crypt"))]
    Md5Crypt { source: md5_crypt::Error },

    /// The algorithm name is not recognised.
    #[snafu(display("Unknown hash algorithm: {name}"))]
    UnknownAlgorithm { name: String },
}

/// Password hashing schemes understood by the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// bcrypt in any of its `$2a$`, `$2b$`, `$2x$`, `$2y$` spellings.
    Bcrypt,
    /// `{SHA}` followed by the base64 SHA-1 of the password.
    Sha1,
    /// MD5-crypt (`$1$`, `$apr1$`); the fallback for anything unprefixed.
    Md5Crypt,
}

/// Scheme prefixes in priority order. The first match wins and the empty
/// prefix, which matches everything, must stay last.
///
/// `$2a$` and `$2x$` carry known historical weaknesses but are routed to the
/// same bcrypt verifier as `$2b$`/`$2y$` so that existing files keep working.
pub const REGISTRY: &[(&str, Scheme)] = &[
    ("$2a$", Scheme::Bcrypt),
    ("$2b$", Scheme::Bcrypt),
    ("$2x$", Scheme::Bcrypt),
    ("$2y$", Scheme::Bcrypt),
    (SHA_PREFIX, Scheme::Sha1),
    ("", Scheme::Md5Crypt),
];

impl Scheme {
    /// Verify `password` against `stored`, which must belong to this scheme.
    pub fn verify(self, password: &str, stored: &str) -> Result<(), Error> {
        let matched = match self {
            Scheme::Bcrypt => bcrypt::verify(password, stored)
                .ok()
                .context(MalformedStoredHashSnafu { scheme: self })?,
            Scheme::Sha1 => {
                let encoded = stored
                    .strip_prefix(SHA_PREFIX)
                    .context(MalformedStoredHashSnafu { scheme: self })?;
                let computed = STANDARD.encode(Sha1::digest(password.as_bytes()));
                constant_time_eq(computed.as_bytes(), encoded.as_bytes())
            }
            Scheme::Md5Crypt => md5_crypt::verify(password, stored)
                .ok()
                .context(MalformedStoredHashSnafu { scheme: self })?,
        };

        ensure!(matched, HashMismatchSnafu { scheme: self });
        Ok(())
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "bcrypt" => Ok(Scheme::Bcrypt),
            "sha" | "sha1" => Ok(Scheme::Sha1),
            "md5" | "apr1" | "md5-crypt" => Ok(Scheme::Md5Crypt),
            _ => UnknownAlgorithmSnafu { name: s }.fail(),
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scheme::Bcrypt => write!(f, "bcrypt"),
            Scheme::Sha1 => write!(f, "sha1"),
            Scheme::Md5Crypt => write!(f, "md5-crypt"),
        }
    }
}

/// Pick the scheme for a stored credential by prefix.
pub fn select_scheme(stored: &str) -> Scheme {
    REGISTRY
        .iter()
        .find(|(prefix, _)| stored.starts_with(prefix))
        .map_or(Scheme::Md5Crypt, |&(_, scheme)| scheme)
}

/// Verify a password against a stored credential of any supported scheme.
pub fn verify_secret(password: &str, stored: &str) -> Result<(), Error> {
    select_scheme(stored).verify(password, stored)
}

/// Return `true` if `password` matches `stored`.
///
/// Malformed stored values and mismatches are both reported as `false`.
pub fn check_secret(password: &str, stored: &str) -> bool {
    verify_secret(password, stored).is_ok()
}

/// Hash a password with the given scheme.
///
/// bcrypt output uses the `$2b$` prefix and MD5-crypt output uses Apache's
/// `$apr1$` magic with a random salt.
pub fn hash_password(password: &str, scheme: Scheme) -> Result<String, Error> {
    match scheme {
        Scheme::Bcrypt => bcrypt::hash(password, BCRYPT_COST).context(BcryptSnafu),
        Scheme::Sha1 => Ok(format!(
            "{SHA_PREFIX}{}",
            STANDARD.encode(Sha1::digest(password.as_bytes()))
        )),
        Scheme::Md5Crypt => {
            let salt = md5_crypt::generate_salt().context(Md5CryptSnafu)?;
            Ok(md5_crypt::hash(password, &salt, md5_crypt::APR1_MAGIC))
        }
    }
}
