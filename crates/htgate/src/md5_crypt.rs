//! MD5-crypt password hashing.
//!
//! This is the classic iterated, salted MD5 construction from FreeBSD's
//! `crypt(3)`. The same algorithm backs both the `$1$` entries found in
//! `/etc/shadow` and the `$apr1$` entries written by Apache's `htpasswd`; the
//! two differ only in the magic string mixed into the first digest.
//!
//! A stored value has four `$`-delimited fields:
//!
//! ```text
//! $<id>$<salt>$<digest>
//! ```
//!
//! where the leading field is empty, `<id>` is the magic identifier, `<salt>`
//! is at most 8 characters and `<digest>` is 22 characters of itoa64.
//!
//! # Security Warning
//!
//! MD5 is cryptographically broken. It is accepted here so that existing
//! credential files keep working. Prefer bcrypt for new entries.

use crate::compare::constant_time_eq;
use md5::{Digest, Md5};
use snafu::{Snafu, ensure};

/// Custom base64 alphabet (itoa64) used by crypt(3) encodings.
///
/// It differs from standard base64 by starting with `./` instead of `A-Za-z`.
const ITOA64: &[u8; 64] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Magic string of Apache's MD5 variant.
pub const APR1_MAGIC: &str = "$apr1$";

/// Magic string of the FreeBSD/glibc MD5 variant.
pub const MD5_MAGIC: &str = "$1$";

/// Maximum salt length in characters. Longer salts are truncated.
pub const SALT_LEN: usize = 8;

/// Number of stretching rounds.
const ROUNDS: u32 = 1000;

/// Number of `$`-delimited fields in a well-formed stored value.
const FIELD_COUNT: usize = 4;

/// Errors produced while generating or parsing MD5-crypt values.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The stored value does not split into `"", id, salt, digest`.
    #[snafu(display("Expected {FIELD_COUNT} '$'-delimited fields, found {count}"))]
    FieldCount { count: usize },

    /// The system random source failed.
    #[snafu(display("Can't generate salt: {message}"))]
    SaltGeneration { message: String },
}

/// Take `n` 6-bit groups from `v`, least significant first.
fn to64(out: &mut String, mut v: u32, n: usize) {
    for _ in 0..n {
        out.push(char::from(ITOA64[(v & 0x3f) as usize]));
        v >>= 6;
    }
}

/// Encode a 16-byte digest into the 22-character crypt representation.
///
/// Bytes are packed in triads that do not follow their natural order:
///
/// ```text
/// (0, 6, 12) (1, 7, 13) (2, 8, 14) (3, 9, 15) (4, 10, 5) (11)
/// ```
fn encode_digest(digest: &[u8; 16]) -> String {
    const TRIADS: [(usize, usize, usize); 5] = [(0, 6, 12), (1, 7, 13), (2, 8, 14), (3, 9, 15), (4, 10, 5)];

    let mut result = String::with_capacity(22);
    for (a, b, c) in TRIADS {
        let v = u32::from(digest[a]) << 16 | u32::from(digest[b]) << 8 | u32::from(digest[c]);
        to64(&mut result, v, 4);
    }
    to64(&mut result, u32::from(digest[11]), 2);
    result
}

/// Cut `salt` to at most [`SALT_LEN`] bytes without splitting a character.
fn truncate_salt(salt: &str) -> &str {
    let mut end = salt.len().min(SALT_LEN);
    while !salt.is_char_boundary(end) {
        end -= 1;
    }
    &salt[..end]
}

/// Compute the raw 16-byte digest.
fn digest(password: &[u8], salt: &[u8], magic: &[u8]) -> [u8; 16] {
    // Alternate sum: MD5(password + salt + password)
    let alternate: [u8; 16] = Md5::new()
        .chain_update(password)
        .chain_update(salt)
        .chain_update(password)
        .finalize()
        .into();

    let mut context = Md5::new();
    context.update(password);
    context.update(magic);
    context.update(salt);

    // One copy of the alternate sum per 16 bytes of password, the last one cut short
    for chunk in password.chunks(alternate.len()) {
        context.update(&alternate[..chunk.len()]);
    }

    // Walk the bits of the password length: set bit feeds a NUL, clear bit the first password byte
    let mut i = password.len();
    while i > 0 {
        if i & 1 == 1 {
            context.update([0u8]);
        } else {
            context.update(&password[..1]);
        }
        i >>= 1;
    }

    let mut current: [u8; 16] = context.finalize().into();

    for round in 0..ROUNDS {
        let mut hasher = Md5::new();

        if round & 1 == 1 {
            hasher.update(password);
        } else {
            hasher.update(current);
        }

        if round % 3 != 0 {
            hasher.update(salt);
        }

        if round % 7 != 0 {
            hasher.update(password);
        }

        if round & 1 == 1 {
            hasher.update(current);
        } else {
            hasher.update(password);
        }

        current = hasher.finalize().into();
    }

    current
}

/// Hash `password` with the given `salt` and `magic` string.
///
/// `magic` is the full delimited identifier, e.g. [`MD5_MAGIC`] or
/// [`APR1_MAGIC`]. The salt is truncated to [`SALT_LEN`] characters.
///
/// Returns `magic + salt + "$" + digest`.
pub fn hash(password: &str, salt: &str, magic: &str) -> String {
    let salt = truncate_salt(salt);
    let digest = digest(password.as_bytes(), salt.as_bytes(), magic.as_bytes());
    format!("{magic}{salt}${}", encode_digest(&digest))
}

/// Generate a random 8-character salt from the itoa64 alphabet.
///
/// 6 random bytes give 48 bits, exactly 8 characters of 6 bits each.
pub fn generate_salt() -> Result<String, Error> {
    let mut salt_bytes = [0u8; 6];
    getrandom::fill(&mut salt_bytes).map_err(|e| Error::SaltGeneration {
        message: e.to_string(),
    })?;

    let mut salt = String::with_capacity(SALT_LEN);
    for triple in salt_bytes.chunks(3) {
        let v = u32::from(triple[0]) | u32::from(triple[1]) << 8 | u32::from(triple[2]) << 16;
        to64(&mut salt, v, 4);
    }
    Ok(salt)
}

/// Verify `password` against a stored MD5-crypt value.
///
/// The magic identifier and salt are taken from `stored` itself, so any
/// variant (`$1$`, `$apr1$`, ...) is accepted. The recomputed string is
/// compared with the whole of `stored` in constant time.
///
/// Returns `Ok(false)` on mismatch and an error when `stored` is not made of
/// exactly four `$`-delimited fields.
pub fn verify(password: &str, stored: &str) -> Result<bool, Error> {
    let fields: Vec<&str> = stored.split('$').collect();
    ensure!(
        fields.len() == FIELD_COUNT,
        FieldCountSnafu {
            count: fields.len()
        }
    );

    let magic = format!("${}$", fields[1]);
    let computed = hash(password, fields[2], &magic);

    Ok(constant_time_eq(computed.as_bytes(), stored.as_bytes()))
}
