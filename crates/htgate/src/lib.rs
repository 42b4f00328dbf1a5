#![warn(missing_docs)]

//! HTTP Basic authentication gate backed by htpasswd-style credential files.
//!
//! A document root is protected by a credential file holding a single
//! `username:credential` line. The credential may be stored as bcrypt
//! (`$2a$`, `$2b$`, `$2x$`, `$2y$`), salted SHA-1 (`{SHA}`), or MD5-crypt
//! (`$1$`, `$apr1$`, and anything else without a recognised prefix).
//!
//! # Example
//!
//! ```
//! use htgate::{Decision, Gate, check_secret};
//!
//! let file = "alice:{SHA}qUqP5cyxm6YcTAhz05Hph5gvu9M=";
//! assert!(check_secret("test", "{SHA}qUqP5cyxm6YcTAhz05Hph5gvu9M="));
//!
//! let gate = Gate::default();
//!
//! // "alice:test"
//! let header = "Basic YWxpY2U6dGVzdA==";
//! assert_eq!(gate.authorize(Some(header), Some(file)), Decision::Allow);
//!
//! // "alice:secret"
//! let header = "Basic YWxpY2U6c2VjcmV0";
//! assert_eq!(gate.authorize(Some(header), Some(file)), Decision::Deny);
//!
//! // No credential file, no protection
//! assert_eq!(gate.authorize(None, None), Decision::Allow);
//! ```

mod compare;
mod gate;
mod hash;
pub mod md5_crypt;
mod source;

pub use compare::constant_time_eq;
pub use gate::{
    BasicCredentials, CredentialEntry, Decision, Error as GateError, Gate, GatePolicy,
    MalformedFilePolicy, Outcome, authorize, challenge, evaluate, parse_basic_header,
    parse_credential_file,
};
pub use hash::{
    Error as HashError, REGISTRY, Scheme, check_secret, hash_password, select_scheme,
    verify_secret,
};
pub use md5_crypt::Error as Md5CryptError;
pub use source::{
    CredentialSource, DEFAULT_FILE_NAME, Error as SourceError, HtpasswdDir, StaticSource,
};
