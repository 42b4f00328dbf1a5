//! HTTP Basic authentication against a single-entry credential file.
//!
//! The gate turns the raw `Authorization` header and the raw credential file
//! contents into an [`Outcome`], and an [`Outcome`] into an allow/deny
//! [`Decision`] under a [`GatePolicy`]:
//!
//! | Outcome                    | Decision                      |
//! |----------------------------|-------------------------------|
//! | `NoCredentialFile`         | allow                         |
//! | `MalformedCredentialFile`  | allow (configurable to deny)  |
//! | `CredentialFileUnreadable` | deny                          |
//! | `MalformedHeader`          | deny                          |
//! | `UsernameMismatch`         | deny                          |
//! | `PasswordMismatch`         | deny                          |
//! | `Match`                    | allow                         |

use crate::hash::check_secret;
use crate::source::CredentialSource;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

const BASIC_SCHEME: &str = "Basic";

/// Reasons a header or credential file could not be parsed.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The header is not exactly `<scheme> <payload>`.
    #[snafu(display("Authorization header must be '<scheme> <payload>'"))]
    HeaderShape,

    /// The header uses a scheme other than Basic.
    #[snafu(display("Unsupported authorization scheme '{scheme}'"))]
    HeaderScheme { scheme: String },

    /// The payload is not valid base64.
    #[snafu(display("Authorization payload is not valid base64"))]
    HeaderBase64 { source: base64::DecodeError },

    /// The decoded payload is not valid UTF-8.
    #[snafu(display("Authorization payload is not valid UTF-8"))]
    HeaderUtf8 { source: std::string::FromUtf8Error },

    /// The decoded payload has no `:` between username and password.
    #[snafu(display("Authorization payload has no ':' separator"))]
    HeaderSeparator,

    /// The credential file has no `username:credential` line.
    #[snafu(display("Credential file has no 'username:credential' entry"))]
    CredentialLine,
}

/// Username and password decoded from a Basic `Authorization` header.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    /// Decoded username.
    pub username: String,
    /// Decoded password.
    pub password: String,
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The entry a credential file protects its root with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialEntry<'a> {
    /// Expected username.
    pub username: &'a str,
    /// Stored credential in any supported hash scheme.
    pub credential: &'a str,
}

/// Parse an `Authorization` header value of the form `Basic <base64>`.
///
/// The value must split on single spaces into exactly two tokens. The scheme
/// token is matched case-insensitively. The payload is split on its first `:`,
/// so passwords may contain colons.
pub fn parse_basic_header(value: &str) -> Result<BasicCredentials, Error> {
    let tokens: Vec<&str> = value.split(' ').collect();
    let [scheme, payload] = tokens.as_slice() else {
        return HeaderShapeSnafu.fail();
    };
    ensure!(
        scheme.eq_ignore_ascii_case(BASIC_SCHEME),
        HeaderSchemeSnafu { scheme: *scheme }
    );

    let decoded = STANDARD.decode(payload).context(HeaderBase64Snafu)?;
    let decoded = String::from_utf8(decoded).context(HeaderUtf8Snafu)?;
    let (username, password) = decoded.split_once(':').context(HeaderSeparatorSnafu)?;

    Ok(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Parse the protecting entry out of a credential file.
///
/// Blank lines and `#` comments are skipped. The first remaining line is split
/// on `:`; the first field is the username, the second the stored credential,
/// and any further fields are ignored.
///
/// Skipping comments narrows the fail-open path: a file whose first line is a
/// comment still protects its root with the entry that follows, rather than
/// counting as malformed and letting every request through.
pub fn parse_credential_file(contents: &str) -> Result<CredentialEntry<'_>, Error> {
    let line = contents
        .lines()
        .map(str::trim_end)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .context(CredentialLineSnafu)?;

    let (username, rest) = line.split_once(':').context(CredentialLineSnafu)?;
    let credential = rest.split_once(':').map_or(rest, |(credential, _)| credential);

    Ok(CredentialEntry {
        username,
        credential,
    })
}

/// Build the `WWW-Authenticate` challenge sent with a 401 response.
pub fn challenge(realm: &str) -> String {
    let mut value = String::with_capacity(realm.len() + 16);
    value.push_str("Basic realm=\"");
    for ch in realm.chars() {
        if ch == '"' || ch == '\\' {
            value.push('\\');
        }
        value.push(ch);
    }
    value.push('"');
    value
}

/// Whether the request may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Serve the request.
    Allow,
    /// Respond with 401 and a challenge.
    Deny,
}

impl Decision {
    /// `true` for [`Decision::Allow`].
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => write!(f, "allow"),
            Decision::Deny => write!(f, "deny"),
        }
    }
}

/// Classification of a single authorization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No credential file: the root is not protected.
    NoCredentialFile,
    /// A credential file exists but could not be read.
    CredentialFileUnreadable,
    /// The credential file has no usable `username:credential` entry.
    MalformedCredentialFile,
    /// The header is absent or not a valid Basic header.
    MalformedHeader,
    /// The decoded username differs from the file's username.
    UsernameMismatch,
    /// The password does not match, or the stored hash is malformed.
    PasswordMismatch,
    /// Username and password both match.
    Match,
}

/// What to do with a credential file that cannot be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MalformedFilePolicy {
    /// Treat the root as unprotected.
    #[default]
    Allow,
    /// Refuse every request to the root.
    Deny,
}

/// Gate configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatePolicy {
    /// Decision for [`Outcome::MalformedCredentialFile`].
    pub malformed_file: MalformedFilePolicy,
}

/// Classify a request without applying any policy.
///
/// `header` is the raw `Authorization` value, `None` when absent. `file` is
/// the raw credential file, `None` when no file exists.
pub fn evaluate(header: Option<&str>, file: Option<&str>) -> Outcome {
    let Some(contents) = file else {
        return Outcome::NoCredentialFile;
    };

    let entry = match parse_credential_file(contents) {
        Ok(entry) => entry,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed credential file");
            return Outcome::MalformedCredentialFile;
        }
    };

    let credentials = match header.filter(|value| !value.is_empty()).map(parse_basic_header) {
        Some(Ok(credentials)) => credentials,
        Some(Err(e)) => {
            debug!(error = %e, "Rejecting malformed authorization header");
            return Outcome::MalformedHeader;
        }
        None => return Outcome::MalformedHeader,
    };

    // Always pay for the hash so a wrong username costs the same as a wrong password
    let password_ok = check_secret(&credentials.password, entry.credential);
    if credentials.username != entry.username {
        Outcome::UsernameMismatch
    } else if !password_ok {
        Outcome::PasswordMismatch
    } else {
        Outcome::Match
    }
}

/// Basic authentication gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gate {
    policy: GatePolicy,
}

impl Gate {
    /// Create a gate with the given policy.
    pub fn new(policy: GatePolicy) -> Self {
        Self { policy }
    }

    /// The policy this gate applies.
    pub fn policy(&self) -> GatePolicy {
        self.policy
    }

    /// Map an outcome to a decision under this gate's policy.
    pub fn decide(&self, outcome: Outcome) -> Decision {
        match outcome {
            Outcome::NoCredentialFile | Outcome::Match => Decision::Allow,
            Outcome::MalformedCredentialFile => match self.policy.malformed_file {
                MalformedFilePolicy::Allow => Decision::Allow,
                MalformedFilePolicy::Deny => Decision::Deny,
            },
            Outcome::CredentialFileUnreadable
            | Outcome::MalformedHeader
            | Outcome::UsernameMismatch
            | Outcome::PasswordMismatch => Decision::Deny,
        }
    }

    /// Authorize a request from the raw header and credential file.
    pub fn authorize(&self, header: Option<&str>, file: Option<&str>) -> Decision {
        let outcome = evaluate(header, file);
        let decision = self.decide(outcome);
        debug!(?outcome, %decision, "Authorization evaluated");
        decision
    }

    /// Look up the credential file for `root` and authorize against it.
    ///
    /// A credential file that exists but cannot be read denies the request.
    pub fn authorize_root<S>(&self, source: &S, root: &Path, header: Option<&str>) -> Decision
    where
        S: CredentialSource + ?Sized,
    {
        match source.lookup(root) {
            Ok(file) => self.authorize(header, file.as_deref()),
            Err(e) => {
                warn!(error = %e, root = %root.display(), "Denying request");
                self.decide(Outcome::CredentialFileUnreadable)
            }
        }
    }
}

/// Authorize with the default policy.
pub fn authorize(header: Option<&str>, file: Option<&str>) -> Decision {
    Gate::default().authorize(header, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{HtpasswdDir, StaticSource};

    // SHA-1 of "test"
    const SHA_FILE: &str = "alice:{SHA}qUqP5cyxm6YcTAhz05Hph5gvu9M=";
    const MD5_FILE: &str = "alice:$1$abcdefgh$cHJi5PXp/ki/ktXzqlk6I1";

    fn basic(userpass: &str) -> String {
        format!("Basic {}", STANDARD.encode(userpass))
    }

    #[test]
    fn test_parse_basic_header() {
        let credentials = parse_basic_header(&basic("alice:test")).unwrap();
        assert_eq!(credentials.username, "alice");
        assert_eq!(credentials.password, "test");
    }

    #[test]
    fn test_parse_basic_header_password_with_colon() {
        let credentials = parse_basic_header(&basic("alice:a:b:c")).unwrap();
        assert_eq!(credentials.username, "alice");
        assert_eq!(credentials.password, "a:b:c");
    }

    #[test]
    fn test_parse_basic_header_scheme_case() {
        assert!(parse_basic_header(&format!("basic {}", STANDARD.encode("a:b"))).is_ok());
        assert!(matches!(
            parse_basic_header(&format!("Bearer {}", STANDARD.encode("a:b"))),
            Err(Error::HeaderScheme { .. })
        ));
    }

    #[test]
    fn test_parse_basic_header_malformed() {
        assert!(matches!(parse_basic_header(""), Err(Error::HeaderShape)));
        assert!(matches!(parse_basic_header("Basic"), Err(Error::HeaderShape)));
        assert!(matches!(
            parse_basic_header("Basic  YWxpY2U6dGVzdA=="),
            Err(Error::HeaderShape)
        ));
        assert!(matches!(
            parse_basic_header("Basic YWxpY2U6dGVzdA== extra"),
            Err(Error::HeaderShape)
        ));
        assert!(matches!(
            parse_basic_header("Basic !!!not-base64!!!"),
            Err(Error::HeaderBase64 { .. })
        ));
        assert!(matches!(
            parse_basic_header("Basic YWxpY2U6dGVzd"),
            Err(Error::HeaderBase64 { .. })
        ));
        assert!(matches!(
            parse_basic_header(&format!("Basic {}", STANDARD.encode([0xff, 0xfe, b':']))),
            Err(Error::HeaderUtf8 { .. })
        ));
        assert!(matches!(
            parse_basic_header(&basic("alice")),
            Err(Error::HeaderSeparator)
        ));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = parse_basic_header(&basic("alice:hunter2")).unwrap();
        let debug = format!("{credentials:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_parse_credential_file() {
        let entry = parse_credential_file(SHA_FILE).unwrap();
        assert_eq!(entry.username, "alice");
        assert_eq!(entry.credential, "{SHA}qUqP5cyxm6YcTAhz05Hph5gvu9M=");
    }

    #[test]
    fn test_parse_credential_file_ignores_trailing_data() {
        let entry = parse_credential_file("alice:$1$abc$def:extra:fields\r\nbob:other\n").unwrap();
        assert_eq!(entry.username, "alice");
        assert_eq!(entry.credential, "$1$abc$def");
    }

    #[test]
    fn test_parse_credential_file_skips_comments() {
        let entry = parse_credential_file("# managed by ops\n\nalice:hash\n").unwrap();
        assert_eq!(entry.username, "alice");
        assert_eq!(entry.credential, "hash");
    }

    #[test]
    fn test_leading_comment_keeps_root_protected() {
        let file = format!("# note\n{SHA_FILE}\n");
        assert_eq!(evaluate(None, Some(&file)), Outcome::MalformedHeader);
        assert_eq!(authorize(None, Some(&file)), Decision::Deny);
        assert_eq!(
            authorize(Some(basic("alice:test").as_str()), Some(&file)),
            Decision::Allow
        );
    }

    #[test]
    fn test_parse_credential_file_malformed() {
        for contents in ["", "\n", "not-a-valid-line", "# only a comment\n"] {
            assert!(
                matches!(parse_credential_file(contents), Err(Error::CredentialLine)),
                "{contents:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_no_credential_file_allows() {
        assert_eq!(evaluate(None, None), Outcome::NoCredentialFile);
        assert_eq!(authorize(None, None), Decision::Allow);
        assert_eq!(authorize(Some("garbage"), None), Decision::Allow);
    }

    #[test]
    fn test_malformed_credential_file_fails_open_by_default() {
        assert_eq!(
            evaluate(Some(basic("alice:test").as_str()), Some("not-a-valid-line")),
            Outcome::MalformedCredentialFile
        );
        assert_eq!(authorize(None, Some("not-a-valid-line")), Decision::Allow);
        assert_eq!(authorize(Some("anything"), Some("")), Decision::Allow);
    }

    #[test]
    fn test_malformed_credential_file_can_fail_closed() {
        let gate = Gate::new(GatePolicy {
            malformed_file: MalformedFilePolicy::Deny,
        });
        assert_eq!(gate.authorize(None, Some("not-a-valid-line")), Decision::Deny);
        // Other outcomes are unaffected
        assert_eq!(gate.authorize(None, None), Decision::Allow);
        assert_eq!(
            gate.authorize(Some(basic("alice:test").as_str()), Some(SHA_FILE)),
            Decision::Allow
        );
    }

    #[test]
    fn test_missing_header_denies() {
        assert_eq!(evaluate(None, Some(SHA_FILE)), Outcome::MalformedHeader);
        assert_eq!(evaluate(Some(""), Some(SHA_FILE)), Outcome::MalformedHeader);
        assert_eq!(authorize(Some(""), Some("user:hash")), Decision::Deny);
    }

    #[test]
    fn test_malformed_header_denies() {
        assert_eq!(
            evaluate(Some("Basic %%%"), Some(SHA_FILE)),
            Outcome::MalformedHeader
        );
        assert_eq!(authorize(Some("Basic"), Some(SHA_FILE)), Decision::Deny);
    }

    #[test]
    fn test_username_mismatch_denies() {
        assert_eq!(
            evaluate(Some(basic("bob:test").as_str()), Some(SHA_FILE)),
            Outcome::UsernameMismatch
        );
        assert_eq!(
            evaluate(Some(basic("Alice:test").as_str()), Some(SHA_FILE)),
            Outcome::UsernameMismatch
        );
    }

    #[test]
    fn test_password_mismatch_denies() {
        assert_eq!(
            evaluate(Some(basic("alice:wrongpass").as_str()), Some(SHA_FILE)),
            Outcome::PasswordMismatch
        );
        assert_eq!(
            authorize(Some(basic("user:wrongpass").as_str()), Some("user:hash")),
            Decision::Deny
        );
    }

    #[test]
    fn test_match_allows() {
        assert_eq!(
            evaluate(Some(basic("alice:test").as_str()), Some(SHA_FILE)),
            Outcome::Match
        );
        assert_eq!(
            authorize(Some(basic("alice:secret").as_str()), Some(MD5_FILE)),
            Decision::Allow
        );
        assert_eq!(
            authorize(Some(basic("alice:secret").as_str()), Some(format!("{MD5_FILE}\n").as_str())),
            Decision::Allow
        );
    }

    #[test]
    fn test_malformed_stored_hash_denies() {
        assert_eq!(
            evaluate(Some(basic("alice:secret").as_str()), Some("alice:$1$only-three")),
            Outcome::PasswordMismatch
        );
        assert_eq!(
            evaluate(Some(basic("alice:").as_str()), Some("alice:")),
            Outcome::PasswordMismatch
        );
    }

    #[test]
    fn test_authorize_root() {
        let source = StaticSource::new([("/srv/private", SHA_FILE)]);
        let gate = Gate::default();

        assert_eq!(
            gate.authorize_root(&source, Path::new("/srv/public"), None),
            Decision::Allow
        );
        assert_eq!(
            gate.authorize_root(&source, Path::new("/srv/private"), None),
            Decision::Deny
        );
        assert_eq!(
            gate.authorize_root(
                &source,
                Path::new("/srv/private"),
                Some(basic("alice:test").as_str())
            ),
            Decision::Allow
        );
    }

    #[test]
    fn test_unreadable_credential_file_denies() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the credential file should be
        std::fs::create_dir(dir.path().join("htpasswd")).unwrap();
        let source = HtpasswdDir::default();

        assert_eq!(
            Gate::default().authorize_root(&source, dir.path(), None),
            Decision::Deny
        );
        assert_eq!(
            Gate::default().authorize_root(&source, dir.path(), Some(basic("alice:test").as_str())),
            Decision::Deny
        );

        // The malformed-file policy does not apply to unreadable files
        let gate = Gate::new(GatePolicy {
            malformed_file: MalformedFilePolicy::Allow,
        });
        assert_eq!(gate.authorize_root(&source, dir.path(), None), Decision::Deny);
        assert_eq!(gate.decide(Outcome::CredentialFileUnreadable), Decision::Deny);
    }

    #[test]
    fn test_challenge() {
        assert_eq!(challenge("Restricted"), "Basic realm=\"Restricted\"");
        assert_eq!(
            challenge("say \"hi\" \\o/"),
            "Basic realm=\"say \\\"hi\\\" \\\\o/\""
        );
    }

    #[test]
    fn test_decision_display() {
        assert_eq!(Decision::Allow.to_string(), "allow");
        assert_eq!(Decision::Deny.to_string(), "deny");
        assert!(Decision::Allow.is_allowed());
        assert!(!Decision::Deny.is_allowed());
    }
}
