//! Lookup of the credential file protecting a document root.

use snafu::{ResultExt, Snafu};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Credential file name used when none is configured.
pub const DEFAULT_FILE_NAME: &str = "htpasswd";

/// Errors that can occur while loading a credential file.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The file exists but could not be read.
    #[snafu(display("Failed to read credential file '{}'", path.display()))]
    FileRead {
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Resolves the credential file contents for a document root.
///
/// `Ok(None)` means no credential file exists, i.e. the root is unprotected.
pub trait CredentialSource: Send + Sync {
    /// Load the credential file for `root`.
    fn lookup(&self, root: &Path) -> Result<Option<String>, Error>;
}

/// Reads `<root>/<file_name>` from the filesystem on every lookup.
#[derive(Debug, Clone)]
pub struct HtpasswdDir {
    file_name: PathBuf,
}

impl HtpasswdDir {
    /// Use `file_name` inside each root as the credential file.
    pub fn new(file_name: impl Into<PathBuf>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    /// Full path of the credential file for `root`.
    pub fn path_for(&self, root: &Path) -> PathBuf {
        root.join(&self.file_name)
    }
}

impl Default for HtpasswdDir {
    fn default() -> Self {
        Self::new(DEFAULT_FILE_NAME)
    }
}

impl CredentialSource for HtpasswdDir {
    fn lookup(&self, root: &Path) -> Result<Option<String>, Error> {
        let path = self.path_for(root);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(FileReadSnafu { path }),
        }
    }
}

/// In-memory credential files keyed by root.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    files: HashMap<PathBuf, String>,
}

impl StaticSource {
    /// Build from `(root, contents)` pairs.
    pub fn new<P, S>(files: impl IntoIterator<Item = (P, S)>) -> Self
    where
        P: Into<PathBuf>,
        S: Into<String>,
    {
        Self {
            files: files
                .into_iter()
                .map(|(root, contents)| (root.into(), contents.into()))
                .collect(),
        }
    }
}

impl CredentialSource for StaticSource {
    fn lookup(&self, root: &Path) -> Result<Option<String>, Error> {
        Ok(self.files.get(root).cloned())
    }
}
