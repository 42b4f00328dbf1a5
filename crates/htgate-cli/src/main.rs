use clap::Parser;
use htgate::{
    CredentialSource, Decision, Gate, GatePolicy, HashError, HtpasswdDir, MalformedFilePolicy,
    Scheme, challenge, hash_password, parse_credential_file, verify_secret,
};
use snafu::{OptionExt, ResultExt};
use std::io::{self, Read};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

/// Basic authentication gate for htpasswd-protected document roots.
#[derive(Parser)]
#[command(name = "htgate")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Print a credential file line for a user
    Hash {
        /// Username to hash the password for
        username: String,
        /// Hash algorithm to use (bcrypt, sha1, md5)
        #[arg(long, default_value = "bcrypt")]
        algorithm: String,
        /// Read password from stdin instead of prompting
        #[arg(long)]
        password: bool,
    },

    /// Verify a user's password against a document root's credential file
    Verify {
        /// Document root holding the credential file
        root: PathBuf,
        /// Username to verify
        username: String,
        /// Credential file name inside the root
        #[arg(long, env = "HTGATE_FILE_NAME", default_value = htgate::DEFAULT_FILE_NAME)]
        file_name: String,
        /// Read password from stdin instead of prompting
        #[arg(long)]
        password: bool,
    },

    /// Decide whether a request to a document root would be allowed
    Check {
        /// Document root holding the credential file
        root: PathBuf,
        /// Raw value of the Authorization header
        #[arg(long)]
        header: Option<String>,
        /// Credential file name inside the root
        #[arg(long, env = "HTGATE_FILE_NAME", default_value = htgate::DEFAULT_FILE_NAME)]
        file_name: String,
        /// Realm announced in the challenge on deny
        #[arg(long, env = "HTGATE_REALM", default_value = "Restricted")]
        realm: String,
        /// Deny instead of allow when the credential file is malformed
        #[arg(long, env = "HTGATE_FAIL_CLOSED")]
        fail_closed: bool,
    },
}

type Result<T> = ::std::result::Result<T, snafu::Whatever>;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn read_password_from_stdin() -> Result<Zeroizing<String>> {
    let mut password = Zeroizing::new(String::new());
    io::stdin()
        .read_to_string(&mut password)
        .whatever_context("Can't read password from stdin")?;
    Ok(Zeroizing::new(password.trim_end_matches(['\r', '\n']).to_string()))
}

fn prompt_password() -> Result<Zeroizing<String>> {
    rpassword::prompt_password("Enter password: ")
        .whatever_context("Can't prompt for password")
        .map(Zeroizing::new)
}

fn prompt_password_confirm() -> Result<Zeroizing<String>> {
    loop {
        let password = Zeroizing::new(
            rpassword::prompt_password("New password: ")
                .whatever_context("Can't prompt for new password")?,
        );
        let confirm = Zeroizing::new(
            rpassword::prompt_password("Re-type new password: ")
                .whatever_context("Can't prompt for password re-type")?,
        );

        if *password == *confirm {
            return Ok(password);
        }

        eprintln!("Password verification error: passwords do not match");
        eprint!("Try again? [Y/n]: ");
        let mut response = String::new();
        io::stdin()
            .read_line(&mut response)
            .whatever_context("Can't read line")?;
        let response = response.trim().to_lowercase();

        snafu::ensure_whatever!(
            response != "n" && response != "no",
            "Password confirmation failed"
        );
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Hash {
            username,
            algorithm,
            password: from_stdin,
        } => {
            snafu::ensure_whatever!(!username.is_empty(), "Username cannot be empty");
            snafu::ensure_whatever!(
                !username.contains(':'),
                "Username '{}' contains invalid character ':'",
                username
            );

            let scheme: Scheme = algorithm
                .parse()
                .whatever_context("Can't parse algorithm name")?;
            let password = if from_stdin {
                read_password_from_stdin()?
            } else {
                prompt_password_confirm()?
            };

            let credential =
                hash_password(&password, scheme).whatever_context("Can't hash password")?;
            println!("{}:{}", username, credential);
            Ok(())
        }

        Commands::Verify {
            root,
            username,
            file_name,
            password: from_stdin,
        } => {
            let source = HtpasswdDir::new(file_name);
            let contents = source
                .lookup(&root)
                .whatever_context("Can't load credential file")?
                .with_whatever_context(|| {
                    format!("No credential file at '{}'", source.path_for(&root).display())
                })?;
            let entry =
                parse_credential_file(&contents).whatever_context("Can't parse credential file")?;
            snafu::ensure_whatever!(
                entry.username == username,
                "user {}: not found",
                username
            );

            let password = if from_stdin {
                read_password_from_stdin()?
            } else {
                prompt_password()?
            };

            let result = verify_secret(&password, entry.credential);
            debug!(%username, ok = result.is_ok(), "Password verified");
            match result {
                Ok(()) => {
                    println!("user {}: password correct", username);
                    Ok(())
                }
                Err(HashError::HashMismatch { .. }) => {
                    snafu::whatever!("user {}: password incorrect", username)
                }
                Err(e) => {
                    snafu::whatever!("user {}: {}", username, e)
                }
            }
        }

        Commands::Check {
            root,
            header,
            file_name,
            realm,
            fail_closed,
        } => {
            let policy = GatePolicy {
                malformed_file: if fail_closed {
                    MalformedFilePolicy::Deny
                } else {
                    MalformedFilePolicy::Allow
                },
            };
            let source = HtpasswdDir::new(file_name);

            let decision = Gate::new(policy).authorize_root(&source, &root, header.as_deref());
            debug!(root = %root.display(), %decision, "Checked document root");
            println!("{}", decision);

            match decision {
                Decision::Allow => Ok(()),
                Decision::Deny => {
                    println!("WWW-Authenticate: {}", challenge(&realm));
                    snafu::whatever!("access to '{}' denied", root.display())
                }
            }
        }
    }
}

#[snafu::report]
fn main() -> Result<()> {
    init_tracing();
    run()
}
