//! git-wire: a smart-protocol synchronization client.
//!
//! Exit codes: 0 success, 1 the remote reported a failure, 2 local or
//! transport failure, 3 usage error.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use bstr::{BStr, BString};
use clap::{Parser, Subcommand};

use git_wire_core::progress::{Discard, ProgressSink, WriteSink};
use git_wire_core::transport::{tcp, HttpTransport, Timeouts, Transport};
use git_wire_fetch::{DeepenSpec, FetchOptions, RefUpdateOutcome};
use git_wire_push::{PushOptions, RefStatus};

mod fs_store;
mod http;

use fs_store::FsStore;
use http::ReqwestRequester;

#[derive(Debug, Parser)]
#[command(name = "git-wire", version, about = "Synchronize with git servers over git:// and smart HTTP")]
struct Cli {
    /// Show transfer progress even when stderr is not a terminal.
    #[arg(long, global = true)]
    progress: bool,

    /// Local repository directory (defaults to the current directory).
    #[arg(long, global = true, default_value = ".")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// List the remote's refs.
    Ls {
        /// Remote URL (`git://…` or `http(s)://…`).
        uri: String,
    },
    /// Fetch everything into a fresh repository.
    Clone {
        /// Remote URL.
        uri: String,
        /// Target directory; derived from the URL when omitted.
        target: Option<PathBuf>,
        /// Create a shallow clone of this depth.
        #[arg(long)]
        depth: Option<u32>,
    },
    /// Fetch every remote ref and update the local ones.
    FetchAll {
        /// Remote URL.
        uri: String,
    },
    /// Fetch one ref by name.
    FetchOne {
        /// Remote URL.
        uri: String,
        /// Full ref name, e.g. `refs/heads/main`.
        name: String,
    },
    /// Push local refs, creating or fast-forwarding them on the remote.
    Push {
        /// Remote URL.
        uri: String,
        /// Full ref names to push; all local refs when omitted.
        names: Vec<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::from(3),
            };
        }
    };

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("git-wire: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

/// One error shape for the front-end, classifying into exit codes.
#[derive(Debug)]
enum AppError {
    /// The remote reported a failure (ERR line, band 3, rejected push).
    Remote(String),
    /// Everything else: local store, transport, protocol trouble.
    Local(String),
}

impl AppError {
    fn exit_code(&self) -> u8 {
        match self {
            AppError::Remote(_) => 1,
            AppError::Local(_) => 2,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Remote(message) | AppError::Local(message) => f.write_str(message),
        }
    }
}

impl From<git_wire_core::Error> for AppError {
    fn from(err: git_wire_core::Error) -> Self {
        match err {
            git_wire_core::Error::Remote(message) => AppError::Remote(message.to_string()),
            other => AppError::Local(other.to_string()),
        }
    }
}

impl From<git_wire_fetch::Error> for AppError {
    fn from(err: git_wire_fetch::Error) -> Self {
        match err {
            git_wire_fetch::Error::Core(core) => core.into(),
            other => AppError::Local(other.to_string()),
        }
    }
}

impl From<git_wire_push::Error> for AppError {
    fn from(err: git_wire_push::Error) -> Self {
        match err {
            git_wire_push::Error::Core(core) => core.into(),
            other => AppError::Local(other.to_string()),
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, AppError> {
    let mut transport = open_transport(&cli.uri())?;
    let mut progress = progress_sink(cli.progress);

    match cli.command {
        Cmd::Ls { .. } => {
            let advertisement = git_wire_fetch::ls(transport.as_mut())?;
            for entry in &advertisement.refs {
                let suffix = if entry.peeled { "^{}" } else { "" };
                println!("{}\t{}{}", entry.target, entry.name, suffix);
            }
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Clone { uri, target, depth } => {
            let target = target.unwrap_or_else(|| derive_clone_dir(&uri));
            let mut store =
                FsStore::open(&target).map_err(|err| AppError::Local(err.to_string()))?;
            let options = FetchOptions {
                deepen: depth.map(DeepenSpec::Depth),
                ..Default::default()
            };
            let outcome = git_wire_fetch::clone(
                transport.as_mut(),
                &mut store,
                &options,
                progress.as_mut(),
            )?;
            report_ref_updates(&outcome)
        }
        Cmd::FetchAll { .. } => {
            let mut store =
                FsStore::open(&cli.dir).map_err(|err| AppError::Local(err.to_string()))?;
            let outcome = git_wire_fetch::fetch_all(
                transport.as_mut(),
                &mut store,
                &FetchOptions::default(),
                progress.as_mut(),
            )?;
            report_ref_updates(&outcome)
        }
        Cmd::FetchOne { name, .. } => {
            let mut store =
                FsStore::open(&cli.dir).map_err(|err| AppError::Local(err.to_string()))?;
            let name: &BStr = name.as_bytes().into();
            let outcome = git_wire_fetch::fetch_one(
                transport.as_mut(),
                &mut store,
                name,
                &FetchOptions::default(),
                progress.as_mut(),
            )?;
            report_ref_updates(&outcome)
        }
        Cmd::Push { names, .. } => {
            let store =
                FsStore::open(&cli.dir).map_err(|err| AppError::Local(err.to_string()))?;
            let names: Vec<BString> = names.iter().map(|n| BString::from(n.as_str())).collect();
            let selection = if names.is_empty() {
                None
            } else {
                Some(names.as_slice())
            };
            let outcome = git_wire_push::update_and_create(
                transport.as_mut(),
                &store,
                selection,
                &PushOptions::default(),
                progress.as_mut(),
            )?;
            for name in &outcome.skipped {
                eprintln!("skipped {name}: remote tip unknown locally, fetch first");
            }
            let mut rejected = false;
            if let Some(reason) = &outcome.report.unpack_error {
                eprintln!("remote failed to unpack: {reason}");
                rejected = true;
            }
            for entry in &outcome.report.refs {
                match &entry.status {
                    RefStatus::Ok => println!("ok\t{}", entry.name),
                    RefStatus::Rejected(reason) => {
                        println!("rejected\t{}\t{}", entry.name, reason);
                        rejected = true;
                    }
                }
            }
            if rejected {
                Ok(ExitCode::from(1))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

impl Cli {
    fn uri(&self) -> String {
        match &self.command {
            Cmd::Ls { uri }
            | Cmd::Clone { uri, .. }
            | Cmd::FetchAll { uri }
            | Cmd::FetchOne { uri, .. }
            | Cmd::Push { uri, .. } => uri.clone(),
        }
    }
}

fn open_transport(uri: &str) -> Result<Box<dyn Transport>, AppError> {
    if uri.starts_with("git://") {
        let transport = tcp::connect(uri, Timeouts::default())?;
        Ok(Box::new(transport))
    } else if uri.starts_with("http://") || uri.starts_with("https://") {
        let requester = ReqwestRequester::new()?;
        Ok(Box::new(HttpTransport::new(requester, uri)))
    } else {
        Err(AppError::Local(format!(
            "unsupported URL scheme in {uri}; use git:// or http(s)://"
        )))
    }
}

fn progress_sink(force: bool) -> Box<dyn ProgressSink> {
    if force || std::io::stderr().is_terminal() {
        Box::new(WriteSink::new(std::io::stderr()))
    } else {
        Box::new(Discard)
    }
}

fn derive_clone_dir(uri: &str) -> PathBuf {
    let tail = uri
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("repository");
    PathBuf::from(tail.trim_end_matches(".git"))
}

fn report_ref_updates(outcome: &RefUpdateOutcome) -> Result<ExitCode, AppError> {
    for (name, id) in &outcome.updated {
        println!("{id}\t{name}");
    }
    if let Some(failure) = &outcome.failure {
        eprintln!("ref updates stopped: {failure}");
        for (name, _) in &outcome.pending {
            eprintln!("pending\t{name}");
        }
        return Err(AppError::Local(format!(
            "{} refs not updated",
            outcome.pending.len()
        )));
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_dir_derivation() {
        assert_eq!(
            derive_clone_dir("https://example.com/group/project.git"),
            PathBuf::from("project")
        );
        assert_eq!(
            derive_clone_dir("git://example.com/project"),
            PathBuf::from("project")
        );
    }
}
