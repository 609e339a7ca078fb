// src/daemon/server.rs

//! Control daemon
//!
//! Accepts one connection at a time on a Unix domain socket, reads a single
//! request, dispatches it and writes a single text reply. Nothing runs
//! concurrently: a long install blocks the next client until it finishes.

use super::protocol::{Command, DeleteArgs, PackageArgs, Request, STOP_ACK, UpdateArgs};
use crate::cache::{CacheManager, FetchOutcome};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::installer::{Eviction, Installer};
use crate::registry::Registry;
use crate::registry::models::PackageRecord;
use crate::repository::{HttpRepository, PackageSource};
use std::fs;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long a connected client may stay silent before it is dropped
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after which a partially received request is taken as complete
pub const IDLE_GAP: Duration = Duration::from_millis(100);

/// Upper bound on the size of a single request
const MAX_REQUEST_BYTES: u64 = 4096;

/// Whether the accept loop keeps going after a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// The long-lived daemon, owning the socket and every collaborator
pub struct Daemon<S> {
    socket_path: PathBuf,
    listener: UnixListener,
    registry: Arc<Registry>,
    cache: CacheManager<S>,
    installer: Installer,
}

impl Daemon<HttpRepository> {
    /// Build the daemon described by `config` and bind its socket
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = Arc::new(Registry::open(config.registry_path())?);
        let source = HttpRepository::new(&config.repository, config.timeout())?;

        let cache = CacheManager::new(config.cache_dir.clone(), Arc::clone(&registry), source)?
            .with_retries(config.retries);
        let installer = Installer::new(
            config.install_dir.clone(),
            config.cache_dir.clone(),
            Arc::clone(&registry),
        )?;

        Self::start(&config.socket_path, registry, cache, installer)
    }
}

impl<S: PackageSource> Daemon<S> {
    /// Recover from a previous crash and bind the control socket
    ///
    /// Staging leftovers are purged first. A stale socket file is removed,
    /// unless something is still accepting connections on it.
    pub fn start(
        socket_path: &Path,
        registry: Arc<Registry>,
        cache: CacheManager<S>,
        installer: Installer,
    ) -> Result<Self> {
        registry.purge_stale_temp()?;
        cache.purge_staging()?;
        installer.purge_staging()?;

        if socket_path.exists() {
            if UnixStream::connect(socket_path).is_ok() {
                return Err(Error::InitError(format!(
                    "Another daemon is already listening on {}",
                    socket_path.display()
                )));
            }
            debug!("Removing stale socket {}", socket_path.display());
            fs::remove_file(socket_path).map_err(|e| {
                Error::InitError(format!(
                    "Failed to remove stale socket {}: {}",
                    socket_path.display(),
                    e
                ))
            })?;
        }

        if let Some(parent) = socket_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(socket_path).map_err(|e| {
            Error::InitError(format!("Failed to bind {}: {}", socket_path.display(), e))
        })?;
        fs::set_permissions(socket_path, fs::Permissions::from_mode(0o600))?;

        info!("pger daemon listening on {}", socket_path.display());

        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            listener,
            registry,
            cache,
            installer,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serve requests until `stop` arrives
    ///
    /// The socket file is removed when the daemon is dropped, so it is gone
    /// once this returns, whether by `stop` or by a fatal accept error.
    pub fn run(self) -> Result<()> {
        loop {
            let stream = match self.listener.accept() {
                Ok((stream, _)) => stream,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    debug!("Accept interrupted: {}", e);
                    continue;
                }
                Err(e) => {
                    error!("Failed to accept on {}: {}", self.socket_path.display(), e);
                    return Err(e.into());
                }
            };

            match self.serve(stream) {
                Ok(Flow::Stop) => break,
                Ok(Flow::Continue) => {}
                Err(e) => warn!("Connection dropped: {}", e),
            }
        }

        info!("pger daemon stopped");
        Ok(())
    }

    /// Read one request from `stream`, answer it and close the connection
    fn serve(&self, mut stream: UnixStream) -> Result<Flow> {
        let raw = read_request(&mut stream)?;

        let (reply, flow) = if raw.is_empty() {
            (
                format_error(&Error::ProtocolError("empty request".to_string())),
                Flow::Continue,
            )
        } else {
            match String::from_utf8(raw) {
                Ok(line) => self.respond(&line),
                Err(_) => (
                    format_error(&Error::ProtocolError(
                        "request is not valid UTF-8".to_string(),
                    )),
                    Flow::Continue,
                ),
            }
        };

        stream.write_all(reply.as_bytes())?;
        stream.flush()?;
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            debug!("Failed to shut down connection: {}", e);
        }

        Ok(flow)
    }

    /// Produce the reply to a single request line
    ///
    /// Never fails: every error becomes an `error: ...` reply.
    pub fn respond(&self, line: &str) -> (String, Flow) {
        let request = match Request::parse(line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejected request '{}': {}", line.trim(), e);
                return (format_error(&e), Flow::Continue);
            }
        };

        match request {
            Request::Stop => {
                info!("Stop requested");
                (STOP_ACK.to_string(), Flow::Stop)
            }
            Request::Call(command) => {
                debug!("Dispatching {}", command);
                let method = command.method();
                match self.dispatch(command) {
                    Ok(reply) => (reply, Flow::Continue),
                    Err(e) => {
                        if matches!(e, Error::StateError(_)) {
                            error!(
                                "{} left inconsistent state, operator attention required: {}",
                                method, e
                            );
                        } else {
                            warn!("{} failed: {}", method, e);
                        }
                        (format_error(&e), Flow::Continue)
                    }
                }
            }
        }
    }

    fn dispatch(&self, command: Command) -> Result<String> {
        match command {
            Command::Install(PackageArgs { id }) => {
                let outcome = self.cache.get_package(&id)?;
                let target = self.installer.install_package(&id)?;
                let note = match outcome {
                    FetchOutcome::Fetched => " (downloaded)",
                    FetchOutcome::AlreadyCached => "",
                };
                Ok(format!("{} installed at {}{}", id, target.display(), note))
            }
            Command::Delete(DeleteArgs {
                id,
                remove_from_cache,
            }) => {
                let eviction = self
                    .installer
                    .delete_package(&id, remove_from_cache, &self.cache)?;
                Ok(match eviction {
                    Eviction::NotRequested => format!("{} deleted", id),
                    Eviction::Evicted => format!("{} deleted and removed from cache", id),
                    Eviction::Failed(reason) => {
                        format!("{} deleted; cache eviction failed: {}", id, reason)
                    }
                })
            }
            Command::ClearCache => Ok(self.cache.clear_cache()?.to_string()),
            Command::UpdateCache(UpdateArgs { scope }) => {
                Ok(self.cache.sync(scope)?.to_string())
            }
            Command::List => Ok(format_records(&self.registry.list_all()?)),
        }
    }
}

impl<S> Drop for Daemon<S> {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.socket_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove socket {}: {}", self.socket_path.display(), e);
            }
        }
    }
}

/// Read a request: everything up to the first newline, end of input, or a
/// pause of `IDLE_GAP` once some bytes have arrived
///
/// A client that sends nothing within `READ_TIMEOUT` yields an empty request.
fn read_request(stream: &mut UnixStream) -> io::Result<Vec<u8>> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut raw = Vec::new();
    let mut chunk = [0u8; 1024];

    while (raw.len() as u64) < MAX_REQUEST_BYTES {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                raw.extend_from_slice(&chunk[..n]);
                if raw.contains(&b'\n') {
                    break;
                }
                stream.set_read_timeout(Some(IDLE_GAP))?;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                if raw.is_empty() {
                    debug!("Client sent nothing within {:?}", READ_TIMEOUT);
                }
                break;
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(end) = raw.iter().position(|&b| b == b'\n') {
        raw.truncate(end);
    }
    raw.truncate(MAX_REQUEST_BYTES as usize);
    Ok(raw)
}

fn format_error(e: &Error) -> String {
    format!("error: {}", e)
}

/// Render registry records as an aligned table
pub fn format_records(records: &[PackageRecord]) -> String {
    if records.is_empty() {
        return "no packages registered".to_string();
    }

    let name_width = records
        .iter()
        .map(|r| r.name.len())
        .chain(std::iter::once("NAME".len()))
        .max()
        .unwrap_or_default();
    let version_width = records
        .iter()
        .map(|r| r.version.len())
        .chain(std::iter::once("VERSION".len()))
        .max()
        .unwrap_or_default();

    let mut lines = vec![format!(
        "{:<nw$}  {:<vw$}  {:<8}  {:<9}  BUILT",
        "NAME",
        "VERSION",
        "IN_CACHE",
        "INSTALLED",
        nw = name_width,
        vw = version_width
    )];

    for record in records {
        let built = match record.built {
            Some(true) => "yes",
            Some(false) => "no",
            None => "-",
        };
        lines.push(format!(
            "{:<nw$}  {:<vw$}  {:<8}  {:<9}  {}",
            record.name,
            record.version,
            yes_no(record.in_cache),
            yes_no(record.installed),
            built,
            nw = name_width,
            vw = version_width
        ));
    }

    lines.join("\n")
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
