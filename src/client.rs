// src/client.rs

//! Control socket client used by the `pger` subcommands

use crate::daemon::Request;
use crate::error::{Error, Result};
use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::Path;
use tracing::debug;

/// Send one request to the daemon listening on `socket` and return its reply
///
/// The write half is closed after the request so the daemon sees the end of
/// input without waiting for a newline. There is no read timeout: an install
/// may take as long as the download does.
pub fn send_request(socket: &Path, request: &Request) -> Result<String> {
    if !socket.exists() {
        return Err(Error::NotFound(format!(
            "no daemon socket at {} (is `pger daemon` running?)",
            socket.display()
        )));
    }

    let mut stream = UnixStream::connect(socket).map_err(|e| {
        Error::ProtocolError(format!("Failed to connect to {}: {}", socket.display(), e))
    })?;

    let line = format!("{}\n", request);
    debug!("Sending '{}' to {}", line.trim_end(), socket.display());

    stream.write_all(line.as_bytes())?;
    stream.shutdown(Shutdown::Write)?;

    let mut reply = String::new();
    stream.read_to_string(&mut reply)?;
    Ok(reply)
}
