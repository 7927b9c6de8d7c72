use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::Path;

use nfsup_core::Signal;

use crate::error::{io_err, DaemonError};
use crate::session::MAX_FRAME;

/// Send one signal to the daemon at `socket` and return its reply line.
pub fn send_signal(socket: &Path, signal: Signal) -> Result<String, DaemonError> {
    send_raw(socket, signal.token())
}

/// Send an arbitrary payload; the daemon answers unknown tokens too.
pub fn send_raw(socket: &Path, payload: &str) -> Result<String, DaemonError> {
    if payload.is_empty() || payload.len() > MAX_FRAME {
        return Err(DaemonError::Protocol(format!(
            "payload must be 1..={MAX_FRAME} bytes, got {}",
            payload.len()
        )));
    }
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning {
            socket: socket.to_path_buf(),
        });
    }

    let mut stream = UnixStream::connect(socket).map_err(|err| {
        if matches!(
            err.kind(),
            ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.to_path_buf(),
            }
        } else {
            io_err(socket, err)
        }
    })?;

    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(socket, e))?;
    stream.flush().map_err(|e| io_err(socket, e))?;
    stream
        .shutdown(Shutdown::Write)
        .map_err(|e| io_err(socket, e))?;

    let mut reply = String::new();
    stream
        .read_to_string(&mut reply)
        .map_err(|e| io_err(socket, e))?;
    if reply.is_empty() {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn missing_socket_means_not_running() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("nfsup-test.sock");
        let err = send_signal(&socket, Signal::Status).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }

    #[test]
    fn stale_socket_means_not_running() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("nfsup-test.sock");
        drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());

        let err = send_signal(&socket, Signal::BuildDone).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }), "got {err:?}");
    }

    #[test]
    fn oversized_payload_is_refused_locally() {
        let dir = TempDir::new().unwrap();
        let payload = "x".repeat(MAX_FRAME + 1);
        let err = send_raw(&dir.path().join("s.sock"), &payload).unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(_)));
    }
}
