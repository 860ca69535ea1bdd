//! Socket multiplexer: mirrors the session to external clients.
//!
//! A listening Unix-domain or TCP socket joins the select set. Clients
//! receive every byte the device sends; bytes a client sends are
//! forwarded to the device, one per ready descriptor per loop
//! iteration.
use std::io::{ErrorKind, Read, Write};
use std::net::TcpListener;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixListener;
use std::path::PathBuf;

use nix::sys::select::FdSet;
use thiserror::Error;

use crate::diag;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("Invalid socket specification '{0}' (expected unix:<path> or inet:<port>)")]
    InvalidSpec(String),
    #[error("Could not create socket: {0}")]
    BindError(#[source] std::io::Error),
}

impl diag::DiagnosableError for SocketError {}

enum Listener {
    Unix(UnixListener, PathBuf),
    Tcp(TcpListener),
}

enum Client {
    Unix(std::os::unix::net::UnixStream),
    Tcp(std::net::TcpStream),
}

impl Client {
    fn fd(&self) -> RawFd {
        match self {
            Self::Unix(stream) => stream.as_raw_fd(),
            Self::Tcp(stream) => stream.as_raw_fd(),
        }
    }

    fn read_byte(&mut self) -> std::io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        let n = match self {
            Self::Unix(stream) => stream.read(&mut byte)?,
            Self::Tcp(stream) => stream.read(&mut byte)?,
        };
        Ok(if n == 0 { None } else { Some(byte[0]) })
    }

    fn write_byte(&mut self, byte: u8) -> std::io::Result<()> {
        match self {
            Self::Unix(stream) => stream.write_all(&[byte]),
            Self::Tcp(stream) => stream.write_all(&[byte]),
        }
    }
}

pub struct SocketMux {
    listener: Listener,
    clients: Vec<Client>,
}

impl SocketMux {
    pub fn new(spec: &str) -> Result<Self, SocketError> {
        let listener = if let Some(path) = spec.strip_prefix("unix:") {
            let path = PathBuf::from(path);
            // A stale socket file from a previous run blocks bind.
            let _ = std::fs::remove_file(&path);
            let listener = UnixListener::bind(&path).map_err(SocketError::BindError)?;
            listener
                .set_nonblocking(true)
                .map_err(SocketError::BindError)?;
            Listener::Unix(listener, path)
        } else if let Some(port) = spec.strip_prefix("inet:") {
            let port: u16 = port
                .parse()
                .map_err(|_| SocketError::InvalidSpec(spec.to_string()))?;
            let listener =
                TcpListener::bind(("0.0.0.0", port)).map_err(SocketError::BindError)?;
            listener
                .set_nonblocking(true)
                .map_err(SocketError::BindError)?;
            Listener::Tcp(listener)
        } else {
            return Err(SocketError::InvalidSpec(spec.to_string()));
        };

        Ok(Self {
            listener,
            clients: vec![],
        })
    }

    fn listener_fd(&self) -> RawFd {
        match &self.listener {
            Listener::Unix(listener, _) => listener.as_raw_fd(),
            Listener::Tcp(listener) => listener.as_raw_fd(),
        }
    }

    /// Contributes the listener and all clients to a select set.
    pub fn add_fds(&self, set: &mut FdSet) {
        set.insert(self.listener_fd());
        for client in &self.clients {
            set.insert(client.fd());
        }
    }

    fn accept(&mut self) {
        match &self.listener {
            Listener::Unix(listener, _) => {
                if let Ok((stream, _)) = listener.accept() {
                    let _ = stream.set_nonblocking(true);
                    self.clients.push(Client::Unix(stream));
                }
            }
            Listener::Tcp(listener) => {
                if let Ok((stream, _)) = listener.accept() {
                    let _ = stream.set_nonblocking(true);
                    self.clients.push(Client::Tcp(stream));
                }
            }
        }
    }

    /// Handles whatever socket descriptors are ready in `set`. Returns
    /// at most one byte to forward to the device.
    pub fn handle_input(&mut self, set: &FdSet) -> Option<u8> {
        if set.contains(self.listener_fd()) {
            self.accept();
        }

        let mut forward = None;
        let mut dead = vec![];
        for (i, client) in self.clients.iter_mut().enumerate() {
            if !set.contains(client.fd()) {
                continue;
            }
            match client.read_byte() {
                Ok(Some(byte)) => {
                    forward = Some(byte);
                    break;
                }
                Ok(None) => dead.push(i),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(_) => dead.push(i),
            }
        }
        for i in dead.into_iter().rev() {
            self.clients.remove(i);
        }
        forward
    }

    /// Mirrors one received byte to every client.
    pub fn write(&mut self, byte: u8) {
        self.clients.retain_mut(|client| {
            match client.write_byte(byte) {
                Ok(_) => true,
                Err(e) if e.kind() == ErrorKind::WouldBlock => true,
                Err(_) => false,
            }
        });
    }
}

impl Drop for SocketMux {
    fn drop(&mut self) {
        if let Listener::Unix(_, path) = &self.listener {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn rejects_unknown_spec() {
        assert!(matches!(
            SocketMux::new("carrier:pigeon"),
            Err(SocketError::InvalidSpec(_))
        ));
        assert!(matches!(
            SocketMux::new("inet:notaport"),
            Err(SocketError::InvalidSpec(_))
        ));
    }

    #[test]
    fn unix_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mux.sock");
        let spec = format!("unix:{}", path.display());
        let mut mux = SocketMux::new(&spec).unwrap();

        let mut peer = UnixStream::connect(&path).unwrap();

        // Accept the client.
        let mut set = FdSet::new();
        mux.add_fds(&mut set);
        assert!(mux.handle_input(&set).is_none());
        assert_eq!(mux.clients.len(), 1);

        // A client byte is decoded for forwarding.
        peer.write_all(b"x").unwrap();
        let mut set = FdSet::new();
        mux.add_fds(&mut set);
        assert_eq!(mux.handle_input(&set), Some(b'x'));

        // Device bytes are mirrored to the client.
        mux.write(b'y');
        let mut byte = [0u8; 1];
        peer.read_exact(&mut byte).unwrap();
        assert_eq!(byte[0], b'y');
    }
}
