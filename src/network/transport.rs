//! Transport
//!
//! Blocking byte stream to the store, over TCP or a Unix domain socket.
//! The reader thread owns one handle; a `try_clone` of it is the writer
//! held behind the connection's write lock.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::config::Endpoint;
use crate::error::{ClientError, Result};

pub(crate) enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    /// Open a stream to `endpoint`
    ///
    /// Every resolved address is tried in turn; the last failure is returned.
    pub(crate) fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Stream> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let mut last_error = None;
                for candidate in addr.to_socket_addrs()? {
                    match TcpStream::connect_timeout(&candidate, timeout) {
                        Ok(stream) => {
                            // Pipelined requests are small; don't let Nagle hold them back
                            stream.set_nodelay(true)?;
                            return Ok(Stream::Tcp(stream));
                        }
                        Err(e) => {
                            tracing::trace!("Connect to {} failed: {}", candidate, e);
                            last_error = Some(e);
                        }
                    }
                }
                Err(match last_error {
                    Some(e) => e.into(),
                    None => ClientError::Connection(format!("{} resolved to no addresses", addr)),
                })
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Stream::Unix(UnixStream::connect(path)?)),
        }
    }

    pub(crate) fn try_clone(&self) -> io::Result<Stream> {
        match self {
            Stream::Tcp(s) => s.try_clone().map(Stream::Tcp),
            #[cfg(unix)]
            Stream::Unix(s) => s.try_clone().map(Stream::Unix),
        }
    }

    pub(crate) fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.set_read_timeout(timeout),
            #[cfg(unix)]
            Stream::Unix(s) => s.set_read_timeout(timeout),
        }
    }

    /// Shut down both directions; wakes a reader blocked on any clone
    pub(crate) fn shutdown(&self) {
        let result = match self {
            Stream::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Stream::Unix(s) => s.shutdown(Shutdown::Both),
        };
        if let Err(e) = result {
            // NotConnected after the peer already went away
            tracing::trace!("Transport shutdown: {}", e);
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Stream::Unix(s) => s.flush(),
        }
    }
}
