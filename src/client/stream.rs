//! Non-blocking socket to the server.

use std::io::{self, Read, Write};
use std::net::{Shutdown, ToSocketAddrs};
use std::os::fd::{AsFd, BorrowedFd};
use std::time::Duration;

use socket2::{Domain, SockAddr, Socket, TcpKeepalive, Type};

use crate::opts::Opts;

pub enum Stream {
    Tcp(Socket),
    Unix(Socket),
}

impl Stream {
    /// Begin a non-blocking connect.
    ///
    /// Returns the stream and whether the connect already completed.
    pub fn connect(opts: &Opts) -> io::Result<(Self, bool)> {
        if let Some(path) = &opts.socket {
            let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
            socket.set_nonblocking(true)?;
            let done = start_connect(&socket, &SockAddr::unix(path)?)?;
            return Ok((Stream::Unix(socket), done));
        }

        if opts.host.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "host is empty"));
        }
        // Name resolution blocks; the address list is usually served from the
        // local resolver cache.
        let addr = (opts.host.as_str(), opts.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address for {}", opts.host),
                )
            })?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
        socket.set_nonblocking(true)?;
        socket.set_nodelay(true)?;
        if let Some(idle) = opts.tcp_keepalive {
            socket.set_tcp_keepalive(&keepalive(idle))?;
        }
        let done = start_connect(&socket, &addr.into())?;
        Ok((Stream::Tcp(socket), done))
    }

    fn socket(&self) -> &Socket {
        match self {
            Stream::Tcp(s) | Stream::Unix(s) => s,
        }
    }

    /// Check on an in-progress connect. `Ok(false)` while still pending.
    pub fn finish_connect(&self) -> io::Result<bool> {
        let socket = self.socket();
        if let Some(err) = socket.take_error()? {
            return Err(err);
        }
        match socket.peer_addr() {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut socket = self.socket();
        socket.read(buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut socket = self.socket();
        socket.write(buf)
    }

    pub fn shutdown(&self) {
        // The peer may already be gone.
        let _ = self.socket().shutdown(Shutdown::Both);
    }
}

impl AsFd for Stream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket().as_fd()
    }
}

fn start_connect(socket: &Socket, addr: &SockAddr) -> io::Result<bool> {
    match socket.connect(addr) {
        Ok(()) => Ok(true),
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

fn keepalive(idle: Duration) -> TcpKeepalive {
    let keepalive = TcpKeepalive::new()
        .with_time(idle)
        .with_interval(idle / 2 + Duration::from_secs(1));

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    let keepalive = keepalive.with_retries(3);

    keepalive
}
