//! Raw socket operations
//!
//! The TLS layer does not own an event loop. It needs three things from the
//! byte-stream socket it wraps: a file descriptor to bind the TLS session to,
//! and two independent notifications telling the surrounding event mechanism
//! that the socket should be watched for reads or writes.
//!
//! `TcpSocket` is the stock implementation. It records the registered
//! interest and can wait on it with `poll(2)`.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

/// Socket operations required by the TLS layer
pub trait SocketOps: AsRawFd {
    /// Ask the event mechanism to watch this socket for reads
    fn register_read(&mut self);

    /// Ask the event mechanism to watch this socket for writes
    fn register_write(&mut self);
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

impl PollEvents {
    fn with(current: Option<PollEvents>, added: PollEvents) -> PollEvents {
        match (current, added) {
            (None, added) => added,
            (Some(PollEvents::Both), _) | (_, PollEvents::Both) => PollEvents::Both,
            (Some(PollEvents::Read), PollEvents::Write)
            | (Some(PollEvents::Write), PollEvents::Read) => PollEvents::Both,
            (Some(current), _) => current,
        }
    }

    fn to_poll_mask(self) -> libc::c_short {
        match self {
            PollEvents::Read => libc::POLLIN,
            PollEvents::Write => libc::POLLOUT,
            PollEvents::Both => libc::POLLIN | libc::POLLOUT,
        }
    }

    fn from_revents(revents: libc::c_short) -> Option<PollEvents> {
        // Hangups and errors surface as readable so the next read observes them
        let readable = revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0;
        let writable = revents & libc::POLLOUT != 0;
        match (readable, writable) {
            (true, true) => Some(PollEvents::Both),
            (true, false) => Some(PollEvents::Read),
            (false, true) => Some(PollEvents::Write),
            (false, false) => None,
        }
    }
}

/// Number of readiness registrations seen per direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registrations {
    pub read: usize,
    pub write: usize,
}

/// Blocking TCP socket with registered readiness interest
pub struct TcpSocket {
    socket: Socket,
    interest: Option<PollEvents>,
    registrations: Registrations,
}

impl TcpSocket {
    /// Open a blocking TCP connection to `addr`
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.connect(&SockAddr::from(addr))?;
        Ok(TcpSocket::from(socket))
    }

    /// Currently registered interest, if any
    pub fn interest(&self) -> Option<PollEvents> {
        self.interest
    }

    /// Take the registered interest, leaving none behind
    pub fn take_interest(&mut self) -> Option<PollEvents> {
        self.interest.take()
    }

    /// Registration counters since the socket was created
    pub fn registrations(&self) -> Registrations {
        self.registrations
    }

    /// Wait until the socket is ready for the registered interest
    ///
    /// Returns `Ok(None)` on timeout or when nothing is registered.
    pub fn poll(&self, timeout: Option<Duration>) -> io::Result<Option<PollEvents>> {
        let Some(interest) = self.interest else {
            return Ok(None);
        };

        let mut pfd = libc::pollfd {
            fd: self.socket.as_raw_fd(),
            events: interest.to_poll_mask(),
            revents: 0,
        };

        let timeout_ms = timeout
            .map(|d| i32::try_from(d.as_millis()).unwrap_or(i32::MAX))
            .unwrap_or(-1); // -1 = infinite

        let result = unsafe { libc::poll(&mut pfd as *mut libc::pollfd, 1, timeout_ms) };

        if result < 0 {
            return Err(io::Error::last_os_error());
        }
        if result == 0 {
            return Ok(None);
        }

        Ok(PollEvents::from_revents(pfd.revents))
    }

    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.socket.set_nodelay(nodelay)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket
            .peer_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "not an inet socket"))
    }

    /// Shut down the TCP connection in the given direction
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        self.socket.shutdown(how)
    }
}

impl From<Socket> for TcpSocket {
    fn from(socket: Socket) -> Self {
        TcpSocket {
            socket,
            interest: None,
            registrations: Registrations::default(),
        }
    }
}

impl From<TcpStream> for TcpSocket {
    fn from(stream: TcpStream) -> Self {
        TcpSocket::from(Socket::from(stream))
    }
}

impl AsRawFd for TcpSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl SocketOps for TcpSocket {
    fn register_read(&mut self) {
        self.registrations.read += 1;
        self.interest = Some(PollEvents::with(self.interest, PollEvents::Read));
    }

    fn register_write(&mut self) {
        self.registrations.write += 1;
        self.interest = Some(PollEvents::with(self.interest, PollEvents::Write));
    }
}
