/// Non-blocking UDP sockets for both ends of a stream.
///
/// Sender and receiver are written against [`DatagramSocket`] so they can be
/// driven by an in-memory socket in tests.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tracing::warn;

/// Kernel send buffer requested for the streaming socket (512 KB).
pub const SEND_BUF_SIZE: usize = 512 * 1024;

/// Kernel receive buffer requested for the viewing socket (4 MB).
pub const RECV_BUF_SIZE: usize = 4 * 1024 * 1024;

/// Minimal datagram socket interface used by the sender and receiver.
///
/// Implementations must be non-blocking: an empty receive queue or a full
/// send buffer is reported as `io::ErrorKind::WouldBlock`.
pub trait DatagramSocket {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

impl DatagramSocket for UdpSocket {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }
}

impl<T: DatagramSocket + ?Sized> DatagramSocket for &T {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        (**self).send_to(buf, addr)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        (**self).recv_from(buf)
    }
}

/// Create the streamer's socket: ephemeral local port, broadcast allowed,
/// enlarged send buffer, non-blocking.
pub fn bind_sender(dest: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(dest), Type::DGRAM, Some(Protocol::UDP))?;
    if dest.is_ipv4() {
        socket.set_broadcast(true)?;
    }
    if let Err(e) = socket.set_send_buffer_size(SEND_BUF_SIZE) {
        warn!("failed to set send buffer to {} bytes: {}", SEND_BUF_SIZE, e);
    }
    socket.set_nonblocking(true)?;

    let local: SocketAddr = if dest.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    socket.bind(&local.into())?;
    Ok(socket.into())
}

/// Create the viewer's socket bound to `addr`, with an enlarged receive
/// buffer, non-blocking.
pub fn bind_receiver(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if let Err(e) = socket.set_recv_buffer_size(RECV_BUF_SIZE) {
        warn!("failed to set recv buffer to {} bytes: {}", RECV_BUF_SIZE, e);
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Actual kernel buffer sizes `(send, recv)` granted for `socket`.
pub fn buffer_sizes(socket: &UdpSocket) -> io::Result<(usize, usize)> {
    let sock_ref = SockRef::from(socket);
    Ok((sock_ref.send_buffer_size()?, sock_ref.recv_buffer_size()?))
}
