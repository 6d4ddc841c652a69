//! Raw ICMP / ICMPv6 sockets on Linux.
//!
//! Sockets are created with `socket2`, registered with the tokio reactor via
//! [`AsyncFd`], and read with `recvmsg(2)` so the TTL / hop limit and the
//! destination address of every datagram come back as control messages.
//! Opening them needs `CAP_NET_RAW`.

use std::fmt;
use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::fd::AsRawFd;
use std::ptr;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::io::unix::AsyncFd;

use super::frame::IpFamily;

/// `SOL_RAW` socket level.
const SOL_RAW: libc::c_int = 255;
/// `ICMP_FILTER` option of raw ICMPv4 sockets (bit set = type blocked).
const ICMP_FILTER: libc::c_int = 1;
/// `ICMP6_FILTER` option of raw ICMPv6 sockets (bit set = type blocked).
const ICMP6_FILTER: libc::c_int = 1;

/// Address of the peer a datagram came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    /// IP address.
    pub ip: IpAddr,
    /// IPv6 zone (interface) for scoped addresses.
    pub zone: Option<String>,
}

impl PeerAddr {
    /// Address without zone.
    pub fn new(ip: IpAddr) -> Self {
        Self { ip, zone: None }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.zone {
            Some(zone) => write!(f, "{}%{}", self.ip, zone),
            None => write!(f, "{}", self.ip),
        }
    }
}

/// One datagram read from an [`IcmpSocket`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Bytes written into the caller's buffer.
    pub len: usize,
    /// Sender of the datagram.
    pub source: PeerAddr,
    /// Local address the datagram was sent to, if reported.
    pub destination: Option<IpAddr>,
    /// TTL / hop limit of the datagram, if reported.
    pub hop_limit: Option<u8>,
}

/// Async raw ICMP socket of one address family.
#[derive(Debug)]
pub struct IcmpSocket {
    inner: AsyncFd<Socket>,
    family: IpFamily,
}

impl IcmpSocket {
    /// Open a raw socket for sending probes, optionally bound to `source`.
    ///
    /// Incoming ICMP is filtered out: these sockets are never read, and the
    /// receiver sockets already see every reply.
    pub fn bind(family: IpFamily, source: Option<IpAddr>) -> io::Result<Self> {
        let socket = open_raw(family)?;
        if let Some(source) = source {
            socket.bind(&SockAddr::from(SocketAddr::new(source, 0)))?;
        }
        if let Err(e) = block_all_inbound(&socket, family) {
            tracing::debug!(%family, error = %e, "could not install ICMP filter");
        }
        Self::register(socket, family)
    }

    /// Open a raw socket for receiving replies on all interfaces.
    ///
    /// TTL / hop limit and destination address reporting is enabled.
    pub fn listen(family: IpFamily) -> io::Result<Self> {
        let socket = open_raw(family)?;
        match family {
            IpFamily::V4 => {
                set_flag(&socket, libc::IPPROTO_IP, libc::IP_RECVTTL)?;
                set_flag(&socket, libc::IPPROTO_IP, libc::IP_PKTINFO)?;
            }
            IpFamily::V6 => {
                set_flag(&socket, libc::IPPROTO_IPV6, libc::IPV6_RECVHOPLIMIT)?;
                set_flag(&socket, libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO)?;
            }
        }
        Self::register(socket, family)
    }

    fn register(socket: Socket, family: IpFamily) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self {
            inner: AsyncFd::new(socket)?,
            family,
        })
    }

    /// Address family of the socket.
    pub fn family(&self) -> IpFamily {
        self.family
    }

    /// Send an ICMP message to `addr`. The port of `addr` is ignored.
    pub async fn send_to(&self, message: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let mut addr = addr;
        addr.set_port(0);
        let addr = SockAddr::from(addr);
        loop {
            let mut guard = self.inner.writable().await?;
            match guard.try_io(|inner| inner.get_ref().send_to(message, &addr)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive the next datagram into `buf`.
    ///
    /// For IPv4 the buffer starts with the IP header; for IPv6 with the
    /// ICMPv6 message.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<Datagram> {
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|inner| recv_with_metadata(inner.get_ref(), &mut *buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

fn open_raw(family: IpFamily) -> io::Result<Socket> {
    let (domain, protocol) = match family {
        IpFamily::V4 => (Domain::IPV4, Protocol::ICMPV4),
        IpFamily::V6 => (Domain::IPV6, Protocol::ICMPV6),
    };
    Socket::new(domain, Type::RAW, Some(protocol))
}

fn set_flag(socket: &Socket, level: libc::c_int, name: libc::c_int) -> io::Result<()> {
    let one: libc::c_int = 1;
    setsockopt(socket, level, name, &one)
}

fn block_all_inbound(socket: &Socket, family: IpFamily) -> io::Result<()> {
    match family {
        IpFamily::V4 => setsockopt(socket, SOL_RAW, ICMP_FILTER, &u32::MAX),
        IpFamily::V6 => setsockopt(socket, libc::IPPROTO_ICMPV6, ICMP6_FILTER, &[u32::MAX; 8]),
    }
}

fn setsockopt<T>(socket: &Socket, level: libc::c_int, name: libc::c_int, value: &T) -> io::Result<()> {
    // SAFETY: `value` points to a live `T` of exactly the length passed.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            (value as *const T).cast::<libc::c_void>(),
            mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn recv_with_metadata(socket: &Socket, buf: &mut [u8]) -> io::Result<Datagram> {
    // SAFETY: all-zero is a valid `sockaddr_storage` and `msghdr`.
    let mut name: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut control = [0u64; 32];
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = ptr::addr_of_mut!(name).cast();
    msg.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast();
    msg.msg_controllen = mem::size_of_val(&control) as _;

    // SAFETY: `msg` points at buffers that outlive the call.
    let n = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let source = peer_from_storage(&name)?;
    let mut datagram = Datagram {
        len: n as usize,
        source,
        destination: None,
        hop_limit: None,
    };

    // SAFETY: the kernel filled `control` with `msg_controllen` bytes of
    // well-formed cmsgs; CMSG_* walk them without leaving that range, and
    // payloads are read unaligned.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            let data = libc::CMSG_DATA(cmsg);
            match ((*cmsg).cmsg_level, (*cmsg).cmsg_type) {
                (libc::IPPROTO_IP, libc::IP_TTL) | (libc::IPPROTO_IPV6, libc::IPV6_HOPLIMIT) => {
                    let value = ptr::read_unaligned(data.cast::<libc::c_int>());
                    datagram.hop_limit = u8::try_from(value).ok();
                }
                (libc::IPPROTO_IP, libc::IP_PKTINFO) => {
                    let info = ptr::read_unaligned(data.cast::<libc::in_pktinfo>());
                    let addr = Ipv4Addr::from(u32::from_be(info.ipi_addr.s_addr));
                    datagram.destination = Some(IpAddr::V4(addr));
                }
                (libc::IPPROTO_IPV6, libc::IPV6_PKTINFO) => {
                    let info = ptr::read_unaligned(data.cast::<libc::in6_pktinfo>());
                    let addr = Ipv6Addr::from(info.ipi6_addr.s6_addr);
                    datagram.destination = Some(IpAddr::V6(addr));
                }
                _ => {}
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok(datagram)
}

fn peer_from_storage(storage: &libc::sockaddr_storage) -> io::Result<PeerAddr> {
    match libc::c_int::from(storage.ss_family) {
        libc::AF_INET => {
            // SAFETY: ss_family says the storage holds a sockaddr_in.
            let addr = unsafe { ptr::read_unaligned(ptr::from_ref(storage).cast::<libc::sockaddr_in>()) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            Ok(PeerAddr::new(IpAddr::V4(ip)))
        }
        libc::AF_INET6 => {
            // SAFETY: ss_family says the storage holds a sockaddr_in6.
            let addr = unsafe { ptr::read_unaligned(ptr::from_ref(storage).cast::<libc::sockaddr_in6>()) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let zone = (addr.sin6_scope_id != 0).then(|| zone_name(addr.sin6_scope_id));
            Ok(PeerAddr {
                ip: IpAddr::V6(ip),
                zone,
            })
        }
        family => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected address family {family}"),
        )),
    }
}

/// Interface name of `index`, or the index itself if it has none.
fn zone_name(index: u32) -> String {
    let mut name = [0 as libc::c_char; libc::IF_NAMESIZE];
    // SAFETY: `name` has room for IF_NAMESIZE bytes as required.
    let found = unsafe { libc::if_indextoname(index, name.as_mut_ptr()) };
    if found.is_null() {
        return index.to_string();
    }
    // SAFETY: on success the buffer holds a NUL-terminated string.
    unsafe { std::ffi::CStr::from_ptr(name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}
