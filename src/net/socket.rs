//! Listening socket creation with dual-stack fallback.
//!
//! # Responsibilities
//! - Create stream sockets through an injectable factory
//! - Try dual-stack mode on the IPv6 unspecified address
//! - Fall back to IPv4 when the platform reports dual-stack as unsupported
//! - Apply socket options, bind and listen
//!
//! # Design Decisions
//! - OS error codes are classified once, in `SocketCapabilityError::classify`
//! - Address reuse is best-effort; some platforms refuse it
//! - Backlog 0 means the platform maximum (`SOMAXCONN`)

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};

/// Error type for binding a listening socket.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    /// Socket creation failed.
    #[error("failed to create socket for {addr}: {source}")]
    Create { addr: SocketAddr, source: io::Error },
    /// Failed to bind to address.
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    /// Failed to start listening.
    #[error("failed to listen on {addr}: {source}")]
    Listen { addr: SocketAddr, source: io::Error },
}

/// Platform-reported reasons a dual-stack socket cannot be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketCapabilityError {
    AddressFamilyNotSupported,
    ProtocolNotSupported,
    OperationNotSupported,
}

impl SocketCapabilityError {
    /// Classify an I/O error, returning `None` for errors that are not
    /// capability problems.
    pub fn classify(err: &io::Error) -> Option<Self> {
        if let Some(code) = err.raw_os_error() {
            if let Some(kind) = Self::from_os_code(code) {
                return Some(kind);
            }
        }
        match err.kind() {
            io::ErrorKind::Unsupported => Some(Self::OperationNotSupported),
            _ => None,
        }
    }

    #[cfg(unix)]
    fn from_os_code(code: i32) -> Option<Self> {
        match code {
            libc::EAFNOSUPPORT => Some(Self::AddressFamilyNotSupported),
            libc::EPROTONOSUPPORT => Some(Self::ProtocolNotSupported),
            libc::EOPNOTSUPP => Some(Self::OperationNotSupported),
            _ => None,
        }
    }

    #[cfg(windows)]
    fn from_os_code(code: i32) -> Option<Self> {
        const WSAEOPNOTSUPP: i32 = 10045;
        const WSAEPROTONOSUPPORT: i32 = 10043;
        const WSAEAFNOSUPPORT: i32 = 10047;
        match code {
            WSAEAFNOSUPPORT => Some(Self::AddressFamilyNotSupported),
            WSAEPROTONOSUPPORT => Some(Self::ProtocolNotSupported),
            WSAEOPNOTSUPP => Some(Self::OperationNotSupported),
            _ => None,
        }
    }

    #[cfg(not(any(unix, windows)))]
    fn from_os_code(_code: i32) -> Option<Self> {
        None
    }
}

/// Creates unbound stream sockets.
pub trait SocketFactory: Send + Sync + std::fmt::Debug {
    /// Create a TCP socket for `addr`'s family. For IPv6 sockets
    /// `dual_mode` selects whether IPv4-mapped clients are accepted.
    fn create(&self, addr: SocketAddr, dual_mode: bool) -> io::Result<Socket>;
}

/// Factory backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSocketFactory;

impl SocketFactory for SystemSocketFactory {
    fn create(&self, addr: SocketAddr, dual_mode: bool) -> io::Result<Socket> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        if addr.is_ipv6() {
            socket.set_only_v6(!dual_mode)?;
        }
        Ok(socket)
    }
}

/// Parameters for [`bind_listener`].
#[derive(Debug, Clone, Copy)]
pub struct BindOptions {
    pub addr: SocketAddr,
    pub enable_dual_mode: bool,
    /// 0 selects the platform maximum.
    pub backlog: u32,
}

/// A bound, listening, non-blocking socket.
#[derive(Debug)]
pub struct BoundSocket {
    pub listener: std::net::TcpListener,
    pub local_addr: SocketAddr,
    pub dual_mode: bool,
}

/// Create, configure, bind and listen.
pub fn bind_listener(factory: &dyn SocketFactory, options: BindOptions) -> Result<BoundSocket, BindError> {
    let requested = options.addr;
    let want_dual = options.enable_dual_mode && requested.ip() == IpAddr::V6(Ipv6Addr::UNSPECIFIED);

    let (socket, addr, dual_mode) = match factory.create(requested, want_dual) {
        Ok(socket) => (socket, requested, want_dual),
        Err(e) => match SocketCapabilityError::classify(&e) {
            Some(reason) if want_dual => {
                let fallback = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), requested.port());
                tracing::warn!(
                    address = %requested,
                    fallback = %fallback,
                    reason = ?reason,
                    error = %e,
                    "Dual-stack socket unavailable, falling back to IPv4"
                );
                let socket = factory
                    .create(fallback, false)
                    .map_err(|source| BindError::Create { addr: fallback, source })?;
                (socket, fallback, false)
            }
            _ => return Err(BindError::Create { addr: requested, source: e }),
        },
    };

    if let Err(e) = socket.set_reuse_address(true) {
        tracing::debug!(address = %addr, error = %e, "Address reuse not permitted, continuing");
    }

    socket
        .bind(&addr.into())
        .map_err(|source| BindError::Bind { addr, source })?;
    socket
        .listen(backlog(options.backlog))
        .map_err(|source| BindError::Listen { addr, source })?;
    socket
        .set_nonblocking(true)
        .map_err(|source| BindError::Listen { addr, source })?;

    let listener: std::net::TcpListener = socket.into();
    let local_addr = listener
        .local_addr()
        .map_err(|source| BindError::Bind { addr, source })?;

    tracing::info!(address = %local_addr, dual_mode, "Socket bound");

    Ok(BoundSocket {
        listener,
        local_addr,
        dual_mode,
    })
}

fn backlog(configured: u32) -> i32 {
    if configured == 0 {
        platform_max_backlog()
    } else {
        i32::try_from(configured).unwrap_or(i32::MAX)
    }
}

#[cfg(unix)]
fn platform_max_backlog() -> i32 {
    libc::SOMAXCONN
}

#[cfg(not(unix))]
fn platform_max_backlog() -> i32 {
    i32::MAX
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Refuses dual-stack IPv6 sockets the way IPv6-disabled hosts do.
    #[derive(Debug, Default)]
    struct NoIpv6Factory {
        calls: AtomicUsize,
    }

    impl SocketFactory for NoIpv6Factory {
        fn create(&self, addr: SocketAddr, dual_mode: bool) -> io::Result<Socket> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if addr.is_ipv6() {
                return Err(io::Error::from_raw_os_error(libc::EAFNOSUPPORT));
            }
            SystemSocketFactory.create(addr, dual_mode)
        }
    }

    #[derive(Debug)]
    struct DeniedFactory;

    impl SocketFactory for DeniedFactory {
        fn create(&self, _addr: SocketAddr, _dual_mode: bool) -> io::Result<Socket> {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        }
    }

    #[test]
    fn classifies_capability_errors() {
        let afno = io::Error::from_raw_os_error(libc::EAFNOSUPPORT);
        assert_eq!(
            SocketCapabilityError::classify(&afno),
            Some(SocketCapabilityError::AddressFamilyNotSupported)
        );
        let proto = io::Error::from_raw_os_error(libc::EPROTONOSUPPORT);
        assert_eq!(
            SocketCapabilityError::classify(&proto),
            Some(SocketCapabilityError::ProtocolNotSupported)
        );
        let op = io::Error::from_raw_os_error(libc::EOPNOTSUPP);
        assert_eq!(
            SocketCapabilityError::classify(&op),
            Some(SocketCapabilityError::OperationNotSupported)
        );
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(SocketCapabilityError::classify(&denied), None);
    }

    #[test]
    fn falls_back_to_ipv4_when_dual_stack_unsupported() {
        let factory = NoIpv6Factory::default();
        let bound = bind_listener(
            &factory,
            BindOptions {
                addr: "[::]:0".parse().unwrap(),
                enable_dual_mode: true,
                backlog: 0,
            },
        )
        .unwrap();

        assert!(bound.local_addr.is_ipv4());
        assert!(!bound.dual_mode);
        assert_eq!(factory.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn no_fallback_without_dual_mode() {
        let factory = NoIpv6Factory::default();
        let err = bind_listener(
            &factory,
            BindOptions {
                addr: "[::]:0".parse().unwrap(),
                enable_dual_mode: false,
                backlog: 0,
            },
        )
        .unwrap_err();
        assert!(matches!(err, BindError::Create { .. }));
        assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn other_creation_errors_are_fatal() {
        let err = bind_listener(
            &DeniedFactory,
            BindOptions {
                addr: "[::]:0".parse().unwrap(),
                enable_dual_mode: true,
                backlog: 16,
            },
        )
        .unwrap_err();
        assert!(matches!(err, BindError::Create { .. }));
    }

    #[test]
    fn binds_ipv4_loopback() {
        let bound = bind_listener(
            &SystemSocketFactory,
            BindOptions {
                addr: "127.0.0.1:0".parse().unwrap(),
                enable_dual_mode: true,
                backlog: 0,
            },
        )
        .unwrap();
        assert_eq!(bound.local_addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_ne!(bound.local_addr.port(), 0);
        assert!(!bound.dual_mode);
    }
}
