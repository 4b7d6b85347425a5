//! Raw UDP transport
//!
//! Client-style endpoints are connected sockets: `open` resolves the peer
//! once and subsequent `send`/`recv` name no address. Servers own one worker
//! thread apiece, looping on a blocking `recv_from` and handing each datagram
//! to a registered handler. A zero-length receive is the in-band shutdown
//! signal for a server loop, never a valid datagram.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, warn};

use crate::error::{CilError, CilResult};

/// Resolve a host name and port to a socket address. Numeric addresses are
/// accepted directly; anything else goes through a hostname lookup. A failed
/// lookup is a reported error, not a crash.
fn resolve(host: &str, port: u16) -> CilResult<SocketAddr> {
    if let Ok(addr) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(addr, port));
    }
    (host, port)
        .to_socket_addrs()
        .map_err(|_| CilError::Resolve(host.to_string()))?
        .next()
        .ok_or_else(|| CilError::Resolve(host.to_string()))
}

/// A UDP endpoint used for command sending and short-lived reply connections.
pub struct UdpEndpoint {
    socket: UdpSocket,
}

impl UdpEndpoint {
    /// Open an endpoint connected to `host:port`.
    pub fn open(host: &str, port: u16) -> CilResult<Self> {
        let addr = resolve(host, port)?;
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(addr)?;
        debug!("udp: opened endpoint to {}", addr);
        Ok(Self { socket })
    }

    /// Open an unconnected endpoint for use with [`UdpEndpoint::send_to`].
    pub fn open_unconnected() -> CilResult<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        Ok(Self { socket })
    }

    /// Send the whole buffer as one datagram. A partial send is an error,
    /// not retried.
    pub fn send(&self, bytes: &[u8]) -> CilResult<()> {
        let sent = self.socket.send(bytes)?;
        if sent != bytes.len() {
            return Err(CilError::PartialSend {
                sent,
                expected: bytes.len(),
            });
        }
        debug!("udp: sent {} bytes", sent);
        Ok(())
    }

    /// Send the whole buffer to `host:port`, resolving the destination per
    /// call. Used by the SDB submission path.
    pub fn send_to(&self, host: &str, port: u16, bytes: &[u8]) -> CilResult<()> {
        let addr = resolve(host, port)?;
        let sent = self.socket.send_to(bytes, addr)?;
        if sent != bytes.len() {
            return Err(CilError::PartialSend {
                sent,
                expected: bytes.len(),
            });
        }
        debug!("udp: sent {} bytes to {}", sent, addr);
        Ok(())
    }

    /// Blocking receive of an exact-length datagram.
    pub fn recv(&self, expected_length: usize) -> CilResult<Vec<u8>> {
        let mut buf = vec![0u8; expected_length];
        let got = self.socket.recv(&mut buf)?;
        if got != expected_length {
            return Err(CilError::RecvLength {
                got,
                expected: expected_length,
            });
        }
        debug!("udp: received {} bytes", got);
        Ok(buf)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> CilResult<()> {
        self.socket.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn local_addr(&self) -> CilResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Shut the socket down for both directions. This wakes any thread
    /// blocked in a receive on the same socket.
    pub fn close(&self) -> CilResult<()> {
        let ret = unsafe { libc::shutdown(self.socket.as_raw_fd(), libc::SHUT_RDWR) };
        if ret != 0 {
            return Err(CilError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

/// A supervised UDP server: one worker thread looping on blocking receives.
///
/// The worker exits on a zero-length receive or a receive error; `stop`
/// triggers the former deliberately and joins the thread.
pub struct UdpServer {
    port: u16,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl UdpServer {
    /// Bind `0.0.0.0:port` (port 0 lets the OS choose) and start the worker.
    ///
    /// Each datagram of up to `datagram_length` bytes is passed to `handler`
    /// with its actual length and the peer it came from; short datagrams are
    /// logged and passed anyway, leaving length validation to the handler.
    /// Handler failures are logged and never stop the server.
    pub fn start<H>(port: u16, datagram_length: usize, mut handler: H) -> CilResult<Self>
    where
        H: FnMut(&[u8], SocketAddr) -> CilResult<()> + Send + 'static,
    {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        let port = socket.local_addr()?.port();
        let running = Arc::new(AtomicBool::new(true));
        let worker_running = running.clone();

        let handle = thread::Builder::new()
            .name(format!("udp-server-{}", port))
            .spawn(move || {
                let mut buf = vec![0u8; datagram_length];
                loop {
                    match socket.recv_from(&mut buf) {
                        Ok((0, _)) => {
                            debug!("udp server {}: zero-length receive, stopping", port);
                            break;
                        }
                        Ok((got, peer)) => {
                            if got < datagram_length {
                                warn!(
                                    "udp server {}: short datagram from {} ({} of {} bytes)",
                                    port, peer, got, datagram_length
                                );
                            }
                            if let Err(e) = handler(&buf[..got], peer) {
                                error!("udp server {}: handler failed: {}", port, e);
                            }
                        }
                        Err(e) => {
                            if worker_running.load(Ordering::SeqCst) {
                                error!("udp server {}: receive failed: {}", port, e);
                            }
                            break;
                        }
                    }
                }
                worker_running.store(false, Ordering::SeqCst);
            })?;

        Ok(Self {
            port,
            running,
            handle: Some(handle),
        })
    }

    /// The bound port, useful when started with port 0.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the worker and wait for it to exit. The wake-up is the
    /// protocol's own termination signal: a zero-length datagram.
    pub fn stop(&mut self) -> CilResult<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let socket = UdpSocket::bind(("127.0.0.1", 0))?;
            socket.send_to(&[], ("127.0.0.1", self.port))?;
            handle
                .join()
                .map_err(|_| CilError::Config("server worker panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for UdpServer {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_resolve_numeric() {
        let addr = resolve("127.0.0.1", 13024).unwrap();
        assert_eq!(addr.port(), 13024);
    }

    #[test]
    fn test_resolve_failure() {
        let err = resolve("no-such-host.invalid", 13024).unwrap_err();
        assert!(matches!(err, CilError::Resolve(_)));
    }

    #[test]
    fn test_endpoint_send_recv() {
        let receiver = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let port = receiver.local_addr().unwrap().port();

        let endpoint = UdpEndpoint::open("127.0.0.1", port).unwrap();
        endpoint.send(b"hello").unwrap();

        let mut buf = [0u8; 16];
        let (got, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..got], b"hello");
    }

    #[test]
    fn test_server_dispatches_datagram() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let mut server = UdpServer::start(0, 16, move |bytes, _peer| {
            assert_eq!(bytes, b"ping");
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        let client = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        client.send_to(b"ping", ("127.0.0.1", server.port())).unwrap();

        // Give the worker a moment to process, then stop and join.
        for _ in 0..100 {
            if count.load(Ordering::SeqCst) == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        server.stop().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_server_zero_length_terminates_without_handler() {
        let invoked = Arc::new(AtomicBool::new(false));
        let invoked_clone = invoked.clone();
        let server = UdpServer::start(0, 16, move |_, _| {
            invoked_clone.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        let client = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        client.send_to(&[], ("127.0.0.1", server.port())).unwrap();

        for _ in 0..100 {
            if !server.is_running() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!server.is_running());
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[test]
    fn test_server_passes_short_datagram() {
        let lengths = Arc::new(AtomicUsize::new(0));
        let lengths_clone = lengths.clone();
        let mut server = UdpServer::start(0, 44, move |bytes, _peer| {
            lengths_clone.store(bytes.len(), Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        let client = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        client.send_to(&[1u8; 10], ("127.0.0.1", server.port())).unwrap();

        for _ in 0..100 {
            if lengths.load(Ordering::SeqCst) == 10 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        server.stop().unwrap();
        assert_eq!(lengths.load(Ordering::SeqCst), 10);
    }
}
