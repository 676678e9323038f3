//! Byte streams a blocking transport can run over.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// A bidirectional byte stream with a liveness probe.
pub trait TransportStream: Read + Write + Send {
    /// Probe whether the peer is still connected without consuming data.
    fn is_alive(&mut self) -> bool;

    /// Apply read and write timeouts. `None` blocks indefinitely.
    fn set_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) -> io::Result<()> {
        let _ = (read, write);
        Ok(())
    }

    /// Close both directions.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TransportStream for TcpStream {
    fn is_alive(&mut self) -> bool {
        if self.set_nonblocking(true).is_err() {
            return false;
        }
        let mut probe = [0u8; 1];
        let alive = match self.peek(&mut probe) {
            // orderly shutdown by the peer
            Ok(0) => false,
            Ok(_) => true,
            Err(e) => e.kind() == io::ErrorKind::WouldBlock,
        };
        self.set_nonblocking(false).is_ok() && alive
    }

    fn set_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(read)?;
        self.set_write_timeout(write)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl<T: TransportStream + ?Sized> TransportStream for Box<T> {
    fn is_alive(&mut self) -> bool {
        (**self).is_alive()
    }

    fn set_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) -> io::Result<()> {
        (**self).set_timeouts(read, write)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        (**self).shutdown()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_liveness_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();

        assert!(client.is_alive());
        drop(server);
        // the FIN may take a moment to arrive
        let mut alive = true;
        for _ in 0..50 {
            alive = client.is_alive();
            if !alive {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!alive);
    }
}
