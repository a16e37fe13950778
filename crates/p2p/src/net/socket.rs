//! Peer socket with a bounded outbound queue.
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::net::Link;

/// Maximum number of queued outbound messages per peer. Past this, new
/// messages are dropped rather than blocking the sender.
const SEND_QUEUE_CAPACITY: usize = 100;

/// Minimum interval between drop warnings for one peer.
const DROP_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// A peer connection: the raw stream plus the queue of bytes waiting to be
/// flushed to it.
#[derive(Debug)]
pub struct Socket<R> {
    raw: R,
    /// Remote address.
    pub address: net::SocketAddr,
    /// Link direction.
    pub link: Link,
    /// Queued outbound messages, oldest first.
    queue: VecDeque<Vec<u8>>,
    /// How much of the front message has been written.
    written: usize,
    /// Last time a dropped message was logged for this peer.
    last_drop_log: Option<Instant>,
}

impl<R: Read + Write> Socket<R> {
    /// Wrap a raw stream.
    pub fn from(raw: R, address: net::SocketAddr, link: Link) -> Self {
        Self {
            raw,
            address,
            link,
            queue: VecDeque::new(),
            written: 0,
            last_drop_log: None,
        }
    }

    /// Queue a message for sending. A full queue drops the message; the drop
    /// is logged at most once per [`DROP_LOG_INTERVAL`] per peer.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.queue.len() >= SEND_QUEUE_CAPACITY {
            let now = Instant::now();
            let should_log = self
                .last_drop_log
                .map_or(true, |last| now.duration_since(last) >= DROP_LOG_INTERVAL);

            if should_log {
                warn!(
                    target: "net",
                    "{}: Send queue full, dropping message(s)", self.address
                );
                self.last_drop_log = Some(now);
            }
            return;
        }

        self.queue.push_back(bytes.to_vec());
    }

    /// Write as much of the queue as the stream accepts. `Ok(())` means the
    /// queue was drained; `WouldBlock`/`WriteZero` mean the remainder stays
    /// queued and the caller should retry when the socket is writable again.
    pub fn drain(&mut self) -> io::Result<()> {
        while let Some(front) = self.queue.front() {
            match self.raw.write(&front[self.written..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => {
                    self.written += n;
                    if self.written == front.len() {
                        self.queue.pop_front();
                        self.written = 0;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        self.raw.flush()
    }
}

impl Socket<net::TcpStream> {
    /// The local address of the underlying stream.
    pub fn local_address(&self) -> io::Result<net::SocketAddr> {
        self.raw.local_addr()
    }

    /// Shut the connection down.
    pub fn disconnect(&self) -> io::Result<()> {
        self.raw.shutdown(net::Shutdown::Both)
    }
}

impl<R: Read + Write> Read for Socket<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.raw.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A stream that accepts a limited number of bytes per write.
    struct Throttled {
        accepted: Vec<u8>,
        per_write: usize,
        blocked: bool,
    }

    impl Read for Throttled {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.blocked {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let n = buf.len().min(self.per_write);
            self.accepted.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn socket(per_write: usize, blocked: bool) -> Socket<Throttled> {
        Socket::from(
            Throttled {
                accepted: Vec::new(),
                per_write,
                blocked,
            },
            "127.0.0.1:18666".parse().unwrap(),
            Link::Outbound,
        )
    }

    #[test]
    fn partial_writes_resume_where_they_left_off() {
        let mut socket = socket(3, false);

        socket.push(&[1, 2, 3, 4, 5]);
        socket.push(&[6, 7]);
        socket.drain().unwrap();

        assert_eq!(socket.raw.accepted, vec![1, 2, 3, 4, 5, 6, 7]);
        assert!(socket.queue.is_empty());
    }

    #[test]
    fn full_queue_drops_instead_of_growing() {
        let mut socket = socket(usize::MAX, true);

        for i in 0..(SEND_QUEUE_CAPACITY + 10) {
            socket.push(&[i as u8]);
        }

        assert_eq!(socket.queue.len(), SEND_QUEUE_CAPACITY);
    }

    #[test]
    fn blocked_stream_keeps_remainder_queued() {
        let mut socket = socket(usize::MAX, true);

        socket.push(&[1, 2, 3]);
        let err = socket.drain().unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(socket.queue.len(), 1);
    }
}
