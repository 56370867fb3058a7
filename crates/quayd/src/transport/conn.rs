//! Non-blocking peer streams and their framing buffers.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsFd, BorrowedFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use quay_wire::{FrameBuffer, Message, Role, decode, encode};

use super::errors::PeerError;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Bounded wait applied when a peer's socket refuses more outbound bytes.
pub(crate) const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for a freshly accepted peer to announce its role.
pub(crate) const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 4096;

/// Stream types accepted by the broker listener.
#[derive(Debug)]
pub enum PeerStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Read for PeerStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for PeerStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

impl AsFd for PeerStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Self::Tcp(stream) => stream.as_fd(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.as_fd(),
        }
    }
}

impl PeerStream {
    pub(crate) fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_nonblocking(nonblocking),
            #[cfg(unix)]
            Self::Unix(stream) => stream.set_nonblocking(nonblocking),
        }
    }
}

/// Result of one read pass over a peer socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The socket is drained for now and remains open.
    Open,
    /// The peer closed its end of the stream.
    Eof,
}

/// A peer stream paired with its inbound frame buffer.
///
/// All sockets are non-blocking; [`PeerChannel::fill`] performs a single
/// drain pass and [`PeerChannel::next_frame`] hands out the complete
/// frames it produced.
#[derive(Debug)]
pub struct PeerChannel {
    stream: PeerStream,
    inbound: FrameBuffer,
}

impl PeerChannel {
    pub fn new(stream: PeerStream) -> Self {
        Self {
            stream,
            inbound: FrameBuffer::new(),
        }
    }

    /// Reads until the socket would block, appending to the frame buffer.
    pub fn fill(&mut self) -> Result<ReadStatus, PeerError> {
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(ReadStatus::Eof),
                Ok(read) => self.inbound.push(&chunk[..read])?,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadStatus::Open);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(PeerError::Io(error)),
            }
        }
    }

    /// Pops the next buffered complete frame.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, PeerError> {
        Ok(self.inbound.next_frame()?)
    }

    /// Writes one frame, waiting (bounded) for writability when the
    /// socket back-pressures.
    pub fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), PeerError> {
        let deadline = Instant::now() + SEND_TIMEOUT;
        let mut written = 0;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]) {
                Ok(0) => {
                    return Err(PeerError::Io(io::ErrorKind::WriteZero.into()));
                }
                Ok(count) => written += count,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PeerError::SendTimeout);
                    }
                    if !wait_fd(self.stream.as_fd(), PollFlags::POLLOUT, deadline - now)? {
                        return Err(PeerError::SendTimeout);
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(PeerError::Io(error)),
            }
        }
        Ok(())
    }

    /// Serializes and sends one message.
    pub fn send_message(&mut self, message: &Message) -> Result<(), PeerError> {
        let frame = encode(message)?;
        self.send_bytes(&frame)
    }
}

impl AsFd for PeerChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

/// Drives the role handshake on a freshly accepted connection.
///
/// The first line a peer sends must be a `hello` announcing its role;
/// anything else, silence past the deadline, or early close rejects the
/// connection.
pub fn await_hello(channel: &mut PeerChannel, timeout: Duration) -> Result<Role, PeerError> {
    let deadline = Instant::now() + timeout;
    loop {
        let status = channel.fill()?;
        if let Some(frame) = channel.next_frame()? {
            return match decode(&frame)? {
                Message::Hello { role } => Ok(role),
                other => Err(PeerError::HandshakeUnexpected { kind: other.kind() }),
            };
        }
        if status == ReadStatus::Eof {
            return Err(PeerError::HandshakeClosed);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(PeerError::HandshakeTimeout);
        }
        wait_fd(channel.as_fd(), PollFlags::POLLIN, deadline - now)?;
    }
}

/// Waits for readiness on a single descriptor; false means the wait
/// timed out.
fn wait_fd(fd: BorrowedFd<'_>, flags: PollFlags, timeout: Duration) -> Result<bool, PeerError> {
    let mut fds = [PollFd::new(fd, flags)];
    let timeout = PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX);
    loop {
        match poll(&mut fds, timeout) {
            Ok(0) => return Ok(false),
            Ok(_) => return Ok(true),
            Err(Errno::EINTR) => {}
            Err(errno) => {
                return Err(PeerError::Io(io::Error::from_raw_os_error(errno as i32)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use quay_wire::NO_TOKEN;

    use super::*;

    fn stream_pair() -> (PeerStream, TcpStream) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let addr = listener.local_addr().expect("addr");
        let remote = TcpStream::connect(addr).expect("connect");
        let (local, _) = listener.accept().expect("accept");
        local.set_nonblocking(true).expect("nonblocking");
        (PeerStream::Tcp(local), remote)
    }

    #[test]
    fn fill_buffers_partial_then_whole_frames() {
        let (local, mut remote) = stream_pair();
        let mut channel = PeerChannel::new(local);

        remote.write_all(b"{\"kind\":\"hello_ack\",").expect("write");
        remote.flush().expect("flush");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(channel.fill().expect("fill"), ReadStatus::Open);
        assert_eq!(channel.next_frame().expect("frame"), None);

        remote.write_all(b"\"token\":0}\n").expect("write");
        remote.flush().expect("flush");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(channel.fill().expect("fill"), ReadStatus::Open);
        let frame = channel.next_frame().expect("frame").expect("complete frame");
        assert_eq!(
            decode(&frame).expect("decode"),
            Message::hello_ack(NO_TOKEN)
        );
    }

    #[test]
    fn fill_reports_eof_on_peer_close() {
        let (local, remote) = stream_pair();
        let mut channel = PeerChannel::new(local);
        drop(remote);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(channel.fill().expect("fill"), ReadStatus::Eof);
    }

    #[test]
    fn await_hello_accepts_a_role_announcement() {
        let (local, mut remote) = stream_pair();
        let mut channel = PeerChannel::new(local);
        remote
            .write_all(b"{\"kind\":\"hello\",\"role\":\"service\"}\n")
            .expect("write");
        let role =
            await_hello(&mut channel, Duration::from_secs(2)).expect("handshake should pass");
        assert_eq!(role, Role::Service);
    }

    #[test]
    fn await_hello_rejects_other_kinds() {
        let (local, mut remote) = stream_pair();
        let mut channel = PeerChannel::new(local);
        remote
            .write_all(b"{\"kind\":\"reply\",\"token\":1}\n")
            .expect("write");
        let error = await_hello(&mut channel, Duration::from_secs(2))
            .expect_err("handshake should reject");
        assert!(matches!(error, PeerError::HandshakeUnexpected { .. }));
    }

    #[test]
    fn await_hello_times_out_on_silence() {
        let (local, _remote) = stream_pair();
        let mut channel = PeerChannel::new(local);
        let error = await_hello(&mut channel, Duration::from_millis(50))
            .expect_err("handshake should time out");
        assert!(matches!(error, PeerError::HandshakeTimeout));
    }

    #[test]
    fn send_and_receive_round_trip() {
        let (local, remote) = stream_pair();
        let mut channel = PeerChannel::new(local);
        channel
            .send_message(&Message::hello_ack(42))
            .expect("send");

        let mut reader = io::BufReader::new(remote);
        let mut line = String::new();
        io::BufRead::read_line(&mut reader, &mut line).expect("read");
        assert_eq!(
            decode(line.as_bytes()).expect("decode"),
            Message::hello_ack(42)
        );
    }
}
