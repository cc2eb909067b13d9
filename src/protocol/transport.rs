//! 与决策者之间的双工、按帧传输通道
//!
//! `recv` 是整个内核唯一会阻塞的地方，受墙钟超时约束。

use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::codec::{read_frame, write_frame};
use crate::error::{Result, SimError};

pub trait Transport {
    fn send(&mut self, payload: Vec<u8>) -> Result<()>;
    /// 阻塞等待一帧，超过 `timeout` 返回 [`SimError::ReplyTimeout`]
    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>>;
}

fn map_recv_error(err: io::Error, timeout: Duration) -> SimError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => SimError::ReplyTimeout(timeout),
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe => SimError::Disconnected,
        io::ErrorKind::InvalidData => SimError::MalformedMessage(err.to_string()),
        _ => SimError::Io(err),
    }
}

const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Unix domain socket; the simulator listens and the decision-maker connects.
#[derive(Debug)]
pub struct UnixSocketTransport {
    listener: Option<UnixListener>,
    stream: Option<UnixStream>,
    /// 等待决策者连接的墙钟上限
    accept_timeout: Duration,
    /// 由本进程创建的 socket 文件，drop 时删除
    path: Option<PathBuf>,
}

impl UnixSocketTransport {
    pub fn new(stream: UnixStream) -> Self {
        Self {
            listener: None,
            stream: Some(stream),
            accept_timeout: Duration::ZERO,
            path: None,
        }
    }

    /// Binds `path` (replacing a stale socket file). The connection is
    /// accepted on first use and must arrive within `accept_timeout`.
    pub fn bind(path: &Path, accept_timeout: Duration) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;
        debug!(socket = %path.display(), "socket bound");
        Ok(Self {
            listener: Some(listener),
            stream: None,
            accept_timeout,
            path: Some(path.to_path_buf()),
        })
    }

    /// [`UnixSocketTransport::bind`] and wait for the decision-maker right away.
    pub fn listen(path: &Path, accept_timeout: Duration) -> Result<Self> {
        let mut transport = Self::bind(path, accept_timeout)?;
        transport.stream()?;
        Ok(transport)
    }

    fn accept(listener: &UnixListener, timeout: Duration) -> Result<UnixStream> {
        let deadline = Instant::now() + timeout;
        loop {
            match listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    return Ok(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(SimError::ConnectTimeout(timeout));
                    }
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(SimError::Io(e)),
            }
        }
    }

    fn stream(&mut self) -> Result<&mut UnixStream> {
        if self.stream.is_none() {
            let listener = self.listener.take().ok_or(SimError::Disconnected)?;
            info!(timeout = ?self.accept_timeout, "waiting for the decision-maker to connect");
            let stream = Self::accept(&listener, self.accept_timeout)?;
            info!("decision-maker connected");
            self.stream = Some(stream);
        }
        self.stream.as_mut().ok_or(SimError::Disconnected)
    }
}

impl Drop for UnixSocketTransport {
    fn drop(&mut self) {
        if let Some(path) = &self.path {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl Transport for UnixSocketTransport {
    fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        debug!(bytes = payload.len(), "send frame");
        write_frame(self.stream()?, &payload).map_err(|e| match e.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => SimError::Disconnected,
            _ => SimError::Io(e),
        })
    }

    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let stream = self.stream()?;
        stream.set_read_timeout(Some(timeout))?;
        let frame = read_frame(stream).map_err(|e| map_recv_error(e, timeout))?;
        debug!(bytes = frame.len(), "recv frame");
        Ok(frame)
    }
}

/// In-process transport backed by channels, for decision-makers living in
/// the same process (tests, embedded policies).
#[derive(Debug)]
pub struct ChannelTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

/// The decision-maker's side of a [`ChannelTransport`].
#[derive(Debug)]
pub struct ChannelPeer {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl ChannelTransport {
    pub fn pair() -> (ChannelTransport, ChannelPeer) {
        let (to_peer, from_sim) = mpsc::channel();
        let (to_sim, from_peer) = mpsc::channel();
        (
            ChannelTransport {
                tx: to_peer,
                rx: from_peer,
            },
            ChannelPeer {
                tx: to_sim,
                rx: from_sim,
            },
        )
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        self.tx.send(payload).map_err(|_| SimError::Disconnected)
    }

    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => SimError::ReplyTimeout(timeout),
            RecvTimeoutError::Disconnected => SimError::Disconnected,
        })
    }
}

impl ChannelPeer {
    /// 阻塞等待内核的下一条消息；内核一侧关闭后返回 None
    pub fn recv(&self) -> Option<Vec<u8>> {
        self.rx.recv().ok()
    }

    pub fn send(&self, payload: Vec<u8>) -> Result<()> {
        self.tx.send(payload).map_err(|_| SimError::Disconnected)
    }
}
