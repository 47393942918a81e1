//! Unix PTY allocation and master-side I/O.
//!
//! The master descriptor is non-blocking and registered with tokio's
//! [`AsyncFd`]. A [`UnixPtyMaster`] can be split into a [`PtyReader`], a
//! [`PtyWriter`] and a [`PtyResizer`] that share the descriptor, so one task
//! can copy output while another copies input and a third applies resizes.

use std::io;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use rustix::fs::{Mode, OFlags, fcntl_setfl};
use rustix::io::Errno;
use rustix::pty::{OpenptFlags, grantpt, openpt, ptsname, unlockpt};
use rustix::termios::{Winsize, tcgetwinsize, tcsetwinsize};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::config::WindowSize;
use crate::error::{PtyError, Result, errno_to_io};
use crate::traits::PtyControl;

/// State shared by every handle onto one master descriptor.
struct Shared {
    /// The master file descriptor wrapped for async I/O.
    async_fd: AsyncFd<OwnedFd>,
    /// Whether control calls are still accepted.
    open: AtomicBool,
}

impl Shared {
    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        loop {
            let mut guard = match self.async_fd.poll_read_ready(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };

            let unfilled = buf.initialize_unfilled();
            match rustix::io::read(self.async_fd.get_ref(), unfilled) {
                Ok(n) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Err(Errno::AGAIN) => {
                    guard.clear_ready();
                }
                Err(Errno::INTR) => {}
                // Linux reports EIO once every slave descriptor is closed.
                Err(Errno::IO) => return Poll::Ready(Ok(())),
                Err(e) => return Poll::Ready(Err(errno_to_io(e))),
            }
        }
    }

    fn poll_write(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = match self.async_fd.poll_write_ready(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };

            match rustix::io::write(self.async_fd.get_ref(), buf) {
                Ok(n) => return Poll::Ready(Ok(n)),
                Err(Errno::AGAIN) => {
                    guard.clear_ready();
                }
                Err(Errno::INTR) => {}
                Err(e) => return Poll::Ready(Err(errno_to_io(e))),
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn set_window_size(&self, size: WindowSize) -> Result<()> {
        if !self.is_open() {
            return Err(PtyError::Closed);
        }
        apply_window_size(self.async_fd.get_ref(), size).map_err(PtyError::Resize)
    }

    fn get_window_size(&self) -> Result<WindowSize> {
        if !self.is_open() {
            return Err(PtyError::Closed);
        }

        let winsize = tcgetwinsize(self.async_fd.get_ref())
            .map_err(|e| PtyError::WindowSize(errno_to_io(e)))?;

        Ok(WindowSize::with_pixels(
            winsize.ws_col,
            winsize.ws_row,
            winsize.ws_xpixel,
            winsize.ws_ypixel,
        ))
    }
}

fn apply_window_size(fd: &OwnedFd, size: WindowSize) -> io::Result<()> {
    let winsize = Winsize {
        ws_col: size.cols,
        ws_row: size.rows,
        ws_xpixel: size.xpixel,
        ws_ypixel: size.ypixel,
    };
    tcsetwinsize(fd, winsize).map_err(errno_to_io)
}

/// Unix PTY master.
///
/// Implements [`AsyncRead`] and [`AsyncWrite`] directly; use
/// [`into_split`](Self::into_split) to drive both directions from
/// separate tasks.
pub struct UnixPtyMaster {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for UnixPtyMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixPtyMaster")
            .field("fd", &self.shared.async_fd.as_raw_fd())
            .field("open", &self.shared.is_open())
            .finish()
    }
}

impl UnixPtyMaster {
    fn from_fd(fd: OwnedFd) -> io::Result<Self> {
        fcntl_setfl(&fd, OFlags::NONBLOCK).map_err(errno_to_io)?;
        let async_fd = AsyncFd::new(fd)?;

        Ok(Self {
            shared: Arc::new(Shared {
                async_fd,
                open: AtomicBool::new(true),
            }),
        })
    }

    /// Check if the PTY still accepts control calls.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Set the window size.
    pub fn set_window_size(&self, size: WindowSize) -> Result<()> {
        self.shared.set_window_size(size)
    }

    /// Get the current window size.
    pub fn get_window_size(&self) -> Result<WindowSize> {
        self.shared.get_window_size()
    }

    /// A control handle sharing this master's descriptor.
    #[must_use]
    pub fn resizer(&self) -> PtyResizer {
        PtyResizer {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Split the master into independently owned read, write and control
    /// handles.
    ///
    /// The descriptor is closed when all three have been dropped.
    #[must_use]
    pub fn into_split(self) -> (PtyReader, PtyWriter, PtyResizer) {
        let reader = PtyReader {
            shared: Arc::clone(&self.shared),
        };
        let writer = PtyWriter {
            shared: Arc::clone(&self.shared),
        };
        (reader, writer, PtyResizer { shared: self.shared })
    }
}

impl AsRawFd for UnixPtyMaster {
    fn as_raw_fd(&self) -> RawFd {
        self.shared.async_fd.as_raw_fd()
    }
}

impl AsyncRead for UnixPtyMaster {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.shared.poll_read(cx, buf)
    }
}

impl AsyncWrite for UnixPtyMaster {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.shared.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl PtyControl for UnixPtyMaster {
    fn resize(&self, size: WindowSize) -> Result<()> {
        self.set_window_size(size)
    }

    fn window_size(&self) -> Result<WindowSize> {
        self.get_window_size()
    }

    fn close(&self) {
        self.shared.close();
    }

    fn is_open(&self) -> bool {
        Self::is_open(self)
    }
}

/// Read half of a split [`UnixPtyMaster`]: the child's output.
pub struct PtyReader {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for PtyReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyReader")
            .field("fd", &self.shared.async_fd.as_raw_fd())
            .finish()
    }
}

impl AsyncRead for PtyReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.shared.poll_read(cx, buf)
    }
}

/// Write half of a split [`UnixPtyMaster`]: the child's input.
pub struct PtyWriter {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for PtyWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyWriter")
            .field("fd", &self.shared.async_fd.as_raw_fd())
            .finish()
    }
}

impl AsyncWrite for PtyWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.shared.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Control handle of a [`UnixPtyMaster`].
///
/// Cloning is cheap; every clone observes the same open/closed state.
#[derive(Clone)]
pub struct PtyResizer {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for PtyResizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyResizer")
            .field("fd", &self.shared.async_fd.as_raw_fd())
            .field("open", &self.shared.is_open())
            .finish()
    }
}

impl PtyControl for PtyResizer {
    fn resize(&self, size: WindowSize) -> Result<()> {
        self.shared.set_window_size(size)
    }

    fn window_size(&self) -> Result<WindowSize> {
        self.shared.get_window_size()
    }

    fn close(&self) {
        self.shared.close();
    }

    fn is_open(&self) -> bool {
        self.shared.is_open()
    }
}

/// A freshly allocated pseudo-terminal: the master plus the slave descriptor
/// destined for the child.
#[derive(Debug)]
pub struct PtyPair {
    master: UnixPtyMaster,
    slave: OwnedFd,
    slave_path: String,
}

impl PtyPair {
    /// Allocate a new PTY pair with the given initial size.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PtyError::Allocation`] if the host cannot provide a PTY.
    pub fn allocate(size: WindowSize) -> Result<Self> {
        let alloc = |e: Errno| PtyError::Allocation(errno_to_io(e));

        let master_fd = openpt(OpenptFlags::RDWR | OpenptFlags::NOCTTY).map_err(alloc)?;
        grantpt(&master_fd).map_err(alloc)?;
        unlockpt(&master_fd).map_err(alloc)?;

        let slave_name = ptsname(&master_fd, Vec::new()).map_err(alloc)?;
        let slave_path = slave_name
            .to_str()
            .map_err(|_| {
                PtyError::Allocation(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "invalid slave path encoding",
                ))
            })?
            .to_string();

        apply_window_size(&master_fd, size).map_err(PtyError::Allocation)?;

        let slave = open_slave(&slave_path)?;
        let master = UnixPtyMaster::from_fd(master_fd).map_err(PtyError::Allocation)?;

        tracing::debug!(slave = %slave_path, %size, "allocated PTY pair");

        Ok(Self {
            master,
            slave,
            slave_path,
        })
    }

    /// The master side.
    #[must_use]
    pub const fn master(&self) -> &UnixPtyMaster {
        &self.master
    }

    /// Path of the slave device, e.g. `/dev/pts/3`.
    #[must_use]
    pub fn slave_path(&self) -> &str {
        &self.slave_path
    }

    /// Separate the master from the slave descriptor.
    #[must_use]
    pub fn into_parts(self) -> (UnixPtyMaster, OwnedFd) {
        (self.master, self.slave)
    }
}

/// Open the slave side of a PTY.
///
/// # Errors
///
/// Returns [`PtyError::Allocation`] if the device cannot be opened.
pub fn open_slave(path: &str) -> Result<OwnedFd> {
    rustix::fs::open(path, OFlags::RDWR | OFlags::NOCTTY, Mode::empty())
        .map_err(|e| PtyError::Allocation(errno_to_io(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn allocate_pair() {
        let pair = PtyPair::allocate(WindowSize::new(80, 24)).unwrap();
        assert!(pair.master().is_open());
        assert!(
            pair.slave_path().starts_with("/dev/pts/") || pair.slave_path().starts_with("/dev/pty")
        );
    }

    #[tokio::test]
    async fn initial_window_size() {
        let pair = PtyPair::allocate(WindowSize::new(132, 43)).unwrap();
        let size = pair.master().get_window_size().unwrap();
        assert_eq!(size.cols, 132);
        assert_eq!(size.rows, 43);
    }

    #[tokio::test]
    async fn window_size_operations() {
        let pair = PtyPair::allocate(WindowSize::default()).unwrap();
        let master = pair.master();

        assert!(master.set_window_size(WindowSize::new(120, 40)).is_ok());

        let retrieved = master.get_window_size().unwrap();
        assert_eq!(retrieved.cols, 120);
        assert_eq!(retrieved.rows, 40);
    }

    #[tokio::test]
    async fn resize_after_close_is_closed_error() {
        let (master, _slave) = PtyPair::allocate(WindowSize::default()).unwrap().into_parts();
        let resizer = master.resizer();

        resizer.close();
        assert!(!master.is_open());
        assert!(matches!(
            resizer.resize(WindowSize::new(100, 30)),
            Err(PtyError::Closed)
        ));
        assert!(matches!(master.get_window_size(), Err(PtyError::Closed)));
    }

    #[tokio::test]
    async fn split_halves_share_descriptor() {
        let (master, slave) = PtyPair::allocate(WindowSize::default()).unwrap().into_parts();
        let (mut reader, mut writer, resizer) = master.into_split();

        // Raw mode so the line discipline neither echoes nor buffers.
        let mut termios = rustix::termios::tcgetattr(&slave).unwrap();
        termios.make_raw();
        rustix::termios::tcsetattr(&slave, rustix::termios::OptionalActions::Now, &termios)
            .unwrap();

        writer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        let n = rustix::io::read(&slave, &mut buf[..]).unwrap();
        assert_eq!(&buf[..n], b"ping");

        rustix::io::write(&slave, b"pong").unwrap();
        let mut out = [0u8; 4];
        reader.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"pong");

        resizer.resize(WindowSize::new(50, 10)).unwrap();
        let size = rustix::termios::tcgetwinsize(&slave).unwrap();
        assert_eq!((size.ws_col, size.ws_row), (50, 10));
    }

    #[tokio::test]
    async fn read_reports_eof_after_slave_closed() {
        let (master, slave) = PtyPair::allocate(WindowSize::default()).unwrap().into_parts();
        let (mut reader, _writer, _resizer) = master.into_split();
        drop(slave);

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(std::time::Duration::from_secs(5), reader.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}
