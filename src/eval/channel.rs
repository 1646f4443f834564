//! Single-message pipe channels between a worker and its parent.
//!
//! Each channel carries exactly one fixed-width [`Frame`]. Both ends consume
//! themselves on use, so a second send or receive on the same channel is not
//! expressible, and dropping an end closes its file descriptor.

use super::protocol::{FRAME_LEN, Frame};
use crate::error::{ChannelError, EvalError, Result};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

/// A pipe file descriptor with EINTR-restarting reads and writes.
#[derive(Debug)]
pub struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PipeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read end of a channel, held by the parent.
#[derive(Debug)]
pub struct ChannelReader {
    pipe: PipeFd,
}

impl ChannelReader {
    /// Receive the single frame this channel carries.
    ///
    /// A frame is written with one `write` of [`FRAME_LEN`] bytes, which the
    /// kernel delivers atomically, so anything other than a full frame on the
    /// first read is a protocol violation.
    pub fn recv(mut self) -> std::result::Result<Frame, ChannelError> {
        let mut buf = [0u8; FRAME_LEN];
        match self.pipe.read(&mut buf)? {
            0 => Err(ChannelError::Closed),
            n if n < FRAME_LEN => Err(ChannelError::ShortRead(n)),
            _ => Frame::decode(&buf),
        }
    }
}

/// Write end of a channel, held by the child.
#[derive(Debug)]
pub struct ChannelWriter {
    pipe: PipeFd,
}

impl ChannelWriter {
    /// Send the single frame this channel carries, closing the write end.
    pub fn send(mut self, frame: Frame) -> std::result::Result<(), ChannelError> {
        let buf = frame.encode();
        let written = self.pipe.write(&buf)?;
        if written != FRAME_LEN {
            return Err(ChannelError::ShortWrite(written));
        }
        Ok(())
    }
}

/// Create a new channel.
pub fn channel() -> Result<(ChannelReader, ChannelWriter)> {
    let (read_fd, write_fd) = nix::unistd::pipe()
        .map_err(|e| EvalError::Spawn(format!("Failed to create pipe: {}", e)))?;
    Ok((
        ChannelReader {
            pipe: PipeFd::new(read_fd),
        },
        ChannelWriter {
            pipe: PipeFd::new(write_fd),
        },
    ))
}
