/*
 * Copyright (c) 2024 Elide Technologies, Inc.
 *
 * Licensed under the MIT license (the "License"); you may not use this file except in compliance
 * with the License. You may obtain a copy of the License at
 *
 *   https://opensource.org/license/mit/
 *
 * Unless required by applicable law or agreed to in writing, software distributed under the License is distributed on
 * an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the
 * License for the specific language governing permissions and limitations under the License.
 */

//! Kernel-debugfs transport. The CA8210 kernel driver exposes a single
//! character device under debugfs that already speaks whole, unfragmented
//! frames — no HID report framing here, unlike [`crate::usb`].

use crate::config::{
  CA8210_IOCTL_HARD_RESET, KERNEL_DEVICE_PATH, KERNEL_POLL_DELAY, KERNEL_WRITE_BACKOFF,
  KERNEL_WRITE_RETRIES,
};
use crate::error::TransportError;
use crate::{Transport, TransportKind};
use rustix::fd::{AsFd, AsRawFd, OwnedFd};
use rustix::fs::{self, Mode, OFlags};
use rustix::io::Errno;
use std::io;
use std::os::fd::RawFd;
use std::thread;

/// The debugfs node is opened `O_NONBLOCK`; a self-pipe lets [`Transport::signal`]
/// wake a thread parked in [`Transport::read`]'s `poll`, mirroring the original
/// `unblock_read` trick.
pub struct KernelTransport {
  fd: OwnedFd,
  wake_read: OwnedFd,
  wake_write: OwnedFd,
  write_pending: bool,
}

impl KernelTransport {
  pub fn open() -> Result<Self, TransportError> {
    let fd = fs::open(
      KERNEL_DEVICE_PATH,
      OFlags::RDWR | OFlags::NONBLOCK,
      Mode::empty(),
    )
    .map_err(errno_to_io)?;

    let (wake_read, wake_write) =
      rustix::pipe::pipe_with(rustix::pipe::PipeFlags::NONBLOCK).map_err(errno_to_io)?;

    tracing::info!(path = KERNEL_DEVICE_PATH, "opened CA8210 kernel debugfs device");

    Ok(Self {
      fd,
      wake_read,
      wake_write,
      write_pending: false,
    })
  }
}

fn errno_to_io(e: Errno) -> TransportError {
  TransportError::Kernel(io::Error::from(e))
}

impl Transport for KernelTransport {
  fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
    let timeout_ms = if self.write_pending {
      0
    } else {
      KERNEL_POLL_DELAY.as_millis() as i32
    };

    let mut fds = [
      rustix::event::PollFd::new(&self.fd, rustix::event::PollFlags::IN),
      rustix::event::PollFd::new(&self.wake_read, rustix::event::PollFlags::IN),
    ];
    let ready = rustix::event::poll(&mut fds, timeout_ms).map_err(errno_to_io)?;
    if ready == 0 {
      return Ok(0);
    }

    if fds[1].revents().contains(rustix::event::PollFlags::IN) {
      let mut discard = [0u8; 16];
      let _ = rustix::io::read(&self.wake_read, &mut discard);
    }

    if !fds[0].revents().contains(rustix::event::PollFlags::IN) {
      return Ok(0);
    }

    match rustix::io::read(&self.fd, buf) {
      Ok(n) => Ok(n),
      Err(Errno::AGAIN) | Err(Errno::WOULDBLOCK) => Ok(0),
      Err(e) => Err(errno_to_io(e)),
    }
  }

  fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
    let mut attempt = 0;
    loop {
      match rustix::io::write(&self.fd, buf) {
        Ok(_) => return Ok(()),
        Err(Errno::AGAIN) | Err(Errno::WOULDBLOCK) if attempt < KERNEL_WRITE_RETRIES => {
          attempt += 1;
          thread::sleep(KERNEL_WRITE_BACKOFF);
        }
        Err(e) => return Err(errno_to_io(e)),
      }
    }
  }

  fn flush(&mut self) {
    let mut discard = [0u8; 256];
    loop {
      match rustix::io::read(&self.fd, &mut discard) {
        Ok(n) if n > 0 => continue,
        _ => break,
      }
    }
  }

  fn signal(&self) {
    let _ = rustix::io::write(&self.wake_write, &[0u8]);
  }

  fn reset(&mut self, millis: u32) -> Result<(), TransportError> {
    let fd: RawFd = self.fd.as_fd().as_raw_fd();
    let rc = unsafe { libc::ioctl(fd, CA8210_IOCTL_HARD_RESET as libc::c_ulong, millis) };
    if rc < 0 {
      return Err(TransportError::Kernel(io::Error::last_os_error()));
    }
    Ok(())
  }

  fn kind(&self) -> TransportKind {
    TransportKind::Kernel
  }

  fn set_write_pending(&mut self, pending: bool) {
    self.write_pending = pending;
  }
}
