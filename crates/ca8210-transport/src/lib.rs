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

//! Transport abstraction over the two ways a CA8210 can be reached: a USB
//! HID dongle, or a kernel-resident character device exposed through
//! debugfs. A `Box<dyn Transport>` is the Rust expression of the small
//! "virtual method table" (`read_func`/`write_func`/`flush_func`/
//! `signal_func`) the original exchange installs per device.

pub mod config;
mod error;
pub mod kernel;
pub mod usb;

pub use error::TransportError;

/// Which physical transport a device's exchange is using. Immutable for the
/// lifetime of an open device (§3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
  Kernel,
  Usb,
}

/// A single whole-frame-in, whole-frame-out transport. Implementations are
/// not required to be internally thread-safe beyond `Send` — the exchange
/// engine only ever touches a given transport from its dedicated I/O worker
/// thread, with `signal` being the one exception callable from elsewhere.
pub trait Transport: Send {
  /// Read a single complete frame into `buf`, blocking for up to the
  /// transport's own poll delay. Returns the frame length, `0` on timeout
  /// with nothing read, or `Err` on a transport-level failure.
  fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

  /// Write a single complete frame.
  fn write(&mut self, buf: &[u8]) -> Result<(), TransportError>;

  /// Drain any data the transport has buffered but not yet delivered,
  /// called once before the I/O worker's first read.
  fn flush(&mut self);

  /// Wake a thread blocked inside `read`. Must be safe to call from any
  /// thread while another thread is inside `read`.
  fn signal(&self);

  /// Attempt a hardware reset. Not every transport supports this.
  fn reset(&mut self, millis: u32) -> Result<(), TransportError>;

  fn kind(&self) -> TransportKind;

  /// Hint used by the I/O worker to pick a read timeout: `true` when the
  /// out-queue has work waiting, so the transport should poll aggressively
  /// instead of blocking for its full poll delay.
  fn set_write_pending(&mut self, pending: bool);
}

/// Open the best available transport for a new device: kernel debugfs first,
/// USB HID as a fallback, mirroring `ca821x_util_init`'s ordering in the
/// original posix utility layer.
pub fn open_any() -> Result<Box<dyn Transport>, TransportError> {
  match kernel::KernelTransport::open() {
    Ok(t) => return Ok(Box::new(t)),
    Err(e) => tracing::debug!(error = %e, "kernel transport unavailable, falling back to USB"),
  }

  match usb::UsbTransport::open_any() {
    Ok(t) => Ok(Box::new(t)),
    Err(e) => {
      tracing::debug!(error = %e, "usb transport unavailable");
      Err(TransportError::NoTransportAvailable)
    }
  }
}
