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

//! USB HID transport. Frames are fragmented across 64-byte reports; see
//! `ca8210-fragment` for the wire codec.

use crate::config::{USB_MAX_DEVICES, USB_PID, USB_VID, USB_POLL_DELAY, USB_POLL_DELAY_BUSY};
use crate::error::TransportError;
use crate::{Transport, TransportKind};
use ca8210_fragment::{assemble, next_fragment, MAX_BUF_SIZE};
use std::sync::Mutex;
use std::time::Duration;

/// HID report body size including the header byte, excluding the report-ID
/// byte hidapi expects to find at index 0 of a write buffer.
const REPORT_BODY_SIZE: usize = 64;

static OPEN_PATHS: Mutex<Vec<String>> = Mutex::new(Vec::new());

fn path_in_use(path: &str) -> bool {
  OPEN_PATHS.lock().unwrap().iter().any(|p| p == path)
}

pub struct UsbTransport {
  device: hidapi::HidDevice,
  path: String,
  rx_cursor: usize,
  rx_buf: [u8; MAX_BUF_SIZE],
  write_pending: bool,
}

impl UsbTransport {
  /// Enumerate CA8210 HIDs, skip any path already open in this process, and
  /// open the first free match. Fails if `USB_MAX_DEVICES` are already open.
  pub fn open_any() -> Result<Self, TransportError> {
    let mut open_paths = OPEN_PATHS.lock().unwrap();
    if open_paths.len() >= USB_MAX_DEVICES {
      return Err(TransportError::Usb(format!(
        "already at the USB_MAX_DEVICES limit ({USB_MAX_DEVICES})"
      )));
    }

    let api = hidapi::HidApi::new().map_err(|e| TransportError::Usb(e.to_string()))?;

    let mut chosen: Option<&hidapi::DeviceInfo> = None;
    for info in api.device_list() {
      if info.vendor_id() == USB_VID && info.product_id() == USB_PID {
        let path = info.path().to_string_lossy().to_string();
        if !path_in_use(&path) {
          chosen = Some(info);
          break;
        }
      }
    }

    let info = chosen.ok_or(TransportError::NoTransportAvailable)?;
    let path = info.path().to_string_lossy().to_string();
    let device = api
      .open_path(info.path())
      .map_err(|e| TransportError::Usb(e.to_string()))?;

    tracing::info!(path = %path, "opened CA8210 USB HID device");
    open_paths.push(path.clone());

    Ok(Self {
      device,
      path,
      rx_cursor: 0,
      rx_buf: [0u8; MAX_BUF_SIZE],
      write_pending: false,
    })
  }
}

impl Drop for UsbTransport {
  fn drop(&mut self) {
    let mut open_paths = OPEN_PATHS.lock().unwrap();
    open_paths.retain(|p| p != &self.path);
  }
}

impl Transport for UsbTransport {
  fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
    let mut timeout = if self.write_pending {
      USB_POLL_DELAY_BUSY
    } else {
      USB_POLL_DELAY
    };
    let mut report = [0u8; REPORT_BODY_SIZE];

    loop {
      let n = self
        .device
        .read_timeout(&mut report, timeout.as_millis() as i32)
        .map_err(|e| TransportError::Usb(e.to_string()))?;
      if n == 0 {
        return Ok(0);
      }

      match assemble(&report[..n], &mut self.rx_buf, &mut self.rx_cursor)? {
        Some(total) => {
          buf[..total].copy_from_slice(&self.rx_buf[..total]);
          return Ok(total);
        }
        None => {
          // keep reading fragments of the same frame without the initial delay
          timeout = Duration::from_millis(10);
        }
      }
    }
  }

  fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
    let mut cursor = 0;
    loop {
      let (body, more) = next_fragment(buf, &mut cursor)?;
      let mut report = [0u8; REPORT_BODY_SIZE + 1];
      report[1..1 + body.len()].copy_from_slice(&body);
      self
        .device
        .write(&report)
        .map_err(|e| TransportError::Usb(e.to_string()))?;
      if !more {
        break;
      }
    }
    Ok(())
  }

  fn flush(&mut self) {
    let mut report = [0u8; REPORT_BODY_SIZE];
    loop {
      match self.device.read_timeout(&mut report, 10) {
        Ok(n) if n > 0 => continue,
        _ => break,
      }
    }
  }

  fn signal(&self) {
    // USB read uses its own short polling timeout; nothing to wake.
  }

  fn reset(&mut self, _millis: u32) -> Result<(), TransportError> {
    Err(TransportError::Unsupported)
  }

  fn kind(&self) -> TransportKind {
    TransportKind::Usb
  }

  fn set_write_pending(&mut self, pending: bool) {
    self.write_pending = pending;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn path_in_use_tracks_registry() {
    OPEN_PATHS.lock().unwrap().clear();
    assert!(!path_in_use("/dev/hidraw99"));
    OPEN_PATHS.lock().unwrap().push("/dev/hidraw99".to_string());
    assert!(path_in_use("/dev/hidraw99"));
    OPEN_PATHS.lock().unwrap().clear();
  }
}
