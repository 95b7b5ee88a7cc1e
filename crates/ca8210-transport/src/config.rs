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

//! Every compile-time tunable for the transport layer in one place, in the
//! spirit of the original exchange's `ca821x-posix-config.h`.

use std::time::Duration;

/// USB vendor id the CA8210 dev board enumerates under.
pub const USB_VID: u16 = 0x0416;
/// USB product id the CA8210 dev board enumerates under.
pub const USB_PID: u16 = 0x5020;

/// Maximum number of USB devices this process will have open concurrently.
pub const USB_MAX_DEVICES: usize = 5;

/// HID report polling timeout used while there is nothing queued to send.
pub const USB_POLL_DELAY: Duration = Duration::from_millis(2);
/// HID report polling timeout used while a frame is waiting in the out-queue.
pub const USB_POLL_DELAY_BUSY: Duration = Duration::from_millis(0);

/// Maximum time the kernel adapter blocks in a read with nothing to send.
pub const KERNEL_POLL_DELAY: Duration = Duration::from_secs(1);

/// Debugfs path the CA8210 kernel driver exposes its character device at.
pub const KERNEL_DEVICE_PATH: &str = "/sys/kernel/debug/ca8210";

/// ioctl request number for a hard reset; argument is milliseconds.
pub const CA8210_IOCTL_HARD_RESET: u32 = 0;

/// Number of write retries on a transient "device busy" error.
pub const KERNEL_WRITE_RETRIES: u32 = 5;
/// Back-off between write retries.
pub const KERNEL_WRITE_BACKOFF: Duration = Duration::from_millis(50);
