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

//! Exchange-layer tunables. Transport-specific tunables live in
//! `ca8210_transport::config`; this module only collects what the engine
//! itself needs.

pub use ca8210_fragment::MAX_BUF_SIZE;

/// SYN bit (bit 6) of a frame's command-id byte.
pub const SYN_BIT: u8 = 0x40;

/// Inclusive range of command ids treated as user-defined, non-MAC traffic.
pub const USER_DEFINED_RANGE: std::ops::RangeInclusive<u8> = 0xA0..=0xAF;

/// Device id reserved for the shutdown sentinel pushed to the downstream
/// dispatch queue on the last `deinit` in the process.
pub const SHUTDOWN_SENTINEL_DEVICE: u32 = u32::MAX;
