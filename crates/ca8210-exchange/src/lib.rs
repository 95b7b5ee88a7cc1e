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

//! Generic exchange engine for the CA8210 family: per-device I/O worker,
//! process-wide dispatch worker, sync rendezvous, framing classifier and
//! the `Device` facade applications hold for the life of a radio.
//!
//! See `ca8210_queue` for the FIFO buffer queue and `ca8210_fragment` for
//! the USB HID wire codec this engine builds on; `ca8210_transport` supplies
//! the `Transport` trait and its USB/kernel adapters.

pub mod classifier;
pub mod config;
mod device;
mod engine;
mod error;

pub use ca8210_transport::{Transport, TransportError, TransportKind};
pub use device::{Device, DeviceState, DownstreamDispatch, ErrorHandler, UserCallback};
pub use error::ExchangeError;
