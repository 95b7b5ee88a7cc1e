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

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
  #[error("device already initialised")]
  AlreadyInitialised,
  #[error("device is not initialised")]
  NotInitialised,
  #[error("user callback already registered")]
  CallbackAlreadyRegistered,
  #[error("reply buffer too small for the frame received ({needed} > {capacity})")]
  ReplyTruncated { needed: usize, capacity: usize },
  #[error(transparent)]
  Transport(#[from] ca8210_transport::TransportError),
}
