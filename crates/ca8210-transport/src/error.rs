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
pub enum TransportError {
  #[error("usb transport error: {0}")]
  Usb(String),
  #[error("kernel transport i/o error: {0}")]
  Kernel(#[from] std::io::Error),
  #[error("no compatible transport available")]
  NoTransportAvailable,
  #[error("operation not supported by this transport")]
  Unsupported,
  #[error("{0}")]
  Fragment(#[from] ca8210_fragment::FragmentError),
}
