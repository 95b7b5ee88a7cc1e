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

//! Stateless framing classifier. Inspects only byte 0 of a frame.

use crate::config::{SYN_BIT, USER_DEFINED_RANGE};

/// `true` if this frame is a synchronous request/response primitive.
pub fn is_syn(command_id: u8) -> bool {
  command_id & SYN_BIT != 0
}

/// `true` if this command id falls in the vendor/user-defined range
/// (0xA0..=0xAF), i.e. traffic the MAC library does not recognise.
pub fn is_user_defined(command_id: u8) -> bool {
  USER_DEFINED_RANGE.contains(&command_id)
}
