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

//! FIFO buffer queues shared between a device's I/O worker and its callers.
//!
//! A queue node owns a heap-allocated frame and the id of the device it is
//! tagged with. Nodes are pushed at the tail and popped from the head under
//! a single lock, matching the `add_to_queue`/`pop_from_queue` pair in the
//! original exchange's `ca821x-queue.c`. `Condvar`-based variants let a
//! worker block until a frame arrives instead of spinning.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Largest frame this exchange will ever carry on the wire (§3 invariant).
pub const MAX_BUF_SIZE: usize = 189;

/// A single owned frame, tagged with the device id that produced or should
/// receive it.
#[derive(Debug, Clone)]
pub struct QueueNode {
  pub device: u32,
  pub data: Vec<u8>,
}

impl QueueNode {
  pub fn new(device: u32, data: &[u8]) -> Self {
    Self {
      device,
      data: data.to_vec(),
    }
  }
}

/// A FIFO queue of [`QueueNode`]s guarded by a single mutex, with an
/// optional condvar for blocking consumers.
#[derive(Default)]
pub struct BufferQueue {
  nodes: Mutex<VecDeque<QueueNode>>,
  cond: Condvar,
}

impl BufferQueue {
  pub fn new() -> Self {
    Self {
      nodes: Mutex::new(VecDeque::new()),
      cond: Condvar::new(),
    }
  }

  /// Copy `data` into a fresh node and append it at the tail, waking any
  /// thread blocked in [`BufferQueue::wait`] or [`BufferQueue::pop_blocking`].
  pub fn enqueue(&self, device: u32, data: &[u8]) {
    let mut guard = self.nodes.lock().unwrap();
    guard.push_back(QueueNode::new(device, data));
    self.cond.notify_all();
  }

  /// Remove and return the head node, if any. Non-blocking.
  pub fn pop(&self) -> Option<QueueNode> {
    self.nodes.lock().unwrap().pop_front()
  }

  /// Copy the head node into `dst`, returning `(len, device)`. If the head
  /// frame is longer than `dst` it is dropped and `(0, 0)` is returned — a
  /// protocol bug, per §4.1.
  pub fn pop_into(&self, dst: &mut [u8]) -> (usize, u32) {
    let mut guard = self.nodes.lock().unwrap();
    let Some(node) = guard.pop_front() else {
      return (0, 0);
    };
    if node.data.len() > dst.len() {
      tracing::warn!(
        device = node.device,
        frame_len = node.data.len(),
        capacity = dst.len(),
        "dropping frame longer than caller's buffer"
      );
      return (0, 0);
    }
    dst[..node.data.len()].copy_from_slice(&node.data);
    (node.data.len(), node.device)
  }

  /// Length of the head frame, or 0 if the queue is empty.
  pub fn peek(&self) -> usize {
    self
      .nodes
      .lock()
      .unwrap()
      .front()
      .map(|n| n.data.len())
      .unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.lock().unwrap().is_empty()
  }

  /// Block until the queue is non-empty, then return the head frame's
  /// length. Tolerates spurious wakeups by re-checking in a loop.
  pub fn wait(&self) -> usize {
    let mut guard = self.nodes.lock().unwrap();
    while guard.is_empty() {
      guard = self.cond.wait(guard).unwrap();
    }
    guard.front().unwrap().data.len()
  }

  /// Block (up to `timeout`) until the queue is non-empty, then pop the head
  /// node into `dst`. Returns `(len, device)`, `(0, 0)` on timeout.
  pub fn wait_pop_into(&self, dst: &mut [u8], timeout: Duration) -> (usize, u32) {
    let mut guard = self.nodes.lock().unwrap();
    while guard.is_empty() {
      let (next_guard, result) = self.cond.wait_timeout(guard, timeout).unwrap();
      guard = next_guard;
      if result.timed_out() && guard.is_empty() {
        return (0, 0);
      }
    }
    let node = guard.pop_front().unwrap();
    if node.data.len() > dst.len() {
      return (0, 0);
    }
    dst[..node.data.len()].copy_from_slice(&node.data);
    (node.data.len(), node.device)
  }

  /// Wake every thread blocked in `wait`/`wait_pop_into` without enqueueing
  /// anything. Used by shutdown paths that need a waiter to re-check a run
  /// flag rather than consume a real frame.
  pub fn notify_all(&self) {
    self.cond.notify_all();
  }
}
