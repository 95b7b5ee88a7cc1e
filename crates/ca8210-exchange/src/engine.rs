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

//! Process-wide singleton: one downstream dispatch queue, one dispatch
//! worker thread, shared by every open device. Lazily created on the first
//! device's `init` and torn down on the last `deinit`, mirroring the
//! `ASYNC_ENGINE`/`ENGINE_INITIALIZED` pattern in the teacher's `exec` crate
//! (`lazy_static! Mutex<Option<T>>` plus a guarding `AtomicBool`), rather
//! than a plain `OnceLock` — re-creation after full teardown is a first-class
//! case here, unlike a runtime that only ever initialises once.

use crate::config::SHUTDOWN_SENTINEL_DEVICE;
use ca8210_queue::BufferQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Receiver of a non-SYN frame popped off the downstream dispatch queue.
/// Implemented by `DeviceInner`; kept as a trait object here so the engine
/// does not need to know about device internals.
pub trait DispatchTarget: Send + Sync {
  /// Offer `buf` to the MAC dispatch seam; if it is not recognised, fall
  /// back to the registered user callback.
  fn on_downstream(&self, buf: &[u8]);
}

struct EngineState {
  queue: Arc<BufferQueue>,
  dispatch_thread: Option<JoinHandle<()>>,
  targets: Arc<Mutex<HashMap<u32, Arc<dyn DispatchTarget>>>>,
  device_count: usize,
}

lazy_static::lazy_static! {
  static ref ENGINE: Mutex<Option<EngineState>> = Mutex::new(None);
}
static ENGINE_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Register a device with the process-wide engine, starting the dispatch
/// worker if this is the first device in the process. Returns the shared
/// downstream queue the device's I/O worker should push non-SYN frames onto.
pub fn register_device(device_id: u32, target: Arc<dyn DispatchTarget>) -> Arc<BufferQueue> {
  let mut guard = ENGINE.lock().unwrap();
  if guard.is_none() {
    let queue = Arc::new(BufferQueue::new());
    let targets: Arc<Mutex<HashMap<u32, Arc<dyn DispatchTarget>>>> =
      Arc::new(Mutex::new(HashMap::new()));
    let worker_queue = Arc::clone(&queue);
    let worker_targets = Arc::clone(&targets);
    let handle = std::thread::spawn(move || dispatch_worker_loop(worker_queue, worker_targets));
    *guard = Some(EngineState {
      queue,
      dispatch_thread: Some(handle),
      targets,
      device_count: 0,
    });
    ENGINE_INITIALIZED.store(true, Ordering::SeqCst);
    tracing::info!("dispatch worker started");
  }

  let state = guard.as_mut().unwrap();
  state.targets.lock().unwrap().insert(device_id, target);
  state.device_count += 1;
  Arc::clone(&state.queue)
}

/// Remove a device from the engine. If it was the last device in the
/// process, pushes the shutdown sentinel, joins the dispatch worker, and
/// drops the singleton so a subsequent `register_device` starts fresh.
pub fn deregister_device(device_id: u32) {
  let mut guard = ENGINE.lock().unwrap();
  let Some(state) = guard.as_mut() else {
    return;
  };

  state.targets.lock().unwrap().remove(&device_id);
  state.device_count = state.device_count.saturating_sub(1);

  if state.device_count == 0 {
    state.queue.enqueue(SHUTDOWN_SENTINEL_DEVICE, &[]);
    if let Some(handle) = state.dispatch_thread.take() {
      drop(guard);
      let _ = handle.join();
      tracing::info!("dispatch worker joined, engine torn down");
      *ENGINE.lock().unwrap() = None;
      ENGINE_INITIALIZED.store(false, Ordering::SeqCst);
      return;
    }
  }
}

/// `true` once at least one device has ever registered and the engine has
/// not since fully torn down. Mostly useful from tests.
pub fn is_running() -> bool {
  ENGINE_INITIALIZED.load(Ordering::SeqCst)
}

fn dispatch_worker_loop(
  queue: Arc<BufferQueue>,
  targets: Arc<Mutex<HashMap<u32, Arc<dyn DispatchTarget>>>>,
) {
  loop {
    queue.wait();
    let Some(node) = queue.pop() else {
      continue;
    };

    if node.device == SHUTDOWN_SENTINEL_DEVICE && node.data.is_empty() {
      tracing::debug!("dispatch worker observed shutdown sentinel");
      return;
    }

    let target = targets.lock().unwrap().get(&node.device).cloned();
    match target {
      Some(target) => target.on_downstream(&node.data),
      None => tracing::warn!(device = node.device, "downstream frame for unknown device dropped"),
    }
  }
}
