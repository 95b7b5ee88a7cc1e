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

//! The device facade (`init`/`deinit`/`reset`/`register_user_callback`/
//! `api_downstream`) and the per-device exchange-private state behind it.

use crate::classifier;
use crate::config::MAX_BUF_SIZE;
use crate::engine::{self, DispatchTarget};
use crate::error::ExchangeError;
use ca8210_queue::BufferQueue;
use ca8210_transport::{Transport, TransportError, TransportKind};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

static NEXT_DEVICE_ID: AtomicU32 = AtomicU32::new(1);

/// The `Closed -> Opening -> Open -> Closing -> Closed` state machine from
/// §4.7, made an explicit, observable enum rather than a pair of booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
  Closed,
  Opening,
  Open,
  Closing,
}

/// The external MAC-library seam: offered every non-SYN frame before the
/// user callback, matching `downstream_dispatch` in `spec.md` §2/§4.5. The
/// MAC encoder/decoder itself is out of scope (§1); callers that have one
/// install it here.
pub trait DownstreamDispatch: Send + Sync {
  /// Returns `true` if this implementation recognised and handled the
  /// frame; `false` routes it to the registered user callback instead.
  fn dispatch(&self, buf: &[u8], device_id: u32) -> bool;
}

pub type ErrorHandler = Arc<dyn Fn(Device, TransportError) + Send + Sync>;
pub type UserCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Every field here is independently `Arc`-shareable so that callers only
/// ever hold `DeviceInner::exchange`'s lock long enough to clone out the
/// handles they need, never across a blocking queue wait or transport call
/// — otherwise a thread parked in a synchronous `api_downstream` call would
/// block every other operation on the device, including `deinit`.
struct ExchangeLive {
  transport: Arc<Mutex<Box<dyn Transport>>>,
  in_queue: Arc<BufferQueue>,
  out_queue: Arc<BufferQueue>,
  sync_mutex: Arc<Mutex<()>>,
  run_flag: Arc<AtomicBool>,
  io_thread: Option<JoinHandle<()>>,
  kind: TransportKind,
}

struct DeviceInner {
  id: u32,
  state: Mutex<DeviceState>,
  dispatch: Mutex<Option<Arc<dyn DownstreamDispatch>>>,
  user_callback: Mutex<Option<UserCallback>>,
  error_handler: Mutex<Option<ErrorHandler>>,
  exchange: Mutex<Option<ExchangeLive>>,
  protocol_errors: AtomicU64,
}

impl DispatchTarget for DeviceInner {
  fn on_downstream(&self, buf: &[u8]) {
    let recognised = match self.dispatch.lock().unwrap().as_ref() {
      Some(d) => d.dispatch(buf, self.id),
      None => false,
    };
    if !recognised {
      if let Some(cb) = self.user_callback.lock().unwrap().as_ref() {
        cb(buf);
      }
    }
  }
}

/// A shared handle to one CA8210 exchange. Cloning a `Device` shares the
/// same underlying state — this is the Rust reading of the spec's
/// application-owned `ca821x_dev` struct, whose `api_downstream` function
/// pointer is simply this type's inherent method.
#[derive(Clone)]
pub struct Device(Arc<DeviceInner>);

impl fmt::Debug for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Device").field("id", &self.0.id).finish()
  }
}

impl Default for Device {
  fn default() -> Self {
    Self::new()
  }
}

impl Device {
  pub fn new() -> Self {
    let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::SeqCst);
    Self(Arc::new(DeviceInner {
      id,
      state: Mutex::new(DeviceState::Closed),
      dispatch: Mutex::new(None),
      user_callback: Mutex::new(None),
      error_handler: Mutex::new(None),
      exchange: Mutex::new(None),
      protocol_errors: AtomicU64::new(0),
    }))
  }

  /// Construct a device around an already-open transport, bypassing
  /// `ca8210_transport::open_any`'s kernel-then-USB auto-selection. The fake
  /// `Transport` used by integration tests goes through this path.
  pub fn init_with_transport(
    &self,
    transport: Box<dyn Transport>,
    error_handler: Option<ErrorHandler>,
  ) -> Result<(), ExchangeError> {
    self.init_inner(transport, error_handler)
  }

  /// `util_init`: auto-selects kernel-then-USB and starts the I/O worker.
  pub fn init(&self, error_handler: Option<ErrorHandler>) -> Result<(), ExchangeError> {
    let transport = ca8210_transport::open_any()?;
    self.init_inner(transport, error_handler)
  }

  fn init_inner(
    &self,
    transport: Box<dyn Transport>,
    error_handler: Option<ErrorHandler>,
  ) -> Result<(), ExchangeError> {
    {
      let mut state = self.0.state.lock().unwrap();
      if *state != DeviceState::Closed {
        return Err(ExchangeError::AlreadyInitialised);
      }
      *state = DeviceState::Opening;
    }

    let kind = transport.kind();
    let in_queue = Arc::new(BufferQueue::new());
    let out_queue = Arc::new(BufferQueue::new());
    let run_flag = Arc::new(AtomicBool::new(true));
    let transport: Arc<Mutex<Box<dyn Transport>>> = Arc::new(Mutex::new(transport));

    let downstream_queue = engine::register_device(self.0.id, Arc::clone(&self.0) as Arc<dyn DispatchTarget>);

    *self.0.error_handler.lock().unwrap() = error_handler;

    let worker_device = self.clone();
    let worker_transport = Arc::clone(&transport);
    let worker_in_queue = Arc::clone(&in_queue);
    let worker_out_queue = Arc::clone(&out_queue);
    let worker_run_flag = Arc::clone(&run_flag);
    let worker_downstream_queue = Arc::clone(&downstream_queue);

    // Store the exchange state (with no worker handle yet) before spawning
    // the worker, so the worker never observes `self.0.exchange` as `None`.
    *self.0.exchange.lock().unwrap() = Some(ExchangeLive {
      transport,
      in_queue,
      out_queue,
      sync_mutex: Arc::new(Mutex::new(())),
      run_flag,
      io_thread: None,
      kind,
    });

    let handle = std::thread::Builder::new()
      .name(format!("ca8210-io-{}", self.0.id))
      .spawn(move || {
        io_worker_loop(
          worker_device,
          worker_transport,
          worker_in_queue,
          worker_out_queue,
          worker_downstream_queue,
          worker_run_flag,
        )
      })
      .expect("spawning the io worker thread should not fail");

    self.0.exchange.lock().unwrap().as_mut().unwrap().io_thread = Some(handle);
    *self.0.state.lock().unwrap() = DeviceState::Open;
    tracing::info!(device = self.0.id, transport = ?kind, "device initialised");
    Ok(())
  }

  /// `util_deinit`.
  pub fn deinit(&self) {
    *self.0.state.lock().unwrap() = DeviceState::Closing;

    let exchange = self.0.exchange.lock().unwrap().take();
    if let Some(mut exchange) = exchange {
      exchange.run_flag.store(false, Ordering::SeqCst);
      exchange.transport.lock().unwrap().signal();

      // Unblock a caller parked in `api_downstream`'s `in_queue.wait()`
      // (§7's restart path): push the zero-length marker frame the
      // synchronous branch already treats as `ExchangeError::NotInitialised`
      // (see the `node.data.is_empty()` check below), so a transport error
      // arriving mid-request doesn't strand that thread forever.
      exchange.in_queue.enqueue(self.0.id, &[]);

      if let Some(handle) = exchange.io_thread.take() {
        if handle.thread().id() == std::thread::current().id() {
          // `deinit` was reached from inside this device's own I/O worker
          // (the restart path in §7: an error handler calls back into
          // `init`/`deinit` from the thread reporting the error). Joining
          // here would deadlock; the flag flip above is enough to make the
          // worker return on its own right after this call unwinds.
          drop(handle);
        } else {
          let _ = handle.join();
        }
      }

      // Only decrement the shared dispatch worker's device count if this
      // device actually held a live exchange — guards against a double
      // `deinit()` (or a `deinit()` before a successful `init()`)
      // prematurely tearing down the process-wide dispatch worker while
      // other devices are still open.
      engine::deregister_device(self.0.id);
    }

    *self.0.state.lock().unwrap() = DeviceState::Closed;
    tracing::info!(device = self.0.id, "device deinitialised");
  }

  /// `util_reset`: delegates to the transport (kernel: ioctl; USB: returns
  /// `Unsupported`, matching `spec.md` §4.7).
  pub fn reset(&self, millis: u32) -> Result<(), ExchangeError> {
    let transport = {
      let guard = self.0.exchange.lock().unwrap();
      let exchange = guard.as_ref().ok_or(ExchangeError::NotInitialised)?;
      Arc::clone(&exchange.transport)
    };
    transport.lock().unwrap().reset(millis)?;
    Ok(())
  }

  pub fn register_user_callback(&self, cb: UserCallback) -> Result<(), ExchangeError> {
    let mut slot = self.0.user_callback.lock().unwrap();
    if slot.is_some() {
      return Err(ExchangeError::CallbackAlreadyRegistered);
    }
    *slot = Some(cb);
    Ok(())
  }

  /// Installs the external MAC-library dispatch seam (§1's "deliberately
  /// out of scope" collaborator). Not part of the spec's public surface by
  /// name, but the only way to plug one in from outside this crate.
  pub fn install_downstream_dispatch(&self, dispatch: Arc<dyn DownstreamDispatch>) {
    *self.0.dispatch.lock().unwrap() = Some(dispatch);
  }

  pub fn id(&self) -> u32 {
    self.0.id
  }

  pub fn state(&self) -> DeviceState {
    *self.0.state.lock().unwrap()
  }

  pub fn transport_kind(&self) -> Option<TransportKind> {
    self.0.exchange.lock().unwrap().as_ref().map(|e| e.kind)
  }

  pub fn error_count(&self) -> u64 {
    self.0.protocol_errors.load(Ordering::SeqCst)
  }

  /// `api_downstream`: §4.6's sync rendezvous. `reply` must be `Some` for a
  /// SYN frame expecting a response; its capacity bounds the maximum MAC
  /// message size the caller is prepared to receive.
  pub fn api_downstream(&self, buf: &[u8], reply: Option<&mut [u8]>) -> Result<usize, ExchangeError> {
    // Only ever holds `self.0.exchange`'s lock long enough to clone these
    // handles out — never across `sync_mutex` or a queue wait, both of
    // which can block for an unbounded time.
    let (transport, in_queue, out_queue, sync_mutex) = {
      let guard = self.0.exchange.lock().unwrap();
      let exchange = guard.as_ref().ok_or(ExchangeError::NotInitialised)?;
      (
        Arc::clone(&exchange.transport),
        Arc::clone(&exchange.in_queue),
        Arc::clone(&exchange.out_queue),
        Arc::clone(&exchange.sync_mutex),
      )
    };

    let synchronous = !buf.is_empty() && classifier::is_syn(buf[0]) && reply.is_some();

    // Held from "send sync request" to "reply consumed" (§4.6, §4.3's P4):
    // acquired here and dropped at the end of this function's scope.
    let _sync_guard = if synchronous {
      Some(sync_mutex.lock().unwrap())
    } else {
      None
    };

    out_queue.enqueue(self.0.id, buf);
    transport.lock().unwrap().signal();

    if !synchronous {
      return Ok(0);
    }

    let reply = reply.expect("synchronous branch guarantees reply.is_some()");
    in_queue.wait();
    let node = in_queue
      .pop()
      .expect("wait() guarantees the queue is non-empty");

    if node.data.is_empty() {
      // The restart path (§7) unblocks a waiter with a zero-length marker
      // rather than a real reply.
      return Err(ExchangeError::NotInitialised);
    }

    if node.data.len() > reply.len() {
      self.0.protocol_errors.fetch_add(1, Ordering::SeqCst);
      tracing::warn!(
        device = self.0.id,
        needed = node.data.len(),
        capacity = reply.len(),
        "synchronous reply truncated"
      );
      return Err(ExchangeError::ReplyTruncated {
        needed: node.data.len(),
        capacity: reply.len(),
      });
    }

    reply[..node.data.len()].copy_from_slice(&node.data);
    Ok(0)
  }

  fn escalate_error(&self, error: TransportError) {
    let handler = self.0.error_handler.lock().unwrap().clone();
    match handler {
      Some(handler) => handler(self.clone(), error),
      None => {
        tracing::error!(device = self.0.id, error = %error, "unhandled transport error, aborting");
        std::process::abort();
      }
    }
  }
}

/// The per-device I/O worker (§4.5). Holds its own clone of the transport
/// handle for the whole loop rather than re-acquiring `device.0.exchange`
/// each iteration, so a blocking `read` never contends with unrelated calls
/// like `Device::transport_kind` or `Device::error_count`.
fn io_worker_loop(
  device: Device,
  transport: Arc<Mutex<Box<dyn Transport>>>,
  in_queue: Arc<BufferQueue>,
  out_queue: Arc<BufferQueue>,
  downstream_queue: Arc<BufferQueue>,
  run_flag: Arc<AtomicBool>,
) {
  transport.lock().unwrap().flush();

  let mut buf = [0u8; MAX_BUF_SIZE];
  while run_flag.load(Ordering::SeqCst) {
    let pending = out_queue.peek() > 0;

    let read_result = {
      let mut t = transport.lock().unwrap();
      t.set_write_pending(pending);
      t.read(&mut buf)
    };

    match read_result {
      Ok(0) => {}
      Ok(n) => {
        if classifier::is_syn(buf[0]) {
          in_queue.enqueue(device.0.id, &buf[..n]);
        } else {
          downstream_queue.enqueue(device.0.id, &buf[..n]);
        }
      }
      Err(e) => {
        tracing::error!(device = device.0.id, error = %e, "transport read failed");
        device.escalate_error(e);
      }
    }

    if !run_flag.load(Ordering::SeqCst) {
      break;
    }

    if let Some(node) = out_queue.pop() {
      let write_result = transport.lock().unwrap().write(&node.data);
      if let Err(e) = write_result {
        tracing::error!(device = device.0.id, error = %e, "transport write failed");
        device.escalate_error(e);
      }
    }
  }

  tracing::info!(device = device.0.id, "io worker exiting");
}
