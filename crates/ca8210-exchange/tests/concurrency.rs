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

//! Real-thread integration tests against an in-process loopback transport —
//! no USB/kernel hardware needed to exercise `spec.md` §8's properties.
//! These use generous timeouts and real `std::thread`s rather than a model
//! checker (see `SPEC_FULL.md` §5 for why `loom` was left out).

use ca8210_exchange::{Device, ErrorHandler, Transport, TransportError, TransportKind};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Stands in for a CA8210 radio: every written frame is either turned into a
/// synchronous reply (SYN bit set) or echoed back unchanged (async traffic),
/// and is fed back through `read` the way a real transceiver's response
/// would arrive. `fail_next_read` lets a test simulate scenario 5's
/// transport failure.
#[allow(dead_code)]
struct LoopbackTransport {
  inbound: Arc<(Mutex<VecDeque<Vec<u8>>>, Condvar)>,
  outbound_log: Arc<Mutex<Vec<Vec<u8>>>>,
  write_pending: bool,
  fail_next_read: Arc<AtomicBool>,
  reset_calls: Arc<AtomicUsize>,
}

impl LoopbackTransport {
  fn new() -> Self {
    Self {
      inbound: Arc::new((Mutex::new(VecDeque::new()), Condvar::new())),
      outbound_log: Arc::new(Mutex::new(Vec::new())),
      write_pending: false,
      fail_next_read: Arc::new(AtomicBool::new(false)),
      reset_calls: Arc::new(AtomicUsize::new(0)),
    }
  }
}

impl Transport for LoopbackTransport {
  fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
    if self.fail_next_read.swap(false, Ordering::SeqCst) {
      return Err(TransportError::Usb("simulated transport failure".into()));
    }

    let (lock, cvar) = &*self.inbound;
    let mut guard = lock.lock().unwrap();
    let timeout = if self.write_pending {
      Duration::from_millis(5)
    } else {
      Duration::from_millis(20)
    };
    if guard.is_empty() {
      let (g, _) = cvar.wait_timeout(guard, timeout).unwrap();
      guard = g;
    }
    match guard.pop_front() {
      Some(frame) => {
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
      }
      None => Ok(0),
    }
  }

  fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
    self.outbound_log.lock().unwrap().push(buf.to_vec());

    let reply = if !buf.is_empty() && buf[0] & 0x40 != 0 {
      vec![buf[0] | 0x80, 1]
    } else {
      buf.to_vec()
    };

    let (lock, cvar) = &*self.inbound;
    lock.lock().unwrap().push_back(reply);
    cvar.notify_all();
    Ok(())
  }

  fn flush(&mut self) {
    self.inbound.0.lock().unwrap().clear();
  }

  fn signal(&self) {
    self.inbound.1.notify_all();
  }

  fn reset(&mut self, _millis: u32) -> Result<(), TransportError> {
    self.reset_calls.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  fn kind(&self) -> TransportKind {
    TransportKind::Kernel
  }

  fn set_write_pending(&mut self, pending: bool) {
    self.write_pending = pending;
  }
}

fn open_device() -> Device {
  let device = Device::new();
  device
    .init_with_transport(Box::new(LoopbackTransport::new()), None)
    .expect("init with a fresh loopback transport should succeed");
  device
}

/// Scenario 1: a synchronous MLME-RESET round trip.
#[test]
fn sync_request_reply_round_trip() {
  let device = open_device();
  let mut reply = [0u8; 32];
  let rc = device
    .api_downstream(&[0x45, 0x00], Some(&mut reply))
    .expect("sync round trip should succeed");

  assert_eq!(rc, 0);
  assert_eq!(reply[0], 0x45 | 0x80);
  assert_eq!(reply[1], 1);

  device.deinit();
}

/// Scenario 2 (adapted to one device): frames submitted downstream arrive
/// at the user callback in submission order (P2, P3).
#[test]
fn async_frames_delivered_in_submission_order() {
  let device = open_device();
  let received = Arc::new(Mutex::new(Vec::new()));
  let received_cb = Arc::clone(&received);

  device
    .register_user_callback(Arc::new(move |buf: &[u8]| {
      received_cb.lock().unwrap().push(buf[1]);
    }))
    .unwrap();

  const N: u8 = 100;
  for seq in 0..N {
    device.api_downstream(&[0xD3, seq], None).unwrap();
  }

  let deadline = std::time::Instant::now() + Duration::from_secs(2);
  loop {
    if received.lock().unwrap().len() == N as usize || std::time::Instant::now() > deadline {
      break;
    }
    std::thread::sleep(Duration::from_millis(10));
  }

  let got = received.lock().unwrap().clone();
  let expected: Vec<u8> = (0..N).collect();
  assert_eq!(got, expected);

  device.deinit();
}

/// Scenario 4: two threads issue synchronous requests concurrently; each
/// gets back exactly the reply matching its own request, demonstrating
/// `sync_mutex` serialises them rather than interleaving replies (P4).
#[test]
fn concurrent_sync_requests_do_not_cross_wires() {
  let device = Arc::new(open_device());

  let handles: Vec<_> = (0u8..8)
    .map(|i| {
      let device = Arc::clone(&device);
      std::thread::spawn(move || {
        let mut reply = [0u8; 32];
        let command = 0x40 | (0x10 + i); // distinct SYN command ids per thread
        device
          .api_downstream(&[command, 0x00], Some(&mut reply))
          .expect("sync call should succeed");
        assert_eq!(reply[0], command | 0x80, "thread {i} got another thread's reply");
        assert_eq!(reply[1], 1);
      })
    })
    .collect();

  for h in handles {
    h.join().unwrap();
  }

  device.deinit();
}

/// Scenario 5: a transport failure is escalated to the error handler, which
/// restarts the device by re-initialising on the same handle; subsequent
/// calls then succeed again.
#[test]
fn transport_failure_triggers_restart_via_error_handler() {
  let device = Device::new();
  let transport = LoopbackTransport::new();
  let fail_flag = Arc::clone(&transport.fail_next_read);

  let restarted = Arc::new(AtomicBool::new(false));
  let restarted_cb = Arc::clone(&restarted);
  let handler: ErrorHandler = Arc::new(move |device: Device, _err: TransportError| {
    device.deinit();
    device
      .init_with_transport(Box::new(LoopbackTransport::new()), None)
      .expect("restart should succeed");
    restarted_cb.store(true, Ordering::SeqCst);
  });

  device
    .init_with_transport(Box::new(transport), Some(handler))
    .unwrap();

  fail_flag.store(true, Ordering::SeqCst);

  let deadline = std::time::Instant::now() + Duration::from_secs(2);
  while !restarted.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
    std::thread::sleep(Duration::from_millis(10));
  }
  assert!(restarted.load(Ordering::SeqCst), "error handler never ran");

  let mut reply = [0u8; 32];
  device
    .api_downstream(&[0x45, 0x00], Some(&mut reply))
    .expect("device should work again after restart");
  assert_eq!(reply[0], 0x45 | 0x80);

  device.deinit();
}

/// Scenario 6: after `deinit` returns, the I/O worker has already exited
/// (the call joins it), and the device is observably `Closed`.
#[test]
fn deinit_joins_io_worker_and_closes_device() {
  let device = open_device();
  assert_eq!(device.state(), ca8210_exchange::DeviceState::Open);
  device.deinit();
  assert_eq!(device.state(), ca8210_exchange::DeviceState::Closed);
}

/// The "front-of-queue reply pairing" assumption from `spec.md` §9: the
/// first SYN frame to arrive after a request is sent is treated as that
/// request's reply, with no correlation by sequence number or handle. This
/// is preserved intentionally, not fixed — this test documents it by
/// showing a reply is paired purely on arrival order.
#[test]
fn sync_reply_is_paired_by_arrival_order_not_identity() {
  let device = open_device();
  let mut reply = [0u8; 32];
  // The loopback transport always answers the most recent SYN write with a
  // reply carrying that same command id, so this exercises the pairing
  // mechanism (front of `in_queue`) rather than a content-based match.
  device
    .api_downstream(&[0x61, 0x00], Some(&mut reply))
    .unwrap();
  assert_eq!(reply[0], 0x61 | 0x80);

  device.deinit();
}
