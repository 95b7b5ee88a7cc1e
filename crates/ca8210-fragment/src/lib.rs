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

//! Splits a TLV frame into 64-byte USB HID report bodies, and reassembles
//! them back into a frame on the other end.
//!
//! Report body layout (report-ID byte is the transport's concern, not
//! this codec's): byte 0 is `FL??LLLLLL` (bit 7 = LAST, bit 6 = FIRST,
//! bits 5..0 = payload length 0..=63); bytes `1..1+len` are payload.
//!
//! The cursor is threaded through explicitly by the caller rather than kept
//! as function-static state, so the same codec can run concurrently for
//! several devices without cross-talk.

/// Largest single frame this exchange will ever fragment (§3 invariant).
pub const MAX_BUF_SIZE: usize = 189;
/// Largest payload a single report body can carry.
pub const MAX_FRAG_PAYLOAD: usize = 63;

const LAST_MASK: u8 = 1 << 7;
const FIRST_MASK: u8 = 1 << 6;
const LEN_MASK: u8 = 0x3F;

/// Error produced when a frame is too long to fragment, or a report is
/// malformed during reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FragmentError {
  #[error("frame of {0} bytes exceeds MAX_BUF_SIZE ({MAX_BUF_SIZE})")]
  FrameTooLong(usize),
  #[error("fragment claims FIRST but reassembly offset was not 0")]
  UnexpectedFirst,
  #[error("fragment does not claim FIRST but reassembly offset was 0")]
  MissingFirst,
  #[error("reassembled frame would exceed MAX_BUF_SIZE")]
  Overflow,
}

/// Produce the next report body for `input`, advancing `cursor`.
///
/// Returns the report body (`header` byte followed by up to
/// [`MAX_FRAG_PAYLOAD`] payload bytes) and `true` if more fragments follow.
/// `cursor` must be 0 on the first call for a given frame and is reset to 0
/// once the LAST fragment is emitted.
pub fn next_fragment(input: &[u8], cursor: &mut usize) -> Result<(Vec<u8>, bool), FragmentError> {
  if input.len() > MAX_BUF_SIZE {
    return Err(FragmentError::FrameTooLong(input.len()));
  }

  let is_first = *cursor == 0;
  let mut end_offset = *cursor + MAX_FRAG_PAYLOAD;
  let is_last = end_offset >= input.len();
  if is_last {
    end_offset = input.len();
  }
  let frag_len = end_offset - *cursor;
  debug_assert!(frag_len <= MAX_FRAG_PAYLOAD);

  let mut header = frag_len as u8 & LEN_MASK;
  if is_first {
    header |= FIRST_MASK;
  }
  if is_last {
    header |= LAST_MASK;
  }

  let mut body = Vec::with_capacity(1 + frag_len);
  body.push(header);
  body.extend_from_slice(&input[*cursor..end_offset]);

  *cursor = if is_last { 0 } else { end_offset };
  Ok((body, !is_last))
}

/// Fold one report body (as produced by [`next_fragment`]) into `out`,
/// advancing `cursor`. Returns `Some(total_len)` once the LAST fragment has
/// been folded in, `None` otherwise.
pub fn assemble(
  fragment: &[u8],
  out: &mut [u8; MAX_BUF_SIZE],
  cursor: &mut usize,
) -> Result<Option<usize>, FragmentError> {
  let header = fragment[0];
  let frag_len = (header & LEN_MASK) as usize;
  let is_last = header & LAST_MASK != 0;
  let is_first = header & FIRST_MASK != 0;

  if is_first && *cursor != 0 {
    return Err(FragmentError::UnexpectedFirst);
  }
  if !is_first && *cursor == 0 {
    return Err(FragmentError::MissingFirst);
  }
  if *cursor + frag_len > MAX_BUF_SIZE {
    return Err(FragmentError::Overflow);
  }

  out[*cursor..*cursor + frag_len].copy_from_slice(&fragment[1..1 + frag_len]);
  *cursor += frag_len;
  let total = *cursor;

  if is_last {
    *cursor = 0;
    Ok(Some(total))
  } else {
    Ok(None)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// The 153-byte loopback vector from the exchange's built-in self-test.
  const LOOPBACK_VECTOR: [u8; 153] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
    0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e, 0x1f,
    0x20, 0x21, 0x22, 0x23, 0xca, 0x5c, 0x0d, 0xaa, 0xca, 0x5c, 0x0d, 0xaa, 0x11, 0x11, 0x22, 0x33,
    0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0x12, 0x23, 0x34, 0x45, 0x56, 0x67, 0x45, 0x56, 0x67, 0xe9,
    0xdc, 0x7c, 0x64, 0x56, 0x9a, 0x68, 0xe9, 0x86, 0xe8, 0xe2, 0xf1, 0x92, 0x9e, 0xc5, 0x92, 0x67,
    0x5f, 0x91, 0x65, 0xae, 0x9f, 0x01, 0x45, 0x12, 0xe5, 0xdb, 0xfb, 0x07, 0xf2, 0xe8, 0xfd, 0xb2,
    0x54, 0x26, 0x1d, 0xe8, 0xec, 0x3e, 0xf8, 0x25, 0xaa, 0xe6, 0x7e, 0xba, 0x5b, 0xa0, 0x6e, 0xfc,
    0xa3, 0xdf, 0x6d, 0x97, 0xbe, 0x7c, 0xf6, 0x51, 0x77, 0x7f, 0x28, 0x44, 0xda, 0x48, 0x4f, 0x2e,
    0x57, 0xc3, 0x81, 0x8e, 0x76, 0x22, 0x3d, 0x40, 0x5a, 0x69, 0x62, 0x91, 0x10, 0x87, 0x1d, 0x11,
    0x11, 0x11, 0xca, 0x5c, 0x0d, 0xaa, 0x11, 0x11,
  ];

  fn loopback(input: &[u8]) -> (Vec<u8>, usize, bool) {
    let mut tx_cursor = 0;
    let mut rx_cursor = 0;
    let mut out = [0u8; MAX_BUF_SIZE];
    let mut fragments = 0;
    let mut last_step_was_last = false;

    loop {
      let (body, more) = next_fragment(input, &mut tx_cursor).unwrap();
      fragments += 1;
      let result = assemble(&body, &mut out, &mut rx_cursor).unwrap();
      last_step_was_last = result.is_some();
      assert_eq!(!more, last_step_was_last, "both sides must agree on LAST in the same step");
      if result.is_some() {
        break;
      }
    }
    (out[..input.len()].to_vec(), fragments, last_step_was_last)
  }

  #[test]
  fn loopback_153_byte_vector_three_fragments_63_63_27() {
    let mut tx_cursor = 0;
    let mut sizes = Vec::new();
    loop {
      let (body, more) = next_fragment(&LOOPBACK_VECTOR, &mut tx_cursor).unwrap();
      sizes.push(body.len() - 1);
      if !more {
        break;
      }
    }
    assert_eq!(sizes, vec![63, 63, 27]);

    let (reassembled, fragments, last_seen) = loopback(&LOOPBACK_VECTOR);
    assert_eq!(fragments, 3);
    assert!(last_seen);
    assert_eq!(reassembled, LOOPBACK_VECTOR.to_vec());
  }

  #[test]
  fn boundary_fragment_counts() {
    let cases: &[(usize, usize)] = &[
      (0, 1),
      (1, 1),
      (63, 1),
      (64, 2),
      (65, 2),
      (188, 3),
      (189, 3),
    ];
    for &(len, expected_fragments) in cases {
      let input = vec![0xAB; len];
      let (_, fragments, _) = loopback(&input);
      assert_eq!(fragments, expected_fragments, "length {len}");
    }
  }

  #[test]
  fn frame_of_190_is_rejected() {
    let input = vec![0u8; 190];
    let mut cursor = 0;
    let err = next_fragment(&input, &mut cursor).unwrap_err();
    assert_eq!(err, FragmentError::FrameTooLong(190));
  }

  #[test]
  fn roundtrip_sweep_0_to_189() {
    for len in 0..=MAX_BUF_SIZE {
      let input: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
      let (reassembled, _, last_seen) = loopback(&input);
      assert!(last_seen);
      assert_eq!(reassembled, input, "length {len}");
    }
  }

  #[test]
  fn assemble_rejects_first_mid_stream() {
    let mut out = [0u8; MAX_BUF_SIZE];
    let mut cursor = 10;
    let fragment = [FIRST_MASK | 2, 0xAA, 0xBB];
    let err = assemble(&fragment, &mut out, &mut cursor).unwrap_err();
    assert_eq!(err, FragmentError::UnexpectedFirst);
  }

  #[test]
  fn assemble_rejects_missing_first() {
    let mut out = [0u8; MAX_BUF_SIZE];
    let mut cursor = 0;
    let fragment = [2, 0xAA, 0xBB];
    let err = assemble(&fragment, &mut out, &mut cursor).unwrap_err();
    assert_eq!(err, FragmentError::MissingFirst);
  }
}
