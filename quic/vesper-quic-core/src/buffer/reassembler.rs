// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Reorders out-of-order byte chunks into a contiguous stream.
//!
//! Both the CRYPTO handshake stream and every receive stream use this
//! buffer. Chunks are keyed by stream offset; overlapping writes must
//! carry identical bytes, and a signaled final size is immutable.

use alloc::{collections::BTreeMap, vec::Vec};
use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Overlapping chunks disagreed about the bytes at an offset
    InconsistentData,
    /// A FIN or RESET contradicted the established final size, or data
    /// arrived past it
    InvalidFinalSize,
    /// The offset arithmetic exceeded the 2^62-1 stream limit
    OutOfRange,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InconsistentData => write!(f, "overlapping stream data did not match"),
            Self::InvalidFinalSize => write!(f, "final size violation"),
            Self::OutOfRange => write!(f, "stream offset out of range"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Maximum stream offset (2^62 - 1)
const MAX_OFFSET: u64 = (1 << 62) - 1;

#[derive(Debug, Default)]
pub struct Reassembler {
    /// Non-overlapping pending chunks keyed by start offset; never
    /// contains data below `read_offset`
    chunks: BTreeMap<u64, Vec<u8>>,
    /// Offset of the next byte the application will read
    read_offset: u64,
    /// One past the highest byte received so far
    max_received: u64,
    final_size: Option<u64>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    #[inline]
    pub fn max_received(&self) -> u64 {
        self.max_received
    }

    #[inline]
    pub fn final_size(&self) -> Option<u64> {
        self.final_size
    }

    /// The end of the contiguous prefix available to the reader
    pub fn contiguous_offset(&self) -> u64 {
        let mut end = self.read_offset;
        for (offset, data) in &self.chunks {
            if *offset > end {
                break;
            }
            end = end.max(offset + data.len() as u64);
        }
        end
    }

    /// Returns true once every byte up to the final size has arrived
    pub fn is_complete(&self) -> bool {
        self.final_size
            .is_some_and(|final_size| self.contiguous_offset() == final_size)
    }

    /// Returns true once the application has consumed the entire stream
    pub fn is_consumed(&self) -> bool {
        self.final_size
            .is_some_and(|final_size| self.read_offset == final_size)
    }

    /// Writes a chunk received at `offset`.
    ///
    /// Re-delivery of already-processed bytes is a no-op; overlaps are
    /// verified byte-for-byte.
    pub fn write_at(&mut self, offset: u64, data: &[u8], fin: bool) -> Result<(), Error> {
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= MAX_OFFSET)
            .ok_or(Error::OutOfRange)?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.5
        //# Once a final size for a stream is known, it cannot change.  If a
        //# RESET_STREAM or STREAM frame is received indicating a change in
        //# the final size for the stream, an endpoint MUST respond with an
        //# error of type FINAL_SIZE_ERROR
        if let Some(final_size) = self.final_size {
            if end > final_size || (fin && end != final_size) {
                return Err(Error::InvalidFinalSize);
            }
        } else if fin {
            if end < self.max_received {
                return Err(Error::InvalidFinalSize);
            }
            self.final_size = Some(end);
        }

        self.max_received = self.max_received.max(end);

        // clip the part already consumed by the reader
        let (mut start, mut data) = if offset < self.read_offset {
            let skip = (self.read_offset - offset).min(data.len() as u64) as usize;
            (offset + skip as u64, &data[skip..])
        } else {
            (offset, data)
        };

        while !data.is_empty() {
            // find the first existing chunk at or after `start`, and the one
            // covering it from below, to locate the next hole
            let covering = self
                .chunks
                .range(..=start)
                .next_back()
                .map(|(chunk_start, chunk)| (*chunk_start, chunk.len() as u64));

            if let Some((chunk_start, chunk_len)) = covering {
                let chunk_end = chunk_start + chunk_len;
                if chunk_end > start {
                    // verify the overlapping region matches
                    let overlap = (chunk_end - start).min(data.len() as u64) as usize;
                    let chunk = &self.chunks[&chunk_start];
                    let existing = &chunk[(start - chunk_start) as usize..][..overlap];
                    if existing != &data[..overlap] {
                        return Err(Error::InconsistentData);
                    }
                    start += overlap as u64;
                    data = &data[overlap..];
                    continue;
                }
            }

            // `start` is in a hole: write up to the next chunk
            let hole_end = self
                .chunks
                .range(start..)
                .next()
                .map(|(chunk_start, _)| *chunk_start)
                .unwrap_or(u64::MAX);
            let fill = (hole_end - start).min(data.len() as u64) as usize;
            self.chunks.insert(start, data[..fill].to_vec());
            start += fill as u64;
            data = &data[fill..];
        }

        Ok(())
    }

    /// Pops up to `max` contiguous bytes from the read offset, merging
    /// across chunk boundaries
    pub fn pop(&mut self, max: usize) -> Option<Vec<u8>> {
        let mut out: Option<Vec<u8>> = None;
        let mut remaining = max;

        while remaining > 0 {
            let Some((&offset, _)) = self.chunks.first_key_value() else {
                break;
            };
            if offset != self.read_offset {
                break;
            }

            let mut chunk = self.chunks.remove(&offset)?;
            if chunk.len() > remaining {
                let rest = chunk.split_off(remaining);
                self.chunks.insert(offset + remaining as u64, rest);
            }
            self.read_offset += chunk.len() as u64;
            remaining -= chunk.len();

            out = Some(match out.take() {
                None => chunk,
                Some(mut collected) => {
                    collected.extend_from_slice(&chunk);
                    collected
                }
            });
        }

        out
    }

    /// Pops every contiguous byte currently buffered
    pub fn pop_all(&mut self) -> Vec<u8> {
        self.pop(usize::MAX).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    //= https://www.rfc-editor.org/rfc/rfc9000#section-2.2
    //# An endpoint
    //# could receive data for a stream at the same stream offset multiple
    //# times.  Data that has already been received can be discarded.
    #[test]
    fn out_of_order_chunks_assemble() {
        let mut buffer = Reassembler::new();
        buffer.write_at(0, &[1; 100], false).unwrap();
        buffer.write_at(200, &[3; 100], false).unwrap();
        assert_eq!(buffer.contiguous_offset(), 100);

        buffer.write_at(100, &[2; 100], true).unwrap();
        assert_eq!(buffer.contiguous_offset(), 300);
        assert!(buffer.is_complete());

        let data = buffer.pop_all();
        assert_eq!(data.len(), 300);
        assert_eq!(&data[..100], &[1; 100][..]);
        assert_eq!(&data[100..200], &[2; 100][..]);
        assert_eq!(&data[200..], &[3; 100][..]);
        assert!(buffer.is_consumed());
    }

    #[test]
    fn duplicate_delivery_is_idempotent() {
        let mut buffer = Reassembler::new();
        buffer.write_at(0, b"hello world", false).unwrap();
        let first = buffer.pop_all();

        // the same frame again, plus an overlapping one
        buffer.write_at(0, b"hello world", false).unwrap();
        buffer.write_at(6, b"world", false).unwrap();
        assert!(buffer.pop(usize::MAX).is_none());
        assert_eq!(first, b"hello world");
    }

    #[test]
    fn mismatched_overlap_is_rejected() {
        let mut buffer = Reassembler::new();
        buffer.write_at(10, b"abcdef", false).unwrap();
        assert_eq!(
            buffer.write_at(12, b"cdXf", false),
            Err(Error::InconsistentData)
        );
        // a matching overlap extending past the chunk is fine
        buffer.write_at(12, b"cdefgh", false).unwrap();
        buffer.write_at(0, &[b'z'; 10], false).unwrap();
        assert_eq!(buffer.contiguous_offset(), 18);
    }

    #[test]
    fn final_size_is_immutable() {
        let mut buffer = Reassembler::new();
        buffer.write_at(0, &[0; 50], true).unwrap();
        assert_eq!(buffer.final_size(), Some(50));

        assert_eq!(
            buffer.write_at(0, &[0; 60], false),
            Err(Error::InvalidFinalSize)
        );
        assert_eq!(
            buffer.write_at(0, &[0; 40], true),
            Err(Error::InvalidFinalSize)
        );
        // re-signaling the same fin is allowed
        buffer.write_at(0, &[0; 50], true).unwrap();
    }

    #[test]
    fn fin_below_received_data_is_rejected() {
        let mut buffer = Reassembler::new();
        buffer.write_at(100, &[0; 10], false).unwrap();
        assert_eq!(
            buffer.write_at(0, &[0; 50], true),
            Err(Error::InvalidFinalSize)
        );
    }

    #[test]
    fn bounded_pop_splits_chunks() {
        let mut buffer = Reassembler::new();
        buffer.write_at(0, b"0123456789", false).unwrap();

        assert_eq!(buffer.pop(4).unwrap(), b"0123");
        assert_eq!(buffer.read_offset(), 4);
        assert_eq!(buffer.pop(100).unwrap(), b"456789");
        assert!(buffer.pop(1).is_none());
    }

    #[test]
    fn offset_overflow_rejected() {
        let mut buffer = Reassembler::new();
        assert_eq!(
            buffer.write_at(MAX_OFFSET, &[0; 2], false),
            Err(Error::OutOfRange)
        );
    }
}
