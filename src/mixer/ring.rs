use std::sync::atomic::{AtomicU64, Ordering};

use crate::{utils::time::SampleTime, Error};

// -------------------------------------------------------------------------------------------------

/// Outcome of a successful [`VoiceRingBuffer::add`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RingWrite {
    /// All samples got written.
    Complete,
    /// The write ran past the ring's capacity ahead of the read cursor: the tail got dropped.
    Truncated { written: usize, dropped: usize },
}

// -------------------------------------------------------------------------------------------------

/// A single producer, single consumer ring of mono samples, addressed by absolute sample time.
///
/// The control thread overlap-adds grains into the ring at their absolute start sample, the
/// real-time thread consumes samples in order, which zeroes them for the next lap.
///
/// Each cell packs the sample's f32 bits into the lower and the cell's lap (absolute position
/// divided by capacity) into the upper 32 bits. The reader consumes a cell by bumping its lap,
/// so a writer racing with the reader can never leave stale samples behind for the next lap:
/// its compare and swap fails on consumed cells, and the grain counts as late.
#[derive(Debug)]
pub(crate) struct VoiceRingBuffer {
    voice_index: usize,
    cells: Box<[AtomicU64]>,
    read_position: AtomicU64,
    write_position: AtomicU64,
}

impl VoiceRingBuffer {
    /// Create a silent ring with the given capacity in samples, starting to read at the given
    /// absolute sample time.
    pub fn new(voice_index: usize, capacity: usize, start_position: SampleTime) -> Self {
        debug_assert!(capacity > 0, "Invalid ring buffer capacity");
        let capacity_u64 = capacity as u64;
        let cells = (0..capacity_u64)
            .map(|index| {
                // lap of the first position >= start_position which maps to this cell
                let first_position = start_position
                    + (index + capacity_u64 - start_position % capacity_u64) % capacity_u64;
                AtomicU64::new(Self::pack(Self::lap(first_position, capacity_u64), 0.0))
            })
            .collect();
        Self {
            voice_index,
            cells,
            read_position: AtomicU64::new(start_position),
            write_position: AtomicU64::new(start_position),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Absolute sample time of the next sample the reader will consume.
    pub fn read_position(&self) -> SampleTime {
        self.read_position.load(Ordering::Acquire)
    }

    /// Absolute sample time right after the last sample that got written so far.
    pub fn write_position(&self) -> SampleTime {
        self.write_position.load(Ordering::Acquire)
    }

    #[inline]
    fn lap(position: SampleTime, capacity: u64) -> u32 {
        (position / capacity) as u32
    }

    #[inline]
    fn pack(lap: u32, value: f32) -> u64 {
        ((lap as u64) << 32) | value.to_bits() as u64
    }

    #[inline]
    fn unpack(cell: u64) -> (u32, f32) {
        ((cell >> 32) as u32, f32::from_bits(cell as u32))
    }

    /// Overlap-add `samples` into the ring, starting at absolute sample time `start`.
    ///
    /// Writes which start before the read cursor, or which got overtaken by the reader while
    /// writing, return `Error::LateGrain`. Writes which run past `read_position + capacity` get
    /// truncated.
    pub fn add(&self, start: SampleTime, samples: &[f32]) -> Result<RingWrite, Error> {
        let read_position = self.read_position();
        if start < read_position {
            return Err(Error::LateGrain {
                voice_index: self.voice_index,
                start_sample: start,
                read_position,
            });
        }

        let capacity = self.cells.len() as u64;
        let limit = read_position + capacity;
        let writable = (limit.saturating_sub(start) as usize).min(samples.len());

        let mut overtaken = false;
        for (offset, sample) in samples[..writable].iter().enumerate() {
            let position = start + offset as u64;
            let lap = Self::lap(position, capacity);
            let cell = &self.cells[(position % capacity) as usize];
            let mut current = cell.load(Ordering::Acquire);
            loop {
                let (cell_lap, value) = Self::unpack(current);
                if cell_lap != lap {
                    // consumed by the reader already
                    overtaken = true;
                    break;
                }
                let new = Self::pack(lap, value + sample);
                match cell.compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => break,
                    Err(actual) => current = actual,
                }
            }
        }

        self.write_position
            .fetch_max(start + writable as u64, Ordering::AcqRel);

        if overtaken {
            Err(Error::LateGrain {
                voice_index: self.voice_index,
                start_sample: start,
                read_position: self.read_position(),
            })
        } else if writable < samples.len() {
            Ok(RingWrite::Truncated {
                written: writable,
                dropped: samples.len() - writable,
            })
        } else {
            Ok(RingWrite::Complete)
        }
    }

    /// Consume `output.len()` samples from the read cursor, adding them to `output`.
    /// Must only be called by the single real-time reader.
    pub fn read_add(&self, output: &mut [f32]) {
        let capacity = self.cells.len() as u64;
        let read_position = self.read_position.load(Ordering::Relaxed);
        for (offset, out) in output.iter_mut().enumerate() {
            let position = read_position + offset as u64;
            let lap = Self::lap(position, capacity);
            let cell = &self.cells[(position % capacity) as usize];
            let (cell_lap, value) =
                Self::unpack(cell.swap(Self::pack(lap.wrapping_add(1), 0.0), Ordering::AcqRel));
            if cell_lap == lap {
                *out += value;
            }
        }
        self.read_position
            .store(read_position + output.len() as u64, Ordering::Release);
    }

    /// Consume `output.len()` samples from the read cursor into `output`. Unwritten samples read
    /// as silence. Must only be called by the single real-time reader.
    pub fn read(&self, output: &mut [f32]) {
        output.fill(0.0);
        self.read_add(output);
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn write_then_read() {
        let ring = VoiceRingBuffer::new(0, 16, 0);
        assert_eq!(ring.add(2, &[1.0, 2.0, 3.0]).unwrap(), RingWrite::Complete);
        assert_eq!(ring.write_position(), 5);

        let mut output = [9.0; 6];
        ring.read(&mut output);
        assert_eq!(output, [0.0, 0.0, 1.0, 2.0, 3.0, 0.0]);
        assert_eq!(ring.read_position(), 6);

        // consumed samples are gone
        let mut output = [9.0; 16];
        ring.read(&mut output);
        assert!(output.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn overlap_add() {
        let ring = VoiceRingBuffer::new(0, 64, 0);
        ring.add(10, &[1.0; 8]).unwrap();
        ring.add(10, &[1.0; 8]).unwrap();
        ring.add(14, &[0.5; 8]).unwrap();
        let mut output = [0.0; 24];
        ring.read(&mut output);
        assert_eq!(output[..10], [0.0; 10]);
        assert_eq!(output[10..14], [2.0; 4]);
        assert_eq!(output[14..18], [2.5; 4]);
        assert_eq!(output[18..22], [0.5; 4]);
        assert_eq!(output[22..], [0.0; 2]);
    }

    #[test]
    fn wraps_around_over_many_laps() {
        let ring = VoiceRingBuffer::new(0, 7, 0);
        let mut output = [0.0; 5];
        for lap in 0..100u64 {
            let start = lap * 5;
            ring.add(start + 1, &[lap as f32; 3]).unwrap();
            ring.read(&mut output);
            assert_eq!(output, [0.0, lap as f32, lap as f32, lap as f32, 0.0]);
        }
    }

    #[test]
    fn starts_at_clock_position() {
        let ring = VoiceRingBuffer::new(0, 10, 1234);
        assert_eq!(ring.read_position(), 1234);
        assert!(ring.add(1200, &[1.0]).is_err());
        assert_eq!(
            ring.add(1236, &[1.0; 10]).unwrap(),
            RingWrite::Truncated {
                written: 8,
                dropped: 2
            }
        );
        let mut output = [0.0; 12];
        ring.read(&mut output);
        assert_eq!(output[..2], [0.0; 2]);
        assert_eq!(output[2..10], [1.0; 8]);
        assert_eq!(output[10..], [0.0; 2]);
    }

    #[test]
    fn late_writes_are_rejected() {
        let ring = VoiceRingBuffer::new(3, 16, 0);
        let mut output = [0.0; 8];
        ring.read(&mut output);
        match ring.add(4, &[1.0; 4]) {
            Err(Error::LateGrain {
                voice_index,
                start_sample,
                read_position,
            }) => {
                assert_eq!(voice_index, 3);
                assert_eq!(start_sample, 4);
                assert_eq!(read_position, 8);
            }
            other => panic!("expected a late grain error, got {other:?}"),
        }
        // nothing got written
        ring.read(&mut output);
        assert_eq!(output, [0.0; 8]);
    }

    #[test]
    fn long_writes_are_truncated() {
        let ring = VoiceRingBuffer::new(0, 8, 0);
        assert_eq!(
            ring.add(4, &[1.0; 8]).unwrap(),
            RingWrite::Truncated {
                written: 4,
                dropped: 4
            }
        );
        assert_eq!(
            ring.add(100, &[1.0; 2]).unwrap(),
            RingWrite::Truncated {
                written: 0,
                dropped: 2
            }
        );
        let mut output = [0.0; 16];
        ring.read(&mut output);
        assert_eq!(output[..4], [0.0; 4]);
        assert_eq!(output[4..8], [1.0; 4]);
        assert_eq!(output[8..], [0.0; 8]);
    }

    #[test]
    fn concurrent_reader_sees_no_stale_samples() {
        const BLOCK: usize = 32;
        const BLOCKS: usize = 2000;
        let ring = Arc::new(VoiceRingBuffer::new(0, 256, 0));

        let writer = thread::spawn({
            let ring = Arc::clone(&ring);
            move || {
                // write single, non overlapping 1.0 grains at every 4th block, racing the reader
                let mut start = 0;
                while start < (BLOCK * BLOCKS) as u64 {
                    let read_position = ring.read_position();
                    if start < read_position {
                        start = read_position.next_multiple_of(4 * BLOCK as u64);
                        continue;
                    }
                    if start < read_position + 128 {
                        let _ = ring.add(start, &[1.0; BLOCK]);
                        start += 4 * BLOCK as u64;
                    }
                    thread::yield_now();
                }
            }
        });

        let mut output = [0.0; BLOCK];
        for _ in 0..BLOCKS {
            ring.read(&mut output);
            assert!(output.iter().all(|s| *s == 0.0 || *s == 1.0));
            thread::yield_now();
        }
        writer.join().unwrap();
    }
}
