//! Drop-oldest circular buffer over interleaved audio frames.

/// Fixed-capacity ring holding the most recent `capacity` frames.
///
/// A frame is one sample per channel, interleaved. Writes never block or
/// fail: once the ring is full the oldest frames are overwritten. Reads
/// return the newest frames without consuming them, so two reads with no
/// intervening write see identical audio.
#[derive(Debug, Clone)]
pub struct CircularBuffer {
    storage: Vec<f32>,
    capacity: usize,
    channels: usize,
    /// Frame index of the next write.
    write_pos: usize,
    /// Frames currently valid.
    filled: usize,
}

impl CircularBuffer {
    /// # Panics
    /// Panics if `capacity` or `channels` is zero.
    pub fn new(capacity: usize, channels: usize) -> Self {
        assert!(capacity > 0, "capacity must be non-zero");
        assert!(channels > 0, "channels must be non-zero");
        Self {
            storage: vec![0.0; capacity * channels],
            capacity,
            channels,
            write_pos: 0,
            filled: 0,
        }
    }

    /// Capacity in frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames currently held.
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Append interleaved samples, overwriting the oldest frames when full.
    ///
    /// A trailing partial frame (fewer samples than `channels`) is dropped.
    pub fn write(&mut self, samples: &[f32]) {
        let ch = self.channels;
        let frames = samples.len() / ch;
        if frames == 0 {
            return;
        }

        if frames >= self.capacity {
            // One oversized write replaces the whole ring; only the tail
            // survives, which is what overwrite-oldest degenerates to.
            let tail = &samples[(frames - self.capacity) * ch..frames * ch];
            self.storage.copy_from_slice(tail);
            self.write_pos = 0;
            self.filled = self.capacity;
            return;
        }

        let first = (self.capacity - self.write_pos).min(frames);
        self.storage[self.write_pos * ch..(self.write_pos + first) * ch]
            .copy_from_slice(&samples[..first * ch]);
        let rest = frames - first;
        if rest > 0 {
            self.storage[..rest * ch].copy_from_slice(&samples[first * ch..frames * ch]);
        }

        self.write_pos = (self.write_pos + frames) % self.capacity;
        self.filled = (self.filled + frames).min(self.capacity);
    }

    /// The most recent `frames` frames, oldest first, zero-padded on the
    /// left when fewer frames have been written so far.
    ///
    /// Non-consuming: repeated reads without writes return the same data.
    pub fn read(&self, frames: usize) -> Vec<f32> {
        let ch = self.channels;
        let mut out = vec![0.0; frames * ch];
        let take = frames.min(self.filled);
        if take == 0 {
            return out;
        }

        let dest_start = (frames - take) * ch;
        let start = (self.write_pos + self.capacity - take) % self.capacity;
        let first = (self.capacity - start).min(take);
        out[dest_start..dest_start + first * ch]
            .copy_from_slice(&self.storage[start * ch..(start + first) * ch]);
        let rest = take - first;
        if rest > 0 {
            out[dest_start + first * ch..].copy_from_slice(&self.storage[..rest * ch]);
        }
        out
    }

    /// Fill fraction in [0.0, 1.0].
    pub fn level(&self) -> f32 {
        self.filled as f32 / self.capacity as f32
    }

    /// Forget all contents. Storage is retained, so no reallocation.
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.filled = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn random_samples(n: usize) -> Vec<f32> {
        let mut rng = rand::thread_rng();
        (0..n).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
    }

    #[test]
    fn partial_write_reads_back_exactly() {
        let mut buf = CircularBuffer::new(1000, 2);
        let data = random_samples(200); // 100 stereo frames
        buf.write(&data);
        assert_eq!(buf.filled(), 100);
        assert_eq!(buf.read(100), data);
    }

    #[test]
    fn short_fill_is_left_padded_with_zeros() {
        let mut buf = CircularBuffer::new(1000, 1);
        let data = random_samples(100);
        buf.write(&data);
        let out = buf.read(200);
        assert_eq!(out.len(), 200);
        assert!(out[..100].iter().all(|&s| s == 0.0));
        assert_eq!(&out[100..], &data[..]);
    }

    #[test]
    fn read_is_idempotent() {
        let mut buf = CircularBuffer::new(64, 1);
        buf.write(&random_samples(40));
        assert_eq!(buf.read(64), buf.read(64));
    }

    #[test]
    fn oversized_write_keeps_only_the_tail() {
        let mut buf = CircularBuffer::new(1000, 1);
        let data: Vec<f32> = (0..1500).map(|i| i as f32).collect();
        buf.write(&data);
        assert_eq!(buf.filled(), 1000);
        assert_eq!(buf.read(1000), &data[500..]);
    }

    #[test]
    fn wrapped_writes_read_back_in_order() {
        let mut buf = CircularBuffer::new(1000, 1);
        let a: Vec<f32> = (0..600).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..700).map(|i| (1000 + i) as f32).collect();
        buf.write(&a);
        buf.write(&b);

        let mut expected = a.clone();
        expected.extend_from_slice(&b);
        let tail = &expected[expected.len() - 1000..];
        assert_eq!(buf.read(1000), tail);
    }

    #[test]
    fn chunked_writes_match_one_big_write() {
        // Write granularity must not be observable through read().
        let data = random_samples(2400); // 1200 stereo frames into a 1000-frame ring
        let mut whole = CircularBuffer::new(1000, 2);
        whole.write(&data);

        let mut chunked = CircularBuffer::new(1000, 2);
        let mut offset = 0;
        let mut rng = rand::thread_rng();
        while offset < data.len() {
            let frames = rng.gen_range(1..=97);
            let end = (offset + frames * 2).min(data.len());
            chunked.write(&data[offset..end]);
            offset = end;
        }

        assert_eq!(chunked.read(1000), whole.read(1000));
    }

    #[test]
    fn stereo_frames_stay_interleaved_across_wrap() {
        let mut buf = CircularBuffer::new(4, 2);
        buf.write(&[1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
        buf.write(&[4.0, -4.0, 5.0, -5.0]);
        assert_eq!(
            buf.read(4),
            vec![2.0, -2.0, 3.0, -3.0, 4.0, -4.0, 5.0, -5.0]
        );
    }

    #[test]
    fn trailing_partial_frame_is_dropped() {
        let mut buf = CircularBuffer::new(8, 2);
        buf.write(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(buf.filled(), 2);
        assert_eq!(buf.read(2), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn level_tracks_fill_fraction() {
        let mut buf = CircularBuffer::new(200, 1);
        assert_eq!(buf.level(), 0.0);
        buf.write(&vec![0.5; 100]);
        assert!((buf.level() - 0.5).abs() < 1e-6);
        buf.write(&vec![0.5; 300]);
        assert_eq!(buf.level(), 1.0);
    }

    #[test]
    fn clear_then_read_is_silence() {
        let mut buf = CircularBuffer::new(100, 1);
        buf.write(&random_samples(100));
        buf.clear();
        assert_eq!(buf.filled(), 0);
        assert_eq!(buf.level(), 0.0);
        assert!(buf.read(100).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn empty_write_is_a_noop() {
        let mut buf = CircularBuffer::new(10, 1);
        buf.write(&[]);
        assert_eq!(buf.filled(), 0);
    }
}
