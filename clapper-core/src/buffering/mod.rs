//! Audio buffering between sources and the detection loop.
//!
//! Two buffers with different jobs:
//!
//! - [`CircularBuffer`] is the per-session windowing buffer. Sources write
//!   whatever arrives (datagrams, pipe chunks, callback blocks); the detection
//!   loop reads fixed-duration windows out of it on its own schedule. Writes
//!   drop the oldest audio on overflow and reads never consume.
//! - The `ringbuf` SPSC pair carries raw samples out of the real-time capture
//!   callback, which must not take locks. A mover thread drains it into the
//!   session's `CircularBuffer`.

pub mod ring;
pub mod window;

use ringbuf::{traits::Split, HeapRb};

pub use ring::CircularBuffer;
pub use ringbuf::traits::{Consumer, Producer};
pub use window::AudioWindow;

/// Type alias for the producer half — held by the audio callback thread.
pub type CaptureProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half — held by the device session's mover thread.
pub type CaptureConsumer = ringbuf::HeapCons<f32>;

/// Capture ring capacity: 2^18 = 262 144 f32 samples ≈ 5.5 s at 48 kHz,
/// far more callback jitter than one inference interval can accumulate.
pub const CAPTURE_RING_CAPACITY: usize = 1 << 18;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
///
/// # Panics
/// Never panics — `HeapRb` construction cannot fail for reasonable capacities.
pub fn create_capture_ring() -> (CaptureProducer, CaptureConsumer) {
    HeapRb::<f32>::new(CAPTURE_RING_CAPACITY).split()
}
