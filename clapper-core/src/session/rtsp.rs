//! RTSP session: external media pipeline feeding fixed-size PCM chunks.
//!
//! Audio is pulled out of the RTSP stream by an ffmpeg child process that
//! transcodes to raw mono f32 on its stdout. The session only ever sees a
//! [`ChunkSource`], so tests swap the child for an in-memory feed and the
//! consume loop stays identical.

use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::error::{ClapperError, Result};
use crate::session::{
    acquire_with_retry, AudioFormat, AudioSession, AudioSource, SessionAudio,
};

/// Rate ffmpeg is asked to emit; the scorer's native rate, so RTSP windows
/// usually skip resampling entirely.
pub const RTSP_SAMPLE_RATE: u32 = 16_000;
/// Frames per chunk pulled from the media pipe (256 ms at 16 kHz).
pub const CHUNK_FRAMES: usize = 4096;

/// Source of mono f32 chunks from the media pipeline.
///
/// `Ok(None)` is end of stream. An empty chunk is a valid "nothing right
/// now" answer that lets the consume loop re-check its shutdown flag, so
/// implementations must never block unboundedly.
pub trait ChunkSource: Send + 'static {
    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>>;
}

/// Reads little-endian f32 frames off any byte stream, in practice the
/// ffmpeg child's stdout.
pub struct ReaderChunkSource<R: Read> {
    reader: R,
    byte_buf: Vec<u8>,
}

impl<R: Read> ReaderChunkSource<R> {
    pub fn new(reader: R, chunk_frames: usize) -> Self {
        Self {
            reader,
            byte_buf: vec![0u8; chunk_frames * 4],
        }
    }
}

impl<R: Read + Send + 'static> ChunkSource for ReaderChunkSource<R> {
    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        match self.reader.read_exact(&mut self.byte_buf) {
            Ok(()) => Ok(Some(
                self.byte_buf
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            )),
            // A short tail at stream end is discarded with the stream.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Chunk source fed from a crossbeam channel; used by tests and by hosts
/// that already demux their own media.
pub struct ChannelChunkSource {
    rx: crossbeam_channel::Receiver<Vec<f32>>,
}

impl ChannelChunkSource {
    pub fn new(rx: crossbeam_channel::Receiver<Vec<f32>>) -> Self {
        Self { rx }
    }
}

impl ChunkSource for ChannelChunkSource {
    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        match self.rx.recv_timeout(Duration::from_millis(100)) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Ok(Some(Vec::new())),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}

pub struct RtspSession {
    source_id: String,
    url: Option<String>,
    audio: Arc<SessionAudio>,
    running: Arc<AtomicBool>,
    child: Arc<Mutex<Option<Child>>>,
    worker: Option<JoinHandle<()>>,
    injected: Option<Box<dyn ChunkSource>>,
    started: bool,
}

impl RtspSession {
    pub fn new(url: String, window_secs: f64) -> Self {
        let source_id = AudioSource::Rtsp { url: url.clone() }.id();
        Self {
            source_id,
            url: Some(url),
            audio: SessionAudio::new(window_secs),
            running: Arc::new(AtomicBool::new(false)),
            child: Arc::new(Mutex::new(None)),
            worker: None,
            injected: None,
            started: false,
        }
    }

    /// Session over an arbitrary chunk source instead of an ffmpeg child.
    pub fn with_source(label: &str, source: Box<dyn ChunkSource>, window_secs: f64) -> Self {
        Self {
            source_id: format!("rtsp-{label}"),
            url: None,
            audio: SessionAudio::new(window_secs),
            running: Arc::new(AtomicBool::new(false)),
            child: Arc::new(Mutex::new(None)),
            worker: None,
            injected: Some(source),
            started: false,
        }
    }
}

/// Spawn the transcoding child for `url`: video discarded, audio as raw
/// mono f32 at [`RTSP_SAMPLE_RATE`] on stdout.
fn spawn_ffmpeg(url: &str) -> Result<(Child, ReaderChunkSource<ChildStdout>)> {
    let rate = RTSP_SAMPLE_RATE.to_string();
    let mut child = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error"])
        .args(["-rtsp_transport", "tcp"])
        .args(["-i", url])
        .arg("-vn")
        .args(["-acodec", "pcm_f32le"])
        .args(["-ac", "1"])
        .args(["-ar", &rate])
        .args(["-f", "f32le"])
        .arg("pipe:1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ClapperError::Pipeline(format!("ffmpeg spawn: {e}")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ClapperError::Pipeline("ffmpeg stdout unavailable".into()))?;
    Ok((child, ReaderChunkSource::new(stdout, CHUNK_FRAMES)))
}

fn consume_loop(
    mut source: Box<dyn ChunkSource>,
    audio: Arc<SessionAudio>,
    running: Arc<AtomicBool>,
    source_id: String,
) {
    while running.load(Ordering::Relaxed) {
        match source.next_chunk() {
            Ok(Some(chunk)) => {
                if !chunk.is_empty() {
                    audio.write(&chunk);
                }
            }
            Ok(None) => {
                info!(source = source_id.as_str(), "media stream ended");
                break;
            }
            Err(e) => {
                error!(source = source_id.as_str(), error = %e, "media read failed");
                break;
            }
        }
    }
    info!(source = source_id.as_str(), "rtsp session worker exiting");
}

impl AudioSession for RtspSession {
    fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(ClapperError::AlreadyRunning);
        }
        self.started = true;

        let source: Box<dyn ChunkSource> = match self.injected.take() {
            Some(injected) => injected,
            None => {
                let url = self
                    .url
                    .clone()
                    .ok_or_else(|| ClapperError::Pipeline("no media source".into()))?;
                let (child, reader) = acquire_with_retry("ffmpeg spawn", || spawn_ffmpeg(&url))?;
                *self.child.lock() = Some(child);
                Box::new(reader)
            }
        };

        self.audio.configure(AudioFormat {
            sample_rate: RTSP_SAMPLE_RATE,
            channels: 1,
        });

        self.running.store(true, Ordering::SeqCst);
        let audio = Arc::clone(&self.audio);
        let running = Arc::clone(&self.running);
        let source_id = self.source_id.clone();
        let worker = std::thread::Builder::new()
            .name("clapper-rtsp".into())
            .spawn(move || consume_loop(source, audio, running, source_id))?;
        self.worker = Some(worker);

        info!(source = self.source_id.as_str(), "rtsp session started");
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Killing the child first unblocks a worker stuck reading its stdout.
        if let Some(child) = self.child.lock().as_mut() {
            if let Err(e) = child.kill() {
                warn!(error = %e, "failed to kill media child");
            }
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Some(mut child) = self.child.lock().take() {
            let _ = child.wait();
        }
    }

    fn audio(&self) -> Arc<SessionAudio> {
        Arc::clone(&self.audio)
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

impl Drop for RtspSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Instant;

    #[test]
    fn reader_chunk_source_decodes_frames() {
        let mut bytes = Vec::new();
        for v in [0.5f32, -0.25, 1.0, 0.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let mut source = ReaderChunkSource::new(Cursor::new(bytes), 2);
        assert_eq!(source.next_chunk().unwrap(), Some(vec![0.5, -0.25]));
        assert_eq!(source.next_chunk().unwrap(), Some(vec![1.0, 0.0]));
        assert_eq!(source.next_chunk().unwrap(), None);
    }

    #[test]
    fn reader_chunk_source_drops_short_tail() {
        let mut bytes = Vec::new();
        for v in [0.5f32, -0.25] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.push(0x7f); // partial frame
        let mut source = ReaderChunkSource::new(Cursor::new(bytes), 2);
        assert_eq!(source.next_chunk().unwrap(), Some(vec![0.5, -0.25]));
        assert_eq!(source.next_chunk().unwrap(), None);
    }

    #[test]
    fn channel_source_feeds_the_session_buffer() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut session = RtspSession::with_source(
            "test",
            Box::new(ChannelChunkSource::new(rx)),
            1.0,
        );
        session.start().unwrap();
        assert_eq!(session.audio().format().unwrap().sample_rate, RTSP_SAMPLE_RATE);

        tx.send(vec![0.5f32; 4_000]).unwrap();
        let audio = session.audio();
        let deadline = Instant::now() + Duration::from_secs(2);
        while audio.level() == 0.0 {
            assert!(Instant::now() < deadline, "chunk never reached the buffer");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!((audio.level() - 0.25).abs() < 1e-6);
        session.stop();
    }

    #[test]
    fn disconnect_ends_the_worker() {
        let (tx, rx) = crossbeam_channel::unbounded::<Vec<f32>>();
        let mut session = RtspSession::with_source(
            "test",
            Box::new(ChannelChunkSource::new(rx)),
            1.0,
        );
        session.start().unwrap();
        drop(tx);
        // Worker sees Ok(None) and exits on its own; stop still joins fine.
        std::thread::sleep(Duration::from_millis(150));
        session.stop();
    }

    #[test]
    fn double_start_is_rejected() {
        let (_tx, rx) = crossbeam_channel::unbounded();
        let mut session = RtspSession::with_source(
            "test",
            Box::new(ChannelChunkSource::new(rx)),
            1.0,
        );
        session.start().unwrap();
        assert!(matches!(
            session.start(),
            Err(ClapperError::AlreadyRunning)
        ));
        session.stop();
    }

    #[test]
    fn stop_without_start_is_safe() {
        let mut session = RtspSession::new("rtsp://cam.local/s1".to_string(), 1.0);
        session.stop();
        assert_eq!(session.source_id(), "rtsp-rtsp://cam.local/s1");
    }
}
