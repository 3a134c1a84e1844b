//! Local input device session.
//!
//! The cpal stream is `!Send`, so the worker thread opens the capture, drains
//! the SPSC ring into the session buffer, and drops the capture on exit — all
//! on the same OS thread. `start` hands the open result back over a one-shot
//! channel so callers learn immediately whether the device came up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info};

use crate::audio::AudioCapture;
use crate::buffering::{create_capture_ring, CaptureConsumer, Consumer};
use crate::error::{ClapperError, Result};
use crate::session::{
    acquire_with_retry, AudioFormat, AudioSession, AudioSource, SessionAudio,
};

/// Samples drained from the capture ring per pass (20 ms at 48 kHz).
const DRAIN_CHUNK: usize = 960;
/// Sleep when the capture ring is empty.
const DRAIN_IDLE_SLEEP: Duration = Duration::from_millis(5);

pub struct DeviceSession {
    source_id: String,
    device_index: Option<usize>,
    audio: Arc<SessionAudio>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    started: bool,
}

impl DeviceSession {
    pub fn new(device_index: Option<usize>, window_secs: f64) -> Self {
        Self {
            source_id: AudioSource::Device {
                index: device_index,
            }
            .id(),
            device_index,
            audio: SessionAudio::new(window_secs),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            started: false,
        }
    }
}

impl AudioSession for DeviceSession {
    fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(ClapperError::AlreadyRunning);
        }
        self.started = true;

        let audio = Arc::clone(&self.audio);
        let running = Arc::clone(&self.running);
        let device_index = self.device_index;
        let (open_tx, open_rx) = mpsc::channel::<Result<u32>>();

        self.running.store(true, Ordering::SeqCst);
        let worker = std::thread::Builder::new()
            .name("clapper-device".into())
            .spawn(move || {
                let open = || -> Result<(AudioCapture, CaptureConsumer)> {
                    let (producer, consumer) = create_capture_ring();
                    let capture =
                        AudioCapture::open(producer, Arc::clone(&running), device_index)?;
                    Ok((capture, consumer))
                };
                let (capture, mut consumer) =
                    match acquire_with_retry("audio device open", open) {
                        Ok(opened) => {
                            let _ = open_tx.send(Ok(opened.0.sample_rate));
                            opened
                        }
                        Err(e) => {
                            let _ = open_tx.send(Err(e));
                            return;
                        }
                    };

                // Callback already downmixed to mono at the device rate.
                audio.configure(AudioFormat {
                    sample_rate: capture.sample_rate,
                    channels: 1,
                });

                let mut scratch = vec![0f32; DRAIN_CHUNK];
                while running.load(Ordering::Relaxed) {
                    let drained = consumer.pop_slice(&mut scratch);
                    if drained == 0 {
                        std::thread::sleep(DRAIN_IDLE_SLEEP);
                        continue;
                    }
                    audio.write(&scratch[..drained]);
                }

                capture.stop();
                // Dropped here, on its creation thread.
                drop(capture);
                info!("device session worker exiting");
            })?;
        self.worker = Some(worker);

        match open_rx.recv() {
            Ok(Ok(sample_rate)) => {
                info!(
                    source = self.source_id.as_str(),
                    sample_rate, "device session started"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                error!(source = self.source_id.as_str(), error = %e, "device open failed");
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(ClapperError::Other(anyhow::anyhow!(
                    "device worker died before reporting open status"
                )))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn audio(&self) -> Arc<SessionAudio> {
        Arc::clone(&self.audio)
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.stop();
    }
}
