//! # Audio Playback Pipeline
//!
//! Decodes inbound payloads and plays them through the output device.
//!
//! Segments are played back to back through one [`PlaybackQueue`]: a new segment
//! never interrupts or overlaps the one in flight, it is appended after it. The
//! device callback drains the queue and pads with silence when it runs dry.
//!
//! The output device opens in the background. Segments that arrive before the device
//! reports its rate are held in order and released, resampled, once it does.

use crate::audio::payload::{self, DecodedAudio, InboundAudioPayload};
use crate::audio::EventSink;
use crate::error::SessionError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSettings {
    pub fallback_sample_rate: u32,
    /// `None` selects the system default output
    pub output_device: Option<String>,
}

/// What the playback side reports back to the session.
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    /// Output device open and pulling samples
    Ready { sample_rate: u32 },
    /// Open or stream failure, reported asynchronously
    Failed(SessionError),
}

/// Delivery handle for one playback period.
pub type PlaybackSink = EventSink<PlaybackEvent>;

/// Speaker playback contract.
pub trait AudioPlayback: Send {
    /// Decode and queue one segment. Errors are decode errors; the segment is dropped
    /// and playback of earlier segments continues. Never waits on the device.
    fn render(&mut self, payload: &InboundAudioPayload) -> Result<(), SessionError>;

    /// Stop whatever is playing and release the output device.
    fn reset(&mut self);
}

#[derive(Debug, Default)]
struct QueueState {
    device_rate: Option<u32>,
    /// Segments received before the device rate was known
    held: Vec<DecodedAudio>,
    samples: VecDeque<f32>,
}

/// Sequential sample queue shared between the session and the output callback.
#[derive(Debug, Clone, Default)]
pub struct PlaybackQueue {
    state: Arc<Mutex<QueueState>>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a decoded segment. Returns how many device-rate samples became playable,
    /// which is zero while the device rate is still unknown.
    pub fn enqueue(&self, audio: &DecodedAudio) -> usize {
        let mut state = self.lock();
        match state.device_rate {
            Some(rate) => {
                let resampled = payload::resample_linear(&audio.samples, audio.sample_rate, rate);
                let count = resampled.len();
                state.samples.extend(resampled);
                count
            }
            None => {
                state.held.push(audio.clone());
                0
            }
        }
    }

    /// Record the device rate and release held segments in arrival order.
    pub fn set_device_rate(&self, rate: u32) -> usize {
        let mut state = self.lock();
        state.device_rate = Some(rate);
        let held = std::mem::take(&mut state.held);
        let mut released = 0;
        for audio in held {
            let resampled = payload::resample_linear(&audio.samples, audio.sample_rate, rate);
            released += resampled.len();
            state.samples.extend(resampled);
        }
        released
    }

    /// Fill an interleaved output buffer, copying each mono sample to every channel.
    /// Returns how many frames carried real audio.
    pub fn fill(&self, out: &mut [f32], channels: usize) -> usize {
        let channels = channels.max(1);
        let mut state = self.lock();
        let mut played = 0;
        for frame in out.chunks_mut(channels) {
            let sample = match state.samples.pop_front() {
                Some(s) => {
                    played += 1;
                    s
                }
                None => 0.0,
            };
            frame.iter_mut().for_each(|slot| *slot = sample);
        }
        played
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.held.clear();
        state.samples.clear();
    }

    /// Playable samples plus samples still held for the device.
    pub fn len(&self) -> usize {
        let state = self.lock();
        state.samples.len() + state.held.iter().map(|a| a.samples.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(feature = "backend-cpal")]
pub use cpal_playback::CpalPlayback;

#[cfg(feature = "backend-cpal")]
mod cpal_playback {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::sync::mpsc as std_mpsc;
    use tracing::{debug, error, info};

    /// Output stream owned by a dedicated thread, like capture.
    ///
    /// `start` spawns the thread and returns. The thread opens the device, hands the
    /// rate to the queue and reports [`PlaybackEvent::Ready`], or reports
    /// [`PlaybackEvent::Failed`].
    pub struct CpalPlayback {
        settings: PlaybackSettings,
        queue: PlaybackQueue,
        stop_tx: Option<std_mpsc::Sender<()>>,
    }

    impl CpalPlayback {
        pub fn start(settings: PlaybackSettings, sink: PlaybackSink) -> Result<Self, SessionError> {
            let queue = PlaybackQueue::new();
            let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
            let device_name = settings.output_device.clone();
            let worker_queue = queue.clone();

            std::thread::Builder::new()
                .name("audio-playback".to_string())
                .spawn(move || run_playback(device_name, worker_queue, sink, stop_rx))
                .map_err(|e| SessionError::device(format!("Failed to spawn playback thread: {}", e)))?;

            Ok(Self {
                settings,
                queue,
                stop_tx: Some(stop_tx),
            })
        }
    }

    impl AudioPlayback for CpalPlayback {
        fn render(&mut self, payload: &InboundAudioPayload) -> Result<(), SessionError> {
            let decoded = payload::decode(payload, self.settings.fallback_sample_rate)?;
            let playable = self.queue.enqueue(&decoded);
            debug!(shape = payload.shape(), duration_ms = decoded.duration_ms(), playable, "Queued audio segment");
            Ok(())
        }

        fn reset(&mut self) {
            self.queue.clear();
            if let Some(stop_tx) = self.stop_tx.take() {
                let _ = stop_tx.send(());
                debug!("Output device release requested");
            }
        }
    }

    impl Drop for CpalPlayback {
        fn drop(&mut self) {
            self.reset();
        }
    }

    fn run_playback(
        device_name: Option<String>,
        queue: PlaybackQueue,
        sink: PlaybackSink,
        stop_rx: std_mpsc::Receiver<()>,
    ) {
        let stream = match open_stream(device_name.as_deref(), queue.clone(), sink.clone()) {
            Ok((stream, sample_rate)) => {
                let released = queue.set_device_rate(sample_rate);
                info!(sample_rate, released, "Output device opened");
                sink.emit(PlaybackEvent::Ready { sample_rate });
                stream
            }
            Err(e) => {
                sink.emit(PlaybackEvent::Failed(e));
                return;
            }
        };

        let _ = stop_rx.recv();
        drop(stream);
    }

    fn open_stream(
        device_name: Option<&str>,
        queue: PlaybackQueue,
        sink: PlaybackSink,
    ) -> Result<(cpal::Stream, u32), SessionError> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| SessionError::device(format!("Failed to enumerate output devices: {}", e)))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| SessionError::device(format!("Output device not found: {}", name)))?,
            None => host
                .default_output_device()
                .ok_or_else(|| SessionError::device("No default output device available"))?,
        };

        let default_config = device
            .default_output_config()
            .map_err(|e| SessionError::device(format!("Failed to get default output config: {}", e)))?;
        if default_config.sample_format() != cpal::SampleFormat::F32 {
            return Err(SessionError::device(format!(
                "Unsupported output sample format: {:?}",
                default_config.sample_format()
            )));
        }

        let device_rate = default_config.sample_rate().0;
        let channels = default_config.channels() as usize;
        let stream_config: cpal::StreamConfig = default_config.into();

        let stream = device
            .build_output_stream(
                &stream_config,
                move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    queue.fill(out, channels);
                },
                move |err| {
                    error!("Audio output stream error: {}", err);
                    sink.emit(PlaybackEvent::Failed(SessionError::device(format!("Output stream error: {}", err))));
                },
                None,
            )
            .map_err(|e| SessionError::device(format!("Failed to build output stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| SessionError::device(format!("Failed to start output stream: {}", e)))?;

        Ok((stream, device_rate))
    }
}
