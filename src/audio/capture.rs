//! # Audio Capture Pipeline
//!
//! Turns the microphone into a stream of fixed-size mono frames.
//!
//! Device callbacks deliver blocks of whatever size the driver picks. The
//! [`FrameSlicer`] accumulates them and emits exact `frame_size` frames, so every
//! `audio_data` event the remote sees has the same length for a whole session.
//!
//! Frames are pushed through a [`CaptureSink`] tagged with the session generation.
//! When the session stops, the sink is dropped together with the device stream; any
//! frame produced after that has nowhere to go and is discarded.

use crate::audio::payload::downmix;
use crate::audio::EventSink;
use crate::error::SessionError;

/// Settings fixed at capture start.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub frame_size: usize,
    /// `None` selects the system default input
    pub input_device: Option<String>,
}

/// One block of mono samples at the input device's native rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub sequence: u64,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

/// What the capture side reports back to the session.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// Device acquired and running
    Started { sample_rate: u32 },
    Frame(AudioFrame),
    /// Acquisition or stream failure, reported asynchronously
    Failed(SessionError),
}

/// Delivery handle for one capture period.
pub type CaptureSink = EventSink<CaptureEvent>;

/// Microphone capture contract.
///
/// `start` must return quickly: device acquisition that can block or fail late is
/// reported through the sink as [`CaptureEvent::Failed`].
pub trait AudioCapture: Send {
    fn start(&mut self, settings: &CaptureSettings, sink: CaptureSink) -> Result<(), SessionError>;

    /// Release the input device. Safe to call in any state, any number of times.
    fn stop(&mut self);

    fn is_active(&self) -> bool;
}

/// Accumulates interleaved device blocks into fixed-size mono frames.
#[derive(Debug)]
pub struct FrameSlicer {
    frame_size: usize,
    channels: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl FrameSlicer {
    pub fn new(frame_size: usize, channels: usize, sample_rate: u32) -> Self {
        Self {
            frame_size: frame_size.max(1),
            channels: channels.max(1),
            sample_rate,
            pending: Vec::with_capacity(frame_size * 2),
            next_sequence: 0,
        }
    }

    /// Feed one device block, get back every frame it completed.
    pub fn push(&mut self, interleaved: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend(downmix(interleaved, self.channels));

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let samples: Vec<f32> = self.pending.drain(..self.frame_size).collect();
            frames.push(AudioFrame {
                sequence: self.next_sequence,
                sample_rate: self.sample_rate,
                samples,
            });
            self.next_sequence += 1;
        }
        frames
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(feature = "backend-cpal")]
pub use cpal_capture::CpalCapture;

#[cfg(feature = "backend-cpal")]
mod cpal_capture {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::sync::mpsc as std_mpsc;
    use tracing::{debug, error, info};

    /// cpal streams are not `Send`, so each active period owns a dedicated thread
    /// that builds the stream, keeps it alive and drops it when told to stop.
    ///
    /// The thread is never joined: it may still be inside the driver's open call, and
    /// the session must not wait on that. A stop that arrives mid-open is seen as soon
    /// as the open returns, and the stream is dropped right away.
    #[derive(Default)]
    pub struct CpalCapture {
        stop_tx: Option<std_mpsc::Sender<()>>,
    }

    impl CpalCapture {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl AudioCapture for CpalCapture {
        fn start(&mut self, settings: &CaptureSettings, sink: CaptureSink) -> Result<(), SessionError> {
            self.stop();

            let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
            let settings = settings.clone();
            std::thread::Builder::new()
                .name("audio-capture".to_string())
                .spawn(move || run_capture(settings, sink, stop_rx))
                .map_err(|e| SessionError::device(format!("Failed to spawn capture thread: {}", e)))?;

            self.stop_tx = Some(stop_tx);
            Ok(())
        }

        fn stop(&mut self) {
            if let Some(stop_tx) = self.stop_tx.take() {
                let _ = stop_tx.send(());
                debug!("Audio capture stop requested");
            }
        }

        fn is_active(&self) -> bool {
            self.stop_tx.is_some()
        }
    }

    impl Drop for CpalCapture {
        fn drop(&mut self) {
            self.stop();
        }
    }

    fn run_capture(settings: CaptureSettings, sink: CaptureSink, stop_rx: std_mpsc::Receiver<()>) {
        let stream = match open_stream(&settings, sink.clone()) {
            Ok((stream, sample_rate)) => {
                sink.emit(CaptureEvent::Started { sample_rate });
                stream
            }
            Err(e) => {
                sink.emit(CaptureEvent::Failed(e));
                return;
            }
        };

        // Either an explicit stop or the capture handle being dropped ends the period
        let _ = stop_rx.recv();
        drop(stream);
    }

    fn open_stream(settings: &CaptureSettings, sink: CaptureSink) -> Result<(cpal::Stream, u32), SessionError> {
        let host = cpal::default_host();

        let device = match &settings.input_device {
            Some(name) => host
                .input_devices()
                .map_err(|e| SessionError::device(format!("Failed to enumerate input devices: {}", e)))?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or_else(|| SessionError::device(format!("Input device not found: {}", name)))?,
            None => host
                .default_input_device()
                .ok_or_else(|| SessionError::device("No default input device available"))?,
        };

        let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
        let default_config = device
            .default_input_config()
            .map_err(|e| SessionError::device(format!("Failed to get default input config: {}", e)))?;

        let sample_rate = default_config.sample_rate().0;
        let channels = default_config.channels();
        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(device = %dev_name, sample_rate, channels, frame_size = settings.frame_size, "Opening input device");

        let mut slicer = FrameSlicer::new(settings.frame_size, channels as usize, sample_rate);
        let error_sink = sink.clone();
        let on_error = move |err: cpal::StreamError| {
            error!("Audio input stream error: {}", err);
            error_sink.emit(CaptureEvent::Failed(SessionError::device(format!("Input stream error: {}", err))));
        };

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for frame in slicer.push(data) {
                        sink.emit(CaptureEvent::Frame(frame));
                    }
                },
                on_error,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let block: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                    for frame in slicer.push(&block) {
                        sink.emit(CaptureEvent::Frame(frame));
                    }
                },
                on_error,
                None,
            ),
            other => {
                return Err(SessionError::device(format!("Unsupported input sample format: {:?}", other)));
            }
        }
        .map_err(|e| SessionError::device(format!("Failed to build input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| SessionError::device(format!("Failed to start input stream: {}", e)))?;

        Ok((stream, sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_slicer_emits_exact_frames_across_blocks() {
        let mut slicer = FrameSlicer::new(4, 1, 16000);
        assert!(slicer.push(&[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(slicer.pending_len(), 3);

        let frames = slicer.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(frames[1].samples, vec![0.5, 0.6, 0.7, 0.8]);
        assert_eq!(frames[0].sequence, 0);
        assert_eq!(frames[1].sequence, 1);
        assert_eq!(frames[1].sample_rate, 16000);
        assert_eq!(slicer.pending_len(), 1);
    }

    #[test]
    fn test_slicer_downmixes_interleaved_input() {
        let mut slicer = FrameSlicer::new(2, 2, 48000);
        let frames = slicer.push(&[1.0, 0.0, 0.5, 0.5]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples, vec![0.5, 0.5]);
    }

    #[test]
    fn test_sink_tags_generation_and_reports_closed_receiver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = CaptureSink::new(7, tx);
        assert!(sink.emit(CaptureEvent::Started { sample_rate: 16000 }));

        let (generation, event) = rx.try_recv().unwrap();
        assert_eq!(generation, 7);
        assert!(matches!(event, CaptureEvent::Started { sample_rate: 16000 }));

        drop(rx);
        assert!(!sink.emit(CaptureEvent::Started { sample_rate: 16000 }));
    }
}
