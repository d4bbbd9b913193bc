use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::time::Duration;

use super::{AudioFormat, DeviceError, Frame, InputStream};

/// Callback chunks buffered between the cpal thread and the reader.
const CHUNK_QUEUE: usize = 64;

/// Microphone stream that re-blocks cpal callback chunks into fixed frames.
pub struct CpalInput {
    name: String,
    _stream: Stream,
    chunks: Receiver<Vec<f32>>,
    errors: Receiver<String>,
    pending: Vec<f32>,
    frame_len: usize,
    frame_timeout: Duration,
}

impl CpalInput {
    pub fn open(
        device: &Device,
        name: &str,
        format: &AudioFormat,
        frame_timeout: Duration,
    ) -> Result<Self, DeviceError> {
        let open_failed = |reason: String| DeviceError::OpenFailed {
            device: name.to_string(),
            reason,
        };

        tracing::info!(
            "Configuring input '{}': {}Hz, {} channel(s)",
            name,
            format.sample_rate,
            format.channels
        );

        let supported_configs = device
            .supported_input_configs()
            .map_err(|e| open_failed(e.to_string()))?;
        let mut config: Option<(StreamConfig, SampleFormat)> = None;

        for supported in supported_configs {
            tracing::debug!("Supported config: {:?}", supported);
            if supported.channels() == format.channels
                && supported.min_sample_rate().0 <= format.sample_rate
                && supported.max_sample_rate().0 >= format.sample_rate
            {
                let sample_format = supported.sample_format();
                config = Some((
                    supported
                        .with_sample_rate(cpal::SampleRate(format.sample_rate))
                        .into(),
                    sample_format,
                ));
                break;
            }
        }

        let (stream_config, sample_format) =
            config.ok_or_else(|| open_failed("no suitable audio configuration".to_string()))?;

        let (chunk_tx, chunks) = mpsc::sync_channel::<Vec<f32>>(CHUNK_QUEUE);
        let (error_tx, errors) = mpsc::sync_channel::<String>(1);

        let error_callback = move |err: cpal::StreamError| {
            tracing::error!("Audio stream error: {}", err);
            let _ = error_tx.try_send(err.to_string());
        };

        let stream = match sample_format {
            SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &_| forward(&chunk_tx, data.to_vec()),
                error_callback,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &_| {
                    forward(
                        &chunk_tx,
                        data.iter().map(|&s| s as f32 / i16::MAX as f32).collect(),
                    )
                },
                error_callback,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                &stream_config,
                move |data: &[u16], _: &_| {
                    forward(
                        &chunk_tx,
                        data.iter().map(|&s| (s as f32 - 32768.0) / 32768.0).collect(),
                    )
                },
                error_callback,
                None,
            ),
            other => {
                return Err(open_failed(format!("unsupported sample format {:?}", other)));
            }
        }
        .map_err(|e| open_failed(e.to_string()))?;

        stream.play().map_err(|e| open_failed(e.to_string()))?;

        tracing::info!("Audio capture started on '{}'", name);
        Ok(Self {
            name: name.to_string(),
            _stream: stream,
            chunks,
            errors,
            pending: Vec::new(),
            frame_len: format.frame_len(),
            frame_timeout,
        })
    }
}

fn forward(chunk_tx: &SyncSender<Vec<f32>>, chunk: Vec<f32>) {
    if chunk_tx.try_send(chunk).is_err() {
        tracing::debug!("Capture queue full, dropping audio chunk");
    }
}

impl InputStream for CpalInput {
    fn read_frame(&mut self) -> Result<Frame, DeviceError> {
        while self.pending.len() < self.frame_len {
            match self.errors.try_recv() {
                Ok(reason) => {
                    return Err(DeviceError::Stream {
                        device: self.name.clone(),
                        reason,
                    })
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }

            match self.chunks.recv_timeout(self.frame_timeout) {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(DeviceError::Stalled {
                        device: self.name.clone(),
                        timeout_ms: self.frame_timeout.as_millis() as u64,
                    })
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DeviceError::Stream {
                        device: self.name.clone(),
                        reason: "stream closed".to_string(),
                    })
                }
            }
        }

        let rest = self.pending.split_off(self.frame_len);
        Ok(std::mem::replace(&mut self.pending, rest))
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        tracing::info!("Audio capture stopped on '{}'", self.name);
    }
}

// cpal streams are not Send on every host; the stream is only touched from
// the thread that owns the handle.
unsafe impl Send for CpalInput {}
