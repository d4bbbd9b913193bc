use crate::audio::clip::{encode_wav, ClipError};
use crate::audio::AudioFormat;

/// Frames accumulated while listening. Only the capture session appends to it;
/// [`RecordingBuffer::freeze`] turns it into a read-only [`Recording`].
#[derive(Debug)]
pub struct RecordingBuffer {
    samples: Vec<f32>,
    frames: usize,
    format: AudioFormat,
}

impl RecordingBuffer {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            samples: Vec::new(),
            frames: 0,
            format,
        }
    }

    pub fn push_frame(&mut self, frame: &[f32]) {
        self.samples.extend_from_slice(frame);
        self.frames += 1;
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn freeze(self) -> Recording {
        Recording {
            samples: self.samples,
            sample_rate: self.format.sample_rate,
            channels: self.format.channels,
            frames: self.frames,
        }
    }
}

/// A finished capture. Moved into the relay by value.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    frames: usize,
}

impl Recording {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        let per_channel = self.samples.len() as u64 / self.channels.max(1) as u64;
        per_channel * 1000 / self.sample_rate.max(1) as u64
    }

    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, ClipError> {
        encode_wav(&self.samples, self.sample_rate, self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> AudioFormat {
        AudioFormat {
            sample_rate: 16000,
            channels: 1,
            frame_samples: 160,
        }
    }

    #[test]
    fn test_freeze_keeps_frames_in_order() {
        let mut buffer = RecordingBuffer::new(format());
        buffer.push_frame(&[0.1; 160]);
        buffer.push_frame(&[0.2; 160]);
        let recording = buffer.freeze();

        assert_eq!(recording.frames(), 2);
        assert_eq!(recording.samples().len(), 320);
        assert_eq!(recording.samples()[0], 0.1);
        assert_eq!(recording.samples()[319], 0.2);
        assert_eq!(recording.duration_ms(), 20);
    }

    #[test]
    fn test_empty_recording() {
        let recording = RecordingBuffer::new(format()).freeze();
        assert!(recording.is_empty());
        assert_eq!(recording.duration_ms(), 0);
    }

    #[test]
    fn test_wav_bytes_carry_format() {
        let mut buffer = RecordingBuffer::new(format());
        buffer.push_frame(&[0.0; 160]);
        let bytes = buffer.freeze().to_wav_bytes().unwrap();

        let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.len(), 160);
    }
}
