use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClipError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("MP3 decode error: {0}")]
    Mp3(String),

    #[error("Audio clip contains no samples")]
    Empty,

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
}

/// Decoded audio ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        let per_channel = self.samples.len() as u64 / self.channels.max(1) as u64;
        per_channel * 1000 / self.sample_rate.max(1) as u64
    }

    /// Mono sine tone with a short fade in and out to avoid clicks.
    pub fn tone(frequency_hz: f32, duration_ms: u64, sample_rate: u32) -> Self {
        let len = (duration_ms * sample_rate as u64 / 1000) as usize;
        let fade = (sample_rate as usize / 100).min(len / 2).max(1);
        let samples = (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                let envelope = (i.min(len - 1 - i) as f32 / fade as f32).min(1.0);
                0.4 * envelope * (2.0 * std::f32::consts::PI * frequency_hz * t).sin()
            })
            .collect();
        Self::new(samples, sample_rate, 1)
    }

    /// Picks a decoder from the mime type, sniffing the header when the
    /// mime type is not specific.
    pub fn decode(mime: &str, bytes: &[u8]) -> Result<Self, ClipError> {
        match mime {
            "audio/wav" | "audio/x-wav" | "audio/wave" => Self::from_wav_bytes(bytes),
            "audio/mpeg" | "audio/mp3" => Self::from_mp3_bytes(bytes),
            _ if bytes.starts_with(b"RIFF") => Self::from_wav_bytes(bytes),
            _ if bytes.starts_with(b"ID3") || bytes.first() == Some(&0xFF) => {
                Self::from_mp3_bytes(bytes)
            }
            other => Err(ClipError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self, ClipError> {
        Self::read_wav(hound::WavReader::new(Cursor::new(bytes))?)
    }

    pub fn load_wav(path: &Path) -> Result<Self, ClipError> {
        Self::read_wav(hound::WavReader::open(path)?)
    }

    fn read_wav<R: std::io::Read>(mut reader: hound::WavReader<R>) -> Result<Self, ClipError> {
        let spec = reader.spec();
        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        if samples.is_empty() {
            return Err(ClipError::Empty);
        }
        Ok(Self::new(samples, spec.sample_rate, spec.channels))
    }

    pub fn from_mp3_bytes(bytes: &[u8]) -> Result<Self, ClipError> {
        let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
        let mut samples = Vec::new();
        let mut format = None;

        loop {
            match decoder.next_frame() {
                Ok(frame) => {
                    format.get_or_insert((frame.sample_rate as u32, frame.channels as u16));
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
                Err(minimp3::Error::Eof) => break,
                Err(e) => return Err(ClipError::Mp3(e.to_string())),
            }
        }

        match format {
            Some((sample_rate, channels)) if !samples.is_empty() => {
                Ok(Self::new(samples, sample_rate, channels))
            }
            _ => Err(ClipError::Empty),
        }
    }

    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, ClipError> {
        encode_wav(&self.samples, self.sample_rate, self.channels)
    }
}

/// Encodes samples as 16-bit PCM WAV.
pub fn encode_wav(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>, ClipError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(sample_i16)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_encode_decode_preserves_format() {
        let clip = AudioClip::new(vec![0.0, 0.5, -0.5, 0.25], 24000, 2);
        let bytes = clip.to_wav_bytes().unwrap();
        assert!(bytes.starts_with(b"RIFF"));

        let decoded = AudioClip::decode("audio/wav", &bytes).unwrap();
        assert_eq!(decoded.sample_rate(), 24000);
        assert_eq!(decoded.channels(), 2);
        assert_eq!(decoded.samples().len(), 4);
        assert!((decoded.samples()[1] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_decode_sniffs_riff_header() {
        let bytes = AudioClip::tone(440.0, 20, 16000).to_wav_bytes().unwrap();
        let decoded = AudioClip::decode("application/octet-stream", &bytes).unwrap();
        assert_eq!(decoded.sample_rate(), 16000);
    }

    #[test]
    fn test_decode_rejects_unknown_payload() {
        let err = AudioClip::decode("audio/ogg", b"OggS....").unwrap_err();
        assert!(matches!(err, ClipError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_decode_rejects_truncated_wav() {
        assert!(AudioClip::decode("audio/wav", b"RIFF\x00\x00").is_err());
    }

    #[test]
    fn test_empty_wav_is_an_error() {
        let bytes = encode_wav(&[], 16000, 1).unwrap();
        assert!(matches!(
            AudioClip::from_wav_bytes(&bytes),
            Err(ClipError::Empty)
        ));
    }

    #[test]
    fn test_tone_duration_and_level() {
        let tone = AudioClip::tone(880.0, 250, 16000);
        assert_eq!(tone.duration_ms(), 250);
        assert_eq!(tone.channels(), 1);
        assert!(tone.samples().iter().all(|s| s.abs() <= 0.4));
        assert_eq!(tone.samples()[0], 0.0);
    }

    #[test]
    fn test_load_wav_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beep.wav");
        std::fs::write(&path, AudioClip::tone(660.0, 100, 16000).to_wav_bytes().unwrap())
            .unwrap();

        let clip = AudioClip::load_wav(&path).unwrap();
        assert_eq!(clip.duration_ms(), 100);
    }
}
