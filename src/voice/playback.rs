//! Audio assets and playback
//!
//! Synthesized speech arrives as a self-contained data URI. [`Playback`]
//! keeps at most one asset playing: starting a new one interrupts the
//! previous one.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::task::JoinHandle;

use crate::{Error, Result};

/// Encoded audio with its MIME type
#[derive(Clone, PartialEq, Eq)]
pub struct AudioAsset {
    mime: String,
    data: Vec<u8>,
}

impl std::fmt::Debug for AudioAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioAsset")
            .field("mime", &self.mime)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Mono PCM decoded from a WAV asset
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioAsset {
    #[must_use]
    pub fn new(mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            data,
        }
    }

    /// Parse a `data:<mime>;base64,<payload>` URI
    ///
    /// # Errors
    ///
    /// Returns error if the URI is not base64 encoded audio
    pub fn from_data_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| Error::Tts("audio is not a data URI".to_string()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| Error::Tts("data URI has no payload".to_string()))?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or_else(|| Error::Tts("data URI is not base64 encoded".to_string()))?;

        if !mime.starts_with("audio/") {
            return Err(Error::Tts(format!("unexpected media type: {mime}")));
        }

        let data = STANDARD.decode(payload)?;
        if data.is_empty() {
            return Err(Error::Tts("audio payload is empty".to_string()));
        }

        Ok(Self::new(mime, data))
    }

    /// Encode as a data URI
    #[must_use]
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.data))
    }

    #[must_use]
    pub fn mime(&self) -> &str {
        &self.mime
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// File extension for the MIME type
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            "audio/wav" | "audio/wave" | "audio/x-wav" => "wav",
            "audio/mpeg" | "audio/mp3" => "mp3",
            "audio/ogg" => "ogg",
            "audio/webm" => "webm",
            _ => "bin",
        }
    }

    /// Duration of a WAV asset
    #[must_use]
    pub fn wav_duration(&self) -> Option<Duration> {
        let reader = hound::WavReader::new(Cursor::new(&self.data)).ok()?;
        let spec = reader.spec();
        if spec.sample_rate == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(
            f64::from(reader.duration()) / f64::from(spec.sample_rate),
        ))
    }

    /// Decode a WAV asset to mono f32 samples
    ///
    /// # Errors
    ///
    /// Returns error if the asset is not a readable WAV file
    #[allow(clippy::cast_precision_loss)]
    pub fn decode_wav(&self) -> Result<DecodedAudio> {
        let mut reader = hound::WavReader::new(Cursor::new(&self.data))
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
            hound::SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?
            }
        };

        // Downmix to mono by averaging channels
        let samples = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        Ok(DecodedAudio {
            sample_rate: spec.sample_rate,
            samples,
        })
    }
}

/// Somewhere to send synthesized audio
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `asset`, returning when playback is complete
    ///
    /// # Errors
    ///
    /// Returns error if the audio cannot be played
    async fn play(&self, asset: &AudioAsset) -> Result<()>;
}

/// Writes each asset to a file
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Write `asset` to the output directory and return its path
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub async fn save(&self, asset: &AudioAsset) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = format!(
            "answer-{}.{}",
            chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f"),
            asset.extension()
        );
        let path = self.dir.join(name);
        tokio::fs::write(&path, asset.bytes()).await?;
        Ok(path)
    }
}

#[async_trait]
impl AudioSink for FileSink {
    async fn play(&self, asset: &AudioAsset) -> Result<()> {
        let path = self.save(asset).await?;
        tracing::info!(
            path = %path.display(),
            duration = ?asset.wav_duration(),
            "answer audio written"
        );
        println!("audio: {}", path.display());
        Ok(())
    }
}

/// Discards audio
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, asset: &AudioAsset) -> Result<()> {
        tracing::debug!(?asset, "audio output disabled");
        Ok(())
    }
}

/// Keeps at most one playback running
pub struct Playback {
    sink: Arc<dyn AudioSink>,
    active: Option<JoinHandle<()>>,
}

impl Playback {
    #[must_use]
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self { sink, active: None }
    }

    /// Start playing `asset`, interrupting any current playback
    pub fn play(&mut self, asset: AudioAsset) {
        self.stop();

        let sink = Arc::clone(&self.sink);
        self.active = Some(tokio::spawn(async move {
            if let Err(e) = sink.play(&asset).await {
                tracing::error!(error = %e, "audio playback failed");
            }
        }));
    }

    /// Interrupt current playback
    pub fn stop(&mut self) {
        if let Some(handle) = self.active.take() {
            if !handle.is_finished() {
                tracing::debug!("interrupting playback");
            }
            handle.abort();
        }
    }

    /// Whether a playback is still running
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.active.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "speaker")]
pub use speaker::SpeakerSink;

#[cfg(feature = "speaker")]
mod speaker {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleRate, StreamConfig};

    use super::{AudioAsset, AudioSink, DecodedAudio};
    use crate::{Error, Result};

    /// Plays WAV assets on the default output device
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SpeakerSink;

    /// Sets the flag when the playing future is dropped (interrupted)
    struct StopOnDrop(Arc<AtomicBool>);

    impl Drop for StopOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl AudioSink for SpeakerSink {
        async fn play(&self, asset: &AudioAsset) -> Result<()> {
            let audio = asset.decode_wav()?;
            let stop = Arc::new(AtomicBool::new(false));
            let _guard = StopOnDrop(Arc::clone(&stop));

            tokio::task::spawn_blocking(move || play_blocking(&audio, &stop))
                .await
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    }

    /// Play samples on the default device until done or stopped
    fn play_blocking(audio: &DecodedAudio, stop: &Arc<AtomicBool>) -> Result<()> {
        if audio.samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let rate = SampleRate(audio.sample_rate);
        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;
        let config: StreamConfig = supported.with_sample_rate(rate).config();
        let channels = usize::from(config.channels);

        let samples = Arc::new(audio.samples.clone());
        let position = Arc::new(AtomicUsize::new(0));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels) {
                            let pos = position.fetch_add(1, Ordering::Relaxed);
                            let sample = samples.get(pos).copied().unwrap_or(0.0);
                            frame.fill(sample);
                        }
                    },
                    |err| tracing::error!(error = %err, "audio playback error"),
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let sample_count = samples.len() as u64;
        let duration = Duration::from_millis(sample_count * 1000 / u64::from(audio.sample_rate));
        let deadline = Instant::now() + duration + Duration::from_millis(500);

        while position.load(Ordering::Relaxed) < samples.len() {
            if stop.load(Ordering::SeqCst) {
                tracing::debug!("speaker playback interrupted");
                break;
            }
            if Instant::now() > deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        drop(stream);
        tracing::debug!(samples = sample_count, "playback complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[i16], sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_data_uri_parsing() {
        let asset = AudioAsset::from_data_uri("data:audio/wav;base64,UklGRg==").unwrap();
        assert_eq!(asset.mime(), "audio/wav");
        assert_eq!(asset.bytes(), b"RIFF");
        assert_eq!(asset.extension(), "wav");
        assert_eq!(asset.to_data_uri(), "data:audio/wav;base64,UklGRg==");
    }

    #[test]
    fn test_invalid_data_uris() {
        assert!(AudioAsset::from_data_uri("https://example.test/a.wav").is_err());
        assert!(AudioAsset::from_data_uri("data:audio/wav;base64").is_err());
        assert!(AudioAsset::from_data_uri("data:audio/wav,UklGRg==").is_err());
        assert!(AudioAsset::from_data_uri("data:text/plain;base64,UklGRg==").is_err());
        assert!(matches!(
            AudioAsset::from_data_uri("data:audio/wav;base64,!!!"),
            Err(Error::Base64(_))
        ));
    }

    #[test]
    fn test_wav_decode_and_duration() {
        let asset = AudioAsset::new("audio/wav", wav_bytes(&[0, 16384, -16384, 0], 4));
        assert_eq!(asset.wav_duration(), Some(Duration::from_secs(1)));

        let decoded = asset.decode_wav().unwrap();
        assert_eq!(decoded.sample_rate, 4);
        assert_eq!(decoded.samples.len(), 4);
        assert!((decoded.samples[1] - 0.5).abs() < 1e-4);
        assert!((decoded.samples[2] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_non_wav_has_no_duration() {
        let asset = AudioAsset::new("audio/mpeg", vec![0xff, 0xfb, 0x90, 0x00]);
        assert_eq!(asset.wav_duration(), None);
        assert!(asset.decode_wav().is_err());
    }

    #[tokio::test]
    async fn test_file_sink_writes_asset() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("audio"));
        let asset = AudioAsset::new("audio/wav", wav_bytes(&[1, 2, 3], 8000));

        let path = sink.save(&asset).await.unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("wav"));
        assert_eq!(std::fs::read(&path).unwrap(), asset.bytes());
    }
}
