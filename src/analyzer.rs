//! Decoding and loudness measurement.
//!
//! Loudness is the RMS of every interleaved sample, in dBFS with full scale
//! at 1.0. Silent or empty audio has no finite dBFS value; it is reported as
//! the configured silence floor, and quieter measurements are clamped to it.

use std::path::Path;

use log::{debug, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::config::Thresholds;
use crate::error::DecodeError;
use crate::models::{AudioMetrics, EnergyClass, LocalAudioFile};

#[derive(Debug, Clone, Copy)]
pub struct AudioAnalyzer {
    thresholds: Thresholds,
}

impl AudioAnalyzer {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Decodes on the blocking pool.
    pub async fn analyze(&self, file: &LocalAudioFile) -> Result<AudioMetrics, DecodeError> {
        let analyzer = *self;
        let path = file.path.clone();
        tokio::task::spawn_blocking(move || analyzer.analyze_path(&path))
            .await
            .map_err(|e| DecodeError::Task(e.to_string()))?
    }

    pub fn analyze_path(&self, path: &Path) -> Result<AudioMetrics, DecodeError> {
        let summary = decode(path)?;
        let loudness = loudness_dbfs(
            summary.sum_squares,
            summary.samples,
            self.thresholds.silence_floor_dbfs,
        );
        let metrics = AudioMetrics {
            duration_ms: summary.duration_ms(),
            loudness,
            classification: self.classify_track(summary.duration_ms(), loudness),
        };
        debug!(
            "Analyzed {}: {} ms, {:.2} dBFS, {}",
            path.display(),
            metrics.duration_ms,
            metrics.loudness,
            metrics.classification
        );
        Ok(metrics)
    }

    /// Thresholds are inclusive lower bounds, so a value on a boundary goes
    /// to the louder band.
    pub fn classify(&self, loudness: f64) -> EnergyClass {
        if loudness >= self.thresholds.high_energy_min_dbfs {
            EnergyClass::High
        } else if loudness >= self.thresholds.medium_energy_min_dbfs {
            EnergyClass::Medium
        } else {
            EnergyClass::Low
        }
    }

    /// Loudness-only unless a long-track duration is configured.
    pub fn classify_track(&self, duration_ms: i64, loudness: f64) -> EnergyClass {
        let Some(long_track_min_ms) = self.thresholds.long_track_min_ms else {
            return self.classify(loudness);
        };
        let loud = loudness >= self.thresholds.medium_energy_min_dbfs;
        match (duration_ms < long_track_min_ms, loud) {
            (true, true) => EnergyClass::High,
            (false, false) => EnergyClass::Low,
            _ => EnergyClass::Medium,
        }
    }
}

/// Running totals over a decoded stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct DecodeSummary {
    pub frames: u64,
    pub samples: u64,
    pub sum_squares: f64,
    pub sample_rate: Option<u32>,
}

impl DecodeSummary {
    pub fn duration_ms(&self) -> i64 {
        match self.sample_rate {
            Some(rate) if rate > 0 => {
                (self.frames as f64 * 1000.0 / rate as f64).round() as i64
            }
            _ => 0,
        }
    }
}

pub fn loudness_dbfs(sum_squares: f64, samples: u64, floor: f64) -> f64 {
    if samples == 0 {
        return floor;
    }
    let rms = (sum_squares / samples as f64).sqrt();
    if rms <= 0.0 || !rms.is_finite() {
        return floor;
    }
    (20.0 * rms.log10()).max(floor)
}

pub fn decode(path: &Path) -> Result<DecodeSummary, DecodeError> {
    let display = path.display().to_string();

    let file = std::fs::File::open(path).map_err(|source| DecodeError::Open {
        path: display.clone(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|source| DecodeError::Unsupported {
            path: display.clone(),
            source,
        })?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::NoTrack(display.clone()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|source| DecodeError::Unsupported {
            path: display.clone(),
            source,
        })?;

    let mut summary = DecodeSummary {
        sample_rate: track.codec_params.sample_rate,
        ..Default::default()
    };
    let mut buffer: Option<SampleBuffer<f32>> = None;
    let mut packets = 0usize;
    let mut skipped = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                warn!("Stopped reading {} early: {}", display, e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }
        packets += 1;

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping corrupt packet in {}: {}", display, e);
                skipped += 1;
                continue;
            }
            Err(source) => {
                return Err(DecodeError::Unsupported {
                    path: display,
                    source,
                })
            }
        };

        let spec = *decoded.spec();
        if summary.sample_rate.is_none() {
            summary.sample_rate = Some(spec.rate);
        }

        let channels = spec.channels.count().max(1);
        let capacity = decoded.capacity();
        if buffer.as_ref().map_or(true, |b| b.capacity() < capacity * channels) {
            buffer = Some(SampleBuffer::<f32>::new(capacity as u64, spec));
        }
        let Some(buf) = buffer.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        let samples = buf.samples();
        summary.frames += (samples.len() / channels) as u64;
        summary.samples += samples.len() as u64;
        summary.sum_squares += samples
            .iter()
            .map(|&s| (s as f64) * (s as f64))
            .sum::<f64>();
    }

    if packets > 0 && summary.samples == 0 && skipped > 0 {
        return Err(DecodeError::Corrupt {
            path: display,
            skipped,
        });
    }
    if summary.frames > 0 && summary.sample_rate.is_none() {
        return Err(DecodeError::UnknownSampleRate(display));
    }

    Ok(summary)
}
