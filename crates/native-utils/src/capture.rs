//! Single-utterance microphone capture.
//!
//! Audio is pulled from the input device through a lock-free ring buffer and
//! fed to an [`Endpointer`], which decides when the speaker has started and
//! finished talking. The finished utterance is resampled to
//! [`TRANSCRIPTION_SAMPLE_RATE`] and handed back as 16-bit PCM.

use std::time::{Duration, Instant};

use anyhow::Context;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};

use crate::audio::{
    TRANSCRIPTION_SAMPLE_RATE, convert_f32_to_i16, downmix, encode_wav, resample_mono, rms_energy,
};
use crate::device::get_or_default_input;

/// RMS level (16-bit scale) above which a frame counts as speech.
pub const DEFAULT_ENERGY_THRESHOLD: f32 = 300.0;

/// Trailing silence that ends an utterance.
pub const DEFAULT_PAUSE: Duration = Duration::from_millis(800);

/// Audio kept from before the first loud frame so word onsets survive.
pub const DEFAULT_PRE_ROLL: Duration = Duration::from_millis(500);

/// Hard cap on how long a single capture may run.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(30);

/// Length of one analysis frame.
const FRAME_DURATION: Duration = Duration::from_millis(30);

/// How often the capture loop drains the ring buffer.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Extra wall-clock time granted past `max_duration` before a silent device is
/// treated as broken.
const STALL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Input device to use; `None` selects the host default.
    pub device_name: Option<String>,
    pub energy_threshold: f32,
    pub pause: Duration,
    pub pre_roll: Duration,
    pub max_duration: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device_name: None,
            energy_threshold: DEFAULT_ENERGY_THRESHOLD,
            pause: DEFAULT_PAUSE,
            pre_roll: DEFAULT_PRE_ROLL,
            max_duration: DEFAULT_MAX_DURATION,
        }
    }
}

/// One captured span of speech, mono 16-bit PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl Utterance {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn to_wav(&self) -> anyhow::Result<Vec<u8>> {
        encode_wav(&self.samples, self.sample_rate)
    }
}

/// What the endpointer concluded after the latest block of audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Keep feeding audio.
    Listening,
    /// Speech was heard and has ended (or the duration cap was hit mid-speech).
    Complete,
    /// The duration cap was hit without any speech.
    Silent,
}

/// Energy-based start/end-of-speech detector.
pub struct Endpointer {
    frame_len: usize,
    threshold: f32,
    pause_frames: usize,
    pre_roll_samples: usize,
    max_samples: usize,
    pending: Vec<f32>,
    recorded: Vec<f32>,
    speech_started: bool,
    silent_frames: usize,
    total_samples: usize,
}

impl Endpointer {
    pub fn new(sample_rate: u32, settings: &CaptureSettings) -> Self {
        let samples_for = |d: Duration| (d.as_secs_f64() * sample_rate as f64).round() as usize;
        let frame_len = samples_for(FRAME_DURATION).max(1);
        Self {
            frame_len,
            threshold: settings.energy_threshold,
            pause_frames: samples_for(settings.pause).div_ceil(frame_len).max(1),
            pre_roll_samples: samples_for(settings.pre_roll),
            max_samples: samples_for(settings.max_duration).max(frame_len),
            pending: Vec::with_capacity(frame_len),
            recorded: Vec::new(),
            speech_started: false,
            silent_frames: 0,
            total_samples: 0,
        }
    }

    /// Feeds mono samples and reports whether capture should continue.
    pub fn push(&mut self, samples: &[f32]) -> Endpoint {
        self.pending.extend_from_slice(samples);

        while self.pending.len() >= self.frame_len {
            let frame: Vec<f32> = self.pending.drain(..self.frame_len).collect();
            self.total_samples += frame.len();
            let loud = rms_energy(&frame) >= self.threshold;
            self.recorded.extend_from_slice(&frame);

            if self.speech_started {
                if loud {
                    self.silent_frames = 0;
                } else {
                    self.silent_frames += 1;
                    if self.silent_frames >= self.pause_frames {
                        return Endpoint::Complete;
                    }
                }
            } else if loud {
                self.speech_started = true;
            } else if self.recorded.len() > self.pre_roll_samples {
                let excess = self.recorded.len() - self.pre_roll_samples;
                self.recorded.drain(..excess);
            }

            if self.total_samples >= self.max_samples {
                return if self.speech_started {
                    Endpoint::Complete
                } else {
                    Endpoint::Silent
                };
            }
        }

        Endpoint::Listening
    }

    pub fn heard_speech(&self) -> bool {
        self.speech_started
    }

    /// Consumes the endpointer, returning the pre-roll plus everything since
    /// speech started.
    pub fn into_samples(self) -> Vec<f32> {
        self.recorded
    }
}

/// Records one utterance from the input device.
///
/// Blocks the calling thread until the speaker pauses or the duration cap is
/// reached. Returns `Ok(None)` when nothing above the energy threshold was
/// heard.
pub fn capture_utterance(settings: &CaptureSettings) -> anyhow::Result<Option<Utterance>> {
    let device = get_or_default_input(settings.device_name.as_deref())?;
    tracing::info!("Using input device: {:?}", device.name()?);

    let supported = device
        .default_input_config()
        .context("Failed to get default input config")?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();
    let sample_rate = config.sample_rate.0;
    tracing::debug!("Input stream config: {:?} ({:?})", &config, sample_format);

    // Two seconds of headroom between the audio callback and the polling loop.
    let (producer, mut consumer) = HeapRb::<f32>::new(sample_rate as usize * 2).split();

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, producer)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, producer)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, producer)?,
        other => anyhow::bail!("Unsupported input sample format: {other:?}"),
    };
    stream.play().context("Failed to start input stream")?;

    let mut endpointer = Endpointer::new(sample_rate, settings);
    let deadline = Instant::now() + settings.max_duration + STALL_GRACE;
    let mut block = Vec::new();
    let outcome = loop {
        std::thread::sleep(POLL_INTERVAL);
        block.clear();
        while let Some(sample) = consumer.try_pop() {
            block.push(sample);
        }
        match endpointer.push(&block) {
            Endpoint::Listening if Instant::now() < deadline => {}
            Endpoint::Listening => anyhow::bail!("Input device stopped delivering audio"),
            done => break done,
        }
    };
    drop(stream);

    if outcome == Endpoint::Silent || !endpointer.heard_speech() {
        tracing::info!("No speech detected during capture");
        return Ok(None);
    }

    let mono = endpointer.into_samples();
    let resampled = resample_mono(&mono, sample_rate, TRANSCRIPTION_SAMPLE_RATE)?;
    let utterance = Utterance {
        samples: convert_f32_to_i16(&resampled),
        sample_rate: TRANSCRIPTION_SAMPLE_RATE,
    };
    tracing::info!("Captured utterance of {:.2}s", utterance.duration().as_secs_f32());
    Ok(Some(utterance))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: HeapProd<f32>,
) -> anyhow::Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let data_fn = move |data: &[T], _: &cpal::InputCallbackInfo| {
        let samples: Vec<f32> = data.iter().map(|&s| s.to_sample::<f32>()).collect();
        let mono = downmix(&samples, channels);
        let pushed = producer.push_slice(&mono);
        if pushed < mono.len() {
            tracing::warn!("Capture buffer full, dropped {} samples", mono.len() - pushed);
        }
    };

    device
        .build_input_stream(
            config,
            data_fn,
            move |err| tracing::error!("An error occurred on input stream: {}", err),
            None,
        )
        .context("Failed to build input stream")
}
