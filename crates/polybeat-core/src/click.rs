//! Native click backend: cpal output stream, stream clock, click emitter.
//!
//! One [`ClickBackend`] owns the output stream. It hands out:
//!
//! - [`StreamClock`] - Engine time derived from the stream's sample counter,
//!   so trigger times and `now()` drift together with the audio hardware
//! - [`ClickEmitter`] - A [`SoundEmitter`] that schedules 50 ms square-wave
//!   clicks at absolute stream times (one emitter per voice, each with its
//!   own tone parameters)
//!
//! Clicks travel from the control thread into the audio callback over a
//! crossbeam channel; completion and cancellation travel back through the
//! [`SoundHandle`] flags.

use crate::clock::AudioClock;
use crate::emitter::{SoundEmitter, SoundHandle, ToneParams};
use crate::error::EngineError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Click length in seconds (attack included).
const CLICK_SECONDS: f64 = 0.05;
/// Linear attack length in seconds.
const ATTACK_SECONDS: f64 = 0.001;
/// Capacity of the command channel; far more than one look-ahead window
/// of clicks ever needs.
const COMMAND_CAPACITY: usize = 256;

struct ClickCommand {
    start_time: f64,
    frequency: f64,
    gain: f64,
    handle: SoundHandle,
}

struct ActiveClick {
    start_sample: u64,
    end_sample: u64,
    phase: f64,
    phase_increment: f64,
    gain: f64,
    handle: SoundHandle,
}

impl ActiveClick {
    /// Sample value at absolute stream sample `position`, zero outside the
    /// click's span. Square wave, 1 ms linear attack, linear decay to zero.
    fn render(&mut self, position: u64, sample_rate: f64) -> f32 {
        if position < self.start_sample || position >= self.end_sample {
            return 0.0;
        }
        let square = if self.phase < 0.5 { 1.0 } else { -1.0 };
        self.phase += self.phase_increment;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }

        let elapsed = (position - self.start_sample) as f64 / sample_rate;
        let envelope = if elapsed < ATTACK_SECONDS {
            elapsed / ATTACK_SECONDS
        } else {
            1.0 - (elapsed - ATTACK_SECONDS) / (CLICK_SECONDS - ATTACK_SECONDS)
        };
        (square * envelope.clamp(0.0, 1.0) * self.gain) as f32
    }
}

/// Clock reading the output stream's sample counter.
#[derive(Clone)]
pub struct StreamClock {
    samples: Arc<AtomicU64>,
    sample_rate: f64,
}

impl AudioClock for StreamClock {
    fn now(&self) -> f64 {
        self.samples.load(Ordering::Acquire) as f64 / self.sample_rate
    }
}

/// [`SoundEmitter`] scheduling clicks on a [`ClickBackend`].
pub struct ClickEmitter {
    params: ToneParams,
    commands: Sender<ClickCommand>,
}

impl SoundEmitter for ClickEmitter {
    fn play(&mut self, target_time: f64, is_first_beat: bool, is_subdivided: bool) -> SoundHandle {
        let mut frequency = self.params.frequency;
        if is_first_beat {
            frequency += self.params.first_beat_offset;
        } else if is_subdivided {
            frequency += self.params.subdivision_offset;
        }

        let handle = SoundHandle::new();
        let command = ClickCommand {
            start_time: target_time,
            frequency,
            gain: self.params.gain,
            handle: handle.clone(),
        };
        if self.commands.try_send(command).is_err() {
            // Stream gone or queue saturated; report the event as over so
            // the voice never waits on it.
            log::warn!("click dropped: audio stream not accepting commands");
            handle.finish();
        }
        handle
    }

    fn update_frequency(&mut self, frequency: f64) {
        self.params.frequency = frequency;
    }

    fn update_tone(&mut self, params: ToneParams) {
        self.params = params;
    }
}

/// Owner of the cpal output stream.
///
/// Keep this alive for as long as any emitter or clock derived from it is
/// in use; dropping it tears the stream down.
pub struct ClickBackend {
    _stream: cpal::Stream,
    samples: Arc<AtomicU64>,
    sample_rate: f64,
    commands: Sender<ClickCommand>,
}

impl ClickBackend {
    /// Open the default output device and start the stream.
    pub fn open() -> Result<Self, EngineError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(EngineError::NoOutputDevice)?;
        let config = device
            .default_output_config()
            .map_err(|e| EngineError::StreamConfig(e.to_string()))?;
        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(EngineError::StreamConfig(format!(
                "expected f32 output samples, device offers {:?}",
                config.sample_format()
            )));
        }

        let sample_rate = f64::from(config.sample_rate());
        let channels = config.channels() as usize;
        let samples = Arc::new(AtomicU64::new(0));
        let (command_tx, command_rx) = bounded::<ClickCommand>(COMMAND_CAPACITY);

        log::info!(
            "click backend: {} Hz, {channels} channels",
            config.sample_rate()
        );

        let stream = device
            .build_output_stream(
                &config.into(),
                {
                    let samples = samples.clone();
                    let mut renderer = ClickRenderer::new(command_rx, sample_rate);
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        renderer.render(data, channels, &samples);
                    }
                },
                |err| log::error!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| EngineError::BuildStream(e.to_string()))?;
        stream
            .play()
            .map_err(|e| EngineError::PlayStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            samples,
            sample_rate,
            commands: command_tx,
        })
    }

    /// A clock tracking this stream's sample counter.
    pub fn clock(&self) -> StreamClock {
        StreamClock {
            samples: self.samples.clone(),
            sample_rate: self.sample_rate,
        }
    }

    /// A new emitter scheduling clicks on this stream.
    pub fn emitter(&self, params: ToneParams) -> ClickEmitter {
        ClickEmitter {
            params,
            commands: self.commands.clone(),
        }
    }
}

/// Audio-callback state: pending commands and sounding clicks.
struct ClickRenderer {
    commands: Receiver<ClickCommand>,
    active: Vec<ActiveClick>,
    position: u64,
    sample_rate: f64,
}

impl ClickRenderer {
    fn new(commands: Receiver<ClickCommand>, sample_rate: f64) -> Self {
        Self {
            commands,
            active: Vec::with_capacity(COMMAND_CAPACITY),
            position: 0,
            sample_rate,
        }
    }

    fn render(&mut self, data: &mut [f32], channels: usize, samples: &AtomicU64) {
        for command in self.commands.try_iter() {
            if command.handle.is_cancelled() {
                command.handle.finish();
                continue;
            }
            let start_sample = (command.start_time.max(0.0) * self.sample_rate) as u64;
            let length = (CLICK_SECONDS * self.sample_rate) as u64;
            self.active.push(ActiveClick {
                start_sample,
                end_sample: start_sample + length,
                phase: 0.0,
                phase_increment: command.frequency / self.sample_rate,
                gain: command.gain,
                handle: command.handle,
            });
        }

        let frames = data.len() / channels.max(1);
        for frame in 0..frames {
            let position = self.position + frame as u64;
            let mut value = 0.0f32;
            for click in &mut self.active {
                if !click.handle.is_cancelled() {
                    value += click.render(position, self.sample_rate);
                }
            }
            for channel in 0..channels {
                data[frame * channels + channel] = value;
            }
        }
        self.position += frames as u64;

        // Reap finished or cancelled clicks and flip their handles.
        let position = self.position;
        self.active.retain(|click| {
            if click.handle.is_cancelled() || position >= click.end_sample {
                click.handle.finish();
                false
            } else {
                true
            }
        });

        samples.store(self.position, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn renderer_with_click(start_time: f64, gain: f64) -> (ClickRenderer, SoundHandle) {
        let (tx, rx) = unbounded();
        let handle = SoundHandle::new();
        tx.send(ClickCommand {
            start_time,
            frequency: 750.0,
            gain,
            handle: handle.clone(),
        })
        .unwrap();
        (ClickRenderer::new(rx, 1000.0), handle)
    }

    #[test]
    fn test_renderer_plays_and_finishes_click() {
        let (mut renderer, handle) = renderer_with_click(0.0, 0.5);
        let samples = AtomicU64::new(0);

        // 50ms click at 1kHz: 50 samples. First 40ms buffer sounds.
        let mut buffer = vec![0.0f32; 40];
        renderer.render(&mut buffer, 1, &samples);
        assert!(buffer.iter().any(|&s| s != 0.0));
        assert!(!handle.is_finished());

        // Next buffer passes the end of the click.
        let mut buffer = vec![0.0f32; 40];
        renderer.render(&mut buffer, 1, &samples);
        assert!(handle.is_finished());
        assert_eq!(samples.load(Ordering::Acquire), 80);
    }

    #[test]
    fn test_renderer_silences_cancelled_click() {
        let (mut renderer, handle) = renderer_with_click(0.0, 0.5);
        let samples = AtomicU64::new(0);
        handle.cancel();

        let mut buffer = vec![0.0f32; 40];
        renderer.render(&mut buffer, 1, &samples);
        assert!(buffer.iter().all(|&s| s == 0.0));
        assert!(handle.is_finished());
    }

    #[test]
    fn test_emitter_accent_offsets() {
        let (tx, rx) = unbounded();
        let mut emitter = ClickEmitter {
            params: ToneParams::default(),
            commands: tx,
        };
        emitter.play(0.0, true, false);
        emitter.play(0.0, false, true);
        emitter.play(0.0, false, false);

        let frequencies: Vec<f64> = rx.try_iter().map(|c| c.frequency).collect();
        assert_eq!(frequencies, vec![950.0, 700.0, 750.0]);
    }
}
