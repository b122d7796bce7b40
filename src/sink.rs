use crate::error::{Error, ErrorKind};
use crate::synth::Tone;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Audio output the renderer hands synthesized tones to.
///
/// `play` schedules the tone and returns; it must not wait for playback to end.
pub trait ToneSink: Send {
    fn sample_rate(&self) -> u32;

    fn play(&mut self, tone: Tone) -> Result<(), Error>;
}

/// Opens a sink. Called once per renderer, before it reports ready.
pub type SinkFactory = Arc<dyn Fn() -> Result<Box<dyn ToneSink>, Error> + Send + Sync>;

/// Synthesizes and discards; for hosts without an audio device.
pub struct SilentSink {
    sample_rate: u32,
}

impl SilentSink {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub fn factory(sample_rate: u32) -> SinkFactory {
        Arc::new(move || Ok(Box::new(SilentSink::new(sample_rate)) as Box<dyn ToneSink>))
    }
}

impl ToneSink for SilentSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn play(&mut self, tone: Tone) -> Result<(), Error> {
        log::debug!(
            "discarding {} samples of {} Hz tone",
            tone.samples.len(),
            tone.frequency
        );
        Ok(())
    }
}

/// Forwards every rendered tone to a channel.
pub struct ChannelSink {
    sample_rate: u32,
    sender: UnboundedSender<Tone>,
}

impl ChannelSink {
    pub fn new(sample_rate: u32, sender: UnboundedSender<Tone>) -> Self {
        Self {
            sample_rate,
            sender,
        }
    }

    pub fn factory(sample_rate: u32, sender: UnboundedSender<Tone>) -> SinkFactory {
        Arc::new(move || {
            Ok(Box::new(ChannelSink::new(sample_rate, sender.clone())) as Box<dyn ToneSink>)
        })
    }
}

impl ToneSink for ChannelSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn play(&mut self, tone: Tone) -> Result<(), Error> {
        match self.sender.send(tone) {
            Ok(_) => Ok(()),
            Err(_) => Err(Error::new(
                ErrorKind::AudioFailure,
                "tone channel receiver dropped",
            )),
        }
    }
}

#[cfg(feature = "cpal_sink")]
pub use device::DeviceSink;

#[cfg(feature = "cpal_sink")]
mod device {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::time::Duration;

    /// Plays tones on the default output device.
    ///
    /// Each tone gets its own short-lived stream on a helper thread, since
    /// streams cannot move between threads on every platform.
    pub struct DeviceSink {
        sample_rate: u32,
    }

    impl DeviceSink {
        pub fn open() -> Result<Self, Error> {
            let device = default_device()?;
            let config = device.default_output_config().map_err(|error| {
                Error::new(
                    ErrorKind::AudioFailure,
                    format!("failed to query output config: {}", error),
                )
            })?;

            if config.sample_format() != cpal::SampleFormat::F32 {
                return Err(Error::new(
                    ErrorKind::AudioFailure,
                    format!("unsupported sample format {:?}", config.sample_format()),
                ));
            }

            Ok(Self {
                sample_rate: config.sample_rate().0,
            })
        }

        pub fn factory() -> SinkFactory {
            Arc::new(|| Ok(Box::new(DeviceSink::open()?) as Box<dyn ToneSink>))
        }
    }

    fn default_device() -> Result<cpal::Device, Error> {
        cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::new(ErrorKind::AudioFailure, "no output device available"))
    }

    fn play_blocking(tone: Tone) -> Result<(), Error> {
        let device = default_device()?;
        let supported = device.default_output_config().map_err(|error| {
            Error::new(
                ErrorKind::AudioFailure,
                format!("failed to query output config: {}", error),
            )
        })?;
        let channels = supported.channels() as usize;
        let linger = tone.duration + Duration::from_millis(100);
        let samples = tone.samples;
        let mut position = 0usize;

        let stream = device
            .build_output_stream(
                &supported.config(),
                move |data: &mut [f32], _| {
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(position).copied().unwrap_or(0.0);
                        for channel in frame {
                            *channel = sample;
                        }
                        position = position.saturating_add(1);
                    }
                },
                |error| log::error!("output stream error: {}", error),
                None,
            )
            .map_err(|error| {
                Error::new(
                    ErrorKind::AudioFailure,
                    format!("failed to build output stream: {}", error),
                )
            })?;

        stream.play().map_err(|error| {
            Error::new(
                ErrorKind::AudioFailure,
                format!("failed to start output stream: {}", error),
            )
        })?;

        std::thread::sleep(linger);
        Ok(())
    }

    impl ToneSink for DeviceSink {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn play(&mut self, tone: Tone) -> Result<(), Error> {
            std::thread::spawn(move || {
                if let Err(error) = play_blocking(tone) {
                    log::error!("failed to play tone: {}", error);
                }
            });
            Ok(())
        }
    }
}
