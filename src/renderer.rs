use crate::error::{Error, ErrorKind};
use crate::message::{RendererCommand, RendererEvent};
use crate::sink::{SinkFactory, ToneSink};
use crate::synth;

use std::time::Duration;
use tokio::sync::mpsc::{channel, Receiver, Sender, UnboundedSender};
use tokio::sync::oneshot;

/// Synthesizes tones on request and reports each one back to the controller.
///
/// The audio sink is opened once, before the renderer reports ready, and
/// reused for every tone; dropping every [`RendererHandle`] ends the task and
/// releases it.
pub struct ToneRenderer {
    receiver: Receiver<RendererCommand>,
    events: UnboundedSender<RendererEvent>,
    sink: Box<dyn ToneSink>,
}

impl ToneRenderer {
    pub fn try_new(
        receiver: Receiver<RendererCommand>,
        events: UnboundedSender<RendererEvent>,
        sink_factory: &SinkFactory,
    ) -> Result<Self, Error> {
        let sink = sink_factory()?;

        Ok(Self {
            receiver,
            events,
            sink,
        })
    }

    /// Schedules one tone; does not wait for it to finish playing.
    pub fn play_tone(&mut self, frequency: u32, duration: Duration, volume: f32) {
        let tone = synth::synthesize(frequency, duration, volume, self.sink.sample_rate());

        match self.sink.play(tone) {
            Ok(_) => {
                log::debug!("scheduled {} Hz tone for {:?}", frequency, duration);
                if self.events.send(RendererEvent::ToneComplete).is_err() {
                    log::debug!("controller no longer listening for tone completion");
                }
            }
            Err(error) => log::error!("failed to play tone: {}", error),
        }
    }

    pub async fn run(mut self) {
        while let Some(command) = self.receiver.recv().await {
            match command {
                RendererCommand::PlayTone {
                    frequency,
                    duration,
                    volume,
                } => self.play_tone(frequency, Duration::from_millis(duration), volume),
            }
        }

        log::debug!("tone renderer released");
    }
}

#[derive(Clone)]
pub struct RendererHandle {
    sender: Sender<RendererCommand>,
}

impl RendererHandle {
    /// Spawns a renderer and waits until its sink is open.
    ///
    /// Fails with the sink's error when no output could be opened.
    pub async fn spawn(
        sink_factory: SinkFactory,
        events: UnboundedSender<RendererEvent>,
        channel_boundary: usize,
    ) -> Result<RendererHandle, Error> {
        let (sender, receiver) = channel(channel_boundary);
        let (ready_sender, ready_receiver) = oneshot::channel();

        tokio::spawn(async move {
            match ToneRenderer::try_new(receiver, events, &sink_factory) {
                Ok(renderer) => {
                    let _ = ready_sender.send(Ok(()));
                    renderer.run().await;
                }
                Err(error) => {
                    let _ = ready_sender.send(Err(error));
                }
            }
        });

        match ready_receiver.await {
            Ok(Ok(_)) => Ok(RendererHandle { sender }),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(Error::new(
                ErrorKind::InternalFailure,
                "tone renderer exited before signalling readiness",
            )),
        }
    }

    pub async fn send(&self, command: RendererCommand) -> Result<(), Error> {
        match self.sender.send(command).await {
            Ok(_) => Ok(()),
            Err(error) => Err(Error::new(
                ErrorKind::AudioFailure,
                format!("failed to send command to tone renderer: {}", error),
            )),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_sender(sender: Sender<RendererCommand>) -> Self {
        Self { sender }
    }
}
