use crate::alarms::Alarms;
use crate::controller::{Controller, ControllerMessage};
use crate::error::{Error, ErrorKind};
use crate::keep_alive_config::KeepAliveConfig;
use crate::message::{self, PanelEvent, Request, Response, Status};
use crate::sink::SinkFactory;
use crate::storage::Storage;
use crate::timestamp::Timestamp;
use crate::tone_config::ToneConfig;

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Cheap handle for talking to a running controller.
#[derive(Clone)]
pub struct ControllerClient {
    sender: mpsc::Sender<ControllerMessage>,
    panel_events: broadcast::Sender<PanelEvent>,
}

impl ControllerClient {
    fn new(
        sender: mpsc::Sender<ControllerMessage>,
        panel_events: broadcast::Sender<PanelEvent>,
    ) -> ControllerClient {
        ControllerClient {
            sender,
            panel_events,
        }
    }

    pub async fn request(&self, request: Request) -> Result<Response, Error> {
        let (reply, response) = oneshot::channel();

        if let Err(error) = self
            .sender
            .send(ControllerMessage::Request {
                request,
                reply: Some(reply),
            })
            .await
        {
            return Err(Error::new(
                ErrorKind::ControllerUnavailable,
                format!("failed to send request to controller: {}", error),
            ));
        }

        match response.await {
            Ok(response) => Ok(response),
            Err(error) => Err(Error::new(
                ErrorKind::ControllerUnavailable,
                format!("controller dropped the request: {}", error),
            )),
        }
    }

    async fn acknowledged(&self, request: Request) -> Result<Option<Timestamp>, Error> {
        match self.request(request).await? {
            Response::Ack {
                success: true,
                next_ping_time,
            } => Ok(next_ping_time),
            Response::Ack { success: false, .. } => Err(Error::new(
                ErrorKind::InvalidConfig,
                "controller rejected the request",
            )),
            Response::Status(_) => Err(Error::new(
                ErrorKind::InternalFailure,
                "controller answered with a status instead of an acknowledgement",
            )),
        }
    }

    pub async fn start(&self, config: ToneConfig) -> Result<(), Error> {
        config.validate()?;
        self.acknowledged(Request::Start { config }).await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), Error> {
        self.acknowledged(Request::Stop).await?;
        Ok(())
    }

    /// Returns the next ping time when the controller is running.
    pub async fn update_config(&self, config: ToneConfig) -> Result<Option<Timestamp>, Error> {
        config.validate()?;
        self.acknowledged(Request::UpdateConfig { config }).await
    }

    pub async fn play_test(&self, config: ToneConfig) -> Result<(), Error> {
        self.acknowledged(Request::PlayTest { config }).await?;
        Ok(())
    }

    pub async fn get_status(&self) -> Result<Status, Error> {
        match self.request(Request::GetStatus).await? {
            Response::Status(status) => Ok(status),
            Response::Ack { .. } => Err(Error::new(
                ErrorKind::InternalFailure,
                "controller answered with an acknowledgement instead of a status",
            )),
        }
    }

    /// Handles a raw JSON message. Messages addressed to another context are
    /// ignored and yield `Ok(None)`.
    pub async fn dispatch(&self, raw: &str) -> Result<Option<Response>, Error> {
        match message::decode_controller_request(raw)? {
            Some(request) => Ok(Some(self.request(request).await?)),
            None => Ok(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.panel_events.subscribe()
    }

    /// Tears the controller down and waits until it is gone.
    pub async fn shutdown(&self) -> Result<(), Error> {
        let (done, finished) = oneshot::channel();

        if let Err(error) = self.sender.send(ControllerMessage::Shutdown { done }).await {
            return Err(Error::new(
                ErrorKind::ControllerUnavailable,
                format!("failed to send shutdown to controller: {}", error),
            ));
        }

        finished.await.map_err(|error| {
            Error::new(
                ErrorKind::ControllerUnavailable,
                format!("controller exited without confirming shutdown: {}", error),
            )
        })
    }
}

/// Spawns a controller that first restores persisted state, then serves
/// requests, and returns a client for it.
pub async fn build(
    keep_alive_config: KeepAliveConfig,
    storage: Arc<dyn Storage>,
    alarms: Alarms,
    sink_factory: SinkFactory,
) -> ControllerClient {
    let (sender, receiver) = mpsc::channel(keep_alive_config.command_channel_boundary);
    let (panel_events, _) = broadcast::channel(keep_alive_config.event_channel_boundary);

    let mut controller = Controller::new(
        keep_alive_config,
        receiver,
        storage,
        alarms,
        sink_factory,
        panel_events.clone(),
    );

    tokio::spawn(async move {
        controller.restore().await;
        controller.run().await;
    });

    ControllerClient::new(sender, panel_events)
}
