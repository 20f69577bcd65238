//! Door actuation over two independent channels: an MQTT publish and a
//! direct HTTP call to the door controller.
//!
//! Both channels are always attempted, broker first. Neither outcome
//! affects the other, and neither is ever raised to the caller.

use crate::config::ControllerSettings;
use crate::supervisor::{BrokerError, BrokerLink, ConnectionState};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

const OPEN_PAYLOAD: &[u8] = b"OPEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Open,
}

/// Per-channel delivery results of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelResults {
    pub broker: bool,
    pub controller: bool,
}

/// Record of one door-open attempt. Lives for a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuationCommand {
    pub action: Action,
    pub identity: String,
    pub channel_results: ChannelResults,
}

#[derive(Error, Debug)]
pub enum ActuationError {
    #[error("broker not connected (state: {0})")]
    BrokerUnavailable(ConnectionState),
    #[error("broker publish failed: {0}")]
    Publish(#[source] rumqttc::ClientError),
    #[error("controller answered {status}: {body}")]
    ControllerStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("controller did not answer in time")]
    ControllerTimeout,
    #[error("controller request failed: {0}")]
    ControllerTransport(#[source] reqwest::Error),
}

impl From<BrokerError> for ActuationError {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::Unavailable(state) => ActuationError::BrokerUnavailable(state),
            BrokerError::Publish(e) => ActuationError::Publish(e),
        }
    }
}

/// Something that opens the door for a recognized identity.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn dispatch(&self, identity: &str) -> ActuationCommand;
}

/// JSON body expected by the door controller.
#[derive(Debug, Serialize)]
struct ControllerCommand<'a> {
    command: Action,
    name: &'a str,
    status: &'static str,
}

pub struct ActuationDispatcher {
    broker: Arc<dyn BrokerLink>,
    topic: String,
    http: reqwest::Client,
    controller_url: String,
}

impl ActuationDispatcher {
    pub fn new(
        broker: Arc<dyn BrokerLink>,
        topic: &str,
        controller: &ControllerSettings,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(controller.timeout())
            .build()?;
        Ok(Self {
            broker,
            topic: topic.to_string(),
            http,
            controller_url: controller.url.clone(),
        })
    }

    pub fn controller_url(&self) -> &str {
        &self.controller_url
    }

    fn publish_open(&self) -> Result<(), ActuationError> {
        self.broker.publish(&self.topic, OPEN_PAYLOAD)?;
        tracing::info!(topic = %self.topic, "OPEN published to broker");
        Ok(())
    }

    async fn notify_controller(&self, identity: &str) -> Result<(), ActuationError> {
        let command = ControllerCommand {
            command: Action::Open,
            name: identity,
            status: "success",
        };
        tracing::info!(url = %self.controller_url, name = identity, "sending OPEN to controller");

        let response = self
            .http
            .post(&self.controller_url)
            .header(reqwest::header::ACCEPT_CHARSET, "UTF-8")
            .json(&command)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        // Read the body before the status check so failures can be logged with it.
        let body = response.text().await.map_err(classify_transport)?;
        tracing::debug!(%status, body = %body, "controller response");

        if !status.is_success() {
            return Err(ActuationError::ControllerStatus { status, body });
        }
        tracing::info!(name = identity, "controller accepted OPEN");
        Ok(())
    }
}

fn classify_transport(e: reqwest::Error) -> ActuationError {
    if e.is_timeout() {
        ActuationError::ControllerTimeout
    } else {
        ActuationError::ControllerTransport(e)
    }
}

#[async_trait]
impl Actuator for ActuationDispatcher {
    async fn dispatch(&self, identity: &str) -> ActuationCommand {
        let broker = match self.publish_open() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "broker channel failed");
                false
            }
        };

        let controller = match self.notify_controller(identity).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, broker_ok = broker, "controller channel failed");
                false
            }
        };

        let command = ActuationCommand {
            action: Action::Open,
            identity: identity.to_string(),
            channel_results: ChannelResults { broker, controller },
        };
        tracing::info!(
            identity,
            broker = command.channel_results.broker,
            controller = command.channel_results.controller,
            "door actuation dispatched"
        );
        command
    }
}
