//! Lifecycle of the long-lived MQTT broker connection.
//!
//! The daemon must keep serving when the broker is down: the supervisor
//! only ever reports a state, it never fails a caller.

use crate::config::BrokerSettings;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("broker not connected (state: {0})")]
    Unavailable(ConnectionState),
    #[error("publish failed: {0}")]
    Publish(#[from] rumqttc::ClientError),
}

/// The broker channel as seen by the dispatcher.
///
/// Implementations must allow concurrent `publish` calls.
pub trait BrokerLink: Send + Sync {
    fn state(&self) -> ConnectionState;
    /// Queue a fire-and-forget publish. Does not wait for the broker.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;
}

/// Owns the MQTT client and the task that drives its event loop.
pub struct ConnectionSupervisor {
    client: AsyncClient,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionSupervisor {
    /// Begin connecting in the background. Never fails: a broker that is
    /// down leaves the supervisor `Disconnected` and the daemon running.
    pub fn start(settings: &BrokerSettings) -> Self {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));

        let (client, eventloop) = AsyncClient::new(options, 16);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        tracing::info!(
            host = %settings.host,
            port = settings.port,
            client_id = %settings.client_id,
            "connecting to broker"
        );
        state_tx.send_replace(ConnectionState::Connecting);
        tokio::spawn(drive(eventloop, state_tx, settings.reconnect_delay()));

        Self {
            client,
            state: state_rx,
        }
    }

    /// Ask the broker for a clean disconnect. Best effort.
    pub fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!(error = %e, "broker disconnect request dropped");
        }
    }
}

impl BrokerLink for ConnectionSupervisor {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(BrokerError::Unavailable(state));
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())?;
        Ok(())
    }
}

/// Poll the event loop, mirroring connection progress into `state`.
///
/// Polling again after an error makes the client reconnect, so the delay
/// between attempts is the whole retry policy. With no delay configured
/// the first error is final.
async fn drive(
    mut eventloop: EventLoop,
    state: watch::Sender<ConnectionState>,
    reconnect_delay: Option<Duration>,
) {
    loop {
        if state.is_closed() {
            break;
        }
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    state.send_replace(ConnectionState::Connected);
                    tracing::info!("broker connection established");
                } else {
                    tracing::error!(code = ?ack.code, "broker refused connection");
                }
            }
            Ok(_) => {}
            Err(e) => {
                let previous = state.send_replace(ConnectionState::Disconnected);
                if previous == ConnectionState::Connected {
                    tracing::warn!(error = %e, "broker connection lost");
                } else {
                    tracing::error!(error = %e, "broker connection failed");
                }

                let Some(delay) = reconnect_delay else {
                    tracing::warn!("broker reconnect disabled; door commands go over HTTP only");
                    break;
                };
                tokio::time::sleep(delay).await;
                state.send_replace(ConnectionState::Connecting);
            }
        }
    }
    tracing::debug!("broker event loop stopped");
}
