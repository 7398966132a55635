//! Publish/subscribe relay transport over MQTT

use std::time::Duration;

use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::utils::ShutdownFlag;
use crate::RelayConfig;

/// Relay transport failures.
///
/// Connection establishment and teardown are fatal to the owning process;
/// per-message publish failures are absorbed by callers.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay broker unreachable after {attempts} attempts: {detail}")]
    Connect { attempts: u32, detail: String },

    #[error("relay publish on '{channel}' failed: {source}")]
    Publish {
        channel: String,
        #[source]
        source: rumqttc::ClientError,
    },

    #[error("relay subscribe to '{channel}' failed: {source}")]
    Subscribe {
        channel: String,
        #[source]
        source: rumqttc::ClientError,
    },

    #[error("relay disconnect failed: {0}")]
    Disconnect(#[source] rumqttc::ClientError),
}

/// Fire-and-forget publication of one payload on a named channel.
///
/// The transport preserves per-channel FIFO order as observed by a single
/// subscriber but gives no delivery guarantee; the channel alone determines
/// the payload format.
pub trait RelayPublisher: Send + Sync {
    fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), RelayError>;
}

/// Handler invoked on the listener thread for each received payload.
pub type ChannelHandler = Box<dyn FnMut(&[u8]) + Send>;

/// Publishing half of the relay session.
pub struct MqttRelay {
    client: Client,
}

/// Receiving half: owns the broker event loop and the subscription table.
pub struct RelayListener {
    client: Client,
    connection: Connection,
    table: Vec<(String, ChannelHandler)>,
}

impl MqttRelay {
    /// Establish a broker session, retrying the handshake up to
    /// `connect_attempts` times before giving up for good. Connection
    /// failures past this point are handled by the listener's reconnect
    /// loop, never retried here.
    pub fn connect(cfg: &RelayConfig, client_id: &str) -> Result<(Self, RelayListener), RelayError> {
        let mut options = MqttOptions::new(client_id, &cfg.host, cfg.port);
        options.set_keep_alive(Duration::from_secs(cfg.keepalive_secs));
        let (client, mut connection) = Client::new(options, 64);

        let mut attempts = 0;
        loop {
            match connection.iter().next() {
                Some(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                    info!("connected to relay broker at {}:{}", cfg.host, cfg.port);
                    break;
                }
                Some(Ok(event)) => trace!(?event, "pre-session relay event"),
                Some(Err(err)) => {
                    attempts += 1;
                    warn!(
                        "relay connect attempt {attempts}/{} failed: {err}",
                        cfg.connect_attempts
                    );
                    if attempts >= cfg.connect_attempts {
                        return Err(RelayError::Connect {
                            attempts,
                            detail: err.to_string(),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(500));
                }
                None => {
                    return Err(RelayError::Connect {
                        attempts,
                        detail: "event stream ended before session was established".into(),
                    });
                }
            }
        }

        let listener = RelayListener {
            client: client.clone(),
            connection,
            table: Vec::new(),
        };
        Ok((Self { client }, listener))
    }

    /// Graceful session teardown; failure is surfaced to the caller.
    pub fn disconnect(&self) -> Result<(), RelayError> {
        self.client.disconnect().map_err(RelayError::Disconnect)
    }
}

impl RelayPublisher for MqttRelay {
    fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), RelayError> {
        self.client
            .publish(channel, QoS::AtMostOnce, false, payload)
            .map_err(|source| RelayError::Publish {
                channel: channel.to_string(),
                source,
            })
    }
}

impl RelayListener {
    /// Register a handler for a channel. Handlers run on the listener
    /// thread as messages arrive and must not block.
    pub fn subscribe(&mut self, channel: &str, handler: ChannelHandler) -> Result<(), RelayError> {
        self.client
            .subscribe(channel, QoS::AtMostOnce)
            .map_err(|source| RelayError::Subscribe {
                channel: channel.to_string(),
                source,
            })?;
        self.table.push((channel.to_string(), handler));
        Ok(())
    }

    /// Drive the broker event loop, dispatching publishes to the
    /// subscription table until shutdown. Also flushes outgoing publishes
    /// queued by `MqttRelay`, so this must be running for the session to
    /// make progress.
    pub fn run(mut self, shutdown: &ShutdownFlag) {
        for event in self.connection.iter() {
            if shutdown.is_set() {
                break;
            }
            match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    dispatch(&mut self.table, &publish.topic, &publish.payload);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("relay connection error: {err}");
                    std::thread::sleep(Duration::from_millis(500));
                }
            }
        }
        debug!("relay listener exiting");
    }
}

fn dispatch(table: &mut [(String, ChannelHandler)], channel: &str, payload: &[u8]) {
    let mut matched = false;
    for (name, handler) in table.iter_mut() {
        if name == channel {
            handler(payload);
            matched = true;
        }
    }
    if !matched {
        trace!("no handler registered for channel '{channel}'");
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn dispatch_routes_by_channel() {
        let seen: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
        let make = |tag: &'static str, seen: &Arc<Mutex<Vec<(String, Vec<u8>)>>>| {
            let seen = Arc::clone(seen);
            Box::new(move |payload: &[u8]| {
                seen.lock().unwrap().push((tag.to_string(), payload.to_vec()));
            }) as ChannelHandler
        };
        let mut table = vec![
            ("stream/frames".to_string(), make("frames", &seen)),
            ("stream/telemetry".to_string(), make("telemetry", &seen)),
        ];

        dispatch(&mut table, "stream/telemetry", b"{}");
        dispatch(&mut table, "stream/frames", &[0xff, 0xd8]);
        dispatch(&mut table, "stream/unknown", b"ignored");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "telemetry");
        assert_eq!(seen[1], ("frames".to_string(), vec![0xff, 0xd8]));
    }

    #[test]
    fn connect_error_reports_attempts() {
        let err = RelayError::Connect {
            attempts: 5,
            detail: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "relay broker unreachable after 5 attempts: connection refused"
        );
    }
}
