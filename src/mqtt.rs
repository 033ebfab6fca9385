use anyhow::{Context, Result};
use rumqttc::{Client, ConnectionError, Event, MqttOptions, Packet, QoS};
use std::time::Duration;

/// Broker settings. A change of any of them between two config reloads
/// makes the daemon build a new [`MqttPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: String,
}

impl MqttConfig {
    const KEEP_ALIVE: Duration = Duration::from_secs(30);
    const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

    fn generate_random_string(len: usize) -> String {
        use rand::distributions::Alphanumeric;
        use rand::Rng;

        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    fn client_id() -> String {
        format!("axpert_monitor-{}", Self::generate_random_string(8))
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(Self::client_id(), &self.host, self.port);
        options.set_keep_alive(Self::KEEP_ALIVE);
        options.set_clean_session(true);
        if let Some(username) = &self.username {
            options.set_credentials(username, &self.password);
        }
        options
    }
}

pub struct MqttPublisher {
    client: Client,
    config: MqttConfig,
}

impl MqttPublisher {
    pub fn new(config: MqttConfig) -> Result<Self> {
        let options = config.options();
        log::info!(
            "Attempting to connect to MQTT broker: {}:{} with client_id: {}",
            config.host,
            config.port,
            options.client_id()
        );
        let (client, mut connection) = Client::new(options, 64);

        std::thread::Builder::new()
            .name("mqtt".into())
            .spawn(move || {
                for notification in connection.iter() {
                    match notification {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            log::info!("Connected to MQTT broker: {:?}", ack.code)
                        }
                        Ok(event) => log::trace!("MQTT event: {event:?}"),
                        Err(ConnectionError::RequestsDone) => break,
                        Err(err) => {
                            log::warn!("MQTT connection error: {err}");
                            std::thread::sleep(MqttConfig::RECONNECT_PAUSE);
                        }
                    }
                }
                log::debug!("MQTT event loop finished");
            })
            .with_context(|| "Cannot spawn MQTT event loop thread")?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// Queues one message. Never blocks the poll loop: a full request queue
    /// (broker unreachable) is reported as an error.
    pub fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        log::debug!("Publishing to MQTT: Topic='{topic}', Payload='{payload}', retain={retain}");
        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.as_bytes().to_vec())
            .with_context(|| format!("Failed to publish message to MQTT topic: {topic}"))?;
        Ok(())
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        if let Err(err) = self.client.try_disconnect() {
            log::debug!("MQTT disconnect: {err}");
        }
    }
}
