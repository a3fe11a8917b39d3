use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;
use thiserror::Error;

/// Broadcast groups live viewers subscribe to.
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
pub enum Topic {
    Syslog,
    Netflow,
    Netconsole,
    Snmp,
    Status,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Syslog => "syslog",
            Topic::Netflow => "netflow",
            Topic::Netconsole => "netconsole",
            Topic::Snmp => "snmp",
            Topic::Status => "status",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("broadcast hub unavailable: {0}")]
    Unavailable(String),
}

/// Group-based publish side of the hub. Delivery is best-effort; telemetry
/// fan-out is not a correctness path.
pub trait BroadcastHub: Send + Sync {
    fn publish(&self, topic: Topic, payload: &str) -> Result<(), HubError>;
}

/// Publish and swallow. Listeners must never die because a viewer went away,
/// so the failure path is a debug log and nothing else.
pub fn publish_best_effort(hub: &dyn BroadcastHub, topic: Topic, payload: &str) {
    if let Err(e) = hub.publish(topic, payload) {
        debug!("dropping {} broadcast: {}", topic, e);
    }
}

/// Channel-backed hub: every subscriber owns the receiving half of an mpsc
/// channel, publishes clone the payload into each one. Subscribers that hung
/// up are pruned on the next publish.
pub struct ChannelHub {
    groups: Mutex<HashMap<Topic, Vec<Sender<String>>>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        ChannelHub {
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, topic: Topic) -> Receiver<String> {
        let (sender, receiver) = channel();
        if let Ok(mut groups) = self.groups.lock() {
            groups.entry(topic).or_insert_with(Vec::new).push(sender);
        }
        receiver
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        ChannelHub::new()
    }
}

impl BroadcastHub for ChannelHub {
    fn publish(&self, topic: Topic, payload: &str) -> Result<(), HubError> {
        let mut groups = self.groups.lock().map_err(|e| HubError::Unavailable(e.to_string()))?;
        if let Some(subscribers) = groups.get_mut(&topic) {
            subscribers.retain(|s| s.send(payload.to_string()).is_ok());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn subscribers_receive_published_payloads() {
        let hub = ChannelHub::new();
        let syslog = hub.subscribe(Topic::Syslog);
        let netflow = hub.subscribe(Topic::Netflow);

        hub.publish(Topic::Syslog, "line one").unwrap();
        hub.publish(Topic::Syslog, "line two").unwrap();

        assert_eq!(syslog.try_recv().unwrap(), "line one");
        assert_eq!(syslog.try_recv().unwrap(), "line two");
        assert!(netflow.try_recv().is_err());
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let hub = ChannelHub::new();
        assert!(hub.publish(Topic::Status, "{}").is_ok());
    }

    #[test]
    fn dropped_subscriber_does_not_fail_publish() {
        let hub = ChannelHub::new();
        let gone = hub.subscribe(Topic::Netconsole);
        let kept = hub.subscribe(Topic::Netconsole);
        drop(gone);

        assert!(hub.publish(Topic::Netconsole, "still here").is_ok());
        assert_eq!(kept.try_recv().unwrap(), "still here");
    }
}
