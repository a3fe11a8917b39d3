use log::{debug, error, info, warn};
use std::sync::Arc;

use crate::heartbeat::HeartbeatStore;
use crate::hub::{publish_best_effort, BroadcastHub, Topic};
use crate::record::{CaptureEnvelope, Protocol};
use crate::sink::RecordSink;
use crate::syslog::SyslogParser;

pub const SERVICE: &str = "syslog";

pub fn listen(
    host: &str,
    port: u16,
    sink: Arc<dyn RecordSink>,
    hub: Arc<dyn BroadcastHub>,
    heartbeats: Arc<HeartbeatStore>,
) -> std::io::Result<()> {
    let (socket, _heartbeat) = super::bind_with_heartbeat(SERVICE, host, port, hub.clone(), heartbeats)?;

    let parser = SyslogParser::new();
    let mut buf = [0; 8192];

    loop {
        let (received_bytes, from) = socket.recv_from(&mut buf)?;

        let line = match std::str::from_utf8(&buf[0..received_bytes]) {
            Ok(text) => text.trim(),
            Err(_) => {
                warn!("Could not decode syslog datagram from {}", from);
                continue;
            }
        };

        let record = match parser.parse(line) {
            Some(record) => record,
            None => {
                // unparseable lines are dropped, log only
                info!("Could not parse syslog message from {}: {}", from, line);
                continue;
            }
        };

        let persisted = match sink.persist_syslog(&record) {
            Ok(p) => p,
            Err(e) => {
                error!("could not persist syslog entry from {}: {}", from, e);
                continue;
            }
        };
        debug!("Received, saved (ID: {}) syslog packet from {}", persisted.id, from);

        // the live view names the sending peer, not the parsed hostname
        let envelope = CaptureEnvelope {
            id: persisted.id,
            timestamp: persisted.received_at,
            source: from.ip().to_string(),
            destination: None,
            protocol: Protocol::Syslog.label().to_string(),
            info: record.message.clone(),
        };
        match serde_json::to_string(&envelope) {
            Ok(payload) => publish_best_effort(hub.as_ref(), Topic::Syslog, &payload),
            Err(e) => warn!("could not serialize syslog envelope: {}", e),
        }
    }
}
