use log::{debug, error, warn};
use std::sync::Arc;

use crate::heartbeat::HeartbeatStore;
use crate::hub::{publish_best_effort, BroadcastHub, Topic};
use crate::record::{CaptureEnvelope, NetconsoleRecord, Protocol};
use crate::sink::RecordSink;

pub const SERVICE: &str = "netconsole";

/// Netconsole carries raw kernel text; no structured parsing, the message is
/// passed through verbatim.
pub fn listen(
    host: &str,
    port: u16,
    sink: Arc<dyn RecordSink>,
    hub: Arc<dyn BroadcastHub>,
    heartbeats: Arc<HeartbeatStore>,
) -> std::io::Result<()> {
    let (socket, _heartbeat) = super::bind_with_heartbeat(SERVICE, host, port, hub.clone(), heartbeats)?;

    let mut buf = [0; 8192];

    loop {
        let (received_bytes, from) = socket.recv_from(&mut buf)?;

        let message = String::from_utf8_lossy(&buf[0..received_bytes]).trim().to_string();
        let record = NetconsoleRecord {
            source: from.ip(),
            raw_message: message.clone(),
            message,
        };

        let persisted = match sink.persist_netconsole(&record) {
            Ok(p) => p,
            Err(e) => {
                error!("could not persist netconsole entry from {}: {}", from, e);
                continue;
            }
        };
        debug!("Received, saved (ID: {}) netconsole packet from {}", persisted.id, from);

        let envelope = CaptureEnvelope::describe(persisted.id, persisted.received_at, Protocol::Netconsole, &record);
        match serde_json::to_string(&envelope) {
            Ok(payload) => publish_best_effort(hub.as_ref(), Topic::Netconsole, &payload),
            Err(e) => warn!("could not serialize netconsole envelope: {}", e),
        }
    }
}
