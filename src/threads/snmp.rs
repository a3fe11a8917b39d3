use log::{debug, error, warn};
use std::sync::Arc;

use crate::heartbeat::HeartbeatStore;
use crate::hub::{publish_best_effort, BroadcastHub, Topic};
use crate::record::{CaptureEnvelope, Protocol, TrapRecord};
use crate::sink::RecordSink;

pub const SERVICE: &str = "snmp";

/// The transport layer does not surface the negotiated SNMP version at this
/// point, so every trap is recorded as v2c.
const REPORTED_VERSION: &str = "v2c";

/// SNMP trap receiver, specified at the interface level: it records receipt
/// metadata and the raw var-binds payload for every trap datagram. The trap
/// port is privileged on most systems, so a failed bind falls back once to
/// the unprivileged alternative before giving up.
pub fn listen(
    host: &str,
    port: u16,
    fallback_port: u16,
    community: &str,
    sink: Arc<dyn RecordSink>,
    hub: Arc<dyn BroadcastHub>,
    heartbeats: Arc<HeartbeatStore>,
) -> std::io::Result<()> {
    let (socket, _heartbeat) = match super::bind_with_heartbeat(SERVICE, host, port, hub.clone(), heartbeats.clone()) {
        Ok(bound) => bound,
        Err(e) => {
            warn!("Could not bind UDP/{} ({}); falling back to UDP/{}", port, e, fallback_port);
            super::bind_with_heartbeat(SERVICE, host, fallback_port, hub.clone(), heartbeats)?
        }
    };

    let mut buf = [0; 65535];

    loop {
        let (received_bytes, from) = socket.recv_from(&mut buf)?;

        let record = TrapRecord {
            source: from.ip(),
            version: REPORTED_VERSION.to_string(),
            community: community.to_string(),
            trap_oid: None,
            var_binds: buf[0..received_bytes].to_vec(),
        };

        let persisted = match sink.persist_trap(&record) {
            Ok(p) => p,
            Err(e) => {
                error!("could not persist trap from {}: {}", from, e);
                continue;
            }
        };
        debug!("Received, saved (ID: {}) trap from {}", persisted.id, from);

        let envelope = CaptureEnvelope::describe(persisted.id, persisted.received_at, Protocol::Snmp, &record);
        match serde_json::to_string(&envelope) {
            Ok(payload) => publish_best_effort(hub.as_ref(), Topic::Snmp, &payload),
            Err(e) => warn!("could not serialize trap envelope: {}", e),
        }
    }
}
