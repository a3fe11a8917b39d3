use log::{debug, error, warn};
use std::sync::Arc;

use crate::flow::{self, TemplateCache};
use crate::heartbeat::HeartbeatStore;
use crate::hub::{publish_best_effort, BroadcastHub, Topic};
use crate::record::{CaptureEnvelope, Protocol};
use crate::sink::RecordSink;

pub const SERVICE: &str = "netflow";

/// Blocking NetFlow v9 / IPFIX receive loop. The template cache is owned
/// here and nowhere else; the loop is serial per datagram, so it needs no
/// locking.
pub fn listen(
    host: &str,
    port: u16,
    sink: Arc<dyn RecordSink>,
    hub: Arc<dyn BroadcastHub>,
    heartbeats: Arc<HeartbeatStore>,
) -> std::io::Result<()> {
    let (socket, _heartbeat) = super::bind_with_heartbeat(SERVICE, host, port, hub.clone(), heartbeats)?;

    let mut buf = [0; 65535];
    let mut cache = TemplateCache::new();

    loop {
        let (received_bytes, from) = socket.recv_from(&mut buf)?;
        debug!("Received {} bytes from {}", received_bytes, from);

        let decoded = flow::decode(&buf[0..received_bytes], from.ip(), &mut cache);
        for note in &decoded.notes {
            debug!("decode note from {}: {}", from, note);
        }

        for record in &decoded.records {
            let persisted = match sink.persist_flow(record) {
                Ok(p) => p,
                Err(e) => {
                    // no partial state goes out: a record that was not
                    // persisted is not broadcast either
                    error!("could not persist flow from {}: {}", from, e);
                    continue;
                }
            };

            let envelope = CaptureEnvelope::describe(persisted.id, persisted.received_at, Protocol::Netflow, record);
            match serde_json::to_string(&envelope) {
                Ok(payload) => publish_best_effort(hub.as_ref(), Topic::Netflow, &payload),
                Err(e) => warn!("could not serialize flow envelope: {}", e),
            }
        }
    }
}
