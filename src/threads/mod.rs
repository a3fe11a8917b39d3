pub mod netconsole;
pub mod netflow;
pub mod snmp;
pub mod syslog;

use log::{error, info};
use std::net::UdpSocket;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use crate::heartbeat::{self, EmitterGuard, HeartbeatStore};
use crate::hub::BroadcastHub;

/// Binds the listener socket and starts its heartbeat emitter. The serve
/// loop keeps the returned guard; when it exits, for any reason, the emitter
/// stops and the service goes stale. A bind failure (port in use, missing
/// privileges) is fatal for this listener only and is reported by the
/// caller.
pub fn bind_with_heartbeat(
    service: &'static str,
    host: &str,
    port: u16,
    hub: Arc<dyn BroadcastHub>,
    heartbeats: Arc<HeartbeatStore>,
) -> std::io::Result<(UdpSocket, EmitterGuard)> {
    let socket = UdpSocket::bind((host, port))?;
    let bound_port = socket.local_addr()?.port();
    info!("Listening for {} on {}:{}", service, host, bound_port);

    let stop = Arc::new(AtomicBool::new(false));
    let emitter_stop = stop.clone();
    let spawned = thread::Builder::new().name(format!("{}-heartbeat", service)).spawn(move || {
        heartbeat::emit(service, bound_port, &heartbeats, hub.as_ref(), &emitter_stop);
    });
    if let Err(e) = spawned {
        error!("could not start {} heartbeat emitter: {}", service, e);
    }

    Ok((socket, EmitterGuard::new(stop)))
}
