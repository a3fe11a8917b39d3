use log::{error, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use structopt::StructOpt;

mod flow;
mod heartbeat;
mod hub;
mod record;
mod sink;
mod syslog;
mod threads;
mod utils;

use crate::heartbeat::HeartbeatStore;
use crate::hub::{BroadcastHub, ChannelHub};
use crate::sink::{MemorySink, RecordSink};

#[derive(Debug, StructOpt)]
#[structopt(name = "telecap", about = "Multi-protocol UDP telemetry capture")]
struct Opt {
    /// Configuration file overriding the built-in defaults
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Restrict the run to the named listeners (repeatable); default is all
    #[structopt(short, long, possible_values = &["syslog", "netflow", "netconsole", "snmp"])]
    service: Vec<String>,
}

/// An empty filter runs everything; otherwise only the named listeners start.
fn enabled(filter: &[String], service: &str) -> bool {
    filter.is_empty() || filter.iter().any(|s| s == service)
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub enum ThreadType {
    Syslog,
    Netflow,
    Netconsole,
    Snmp,
}

fn main() {
    let opt = Opt::from_args();

    // read config from file
    let config = utils::Settings::init(opt.config).unwrap();

    // init the env logger
    utils::init_logger(&config.log.level);

    warn!{"Starting TELECAP"}

    let sink: Arc<dyn RecordSink> = Arc::new(MemorySink::new());
    let hub: Arc<dyn BroadcastHub> = Arc::new(ChannelHub::new());
    let heartbeats = Arc::new(HeartbeatStore::new());

    let mut thread_maps: HashMap<ThreadType, _> = HashMap::new();

    if enabled(&opt.service, threads::syslog::SERVICE) {
        let listener = config.syslog.clone();
        let (sink, hub, heartbeats) = (sink.clone(), hub.clone(), heartbeats.clone());
        thread_maps.insert(ThreadType::Syslog, thread::Builder::new().name("UDP-syslog".to_string()).spawn(move || {
            if let Err(e) = threads::syslog::listen(&listener.host, listener.port, sink, hub, heartbeats) {
                error!("syslog listener stopped: {}", e);
            }
        }));
    }

    if enabled(&opt.service, threads::netflow::SERVICE) {
        let listener = config.netflow.clone();
        let (sink, hub, heartbeats) = (sink.clone(), hub.clone(), heartbeats.clone());
        thread_maps.insert(ThreadType::Netflow, thread::Builder::new().name("UDP-netflow".to_string()).spawn(move || {
            if let Err(e) = threads::netflow::listen(&listener.host, listener.port, sink, hub, heartbeats) {
                error!("netflow listener stopped: {}", e);
            }
        }));
    }

    if enabled(&opt.service, threads::netconsole::SERVICE) {
        let listener = config.netconsole.clone();
        let (sink, hub, heartbeats) = (sink.clone(), hub.clone(), heartbeats.clone());
        thread_maps.insert(ThreadType::Netconsole, thread::Builder::new().name("UDP-netconsole".to_string()).spawn(move || {
            if let Err(e) = threads::netconsole::listen(&listener.host, listener.port, sink, hub, heartbeats) {
                error!("netconsole listener stopped: {}", e);
            }
        }));
    }

    if enabled(&opt.service, threads::snmp::SERVICE) {
        let snmp = config.snmp.clone();
        let (sink, hub, heartbeats) = (sink.clone(), hub.clone(), heartbeats.clone());
        thread_maps.insert(ThreadType::Snmp, thread::Builder::new().name("UDP-snmp".to_string()).spawn(move || {
            if let Err(e) = threads::snmp::listen(
                &snmp.host,
                snmp.port,
                snmp.fallback_port,
                &snmp.community,
                sink,
                hub,
                heartbeats,
            ) {
                error!("snmp listener stopped: {}", e);
            }
        }));
    }

    for (_, v) in thread_maps {
        v.unwrap().join().unwrap();
    }

    info!{"Closing TELECAP"}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_service_filter_runs_everything() {
        assert!(enabled(&[], "syslog"));
        assert!(enabled(&[], "netflow"));
        assert!(enabled(&[], "netconsole"));
        assert!(enabled(&[], "snmp"));
    }

    #[test]
    fn service_filter_selects_only_the_named_listeners() {
        let filter = vec!["netflow".to_string(), "snmp".to_string()];
        assert!(enabled(&filter, "netflow"));
        assert!(enabled(&filter, "snmp"));
        assert!(!enabled(&filter, "syslog"));
        assert!(!enabled(&filter, "netconsole"));
    }
}
