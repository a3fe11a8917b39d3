use chrono::{DateTime, Utc};
use serde_derive::Serialize;
use std::fmt;
use std::net::IpAddr;

/// Protocol tag attached to persisted records and broadcast envelopes.
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
pub enum Protocol {
    Syslog,
    Netflow,
    Netconsole,
    Snmp,
}

impl Protocol {
    pub fn label(&self) -> &'static str {
        match self {
            Protocol::Syslog => "SYSLOG",
            Protocol::Netflow => "NETFLOW/IPFIX",
            Protocol::Netconsole => "NETCONSOLE",
            Protocol::Snmp => "SNMP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One decoded NetFlow v9 / IPFIX data record. The identifying triple is
/// always present; everything else depends on which information elements the
/// active template carried.
#[derive(Debug, Clone, Serialize)]
pub struct FlowRecord {
    pub exporter: IpAddr,
    pub domain_id: u32,
    pub template_id: u16,
    pub flow_start: Option<DateTime<Utc>>,
    pub flow_end: Option<DateTime<Utc>>,
    pub src_ip: Option<String>,
    pub dst_ip: Option<String>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub protocol: Option<u8>,
    pub tos: Option<u8>,
    pub tcp_flags: Option<u8>,
    pub packets: Option<u64>,
    pub bytes: Option<u64>,
    pub input_if: Option<u32>,
    pub output_if: Option<u32>,
    pub vlan_in: Option<u16>,
    pub vlan_out: Option<u16>,
    pub next_hop: Option<String>,
    pub src_as: Option<u32>,
    pub dst_as: Option<u32>,
}

impl FlowRecord {
    pub fn new(exporter: IpAddr, domain_id: u32, template_id: u16) -> Self {
        FlowRecord {
            exporter,
            domain_id,
            template_id,
            flow_start: None,
            flow_end: None,
            src_ip: None,
            dst_ip: None,
            src_port: None,
            dst_port: None,
            protocol: None,
            tos: None,
            tcp_flags: None,
            packets: None,
            bytes: None,
            input_if: None,
            output_if: None,
            vlan_in: None,
            vlan_out: None,
            next_hop: None,
            src_as: None,
            dst_as: None,
        }
    }
}

/// Structured syslog line, produced by the first matcher in the parser chain
/// that accepts the raw text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyslogRecord {
    pub priority: Option<u16>,
    pub hostname: String,
    pub app_name: String,
    pub message: String,
    pub raw_message: String,
    pub timestamp: DateTime<Utc>,
}

/// Raw kernel message from a netconsole sender, passed through verbatim.
#[derive(Debug, Clone, Serialize)]
pub struct NetconsoleRecord {
    pub source: IpAddr,
    pub message: String,
    pub raw_message: String,
}

/// Receipt of an SNMP trap. The trap engine does not surface the negotiated
/// protocol version at the callback site, so `version` is always "v2c".
#[derive(Debug, Clone, Serialize)]
pub struct TrapRecord {
    pub source: IpAddr,
    pub version: String,
    pub community: String,
    pub trap_oid: Option<String>,
    pub var_binds: Vec<u8>,
}

/// The one shape handed to the broadcast hub and to external callers,
/// whatever the protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureEnvelope {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub protocol: String,
    pub info: String,
}

impl CaptureEnvelope {
    pub fn describe(id: u64, timestamp: DateTime<Utc>, protocol: Protocol, record: &dyn Describe) -> Self {
        CaptureEnvelope {
            id,
            timestamp,
            source: record.source(),
            destination: record.destination(),
            protocol: protocol.label().to_string(),
            info: record.info(),
        }
    }
}

/// How a record presents itself inside a [`CaptureEnvelope`].
pub trait Describe {
    fn source(&self) -> String;
    fn destination(&self) -> Option<String> {
        None
    }
    fn info(&self) -> String;
}

impl Describe for FlowRecord {
    fn source(&self) -> String {
        endpoint(&self.src_ip, self.src_port)
    }

    fn destination(&self) -> Option<String> {
        Some(endpoint(&self.dst_ip, self.dst_port))
    }

    fn info(&self) -> String {
        format!("Bytes: {} | Packets: {}", self.bytes.unwrap_or(0), self.packets.unwrap_or(0))
    }
}

fn endpoint(ip: &Option<String>, port: Option<u16>) -> String {
    let ip = ip.as_deref().unwrap_or("N/A");
    match port {
        Some(p) => format!("{}:{}", ip, p),
        None => format!("{}:N/A", ip),
    }
}

impl Describe for SyslogRecord {
    fn source(&self) -> String {
        self.hostname.clone()
    }

    fn info(&self) -> String {
        self.message.clone()
    }
}

impl Describe for NetconsoleRecord {
    fn source(&self) -> String {
        self.source.to_string()
    }

    fn info(&self) -> String {
        self.message.clone()
    }
}

impl Describe for TrapRecord {
    fn source(&self) -> String {
        self.source.to_string()
    }

    fn info(&self) -> String {
        match &self.trap_oid {
            Some(oid) => format!("community={} oid={}", self.community, oid),
            None => format!("community={} var_binds={} bytes", self.community, self.var_binds.len()),
        }
    }
}

/// Periodic liveness announcement written by each listener, independent of
/// whether any datagrams arrived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heartbeat {
    pub service: String,
    pub at: DateTime<Utc>,
    pub pid: u32,
    pub port: u16,
}
