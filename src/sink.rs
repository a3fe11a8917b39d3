use chrono::{DateTime, Duration, Timelike, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

use crate::record::{CaptureEnvelope, Describe, FlowRecord, NetconsoleRecord, Protocol, SyslogRecord, TrapRecord};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// Receipt returned by the store: the assigned identifier and the server-side
/// arrival time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Persisted {
    pub id: u64,
    pub received_at: DateTime<Utc>,
}

/// Per-minute record counts, one bucket per "HH:MM" label.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct MinuteVolume {
    pub syslog: u64,
    pub netflow: u64,
    pub netconsole: u64,
    pub snmp: u64,
}

/// The persistence contract the listeners write through. Identifiers are
/// unique and monotonically non-decreasing per protocol table.
pub trait RecordSink: Send + Sync {
    fn persist_flow(&self, record: &FlowRecord) -> Result<Persisted, SinkError>;
    fn persist_syslog(&self, record: &SyslogRecord) -> Result<Persisted, SinkError>;
    fn persist_netconsole(&self, record: &NetconsoleRecord) -> Result<Persisted, SinkError>;
    fn persist_trap(&self, record: &TrapRecord) -> Result<Persisted, SinkError>;

    /// Newest-first envelopes for one protocol table; callers cap `limit`
    /// at 200.
    fn recent(&self, protocol: Protocol, limit: usize) -> Vec<CaptureEnvelope>;

    /// Per-minute counts over a trailing window, every minute prefilled.
    fn volume_by_minute(&self, window: Duration) -> BTreeMap<String, MinuteVolume>;
}

struct Row<T> {
    id: u64,
    received_at: DateTime<Utc>,
    record: T,
}

struct Table<T> {
    rows: Mutex<Vec<Row<T>>>,
    next_id: AtomicU64,
}

impl<T: Clone + Describe> Table<T> {
    fn new() -> Self {
        Table {
            rows: Mutex::new(vec![]),
            next_id: AtomicU64::new(1),
        }
    }

    fn persist(&self, record: &T) -> Result<Persisted, SinkError> {
        let mut rows = self.rows.lock().map_err(|e| SinkError::Unavailable(e.to_string()))?;
        let receipt = Persisted {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            received_at: Utc::now(),
        };
        rows.push(Row {
            id: receipt.id,
            received_at: receipt.received_at,
            record: record.clone(),
        });
        Ok(receipt)
    }

    fn recent(&self, protocol: Protocol, limit: usize) -> Vec<CaptureEnvelope> {
        match self.rows.lock() {
            Ok(rows) => rows
                .iter()
                .rev()
                .take(limit)
                .map(|row| CaptureEnvelope::describe(row.id, row.received_at, protocol, &row.record))
                .collect(),
            Err(_) => vec![],
        }
    }

    fn count_into(&self, buckets: &mut BTreeMap<String, MinuteVolume>, start: DateTime<Utc>, bump: fn(&mut MinuteVolume)) {
        if let Ok(rows) = self.rows.lock() {
            for row in rows.iter().filter(|r| r.received_at >= start) {
                let label = row.received_at.format("%H:%M").to_string();
                if let Some(bucket) = buckets.get_mut(&label) {
                    bump(bucket);
                }
            }
        }
    }
}

/// In-memory reference implementation of the sink contract. Each table keeps
/// its own id counter so listener instances never interfere through a
/// process-wide global.
pub struct MemorySink {
    syslog: Table<SyslogRecord>,
    netflow: Table<FlowRecord>,
    netconsole: Table<NetconsoleRecord>,
    snmp: Table<TrapRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink {
            syslog: Table::new(),
            netflow: Table::new(),
            netconsole: Table::new(),
            snmp: Table::new(),
        }
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        MemorySink::new()
    }
}

impl RecordSink for MemorySink {
    fn persist_flow(&self, record: &FlowRecord) -> Result<Persisted, SinkError> {
        self.netflow.persist(record)
    }

    fn persist_syslog(&self, record: &SyslogRecord) -> Result<Persisted, SinkError> {
        self.syslog.persist(record)
    }

    fn persist_netconsole(&self, record: &NetconsoleRecord) -> Result<Persisted, SinkError> {
        self.netconsole.persist(record)
    }

    fn persist_trap(&self, record: &TrapRecord) -> Result<Persisted, SinkError> {
        self.snmp.persist(record)
    }

    fn recent(&self, protocol: Protocol, limit: usize) -> Vec<CaptureEnvelope> {
        match protocol {
            Protocol::Syslog => self.syslog.recent(protocol, limit),
            Protocol::Netflow => self.netflow.recent(protocol, limit),
            Protocol::Netconsole => self.netconsole.recent(protocol, limit),
            Protocol::Snmp => self.snmp.recent(protocol, limit),
        }
    }

    fn volume_by_minute(&self, window: Duration) -> BTreeMap<String, MinuteVolume> {
        let now = Utc::now();
        let start = now - window;

        let mut buckets = BTreeMap::new();
        let mut tick = start.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(start);
        while tick <= now {
            buckets.insert(tick.format("%H:%M").to_string(), MinuteVolume::default());
            tick = tick + Duration::minutes(1);
        }

        self.syslog.count_into(&mut buckets, start, |b| b.syslog += 1);
        self.netflow.count_into(&mut buckets, start, |b| b.netflow += 1);
        self.netconsole.count_into(&mut buckets, start, |b| b.netconsole += 1);
        self.snmp.count_into(&mut buckets, start, |b| b.snmp += 1);

        buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::IpAddr;

    fn flow(bytes: u64) -> FlowRecord {
        let mut record = FlowRecord::new(IpAddr::from([10, 0, 0, 1]), 0, 256);
        record.bytes = Some(bytes);
        record.packets = Some(1);
        record
    }

    fn netconsole(message: &str) -> NetconsoleRecord {
        NetconsoleRecord {
            source: IpAddr::from([10, 0, 0, 2]),
            message: message.to_string(),
            raw_message: message.to_string(),
        }
    }

    #[test]
    fn ids_are_monotonic_per_table() {
        let sink = MemorySink::new();

        let first = sink.persist_flow(&flow(1)).unwrap();
        let second = sink.persist_flow(&flow(2)).unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        // a different table starts its own sequence
        let other = sink.persist_netconsole(&netconsole("boot")).unwrap();
        assert_eq!(other.id, 1);
    }

    #[test]
    fn recent_returns_newest_first_capped() {
        let sink = MemorySink::new();
        for n in 1..=5 {
            sink.persist_netconsole(&netconsole(&format!("line {}", n))).unwrap();
        }

        let recent = sink.recent(Protocol::Netconsole, 3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].info, "line 5");
        assert_eq!(recent[2].info, "line 3");
        assert_eq!(recent[0].protocol, "NETCONSOLE");
    }

    #[test]
    fn flow_envelope_carries_endpoints_and_counters() {
        let sink = MemorySink::new();
        let mut record = flow(4714);
        record.src_ip = Some("195.5.237.90".to_string());
        record.src_port = Some(61528);
        record.dst_ip = Some("52.113.145.222".to_string());
        record.dst_port = Some(3480);
        record.packets = Some(37);
        sink.persist_flow(&record).unwrap();

        let recent = sink.recent(Protocol::Netflow, 200);
        assert_eq!(recent[0].source, "195.5.237.90:61528");
        assert_eq!(recent[0].destination.as_deref(), Some("52.113.145.222:3480"));
        assert_eq!(recent[0].info, "Bytes: 4714 | Packets: 37");
    }

    #[test]
    fn volume_counts_land_in_the_current_minute() {
        let sink = MemorySink::new();
        sink.persist_flow(&flow(1)).unwrap();
        sink.persist_flow(&flow(2)).unwrap();
        sink.persist_netconsole(&netconsole("x")).unwrap();

        let volume = sink.volume_by_minute(Duration::hours(24));
        let netflow: u64 = volume.values().map(|b| b.netflow).sum();
        let netconsole_total: u64 = volume.values().map(|b| b.netconsole).sum();
        let syslog: u64 = volume.values().map(|b| b.syslog).sum();
        assert_eq!(netflow, 2);
        assert_eq!(netconsole_total, 1);
        assert_eq!(syslog, 0);
    }
}
