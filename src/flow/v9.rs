use chrono::{DateTime, Duration, TimeZone, Utc};
use core::convert::TryInto;
use num_traits::FromPrimitive;
use std::net::IpAddr;

use super::{fields, fields::V9Field, Decoded, SetHeader, TemplateCache, TemplateField, TemplateKey, DATA_SET_MIN_ID};

pub const VERSION: u16 = 9;

pub const TEMPLATE_SET_ID: u16 = 0;
pub const OPTIONS_TEMPLATE_SET_ID: u16 = 1;

/// NetFlow v9 export packet header.
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |       Version Number          |            Count              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           sysUpTime                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           UNIX Secs                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        Sequence Number                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Source ID                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug)]
pub struct Header {
    pub version: u16,
    pub count: u16,      // number of records exported in this packet
    pub sys_uptime: u32, // milliseconds since the exporter booted
    pub unix_secs: u32,  // wall-clock anchor for the relative switch times
    pub seq_number: u32,
    pub source_id: u32, // exporter-scoped observation domain
}

impl Header {
    pub const SIZE: usize = 20;

    pub fn read(buf: &[u8]) -> Result<Self, String> {
        if buf.len() < Self::SIZE {
            return Err(format!("Not enough space in buffer to read the v9 Header, required {} but received {}", Self::SIZE, buf.len()));
        }

        Ok(Header {
            version: u16::from_be_bytes(buf[0..2].try_into().unwrap()),
            count: u16::from_be_bytes(buf[2..4].try_into().unwrap()),
            sys_uptime: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            unix_secs: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            seq_number: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
            source_id: u32::from_be_bytes(buf[16..20].try_into().unwrap()),
        })
    }
}

pub fn parse(buf: &[u8], exporter: IpAddr, cache: &mut TemplateCache) -> Decoded {
    let mut out = Decoded::default();

    let header = match Header::read(buf) {
        Ok(h) => h,
        Err(_) => {
            out.notes.push("v9_header_too_short".to_string());
            return out;
        }
    };
    let export_time = Utc.timestamp_opt(header.unix_secs as i64, 0).single();

    let mut offset = Header::SIZE;

    while offset + SetHeader::SIZE <= buf.len() {
        let set = match SetHeader::read(&buf[offset..]) {
            Ok(s) => s,
            Err(_) => break,
        };
        let set_end = offset + set.length as usize;
        if (set.length as usize) < SetHeader::SIZE || set_end > buf.len() {
            out.notes.push("v9_bad_set_len".to_string());
            break;
        }
        let mut cursor = offset + SetHeader::SIZE;

        if set.id == TEMPLATE_SET_ID {
            while cursor + 4 <= set_end {
                let template_id = u16::from_be_bytes(buf[cursor..cursor + 2].try_into().unwrap());
                let field_count = u16::from_be_bytes(buf[cursor + 2..cursor + 4].try_into().unwrap());
                cursor += 4;

                let mut template = Vec::with_capacity(field_count as usize);
                for _ in 0..field_count {
                    if cursor + 4 > set_end {
                        break;
                    }
                    template.push(TemplateField {
                        id: u16::from_be_bytes(buf[cursor..cursor + 2].try_into().unwrap()),
                        length: u16::from_be_bytes(buf[cursor + 2..cursor + 4].try_into().unwrap()),
                    });
                    cursor += 4;
                }

                cache.put_v9(TemplateKey { exporter, domain_id: header.source_id, template_id }, template);
            }
            out.notes.push("v9_template_seen".to_string());
        } else if set.id == OPTIONS_TEMPLATE_SET_ID {
            out.notes.push("v9_options_ignored".to_string());
        } else if set.id >= DATA_SET_MIN_ID {
            let key = TemplateKey { exporter, domain_id: header.source_id, template_id: set.id };
            match cache.get_v9(&key) {
                None => out.notes.push(format!("v9_data_without_template_{}", set.id)),
                Some(template) => {
                    let stride: usize = template.iter().map(|f| f.length as usize).sum();
                    if stride > 0 {
                        let mut record_start = cursor;
                        while record_start + stride <= set_end {
                            out.records.push(decode_record(&buf[record_start..record_start + stride], template, &header, export_time, exporter, set.id));
                            record_start += stride;
                        }
                    }
                }
            }
        }

        // the declared set length drives the outer walk, whatever the inner
        // loops actually consumed
        offset = set_end;
    }

    out
}

fn decode_record(
    buf: &[u8],
    template: &[TemplateField],
    header: &Header,
    export_time: Option<DateTime<Utc>>,
    exporter: IpAddr,
    template_id: u16,
) -> crate::record::FlowRecord {
    let mut record = crate::record::FlowRecord::new(exporter, header.source_id, template_id);
    let mut first_switched = None;
    let mut last_switched = None;

    let mut offset = 0;
    for field in template {
        let value = &buf[offset..offset + field.length as usize];
        offset += field.length as usize;

        let kind = match V9Field::from_u16(field.id) {
            Some(kind) => kind,
            None => continue, // consume and discard unrecognized elements
        };

        match kind {
            V9Field::SourceAddress => record.src_ip = fields::read_address(value).map(|a| a.to_string()),
            V9Field::DestinationAddress => record.dst_ip = fields::read_address(value).map(|a| a.to_string()),
            V9Field::IpNextHopAddress => record.next_hop = fields::read_address(value).map(|a| a.to_string()),
            V9Field::SourceTransportPort => record.src_port = fields::read_unsigned(value).map(|v| v as u16),
            V9Field::DestinationTransportPort => record.dst_port = fields::read_unsigned(value).map(|v| v as u16),
            V9Field::ProtocolIdentifier => record.protocol = fields::read_unsigned(value).map(|v| v as u8),
            V9Field::IpClassOfService => record.tos = fields::read_unsigned(value).map(|v| v as u8),
            V9Field::TcpControlBits => record.tcp_flags = fields::read_unsigned(value).map(|v| v as u8),
            V9Field::OctetDeltaCount => record.bytes = fields::read_unsigned(value),
            V9Field::PacketDeltaCount => record.packets = fields::read_unsigned(value),
            V9Field::IngressInterface => record.input_if = fields::read_unsigned(value).map(|v| v as u32),
            V9Field::EgressInterface => record.output_if = fields::read_unsigned(value).map(|v| v as u32),
            V9Field::BgpSourceAsNumber => record.src_as = fields::read_unsigned(value).map(|v| v as u32),
            V9Field::BgpDestinationAsNumber => record.dst_as = fields::read_unsigned(value).map(|v| v as u32),
            V9Field::IngressVlanId => record.vlan_in = fields::read_unsigned(value).map(|v| v as u16),
            V9Field::EgressVlanId => record.vlan_out = fields::read_unsigned(value).map(|v| v as u16),
            V9Field::FirstSwitched => first_switched = fields::read_unsigned(value),
            V9Field::LastSwitched => last_switched = fields::read_unsigned(value),
        }
    }

    record.flow_start = absolute_time(export_time, header.sys_uptime, first_switched);
    record.flow_end = absolute_time(export_time, header.sys_uptime, last_switched);
    record
}

/// FirstSwitched/LastSwitched carry milliseconds since exporter boot; anchor
/// them against the export wall clock and sysUpTime.
fn absolute_time(export_time: Option<DateTime<Utc>>, sys_uptime_ms: u32, switched_ms: Option<u64>) -> Option<DateTime<Utc>> {
    let export_time = export_time?;
    let switched_ms = switched_ms?;
    let delta_ms = sys_uptime_ms as i64 - switched_ms as i64;
    Some(export_time - Duration::milliseconds(delta_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{decode, TemplateCache};
    use pretty_assertions::assert_eq;

    const EXPORT_SECS: u32 = 1620000000;
    const SYS_UPTIME_MS: u32 = 600000;

    fn exporter(last: u8) -> IpAddr {
        IpAddr::from([192, 168, 0, last])
    }

    fn packet(source_id: u32, sets: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = vec![];
        buf.extend_from_slice(&VERSION.to_be_bytes());
        buf.extend_from_slice(&(sets.len() as u16).to_be_bytes());
        buf.extend_from_slice(&SYS_UPTIME_MS.to_be_bytes());
        buf.extend_from_slice(&EXPORT_SECS.to_be_bytes());
        buf.extend_from_slice(&7u32.to_be_bytes()); // sequence, unused
        buf.extend_from_slice(&source_id.to_be_bytes());
        for set in sets {
            buf.extend_from_slice(set);
        }
        buf
    }

    fn set(id: u16, body: &[u8]) -> Vec<u8> {
        let mut buf = vec![];
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&((body.len() + SetHeader::SIZE) as u16).to_be_bytes());
        buf.extend_from_slice(body);
        buf
    }

    fn template_set(template_id: u16, fields: &[(u16, u16)]) -> Vec<u8> {
        let mut body = vec![];
        body.extend_from_slice(&template_id.to_be_bytes());
        body.extend_from_slice(&(fields.len() as u16).to_be_bytes());
        for (id, length) in fields {
            body.extend_from_slice(&id.to_be_bytes());
            body.extend_from_slice(&length.to_be_bytes());
        }
        set(TEMPLATE_SET_ID, &body)
    }

    #[test]
    fn read_header() {
        let buf = packet(42, &[]);
        let header = Header::read(&buf).unwrap();

        assert_eq!(header.version, VERSION);
        assert_eq!(header.count, 0);
        assert_eq!(header.sys_uptime, SYS_UPTIME_MS);
        assert_eq!(header.unix_secs, EXPORT_SECS);
        assert_eq!(header.source_id, 42);
    }

    #[test]
    fn read_truncated_header() {
        let buf = packet(42, &[]);
        assert!(Header::read(&buf[0..Header::SIZE - 1]).is_err());
    }

    #[test]
    fn template_then_data_round_trip() {
        let mut cache = TemplateCache::new();
        // one template with a single 4-byte byte-count field, one data set
        // with one record holding a known value
        let tpl = template_set(256, &[(1, 4)]);
        let data = set(256, &4714u32.to_be_bytes());

        let out = decode(&packet(0, &[tpl, data]), exporter(1), &mut cache);

        assert_eq!(out.notes, vec!["v9_template_seen".to_string()]);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].bytes, Some(4714));
        assert_eq!(out.records[0].template_id, 256);
        assert_eq!(out.records[0].domain_id, 0);
        assert_eq!(out.records[0].exporter, exporter(1));
    }

    #[test]
    fn full_template_decodes_every_recognized_field() {
        let mut cache = TemplateCache::new();
        let tpl = template_set(
            260,
            &[(8, 4), (12, 4), (7, 2), (11, 2), (4, 1), (5, 1), (6, 1), (2, 4), (1, 4), (10, 2), (14, 2), (55, 2), (56, 2), (9, 4), (15, 2), (16, 2), (22, 4), (21, 4)],
        );

        let mut body = vec![];
        body.extend_from_slice(&[10, 1, 1, 1]); // src_ip
        body.extend_from_slice(&[10, 2, 2, 2]); // dst_ip
        body.extend_from_slice(&51000u16.to_be_bytes());
        body.extend_from_slice(&443u16.to_be_bytes());
        body.push(6); // tcp
        body.push(0x10); // tos
        body.push(0x18); // flags
        body.extend_from_slice(&37u32.to_be_bytes()); // packets
        body.extend_from_slice(&4714u32.to_be_bytes()); // bytes
        body.extend_from_slice(&2u16.to_be_bytes()); // input_if
        body.extend_from_slice(&3u16.to_be_bytes()); // output_if
        body.extend_from_slice(&100u16.to_be_bytes()); // vlan in
        body.extend_from_slice(&200u16.to_be_bytes()); // vlan out
        body.extend_from_slice(&[10, 0, 0, 254]); // next hop
        body.extend_from_slice(&64512u16.to_be_bytes()); // src as
        body.extend_from_slice(&64513u16.to_be_bytes()); // dst as
        body.extend_from_slice(&540000u32.to_be_bytes()); // first switched
        body.extend_from_slice(&590000u32.to_be_bytes()); // last switched
        let data = set(260, &body);

        let out = decode(&packet(5, &[tpl, data]), exporter(9), &mut cache);
        assert_eq!(out.records.len(), 1);

        let record = &out.records[0];
        assert_eq!(record.src_ip.as_deref(), Some("10.1.1.1"));
        assert_eq!(record.dst_ip.as_deref(), Some("10.2.2.2"));
        assert_eq!(record.src_port, Some(51000));
        assert_eq!(record.dst_port, Some(443));
        assert_eq!(record.protocol, Some(6));
        assert_eq!(record.tos, Some(0x10));
        assert_eq!(record.tcp_flags, Some(0x18));
        assert_eq!(record.packets, Some(37));
        assert_eq!(record.bytes, Some(4714));
        assert_eq!(record.input_if, Some(2));
        assert_eq!(record.output_if, Some(3));
        assert_eq!(record.vlan_in, Some(100));
        assert_eq!(record.vlan_out, Some(200));
        assert_eq!(record.next_hop.as_deref(), Some("10.0.0.254"));
        assert_eq!(record.src_as, Some(64512));
        assert_eq!(record.dst_as, Some(64513));

        // first switched 60s before sysUpTime, last switched 10s before
        let export = Utc.timestamp_opt(EXPORT_SECS as i64, 0).unwrap();
        assert_eq!(record.flow_start, Some(export - Duration::seconds(60)));
        assert_eq!(record.flow_end, Some(export - Duration::seconds(10)));
    }

    #[test]
    fn unrecognized_field_is_skipped_not_fatal() {
        let mut cache = TemplateCache::new();
        // ie 42 is not in the recognized table; the 2 bytes must still be
        // consumed so the following byte-count field lines up
        let tpl = template_set(256, &[(42, 2), (1, 4)]);
        let mut body = vec![0xde, 0xad];
        body.extend_from_slice(&99u32.to_be_bytes());
        let data = set(256, &body);

        let out = decode(&packet(0, &[tpl, data]), exporter(1), &mut cache);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].bytes, Some(99));
    }

    #[test]
    fn data_without_template_is_skipped_with_note() {
        let mut cache = TemplateCache::new();
        let data = set(300, &[1, 2, 3, 4]);

        let out = decode(&packet(0, &[data]), exporter(1), &mut cache);
        assert!(out.records.is_empty());
        assert_eq!(out.notes, vec!["v9_data_without_template_300".to_string()]);
    }

    #[test]
    fn exporters_do_not_share_templates() {
        let mut cache = TemplateCache::new();
        // exporter 1 defines template 256 as a 4-byte byte count, exporter 2
        // as a 2-byte packet count; each data set must follow its own layout
        decode(&packet(0, &[template_set(256, &[(1, 4)])]), exporter(1), &mut cache);
        decode(&packet(0, &[template_set(256, &[(2, 2)])]), exporter(2), &mut cache);

        let out1 = decode(&packet(0, &[set(256, &1000u32.to_be_bytes())]), exporter(1), &mut cache);
        let out2 = decode(&packet(0, &[set(256, &77u16.to_be_bytes())]), exporter(2), &mut cache);

        assert_eq!(out1.records.len(), 1);
        assert_eq!(out1.records[0].bytes, Some(1000));
        assert_eq!(out1.records[0].packets, None);

        assert_eq!(out2.records.len(), 1);
        assert_eq!(out2.records[0].packets, Some(77));
        assert_eq!(out2.records[0].bytes, None);
    }

    #[test]
    fn domains_do_not_share_templates() {
        let mut cache = TemplateCache::new();
        decode(&packet(1, &[template_set(256, &[(1, 4)])]), exporter(1), &mut cache);

        // same exporter, different source id
        let out = decode(&packet(2, &[set(256, &1000u32.to_be_bytes())]), exporter(1), &mut cache);
        assert!(out.records.is_empty());
        assert_eq!(out.notes, vec!["v9_data_without_template_256".to_string()]);
    }

    #[test]
    fn multiple_records_per_data_set() {
        let mut cache = TemplateCache::new();
        let tpl = template_set(256, &[(1, 4)]);
        let mut body = vec![];
        body.extend_from_slice(&1u32.to_be_bytes());
        body.extend_from_slice(&2u32.to_be_bytes());
        body.extend_from_slice(&3u32.to_be_bytes());
        body.extend_from_slice(&[0, 0]); // trailing padding, less than one stride
        let data = set(256, &body);

        let out = decode(&packet(0, &[tpl, data]), exporter(1), &mut cache);
        assert_eq!(out.records.len(), 3);
        assert_eq!(out.records[2].bytes, Some(3));
    }

    #[test]
    fn bad_set_length_aborts_packet_keeping_partial_results() {
        let mut cache = TemplateCache::new();
        let tpl = template_set(256, &[(1, 4)]);
        let good = set(256, &11u32.to_be_bytes());
        let mut truncated = vec![];
        truncated.extend_from_slice(&256u16.to_be_bytes());
        truncated.extend_from_slice(&400u16.to_be_bytes()); // claims more than the buffer holds
        truncated.extend_from_slice(&[0; 4]);

        let out = decode(&packet(0, &[tpl, good, truncated]), exporter(1), &mut cache);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].bytes, Some(11));
        assert!(out.notes.contains(&"v9_bad_set_len".to_string()));
    }

    #[test]
    fn options_template_is_ignored_with_note() {
        let mut cache = TemplateCache::new();
        let options = set(OPTIONS_TEMPLATE_SET_ID, &[0, 1, 0, 4, 0, 4, 0, 0]);

        let out = decode(&packet(0, &[options]), exporter(1), &mut cache);
        assert!(out.records.is_empty());
        assert_eq!(out.notes, vec!["v9_options_ignored".to_string()]);
    }
}
