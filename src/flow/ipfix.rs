use chrono::{DateTime, TimeZone, Utc};
use core::convert::TryInto;
use num_traits::FromPrimitive;
use std::net::IpAddr;

use super::{fields, fields::IpfixField, Decoded, SetHeader, TemplateCache, TemplateField, TemplateKey, DATA_SET_MIN_ID, VARIABLE_LENGTH};

pub const VERSION: u16 = 10;

pub const TEMPLATE_SET_ID: u16 = 2;
pub const OPTIONS_TEMPLATE_SET_ID: u16 = 3;

/// Enterprise bit on an information element id; the id is stored masked and
/// the 4-byte enterprise number that follows is consumed and discarded.
const ENTERPRISE_BIT: u16 = 0x8000;

/// IPFIX message header.
/// from https://tools.ietf.org/html/rfc7011
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |       Version Number          |            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Export Time                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Sequence Number                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Observation Domain ID                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug)]
pub struct Header {
    pub version: u16,
    pub length: u16, // total length of the message, header included
    pub export_time: u32,
    pub seq_number: u32,
    pub domain_id: u32,
}

impl Header {
    pub const SIZE: usize = 16;

    pub fn read(buf: &[u8]) -> Result<Self, String> {
        if buf.len() < Self::SIZE {
            return Err(format!("Not enough space in buffer to read the IPFIX Header, required {} but received {}", Self::SIZE, buf.len()));
        }

        Ok(Header {
            version: u16::from_be_bytes(buf[0..2].try_into().unwrap()),
            length: u16::from_be_bytes(buf[2..4].try_into().unwrap()),
            export_time: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            seq_number: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            domain_id: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
        })
    }
}

pub fn parse(buf: &[u8], exporter: IpAddr, cache: &mut TemplateCache) -> Decoded {
    let mut out = Decoded::default();

    let header = match Header::read(buf) {
        Ok(h) => h,
        Err(_) => {
            out.notes.push("ipfix_header_too_short".to_string());
            return out;
        }
    };

    let mut offset = Header::SIZE;

    while offset + SetHeader::SIZE <= buf.len() && offset < header.length as usize {
        let set = match SetHeader::read(&buf[offset..]) {
            Ok(s) => s,
            Err(_) => break,
        };
        let set_end = offset + set.length as usize;
        if (set.length as usize) < SetHeader::SIZE || set_end > buf.len() {
            out.notes.push("ipfix_bad_set_len".to_string());
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
                    let mut id = u16::from_be_bytes(buf[cursor..cursor + 2].try_into().unwrap());
                    let length = u16::from_be_bytes(buf[cursor + 2..cursor + 4].try_into().unwrap());
                    cursor += 4;

                    if id & ENTERPRISE_BIT != 0 {
                        if cursor + 4 > set_end {
                            break;
                        }
                        cursor += 4; // enterprise number, not modeled
                        id &= !ENTERPRISE_BIT;
                    }

                    template.push(TemplateField { id, length });
                }

                cache.put_ipfix(TemplateKey { exporter, domain_id: header.domain_id, template_id }, template);
            }
            out.notes.push("ipfix_template_seen".to_string());
        } else if set.id == OPTIONS_TEMPLATE_SET_ID {
            out.notes.push("ipfix_options_ignored".to_string());
        } else if set.id >= DATA_SET_MIN_ID {
            let key = TemplateKey { exporter, domain_id: header.domain_id, template_id: set.id };
            match cache.get_ipfix(&key) {
                None => out.notes.push(format!("ipfix_data_without_template_{}", set.id)),
                Some(template) => {
                    // stride is computed per record: variable-length fields
                    // encode their actual length in the data
                    let mut record_start = cursor;
                    'records: while record_start < set_end {
                        let mut idx = record_start;
                        let mut record = crate::record::FlowRecord::new(exporter, header.domain_id, set.id);

                        for field in template {
                            let value = if field.length == VARIABLE_LENGTH {
                                if idx >= set_end {
                                    break 'records;
                                }
                                let mut length = buf[idx] as usize;
                                idx += 1;
                                if length == 255 {
                                    if idx + 2 > set_end {
                                        break 'records;
                                    }
                                    length = u16::from_be_bytes(buf[idx..idx + 2].try_into().unwrap()) as usize;
                                    idx += 2;
                                }
                                if idx + length > set_end {
                                    break 'records;
                                }
                                let value = &buf[idx..idx + length];
                                idx += length;
                                value
                            } else {
                                if idx + field.length as usize > set_end {
                                    break 'records;
                                }
                                let value = &buf[idx..idx + field.length as usize];
                                idx += field.length as usize;
                                value
                            };

                            apply_field(&mut record, field.id, value);
                        }

                        out.records.push(record);
                        if idx == record_start {
                            break; // no forward progress, abort the set
                        }
                        record_start = idx;
                    }
                }
            }
        }

        offset = set_end;
    }

    out
}

fn apply_field(record: &mut crate::record::FlowRecord, id: u16, value: &[u8]) {
    let kind = match IpfixField::from_u16(id) {
        Some(kind) => kind,
        None => return, // bytes consumed, value discarded
    };

    match kind {
        IpfixField::SourceAddress => record.src_ip = fields::read_address(value).map(|a| a.to_string()),
        IpfixField::DestinationAddress => record.dst_ip = fields::read_address(value).map(|a| a.to_string()),
        IpfixField::IpNextHopAddress => record.next_hop = fields::read_address(value).map(|a| a.to_string()),
        IpfixField::SourceTransportPort => record.src_port = fields::read_unsigned(value).map(|v| v as u16),
        IpfixField::DestinationTransportPort => record.dst_port = fields::read_unsigned(value).map(|v| v as u16),
        IpfixField::ProtocolIdentifier => record.protocol = fields::read_unsigned(value).map(|v| v as u8),
        IpfixField::IpClassOfService => record.tos = fields::read_unsigned(value).map(|v| v as u8),
        IpfixField::TcpControlBits => record.tcp_flags = fields::read_unsigned(value).map(|v| v as u8),
        IpfixField::OctetDeltaCount => record.bytes = fields::read_unsigned(value),
        IpfixField::PacketDeltaCount => record.packets = fields::read_unsigned(value),
        IpfixField::IngressInterface => record.input_if = fields::read_unsigned(value).map(|v| v as u32),
        IpfixField::EgressInterface => record.output_if = fields::read_unsigned(value).map(|v| v as u32),
        IpfixField::BgpSourceAsNumber => record.src_as = fields::read_unsigned(value).map(|v| v as u32),
        IpfixField::BgpDestinationAsNumber => record.dst_as = fields::read_unsigned(value).map(|v| v as u32),
        IpfixField::FlowStartSeconds => record.flow_start = absolute_seconds(fields::read_unsigned(value)),
        IpfixField::FlowEndSeconds => record.flow_end = absolute_seconds(fields::read_unsigned(value)),
        IpfixField::FlowStartMilliseconds => record.flow_start = absolute_millis(fields::read_unsigned(value)),
        IpfixField::FlowEndMilliseconds => record.flow_end = absolute_millis(fields::read_unsigned(value)),
    }
}

fn absolute_seconds(value: Option<u64>) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(value? as i64, 0).single()
}

fn absolute_millis(value: Option<u64>) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(value? as i64).single()
}
