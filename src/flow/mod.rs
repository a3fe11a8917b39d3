use core::convert::TryInto;
use std::collections::HashMap;
use std::net::IpAddr;

use crate::record::FlowRecord;

pub mod fields;
pub mod ipfix;
pub mod v9;

/// Declared field length marking an IPFIX variable-length information element.
pub const VARIABLE_LENGTH: u16 = 65535;

/// Data sets live in the set-id range starting at 256 for both formats.
pub const DATA_SET_MIN_ID: u16 = 256;

/// One (exporter, observation domain, template id) namespace entry. Two
/// exporters reusing the same numeric template id never collide.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct TemplateKey {
    pub exporter: IpAddr,
    pub domain_id: u32,
    pub template_id: u16,
}

/// One (information element id, declared length) pair. Order within the
/// template defines byte offsets inside a data record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateField {
    pub id: u16,
    pub length: u16,
}

/// Per-exporter template state. Entries are written only by template sets and
/// live for the lifetime of the listener; a redefinition of the same key
/// replaces the prior layout. There is no eviction, so the cache grows by one
/// entry per distinct exporter/domain/template-id ever seen.
#[derive(Debug, Default)]
pub struct TemplateCache {
    v9: HashMap<TemplateKey, Vec<TemplateField>>,
    ipfix: HashMap<TemplateKey, Vec<TemplateField>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        TemplateCache::default()
    }

    pub fn put_v9(&mut self, key: TemplateKey, fields: Vec<TemplateField>) {
        self.v9.insert(key, fields);
    }

    pub fn get_v9(&self, key: &TemplateKey) -> Option<&[TemplateField]> {
        self.v9.get(key).map(|f| f.as_slice())
    }

    pub fn put_ipfix(&mut self, key: TemplateKey, fields: Vec<TemplateField>) {
        self.ipfix.insert(key, fields);
    }

    pub fn get_ipfix(&self, key: &TemplateKey) -> Option<&[TemplateField]> {
        self.ipfix.get(key).map(|f| f.as_slice())
    }
}

/// Set header shared by NetFlow v9 and IPFIX.
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Set ID               |          Length               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug)]
pub struct SetHeader {
    pub id: u16,
    pub length: u16, // total length of the set in octets, including this header
}

impl SetHeader {
    pub const SIZE: usize = 4;

    pub fn read(buf: &[u8]) -> Result<Self, String> {
        if buf.len() < Self::SIZE {
            return Err(format!("Not enough space in buffer to read SetHeader, required {} but received {}", Self::SIZE, buf.len()));
        }

        Ok(SetHeader {
            id: u16::from_be_bytes(buf[0..2].try_into().unwrap()),
            length: u16::from_be_bytes(buf[2..4].try_into().unwrap()),
        })
    }
}

/// Outcome of decoding one datagram: zero or more flow records plus
/// diagnostic notes. Malformed input degrades to partial results and notes,
/// never to an error.
#[derive(Debug, Default)]
pub struct Decoded {
    pub records: Vec<FlowRecord>,
    pub notes: Vec<String>,
}

impl Decoded {
    fn noted(note: &str) -> Self {
        Decoded {
            records: vec![],
            notes: vec![note.to_string()],
        }
    }
}

/// Decodes one NetFlow v9 / IPFIX datagram against the template cache.
pub fn decode(buf: &[u8], exporter: IpAddr, cache: &mut TemplateCache) -> Decoded {
    if buf.len() < 4 {
        return Decoded::noted("short_packet");
    }

    let version = u16::from_be_bytes(buf[0..2].try_into().unwrap());
    match version {
        v9::VERSION => v9::parse(buf, exporter, cache),
        ipfix::VERSION => ipfix::parse(buf, exporter, cache),
        _ => Decoded::noted("unknown_version"),
    }
}
