use core::convert::TryInto;
use num_derive::FromPrimitive;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// NetFlow v9 information elements this collector understands.
/// from https://www.cisco.com/en/US/technologies/tk648/tk362/technologies_white_paper09186a00800a3db9.html
#[derive(FromPrimitive, PartialEq, Eq, Hash, Debug, Copy, Clone)]
#[repr(u16)]
pub enum V9Field {
    OctetDeltaCount = 1,
    PacketDeltaCount = 2,
    ProtocolIdentifier = 4,
    IpClassOfService = 5,
    TcpControlBits = 6,
    SourceTransportPort = 7,
    SourceAddress = 8,
    IpNextHopAddress = 9,
    IngressInterface = 10,
    DestinationTransportPort = 11,
    DestinationAddress = 12,
    EgressInterface = 14,
    BgpSourceAsNumber = 15,
    BgpDestinationAsNumber = 16,
    LastSwitched = 21,
    FirstSwitched = 22,
    IngressVlanId = 55,
    EgressVlanId = 56,
}

/// IPFIX information elements this collector understands.
/// from http://www.iana.org/assignments/ipfix/ipfix.xml
#[derive(FromPrimitive, PartialEq, Eq, Hash, Debug, Copy, Clone)]
#[repr(u16)]
pub enum IpfixField {
    OctetDeltaCount = 1,
    PacketDeltaCount = 2,
    ProtocolIdentifier = 4,
    IpClassOfService = 5,
    TcpControlBits = 6,
    SourceTransportPort = 7,
    SourceAddress = 8,
    IngressInterface = 10,
    DestinationTransportPort = 11,
    DestinationAddress = 12,
    EgressInterface = 14,
    BgpSourceAsNumber = 15,
    BgpDestinationAsNumber = 16,
    IpNextHopAddress = 27,
    FlowStartSeconds = 148,
    FlowEndSeconds = 149,
    FlowStartMilliseconds = 152,
    FlowEndMilliseconds = 153,
}

/// Reads a big-endian unsigned integer of declared width 1, 2, 4 or 8.
/// Any other width yields `None` and the field is discarded.
pub fn read_unsigned(buf: &[u8]) -> Option<u64> {
    match buf.len() {
        1 => Some(buf[0] as u64),
        2 => Some(u16::from_be_bytes(buf.try_into().unwrap()) as u64),
        4 => Some(u32::from_be_bytes(buf.try_into().unwrap()) as u64),
        8 => Some(u64::from_be_bytes(buf.try_into().unwrap())),
        _ => None,
    }
}

/// Renders a 4-byte field as an IPv4 address or a 16-byte field as IPv6.
pub fn read_address(buf: &[u8]) -> Option<IpAddr> {
    match buf.len() {
        4 => {
            let octets: [u8; 4] = buf.try_into().unwrap();
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = buf.try_into().unwrap();
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}
