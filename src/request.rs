//! Inbound message decoding: header sanity, the single question, and
//! the optional OPT and TSIG records in the additional section.

use std::net::SocketAddr;

use byteorder::{BigEndian, ByteOrder};

use crate::config::ServerOptions;
use crate::constants::*;
use crate::edns::{EdnsRecord, EdnsStatus};
use crate::name::Name;
use crate::tsig::{TsigRecord, TsigStatus};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// A raw inbound message with its origin.
pub struct Request {
    pub packet: Vec<u8>,
    pub source: SocketAddr,
    pub transport: Transport,
}

/// The decoded question plus negotiated limits.
pub struct ParsedQuery {
    pub id: u16,
    pub flags: u16,
    pub opcode: u8,
    pub qname: Name,
    pub qtype: u16,
    pub qclass: u16,
    /// Offset right after the question section.
    pub question_end: usize,
    pub edns: EdnsRecord,
    pub tsig: TsigRecord,
    /// Negotiated response budget for this query.
    pub maxlen: usize,
    /// The serial of the SOA an IXFR request carries in its authority
    /// section: the version the client already has.
    pub ixfr_serial: Option<u32>,
}

/// Why a message could not be taken to resolution.
#[derive(Debug)]
pub enum Reject {
    /// Too mangled to answer at all.
    Drop,
    /// FORMERR, no question echoed.
    FormErr,
    /// FORMERR carrying a BADVERS OPT (broken EDNS record).
    FormErrBadVers(EdnsRecord),
}

pub fn parse_query(req: &Request, opts: &ServerOptions) -> Result<ParsedQuery, Reject> {
    let packet = &req.packet;
    if packet.len() < DNS_HEADER_SIZE {
        return Err(Reject::Drop);
    }
    let flags = BigEndian::read_u16(&packet[2..]);
    let qdcount = BigEndian::read_u16(&packet[4..]);
    let ancount = BigEndian::read_u16(&packet[6..]);
    let nscount = BigEndian::read_u16(&packet[8..]);
    let arcount = BigEndian::read_u16(&packet[10..]);
    if flags & FLAG_QR != 0 {
        return Err(Reject::FormErr);
    }
    if qdcount != 1 || flags & FLAG_TC != 0 || ancount != 0 || nscount > 1 {
        return Err(Reject::FormErr);
    }

    // The question name must arrive uncompressed.
    let (qname, mut pos) = Name::from_wire_uncompressed(packet, DNS_QUESTION_OFFSET)
        .map_err(|_| Reject::FormErr)?;
    if pos + 4 > packet.len() {
        return Err(Reject::FormErr);
    }
    let qtype = BigEndian::read_u16(&packet[pos..]);
    let qclass = BigEndian::read_u16(&packet[pos + 2..]);
    pos += 4;
    let question_end = pos;

    // Only an IXFR request may carry an authority record: the SOA
    // naming the serial the client already has.
    let mut ixfr_serial = None;
    if nscount == 1 {
        if qtype != Type::IXFR as u16 {
            return Err(Reject::FormErr);
        }
        let (serial, next) = parse_authority_soa(packet, pos).ok_or(Reject::FormErr)?;
        ixfr_serial = Some(serial);
        pos = next;
    }

    // At most one OPT and one TSIG in the additional section; anything
    // else there is a FORMERR.
    let mut edns = EdnsRecord::default();
    let mut tsig = TsigRecord::default();
    for _ in 0..arcount {
        // A TSIG record signs everything before it and must come last.
        if tsig.status == TsigStatus::Ok {
            return Err(Reject::FormErr);
        }
        let rtype = peek_rr_type(packet, pos).ok_or(Reject::FormErr)?;
        if rtype == Type::OPT as u16 {
            if edns.status != EdnsStatus::NotPresent {
                return Err(Reject::FormErr);
            }
            let (record, next) = EdnsRecord::parse(packet, pos);
            if record.status == EdnsStatus::Error {
                return Err(Reject::FormErrBadVers(record));
            }
            edns = record;
            pos = next;
        } else if rtype == Type::TSIG as u16 {
            if tsig.status != TsigStatus::NotPresent {
                return Err(Reject::FormErr);
            }
            let (record, next) = TsigRecord::parse(packet, pos);
            if record.status == TsigStatus::Error {
                return Err(Reject::FormErr);
            }
            tsig = record;
            pos = next;
        } else {
            return Err(Reject::FormErr);
        }
    }
    let maxlen = negotiate_maxlen(req, &edns, opts);
    Ok(ParsedQuery {
        id: BigEndian::read_u16(&packet[0..]),
        flags,
        opcode: ((flags & OPCODE_MASK) >> OPCODE_SHIFT) as u8,
        qname,
        qtype,
        qclass,
        question_end,
        edns,
        tsig,
        maxlen,
        ixfr_serial,
    })
}

/// Reads the IXFR request's authority SOA and extracts its serial.
/// Returns the serial and the offset right after the record.
fn parse_authority_soa(packet: &[u8], offset: usize) -> Option<(u32, usize)> {
    let (_, mut pos) = Name::from_wire(packet, offset).ok()?;
    if pos + DNS_RR_HEADER_SIZE > packet.len() {
        return None;
    }
    if BigEndian::read_u16(&packet[pos..]) != Type::SOA as u16 {
        return None;
    }
    let rdlen = BigEndian::read_u16(&packet[pos + 8..]) as usize;
    pos += DNS_RR_HEADER_SIZE;
    let end = pos + rdlen;
    if end > packet.len() {
        return None;
    }
    let (_, after_mname) = Name::from_wire(packet, pos).ok()?;
    let (_, after_rname) = Name::from_wire(packet, after_mname).ok()?;
    if after_rname + 20 > end {
        return None;
    }
    Some((BigEndian::read_u32(&packet[after_rname..]), end))
}

/// The response budget: `min(client, server)` clamped to [512, 65535],
/// with IPv6 UDP capped at the IPv6 minimum MTU when the socket layer
/// cannot request minimal-MTU fragmentation.
fn negotiate_maxlen(req: &Request, edns: &EdnsRecord, opts: &ServerOptions) -> usize {
    if req.transport == Transport::Tcp {
        return TCP_MAX_MESSAGE_LEN;
    }
    let mut maxlen = UDP_MAX_MESSAGE_LEN;
    if edns.status == EdnsStatus::Ok && edns.max_payload > UDP_MAX_MESSAGE_LEN {
        let server = if req.source.is_ipv6() {
            opts.ipv6_edns_size as usize
        } else {
            opts.ipv4_edns_size as usize
        };
        maxlen = edns
            .max_payload
            .min(server)
            .clamp(UDP_MAX_MESSAGE_LEN, EDNS_MAX_MESSAGE_LEN);
        if req.source.is_ipv6() && !opts.ipv6_use_min_mtu && maxlen > IPV6_MIN_MTU {
            maxlen = IPV6_MIN_MTU;
        }
    }
    maxlen
}

/// Skips the owner name of the RR at `offset` (compression pointers
/// allowed, they always take two bytes) and reads its type.
fn peek_rr_type(packet: &[u8], mut offset: usize) -> Option<u16> {
    loop {
        let len = *packet.get(offset)?;
        if len & 0xc0 == 0xc0 {
            offset += 2;
            break;
        }
        offset += len as usize + 1;
        if len == 0 {
            break;
        }
    }
    if offset + 2 > packet.len() {
        return None;
    }
    Some(BigEndian::read_u16(&packet[offset..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerOptions;

    fn build_query(qname: &str, qtype: u16, arcount: u16, tail: &[u8]) -> Vec<u8> {
        let name: Name = qname.parse().unwrap();
        let mut packet = vec![0x12, 0x34, 0x01, 0x00, 0, 1, 0, 0, 0, 0];
        packet.extend_from_slice(&arcount.to_be_bytes());
        packet.extend_from_slice(name.wire());
        packet.extend_from_slice(&qtype.to_be_bytes());
        packet.extend_from_slice(&(Class::In as u16).to_be_bytes());
        packet.extend_from_slice(tail);
        packet
    }

    fn req(packet: Vec<u8>, transport: Transport) -> Request {
        Request {
            packet,
            source: "192.0.2.1:5353".parse().unwrap(),
            transport,
        }
    }

    #[test]
    fn plain_query_parses() {
        let opts = ServerOptions::default();
        let r = req(build_query("www.example.", 1, 0, &[]), Transport::Udp);
        let q = parse_query(&r, &opts).unwrap();
        assert_eq!(q.id, 0x1234);
        assert_eq!(q.qname, "www.example.".parse().unwrap());
        assert_eq!(q.qtype, 1);
        assert_eq!(q.maxlen, UDP_MAX_MESSAGE_LEN);
        assert!(q.flags & FLAG_RD != 0);
    }

    #[test]
    fn responses_and_multi_question_messages_are_rejected() {
        let opts = ServerOptions::default();
        let mut packet = build_query("www.example.", 1, 0, &[]);
        packet[2] |= 0x80; // QR
        assert!(matches!(
            parse_query(&req(packet, Transport::Udp), &opts),
            Err(Reject::FormErr)
        ));

        let mut packet = build_query("www.example.", 1, 0, &[]);
        packet[5] = 2; // QDCOUNT
        assert!(matches!(
            parse_query(&req(packet, Transport::Udp), &opts),
            Err(Reject::FormErr)
        ));
    }

    #[test]
    fn stray_additional_rr_is_formerr() {
        let opts = ServerOptions::default();
        // An A record where only OPT/TSIG may appear.
        let mut tail = vec![0u8]; // root owner
        tail.extend_from_slice(&1u16.to_be_bytes());
        tail.extend_from_slice(&1u16.to_be_bytes());
        tail.extend_from_slice(&0u32.to_be_bytes());
        tail.extend_from_slice(&4u16.to_be_bytes());
        tail.extend_from_slice(&[1, 2, 3, 4]);
        let packet = build_query("www.example.", 1, 1, &tail);
        assert!(matches!(
            parse_query(&req(packet, Transport::Udp), &opts),
            Err(Reject::FormErr)
        ));
    }

    #[test]
    fn edns_payload_negotiation_clamps() {
        let mut opts = ServerOptions::default();
        opts.ipv4_edns_size = 4096;
        let mut tail = vec![0u8];
        tail.extend_from_slice(&(Type::OPT as u16).to_be_bytes());
        tail.extend_from_slice(&1400u16.to_be_bytes());
        tail.extend_from_slice(&[0, 0, 0, 0]);
        tail.extend_from_slice(&0u16.to_be_bytes());
        let packet = build_query("www.example.", 1, 1, &tail);
        let q = parse_query(&req(packet, Transport::Udp), &opts).unwrap();
        assert_eq!(q.maxlen, 1400);

        // A tiny advertised payload is still given the 512 floor.
        let mut tail = vec![0u8];
        tail.extend_from_slice(&(Type::OPT as u16).to_be_bytes());
        tail.extend_from_slice(&100u16.to_be_bytes());
        tail.extend_from_slice(&[0, 0, 0, 0]);
        tail.extend_from_slice(&0u16.to_be_bytes());
        let packet = build_query("www.example.", 1, 1, &tail);
        let q = parse_query(&req(packet, Transport::Udp), &opts).unwrap();
        assert_eq!(q.maxlen, UDP_MAX_MESSAGE_LEN);
    }

    #[test]
    fn ipv6_udp_caps_at_min_mtu() {
        let opts = ServerOptions::default();
        let mut tail = vec![0u8];
        tail.extend_from_slice(&(Type::OPT as u16).to_be_bytes());
        tail.extend_from_slice(&4096u16.to_be_bytes());
        tail.extend_from_slice(&[0, 0, 0, 0]);
        tail.extend_from_slice(&0u16.to_be_bytes());
        let packet = build_query("www.example.", 1, 1, &tail);
        let r = Request {
            packet,
            source: "[2001:db8::1]:5353".parse().unwrap(),
            transport: Transport::Udp,
        };
        let q = parse_query(&r, &opts).unwrap();
        assert_eq!(q.maxlen, IPV6_MIN_MTU);
    }

    #[test]
    fn tcp_gets_the_full_budget() {
        let opts = ServerOptions::default();
        let r = req(build_query("www.example.", 1, 0, &[]), Transport::Tcp);
        let q = parse_query(&r, &opts).unwrap();
        assert_eq!(q.maxlen, TCP_MAX_MESSAGE_LEN);
    }
}
