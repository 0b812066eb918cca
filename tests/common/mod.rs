//! Shared fixtures: a small in-memory zone, raw request building, and
//! a response parser for assertions.

#![allow(dead_code)]

use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder};

use zonecut::*;

pub fn n(s: &str) -> Name {
    s.parse().unwrap()
}

pub fn bytes_atom(data: &[u8]) -> RdataAtom {
    RdataAtom::Bytes(data.to_vec().into_boxed_slice())
}

pub fn a_rdata(addr: &str) -> Vec<RdataAtom> {
    let ip: Ipv4Addr = addr.parse().unwrap();
    vec![bytes_atom(&ip.octets())]
}

pub fn name_rdata(db: &mut NameDb, target: &str) -> Vec<RdataAtom> {
    let idx = db.table.insert(&n(target));
    vec![RdataAtom::Domain(idx)]
}

pub fn mx_rdata(db: &mut NameDb, preference: u16, target: &str) -> Vec<RdataAtom> {
    let idx = db.table.insert(&n(target));
    vec![bytes_atom(&preference.to_be_bytes()), RdataAtom::Domain(idx)]
}

pub fn soa_rdata(
    db: &mut NameDb,
    mname: &str,
    rname: &str,
    serial: u32,
    minimum: u32,
) -> Vec<RdataAtom> {
    let mname = db.table.insert(&n(mname));
    let rname = db.table.insert(&n(rname));
    let mut atoms = vec![RdataAtom::Domain(mname), RdataAtom::Domain(rname)];
    for v in [serial, 3600, 300, 86400, minimum] {
        atoms.push(bytes_atom(&v.to_be_bytes()));
    }
    atoms
}

/// An RRSIG with plausible fixed fields; only "type covered" and the
/// signer matter to the engine.
pub fn rrsig_rdata(db: &mut NameDb, covered: u16, signer: &str) -> Vec<RdataAtom> {
    let mut fixed = [0u8; 18];
    BigEndian::write_u16(&mut fixed[0..], covered);
    fixed[2] = 8; // algorithm
    fixed[3] = 2; // labels
    BigEndian::write_u32(&mut fixed[4..], 3600);
    let signer = db.table.insert(&n(signer));
    vec![
        bytes_atom(&fixed),
        RdataAtom::Domain(signer),
        bytes_atom(&[0xab; 64]),
    ]
}

/// An NSEC whose next-name and bitmap are fixed filler.
pub fn nsec_rdata(db: &mut NameDb, next: &str) -> Vec<RdataAtom> {
    let next = db.table.insert(&n(next));
    vec![RdataAtom::Domain(next), bytes_atom(&[0, 1, 0x40])]
}

pub const IN: u16 = Class::In as u16;

/// The standard test zone:
///
/// ```text
/// example.            SOA  ns1.example. host.example. 10 ... 60
/// example.            NS   ns1.example.
/// ns1.example.        A    10.0.0.53
/// a.example.          A    1.2.3.4
/// cname.example.      CNAME a.example.
/// mail.example.       MX   10 a.example.
/// *.w.example.        A    10.0.0.1
/// sub.example.        NS   ns.sub.example.     (delegation)
/// ns.sub.example.     A    10.0.0.54           (glue)
/// ```
pub fn build_test_db() -> (NameDb, ZoneIdx) {
    let mut db = NameDb::new();
    let z = db.insert_zone(&n("example."), ZoneOptions::default());
    let soa = soa_rdata(&mut db, "ns1.example.", "host.example.", 10, 60);
    db.add_rr(z, &n("example."), Type::SOA as u16, IN, 3600, soa);
    let ns = name_rdata(&mut db, "ns1.example.");
    db.add_rr(z, &n("example."), Type::NS as u16, IN, 3600, ns);
    db.add_rr(z, &n("ns1.example."), Type::A as u16, IN, 3600, a_rdata("10.0.0.53"));
    db.add_rr(z, &n("a.example."), Type::A as u16, IN, 300, a_rdata("1.2.3.4"));
    let cname = name_rdata(&mut db, "a.example.");
    db.add_rr(z, &n("cname.example."), Type::CNAME as u16, IN, 300, cname);
    let mx = mx_rdata(&mut db, 10, "a.example.");
    db.add_rr(z, &n("mail.example."), Type::MX as u16, IN, 300, mx);
    db.add_rr(z, &n("*.w.example."), Type::A as u16, IN, 300, a_rdata("10.0.0.1"));
    let subns = name_rdata(&mut db, "ns.sub.example.");
    db.add_rr(z, &n("sub.example."), Type::NS as u16, IN, 3600, subns);
    db.add_rr(z, &n("ns.sub.example."), Type::A as u16, IN, 3600, a_rdata("10.0.0.54"));
    (db, z)
}

/// Marks the test zone secure: RRSIGs over the apex sets and NSEC
/// records chaining the names.
pub fn sign_test_db(db: &mut NameDb, z: ZoneIdx) {
    let soa_sig = rrsig_rdata(db, Type::SOA as u16, "example.");
    db.add_rr(z, &n("example."), Type::RRSIG as u16, IN, 3600, soa_sig);
    let ns_sig = rrsig_rdata(db, Type::NS as u16, "example.");
    db.add_rr(z, &n("example."), Type::RRSIG as u16, IN, 3600, ns_sig);
    for (owner, next) in [
        ("example.", "a.example."),
        ("a.example.", "cname.example."),
        ("cname.example.", "mail.example."),
        ("mail.example.", "ns1.example."),
        ("ns1.example.", "sub.example."),
        ("sub.example.", "*.w.example."),
        ("*.w.example.", "example."),
    ] {
        let rdata = nsec_rdata(db, next);
        db.add_rr(z, &n(owner), Type::NSEC as u16, IN, 60, rdata);
        let sig = rrsig_rdata(db, Type::NSEC as u16, "example.");
        db.add_rr(z, &n(owner), Type::RRSIG as u16, IN, 60, sig);
    }
}

pub fn build_query(qname: &str, qtype: u16, qclass: u16) -> Vec<u8> {
    let name = n(qname);
    let mut packet = vec![0x12, 0x34, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];
    packet.extend_from_slice(name.wire());
    packet.extend_from_slice(&qtype.to_be_bytes());
    packet.extend_from_slice(&qclass.to_be_bytes());
    packet
}

pub fn add_opt(packet: &mut Vec<u8>, payload: u16, dnssec_ok: bool) {
    packet[11] += 1; // ARCOUNT
    packet.push(0);
    packet.extend_from_slice(&(Type::OPT as u16).to_be_bytes());
    packet.extend_from_slice(&payload.to_be_bytes());
    let flags: u32 = if dnssec_ok { 0x8000 } else { 0 };
    packet.extend_from_slice(&flags.to_be_bytes());
    packet.extend_from_slice(&0u16.to_be_bytes());
}

/// Appends the authority SOA an IXFR request uses to name its serial.
pub fn add_ixfr_soa(packet: &mut Vec<u8>, zone: &str, serial: u32) {
    packet[9] += 1; // NSCOUNT
    let name = n(zone);
    packet.extend_from_slice(name.wire());
    packet.extend_from_slice(&(Type::SOA as u16).to_be_bytes());
    packet.extend_from_slice(&IN.to_be_bytes());
    packet.extend_from_slice(&0u32.to_be_bytes());
    let mname = n("m.");
    let rname = n("r.");
    let rdlen = mname.len() + rname.len() + 20;
    packet.extend_from_slice(&(rdlen as u16).to_be_bytes());
    packet.extend_from_slice(mname.wire());
    packet.extend_from_slice(rname.wire());
    packet.extend_from_slice(&serial.to_be_bytes());
    packet.extend_from_slice(&[0u8; 16]);
}

pub struct Engine {
    pub db: NameDb,
    pub opts: ServerOptions,
    pub stats: ServerStats,
}

impl Engine {
    pub fn new(db: NameDb) -> Engine {
        Engine {
            db,
            opts: ServerOptions::default(),
            stats: ServerStats::new(),
        }
    }

    pub fn process(&self, packet: Vec<u8>, transport: Transport) -> QueryState {
        let engine = QueryEngine {
            db: &self.db,
            opts: &self.opts,
            stats: &self.stats,
            tsig: None,
        };
        engine.process(&Request {
            packet,
            source: "192.0.2.99:5353".parse().unwrap(),
            transport,
        })
    }

    pub fn ask(&self, qname: &str, qtype: u16) -> Response {
        match self.process(build_query(qname, qtype, IN), Transport::Udp) {
            QueryState::Answered(packet) => parse_response(&packet),
            _ => panic!("expected a single response"),
        }
    }

    pub fn ask_do(&self, qname: &str, qtype: u16) -> Response {
        let mut packet = build_query(qname, qtype, IN);
        add_opt(&mut packet, 4096, true);
        match self.process(packet, Transport::Udp) {
            QueryState::Answered(packet) => parse_response(&packet),
            _ => panic!("expected a single response"),
        }
    }
}

pub const SECTION_ANSWER: u8 = 0;
pub const SECTION_AUTHORITY: u8 = 1;
pub const SECTION_ADDITIONAL: u8 = 2;

pub struct RrView {
    pub section: u8,
    pub name: Name,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

pub struct Response {
    pub id: u16,
    pub flags: u16,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
    pub rrs: Vec<RrView>,
}

impl Response {
    pub fn aa(&self) -> bool {
        self.flags & FLAG_AA != 0
    }

    pub fn tc(&self) -> bool {
        self.flags & FLAG_TC != 0
    }

    pub fn section(&self, section: u8) -> impl Iterator<Item = &RrView> {
        self.rrs.iter().filter(move |rr| rr.section == section)
    }

    pub fn find(&self, section: u8, rtype: u16) -> Option<&RrView> {
        self.section(section).find(|rr| rr.rtype == rtype)
    }
}

pub fn parse_response(packet: &[u8]) -> Response {
    assert!(packet.len() >= 12, "short response");
    let id = BigEndian::read_u16(&packet[0..]);
    let flags = BigEndian::read_u16(&packet[2..]);
    assert!(flags & FLAG_QR != 0, "QR must be set on responses");
    let qdcount = BigEndian::read_u16(&packet[4..]);
    let ancount = BigEndian::read_u16(&packet[6..]);
    let nscount = BigEndian::read_u16(&packet[8..]);
    let arcount = BigEndian::read_u16(&packet[10..]);
    let mut pos = 12;
    for _ in 0..qdcount {
        let (_, after) = Name::from_wire(packet, pos).unwrap();
        pos = after + 4;
    }
    let mut rrs = Vec::new();
    for (section, count) in [(0u8, ancount), (1, nscount), (2, arcount)] {
        for _ in 0..count {
            let (name, after) = Name::from_wire(packet, pos).unwrap();
            let rtype = BigEndian::read_u16(&packet[after..]);
            let class = BigEndian::read_u16(&packet[after + 2..]);
            let ttl = BigEndian::read_u32(&packet[after + 4..]);
            let rdlen = BigEndian::read_u16(&packet[after + 8..]) as usize;
            let rdata = packet[after + 10..after + 10 + rdlen].to_vec();
            rrs.push(RrView {
                section,
                name,
                rtype,
                class,
                ttl,
                rdata,
            });
            pos = after + 10 + rdlen;
        }
    }
    assert_eq!(pos, packet.len(), "trailing bytes in response");
    Response {
        id,
        flags,
        rcode: (flags & RCODE_MASK) as u8,
        qdcount,
        ancount,
        nscount,
        arcount,
        rrs,
    }
}
