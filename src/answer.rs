//! Collecting RRsets for a response and encoding them into wire form
//! with name compression and truncation rollback.
//!
//! The split additional section keeps A records ahead of any AAAA so
//! IPv4-only clients without EDNS0 lose the least on truncation.

use byteorder::{BigEndian, ByteOrder};

use crate::constants::*;
use crate::name::Name;
use crate::namedb::{DomainIdx, DomainTable, NameDb, Rr};
use crate::rdata::{self, RdataAtom, RdataKind};
use crate::zone::ZoneIdx;

#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum Section {
    Answer = 0,
    Authority = 1,
    AdditionalA = 2,
    AdditionalAaaa = 3,
    AdditionalOther = 4,
}

const SECTIONS: [Section; 5] = [
    Section::Answer,
    Section::Authority,
    Section::AdditionalA,
    Section::AdditionalAaaa,
    Section::AdditionalOther,
];

/// How an owner name is written: a database domain, or a name
/// synthesised at query time (wildcard expansion), which compresses
/// through a reserved slot and falls back to its existing encloser.
#[derive(Clone, Debug)]
pub enum RrOwner {
    Domain(DomainIdx),
    Synthetic {
        name: Name,
        encloser: DomainIdx,
        slot: u32,
    },
}

/// Where the RRs of an entry come from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RrsetSource {
    Stored {
        domain: DomainIdx,
        zone: ZoneIdx,
        rtype: u16,
    },
    /// The zone's negative-answer SOA clone.
    NegativeSoa { zone: ZoneIdx },
}

pub struct AnswerEntry {
    pub section: Section,
    pub owner: RrOwner,
    pub source: RrsetSource,
}

/// The RRsets queued for a response, in arrival order within each
/// section. The same RRset is never queued twice; a second add can only
/// promote it to an earlier section.
pub struct Answer {
    entries: Vec<AnswerEntry>,
}

impl Default for Answer {
    fn default() -> Self {
        Self::new()
    }
}

impl Answer {
    pub fn new() -> Answer {
        Answer {
            entries: Vec::new(),
        }
    }

    /// Queues an RRset. Returns false if it was already queued in the
    /// same or an earlier section (the CNAME-loop guard relies on
    /// this).
    pub fn add_rrset(&mut self, section: Section, owner: RrOwner, source: RrsetSource) -> bool {
        for entry in self.entries.iter_mut() {
            if entry.source == source {
                if section < entry.section {
                    entry.section = section;
                    return true;
                }
                return false;
            }
        }
        if self.entries.len() >= MAX_RRSETS_PER_RESPONSE {
            return false;
        }
        self.entries.push(AnswerEntry {
            section,
            owner,
            source,
        });
        true
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The compression table: one offset slot per domain number, plus the
/// insertion-ordered list used to roll entries back. Slot 0 is the
/// query name synthesised from a wildcard.
struct CompressionTable {
    offsets: Vec<u16>,
    touched: Vec<u32>,
}

impl CompressionTable {
    fn new(domain_count: usize) -> CompressionTable {
        CompressionTable {
            offsets: vec![0; domain_count + 1],
            touched: Vec::new(),
        }
    }

    #[inline]
    fn get(&self, number: u32) -> Option<u16> {
        match self.offsets[number as usize] {
            0 => None,
            off => Some(off),
        }
    }

    fn put(&mut self, number: u32, offset: usize) {
        if offset > MAX_COMPRESSION_OFFSET || self.offsets[number as usize] != 0 {
            return;
        }
        self.offsets[number as usize] = offset as u16;
        self.touched.push(number);
    }

    /// Drops every entry recorded at or past `max_offset`. Offsets only
    /// grow, so popping from the insertion order suffices.
    fn clear_from(&mut self, max_offset: usize, keep_touched: usize) {
        while self.touched.len() > keep_touched {
            let number = *self.touched.last().unwrap();
            if (self.offsets[number as usize] as usize) < max_offset {
                break;
            }
            self.offsets[number as usize] = 0;
            self.touched.pop();
        }
    }

    fn reset(&mut self) {
        for &number in &self.touched {
            self.offsets[number as usize] = 0;
        }
        self.touched.clear();
    }
}

/// A truncation point: buffer position and compression-table mark taken
/// before an RRset is written, restored if the RRset does not fit.
#[derive(Copy, Clone)]
struct Mark {
    pos: usize,
    touched: usize,
}

/// The response being written: a bounded buffer plus the compression
/// context threaded through every name emission.
pub struct ResponseBuf {
    buf: Vec<u8>,
    limit: usize,
    compression: CompressionTable,
}

impl ResponseBuf {
    /// Starts a response from the request header and question bytes.
    /// `limit` already has the space reserved for OPT/TSIG subtracted.
    pub fn new(prefix: &[u8], limit: usize, domain_count: usize) -> ResponseBuf {
        ResponseBuf {
            buf: prefix.to_vec(),
            limit,
            compression: CompressionTable::new(domain_count),
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn overflow(&self) -> bool {
        self.buf.len() > self.limit
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn into_packet(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn raise_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    // Header accessors.

    pub fn set_flag(&mut self, mask: u16) {
        let flags = BigEndian::read_u16(&self.buf[2..]) | mask;
        BigEndian::write_u16(&mut self.buf[2..], flags);
    }

    pub fn clear_flag(&mut self, mask: u16) {
        let flags = BigEndian::read_u16(&self.buf[2..]) & !mask;
        BigEndian::write_u16(&mut self.buf[2..], flags);
    }

    pub fn flags(&self) -> u16 {
        BigEndian::read_u16(&self.buf[2..])
    }

    pub fn set_rcode(&mut self, rcode: u8) {
        self.buf[3] = (self.buf[3] & 0xf0) | (rcode & 0x0f);
    }

    pub fn rcode(&self) -> u8 {
        self.buf[3] & 0x0f
    }

    pub fn set_count(&mut self, offset: usize, value: u16) {
        BigEndian::write_u16(&mut self.buf[offset..], value);
    }

    pub fn bump_arcount(&mut self) {
        let count = BigEndian::read_u16(&self.buf[10..]) + 1;
        BigEndian::write_u16(&mut self.buf[10..], count);
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Registers compression targets for `domain` and its ancestors at
    /// `offset`, normally the query name inside the question section.
    pub fn add_compression_ancestors(
        &mut self,
        table: &DomainTable,
        mut domain: DomainIdx,
        mut offset: usize,
    ) {
        while table.parent(domain).is_some() {
            self.compression.put(domain.number(), offset);
            offset += table.name(domain).wire()[0] as usize + 1;
            domain = table.parent(domain).unwrap();
        }
    }

    /// Reserves slot 0 (the synthesised query name) at `offset`.
    pub fn add_compression_query_name(&mut self, offset: usize) {
        self.compression.put(0, offset);
    }

    fn mark(&self) -> Mark {
        Mark {
            pos: self.buf.len(),
            touched: self.compression.touched.len(),
        }
    }

    fn rollback(&mut self, mark: Mark) {
        self.buf.truncate(mark.pos);
        self.compression.clear_from(mark.pos, mark.touched);
    }

    /// Emits a stored domain name, walking up label by label; a suffix
    /// already in the table becomes a two-byte pointer.
    fn encode_domain_name(&mut self, table: &DomainTable, domain: DomainIdx) {
        let mut d = domain;
        while table.parent(d).is_some() {
            match self.compression.get(d.number()) {
                Some(offset) => {
                    let mut ptr = [0u8; 2];
                    BigEndian::write_u16(&mut ptr, 0xc000 | offset);
                    self.buf.extend_from_slice(&ptr);
                    return;
                }
                None => {
                    self.compression.put(d.number(), self.buf.len());
                    let name = table.name(d);
                    let label_len = name.wire()[0] as usize + 1;
                    self.buf.extend_from_slice(&name.wire()[..label_len]);
                    d = table.parent(d).unwrap();
                }
            }
        }
        self.buf.push(0);
    }

    fn encode_owner(&mut self, table: &DomainTable, owner: &RrOwner) {
        match owner {
            RrOwner::Domain(d) => self.encode_domain_name(table, *d),
            RrOwner::Synthetic {
                name,
                encloser,
                slot,
            } => {
                if let Some(offset) = self.compression.get(*slot) {
                    let mut ptr = [0u8; 2];
                    BigEndian::write_u16(&mut ptr, 0xc000 | offset);
                    self.buf.extend_from_slice(&ptr);
                    return;
                }
                self.compression.put(*slot, self.buf.len());
                let skip = name.label_count() - table.name(*encloser).label_count();
                let mut pos = 0;
                for _ in 0..skip {
                    let label_len = name.wire()[pos] as usize + 1;
                    self.buf
                        .extend_from_slice(&name.wire()[pos..pos + label_len]);
                    pos += label_len;
                }
                self.encode_domain_name(table, *encloser);
            }
        }
    }

    /// Writes one RR; on overflow the buffer and compression table are
    /// restored and false is returned.
    pub fn encode_rr(&mut self, table: &DomainTable, owner: &RrOwner, rr: &Rr) -> bool {
        let mark = self.mark();
        self.encode_owner(table, owner);
        let mut fixed = [0u8; DNS_RR_HEADER_SIZE];
        BigEndian::write_u16(&mut fixed[0..], rr.rtype);
        BigEndian::write_u16(&mut fixed[2..], rr.class);
        BigEndian::write_u32(&mut fixed[4..], rr.ttl);
        self.buf.extend_from_slice(&fixed);
        let rdlen_pos = self.buf.len() - 2;
        let rdata_start = self.buf.len();
        let kinds = rdata::descriptor(rr.rtype);
        for (i, atom) in rr.rdatas.iter().enumerate() {
            match atom {
                RdataAtom::Domain(d) => {
                    if kinds.get(i) == Some(&RdataKind::CompressedName) {
                        self.encode_domain_name(table, *d);
                    } else {
                        self.buf.extend_from_slice(table.name(*d).wire());
                    }
                }
                RdataAtom::Bytes(b) => self.buf.extend_from_slice(b),
            }
        }
        let rdlen = self.buf.len() - rdata_start;
        BigEndian::write_u16(&mut self.buf[rdlen_pos..], rdlen as u16);
        if self.overflow() {
            self.rollback(mark);
            debug_assert!(!self.overflow());
            return false;
        }
        true
    }

    /// Clears every compression entry; AXFR continuation packets start
    /// from an empty table.
    pub fn reset_compression(&mut self) {
        self.compression.reset();
    }
}

/// Writes an entry's RRset and, for secure zones under DO, the RRSIGs
/// covering its type. Returns the RRs committed; on a partial fit the
/// whole RRset is rolled back, and `truncate` decides whether that
/// raises TC (Answer/Authority) or silently omits (Additional).
fn encode_rrset(
    buf: &mut ResponseBuf,
    db: &NameDb,
    entry: &AnswerEntry,
    dnssec_ok: bool,
    truncate: bool,
) -> (u16, bool) {
    let table = &db.table;
    let mark = buf.mark();
    let mut added: u16 = 0;

    let (sig_domain, zone, rtype): (DomainIdx, ZoneIdx, u16) = match entry.source {
        RrsetSource::Stored { domain, zone, rtype } => (domain, zone, rtype),
        RrsetSource::NegativeSoa { zone } => {
            (db.zone(zone).apex, zone, Type::SOA as u16)
        }
    };

    let write_all = |buf: &mut ResponseBuf, rrs: &[Rr], added: &mut u16| -> bool {
        for rr in rrs {
            if !buf.encode_rr(table, &entry.owner, rr) {
                return false;
            }
            *added += 1;
        }
        true
    };

    let mut all_added = match entry.source {
        RrsetSource::Stored { domain, zone, rtype } => {
            match table.find_rrset(domain, zone, rtype) {
                Some(rrset) => write_all(buf, &rrset.rrs, &mut added),
                None => true,
            }
        }
        RrsetSource::NegativeSoa { zone } => match &db.zone(zone).soa_nx {
            Some(rr) => write_all(buf, std::slice::from_ref(rr), &mut added),
            None => true,
        },
    };

    if all_added && dnssec_ok && db.zone(zone).is_secure && rtype != Type::RRSIG as u16 {
        if let Some(rrsig) = table.find_rrset(sig_domain, zone, Type::RRSIG as u16) {
            for rr in rrsig
                .rrs
                .iter()
                .filter(|rr| rdata::rrsig_type_covered(&rr.rdatas) == rtype)
            {
                if !buf.encode_rr(table, &entry.owner, rr) {
                    all_added = false;
                    break;
                }
                added += 1;
            }
        }
    }

    if !all_added {
        buf.rollback(mark);
        if truncate {
            buf.set_flag(FLAG_TC);
        }
        return (0, false);
    }
    (added, true)
}

/// Serialises the collected answer. Section counts are tallied as
/// RRsets commit and written into the header at the end.
pub fn encode_answer(buf: &mut ResponseBuf, db: &NameDb, answer: &Answer, dnssec_ok: bool) {
    let mut counts = [0u16; 5];
    for &section in SECTIONS.iter() {
        let authoritative_data =
            section == Section::Answer || section == Section::Authority;
        for entry in answer.entries.iter().filter(|e| e.section == section) {
            if buf.overflow() {
                break;
            }
            let (added, complete) =
                encode_rrset(buf, db, entry, dnssec_ok, authoritative_data);
            counts[section as usize] += added;
            if !complete && authoritative_data {
                // TC is set and this section ends; additional sections
                // are still attempted so small glue may survive.
                break;
            }
        }
    }
    buf.set_count(6, counts[0]);
    buf.set_count(8, counts[1]);
    buf.set_count(10, counts[2] + counts[3] + counts[4]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Name;
    use crate::namedb::NameDb;
    use crate::zone::ZoneOptions;

    fn n(s: &str) -> Name {
        s.parse().unwrap()
    }

    fn db_with_a_rrset(count: usize) -> (NameDb, ZoneIdx, DomainIdx) {
        let mut db = NameDb::new();
        let zidx = db.insert_zone(&n("example."), ZoneOptions::default());
        for i in 0..count {
            db.add_rr(
                zidx,
                &n("big.example."),
                Type::A as u16,
                Class::In as u16,
                300,
                vec![RdataAtom::Bytes(
                    vec![10, 0, (i >> 8) as u8, i as u8].into_boxed_slice(),
                )],
            );
        }
        let domain = db.table.find(&n("big.example.")).unwrap();
        (db, zidx, domain)
    }

    fn empty_header() -> Vec<u8> {
        vec![0u8; DNS_HEADER_SIZE]
    }

    #[test]
    fn owner_names_compress_to_pointers() {
        let (db, zidx, domain) = db_with_a_rrset(2);
        let mut buf = ResponseBuf::new(&empty_header(), 512, db.table.count());
        let rrset = db.table.find_rrset(domain, zidx, Type::A as u16).unwrap();
        assert!(buf.encode_rr(&db.table, &RrOwner::Domain(domain), &rrset.rrs[0]));
        let first_len = buf.position();
        assert!(buf.encode_rr(&db.table, &RrOwner::Domain(domain), &rrset.rrs[1]));
        // The second owner is a single pointer: 2 bytes instead of 13.
        let second_len = buf.position() - first_len;
        assert_eq!(second_len, 2 + DNS_RR_HEADER_SIZE + 4);
        assert_eq!(
            &buf.as_bytes()[first_len..first_len + 2],
            &[0xc0, DNS_HEADER_SIZE as u8]
        );
    }

    #[test]
    fn partial_rrset_rolls_back_and_sets_tc() {
        let (db, zidx, domain) = db_with_a_rrset(40);
        // Room for the header and a handful of RRs only.
        let mut buf = ResponseBuf::new(&empty_header(), 100, db.table.count());
        let mut answer = Answer::new();
        answer.add_rrset(
            Section::Answer,
            RrOwner::Domain(domain),
            RrsetSource::Stored {
                domain,
                zone: zidx,
                rtype: Type::A as u16,
            },
        );
        encode_answer(&mut buf, &db, &answer, false);
        assert!(buf.flags() & FLAG_TC != 0);
        // Nothing partial: the whole RRset was rolled back.
        assert_eq!(buf.position(), DNS_HEADER_SIZE);
        assert_eq!(BigEndian::read_u16(&buf.as_bytes()[6..]), 0);
    }

    #[test]
    fn additional_overflow_is_silent() {
        let (db, zidx, domain) = db_with_a_rrset(40);
        let mut buf = ResponseBuf::new(&empty_header(), 100, db.table.count());
        let mut answer = Answer::new();
        answer.add_rrset(
            Section::AdditionalA,
            RrOwner::Domain(domain),
            RrsetSource::Stored {
                domain,
                zone: zidx,
                rtype: Type::A as u16,
            },
        );
        encode_answer(&mut buf, &db, &answer, false);
        assert_eq!(buf.flags() & FLAG_TC, 0);
        assert_eq!(buf.position(), DNS_HEADER_SIZE);
    }

    #[test]
    fn duplicate_rrsets_are_queued_once() {
        let (_, zidx, domain) = db_with_a_rrset(1);
        let mut answer = Answer::new();
        let source = RrsetSource::Stored {
            domain,
            zone: zidx,
            rtype: Type::A as u16,
        };
        assert!(answer.add_rrset(Section::Answer, RrOwner::Domain(domain), source));
        assert!(!answer.add_rrset(Section::Answer, RrOwner::Domain(domain), source));
        // A later section never demotes an entry.
        assert!(!answer.add_rrset(Section::AdditionalA, RrOwner::Domain(domain), source));
        // An earlier section promotes it.
        let mut answer = Answer::new();
        answer.add_rrset(Section::Authority, RrOwner::Domain(domain), source);
        assert!(answer.add_rrset(Section::Answer, RrOwner::Domain(domain), source));
    }

    #[test]
    fn synthetic_owner_compresses_through_reserved_slot() {
        let (db, zidx, _) = db_with_a_rrset(1);
        let wild = db.table.find(&n("big.example.")).unwrap();
        let encloser = db.table.find(&n("example.")).unwrap();
        let mut buf = ResponseBuf::new(&empty_header(), 512, db.table.count());
        buf.add_compression_query_name(DNS_HEADER_SIZE);
        let owner = RrOwner::Synthetic {
            name: n("a.example."),
            encloser,
            slot: 0,
        };
        let rrset = db.table.find_rrset(wild, zidx, Type::A as u16).unwrap();
        assert!(buf.encode_rr(&db.table, &owner, &rrset.rrs[0]));
        // Slot 0 was pre-registered, so the owner is a bare pointer.
        assert_eq!(
            &buf.as_bytes()[DNS_HEADER_SIZE..DNS_HEADER_SIZE + 2],
            &[0xc0, DNS_HEADER_SIZE as u8]
        );
    }
}
