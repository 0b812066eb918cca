//! Zone transfers out: AXFR emission with an explicit resumable cursor
//! across TCP packets, and IXFR serving from the precomputed deltas the
//! diff apply path stores per zone.

use byteorder::{BigEndian, ByteOrder};

use crate::answer::{ResponseBuf, RrOwner};
use crate::config::ServerOptions;
use crate::constants::*;
use crate::edns::{EdnsRecord, EdnsStatus};
use crate::namedb::{DomainIdx, NameDb};
use crate::tsig::{TsigAuthority, TsigRecord, TsigStatus};
use crate::zone::ZoneIdx;

/// One stored delta in uncompressed wire form. Served as
/// `newsoa, oldsoa, del, add`, where `del` ends with the new-serial SOA
/// (doubling as the add-section opener) and `add` ends with it again
/// (the transfer terminator).
#[derive(Clone, Debug)]
pub struct IxfrData {
    pub oldserial: u32,
    pub newserial: u32,
    pub newsoa: Vec<u8>,
    pub oldsoa: Vec<u8>,
    pub del: Vec<u8>,
    pub add: Vec<u8>,
}

struct AxfrCursor {
    /// Next domain in canonical subtree order; None once exhausted.
    current: Option<DomainIdx>,
    rrset_index: usize,
    rr_index: usize,
    /// The leading apex SOA has been written.
    started: bool,
}

struct IxfrCursor {
    /// Index into the zone's stored deltas, fixed at stream creation.
    data_index: usize,
    segment: usize,
    offset: usize,
}

enum XfrKind {
    Axfr(AxfrCursor),
    Ixfr(IxfrCursor),
}

/// A transfer in progress. The caller asks for packets one at a time
/// and re-enters when the connection is writable again; every cursor
/// lives here, never in the database.
pub struct XfrStream {
    zone: ZoneIdx,
    kind: XfrKind,
    /// Header and question from the request; continuation packets reuse
    /// the header with QDCOUNT zeroed.
    prefix: Vec<u8>,
    maxlen: usize,
    edns: EdnsRecord,
    tsig: TsigRecord,
    first: bool,
    done: bool,
}

impl XfrStream {
    pub fn axfr(
        db: &NameDb,
        zone: ZoneIdx,
        prefix: Vec<u8>,
        maxlen: usize,
        edns: EdnsRecord,
        tsig: TsigRecord,
    ) -> XfrStream {
        XfrStream {
            zone,
            kind: XfrKind::Axfr(AxfrCursor {
                current: Some(db.zone(zone).apex),
                rrset_index: 0,
                rr_index: 0,
                started: false,
            }),
            prefix,
            maxlen,
            edns,
            tsig,
            first: true,
            done: false,
        }
    }

    pub fn ixfr(
        zone: ZoneIdx,
        data_index: usize,
        prefix: Vec<u8>,
        maxlen: usize,
        edns: EdnsRecord,
        tsig: TsigRecord,
    ) -> XfrStream {
        XfrStream {
            zone,
            kind: XfrKind::Ixfr(IxfrCursor {
                data_index,
                segment: 0,
                offset: 0,
            }),
            prefix,
            maxlen,
            edns,
            tsig,
            first: true,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Produces the next response packet, or None when the transfer has
    /// completed. Compression starts fresh in every packet.
    pub fn next_packet(
        &mut self,
        db: &NameDb,
        opts: &ServerOptions,
        authority: Option<&dyn TsigAuthority>,
    ) -> Option<Vec<u8>> {
        if self.done {
            return None;
        }
        let reserved = self.edns.reserved_space() + self.tsig.reserved_space();
        let prefix = if self.first {
            self.prefix.clone()
        } else {
            let mut header = self.prefix[..DNS_HEADER_SIZE].to_vec();
            BigEndian::write_u16(&mut header[4..], 0);
            header
        };
        let mut buf = ResponseBuf::new(&prefix, self.maxlen - reserved, db.table.count());
        buf.set_flag(FLAG_QR | FLAG_AA);

        let count = match &mut self.kind {
            XfrKind::Axfr(cursor) => {
                axfr_fill(db, self.zone, cursor, &mut buf, self.first, &mut self.done)
            }
            XfrKind::Ixfr(cursor) => {
                let data = &db.zone(self.zone).ixfr[cursor.data_index];
                ixfr_fill(data, cursor, &mut buf, &mut self.done)
            }
        };

        if count == 0 && !self.done {
            // A single RR larger than the negotiated budget; nothing
            // can make progress.
            log::error!(
                target: "xfr",
                "transfer of zone {} stalled: RR exceeds packet budget",
                db.zone(self.zone).apex_name
            );
            buf.set_rcode(Rcode::ServFail as u8);
            self.done = true;
        }

        buf.set_count(6, count);
        buf.set_count(8, 0);
        buf.set_count(10, 0);
        if self.first && self.edns.status != EdnsStatus::NotPresent {
            buf.raise_limit(self.maxlen);
            let mut opt = Vec::with_capacity(OPT_RR_LEN);
            self.edns.write_response(&mut opt, opts.ipv4_edns_size);
            buf.extend(&opt);
            buf.bump_arcount();
        }
        if self.tsig.status == TsigStatus::Ok {
            if let Some(authority) = authority {
                buf.raise_limit(self.maxlen);
                let rr = authority.sign(&self.tsig, buf.as_bytes(), TSIG_ERROR_NOERROR);
                buf.extend(&rr);
                buf.bump_arcount();
            }
        }
        self.first = false;
        Some(buf.into_packet())
    }
}

fn axfr_fill(
    db: &NameDb,
    zone: ZoneIdx,
    cursor: &mut AxfrCursor,
    buf: &mut ResponseBuf,
    first: bool,
    done: &mut bool,
) -> u16 {
    let apex = db.zone(zone).apex;
    let apex_name = db.zone(zone).apex_name.clone();
    let soa = db.table.find_rrset(apex, zone, Type::SOA as u16);
    let mut count: u16 = 0;

    if first {
        // The question holds the apex name; let everything compress
        // against it.
        buf.add_compression_ancestors(&db.table, apex, DNS_HEADER_SIZE);
    }
    if !cursor.started {
        match soa {
            Some(rrset) => {
                debug_assert_eq!(rrset.rrs.len(), 1);
                if !buf.encode_rr(&db.table, &RrOwner::Domain(apex), &rrset.rrs[0]) {
                    return count;
                }
                count += 1;
                cursor.started = true;
            }
            None => {
                buf.set_rcode(Rcode::ServFail as u8);
                *done = true;
                return count;
            }
        }
    }

    while let Some(domain) = cursor.current {
        if !db.table.name(domain).is_subdomain_of(&apex_name) {
            cursor.current = None;
            break;
        }
        let rrsets = &db.table.domain(domain).rrsets;
        while cursor.rrset_index < rrsets.len() {
            let rrset = &rrsets[cursor.rrset_index];
            let skip = rrset.zone != zone
                || (domain == apex && rrset.rrtype() == Type::SOA as u16);
            if !skip {
                while cursor.rr_index < rrset.rrs.len() {
                    let rr = &rrset.rrs[cursor.rr_index];
                    if !buf.encode_rr(&db.table, &RrOwner::Domain(domain), rr) {
                        return count;
                    }
                    count += 1;
                    cursor.rr_index += 1;
                }
            }
            cursor.rrset_index += 1;
            cursor.rr_index = 0;
        }
        cursor.rrset_index = 0;
        cursor.current = db.table.successor(&db.table.name(domain).clone());
    }

    // Terminating apex SOA.
    if let Some(rrset) = soa {
        if !buf.encode_rr(&db.table, &RrOwner::Domain(apex), &rrset.rrs[0]) {
            return count;
        }
        count += 1;
    }
    *done = true;
    count
}

fn ixfr_fill(
    data: &IxfrData,
    cursor: &mut IxfrCursor,
    buf: &mut ResponseBuf,
    done: &mut bool,
) -> u16 {
    let segments: [&[u8]; 4] = [&data.newsoa, &data.oldsoa, &data.del, &data.add];
    let mut count: u16 = 0;
    while cursor.segment < segments.len() {
        let segment = segments[cursor.segment];
        while cursor.offset < segment.len() {
            let rrlen = match wire_rr_len(segment, cursor.offset) {
                Some(len) => len,
                None => {
                    log::error!(target: "xfr", "corrupt stored delta");
                    buf.set_rcode(Rcode::ServFail as u8);
                    *done = true;
                    return count;
                }
            };
            let rr = &segment[cursor.offset..cursor.offset + rrlen];
            if buf.position() + rrlen > buf.limit() {
                return count;
            }
            buf.extend(rr);
            count += 1;
            cursor.offset += rrlen;
        }
        cursor.segment += 1;
        cursor.offset = 0;
    }
    *done = true;
    count
}

/// Length of the uncompressed wire RR at `offset`: owner name, fixed
/// header, rdata.
pub fn wire_rr_len(data: &[u8], mut offset: usize) -> Option<usize> {
    let start = offset;
    loop {
        let len = *data.get(offset)? as usize;
        if len > 0x3f {
            return None;
        }
        offset += len + 1;
        if len == 0 {
            break;
        }
    }
    if offset + DNS_RR_HEADER_SIZE > data.len() {
        return None;
    }
    let rdlen = BigEndian::read_u16(&data[offset + 8..]) as usize;
    let total = offset - start + DNS_RR_HEADER_SIZE + rdlen;
    if start + total > data.len() {
        return None;
    }
    Some(total)
}
