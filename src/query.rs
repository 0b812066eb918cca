//! The query engine: takes a parsed request, resolves it against the
//! zone database, and produces a wire response or a transfer stream.
//!
//! Resolution is synchronous pure computation over the database; the
//! engine never blocks and never mutates shared state other than the
//! statistics counters.

use crate::acl::{check_acl, AclAction};
use crate::answer::{encode_answer, Answer, ResponseBuf, RrOwner, RrsetSource, Section};
use crate::config::ServerOptions;
use crate::constants::*;
use crate::name::Name;
use crate::namedb::{DomainIdx, NameDb};
use crate::nsec3;
use crate::request::{parse_query, ParsedQuery, Reject, Request, Transport};
use crate::stats::ServerStats;
use crate::tsig::{TsigAuthority, TsigStatus, TsigVerdict};
use crate::xfr::XfrStream;
use crate::zone::ZoneIdx;

/// What became of one inbound message.
pub enum QueryState {
    /// Too mangled to answer; nothing goes back.
    Discarded,
    /// A single response packet.
    Answered(Vec<u8>),
    /// A multi-packet transfer; the caller pulls packets as the
    /// connection drains.
    InXfr(XfrStream),
}

pub struct QueryEngine<'a> {
    pub db: &'a NameDb,
    pub opts: &'a ServerOptions,
    pub stats: &'a ServerStats,
    pub tsig: Option<&'a dyn TsigAuthority>,
}

const ADDITIONAL_DEFAULT: &[(u16, Section)] = &[
    (Type::A as u16, Section::AdditionalA),
    (Type::AAAA as u16, Section::AdditionalAaaa),
];

const ADDITIONAL_RT: &[(u16, Section)] = &[
    (Type::A as u16, Section::AdditionalA),
    (Type::AAAA as u16, Section::AdditionalAaaa),
    (Type::X25 as u16, Section::AdditionalOther),
    (Type::ISDN as u16, Section::AdditionalOther),
];

impl<'a> QueryEngine<'a> {
    pub fn process(&self, req: &Request) -> QueryState {
        self.stats.queries_inc();
        let q = match parse_query(req, self.opts) {
            Ok(q) => q,
            Err(Reject::Drop) => {
                self.stats.dropped_inc();
                return QueryState::Discarded;
            }
            Err(Reject::FormErr) => {
                return QueryState::Answered(self.error_packet(req, None, Rcode::FormErr, 0));
            }
            Err(Reject::FormErrBadVers(edns)) => {
                // A broken OPT caps the response at 512 bytes but still
                // gets an answer, carrying BADVERS.
                self.stats.edns_err_inc();
                let mut packet = self.header_only(req, Rcode::FormErr);
                edns.write_response(&mut packet, UDP_MAX_MESSAGE_LEN as u16);
                bump_arcount(&mut packet);
                self.stats.count_rcode(Rcode::FormErr as u8);
                return QueryState::Answered(packet);
            }
        };
        self.stats.count_query(&q);

        if q.tsig.status == TsigStatus::Ok {
            let verdict = match self.tsig {
                Some(authority) => authority.verify(&q.tsig, &req.packet[..q.tsig.position]),
                None => TsigVerdict::BadKey,
            };
            if verdict != TsigVerdict::Ok {
                self.stats.tsig_err_inc();
                return QueryState::Answered(self.error_packet(
                    req,
                    Some(&q),
                    Rcode::NotAuth,
                    verdict.error_code(),
                ));
            }
        }

        if q.opcode == Opcode::Notify as u8 {
            return QueryState::Answered(self.answer_notify(req, &q));
        }
        if q.opcode != Opcode::Query as u8 {
            return QueryState::Answered(self.error_packet(req, Some(&q), Rcode::NotImp, 0));
        }

        if q.qclass == Class::In as u16 || q.qclass == Class::Any as u16 {
            if q.qtype == Type::AXFR as u16 {
                self.answer_axfr(req, q)
            } else if q.qtype == Type::IXFR as u16 {
                self.answer_ixfr(req, q)
            } else {
                QueryState::Answered(self.answer_query(req, &q))
            }
        } else if q.qclass == Class::Ch as u16 {
            QueryState::Answered(self.answer_chaos(req, &q))
        } else {
            QueryState::Answered(self.error_packet(req, Some(&q), Rcode::Refused, 0))
        }
    }

    /// A header-only error response: QR set, counts zeroed, no question
    /// echoed.
    fn header_only(&self, req: &Request, rcode: Rcode) -> Vec<u8> {
        let mut packet = req.packet[..DNS_HEADER_SIZE].to_vec();
        packet[2] |= (FLAG_QR >> 8) as u8;
        packet[3] = (packet[3] & 0xf0) | (rcode as u8 & 0x0f);
        for b in &mut packet[4..12] {
            *b = 0;
        }
        packet
    }

    fn error_packet(
        &self,
        req: &Request,
        q: Option<&ParsedQuery>,
        rcode: Rcode,
        tsig_error: u16,
    ) -> Vec<u8> {
        let mut packet = self.header_only(req, rcode);
        if let Some(q) = q {
            if q.edns.status != crate::edns::EdnsStatus::NotPresent {
                q.edns
                    .write_response(&mut packet, self.payload_size(req) as u16);
                bump_arcount(&mut packet);
            }
            if q.tsig.status == TsigStatus::Ok {
                if let Some(authority) = self.tsig {
                    let rr = authority.sign(&q.tsig, &packet, tsig_error);
                    packet.extend_from_slice(&rr);
                    bump_arcount(&mut packet);
                }
            }
        }
        self.stats.count_rcode(rcode as u8);
        packet
    }

    fn payload_size(&self, req: &Request) -> usize {
        if req.source.is_ipv6() {
            self.opts.ipv6_edns_size as usize
        } else {
            self.opts.ipv4_edns_size as usize
        }
    }

    /// A response buffer primed with the request header and question,
    /// RD and CD copied, QR set, space reserved for OPT and TSIG.
    fn response_buf(&self, req: &Request, q: &ParsedQuery) -> ResponseBuf {
        let mut prefix = req.packet[..q.question_end].to_vec();
        let flags = (q.flags & (FLAG_RD | FLAG_CD)) | FLAG_QR;
        prefix[2] = (flags >> 8) as u8;
        prefix[3] = flags as u8;
        prefix[4] = 0;
        prefix[5] = 1; // QDCOUNT
        for b in &mut prefix[6..12] {
            *b = 0;
        }
        let reserved = q.edns.reserved_space() + q.tsig.reserved_space();
        let limit = q.maxlen.saturating_sub(reserved).max(DNS_HEADER_SIZE);
        ResponseBuf::new(&prefix, limit, self.db.table.count())
    }

    /// Appends the optional OPT and TSIG records after the sections are
    /// encoded.
    fn finish_response(
        &self,
        buf: &mut ResponseBuf,
        req: &Request,
        q: &ParsedQuery,
        tsig_error: u16,
    ) {
        buf.raise_limit(q.maxlen);
        if q.edns.status != crate::edns::EdnsStatus::NotPresent {
            let mut opt = Vec::with_capacity(OPT_RR_LEN);
            q.edns.write_response(&mut opt, self.payload_size(req) as u16);
            buf.extend(&opt);
            buf.bump_arcount();
        }
        if q.tsig.status == TsigStatus::Ok {
            if let Some(authority) = self.tsig {
                let rr = authority.sign(&q.tsig, buf.as_bytes(), tsig_error);
                buf.extend(&rr);
                buf.bump_arcount();
            }
        }
    }

    /// NOTIFY is acknowledged with NOTIMP after a log record naming the
    /// sender; the transfer client does the actual work out-of-band.
    fn answer_notify(&self, req: &Request, q: &ParsedQuery) -> Vec<u8> {
        let allowed = match self.db.find_zone(&q.qname) {
            Some(zone) => {
                let zone = self.db.zone(zone);
                check_acl(
                    &zone.options.acl,
                    &zone.apex_name,
                    AclAction::Notify,
                    &req.source,
                    q.tsig.key_name.as_ref(),
                )
            }
            None => false,
        };
        if !allowed {
            return self.error_packet(req, Some(q), Rcode::Refused, 0);
        }
        log::info!(target: "query", "notify for {} from {}", q.qname, req.source);
        self.error_packet(req, Some(q), Rcode::NotImp, 0)
    }

    /// CHAOS-class identity queries; everything else in CH is refused.
    fn answer_chaos(&self, req: &Request, q: &ParsedQuery) -> Vec<u8> {
        let mut buf = self.response_buf(req, q);
        let txt = if q.qtype == Type::TXT as u16 || q.qtype == Type::ANY as u16 {
            let qname = &q.qname;
            let is = |s: &str| *qname == s.parse::<Name>().unwrap();
            if is("id.server.") || is("hostname.bind.") {
                Some(self.opts.identity.as_str())
            } else if is("version.server.") || is("version.bind.") {
                Some(self.opts.version.as_str())
            } else {
                None
            }
        } else {
            None
        };
        match txt {
            Some(text) => {
                let text = &text.as_bytes()[..text.len().min(255)];
                let mut rr = vec![0xc0, DNS_HEADER_SIZE as u8];
                rr.extend_from_slice(&(Type::TXT as u16).to_be_bytes());
                rr.extend_from_slice(&(Class::Ch as u16).to_be_bytes());
                rr.extend_from_slice(&0u32.to_be_bytes());
                rr.extend_from_slice(&((text.len() + 1) as u16).to_be_bytes());
                rr.push(text.len() as u8);
                rr.extend_from_slice(text);
                buf.extend(&rr);
                buf.set_count(6, 1);
            }
            None => buf.set_rcode(Rcode::Refused as u8),
        }
        self.finish_response(&mut buf, req, q, TSIG_ERROR_NOERROR);
        self.stats.count_rcode(buf.rcode());
        buf.into_packet()
    }

    fn xfr_prefix(&self, req: &Request, q: &ParsedQuery) -> Vec<u8> {
        let mut prefix = req.packet[..q.question_end].to_vec();
        let flags = (q.flags & (FLAG_RD | FLAG_CD)) | FLAG_QR;
        prefix[2] = (flags >> 8) as u8;
        prefix[3] = flags as u8;
        prefix[4] = 0;
        prefix[5] = 1;
        for b in &mut prefix[6..12] {
            *b = 0;
        }
        prefix
    }

    /// Finds the zone for an outgoing transfer and checks its ACL.
    fn xfr_zone(&self, req: &Request, q: &ParsedQuery) -> Result<ZoneIdx, Vec<u8>> {
        let zone = match self.db.find_zone(&q.qname) {
            Some(zone)
                if self
                    .db
                    .table
                    .find_rrset(self.db.zone(zone).apex, zone, Type::SOA as u16)
                    .is_some() =>
            {
                zone
            }
            // No SOA, no transfer.
            _ => return Err(self.error_packet(req, Some(q), Rcode::Refused, 0)),
        };
        let z = self.db.zone(zone);
        if !check_acl(
            &z.options.acl,
            &z.apex_name,
            AclAction::ProvideXfr,
            &req.source,
            q.tsig.key_name.as_ref(),
        ) {
            return Err(self.error_packet(req, Some(q), Rcode::Refused, 0));
        }
        Ok(zone)
    }

    fn answer_axfr(&self, req: &Request, q: ParsedQuery) -> QueryState {
        if req.transport == Transport::Udp {
            return QueryState::Answered(self.error_packet(req, Some(&q), Rcode::Refused, 0));
        }
        let zone = match self.xfr_zone(req, &q) {
            Ok(zone) => zone,
            Err(packet) => return QueryState::Answered(packet),
        };
        self.stats.raxfr_inc();
        log::info!(
            target: "xfr",
            "axfr for zone {} to {}",
            self.db.zone(zone).apex_name,
            req.source
        );
        let prefix = self.xfr_prefix(req, &q);
        QueryState::InXfr(XfrStream::axfr(
            self.db, zone, prefix, q.maxlen, q.edns, q.tsig,
        ))
    }

    fn answer_ixfr(&self, req: &Request, q: ParsedQuery) -> QueryState {
        if req.transport == Transport::Udp {
            return QueryState::Answered(self.error_packet(req, Some(&q), Rcode::NotImp, 0));
        }
        let zone = match self.xfr_zone(req, &q) {
            Ok(zone) => zone,
            Err(packet) => return QueryState::Answered(packet),
        };
        self.stats.rixfr_inc();
        let z = self.db.zone(zone);
        let current = z.serial();

        // An up-to-date client gets just the SOA back.
        if q.ixfr_serial.is_some() && q.ixfr_serial == current {
            let mut buf = self.response_buf(req, &q);
            buf.set_flag(FLAG_AA);
            let mut answer = Answer::new();
            answer.add_rrset(
                Section::Answer,
                RrOwner::Domain(z.apex),
                RrsetSource::Stored {
                    domain: z.apex,
                    zone,
                    rtype: Type::SOA as u16,
                },
            );
            encode_answer(&mut buf, self.db, &answer, q.edns.dnssec_ok);
            self.finish_response(&mut buf, req, &q, TSIG_ERROR_NOERROR);
            self.stats.count_rcode(buf.rcode());
            return QueryState::Answered(buf.into_packet());
        }

        let delta = q.ixfr_serial.and_then(|serial| {
            let current = current?;
            z.ixfr
                .iter()
                .position(|d| d.oldserial == serial && d.newserial == current)
        });
        let prefix = self.xfr_prefix(req, &q);
        match delta {
            Some(index) => {
                log::info!(
                    target: "xfr",
                    "ixfr for zone {} to {} (serial {} -> {})",
                    z.apex_name,
                    req.source,
                    q.ixfr_serial.unwrap(),
                    current.unwrap()
                );
                QueryState::InXfr(XfrStream::ixfr(
                    zone, index, prefix, q.maxlen, q.edns, q.tsig,
                ))
            }
            None => {
                // No usable delta: fall back to a full transfer.
                log::info!(
                    target: "xfr",
                    "ixfr fallback to axfr for zone {} to {}",
                    z.apex_name,
                    req.source
                );
                QueryState::InXfr(XfrStream::axfr(
                    self.db, zone, prefix, q.maxlen, q.edns, q.tsig,
                ))
            }
        }
    }

    /// Class-IN resolution.
    fn answer_query(&self, req: &Request, q: &ParsedQuery) -> Vec<u8> {
        let mut zone = match self.db.find_authoritative_zone(&q.qname) {
            Some(zone) => zone,
            None => return self.error_packet(req, Some(q), Rcode::ServFail, 0),
        };

        let lookup = self.db.table.lookup(&q.qname);
        let closest_match = lookup.closest_match;
        let mut closest_encloser = lookup.closest_encloser;
        let mut exact = lookup.exact;
        if !self.db.table.domain(closest_encloser).is_existing {
            exact = false;
            while !self.db.table.domain(closest_encloser).is_existing {
                closest_encloser = self
                    .db
                    .table
                    .parent(closest_encloser)
                    .expect("the root always exists");
            }
        }

        // RFC 4035 3.1.4.1: a DS query at a zone cut belongs to the
        // parent side.
        let mut ds_at_apex = exact
            && q.qtype == Type::DS as u16
            && closest_encloser == self.db.zone(zone).apex;
        if ds_at_apex {
            if let Some(parent) = self.db.zone(zone).parent {
                zone = parent;
                ds_at_apex = false;
            }
        }

        {
            let z = self.db.zone(zone);
            if !check_acl(
                &z.options.acl,
                &z.apex_name,
                AclAction::Query,
                &req.source,
                q.tsig.key_name.as_ref(),
            ) {
                return self.error_packet(req, Some(q), Rcode::Refused, 0);
            }
        }

        let mut r = Resolver {
            db: self.db,
            zone,
            qname: &q.qname,
            qtype: q.qtype,
            qclass: q.qclass,
            dnssec_ok: q.edns.dnssec_ok,
            cname_count: 0,
            answer: Answer::new(),
            rcode: Rcode::NoError as u8,
            aa: true,
            servfail: false,
        };

        if ds_at_apex {
            // DS at our apex without the parent zone: NODATA with AA.
            r.aa = q.qclass != Class::Any as u16;
            r.answer_nodata(closest_encloser);
        } else {
            let delegation = self
                .db
                .table
                .find_enclosing_rrset(closest_encloser, zone, Type::NS as u16)
                .map(|(domain, _)| domain)
                .filter(|&domain| domain != self.db.zone(zone).apex);
            match delegation {
                Some(deleg)
                    if !(exact
                        && q.qtype == Type::DS as u16
                        && closest_encloser == deleg) =>
                {
                    r.answer_delegation(deleg);
                }
                _ => {
                    r.aa = q.qclass != Class::Any as u16;
                    r.answer_authoritative(
                        0,
                        q.qname.clone(),
                        exact,
                        closest_match,
                        closest_encloser,
                    );
                }
            }
        }

        if r.servfail {
            return self.error_packet(req, Some(q), Rcode::ServFail, 0);
        }

        let mut buf = self.response_buf(req, q);
        // The question section doubles as compression fodder: register
        // the closest encloser's labels inside the query name, and the
        // query name itself for wildcard-synthesised owners.
        let offset =
            DNS_HEADER_SIZE + q.qname.len() - self.db.table.name(closest_encloser).len();
        buf.add_compression_ancestors(&self.db.table, closest_encloser, offset);
        buf.add_compression_query_name(DNS_HEADER_SIZE);

        if r.aa {
            buf.set_flag(FLAG_AA);
        }
        buf.set_rcode(r.rcode);
        encode_answer(&mut buf, self.db, &r.answer, q.edns.dnssec_ok);
        if buf.flags() & FLAG_TC != 0 {
            self.stats.truncated_inc();
        }
        self.stats.count_aa(r.aa);
        self.finish_response(&mut buf, req, q, TSIG_ERROR_NOERROR);
        self.stats.count_rcode(buf.rcode());
        buf.into_packet()
    }
}

fn bump_arcount(packet: &mut [u8]) {
    let count = u16::from_be_bytes([packet[10], packet[11]]) + 1;
    packet[10..12].copy_from_slice(&count.to_be_bytes());
}

/// The matched node of an authoritative answer: the domain whose
/// RRsets are served and the owner name they are served under (which
/// differs when a wildcard was expanded).
struct MatchNode {
    domain: DomainIdx,
    owner: RrOwner,
}

struct Resolver<'a> {
    db: &'a NameDb,
    zone: ZoneIdx,
    qname: &'a Name,
    qtype: u16,
    qclass: u16,
    dnssec_ok: bool,
    /// After one CNAME has been followed, NXDOMAIN/NODATA outcomes no
    /// longer rewrite the RCODE or add the negative SOA.
    cname_count: u32,
    answer: Answer,
    rcode: u8,
    aa: bool,
    servfail: bool,
}

impl<'a> Resolver<'a> {
    fn apex(&self) -> DomainIdx {
        self.db.zone(self.zone).apex
    }

    fn secure(&self) -> bool {
        self.dnssec_ok && self.db.zone(self.zone).is_secure
    }

    fn uses_nsec3(&self) -> bool {
        self.db.zone(self.zone).nsec3.is_some()
    }

    /// Queues an RRset and collates the additional address records its
    /// rdata names call for.
    fn add_rrset(&mut self, section: Section, owner: RrOwner, domain: DomainIdx, rtype: u16) -> bool {
        let added = self.answer.add_rrset(
            section,
            owner,
            RrsetSource::Stored {
                domain,
                zone: self.zone,
                rtype,
            },
        );
        match rtype {
            t if t == Type::NS as u16 => {
                self.add_additional(domain, rtype, 0, true, ADDITIONAL_DEFAULT)
            }
            t if t == Type::MB as u16 => {
                self.add_additional(domain, rtype, 0, false, ADDITIONAL_DEFAULT)
            }
            t if t == Type::MX as u16 || t == Type::KX as u16 => {
                self.add_additional(domain, rtype, 1, false, ADDITIONAL_DEFAULT)
            }
            t if t == Type::RT as u16 => {
                self.add_additional(domain, rtype, 1, false, ADDITIONAL_RT)
            }
            _ => {}
        }
        added
    }

    /// For each rdata name target, appends its address RRsets, going
    /// through a wildcard when the target itself does not exist. Glue
    /// is only handed out for NS targets.
    fn add_additional(
        &mut self,
        master_domain: DomainIdx,
        master_type: u16,
        rdata_index: usize,
        allow_glue: bool,
        types: &[(u16, Section)],
    ) {
        let rrset = match self.db.table.find_rrset(master_domain, self.zone, master_type) {
            Some(rrset) => rrset,
            None => return,
        };
        let targets: Vec<DomainIdx> = rrset
            .rrs
            .iter()
            .filter_map(|rr| match rr.rdatas.get(rdata_index) {
                Some(crate::rdata::RdataAtom::Domain(d)) => Some(*d),
                _ => None,
            })
            .collect();
        for additional in targets {
            if !allow_glue && self.db.is_glue(additional, self.zone) {
                continue;
            }
            let mut matched = additional;
            while !self.db.table.domain(matched).is_existing {
                matched = self
                    .db
                    .table
                    .parent(matched)
                    .expect("the root always exists");
            }
            if additional != matched {
                // The target name does not exist; a wildcard below the
                // match may still synthesise its addresses.
                if let Some(wchild) = self.db.table.wildcard_child(matched) {
                    for &(rtype, section) in types {
                        if let Some(rrset) = self.db.table.find_rrset_any(wchild, rtype) {
                            let owner = RrOwner::Synthetic {
                                name: self.db.table.name(additional).clone(),
                                encloser: matched,
                                slot: additional.number(),
                            };
                            self.answer.add_rrset(
                                section,
                                owner,
                                RrsetSource::Stored {
                                    domain: wchild,
                                    zone: rrset.zone,
                                    rtype,
                                },
                            );
                        }
                    }
                }
            } else {
                for &(rtype, section) in types {
                    if let Some(rrset) = self.db.table.find_rrset_any(additional, rtype) {
                        self.answer.add_rrset(
                            section,
                            RrOwner::Domain(additional),
                            RrsetSource::Stored {
                                domain: additional,
                                zone: rrset.zone,
                                rtype,
                            },
                        );
                    }
                }
            }
        }
    }

    /// The NSEC covering a non-existent name sits at the closest match,
    /// or at a predecessor when the match is an empty non-terminal.
    fn find_covering_nsec(&self, start: DomainIdx) -> Option<DomainIdx> {
        let mut cur = Some(start);
        while let Some(domain) = cur {
            if self
                .db
                .table
                .find_rrset(domain, self.zone, Type::NSEC as u16)
                .is_some()
            {
                return Some(domain);
            }
            if domain == self.apex() {
                // Never look outside the zone.
                return None;
            }
            cur = self
                .db
                .table
                .predecessor(&self.db.table.name(domain).clone());
        }
        None
    }

    fn add_covering_nsec(&mut self, start: DomainIdx) {
        if let Some(nsec) = self.find_covering_nsec(start) {
            self.add_rrset(
                Section::Authority,
                RrOwner::Domain(nsec),
                nsec,
                Type::NSEC as u16,
            );
        }
    }

    /// A referral: NS of the delegation in authority, AA clear, and
    /// under DO either the DS or the denial that none exists.
    fn answer_delegation(&mut self, deleg: DomainIdx) {
        self.aa = false;
        self.add_rrset(
            Section::Authority,
            RrOwner::Domain(deleg),
            deleg,
            Type::NS as u16,
        );
        if self.secure() {
            if self
                .db
                .table
                .find_rrset(deleg, self.zone, Type::DS as u16)
                .is_some()
            {
                self.add_rrset(
                    Section::Authority,
                    RrOwner::Domain(deleg),
                    deleg,
                    Type::DS as u16,
                );
            } else if self.uses_nsec3() {
                nsec3::add_ds_proof(self.db, self.zone, &mut self.answer, deleg, true);
            } else if self
                .db
                .table
                .find_rrset(deleg, self.zone, Type::NSEC as u16)
                .is_some()
            {
                self.add_rrset(
                    Section::Authority,
                    RrOwner::Domain(deleg),
                    deleg,
                    Type::NSEC as u16,
                );
            }
        }
    }

    /// The negative SOA (TTL clamped to the SOA MINIMUM).
    fn answer_soa(&mut self) {
        if self.qclass != Class::Any as u16 {
            self.answer.add_rrset(
                Section::Authority,
                RrOwner::Domain(self.apex()),
                RrsetSource::NegativeSoa { zone: self.zone },
            );
        }
    }

    /// Name exists, type does not. In the wildcard no-data case
    /// `original` is the wildcard entry itself, never the expansion.
    fn answer_nodata(&mut self, original: DomainIdx) {
        if self.cname_count == 0 {
            self.answer_soa();
        }
        if self.secure() {
            if self.uses_nsec3() {
                nsec3::answer_nodata(self.db, self.zone, &mut self.answer, original, self.qtype);
            } else {
                self.add_covering_nsec(original);
            }
        }
    }

    fn answer_nxdomain(&mut self) {
        if self.cname_count == 0 {
            self.rcode = Rcode::NxDomain as u8;
            self.answer_soa();
        }
    }

    /// Serves the matched domain: the queried type, every type for ANY,
    /// or a once-only CNAME follow.
    fn answer_domain(&mut self, matched: MatchNode, original: DomainIdx) {
        let MatchNode { domain, owner } = matched;
        if self.qtype == Type::ANY as u16 {
            // When DO is set on a secure zone the per-RRset appendix
            // supplies the signatures, so the RRSIG RRset itself is not
            // listed; otherwise it is an ordinary RRset.
            let skip_rrsig = self.secure();
            let rtypes: Vec<u16> = self
                .db
                .table
                .domain(domain)
                .rrsets
                .iter()
                .filter(|rs| rs.zone == self.zone)
                .map(|rs| rs.rrtype())
                .filter(|&t| !(skip_rrsig && t == Type::RRSIG as u16))
                .collect();
            if rtypes.is_empty() {
                self.answer_nodata(original);
                return;
            }
            for rtype in rtypes {
                self.add_rrset(Section::Answer, owner.clone(), domain, rtype);
            }
        } else if self
            .db
            .table
            .find_rrset(domain, self.zone, self.qtype)
            .is_some()
        {
            self.add_rrset(Section::Answer, owner.clone(), domain, self.qtype);
        } else if self
            .db
            .table
            .find_rrset(domain, self.zone, Type::CNAME as u16)
            .is_some()
            && self.qtype != Type::CNAME as u16
        {
            // If the RRset was already queued we are in a CNAME loop;
            // do not follow it again.
            let added = self.add_rrset(
                Section::Answer,
                owner.clone(),
                domain,
                Type::CNAME as u16,
            );
            if added && self.cname_count == 0 {
                self.cname_count += 1;
                let targets: Vec<DomainIdx> = self
                    .db
                    .table
                    .find_rrset(domain, self.zone, Type::CNAME as u16)
                    .map(|rrset| {
                        rrset
                            .rrs
                            .iter()
                            .filter_map(|rr| match rr.rdatas.first() {
                                Some(crate::rdata::RdataAtom::Domain(d)) => Some(*d),
                                _ => None,
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                for target in targets {
                    let mut encloser = target;
                    while !self.db.table.domain(encloser).is_existing {
                        encloser = self
                            .db
                            .table
                            .parent(encloser)
                            .expect("the root always exists");
                    }
                    let target_name = self.db.table.name(target).clone();
                    self.answer_authoritative(
                        target.number(),
                        target_name,
                        target == encloser,
                        target,
                        encloser,
                    );
                }
            }
        } else {
            self.answer_nodata(original);
            return;
        }

        if self.qclass != Class::Any as u16 {
            let apex = self.apex();
            if self
                .db
                .table
                .find_rrset(apex, self.zone, Type::NS as u16)
                .is_some()
            {
                self.add_rrset(
                    Section::Authority,
                    RrOwner::Domain(apex),
                    apex,
                    Type::NS as u16,
                );
            }
        }
    }

    /// The authoritative answer for one (possibly CNAME-reached) name.
    /// `slot` is the compression slot a wildcard expansion binds to:
    /// 0 for the original query name, the target's domain number on a
    /// CNAME hop.
    fn answer_authoritative(
        &mut self,
        slot: u32,
        name: Name,
        exact: bool,
        closest_match: DomainIdx,
        closest_encloser: DomainIdx,
    ) {
        let mut original = closest_match;
        let matched: Option<MatchNode> = if exact {
            Some(MatchNode {
                domain: closest_match,
                owner: RrOwner::Domain(closest_match),
            })
        } else if let Some(wchild) = self.db.table.wildcard_child(closest_encloser) {
            original = wchild;
            Some(MatchNode {
                domain: wchild,
                owner: RrOwner::Synthetic {
                    name: name.clone(),
                    encloser: closest_encloser,
                    slot,
                },
            })
        } else {
            None
        };

        if self.secure() {
            if self.uses_nsec3() {
                if !exact && matched.is_some() {
                    // Wildcard expansion: prove the name itself did not
                    // exist.
                    if !nsec3::answer_wildcard(
                        self.db,
                        self.zone,
                        &mut self.answer,
                        closest_encloser,
                        &name,
                    ) {
                        self.servfail = true;
                        return;
                    }
                }
                if matched.is_none() {
                    if !nsec3::add_closest_encloser_proof(
                        self.db,
                        self.zone,
                        &mut self.answer,
                        closest_encloser,
                        &name,
                    ) {
                        self.servfail = true;
                        return;
                    }
                    nsec3::add_wildcard_denial(
                        self.db,
                        self.zone,
                        &mut self.answer,
                        closest_encloser,
                    );
                }
            } else {
                if !exact {
                    // The name was not found (or came from a wildcard):
                    // include the covering NSEC.
                    self.add_covering_nsec(closest_match);
                }
                if matched.is_none() {
                    // No wildcard either; prove its absence from where
                    // `*.closest_encloser` would sort.
                    if let Ok(wname) = self.db.table.name(closest_encloser).wildcard_child() {
                        let start = self.db.table.lookup(&wname).closest_match;
                        self.add_covering_nsec(start);
                    }
                }
            }
        }

        match matched {
            Some(matched) => self.answer_domain(matched, original),
            None => self.answer_nxdomain(),
        }
    }
}
