//! Statistics counters, read at dump time by the operational tooling.
//! Plain relaxed atomics: the core is single-threaded per worker, the
//! dumper may not be.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::constants::Class;
use crate::request::ParsedQuery;

const QTYPE_SLOTS: usize = 256;

pub struct ServerStats {
    queries: AtomicU64,
    dropped: AtomicU64,
    truncated: AtomicU64,
    edns: AtomicU64,
    edns_err: AtomicU64,
    tsig_err: AtomicU64,
    with_aa: AtomicU64,
    without_aa: AtomicU64,
    raxfr: AtomicU64,
    rixfr: AtomicU64,
    by_opcode: [AtomicU64; 16],
    by_rcode: [AtomicU64; 16],
    class_in: AtomicU64,
    class_ch: AtomicU64,
    class_other: AtomicU64,
    by_qtype: [AtomicU64; QTYPE_SLOTS],
    qtype_other: AtomicU64,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerStats {
    pub fn new() -> ServerStats {
        ServerStats {
            queries: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            truncated: AtomicU64::new(0),
            edns: AtomicU64::new(0),
            edns_err: AtomicU64::new(0),
            tsig_err: AtomicU64::new(0),
            with_aa: AtomicU64::new(0),
            without_aa: AtomicU64::new(0),
            raxfr: AtomicU64::new(0),
            rixfr: AtomicU64::new(0),
            by_opcode: std::array::from_fn(|_| AtomicU64::new(0)),
            by_rcode: std::array::from_fn(|_| AtomicU64::new(0)),
            class_in: AtomicU64::new(0),
            class_ch: AtomicU64::new(0),
            class_other: AtomicU64::new(0),
            by_qtype: std::array::from_fn(|_| AtomicU64::new(0)),
            qtype_other: AtomicU64::new(0),
        }
    }

    #[inline]
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queries_inc(&self) {
        Self::inc(&self.queries);
    }

    pub fn dropped_inc(&self) {
        Self::inc(&self.dropped);
    }

    pub fn truncated_inc(&self) {
        Self::inc(&self.truncated);
    }

    pub fn edns_err_inc(&self) {
        Self::inc(&self.edns_err);
    }

    pub fn tsig_err_inc(&self) {
        Self::inc(&self.tsig_err);
    }

    pub fn raxfr_inc(&self) {
        Self::inc(&self.raxfr);
    }

    pub fn rixfr_inc(&self) {
        Self::inc(&self.rixfr);
    }

    /// Per-query bookkeeping once the question is decoded.
    pub fn count_query(&self, q: &ParsedQuery) {
        Self::inc(&self.by_opcode[(q.opcode & 0x0f) as usize]);
        if q.qclass == Class::In as u16 {
            Self::inc(&self.class_in);
        } else if q.qclass == Class::Ch as u16 {
            Self::inc(&self.class_ch);
        } else {
            Self::inc(&self.class_other);
        }
        match self.by_qtype.get(q.qtype as usize) {
            Some(counter) => Self::inc(counter),
            None => Self::inc(&self.qtype_other),
        }
        if q.edns.status == crate::edns::EdnsStatus::Ok {
            Self::inc(&self.edns);
        }
    }

    pub fn count_rcode(&self, rcode: u8) {
        Self::inc(&self.by_rcode[(rcode & 0x0f) as usize]);
    }

    pub fn count_aa(&self, aa: bool) {
        if aa {
            Self::inc(&self.with_aa);
        } else {
            Self::inc(&self.without_aa);
        }
    }

    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn truncated(&self) -> u64 {
        self.truncated.load(Ordering::Relaxed)
    }

    pub fn rcode(&self, rcode: u8) -> u64 {
        self.by_rcode[(rcode & 0x0f) as usize].load(Ordering::Relaxed)
    }

    pub fn qtype(&self, qtype: u16) -> u64 {
        match self.by_qtype.get(qtype as usize) {
            Some(counter) => counter.load(Ordering::Relaxed),
            None => self.qtype_other.load(Ordering::Relaxed),
        }
    }

    /// One-line report for the periodic metrics log.
    pub fn log_report(&self) {
        log::info!(
            target: "metrics",
            "queries={} dropped={} truncated={} edns={} ednserr={} tsigerr={} aa={} noaa={} axfr={} ixfr={} noerror={} formerr={} servfail={} nxdomain={} refused={}",
            self.queries.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
            self.truncated.load(Ordering::Relaxed),
            self.edns.load(Ordering::Relaxed),
            self.edns_err.load(Ordering::Relaxed),
            self.tsig_err.load(Ordering::Relaxed),
            self.with_aa.load(Ordering::Relaxed),
            self.without_aa.load(Ordering::Relaxed),
            self.raxfr.load(Ordering::Relaxed),
            self.rixfr.load(Ordering::Relaxed),
            self.rcode(0),
            self.rcode(1),
            self.rcode(2),
            self.rcode(3),
            self.rcode(5),
        );
    }
}
