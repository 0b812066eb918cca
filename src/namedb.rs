//! The in-memory namespace database: an arena of domains ordered in
//! DNSSEC canonical form, the RRsets hanging off them, and the zones
//! rooted in the tree.
//!
//! Domains are created on first insertion and never removed; a domain
//! whose last RRset disappears is only marked non-existing. This keeps
//! domain numbers stable, which the per-response compression tables
//! index by.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::PathBuf;

use byteorder::{BigEndian, ByteOrder};

use crate::constants::*;
use crate::name::Name;
use crate::rdata::{self, RdataAtom};
use crate::zone::{Zone, ZoneIdx, ZoneOptions};

/// Index of a domain within the table. Domain numbers are `index + 1`;
/// number 0 is reserved for a query name synthesised from a wildcard.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DomainIdx(u32);

impl DomainIdx {
    #[inline]
    pub fn number(self) -> u32 {
        self.0 + 1
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A single resource record. The owner back-reference and the typed
/// rdata atoms follow the database design: indices instead of pointers.
#[derive(Clone, Debug)]
pub struct Rr {
    pub owner: DomainIdx,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdatas: Vec<RdataAtom>,
}

/// A non-empty list of RRs sharing owner, class and type, tagged with
/// the zone the data belongs to (glue under a cut belongs to the
/// parent zone even when the child zone is served here too).
#[derive(Clone, Debug)]
pub struct Rrset {
    pub zone: ZoneIdx,
    pub rrs: Vec<Rr>,
}

impl Rrset {
    #[inline]
    pub fn rrtype(&self) -> u16 {
        debug_assert!(!self.rrs.is_empty());
        self.rrs[0].rtype
    }

    #[inline]
    pub fn rrclass(&self) -> u16 {
        debug_assert!(!self.rrs.is_empty());
        self.rrs[0].class
    }
}

pub struct Domain {
    name: Name,
    parent: Option<DomainIdx>,
    wildcard_child: Option<DomainIdx>,
    pub rrsets: Vec<Rrset>,
    /// The name is occupied by data or is an empty non-terminal.
    pub is_existing: bool,
}

/// Result of a closest-match search.
#[derive(Copy, Clone, Debug)]
pub struct LookupResult {
    /// The greatest existing node canonically ≤ the searched name;
    /// equals `closest_encloser` on an exact hit.
    pub closest_match: DomainIdx,
    /// The longest ancestor of the searched name present in the table.
    pub closest_encloser: DomainIdx,
    pub exact: bool,
}

pub struct DomainTable {
    domains: Vec<Domain>,
    by_name: BTreeMap<Name, DomainIdx>,
}

impl Default for DomainTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainTable {
    /// A fresh table holding only the root domain.
    pub fn new() -> DomainTable {
        let root = Domain {
            name: Name::root(),
            parent: None,
            wildcard_child: None,
            rrsets: Vec::new(),
            is_existing: true,
        };
        let mut by_name = BTreeMap::new();
        by_name.insert(Name::root(), DomainIdx(0));
        DomainTable {
            domains: vec![root],
            by_name,
        }
    }

    #[inline]
    pub fn root(&self) -> DomainIdx {
        DomainIdx(0)
    }

    /// Number of domains, the root included.
    #[inline]
    pub fn count(&self) -> usize {
        self.domains.len()
    }

    #[inline]
    pub fn domain(&self, idx: DomainIdx) -> &Domain {
        &self.domains[idx.index()]
    }

    #[inline]
    pub fn domain_mut(&mut self, idx: DomainIdx) -> &mut Domain {
        &mut self.domains[idx.index()]
    }

    #[inline]
    pub fn name(&self, idx: DomainIdx) -> &Name {
        &self.domains[idx.index()].name
    }

    #[inline]
    pub fn parent(&self, idx: DomainIdx) -> Option<DomainIdx> {
        self.domains[idx.index()].parent
    }

    pub fn find(&self, name: &Name) -> Option<DomainIdx> {
        self.by_name.get(name).copied()
    }

    /// Inserts `name`, creating any missing ancestors, and maintains
    /// the parents' wildcard-child links.
    pub fn insert(&mut self, name: &Name) -> DomainIdx {
        if let Some(idx) = self.find(name) {
            return idx;
        }
        // Deepest ancestor already present; the root is always there.
        let total = name.label_count();
        let mut depth = 1;
        let mut ancestor = self.root();
        for k in (1..total).rev() {
            // k labels stripped leaves a suffix of total - k labels.
            let suffix = name.strip_left(k);
            match self.find(&suffix) {
                Some(idx) => {
                    ancestor = idx;
                    depth = total - k;
                }
                None => break,
            }
        }
        let mut parent = ancestor;
        for d in depth..total {
            let child_name = name.strip_left(total - d - 1);
            let idx = DomainIdx(self.domains.len() as u32);
            let is_wildcard = child_name.is_wildcard();
            self.domains.push(Domain {
                name: child_name.clone(),
                parent: Some(parent),
                wildcard_child: None,
                rrsets: Vec::new(),
                is_existing: false,
            });
            self.by_name.insert(child_name, idx);
            if is_wildcard {
                self.domains[parent.index()].wildcard_child = Some(idx);
            }
            parent = idx;
        }
        parent
    }

    /// Closest-match search in canonical order.
    pub fn lookup(&self, qname: &Name) -> LookupResult {
        if let Some(idx) = self.find(qname) {
            return LookupResult {
                closest_match: idx,
                closest_encloser: idx,
                exact: true,
            };
        }
        let closest_match = self
            .by_name
            .range((Bound::Unbounded, Bound::Excluded(qname)))
            .next_back()
            .map(|(_, &idx)| idx)
            .unwrap_or_else(|| self.root());
        let mut closest_encloser = closest_match;
        while !qname.is_subdomain_of(self.name(closest_encloser)) {
            closest_encloser = self
                .parent(closest_encloser)
                .expect("the root encloses every name");
        }
        LookupResult {
            closest_match,
            closest_encloser,
            exact: false,
        }
    }

    /// Greatest domain canonically before `name`.
    pub fn predecessor(&self, name: &Name) -> Option<DomainIdx> {
        self.by_name
            .range((Bound::Unbounded, Bound::Excluded(name)))
            .next_back()
            .map(|(_, &idx)| idx)
    }

    /// Smallest domain canonically after `name`.
    pub fn successor(&self, name: &Name) -> Option<DomainIdx> {
        self.by_name
            .range((Bound::Excluded(name), Bound::Unbounded))
            .next()
            .map(|(_, &idx)| idx)
    }

    /// The existing `*` child of `idx`, if any.
    pub fn wildcard_child(&self, idx: DomainIdx) -> Option<DomainIdx> {
        self.domains[idx.index()]
            .wildcard_child
            .filter(|&w| self.domains[w.index()].is_existing)
    }

    pub fn find_rrset(&self, idx: DomainIdx, zone: ZoneIdx, rtype: u16) -> Option<&Rrset> {
        self.domains[idx.index()]
            .rrsets
            .iter()
            .find(|rs| rs.zone == zone && rs.rrtype() == rtype)
    }

    /// Type lookup ignoring the zone tag, for additional-section
    /// address targets that may live under a cut.
    pub fn find_rrset_any(&self, idx: DomainIdx, rtype: u16) -> Option<&Rrset> {
        self.domains[idx.index()]
            .rrsets
            .iter()
            .find(|rs| rs.rrtype() == rtype)
    }

    /// Walks the parent chain for an RRset of `rtype` within `zone`.
    pub fn find_enclosing_rrset(
        &self,
        idx: DomainIdx,
        zone: ZoneIdx,
        rtype: u16,
    ) -> Option<(DomainIdx, &Rrset)> {
        let mut cur = Some(idx);
        while let Some(d) = cur {
            if let Some(rrset) = self.find_rrset(d, zone, rtype) {
                return Some((d, rrset));
            }
            cur = self.parent(d);
        }
        None
    }

    /// Marks `idx` and its ancestors existing (occupied names turn
    /// their ancestors into empty non-terminals).
    fn mark_existing(&mut self, idx: DomainIdx) {
        let mut cur = Some(idx);
        while let Some(d) = cur {
            if self.domains[d.index()].is_existing {
                break;
            }
            self.domains[d.index()].is_existing = true;
            cur = self.domains[d.index()].parent;
        }
    }

    /// Re-derives `is_existing` for `idx` and its ancestors after a
    /// removal: a name stays existing while it has data or existing
    /// descendants.
    fn unmark_if_empty(&mut self, idx: DomainIdx) {
        let mut cur = Some(idx);
        while let Some(d) = cur {
            if d == self.root()
                || !self.domains[d.index()].rrsets.is_empty()
                || self.has_existing_descendant(d)
            {
                break;
            }
            self.domains[d.index()].is_existing = false;
            cur = self.domains[d.index()].parent;
        }
    }

    fn has_existing_descendant(&self, idx: DomainIdx) -> bool {
        let top = self.name(idx).clone();
        self.by_name
            .range((Bound::Excluded(&top), Bound::Unbounded))
            .take_while(|(name, _)| name.is_subdomain_of(&top))
            .any(|(_, &d)| self.domains[d.index()].is_existing)
    }
}

/// Identity of the snapshot file the database was populated from,
/// checked again before any diff replay.
#[derive(Clone, Debug)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub crc: u32,
    pub crc_pos: u64,
}

pub struct NameDb {
    pub table: DomainTable,
    zones: Vec<Zone>,
    zones_by_apex: BTreeMap<Name, ZoneIdx>,
    /// Set once a snapshot has been loaded.
    pub snapshot: Option<SnapshotInfo>,
    /// File position after the last fully applied diff part, so a
    /// reload resumes instead of replaying from the start.
    pub diff_resume: Option<u64>,
}

impl Default for NameDb {
    fn default() -> Self {
        Self::new()
    }
}

impl NameDb {
    pub fn new() -> NameDb {
        NameDb {
            table: DomainTable::new(),
            zones: Vec::new(),
            zones_by_apex: BTreeMap::new(),
            snapshot: None,
            diff_resume: None,
        }
    }

    #[inline]
    pub fn zone(&self, idx: ZoneIdx) -> &Zone {
        &self.zones[idx.index()]
    }

    #[inline]
    pub fn zone_mut(&mut self, idx: ZoneIdx) -> &mut Zone {
        &mut self.zones[idx.index()]
    }

    pub fn zones(&self) -> impl Iterator<Item = (ZoneIdx, &Zone)> {
        self.zones
            .iter()
            .enumerate()
            .map(|(i, z)| (ZoneIdx(i as u32), z))
    }

    /// Exact apex match.
    pub fn find_zone(&self, apex: &Name) -> Option<ZoneIdx> {
        self.zones_by_apex.get(apex).copied()
    }

    /// The zone whose apex is the longest ancestor of `name`.
    pub fn find_authoritative_zone(&self, name: &Name) -> Option<ZoneIdx> {
        for k in 0..name.label_count() {
            if let Some(&idx) = self.zones_by_apex.get(&name.strip_left(k)) {
                return Some(idx);
            }
        }
        None
    }

    /// Finds or creates the zone rooted at `apex` and refreshes the
    /// parent links of every zone.
    pub fn insert_zone(&mut self, apex: &Name, options: ZoneOptions) -> ZoneIdx {
        if let Some(idx) = self.find_zone(apex) {
            return idx;
        }
        log::info!(target: "db", "creating zone {}", apex);
        let apex_domain = self.table.insert(apex);
        let idx = ZoneIdx(self.zones.len() as u32);
        self.zones.push(Zone::new(apex_domain, apex.clone(), options));
        self.zones_by_apex.insert(apex.clone(), idx);
        self.relink_zone_parents();
        idx
    }

    fn relink_zone_parents(&mut self) {
        for i in 0..self.zones.len() {
            let apex_name = self.zones[i].apex_name.clone();
            self.zones[i].parent = if apex_name.is_root() {
                None
            } else {
                self.find_authoritative_zone(&apex_name.strip_left(1))
            };
        }
    }

    /// True iff `idx` lies at or below a delegation other than the
    /// zone's apex NS.
    pub fn is_glue(&self, idx: DomainIdx, zone: ZoneIdx) -> bool {
        match self
            .table
            .find_enclosing_rrset(idx, zone, Type::NS as u16)
        {
            Some((owner, _)) => owner != self.zone(zone).apex,
            None => false,
        }
    }

    /// Adds one RR, creating the domain and RRset as needed. An RR that
    /// duplicates an existing one is ignored with a warning (lenient
    /// acceptance of transfer payloads). Returns false for duplicates.
    pub fn add_rr(
        &mut self,
        zone: ZoneIdx,
        name: &Name,
        rtype: u16,
        class: u16,
        ttl: u32,
        rdatas: Vec<RdataAtom>,
    ) -> bool {
        let domain = self.table.insert(name);
        let pos = self.table.domains[domain.index()]
            .rrsets
            .iter()
            .position(|rs| rs.zone == zone && rs.rrtype() == rtype);
        if let Some(pos) = pos {
            let rrset = &self.table.domains[domain.index()].rrsets[pos];
            let dup = rrset.rrs.iter().any(|rr| {
                rr.ttl == ttl
                    && rr.class == class
                    && rdata::rdatas_equal(&self.table, &rr.rdatas, &self.table, &rdatas)
            });
            if dup {
                log::warn!(target: "db", "RR {} already exists", name);
                return false;
            }
        }
        let rr = Rr {
            owner: domain,
            rtype,
            class,
            ttl,
            rdatas,
        };
        match pos {
            Some(pos) => self.table.domains[domain.index()].rrsets[pos].rrs.push(rr),
            None => self.table.domains[domain.index()].rrsets.push(Rrset {
                zone,
                rrs: vec![rr],
            }),
        }
        self.table.mark_existing(domain);
        if domain == self.zone(zone).apex {
            self.refresh_apex_metadata(zone);
        }
        true
    }

    /// Deletes the RR matching `(type, class, ttl, rdata)`; the RRset
    /// disappears with its last RR and an emptied domain is marked
    /// non-existing. `rdata_table` is the scratch table the candidate
    /// rdata was parsed against, so the removal never interns names.
    pub fn delete_rr(
        &mut self,
        zone: ZoneIdx,
        name: &Name,
        rtype: u16,
        class: u16,
        ttl: u32,
        rdatas: &[RdataAtom],
        rdata_table: &DomainTable,
    ) -> bool {
        let domain = match self.table.find(name) {
            Some(d) => d,
            None => {
                log::error!(target: "db", "diff: domain {} does not exist", name);
                return false;
            }
        };
        let pos = match self.table.domains[domain.index()]
            .rrsets
            .iter()
            .position(|rs| rs.zone == zone && rs.rrtype() == rtype)
        {
            Some(p) => p,
            None => {
                log::error!(target: "db", "diff: rrset {} does not exist", name);
                return false;
            }
        };
        let rrnum = {
            let rrset = &self.table.domains[domain.index()].rrsets[pos];
            rrset.rrs.iter().position(|rr| {
                rr.ttl == ttl
                    && rr.class == class
                    && rdata::rdatas_equal(&self.table, &rr.rdatas, rdata_table, rdatas)
            })
        };
        let rrnum = match rrnum {
            Some(n) => n,
            None => {
                log::error!(target: "db", "diff: RR {} does not exist", name);
                return false;
            }
        };
        let rrset = &mut self.table.domains[domain.index()].rrsets[pos];
        rrset.rrs.swap_remove(rrnum);
        if rrset.rrs.is_empty() {
            self.table.domains[domain.index()].rrsets.remove(pos);
            log::info!(
                target: "db",
                "delete rrset of {} type {}",
                name,
                type_name(rtype)
            );
            if self.table.domains[domain.index()].rrsets.is_empty() {
                self.table.unmark_if_empty(domain);
            }
        }
        if domain == self.zone(zone).apex {
            self.refresh_apex_metadata(zone);
        }
        true
    }

    /// Removes every RR the zone owns, the whole subtree included.
    pub fn delete_zone_rrs(&mut self, zone: ZoneIdx) {
        let apex_name = self.zone(zone).apex_name.clone();
        let mut cur = Some(self.zone(zone).apex);
        while let Some(d) = cur {
            if !self.table.name(d).is_subdomain_of(&apex_name) {
                break;
            }
            log::debug!(target: "db", "delete zone visit {}", self.table.name(d));
            self.table.domains[d.index()].rrsets.retain(|rs| rs.zone != zone);
            if self.table.domains[d.index()].rrsets.is_empty() {
                self.table.unmark_if_empty(d);
            }
            cur = self.table.successor(&self.table.name(d).clone());
        }
        self.refresh_apex_metadata(zone);
        self.zone_mut(zone).updated = true;
    }

    /// Rebuilds the cached apex state from the live RRsets: the
    /// negative-SOA clone (TTL clamped to the SOA MINIMUM) and the
    /// `is_secure` flag (an apex RRSIG covering SOA).
    pub fn refresh_apex_metadata(&mut self, zone: ZoneIdx) {
        let apex = self.zone(zone).apex;
        let soa_nx = self
            .table
            .find_rrset(apex, zone, Type::SOA as u16)
            .map(|rrset| {
                let mut rr = rrset.rrs[0].clone();
                let minimum = BigEndian::read_u32(rr.rdatas[6].bytes());
                if rr.ttl > minimum {
                    rr.ttl = minimum;
                }
                rr
            });
        let is_secure = self
            .table
            .find_rrset(apex, zone, Type::RRSIG as u16)
            .map_or(false, |rrset| {
                rrset
                    .rrs
                    .iter()
                    .any(|rr| rdata::rrsig_type_covered(&rr.rdatas) == Type::SOA as u16)
            });
        let zone = self.zone_mut(zone);
        zone.soa_nx = soa_nx;
        zone.is_secure = is_secure;
        zone.updated = true;
    }
}

pub(crate) fn type_name(rtype: u16) -> String {
    match Type::mnemonic(rtype) {
        Some(m) => m.to_string(),
        None => format!("TYPE{}", rtype),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(s: &str) -> Name {
        s.parse().unwrap()
    }

    fn a_atoms(addr: [u8; 4]) -> Vec<RdataAtom> {
        vec![RdataAtom::Bytes(addr.to_vec().into_boxed_slice())]
    }

    fn soa_atoms(table: &mut DomainTable, serial: u32, minimum: u32) -> Vec<RdataAtom> {
        let ns = table.insert(&n("ns1.example."));
        let mbox = table.insert(&n("host.example."));
        let mut atoms = vec![RdataAtom::Domain(ns), RdataAtom::Domain(mbox)];
        for v in [serial, 3600, 300, 86400, minimum] {
            let mut b = [0u8; 4];
            BigEndian::write_u32(&mut b, v);
            atoms.push(RdataAtom::Bytes(b.to_vec().into_boxed_slice()));
        }
        atoms
    }

    #[test]
    fn insert_creates_ancestors_and_wildcard_links() {
        let mut table = DomainTable::new();
        let deep = table.insert(&n("a.b.example."));
        assert!(table.find(&n("b.example.")).is_some());
        assert!(table.find(&n("example.")).is_some());
        assert_eq!(table.parent(deep), table.find(&n("b.example.")));

        let star = table.insert(&n("*.w.example."));
        let w = table.find(&n("w.example.")).unwrap();
        // The wildcard child is only reported once it exists.
        assert_eq!(table.wildcard_child(w), None);
        table.domain_mut(star).is_existing = true;
        assert_eq!(table.wildcard_child(w), Some(star));
    }

    #[test]
    fn lookup_reports_closest_match_and_encloser() {
        let mut table = DomainTable::new();
        for name in ["example.", "a.example.", "c.example."] {
            let idx = table.insert(&n(name));
            table.domain_mut(idx).is_existing = true;
        }
        let hit = table.lookup(&n("a.example."));
        assert!(hit.exact);
        assert_eq!(hit.closest_match, hit.closest_encloser);

        let miss = table.lookup(&n("b.example."));
        assert!(!miss.exact);
        assert_eq!(table.name(miss.closest_encloser), &n("example."));
        assert_eq!(table.name(miss.closest_match), &n("a.example."));

        // A miss below an existing node: encloser is that node.
        let deep = table.lookup(&n("x.a.example."));
        assert_eq!(table.name(deep.closest_encloser), &n("a.example."));
    }

    #[test]
    fn add_and_delete_maintain_existence() {
        let mut db = NameDb::new();
        let zidx = db.insert_zone(&n("example."), ZoneOptions::default());
        let mut scratch = DomainTable::new();
        db.add_rr(
            zidx,
            &n("a.b.example."),
            Type::A as u16,
            Class::In as u16,
            300,
            a_atoms([1, 2, 3, 4]),
        );
        let b = db.table.find(&n("b.example.")).unwrap();
        assert!(db.table.domain(b).is_existing, "empty non-terminal exists");

        assert!(db.delete_rr(
            zidx,
            &n("a.b.example."),
            Type::A as u16,
            Class::In as u16,
            300,
            &a_atoms([1, 2, 3, 4]),
            &mut scratch,
        ));
        let a = db.table.find(&n("a.b.example.")).unwrap();
        assert!(!db.table.domain(a).is_existing);
        assert!(!db.table.domain(b).is_existing);
    }

    #[test]
    fn duplicate_add_is_ignored() {
        let mut db = NameDb::new();
        let zidx = db.insert_zone(&n("example."), ZoneOptions::default());
        assert!(db.add_rr(
            zidx,
            &n("a.example."),
            Type::A as u16,
            Class::In as u16,
            300,
            a_atoms([1, 2, 3, 4])
        ));
        assert!(!db.add_rr(
            zidx,
            &n("a.example."),
            Type::A as u16,
            Class::In as u16,
            300,
            a_atoms([1, 2, 3, 4])
        ));
        let a = db.table.find(&n("a.example.")).unwrap();
        assert_eq!(db.table.domain(a).rrsets[0].rrs.len(), 1);
    }

    #[test]
    fn apex_soa_add_builds_negative_clone() {
        let mut db = NameDb::new();
        let zidx = db.insert_zone(&n("example."), ZoneOptions::default());
        let atoms = soa_atoms(&mut db.table, 10, 60);
        db.add_rr(
            zidx,
            &n("example."),
            Type::SOA as u16,
            Class::In as u16,
            3600,
            atoms,
        );
        let zone = db.zone(zidx);
        assert_eq!(zone.serial(), Some(10));
        assert_eq!(zone.soa_nx.as_ref().unwrap().ttl, 60, "clamped to MINIMUM");
    }

    #[test]
    fn authoritative_zone_is_longest_apex_match() {
        let mut db = NameDb::new();
        let parent = db.insert_zone(&n("example."), ZoneOptions::default());
        let child = db.insert_zone(&n("sub.example."), ZoneOptions::default());
        assert_eq!(db.find_authoritative_zone(&n("a.example.")), Some(parent));
        assert_eq!(
            db.find_authoritative_zone(&n("host.sub.example.")),
            Some(child)
        );
        assert_eq!(db.find_authoritative_zone(&n("other.test.")), None);
        assert_eq!(db.zone(child).parent, Some(parent));
    }

    #[test]
    fn glue_is_below_a_non_apex_delegation() {
        let mut db = NameDb::new();
        let zidx = db.insert_zone(&n("example."), ZoneOptions::default());
        let ns_target = db.table.insert(&n("ns.sub.example."));
        db.add_rr(
            zidx,
            &n("example."),
            Type::NS as u16,
            Class::In as u16,
            3600,
            vec![RdataAtom::Domain(ns_target)],
        );
        db.add_rr(
            zidx,
            &n("sub.example."),
            Type::NS as u16,
            Class::In as u16,
            3600,
            vec![RdataAtom::Domain(ns_target)],
        );
        db.add_rr(
            zidx,
            &n("ns.sub.example."),
            Type::A as u16,
            Class::In as u16,
            3600,
            a_atoms([10, 0, 0, 53]),
        );
        let glue = db.table.find(&n("ns.sub.example.")).unwrap();
        let apex = db.table.find(&n("example.")).unwrap();
        assert!(db.is_glue(glue, zidx));
        assert!(!db.is_glue(apex, zidx));
    }
}
