//! Per-zone metadata kept next to the domain tree: apex, the
//! negative-answer SOA clone, DNSSEC state, NSEC3 parameters and the
//! stored IXFR deltas this server can answer incremental transfers from.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};

use crate::acl::AclEntry;
use crate::name::Name;
use crate::namedb::{DomainIdx, Rr};
use crate::nsec3::Nsec3Params;
use crate::xfr::IxfrData;

/// Index of a zone within the database.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ZoneIdx(pub(crate) u32);

impl ZoneIdx {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Configuration attached to a zone: its ACL and whether incremental
/// deltas are retained for serving IXFR.
#[derive(Clone, Debug, Default)]
pub struct ZoneOptions {
    pub acl: Vec<AclEntry>,
    pub store_ixfr: bool,
}

pub struct Zone {
    pub apex: DomainIdx,
    pub apex_name: Name,
    /// The direct parent zone, if this server also serves it.
    pub parent: Option<ZoneIdx>,
    /// True iff the apex SOA RRset is covered by an RRSIG.
    pub is_secure: bool,
    /// Set by the diff apply path; cleared once dependent state
    /// (NSEC3 owner sets, parent links) has been refreshed.
    pub updated: bool,
    /// The apex SOA with its TTL clamped to the SOA MINIMUM, used in
    /// NXDOMAIN and NODATA authority sections.
    pub soa_nx: Option<Rr>,
    /// NSEC3 parameters when the zone uses hashed denial.
    pub nsec3: Option<Nsec3Params>,
    /// NSEC3 owner names in hash order, for the cover search.
    pub nsec3_owners: BTreeMap<Name, DomainIdx>,
    /// Stored deltas, oldest first.
    pub ixfr: Vec<IxfrData>,
    pub options: ZoneOptions,
}

impl Zone {
    pub fn new(apex: DomainIdx, apex_name: Name, options: ZoneOptions) -> Zone {
        Zone {
            apex,
            apex_name,
            parent: None,
            is_secure: false,
            updated: true,
            soa_nx: None,
            nsec3: None,
            nsec3_owners: BTreeMap::new(),
            ixfr: Vec::new(),
            options,
        }
    }

    /// The serial of the negative-SOA clone, which diff apply keeps in
    /// sync with the live apex SOA.
    pub fn serial(&self) -> Option<u32> {
        self.soa_nx
            .as_ref()
            .map(|rr| BigEndian::read_u32(rr.rdatas[2].bytes()))
    }

    /// Looks up the stored delta that carries `old_serial` to the
    /// zone's current serial.
    pub fn find_ixfr(&self, old_serial: u32) -> Option<&IxfrData> {
        let current = self.serial()?;
        self.ixfr
            .iter()
            .find(|d| d.oldserial == old_serial && d.newserial == current)
    }
}
