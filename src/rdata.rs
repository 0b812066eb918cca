//! Typed rdata atoms and the per-type wire layout descriptors.
//!
//! An rdata is split into atoms: names that reference domains in the
//! database, and opaque byte fields. The split is driven by a static
//! descriptor per RR type; unknown types get one opaque atom and are
//! never compressed.

use byteorder::{BigEndian, ByteOrder};

use crate::constants::*;
use crate::errors::*;
use crate::name::Name;
use crate::namedb::{DomainIdx, DomainTable};

/// How one rdata atom is laid out on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RdataKind {
    /// A domain name; compression pointers are emitted and accepted.
    CompressedName,
    /// A domain name, always emitted in full (required for signed types).
    UncompressedName,
    /// A fixed-width field.
    Fixed(usize),
    /// One length octet followed by that many bytes (character-string).
    Text,
    /// Everything up to the end of the rdata.
    Remainder,
}

impl RdataKind {
    #[inline]
    pub fn is_name(self) -> bool {
        matches!(self, RdataKind::CompressedName | RdataKind::UncompressedName)
    }
}

const KINDS_OPAQUE: &[RdataKind] = &[RdataKind::Remainder];
const KINDS_NAME_C: &[RdataKind] = &[RdataKind::CompressedName];
const KINDS_NAME_U: &[RdataKind] = &[RdataKind::UncompressedName];

/// Wire layout for each known RR type. The SOA layout deliberately
/// exposes the five 32-bit timers as separate atoms so that the serial
/// (atom 2) and minimum (atom 6) can be addressed directly.
pub fn descriptor(rtype: u16) -> &'static [RdataKind] {
    use RdataKind::*;
    match rtype {
        t if t == Type::A as u16 => &[Fixed(4)],
        t if t == Type::NS as u16
            || t == Type::MD as u16
            || t == Type::MF as u16
            || t == Type::CNAME as u16
            || t == Type::MB as u16
            || t == Type::MG as u16
            || t == Type::MR as u16
            || t == Type::PTR as u16 =>
        {
            KINDS_NAME_C
        }
        t if t == Type::SOA as u16 => &[
            CompressedName,
            CompressedName,
            Fixed(4),
            Fixed(4),
            Fixed(4),
            Fixed(4),
            Fixed(4),
        ],
        t if t == Type::HINFO as u16 => &[Text, Text],
        t if t == Type::MINFO as u16 => &[CompressedName, CompressedName],
        t if t == Type::MX as u16 => &[Fixed(2), CompressedName],
        t if t == Type::RP as u16 => &[UncompressedName, UncompressedName],
        t if t == Type::AFSDB as u16 => &[Fixed(2), UncompressedName],
        t if t == Type::X25 as u16 => &[Text],
        t if t == Type::RT as u16 => &[Fixed(2), CompressedName],
        t if t == Type::KX as u16 => &[Fixed(2), UncompressedName],
        t if t == Type::PX as u16 => &[Fixed(2), UncompressedName, UncompressedName],
        t if t == Type::AAAA as u16 => &[Fixed(16)],
        t if t == Type::SRV as u16 => &[Fixed(6), UncompressedName],
        t if t == Type::NAPTR as u16 => &[Fixed(4), Text, Text, Text, UncompressedName],
        t if t == Type::DNAME as u16 => KINDS_NAME_U,
        t if t == Type::RRSIG as u16 || t == Type::SIG as u16 => {
            &[Fixed(18), UncompressedName, Remainder]
        }
        t if t == Type::NSEC as u16 => &[UncompressedName, Remainder],
        t if t == Type::NSEC3 as u16 => &[Fixed(1), Fixed(1), Fixed(2), Text, Text, Remainder],
        t if t == Type::NSEC3PARAM as u16 => &[Fixed(1), Fixed(1), Fixed(2), Text],
        _ => KINDS_OPAQUE,
    }
}

/// True if atom `index` of `rtype` is a domain reference.
pub fn atom_is_domain(rtype: u16, index: usize) -> bool {
    descriptor(rtype).get(index).map_or(false, |k| k.is_name())
}

/// One rdata atom: a domain reference or a byte field.
#[derive(Clone, Debug)]
pub enum RdataAtom {
    Domain(DomainIdx),
    Bytes(Box<[u8]>),
}

impl RdataAtom {
    pub fn bytes(&self) -> &[u8] {
        match self {
            RdataAtom::Bytes(b) => b,
            RdataAtom::Domain(_) => panic!("domain atom accessed as bytes"),
        }
    }

    pub fn domain(&self) -> DomainIdx {
        match self {
            RdataAtom::Domain(d) => *d,
            RdataAtom::Bytes(_) => panic!("byte atom accessed as domain"),
        }
    }
}

/// Splits the `rdlen` bytes at `offset` into atoms, interning embedded
/// names into `table`. `packet` is the complete message so compression
/// pointers in transfer payloads resolve.
pub fn atoms_from_wire(
    table: &mut DomainTable,
    rtype: u16,
    packet: &[u8],
    offset: usize,
    rdlen: usize,
) -> Result<Vec<RdataAtom>> {
    let end = offset + rdlen;
    if end > packet.len() {
        return Err(ZcError::InvalidRdata(rtype));
    }
    let mut atoms = Vec::new();
    let mut pos = offset;
    for kind in descriptor(rtype) {
        match *kind {
            RdataKind::CompressedName | RdataKind::UncompressedName => {
                let (name, next) = Name::from_wire(packet, pos)?;
                if next > end {
                    return Err(ZcError::InvalidRdata(rtype));
                }
                atoms.push(RdataAtom::Domain(table.insert(&name)));
                pos = next;
            }
            RdataKind::Fixed(n) => {
                if pos + n > end {
                    return Err(ZcError::InvalidRdata(rtype));
                }
                atoms.push(RdataAtom::Bytes(packet[pos..pos + n].into()));
                pos += n;
            }
            RdataKind::Text => {
                if pos >= end {
                    return Err(ZcError::InvalidRdata(rtype));
                }
                let n = packet[pos] as usize;
                if pos + 1 + n > end {
                    return Err(ZcError::InvalidRdata(rtype));
                }
                atoms.push(RdataAtom::Bytes(packet[pos..pos + 1 + n].into()));
                pos += 1 + n;
            }
            RdataKind::Remainder => {
                atoms.push(RdataAtom::Bytes(packet[pos..end].into()));
                pos = end;
            }
        }
    }
    if pos != end {
        return Err(ZcError::InvalidRdata(rtype));
    }
    Ok(atoms)
}

/// Atom-wise equality: canonical name comparison for domain references,
/// byte equality otherwise. This is the RR identity the diff apply path
/// matches deletions against. The two sides may come from different
/// tables (deletion candidates are parsed against a scratch table so a
/// no-op delete never interns names into the live database).
pub fn rdatas_equal(
    table_a: &DomainTable,
    a: &[RdataAtom],
    table_b: &DomainTable,
    b: &[RdataAtom],
) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| match (x, y) {
        (RdataAtom::Domain(da), RdataAtom::Domain(db)) => {
            table_a.name(*da) == table_b.name(*db)
        }
        (RdataAtom::Bytes(ba), RdataAtom::Bytes(bb)) => ba == bb,
        _ => false,
    })
}

/// Appends the uncompressed wire form of the atoms to `out`.
pub fn write_rdata_uncompressed(table: &DomainTable, atoms: &[RdataAtom], out: &mut Vec<u8>) {
    for atom in atoms {
        match atom {
            RdataAtom::Domain(d) => out.extend_from_slice(table.name(*d).wire()),
            RdataAtom::Bytes(b) => out.extend_from_slice(b),
        }
    }
}

/// The "type covered" field of an RRSIG rdata.
pub fn rrsig_type_covered(atoms: &[RdataAtom]) -> u16 {
    BigEndian::read_u16(atoms[0].bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soa_has_seven_atoms() {
        assert_eq!(descriptor(Type::SOA as u16).len(), 7);
        assert!(atom_is_domain(Type::SOA as u16, 0));
        assert!(atom_is_domain(Type::SOA as u16, 1));
        assert!(!atom_is_domain(Type::SOA as u16, 6));
    }

    #[test]
    fn unknown_types_are_opaque() {
        assert_eq!(descriptor(4711), KINDS_OPAQUE);
        assert!(!atom_is_domain(4711, 0));
    }

    #[test]
    fn signed_types_never_compress() {
        for rtype in [Type::RRSIG as u16, Type::NSEC as u16, Type::DNAME as u16] {
            assert!(descriptor(rtype)
                .iter()
                .all(|k| *k != RdataKind::CompressedName));
        }
    }

    #[test]
    fn split_a_and_mx() {
        let mut table = DomainTable::new();
        let atoms =
            atoms_from_wire(&mut table, Type::A as u16, &[10, 0, 0, 1], 0, 4).unwrap();
        assert_eq!(atoms.len(), 1);
        assert_eq!(atoms[0].bytes(), &[10, 0, 0, 1]);

        let mut wire = vec![0u8, 10];
        wire.extend_from_slice(b"\x04mail\x07example\x00");
        let atoms =
            atoms_from_wire(&mut table, Type::MX as u16, &wire, 0, wire.len()).unwrap();
        assert_eq!(atoms.len(), 2);
        assert_eq!(atoms[0].bytes(), &[0, 10]);
        assert_eq!(
            table.name(atoms[1].domain()),
            &"mail.example.".parse().unwrap()
        );
    }

    #[test]
    fn short_rdata_is_rejected() {
        let mut table = DomainTable::new();
        assert!(atoms_from_wire(&mut table, Type::A as u16, &[10, 0, 0], 0, 3).is_err());
    }
}
