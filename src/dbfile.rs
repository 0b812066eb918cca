//! The serialised snapshot the database is populated from at startup:
//! magic, per-zone sections of uncompressed wire RRs, and a CRC-32
//! that the diff replay re-checks before touching the live data.

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context};
use byteorder::{BigEndian, ByteOrder};

use crate::config::Config;
use crate::constants::*;
use crate::difffile::rr_wire_uncompressed;
use crate::name::Name;
use crate::namedb::{NameDb, SnapshotInfo};
use crate::nsec3;
use crate::rdata;
use crate::xfr::wire_rr_len;
use crate::zone::ZoneOptions;

/// Binary compatibility point; change only with a version bump.
pub const NAMEDB_MAGIC: &[u8; 8] = b"NSDdbV07";

const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xedb8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

pub fn crc32(data: &[u8]) -> u32 {
    let mut c = 0xffff_ffffu32;
    for &b in data {
        c = CRC_TABLE[((c ^ b as u32) & 0xff) as usize] ^ (c >> 8);
    }
    c ^ 0xffff_ffff
}

/// Writes the database to `path`: magic, zone count, then per zone the
/// apex name and its RRs in canonical order, the CRC, and the magic
/// again as a trailer.
pub fn save(db: &NameDb, path: &Path) -> anyhow::Result<()> {
    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(NAMEDB_MAGIC);
    let zone_count = db.zones().count() as u32;
    out.extend_from_slice(&zone_count.to_be_bytes());
    for (zidx, zone) in db.zones() {
        let apex_wire = zone.apex_name.wire();
        out.extend_from_slice(&(apex_wire.len() as u32).to_be_bytes());
        out.extend_from_slice(apex_wire);
        let mut rrs: Vec<u8> = Vec::new();
        let mut rr_count: u32 = 0;
        let mut cur = Some(zone.apex);
        while let Some(domain) = cur {
            let name = db.table.name(domain).clone();
            if !name.is_subdomain_of(&zone.apex_name) {
                break;
            }
            for rrset in db.table.domain(domain).rrsets.iter() {
                if rrset.zone != zidx {
                    continue;
                }
                for rr in rrset.rrs.iter() {
                    rrs.extend_from_slice(&rr_wire_uncompressed(
                        &db.table, &name, rr.rtype, rr.class, rr.ttl, &rr.rdatas,
                    ));
                    rr_count += 1;
                }
            }
            cur = db.table.successor(&name);
        }
        out.extend_from_slice(&rr_count.to_be_bytes());
        out.extend_from_slice(&rrs);
    }
    let crc = crc32(&out);
    out.extend_from_slice(&crc.to_be_bytes());
    out.extend_from_slice(NAMEDB_MAGIC);

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("could not create {}", path.display()))?;
    file.write_all(&out)?;
    Ok(())
}

/// Loads a snapshot, verifying magic and CRC, and remembers where the
/// CRC sits so a later reload can detect file replacement.
pub fn load(path: &Path, config: &Config) -> anyhow::Result<NameDb> {
    let data = std::fs::read(path)
        .with_context(|| format!("unable to load {}", path.display()))?;
    if data.len() < 8 + 4 + 4 + 8 || &data[..8] != NAMEDB_MAGIC {
        bail!("{} has no database magic", path.display());
    }
    if &data[data.len() - 8..] != NAMEDB_MAGIC {
        bail!("{} has no trailing magic", path.display());
    }
    let crc_pos = data.len() - 12;
    let stored_crc = BigEndian::read_u32(&data[crc_pos..]);
    let computed = crc32(&data[..crc_pos]);
    if stored_crc != computed {
        bail!(
            "{} CRC mismatch: stored {:#010x}, computed {:#010x}",
            path.display(),
            stored_crc,
            computed
        );
    }

    let mut db = NameDb::new();
    let zone_count = BigEndian::read_u32(&data[8..]) as usize;
    let mut pos = 12;
    for _ in 0..zone_count {
        if pos + 4 > crc_pos {
            bail!("truncated zone section");
        }
        let name_len = BigEndian::read_u32(&data[pos..]) as usize;
        pos += 4;
        if pos + name_len > crc_pos {
            bail!("truncated zone name");
        }
        let (apex, _) = Name::from_wire_uncompressed(&data[..pos + name_len], pos)
            .map_err(|e| anyhow::anyhow!("bad zone name: {}", e))?;
        pos += name_len;
        if pos + 4 > crc_pos {
            bail!("truncated RR count");
        }
        let rr_count = BigEndian::read_u32(&data[pos..]) as usize;
        pos += 4;

        let options = config
            .zones
            .iter()
            .find(|z| z.apex().map_or(false, |n| n == apex))
            .map(|z| z.zone_options())
            .unwrap_or_else(ZoneOptions::default);
        let zone = db.insert_zone(&apex, options);

        for _ in 0..rr_count {
            let rrlen = wire_rr_len(&data[..crc_pos], pos)
                .ok_or_else(|| anyhow::anyhow!("corrupt RR in zone {}", apex))?;
            let (name, after_name) = Name::from_wire_uncompressed(&data, pos)
                .map_err(|e| anyhow::anyhow!("bad RR owner: {}", e))?;
            let rtype = BigEndian::read_u16(&data[after_name..]);
            let class = BigEndian::read_u16(&data[after_name + 2..]);
            let ttl = BigEndian::read_u32(&data[after_name + 4..]);
            let rdlen = BigEndian::read_u16(&data[after_name + 8..]) as usize;
            let atoms = rdata::atoms_from_wire(
                &mut db.table,
                rtype,
                &data,
                after_name + DNS_RR_HEADER_SIZE,
                rdlen,
            )
            .map_err(|e| anyhow::anyhow!("bad rdata in zone {}: {}", apex, e))?;
            db.add_rr(zone, &name, rtype, class, ttl, atoms);
            pos += rrlen;
        }
        nsec3::prehash_zone(&mut db, zone);
    }
    if pos != crc_pos {
        bail!("{} bytes of trailing data in {}", crc_pos - pos, path.display());
    }

    db.snapshot = Some(SnapshotInfo {
        path: path.to_path_buf(),
        crc: stored_crc,
        crc_pos: crc_pos as u64,
    });
    log::info!(
        target: "db",
        "loaded {} zones from {}",
        zone_count,
        path.display()
    );
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_reference_value() {
        // The classic check value for CRC-32/IEEE.
        assert_eq!(crc32(b"123456789"), 0xcbf43926);
        assert_eq!(crc32(b""), 0);
    }
}
