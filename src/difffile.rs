//! The differential update log: framed IXFR parts and commit markers
//! appended by the transfer client, replayed here against the live
//! database at startup and on reload.
//!
//! Layout of one part: a four-byte tag, a four-byte length, the
//! payload, and the length again as a trailing sentinel. A part whose
//! sentinel does not match is truncated garbage; `snip_garbage` cuts
//! the file back to the last fully valid part.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{bail, Context};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};

use crate::config::Config;
use crate::constants::*;
use crate::name::Name;
use crate::namedb::{DomainTable, NameDb};
use crate::nsec3;
use crate::rdata::{self, RdataAtom};
use crate::xfr::IxfrData;
use crate::zone::ZoneIdx;

pub const DIFF_PART_IXFR: u32 = u32::from_be_bytes(*b"IXFR");
pub const DIFF_PART_SURE: u32 = u32::from_be_bytes(*b"SURE");

/// Largest transfer message a part may carry.
const MAX_PART_LEN: usize = TCP_MAX_MESSAGE_LEN + 1024;

/// How many served deltas a zone keeps before the oldest is dropped.
const IXFR_KEEP: usize = 16;

/// Appends one raw transfer message to the log.
pub fn write_packet(path: &Path, msg: &[u8]) -> anyhow::Result<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("could not open {} for append", path.display()))?;
    file.write_u32::<BigEndian>(DIFF_PART_IXFR)?;
    file.write_u32::<BigEndian>(msg.len() as u32)?;
    file.write_all(msg)?;
    file.write_u32::<BigEndian>(msg.len() as u32)?;
    Ok(())
}

/// Appends a commit marker: the transfer for `zone` up to `new_serial`
/// is complete (or, with `committed` false, abandoned).
pub fn write_commit(
    path: &Path,
    zone: &str,
    new_serial: u32,
    committed: bool,
    log_msg: &str,
) -> anyhow::Result<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("could not open {} for append", path.display()))?;
    let len = 4 + zone.len() + 4 + 1 + 4 + log_msg.len();
    file.write_u32::<BigEndian>(DIFF_PART_SURE)?;
    file.write_u32::<BigEndian>(len as u32)?;
    file.write_u32::<BigEndian>(zone.len() as u32)?;
    file.write_all(zone.as_bytes())?;
    file.write_u32::<BigEndian>(new_serial)?;
    file.write_all(&[committed as u8])?;
    file.write_u32::<BigEndian>(log_msg.len() as u32)?;
    file.write_all(log_msg.as_bytes())?;
    file.write_u32::<BigEndian>(len as u32)?;
    Ok(())
}

fn try_read_u32(file: &mut std::fs::File) -> Option<u32> {
    file.read_u32::<BigEndian>().ok()
}

fn read_string(file: &mut std::fs::File, cap: usize) -> anyhow::Result<String> {
    let len = file.read_u32::<BigEndian>()? as usize;
    if len >= cap {
        bail!("string of {} bytes exceeds the {} cap", len, cap);
    }
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)?;
    String::from_utf8(buf).context("string is not UTF-8")
}

/// True when the snapshot file no longer matches what this database
/// was loaded from. Replays abort in that case: the deltas would apply
/// to data we do not have.
pub fn crc_differs(db: &NameDb) -> bool {
    let snapshot = match &db.snapshot {
        Some(s) => s,
        None => return false,
    };
    let check = || -> anyhow::Result<bool> {
        let mut file = std::fs::File::open(&snapshot.path)?;
        file.seek(SeekFrom::Start(snapshot.crc_pos))?;
        let crc = file.read_u32::<BigEndian>()?;
        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        if &magic != crate::dbfile::NAMEDB_MAGIC {
            bail!("bad magic");
        }
        Ok(crc != snapshot.crc)
    };
    match check() {
        Ok(differs) => differs,
        Err(e) => {
            log::error!(
                target: "difffile",
                "could not re-read {} CRC: {}. db changed?",
                snapshot.path.display(),
                e
            );
            true
        }
    }
}

/// Replays the log against the database: skips to the remembered
/// resume position, walks the parts, and applies every committed
/// transfer. The resume position advances past each fully valid part.
pub fn read_file(db: &mut NameDb, config: &Config) -> anyhow::Result<()> {
    if crc_differs(db) {
        bail!("snapshot file changed since load; refusing to apply diffs");
    }
    let path = &config.options.difffile;
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            log::info!(
                target: "difffile",
                "could not open {} for reading: {}",
                path.display(),
                e
            );
            return Ok(());
        }
    };
    if let Some(pos) = db.diff_resume {
        if file.seek(SeekFrom::Start(pos)).is_err() {
            log::info!(
                target: "difffile",
                "could not seek {} to resume position; rereading from start",
                path.display()
            );
        }
    }

    let mut last_ixfr_pos: Option<u64> = None;
    while let Some(tag) = try_read_u32(&mut file) {
        let part_len_pos = file.stream_position()?;
        let len = match try_read_u32(&mut file) {
            Some(len) => len as usize,
            None => break,
        };
        match tag {
            DIFF_PART_IXFR => {
                last_ixfr_pos = Some(part_len_pos);
                file.seek(SeekFrom::Current(len as i64))?;
            }
            DIFF_PART_SURE => {
                let commit = (|| -> anyhow::Result<(String, u32, u8, String)> {
                    let zone = read_string(&mut file, 512)?;
                    let serial = file.read_u32::<BigEndian>()?;
                    let mut committed = [0u8; 1];
                    file.read_exact(&mut committed)?;
                    let log_msg = read_string(&mut file, 5120)?;
                    Ok((zone, serial, committed[0], log_msg))
                })();
                let (zone, serial, committed, log_msg) = match commit {
                    Ok(v) => v,
                    Err(e) => {
                        log::error!(target: "difffile", "diff file bad commit part: {:#}", e);
                        break;
                    }
                };
                if committed != 0 {
                    log::info!(target: "difffile", "processing xfr: {}", log_msg);
                    let resume = file.stream_position()?;
                    match last_ixfr_pos {
                        Some(pos) => {
                            if let Err(e) = apply_ixfr(db, &mut file, pos, &zone, serial, config)
                            {
                                log::error!(target: "difffile", "bad ixfr packet: {:#}", e);
                            }
                        }
                        None => {
                            log::error!(target: "difffile", "diff file commit without IXFR")
                        }
                    }
                    file.seek(SeekFrom::Start(resume))?;
                } else {
                    log::info!(target: "difffile", "skipping xfr: {}", log_msg);
                }
            }
            _ => {
                log::info!(target: "difffile", "unknown part {:#x} len {}", tag, len);
                return Ok(());
            }
        }
        let len2 = match try_read_u32(&mut file) {
            Some(v) => v as usize,
            None => break,
        };
        if len2 != len {
            break;
        }
        db.diff_resume = Some(file.stream_position()?);
    }
    Ok(())
}

/// Scans the log from the resume position and truncates the file after
/// the last part whose framing is intact.
pub fn snip_garbage(db: &NameDb, path: &Path) -> anyhow::Result<()> {
    let mut file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(f) => f,
        Err(e) => {
            log::info!(
                target: "difffile",
                "could not open {} for garbage collecting: {}",
                path.display(),
                e
            );
            return Ok(());
        }
    };
    if let Some(pos) = db.diff_resume {
        file.seek(SeekFrom::Start(pos))?;
    }
    let mut break_pos = file.stream_position()?;
    let mut broken = false;
    while let Some(tag) = try_read_u32(&mut file) {
        if tag != DIFF_PART_IXFR && tag != DIFF_PART_SURE {
            broken = true;
            break;
        }
        let len = match try_read_u32(&mut file) {
            Some(len) => len,
            None => {
                broken = true;
                break;
            }
        };
        if file.seek(SeekFrom::Current(len as i64)).is_err() {
            broken = true;
            break;
        }
        let len2 = try_read_u32(&mut file);
        if len2 != Some(len) {
            broken = true;
            break;
        }
        break_pos = file.stream_position()?;
    }
    if broken || file.stream_position()? != break_pos {
        log::info!(
            target: "difffile",
            "snipping off trailing partial part of {}",
            path.display()
        );
        file.set_len(break_pos)?;
    }
    Ok(())
}

/// The uncompressed wire form of one RR, the shape stored deltas and
/// snapshots use.
pub(crate) fn rr_wire_uncompressed(
    table: &DomainTable,
    name: &Name,
    rtype: u16,
    class: u16,
    ttl: u32,
    atoms: &[RdataAtom],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + DNS_RR_HEADER_SIZE + 32);
    out.extend_from_slice(name.wire());
    let mut fixed = [0u8; DNS_RR_HEADER_SIZE];
    BigEndian::write_u16(&mut fixed[0..], rtype);
    BigEndian::write_u16(&mut fixed[2..], class);
    BigEndian::write_u32(&mut fixed[4..], ttl);
    out.extend_from_slice(&fixed);
    let rdlen_pos = out.len() - 2;
    let rdata_start = out.len();
    rdata::write_rdata_uncompressed(table, atoms, &mut out);
    let rdlen = out.len() - rdata_start;
    BigEndian::write_u16(&mut out[rdlen_pos..], rdlen as u16);
    out
}

struct WireRr {
    name: Name,
    rtype: u16,
    class: u16,
    ttl: u32,
    rdata_offset: usize,
    rdlen: usize,
}

fn parse_rr(msg: &[u8], pos: usize) -> anyhow::Result<(WireRr, usize)> {
    let (name, mut pos) = Name::from_wire(msg, pos).context("bad RR dname")?;
    if pos + DNS_RR_HEADER_SIZE > msg.len() {
        bail!("bad RR format");
    }
    let rtype = BigEndian::read_u16(&msg[pos..]);
    let class = BigEndian::read_u16(&msg[pos + 2..]);
    let ttl = BigEndian::read_u32(&msg[pos + 4..]);
    let rdlen = BigEndian::read_u16(&msg[pos + 8..]) as usize;
    pos += DNS_RR_HEADER_SIZE;
    if pos + rdlen > msg.len() {
        bail!("bad RR rdata: len {} has {}", rdlen, msg.len() - pos);
    }
    Ok((
        WireRr {
            name,
            rtype,
            class,
            ttl,
            rdata_offset: pos,
            rdlen,
        },
        pos + rdlen,
    ))
}

fn find_or_create_zone(
    db: &mut NameDb,
    apex: &Name,
    config: &Config,
) -> anyhow::Result<ZoneIdx> {
    if let Some(zone) = db.find_zone(apex) {
        return Ok(zone);
    }
    let zcfg = config
        .zones
        .iter()
        .find(|z| z.apex().map_or(false, |n| n == *apex));
    match zcfg {
        Some(zcfg) => Ok(db.insert_zone(apex, zcfg.zone_options())),
        None => bail!("zone {} not in config", apex),
    }
}

/// Applies one stored transfer message to the database, per the commit
/// that named it. The message is either an IXFR (SOA-delimited delete
/// and add sections) or, when its second RR is not a SOA, a full AXFR
/// replacing the zone.
fn apply_ixfr(
    db: &mut NameDb,
    file: &mut std::fs::File,
    part_pos: u64,
    zone_name: &str,
    serial: u32,
    config: &Config,
) -> anyhow::Result<()> {
    file.seek(SeekFrom::Start(part_pos))?;
    let msglen = file.read_u32::<BigEndian>()? as usize;
    if msglen < DNS_HEADER_SIZE {
        bail!("msg too short");
    }
    if msglen > MAX_PART_LEN {
        bail!("msg too long");
    }
    let mut msg = vec![0u8; msglen];
    file.read_exact(&mut msg)
        .context("short read of IXFR part")?;

    let apex: Name = zone_name.parse().context("bad zone name in commit")?;
    let zone = find_or_create_zone(db, &apex, config)?;
    let store_ixfr = db.zone(zone).options.store_ixfr;

    let qdcount = BigEndian::read_u16(&msg[4..]) as usize;
    let ancount = BigEndian::read_u16(&msg[6..]) as usize;
    let mut pos = DNS_HEADER_SIZE;
    for _ in 0..qdcount {
        let (_, after) = Name::from_wire(&msg, pos).context("bad question")?;
        if after + 4 > msg.len() {
            bail!("bad question");
        }
        pos = after + 4;
    }
    if ancount < 1 {
        bail!("no answer RRs");
    }

    // First RR: the new SOA, checked against the commit, not inserted
    // here. The add section carries it back in.
    let (first, after_first) = parse_rr(&msg, pos)?;
    if first.name != apex {
        bail!("SOA dname {} not equal to zone {}", first.name, apex);
    }
    if first.rtype != Type::SOA as u16 || first.class != Class::In as u16 {
        bail!("first RR not SOA IN");
    }
    let mut scratch = DomainTable::new();
    let first_atoms = rdata::atoms_from_wire(
        &mut scratch,
        first.rtype,
        &msg,
        first.rdata_offset,
        first.rdlen,
    )
    .map_err(|e| anyhow::anyhow!("bad SOA RR: {}", e))?;
    let msg_serial = BigEndian::read_u32(first_atoms[2].bytes());
    if msg_serial != serial {
        bail!("SOA serial {} different from commit {}", msg_serial, serial);
    }
    let newsoa = rr_wire_uncompressed(
        &scratch,
        &first.name,
        first.rtype,
        first.class,
        first.ttl,
        &first_atoms,
    );
    pos = after_first;

    let mut delete_mode = false;
    let mut is_axfr = false;
    let mut oldsoa: Option<(u32, Vec<u8>)> = None;
    let mut dels: Vec<u8> = Vec::new();
    let mut adds: Vec<u8> = Vec::new();
    let mut soa_switches = 0u32;

    for rrcount in 1..ancount {
        let (rr, after) = parse_rr(&msg, pos)?;
        pos = after;

        if rrcount == 1 && rr.rtype != Type::SOA as u16 {
            // Second RR is not a SOA: a full zone replacement.
            db.delete_zone_rrs(zone);
            delete_mode = false;
            is_axfr = true;
        }
        if rr.rtype == Type::SOA as u16 && !is_axfr {
            // Each internal SOA flips between the delete and add parts;
            // the final one flips back to delete so it is skipped.
            delete_mode = !delete_mode;
            soa_switches += 1;
        }
        if rr.rtype == Type::TSIG as u16 || rr.rtype == Type::OPT as u16 {
            continue;
        }
        log::debug!(
            target: "difffile",
            "xfr {} RR dname is {} type {}",
            if delete_mode { "del" } else { "add" },
            rr.name,
            crate::namedb::type_name(rr.rtype)
        );
        if delete_mode {
            if !is_axfr && rr.rtype == Type::SOA as u16 && rrcount == ancount - 1 {
                // The terminating SOA is not deleted on the IXFR path.
                continue;
            }
            let mut scratch = DomainTable::new();
            let atoms =
                rdata::atoms_from_wire(&mut scratch, rr.rtype, &msg, rr.rdata_offset, rr.rdlen)
                    .map_err(|e| anyhow::anyhow!("bad rdata for {}: {}", rr.name, e))?;
            if rrcount == 1 && rr.rtype == Type::SOA as u16 {
                // The old SOA opens the delete section.
                let old_serial = BigEndian::read_u32(atoms[2].bytes());
                let wire = rr_wire_uncompressed(
                    &scratch, &rr.name, rr.rtype, rr.class, rr.ttl, &atoms,
                );
                oldsoa = Some((old_serial, wire));
            } else if store_ixfr && !is_axfr && rr.rtype != Type::SOA as u16 {
                dels.extend_from_slice(&rr_wire_uncompressed(
                    &scratch, &rr.name, rr.rtype, rr.class, rr.ttl, &atoms,
                ));
            }
            db.delete_rr(zone, &rr.name, rr.rtype, rr.class, rr.ttl, &atoms, &scratch);
        } else {
            let atoms =
                rdata::atoms_from_wire(&mut db.table, rr.rtype, &msg, rr.rdata_offset, rr.rdlen)
                    .map_err(|e| anyhow::anyhow!("bad rdata for {}: {}", rr.name, e))?;
            if store_ixfr && !is_axfr && rr.rtype != Type::SOA as u16 {
                adds.extend_from_slice(&rr_wire_uncompressed(
                    &db.table, &rr.name, rr.rtype, rr.class, rr.ttl, &atoms,
                ));
            }
            db.add_rr(zone, &rr.name, rr.rtype, rr.class, rr.ttl, atoms);
        }
    }

    // Refresh the state hanging off the new RR contents.
    db.refresh_apex_metadata(zone);
    nsec3::prehash_zone(db, zone);

    if !is_axfr && store_ixfr && soa_switches <= 3 {
        if let Some((oldserial, oldsoa)) = oldsoa {
            let mut del = dels;
            del.extend_from_slice(&newsoa);
            let mut add = adds;
            add.extend_from_slice(&newsoa);
            let z = db.zone_mut(zone);
            z.ixfr.push(IxfrData {
                oldserial,
                newserial: serial,
                newsoa,
                oldsoa,
                del,
                add,
            });
            if z.ixfr.len() > IXFR_KEEP {
                z.ixfr.remove(0);
            }
        }
    }

    log::info!(
        target: "difffile",
        "zone {} applied {} to serial {}",
        apex,
        if is_axfr { "axfr" } else { "ixfr" },
        serial
    );
    Ok(())
}
