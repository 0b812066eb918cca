//! NSEC3 denial (RFC 5155): iterated SHA-1 hashing, base32hex owner
//! names, the cover search over the zone's hash-ordered owner set, and
//! the proof records that join NXDOMAIN, NODATA, wildcard and referral
//! answers.
//!
//! Hashing happens at query time; the zone only keeps its parameter
//! set and the sorted owner names, both rebuilt after a diff applies.

use ring::digest;

use crate::answer::{Answer, RrOwner, RrsetSource, Section};
use crate::constants::*;
use crate::name::Name;
use crate::namedb::{DomainIdx, NameDb};
use crate::zone::ZoneIdx;

/// Parameters detected from the first NSEC3 RR carrying the SOA bit.
#[derive(Clone, Debug)]
pub struct Nsec3Params {
    pub algorithm: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
    /// Owner of that record, the hash of the apex.
    pub soa_owner: DomainIdx,
}

const SHA1_LEN: usize = 20;

/// H(x) = SHA1(x); H(x, k+1) = SHA1(H(x, k) || salt), applied
/// `iterations + 1` times over the case-folded wire name.
pub fn iterated_hash(name: &Name, salt: &[u8], iterations: u16) -> [u8; SHA1_LEN] {
    let mut input: Vec<u8> = name.wire().iter().map(|b| b.to_ascii_lowercase()).collect();
    let mut out = [0u8; SHA1_LEN];
    for _ in 0..=iterations {
        let mut ctx = digest::Context::new(&digest::SHA1_FOR_LEGACY_USE_ONLY);
        ctx.update(&input);
        ctx.update(salt);
        out.copy_from_slice(ctx.finish().as_ref());
        input = out.to_vec();
    }
    out
}

const B32_ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Base32hex without padding; 20 hash bytes become exactly 32 chars.
pub fn b32hex(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8 + 4) / 5);
    let mut acc: u32 = 0;
    let mut bits = 0;
    for &b in data {
        acc = (acc << 8) | b as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(B32_ALPHABET[(acc >> bits) as usize & 0x1f] as char);
        }
    }
    if bits > 0 {
        out.push(B32_ALPHABET[(acc << (5 - bits)) as usize & 0x1f] as char);
    }
    out
}

/// The hashed owner name of `name` under the zone apex. None when the
/// apex is too long to take another 32-byte label.
pub fn hashed_name(params: &Nsec3Params, name: &Name, apex: &Name) -> Option<Name> {
    let hash = iterated_hash(name, &params.salt, params.iterations);
    apex.prepend_label(b32hex(&hash).as_bytes()).ok()
}

fn nsec3_rr_params(rdatas: &[crate::rdata::RdataAtom]) -> Option<(u8, u16, &[u8])> {
    if rdatas.len() < 6 {
        return None;
    }
    let algorithm = rdatas[0].bytes().first().copied()?;
    let iterations = u16::from_be_bytes(rdatas[2].bytes().try_into().ok()?);
    let salt = rdatas[3].bytes();
    Some((algorithm, iterations, salt.get(1..)?))
}

fn bitmap_has_soa(bitmap: &[u8]) -> bool {
    bitmap.len() >= 3 && bitmap[0] == 0 && bitmap[1] >= 1 && bitmap[2] & 0x02 != 0
}

/// Re-detects the zone's NSEC3 parameters and rebuilds the sorted
/// owner set the cover search runs over. Called after load and after
/// every applied delta.
pub fn prehash_zone(db: &mut NameDb, zone: ZoneIdx) {
    let apex_name = db.zone(zone).apex_name.clone();
    let mut params: Option<Nsec3Params> = None;

    let mut cur = Some(db.zone(zone).apex);
    while let Some(d) = cur {
        let name = db.table.name(d).clone();
        if !name.is_subdomain_of(&apex_name) {
            break;
        }
        if let Some(rrset) = db.table.find_rrset(d, zone, Type::NSEC3 as u16) {
            let rr = &rrset.rrs[0];
            if rr.rdatas.len() == 6 && bitmap_has_soa(rr.rdatas[5].bytes()) {
                if let Some((algorithm, iterations, salt)) = nsec3_rr_params(&rr.rdatas) {
                    log::info!(
                        target: "nsec3",
                        "detected NSEC3 for zone {} saltlen={} iter={} salt={}",
                        apex_name,
                        salt.len(),
                        iterations,
                        if salt.is_empty() { "-".into() } else { hex::encode(salt) }
                    );
                    params = Some(Nsec3Params {
                        algorithm,
                        iterations,
                        salt: salt.to_vec(),
                        soa_owner: d,
                    });
                    break;
                }
            }
        }
        cur = db.table.successor(&name);
    }

    let mut owners = std::collections::BTreeMap::new();
    if let Some(params) = &params {
        let mut cur = Some(db.zone(zone).apex);
        while let Some(d) = cur {
            let name = db.table.name(d).clone();
            if !name.is_subdomain_of(&apex_name) {
                break;
            }
            if let Some(rrset) = db.table.find_rrset(d, zone, Type::NSEC3 as u16) {
                let matches = nsec3_rr_params(&rrset.rrs[0].rdatas).map_or(false, |(a, i, s)| {
                    a == params.algorithm && i == params.iterations && s == params.salt
                });
                if matches {
                    owners.insert(name.clone(), d);
                }
            }
            cur = db.table.successor(&name);
        }
    }

    let z = db.zone_mut(zone);
    z.nsec3 = params;
    z.nsec3_owners = owners;
}

/// The NSEC3 whose owner hash is the greatest value ≤ H(name), wrapping
/// around to the last owner when H(name) precedes them all. Returns
/// whether the hit is an exact match.
pub fn find_cover(db: &NameDb, zone: ZoneIdx, hashed: &Name) -> (bool, Option<DomainIdx>) {
    use std::ops::Bound;
    let owners = &db.zone(zone).nsec3_owners;
    if let Some((name, &idx)) = owners
        .range((Bound::Unbounded, Bound::Included(hashed)))
        .next_back()
    {
        return (name == hashed, Some(idx));
    }
    (false, owners.values().next_back().copied())
}

fn hash_and_find_cover(db: &NameDb, zone: ZoneIdx, name: &Name) -> (bool, Option<DomainIdx>) {
    let params = match &db.zone(zone).nsec3 {
        Some(p) => p,
        None => return (false, None),
    };
    match hashed_name(params, name, &db.zone(zone).apex_name) {
        Some(hashed) => find_cover(db, zone, &hashed),
        None => (false, None),
    }
}

fn add_nsec3(db: &NameDb, zone: ZoneIdx, answer: &mut Answer, domain: Option<DomainIdx>) {
    if let Some(domain) = domain {
        if db
            .table
            .find_rrset(domain, zone, Type::NSEC3 as u16)
            .is_some()
        {
            answer.add_rrset(
                Section::Authority,
                RrOwner::Domain(domain),
                RrsetSource::Stored {
                    domain,
                    zone,
                    rtype: Type::NSEC3 as u16,
                },
            );
        }
    }
}

/// Proves that the next-closer name under `encloser` does not exist.
/// Returns false on a hash collision, which the engine turns into
/// SERVFAIL.
pub fn add_nonexist_proof(
    db: &NameDb,
    zone: ZoneIdx,
    answer: &mut Answer,
    encloser: DomainIdx,
    qname: &Name,
) -> bool {
    let encloser_labels = db.table.name(encloser).label_count();
    let to_prove = qname.strip_left(qname.label_count() - encloser_labels - 1);
    let (exact, cover) = hash_and_find_cover(db, zone, &to_prove);
    if exact {
        log::error!(target: "nsec3", "nsec3 hash collision for name={}", to_prove);
        return false;
    }
    add_nsec3(db, zone, answer, cover);
    true
}

/// The closest-encloser proof: the NSEC3 matching the encloser plus the
/// one covering the next-closer name.
pub fn add_closest_encloser_proof(
    db: &NameDb,
    zone: ZoneIdx,
    answer: &mut Answer,
    closest_encloser: DomainIdx,
    qname: &Name,
) -> bool {
    if !add_nonexist_proof(db, zone, answer, closest_encloser, qname) {
        return false;
    }
    let name = db.table.name(closest_encloser).clone();
    let (exact, m) = hash_and_find_cover(db, zone, &name);
    if exact {
        add_nsec3(db, zone, answer, m);
    }
    true
}

/// Denies the wildcard at the closest encloser.
pub fn add_wildcard_denial(
    db: &NameDb,
    zone: ZoneIdx,
    answer: &mut Answer,
    closest_encloser: DomainIdx,
) {
    if let Ok(wildcard) = db.table.name(closest_encloser).wildcard_child() {
        let (_, cover) = hash_and_find_cover(db, zone, &wildcard);
        add_nsec3(db, zone, answer, cover);
    }
}

/// Positive wildcard answers prove the query name itself did not exist.
pub fn answer_wildcard(
    db: &NameDb,
    zone: ZoneIdx,
    answer: &mut Answer,
    closest_encloser: DomainIdx,
    qname: &Name,
) -> bool {
    if db.zone(zone).nsec3.is_none() {
        return true;
    }
    add_nonexist_proof(db, zone, answer, closest_encloser, qname)
}

/// The DS-denial proof at `domain`, used at delegations and for DS
/// NODATA. Follows the closest-provable-encloser walk when the name
/// has no exact hash match.
pub fn add_ds_proof(
    db: &NameDb,
    zone: ZoneIdx,
    answer: &mut Answer,
    domain: DomainIdx,
    _delegation: bool,
) {
    let name = db.table.name(domain).clone();
    let (exact, cover) = hash_and_find_cover(db, zone, &name);
    if exact {
        add_nsec3(db, zone, answer, cover);
        return;
    }
    // Closest provable encloser: walk up to the first ancestor whose
    // hash matches exactly; the apex always does.
    let mut par = db.table.parent(domain);
    let mut prev_par: Option<DomainIdx> = None;
    let mut walked = domain;
    while let Some(p) = par {
        let pname = db.table.name(p).clone();
        let (p_exact, p_match) = hash_and_find_cover(db, zone, &pname);
        if p_exact {
            add_nsec3(db, zone, answer, p_match);
            break;
        }
        prev_par = Some(walked);
        walked = p;
        par = db.table.parent(p);
    }
    // More than one step up means the one below the provable encloser
    // has no exact NSEC3 either; disprove it.
    if let Some(prev) = prev_par {
        let prev_name = db.table.name(prev).clone();
        let (_, prev_cover) = hash_and_find_cover(db, zone, &prev_name);
        add_nsec3(db, zone, answer, prev_cover);
    }
    // The covering range from the parent side of the cut.
    add_nsec3(db, zone, answer, cover);
}

/// NODATA proofs, by the shape of the match.
pub fn answer_nodata(
    db: &NameDb,
    zone: ZoneIdx,
    answer: &mut Answer,
    original: DomainIdx,
    qtype: u16,
) {
    if db.zone(zone).nsec3.is_none() {
        return;
    }
    let apex = db.zone(zone).apex;
    if qtype == Type::DS as u16 && original != apex {
        add_ds_proof(db, zone, answer, original, false);
        return;
    }
    let name = db.table.name(original).clone();
    if name.is_wildcard() {
        // Wildcard NODATA: match the closest encloser, then the source
        // of synthesis itself.
        if let Some(parent) = db.table.parent(original) {
            let pname = db.table.name(parent).clone();
            let (p_exact, p_match) = hash_and_find_cover(db, zone, &pname);
            if p_exact {
                add_nsec3(db, zone, answer, p_match);
            }
        }
        let (_, m) = hash_and_find_cover(db, zone, &name);
        add_nsec3(db, zone, answer, m);
        return;
    }
    let (_, m) = hash_and_find_cover(db, zone, &name);
    add_nsec3(db, zone, answer, m);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn b32hex_known_values() {
        assert_eq!(b32hex(&[]), "");
        assert_eq!(b32hex(&[0]), "00");
        assert_eq!(b32hex(&[0xff]), "vs");
    }

    #[test]
    fn rfc5155_hash_vector() {
        // Appendix A of RFC 5155: H(example) with salt aabbccdd and
        // 12 iterations.
        let name: Name = "example.".parse().unwrap();
        let hash = iterated_hash(&name, &[0xaa, 0xbb, 0xcc, 0xdd], 12);
        assert_eq!(b32hex(&hash), "0p9mhaveqvm6t7vbl5lop2u3t2rp3tom");
    }

    #[test]
    fn rfc5155_hash_vector_subdomain() {
        // H(a.example) from the same appendix.
        let name: Name = "a.example.".parse().unwrap();
        let hash = iterated_hash(&name, &[0xaa, 0xbb, 0xcc, 0xdd], 12);
        assert_eq!(b32hex(&hash), "35mthgpgcu1qg68fab165klnsnk3dpvl");
    }

    #[test]
    fn hashing_folds_case() {
        let a: Name = "Example.".parse().unwrap();
        let b: Name = "example.".parse().unwrap();
        assert_eq!(
            iterated_hash(&a, &[0xaa, 0xbb, 0xcc, 0xdd], 12),
            iterated_hash(&b, &[0xaa, 0xbb, 0xcc, 0xdd], 12)
        );
    }
}
