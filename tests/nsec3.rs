//! Hashed denial: a small NSEC3 zone built around the RFC 5155 salt
//! and iteration count, queried over the engine.

mod common;

use common::*;
use zonecut::nsec3;
use zonecut::*;

const SALT: [u8; 4] = [0xaa, 0xbb, 0xcc, 0xdd];
const ITERATIONS: u16 = 12;

fn hashed_label(name: &str) -> String {
    nsec3::b32hex(&nsec3::iterated_hash(&n(name), &SALT, ITERATIONS))
}

fn nsec3_rdata(next_owner: &str) -> Vec<RdataAtom> {
    let mut salt = vec![SALT.len() as u8];
    salt.extend_from_slice(&SALT);
    let hash = nsec3::iterated_hash(&n(next_owner), &SALT, ITERATIONS);
    let mut next = vec![hash.len() as u8];
    next.extend_from_slice(&hash);
    vec![
        bytes_atom(&[1]), // SHA-1
        bytes_atom(&[0]),
        bytes_atom(&ITERATIONS.to_be_bytes()),
        bytes_atom(&salt),
        bytes_atom(&next),
        // Window 0: SOA and NS present.
        bytes_atom(&[0, 1, 0x62]),
    ]
}

fn build_nsec3_db() -> (NameDb, ZoneIdx) {
    let (mut db, z) = build_test_db();
    let soa_sig = rrsig_rdata(&mut db, Type::SOA as u16, "example.");
    db.add_rr(z, &n("example."), Type::RRSIG as u16, IN, 3600, soa_sig);

    for (owner, next) in [("example.", "a.example."), ("a.example.", "example.")] {
        let hashed = format!("{}.example.", hashed_label(owner));
        let rdata = nsec3_rdata(next);
        db.add_rr(z, &n(&hashed), Type::NSEC3 as u16, IN, 60, rdata);
        let sig = rrsig_rdata(&mut db, Type::NSEC3 as u16, "example.");
        db.add_rr(z, &n(&hashed), Type::RRSIG as u16, IN, 60, sig);
    }
    nsec3::prehash_zone(&mut db, z);
    (db, z)
}

#[test]
fn parameters_are_detected_from_the_soa_bit() {
    let (db, z) = build_nsec3_db();
    let params = db.zone(z).nsec3.as_ref().expect("NSEC3 detected");
    assert_eq!(params.algorithm, 1);
    assert_eq!(params.iterations, ITERATIONS);
    assert_eq!(params.salt, SALT);
    assert_eq!(db.zone(z).nsec3_owners.len(), 2);
}

#[test]
fn nxdomain_gets_hashed_denial() {
    let (db, _) = build_nsec3_db();
    let engine = Engine::new(db);
    let response = engine.ask_do("absent.example.", Type::A as u16);
    assert_eq!(response.rcode, Rcode::NxDomain as u8);
    let nsec3s: Vec<_> = response
        .section(SECTION_AUTHORITY)
        .filter(|rr| rr.rtype == Type::NSEC3 as u16)
        .collect();
    // The closest-encloser match plus covering records; the match is
    // the hash of the apex.
    assert!(!nsec3s.is_empty());
    let apex_owner = n(&format!("{}.example.", hashed_label("example.")));
    assert!(nsec3s.iter().any(|rr| rr.name == apex_owner));
    // No plain NSEC in a hashed zone.
    assert!(response.find(SECTION_AUTHORITY, Type::NSEC as u16).is_none());
}

#[test]
fn nodata_gets_the_matching_nsec3() {
    let (db, _) = build_nsec3_db();
    let engine = Engine::new(db);
    let response = engine.ask_do("a.example.", Type::AAAA as u16);
    assert_eq!(response.rcode, 0);
    let owner = n(&format!("{}.example.", hashed_label("a.example.")));
    let nsec3 = response
        .find(SECTION_AUTHORITY, Type::NSEC3 as u16)
        .expect("NODATA carries the matching NSEC3");
    assert_eq!(nsec3.name, owner);
}

#[test]
fn plain_queries_are_unaffected() {
    let (db, _) = build_nsec3_db();
    let engine = Engine::new(db);
    let response = engine.ask("a.example.", Type::A as u16);
    assert_eq!(response.rcode, 0);
    assert_eq!(response.ancount, 1);
    assert!(response.find(SECTION_AUTHORITY, Type::NSEC3 as u16).is_none());
}
