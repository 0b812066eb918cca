//! TSIG (RFC 2845) placement and error mapping. The cryptographic core
//! is an external collaborator reached through [`TsigAuthority`]; this
//! module locates the record, extracts what the signer needs, and maps
//! verification failures onto NOTAUTH responses.

use byteorder::{BigEndian, ByteOrder};

use crate::constants::*;
use crate::name::Name;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TsigStatus {
    NotPresent,
    Ok,
    Error,
}

#[derive(Clone, Debug)]
pub struct TsigRecord {
    pub status: TsigStatus,
    /// Offset of the TSIG RR in the request; the signed message is
    /// everything before it (with ARCOUNT decremented).
    pub position: usize,
    pub key_name: Option<Name>,
    pub algorithm: Option<Name>,
    pub signed_time: u64,
    pub fudge: u16,
    pub mac: Vec<u8>,
    pub original_id: u16,
    pub error_code: u16,
}

impl Default for TsigRecord {
    fn default() -> Self {
        TsigRecord {
            status: TsigStatus::NotPresent,
            position: 0,
            key_name: None,
            algorithm: None,
            signed_time: 0,
            fudge: 0,
            mac: Vec::new(),
            original_id: 0,
            error_code: TSIG_ERROR_NOERROR,
        }
    }
}

impl TsigRecord {
    /// Decodes the TSIG RR whose owner starts at `offset`. Neither the
    /// owner nor the algorithm name may be compressed.
    pub fn parse(packet: &[u8], offset: usize) -> (TsigRecord, usize) {
        let mut record = TsigRecord {
            status: TsigStatus::Error,
            position: offset,
            ..Default::default()
        };
        let (key_name, fixed) = match Name::from_wire_uncompressed(packet, offset) {
            Ok(v) => v,
            Err(_) => return (record, packet.len()),
        };
        if packet.len() < fixed + DNS_RR_HEADER_SIZE {
            return (record, packet.len());
        }
        let rdlen = BigEndian::read_u16(&packet[fixed + 8..]) as usize;
        let end = fixed + DNS_RR_HEADER_SIZE + rdlen;
        if end > packet.len() {
            return (record, packet.len());
        }
        let rdata_start = fixed + DNS_RR_HEADER_SIZE;
        let (algorithm, mut pos) = match Name::from_wire_uncompressed(packet, rdata_start) {
            Ok(v) => v,
            Err(_) => return (record, end),
        };
        // time(6) fudge(2) mac_size(2) mac orig_id(2) error(2) other_len(2)
        if pos + 12 > end {
            return (record, end);
        }
        let time_hi = BigEndian::read_u16(&packet[pos..]) as u64;
        let time_lo = BigEndian::read_u32(&packet[pos + 2..]) as u64;
        record.signed_time = (time_hi << 32) | time_lo;
        record.fudge = BigEndian::read_u16(&packet[pos + 6..]);
        let mac_size = BigEndian::read_u16(&packet[pos + 8..]) as usize;
        pos += 10;
        if pos + mac_size + 6 > end {
            return (record, end);
        }
        record.mac = packet[pos..pos + mac_size].to_vec();
        pos += mac_size;
        record.original_id = BigEndian::read_u16(&packet[pos..]);
        record.error_code = BigEndian::read_u16(&packet[pos + 2..]);
        let other_len = BigEndian::read_u16(&packet[pos + 4..]) as usize;
        if pos + 6 + other_len != end {
            return (record, end);
        }
        record.key_name = Some(key_name);
        record.algorithm = Some(algorithm);
        record.status = TsigStatus::Ok;
        (record, end)
    }

    pub fn reserved_space(&self) -> usize {
        match self.status {
            TsigStatus::NotPresent => 0,
            _ => TSIG_RESERVED_SPACE,
        }
    }
}

/// Verification verdicts, mapped onto TSIG error codes and a NOTAUTH
/// response by the query engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TsigVerdict {
    Ok,
    BadKey,
    BadSig,
    BadTime,
}

impl TsigVerdict {
    pub fn error_code(self) -> u16 {
        match self {
            TsigVerdict::Ok => TSIG_ERROR_NOERROR,
            TsigVerdict::BadSig => TSIG_ERROR_BADSIG,
            TsigVerdict::BadKey => TSIG_ERROR_BADKEY,
            TsigVerdict::BadTime => TSIG_ERROR_BADTIME,
        }
    }
}

/// The external signing module. `verify` checks the request MAC over
/// `message` (the request with the TSIG stripped); `sign` returns a
/// complete wire TSIG RR to append to `response`. A BADKEY or BADSIG
/// response carries an unsigned TSIG with the error code; BADTIME is
/// signed (the client needs proof of the server clock).
pub trait TsigAuthority {
    fn verify(&self, record: &TsigRecord, message: &[u8]) -> TsigVerdict;
    fn sign(&self, record: &TsigRecord, response: &[u8], error_code: u16) -> Vec<u8>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tsig_rr(key: &str, mac: &[u8]) -> Vec<u8> {
        let key: Name = key.parse().unwrap();
        let alg: Name = "hmac-sha256.".parse().unwrap();
        let mut rr = key.wire().to_vec();
        rr.extend_from_slice(&(Type::TSIG as u16).to_be_bytes());
        rr.extend_from_slice(&(Class::Any as u16).to_be_bytes());
        rr.extend_from_slice(&0u32.to_be_bytes());
        let rdlen = alg.len() + 10 + mac.len() + 6;
        rr.extend_from_slice(&(rdlen as u16).to_be_bytes());
        rr.extend_from_slice(alg.wire());
        rr.extend_from_slice(&[0, 0]); // time, upper
        rr.extend_from_slice(&0x5f00_0000u32.to_be_bytes());
        rr.extend_from_slice(&300u16.to_be_bytes());
        rr.extend_from_slice(&(mac.len() as u16).to_be_bytes());
        rr.extend_from_slice(mac);
        rr.extend_from_slice(&0x1234u16.to_be_bytes());
        rr.extend_from_slice(&0u16.to_be_bytes());
        rr.extend_from_slice(&0u16.to_be_bytes());
        rr
    }

    #[test]
    fn parses_key_and_mac() {
        let rr = tsig_rr("transfer-key.", &[0xaa; 32]);
        let (record, end) = TsigRecord::parse(&rr, 0);
        assert_eq!(record.status, TsigStatus::Ok);
        assert_eq!(end, rr.len());
        assert_eq!(
            record.key_name.unwrap(),
            "transfer-key.".parse::<Name>().unwrap()
        );
        assert_eq!(record.mac.len(), 32);
        assert_eq!(record.original_id, 0x1234);
        assert_eq!(record.fudge, 300);
    }

    #[test]
    fn truncated_rdata_is_an_error() {
        let rr = tsig_rr("k.", &[0xaa; 16]);
        let (record, _) = TsigRecord::parse(&rr[..rr.len() - 4], 0);
        assert_eq!(record.status, TsigStatus::Error);
    }
}
