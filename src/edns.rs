//! EDNS0 (RFC 6891): recognising the OPT pseudo-record in a request and
//! echoing one in the response with the server-side limit.

use byteorder::{BigEndian, ByteOrder};

use crate::constants::*;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdnsStatus {
    NotPresent,
    Ok,
    Error,
}

#[derive(Clone, Debug)]
pub struct EdnsRecord {
    pub status: EdnsStatus,
    /// Offset of the OPT RR in the request.
    pub position: usize,
    /// The client's requested maximum payload size.
    pub max_payload: usize,
    pub dnssec_ok: bool,
}

impl Default for EdnsRecord {
    fn default() -> Self {
        EdnsRecord {
            status: EdnsStatus::NotPresent,
            position: 0,
            max_payload: 0,
            dnssec_ok: false,
        }
    }
}

impl EdnsRecord {
    /// Decodes the OPT RR whose owner name starts at `offset`. A record
    /// that is recognisably OPT but malformed (bad owner, unsupported
    /// version) comes back with `status == Error`; the response is then
    /// capped at 512 bytes rather than dropped.
    pub fn parse(packet: &[u8], offset: usize) -> (EdnsRecord, usize) {
        let mut record = EdnsRecord {
            status: EdnsStatus::Error,
            position: offset,
            ..Default::default()
        };
        // Owner must be the root, directly followed by the fixed part.
        if packet.len() < offset + 1 + DNS_RR_HEADER_SIZE {
            return (record, packet.len());
        }
        let fixed = offset + 1;
        let rdlen = BigEndian::read_u16(&packet[fixed + 8..]) as usize;
        let end = fixed + DNS_RR_HEADER_SIZE + rdlen;
        if packet[offset] != 0 || end > packet.len() {
            return (record, packet.len());
        }
        let version = packet[fixed + 5];
        let flags = BigEndian::read_u16(&packet[fixed + 6..]);
        if version != 0 {
            return (record, end);
        }
        record.status = EdnsStatus::Ok;
        record.max_payload = BigEndian::read_u16(&packet[fixed + 2..]) as usize;
        record.dnssec_ok = flags & EDNS_FLAG_DO != 0;
        (record, end)
    }

    /// Bytes to keep free in the response for the echoed OPT.
    pub fn reserved_space(&self) -> usize {
        match self.status {
            EdnsStatus::NotPresent => 0,
            _ => OPT_RR_LEN,
        }
    }

    /// Appends the response OPT RR. An erroneous request OPT is
    /// answered with extended rcode BADVERS.
    pub fn write_response(&self, out: &mut Vec<u8>, server_payload: u16) {
        let ext_rcode: u8 = match self.status {
            EdnsStatus::Error => 1, // BADVERS = 16, upper eight bits
            _ => 0,
        };
        let flags: u16 = if self.dnssec_ok { EDNS_FLAG_DO } else { 0 };
        out.push(0);
        let mut fixed = [0u8; DNS_RR_HEADER_SIZE];
        BigEndian::write_u16(&mut fixed[0..], Type::OPT as u16);
        BigEndian::write_u16(&mut fixed[2..], server_payload);
        fixed[4] = ext_rcode;
        fixed[5] = 0;
        BigEndian::write_u16(&mut fixed[6..], flags);
        BigEndian::write_u16(&mut fixed[8..], 0);
        out.extend_from_slice(&fixed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opt(payload: u16, version: u8, flags: u16) -> Vec<u8> {
        let mut rr = vec![0u8];
        rr.extend_from_slice(&(Type::OPT as u16).to_be_bytes());
        rr.extend_from_slice(&payload.to_be_bytes());
        rr.push(0);
        rr.push(version);
        rr.extend_from_slice(&flags.to_be_bytes());
        rr.extend_from_slice(&0u16.to_be_bytes());
        rr
    }

    #[test]
    fn parses_payload_and_do_bit() {
        let rr = opt(4096, 0, EDNS_FLAG_DO);
        let (record, end) = EdnsRecord::parse(&rr, 0);
        assert_eq!(record.status, EdnsStatus::Ok);
        assert_eq!(record.max_payload, 4096);
        assert!(record.dnssec_ok);
        assert_eq!(end, rr.len());
    }

    #[test]
    fn unsupported_version_is_an_error() {
        let rr = opt(4096, 1, 0);
        let (record, _) = EdnsRecord::parse(&rr, 0);
        assert_eq!(record.status, EdnsStatus::Error);
    }

    #[test]
    fn non_root_owner_is_an_error() {
        let mut rr = vec![1u8, b'x', 0];
        rr.extend_from_slice(&opt(4096, 0, 0)[1..]);
        let (record, _) = EdnsRecord::parse(&rr, 0);
        assert_eq!(record.status, EdnsStatus::Error);
    }
}
