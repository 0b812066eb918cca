#![allow(dead_code)]

/// Size of the DNS message header: ID, flags and the four section counts.
pub const DNS_HEADER_SIZE: usize = 12;

/// Offset of the question section from the start of a message.
pub const DNS_QUESTION_OFFSET: usize = DNS_HEADER_SIZE;

/// Maximum wire length of a domain name, terminating root label included.
pub const DNS_MAX_NAME_LEN: usize = 255;

/// Maximum number of labels in a name, terminating root label included.
pub const DNS_MAX_LABELS: usize = 128;

/// Maximum number of compression indirections tolerated in one name.
pub const DNS_MAX_NAME_INDIRECTIONS: u16 = 16;

/// Size of the fixed RR header between the owner name and the rdata.
pub const DNS_RR_HEADER_SIZE: usize = 10;

/// Largest offset a 14-bit compression pointer can express.
pub const MAX_COMPRESSION_OFFSET: usize = 0x3fff;

/// Upper bound on the number of RRsets collected for a single response.
pub const MAX_RRSETS_PER_RESPONSE: usize = 10240;

/// Plain (pre-EDNS) UDP message limit, also the floor for EDNS budgets.
pub const UDP_MAX_MESSAGE_LEN: usize = 512;

/// Largest payload size EDNS can negotiate.
pub const EDNS_MAX_MESSAGE_LEN: usize = 65535;

/// IPv6 minimum MTU, the cap for IPv6 UDP without IPV6_USE_MIN_MTU.
pub const IPV6_MIN_MTU: usize = 1280;

/// Maximum message size over TCP.
pub const TCP_MAX_MESSAGE_LEN: usize = 65535;

/// Wire size of an empty OPT RR in a response.
pub const OPT_RR_LEN: usize = 11;

/// Space reserved for an appended TSIG RR (name, header and HMAC).
pub const TSIG_RESERVED_SPACE: usize = 512;

// Header flag masks, on the 16-bit flags word at offset 2.
pub const FLAG_QR: u16 = 0x8000;
pub const FLAG_AA: u16 = 0x0400;
pub const FLAG_TC: u16 = 0x0200;
pub const FLAG_RD: u16 = 0x0100;
pub const FLAG_RA: u16 = 0x0080;
pub const FLAG_AD: u16 = 0x0020;
pub const FLAG_CD: u16 = 0x0010;
pub const OPCODE_MASK: u16 = 0x7800;
pub const OPCODE_SHIFT: u16 = 11;
pub const RCODE_MASK: u16 = 0x000f;

/// The DO bit, in the upper half of an OPT record's TTL field.
pub const EDNS_FLAG_DO: u16 = 0x8000;

/// RR classes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum Class {
    In = 1,
    Ch = 3,
    Hs = 4,
    None = 254,
    Any = 255,
}

impl From<Class> for u16 {
    fn from(v: Class) -> u16 {
        v as u16
    }
}

/// RR types an authoritative server has reason to know by name.
/// Everything else is carried as an opaque rdata blob.
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum Type {
    A = 1,
    NS = 2,
    MD = 3,
    MF = 4,
    CNAME = 5,
    SOA = 6,
    MB = 7,
    MG = 8,
    MR = 9,
    NULL = 10,
    WKS = 11,
    PTR = 12,
    HINFO = 13,
    MINFO = 14,
    MX = 15,
    TXT = 16,
    RP = 17,
    AFSDB = 18,
    X25 = 19,
    ISDN = 20,
    RT = 21,
    SIG = 24,
    KEY = 25,
    PX = 26,
    AAAA = 28,
    LOC = 29,
    SRV = 33,
    NAPTR = 35,
    KX = 36,
    CERT = 37,
    DNAME = 39,
    OPT = 41,
    DS = 43,
    SSHFP = 44,
    IPSECKEY = 45,
    RRSIG = 46,
    NSEC = 47,
    DNSKEY = 48,
    DHCID = 49,
    NSEC3 = 50,
    NSEC3PARAM = 51,
    TLSA = 52,
    SPF = 99,
    TSIG = 250,
    IXFR = 251,
    AXFR = 252,
    ANY = 255,
}

impl From<Type> for u16 {
    fn from(v: Type) -> u16 {
        v as u16
    }
}

impl Type {
    /// Mnemonic for log records; callers fall back to the numeric form.
    pub fn mnemonic(rtype: u16) -> Option<&'static str> {
        Some(match rtype {
            t if t == Type::A as u16 => "A",
            t if t == Type::NS as u16 => "NS",
            t if t == Type::CNAME as u16 => "CNAME",
            t if t == Type::SOA as u16 => "SOA",
            t if t == Type::PTR as u16 => "PTR",
            t if t == Type::HINFO as u16 => "HINFO",
            t if t == Type::MX as u16 => "MX",
            t if t == Type::TXT as u16 => "TXT",
            t if t == Type::AAAA as u16 => "AAAA",
            t if t == Type::SRV as u16 => "SRV",
            t if t == Type::NAPTR as u16 => "NAPTR",
            t if t == Type::DNAME as u16 => "DNAME",
            t if t == Type::OPT as u16 => "OPT",
            t if t == Type::DS as u16 => "DS",
            t if t == Type::RRSIG as u16 => "RRSIG",
            t if t == Type::NSEC as u16 => "NSEC",
            t if t == Type::DNSKEY as u16 => "DNSKEY",
            t if t == Type::NSEC3 as u16 => "NSEC3",
            t if t == Type::NSEC3PARAM as u16 => "NSEC3PARAM",
            t if t == Type::TLSA as u16 => "TLSA",
            t if t == Type::SPF as u16 => "SPF",
            t if t == Type::TSIG as u16 => "TSIG",
            t if t == Type::IXFR as u16 => "IXFR",
            t if t == Type::AXFR as u16 => "AXFR",
            t if t == Type::ANY as u16 => "ANY",
            _ => return None,
        })
    }
}

/// Response codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Rcode {
    NoError = 0,
    FormErr = 1,
    ServFail = 2,
    NxDomain = 3,
    NotImp = 4,
    Refused = 5,
    YxDomain = 6,
    YxRrset = 7,
    NxRrset = 8,
    NotAuth = 9,
    NotZone = 10,
}

impl From<Rcode> for u8 {
    fn from(v: Rcode) -> u8 {
        v as u8
    }
}

/// Opcodes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Opcode {
    Query = 0,
    Iquery = 1,
    Status = 2,
    Notify = 4,
    Update = 5,
}

impl From<Opcode> for u8 {
    fn from(v: Opcode) -> u8 {
        v as u8
    }
}

// TSIG rcodes, carried in the TSIG rdata error field.
pub const TSIG_ERROR_NOERROR: u16 = 0;
pub const TSIG_ERROR_BADSIG: u16 = 16;
pub const TSIG_ERROR_BADKEY: u16 = 17;
pub const TSIG_ERROR_BADTIME: u16 = 18;
