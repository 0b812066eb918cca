//! An authoritative DNS server core: the in-memory zone database, the
//! query/response engine, the compressing wire encoder, and the
//! incremental (IXFR) update log. Socket handling, the transfer
//! client, and TSIG cryptography are external collaborators.

pub mod acl;
pub mod answer;
pub mod config;
pub mod constants;
pub mod dbfile;
pub mod difffile;
pub mod edns;
pub mod errors;
pub mod name;
pub mod namedb;
pub mod nsec3;
pub mod query;
pub mod rdata;
pub mod request;
pub mod stats;
pub mod tsig;
pub mod xfr;
pub mod zone;

pub use crate::acl::*;
pub use crate::answer::*;
pub use crate::config::*;
pub use crate::constants::*;
pub use crate::edns::*;
pub use crate::errors::*;
pub use crate::name::*;
pub use crate::namedb::*;
pub use crate::nsec3::Nsec3Params;
pub use crate::query::*;
pub use crate::rdata::*;
pub use crate::request::*;
pub use crate::stats::*;
pub use crate::tsig::*;
pub use crate::xfr::*;
pub use crate::zone::*;
