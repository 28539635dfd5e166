//! Session accounting records. The link fills these in at session start, on
//! the interim timer and at teardown; delivery (RADIUS or otherwise) is the
//! sink's business and is fire-and-forget.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Acct-Status-Type.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum AcctStatus {
    Start,
    Interim,
    Stop,
}

/// Service-Type for a PPP session.
pub const SERVICE_TYPE_FRAMED: u32 = 2;
/// Framed-Protocol for PPP.
pub const FRAMED_PROTOCOL_PPP: u32 = 1;

/// Attributes carried in a record: the rfc2865/2866 session set plus the
/// DSL-Forum line attributes a PPPoE access loop reports.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum AcctAttr {
    UserName(String),
    FramedIpAddress(Ipv4Addr),
    /// Seconds since session start.
    SessionTime(u64),
    NasIdentifier(String),
    ServiceType(u32),
    FramedProtocol(u32),
    TerminateCause(String),
    InputOctets(u64),
    OutputOctets(u64),
    InputPackets(u64),
    OutputPackets(u64),
    ActualDataRateUp(u32),
    ActualDataRateDown(u32),
    MinDataRateUp(u32),
    MinDataRateDown(u32),
    MaxDataRateUp(u32),
    MaxDataRateDown(u32),
    AttainableDataRateUp(u32),
    AttainableDataRateDown(u32),
    InterleavingDelayUp(u32),
    InterleavingDelayDown(u32),
    CircuitId(Vec<u8>),
    RemoteId(Vec<u8>),
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct AcctRecord {
    pub status: AcctStatus,
    pub attrs: Vec<AcctAttr>,
}

impl AcctRecord {
    pub fn new(status: AcctStatus) -> Self {
        Self {
            status,
            attrs: Vec::new(),
        }
    }

    pub fn attr(mut self, attr: AcctAttr) -> Self {
        self.attrs.push(attr);
        self
    }

    pub fn attrs(mut self, attrs: impl IntoIterator<Item = AcctAttr>) -> Self {
        self.attrs.extend(attrs);
        self
    }
}

/// Where records go. Submission must not block the link; a sink fronting a
/// slow backend should enqueue and return.
pub trait AcctSink: Send {
    fn emit(&self, record: AcctRecord);
}

/// Discards everything. Handy when accounting is switched off.
pub struct NullAcctSink;

impl AcctSink for NullAcctSink {
    fn emit(&self, _record: AcctRecord) {}
}
