//! The carrier seam. PPPoE sessions, HDLC lines and test harnesses all look
//! the same from the link's side: a byte-oriented pipe with per-peer octet
//! counters.

use std::net::Ipv4Addr;

/// Octet and packet counters for one peer, as reported by the carrier.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct LinkCounters {
    pub in_octets: u64,
    pub out_octets: u64,
    pub in_packets: u64,
    pub out_packets: u64,
}

/// One link owns its transport exclusively and terminates it on teardown.
/// `send` enqueues a complete PPP payload (Protocol field onward) and must
/// not block.
pub trait Transport: Send {
    fn send(&mut self, payload: &[u8]);
    fn counters(&self, peer: Ipv4Addr) -> LinkCounters;
    fn terminate(&mut self);
}
