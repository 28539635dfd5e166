//! IPCP option policy, rfc1332: IPv4 address negotiation. The engine
//! assigns the peer an address from configuration and claims its own.

use std::net::Ipv4Addr;

use log::trace;

use super::option_fsm::{CpPolicy, Verdicts};
use crate::wire::{IpcpOption, Protocol};

pub struct Ipcp {
    /// Address we claim for our end of the link.
    our_address: Ipv4Addr,
    our_address_rejected: bool,
    /// Address we hand the peer when it asks (or proposes nonsense).
    suggested_peer: Ipv4Addr,
    /// Address the peer settled on.
    peer_address: Ipv4Addr,
}

impl Ipcp {
    pub fn new(our_address: Ipv4Addr, suggested_peer: Ipv4Addr) -> Self {
        Self {
            our_address,
            our_address_rejected: false,
            suggested_peer,
            peer_address: Ipv4Addr::UNSPECIFIED,
        }
    }

    pub fn our_address(&self) -> Ipv4Addr {
        self.our_address
    }

    pub fn peer_address(&self) -> Ipv4Addr {
        self.peer_address
    }
}

impl CpPolicy for Ipcp {
    type Option = IpcpOption;

    fn protocol(&self) -> Protocol {
        Protocol::Ipcp
    }

    fn build_request(&mut self) -> Vec<IpcpOption> {
        if self.our_address_rejected {
            Vec::new()
        } else {
            vec![IpcpOption::IpAddress(self.our_address)]
        }
    }

    fn check_received(&mut self, opts: &[IpcpOption]) -> Verdicts<IpcpOption> {
        let mut v = Verdicts::default();
        for opt in opts {
            trace!("IPCP: rx option {:?}", opt);
            match opt {
                IpcpOption::IpAddress(addr) => {
                    if addr.is_unspecified() {
                        // Peer wants an address assigned.
                        v.nak.push(IpcpOption::IpAddress(self.suggested_peer));
                    } else if self.suggested_peer.is_unspecified()
                        || *addr == self.suggested_peer
                    {
                        v.ack.push(opt.clone());
                    } else {
                        v.nak.push(IpcpOption::IpAddress(self.suggested_peer));
                    }
                }
                _ => v.rej.push(opt.clone()),
            }
        }
        v
    }

    fn request_acked(&mut self, opts: &[IpcpOption]) {
        for opt in opts {
            if let IpcpOption::IpAddress(addr) = opt {
                self.our_address = *addr;
            }
        }
    }

    fn peer_acked(&mut self, opts: &[IpcpOption]) {
        for opt in opts {
            if let IpcpOption::IpAddress(addr) = opt {
                self.peer_address = *addr;
            }
        }
    }

    fn process_nak(&mut self, opts: &[IpcpOption]) -> bool {
        for opt in opts {
            trace!("IPCP: nak {:?}", opt);
            if let IpcpOption::IpAddress(addr) = opt {
                self.our_address = *addr;
            }
        }
        true
    }

    fn process_reject(&mut self, opts: &[IpcpOption]) -> bool {
        for opt in opts {
            trace!("IPCP: reject {:?}", opt);
            if let IpcpOption::IpAddress(_) = opt {
                // Keep negotiating without it rather than looping.
                self.our_address_rejected = true;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipcp() -> Ipcp {
        Ipcp::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
        )
    }

    #[test]
    fn zero_address_gets_suggestion() {
        let mut cp = ipcp();
        let v = cp.check_received(&[IpcpOption::IpAddress(Ipv4Addr::UNSPECIFIED)]);
        assert_eq!(
            v.nak,
            [IpcpOption::IpAddress(Ipv4Addr::new(10, 0, 0, 2))]
        );
    }

    #[test]
    fn consistent_address_is_acked() {
        let mut cp = ipcp();
        let opt = IpcpOption::IpAddress(Ipv4Addr::new(10, 0, 0, 2));
        let v = cp.check_received(&[opt.clone()]);
        assert_eq!(v.ack, [opt.clone()]);
        cp.peer_acked(&[opt]);
        assert_eq!(cp.peer_address(), Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn inconsistent_address_is_naked_back_to_pool() {
        let mut cp = ipcp();
        let v = cp.check_received(&[IpcpOption::IpAddress(Ipv4Addr::new(172, 16, 0, 1))]);
        assert_eq!(
            v.nak,
            [IpcpOption::IpAddress(Ipv4Addr::new(10, 0, 0, 2))]
        );
    }

    #[test]
    fn other_options_are_rejected() {
        let mut cp = ipcp();
        let opt = IpcpOption::PrimaryDns(Ipv4Addr::new(8, 8, 8, 8));
        let v = cp.check_received(&[opt.clone()]);
        assert_eq!(v.rej, [opt]);
    }

    #[test]
    fn nak_overrides_our_address() {
        let mut cp = ipcp();
        cp.process_nak(&[IpcpOption::IpAddress(Ipv4Addr::new(10, 9, 9, 9))]);
        assert_eq!(cp.build_request(), [IpcpOption::IpAddress(Ipv4Addr::new(10, 9, 9, 9))]);
    }
}
