//! PAP authenticator, rfc1334. Runs either or both directions of one link:
//! verifying the peer against the credential provider, and proving ourselves
//! with configured credentials.
//!
//! Credential checks round-trip through the link mailbox: the driver emits
//! [`PapEffect::Authenticate`], the provider's answer comes back via
//! [`Pap::auth_reply`].

use std::time::Duration;

use log::{debug, warn};

use crate::wire::{PapMsg, PapPacket};

pub const AUTH_TIMER: Duration = Duration::from_secs(3);
pub const MAX_AUTH_RETRANSMITS: u32 = 3;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum AuthDirection {
    /// The peer authenticates to us.
    PeerToUs,
    /// We authenticate to the peer.
    UsToPeer,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PapEffect {
    Send(PapPacket),
    StartTimer { generation: u64, delay: Duration },
    /// Ask the credential provider whether these are valid; answer returns
    /// through [`Pap::auth_reply`] with the same id.
    Authenticate { id: u8, peer_id: Vec<u8>, passwd: Vec<u8> },
    Result { direction: AuthDirection, success: bool },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum ProveState {
    Idle,
    ReqSent,
    Done,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum VerifyState {
    Idle,
    Waiting,
    Pending { id: u8 },
    Done,
}

pub struct Pap {
    username: Vec<u8>,
    password: Vec<u8>,
    id: u8,
    prove: ProveState,
    verify: VerifyState,
    peer_id: Vec<u8>,
    retransmits: u32,
    timer_armed: bool,
    timer_generation: u64,
}

impl Pap {
    pub fn new(username: &[u8], password: &[u8]) -> Self {
        Self {
            username: username.to_vec(),
            password: password.to_vec(),
            id: 0,
            prove: ProveState::Idle,
            verify: VerifyState::Idle,
            peer_id: Vec::new(),
            retransmits: 0,
            timer_armed: false,
            timer_generation: 0,
        }
    }

    /// The identity the peer authenticated with; empty until then.
    pub fn peer_id(&self) -> &[u8] {
        &self.peer_id
    }

    fn next_id(&mut self) -> u8 {
        self.id = self.id.wrapping_add(1);
        self.id
    }

    fn arm_timer(&mut self, fx: &mut Vec<PapEffect>) {
        self.timer_armed = true;
        self.timer_generation += 1;
        fx.push(PapEffect::StartTimer {
            generation: self.timer_generation,
            delay: AUTH_TIMER,
        });
    }

    fn send_auth_request(&mut self, fx: &mut Vec<PapEffect>) {
        debug!("PAP: tx AuthReq id={}", self.id);
        fx.push(PapEffect::Send(PapPacket {
            id: self.id,
            msg: PapMsg::AuthReq {
                peer_id: self.username.clone(),
                passwd: self.password.clone(),
            },
        }));
        self.arm_timer(fx);
    }

    /// LCP is up; start whichever directions were negotiated.
    pub fn lower_up(&mut self, directions: &[AuthDirection]) -> Vec<PapEffect> {
        let mut fx = Vec::new();
        for direction in directions {
            match direction {
                AuthDirection::UsToPeer => {
                    self.retransmits = 0;
                    self.next_id();
                    self.prove = ProveState::ReqSent;
                    self.send_auth_request(&mut fx);
                }
                AuthDirection::PeerToUs => self.verify = VerifyState::Waiting,
            }
        }
        fx
    }

    pub fn lower_down(&mut self) {
        self.prove = ProveState::Idle;
        self.verify = VerifyState::Idle;
        self.timer_armed = false;
        self.timer_generation += 1;
    }

    pub fn frame_in(&mut self, packet: PapPacket) -> Vec<PapEffect> {
        let mut fx = Vec::new();
        match packet.msg {
            PapMsg::AuthReq { peer_id, passwd } => match self.verify {
                VerifyState::Waiting => {
                    debug!("PAP: rx AuthReq id={}", packet.id);
                    self.peer_id = peer_id.clone();
                    self.verify = VerifyState::Pending { id: packet.id };
                    fx.push(PapEffect::Authenticate {
                        id: packet.id,
                        peer_id,
                        passwd,
                    });
                }
                VerifyState::Pending { id } if id == packet.id => {
                    // Peer retransmitted while the provider is thinking.
                }
                VerifyState::Pending { .. } => {
                    // A new attempt supersedes the outstanding one.
                    debug!("PAP: rx superseding AuthReq id={}", packet.id);
                    self.peer_id = peer_id.clone();
                    self.verify = VerifyState::Pending { id: packet.id };
                    fx.push(PapEffect::Authenticate {
                        id: packet.id,
                        peer_id,
                        passwd,
                    });
                }
                _ => warn!("PAP: unexpected AuthReq"),
            },
            PapMsg::Ack { .. } => {
                if self.prove == ProveState::ReqSent && packet.id == self.id {
                    debug!("PAP: rx Ack");
                    self.prove = ProveState::Done;
                    self.timer_armed = false;
                    self.timer_generation += 1;
                    fx.push(PapEffect::Result {
                        direction: AuthDirection::UsToPeer,
                        success: true,
                    });
                }
            }
            PapMsg::Nak { msg } => {
                if self.prove == ProveState::ReqSent && packet.id == self.id {
                    warn!("PAP: rx Nak: {:?}", String::from_utf8_lossy(&msg));
                    self.prove = ProveState::Done;
                    self.timer_armed = false;
                    self.timer_generation += 1;
                    fx.push(PapEffect::Result {
                        direction: AuthDirection::UsToPeer,
                        success: false,
                    });
                }
            }
        }
        fx
    }

    /// Provider verdict for the check we asked for.
    pub fn auth_reply(&mut self, id: u8, success: bool) -> Vec<PapEffect> {
        let mut fx = Vec::new();
        match self.verify {
            VerifyState::Pending { id: pending } if pending == id => {
                self.verify = VerifyState::Done;
                let msg = if success {
                    PapMsg::Ack { msg: Vec::new() }
                } else {
                    PapMsg::Nak {
                        msg: b"Authentication failed".to_vec(),
                    }
                };
                fx.push(PapEffect::Send(PapPacket { id, msg }));
                fx.push(PapEffect::Result {
                    direction: AuthDirection::PeerToUs,
                    success,
                });
            }
            _ => debug!("PAP: stale auth reply for id {}", id),
        }
        fx
    }

    pub fn timeout(&mut self, generation: u64) -> Vec<PapEffect> {
        let mut fx = Vec::new();
        if !self.timer_armed || generation != self.timer_generation {
            return fx;
        }
        self.timer_armed = false;
        if self.prove != ProveState::ReqSent {
            return fx;
        }
        if self.retransmits < MAX_AUTH_RETRANSMITS {
            self.retransmits += 1;
            self.send_auth_request(&mut fx);
        } else {
            warn!("PAP: peer never answered our AuthReq");
            self.prove = ProveState::Done;
            fx.push(PapEffect::Result {
                direction: AuthDirection::UsToPeer,
                success: false,
            });
        }
        fx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer_generation(fx: &[PapEffect]) -> Option<u64> {
        fx.iter().find_map(|e| match e {
            PapEffect::StartTimer { generation, .. } => Some(*generation),
            _ => None,
        })
    }

    #[test]
    fn verify_side_round_trips_through_provider() {
        let mut pap = Pap::new(b"", b"");
        pap.lower_up(&[AuthDirection::PeerToUs]);
        let fx = pap.frame_in(PapPacket {
            id: 1,
            msg: PapMsg::AuthReq {
                peer_id: b"alice".to_vec(),
                passwd: b"pw".to_vec(),
            },
        });
        assert_eq!(
            fx,
            [PapEffect::Authenticate {
                id: 1,
                peer_id: b"alice".to_vec(),
                passwd: b"pw".to_vec(),
            }]
        );
        let fx = pap.auth_reply(1, true);
        assert_eq!(
            fx,
            [
                PapEffect::Send(PapPacket {
                    id: 1,
                    msg: PapMsg::Ack { msg: vec![] },
                }),
                PapEffect::Result {
                    direction: AuthDirection::PeerToUs,
                    success: true,
                },
            ]
        );
        assert_eq!(pap.peer_id(), b"alice");
    }

    #[test]
    fn verify_failure_naks() {
        let mut pap = Pap::new(b"", b"");
        pap.lower_up(&[AuthDirection::PeerToUs]);
        pap.frame_in(PapPacket {
            id: 1,
            msg: PapMsg::AuthReq {
                peer_id: b"mallory".to_vec(),
                passwd: b"guess".to_vec(),
            },
        });
        let fx = pap.auth_reply(1, false);
        match &fx[0] {
            PapEffect::Send(PapPacket {
                msg: PapMsg::Nak { .. },
                ..
            }) => {}
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(
            fx[1],
            PapEffect::Result {
                direction: AuthDirection::PeerToUs,
                success: false,
            }
        );
    }

    #[test]
    fn duplicate_request_does_not_recheck() {
        let mut pap = Pap::new(b"", b"");
        pap.lower_up(&[AuthDirection::PeerToUs]);
        let req = PapPacket {
            id: 1,
            msg: PapMsg::AuthReq {
                peer_id: b"alice".to_vec(),
                passwd: b"pw".to_vec(),
            },
        };
        assert_eq!(pap.frame_in(req.clone()).len(), 1);
        assert!(pap.frame_in(req).is_empty());
    }

    #[test]
    fn prove_side_retransmits_then_gives_up() {
        let mut pap = Pap::new(b"nas", b"secret");
        let fx = pap.lower_up(&[AuthDirection::UsToPeer]);
        let mut generation = timer_generation(&fx).unwrap();
        for _ in 0..MAX_AUTH_RETRANSMITS {
            let fx = pap.timeout(generation);
            assert!(matches!(fx[0], PapEffect::Send(_)));
            generation = timer_generation(&fx).unwrap();
        }
        let fx = pap.timeout(generation);
        assert_eq!(
            fx,
            [PapEffect::Result {
                direction: AuthDirection::UsToPeer,
                success: false,
            }]
        );
    }

    #[test]
    fn prove_side_succeeds_on_ack() {
        let mut pap = Pap::new(b"nas", b"secret");
        let fx = pap.lower_up(&[AuthDirection::UsToPeer]);
        let id = match &fx[0] {
            PapEffect::Send(packet) => packet.id,
            other => panic!("unexpected: {other:?}"),
        };
        let fx = pap.frame_in(PapPacket {
            id,
            msg: PapMsg::Ack { msg: vec![] },
        });
        assert_eq!(
            fx,
            [PapEffect::Result {
                direction: AuthDirection::UsToPeer,
                success: true,
            }]
        );
    }
}
