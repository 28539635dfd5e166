//! LCP option policy: which link options we ask for, and how we judge the
//! peer's.

use log::{debug, trace};
use rand::Rng;

use super::option_fsm::{CpPolicy, Verdicts};
use crate::config::Config;
use crate::wire::{AuthProto, CpCode, LcpOption, Protocol};

pub const DEFAULT_MRU: u16 = 1500;

/// One side's negotiated link options. `our_opts` is this projection built
/// from what the peer Ack'd for us, `his_opts` from what we Ack'd for the
/// peer.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct LcpOpts {
    pub mru: Option<u16>,
    pub asyncmap: Option<u32>,
    pub magic: Option<u32>,
    pub auth: Option<AuthProto>,
    pub pfc: bool,
    pub acfc: bool,
    pub mrru: Option<u16>,
    pub ssnhf: bool,
    pub epdisc: Option<(u8, Vec<u8>)>,
}

impl LcpOpts {
    fn record(&mut self, opt: &LcpOption) {
        match opt {
            LcpOption::Mru(v) => self.mru = Some(*v),
            LcpOption::AsyncMap(v) => self.asyncmap = Some(*v),
            LcpOption::Magic(v) => self.magic = Some(*v),
            LcpOption::Auth(p) => self.auth = Some(*p),
            LcpOption::Pfc => self.pfc = true,
            LcpOption::Acfc => self.acfc = true,
            LcpOption::Mrru(v) => self.mrru = Some(*v),
            LcpOption::Ssnhf => self.ssnhf = true,
            LcpOption::EpDisc { class, address } => {
                self.epdisc = Some((*class, address.clone()))
            }
            _ => {}
        }
    }

    /// MRU in effect for packets we send to the peer.
    pub fn mru_in_effect(&self) -> u16 {
        self.mru.unwrap_or(DEFAULT_MRU)
    }
}

pub struct Lcp {
    mru: u16,
    mru_max: u16,
    asyncmap: u32,
    magic: u32,
    auth_required: bool,
    allowed_auth: Vec<AuthProto>,
    multilink: bool,

    mru_rejected: bool,
    asyncmap_rejected: bool,
    magic_rejected: bool,

    our_opts: LcpOpts,
    his_opts: LcpOpts,
}

fn fresh_magic() -> u32 {
    let mut rng = rand::thread_rng();
    loop {
        let magic: u32 = rng.gen();
        if magic != 0 {
            return magic;
        }
    }
}

impl Lcp {
    pub fn new(config: &Config) -> Self {
        Self {
            mru: config.mru,
            mru_max: config.mru_max,
            asyncmap: config.asyncmap,
            magic: config.magic.unwrap_or_else(fresh_magic),
            auth_required: config.auth_required,
            allowed_auth: config.allowed_auth.clone(),
            multilink: config.multilink,
            mru_rejected: false,
            asyncmap_rejected: false,
            magic_rejected: false,
            our_opts: LcpOpts::default(),
            his_opts: LcpOpts::default(),
        }
    }

    pub fn our_opts(&self) -> &LcpOpts {
        &self.our_opts
    }

    pub fn his_opts(&self) -> &LcpOpts {
        &self.his_opts
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    /// The authentication protocol the peer owes us, if any. Set when the
    /// peer Ack'd the Auth option in our Configure-Request.
    pub fn peer_must_auth(&self) -> Option<AuthProto> {
        self.our_opts.auth
    }

    /// The authentication protocol we owe the peer, if any. Set when we
    /// Ack'd the Auth option in the peer's Configure-Request.
    pub fn we_must_auth(&self) -> Option<AuthProto> {
        self.his_opts.auth
    }

    fn auth_permitted(&self, proto: &AuthProto) -> bool {
        self.allowed_auth.contains(proto)
    }
}

impl CpPolicy for Lcp {
    type Option = LcpOption;

    fn protocol(&self) -> Protocol {
        Protocol::Lcp
    }

    fn build_request(&mut self) -> Vec<LcpOption> {
        let mut opts = Vec::new();
        if self.mru != DEFAULT_MRU && !self.mru_rejected {
            opts.push(LcpOption::Mru(self.mru));
        }
        if self.asyncmap != 0xffff_ffff && !self.asyncmap_rejected {
            opts.push(LcpOption::AsyncMap(self.asyncmap));
        }
        if !self.magic_rejected {
            opts.push(LcpOption::Magic(self.magic));
        }
        if self.auth_required {
            if let Some(auth) = self.allowed_auth.first() {
                opts.push(LcpOption::Auth(*auth));
            }
        }
        opts
    }

    fn check_received(&mut self, opts: &[LcpOption]) -> Verdicts<LcpOption> {
        let mut v = Verdicts::default();
        for opt in opts {
            trace!("LCP: rx option {:?}", opt);
            match opt {
                LcpOption::Mru(mru) if *mru > self.mru_max => {
                    v.nak.push(LcpOption::Mru(self.mru_max))
                }
                LcpOption::Mru(_) => v.ack.push(opt.clone()),
                LcpOption::AsyncMap(_) => v.ack.push(opt.clone()),
                LcpOption::Auth(proto) => {
                    if self.auth_permitted(proto) {
                        v.ack.push(opt.clone());
                    } else if let Some(preferred) = self.allowed_auth.first() {
                        v.nak.push(LcpOption::Auth(*preferred));
                    } else {
                        // We have no credentials to offer anyone.
                        v.rej.push(opt.clone());
                    }
                }
                LcpOption::Magic(magic) if *magic == self.magic => {
                    // Our own magic coming back: looped line, or a peer
                    // that rolled the same number. Suggest another one.
                    debug!("LCP: magic collision, suspecting loopback");
                    v.nak.push(LcpOption::Magic(fresh_magic()));
                }
                LcpOption::Magic(_) => v.ack.push(opt.clone()),
                LcpOption::Pfc | LcpOption::Acfc => v.ack.push(opt.clone()),
                LcpOption::Mrru(_) | LcpOption::Ssnhf | LcpOption::EpDisc { .. } => {
                    if self.multilink {
                        v.ack.push(opt.clone());
                    } else {
                        v.rej.push(opt.clone());
                    }
                }
                LcpOption::Quality { .. }
                | LcpOption::Callback { .. }
                | LcpOption::LDisc(_)
                | LcpOption::Raw(..) => v.rej.push(opt.clone()),
            }
        }
        v
    }

    fn request_acked(&mut self, opts: &[LcpOption]) {
        self.our_opts = LcpOpts::default();
        for opt in opts {
            self.our_opts.record(opt);
        }
    }

    fn peer_acked(&mut self, opts: &[LcpOption]) {
        self.his_opts = LcpOpts::default();
        for opt in opts {
            self.his_opts.record(opt);
        }
    }

    fn process_nak(&mut self, opts: &[LcpOption]) -> bool {
        for opt in opts {
            trace!("LCP: nak {:?}", opt);
            match opt {
                LcpOption::Mru(mru) => self.mru = *mru,
                LcpOption::AsyncMap(map) => self.asyncmap = *map,
                LcpOption::Magic(magic) => {
                    self.magic = if *magic != 0 { *magic } else { fresh_magic() }
                }
                LcpOption::Auth(proto) => {
                    if self.auth_permitted(proto) {
                        self.allowed_auth.retain(|p| p == proto);
                    }
                    // Otherwise keep demanding ours; the peer can reject it
                    // outright if it really can't.
                }
                _ => {}
            }
        }
        true
    }

    fn process_reject(&mut self, opts: &[LcpOption]) -> bool {
        for opt in opts {
            trace!("LCP: reject {:?}", opt);
            match opt {
                LcpOption::Mru(_) => self.mru_rejected = true,
                LcpOption::AsyncMap(_) => self.asyncmap_rejected = true,
                LcpOption::Magic(_) => self.magic_rejected = true,
                LcpOption::Auth(_) if self.auth_required => {
                    // The peer refuses to authenticate at all and we are
                    // required to make it; nothing left to negotiate.
                    return false;
                }
                _ => {}
            }
        }
        true
    }

    fn supports(&self, code: CpCode) -> bool {
        matches!(
            code,
            CpCode::ConfigureReq
                | CpCode::ConfigureAck
                | CpCode::ConfigureNak
                | CpCode::ConfigureRej
                | CpCode::TerminateReq
                | CpCode::TerminateAck
                | CpCode::CodeRej
                | CpCode::ProtocolRej
                | CpCode::EchoReq
                | CpCode::EchoReply
                | CpCode::DiscardReq
                | CpCode::Identification
                | CpCode::TimeRemaining
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            auth_required: true,
            allowed_auth: vec![AuthProto::Pap],
            magic: Some(0x1234_5678),
            ..Config::default()
        }
    }

    #[test]
    fn request_carries_magic_and_auth() {
        let mut lcp = Lcp::new(&config());
        let opts = lcp.build_request();
        assert_eq!(
            opts,
            [
                LcpOption::Magic(0x1234_5678),
                LcpOption::Auth(AuthProto::Pap),
            ]
        );
    }

    #[test]
    fn supported_options_are_acked() {
        let mut lcp = Lcp::new(&config());
        let v = lcp.check_received(&[
            LcpOption::Mru(1500),
            LcpOption::Magic(0x1111_1111),
            LcpOption::Auth(AuthProto::Pap),
            LcpOption::Pfc,
        ]);
        assert_eq!(v.ack.len(), 4);
        assert!(v.nak.is_empty());
        assert!(v.rej.is_empty());
    }

    #[test]
    fn oversized_mru_is_naked_with_ours() {
        let mut lcp = Lcp::new(&config());
        let v = lcp.check_received(&[LcpOption::Mru(9000)]);
        assert_eq!(v.nak, [LcpOption::Mru(1500)]);
    }

    #[test]
    fn unknown_option_is_rejected_verbatim() {
        let mut lcp = Lcp::new(&config());
        let opt = LcpOption::Raw(99, vec![1, 2, 3]);
        let v = lcp.check_received(&[opt.clone()]);
        assert_eq!(v.rej, [opt]);
    }

    #[test]
    fn unpermitted_auth_is_naked_with_preferred() {
        let mut lcp = Lcp::new(&config());
        let v = lcp.check_received(&[LcpOption::Auth(AuthProto::Eap)]);
        assert_eq!(v.nak, [LcpOption::Auth(AuthProto::Pap)]);
    }

    #[test]
    fn own_magic_is_naked_with_fresh_one() {
        let mut lcp = Lcp::new(&config());
        let v = lcp.check_received(&[LcpOption::Magic(0x1234_5678)]);
        match v.nak.as_slice() {
            [LcpOption::Magic(m)] => assert_ne!(*m, 0x1234_5678),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn auth_reject_gives_up_when_required() {
        let mut lcp = Lcp::new(&config());
        assert!(!lcp.process_reject(&[LcpOption::Auth(AuthProto::Pap)]));
    }

    #[test]
    fn directions_follow_ack_sides() {
        let mut lcp = Lcp::new(&config());
        lcp.request_acked(&[LcpOption::Auth(AuthProto::Pap), LcpOption::Magic(7)]);
        lcp.peer_acked(&[LcpOption::Mru(1492)]);
        assert_eq!(lcp.peer_must_auth(), Some(AuthProto::Pap));
        assert_eq!(lcp.we_must_auth(), None);
        assert_eq!(lcp.his_opts().mru_in_effect(), 1492);
    }
}
