//! The generic control-protocol automaton of rfc1661 section 4.2, shared by
//! LCP and IPCP. Option semantics are supplied per protocol through the
//! [`CpPolicy`] hooks.
//!
//! The machine is sans-io: every event entry point returns the effects the
//! caller must perform (frames to transmit, timer arming, layer
//! notifications). Timer fires come back in through [`CpFsm::timeout`]
//! carrying the generation they were armed with; a stale generation is
//! discarded, which is what makes cancellation race-free.

use std::time::Duration;

use log::{debug, trace, warn};

use crate::wire::{CpBody, CpCode, CpFrame, PppOption, Protocol};

pub const RESTART_TIMER: Duration = Duration::from_secs(3);
pub const MAX_CONFIGURE: u32 = 10;
pub const MAX_TERMINATE: u32 = 2;
pub const MAX_FAILURE: u32 = 5;

/// Automaton states, rfc1661 section 4.2.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum State {
    Initial,
    Starting,
    Closed,
    Stopped,
    Closing,
    Stopping,
    ReqSent,
    AckRcvd,
    AckSent,
    Opened,
}

impl State {
    /// The restart timer runs in Closing..AckSent and nowhere else.
    fn timer_runs(&self) -> bool {
        matches!(
            self,
            State::Closing | State::Stopping | State::ReqSent | State::AckRcvd | State::AckSent
        )
    }
}

/// Classification of a peer Configure-Request, worst verdict wins the reply
/// code.
#[derive(Debug, Clone)]
pub struct Verdicts<O> {
    pub ack: Vec<O>,
    pub nak: Vec<O>,
    pub rej: Vec<O>,
}

impl<O> Default for Verdicts<O> {
    fn default() -> Self {
        Self {
            ack: Vec::new(),
            nak: Vec::new(),
            rej: Vec::new(),
        }
    }
}

/// Per-protocol option semantics plugged into the automaton.
pub trait CpPolicy {
    type Option: PppOption;

    fn protocol(&self) -> Protocol;

    /// Options we currently want, for the next Configure-Request.
    fn build_request(&mut self) -> Vec<Self::Option>;

    /// Classify the peer's Configure-Request.
    fn check_received(&mut self, opts: &[Self::Option]) -> Verdicts<Self::Option>;

    /// The peer Ack'd our request: these are now `our_opts`.
    fn request_acked(&mut self, opts: &[Self::Option]);

    /// We Ack'd the peer's request: these are now `his_opts`.
    fn peer_acked(&mut self, opts: &[Self::Option]);

    /// Update our desire from a Nak / Reject of our request. Returning false
    /// means no acceptable request is left and negotiation must give up.
    fn process_nak(&mut self, opts: &[Self::Option]) -> bool;
    fn process_reject(&mut self, opts: &[Self::Option]) -> bool;

    /// Codes this protocol implements; anything else is Code-Rejected.
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
        )
    }
}

/// What the caller must do after feeding an event in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect<O> {
    Send(CpFrame<O>),
    StartTimer { generation: u64, delay: Duration },
    StopTimer,
    /// tlu: this layer is up (Opened reached).
    Up,
    /// tld: this layer is down (left Opened).
    Down,
    /// tls: lower layer needed.
    Started,
    /// tlf: negotiation is over for good (this Up cycle).
    Finished,
}

pub struct CpFsm<P: CpPolicy> {
    state: State,
    policy: P,
    /// Running identifier for packets we originate.
    id: u8,
    /// Identifier of our outstanding Configure-Request; replies carrying
    /// anything else are stale.
    req_id: u8,
    restart_count: u32,
    /// Consecutive Configure-Naks sent; past MAX_FAILURE they turn into
    /// Rejects so a stubborn peer cannot loop us forever.
    failure_count: u32,
    timer_armed: bool,
    timer_generation: u64,
    close_reason: Vec<u8>,
}

type Effects<P> = Vec<Effect<<P as CpPolicy>::Option>>;

impl<P: CpPolicy> CpFsm<P> {
    pub fn new(policy: P) -> Self {
        Self {
            state: State::Initial,
            policy,
            id: 0,
            req_id: 0,
            restart_count: 0,
            failure_count: 0,
            timer_armed: false,
            timer_generation: 0,
            close_reason: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_opened(&self) -> bool {
        self.state == State::Opened
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    fn set_state(&mut self, state: State, fx: &mut Effects<P>) {
        if self.state != state {
            debug!(
                "{:?}: state {:?} -> {:?}",
                self.policy.protocol(),
                self.state,
                state
            );
        }
        self.state = state;
        if !state.timer_runs() && self.timer_armed {
            self.timer_armed = false;
            self.timer_generation += 1;
            fx.push(Effect::StopTimer);
        }
    }

    fn arm_timer(&mut self, fx: &mut Effects<P>) {
        self.timer_armed = true;
        self.timer_generation += 1;
        fx.push(Effect::StartTimer {
            generation: self.timer_generation,
            delay: RESTART_TIMER,
        });
    }

    fn irc(&mut self, count: u32) {
        self.restart_count = count;
        self.failure_count = 0;
    }

    fn send(&self, code: CpCode, id: u8, body: CpBody<P::Option>, fx: &mut Effects<P>) {
        debug!("{:?}: tx {:?} id={}", self.policy.protocol(), code, id);
        fx.push(Effect::Send(CpFrame::new(code, id, body)));
    }

    /// scr. A resend keeps the identifier and burns a restart count; a fresh
    /// request takes a new identifier.
    fn scr(&mut self, resend: bool, fx: &mut Effects<P>) {
        if resend {
            self.restart_count = self.restart_count.saturating_sub(1);
        } else {
            self.id = self.id.wrapping_add(1);
            self.req_id = self.id;
        }
        let opts = self.policy.build_request();
        self.send(CpCode::ConfigureReq, self.req_id, CpBody::Options(opts), fx);
        self.arm_timer(fx);
    }

    /// str.
    fn str(&mut self, resend: bool, fx: &mut Effects<P>) {
        if resend {
            self.restart_count = self.restart_count.saturating_sub(1);
        } else {
            self.id = self.id.wrapping_add(1);
        }
        self.send(
            CpCode::TerminateReq,
            self.id,
            CpBody::TermData(self.close_reason.clone()),
            fx,
        );
        self.arm_timer(fx);
    }

    /// sta.
    fn sta(&mut self, id: u8, fx: &mut Effects<P>) {
        self.send(CpCode::TerminateAck, id, CpBody::TermData(Vec::new()), fx);
    }

    // --- administrative events -------------------------------------------

    /// Open: the link is administratively allowed to come up.
    pub fn open(&mut self) -> Effects<P> {
        let mut fx = Vec::new();
        match self.state {
            State::Initial => {
                fx.push(Effect::Started);
                self.set_state(State::Starting, &mut fx);
            }
            State::Starting => {}
            State::Closed => {
                self.irc(MAX_CONFIGURE);
                self.scr(false, &mut fx);
                self.set_state(State::ReqSent, &mut fx);
            }
            State::Closing => self.set_state(State::Stopping, &mut fx),
            _ => {}
        }
        fx
    }

    /// Close: administratively take the link down, with a reason carried in
    /// the Terminate-Request.
    pub fn close(&mut self, reason: &[u8]) -> Effects<P> {
        self.close_reason = reason.to_vec();
        let mut fx = Vec::new();
        match self.state {
            State::Initial | State::Closed | State::Closing => {}
            State::Starting => {
                fx.push(Effect::Finished);
                self.set_state(State::Initial, &mut fx);
            }
            State::Stopped => self.set_state(State::Closed, &mut fx),
            State::Stopping => self.set_state(State::Closing, &mut fx),
            State::ReqSent | State::AckRcvd | State::AckSent => {
                self.irc(MAX_TERMINATE);
                self.str(false, &mut fx);
                self.set_state(State::Closing, &mut fx);
            }
            State::Opened => {
                fx.push(Effect::Down);
                self.irc(MAX_TERMINATE);
                self.str(false, &mut fx);
                self.set_state(State::Closing, &mut fx);
            }
        }
        fx
    }

    /// Up: the lower layer came up.
    pub fn up(&mut self) -> Effects<P> {
        let mut fx = Vec::new();
        match self.state {
            State::Initial => self.set_state(State::Closed, &mut fx),
            State::Starting => {
                self.irc(MAX_CONFIGURE);
                self.scr(false, &mut fx);
                self.set_state(State::ReqSent, &mut fx);
            }
            state => warn!("{:?}: Up in state {:?}", self.policy.protocol(), state),
        }
        fx
    }

    /// Down: the lower layer went down.
    pub fn down(&mut self) -> Effects<P> {
        let mut fx = Vec::new();
        match self.state {
            State::Initial | State::Starting => {}
            State::Closed => self.set_state(State::Initial, &mut fx),
            State::Stopped => {
                fx.push(Effect::Started);
                self.set_state(State::Starting, &mut fx);
            }
            State::Closing => self.set_state(State::Initial, &mut fx),
            State::Stopping | State::ReqSent | State::AckRcvd | State::AckSent => {
                self.set_state(State::Starting, &mut fx)
            }
            State::Opened => {
                fx.push(Effect::Down);
                self.set_state(State::Starting, &mut fx);
            }
        }
        fx
    }

    /// Restart timer fired. Stale generations are fires that lost the race
    /// with cancellation and are dropped.
    pub fn timeout(&mut self, generation: u64) -> Effects<P> {
        let mut fx = Vec::new();
        if !self.timer_armed || generation != self.timer_generation {
            trace!("{:?}: stale timer fire", self.policy.protocol());
            return fx;
        }
        self.timer_armed = false;

        if self.restart_count > 0 {
            // TO+
            match self.state {
                State::Closing | State::Stopping => self.str(true, &mut fx),
                State::ReqSent | State::AckSent => self.scr(true, &mut fx),
                State::AckRcvd => {
                    self.scr(true, &mut fx);
                    self.set_state(State::ReqSent, &mut fx);
                }
                _ => {}
            }
        } else {
            // TO-
            match self.state {
                State::Closing => {
                    fx.push(Effect::Finished);
                    self.set_state(State::Closed, &mut fx);
                }
                State::Stopping | State::ReqSent | State::AckRcvd | State::AckSent => {
                    fx.push(Effect::Finished);
                    self.set_state(State::Stopped, &mut fx);
                }
                _ => {}
            }
        }
        fx
    }

    // --- packet events ---------------------------------------------------

    pub fn frame_in(&mut self, frame: CpFrame<P::Option>) -> Effects<P> {
        let mut fx = Vec::new();
        if matches!(self.state, State::Initial | State::Starting) {
            warn!(
                "{:?}: discarding {:?} while lower layer is down",
                self.policy.protocol(),
                frame.code
            );
            return fx;
        }
        debug!(
            "{:?}: rx {:?} id={}",
            self.policy.protocol(),
            frame.code,
            frame.id
        );

        if !self.policy.supports(frame.code) {
            self.ruc(frame, &mut fx);
            return fx;
        }

        match (frame.code, frame.body) {
            (CpCode::ConfigureReq, CpBody::Options(opts)) => self.rcr(frame.id, opts, &mut fx),
            (CpCode::ConfigureAck, CpBody::Options(opts)) => self.rca(frame.id, opts, &mut fx),
            (CpCode::ConfigureNak, CpBody::Options(opts)) => {
                self.rcn(frame.id, opts, false, &mut fx)
            }
            (CpCode::ConfigureRej, CpBody::Options(opts)) => {
                self.rcn(frame.id, opts, true, &mut fx)
            }
            (CpCode::TerminateReq, _) => self.rtr(frame.id, &mut fx),
            (CpCode::TerminateAck, _) => self.rta(&mut fx),
            (CpCode::CodeRej, CpBody::CodeReject(data)) => self.rxj(&data, &mut fx),
            (CpCode::EchoReq, _) => {
                // ser only in Opened; everywhere else the request is dropped.
                if self.state == State::Opened {
                    self.send(CpCode::EchoReply, frame.id, CpBody::Empty, &mut fx);
                }
            }
            (CpCode::EchoReply, _)
            | (CpCode::DiscardReq, _)
            | (CpCode::Identification, _)
            | (CpCode::TimeRemaining, _) => {
                trace!("{:?}: rx {:?}, no reply", self.policy.protocol(), frame.code)
            }
            (code, _) => warn!(
                "{:?}: unhandled {:?} in state {:?}",
                self.policy.protocol(),
                code,
                self.state
            ),
        }
        fx
    }

    /// RCR. The reply code is the worst verdict across the option list.
    fn rcr(&mut self, id: u8, opts: Vec<P::Option>, fx: &mut Effects<P>) {
        match self.state {
            State::Closed => return self.sta(id, fx),
            State::Closing | State::Stopping => return,
            _ => {}
        }

        let verdicts = self.policy.check_received(&opts);
        let good = verdicts.rej.is_empty() && verdicts.nak.is_empty();

        match self.state {
            State::Stopped => {
                self.irc(MAX_CONFIGURE);
                self.scr(false, fx);
            }
            State::Opened => {
                fx.push(Effect::Down);
                self.scr(false, fx);
            }
            _ => {}
        }

        if good {
            self.policy.peer_acked(&opts);
            self.send(CpCode::ConfigureAck, id, CpBody::Options(opts), fx);
            match self.state {
                State::Stopped | State::ReqSent | State::AckSent | State::Opened => {
                    self.set_state(State::AckSent, fx)
                }
                State::AckRcvd => {
                    fx.push(Effect::Up);
                    self.set_state(State::Opened, fx);
                }
                _ => unreachable!(),
            }
        } else {
            let (code, list) = if !verdicts.rej.is_empty() {
                (CpCode::ConfigureRej, verdicts.rej)
            } else if self.failure_count >= MAX_FAILURE {
                // Convergence guard: a peer that never takes the hint gets
                // its option rejected outright.
                (CpCode::ConfigureRej, verdicts.nak)
            } else {
                self.failure_count += 1;
                (CpCode::ConfigureNak, verdicts.nak)
            };
            self.send(code, id, CpBody::Options(list), fx);
            match self.state {
                State::Stopped | State::ReqSent | State::AckSent | State::Opened => {
                    self.set_state(State::ReqSent, fx)
                }
                State::AckRcvd => {}
                _ => unreachable!(),
            }
        }
    }

    fn rca(&mut self, id: u8, opts: Vec<P::Option>, fx: &mut Effects<P>) {
        match self.state {
            State::Closed | State::Stopped => return self.sta(id, fx),
            State::Closing | State::Stopping => return,
            _ => {}
        }
        if id != self.req_id {
            warn!(
                "{:?}: ConfigureAck id {} doesn't match outstanding {}",
                self.policy.protocol(),
                id,
                self.req_id
            );
            return;
        }
        match self.state {
            State::ReqSent => {
                self.irc(MAX_CONFIGURE);
                self.policy.request_acked(&opts);
                self.set_state(State::AckRcvd, fx);
            }
            State::AckRcvd => {
                // Crossed connection; restart the exchange.
                self.scr(false, fx);
                self.set_state(State::ReqSent, fx);
            }
            State::AckSent => {
                self.irc(MAX_CONFIGURE);
                self.policy.request_acked(&opts);
                fx.push(Effect::Up);
                self.set_state(State::Opened, fx);
            }
            State::Opened => {
                fx.push(Effect::Down);
                self.scr(false, fx);
                self.set_state(State::ReqSent, fx);
            }
            _ => unreachable!(),
        }
    }

    fn rcn(&mut self, id: u8, opts: Vec<P::Option>, is_rej: bool, fx: &mut Effects<P>) {
        match self.state {
            State::Closed | State::Stopped => return self.sta(id, fx),
            State::Closing | State::Stopping => return,
            _ => {}
        }
        if id != self.req_id {
            warn!(
                "{:?}: {} id {} doesn't match outstanding {}",
                self.policy.protocol(),
                if is_rej { "ConfigureRej" } else { "ConfigureNak" },
                id,
                self.req_id
            );
            return;
        }
        let usable = if is_rej {
            self.policy.process_reject(&opts)
        } else {
            self.policy.process_nak(&opts)
        };
        if !usable {
            // Nothing acceptable left to ask for; give up like a
            // catastrophic Code-Reject.
            return self.rxj_minus(fx);
        }
        match self.state {
            State::ReqSent | State::AckSent => {
                self.irc(MAX_CONFIGURE);
                self.scr(false, fx);
            }
            State::AckRcvd => {
                self.scr(false, fx);
                self.set_state(State::ReqSent, fx);
            }
            State::Opened => {
                fx.push(Effect::Down);
                self.scr(false, fx);
                self.set_state(State::ReqSent, fx);
            }
            _ => unreachable!(),
        }
    }

    fn rtr(&mut self, id: u8, fx: &mut Effects<P>) {
        match self.state {
            State::Closed | State::Stopped | State::Closing | State::Stopping => self.sta(id, fx),
            State::ReqSent | State::AckRcvd | State::AckSent => {
                self.sta(id, fx);
                self.set_state(State::ReqSent, fx);
            }
            State::Opened => {
                fx.push(Effect::Down);
                // zrc: the sole Terminate-Ack grace period before tlf.
                self.restart_count = 0;
                self.sta(id, fx);
                self.arm_timer(fx);
                self.set_state(State::Stopping, fx);
            }
            _ => unreachable!(),
        }
    }

    fn rta(&mut self, fx: &mut Effects<P>) {
        match self.state {
            State::Closed | State::Stopped => {}
            State::Closing => {
                fx.push(Effect::Finished);
                self.set_state(State::Closed, fx);
            }
            State::Stopping => {
                fx.push(Effect::Finished);
                self.set_state(State::Stopped, fx);
            }
            State::ReqSent | State::AckRcvd => self.set_state(State::ReqSent, fx),
            State::AckSent => {}
            State::Opened => {
                fx.push(Effect::Down);
                self.scr(false, fx);
                self.set_state(State::ReqSent, fx);
            }
            _ => unreachable!(),
        }
    }

    /// RUC: a code this protocol doesn't implement; scj echoes the whole
    /// packet back.
    fn ruc(&mut self, frame: CpFrame<P::Option>, fx: &mut Effects<P>) {
        let mut rejected = Vec::new();
        frame.emit(&mut rejected);
        self.id = self.id.wrapping_add(1);
        self.send(CpCode::CodeRej, self.id, CpBody::CodeReject(rejected), fx);
    }

    /// RXJ: peer Code-Rejected something of ours. Losing a Configure or
    /// Terminate code is fatal; anything else we can live without.
    fn rxj(&mut self, rejected: &[u8], fx: &mut Effects<P>) {
        let code = rejected.first().map(|&c| CpCode::from(c));
        let catastrophic = matches!(
            code,
            Some(
                CpCode::ConfigureReq
                    | CpCode::ConfigureAck
                    | CpCode::ConfigureNak
                    | CpCode::ConfigureRej
                    | CpCode::TerminateReq
                    | CpCode::TerminateAck
            )
        );
        if catastrophic {
            warn!(
                "{:?}: peer code-rejected {:?}",
                self.policy.protocol(),
                code
            );
            self.rxj_minus(fx);
        } else if self.state == State::AckRcvd {
            // RXJ+ falls back to ReqSent from AckRcvd, no-op elsewhere.
            self.set_state(State::ReqSent, fx);
        }
    }

    fn rxj_minus(&mut self, fx: &mut Effects<P>) {
        match self.state {
            State::Closed | State::Closing => {
                fx.push(Effect::Finished);
                self.set_state(State::Closed, fx);
            }
            State::Stopped | State::Stopping | State::ReqSent | State::AckRcvd
            | State::AckSent => {
                fx.push(Effect::Finished);
                self.set_state(State::Stopped, fx);
            }
            State::Opened => {
                fx.push(Effect::Down);
                self.irc(MAX_TERMINATE);
                self.str(false, fx);
                self.set_state(State::Stopping, fx);
            }
            _ => {}
        }
    }

    /// Protocol-Reject aimed at this protocol (delivered via LCP). Always
    /// catastrophic for the rejected protocol.
    pub fn protocol_rejected(&mut self) -> Effects<P> {
        let mut fx = Vec::new();
        self.rxj_minus(&mut fx);
        fx
    }

    /// Protocol-Reject for a frame whose protocol nobody speaks. Only LCP
    /// sends these, and only while Opened; the orchestrator enforces both.
    pub fn send_protocol_reject(&mut self, protocol: u16, data: Vec<u8>) -> Effects<P> {
        let mut fx = Vec::new();
        self.id = self.id.wrapping_add(1);
        self.send(
            CpCode::ProtocolRej,
            self.id,
            CpBody::ProtocolReject { protocol, data },
            &mut fx,
        );
        fx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::LcpOption;

    struct NullPolicy;

    impl CpPolicy for NullPolicy {
        type Option = LcpOption;

        fn protocol(&self) -> Protocol {
            Protocol::Lcp
        }
        fn build_request(&mut self) -> Vec<LcpOption> {
            vec![LcpOption::Magic(1)]
        }
        fn check_received(&mut self, opts: &[LcpOption]) -> Verdicts<LcpOption> {
            Verdicts {
                ack: opts.to_vec(),
                nak: Vec::new(),
                rej: Vec::new(),
            }
        }
        fn request_acked(&mut self, _opts: &[LcpOption]) {}
        fn peer_acked(&mut self, _opts: &[LcpOption]) {}
        fn process_nak(&mut self, _opts: &[LcpOption]) -> bool {
            true
        }
        fn process_reject(&mut self, _opts: &[LcpOption]) -> bool {
            true
        }
        fn supports(&self, code: CpCode) -> bool {
            !matches!(code, CpCode::ResetReq | CpCode::ResetReply | CpCode::Unknown(_))
        }
    }

    fn sent_codes(fx: &[Effect<LcpOption>]) -> Vec<CpCode> {
        fx.iter()
            .filter_map(|e| match e {
                Effect::Send(f) => Some(f.code),
                _ => None,
            })
            .collect()
    }

    fn timer_generation(fx: &[Effect<LcpOption>]) -> Option<u64> {
        fx.iter().find_map(|e| match e {
            Effect::StartTimer { generation, .. } => Some(*generation),
            _ => None,
        })
    }

    fn opened_fsm() -> CpFsm<NullPolicy> {
        let mut fsm = CpFsm::new(NullPolicy);
        fsm.open();
        let fx = fsm.up();
        assert_eq!(sent_codes(&fx), [CpCode::ConfigureReq]);
        let req_id = match &fx[0] {
            Effect::Send(f) => f.id,
            _ => unreachable!(),
        };
        fsm.frame_in(CpFrame::new(
            CpCode::ConfigureReq,
            1,
            CpBody::Options(vec![]),
        ));
        let fx = fsm.frame_in(CpFrame::new(
            CpCode::ConfigureAck,
            req_id,
            CpBody::Options(vec![]),
        ));
        assert!(fx.contains(&Effect::Up));
        assert_eq!(fsm.state(), State::Opened);
        fsm
    }

    #[test]
    fn up_then_open_reaches_req_sent() {
        let mut fsm = CpFsm::new(NullPolicy);
        fsm.up();
        assert_eq!(fsm.state(), State::Closed);
        let fx = fsm.open();
        assert_eq!(fsm.state(), State::ReqSent);
        assert_eq!(sent_codes(&fx), [CpCode::ConfigureReq]);
    }

    #[test]
    fn open_then_up_reaches_req_sent() {
        let mut fsm = CpFsm::new(NullPolicy);
        let fx = fsm.open();
        assert!(fx.contains(&Effect::Started));
        assert_eq!(fsm.state(), State::Starting);
        let fx = fsm.up();
        assert_eq!(fsm.state(), State::ReqSent);
        assert_eq!(sent_codes(&fx), [CpCode::ConfigureReq]);
    }

    #[test]
    fn tlu_fires_exactly_once_per_up_cycle() {
        let mut fsm = opened_fsm();
        // Another peer request while Opened renegotiates but must not
        // produce a second Up before a Down.
        let fx = fsm.frame_in(CpFrame::new(
            CpCode::ConfigureReq,
            2,
            CpBody::Options(vec![]),
        ));
        assert!(fx.contains(&Effect::Down));
        assert!(!fx.contains(&Effect::Up));
        assert_eq!(fsm.state(), State::AckSent);
    }

    #[test]
    fn restart_exhaustion_finishes() {
        let mut fsm = CpFsm::new(NullPolicy);
        fsm.open();
        let fx = fsm.up();
        let mut generation = timer_generation(&fx).unwrap();
        let mut resends = 0;
        loop {
            let fx = fsm.timeout(generation);
            if fx.contains(&Effect::Finished) {
                break;
            }
            assert_eq!(sent_codes(&fx), [CpCode::ConfigureReq]);
            resends += 1;
            generation = timer_generation(&fx).unwrap();
            assert!(resends <= MAX_CONFIGURE);
        }
        assert_eq!(resends, MAX_CONFIGURE);
        assert_eq!(fsm.state(), State::Stopped);
    }

    #[test]
    fn stale_timer_fire_is_discarded() {
        let mut fsm = CpFsm::new(NullPolicy);
        fsm.open();
        let fx = fsm.up();
        let generation = timer_generation(&fx).unwrap();
        assert!(fsm.timeout(generation - 1).is_empty());
        assert_eq!(fsm.state(), State::ReqSent);
    }

    #[test]
    fn terminate_handshake_from_opened() {
        let mut fsm = opened_fsm();
        let fx = fsm.close(b"done");
        assert!(fx.contains(&Effect::Down));
        assert_eq!(sent_codes(&fx), [CpCode::TerminateReq]);
        assert_eq!(fsm.state(), State::Closing);
        let fx = fsm.frame_in(CpFrame::new(
            CpCode::TerminateAck,
            1,
            CpBody::TermData(vec![]),
        ));
        assert!(fx.contains(&Effect::Finished));
        assert_eq!(fsm.state(), State::Closed);
    }

    #[test]
    fn peer_terminate_while_opened() {
        let mut fsm = opened_fsm();
        let fx = fsm.frame_in(CpFrame::new(
            CpCode::TerminateReq,
            9,
            CpBody::TermData(vec![]),
        ));
        assert!(fx.contains(&Effect::Down));
        let sent = fx
            .iter()
            .find_map(|e| match e {
                Effect::Send(f) => Some(f.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(sent.code, CpCode::TerminateAck);
        assert_eq!(sent.id, 9);
        assert_eq!(fsm.state(), State::Stopping);
        // Zeroed restart count: the next timeout finishes.
        let generation = timer_generation(&fx).unwrap();
        let fx = fsm.timeout(generation);
        assert!(fx.contains(&Effect::Finished));
        assert_eq!(fsm.state(), State::Stopped);
    }

    #[test]
    fn unknown_code_is_code_rejected() {
        let mut fsm = opened_fsm();
        let fx = fsm.frame_in(CpFrame::new(
            CpCode::ResetReq,
            3,
            CpBody::Raw(vec![0xde, 0xad]),
        ));
        let sent = fx
            .iter()
            .find_map(|e| match e {
                Effect::Send(f) => Some(f.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(sent.code, CpCode::CodeRej);
        assert_eq!(sent.body, CpBody::CodeReject(vec![14, 3, 0, 6, 0xde, 0xad]));
    }

    #[test]
    fn echo_request_answered_only_in_opened() {
        let mut fsm = CpFsm::new(NullPolicy);
        fsm.open();
        fsm.up();
        let fx = fsm.frame_in(CpFrame::new(CpCode::EchoReq, 5, CpBody::Empty));
        assert!(sent_codes(&fx).is_empty());

        let mut fsm = opened_fsm();
        let fx = fsm.frame_in(CpFrame::new(CpCode::EchoReq, 5, CpBody::Empty));
        assert_eq!(sent_codes(&fx), [CpCode::EchoReply]);
    }

    #[test]
    fn mismatched_ack_id_is_discarded() {
        let mut fsm = CpFsm::new(NullPolicy);
        fsm.open();
        let fx = fsm.up();
        let req_id = match &fx[0] {
            Effect::Send(f) => f.id,
            _ => unreachable!(),
        };
        let fx = fsm.frame_in(CpFrame::new(
            CpCode::ConfigureAck,
            req_id.wrapping_add(1),
            CpBody::Options(vec![]),
        ));
        assert!(fx.is_empty());
        assert_eq!(fsm.state(), State::ReqSent);
    }
}
