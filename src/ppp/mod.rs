//! The link orchestrator: one PPP session from Dead through Establish, Auth
//! and Network to Terminating, rfc1661 section 3.
//!
//! The link is an actor processing one [`LinkEvent`] at a time. Handlers
//! never block: frames go straight out through the owned [`Transport`],
//! accounting records through the owned [`AcctSink`], and everything that
//! needs the outside world (timers, credential checks, upward IP delivery)
//! is returned as a [`LinkRequest`] for the runtime to perform.

pub mod ipv4cp;
pub mod lcp;
pub mod option_fsm;
pub mod pap;

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::accounting::{
    AcctAttr, AcctRecord, AcctSink, AcctStatus, FRAMED_PROTOCOL_PPP, SERVICE_TYPE_FRAMED,
};
use crate::config::{keys, AuthResult, Config, SessionOpts};
use crate::transport::Transport;
use crate::wire::{
    AuthProto, CpBody, CpFrame, IpcpOption, LcpOption, PapPacket, PppFrame, Protocol,
};

use self::ipv4cp::Ipcp;
use self::lcp::Lcp;
use self::option_fsm::{CpFsm, Effect, State as FsmState};
use self::pap::{AuthDirection, Pap, PapEffect};

const REASON_AUTH_FAILED: &str = "Authentication failed";
const REASON_AUTH_SELF_FAILED: &str = "Failed to authenticate ourselves to peer";
const REASON_NO_NETWORK: &str = "No network protocols running";
const REASON_USER_REQUEST: &str = "User request";

/// Link phase, rfc1661 section 3.4.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Ord, PartialOrd)]
pub enum Phase {
    Dead,
    Establish,
    Auth,
    Network,
    Terminating,
}

/// Everything a link reacts to, delivered FIFO through its mailbox.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A complete PPP payload from the transport, Protocol field onward.
    PacketIn(Vec<u8>),
    /// The credential provider's answer to a
    /// [`LinkRequest::Authenticate`].
    AuthReply { id: u8, result: AuthResult },
    /// A one-shot timer fired. Stale generations are discarded.
    TimerFire { timer: TimerKind, generation: u64 },
    /// Administrative teardown.
    Close,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TimerKind {
    Lcp,
    Ipcp,
    Auth,
    Interim,
}

/// Work the runtime must do on the link's behalf after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRequest {
    StartTimer {
        timer: TimerKind,
        generation: u64,
        delay: Duration,
    },
    StopTimer {
        timer: TimerKind,
    },
    /// Verify these credentials; answer with [`LinkEvent::AuthReply`]
    /// carrying the same id.
    Authenticate {
        id: u8,
        peer_id: Vec<u8>,
        passwd: Vec<u8>,
    },
    /// An IPv4 datagram for the upper layers.
    Deliver(Vec<u8>),
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("link already started")]
    AlreadyStarted,
}

/// Per-link drop counters.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct LinkStats {
    /// Frames that failed to decode.
    pub malformed: u64,
    /// Well-formed frames discarded by the phase filter.
    pub discarded: u64,
}

pub struct Link<T: Transport, A: AcctSink> {
    config: Config,
    transport: T,
    acct: A,

    phase: Phase,
    lcp: CpFsm<Lcp>,
    pap: Option<Pap>,
    ipcp: Option<CpFsm<Ipcp>>,

    auth_pending: Vec<AuthDirection>,
    session_opts: SessionOpts,
    peer_id: Vec<u8>,

    session_start: Option<Instant>,
    interim_generation: u64,
    acct_started: bool,
    stop_emitted: bool,
    stop_reason: Option<String>,

    stats: LinkStats,
}

impl<T: Transport, A: AcctSink> Link<T, A> {
    pub fn new(config: Config, transport: T, acct: A) -> Self {
        let lcp = CpFsm::new(Lcp::new(&config));
        Self {
            config,
            transport,
            acct,
            phase: Phase::Dead,
            lcp,
            pap: None,
            ipcp: None,
            auth_pending: Vec::new(),
            session_opts: SessionOpts::new(),
            peer_id: Vec::new(),
            session_start: None,
            interim_generation: 0,
            acct_started: false,
            stop_emitted: false,
            stop_reason: None,
            stats: LinkStats::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_dead(&self) -> bool {
        self.phase == Phase::Dead
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Identity the peer authenticated with, empty before that.
    pub fn peer_id(&self) -> &[u8] {
        &self.peer_id
    }

    /// The transport came up; start establishing.
    pub fn start(&mut self) -> Result<Vec<LinkRequest>, LinkError> {
        if self.phase != Phase::Dead {
            return Err(LinkError::AlreadyStarted);
        }
        self.set_phase(Phase::Establish);
        let mut req = Vec::new();
        let fx = self.lcp.open();
        self.drive_lcp(fx, Instant::now(), &mut req);
        let fx = self.lcp.up();
        self.drive_lcp(fx, Instant::now(), &mut req);
        Ok(req)
    }

    /// Process one mailbox event.
    pub fn handle(&mut self, event: LinkEvent, now: Instant) -> Vec<LinkRequest> {
        let mut req = Vec::new();
        match event {
            LinkEvent::PacketIn(bytes) => self.packet_in(&bytes, now, &mut req),
            LinkEvent::AuthReply { id, result } => self.auth_reply(id, result, now, &mut req),
            LinkEvent::TimerFire { timer, generation } => match timer {
                TimerKind::Lcp => {
                    let fx = self.lcp.timeout(generation);
                    self.drive_lcp(fx, now, &mut req);
                }
                TimerKind::Ipcp => {
                    if let Some(ipcp) = &mut self.ipcp {
                        let fx = ipcp.timeout(generation);
                        self.drive_ipcp(fx, now, &mut req);
                    }
                }
                TimerKind::Auth => {
                    if let Some(pap) = &mut self.pap {
                        let fx = pap.timeout(generation);
                        self.drive_pap(fx, now, &mut req);
                    }
                }
                TimerKind::Interim => self.interim_fire(generation, now, &mut req),
            },
            LinkEvent::Close => self.close_lcp(REASON_USER_REQUEST, now, &mut req),
        }
        req
    }

    // --- receive path ----------------------------------------------------

    fn packet_in(&mut self, bytes: &[u8], now: Instant, req: &mut Vec<LinkRequest>) {
        let frame = match PppFrame::decode(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                self.stats.malformed += 1;
                debug!("dropping malformed frame: {}", err);
                return;
            }
        };
        if self.phase == Phase::Dead {
            self.stats.discarded += 1;
            return;
        }
        match frame {
            PppFrame::Lcp(cp) => {
                // Protocol-Reject concerns the rejected protocol's machine,
                // not LCP's.
                if let CpBody::ProtocolReject { protocol, .. } = &cp.body {
                    let protocol = *protocol;
                    self.protocol_rejected_by_peer(protocol, now, req);
                    return;
                }
                let fx = self.lcp.frame_in(cp);
                self.drive_lcp(fx, now, req);
            }
            PppFrame::Pap(packet) if self.phase == Phase::Auth => {
                self.pap_frame(packet, now, req)
            }
            PppFrame::Ipcp(data) if self.phase == Phase::Network => {
                match CpFrame::<IpcpOption>::decode(&data) {
                    Ok(cp) => {
                        if let Some(ipcp) = &mut self.ipcp {
                            let fx = ipcp.frame_in(cp);
                            self.drive_ipcp(fx, now, req);
                        }
                    }
                    Err(err) => {
                        self.stats.malformed += 1;
                        debug!("dropping malformed IPCP frame: {}", err);
                    }
                }
            }
            PppFrame::Ipv4(data) if self.phase == Phase::Network => {
                req.push(LinkRequest::Deliver(data))
            }
            PppFrame::Unknown(protocol, data) => self.reject_protocol(protocol, data, now, req),
            frame => {
                self.stats.discarded += 1;
                trace!(
                    "discarding protocol {:#06x} frame in phase {:?}",
                    frame.protocol(),
                    self.phase
                );
            }
        }
    }

    fn pap_frame(&mut self, packet: PapPacket, now: Instant, req: &mut Vec<LinkRequest>) {
        if let Some(pap) = &mut self.pap {
            let fx = pap.frame_in(packet);
            self.drive_pap(fx, now, req);
        } else {
            self.stats.discarded += 1;
        }
    }

    /// A protocol we don't speak: answer with LCP Protocol-Reject, but only
    /// while LCP is Opened (rfc1661 section 5.7).
    fn reject_protocol(
        &mut self,
        protocol: u16,
        mut data: Vec<u8>,
        now: Instant,
        req: &mut Vec<LinkRequest>,
    ) {
        if !self.lcp.is_opened() {
            self.stats.discarded += 1;
            return;
        }
        debug!("rejecting unknown protocol {:#06x}", protocol);
        let mru = self.lcp.policy().his_opts().mru_in_effect() as usize;
        data.truncate(mru.saturating_sub(6));
        let fx = self.lcp.send_protocol_reject(protocol, data);
        self.drive_lcp(fx, now, req);
    }

    /// The peer Protocol-Rejected one of ours.
    fn protocol_rejected_by_peer(
        &mut self,
        protocol: u16,
        now: Instant,
        req: &mut Vec<LinkRequest>,
    ) {
        match Protocol::from(protocol) {
            Protocol::Ipcp => {
                warn!("peer rejected IPCP");
                if let Some(ipcp) = &mut self.ipcp {
                    let fx = ipcp.protocol_rejected();
                    self.drive_ipcp(fx, now, req);
                }
            }
            Protocol::Pap => {
                warn!("peer rejected PAP");
                if self.phase == Phase::Auth {
                    self.close_lcp(REASON_AUTH_SELF_FAILED, now, req);
                }
            }
            Protocol::Lcp => {
                warn!("peer rejected LCP itself");
                let fx = self.lcp.protocol_rejected();
                self.drive_lcp(fx, now, req);
            }
            other => debug!("peer rejected protocol {:?}, ignoring", other),
        }
    }

    // --- LCP notifications -----------------------------------------------

    fn drive_lcp(
        &mut self,
        fx: Vec<Effect<LcpOption>>,
        now: Instant,
        req: &mut Vec<LinkRequest>,
    ) {
        for effect in fx {
            match effect {
                Effect::Send(frame) => self.transmit(&PppFrame::Lcp(frame)),
                Effect::StartTimer { generation, delay } => req.push(LinkRequest::StartTimer {
                    timer: TimerKind::Lcp,
                    generation,
                    delay,
                }),
                Effect::StopTimer => req.push(LinkRequest::StopTimer {
                    timer: TimerKind::Lcp,
                }),
                Effect::Started => {}
                Effect::Up => self.lcp_up(now, req),
                Effect::Down => self.lcp_down(now, req),
                Effect::Finished => self.lcp_finished(now, req),
            }
        }
    }

    fn lcp_up(&mut self, now: Instant, req: &mut Vec<LinkRequest>) {
        let peer_auth = self.lcp.policy().peer_must_auth();
        let we_auth = self.lcp.policy().we_must_auth();
        info!(
            "LCP up, peer_auth={:?} we_auth={:?}",
            peer_auth, we_auth
        );

        if peer_auth.is_none() && we_auth.is_none() {
            self.np_open(now, req);
            return;
        }

        let mut directions = Vec::new();
        for (auth, direction) in [
            (peer_auth, AuthDirection::PeerToUs),
            (we_auth, AuthDirection::UsToPeer),
        ] {
            match auth {
                None => {}
                Some(AuthProto::Pap) => directions.push(direction),
                Some(other) => {
                    // Negotiation let an auth protocol through that we have
                    // no driver for.
                    warn!("no driver for negotiated auth {:?}", other);
                    self.close_lcp(REASON_AUTH_FAILED, now, req);
                    return;
                }
            }
        }

        self.auth_pending = directions.clone();
        let mut pap = Pap::new(
            self.config.username.as_bytes(),
            self.config.password.as_bytes(),
        );
        let fx = pap.lower_up(&directions);
        self.pap = Some(pap);
        self.set_phase(Phase::Auth);
        self.drive_pap(fx, now, req);
    }

    fn lcp_down(&mut self, now: Instant, req: &mut Vec<LinkRequest>) {
        info!("LCP down");
        let next = match self.lcp.state() {
            FsmState::Closing | FsmState::Closed | FsmState::Stopping | FsmState::Stopped => {
                Phase::Terminating
            }
            // Renegotiation; fall back to Establish.
            _ => Phase::Establish,
        };
        self.set_phase(next);

        if let Some(pap) = &mut self.pap {
            pap.lower_down();
        }
        self.pap = None;
        self.auth_pending.clear();

        if let Some(ipcp) = &mut self.ipcp {
            let fx = ipcp.down();
            self.drive_ipcp(fx, now, req);
        }
        self.ipcp = None;
        self.cancel_interim(req);
    }

    fn lcp_finished(&mut self, now: Instant, req: &mut Vec<LinkRequest>) {
        info!("LCP finished, link terminated");
        if self.phase != Phase::Terminating {
            self.set_phase(Phase::Terminating);
        }
        self.emit_stop(now, None);
        self.cancel_interim(req);
        self.pap = None;
        self.ipcp = None;
        self.transport.terminate();
        self.set_phase(Phase::Dead);
    }

    fn close_lcp(&mut self, reason: &str, now: Instant, req: &mut Vec<LinkRequest>) {
        if self.phase == Phase::Dead {
            return;
        }
        info!("closing link: {}", reason);
        if self.stop_reason.is_none() {
            self.stop_reason = Some(reason.to_string());
        }
        self.set_phase(Phase::Terminating);
        let fx = self.lcp.close(reason.as_bytes());
        self.drive_lcp(fx, now, req);
    }

    // --- authentication --------------------------------------------------

    fn drive_pap(&mut self, fx: Vec<PapEffect>, now: Instant, req: &mut Vec<LinkRequest>) {
        for effect in fx {
            match effect {
                PapEffect::Send(packet) => self.transmit(&PppFrame::Pap(packet)),
                PapEffect::StartTimer { generation, delay } => {
                    req.push(LinkRequest::StartTimer {
                        timer: TimerKind::Auth,
                        generation,
                        delay,
                    })
                }
                PapEffect::Authenticate {
                    id,
                    peer_id,
                    passwd,
                } => {
                    self.peer_id = peer_id.clone();
                    req.push(LinkRequest::Authenticate {
                        id,
                        peer_id,
                        passwd,
                    });
                }
                PapEffect::Result { direction, success } => {
                    self.auth_result(direction, success, now, req)
                }
            }
        }
    }

    fn auth_reply(
        &mut self,
        id: u8,
        result: AuthResult,
        now: Instant,
        req: &mut Vec<LinkRequest>,
    ) {
        let success = matches!(result, AuthResult::Success(_));
        if let AuthResult::Success(opts) = &result {
            // Per-user overrides win over the connection's base config.
            self.session_opts.merge_from(opts);
        }
        if let Some(pap) = &mut self.pap {
            let fx = pap.auth_reply(id, success);
            self.drive_pap(fx, now, req);
        }
    }

    fn auth_result(
        &mut self,
        direction: AuthDirection,
        success: bool,
        now: Instant,
        req: &mut Vec<LinkRequest>,
    ) {
        if !success {
            let reason = match direction {
                AuthDirection::PeerToUs => REASON_AUTH_FAILED,
                AuthDirection::UsToPeer => REASON_AUTH_SELF_FAILED,
            };
            self.close_lcp(reason, now, req);
            return;
        }
        info!("authentication {:?} succeeded", direction);
        self.auth_pending.retain(|d| *d != direction);
        if self.auth_pending.is_empty() && self.phase == Phase::Auth {
            self.np_open(now, req);
        }
    }

    // --- network phase ---------------------------------------------------

    fn peer_ip(&self) -> Ipv4Addr {
        self.session_opts
            .ipv4(keys::PEER_IP)
            .or_else(|| self.config.peer_ip_pool.first().copied())
            .unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    fn np_open(&mut self, now: Instant, req: &mut Vec<LinkRequest>) {
        let mut ipcp = CpFsm::new(Ipcp::new(self.config.our_ip, self.peer_ip()));
        let fx_open = ipcp.open();
        let fx_up = ipcp.up();
        self.ipcp = Some(ipcp);
        self.session_start = Some(now);
        self.set_phase(Phase::Network);
        self.arm_interim(self.interim_duration(), req);
        self.drive_ipcp(fx_open, now, req);
        self.drive_ipcp(fx_up, now, req);
    }

    fn drive_ipcp(
        &mut self,
        fx: Vec<Effect<IpcpOption>>,
        now: Instant,
        req: &mut Vec<LinkRequest>,
    ) {
        for effect in fx {
            match effect {
                Effect::Send(frame) => {
                    let mut payload = Vec::new();
                    frame.emit(&mut payload);
                    self.transmit(&PppFrame::Ipcp(payload));
                }
                Effect::StartTimer { generation, delay } => {
                    req.push(LinkRequest::StartTimer {
                        timer: TimerKind::Ipcp,
                        generation,
                        delay,
                    })
                }
                Effect::StopTimer => req.push(LinkRequest::StopTimer {
                    timer: TimerKind::Ipcp,
                }),
                Effect::Started => {}
                Effect::Up => self.ipcp_up(now),
                Effect::Down => self.ipcp_down(now, req),
                Effect::Finished => self.ipcp_finished(now, req),
            }
        }
    }

    fn ipcp_up(&mut self, now: Instant) {
        let (our, his) = self.ipcp_addresses();
        info!("IPCP up, our={} peer={}", our, his);
        self.acct_started = true;
        self.stop_emitted = false;
        let record = self
            .session_record(AcctStatus::Start, now)
            .attr(AcctAttr::FramedIpAddress(his));
        self.acct.emit(record);
    }

    fn ipcp_down(&mut self, now: Instant, req: &mut Vec<LinkRequest>) {
        info!("IPCP down");
        self.emit_stop(now, Some("IPCP down"));
        self.cancel_interim(req);
        if self.phase == Phase::Network {
            self.close_lcp(REASON_NO_NETWORK, now, req);
        }
    }

    fn ipcp_finished(&mut self, now: Instant, req: &mut Vec<LinkRequest>) {
        if self.phase == Phase::Network {
            info!("IPCP finished without coming up");
            self.close_lcp(REASON_NO_NETWORK, now, req);
        }
    }

    fn ipcp_addresses(&self) -> (Ipv4Addr, Ipv4Addr) {
        self.ipcp
            .as_ref()
            .map(|fsm| (fsm.policy().our_address(), fsm.policy().peer_address()))
            .unwrap_or((Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED))
    }

    // --- accounting ------------------------------------------------------

    fn username(&self) -> String {
        if let Some(name) = self.session_opts.str(keys::USERNAME) {
            return name.to_string();
        }
        String::from_utf8_lossy(self.peer_id()).into_owned()
    }

    fn interim_duration(&self) -> Duration {
        let seconds = self
            .session_opts
            .u32(keys::INTERIM_ACCOUNTING)
            .unwrap_or(self.config.interim_accounting);
        Duration::from_secs(seconds as u64)
    }

    fn session_seconds(&self, now: Instant) -> u64 {
        self.session_start
            .map(|start| (now - start).as_secs_f64().round() as u64)
            .unwrap_or(0)
    }

    fn session_record(&self, status: AcctStatus, now: Instant) -> AcctRecord {
        AcctRecord::new(status)
            .attr(AcctAttr::UserName(self.username()))
            .attr(AcctAttr::NasIdentifier(self.config.nas_identifier.clone()))
            .attr(AcctAttr::ServiceType(SERVICE_TYPE_FRAMED))
            .attr(AcctAttr::FramedProtocol(FRAMED_PROTOCOL_PPP))
            .attr(AcctAttr::SessionTime(self.session_seconds(now)))
            .attrs(self.config.accounting.iter().cloned())
    }

    fn counter_attrs(&self) -> Vec<AcctAttr> {
        let (_, his) = self.ipcp_addresses();
        let counters = self.transport.counters(his);
        vec![
            AcctAttr::InputOctets(counters.in_octets),
            AcctAttr::OutputOctets(counters.out_octets),
            AcctAttr::InputPackets(counters.in_packets),
            AcctAttr::OutputPackets(counters.out_packets),
        ]
    }

    fn arm_interim(&mut self, delay: Duration, req: &mut Vec<LinkRequest>) {
        if delay.is_zero() {
            return;
        }
        self.interim_generation += 1;
        req.push(LinkRequest::StartTimer {
            timer: TimerKind::Interim,
            generation: self.interim_generation,
            delay,
        });
    }

    fn cancel_interim(&mut self, req: &mut Vec<LinkRequest>) {
        self.interim_generation += 1;
        req.push(LinkRequest::StopTimer {
            timer: TimerKind::Interim,
        });
    }

    fn interim_fire(&mut self, generation: u64, now: Instant, req: &mut Vec<LinkRequest>) {
        if generation != self.interim_generation || self.phase != Phase::Network {
            trace!("stale interim timer fire");
            return;
        }
        let (_, his) = self.ipcp_addresses();
        let record = self
            .session_record(AcctStatus::Interim, now)
            .attr(AcctAttr::FramedIpAddress(his))
            .attrs(self.counter_attrs());
        self.acct.emit(record);

        // Reschedule relative to session start so firing latency doesn't
        // accumulate.
        let interim = self.interim_duration();
        if let Some(start) = self.session_start {
            let interim_ms = interim.as_millis() as u64;
            if interim_ms > 0 {
                let elapsed_ms = (now - start).as_millis() as u64;
                let next_ms = interim_ms - (elapsed_ms % interim_ms);
                self.arm_interim(Duration::from_millis(next_ms), req);
            }
        }
    }

    fn emit_stop(&mut self, now: Instant, fallback_reason: Option<&str>) {
        if !self.acct_started || self.stop_emitted {
            return;
        }
        self.stop_emitted = true;
        let reason = self
            .stop_reason
            .clone()
            .or_else(|| fallback_reason.map(str::to_string))
            .unwrap_or_else(|| "LCP finished".to_string());
        let (_, his) = self.ipcp_addresses();
        let record = self
            .session_record(AcctStatus::Stop, now)
            .attr(AcctAttr::FramedIpAddress(his))
            .attr(AcctAttr::TerminateCause(reason))
            .attrs(self.counter_attrs());
        self.acct.emit(record);
    }

    // --- plumbing --------------------------------------------------------

    fn transmit(&mut self, frame: &PppFrame) {
        self.transport.send(&frame.to_bytes());
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            info!("link phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }
}
