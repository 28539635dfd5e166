//! Point-to-Point Protocol (PPP) link engine, rfc1661.
//!
//! The crate covers the control plane of a PPP access concentrator: the
//! frame codec for LCP/IPCP/PAP/CHAP control packets ([`wire`]), the generic
//! option-negotiation automaton with its LCP and IPCP policies and the PAP
//! authenticator ([`ppp`]), and the per-session accounting that falls out of
//! them ([`accounting`]). Carriers (PPPoE, HDLC, serial) stay behind the
//! [`Transport`] trait and credential stores behind [`AuthProvider`]; the
//! engine neither frames bytes nor reads config files.
//!
//! [`ppp::Link`] is sans-io: feed it [`ppp::LinkEvent`]s, perform the
//! [`ppp::LinkRequest`]s it returns. [`actor::spawn`] wraps that loop in a
//! tokio task with a mailbox per link.

pub mod accounting;
pub mod actor;
pub mod config;
pub mod ppp;
pub mod transport;
pub mod wire;

pub use accounting::{AcctAttr, AcctRecord, AcctSink, AcctStatus};
pub use config::{AuthProvider, AuthResult, Config, SessionOpts};
pub use ppp::{Link, LinkError, LinkEvent, LinkRequest, LinkStats, Phase, TimerKind};
pub use transport::{LinkCounters, Transport};
pub use wire::{DecodeError, PppFrame};
