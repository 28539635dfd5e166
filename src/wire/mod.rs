//! PPP frame codec. Everything here operates on the payload a transport
//! delivers, starting at the 16-bit Protocol field (rfc1661 framing, HDLC
//! escaping and FCS are the carrier's problem).

pub mod options;

use num_enum::{FromPrimitive, IntoPrimitive};
use thiserror::Error;

pub use options::{
    decode_options, encode_options, AuthProto, ChapDigest, IpcpOption, LcpOption, PppOption,
};

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum DecodeError {
    #[error("packet too short")]
    TooShort,
    #[error("bad length field")]
    BadLength,
    #[error("unknown packet code {0}")]
    UnknownCode(u8),
}

/// PPP protocol numbers. Only LCP, PAP, CHAP, IPv4 and IPCP decode further;
/// the rest are named so the orchestrator can log what it Protocol-Rejects.
#[derive(FromPrimitive, IntoPrimitive, Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u16)]
pub enum Protocol {
    /// Internet Protocol v4
    Ipv4 = 0x0021,
    /// AppleTalk
    At = 0x0029,
    /// Novell IPX
    Ipx = 0x002b,
    /// Van Jacobson compressed TCP/IP
    Vjc = 0x002d,
    /// Van Jacobson uncompressed TCP/IP
    Vjuc = 0x002f,
    /// Internet Protocol v6
    Ipv6 = 0x0057,
    /// compressed datagram
    Comp = 0x00fd,
    /// Internet Protocol v4 Control Protocol, rfc1332
    Ipcp = 0x8021,
    /// AppleTalk Control Protocol
    Atcp = 0x8029,
    /// Novell IPX Control Protocol
    Ipxcp = 0x802b,
    /// IPv6 Control Protocol
    Ipv6cp = 0x8057,
    /// Compression Control Protocol
    Ccp = 0x80fd,
    /// Link Control Protocol, rfc1661
    Lcp = 0xc021,
    /// Password Authentication Protocol, rfc1334
    Pap = 0xc023,
    /// Link Quality Report
    Lqr = 0xc025,
    /// Callback Control Protocol
    Cbcp = 0xc029,
    /// Challenge Handshake Authentication Protocol, rfc1994
    Chap = 0xc223,
    /// Extensible Authentication Protocol, rfc2284
    Eap = 0xc227,
    #[num_enum(catch_all)]
    Unknown(u16),
}

#[derive(FromPrimitive, IntoPrimitive, Copy, Clone, Eq, PartialEq, Debug, Ord, PartialOrd)]
#[repr(u8)]
pub enum CpCode {
    VendorSpecific = 0,
    ConfigureReq = 1,
    ConfigureAck = 2,
    ConfigureNak = 3,
    ConfigureRej = 4,
    TerminateReq = 5,
    TerminateAck = 6,
    CodeRej = 7,
    ProtocolRej = 8,
    EchoReq = 9,
    EchoReply = 10,
    DiscardReq = 11,
    Identification = 12,
    TimeRemaining = 13,
    ResetReq = 14,
    ResetReply = 15,
    #[num_enum(catch_all)]
    Unknown(u8),
}

/// One control-protocol packet: `code:u8 || id:u8 || length:u16 || data`,
/// length covering the header. Generic over the option set so LCP and IPCP
/// share the codec.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CpFrame<O> {
    pub code: CpCode,
    pub id: u8,
    pub body: CpBody<O>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CpBody<O> {
    Options(Vec<O>),
    TermData(Vec<u8>),
    CodeReject(Vec<u8>),
    ProtocolReject { protocol: u16, data: Vec<u8> },
    Identification { magic: u32, message: Vec<u8> },
    TimeRemaining { magic: u32, seconds: u32, message: Vec<u8> },
    /// Echo-Request, Echo-Reply, Discard-Request.
    Empty,
    /// Data of a code this protocol doesn't implement, kept intact so the
    /// whole packet can be echoed in a Code-Reject.
    Raw(Vec<u8>),
}

impl<O: PppOption> CpFrame<O> {
    pub fn new(code: CpCode, id: u8, body: CpBody<O>) -> Self {
        Self { code, id, body }
    }

    /// Parse from the Code field onward. Bytes past the Length field are
    /// padding and are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < 4 {
            return Err(DecodeError::TooShort);
        }
        let code = CpCode::from(data[0]);
        let id = data[1];
        let len = u16::from_be_bytes([data[2], data[3]]) as usize;
        if len < 4 {
            return Err(DecodeError::BadLength);
        }
        if len > data.len() {
            return Err(DecodeError::TooShort);
        }
        let data = &data[4..len];

        let body = match code {
            CpCode::ConfigureReq
            | CpCode::ConfigureAck
            | CpCode::ConfigureNak
            | CpCode::ConfigureRej => CpBody::Options(decode_options(data)),
            CpCode::TerminateReq | CpCode::TerminateAck => CpBody::TermData(data.to_vec()),
            CpCode::CodeRej => CpBody::CodeReject(data.to_vec()),
            CpCode::ProtocolRej => {
                if data.len() < 2 {
                    return Err(DecodeError::TooShort);
                }
                CpBody::ProtocolReject {
                    protocol: u16::from_be_bytes([data[0], data[1]]),
                    data: data[2..].to_vec(),
                }
            }
            CpCode::Identification => {
                if data.len() < 4 {
                    return Err(DecodeError::TooShort);
                }
                CpBody::Identification {
                    magic: u32::from_be_bytes(data[..4].try_into().unwrap()),
                    message: data[4..].to_vec(),
                }
            }
            CpCode::TimeRemaining => {
                if data.len() < 8 {
                    return Err(DecodeError::TooShort);
                }
                CpBody::TimeRemaining {
                    magic: u32::from_be_bytes(data[..4].try_into().unwrap()),
                    seconds: u32::from_be_bytes(data[4..8].try_into().unwrap()),
                    message: data[8..].to_vec(),
                }
            }
            CpCode::EchoReq | CpCode::EchoReply | CpCode::DiscardReq => CpBody::Empty,
            CpCode::VendorSpecific
            | CpCode::ResetReq
            | CpCode::ResetReply
            | CpCode::Unknown(_) => CpBody::Raw(data.to_vec()),
        };
        Ok(Self { code, id, body })
    }

    pub fn emit(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.push(self.code.into());
        buf.push(self.id);
        buf.extend_from_slice(&[0, 0]);
        match &self.body {
            CpBody::Options(opts) => encode_options(opts, buf),
            CpBody::TermData(data) | CpBody::CodeReject(data) | CpBody::Raw(data) => {
                buf.extend_from_slice(data)
            }
            CpBody::ProtocolReject { protocol, data } => {
                buf.extend_from_slice(&protocol.to_be_bytes());
                buf.extend_from_slice(data);
            }
            CpBody::Identification { magic, message } => {
                buf.extend_from_slice(&magic.to_be_bytes());
                buf.extend_from_slice(message);
            }
            CpBody::TimeRemaining {
                magic,
                seconds,
                message,
            } => {
                buf.extend_from_slice(&magic.to_be_bytes());
                buf.extend_from_slice(&seconds.to_be_bytes());
                buf.extend_from_slice(message);
            }
            CpBody::Empty => {}
        }
        let len = (buf.len() - start) as u16;
        buf[start + 2..start + 4].copy_from_slice(&len.to_be_bytes());
    }
}

/// PAP packet, rfc1334. Ack/Nak carry an operator message.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PapPacket {
    pub id: u8,
    pub msg: PapMsg,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PapMsg {
    AuthReq { peer_id: Vec<u8>, passwd: Vec<u8> },
    Ack { msg: Vec<u8> },
    Nak { msg: Vec<u8> },
}

impl PapPacket {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < 4 {
            return Err(DecodeError::TooShort);
        }
        let code = data[0];
        let id = data[1];
        let len = u16::from_be_bytes([data[2], data[3]]) as usize;
        if len < 4 {
            return Err(DecodeError::BadLength);
        }
        if len > data.len() {
            return Err(DecodeError::TooShort);
        }
        let data = &data[4..len];

        let msg = match code {
            1 => {
                let peer_len = *data.first().ok_or(DecodeError::TooShort)? as usize;
                if data.len() < 1 + peer_len + 1 {
                    return Err(DecodeError::TooShort);
                }
                let peer_id = data[1..1 + peer_len].to_vec();
                let pass_len = data[1 + peer_len] as usize;
                let pass_start = 1 + peer_len + 1;
                if data.len() < pass_start + pass_len {
                    return Err(DecodeError::TooShort);
                }
                // trailing bytes are silently discarded
                PapMsg::AuthReq {
                    peer_id,
                    passwd: data[pass_start..pass_start + pass_len].to_vec(),
                }
            }
            2 | 3 => {
                let msg_len = *data.first().ok_or(DecodeError::TooShort)? as usize;
                if data.len() < 1 + msg_len {
                    return Err(DecodeError::TooShort);
                }
                let msg = data[1..1 + msg_len].to_vec();
                if code == 2 {
                    PapMsg::Ack { msg }
                } else {
                    PapMsg::Nak { msg }
                }
            }
            code => return Err(DecodeError::UnknownCode(code)),
        };
        Ok(Self { id, msg })
    }

    pub fn emit(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        let code = match self.msg {
            PapMsg::AuthReq { .. } => 1,
            PapMsg::Ack { .. } => 2,
            PapMsg::Nak { .. } => 3,
        };
        buf.push(code);
        buf.push(self.id);
        buf.extend_from_slice(&[0, 0]);
        match &self.msg {
            PapMsg::AuthReq { peer_id, passwd } => {
                buf.push(peer_id.len() as u8);
                buf.extend_from_slice(peer_id);
                buf.push(passwd.len() as u8);
                buf.extend_from_slice(passwd);
            }
            PapMsg::Ack { msg } | PapMsg::Nak { msg } => {
                buf.push(msg.len() as u8);
                buf.extend_from_slice(msg);
            }
        }
        let len = (buf.len() - start) as u16;
        buf[start + 2..start + 4].copy_from_slice(&len.to_be_bytes());
    }
}

/// CHAP packet, rfc1994. Only the frame encoding lives here; there is no
/// CHAP driver yet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChapPacket {
    pub id: u8,
    pub msg: ChapMsg,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ChapMsg {
    Challenge { value: Vec<u8>, name: Vec<u8> },
    Response { value: Vec<u8>, name: Vec<u8> },
    Success { msg: Vec<u8> },
    Failure { msg: Vec<u8> },
}

impl ChapPacket {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < 4 {
            return Err(DecodeError::TooShort);
        }
        let code = data[0];
        let id = data[1];
        let len = u16::from_be_bytes([data[2], data[3]]) as usize;
        if len < 4 {
            return Err(DecodeError::BadLength);
        }
        if len > data.len() {
            return Err(DecodeError::TooShort);
        }
        let data = &data[4..len];

        let msg = match code {
            1 | 2 => {
                let value_len = *data.first().ok_or(DecodeError::TooShort)? as usize;
                if data.len() < 1 + value_len {
                    return Err(DecodeError::TooShort);
                }
                let value = data[1..1 + value_len].to_vec();
                let name = data[1 + value_len..].to_vec();
                if code == 1 {
                    ChapMsg::Challenge { value, name }
                } else {
                    ChapMsg::Response { value, name }
                }
            }
            3 => ChapMsg::Success {
                msg: data.to_vec(),
            },
            4 => ChapMsg::Failure {
                msg: data.to_vec(),
            },
            code => return Err(DecodeError::UnknownCode(code)),
        };
        Ok(Self { id, msg })
    }

    pub fn emit(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        let code = match self.msg {
            ChapMsg::Challenge { .. } => 1,
            ChapMsg::Response { .. } => 2,
            ChapMsg::Success { .. } => 3,
            ChapMsg::Failure { .. } => 4,
        };
        buf.push(code);
        buf.push(self.id);
        buf.extend_from_slice(&[0, 0]);
        match &self.msg {
            ChapMsg::Challenge { value, name } | ChapMsg::Response { value, name } => {
                buf.push(value.len() as u8);
                buf.extend_from_slice(value);
                buf.extend_from_slice(name);
            }
            ChapMsg::Success { msg } | ChapMsg::Failure { msg } => buf.extend_from_slice(msg),
        }
        let len = (buf.len() - start) as u16;
        buf[start + 2..start + 4].copy_from_slice(&len.to_be_bytes());
    }
}

/// One PPP payload, decoded. Exactly one variant per wire packet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PppFrame {
    /// IPv4 datagram, handed upward unchanged.
    Ipv4(Vec<u8>),
    /// IPCP payload from the Code field onward; re-enters [`CpFrame::decode`]
    /// in the IPCP machine.
    Ipcp(Vec<u8>),
    Lcp(CpFrame<LcpOption>),
    Pap(PapPacket),
    Chap(ChapPacket),
    /// A protocol this engine doesn't speak; the orchestrator answers with
    /// Protocol-Reject.
    Unknown(u16, Vec<u8>),
}

impl PppFrame {
    /// Parse a payload starting at the Protocol field.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < 2 {
            return Err(DecodeError::TooShort);
        }
        let proto = u16::from_be_bytes([buf[0], buf[1]]);
        let payload = &buf[2..];
        Ok(match Protocol::from(proto) {
            Protocol::Ipv4 => PppFrame::Ipv4(payload.to_vec()),
            Protocol::Ipcp => PppFrame::Ipcp(payload.to_vec()),
            Protocol::Lcp => PppFrame::Lcp(CpFrame::decode(payload)?),
            Protocol::Pap => PppFrame::Pap(PapPacket::decode(payload)?),
            Protocol::Chap => PppFrame::Chap(ChapPacket::decode(payload)?),
            _ => PppFrame::Unknown(proto, payload.to_vec()),
        })
    }

    pub fn protocol(&self) -> u16 {
        match self {
            PppFrame::Ipv4(_) => Protocol::Ipv4.into(),
            PppFrame::Ipcp(_) => Protocol::Ipcp.into(),
            PppFrame::Lcp(_) => Protocol::Lcp.into(),
            PppFrame::Pap(_) => Protocol::Pap.into(),
            PppFrame::Chap(_) => Protocol::Chap.into(),
            PppFrame::Unknown(proto, _) => *proto,
        }
    }

    pub fn emit(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.protocol().to_be_bytes());
        match self {
            PppFrame::Ipv4(payload) | PppFrame::Ipcp(payload) | PppFrame::Unknown(_, payload) => {
                buf.extend_from_slice(payload)
            }
            PppFrame::Lcp(frame) => frame.emit(buf),
            PppFrame::Pap(packet) => packet.emit(buf),
            PppFrame::Chap(packet) => packet.emit(buf),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.emit(&mut buf);
        buf
    }
}
