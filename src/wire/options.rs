//! Option TLV sub-codec shared by the configure packets of every control
//! protocol. Wire format is `type:u8 || length:u8 || value:(length-2)`,
//! length covering the whole TLV.

use core::fmt;
use std::net::Ipv4Addr;

use num_enum::{FromPrimitive, IntoPrimitive};
use serde::{Deserialize, Serialize};

/// One negotiable option of some control protocol.
///
/// Decoding is infallible: a value that doesn't match the per-type schema
/// comes back as the raw passthrough variant so it can still be echoed in a
/// Configure-Reject.
pub trait PppOption: Clone + Eq + fmt::Debug + Sized {
    fn decode(kind: u8, value: &[u8]) -> Self;
    fn raw(kind: u8, value: Vec<u8>) -> Self;
    fn kind(&self) -> u8;
    fn emit_value(&self, buf: &mut Vec<u8>);
}

/// Decode a whole option list in wire order.
///
/// A length byte below 2 or past the end of the buffer stops the loop; the
/// residual (everything after the offending type byte) is delivered as a
/// single raw option rather than dropped, so the caller can reject it.
pub fn decode_options<O: PppOption>(mut data: &[u8]) -> Vec<O> {
    let mut opts = Vec::new();
    while !data.is_empty() {
        let kind = data[0];
        if data.len() < 2 {
            opts.push(O::raw(kind, Vec::new()));
            break;
        }
        let len = data[1] as usize;
        if len < 2 || len > data.len() {
            opts.push(O::raw(kind, data[1..].to_vec()));
            break;
        }
        opts.push(O::decode(kind, &data[2..len]));
        data = &data[len..];
    }
    opts
}

pub fn encode_options<O: PppOption>(opts: &[O], buf: &mut Vec<u8>) {
    for opt in opts {
        let start = buf.len();
        buf.push(opt.kind());
        buf.push(0);
        opt.emit_value(buf);
        let len = buf.len() - start;
        assert!(len <= u8::MAX as usize, "option value too long");
        buf[start + 1] = len as u8;
    }
}

#[derive(FromPrimitive, IntoPrimitive, Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
enum LcpKind {
    Mru = 1,
    AsyncMap = 2,
    Auth = 3,
    Quality = 4,
    Magic = 5,
    Pfc = 7,
    Acfc = 8,
    Callback = 13,
    Mrru = 17,
    Ssnhf = 18,
    EpDisc = 19,
    LDisc = 23,
    #[num_enum(catch_all)]
    Unknown(u8),
}

/// Authentication protocols carried in LCP option 3.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProto {
    Pap,
    Chap(ChapDigest),
    Eap,
}

#[derive(FromPrimitive, IntoPrimitive, Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ChapDigest {
    Md5 = 5,
    Sha1 = 6,
    MsChap = 128,
    MsChapV2 = 129,
    #[num_enum(catch_all)]
    Unknown(u8),
}

impl AuthProto {
    pub fn protocol(&self) -> u16 {
        match self {
            AuthProto::Pap => 0xc023,
            AuthProto::Chap(_) => 0xc223,
            AuthProto::Eap => 0xc227,
        }
    }
}

/// LCP configuration options, rfc1661 section 6 plus the multilink and
/// endpoint-discriminator options of rfc1990.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LcpOption {
    Mru(u16),
    AsyncMap(u32),
    Auth(AuthProto),
    Quality { protocol: u16, period: u32 },
    Magic(u32),
    Pfc,
    Acfc,
    Callback { op: u8, message: Vec<u8> },
    Mrru(u16),
    Ssnhf,
    EpDisc { class: u8, address: Vec<u8> },
    LDisc(u16),
    Raw(u8, Vec<u8>),
}

impl PppOption for LcpOption {
    fn decode(kind: u8, value: &[u8]) -> Self {
        let raw = || LcpOption::Raw(kind, value.to_vec());
        match LcpKind::from(kind) {
            LcpKind::Mru if value.len() == 2 => {
                LcpOption::Mru(u16::from_be_bytes([value[0], value[1]]))
            }
            LcpKind::AsyncMap if value.len() == 4 => {
                LcpOption::AsyncMap(u32::from_be_bytes(value.try_into().unwrap()))
            }
            LcpKind::Auth => match value {
                [0xc0, 0x23] => LcpOption::Auth(AuthProto::Pap),
                [0xc2, 0x23, md] => LcpOption::Auth(AuthProto::Chap(ChapDigest::from(*md))),
                [0xc2, 0x27] => LcpOption::Auth(AuthProto::Eap),
                _ => raw(),
            },
            LcpKind::Quality if value.len() == 6 => LcpOption::Quality {
                protocol: u16::from_be_bytes([value[0], value[1]]),
                period: u32::from_be_bytes(value[2..6].try_into().unwrap()),
            },
            LcpKind::Magic if value.len() == 4 => {
                LcpOption::Magic(u32::from_be_bytes(value.try_into().unwrap()))
            }
            LcpKind::Pfc if value.is_empty() => LcpOption::Pfc,
            LcpKind::Acfc if value.is_empty() => LcpOption::Acfc,
            LcpKind::Callback if !value.is_empty() => LcpOption::Callback {
                op: value[0],
                message: value[1..].to_vec(),
            },
            LcpKind::Mrru if value.len() == 2 => {
                LcpOption::Mrru(u16::from_be_bytes([value[0], value[1]]))
            }
            LcpKind::Ssnhf if value.is_empty() => LcpOption::Ssnhf,
            LcpKind::EpDisc if !value.is_empty() => LcpOption::EpDisc {
                class: value[0],
                address: value[1..].to_vec(),
            },
            LcpKind::LDisc if value.len() == 2 => {
                LcpOption::LDisc(u16::from_be_bytes([value[0], value[1]]))
            }
            _ => raw(),
        }
    }

    fn raw(kind: u8, value: Vec<u8>) -> Self {
        LcpOption::Raw(kind, value)
    }

    fn kind(&self) -> u8 {
        match self {
            LcpOption::Mru(_) => LcpKind::Mru.into(),
            LcpOption::AsyncMap(_) => LcpKind::AsyncMap.into(),
            LcpOption::Auth(_) => LcpKind::Auth.into(),
            LcpOption::Quality { .. } => LcpKind::Quality.into(),
            LcpOption::Magic(_) => LcpKind::Magic.into(),
            LcpOption::Pfc => LcpKind::Pfc.into(),
            LcpOption::Acfc => LcpKind::Acfc.into(),
            LcpOption::Callback { .. } => LcpKind::Callback.into(),
            LcpOption::Mrru(_) => LcpKind::Mrru.into(),
            LcpOption::Ssnhf => LcpKind::Ssnhf.into(),
            LcpOption::EpDisc { .. } => LcpKind::EpDisc.into(),
            LcpOption::LDisc(_) => LcpKind::LDisc.into(),
            LcpOption::Raw(kind, _) => *kind,
        }
    }

    fn emit_value(&self, buf: &mut Vec<u8>) {
        match self {
            LcpOption::Mru(mru) => buf.extend_from_slice(&mru.to_be_bytes()),
            LcpOption::AsyncMap(map) => buf.extend_from_slice(&map.to_be_bytes()),
            LcpOption::Auth(proto) => {
                buf.extend_from_slice(&proto.protocol().to_be_bytes());
                if let AuthProto::Chap(md) = proto {
                    buf.push((*md).into());
                }
            }
            LcpOption::Quality { protocol, period } => {
                buf.extend_from_slice(&protocol.to_be_bytes());
                buf.extend_from_slice(&period.to_be_bytes());
            }
            LcpOption::Magic(magic) => buf.extend_from_slice(&magic.to_be_bytes()),
            LcpOption::Pfc | LcpOption::Acfc | LcpOption::Ssnhf => {}
            LcpOption::Callback { op, message } => {
                buf.push(*op);
                buf.extend_from_slice(message);
            }
            LcpOption::Mrru(mrru) => buf.extend_from_slice(&mrru.to_be_bytes()),
            LcpOption::EpDisc { class, address } => {
                buf.push(*class);
                buf.extend_from_slice(address);
            }
            LcpOption::LDisc(disc) => buf.extend_from_slice(&disc.to_be_bytes()),
            LcpOption::Raw(_, value) => buf.extend_from_slice(value),
        }
    }
}

#[derive(FromPrimitive, IntoPrimitive, Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
enum IpcpKind {
    IpAddresses = 1,
    IpCompression = 2,
    IpAddress = 3,
    MobileIpv4 = 4,
    PrimaryDns = 129,
    PrimaryNbns = 130,
    SecondaryDns = 131,
    SecondaryNbns = 132,
    #[num_enum(catch_all)]
    Unknown(u8),
}

/// IPCP configuration options, rfc1332 plus the DNS/NBNS extensions of
/// rfc1877. Only IpAddress is negotiated by the engine; the rest decode for
/// passthrough.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum IpcpOption {
    IpAddresses(Vec<u8>),
    IpCompression { protocol: u16, data: Vec<u8> },
    IpAddress(Ipv4Addr),
    MobileIpv4(Ipv4Addr),
    PrimaryDns(Ipv4Addr),
    PrimaryNbns(Ipv4Addr),
    SecondaryDns(Ipv4Addr),
    SecondaryNbns(Ipv4Addr),
    Raw(u8, Vec<u8>),
}

fn addr4(value: &[u8]) -> Option<Ipv4Addr> {
    let octets: [u8; 4] = value.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

impl PppOption for IpcpOption {
    fn decode(kind: u8, value: &[u8]) -> Self {
        let raw = || IpcpOption::Raw(kind, value.to_vec());
        match IpcpKind::from(kind) {
            IpcpKind::IpAddresses => IpcpOption::IpAddresses(value.to_vec()),
            IpcpKind::IpCompression if value.len() >= 2 => IpcpOption::IpCompression {
                protocol: u16::from_be_bytes([value[0], value[1]]),
                data: value[2..].to_vec(),
            },
            IpcpKind::IpAddress => addr4(value).map_or_else(raw, IpcpOption::IpAddress),
            IpcpKind::MobileIpv4 => addr4(value).map_or_else(raw, IpcpOption::MobileIpv4),
            IpcpKind::PrimaryDns => addr4(value).map_or_else(raw, IpcpOption::PrimaryDns),
            IpcpKind::PrimaryNbns => addr4(value).map_or_else(raw, IpcpOption::PrimaryNbns),
            IpcpKind::SecondaryDns => addr4(value).map_or_else(raw, IpcpOption::SecondaryDns),
            IpcpKind::SecondaryNbns => addr4(value).map_or_else(raw, IpcpOption::SecondaryNbns),
            _ => raw(),
        }
    }

    fn raw(kind: u8, value: Vec<u8>) -> Self {
        IpcpOption::Raw(kind, value)
    }

    fn kind(&self) -> u8 {
        match self {
            IpcpOption::IpAddresses(_) => IpcpKind::IpAddresses.into(),
            IpcpOption::IpCompression { .. } => IpcpKind::IpCompression.into(),
            IpcpOption::IpAddress(_) => IpcpKind::IpAddress.into(),
            IpcpOption::MobileIpv4(_) => IpcpKind::MobileIpv4.into(),
            IpcpOption::PrimaryDns(_) => IpcpKind::PrimaryDns.into(),
            IpcpOption::PrimaryNbns(_) => IpcpKind::PrimaryNbns.into(),
            IpcpOption::SecondaryDns(_) => IpcpKind::SecondaryDns.into(),
            IpcpOption::SecondaryNbns(_) => IpcpKind::SecondaryNbns.into(),
            IpcpOption::Raw(kind, _) => *kind,
        }
    }

    fn emit_value(&self, buf: &mut Vec<u8>) {
        match self {
            IpcpOption::IpAddresses(value) => buf.extend_from_slice(value),
            IpcpOption::IpCompression { protocol, data } => {
                buf.extend_from_slice(&protocol.to_be_bytes());
                buf.extend_from_slice(data);
            }
            IpcpOption::IpAddress(addr)
            | IpcpOption::MobileIpv4(addr)
            | IpcpOption::PrimaryDns(addr)
            | IpcpOption::PrimaryNbns(addr)
            | IpcpOption::SecondaryDns(addr)
            | IpcpOption::SecondaryNbns(addr) => buf.extend_from_slice(&addr.octets()),
            IpcpOption::Raw(_, value) => buf.extend_from_slice(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<O: PppOption>(opts: &[O]) {
        let mut buf = Vec::new();
        encode_options(opts, &mut buf);
        assert_eq!(decode_options::<O>(&buf), opts);
    }

    #[test]
    fn lcp_roundtrip() {
        roundtrip(&[
            LcpOption::Mru(1492),
            LcpOption::AsyncMap(0xffff_ffff),
            LcpOption::Auth(AuthProto::Pap),
            LcpOption::Auth(AuthProto::Chap(ChapDigest::Md5)),
            LcpOption::Auth(AuthProto::Eap),
            LcpOption::Quality {
                protocol: 0xc025,
                period: 1500,
            },
            LcpOption::Magic(0xdead_beef),
            LcpOption::Pfc,
            LcpOption::Acfc,
            LcpOption::Callback {
                op: 1,
                message: b"5551234".to_vec(),
            },
            LcpOption::Mrru(1600),
            LcpOption::Ssnhf,
            LcpOption::EpDisc {
                class: 3,
                address: vec![0, 1, 2, 3, 4, 5],
            },
            LcpOption::LDisc(7),
            LcpOption::Raw(99, vec![1, 2, 3]),
        ]);
    }

    #[test]
    fn ipcp_roundtrip() {
        roundtrip(&[
            IpcpOption::IpAddresses(vec![10, 0, 0, 1, 10, 0, 0, 2]),
            IpcpOption::IpCompression {
                protocol: 0x002d,
                data: vec![15, 1],
            },
            IpcpOption::IpAddress(Ipv4Addr::new(10, 0, 0, 1)),
            IpcpOption::MobileIpv4(Ipv4Addr::new(10, 0, 0, 9)),
            IpcpOption::PrimaryDns(Ipv4Addr::new(8, 8, 8, 8)),
            IpcpOption::SecondaryNbns(Ipv4Addr::new(192, 168, 0, 1)),
            IpcpOption::Raw(200, vec![]),
        ]);
    }

    #[test]
    fn encode_option_length_byte() {
        let mut buf = Vec::new();
        encode_options(&[LcpOption::Magic(1)], &mut buf);
        assert_eq!(buf, [5, 6, 0, 0, 0, 1]);

        buf.clear();
        encode_options(&[LcpOption::Pfc], &mut buf);
        assert_eq!(buf, [7, 2]);

        buf.clear();
        encode_options(&[LcpOption::Auth(AuthProto::Chap(ChapDigest::Sha1))], &mut buf);
        assert_eq!(buf, [3, 5, 0xc2, 0x23, 6]);
    }

    #[test]
    fn encode_concat_law() {
        let l1 = [LcpOption::Mru(1500), LcpOption::Pfc];
        let l2 = [LcpOption::Magic(42)];
        let mut a = Vec::new();
        encode_options(&l1, &mut a);
        encode_options(&l2, &mut a);
        let mut b = Vec::new();
        let both = [l1.as_slice(), l2.as_slice()].concat();
        encode_options(&both, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn schema_mismatch_falls_back_to_raw() {
        // MRU with a 3-byte value doesn't match the schema but must survive.
        let opts = decode_options::<LcpOption>(&[1, 5, 0xaa, 0xbb, 0xcc]);
        assert_eq!(opts, [LcpOption::Raw(1, vec![0xaa, 0xbb, 0xcc])]);
    }

    #[test]
    fn zero_length_stops_with_residual() {
        let opts = decode_options::<LcpOption>(&[5, 6, 0, 0, 0, 1, 42, 0, 9, 9]);
        assert_eq!(
            opts,
            [
                LcpOption::Magic(1),
                LcpOption::Raw(42, vec![0, 9, 9]),
            ]
        );
    }

    #[test]
    fn length_one_stops_with_residual() {
        let opts = decode_options::<LcpOption>(&[42, 1, 7]);
        assert_eq!(opts, [LcpOption::Raw(42, vec![1, 7])]);
    }

    #[test]
    fn overlong_length_stops_with_residual() {
        let opts = decode_options::<LcpOption>(&[1, 4, 5, 220, 42, 200]);
        assert_eq!(
            opts,
            [LcpOption::Mru(0x05dc), LcpOption::Raw(42, vec![200])]
        );
    }

    #[test]
    fn lone_type_byte() {
        let opts = decode_options::<LcpOption>(&[42]);
        assert_eq!(opts, [LcpOption::Raw(42, vec![])]);
    }

    #[test]
    fn unknown_chap_digest_preserved() {
        let opts = decode_options::<LcpOption>(&[3, 5, 0xc2, 0x23, 99]);
        assert_eq!(
            opts,
            [LcpOption::Auth(AuthProto::Chap(ChapDigest::Unknown(99)))]
        );
        let mut buf = Vec::new();
        encode_options(&opts, &mut buf);
        assert_eq!(buf, [3, 5, 0xc2, 0x23, 99]);
    }
}
