//! The tokio actor layer, driven under paused time: virtual clock advances
//! only when every task is idle, so restart timers fire deterministically.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use ppplink::accounting::{AcctRecord, AcctSink, AcctStatus, NullAcctSink};
use ppplink::actor;
use ppplink::config::{AuthProvider, AuthResult, Config};
use ppplink::transport::{LinkCounters, Transport};
use ppplink::wire::{CpBody, CpCode, CpFrame, IpcpOption, LcpOption, PppFrame};

#[derive(Clone, Default)]
struct ChannelTransport {
    wire: Option<mpsc::UnboundedSender<PppFrame>>,
    sent: Arc<Mutex<usize>>,
    terminated: Arc<Mutex<bool>>,
}

impl ChannelTransport {
    fn terminated(&self) -> bool {
        *self.terminated.lock().unwrap()
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, payload: &[u8]) {
        *self.sent.lock().unwrap() += 1;
        if let Some(wire) = &self.wire {
            let _ = wire.send(PppFrame::decode(payload).expect("link transmitted garbage"));
        }
    }

    fn counters(&self, _peer: Ipv4Addr) -> LinkCounters {
        LinkCounters::default()
    }

    fn terminate(&mut self) {
        *self.terminated.lock().unwrap() = true;
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    records: Arc<Mutex<Vec<AcctRecord>>>,
}

impl AcctSink for RecordingSink {
    fn emit(&self, record: AcctRecord) {
        self.records.lock().unwrap().push(record);
    }
}

struct NoProvider;

impl AuthProvider for NoProvider {
    fn authenticate(&self, _peer_id: &[u8], _passwd: &[u8]) -> AuthResult {
        AuthResult::Fail
    }
}

fn lcp_bytes(code: CpCode, id: u8, opts: Vec<LcpOption>) -> Vec<u8> {
    PppFrame::Lcp(CpFrame::new(code, id, CpBody::Options(opts))).to_bytes()
}

fn ipcp_bytes(code: CpCode, id: u8, opts: Vec<IpcpOption>) -> Vec<u8> {
    let mut payload = Vec::new();
    CpFrame::new(code, id, CpBody::Options(opts)).emit(&mut payload);
    PppFrame::Ipcp(payload).to_bytes()
}

/// A silent peer: virtual time runs through all restart retransmissions and
/// the link task dies on its own.
#[tokio::test(start_paused = true)]
async fn silent_peer_exhausts_restarts_and_link_dies() {
    let transport = ChannelTransport::default();
    let config = Config {
        magic: Some(0x1234_5678),
        ..Config::default()
    };
    let handle = actor::spawn(
        config,
        transport.clone(),
        NullAcctSink,
        Arc::new(NoProvider),
        None,
    );
    handle.join().await;

    assert!(transport.terminated());
    // Initial Configure-Request plus max_configure retransmissions.
    assert_eq!(*transport.sent.lock().unwrap(), 11);
}

/// Scripted peer bring-up without authentication, then an administrative
/// close, all through the mailbox.
#[tokio::test(start_paused = true)]
async fn scripted_peer_brings_link_up_and_down() {
    let (wire_tx, mut wire) = mpsc::unbounded_channel();
    let transport = ChannelTransport {
        wire: Some(wire_tx),
        ..ChannelTransport::default()
    };
    let sink = RecordingSink::default();
    let config = Config {
        auth_required: false,
        magic: Some(0x1234_5678),
        our_ip: Ipv4Addr::new(10, 0, 0, 1),
        peer_ip_pool: vec![Ipv4Addr::new(10, 0, 0, 2)],
        nas_identifier: "nas1".into(),
        ..Config::default()
    };
    let handle = actor::spawn(
        config,
        transport.clone(),
        sink.clone(),
        Arc::new(NoProvider),
        None,
    );

    // Our Configure-Request comes out first.
    let our_req_id = match wire.recv().await.unwrap() {
        PppFrame::Lcp(frame) => {
            assert_eq!(frame.code, CpCode::ConfigureReq);
            frame.id
        }
        other => panic!("unexpected: {other:?}"),
    };
    handle.packet_in(lcp_bytes(
        CpCode::ConfigureAck,
        our_req_id,
        vec![LcpOption::Magic(0x1234_5678)],
    ));
    handle.packet_in(lcp_bytes(
        CpCode::ConfigureReq,
        1,
        vec![LcpOption::Magic(0x1111_1111)],
    ));

    // Our Ack of the peer's request, then IPCP opens.
    match wire.recv().await.unwrap() {
        PppFrame::Lcp(frame) => assert_eq!(frame.code, CpCode::ConfigureAck),
        other => panic!("unexpected: {other:?}"),
    }
    let our_ipcp_id = match wire.recv().await.unwrap() {
        PppFrame::Ipcp(data) => {
            let cp = CpFrame::<IpcpOption>::decode(&data).unwrap();
            assert_eq!(cp.code, CpCode::ConfigureReq);
            cp.id
        }
        other => panic!("unexpected: {other:?}"),
    };
    handle.packet_in(ipcp_bytes(
        CpCode::ConfigureAck,
        our_ipcp_id,
        vec![IpcpOption::IpAddress(Ipv4Addr::new(10, 0, 0, 1))],
    ));
    handle.packet_in(ipcp_bytes(
        CpCode::ConfigureReq,
        1,
        vec![IpcpOption::IpAddress(Ipv4Addr::new(10, 0, 0, 2))],
    ));
    match wire.recv().await.unwrap() {
        PppFrame::Ipcp(data) => {
            let cp = CpFrame::<IpcpOption>::decode(&data).unwrap();
            assert_eq!(cp.code, CpCode::ConfigureAck);
        }
        other => panic!("unexpected: {other:?}"),
    }

    // Session is up and accounted for.
    handle.close();
    match wire.recv().await.unwrap() {
        PppFrame::Lcp(frame) => {
            assert_eq!(frame.code, CpCode::TerminateReq);
            assert_eq!(frame.body, CpBody::TermData(b"User request".to_vec()));
            handle.packet_in(
                PppFrame::Lcp(CpFrame::new(
                    CpCode::TerminateAck,
                    frame.id,
                    CpBody::TermData(vec![]),
                ))
                .to_bytes(),
            );
        }
        other => panic!("unexpected: {other:?}"),
    }
    handle.join().await;

    assert!(transport.terminated());
    let records = sink.records.lock().unwrap();
    let statuses: Vec<AcctStatus> = records.iter().map(|r| r.status).collect();
    assert_eq!(statuses, [AcctStatus::Start, AcctStatus::Stop]);
}
