//! Tokio runtime glue: one task per link, an unbounded mailbox, and
//! detached helpers for the things a handler must not wait on (timers and
//! credential checks).
//!
//! Timers are plain spawned sleeps; cancellation is by generation counter,
//! so a sleep that outlives its timer simply delivers a stale fire that the
//! state machines discard.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::accounting::AcctSink;
use crate::config::{AuthProvider, Config};
use crate::ppp::{Link, LinkEvent, LinkRequest};
use crate::transport::Transport;

/// Handle to a running link task. Dropping it does not stop the link; use
/// [`LinkHandle::close`] for an orderly teardown.
pub struct LinkHandle {
    events: mpsc::UnboundedSender<LinkEvent>,
    task: JoinHandle<()>,
}

impl LinkHandle {
    /// Inject a received PPP payload (Protocol field onward).
    pub fn packet_in(&self, payload: Vec<u8>) {
        let _ = self.events.send(LinkEvent::PacketIn(payload));
    }

    /// Ask the link to terminate the session.
    pub fn close(&self) {
        let _ = self.events.send(LinkEvent::Close);
    }

    /// Wait for the link to reach Dead and its task to exit.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Spawn one link onto the current tokio runtime.
///
/// Received IPv4 datagrams are forwarded to `ip_up` when given, otherwise
/// dropped with a log line.
pub fn spawn<T, A, P>(
    config: Config,
    transport: T,
    acct: A,
    provider: Arc<P>,
    ip_up: Option<mpsc::UnboundedSender<Vec<u8>>>,
) -> LinkHandle
where
    T: Transport + 'static,
    A: AcctSink + 'static,
    P: AuthProvider + 'static,
{
    let (events, mut mailbox) = mpsc::unbounded_channel();
    let loopback = events.clone();
    let task = tokio::spawn(async move {
        let mut link = Link::new(config, transport, acct);
        let mut pending = match link.start() {
            Ok(requests) => requests,
            Err(err) => {
                warn!("link failed to start: {}", err);
                return;
            }
        };
        loop {
            perform(&mut pending, &loopback, &provider, ip_up.as_ref());
            if link.is_dead() {
                debug!("link dead, task exiting");
                break;
            }
            let Some(event) = mailbox.recv().await else {
                break;
            };
            pending = link.handle(event, Instant::now());
        }
    });
    LinkHandle { events, task }
}

fn perform<P: AuthProvider + 'static>(
    requests: &mut Vec<LinkRequest>,
    events: &mpsc::UnboundedSender<LinkEvent>,
    provider: &Arc<P>,
    ip_up: Option<&mpsc::UnboundedSender<Vec<u8>>>,
) {
    for request in requests.drain(..) {
        match request {
            LinkRequest::StartTimer {
                timer,
                generation,
                delay,
            } => {
                let events = events.clone();
                tokio::spawn(async move {
                    sleep(delay).await;
                    let _ = events.send(LinkEvent::TimerFire { timer, generation });
                });
            }
            // The sleep keeps running; its fire arrives with a stale
            // generation and is discarded.
            LinkRequest::StopTimer { .. } => {}
            LinkRequest::Authenticate {
                id,
                peer_id,
                passwd,
            } => {
                let events = events.clone();
                let provider = Arc::clone(provider);
                tokio::spawn(async move {
                    let result = provider.authenticate(&peer_id, &passwd);
                    let _ = events.send(LinkEvent::AuthReply { id, result });
                });
            }
            LinkRequest::Deliver(packet) => match ip_up {
                Some(sink) => {
                    let _ = sink.send(packet);
                }
                None => debug!("dropping {} byte IPv4 datagram, no upper sink", packet.len()),
            },
        }
    }
}
