//! Steady supervisor tests over a simulated three-AS path.
//!
//! The sender drives the packet through the remote hops synchronously
//! and routes the response back through the initiator's pipeline into
//! the reply router, the way the embedding service would.

use std::sync::Arc;

use sibra_core::{
    IfInfo, LinkType, LocalResvs, ManualEnv, Matrix, ReplyRouter, SibraAlgo, Topology,
};
use sibra_crypto::{SofMac, derive_mac_key};
use sibra_proto::{As, Bps, BwCls, Index, PathType, ResvId, RttCls, SibraExtn, State};
use sibra_service::{
    PacketAction, RequestSender, RequesterError, SibraHandler, SibraPacket, SteadyRequester,
    SteadyResvSpec, reply_key,
};

const NOW_MS: u64 = 8_000_000_000;
const NOW_S: u64 = NOW_MS / 1_000;

fn make_as(seed: u8, capacity: u64) -> (Arc<SibraHandler<ManualEnv>>, Arc<SibraAlgo>) {
    let topo = Topology::new([
        (
            1,
            IfInfo {
                link_type: LinkType::Child,
                ingress_cap: Bps(capacity),
                egress_cap: Bps(capacity),
            },
        ),
        (
            2,
            IfInfo {
                link_type: LinkType::Parent,
                ingress_cap: Bps(capacity),
                egress_cap: Bps(capacity),
            },
        ),
    ]);
    let algo = Arc::new(SibraAlgo::new(topo, Matrix::default(), 0.8));
    let sof_mac = Arc::new(SofMac::new(derive_mac_key(&[seed; 16]), 2));
    let env = ManualEnv::new(NOW_MS, u64::from(seed));
    (Arc::new(SibraHandler::new(Arc::clone(&algo), sof_mac, env)), algo)
}

fn travel_ifids(hop: usize, forward: bool) -> (u16, u16) {
    let fwd = [(0, 2), (1, 2), (1, 0)];
    let (a, b) = fwd[hop];
    if forward { (a, b) } else { (b, a) }
}

fn reparse(pkt: &SibraPacket, ingress: u16, egress: u16) -> Option<SibraPacket> {
    let raw = pkt.extn.pack().ok()?;
    Some(SibraPacket {
        extn: SibraExtn::parse(&raw).ok()?,
        ingress,
        egress,
        has_scion_path: pkt.has_scion_path,
    })
}

/// Carries packets across the remaining hops and routes responses back
/// into the initiator's reply router.
#[derive(Clone)]
struct PathSender {
    handlers: [Arc<SibraHandler<ManualEnv>>; 3],
    router: Arc<ReplyRouter<SibraPacket>>,
    drop_everything: bool,
}

impl PathSender {
    fn drive(&self, outgoing: SibraPacket) {
        if self.drop_everything {
            return;
        }
        // The packet left AS0 with the cursor already on AS1.
        let mut hop = 1usize;
        let (ingress, egress) = travel_ifids(hop, outgoing.extn.forward);
        let Some(mut pkt) = reparse(&outgoing, ingress, egress) else { return };
        loop {
            let Some(action) = self.handlers[hop].handle(pkt) else { return };
            match action {
                PacketAction::Forward(forwarded) => {
                    hop = if forwarded.extn.forward { hop + 1 } else { hop - 1 };
                    let (ingress, egress) = travel_ifids(hop, forwarded.extn.forward);
                    let Some(next) = reparse(&forwarded, ingress, egress) else { return };
                    pkt = next;
                },
                PacketAction::DeliverLocal(delivered) => {
                    // The initiator's service routes responses by key.
                    if let Some(key) = reply_key(&delivered) {
                        self.router.route(&key, delivered);
                    }
                    return;
                },
            }
        }
    }
}

impl RequestSender for PathSender {
    fn send(&self, pkt: SibraPacket) -> impl Future<Output = Result<(), String>> + Send {
        self.drive(pkt);
        async { Ok(()) }
    }
}

fn spec(max_bw: u8, min_bw: u8) -> SteadyResvSpec {
    SteadyResvSpec {
        id: ResvId::steady(As(0xFF00_0000_0110), 11),
        min_bw: BwCls(min_bw),
        max_bw: BwCls(max_bw),
        path_type: PathType::Up,
        rtt_cls: RttCls(10),
        num_hops: 3,
        egress: 2,
    }
}

struct Fixture {
    requester: SteadyRequester<ManualEnv, PathSender>,
    algos: [Arc<SibraAlgo>; 3],
    local_resvs: Arc<LocalResvs>,
}

fn fixture(capacity: u64, drop_everything: bool) -> Fixture {
    let (h0, a0) = make_as(1, capacity);
    let (h1, a1) = make_as(2, capacity);
    let (h2, a2) = make_as(3, capacity);
    let router = Arc::new(ReplyRouter::default());
    let local_resvs = Arc::new(LocalResvs::default());
    let sender = PathSender {
        handlers: [Arc::clone(&h0), h1, h2],
        router: Arc::clone(&router),
        drop_everything,
    };
    let env = ManualEnv::new(NOW_MS, 7);
    let requester = SteadyRequester::new(h0, router, Arc::clone(&local_resvs), sender, env);
    Fixture { requester, algos: [a0, a1, a2], local_resvs }
}

#[tokio::test(start_paused = true)]
async fn setup_confirms_to_active_everywhere() {
    let fixture = fixture(1_000_000_000, false);
    let spec = spec(10, 1);
    let block = fixture.requester.setup(&spec).await.expect("setup succeeds");
    assert_eq!(block.info.bw_cls, BwCls(10));
    assert_eq!(block.num_hops(), 3);

    for algo in &fixture.algos {
        let entry = algo.store.get(spec.id).expect("entry");
        let idx = entry.index_state(Index::ZERO).expect("index");
        assert_eq!(idx.state, State::Active);
        assert_eq!(entry.ephemeral_bw().total(), BwCls(10).bps());
    }
    let local = fixture.local_resvs.get(spec.id, Index::ZERO).expect("local record");
    assert_eq!(local.state, State::Active);
}

#[tokio::test(start_paused = true)]
async fn renewal_runs_on_the_next_index() {
    let fixture = fixture(1_000_000_000, false);
    let spec = spec(10, 1);
    let block = fixture.requester.setup(&spec).await.expect("setup succeeds");
    let renewed = fixture.requester.renew(&spec, &block).await.expect("renewal succeeds");
    assert_eq!(renewed.info.index, Index::ZERO.next());

    for algo in &fixture.algos {
        let entry = algo.store.get(spec.id).expect("entry");
        assert_eq!(entry.active_index(), Index::ZERO.next());
        // The superseded index was evicted on promotion.
        assert!(entry.index_state(Index::ZERO).is_none());
    }
    assert_eq!(
        fixture.local_resvs.get(spec.id, Index::ZERO.next()).expect("record").state,
        State::Active
    );
}

#[tokio::test(start_paused = true)]
async fn denial_reports_the_offered_maximum() {
    // Tiny capacity: nothing near the requested minimum is grantable.
    let fixture = fixture(1_000_000, false);
    let spec = spec(40, 38);
    let result = fixture.requester.setup(&spec).await;
    match result {
        Err(RequesterError::Denied { code: _, max_bw }) => {
            assert!(max_bw < BwCls(38));
        },
        other => unreachable!("expected denial, got {other:?}"),
    }
    // No confirmed state remains at the initiator.
    assert!(fixture.local_resvs.is_empty());
}

#[tokio::test(start_paused = true)]
async fn silent_path_times_out() {
    let fixture = fixture(1_000_000_000, true);
    let spec = spec(10, 1);
    let result = fixture.requester.setup(&spec).await;
    assert_eq!(result, Err(RequesterError::Timeout));

    // The locally admitted index is still temporary and will be
    // collected by the sweep.
    let algo = &fixture.algos[0];
    let entry = algo.store.get(spec.id).expect("entry");
    assert_eq!(entry.index_state(Index::ZERO).expect("index").state, State::Temp);
    assert_eq!(algo.purge_temp(NOW_MS + 1_100), 1);
    assert!(algo.store.get(spec.id).is_none());
}
