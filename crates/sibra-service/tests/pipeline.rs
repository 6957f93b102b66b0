//! Multi-AS pipeline tests.
//!
//! Three simulated ASes pass packets hop by hop, re-parsing the
//! extension from its wire form at every hop. Covers the full steady
//! setup and confirmation flow, ephemeral setup over the established
//! reservation, and the tampered-SOF drop.

use std::sync::Arc;

use sibra_core::{IfInfo, LinkType, ManualEnv, Matrix, SibraAlgo, Topology};
use sibra_crypto::{SofMac, derive_mac_key};
use sibra_proto::{
    As, Block, Bps, BwCls, FailCode, Index, Info, PathType, Request, RequestType, ResvId, RttCls,
    SibraExtn, State, Tick,
    request::{ConfirmIndex, EphemReq, SteadyReq},
};
use sibra_service::{PacketAction, SibraHandler, SibraPacket};

const NOW_MS: u64 = 8_000_000_000;
const NOW_S: u64 = NOW_MS / 1_000;

struct SimAs {
    handler: SibraHandler<ManualEnv>,
    algo: Arc<SibraAlgo>,
}

fn sim_as(seed: u8) -> SimAs {
    let topo = Topology::new([
        (
            1,
            IfInfo {
                link_type: LinkType::Child,
                ingress_cap: Bps(1_000_000_000),
                egress_cap: Bps(1_000_000_000),
            },
        ),
        (
            2,
            IfInfo {
                link_type: LinkType::Parent,
                ingress_cap: Bps(1_000_000_000),
                egress_cap: Bps(1_000_000_000),
            },
        ),
    ]);
    let algo = Arc::new(SibraAlgo::new(topo, Matrix::default(), 0.8));
    let sof_mac = Arc::new(SofMac::new(derive_mac_key(&[seed; 16]), 2));
    let env = ManualEnv::new(NOW_MS, u64::from(seed));
    SimAs { handler: SibraHandler::new(Arc::clone(&algo), sof_mac, env), algo }
}

/// Interface pairs of a packet at each of the three ASes, in travel
/// order. The forward flag of the extension decides which side is the
/// reservation ingress.
fn travel_ifids(hop: usize, forward: bool) -> (u16, u16) {
    let fwd = [(0, 2), (1, 2), (1, 0)];
    let (a, b) = fwd[hop];
    if forward { (a, b) } else { (b, a) }
}

/// Serialise and re-parse the extension, as the next hop would see it.
fn reparse(pkt: &SibraPacket, ingress: u16, egress: u16) -> SibraPacket {
    let raw = pkt.extn.pack().expect("pack");
    SibraPacket {
        extn: SibraExtn::parse(&raw).expect("reparse"),
        ingress,
        egress,
        has_scion_path: pkt.has_scion_path,
    }
}

fn steady_id() -> ResvId {
    ResvId::steady(As(0xFF00_0000_0110), 7)
}

fn setup_info(bw: u8) -> Info {
    Info {
        exp_tick: Tick::from_unix(NOW_S + 320),
        bw_cls: BwCls(bw),
        rtt_cls: RttCls(10),
        index: Index::ZERO,
        forward: true,
        path_type: PathType::Up,
        fail_hop: 0,
    }
}

/// Drive a request extension from AS0 to AS2 and its response back,
/// returning the packet delivered to the initiator.
fn round_trip(ases: &[SimAs; 3], extn: SibraExtn, has_path: bool) -> SibraPacket {
    // Request leg.
    let (ingress, egress) = travel_ifids(0, true);
    let mut pkt = SibraPacket { extn, ingress, egress, has_scion_path: has_path };
    for hop in 0..3 {
        let action = ases[hop].handler.try_handle(pkt).expect("request leg");
        let forwarded = match action {
            PacketAction::Forward(pkt) => pkt,
            PacketAction::DeliverLocal(pkt) => {
                // The end AS hands accepted ephemeral requests to the
                // local client, which approves by reversing.
                let mut pkt = pkt;
                pkt.extn.reverse().expect("client reverse");
                pkt.extn.next_sof_index().expect("client advance");
                pkt
            },
        };
        let next_hop = if forwarded.extn.forward { hop + 1 } else { hop - 1 };
        let (ingress, egress) = travel_ifids(next_hop, forwarded.extn.forward);
        pkt = reparse(&forwarded, ingress, egress);
        if !forwarded.extn.forward {
            // The request turned around; switch to the response leg.
            for hop in (0..next_hop + 1).rev() {
                let action = ases[hop].handler.try_handle(pkt).expect("response leg");
                match action {
                    PacketAction::Forward(forwarded) => {
                        assert!(hop > 0, "response overshot the initiator");
                        let (ingress, egress) = travel_ifids(hop - 1, false);
                        pkt = reparse(&forwarded, ingress, egress);
                    },
                    PacketAction::DeliverLocal(delivered) => {
                        assert_eq!(hop, 0, "delivered before reaching the initiator");
                        return delivered;
                    },
                }
            }
            unreachable!("response leg never delivered");
        }
    }
    unreachable!("request never turned around");
}

/// Full steady setup: request out, granted response back, both
/// confirmations, ending with an active index at every AS.
fn establish_steady(ases: &[SimAs; 3]) -> Block {
    let req = SteadyReq::new(RequestType::SteadySetup, setup_info(10), BwCls(1), BwCls(10), 3)
        .expect("request");
    let extn = SibraExtn::steady_setup(steady_id(), req).expect("extension");

    let mut delivered = round_trip(ases, extn, true);
    // The initiator is the first hop of the block: stamp its field.
    ases[0].handler.finalize_steady_response(&mut delivered).expect("finalize");
    let Some(Request::SteadySucc(succ)) = delivered.extn.request else {
        unreachable!("expected an accepted response, got {:?}", delivered.extn.request);
    };
    let block = succ.block;
    assert_eq!(block.info.bw_cls, BwCls(10));

    for state in [State::Pending, State::Active] {
        let conf = ConfirmIndex::new(3, Index::ZERO, state).expect("confirm");
        let mut extn =
            SibraExtn::steady_use(steady_id(), block.clone(), true).expect("extension");
        extn.to_request(Request::ConfirmIndex(conf)).expect("attach");
        let delivered = round_trip(ases, extn, false);
        match delivered.extn.request {
            Some(Request::ConfirmIndex(conf)) => assert!(conf.base.accepted),
            other => unreachable!("expected confirm echo, got {other:?}"),
        }
    }
    block
}

#[test]
fn steady_setup_and_confirmation_across_three_ases() {
    let ases = [sim_as(1), sim_as(2), sim_as(3)];
    let block = establish_steady(&ases);

    // Every hop's opaque field is stamped.
    for sof in &block.sofs {
        assert_ne!(sof.mac, [0u8; 4]);
    }
    assert_eq!(block.sofs[0].ingress, 0);
    assert_eq!(block.sofs[0].egress, 2);
    assert_eq!(block.sofs[1].ingress, 1);
    assert_eq!(block.sofs[2].egress, 0);

    // Every AS holds exactly one active index sized to the grant.
    for sim in &ases {
        let entry = sim.algo.store.get(steady_id()).expect("entry");
        let idx = entry.index_state(Index::ZERO).expect("index");
        assert_eq!(idx.state, State::Active);
        assert_eq!(entry.ephemeral_bw().total(), BwCls(10).bps());
        assert_eq!(entry.live_indexes(NOW_S), 1);
    }
}

#[test]
fn ephemeral_setup_over_established_steady() {
    let ases = [sim_as(1), sim_as(2), sim_as(3)];
    let block = establish_steady(&ases);

    let ephem_id = ResvId::ephemeral(As(0xFF00_0000_0110), [4u8; 10]);
    let info = Info {
        exp_tick: Tick::from_unix(NOW_S).add(3),
        bw_cls: BwCls(8),
        rtt_cls: RttCls(10),
        index: Index::ZERO,
        forward: true,
        path_type: PathType::Ephemeral,
        fail_hop: 0,
    };
    let req = EphemReq::new(RequestType::EphemSetup, Some(ephem_id), info, 3).expect("request");
    let mut extn = SibraExtn::steady_use(steady_id(), block, true).expect("extension");
    extn.to_request(Request::Ephem(req)).expect("attach");

    let delivered = round_trip(&ases, extn, false);
    let Some(Request::Ephem(granted)) = &delivered.extn.request else {
        unreachable!("expected accepted setup, got {:?}", delivered.extn.request);
    };
    assert!(granted.base.response);
    // Every hop stamped an ephemeral opaque field.
    for sof in &granted.block.sofs {
        assert_ne!(sof.mac, [0u8; 4]);
    }
    // Every AS registered the reservation and charged its ledger.
    for sim in &ases {
        let entry = sim.algo.store.get(steady_id()).expect("entry");
        assert!(entry.ephem_map.contains(ephem_id));
        assert_eq!(
            entry.ephemeral_bw().in_use(Tick::from_unix(NOW_S)),
            BwCls(8).bps()
        );
    }

    // The granted block backs a usable ephemeral extension.
    let ephem_extn = SibraExtn::ephem_use(
        vec![ephem_id, steady_id()],
        [3, 0, 0],
        granted.block.clone(),
        true,
    )
    .expect("ephemeral extension");
    assert_eq!(ephem_extn.total_hops(), 3);
}

#[test]
fn oversized_ephemeral_is_rejected_with_offer() {
    let ases = [sim_as(1), sim_as(2), sim_as(3)];
    let block = establish_steady(&ases);

    // Class 12 exceeds the class-10 steady ledgers.
    let ephem_id = ResvId::ephemeral(As(0xFF00_0000_0110), [5u8; 10]);
    let info = Info {
        exp_tick: Tick::from_unix(NOW_S).add(3),
        bw_cls: BwCls(12),
        rtt_cls: RttCls(10),
        index: Index::ZERO,
        forward: true,
        path_type: PathType::Ephemeral,
        fail_hop: 0,
    };
    let req = EphemReq::new(RequestType::EphemSetup, Some(ephem_id), info, 3).expect("request");
    let mut extn = SibraExtn::steady_use(steady_id(), block, true).expect("extension");
    extn.to_request(Request::Ephem(req)).expect("attach");

    let delivered = round_trip(&ases, extn, false);
    let Some(Request::EphemFailed(failed)) = &delivered.extn.request else {
        unreachable!("expected failure, got {:?}", delivered.extn.request);
    };
    assert_eq!(failed.fail_code, FailCode::BwExceeded);
    assert_eq!(failed.info.fail_hop, 0, "first hop already rejects");
    assert!(failed.info.bw_cls <= BwCls(10));

    // Nothing stays registered anywhere.
    for sim in &ases {
        let entry = sim.algo.store.get(steady_id()).expect("entry");
        assert!(!entry.ephem_map.contains(ephem_id));
    }
}

#[test]
fn tampered_sof_is_dropped() {
    let ases = [sim_as(1), sim_as(2), sim_as(3)];
    let block = establish_steady(&ases);

    let conf = ConfirmIndex::new(3, Index::ZERO, State::Pending).expect("confirm");
    let mut extn = SibraExtn::steady_use(steady_id(), block, true).expect("extension");
    extn.to_request(Request::ConfirmIndex(conf)).expect("attach");
    // Flip one bit of the egress interface in this hop's opaque field.
    extn.active_blocks[0].sofs[0].egress ^= 0x01;

    let (ingress, egress) = travel_ifids(0, true);
    let pkt = SibraPacket { extn, ingress, egress, has_scion_path: false };
    assert!(ases[0].handler.handle(pkt).is_none(), "tampered packet must drop");
}

#[test]
fn unknown_interface_is_dropped() {
    let ases = [sim_as(1), sim_as(2), sim_as(3)];
    let block = establish_steady(&ases);
    let extn = SibraExtn::steady_use(steady_id(), block, true).expect("extension");
    let pkt = SibraPacket { extn, ingress: 9, egress: 2, has_scion_path: false };
    assert!(ases[0].handler.handle(pkt).is_none());
}
