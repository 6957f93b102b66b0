//! End-to-end admission scenarios against the reservation engine.
//!
//! Covers the canonical flows: single-hop steady setup, renewal with
//! shrink, ephemeral transfer-hop rollback, and temp-index eviction.

use std::sync::Arc;

use sibra_core::{
    AdmParams, IfInfo, IfTuple, LinkType, Matrix, SibraAlgo, SteadyEntry, Topology,
};
use sibra_proto::{
    As, Block, Bps, BwCls, FailCode, Index, Info, IsdAs, PathType, Request, ResvId, RttCls,
    SibraExtn, Tick,
    request::{EphemReq, RequestType, SteadyReq},
};

const NOW_MS: u64 = 8_000_000_000;
const NOW_S: u64 = NOW_MS / 1_000;

fn src1() -> IsdAs {
    IsdAs { isd: 1, asn: As(0xFF00_0000_0110) }
}

fn src2() -> IsdAs {
    IsdAs { isd: 1, asn: As(0xFF00_0000_0220) }
}

/// One egress interface of 1 Gbps behind a parent link, plus a 20 Gbps
/// child-side ingress for cross traffic.
fn algo() -> SibraAlgo {
    let topo = Topology::new([
        (
            1,
            IfInfo {
                link_type: LinkType::Parent,
                ingress_cap: Bps(1_000_000_000),
                egress_cap: Bps(1_000_000_000),
            },
        ),
        (
            5,
            IfInfo {
                link_type: LinkType::Child,
                ingress_cap: Bps(20_000_000_000),
                egress_cap: Bps(20_000_000_000),
            },
        ),
    ]);
    let matrix = Matrix::new([((0, 1), 1), ((5, 1), 1)]);
    SibraAlgo::new(topo, matrix, 0.8)
}

fn steady_info(index: u8, bw: u8) -> Info {
    Info {
        exp_tick: Tick::from_unix(NOW_S + 320),
        bw_cls: BwCls(bw),
        rtt_cls: RttCls(10),
        index: Index::new(index).unwrap(),
        forward: true,
        path_type: PathType::Up,
        fail_hop: 0,
    }
}

fn setup_params<'a>(
    ifids: IfTuple,
    src: IsdAs,
    id: ResvId,
    req: &'a SteadyReq,
) -> AdmParams<'a> {
    AdmParams {
        ifids,
        src,
        req_id: id,
        setup: req.info.index == Index::ZERO,
        req,
        active_path_type: None,
        prev_bw: req.max_bw,
    }
}

/// Drive an admitted index all the way to `Active`.
fn confirm_to_active(algo: &SibraAlgo, ifids: IfTuple, id: ResvId, index: u8, granted: u8) {
    let info = steady_info(index, granted);
    let idx = Index::new(index).unwrap();
    algo.promote_to_sof_created(ifids, id, &info, NOW_MS).unwrap();
    algo.promote_to_pending(ifids, id, idx).unwrap();
    algo.promote_to_active(ifids, id, idx, &info, NOW_MS).unwrap();
}

#[test]
fn single_hop_steady_setup_admits() {
    // S1: empty state, one egress interface, request class 10.
    let algo = algo();
    let ifids = IfTuple { ingress: 0, egress: 1 };
    let id = ResvId::steady(src1().asn, 1);
    let req =
        SteadyReq::new(RequestType::SteadySetup, steady_info(0, 10), BwCls(1), BwCls(10), 1)
            .unwrap();

    let decision = algo.admit_steady(&setup_params(ifids, src1(), id, &req), NOW_MS).unwrap();
    assert!(decision.accepted);
    assert_eq!(decision.alloc_bw, BwCls(10));
    assert!(decision.max_bw >= BwCls(10));

    // A temp index exists and its eviction is scheduled.
    let entry = algo.store.get(id).unwrap();
    let idx = entry.index_state(Index::ZERO).unwrap();
    assert_eq!(idx.state, sibra_proto::State::Temp);
    assert!(algo.temp.contains(id, Index::ZERO, NOW_MS));
}

#[test]
fn renewal_shrinks_to_available_bandwidth() {
    // S2: an active index holds class 20; cross traffic from another
    // source occupies most of the egress; a renewal asking for class 30
    // is shrunk to what is left.
    let algo = algo();
    let ifids = IfTuple { ingress: 0, egress: 1 };
    let id = ResvId::steady(src1().asn, 1);
    let req =
        SteadyReq::new(RequestType::SteadySetup, steady_info(0, 20), BwCls(1), BwCls(20), 1)
            .unwrap();
    let decision = algo.admit_steady(&setup_params(ifids, src1(), id, &req), NOW_MS).unwrap();
    assert!(decision.accepted);
    confirm_to_active(&algo, ifids, id, 0, 20);

    // Cross traffic: class 38 granted as 32 on the child-side pair.
    let other_ifids = IfTuple { ingress: 5, egress: 1 };
    let other_id = ResvId::steady(src2().asn, 7);
    let other =
        SteadyReq::new(RequestType::SteadySetup, steady_info(0, 38), BwCls(1), BwCls(38), 1)
            .unwrap();
    let other_dec =
        algo.admit_steady(&setup_params(other_ifids, src2(), other_id, &other), NOW_MS).unwrap();
    assert!(other_dec.accepted);
    assert_eq!(other_dec.alloc_bw, BwCls(32));
    confirm_to_active(&algo, other_ifids, other_id, 0, 32);

    // Renewal on index 1 asks for class 30.
    let renew =
        SteadyReq::new(RequestType::SteadyRenewal, steady_info(1, 30), BwCls(1), BwCls(30), 1)
            .unwrap();
    let mut params = setup_params(ifids, src1(), id, &renew);
    params.setup = false;
    params.active_path_type = Some(PathType::Up);
    let decision = algo.admit_steady(&params, NOW_MS).unwrap();

    assert!(decision.accepted);
    assert_eq!(decision.alloc_bw, decision.max_bw, "grant equals the shrunk maximum");
    assert!(decision.max_bw < BwCls(30), "must shrink below the requested class");
    assert_eq!(decision.max_bw, BwCls(28));
}

/// A stitched two-block steady extension positioned at the transfer AS,
/// carrying an ephemeral setup request.
fn transfer_setup_extn(id_a: ResvId, id_b: ResvId, bw: u8) -> SibraExtn {
    let block = |pt| Block::new(
        Info {
            exp_tick: Tick::from_unix(NOW_S + 320),
            bw_cls: BwCls(30),
            rtt_cls: RttCls(10),
            index: Index::ZERO,
            forward: true,
            path_type: pt,
            fail_hop: 0,
        },
        2,
    );
    let mut extn = SibraExtn::steady_stitched(
        vec![id_a, id_b],
        vec![block(PathType::Up), block(PathType::Down)],
        true,
    )
    .unwrap();
    let info = Info {
        exp_tick: Tick::from_unix(NOW_S).add(3),
        bw_cls: BwCls(bw),
        rtt_cls: RttCls(10),
        index: Index::ZERO,
        forward: true,
        path_type: PathType::Ephemeral,
        fail_hop: 0,
    };
    let ephem_id = ResvId::ephemeral(src1().asn, [9u8; 10]);
    let req = EphemReq::new(RequestType::EphemSetup, Some(ephem_id), info, extn.total_hops())
        .unwrap();
    extn.to_request(Request::Ephem(req)).unwrap();
    // Move the cursor onto the transfer AS.
    extn.next_sof_index().unwrap();
    assert!(extn.is_transfer());
    extn
}

#[test]
fn ephemeral_transfer_rolls_back_first_allocation() {
    // S3: steady A has plenty of ephemeral headroom, steady B does not.
    // The transfer hop reserves on A, fails on B, and must undo A.
    let algo = algo();
    let id_a = ResvId::steady(src1().asn, 1);
    let id_b = ResvId::steady(src2().asn, 2);
    let now = Tick::from_unix(NOW_S);

    for (id, src, total_cls) in [(id_a, src1(), 25u8), (id_b, src2(), 20u8)] {
        let entry = Arc::new(SteadyEntry::new(
            src,
            id,
            IfTuple { ingress: 0, egress: 1 },
            now,
        ));
        entry.ephemeral_bw().set_total(BwCls(total_cls).bps(), now).unwrap();
        algo.store.insert(entry).unwrap();
    }

    // Class 24 (~46 Mbps) fits A (class 25 ledger) but not B (class 20).
    let extn = transfer_setup_extn(id_a, id_b, 24);
    let decision = algo.admit_ephem_setup(&extn, NOW_MS).unwrap();

    assert_eq!(decision.fail_code, FailCode::BwExceeded);
    assert_eq!(decision.max_bw, BwCls(20), "offer is the smaller residual");

    // A's allocation was rolled back in full.
    let entry_a = algo.store.get(id_a).unwrap();
    assert_eq!(entry_a.ephemeral_bw().free(now), BwCls(25).bps());
    assert!(entry_a.ephem_map.is_empty());
    let entry_b = algo.store.get(id_b).unwrap();
    assert!(entry_b.ephem_map.is_empty());
}

#[test]
fn ephemeral_transfer_admits_when_both_fit() {
    let algo = algo();
    let id_a = ResvId::steady(src1().asn, 1);
    let id_b = ResvId::steady(src2().asn, 2);
    let now = Tick::from_unix(NOW_S);

    for (id, src) in [(id_a, src1()), (id_b, src2())] {
        let entry = Arc::new(SteadyEntry::new(
            src,
            id,
            IfTuple { ingress: 0, egress: 1 },
            now,
        ));
        entry.ephemeral_bw().set_total(BwCls(30).bps(), now).unwrap();
        algo.store.insert(entry).unwrap();
    }

    let extn = transfer_setup_extn(id_a, id_b, 24);
    let decision = algo.admit_ephem_setup(&extn, NOW_MS).unwrap();
    assert_eq!(decision.fail_code, FailCode::None);
    assert_eq!(decision.alloc_bw, BwCls(24));

    // Both adjacent entries carry the registration.
    for id in [id_a, id_b] {
        let entry = algo.store.get(id).unwrap();
        assert_eq!(entry.ephem_map.len(), 1);
        assert_eq!(
            entry.ephemeral_bw().in_use(now),
            BwCls(24).bps()
        );
    }
}

#[test]
fn temp_index_eviction_restores_bandwidth() {
    // S5: an admitted setup that is never confirmed is evicted after its
    // TTL, and the bandwidth becomes grantable again.
    let algo = algo();
    let ifids = IfTuple { ingress: 0, egress: 1 };
    let id = ResvId::steady(src1().asn, 1);
    let req =
        SteadyReq::new(RequestType::SteadySetup, steady_info(0, 30), BwCls(1), BwCls(30), 1)
            .unwrap();
    let first = algo.admit_steady(&setup_params(ifids, src1(), id, &req), NOW_MS).unwrap();
    assert!(first.accepted);

    // Within the TTL nothing is evicted.
    assert_eq!(algo.purge_temp(NOW_MS + 900), 0);
    assert!(algo.store.get(id).is_some());

    // Past the TTL the sweep collects the index and drops the entry.
    assert_eq!(algo.purge_temp(NOW_MS + 1_100), 1);
    assert!(algo.store.get(id).is_none());
    assert!(!algo.temp.contains(id, Index::ZERO, NOW_MS + 1_100));

    // A renewal for the evicted reservation cannot find its index.
    let renew =
        SteadyReq::new(RequestType::SteadyRenewal, steady_info(1, 30), BwCls(1), BwCls(30), 1)
            .unwrap();
    let mut params = setup_params(ifids, src1(), id, &renew);
    params.setup = false;
    assert!(algo.admit_steady(&params, NOW_MS + 1_200).is_err());

    // The bandwidth is fully available to a fresh setup.
    let other_id = ResvId::steady(src2().asn, 3);
    let fresh =
        SteadyReq::new(RequestType::SteadySetup, steady_info(0, 30), BwCls(1), BwCls(30), 1)
            .unwrap();
    let second = algo
        .admit_steady(&setup_params(ifids, src2(), other_id, &fresh), NOW_MS + 1_200)
        .unwrap();
    assert!(second.accepted);
    assert_eq!(second.max_bw, first.max_bw);
}

#[test]
fn admission_survives_maximum_bandwidth_class() {
    // Class 255 saturates instead of overflowing the accumulators.
    let algo = algo();
    let ifids = IfTuple { ingress: 0, egress: 1 };
    let id = ResvId::steady(src1().asn, 1);
    let req =
        SteadyReq::new(RequestType::SteadySetup, steady_info(0, 255), BwCls(1), BwCls(255), 1)
            .unwrap();
    let decision = algo.admit_steady(&setup_params(ifids, src1(), id, &req), NOW_MS).unwrap();
    assert!(decision.accepted);
    // Grant is capped by the 1 Gbps egress, far below class 255.
    assert!(decision.alloc_bw < BwCls(255));
    assert!(decision.alloc_bw > BwCls(0));
}
