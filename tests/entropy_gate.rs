use gics::chm::HealthMonitor;
use gics::format::BLOCK_HEALTH_QUAR;
use gics::metrics::BlockMetrics;
use gics::{decode, Encoder, EncoderConfig, RouteReason, RoutingDecision, Snapshot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn noise_is_quarantined_despite_good_ratio() {
    let mut rng = StdRng::seed_from_u64(9);
    let chunk: Vec<i64> = (0..1_000).map(|_| rng.gen_range(0..1_000_000)).collect();
    let metrics = BlockMetrics::compute(&chunk);
    assert!(metrics.unique_ratio > 0.85 && metrics.unique_delta_ratio > 0.85);

    let chm = HealthMonitor::new("gate", 4);
    let route = chm.decide_route(&metrics, 1_000.0, 1);
    assert_eq!(route.decision, RoutingDecision::Quarantine);
    assert_eq!(route.reason, Some(RouteReason::EntropyGate));
}

#[test]
fn encoder_routes_noisy_values_to_fallback() {
    let mut rng = StdRng::seed_from_u64(10);
    let snaps: Vec<Snapshot> = (0..1_000i64)
        .map(|i| Snapshot::new(i * 10).with_item(1, rng.gen_range(0..1_000_000), 1))
        .collect();
    let mut enc = Encoder::new(EncoderConfig::default()).unwrap();
    for s in &snaps {
        enc.add_snapshot(s.clone()).unwrap();
    }
    let bytes = enc.finish().unwrap();

    let value = enc
        .telemetry()
        .blocks
        .iter()
        .find(|b| b.stream == "VALUE")
        .unwrap();
    // a plain varint block of these values would clear the initial baseline
    assert!(value.ratio > 2.0);
    assert_eq!(value.reason, Some(RouteReason::EntropyGate));
    assert_eq!(value.codec, "VARINT_DELTA");
    assert_ne!(value.flags & BLOCK_HEALTH_QUAR, 0);

    assert_eq!(decode(&bytes).unwrap(), snaps);
}
