use gics::{Decoder, Encoder, EncoderConfig, GicsError, MemorySidecar, Snapshot};

#[test]
fn add_after_finish_fails() {
    let mut enc = Encoder::new(EncoderConfig::default()).unwrap();
    enc.add_snapshot(Snapshot::new(1)).unwrap();
    enc.finish().unwrap();
    assert!(matches!(enc.add_snapshot(Snapshot::new(2)), Err(GicsError::State(_))));
    assert!(matches!(enc.finish(), Err(GicsError::State(_))));
}

#[test]
fn double_finalize_fails() {
    let mut enc = Encoder::new(EncoderConfig::default()).unwrap();
    enc.finalize().unwrap();
    assert!(matches!(enc.finalize(), Err(GicsError::State(_))));
}

#[test]
fn finalize_with_pending_snapshots_fails() {
    let mut enc = Encoder::new(EncoderConfig::default()).unwrap();
    enc.add_snapshot(Snapshot::new(1).with_item(4, 10, 1)).unwrap();
    assert!(matches!(enc.finalize(), Err(GicsError::State(_))));
    assert!(enc.anomaly_report().is_none());

    let mut bytes = enc.flush().unwrap();
    enc.finalize().unwrap();
    bytes.push(0xFF);
    assert_eq!(gics::decode(&bytes).unwrap(), vec![Snapshot::new(1).with_item(4, 10, 1)]);
}

#[test]
fn invalid_config_rejected() {
    let cfg = EncoderConfig::default().with_probe_interval(0);
    assert!(matches!(Encoder::new(cfg), Err(GicsError::Config(_))));
}

#[test]
fn telemetry_tracks_flushes_and_sidecar() {
    let enc = Encoder::new(EncoderConfig::default().with_run_id("tele")).unwrap();
    let mut enc = enc.with_sidecar(Box::new(MemorySidecar::default()));
    for i in 0..1_200i64 {
        enc.add_snapshot(Snapshot::new(i * 10).with_item(1, 300 + i % 3, 2)).unwrap();
    }
    enc.flush().unwrap();
    let t = enc.telemetry();
    // TIME x2, SNAPSHOT_LEN x2, ITEM_ID x2, VALUE x2, QUANTITY x2
    assert_eq!(t.blocks.len(), 10);
    assert_eq!(t.total_blocks, 4);
    assert!(t.blocks.iter().filter(|b| b.decision.is_some()).all(|b| b.metrics.is_some()));
    assert!(t.sidecar.is_none());

    enc.finish().unwrap();
    assert_eq!(enc.telemetry().sidecar.as_deref(), Some("gics-anomalies.tele.json"));
}

#[test]
fn reset_shims_are_harmless() {
    Encoder::reset();
    Encoder::reset_shared_context();
    Decoder::reset_shared_context();
    let bytes = gics::encode(&[Snapshot::new(3)]).unwrap();
    assert_eq!(gics::decode(&bytes).unwrap(), vec![Snapshot::new(3)]);
}
