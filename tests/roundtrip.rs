use gics::{decode, encode, encode_with, ContextMode, Encoder, EncoderConfig, Snapshot};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn snapshot_strategy() -> impl Strategy<Value = Snapshot> {
    (
        any::<i64>(),
        prop::collection::hash_map(any::<i64>(), (any::<i64>(), any::<i64>()), 0..6),
    )
        .prop_map(|(ts, items)| {
            let mut snap = Snapshot::new(ts);
            for (id, (price, qty)) in items {
                snap.insert(id, price, qty);
            }
            snap
        })
}

proptest! {
    #[test]
    fn arbitrary_snapshots_roundtrip(snaps in prop::collection::vec(snapshot_strategy(), 0..40)) {
        let bytes = encode(&snaps).unwrap();
        prop_assert_eq!(decode(&bytes).unwrap(), snaps);
    }

    #[test]
    fn small_range_snapshots_roundtrip(
        prices in prop::collection::vec(-50i64..50, 1..300),
        step in 1i64..5,
    ) {
        let snaps: Vec<Snapshot> = prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Snapshot::new(i as i64 * step).with_item(1, p, 1).with_item(2, p * 2, -1))
            .collect();
        let bytes = encode(&snaps).unwrap();
        prop_assert_eq!(decode(&bytes).unwrap(), snaps);
    }
}

#[test]
fn hourly_market_scenario() {
    let snaps: Vec<Snapshot> = (0..48i64)
        .map(|i| {
            let mut s = Snapshot::new(1_700_000_000 + i * 3600)
                .with_item(1, 10_000 + 3 * i, 5)
                .with_item(2, 20_000 + ((17 * i) % 101) - 50, 7);
            if i % 6 == 0 {
                s.insert(3, 99_000, 1);
            }
            s
        })
        .collect();
    let decoded = decode(&encode(&snaps).unwrap()).unwrap();
    assert_eq!(decoded, snaps);
    for (i, snap) in decoded.iter().enumerate() {
        let i = i as i64;
        assert_eq!(snap.items[&1].price, 10_000 + 3 * i);
        assert_eq!(snap.items[&2].price, 20_000 + ((17 * i) % 101) - 50);
    }
    assert_eq!(decoded.iter().filter(|s| s.items.contains_key(&3)).count(), 8);
}

#[test]
fn many_blocks_roundtrip() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut price = 50_000i64;
    let snaps: Vec<Snapshot> = (0..2_500i64)
        .map(|i| {
            price += rng.gen_range(-20..=20);
            let mut s = Snapshot::new(i * 1_000 + rng.gen_range(0..3))
                .with_item(10, price, rng.gen_range(1..100))
                .with_item(11, price + 5, 1);
            if rng.gen_bool(0.3) {
                s.insert(rng.gen_range(100..110), rng.gen(), rng.gen());
            }
            s
        })
        .collect();
    assert_eq!(decode(&encode(&snaps).unwrap()).unwrap(), snaps);
}

#[test]
fn context_off_roundtrip() {
    let snaps: Vec<Snapshot> = (0..500i64)
        .map(|i| Snapshot::new(i).with_item(1, [100, 105, 110][(i % 3) as usize], 1))
        .collect();
    let cfg = EncoderConfig::default().with_context_mode(ContextMode::Off);
    let bytes = encode_with(&snaps, cfg, None).unwrap();
    assert_eq!(decode(&bytes).unwrap(), snaps);
}

#[test]
fn flushes_concatenate_into_one_stream() {
    let snaps: Vec<Snapshot> = (0..90i64)
        .map(|i| Snapshot::new(1_000 + i * 10).with_item(i % 4, 500 + i, i))
        .collect();
    let mut enc = Encoder::new(EncoderConfig::default()).unwrap();
    let mut bytes = Vec::new();
    for chunk in snaps.chunks(30) {
        for s in chunk {
            enc.add_snapshot(s.clone()).unwrap();
        }
        bytes.extend(enc.flush().unwrap());
    }
    bytes.extend(enc.finish().unwrap());
    assert_eq!(decode(&bytes).unwrap(), snaps);
}

#[test]
fn empty_input() {
    let bytes = encode(&[]).unwrap();
    assert_eq!(bytes.len(), 10);
    assert!(decode(&bytes).unwrap().is_empty());
}

#[test]
fn snapshots_without_items() {
    let snaps: Vec<Snapshot> = (0..5).map(Snapshot::new).collect();
    assert_eq!(decode(&encode(&snaps).unwrap()).unwrap(), snaps);
}
