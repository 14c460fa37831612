//! Stress tests for VDX
//!
//! Run with: cargo test --release stress -- --ignored

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use vdx::*;

fn large_database(rows: usize) -> MemoryDatabase {
    let mut db = MemoryDatabase::new(vec![Column::float("rsam")])
        .with_channel(Channel::new(1, "NPT", "Namakanipaio"))
        .with_rank(Rank::new(1, "RAW", 1, true))
        .with_rank(Rank::new(2, "EDITED", 2, false));
    for i in 0..rows {
        let t = i as f64 * 10.0;
        db.insert(Measurement::new(t, 1, 1, vec![(t * 0.001).sin()]));
        if i % 3 == 0 {
            db.insert(Measurement::new(t, 2, 1, vec![(t * 0.001).cos()]));
        }
    }
    db
}

#[test]
#[ignore] // Run manually with --ignored
fn stress_test_encoding() {
    let mut m = DataMatrix::new(vec![
        Column::float("time"),
        Column::integer("rank"),
        Column::float("value"),
    ]);
    for i in 0..1_000_000 {
        m.push_row(&[i as f64, 1.0, (i as f64 * 0.001).sin()]);
    }

    let mut encoder = Encoder::new();
    let start = Instant::now();
    let payload = encoder.encode_payload(std::slice::from_ref(&m)).unwrap();
    let elapsed = start.elapsed();
    let rate = m.rows() as f64 / elapsed.as_secs_f64();

    println!("Encoded {} rows in {:?}", m.rows(), elapsed);
    println!("{}", encoder.metrics().report());

    let decoded = Decoder::new().decode_payload(&payload).unwrap();
    assert_eq!(decoded[0].rows(), m.rows());
    assert!(
        rate > 500_000.0,
        "Should encode at least 500k rows/s, got {:.0}",
        rate
    );
}

#[test]
#[ignore]
fn stress_test_best_available_pipeline() {
    let factory = MemoryStoreFactory::new();
    factory.insert_database("rsam", large_database(300_000));
    let pool = SourcePool::new(vec![SourceConfig::new("rsam", "rsam")], Arc::new(factory));

    let mut lease = pool.checkout("rsam").unwrap();
    let query = DataQuery::new(TimeRange::new(0.0, 3e6).unwrap());

    let start = Instant::now();
    let reply = lease.execute(&GetData::Data(query)).unwrap();
    let elapsed = start.elapsed();

    println!("Resolved {} rows in {:?}", reply.rows(), elapsed);
    assert_eq!(reply.rows(), 300_000);
}

#[test]
#[ignore]
fn stress_test_concurrent_pool() {
    let factory = MemoryStoreFactory::new();
    factory.insert_database("rsam", large_database(20_000));
    let num_threads = 8;
    let pool = SourcePool::new(
        vec![SourceConfig::new("rsam", "rsam").with_max_idle(num_threads)],
        Arc::new(factory),
    );

    let queries_per_thread: u32 = 200;
    let start = Instant::now();

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || {
                let mut encoder = Encoder::new();
                for i in 0..queries_per_thread {
                    let mut lease = pool.checkout("rsam").unwrap();
                    let query = DataQuery::new(TimeRange::new(0.0, 200_000.0).unwrap())
                        .with_downsampling(Downsampling::Mean(60 + i % 5));
                    let reply = lease.execute(&GetData::Data(query)).unwrap();
                    reply.into_response(&mut encoder).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let elapsed = start.elapsed();
    let total = num_threads as u32 * queries_per_thread;
    println!("{} pooled queries in {:?}", total, elapsed);

    let stats = pool.stats();
    assert_eq!(stats.leased, total as u64);
    assert!(stats.created <= num_threads as u64);
    assert_eq!(stats.outstanding(), 0);
}
