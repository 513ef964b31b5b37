//! Relay throughput benchmarks

use std::io;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use pty_relay::{Command, Relay, RelaySettings, WindowSize};

const BYTES: u64 = 1024 * 1024;

fn bench_relay_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("relay");
    group.sample_size(10);
    group.throughput(Throughput::Bytes(BYTES));

    let script = format!("head -c {} /dev/zero", BYTES);
    let command = Command::from_args(["sh", "-c", &script]).expect("Failed to build command");

    for chunk_size in [4096usize, 65536] {
        let relay = Relay::new(RelaySettings {
            chunk_size,
            ..RelaySettings::default()
        });
        group.bench_function(format!("zeros_chunk_{}", chunk_size), |b| {
            b.iter(|| {
                let outcome = relay
                    .run(&command, WindowSize::default(), &mut io::sink())
                    .expect("Relay failed");
                assert_eq!(outcome.bytes_relayed, BYTES);
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_relay_throughput);
criterion_main!(benches);
