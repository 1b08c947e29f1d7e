use std::hint::black_box;

use arcfetch_fetch::{Limits, Recorder, SPOOL_MEMORY_THRESHOLD};
use arcfetch_verify::DigestAlgorithm;
use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use futures_util::stream;
use tokio_util::sync::CancellationToken;

const CHUNK: usize = 16 * 1024;

fn body(total: usize) -> Vec<Result<Bytes, std::io::Error>> {
    let chunk = Bytes::from(vec![0x5a; CHUNK]);
    (0..total / CHUNK).map(|_| Ok(chunk.clone())).collect()
}

fn bench_record_digest(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("record_digest");

    // One size stays in memory, the other spills to a temporary file.
    for size in [SPOOL_MEMORY_THRESHOLD as usize / 2, 4 * 1024 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        for algorithm in [None, Some(DigestAlgorithm::Sha1), Some(DigestAlgorithm::Sha256)] {
            let label = algorithm.map_or("none", |a| a.as_str());
            group.bench_with_input(BenchmarkId::new(label, size), &size, |b, &size| {
                b.iter(|| {
                    rt.block_on(async {
                        let mut recorder = Recorder::open("bench", Limits::default(), algorithm);
                        recorder.record_envelope(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
                        let chunks = stream::iter(body(size));
                        recorder.read_fully_or_until(chunks, None, &CancellationToken::new()).await.unwrap();
                        recorder.close();
                        black_box(recorder.digest().cloned())
                    })
                });
            });
        }
    }

    group.finish();
}

fn bench_length_cap(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let limits = Limits { hard_max_bytes: 256 * 1024, ..Limits::default() };

    c.bench_function("record_until_length_cap", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut recorder = Recorder::open("bench", limits, Some(DigestAlgorithm::Sha1));
                let chunks = stream::iter(body(1024 * 1024));
                let result = recorder.read_fully_or_until(chunks, None, &CancellationToken::new()).await;
                recorder.close();
                black_box((result.is_err(), recorder.size()))
            })
        });
    });
}

criterion_group!(benches, bench_record_digest, bench_length_cap);
criterion_main!(benches);
