use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use streamlib_monitor::logs::{evict, LogEntry, LogHub, LogLevel};
use streamlib_monitor::RetentionRatios;

fn bench_emit_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("emit_fan_out");

    for subscribers in [0usize, 1, 8, 32].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            subscribers,
            |b, &count| {
                let hub = LogHub::new(1024);
                let queues: Vec<_> = (0..count)
                    .map(|_| {
                        let queue = hub.register();
                        queue.set_level(LogLevel::Debug);
                        queue.set_capturing(true);
                        queue
                    })
                    .collect();

                let mut counter = 0u64;
                b.iter(|| {
                    hub.emit("decoder", LogLevel::Info, black_box("frame decoded"), None);
                    counter += 1;

                    // Keep queues short, the way client ticks would
                    if counter % 256 == 0 {
                        for queue in &queues {
                            queue.drain();
                        }
                    }
                });
            },
        );
    }
    group.finish();
}

fn bench_retention_evict(c: &mut Criterion) {
    let ratios = RetentionRatios::default();
    let levels = [
        (LogLevel::Error, 50),
        (LogLevel::Warning, 100),
        (LogLevel::Info, 200),
        (LogLevel::Debug, 150),
    ];
    let full: Vec<LogEntry> = levels
        .iter()
        .flat_map(|(level, count)| std::iter::repeat(*level).take(*count))
        .enumerate()
        .map(|(i, level)| LogEntry {
            timestamp: i as u64,
            seq: i as u64,
            tool: "bench".to_string(),
            level,
            message: format!("entry {}", i),
            origin: None,
        })
        .collect();

    c.bench_function("retention_evict_500", |b| {
        b.iter_batched(
            || full.clone(),
            |mut history| {
                evict(&mut history, 500, &ratios);
                black_box(history.len())
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_emit_fan_out, bench_retention_evict);
criterion_main!(benches);
