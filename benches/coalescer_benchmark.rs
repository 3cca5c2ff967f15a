use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use lite_coalesce::{Coalescer, Completion};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Baseline: the usual "mutex + broadcast channel" single-flight shape
struct BroadcastFlight<T> {
    in_flight: Mutex<Option<broadcast::Sender<T>>>,
}

impl<T: Clone> BroadcastFlight<T> {
    fn new() -> Self {
        Self {
            in_flight: Mutex::new(None),
        }
    }

    fn finish(&self, value: T) {
        if let Some(tx) = self.in_flight.lock().unwrap().take() {
            let _ = tx.send(value);
        }
    }

    async fn run<F: FnOnce()>(&self, operation: F) -> T {
        let (mut rx, primary) = {
            let mut guard = self.in_flight.lock().unwrap();
            match guard.as_ref().map(|tx| tx.subscribe()) {
                Some(rx) => (rx, false),
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    *guard = Some(tx);
                    (rx, true)
                }
            }
        };
        if primary {
            operation();
        }
        rx.recv().await.unwrap()
    }
}

/// Benchmark: uncontended round with inline completion
/// 基准测试：无竞争、内联完成的单轮
fn bench_uncontended_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended_round");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    group.bench_function("coalescer", |b| {
        let coalescer = Coalescer::<u64, ()>::new();
        b.to_async(&runtime).iter(|| {
            let coalescer = coalescer.clone();
            async move {
                coalescer
                    .run(|done: Completion<u64, ()>| done.succeed(1))
                    .await
                    .unwrap()
            }
        });
    });

    group.bench_function("blocking_coalescer", |b| {
        let coalescer = Coalescer::<u64, ()>::new();
        b.iter(|| {
            coalescer
                .blocking_run(|done: Completion<u64, ()>| done.succeed(1))
                .unwrap()
        });
    });

    group.finish();
}

/// Benchmark: N callers sharing one delayed round
/// 基准测试：N 个调用者共享一个延迟轮次
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for callers in [4usize, 32, 128] {
        group.bench_with_input(
            BenchmarkId::new("coalescer", callers),
            &callers,
            |b, &callers| {
                b.to_async(&runtime).iter(|| async move {
                    let coalescer = Coalescer::<Arc<[u8; 64]>, ()>::new();
                    let handles: Vec<_> = (0..callers)
                        .map(|_| {
                            let coalescer = coalescer.clone();
                            tokio::spawn(async move {
                                coalescer
                                    .run(|done: Completion<Arc<[u8; 64]>, ()>| {
                                        tokio::spawn(async move {
                                            tokio::time::sleep(Duration::from_micros(50)).await;
                                            done.succeed(Arc::new([7; 64]));
                                        });
                                    })
                                    .await
                            })
                        })
                        .collect();
                    for handle in handles {
                        let _ = handle.await;
                    }
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("broadcast", callers),
            &callers,
            |b, &callers| {
                b.to_async(&runtime).iter(|| async move {
                    let flight = Arc::new(BroadcastFlight::<Arc<[u8; 64]>>::new());
                    let handles: Vec<_> = (0..callers)
                        .map(|_| {
                            let flight = flight.clone();
                            tokio::spawn(async move {
                                let finisher = flight.clone();
                                flight
                                    .run(move || {
                                        tokio::spawn(async move {
                                            tokio::time::sleep(Duration::from_micros(50)).await;
                                            finisher.finish(Arc::new([7; 64]));
                                        });
                                    })
                                    .await
                            })
                        })
                        .collect();
                    for handle in handles {
                        let _ = handle.await;
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_uncontended_round, bench_fan_out);
criterion_main!(benches);
