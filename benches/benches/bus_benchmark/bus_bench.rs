use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use livebus::{Scope, TopicRegistry};

fn bench_registry_hot_lookup(c: &mut Criterion) {
    let registry = TopicRegistry::new();
    registry.get_or_create::<u64>("chan").unwrap();
    c.bench_function("registry_hot_lookup", |b| {
        b.iter(|| {
            let _ch = black_box(registry.get_or_create::<u64>(black_box("chan")).unwrap());
        })
    });
}

fn bench_registry_many_topics(c: &mut Criterion) {
    let registry = TopicRegistry::new();
    let keys: Vec<String> = (0..1024).map(|i| format!("topic:{i}")).collect();
    for key in &keys {
        registry.get_or_create::<u64>(key).unwrap();
    }
    c.bench_function("registry_lookup_1024_topics", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % keys.len();
            let _ch = black_box(registry.get_or_create::<u64>(&keys[i]).unwrap());
        })
    });
}

fn bench_publish_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");
    for observers in [0_usize, 1, 10] {
        let registry = TopicRegistry::new();
        let channel = registry.get_or_create::<u64>("chan").unwrap();
        let scope = Scope::new();
        for _ in 0..observers {
            channel.observe(&scope, |v| {
                black_box(*v);
            });
        }
        group.bench_with_input(
            BenchmarkId::from_parameter(observers),
            &observers,
            |b, _| {
                let mut v = 0_u64;
                b.iter(|| {
                    v += 1;
                    black_box(channel.publish(v));
                })
            },
        );
    }
    group.finish();
}

fn bench_sticky_attach(c: &mut Criterion) {
    let registry = TopicRegistry::new();
    let channel = registry.get_or_create::<u64>("chan").unwrap();
    channel.publish(42);
    c.bench_function("sticky_attach_and_end", |b| {
        b.iter(|| {
            let scope = Scope::new();
            channel.observe_sticky(&scope, |v| {
                black_box(*v);
            });
            scope.end();
        })
    });
}

criterion_group!(
    benches,
    bench_registry_hot_lookup,
    bench_registry_many_topics,
    bench_publish_fan_out,
    bench_sticky_attach
);
criterion_main!(benches);
