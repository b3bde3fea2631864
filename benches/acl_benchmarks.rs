//! ACL decision benchmarks
//!
//! Forward authorization and reverse search against stores of increasing size.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rustacl::acl::{
    AclManager, InMemoryAclStorage, ObjectType, ResourceDescriptor, ReverseSearchOptions, Rights,
};
use rustacl::metrics::AclMetrics;
use rustacl::Config;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Spread `count` distinct rules over 100 users and 20 groups
fn populated_manager(count: u32) -> AclManager {
    let manager = AclManager::new(
        &Config::default(),
        Arc::new(InMemoryAclStorage::new()),
        AclMetrics::new().unwrap(),
    );
    for i in 0..count {
        let rule = match i % 4 {
            0 => format!("#{} VM/#{} USE *", i % 100, i),
            1 => format!("@{} VM/@{} USE+MANAGE *", i % 20, i),
            2 => format!("#{} DATASTORE+HOST/%{} USE *", i % 100, i),
            _ => format!("#{} IMAGE/#{} ADMIN #{}", i % 100, i, i % 3),
        };
        manager.add_rule_spec(&rule.parse().unwrap()).unwrap();
    }
    manager
}

fn authorize_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("acl_authorize");
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(1));

    let groups: BTreeSet<u32> = [1, 5].into_iter().collect();
    for size in [100, 1_000, 10_000].iter() {
        let manager = populated_manager(*size);
        let vm = ResourceDescriptor::new(404, ObjectType::Vm).with_group(1).with_clusters([1, 2]);

        group.bench_with_input(BenchmarkId::new("granted", size), size, |b, _| {
            b.iter(|| black_box(manager.authorize(black_box(4), &groups, &vm, Rights::USE)))
        });

        let image = ResourceDescriptor::new(u32::MAX, ObjectType::Image);
        group.bench_with_input(BenchmarkId::new("denied", size), size, |b, _| {
            b.iter(|| black_box(manager.authorize(black_box(1), &groups, &image, Rights::ADMIN)))
        });
    }

    group.finish();
}

fn reverse_search_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("acl_reverse_search");
    group.measurement_time(Duration::from_secs(5));

    let groups: BTreeSet<u32> = [1, 5].into_iter().collect();
    for size in [100, 1_000, 10_000].iter() {
        let manager = populated_manager(*size);
        group.bench_with_input(BenchmarkId::new("vm_use", size), size, |b, _| {
            b.iter(|| {
                black_box(manager.reverse_search(
                    black_box(1),
                    &groups,
                    ObjectType::Vm,
                    Rights::USE,
                    ReverseSearchOptions::default(),
                ))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, authorize_benchmarks, reverse_search_benchmarks);
criterion_main!(benches);
