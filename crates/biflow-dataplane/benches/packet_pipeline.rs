//! Packet Pipeline Benchmarks

use biflow_common::PortId;
use biflow_dataplane::{parse, Forwarder, ForwarderConfig, FrameBuilder};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::net::Ipv4Addr;

const PORT_A: PortId = PortId(6);
const PORT_B: PortId = PortId(7);

fn bench_parse(c: &mut Criterion) {
    let udp = FrameBuilder::udp(Ipv4Addr::new(10, 0, 0, 5), 40000, Ipv4Addr::new(10, 0, 0, 3), 53).build();
    let tcp = FrameBuilder::tcp(Ipv4Addr::new(192, 168, 1, 1), 12345, Ipv4Addr::new(10, 0, 0, 1), 443).build();

    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Elements(1));
    group.bench_function("udp", |b| b.iter(|| black_box(parse(black_box(&udp)))));
    group.bench_function("tcp", |b| b.iter(|| black_box(parse(black_box(&tcp)))));
    group.finish();
}

fn bench_forwarder(c: &mut Criterion) {
    let forwarder = Forwarder::new(ForwarderConfig::default());
    let out = FrameBuilder::udp(Ipv4Addr::new(10, 0, 0, 5), 40000, Ipv4Addr::new(10, 0, 0, 3), 53)
        .frame_size(1500, b"sal")
        .build();
    let back = FrameBuilder::udp(Ipv4Addr::new(10, 0, 0, 3), 53, Ipv4Addr::new(10, 0, 0, 5), 40000).build();
    let stray = FrameBuilder::udp(Ipv4Addr::new(9, 9, 9, 9), 53, Ipv4Addr::new(10, 0, 0, 5), 1).build();
    forwarder.process(PORT_A, &out);

    let mut group = c.benchmark_group("forwarder");
    group.throughput(Throughput::Elements(1));
    group.bench_function("inside_known_flow", |b| {
        b.iter(|| black_box(forwarder.process(PORT_A, black_box(&out))))
    });
    group.bench_function("outside_hit", |b| {
        b.iter(|| black_box(forwarder.process(PORT_B, black_box(&back))))
    });
    group.bench_function("outside_miss", |b| {
        b.iter(|| black_box(forwarder.process(PORT_B, black_box(&stray))))
    });
    group.finish();
}

criterion_group!(benches, bench_parse, bench_forwarder);
criterion_main!(benches);
