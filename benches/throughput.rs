//! Data flow benchmarks: raw pad pushes and whole pipelines.

use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use trellis::elements::{FakeSink, FakeSrc, Identity};
use trellis::prelude::*;

/// A source whose pad is pushed by hand.
struct BenchSrc;

impl ElementImpl for BenchSrc {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::src(Caps::new_any())]
    }
}

/// A sink that only counts bytes.
#[derive(Default)]
struct CountingSink {
    bytes: AtomicU64,
}

impl ElementImpl for CountingSink {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::sink(Caps::new_any())]
    }

    fn chain(&self, _element: &Element, _pad: &Pad, buffer: Buffer) -> FlowResult {
        self.bytes.fetch_add(buffer.len() as u64, Ordering::Relaxed);
        Ok(FlowSuccess::Ok)
    }
}

fn paused_chain(with_identity: bool) -> (Vec<Element>, Pad) {
    let src = Element::new("src", BenchSrc);
    let sink = Element::new("sink", CountingSink::default());
    let mut elements = vec![src.clone()];
    if with_identity {
        elements.push(Element::new("id", Identity::default()));
    }
    elements.push(sink);
    let refs: Vec<&Element> = elements.iter().collect();
    Element::link_many(&refs).unwrap();
    for element in elements.iter().rev() {
        element.set_state(State::Paused).unwrap();
    }
    let pad = src.static_pad("src").unwrap();
    (elements, pad)
}

fn bench_pad_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("pad_push");

    for size in [64usize, 4096, 64 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        for (label, with_identity) in [("direct", false), ("identity", true)] {
            group.bench_with_input(BenchmarkId::new(label, size), &size, |b, &size| {
                let (elements, pad) = paused_chain(with_identity);
                let buffer = Buffer::with_size(size);
                b.iter(|| black_box(pad.push(buffer.clone())));
                for element in &elements {
                    element.set_state(State::Null).unwrap();
                }
            });
        }
    }

    group.finish();
}

fn bench_fakesrc_to_fakesink(c: &mut Criterion) {
    let mut group = c.benchmark_group("fakesrc_to_fakesink");
    group.sample_size(20);

    for count in [100i64, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let pipeline = Pipeline::new("bench");
            let src = Element::new("src", FakeSrc::default());
            let sink = Element::new("sink", FakeSink::default());
            src.set_property("num-buffers", count).unwrap();
            src.set_property("size", 1024u64).unwrap();
            pipeline.add_many(&[&src, &sink]).unwrap();
            src.link(&sink).unwrap();
            let bus = pipeline.bus();

            b.iter(|| {
                pipeline.set_state(State::Playing).unwrap();
                let done = bus.timed_pop_filtered(
                    Some(Duration::from_secs(30)),
                    &[MessageType::Eos, MessageType::Error],
                );
                pipeline.set_state(State::Null).unwrap();
                black_box(done)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pad_push, bench_fakesrc_to_fakesink);
criterion_main!(benches);
