//! Caps algebra and link-time negotiation benchmarks.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use trellis::caps::{FieldValue, FixationHints, FixationStrategy, PreferredFixation};
use trellis::prelude::*;

fn raw_audio() -> Caps {
    Caps::builder("audio/x-raw")
        .field("format", FieldValue::list(["S16LE", "S32LE", "F32LE"]))
        .field("rate", 8000..=192_000)
        .field("channels", 1..=8)
        .build()
}

fn device_audio() -> Caps {
    Caps::builder("audio/x-raw")
        .field("format", FieldValue::list(["F32LE", "S16LE"]))
        .field("rate", FieldValue::list([44100, 48000, 96000]))
        .field("channels", 2)
        .build()
}

fn raw_video() -> Caps {
    Caps::builder("video/x-raw")
        .field("width", 1..=4096)
        .field("height", 1..=2160)
        .field("framerate", Fraction::new(0, 1)..=Fraction::new(120, 1))
        .build()
}

fn bench_intersect(c: &mut Criterion) {
    let mut group = c.benchmark_group("caps_intersect");
    let audio = raw_audio();
    let device = device_audio();
    let mut mixed = raw_video();
    mixed.merge(raw_audio());

    group.bench_function("audio_range_with_list", |b| {
        b.iter(|| black_box(audio.intersect(&device)))
    });
    group.bench_function("multi_structure", |b| {
        b.iter(|| black_box(mixed.intersect(&device)))
    });
    group.bench_function("disjoint", |b| {
        b.iter(|| black_box(raw_video().can_intersect(&device)))
    });
    group.finish();
}

fn bench_fixate(c: &mut Criterion) {
    let mut group = c.benchmark_group("caps_fixate");
    let common = raw_audio().intersect(&device_audio());
    let ideal = Caps::builder("audio/x-raw").field("rate", 48000).build();
    let strategy = PreferredFixation;

    group.bench_function("defaults", |b| {
        b.iter(|| black_box(strategy.fixate(&common, &FixationHints::default())))
    });
    group.bench_function("ideal", |b| {
        let hints = FixationHints {
            ideal: Some(&ideal),
            ..FixationHints::default()
        };
        b.iter(|| black_box(strategy.fixate(&common, &hints)))
    });
    group.finish();
}

struct Templated {
    caps: Caps,
    direction: PadDirection,
}

impl ElementImpl for Templated {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        match self.direction {
            PadDirection::Src => vec![PadTemplate::src(self.caps.clone())],
            PadDirection::Sink => vec![PadTemplate::sink(self.caps.clone())],
        }
    }
}

fn bench_link(c: &mut Criterion) {
    let src = Element::new(
        "src",
        Templated {
            caps: raw_audio(),
            direction: PadDirection::Src,
        },
    );
    let sink = Element::new(
        "sink",
        Templated {
            caps: device_audio(),
            direction: PadDirection::Sink,
        },
    );
    let src_pad = src.static_pad("src").unwrap();
    let sink_pad = sink.static_pad("sink").unwrap();

    c.bench_function("pad_link_unlink", |b| {
        b.iter(|| {
            src_pad.link(&sink_pad).unwrap();
            black_box(src_pad.unlink(&sink_pad))
        })
    });
}

criterion_group!(benches, bench_intersect, bench_fixate, bench_link);
criterion_main!(benches);
