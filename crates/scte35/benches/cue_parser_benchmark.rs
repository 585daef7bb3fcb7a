use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

const SPLICE_INSERT_B64: &str =
    "/DAvAAAAAAAA///wFAVIAACPf+/+c2nALv4AUsz1AAAAAAAKAAhDVUVJAAABNWLbowo=";
const TIME_SIGNAL_HEX: &str = "0xfc3034000000000000fffff00506fe72bd0050001e021c435545494800008e7fcf0001a599b00808000000002ca0a18a3402009ac9d17e";

fn benchmark_cue_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Cue Parsing");

    let section = scte35::decode_payload(SPLICE_INSERT_B64).unwrap();
    group.bench_function("splice_insert (raw section)", |b| {
        b.iter(|| scte35::parse_section(black_box(&section)).unwrap())
    });

    group.bench_function("splice_insert (base64)", |b| {
        b.iter(|| scte35::parse_payload(black_box(SPLICE_INSERT_B64)).unwrap())
    });

    group.bench_function("time_signal + segmentation (hex)", |b| {
        b.iter(|| scte35::parse_payload(black_box(TIME_SIGNAL_HEX)).unwrap())
    });

    let daterange = format!(
        r#"#EXT-X-DATERANGE:ID="ad-1",START-DATE="2026-03-01T12:00:00.000Z",PLANNED-DURATION=30,SCTE35-OUT={TIME_SIGNAL_HEX}"#
    );
    group.bench_function("DATERANGE tag", |b| {
        b.iter(|| scte35::parse_tag_line(black_box(&daterange)).unwrap())
    });

    group.bench_function("CUE-OUT tag", |b| {
        b.iter(|| scte35::parse_tag_line(black_box("#EXT-X-CUE-OUT:DURATION=30.000")).unwrap())
    });

    let ctx = scte35::ValidationContext::new(chrono::Utc::now());
    let signal = scte35::parse_payload(TIME_SIGNAL_HEX).unwrap();
    group.bench_function("validate", |b| {
        b.iter(|| scte35::validate(black_box(&signal), &ctx))
    });

    group.finish();
}

criterion_group!(benches, benchmark_cue_parsing);
criterion_main!(benches);
