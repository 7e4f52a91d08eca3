//! Compound index decoding and query token benchmarks.
//!
//! Run with:
//!   cargo bench --bench index_formatting

use chrono::DateTime;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use smsgw_message_store::{Direction, IndexFormat, format_row, query_token};
use smsgw_storage::MatchRule;
use smsgw_types::{format_timestamp, to_reverse_timestamp};

fn terms(count: usize, reverse: bool) -> Vec<(String, String)> {
    (0..count)
        .map(|i| {
            let ts = DateTime::from_timestamp(1_700_000_000 + i as i64, 0)
                .unwrap()
                .naive_utc();
            let stamp = if reverse {
                to_reverse_timestamp(&ts).unwrap()
            } else {
                format_timestamp(&ts)
            };
            (format!("m{i}"), format!("batch${stamp}$+2782{i:07}"))
        })
        .collect()
}

fn bench_format_row(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_row");
    for (name, format, reverse) in [
        ("timestamp_and_value", IndexFormat::TimestampAndValue, false),
        ("reverse_timestamp", IndexFormat::ReverseTimestampAndValue, true),
        ("timestamp_only", IndexFormat::TimestampOnly, false),
    ] {
        let page = terms(1000, reverse);
        group.throughput(Throughput::Elements(page.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &page, |b, page| {
            b.iter(|| {
                for (key, term) in page {
                    black_box(format_row(format, "batch", key, Some(term)).unwrap());
                }
            });
        });
    }
    group.finish();
}

fn bench_query_token(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_token");
    for count in [1, 10] {
        let rules: Vec<MatchRule> = (0..count)
            .map(|i| MatchRule::new("msg.content", &format!("keyword{i}"), "i"))
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(count), &rules, |b, rules| {
            b.iter(|| black_box(query_token(Direction::Outbound, rules)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_format_row, bench_query_token);
criterion_main!(benches);
