use std::hint::black_box;

use core_search::{FindStep, SearchPar, TextFinder};
use core_text::Document;
use criterion::{Criterion, criterion_group, criterion_main};

fn synthetic_log(lines: usize) -> Document {
    let mut text = String::with_capacity(lines * 40);
    for i in 0..lines {
        if i % 97 == 0 {
            text.push_str(&format!("{i:08} ERROR frame sync lost\n"));
        } else {
            text.push_str(&format!("{i:08} debug payload sample data\n"));
        }
    }
    Document::from_str(&text)
}

fn count_matches(doc: &Document, par: &SearchPar) -> usize {
    let mut finder = TextFinder::new(doc, par, true, 0);
    let mut count = 0;
    loop {
        match finder.find_next(doc) {
            FindStep::Match(_) => count += 1,
            FindStep::Yield { .. } => {}
            FindStep::Done => return count,
        }
    }
}

fn bench_finder(c: &mut Criterion) {
    let doc = synthetic_log(100_000);
    let substr = SearchPar::new("ERROR", false, true);
    let regex = SearchPar::new(r"ERROR \w+ sync", true, true);

    c.bench_function("finder_substring_100k", |b| {
        b.iter(|| black_box(count_matches(&doc, &substr)))
    });
    c.bench_function("finder_regex_100k", |b| {
        b.iter(|| black_box(count_matches(&doc, &regex)))
    });
}

criterion_group!(benches, bench_finder);
criterion_main!(benches);
