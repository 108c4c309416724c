//! Benchmarks for location token minting and verification.
//!
//! Run with `cargo bench -p keyward-token`.

#![allow(clippy::expect_used, missing_docs)]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use keyward_token::{LocationTokenService, TokenConfig};

fn service() -> LocationTokenService {
    let config = TokenConfig::builder()
        .secret("benchmark-secret-0123456789abcdef".to_owned())
        .build()
        .expect("valid config");
    LocationTokenService::new(&config).expect("valid service")
}

fn bench_mint(c: &mut Criterion) {
    let service = service();
    c.bench_function("mint", |b| b.iter(|| service.mint(black_box("Block A")).expect("mint")));
}

fn bench_verify(c: &mut Criterion) {
    let service = service();
    let token = service.mint("Block A").expect("mint").token;

    let mut group = c.benchmark_group("verify");
    group.bench_function("valid", |b| b.iter(|| service.verify(black_box(&token)).expect("verify")));

    let (payload, _) = token.split_once('.').expect("two parts");
    let forged = format!("{payload}.AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
    group.bench_function("forged_signature", |b| {
        b.iter(|| service.verify(black_box(&forged)).is_err())
    });
    group.finish();
}

criterion_group!(benches, bench_mint, bench_verify);
criterion_main!(benches);
