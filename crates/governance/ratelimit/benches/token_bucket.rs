use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use governance_policy::{RateLimitPolicy, SlidingWindow};
use governance_ratelimit::{RateLimiter, TokenBucketLimiter};

fn policy() -> RateLimitPolicy {
    RateLimitPolicy {
        name: "bench".into(),
        sliding_windows: vec![SlidingWindow {
            threshold: 1_000_000,
            time_window_in_ms: 1_000,
        }],
        ..RateLimitPolicy::default()
    }
}

fn try_acquire(c: &mut Criterion) {
    let limiter = TokenBucketLimiter::from_policy(policy()).unwrap();
    c.bench_function("token_bucket_try_acquire", |b| {
        b.iter(|| black_box(limiter.acquire(black_box(1), Duration::ZERO)))
    });
}

criterion_group!(benches, try_acquire);
criterion_main!(benches);
