use chrono::Utc;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ki_ledger::{Category, Engine, EntryRequest, Points, TxStatus, UserId};

/// Generates valid entry sequences for benchmarking.
///
/// Pattern per user (repeating):
/// 1. Earn 100
/// 2. Transfer 50 to the next user
/// 3. Spend 30
///
/// Every user starts with an earning, so debits never exceed the balance.
pub struct EntryGenerator {
    users: Vec<UserId>,
    entries_per_user: u32,
    current_user: usize,
    current_step: u32,
}

impl EntryGenerator {
    pub fn new(num_users: usize, entries_per_user: u32) -> Self {
        Self {
            users: (0..num_users).map(|_| UserId::new()).collect(),
            entries_per_user,
            current_user: 0,
            current_step: 0,
        }
    }
}

impl Iterator for EntryGenerator {
    type Item = EntryRequest;

    fn next(&mut self) -> Option<Self::Item> {
        let user = *self.users.get(self.current_user)?;
        let peer = self.users[(self.current_user + 1) % self.users.len()];

        let entry = match self.current_step % 3 {
            0 => EntryRequest::earned(user, Points::new(100), Category::Daily, "daily"),
            // a single user pays the platform instead of themselves
            1 if peer == user => {
                EntryRequest::spent(user, Points::new(50), Category::Event, "event")
            }
            1 => EntryRequest::transfer(user, peer, Points::new(50), "thanks"),
            _ => EntryRequest::spent(user, Points::new(30), Category::Content, "boost"),
        };

        self.current_step += 1;

        // Move to next user after entries_per_user entries
        if self.current_step >= self.entries_per_user {
            self.current_step = 0;
            self.current_user += 1;
        }

        Some(entry)
    }
}

/// Apply all entries of `generator` to a fresh engine
fn replay(generator: impl Iterator<Item = EntryRequest>) -> Engine {
    let mut engine = Engine::new();
    let at = Utc::now();
    for entry in generator {
        let _ = black_box(engine.apply(entry, at));
    }
    engine
}

fn bench_earnings_only(c: &mut Criterion) {
    let mut group = c.benchmark_group("earnings");

    for count in [10_000u32, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let user = UserId::new();
                let mut engine = Engine::new();
                let at = Utc::now();
                for _ in 0..count {
                    let entry =
                        EntryRequest::earned(user, Points::new(10), Category::Daily, "daily");
                    let _ = black_box(engine.apply(entry, at));
                }
                engine
            });
        });
    }

    group.finish();
}

fn bench_mixed_entries(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed");

    for (users, per_user) in [(100, 1_000), (1_000, 100), (10, 10_000)] {
        let label = format!("{}u_{}e", users, per_user);
        group.bench_with_input(
            BenchmarkId::from_parameter(&label),
            &(users, per_user),
            |b, &(users, per_user)| {
                b.iter(|| replay(EntryGenerator::new(users, per_user)));
            },
        );
    }

    group.finish();
}

fn bench_replayed_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("replayed_keys");

    // every entry is submitted twice, as a client retrying a lost response
    group.bench_function("100k_retry_all", |b| {
        b.iter(|| {
            replay(
                EntryGenerator::new(100, 500).flat_map(|entry| [entry.clone(), entry]),
            )
        });
    });

    group.finish();
}

fn bench_escrow(c: &mut Criterion) {
    let mut group = c.benchmark_group("escrow");
    group.sample_size(10);

    group.bench_function("10k_hold_and_settle", |b| {
        b.iter(|| {
            let payer = UserId::new();
            let provider = UserId::new();
            let mut engine = Engine::new();
            let at = Utc::now();
            let _ = engine.apply(
                EntryRequest::earned(payer, Points::new(1_000_000), Category::Daily, "grant"),
                at,
            );
            for step in 0..10_000u32 {
                let entry =
                    EntryRequest::transfer(payer, provider, Points::new(5), "job").pending();
                let Ok(receipt) = engine.apply(entry, at) else {
                    continue;
                };
                let status = if step % 4 == 0 {
                    TxStatus::Refunded
                } else {
                    TxStatus::Completed
                };
                let _ = black_box(engine.settle(receipt.transaction.id, payer, status));
            }
            engine
        });
    });

    group.finish();
}

fn bench_large_scale(c: &mut Criterion) {
    let mut group = c.benchmark_group("large_scale");
    group.sample_size(10); // Fewer samples for large benchmarks

    group.bench_function("100k_multi_user", |b| {
        b.iter(|| replay(EntryGenerator::new(100, 1_000)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_earnings_only,
    bench_mixed_entries,
    bench_replayed_keys,
    bench_escrow,
    bench_large_scale,
);

criterion_main!(benches);
