use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{Duration as TimeDelta, Utc};
use helpline_core::{AccountSid, ContactId, ContactSnapshot, ConversationMediaId};
use helpline_infra::jobs::{
    DueJobSelector, DuePolicy, InMemoryJobStore, JobPublisher, NewContactJob,
};
use helpline_queue::InMemoryJobQueue;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Store with `jobs` pending transcript jobs spread over 100 contacts, every
/// second one already attempted within the retry interval.
fn seeded_store(jobs: usize) -> Arc<InMemoryJobStore> {
    let account = AccountSid::new("AC-bench").unwrap();
    let store = InMemoryJobStore::arc();
    for contact in 0..100 {
        store.contacts().insert_contact(
            ContactSnapshot {
                id: ContactId::new(contact),
                account_sid: account.clone(),
                task_id: Some(format!("WT{contact}")),
                channel_sid: Some("CH-bench".to_string()),
                service_sid: Some("IS-bench".to_string()),
                twilio_worker_id: None,
                time_of_contact: None,
            },
            Vec::new(),
        );
    }

    let now = Utc::now();
    for i in 0..jobs {
        let mut job = NewContactJob::retrieve_transcript(
            account.clone(),
            ContactId::new((i % 100) as i64),
            ConversationMediaId::new(i as i64),
        )
        .into_job(now - TimeDelta::hours(1));
        if i % 2 == 1 {
            job.last_attempt = Some(now - TimeDelta::seconds(30));
            job.number_of_attempts = 1;
        }
        store.insert_raw(job);
    }
    store
}

fn bench_due_selection(c: &mut Criterion) {
    let rt = runtime();
    let selector = DueJobSelector::new(DuePolicy::default());
    let mut group = c.benchmark_group("due_selection");

    for jobs in [100usize, 1_000, 10_000].iter() {
        let store = seeded_store(*jobs);
        group.throughput(Throughput::Elements(*jobs as u64));
        group.bench_with_input(BenchmarkId::from_parameter(jobs), jobs, |b, _| {
            b.iter(|| {
                let due = rt.block_on(selector.select(&store, Utc::now())).unwrap();
                black_box(due.len())
            });
        });
    }
    group.finish();
}

fn bench_publish_pass(c: &mut Criterion) {
    let rt = runtime();
    let selector = DueJobSelector::new(DuePolicy::default());
    let mut group = c.benchmark_group("publish_pass");

    for concurrency in [1usize, 8, 32].iter() {
        group.throughput(Throughput::Elements(500));
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            concurrency,
            |b, &concurrency| {
                b.iter_batched(
                    || {
                        let store = seeded_store(1_000);
                        let due = rt.block_on(selector.select(&store, Utc::now())).unwrap();
                        (store, due)
                    },
                    |(store, due)| {
                        let publisher =
                            JobPublisher::new(store, Arc::new(InMemoryJobQueue::new()), concurrency);
                        black_box(rt.block_on(publisher.publish_due_jobs(due)))
                    },
                    criterion::BatchSize::LargeInput,
                );
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_due_selection, bench_publish_pass);
criterion_main!(benches);
