use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::{Value as JsonValue, json};

use courier_core::RetrySpec;
use courier_infra::jobs::{JobDefinition, JobModule, ModuleGraph};
use courier_infra::workers::{QueueRecord, WorkerEntryPoint};

fn entry_point() -> WorkerEntryPoint {
    WorkerEntryPoint::new(|| {
        ModuleGraph::new().module(
            JobModule::new("bench")
                .job(JobDefinition::from_fn("noop", |_, _| async { Ok(()) }))
                .job(
                    JobDefinition::from_fn("sum", |payload: JsonValue, _| async move {
                        let total: i64 = payload["values"]
                            .as_array()
                            .map(|v| v.iter().filter_map(JsonValue::as_i64).sum::<i64>())
                            .unwrap_or_default();
                        black_box(total);
                        Ok(())
                    })
                    .with_retry(RetrySpec::attempts(3)),
                ),
        )
    })
}

fn records(count: usize) -> Vec<JsonValue> {
    (0..count)
        .map(|i| {
            let (job, payload) = if i % 2 == 0 {
                ("noop", json!(null))
            } else {
                ("sum", json!({"values": [1, 2, 3, i]}))
            };
            let body = json!({"jobName": job, "payload": payload}).to_string();
            serde_json::to_value(QueueRecord::new(format!("m-{i}"), body).with_receive_count(1))
                .expect("record serializes")
        })
        .collect()
}

fn bench_batch_processing(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let entry = entry_point();
    rt.block_on(entry.warm_up()).expect("application builds");

    let mut group = c.benchmark_group("batch_processing");
    for batch_size in [1usize, 10, 100].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &size| {
                let batch = records(size);
                b.to_async(&rt).iter(|| async {
                    let response = entry.handle_batch(batch.clone()).await.expect("batch runs");
                    black_box(response);
                });
            },
        );
    }
    group.finish();
}

fn bench_malformed_records(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let entry = entry_point();
    rt.block_on(entry.warm_up()).expect("application builds");

    let mut batch = records(9);
    batch.push(json!({"messageId": "bad", "body": "{not json"}));

    c.bench_function("batch_with_malformed_record", |b| {
        b.to_async(&rt).iter(|| async {
            let response = entry.handle_batch(batch.clone()).await.expect("batch runs");
            black_box(response);
        });
    });
}

criterion_group!(benches, bench_batch_processing, bench_malformed_records);
criterion_main!(benches);
