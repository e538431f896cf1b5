use async_trait::async_trait;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use stages_api::{
    Content, DrainStage, PipelineConfig, PipelineError, Stage, StageIo, StageSet, run_pipeline,
};
use std::hint::black_box;

const NUM_ITEMS: u64 = 100_000;

struct Counter {
    count: u64,
}

#[async_trait]
impl Stage<u64> for Counter {
    async fn run(&mut self, io: &mut StageIo<u64>) -> Result<(), PipelineError> {
        for i in 0..self.count {
            io.put(i).await?;
        }
        Ok(())
    }
}

struct Forward;

#[async_trait]
impl<T: Content> Stage<T> for Forward {
    async fn run(&mut self, io: &mut StageIo<T>) -> Result<(), PipelineError> {
        let (inbound, outbound) = io.split();
        let mut items = inbound.items();
        while let Some(item) = items.next().await? {
            outbound.put(item).await?;
        }
        Ok(())
    }
}

struct BatchForward {
    minimum_size: usize,
}

#[async_trait]
impl<T: Content> Stage<T> for BatchForward {
    async fn run(&mut self, io: &mut StageIo<T>) -> Result<(), PipelineError> {
        let (inbound, outbound) = io.split();
        let mut batches = inbound.batches(self.minimum_size);
        while let Some(batch) = batches.next().await? {
            for item in batch {
                outbound.put(black_box(item)).await?;
            }
        }
        Ok(())
    }
}

async fn run_chain(forwards: usize, config: &PipelineConfig) {
    let mut stages = StageSet::new();
    let mut order = vec![stages.add(Counter { count: NUM_ITEMS })];
    for _ in 0..forwards {
        order.push(stages.add(Forward));
    }
    order.push(stages.add(DrainStage));
    run_pipeline(stages, &order, config).await.unwrap();
}

fn stage_count_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("stage_count");
    group.throughput(Throughput::Elements(NUM_ITEMS));
    group.sample_size(20);

    for forwards in [0, 2, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(forwards), &forwards, |b, &n| {
            let config = PipelineConfig::default();
            b.to_async(&runtime).iter(|| run_chain(n, &config));
        });
    }
    group.finish();
}

fn channel_capacity_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("channel_capacity");
    group.throughput(Throughput::Elements(NUM_ITEMS));
    group.sample_size(20);

    for capacity in [1, 16, 100, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &cap| {
            let config = PipelineConfig::default().with_channel_capacity(cap);
            b.to_async(&runtime).iter(|| run_chain(2, &config));
        });
    }
    group.finish();
}

fn batching_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("batches");
    group.throughput(Throughput::Elements(NUM_ITEMS));
    group.sample_size(20);

    for minimum_size in [1, 50, 500] {
        group.bench_with_input(
            BenchmarkId::from_parameter(minimum_size),
            &minimum_size,
            |b, &size| {
                b.to_async(&runtime).iter(|| async move {
                    let mut stages = StageSet::new();
                    let order = [
                        stages.add(Counter { count: NUM_ITEMS }),
                        stages.add(BatchForward { minimum_size: size }),
                        stages.add(DrainStage),
                    ];
                    run_pipeline(stages, &order, &PipelineConfig::default())
                        .await
                        .unwrap();
                });
            },
        );
    }
    group.finish();
}

fn profiling_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("profiling");
    group.throughput(Throughput::Elements(NUM_ITEMS));
    group.sample_size(20);

    for profiling in [false, true] {
        group.bench_with_input(BenchmarkId::from_parameter(profiling), &profiling, |b, &on| {
            let config = PipelineConfig::default().with_profiling(on);
            b.to_async(&runtime).iter(|| run_chain(2, &config));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    stage_count_benchmark,
    channel_capacity_benchmark,
    batching_benchmark,
    profiling_benchmark
);
criterion_main!(benches);
