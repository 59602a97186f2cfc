use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use layers::{
    dtypes::PrecisionPolicy,
    mlp::{FeedForward, FeedForwardConfig},
    norm::{LayerNorm, NormConfig},
};

fn bench_norm_and_feed_forward(c: &mut Criterion) {
    let device = Device::Cpu;
    let batch = 8usize;
    let seq = 32usize;
    let hidden_sizes = &[256usize, 512, 1024];
    let dtypes = &[DType::F16, DType::BF16, DType::F32];

    for &dtype in dtypes {
        let mut group = c.benchmark_group(format!("encoder_layers/{dtype:?}"));
        for &hidden in hidden_sizes {
            let input = Tensor::randn(0f32, 1.0, (batch, seq, hidden), &device)
                .expect("input")
                .to_dtype(dtype)
                .expect("cast input");
            let policy = PrecisionPolicy::from_parameter_dtype(dtype);
            let norm = LayerNorm::new(NormConfig::new(hidden), dtype, &device).expect("layer norm");
            let ff = FeedForward::new(FeedForwardConfig::new(hidden, 4 * hidden), 0, dtype, &device)
                .expect("feed forward");

            let elements = (batch * seq * hidden) as u64;
            group.throughput(Throughput::Elements(elements));

            group.bench_with_input(
                BenchmarkId::new("layer_norm", hidden),
                &(norm, input.clone(), policy),
                |b, (norm, input, policy)| {
                    b.iter(|| {
                        let out = norm.forward(black_box(input), policy).expect("forward");
                        black_box(out);
                    });
                },
            );

            group.bench_with_input(
                BenchmarkId::new("feed_forward", hidden),
                &(ff, input),
                |b, (ff, input)| {
                    b.iter(|| {
                        let out = ff.forward(black_box(input)).expect("forward");
                        black_box(out);
                    });
                },
            );
        }
        group.finish();
    }
}

criterion_group!(benches, bench_norm_and_feed_forward);
criterion_main!(benches);
