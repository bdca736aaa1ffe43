//! Throughput of self-attention at ViT-like sequence lengths.
//! Run with: `cargo bench -p attention throughput`

use attention::{AttentionConfig, SelfAttentionBlock};
use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use layers::ParameterSet;
use rand::{rngs::StdRng, SeedableRng};

fn bench_self_attention(c: &mut Criterion) {
    let device = Device::Cpu;
    let batch = 4usize;
    let channels = 384usize;

    for talking_heads in [false, true] {
        let mut group = c.benchmark_group(format!("self_attention/talking_heads={talking_heads}"));
        for seq_len in [65usize, 197] {
            let block = SelfAttentionBlock::new(AttentionConfig {
                talking_heads,
                ..AttentionConfig::new(6)
            })
            .expect("attention config");
            let params = ParameterSet::initialize(DType::F32, &device, |vb| block.init(channels, vb))
                .expect("attention init");
            let input = Tensor::randn(0f32, 1.0, (batch, seq_len, channels), &device)
                .expect("input");
            group.throughput(Throughput::Elements((batch * seq_len * channels) as u64));
            group.bench_with_input(BenchmarkId::from_parameter(seq_len), &input, |b, input| {
                let mut rng = StdRng::seed_from_u64(0);
                b.iter(|| {
                    let out = block
                        .forward(params.params(), black_box(input), false, &mut rng)
                        .expect("forward");
                    black_box(out);
                });
            });
        }
        group.finish();
    }
}

criterion_group!(benches, bench_self_attention);
criterion_main!(benches);
