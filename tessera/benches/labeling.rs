use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tessera::{BitBuffer2, Buffer2, Config, CpuDevice, Engine};

fn random_mask(size: usize, density: f64) -> BitBuffer2 {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    BitBuffer2::from_fn(size, size, |_, _| rng.random_bool(density))
}

fn cpu_engine(force_chunks: Option<usize>) -> Engine {
    let config = Config {
        force_chunks,
        ..Config::cpu()
    };
    Engine::with_device(Box::new(CpuDevice::new()), config)
}

fn bench_connected_components(c: &mut Criterion) {
    let mut group = c.benchmark_group("connected_components");
    group.sample_size(20);

    for &size in &[512usize, 2048] {
        let mask = random_mask(size, 0.55);
        for &chunks in &[1usize, 16] {
            let mut engine = cpu_engine(Some(chunks));
            group.bench_with_input(
                BenchmarkId::new(format!("{chunks}_chunks"), size),
                &mask,
                |b, mask| b.iter(|| black_box(engine.connected_components(mask).unwrap())),
            );
        }
    }
    group.finish();
}

fn bench_largest_area(c: &mut Criterion) {
    let size = 1024;
    let image = Buffer2::from_fn(size, size, |x, y| {
        let dx = x as f32 - size as f32 / 2.0;
        let dy = y as f32 - size as f32 / 2.0;
        (1.0 - (dx * dx + dy * dy).sqrt() / size as f32).max(0.0)
    });
    let mut engine = cpu_engine(None);

    c.bench_function("largest_area_connected_components_1024", |b| {
        b.iter(|| {
            black_box(
                engine
                    .largest_area_connected_components(&image, None, 20.0)
                    .unwrap(),
            )
        })
    });
}

criterion_group!(benches, bench_connected_components, bench_largest_area);
criterion_main!(benches);
