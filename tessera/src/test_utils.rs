//! Test utilities for tessera.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{BitBuffer2, Config, CpuDevice, Engine};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Engine on the host device with the given configuration.
pub fn cpu_engine(config: Config) -> Engine {
    Engine::with_device(Box::new(CpuDevice::new()), config)
}

/// Host configuration forcing `chunks` chunks.
pub fn chunked_config(chunks: usize) -> Config {
    Config {
        force_chunks: Some(chunks),
        ..Config::cpu()
    }
}

/// Mask with each pixel set independently with probability `density`.
pub fn random_mask(width: usize, height: usize, density: f64, seed: u64) -> BitBuffer2 {
    let mut rng = StdRng::seed_from_u64(seed);
    BitBuffer2::from_fn(width, height, |_, _| rng.random_bool(density))
}

/// Union of filled rectangles given as `(x0, y0, x1, y1)`, max exclusive.
pub fn rect_mask(
    width: usize,
    height: usize,
    rects: &[(usize, usize, usize, usize)],
) -> BitBuffer2 {
    BitBuffer2::from_fn(width, height, |x, y| {
        rects
            .iter()
            .any(|&(x0, y0, x1, y1)| (x0..x1).contains(&x) && (y0..y1).contains(&y))
    })
}

/// Disk of `radius` around `(cx, cy)` sampled at pixel centers.
pub fn disk_mask(width: usize, height: usize, cx: f32, cy: f32, radius: f32) -> BitBuffer2 {
    BitBuffer2::from_fn(width, height, |x, y| {
        let dx = x as f32 + 0.5 - cx;
        let dy = y as f32 + 0.5 - cy;
        dx * dx + dy * dy < radius * radius
    })
}

/// Checks that every pair of 4-adjacent foreground pixels shares a label and
/// that no two separate regions share one.
pub fn assert_valid_labeling(mask: &BitBuffer2, labels: &crate::LabelImage) {
    let (w, h) = (mask.width(), mask.height());
    for y in 0..h {
        for x in 0..w {
            let label = labels[(x, y)];
            assert_eq!(
                label != 0,
                mask.get_xy(x, y),
                "foreground/label disagreement at ({x}, {y})"
            );
            if label == 0 {
                continue;
            }
            if x + 1 < w && mask.get_xy(x + 1, y) {
                assert_eq!(labels[(x + 1, y)], label, "split at ({x}, {y}) -> right");
            }
            if y + 1 < h && mask.get_xy(x, y + 1) {
                assert_eq!(labels[(x, y + 1)], label, "split at ({x}, {y}) -> down");
            }
        }
    }

    // Flood fill each label from one seed; all pixels with that label must be reached.
    let mut seen = vec![false; w * h];
    let mut seeded = std::collections::HashSet::new();
    for start in 0..w * h {
        let label = labels.labels().pixels()[start];
        if label == 0 || seen[start] {
            continue;
        }
        assert!(
            seeded.insert(label),
            "label {label} used by two separate regions"
        );
        let mut stack = vec![start];
        seen[start] = true;
        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            let mut visit = |nx: usize, ny: usize| {
                let n = ny * w + nx;
                if !seen[n] && labels.labels().pixels()[n] == label {
                    seen[n] = true;
                    stack.push(n);
                }
            };
            if x > 0 {
                visit(x - 1, y);
            }
            if x + 1 < w {
                visit(x + 1, y);
            }
            if y > 0 {
                visit(x, y - 1);
            }
            if y + 1 < h {
                visit(x, y + 1);
            }
        }
    }
}

#[test]
fn test_assert_valid_labeling_accepts_label_mask_output() {
    let mask = rect_mask(8, 4, &[(0, 0, 3, 2), (5, 1, 8, 4)]);
    let mut labels = crate::Buffer2::new_default(8, 4);
    crate::labeling::label_mask(&mask, &mut labels);
    assert_valid_labeling(&mask, &crate::LabelImage::from_buffer(labels));
}

#[test]
#[should_panic(expected = "used by two separate regions")]
fn test_assert_valid_labeling_rejects_shared_label() {
    let mask = rect_mask(5, 1, &[(0, 0, 1, 1), (4, 0, 5, 1)]);
    let labels = crate::Buffer2::new(5, 1, vec![1, 0, 0, 0, 1]);
    assert_valid_labeling(&mask, &crate::LabelImage::from_buffer(labels));
}
