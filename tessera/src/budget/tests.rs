use super::*;
use crate::device::CpuDevice;

#[test]
fn test_estimate_never_underestimates() {
    for &(pixels, element_size, overhead) in &[
        (1u64, 1u64, 18.0f64),
        (10_000, 1, 18.0),
        (4096 * 4096, 4, 1.1),
        (12_345_678, 4, 1.1),
    ] {
        let raw = pixels as f64 * element_size as f64 * overhead;
        let estimated = estimate(pixels, element_size, overhead, 0.1);
        assert!(
            estimated as f64 >= raw,
            "estimate {} below raw workspace {} for {} pixels",
            estimated,
            raw,
            pixels
        );
    }
}

#[test]
fn test_estimate_applies_margin() {
    assert_eq!(estimate(1000, 4, 1.0, 0.0), 4000);
    assert_eq!(estimate(1000, 4, 1.0, 0.5), 6000);
    assert_eq!(estimate(0, 4, 1.1, 0.1), 0);
}

#[test]
fn test_labeling_estimate_counts_halo() {
    let padded = (10 + 2) * (10 + 2);
    assert_eq!(labeling_estimate(10, 10, 0.0), padded as u64 * 18);
}

#[test]
fn test_decide_fits_in_one_chunk() {
    assert_eq!(decide(100, 100).unwrap(), 1);
    assert_eq!(decide(0, 0).unwrap(), 1);
    assert_eq!(decide(1, u64::MAX).unwrap(), 1);
}

#[test]
fn test_decide_picks_smallest_power_of_four() {
    assert_eq!(decide(200, 100).unwrap(), 4);
    assert_eq!(decide(400, 100).unwrap(), 4);
    assert_eq!(decide(401, 100).unwrap(), 16);
    assert_eq!(decide(1600, 100).unwrap(), 16);
    assert_eq!(decide(1601, 100).unwrap(), 64);
}

#[test]
fn test_decide_without_free_memory_fails() {
    let err = decide(10, 0).unwrap_err();
    assert!(matches!(
        err,
        DeviceError::InsufficientMemory {
            required: 10,
            free: 0
        }
    ));
}

#[test]
fn test_chunks_per_dim() {
    assert_eq!(chunks_per_dim(0), 1);
    assert_eq!(chunks_per_dim(1), 1);
    assert_eq!(chunks_per_dim(3), 1);
    assert_eq!(chunks_per_dim(4), 2);
    assert_eq!(chunks_per_dim(9), 3);
    assert_eq!(chunks_per_dim(15), 3);
    assert_eq!(chunks_per_dim(16), 4);
    assert_eq!(chunks_per_dim(1 << 20), 1 << 10);
}

/// Every pixel must belong to exactly one chunk.
fn assert_exact_tiling(rows: usize, cols: usize, chunks: &[Chunk]) {
    let mut cover = vec![0u8; rows * cols];
    for chunk in chunks {
        assert!(chunk.width() > 0 && chunk.height() > 0, "empty chunk {:?}", chunk);
        for y in chunk.y_min..chunk.y_max {
            for x in chunk.x_min..chunk.x_max {
                cover[y * cols + x] += 1;
            }
        }
    }
    assert!(
        cover.iter().all(|&c| c == 1),
        "{}x{} image not tiled exactly by {} chunks",
        cols,
        rows,
        chunks.len()
    );
}

#[test]
fn test_partition_single_chunk_covers_image() {
    let chunks = partition(7, 5, 1);
    assert_eq!(
        chunks,
        vec![Chunk {
            index: 0,
            x_min: 0,
            x_max: 5,
            y_min: 0,
            y_max: 7
        }]
    );
}

#[test]
fn test_partition_nine_chunks_is_three_by_three() {
    let chunks = partition(100, 100, 9);
    assert_eq!(chunks.len(), 9);
    assert_exact_tiling(100, 100, &chunks);
    assert_eq!((chunks[0].x_min, chunks[0].x_max), (0, 33));
    assert_eq!((chunks[1].x_min, chunks[1].x_max), (33, 66));
    assert_eq!((chunks[2].x_min, chunks[2].x_max), (66, 100));
    assert_eq!((chunks[3].y_min, chunks[3].y_max), (33, 66));
    assert_eq!((chunks[8].y_min, chunks[8].y_max), (66, 100));
}

#[test]
fn test_partition_is_row_major() {
    let chunks = partition(10, 10, 4);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.index, i);
    }
    assert_eq!((chunks[1].x_min, chunks[1].y_min), (5, 0));
    assert_eq!((chunks[2].x_min, chunks[2].y_min), (0, 5));
}

#[test]
fn test_partition_tiles_odd_sizes() {
    for &(rows, cols, n) in &[(1, 1, 1), (3, 7, 4), (17, 5, 16), (101, 99, 64), (2, 1000, 16)] {
        let chunks = partition(rows, cols, n);
        assert_exact_tiling(rows, cols, &chunks);
    }
}

#[test]
fn test_partition_clamps_grid_to_image() {
    let chunks = partition(2, 50, 16);
    assert_eq!(chunks.len(), 4);
    assert_exact_tiling(2, 50, &chunks);

    let chunks = partition(1, 1, 64);
    assert_eq!(chunks.len(), 1);
}

#[test]
fn test_partition_empty_image() {
    assert!(partition(0, 10, 4).is_empty());
    assert!(partition(10, 0, 1).is_empty());
}

#[test]
fn test_chunk_padded_dimensions() {
    let chunk = Chunk {
        index: 0,
        x_min: 4,
        x_max: 10,
        y_min: 2,
        y_max: 5,
    };
    assert_eq!(chunk.width(), 6);
    assert_eq!(chunk.height(), 3);
    assert_eq!(chunk.pixel_count(), 18);
    assert_eq!(chunk.padded_width(), 8);
    assert_eq!(chunk.padded_height(), 5);
}

#[test]
fn test_plan_uses_memory_override() {
    let device = CpuDevice::new();
    let config = Config {
        available_memory: Some(1000),
        ..Config::cpu()
    };
    let chunks = plan(&device, &config, "test", 3000, 0, 100, 100).unwrap();
    assert_eq!(chunks.len(), 4);

    let chunks = plan(&device, &config, "test", 900, 0, 100, 100).unwrap();
    assert_eq!(chunks.len(), 1);
}

#[test]
fn test_plan_forced_chunks_skip_memory_decision() {
    let device = CpuDevice::new();
    let config = Config {
        available_memory: Some(0),
        force_chunks: Some(9),
        ..Config::cpu()
    };
    let chunks = plan(&device, &config, "test", u64::MAX, 0, 30, 30).unwrap();
    assert_eq!(chunks.len(), 9);
}

#[test]
fn test_plan_fixed_bytes_must_fit() {
    let device = CpuDevice::new();
    let config = Config {
        available_memory: Some(100),
        ..Config::cpu()
    };
    let err = plan(&device, &config, "test", 10, 100, 10, 10).unwrap_err();
    assert!(matches!(err, DeviceError::InsufficientMemory { free: 100, .. }));

    // 40 bytes remain for the scaled part: 150 bytes need 4 chunks.
    let chunks = plan(&device, &config, "test", 150, 60, 10, 10).unwrap();
    assert_eq!(chunks.len(), 4);
}
