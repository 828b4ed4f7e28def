use criterion::{Criterion, black_box, criterion_group, criterion_main};
use design_converge::diff::{DiffOptions, compare_rgba};
use image::{Rgba, RgbaImage};

fn benchmark_diff(c: &mut Criterion) {
    let design = RgbaImage::from_fn(1440, 900, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255]));
    // Same page with a shifted block, so both branches of the colour test run
    let mut implementation = design.clone();
    for y in 300..500 {
        for x in 600..900 {
            implementation.put_pixel(x, y, Rgba([20, 40, 200, 255]));
        }
    }
    let options = DiffOptions::default();

    c.bench_function("diff_desktop_3x3", |b| {
        b.iter(|| compare_rgba(black_box(&design), black_box(&implementation), &options))
    });

    let mobile = RgbaImage::from_pixel(375, 812, Rgba([255, 255, 255, 255]));
    c.bench_function("diff_size_mismatch", |b| {
        b.iter(|| compare_rgba(black_box(&design), black_box(&mobile), &options))
    });
}

criterion_group!(benches, benchmark_diff);
criterion_main!(benches);
