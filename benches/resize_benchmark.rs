use batch_resizer::processing::encode::{encode, encode_to_target};
use batch_resizer::processing::{ImageResizer, OutputFormat, ResizeSpec};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, Rgb, RgbImage};

fn gradient(width: u32, height: u32) -> DynamicImage {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width) as u8,
            (y * 255 / height) as u8,
            ((x ^ y) & 0xff) as u8,
        ])
    });
    DynamicImage::ImageRgb8(image)
}

fn benchmark_resize(c: &mut Criterion) {
    let image = gradient(2400, 1600);
    let resizer = ImageResizer::new();
    let mut group = c.benchmark_group("resize");

    let specs = [
        ("percentage_50", ResizeSpec::Percentage { percent: 50 }),
        ("fit_width_800", ResizeSpec::FitWidth { width: 800 }),
        (
            "bounding_box_1920x1080",
            ResizeSpec::FitBoundingBox {
                width: 1920,
                height: 1080,
            },
        ),
    ];

    for (name, spec) in specs {
        group.bench_with_input(BenchmarkId::from_parameter(name), &spec, |b, spec| {
            b.iter(|| resizer.resize(black_box(&image), spec))
        });
    }

    group.finish();
}

fn benchmark_encode(c: &mut Criterion) {
    let image = gradient(1200, 800);
    let mut group = c.benchmark_group("encode");
    group.sample_size(20);

    for format in [OutputFormat::Jpeg, OutputFormat::WebP, OutputFormat::Png] {
        group.bench_with_input(BenchmarkId::new("fixed_quality", format), &format, |b, &format| {
            b.iter(|| encode(black_box(&image), format, 85))
        });
    }

    for format in [OutputFormat::Jpeg, OutputFormat::WebP] {
        group.bench_with_input(BenchmarkId::new("target_100kb", format), &format, |b, &format| {
            b.iter(|| encode_to_target(black_box(&image), format, 100 * 1024))
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_resize, benchmark_encode);
criterion_main!(benches);
