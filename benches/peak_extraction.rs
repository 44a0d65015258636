//! Criterion benchmarks for per-capture processing.
//!
//! Every capture is smoothed (median + Gaussian) and searched for its peak between two
//! spectrometer reads, so this has to stay well below the shortest step delay.
//!
//! Run with: cargo bench --bench peak_extraction

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pl_daq::data::peak::{gaussian_filter1d, median_filter, PeakExtractor};

fn synthetic_spectrum(pixels: usize) -> (Vec<f64>, Vec<f64>) {
    let wavelengths: Vec<f64> = (0..pixels)
        .map(|i| 480.0 + 340.0 * i as f64 / pixels as f64)
        .collect();
    let spectrum = wavelengths
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let line = 2500.0 * (-0.5 * ((w - 530.0) / 12.0).powi(2)).exp();
            let ripple = ((i * 7919) % 97) as f64 - 48.0;
            line + ripple
        })
        .collect();
    (wavelengths, spectrum)
}

fn extract_peak(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_peak");
    let extractor = PeakExtractor::default();

    for pixels in [512usize, 1024, 2048, 3648] {
        let (wavelengths, spectrum) = synthetic_spectrum(pixels);
        group.throughput(Throughput::Elements(pixels as u64));
        group.bench_with_input(BenchmarkId::from_parameter(pixels), &pixels, |b, _| {
            b.iter(|| {
                extractor
                    .extract_peak(black_box(&spectrum), black_box(&wavelengths))
                    .unwrap()
            });
        });
    }
    group.finish();
}

fn filters(c: &mut Criterion) {
    let (_, spectrum) = synthetic_spectrum(2048);

    c.bench_function("median_filter_3", |b| {
        b.iter(|| median_filter(black_box(&spectrum), 3));
    });
    c.bench_function("gaussian_filter1d_sigma5", |b| {
        b.iter(|| gaussian_filter1d(black_box(&spectrum), 5.0, 4.0));
    });
}

criterion_group!(benches, extract_peak, filters);
criterion_main!(benches);
