use chrono::{Local, TimeZone};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use render_service::safety::{SchemeUrlValidator, UrlValidator};
use render_service::{validate_key, Config, RenderOptions};
use std::time::Duration;

// Fast settings for all benchmarks
fn configure_fast_group(group: &mut criterion::BenchmarkGroup<criterion::measurement::WallTime>) {
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_millis(500));
    group.sample_size(20);
}

fn benchmark_config_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("config");
    configure_fast_group(&mut group);

    group.bench_function("creation", |b| {
        b.iter(|| {
            let config = Config::default();
            black_box(config);
        });
    });

    group.bench_function("validation", |b| {
        let config = Config::default();
        b.iter(|| {
            let result = config.validate();
            let _ = black_box(result);
        });
    });

    group.finish();
}

fn benchmark_key_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_validation");
    configure_fast_group(&mut group);

    let test_keys = vec![
        "invoice-1",
        "report_2024-03-07",
        "a-rather-long-key-with-many-segments-and-digits-0123456789",
        "bad key!",
    ];

    group.bench_function("validate", |b| {
        b.iter(|| {
            for key in &test_keys {
                let result = validate_key(key);
                let _ = black_box(result);
            }
        });
    });

    group.finish();
}

fn benchmark_url_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("url_validation");
    configure_fast_group(&mut group);

    let validator = SchemeUrlValidator;
    let test_urls = vec![
        "https://example.com",
        "http://example.com/path?q=1",
        "file:///etc/passwd",
        "invalid-url",
    ];

    group.bench_function("validate", |b| {
        b.iter(|| {
            for url in &test_urls {
                let result = validator.validate(url);
                let _ = black_box(result);
            }
        });
    });

    group.finish();
}

fn benchmark_naming(c: &mut Criterion) {
    let mut group = c.benchmark_group("naming");
    configure_fast_group(&mut group);

    let instant = Local.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap();

    group.bench_function("filename", |b| {
        b.iter(|| {
            let name = render_service::filename("invoice-1", "pdf", instant);
            black_box(name);
        });
    });

    group.bench_function("parse", |b| {
        let name = render_service::filename("invoice-1", "pdf", instant);
        let folder = render_service::date_folder(instant);
        b.iter(|| {
            let parsed = render_service::parse(&name, Some(&folder));
            black_box(parsed);
        });
    });

    group.finish();
}

fn benchmark_options_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_options");
    configure_fast_group(&mut group);

    let mut options = RenderOptions::default();
    options.browser.wait_after_ms = 500;
    options.pdf.scale = Some(1.2);
    options.screenshot.quality = Some(80);

    group.bench_function("validate", |b| {
        b.iter(|| {
            let result = options.validate();
            let _ = black_box(result);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_config_creation,
    benchmark_key_validation,
    benchmark_url_validation,
    benchmark_naming,
    benchmark_options_validation
);
criterion_main!(benches);
