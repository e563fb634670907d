use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::Rng;

use photonlab::aligner::{Aligner, StartPoint};
use photonlab::configs::SyntheticSpectrum;
use photonlab::gain::{CavityParams, GainExtractor, GainMethod};
use photonlab::motion::mock::{GaussianBeam, MockStage};
use photonlab::multifit::{FabryPerot, FitSetup, Model};
use photonlab::ring_buffer::DyadicRingBuffer;

pub fn dynamic(c: &mut Criterion) {
    c.bench_function("ring buffer 2^16", |b| {
        b.iter(|| {
            let mut buff = DyadicRingBuffer::<usize>::new(16).unwrap();
            let mut out = DyadicRingBuffer::<usize>::new(3).unwrap();
            for i in 0..65536 {
                buff.push(i);
            }
            for _ in 0..10 {
                out.extend(buff.iter());
            }
            black_box(out);
        })
    });
}

pub fn fabry_perot_fit(c: &mut Criterion) {
    let mut rng = rand::thread_rng();
    let model = FabryPerot { length: 375.0e-6 };
    let setup = FitSetup::new();
    let actual = [0.6, 1.3e-6, 3.619, 0.16];
    let fsr = actual[1] * actual[1] / (2.0 * actual[2] * model.length);
    let x: Vec<f64> = (0..101)
        .map(|i| actual[1] - fsr / 2.0 + fsr * f64::from(i) / 101.0)
        .collect();
    let y: Vec<f64> = x
        .iter()
        .map(|&xi| model.value(xi, &actual) * (1.0 + rng.gen_range(-1e-3..1e-3)))
        .collect();
    let guess = [0.55, actual[1] + 0.2 * (x[1] - x[0]), 3.62, 0.2];

    c.bench_function("fabry-perot mode fit", |b| {
        b.iter(|| black_box(setup.fit(&model, &x, &y, guess)))
    });
}

pub fn gain_extraction(c: &mut Criterion) {
    let params = CavityParams::default();
    let (x, y) = SyntheticSpectrum {
        prg: 0.5,
        start: 1.29e-6,
        step: 5.0e-12,
        num_points: 4000,
        noise: 1e-3,
    }
    .generate(&params);

    let mut group = c.benchmark_group("gain extraction");
    for method in [GainMethod::MaxMin, GainMethod::Hybrid, GainMethod::Fit] {
        let extractor = GainExtractor::new(params).method(method);
        group.bench_function(format!("{method:?}"), |b| {
            b.iter(|| black_box(extractor.extract(&x, &y).unwrap()))
        });
        let parallel = extractor.parallel(true);
        group.bench_function(format!("{method:?} parallel"), |b| {
            b.iter(|| black_box(parallel.extract(&x, &y).unwrap()))
        });
    }
    group.finish();
}

pub fn alignment(c: &mut Criterion) {
    let beam = GaussianBeam::new((2.03, 1.96), 0.05, 1e-3);
    c.bench_function("auto align 0.1 span", |b| {
        b.iter(|| {
            let stage = MockStage::new(4.0);
            let detector = stage.clone();
            let mut aligner = Aligner::new(stage).unwrap();
            let mut profit = || beam.read(&detector);
            black_box(
                aligner
                    .auto_align(StartPoint::UseCurrent, 0.1, 0.005, &mut profit)
                    .unwrap(),
            )
        })
    });
}

criterion_group!(benches, dynamic, fabry_perot_fit, gain_extraction, alignment);
criterion_main!(benches);
