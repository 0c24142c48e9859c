//! # Wire Codec Benchmark
//!
//! Encode and decode cost of the binary sync models:
//! 1. `STRS` transform poses, the most frequent frame in a busy room
//! 2. `VRUS` user states with both hands tracked

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tandem_networking::{BinaryModel, Pose, TransformModel, UserStateModel};
use tandem_shared::{Quaternion, Vec3};

fn transform() -> TransformModel {
    TransformModel {
        guid: "3f1c9a52-7d0e-4b8a-9c61-0d2f5e7a8b94".into(),
        position: Vec3::new(12.5, 0.75, -3.25),
        rotation: Quaternion::from_axis_angle(Vec3::Y, 1.2),
    }
}

fn user_state() -> UserStateModel {
    UserStateModel {
        guid: "peer-17".into(),
        time: 1_760_000_000_000.0,
        head_position: Vec3::new(0.0, 1.65, 0.0),
        head_rotation: Quaternion::IDENTITY,
        scale: 1.0,
        left_hand: Some(Pose::new(Vec3::new(-0.25, 1.2, 0.3), Quaternion::IDENTITY)),
        right_hand: Some(Pose::new(Vec3::new(0.25, 1.2, 0.3), Quaternion::IDENTITY)),
    }
}

fn bench_transform(c: &mut Criterion) {
    let model = transform();
    let frame = model.to_frame().expect("encode");
    c.bench_function("transform_encode", |b| b.iter(|| black_box(model.to_frame())));
    c.bench_function("transform_decode", |b| {
        b.iter(|| black_box(TransformModel::from_frame(black_box(&frame))));
    });
}

fn bench_user_state(c: &mut Criterion) {
    let model = user_state();
    let frame = model.to_frame().expect("encode");
    c.bench_function("user_state_encode", |b| b.iter(|| black_box(model.to_frame())));
    c.bench_function("user_state_decode", |b| {
        b.iter(|| black_box(UserStateModel::from_frame(black_box(&frame))));
    });
}

criterion_group!(benches, bench_transform, bench_user_state);
criterion_main!(benches);
