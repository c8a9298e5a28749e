//! Benchmarks for voxel packing, chunk selection and a full frame transfer.

use std::time::Duration;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use cube_link::{
    codec::{pack_into, select_chunk, voxel_data_size},
    link::{Handshake, HandshakeState, LinkSession, SimulatedDevice, StepTiming},
    schema::{ChannelConfig, Color, LinkConfig, VoxelGrid},
};

fn gradient_grid(side: usize) -> VoxelGrid {
    let mut grid = VoxelGrid::new(side).unwrap();
    let scale = (side.max(2) - 1) as f32;
    for z in 0..side {
        for y in 0..side {
            for x in 0..side {
                grid.set(
                    x,
                    y,
                    z,
                    Color::new(x as f32 / scale, y as f32 / scale, z as f32 / scale),
                );
            }
        }
    }
    grid
}

fn bench_pack(c: &mut Criterion) {
    let mut group = c.benchmark_group("pack");

    for (count, depth) in [(1, 1), (3, 4), (3, 8)] {
        let channels = ChannelConfig::new(count, depth).unwrap();
        for side in [8, 16, 32] {
            let grid = gradient_grid(side);
            let mut buffer = vec![0u8; voxel_data_size(side, channels)];

            group.bench_with_input(
                BenchmarkId::new(format!("{}ch_{}bit", count, depth), side),
                &side,
                |b, _| {
                    b.iter(|| pack_into(black_box(&grid), channels, &mut buffer));
                },
            );
        }
    }

    group.finish();
}

fn bench_chunk_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_chunk");
    let channels = ChannelConfig::new(3, 8).unwrap();

    let blank = vec![0u8; voxel_data_size(16, channels)];
    let mut gradient = blank.clone();
    pack_into(&gradient_grid(16), channels, &mut gradient);

    for (name, data) in [("blank", &blank), ("gradient", &gradient)] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut cursor = 0;
                while cursor < data.len() {
                    cursor += select_chunk(black_box(data), cursor).produced_length;
                }
                cursor
            });
        });
    }

    group.finish();
}

fn bench_frame_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_transfer");
    let timing = StepTiming {
        acknowledge_wait: Duration::from_millis(10),
        display_resend: Duration::from_millis(50),
    };
    let config = LinkConfig {
        init_response_wait_ms: 1,
        ..Default::default()
    };

    for side in [4, 8, 16] {
        let device = SimulatedDevice::new(side as u8, 3, 8);
        let mut transport = device.transport();
        let HandshakeState::Negotiated(params) = Handshake::new(&config).run(&mut transport)
        else {
            panic!("simulated handshake failed");
        };
        let grid = gradient_grid(side);

        group.bench_with_input(BenchmarkId::from_parameter(side), &side, |b, _| {
            b.iter(|| {
                let mut session = LinkSession::new(params);
                session.load_frame(&grid);
                let size = session.voxel_data().len();
                while session.cursor() < size {
                    session.step(&mut transport, timing).unwrap();
                }
                session.request_display(std::time::Instant::now());
                session.step(&mut transport, timing).unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_pack,
    bench_chunk_selection,
    bench_frame_transfer
);
criterion_main!(benches);
