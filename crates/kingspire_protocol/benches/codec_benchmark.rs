//! Codec throughput benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kingspire_protocol::{
    Envelope, FrameCodec, MessageKind, ParticipantId, PlayerState, Vec2,
};

fn bench_encode(c: &mut Criterion) {
    let state = PlayerState::new(Vec2::new(120.0, 240.0), 100, 100);
    let envelope = Envelope::new(
        MessageKind::PlayerState,
        ParticipantId(2),
        1,
        0.0,
        state.to_bytes(),
    );

    c.bench_function("encode_player_state_frame", |b| {
        b.iter(|| black_box(&envelope).to_frame().unwrap());
    });
}

fn bench_decode_stream(c: &mut Criterion) {
    let state = PlayerState::new(Vec2::new(120.0, 240.0), 100, 100);
    let mut stream = Vec::new();
    for sequence in 0..64u64 {
        let envelope = Envelope::new(
            MessageKind::PlayerState,
            ParticipantId(2),
            sequence,
            0.0,
            state.to_bytes(),
        );
        stream.extend_from_slice(&envelope.to_frame().unwrap());
    }

    c.bench_function("decode_64_frame_stream", |b| {
        b.iter(|| {
            let mut codec = FrameCodec::new();
            codec.feed(black_box(&stream));
            let mut count = 0;
            while let Some(envelope) = codec.next_envelope().unwrap() {
                black_box(&envelope);
                count += 1;
            }
            assert_eq!(count, 64);
        });
    });
}

criterion_group!(benches, bench_encode, bench_decode_stream);
criterion_main!(benches);
