//! Channel pool and engine benchmarks

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rf_playback::{
    Bank, ChannelPool, EmitterId, EngineConfig, EventDefinition, Handle, Host, PoolConfig,
    SourceClip, create_engine,
};

fn bench_channel_acquire_release(c: &mut Criterion) {
    let mut pool = ChannelPool::new(PoolConfig::with_sizes(64, 64, 1), 0.0);
    let owner = Handle::new(0, 1);

    c.bench_function("channel_acquire_release_64", |b| {
        b.iter(|| {
            let mut held = Vec::with_capacity(64);
            while let Some(id) = pool.try_acquire(owner, 0.0) {
                held.push(id);
            }
            for id in held {
                pool.release(black_box(id));
            }
        })
    });
}

fn bench_play_stop(c: &mut Criterion) {
    let (_handle, mut engine, mut notifications) =
        create_engine(EngineConfig::default(), Host::default()).unwrap();
    let bank = Bank::new("Bench")
        .with_event(EventDefinition::new("Shot").with_source(SourceClip::new("shot.wav")))
        .into_shared();
    engine.load_bank(bank, false).unwrap();

    c.bench_function("engine_play_stop", |b| {
        b.iter(|| {
            let handle = engine.play(black_box("Shot"), EmitterId(1));
            engine.stop_immediate(handle);
            engine.tick(0.0);
            notifications.drain();
        })
    });
}

fn bench_tick_busy(c: &mut Criterion) {
    let (_handle, mut engine, _notifications) =
        create_engine(EngineConfig::default(), Host::default()).unwrap();
    let bank = Bank::new("Bench")
        .with_event(
            EventDefinition::new("Loop")
                .with_source(SourceClip::new("loop.wav"))
                .with_looping(true),
        )
        .into_shared();
    engine.load_bank(bank, false).unwrap();
    for i in 0..48 {
        engine.play("Loop", EmitterId(i));
    }

    c.bench_function("engine_tick_48_live", |b| {
        b.iter(|| {
            black_box(engine.tick(1.0 / 60.0));
        })
    });
}

fn bench_cross_thread_submit(c: &mut Criterion) {
    let (handle, mut engine, _notifications) =
        create_engine(EngineConfig::default().with_command_budget(usize::MAX), Host::default())
            .unwrap();

    c.bench_function("handle_submit_drain_100", |b| {
        b.iter(|| {
            for _ in 0..100 {
                handle.set_parameter("Intensity", black_box(0.5));
            }
            engine.tick(0.0);
        })
    });
}

criterion_group!(
    benches,
    bench_channel_acquire_release,
    bench_play_stop,
    bench_tick_busy,
    bench_cross_thread_submit
);
criterion_main!(benches);
