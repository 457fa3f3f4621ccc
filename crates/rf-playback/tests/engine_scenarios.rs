//! PlaybackEngine Integration Tests
//!
//! Tests for:
//! - Channel pool expansion, shrink and stealing through the engine
//! - Instance limits and graceful fade-out
//! - Bank loading, duplicate names and unload idempotence
//! - Cross-thread commands (placeholder handles, FIFO order, deferred results)
//! - History ring bound

use rf_playback::{
    Bank, EmitterId, EngineConfig, EventDefinition, Handle, HistoryKind, Host, NotificationKind,
    PlaybackAction, PlaybackEngine, PlaybackError, PoolConfig, SourceClip, StopTarget,
    create_engine,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

const FRAME: f64 = 1.0 / 60.0;

fn shot(name: &str) -> EventDefinition {
    EventDefinition::new(name).with_source(SourceClip::new(format!("{}.wav", name)))
}

fn ambience(name: &str) -> EventDefinition {
    shot(name).with_looping(true)
}

fn setup(config: EngineConfig) -> (rf_playback::EngineHandle, PlaybackEngine, rf_playback::NotificationReceiver) {
    create_engine(config, Host::default()).unwrap()
}

fn with_pool(initial: usize, max: usize, increment: usize) -> EngineConfig {
    EngineConfig::default().with_pool(PoolConfig::with_sizes(initial, max, increment))
}

fn load(engine: &mut PlaybackEngine, events: Vec<EventDefinition>) -> Arc<Bank> {
    let bank = events
        .into_iter()
        .fold(Bank::new("Scenario"), |bank, def| bank.with_event(def))
        .into_shared();
    engine.load_bank(Arc::clone(&bank), false).unwrap();
    bank
}

fn started_names(engine: &PlaybackEngine) -> Vec<String> {
    engine
        .history()
        .into_iter()
        .filter(|e| e.kind == HistoryKind::Started)
        .map(|e| e.name)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// END-TO-END SCENARIOS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_fifth_channel_expands_once() {
    let (_h, mut engine, _rx) = setup(with_pool(4, 8, 2));
    load(&mut engine, vec![ambience("Loop")]);

    for i in 0..5 {
        let handle = engine.play("Loop", EmitterId(i));
        assert!(engine.is_valid(handle));
    }

    let stats = engine.pool_stats();
    assert_eq!(stats.current_size, 6);
    assert_eq!(stats.total_expansions, 1);
    assert_eq!(stats.in_use, 5);
    assert_eq!(stats.available + stats.in_use, stats.current_size);
}

#[test]
fn test_instance_limit_declines_second_play() {
    let (_h, mut engine, _rx) = setup(with_pool(4, 8, 2));
    load(&mut engine, vec![shot("Jackpot").with_instance_limit(1)]);

    let first = engine.play("Jackpot", EmitterId(1));
    let second = engine.play("Jackpot", EmitterId(1));

    assert!(engine.is_valid(first));
    assert_eq!(second, Handle::INVALID);
    assert!(!engine.is_valid(second));
    assert_eq!(engine.live_count(), 1);
}

#[test]
fn test_fade_out_reaches_stopped_after_duration() {
    let (_h, mut engine, mut rx) = setup(with_pool(2, 2, 1));
    load(&mut engine, vec![ambience("Wind").with_fades(0.0, 2.0)]);

    let handle = engine.play("Wind", EmitterId(1));
    engine.tick(FRAME);
    let stop_time = engine.now();
    assert!(engine.stop(handle));

    let mut last_volume = engine.instance(handle).unwrap().effective_volume();
    assert_eq!(last_volume, 1.0);

    while engine.is_valid(handle) {
        engine.tick(0.1);
        if let Some(instance) = engine.instance(handle) {
            let volume = instance.effective_volume();
            assert!(volume <= last_volume, "volume rose from {} to {}", last_volume, volume);
            last_volume = volume;
        }
        assert!(engine.now() - stop_time < 3.0, "fade never completed");
    }

    assert!(engine.now() - stop_time >= 2.0 - 1e-9);
    assert_eq!(rx.drain().len(), 1);
}

#[test]
fn test_bank_with_duplicate_names() {
    let (_h, mut engine, _rx) = setup(EngineConfig::default());
    let bank = Bank::new("Hits")
        .with_event(shot("Hit").with_volume(0.5))
        .with_event(shot("Hit").with_volume(0.9))
        .into_shared();

    let report = engine.load_bank(bank, false).unwrap();
    assert_eq!(report.duplicates, vec!["Hit".to_string()]);
    assert_eq!(engine.registry().event_count(), 1);
    assert_eq!(engine.registry().lookup("Hit").unwrap().volume, 0.5);
}

#[test]
fn test_cross_thread_play_appears_after_tick() {
    let (handle, mut engine, _rx) = setup(with_pool(4, 8, 2));
    load(&mut engine, vec![shot("Footstep")]);

    let remote = handle.clone();
    let placeholder = thread::spawn(move || {
        assert!(!remote.is_owner_thread());
        remote.play("Footstep", EmitterId(3))
    })
    .join()
    .unwrap();

    assert_eq!(placeholder, Handle::INVALID);
    assert_eq!(engine.live_count(), 0);
    assert_eq!(handle.pending_commands(), 1);

    let actions = engine.tick(FRAME);
    assert_eq!(engine.live_count(), 1);
    assert_eq!(handle.live_count(), 1);
    assert!(matches!(&actions[..], [PlaybackAction::Start { .. }]));
}

// ═══════════════════════════════════════════════════════════════════════════════
// CROSS-THREAD COMMANDS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_commands_keep_fifo_order_across_batches() {
    let (handle, mut engine, _rx) = setup(with_pool(8, 8, 1).with_command_budget(1));
    load(&mut engine, vec![shot("A"), shot("B"), shot("C")]);

    let remote = handle.clone();
    thread::spawn(move || {
        for name in ["A", "B", "C"] {
            remote.play(name, EmitterId(1));
        }
    })
    .join()
    .unwrap();

    engine.tick(FRAME);
    assert_eq!(started_names(&engine), vec!["A"]);
    assert_eq!(handle.pending_commands(), 2);

    engine.tick(FRAME);
    engine.tick(FRAME);
    assert_eq!(started_names(&engine), vec!["A", "B", "C"]);
}

#[test]
fn test_deferred_play_reports_real_handle() {
    let (handle, mut engine, _rx) = setup(with_pool(4, 8, 2));
    load(&mut engine, vec![shot("Door")]);

    let remote = handle.clone();
    let pending = thread::spawn(move || remote.play_deferred("Door", EmitterId(9)))
        .join()
        .unwrap();
    assert!(pending.try_get().is_none());

    engine.tick(FRAME);
    let real = pending.wait_timeout(Duration::from_secs(1)).unwrap();
    assert!(engine.is_valid(real));
    assert!(handle.is_valid(real));

    handle.stop_immediate(real);
    engine.tick(FRAME);
    assert!(!handle.is_valid(real));
}

#[test]
fn test_queued_stops_are_idempotent() {
    let (handle, mut engine, mut rx) = setup(with_pool(4, 8, 2));
    load(&mut engine, vec![ambience("Hum")]);
    let hum = engine.play("Hum", EmitterId(1));

    handle.stop_immediate(hum);
    handle.stop_immediate(hum);
    handle.stop(hum);
    let actions = engine.tick(FRAME);

    let stops = actions
        .iter()
        .filter(|a| matches!(a, PlaybackAction::Stop { .. }))
        .count();
    assert_eq!(stops, 1);
    assert_eq!(engine.pool_stats().in_use, 0);

    let notifications = rx.drain();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationKind::Finished);
}

#[test]
fn test_engine_moved_to_worker_thread() {
    let (handle, engine, _rx) = setup(with_pool(4, 8, 2));
    handle.load_bank(Bank::new("Late").with_event(shot("Ping")).into_shared(), false);
    handle.play("Ping", EmitterId(1));

    let worker = thread::spawn(move || {
        let mut engine = engine;
        engine.bind_to_current_thread();
        for _ in 0..3 {
            engine.tick(FRAME);
        }
        engine.live_count()
    });

    assert_eq!(worker.join().unwrap(), 1);
    assert!(!handle.is_owner_thread());
}

// ═══════════════════════════════════════════════════════════════════════════════
// STEALING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_steal_takes_oldest_non_looping() {
    let (_h, mut engine, _rx) = setup(with_pool(4, 4, 1));
    load(&mut engine, vec![shot("Shot"), ambience("Rain")]);

    let rain = engine.play("Rain", EmitterId(1));
    engine.tick(0.1);
    let mut shots = Vec::new();
    for _ in 0..3 {
        shots.push(engine.play("Shot", EmitterId(2)));
        engine.tick(0.1);
    }

    let fourth = engine.play("Shot", EmitterId(2));
    assert!(engine.is_valid(fourth));
    assert!(!engine.is_valid(shots[0]));
    assert!(engine.is_valid(shots[1]));

    let fifth = engine.play("Shot", EmitterId(2));
    assert!(engine.is_valid(fifth));
    assert!(!engine.is_valid(shots[1]));
    assert!(engine.is_valid(shots[2]));
    assert!(engine.is_valid(rain));

    let stolen: Vec<Handle> = engine
        .history()
        .into_iter()
        .filter(|e| e.kind == HistoryKind::Stolen)
        .map(|e| e.handle)
        .collect();
    assert_eq!(stolen, vec![shots[0], shots[1]]);
    assert_eq!(engine.pool_stats().total_steals, 2);
}

#[test]
fn test_looping_instances_never_stolen() {
    let (_h, mut engine, _rx) = setup(with_pool(2, 2, 1));
    load(&mut engine, vec![ambience("A"), ambience("B"), shot("Shot")]);
    let a = engine.play("A", EmitterId(1));
    let b = engine.play("B", EmitterId(1));

    assert!(matches!(
        engine.try_play("Shot", EmitterId(1)),
        Err(PlaybackError::PoolExhausted(_))
    ));
    assert!(engine.is_valid(a));
    assert!(engine.is_valid(b));
    assert_eq!(engine.pool_stats().total_steals, 0);
}

// ═══════════════════════════════════════════════════════════════════════════════
// POOL BOUNDS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_pool_bounds_under_churn() {
    let pool = PoolConfig::with_sizes(2, 6, 2).with_shrink_policy(0.5, 0.5, 0.1);
    let (_h, mut engine, _rx) = setup(EngineConfig::default().with_pool(pool));
    load(&mut engine, vec![ambience("Loop")]);

    let mut seed: u64 = 0x2545_f491;
    let mut next = move || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (seed >> 33) as usize
    };

    for _ in 0..2000 {
        match next() % 4 {
            0 | 1 => {
                engine.play("Loop", EmitterId(1));
            }
            2 => {
                if let Some(&victim) = engine.live_handles().first() {
                    engine.stop_immediate(victim);
                }
            }
            _ => {
                engine.tick(0.05 * (next() % 10) as f64);
            }
        }

        let stats = engine.pool_stats();
        assert!(stats.initial_size <= stats.current_size);
        assert!(stats.current_size <= stats.max_size);
        assert_eq!(stats.available + stats.in_use, stats.current_size);
    }

    engine.stop_all(StopTarget::All);
    for _ in 0..100 {
        engine.tick(0.2);
    }
    assert_eq!(engine.pool_stats().current_size, 2, "idle pool shrinks back");
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY / HISTORY
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_load_then_unload_restores_registry() {
    let (_h, mut engine, _rx) = setup(EngineConfig::default());
    let base = load(&mut engine, vec![shot("X"), shot("Y")]);

    let mut before: Vec<String> = engine.registry().event_names().map(String::from).collect();
    before.sort();

    let extra = Bank::new("Extra")
        .with_event(shot("Y"))
        .with_event(shot("Z"))
        .into_shared();
    let report = engine.load_bank(Arc::clone(&extra), false).unwrap();
    assert_eq!(report.collisions, vec!["Y".to_string()]);
    assert!(!report.is_clean());

    engine.unload_bank(extra.id()).unwrap();
    let mut after: Vec<String> = engine.registry().event_names().map(String::from).collect();
    after.sort();

    assert_eq!(before, after);
    assert_eq!(engine.registry().bank_of("Y"), Some(base.id()));
    assert!(matches!(
        engine.unload_bank(extra.id()),
        Err(PlaybackError::BankNotLoaded(_))
    ));
}

#[test]
fn test_history_keeps_most_recent() {
    let config = with_pool(4, 8, 2).with_history_capacity(5);
    let (_h, mut engine, _rx) = setup(config);
    load(&mut engine, vec![shot("Tick")]);

    for _ in 0..12 {
        let handle = engine.play("Tick", EmitterId(1));
        engine.stop_immediate(handle);
        engine.tick(FRAME);
    }

    let history = engine.history();
    assert_eq!(history.len(), 5);
    assert!(history.windows(2).all(|w| w[0].time <= w[1].time));
    assert_eq!(history.last().map(|e| &e.kind), Some(&HistoryKind::Finished));
}

#[test]
fn test_unknown_name_is_silent_invalid() {
    let (_h, mut engine, mut rx) = setup(EngineConfig::default());
    let handle = engine.play("Missing", EmitterId(1));

    assert!(handle.is_null());
    assert!(!engine.stop(handle));
    assert!(!engine.stop_immediate(handle));
    assert_eq!(engine.estimated_remaining_time(handle).as_secs(), Some(0.0));
    assert!(engine.tick(FRAME).is_empty());
    assert!(rx.drain().is_empty());
}

#[test]
fn test_layered_play_fails_after_stealing_and_rolls_back() {
    let (_h, mut engine, _rx) = setup(with_pool(2, 2, 1));
    let layered = EventDefinition::new("Layered")
        .with_source(SourceClip::new("a.wav"))
        .with_source(SourceClip::new("b.wav"))
        .with_source(SourceClip::new("c.wav"));
    load(&mut engine, vec![shot("Shot"), ambience("Rain"), layered]);

    let shot_handle = engine.play("Shot", EmitterId(1));
    let rain = engine.play("Rain", EmitterId(1));
    engine.tick(FRAME);

    assert!(matches!(
        engine.try_play("Layered", EmitterId(2)),
        Err(PlaybackError::PoolExhausted(_))
    ));

    // The one-shot was stolen for the first source before the request failed
    assert!(!engine.is_valid(shot_handle));
    assert!(engine.is_valid(rain));

    let stats = engine.pool_stats();
    assert_eq!(stats.in_use, 1);
    assert_eq!(stats.available, 1);
    assert_eq!(stats.total_steals, 1);
    let owners: Vec<_> = engine
        .channel_pool()
        .channels()
        .iter()
        .filter_map(|c| c.owner())
        .collect();
    assert_eq!(owners, vec![rain], "failed request holds no channel");

    engine.tick(FRAME);
    assert_eq!(engine.live_count(), 1);
    assert!(engine.history().iter().any(|e| {
        e.name == "Layered" && matches!(e.kind, HistoryKind::Failed(_))
    }));
}
