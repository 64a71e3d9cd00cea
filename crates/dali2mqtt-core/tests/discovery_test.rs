#![allow(clippy::unwrap_used)]
// Scanner and reconciliation against the simulated bus.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use dali2mqtt_bus::{Address, BusTransport, Command, MASK, Opcode, Response, SimulatedBus, VirtualGear};
use dali2mqtt_core::config::{HealthConfig, LevelRetryPolicy, ReconnectPolicy};
use dali2mqtt_core::{ConnectionSupervisor, HealthMonitor, LevelLimits, LifecycleState, reconcile, scanner};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup(gear: Vec<VirtualGear>) -> (Arc<SimulatedBus>, ConnectionSupervisor) {
    let sim = Arc::new(SimulatedBus::new(gear));
    let transport: Arc<dyn BusTransport> = sim.clone();
    let supervisor = ConnectionSupervisor::new(
        transport,
        ReconnectPolicy::default(),
        Arc::new(HealthMonitor::new(HealthConfig::default())),
        CancellationToken::new(),
    );
    supervisor.connect().await.unwrap();
    (sim, supervisor)
}

fn queries(sim: &SimulatedBus, id: u8, opcode: Opcode) -> usize {
    sim.count(|c| *c == Command::gear(Address::Individual(id), opcode))
}

// ── Scanning ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_scan_requires_presence_and_confirmation() {
    let (sim, sup) = setup(vec![VirtualGear::new(5), VirtualGear::new(2)]).await;
    sim.add_ghost(9);

    let found = scanner::scan(&sup).await.unwrap();

    assert_eq!(found, vec![Address::Individual(2), Address::Individual(5)]);
    // The ghost was asked to confirm exactly once and then dropped.
    assert_eq!(queries(&sim, 9, Opcode::QueryPhysicalMinimum), 1);
    // Absent addresses never get a confirmation query.
    assert_eq!(queries(&sim, 10, Opcode::QueryPhysicalMinimum), 0);
    assert_eq!(sim.count(|c| c.opcode() == Some(Opcode::QueryControlGearPresent)), 64);
}

#[tokio::test]
async fn test_scan_treats_timeouts_as_absent() {
    let (sim, sup) = setup(vec![VirtualGear::new(2), VirtualGear::new(5)]).await;
    sim.set_timeout(5, true);

    let found = scanner::scan(&sup).await.unwrap();
    assert_eq!(found, vec![Address::Individual(2)]);
}

#[tokio::test(start_paused = true)]
async fn test_scan_aborts_when_link_is_gone() {
    let (sim, sup) = setup(vec![VirtualGear::new(2)]).await;
    sim.set_link(false);

    let err = scanner::scan(&sup).await.unwrap_err();
    assert!(err.is_connectivity());
    assert_eq!(sup.reconnect_attempts(), 1);
}

#[tokio::test]
async fn test_group_bitmasks_map_to_groups() {
    let (_sim, sup) = setup(vec![
        VirtualGear::new(4).with_groups(&[0, 3, 9]),
        VirtualGear::new(7).with_groups(&[3, 15]),
        VirtualGear::new(8),
    ])
    .await;

    let live = scanner::scan(&sup).await.unwrap();
    let groups = scanner::scan_groups(&sup, &live).await.unwrap();

    let members = |g: u8| groups.get(&g).map(|m| m.iter().copied().collect::<Vec<_>>());
    assert_eq!(members(0), Some(vec![4]));
    assert_eq!(members(3), Some(vec![4, 7]));
    assert_eq!(members(9), Some(vec![4]));
    assert_eq!(members(15), Some(vec![7]));
    assert_eq!(groups.len(), 4);
}

#[tokio::test]
async fn test_group_query_failure_omits_only_that_device() {
    let (sim, sup) = setup(vec![
        VirtualGear::new(4).with_groups(&[3]),
        VirtualGear::new(7).with_groups(&[3]),
    ])
    .await;
    let live = scanner::scan(&sup).await.unwrap();
    sim.set_timeout(4, true);

    let groups = scanner::scan_groups(&sup, &live).await.unwrap();
    assert_eq!(groups.get(&3).unwrap().iter().copied().collect::<Vec<_>>(), vec![7]);
}

// ── Reconciliation ──────────────────────────────────────────────────

#[tokio::test]
async fn test_reconcile_reads_every_field() {
    let gear = VirtualGear {
        fade_time: 4,
        fade_rate: 9,
        gtin: Some(4_050_300_000_001),
        firmware: Some((2, 5)),
        luminaire_id: Some("LUM-0001".into()),
        ..VirtualGear::new(1)
            .with_limits(3, 10, 200)
            .with_level(128)
            .with_colour(153, 370, 250)
    };
    let (_sim, sup) = setup(vec![gear]).await;

    let r = reconcile::reconcile(&sup, &LevelRetryPolicy::default(), Address::Individual(1)).await;

    assert_eq!(r.state, LifecycleState::Ready);
    assert_eq!(r.limits, LevelLimits::normalised(3, 10, 200));
    assert_eq!(r.level, 128);
    assert_eq!((r.fade.time, r.fade.rate), (4, 9));
    let ct = r.color_temperature.unwrap();
    assert_eq!((ct.coolest, ct.warmest, ct.current), (153, 370, 250));
    assert_eq!(r.metadata.device_types, vec![6, 8]);
    assert_eq!(r.metadata.device_type, "LED module");
    assert_eq!(r.metadata.gtin.as_deref(), Some("4050300000001"));
    assert_eq!(r.metadata.firmware_version.as_deref(), Some("2.5"));
    assert_eq!(r.metadata.model(), "LUM-0001");
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let (_sim, sup) = setup(vec![VirtualGear::new(3).with_level(77).with_colour(153, 370, 200)]).await;
    let policy = LevelRetryPolicy::default();

    let first = reconcile::reconcile(&sup, &policy, Address::Individual(3)).await;
    let second = reconcile::reconcile(&sup, &policy, Address::Individual(3)).await;
    assert!(first.same_state(&second));
}

#[tokio::test(start_paused = true)]
async fn test_masked_level_is_retried_until_numeric() {
    let (sim, sup) = setup(vec![VirtualGear::new(1).with_level(128)]).await;
    sim.script(
        1,
        Opcode::QueryActualLevel,
        [Response::Answer(MASK), Response::Answer(MASK), Response::Answer(128)],
    );

    let started = Instant::now();
    let r = reconcile::reconcile(&sup, &LevelRetryPolicy::default(), Address::Individual(1)).await;

    assert_eq!(r.level, 128);
    assert_eq!(queries(&sim, 1, Opcode::QueryActualLevel), 3);
    assert_eq!(started.elapsed(), Duration::from_millis(200 + 400));
}

#[tokio::test(start_paused = true)]
async fn test_persistent_mask_assumes_full_level() {
    let (sim, sup) = setup(vec![VirtualGear::new(1).with_level(40)]).await;
    sim.script(1, Opcode::QueryActualLevel, [Response::Answer(MASK); 3]);

    let r = reconcile::reconcile(&sup, &LevelRetryPolicy::default(), Address::Individual(1)).await;
    assert_eq!(r.level, reconcile::ASSUMED_ON_LEVEL);
    assert_eq!(queries(&sim, 1, Opcode::QueryActualLevel), 3);
}

#[tokio::test(start_paused = true)]
async fn test_non_numeric_level_while_on_assumes_full_level() {
    let (sim, sup) = setup(vec![VirtualGear::new(1).with_level(40)]).await;
    sim.script(1, Opcode::QueryActualLevel, [Response::NoAnswer]);

    let r = reconcile::reconcile(&sup, &LevelRetryPolicy::default(), Address::Individual(1)).await;
    assert_eq!(r.level, 254);
    assert_eq!(queries(&sim, 1, Opcode::QueryActualLevel), 1);
}

#[tokio::test]
async fn test_lamp_off_skips_level_query() {
    let (sim, sup) = setup(vec![VirtualGear::new(2)]).await;
    sim.script(2, Opcode::QueryStatus, [Response::Answer(0b0000_0000)]);

    let r = reconcile::reconcile(&sup, &LevelRetryPolicy::default(), Address::Individual(2)).await;
    assert_eq!(r.level, 0);
    assert_eq!(queries(&sim, 2, Opcode::QueryActualLevel), 0);
}

#[tokio::test(start_paused = true)]
async fn test_running_fade_waits_before_first_read() {
    let (sim, sup) = setup(vec![VirtualGear::new(2).with_level(90)]).await;
    sim.script(2, Opcode::QueryStatus, [Response::Answer(0b0001_0100)]);

    let started = Instant::now();
    let r = reconcile::reconcile(&sup, &LevelRetryPolicy::default(), Address::Individual(2)).await;
    assert_eq!(r.level, 90);
    assert_eq!(started.elapsed(), Duration::from_millis(500));
}

#[tokio::test]
async fn test_failed_reads_fall_back_to_defaults() {
    let (sim, sup) = setup(vec![VirtualGear::new(6).with_limits(2, 20, 180)]).await;
    sim.script(6, Opcode::QueryMaxLevel, [Response::NoAnswer]);
    sim.script(6, Opcode::QueryFadeTimeFadeRate, [Response::NoAnswer]);

    let r = reconcile::reconcile(&sup, &LevelRetryPolicy::default(), Address::Individual(6)).await;
    assert_eq!(r.limits, LevelLimits::normalised(2, 20, 254));
    assert_eq!((r.fade.time, r.fade.rate), (0, 0));
    assert_eq!(r.state, LifecycleState::Ready);
}

#[tokio::test]
async fn test_colour_temperature_is_all_or_nothing() {
    let (_sim, sup) = setup(vec![
        VirtualGear::new(1).with_colour(153, 370, 250),
        VirtualGear::new(2).with_colour(0, 370, 250),
        VirtualGear::new(3),
    ])
    .await;
    let policy = LevelRetryPolicy::default();

    let full = reconcile::reconcile(&sup, &policy, Address::Individual(1)).await;
    let zero_bound = reconcile::reconcile(&sup, &policy, Address::Individual(2)).await;
    let plain = reconcile::reconcile(&sup, &policy, Address::Individual(3)).await;

    assert!(full.supports_color_temperature());
    assert!(!zero_bound.supports_color_temperature());
    assert!(!plain.supports_color_temperature());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_level_keeps_cache_when_still_masked() {
    let (sim, sup) = setup(vec![VirtualGear::new(1).with_level(50)]).await;
    let policy = LevelRetryPolicy::default();

    sim.script(1, Opcode::QueryActualLevel, [Response::Answer(MASK), Response::Answer(99)]);
    let level = reconcile::refresh_level(&sup, &policy, Address::Individual(1)).await.unwrap();
    assert_eq!(level, Some(99));

    sim.script(1, Opcode::QueryActualLevel, [Response::Answer(MASK), Response::Answer(MASK)]);
    let level = reconcile::refresh_level(&sup, &policy, Address::Individual(1)).await.unwrap();
    assert_eq!(level, None);
    assert_eq!(queries(&sim, 1, Opcode::QueryActualLevel), 4);
}
