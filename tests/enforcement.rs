mod common;

use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use tokio_test::assert_ok;

use tunnel_guard::catalog::CatalogStyle;
use tunnel_guard::engine::{EngineSettings, GuardEngine};
use tunnel_guard::monitor::{Connectivity, ConnectivityProbe, Trigger};
use tunnel_guard::state::{EnforcementMachine, EnforcementState, Mode};
use tunnel_guard::GuardError;

use common::{reconciler, FakeFirewall, Tunnel, BLOCK, CLIENT, POLL, WAIT};

fn settings() -> EngineSettings {
    EngineSettings {
        retry_interval: Duration::from_millis(20),
        queue_depth: 16,
    }
}

async fn wait_for_mode<E>(engine: &mut GuardEngine<E>, mode: Mode) -> EnforcementState
where
    E: tunnel_guard::executor::CommandExecutor + 'static,
{
    let wait = engine.wait_for_state(|s| s.mode == mode && s.confirmed);
    tokio::time::timeout(WAIT, wait)
        .await
        .expect("timed out waiting for mode")
        .unwrap()
}

#[tokio::test]
async fn allow_list_follows_the_tunnel() {
    let firewall = FakeFirewall::new();
    let mut machine = EnforcementMachine::new(reconciler(CatalogStyle::AllowList, &firewall));

    assert_ok!(machine.establish_baseline().await);
    assert_eq!(firewall.enabled(CLIENT), Some(true));
    assert_eq!(firewall.enabled(BLOCK), Some(true));

    let changed = machine.on_signal(Connectivity::Connected).await.unwrap();
    assert_eq!(changed, Some(Mode::Disabled));
    assert_eq!(firewall.enabled(CLIENT), Some(true));
    assert_eq!(firewall.enabled(BLOCK), Some(false));

    let changed = machine.on_signal(Connectivity::Disconnected).await.unwrap();
    assert_eq!(changed, Some(Mode::Enforced));
    assert_eq!(firewall.enabled(CLIENT), Some(true));
    assert_eq!(firewall.enabled(BLOCK), Some(true));

    let client = firewall
        .rules()
        .into_iter()
        .find(|r| r.name == CLIENT)
        .unwrap();
    assert!(client.args.contains("action=allow"));
    assert!(client.args.contains("protocol=tcp"));
    assert!(client.args.contains("remoteport=110,443,9201"));
}

#[tokio::test]
async fn block_everything_toggles_single_rule_and_enforces_on_shutdown() {
    let firewall = FakeFirewall::new();
    let mut machine =
        EnforcementMachine::new(reconciler(CatalogStyle::BlockEverything, &firewall));

    assert_ok!(machine.on_signal(Connectivity::Connected).await);
    assert_eq!(firewall.rules().len(), 1);
    assert_eq!(firewall.enabled(BLOCK), Some(false));

    assert_ok!(machine.on_signal(Connectivity::Disconnected).await);
    assert_eq!(firewall.enabled(BLOCK), Some(true));

    assert_ok!(machine.on_signal(Connectivity::Connected).await);
    assert_eq!(firewall.enabled(BLOCK), Some(false));

    assert_eq!(machine.shutdown().await.unwrap(), Mode::Enforced);
    assert_eq!(firewall.enabled(BLOCK), Some(true));
    assert_eq!(machine.state().last_observed, Some(Connectivity::Connected));
}

#[tokio::test]
async fn unknown_is_treated_as_disconnected() {
    let firewall = FakeFirewall::new();
    let mut machine =
        EnforcementMachine::new(reconciler(CatalogStyle::BlockEverything, &firewall));

    assert_ok!(machine.on_signal(Connectivity::Connected).await);
    assert_eq!(
        machine.on_signal(Connectivity::Unknown).await.unwrap(),
        Some(Mode::Enforced)
    );
    assert_eq!(firewall.enabled(BLOCK), Some(true));
}

#[tokio::test]
async fn repeated_signals_do_not_touch_the_firewall() {
    let firewall = FakeFirewall::new();
    let mut machine = EnforcementMachine::new(reconciler(CatalogStyle::AllowList, &firewall));

    assert_ok!(machine.on_signal(Connectivity::Connected).await);
    let issued = firewall.commands().len();

    assert_eq!(machine.on_signal(Connectivity::Connected).await.unwrap(), None);
    assert_eq!(firewall.commands().len(), issued);
}

#[tokio::test]
async fn reconcile_never_duplicates_rules() {
    let firewall = FakeFirewall::new();
    // Leftovers from a previous run, including a duplicate.
    firewall.insert(BLOCK, false);
    firewall.insert(BLOCK, true);

    let mut reconciler = reconciler(CatalogStyle::AllowList, &firewall);
    for enforced in [true, true, false, true, false, false] {
        let result = reconciler.reconcile(enforced).await;
        assert!(result.is_success());
        assert_eq!(firewall.rules().len(), 2);
        assert_eq!(firewall.count(BLOCK), 1);
        assert_eq!(firewall.count(CLIENT), 1);
        assert_eq!(firewall.enabled(BLOCK), Some(enforced));
    }
}

#[tokio::test]
async fn fresh_machine_is_enforced_before_any_reconcile() {
    let firewall = FakeFirewall::new();
    let machine = EnforcementMachine::new(reconciler(CatalogStyle::AllowList, &firewall));

    let state = machine.state();
    assert_eq!(state.mode, Mode::Enforced);
    assert_eq!(state.last_observed, None);
    assert!(!state.confirmed);
    assert!(machine.needs_retry());
    assert!(firewall.commands().is_empty());
}

#[tokio::test]
async fn partial_failure_keeps_the_kill_switch_enforced() {
    let firewall = FakeFirewall::new();
    let mut machine = EnforcementMachine::new(reconciler(CatalogStyle::AllowList, &firewall));
    assert_ok!(machine.establish_baseline().await);

    firewall.fail_adds_for(CLIENT);
    let err = machine
        .on_signal(Connectivity::Connected)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GuardError::ReconcileFailed {
            target: Mode::Disabled,
            failed: 1,
            total: 2
        }
    ));
    // The block rule was still processed after the client rule failed.
    assert_eq!(firewall.enabled(BLOCK), Some(false));
    assert_eq!(machine.mode(), Mode::Enforced);
    assert!(!machine.state().confirmed);

    // The same signal again is not ignored while unconfirmed.
    firewall.heal();
    assert_eq!(
        machine.on_signal(Connectivity::Connected).await.unwrap(),
        Some(Mode::Disabled)
    );
    assert!(machine.state().confirmed);
}

#[tokio::test]
async fn retry_reapplies_last_observation() {
    let firewall = FakeFirewall::new();
    let mut machine =
        EnforcementMachine::new(reconciler(CatalogStyle::BlockEverything, &firewall));

    firewall.fail_adds_for(BLOCK);
    assert!(machine.on_signal(Connectivity::Disconnected).await.is_err());
    assert_eq!(firewall.count(BLOCK), 0);

    firewall.heal();
    assert_eq!(machine.retry().await.unwrap(), Some(Mode::Enforced));
    assert_eq!(firewall.enabled(BLOCK), Some(true));
    assert_eq!(machine.retry().await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_tracks_tunnel_and_enforces_on_stop() {
    let firewall = FakeFirewall::new();
    let tunnel = Tunnel::new(Connectivity::Connected);

    let mut engine = GuardEngine::start(
        reconciler(CatalogStyle::AllowList, &firewall),
        tunnel.clone(),
        Trigger::Poll(POLL),
        settings(),
    )
    .await
    .unwrap();

    // First observation is applied before start returns.
    let state = engine.state();
    assert_eq!(state.mode, Mode::Disabled);
    assert!(state.confirmed);
    assert_eq!(firewall.enabled(BLOCK), Some(false));

    tunnel.set(Connectivity::Disconnected);
    wait_for_mode(&mut engine, Mode::Enforced).await;
    assert_eq!(firewall.enabled(BLOCK), Some(true));

    tunnel.set(Connectivity::Connected);
    wait_for_mode(&mut engine, Mode::Disabled).await;
    assert_eq!(firewall.enabled(BLOCK), Some(false));

    let last = engine.stop().await.unwrap();
    assert_eq!(last.mode, Mode::Enforced);
    assert_eq!(firewall.enabled(BLOCK), Some(true));
    assert_eq!(firewall.count(BLOCK), 1);
    assert_eq!(firewall.count(CLIENT), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_retries_until_firewall_accepts() {
    let firewall = FakeFirewall::new();
    firewall.fail_adds_for(BLOCK);
    let tunnel = Tunnel::new(Connectivity::Disconnected);

    let mut engine = GuardEngine::start(
        reconciler(CatalogStyle::BlockEverything, &firewall),
        tunnel,
        Trigger::Poll(POLL),
        settings(),
    )
    .await
    .unwrap();

    let state = engine.state();
    assert_eq!(state.mode, Mode::Enforced);
    assert!(!state.confirmed);

    firewall.heal();
    wait_for_mode(&mut engine, Mode::Enforced).await;
    assert_eq!(firewall.enabled(BLOCK), Some(true));

    assert_ok!(engine.stop().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_reconciles_exactly_once() {
    for _ in 0..5 {
        let firewall = FakeFirewall::new();
        let tunnel = Tunnel::new(Connectivity::Connected);

        let mut engine = GuardEngine::start(
            reconciler(CatalogStyle::AllowList, &firewall),
            tunnel,
            Trigger::Poll(POLL),
            settings(),
        )
        .await
        .unwrap();
        wait_for_mode(&mut engine, Mode::Disabled).await;

        let before = firewall.commands().len();
        let last = engine.stop().await.unwrap();
        let issued = &firewall.commands()[before..];

        // One delete and one add per catalog rule, nothing for a lost monitor.
        assert_eq!(issued.len(), 4, "stop issued {:?}", issued);
        assert_eq!(last.mode, Mode::Enforced);
        assert_eq!(last.last_observed, Some(Connectivity::Connected));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_reports_failed_final_enforce() {
    let firewall = FakeFirewall::new();
    let tunnel = Tunnel::new(Connectivity::Connected);

    let mut engine = GuardEngine::start(
        reconciler(CatalogStyle::BlockEverything, &firewall),
        tunnel,
        Trigger::Poll(POLL),
        settings(),
    )
    .await
    .unwrap();
    wait_for_mode(&mut engine, Mode::Disabled).await;

    firewall.fail_adds_for(BLOCK);
    let err = engine.stop().await.unwrap_err();
    assert!(matches!(
        err,
        GuardError::ReconcileFailed {
            target: Mode::Enforced,
            failed: 1,
            total: 1
        }
    ));
    assert_eq!(firewall.count(BLOCK), 0);
}

/// Records the thread of every observation.
struct ThreadRecorder(Arc<Mutex<Vec<ThreadId>>>);

impl ConnectivityProbe for ThreadRecorder {
    fn observe(&mut self) -> Connectivity {
        self.0.lock().unwrap().push(thread::current().id());
        Connectivity::Disconnected
    }
}

#[tokio::test]
async fn first_observation_stays_off_the_runtime_thread() {
    let firewall = FakeFirewall::new();
    let threads = Arc::new(Mutex::new(Vec::new()));

    let engine = GuardEngine::start(
        reconciler(CatalogStyle::BlockEverything, &firewall),
        ThreadRecorder(threads.clone()),
        Trigger::Poll(Duration::from_secs(60)),
        settings(),
    )
    .await
    .unwrap();

    let seen = threads.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_ne!(seen[0], thread::current().id());

    assert_ok!(engine.stop().await);
}
