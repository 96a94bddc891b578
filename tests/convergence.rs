//! Two-device scenarios over an in-process link.
//!
//! Each device gets its own container root so the only path between them
//! is the peer channel.

use chrono::{Duration as ChronoDuration, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use shuttlx_sync::{
    DeviceRole, MemoryLink, RecordSyncState, SyncConfig, SyncCoordinator, TrainingIntensity,
    TrainingInterval, TrainingProgram, TrainingSession,
};

type Node = Arc<SyncCoordinator<MemoryLink>>;

fn config(base: &Path, role: DeviceRole) -> SyncConfig {
    let mut config = SyncConfig::isolated(role, &base.join(role.as_str()));
    config.retry.base_delay_ms = 5;
    config.retry.max_delay_ms = 20;
    config.connectivity.status_poll_secs = 1;
    config
}

fn pair(base: &Path) -> (Node, Node) {
    let (phone_link, watch_link) = MemoryLink::pair();
    let phone = SyncCoordinator::new(config(base, DeviceRole::Phone), phone_link).unwrap();
    let watch = SyncCoordinator::new(config(base, DeviceRole::Watch), watch_link).unwrap();
    (phone, watch)
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn custom_program(name: &str) -> TrainingProgram {
    TrainingProgram::new(
        name,
        vec![
            TrainingInterval::work(90.0, TrainingIntensity::High),
            TrainingInterval::rest(60.0),
        ],
    )
}

#[tokio::test]
async fn phone_program_reaches_watch() {
    let dir = tempfile::tempdir().unwrap();
    let (phone, watch) = pair(dir.path());
    let _p = phone.start();
    let _w = watch.start();

    let program = phone.publish(custom_program("Hill Repeats")).unwrap();

    assert!(
        wait_until(|| watch.programs().iter().any(|p| p.id == program.id)).await,
        "watch never saw the program"
    );
    let on_watch = watch
        .programs()
        .into_iter()
        .find(|p| p.id == program.id)
        .unwrap();
    assert_eq!(on_watch, program);
    assert_eq!(
        watch.record_state(&program.id),
        Some(RecordSyncState::ReceivedFromPeer)
    );
    assert!(wait_until(|| phone.record_state(&program.id) == Some(RecordSyncState::Pushed)).await);
}

#[tokio::test]
async fn edits_on_both_sides_converge_to_latest() {
    let dir = tempfile::tempdir().unwrap();
    let (phone, watch) = pair(dir.path());
    let _p = phone.start();
    let _w = watch.start();

    let program = phone.publish(custom_program("Tempo")).unwrap();
    assert!(wait_until(|| watch.programs().iter().any(|p| p.id == program.id)).await);

    // watch renames, then phone renames later; phone's copy is newer
    let mut watch_edit = program.clone();
    watch_edit.name = "Tempo (watch)".into();
    watch.publish(watch_edit).unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let mut phone_edit = program.clone();
    phone_edit.name = "Tempo (phone)".into();
    let phone_edit = phone.publish(phone_edit).unwrap();

    let converged = |node: &Node| {
        node.programs()
            .iter()
            .find(|p| p.id == program.id)
            .map(|p| p.name == "Tempo (phone)")
            .unwrap_or(false)
    };
    assert!(wait_until(|| converged(&phone) && converged(&watch)).await);
    assert_eq!(
        watch
            .programs()
            .into_iter()
            .find(|p| p.id == program.id)
            .unwrap()
            .last_modified,
        phone_edit.last_modified
    );
}

#[tokio::test]
async fn watch_session_queued_while_unreachable_then_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let (phone, watch) = pair(dir.path());
    watch.session().link().set_reachable(false);
    let _p = phone.start();
    let _w = watch.start();

    let mut session = TrainingSession::new(Utc::now() - ChronoDuration::minutes(30));
    session.end = Some(Utc::now());
    session.duration = 1800.0;
    session.distance = Some(4200.0);
    let session = watch.publish(session).unwrap();

    assert!(wait_until(|| watch.session().durable_enqueued() == 1).await);
    assert_eq!(watch.session().outbox_len(), 1);
    assert!(phone.sessions().is_empty());

    watch.session().link().set_reachable(true);
    watch.session().flush_outbox().await;

    assert!(wait_until(|| phone.sessions().iter().any(|s| s.id == session.id)).await);
    assert_eq!(watch.session().outbox_len(), 0);
    assert_eq!(watch.session().durable_enqueued(), 1);

    // a second flush has nothing left to send
    assert_eq!(watch.session().flush_outbox().await, 0);
    assert_eq!(phone.sessions().len(), 1);
}

#[tokio::test]
async fn status_poller_flushes_after_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let (phone, watch) = pair(dir.path());
    watch.session().link().set_reachable(false);
    let _p = phone.start();
    let _w = watch.start();

    let session = watch.publish(TrainingSession::new(Utc::now())).unwrap();
    assert!(wait_until(|| watch.session().outbox_len() == 1).await);

    watch.session().link().set_reachable(true);
    // no explicit flush: the one-second status poll picks it up
    let delivered = async {
        for _ in 0..40 {
            if phone.sessions().iter().any(|s| s.id == session.id) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        false
    };
    assert!(delivered.await);
}

#[tokio::test]
async fn pull_fetches_full_state() {
    let dir = tempfile::tempdir().unwrap();
    let (phone, watch) = pair(dir.path());

    // stored on the phone without ever being pushed
    let program = custom_program("Fartlek");
    phone.on_peer_data(vec![program.clone()]).unwrap();

    let _p = phone.start();
    let _w = watch.start();

    assert!(watch.pull_from_peer().await);
    assert!(wait_until(|| watch.programs().iter().any(|p| p.id == program.id)).await);
    assert_eq!(phone.session().durable_enqueued(), 0);
}

#[tokio::test]
async fn pull_when_unreachable_does_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (phone, watch) = pair(dir.path());
    watch.session().link().set_reachable(false);
    let _p = phone.start();
    let _w = watch.start();

    assert!(!watch.pull_from_peer().await);
    assert_eq!(watch.session().outbox_len(), 0);
    assert_eq!(watch.session().durable_enqueued(), 0);
}

#[tokio::test]
async fn tie_keeps_each_local_copy() {
    let dir = tempfile::tempdir().unwrap();
    let (phone, watch) = pair(dir.path());

    let stamp = Utc::now();
    let mut phone_copy = custom_program("Same Stamp");
    phone_copy.last_modified = stamp;
    let mut watch_copy = phone_copy.clone();
    watch_copy.name = "Same Stamp (watch)".into();

    phone.on_peer_data(vec![phone_copy.clone()]).unwrap();
    watch.on_peer_data(vec![watch_copy.clone()]).unwrap();

    let report = phone.on_peer_data(vec![watch_copy.clone()]).unwrap();
    assert_eq!(report.stale, vec![phone_copy.id.clone()]);
    let report = watch.on_peer_data(vec![phone_copy.clone()]).unwrap();
    assert_eq!(report.stale, vec![watch_copy.id.clone()]);

    let find = |node: &Node| {
        node.programs()
            .into_iter()
            .find(|p| p.id == phone_copy.id)
            .unwrap()
            .name
    };
    assert_eq!(find(&phone), "Same Stamp");
    assert_eq!(find(&watch), "Same Stamp (watch)");
}

#[tokio::test]
async fn merge_is_order_independent() {
    let dir = tempfile::tempdir().unwrap();
    let (phone, watch) = pair(dir.path());

    let base = custom_program("Intervals");
    let mut older = base.clone();
    older.last_modified = Utc::now();
    let mut newer = base.clone();
    newer.name = "Intervals v2".into();
    newer.last_modified = older.last_modified + ChronoDuration::seconds(1);

    phone.on_peer_data(vec![older.clone()]).unwrap();
    phone.on_peer_data(vec![newer.clone()]).unwrap();
    watch.on_peer_data(vec![newer.clone()]).unwrap();
    watch.on_peer_data(vec![older.clone()]).unwrap();

    let pick = |node: &Node| node.programs().into_iter().find(|p| p.id == base.id).unwrap();
    assert_eq!(pick(&phone), newer);
    assert_eq!(pick(&watch), newer);
}

#[tokio::test]
async fn published_record_is_readable_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let (phone, _watch) = pair(dir.path());
    phone.session().link().set_reachable(false);

    let program = phone.publish(custom_program("Local First")).unwrap();
    assert!(phone.programs().iter().any(|p| p.id == program.id));
}

#[tokio::test]
async fn ping_is_answered() {
    let dir = tempfile::tempdir().unwrap();
    let (phone, watch) = pair(dir.path());
    let _p = phone.start();
    let _w = watch.start();

    let before = phone.monitor().stats().successful;
    assert!(phone.ping_peer().await);
    assert!(wait_until(|| phone.monitor().stats().successful > before).await);
}
