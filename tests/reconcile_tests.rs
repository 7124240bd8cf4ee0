//! Integration tests for the reconciliation loop: sweeps probe every
//! non-error server's unit over scripted sessions and adopt whatever
//! state the hosts report.

mod common;

use craftops::connection::CommandOutput;
use craftops::model::ServerStatus;
use craftops::reconcile::Reconciler;
use craftops::store::StateStore;

use common::*;

fn reconciler(rig: &TestRig) -> Reconciler {
    Reconciler::new(
        &rig.config,
        rig.store.clone(),
        rig.store.clone(),
        rig.pool.clone(),
    )
}

fn inactive() -> CommandOutput {
    CommandOutput::failure(3, "inactive\n".to_string(), String::new())
}

#[tokio::test]
async fn a_sweep_adopts_the_observed_unit_state() {
    let rig = TestRig::new().await;

    // Crashed while we believed it was running.
    let crashed = server_record(
        rig.account,
        rig.host.id,
        "crashed",
        ServerStatus::Running,
        25565,
        26565,
    );
    // Started by hand while we believed it was stopped.
    let adopted = server_record(
        rig.account,
        rig.host.id,
        "adopted",
        ServerStatus::Stopped,
        25566,
        26566,
    );
    rig.conn
        .set_command_result(&format!("is-active {}", crashed.unit_name()), inactive());
    rig.conn.set_command_result(
        &format!("is-active {}", adopted.unit_name()),
        ok_output("active\n"),
    );
    let (crashed_id, adopted_id) = (crashed.id, adopted.id);
    rig.store.insert_server(crashed).await.unwrap();
    rig.store.insert_server(adopted).await.unwrap();

    let summary = reconciler(&rig).run_once().await;
    assert_eq!(summary.probed, 2);
    assert_eq!(summary.transitions, 2);
    assert_eq!(summary.failures, 0);

    let crashed = rig.store.server(crashed_id).await.unwrap();
    assert_eq!(crashed.status, ServerStatus::Stopped);
    assert!(crashed.last_stopped_at.is_some());

    let adopted = rig.store.server(adopted_id).await.unwrap();
    assert_eq!(adopted.status, ServerStatus::Running);
    assert!(adopted.last_started_at.is_some());
}

#[tokio::test]
async fn a_server_still_converging_is_left_alone() {
    let rig = TestRig::new().await;
    rig.conn.set_command_result("is-active", inactive());
    let record = server_record(
        rig.account,
        rig.host.id,
        "booting",
        ServerStatus::Starting,
        25565,
        26565,
    );
    let id = record.id;
    rig.store.insert_server(record).await.unwrap();

    let summary = reconciler(&rig).run_once().await;
    assert_eq!(summary.probed, 1);
    assert_eq!(summary.transitions, 0);
    assert_eq!(rig.store.server(id).await.unwrap().status, ServerStatus::Starting);
}

#[tokio::test]
async fn error_servers_are_excluded_from_the_sweep() {
    let rig = TestRig::new().await;
    rig.conn.set_command_result("is-active", ok_output("active\n"));
    let broken = server_record(
        rig.account,
        rig.host.id,
        "broken",
        ServerStatus::Error,
        25565,
        26565,
    );
    let healthy = server_record(
        rig.account,
        rig.host.id,
        "healthy",
        ServerStatus::Running,
        25566,
        26566,
    );
    let broken_id = broken.id;
    rig.store.insert_server(broken).await.unwrap();
    rig.store.insert_server(healthy).await.unwrap();

    let summary = reconciler(&rig).run_once().await;
    assert_eq!(summary.probed, 1);
    assert_eq!(summary.transitions, 0);
    assert_eq!(rig.store.server(broken_id).await.unwrap().status, ServerStatus::Error);
}

#[tokio::test]
async fn one_unreachable_host_does_not_abort_the_sweep() {
    let rig = TestRig::new().await;
    rig.conn.set_command_result("is-active", ok_output("active\n"));

    // A second host with no credentials on file: probing it fails.
    let orphan_host = host_record(rig.account);
    rig.store.insert_host(orphan_host.clone()).await.unwrap();
    let orphan = server_record(
        rig.account,
        orphan_host.id,
        "orphan",
        ServerStatus::Running,
        25565,
        26565,
    );
    let reachable = server_record(
        rig.account,
        rig.host.id,
        "reachable",
        ServerStatus::Stopped,
        25565,
        26565,
    );
    let (orphan_id, reachable_id) = (orphan.id, reachable.id);
    rig.store.insert_server(orphan).await.unwrap();
    rig.store.insert_server(reachable).await.unwrap();

    let summary = reconciler(&rig).run_once().await;
    assert_eq!(summary.probed, 2);
    assert_eq!(summary.transitions, 1);
    assert_eq!(summary.failures, 1);

    // The reachable server was still corrected, the orphan untouched.
    assert_eq!(
        rig.store.server(reachable_id).await.unwrap().status,
        ServerStatus::Running
    );
    assert_eq!(rig.store.server(orphan_id).await.unwrap().status, ServerStatus::Running);
}

#[tokio::test]
async fn a_second_sweep_over_settled_state_plans_nothing() {
    let rig = TestRig::new().await;
    rig.conn.set_command_result("is-active", ok_output("active\n"));
    let record = server_record(
        rig.account,
        rig.host.id,
        "drifted",
        ServerStatus::Stopped,
        25565,
        26565,
    );
    rig.store.insert_server(record).await.unwrap();
    let reconciler = reconciler(&rig);

    let first = reconciler.run_once().await;
    assert_eq!(first.transitions, 1);

    let second = reconciler.run_once().await;
    assert_eq!(second.probed, 1);
    assert_eq!(second.transitions, 0);
    assert_eq!(second.failures, 0);
}

#[tokio::test]
async fn the_background_loop_sweeps_immediately() {
    let rig = TestRig::new().await;
    rig.conn.set_command_result("is-active", ok_output("active\n"));
    let record = server_record(
        rig.account,
        rig.host.id,
        "drifted",
        ServerStatus::Stopped,
        25565,
        26565,
    );
    let id = record.id;
    rig.store.insert_server(record).await.unwrap();

    let reconciler = std::sync::Arc::new(reconciler(&rig));
    let handle = reconciler.spawn();
    wait_for_status(&rig.store, id, ServerStatus::Running).await;
    handle.abort();
}
