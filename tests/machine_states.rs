//! Host and domain state tracking driven through offers, host loss,
//! administrative changes and the periodic passes.

mod fixtures;

use chrono::{Duration, Utc};
use fixtures::{user, Cluster};
use machine_lifecycle::{
    LifecycleStore, Machine, MachineKind, MachineState, MachineStateRecord, StateChangeResult,
};

// === Offers, host loss, deletion ===

#[test]
fn test_basic_host_and_domain_state() {
    let cluster = Cluster::new();
    let hosts = cluster.lifecycle.hosts().machines();
    let domains = cluster.lifecycle.domains().machines();

    cluster.offer("host1", "rack1");
    cluster.offer("host2", "rack2");
    cluster.offer("host1", "rack1");

    assert_eq!(hosts.get_history("host1").unwrap().len(), 1);
    assert_eq!(hosts.get_num_objects_at_state(MachineState::Active).unwrap(), 2);
    assert_eq!(domains.get_num_objects_at_state(MachineState::Active).unwrap(), 2);

    let host1 = hosts.get_object("host1").unwrap().unwrap();
    assert_eq!(host1.current_state(), &hosts.get_history("host1").unwrap()[0]);

    cluster.lifecycle.host_lost("host1").unwrap();

    assert_eq!(hosts.get_num_objects_at_state(MachineState::Active).unwrap(), 1);
    assert_eq!(domains.get_num_objects_at_state(MachineState::Active).unwrap(), 1);
    assert_eq!(hosts.get_num_objects_at_state(MachineState::Dead).unwrap(), 1);
    assert_eq!(domains.get_num_objects_at_state(MachineState::Dead).unwrap(), 1);
    assert_eq!(cluster.host_state("host1"), MachineState::Dead);
    assert_eq!(cluster.domain_state("rack1"), MachineState::Dead);

    // A new host revives its domain
    cluster.offer("host3", "rack1");

    assert_eq!(hosts.get_num_objects_at_state(MachineState::Active).unwrap(), 2);
    assert_eq!(domains.get_num_objects_at_state(MachineState::Active).unwrap(), 2);
    assert_eq!(hosts.get_num_objects_at_state(MachineState::Dead).unwrap(), 1);
    assert_eq!(domains.get_history("rack1").unwrap().len(), 3);

    // The lost host comes back
    cluster.offer("host1", "rack1");

    assert_eq!(hosts.get_num_objects_at_state(MachineState::Active).unwrap(), 3);
    assert_eq!(domains.get_num_objects_at_state(MachineState::Active).unwrap(), 2);

    cluster.lifecycle.host_lost("host1").unwrap();

    assert_eq!(hosts.get_num_objects_at_state(MachineState::Active).unwrap(), 2);
    assert_eq!(domains.get_num_objects_at_state(MachineState::Active).unwrap(), 2);
    assert_eq!(hosts.get_num_objects_at_state(MachineState::Dead).unwrap(), 1);
    assert_eq!(hosts.get_history("host1").unwrap().len(), 4);

    // Repeated loss adds nothing
    assert_eq!(
        cluster.lifecycle.host_lost("host1").unwrap(),
        StateChangeResult::FailureAlreadyAtState
    );
    assert_eq!(hosts.get_num_objects_at_state(MachineState::Dead).unwrap(), 1);
    assert_eq!(hosts.get_history("host1").unwrap().len(), 4);

    assert!(hosts.delete_object("host1").unwrap());

    assert_eq!(hosts.get_num_objects_at_state(MachineState::Dead).unwrap(), 0);
    assert_eq!(hosts.get_num_objects_at_state(MachineState::Active).unwrap(), 2);
    assert!(hosts.get_history("host1").unwrap().is_empty());
}

#[test]
fn test_purged_host_rejoins_as_new() {
    let cluster = Cluster::new();
    cluster.offer("host1", "rack1");
    cluster.lifecycle.host_lost("host1").unwrap();
    cluster
        .lifecycle
        .admin()
        .purge(MachineKind::Host, "host1")
        .unwrap();

    cluster.offer("host1", "rack1");
    let history = cluster.lifecycle.hosts().machines().get_history("host1").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, MachineState::Active);
}

// === Staleness ===

#[test]
fn test_dead_hosts_are_purged() {
    let cluster = Cluster::new();
    let now = Utc::now();

    cluster
        .store
        .insert(Machine::host(
            "1",
            "r1",
            MachineStateRecord::new(MachineState::Active, now),
        ))
        .unwrap();
    cluster
        .store
        .insert(Machine::host(
            "2",
            "r1",
            MachineStateRecord::new(MachineState::Dead, now - Duration::hours(10)),
        ))
        .unwrap();

    cluster.lifecycle.run_staleness_sweep().unwrap();

    assert_eq!(cluster.count(MachineKind::Host, MachineState::Active), 1);
    assert_eq!(cluster.count(MachineKind::Host, MachineState::Dead), 1);

    cluster.lifecycle.admin().set_retention_hours(1);
    let report = cluster.lifecycle.run_staleness_sweep().unwrap();

    assert_eq!(report.purged.len(), 1);
    assert_eq!(cluster.count(MachineKind::Host, MachineState::Active), 1);
    assert_eq!(cluster.count(MachineKind::Host, MachineState::Dead), 0);
}

#[test]
fn test_hosts_missing_after_restart() {
    let started = Utc::now();
    let cluster = Cluster::started_at(Default::default(), started);
    let hosts = cluster.lifecycle.hosts();
    hosts.register("quiet", "rack1", None).unwrap();
    hosts.register("chatty", "rack1", None).unwrap();
    cluster.offer("chatty", "rack1");

    let report = cluster
        .lifecycle
        .check_missing_on_startup(started + Duration::minutes(10))
        .unwrap();
    assert_eq!(report.missing, vec!["quiet".to_string()]);
    assert_eq!(cluster.host_state("quiet"), MachineState::MissingOnStartup);
    assert_eq!(cluster.domain_state("rack1"), MachineState::Active);

    let report = cluster
        .lifecycle
        .check_missing_on_startup(started + Duration::hours(2))
        .unwrap();
    assert_eq!(report.dead, vec!["quiet".to_string()]);
    assert_eq!(cluster.host_state("quiet"), MachineState::Dead);
    assert_eq!(cluster.host_state("chatty"), MachineState::Active);
}

// === Decommissioning ===

#[test]
fn test_empty_decommissioning() {
    let cluster = Cluster::new();
    cluster.offer("slave1", "rack1");

    assert_eq!(
        cluster
            .lifecycle
            .change_state(
                MachineKind::Host,
                "slave1",
                MachineState::StartingDecommission,
                None,
                user("user1"),
            )
            .unwrap(),
        StateChangeResult::Success
    );

    cluster.reconcile();
    assert_eq!(cluster.host_state("slave1"), MachineState::Decommissioned);
}

#[test]
fn test_decommissioning() {
    let cluster = Cluster::new();
    let hosts = cluster.lifecycle.hosts();
    let domains = cluster.lifecycle.domains();

    cluster.offer("slave1", "rack1");
    cluster.offer("slave2", "rack1");
    cluster.offer("slave3", "rack2");
    cluster.offer("slave4", "rack2");
    cluster.inventory.add_running("t1", "slave1", "rack1");
    cluster.inventory.add_running("t2", "slave2", "rack1");

    assert_eq!(cluster.count(MachineKind::Domain, MachineState::Active), 2);
    assert_eq!(cluster.count(MachineKind::Host, MachineState::Active), 4);
    assert_eq!(hosts.active_task_count("slave1", &cluster.inventory).unwrap(), 1);
    assert_eq!(hosts.active_task_count("slave3", &cluster.inventory).unwrap(), 0);

    assert_eq!(
        hosts
            .change_state("slave1", MachineState::StartingDecommission, None, user("user1"))
            .unwrap(),
        StateChangeResult::Success
    );
    assert_eq!(
        hosts
            .change_state("slave1", MachineState::StartingDecommission, None, user("user1"))
            .unwrap(),
        StateChangeResult::FailureAlreadyAtState
    );
    assert_eq!(
        hosts
            .change_state("slave9231", MachineState::StartingDecommission, None, user("user1"))
            .unwrap(),
        StateChangeResult::FailureNotFound
    );
    assert_eq!(cluster.host_state("slave1"), MachineState::StartingDecommission);
    assert_eq!(cluster.user(MachineKind::Host, "slave1").as_deref(), Some("user1"));

    // Offers from a leaving host are declined
    assert!(!cluster.lifecycle.can_place_on("slave1"));

    cluster.reconcile();
    assert_eq!(cluster.host_state("slave1"), MachineState::Decommissioning);
    assert_eq!(cluster.user(MachineKind::Host, "slave1").as_deref(), Some("user1"));
    assert_eq!(hosts.active_task_count("slave1", &cluster.inventory).unwrap(), 1);

    cluster.reconcile();
    assert_eq!(cluster.host_state("slave1"), MachineState::Decommissioning);

    // The replacement lands in the other rack; only now is t1 killed
    let r1 = cluster.start_replacement("t1", "slave4", "rack2");
    let report = cluster.reconcile();
    assert_eq!(report.kills_issued, 1);
    assert_eq!(cluster.inventory.kill_requests(), vec!["t1".to_string()]);
    assert_eq!(hosts.active_task_count("slave4", &cluster.inventory).unwrap(), 1);

    cluster.inventory.finish("t1");
    cluster.reconcile();
    assert_eq!(cluster.host_state("slave1"), MachineState::Decommissioned);
    assert_eq!(cluster.user(MachineKind::Host, "slave1").as_deref(), Some("user1"));

    // Decommission rack2
    cluster.inventory.add_running("t3", "slave3", "rack2");
    assert_eq!(
        domains
            .change_state("rack2", MachineState::StartingDecommission, None, user("user2"))
            .unwrap(),
        StateChangeResult::Success
    );
    assert!(!cluster.lifecycle.can_place_on("slave3"));
    assert!(!cluster.lifecycle.can_place_on("slave4"));

    // A decommissioned host takes nothing until reactivated
    cluster.offer("slave1", "rack1");
    assert!(!cluster.lifecycle.can_place_on("slave1"));
    cluster
        .lifecycle
        .admin()
        .activate(MachineKind::Host, "slave1", None, user("user1"))
        .unwrap();
    assert!(cluster.lifecycle.can_place_on("slave1"));

    let report = cluster.reconcile();
    assert_eq!(cluster.domain_state("rack2"), MachineState::Decommissioning);
    assert_eq!(report.replacements_requested, 2);

    cluster.start_replacement(&r1, "slave1", "rack1");
    cluster.start_replacement("t3", "slave2", "rack1");
    let report = cluster.reconcile();
    assert_eq!(report.kills_issued, 2);

    cluster.inventory.finish("t3");
    cluster.reconcile();
    assert_eq!(cluster.domain_state("rack2"), MachineState::Decommissioning);

    cluster.inventory.finish(&r1);
    cluster.reconcile();
    assert_eq!(cluster.domain_state("rack2"), MachineState::Decommissioned);
    assert_eq!(cluster.user(MachineKind::Domain, "rack2").as_deref(), Some("user2"));

    // Member hosts were never moved by the domain decommission
    assert_eq!(cluster.host_state("slave3"), MachineState::Active);
    assert_eq!(cluster.host_state("slave4"), MachineState::Active);
}

// === Freezing ===

#[test]
fn test_frozen_host_transitions() {
    let cluster = Cluster::new();
    let hosts = cluster.lifecycle.hosts();
    cluster.offer("slave1", "rack1");
    cluster.offer("slave2", "rack1");

    // Out of frozen
    let cases = [
        ("slave1", MachineState::Frozen, StateChangeResult::Success),
        ("slave1", MachineState::Frozen, StateChangeResult::FailureAlreadyAtState),
        ("slave1", MachineState::Decommissioning, StateChangeResult::FailureIllegalTransition),
        ("slave1", MachineState::Decommissioned, StateChangeResult::FailureIllegalTransition),
        ("slave1", MachineState::Active, StateChangeResult::Success),
        // Into frozen
        ("slave2", MachineState::StartingDecommission, StateChangeResult::Success),
        ("slave2", MachineState::Frozen, StateChangeResult::FailureIllegalTransition),
        ("slave2", MachineState::Decommissioning, StateChangeResult::Success),
        ("slave2", MachineState::Frozen, StateChangeResult::FailureIllegalTransition),
        ("slave2", MachineState::Decommissioned, StateChangeResult::Success),
        ("slave2", MachineState::Frozen, StateChangeResult::FailureIllegalTransition),
        ("slave2", MachineState::Active, StateChangeResult::Success),
        ("slave2", MachineState::Frozen, StateChangeResult::Success),
    ];

    for (host, target, expected) in cases {
        assert_eq!(
            hosts.change_state(host, target, None, user("user1")).unwrap(),
            expected,
            "{} -> {}",
            host,
            target
        );
    }
}

#[test]
fn test_frozen_host_takes_no_new_work() {
    let cluster = Cluster::new();
    cluster.offer("slave1", "rack1");
    cluster.offer("slave2", "rack1");
    cluster.inventory.add_running("t1", "slave1", "rack1");

    cluster
        .lifecycle
        .admin()
        .freeze(MachineKind::Host, "slave1", None, user("user1"))
        .unwrap();

    let outcome = cluster
        .lifecycle
        .process_offers(vec![fixtures::offer("slave1", "rack1"), fixtures::offer("slave2", "rack1")])
        .unwrap();
    assert_eq!(outcome.accepted.len(), 1);
    assert_eq!(outcome.accepted[0].host_id, "slave2");

    // Existing work keeps running
    assert!(!cluster.lifecycle.can_place_on("slave1"));
    assert!(cluster.inventory.task("t1").unwrap().is_active);
    assert!(cluster.inventory.kill_requests().is_empty());

    cluster
        .lifecycle
        .admin()
        .activate(MachineKind::Host, "slave1", None, user("user1"))
        .unwrap();
    assert!(cluster.lifecycle.can_place_on("slave1"));
}

#[test]
fn test_frozen_host_can_be_decommissioned() {
    let cluster = Cluster::new();
    cluster.offer("slave1", "rack1");
    cluster.offer("slave2", "rack1");
    cluster.inventory.add_running("t1", "slave1", "rack1");
    cluster.inventory.add_running("t2", "slave2", "rack1");

    let admin = cluster.lifecycle.admin();
    assert!(admin
        .freeze(MachineKind::Host, "slave1", None, user("user1"))
        .unwrap()
        .is_success());
    assert!(admin
        .decommission(MachineKind::Host, "slave1", None, user("user1"))
        .unwrap()
        .is_success());

    cluster.reconcile();
    assert_eq!(cluster.host_state("slave1"), MachineState::Decommissioning);

    cluster.start_replacement("t1", "slave2", "rack1");
    cluster.reconcile();

    cluster.inventory.finish("t1");
    cluster.reconcile();

    let hosts = cluster.lifecycle.hosts();
    assert_eq!(hosts.active_task_count("slave1", &cluster.inventory).unwrap(), 0);
    assert_eq!(hosts.active_task_count("slave2", &cluster.inventory).unwrap(), 2);
    assert_eq!(cluster.host_state("slave1"), MachineState::Decommissioned);
}
