//! Session state machine and teardown guarantees, driven through the
//! in-memory backends so every failure stage can be reached without root.

use rootbox::config::session::{ExecMode, SessionConfig};
use rootbox::kernel::credentials::CredentialOps;
use rootbox::kernel::mount::{target_path, MountSet, MOUNT_PLAN};
use rootbox::observability::SecurityEventType;
use rootbox::testing::{CredentialCall, FakeCredentials, FakeJail, FakeMounts, JailCall};
use rootbox::{
    BoundaryStep, CommandLine, ExecutionError, ExitStatus, IsolationError, IsolationSession,
    MountOperation, PrivilegeSession, PrivilegeState, RootTransitionStage, SessionState,
};
use std::path::PathBuf;
use tempfile::TempDir;

struct Harness {
    creds: FakeCredentials,
    mounts: FakeMounts,
    jail: FakeJail,
    dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_creds(FakeCredentials::setuid_root(1000, 1000, vec![27, 100]))
    }

    fn with_creds(creds: FakeCredentials) -> Self {
        Self {
            creds,
            mounts: FakeMounts::new(),
            jail: FakeJail::new(),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn root(&self) -> PathBuf {
        self.dir.path().canonicalize().unwrap()
    }

    fn session(&self) -> IsolationSession {
        self.session_with(&SessionConfig::default())
    }

    fn session_with(&self, config: &SessionConfig) -> IsolationSession {
        let privilege = PrivilegeSession::with_ops(Box::new(self.creds.clone())).unwrap();
        IsolationSession::with_backends(
            privilege,
            MountSet::new(Box::new(self.mounts.clone()), config.lazy_unmount),
            Box::new(self.jail.clone()),
            config,
        )
    }

    fn planned(&self, targets: &[&str]) -> Vec<PathBuf> {
        let root = self.root();
        targets.iter().map(|t| root.join(t)).collect()
    }
}

fn true_command() -> CommandLine {
    CommandLine::from_words(vec!["true".to_string()], ExecMode::Direct)
}

#[test]
fn full_session_mounts_runs_and_releases_everything() {
    let h = Harness::new();
    let mut session = h.session();

    let status = session.execute(h.dir.path(), &true_command()).unwrap();
    assert_eq!(status, ExitStatus::Exited(0));
    assert_eq!(session.state(), SessionState::Finalizing);
    assert_eq!(h.mounts.mounted_under(&h.root()).len(), MOUNT_PLAN.len());

    let report = session.close();
    assert!(report.is_clean());
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.privilege().state(), PrivilegeState::Unprivileged);
    assert!(h.mounts.mounted_under(&h.root()).is_empty());
    assert!(session.audit().has(SecurityEventType::TeardownComplete));
}

#[test]
fn mount_table_round_trips_across_a_session() {
    let mut h = Harness::new();
    h.mounts = FakeMounts::with_existing(vec![PathBuf::from("/"), PathBuf::from("/proc")]);
    let before = h.mounts.mounted();

    let mut session = h.session();
    session.execute(h.dir.path(), &true_command()).unwrap();
    session.close();

    assert_eq!(h.mounts.mounted(), before);
}

#[test]
fn nonzero_exit_is_a_status_not_an_error() {
    let h = Harness::new();
    h.jail.exit_with(ExitStatus::Exited(3));
    let mut session = h.session();

    let status = session.execute(h.dir.path(), &true_command()).unwrap();
    assert_eq!(status.code(), Some(3));
    assert!(session.close().is_clean());
}

#[test]
fn privilege_is_dropped_whichever_stage_fails() {
    let failures: Vec<Box<dyn Fn(&Harness)>> = vec![
        Box::new(|h: &Harness| h.mounts.fail_mount("sysfs")),
        Box::new(|h: &Harness| h.jail.fail_enter_root(RootTransitionStage::Chroot)),
        Box::new(|h: &Harness| h.jail.fail_restrict(BoundaryStep::BoundingSet)),
        Box::new(|h: &Harness| h.jail.fail_spawn("No such file or directory")),
    ];

    for inject in failures {
        let h = Harness::new();
        inject(&h);
        let mut session = h.session();
        assert_eq!(session.privilege().state(), PrivilegeState::Elevated);

        assert!(session.execute(h.dir.path(), &true_command()).is_err());
        assert_eq!(session.state(), SessionState::Finalizing);

        let report = session.close();
        assert!(report.is_clean());
        assert_eq!(session.privilege().state(), PrivilegeState::Unprivileged);
        assert!(h.mounts.mounted_under(&h.root()).is_empty());
    }
}

#[test]
fn failure_at_an_entry_unmounts_earlier_entries_in_reverse() {
    for (k, failing) in MOUNT_PLAN.iter().enumerate() {
        let h = Harness::new();
        h.mounts.fail_mount(failing.source_type);
        let mut session = h.session();

        let err = session.begin(h.dir.path()).unwrap_err();
        match err {
            IsolationError::Mount(e) => {
                assert_eq!(e.entry.source_type, failing.source_type);
                assert_eq!(e.operation, MountOperation::Mount);
            }
            other => panic!("expected a mount error, got {:?}", other),
        }
        assert_eq!(session.sandbox().unwrap().mounts_done().len(), k);

        session.close();
        let expected: Vec<PathBuf> = MOUNT_PLAN[..k]
            .iter()
            .rev()
            .map(|entry| target_path(&h.root(), entry))
            .collect();
        assert_eq!(h.mounts.unmount_order(), expected);
    }
}

#[test]
fn devpts_failure_unwinds_devtmpfs_then_sysfs_then_proc() {
    let h = Harness::new();
    h.mounts.fail_mount("devpts");
    let mut session = h.session();

    let err = session.begin(h.dir.path()).unwrap_err();
    let IsolationError::Mount(mount_err) = &err else {
        panic!("expected a mount error, got {:?}", err);
    };
    assert_eq!(mount_err.entry.source_type, "devpts");
    assert_eq!(mount_err.target, h.root().join("dev/pts"));
    assert_eq!(err.stage(), "mount");

    let report = session.close();
    assert!(report.is_clean());
    assert_eq!(h.mounts.unmount_order(), h.planned(&["dev", "sys", "proc"]));
    assert!(session.audit().has(SecurityEventType::MountFailed));
}

#[test]
fn mount_point_creation_failure_is_reported_as_create_dir() {
    let h = Harness::new();
    h.mounts.fail_ensure_dir("sys");
    let mut session = h.session();

    match session.begin(h.dir.path()).unwrap_err() {
        IsolationError::Mount(e) => assert_eq!(e.operation, MountOperation::CreateDir),
        other => panic!("expected a mount error, got {:?}", other),
    }
    session.close();
    assert_eq!(h.mounts.unmount_order(), h.planned(&["proc"]));
}

#[test]
fn missing_target_touches_neither_mounts_nor_privilege() {
    let h = Harness::new();
    let mut session = h.session();
    let missing = h.dir.path().join("does-not-exist");

    let err = session.begin(&missing).unwrap_err();
    assert!(matches!(err, IsolationError::InvalidTarget { .. }));
    assert!(h.mounts.calls().is_empty());
    assert!(h.creds.mutations().is_empty());
    assert_eq!(session.privilege().state(), PrivilegeState::Elevated);
    assert!(session.sandbox().is_none());
}

#[test]
fn unprivileged_caller_is_refused_before_any_filesystem_access() {
    let h = Harness::with_creds(FakeCredentials::unprivileged(1000, 1000, vec![]));
    let mut session = h.session_with(&SessionConfig {
        motd: true,
        ..Default::default()
    });
    std::fs::create_dir(h.dir.path().join("etc")).unwrap();

    let err = session.begin(h.dir.path()).unwrap_err();
    assert!(matches!(err, IsolationError::InsufficientPrivilege));
    assert_eq!(err.exit_code(), 1);
    assert!(h.mounts.calls().is_empty());
    assert!(!h.dir.path().join("etc/motd").exists());

    let report = session.close();
    assert!(report.is_clean());
    assert!(h.creds.mutations().is_empty());
    assert!(h.jail.calls().is_empty());
}

#[test]
fn second_privilege_drop_makes_no_syscalls() {
    let creds = FakeCredentials::setuid_root(1000, 1000, vec![27]);
    let mut privilege = PrivilegeSession::with_ops(Box::new(creds.clone())).unwrap();

    privilege.drop_privileges().unwrap();
    let after_first = creds.mutations();
    assert_eq!(
        after_first,
        vec![
            CredentialCall::SetGid(1000),
            CredentialCall::SetGroups(vec![27]),
            CredentialCall::SetUid(1000),
        ]
    );

    privilege.drop_privileges().unwrap();
    assert_eq!(creds.mutations(), after_first);
}

#[test]
fn close_is_idempotent() {
    let h = Harness::new();
    let mut session = h.session();
    session.execute(h.dir.path(), &true_command()).unwrap();

    assert!(session.close().is_clean());
    let mutations = h.creds.mutations();
    let mount_calls = h.mounts.calls();

    let second = session.close();
    assert!(second.is_clean());
    assert_eq!(second.error_count(), 0);
    assert_eq!(h.creds.mutations(), mutations);
    assert_eq!(h.mounts.calls(), mount_calls);
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn operations_out_of_order_are_invalid_state() {
    let h = Harness::new();
    let mut session = h.session();

    let err = session.run_command(&true_command()).unwrap_err();
    assert!(matches!(
        err,
        IsolationError::InvalidState {
            operation: "run_command",
            state: SessionState::Idle
        }
    ));
    assert_eq!(session.state(), SessionState::Finalizing);

    // Not reusable after a protocol violation.
    assert!(matches!(
        session.begin(h.dir.path()),
        Err(IsolationError::InvalidState { .. })
    ));
    assert!(h.mounts.calls().is_empty());
    session.close();
}

#[test]
fn operations_after_close_leave_the_session_closed() {
    let h = Harness::new();
    let mut session = h.session();
    session.close();

    assert!(matches!(
        session.begin(h.dir.path()),
        Err(IsolationError::InvalidState {
            state: SessionState::Closed,
            ..
        })
    ));
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn failed_restrict_kills_the_jail_before_unmounting() {
    let h = Harness::new();
    h.jail.fail_restrict(BoundaryStep::Verify);
    let mut session = h.session();

    let err = session.execute(h.dir.path(), &true_command()).unwrap_err();
    assert_eq!(err.stage(), "capability boundary");
    assert!(session.audit().has(SecurityEventType::BoundaryFailed));

    session.close();
    let calls = h.jail.calls();
    assert_eq!(calls.last(), Some(&JailCall::Release));
    assert!(h.mounts.mounted_under(&h.root()).is_empty());
}

#[test]
fn fork_failure_is_a_root_transition_failure() {
    let h = Harness::new();
    h.jail.fail_enter_root(RootTransitionStage::Fork);
    let mut session = h.session();

    session.begin(h.dir.path()).unwrap();
    let err = session.enter_root().unwrap_err();
    assert!(matches!(
        err,
        IsolationError::RootTransitionFailed {
            stage: RootTransitionStage::Fork,
            ..
        }
    ));
    assert!(!session.sandbox().unwrap().is_entered());

    session.close();
    assert!(!h.jail.calls().contains(&JailCall::Release));
}

#[test]
fn spawn_failure_is_an_execution_error() {
    let h = Harness::new();
    h.jail.fail_spawn("No such file or directory");
    let mut session = h.session();

    let err = session
        .execute(
            h.dir.path(),
            &CommandLine::from_words(vec!["/nonexistent".to_string()], ExecMode::Direct),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        IsolationError::Execution(ExecutionError::SpawnFailed(_))
    ));
    assert_eq!(err.stage(), "spawn");
    assert!(session.close().is_clean());
}

#[test]
fn empty_command_never_reaches_the_jail() {
    let h = Harness::new();
    let mut session = h.session();

    let err = session
        .execute(h.dir.path(), &CommandLine::Argv(Vec::new()))
        .unwrap_err();
    assert!(matches!(
        err,
        IsolationError::Execution(ExecutionError::EmptyCommand)
    ));
    assert!(!h
        .jail
        .calls()
        .iter()
        .any(|c| matches!(c, JailCall::Exec(_))));
    session.close();
}

#[test]
fn shell_mode_runs_the_configured_shell() {
    let h = Harness::new();
    let config = SessionConfig {
        shell: PathBuf::from("/bin/bash"),
        ..Default::default()
    };
    let mut session = h.session_with(&config);

    let command = CommandLine::from_words(
        vec!["echo".to_string(), "hi".to_string()],
        ExecMode::Shell,
    );
    session.execute(h.dir.path(), &command).unwrap();
    session.close();

    let exec = h
        .jail
        .calls()
        .into_iter()
        .find_map(|c| match c {
            JailCall::Exec(request) => Some(request),
            _ => None,
        })
        .unwrap();
    assert_eq!(exec.argv, vec!["/bin/bash", "-c", "echo hi"]);
}

#[test]
fn busy_mount_is_a_residual_error_and_privilege_still_drops() {
    let h = Harness::new();
    h.mounts.fail_unmount("dev");
    let mut session = h.session();
    session.execute(h.dir.path(), &true_command()).unwrap();

    let report = session.close();
    assert_eq!(report.unmount_errors.len(), 1);
    assert_eq!(report.unmount_errors[0].operation, MountOperation::Unmount);
    assert_eq!(report.messages().len(), 1);
    assert_eq!(session.privilege().state(), PrivilegeState::Unprivileged);
    assert!(session.audit().has(SecurityEventType::TeardownPartial));

    // Later entries were still attempted.
    assert_eq!(
        h.mounts.unmount_order(),
        h.planned(&["run", "dev/pts", "dev", "sys", "proc"])
    );
}

#[test]
fn lazy_unmount_is_passed_through() {
    let h = Harness::new();
    let mut session = h.session_with(&SessionConfig {
        lazy_unmount: true,
        ..Default::default()
    });
    session.execute(h.dir.path(), &true_command()).unwrap();
    session.close();

    assert!(h.mounts.calls().iter().all(|c| match c {
        rootbox::testing::MountCall::Unmount { lazy, .. } => *lazy,
        _ => true,
    }));
}

#[test]
fn failed_privilege_drop_is_reported_not_raised() {
    let h = Harness::new();
    h.creds.fail_on(CredentialCall::SetGroups(vec![27, 100]));
    let mut session = h.session();
    session.execute(h.dir.path(), &true_command()).unwrap();

    let report = session.close();
    assert!(report.privilege_error.is_some());
    assert!(!report.is_clean());
    assert!(session.audit().has(SecurityEventType::PrivilegeDropFailed));
    // setuid must never run once the groups could not be restored.
    assert!(!h
        .creds
        .mutations()
        .iter()
        .any(|c| matches!(c, CredentialCall::SetUid(_))));
}

#[test]
fn dropping_an_unclosed_session_tears_it_down() {
    let h = Harness::new();
    {
        let mut session = h.session();
        session.begin(h.dir.path()).unwrap();
        assert_eq!(h.mounts.mounted_under(&h.root()).len(), MOUNT_PLAN.len());
    }
    assert!(h.mounts.mounted_under(&h.root()).is_empty());
    assert!(h
        .creds
        .mutations()
        .contains(&CredentialCall::SetUid(1000)));
}

#[test]
fn motd_is_written_after_mounts_when_etc_exists() {
    let h = Harness::new();
    std::fs::create_dir(h.dir.path().join("etc")).unwrap();
    let mut session = h.session_with(&SessionConfig {
        motd: true,
        ..Default::default()
    });

    session.begin(h.dir.path()).unwrap();
    let banner = std::fs::read_to_string(h.dir.path().join("etc/motd")).unwrap();
    assert!(banner.contains(&h.root().display().to_string()));
    session.close();
}

#[test]
fn audit_trail_follows_the_session() {
    let h = Harness::new();
    let mut session = h.session();
    session.execute(h.dir.path(), &true_command()).unwrap();
    session.close();

    let kinds: Vec<SecurityEventType> = session
        .audit()
        .events()
        .iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        kinds,
        vec![
            SecurityEventType::SessionStart,
            SecurityEventType::MountEstablished,
            SecurityEventType::RootEntered,
            SecurityEventType::BoundaryEstablished,
            SecurityEventType::CommandSpawned,
            SecurityEventType::CommandExited,
            SecurityEventType::PrivilegeDropped,
            SecurityEventType::TeardownComplete,
        ]
    );
    let session_id = session.audit().session_id();
    assert!(session
        .audit()
        .events()
        .iter()
        .all(|e| e.session_id == session_id && e.root.as_deref() == Some(h.root().as_path())));
}

#[test]
fn trailing_slash_and_plain_target_name_the_same_root() {
    let h = Harness::new();
    let mut session = h.session();
    let with_slash = PathBuf::from(format!("{}/", h.dir.path().display()));

    session.begin(&with_slash).unwrap();
    assert_eq!(session.root(), Some(h.root().as_path()));
    session.close();
    assert!(h.mounts.mounted_under(&h.root()).is_empty());
}

#[test]
fn elevation_through_saved_set_user_id_is_audited() {
    let creds = FakeCredentials::setuid_root(1000, 1000, vec![]);
    // Start out with the effective UID already given up.
    creds.set_effective_uid(1000).unwrap();
    let h = Harness::with_creds(creds);
    let mut session = h.session();
    assert_eq!(session.privilege().state(), PrivilegeState::Unprivileged);

    session.elevate().unwrap();
    assert_eq!(session.privilege().state(), PrivilegeState::Elevated);
    assert!(session.audit().has(SecurityEventType::PrivilegeElevated));

    session.execute(h.dir.path(), &true_command()).unwrap();
    assert!(session.close().is_clean());
    assert_eq!(h.creds.effective_uid(), 1000);
}

#[test]
fn denied_elevation_leaves_the_session_idle() {
    let h = Harness::with_creds(FakeCredentials::unprivileged(1000, 1000, vec![]));
    let mut session = h.session();

    let err = session.elevate().unwrap_err();
    assert_eq!(err.stage(), "elevation");
    assert_eq!(session.state(), SessionState::Idle);
    assert!(matches!(
        session.begin(h.dir.path()),
        Err(IsolationError::InsufficientPrivilege)
    ));
}
