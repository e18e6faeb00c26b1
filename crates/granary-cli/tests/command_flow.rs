//! CLI wiring tests over a real storage root.
//!
//! Backup, prepare, and restore need the external tool and are covered
//! by the engine's own tests; here we exercise the paths the CLI can
//! drive end to end: settings loading, status, and rotation.

use chrono::{Duration, Utc, Weekday};
use clap::Parser;
use granary_catalog::RotationPolicy;
use granary_cli::commands::{rotate, status};
use granary_cli::config::{ClusterSettings, LockSettings, NotifySettings, StorageSettings};
use granary_cli::{Cli, Commands, Context, OutputFormat};
use granary_core::EntryState;
use granary_test_utils::TestStore;

fn settings_for(store: &TestStore, rotation: RotationPolicy) -> granary_cli::config::Settings {
    granary_cli::config::Settings {
        cluster: ClusterSettings {
            data_dir: store.root().join("datadir"),
            xtrabackup_path: "xtrabackup".into(),
            compress: true,
            tool_timeout_secs: 60,
        },
        storage: StorageSettings {
            backup_root: store.root().to_path_buf(),
            prepare_in_place: false,
        },
        rotation,
        lock: LockSettings::default(),
        notify: NotifySettings::default(),
    }
}

fn stamp(ago: Duration) -> String {
    (Utc::now() - ago).format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// A settings file on disk is parsed and validated through the CLI's
/// own flag handling.
#[test]
fn test_settings_load_through_cli_flags() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("granary.toml");
    std::fs::write(
        &path,
        r#"
        [cluster]
        data_dir = "/var/lib/mysql"

        [storage]
        backup_root = "/backups/granary"

        [rotation]
        weekly_count = 8
        "#,
    )
    .unwrap();

    let cli = Cli::parse_from([
        "granary",
        "--config",
        path.to_str().unwrap(),
        "--format",
        "json",
        "status",
    ]);
    let context = cli.context().unwrap();
    assert_eq!(context.settings.rotation.weekly_count, 8);
    assert_eq!(context.settings.rotation.daily_count, 7);
    assert!(matches!(cli.command, Commands::Status(_)));
}

/// Status runs read-only against a seeded store.
#[tokio::test]
async fn test_status_command_over_seeded_store() {
    let store = TestStore::new();
    let anchor = store.seed_full(&stamp(Duration::days(2)), EntryState::Prepared);
    store.seed_incremental(&stamp(Duration::days(1)), anchor.id, EntryState::Raw);

    let context = Context {
        settings: settings_for(&store, RotationPolicy::default()),
        format: OutputFormat::Json,
    };
    status::execute(status::StatusArgs { all: true }, &context)
        .await
        .unwrap();
}

/// Rotation through the CLI prunes on disk: old sidecars flip to
/// tombstones and their artifacts disappear.
#[tokio::test]
async fn test_rotate_command_prunes_old_chain() {
    let store = TestStore::new();
    let old = store.seed_full(&stamp(Duration::days(70)), EntryState::Prepared);
    let current = store.seed_full(&stamp(Duration::hours(1)), EntryState::Prepared);

    // Two weekly slots cover the fresh chain wherever the week boundary
    // falls; the 70-day-old chain is out either way.
    let policy = RotationPolicy {
        daily_count: 0,
        weekly_count: 2,
        monthly_count: 0,
        yearly_count: 0,
        week_start: Weekday::Mon,
        yearly_anchor_day: 1,
    };
    let context = Context {
        settings: settings_for(&store, policy),
        format: OutputFormat::Text,
    };

    rotate::execute(rotate::RotateArgs { dry_run: true }, &context)
        .await
        .unwrap();
    assert!(old.storage_path.is_dir(), "dry run must not delete");

    rotate::execute(rotate::RotateArgs { dry_run: false }, &context)
        .await
        .unwrap();
    assert!(!old.storage_path.exists());
    assert!(current.storage_path.is_dir());

    let sidecar = std::fs::read_to_string(store.layout().sidecar_path(&old.id)).unwrap();
    assert!(sidecar.contains("PRUNED"), "sidecar should be a tombstone");
}
