use super::*;
use std::fs;
use std::path::Path;

use tempfile::TempDir;

fn write_registry(root: &Path, entries: &[(&str, &str)]) -> LauncherPaths {
    let paths = LauncherPaths::from_program_data(root);
    fs::create_dir_all(paths.registry_path().parent().expect("registry parent"))
        .expect("must create registry dir");
    fs::create_dir_all(paths.manifests_dir()).expect("must create manifests dir");

    let list = entries
        .iter()
        .map(|(app_id, location)| {
            format!("{{\"InstallLocation\": \"{location}\", \"AppName\": \"{app_id}\"}}")
        })
        .collect::<Vec<_>>()
        .join(", ");
    fs::write(
        paths.registry_path(),
        format!("{{\"InstallationList\": [{list}]}}"),
    )
    .expect("must write registry");
    paths
}

fn write_manifest(paths: &LauncherPaths, file: &str, app_id: &str, display: &str, location: &str) {
    fs::write(
        paths.manifests_dir().join(file),
        format!(
            "{{\"AppName\": \"{app_id}\", \"DisplayName\": \"{display}\", \"InstallLocation\": \"{location}\", \"ExpectingDLCInstalled\": {{}}}}"
        ),
    )
    .expect("must write manifest");
}

#[test]
fn program_data_layout_matches_launcher_locations() {
    let paths = LauncherPaths::from_program_data("/pd");
    assert_eq!(
        paths.registry_path(),
        Path::new("/pd/Epic/UnrealEngineLauncher/LauncherInstalled.dat")
    );
    assert_eq!(
        paths.manifests_dir(),
        Path::new("/pd/Epic/EpicGamesLauncher/Data/Manifests")
    );
}

#[test]
fn labels_follow_registry_order_and_disambiguate() {
    let root = TempDir::new().expect("must create temp dir");
    let paths = write_registry(
        root.path(),
        &[("Y2", "/games/Bar"), ("X1", "/games/Foo"), ("Same", "/games/Same")],
    );
    write_manifest(&paths, "a.item", "X1", "Foo Game", "/games/Foo");
    write_manifest(&paths, "b.item", "Y2", "Bar Game", "/games/Bar");
    write_manifest(&paths, "c.item", "Same", "Same", "/games/Same");

    let catalog = load_catalog(&paths).expect("must load catalog");
    assert_eq!(
        catalog.list_applications(),
        ["Bar Game (Y2)", "Foo Game (X1)", "Same"]
    );
    assert_eq!(catalog.select_application("Foo Game (X1)"), Some("X1"));
    assert_eq!(catalog.select_application("Same"), Some("Same"));
    assert_eq!(catalog.select_application("Foo Game"), None);
    assert_eq!(
        catalog.manifest_path("X1"),
        Some(paths.manifests_dir().join("a.item").as_path())
    );
    assert_eq!(catalog.registry_path(), paths.registry_path());
}

#[test]
fn registry_entries_without_manifest_are_not_listed() {
    let root = TempDir::new().expect("must create temp dir");
    let paths = write_registry(root.path(), &[("X1", "/games/Foo"), ("Ghost", "/games/Ghost")]);
    write_manifest(&paths, "a.item", "X1", "Foo Game", "/games/Foo");

    let catalog = load_catalog(&paths).expect("must load catalog");
    assert_eq!(catalog.list_applications(), ["Foo Game (X1)"]);
    assert!(catalog.manifest("Ghost").is_none());
}

#[test]
fn registry_entries_are_kept_first_one_winning() {
    let root = TempDir::new().expect("must create temp dir");
    let paths = write_registry(
        root.path(),
        &[("X1", "/games/Foo"), ("Ghost", "/games/Ghost"), ("X1", "/games/Other")],
    );
    write_manifest(&paths, "a.item", "X1", "Foo Game", "/games/Foo");
    write_manifest(&paths, "z.item", "Orphan", "Orphan", "/games/Orphan");

    let catalog = load_catalog(&paths).expect("must load catalog");
    let entry = catalog.registry_entry("X1").expect("X1 must be registered");
    assert_eq!(entry.install_location, "/games/Foo");
    assert_eq!(
        catalog
            .registry_entry("Ghost")
            .map(|entry| entry.install_location.as_str()),
        Some("/games/Ghost")
    );
    assert!(catalog.manifest("Orphan").is_some());
    assert!(catalog.registry_entry("Orphan").is_none());
}

#[test]
fn malformed_manifest_is_skipped_not_fatal() {
    let root = TempDir::new().expect("must create temp dir");
    let paths = write_registry(root.path(), &[("X1", "/games/Foo")]);
    write_manifest(&paths, "a.item", "X1", "Foo Game", "/games/Foo");
    fs::write(paths.manifests_dir().join("broken.item"), "{\"AppName\": ")
        .expect("must write broken manifest");

    let catalog = load_catalog(&paths).expect("must load catalog");
    assert_eq!(catalog.list_applications(), ["Foo Game (X1)"]);
    assert_eq!(catalog.skipped().len(), 1);
    assert_eq!(
        catalog.skipped()[0].path,
        paths.manifests_dir().join("broken.item")
    );
}

#[test]
fn non_item_files_are_ignored() {
    let root = TempDir::new().expect("must create temp dir");
    let paths = write_registry(root.path(), &[("X1", "/games/Foo")]);
    write_manifest(&paths, "a.item", "X1", "Foo Game", "/games/Foo");
    fs::write(paths.manifests_dir().join("a.item.bak"), "not json").expect("must write bak");
    fs::create_dir(paths.manifests_dir().join("dir.item")).expect("must create dir");

    let catalog = load_catalog(&paths).expect("must load catalog");
    assert_eq!(catalog.manifests().len(), 1);
    assert!(catalog.skipped().is_empty());
}

#[test]
fn resolve_selector_accepts_label_or_app_id() {
    let root = TempDir::new().expect("must create temp dir");
    let paths = write_registry(root.path(), &[("X1", "/games/Foo")]);
    write_manifest(&paths, "a.item", "X1", "Foo Game", "/games/Foo");

    let catalog = load_catalog(&paths).expect("must load catalog");
    assert_eq!(catalog.resolve_selector("Foo Game (X1)"), Some("X1"));
    assert_eq!(catalog.resolve_selector("X1"), Some("X1"));
    assert_eq!(catalog.resolve_selector("nope"), None);
    assert_eq!(catalog.label_for("X1"), Some("Foo Game (X1)"));
}

#[test]
fn duplicate_manifests_keep_first_but_stay_visible() {
    let root = TempDir::new().expect("must create temp dir");
    let paths = write_registry(root.path(), &[("X1", "/games/Foo")]);
    write_manifest(&paths, "a.item", "X1", "Foo Game", "/games/Foo");
    write_manifest(&paths, "b.item", "X1", "Foo Copy", "/games/Foo");

    let catalog = load_catalog(&paths).expect("must load catalog");
    assert_eq!(catalog.manifests().len(), 2);
    assert_eq!(
        catalog.manifest("X1").map(|manifest| manifest.display_name()),
        Some("Foo Game")
    );
}

#[test]
fn missing_registry_is_unreadable() {
    let root = TempDir::new().expect("must create temp dir");
    let paths = LauncherPaths::from_program_data(root.path());
    let err = load_catalog(&paths).expect_err("missing registry must fail");
    assert!(matches!(err, DiscoveryError::RegistryUnreadable { .. }));
}

#[test]
fn malformed_registry_is_fatal() {
    let root = TempDir::new().expect("must create temp dir");
    let paths = write_registry(root.path(), &[]);
    fs::write(paths.registry_path(), "{not json").expect("must corrupt registry");
    let err = load_catalog(&paths).expect_err("malformed registry must fail");
    assert!(matches!(err, DiscoveryError::RegistryMalformed { .. }));
}

#[test]
fn missing_manifest_dir_is_unreadable() {
    let root = TempDir::new().expect("must create temp dir");
    let paths = write_registry(root.path(), &[("X1", "/games/Foo")]);
    fs::remove_dir_all(paths.manifests_dir()).expect("must remove manifests dir");
    let err = load_catalog(&paths).expect_err("missing manifest dir must fail");
    assert!(matches!(err, DiscoveryError::ManifestDirUnreadable { .. }));
}

#[test]
fn display_label_only_appends_id_when_needed() {
    assert_eq!(display_label("Fortnite", "Fortnite"), "Fortnite");
    assert_eq!(display_label("Foo Game", "X1"), "Foo Game (X1)");
}
