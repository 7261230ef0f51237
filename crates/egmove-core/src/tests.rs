use super::*;
use std::path::{Path, PathBuf};

const TAB_REGISTRY: &str = "{\n\t\"InstallationList\": [\n\t\t{\n\t\t\t\"InstallLocation\": \"/games/Foo\",\n\t\t\t\"NamespaceId\": \"ns-1\",\n\t\t\t\"AppName\": \"X1\",\n\t\t\t\"AppVersion\": \"1.0.2\"\n\t\t},\n\t\t{\n\t\t\t\"InstallLocation\": \"/games/Bar\",\n\t\t\t\"NamespaceId\": \"ns-2\",\n\t\t\t\"AppName\": \"Y2\",\n\t\t\t\"AppVersion\": \"3.1\"\n\t\t}\n\t]\n}";

fn sample_manifest(extra: &str) -> String {
    format!(
        "{{\n    \"FormatVersion\": 0,\n    \"AppName\": \"X1\",\n    \"DisplayName\": \"Foo Game\",\n    \"InstallLocation\": \"/games/Foo\",\n    \"ManifestLocation\": \"/games/Foo/m.item\",\n    \"StagingLocation\": \"/games/Foo/stage\"{extra}\n}}\n"
    )
}

#[test]
fn registry_lists_entries_in_document_order() {
    let registry = InstallRegistry::from_json_str(TAB_REGISTRY).expect("must parse registry");
    let entries = registry.entries();
    assert_eq!(
        entries,
        vec![
            RegistryEntry {
                app_id: "X1".to_string(),
                install_location: "/games/Foo".to_string(),
            },
            RegistryEntry {
                app_id: "Y2".to_string(),
                install_location: "/games/Bar".to_string(),
            },
        ]
    );
}

#[test]
fn registry_rewrite_touches_only_the_matching_install_location() {
    let mut registry = InstallRegistry::from_json_str(TAB_REGISTRY).expect("must parse registry");
    assert!(registry.set_install_location("X1", "/archive/Foo"));

    let rendered = registry.to_json_string().expect("must render registry");
    assert_eq!(
        rendered,
        TAB_REGISTRY.replace("\"/games/Foo\"", "\"/archive/Foo\"")
    );
    assert_eq!(
        registry.entry("Y2").map(|entry| entry.install_location),
        Some("/games/Bar".to_string())
    );
}

#[test]
fn registry_set_install_location_reports_missing_entry() {
    let mut registry = InstallRegistry::from_json_str(TAB_REGISTRY).expect("must parse registry");
    assert!(!registry.set_install_location("Z9", "/archive/Z9"));
    assert_eq!(
        registry.to_json_string().expect("must render registry"),
        TAB_REGISTRY
    );
}

#[test]
fn registry_entry_document_keeps_unknown_fields_and_push_appends() {
    let source = InstallRegistry::from_json_str(TAB_REGISTRY).expect("must parse registry");
    let entry = source
        .entry_document("Y2")
        .cloned()
        .expect("Y2 must be present");
    assert_eq!(entry["AppVersion"], "3.1");

    let mut target = InstallRegistry::from_json_str("{\"InstallationList\": []}")
        .expect("must parse empty registry");
    target.push_entry(entry).expect("must append entry");
    assert_eq!(
        target.entry("Y2").map(|entry| entry.install_location),
        Some("/games/Bar".to_string())
    );
    assert!(target
        .push_entry(serde_json::json!({ "AppName": "Z9" }))
        .is_err());
    assert_eq!(target.entries().len(), 1);
}

#[test]
fn registry_without_installation_list_is_rejected() {
    let err = InstallRegistry::from_json_str("{\"Other\": []}")
        .expect_err("registry without list must fail");
    assert!(matches!(err, DocumentError::Shape(_)));
    assert!(err.to_string().contains("InstallationList"));
}

#[test]
fn registry_entry_without_app_name_is_rejected() {
    let err = InstallRegistry::from_json_str(
        "{\"InstallationList\": [{\"InstallLocation\": \"/games/Foo\"}]}",
    )
    .expect_err("entry without AppName must fail");
    assert!(err.to_string().contains("InstallationList[0]"));
    assert!(err.to_string().contains("AppName"));
}

#[test]
fn registry_malformed_json_is_a_json_error() {
    let err = InstallRegistry::from_json_str("{\"InstallationList\": [")
        .expect_err("truncated registry must fail");
    assert!(matches!(err, DocumentError::Json(_)));
}

#[test]
fn manifest_exposes_relocation_fields() {
    let manifest = AppManifest::from_json_str(&sample_manifest(
        ",\n    \"ExpectingDLCInstalled\": {}",
    ))
    .expect("must parse manifest");
    assert_eq!(manifest.app_id(), "X1");
    assert_eq!(manifest.display_name(), "Foo Game");
    assert_eq!(manifest.install_location(), "/games/Foo");
    assert_eq!(manifest.manifest_location(), Some("/games/Foo/m.item"));
    assert_eq!(manifest.staging_location(), Some("/games/Foo/stage"));
    assert!(!manifest.has_dependents());
}

#[test]
fn manifest_collects_expected_dependent_keys() {
    let manifest = AppManifest::from_json_str(&sample_manifest(
        ",\n    \"ExpectingDLCInstalled\": {\"dlc-a\": true, \"dlc-b\": false}",
    ))
    .expect("must parse manifest");
    assert!(manifest.has_dependents());
    assert_eq!(manifest.expecting_dependents(), ["dlc-a", "dlc-b"]);
}

#[test]
fn manifest_rejects_scalar_dependents_field() {
    let err = AppManifest::from_json_str(&sample_manifest(",\n    \"ExpectingDLCInstalled\": 3"))
        .expect_err("scalar dependents must fail");
    assert!(err.to_string().contains("ExpectingDLCInstalled"));
}

#[test]
fn manifest_defaults_display_name_to_app_id() {
    let manifest =
        AppManifest::from_json_str("{\"AppName\": \"X1\", \"InstallLocation\": \"/games/Foo\"}")
            .expect("must parse minimal manifest");
    assert_eq!(manifest.display_name(), "X1");
    assert!(manifest.manifest_location().is_none());
    assert!(manifest.staging_location().is_none());
}

#[test]
fn manifest_rewrite_preserves_field_order_and_indent() {
    let raw = sample_manifest(",\n    \"ExpectingDLCInstalled\": {}");
    let mut manifest = AppManifest::from_json_str(&raw).expect("must parse manifest");
    manifest.set_install_location("/archive/Foo");
    manifest.set_manifest_location("/archive/Foo/m.item");
    manifest.set_staging_location("/archive/Foo/stage");

    let rendered = manifest.to_json_string().expect("must render manifest");
    assert_eq!(rendered, raw.replace("/games/Foo", "/archive/Foo"));
}

#[test]
fn style_detects_tabs_without_trailing_newline() {
    let style = JsonStyle::detect(TAB_REGISTRY);
    assert_eq!(style.indent(), Some("\t"));
    assert_eq!(style.line_ending(), LineEnding::Lf);
    assert!(!style.trailing_newline());
    assert!(!style.byte_order_mark());
}

#[test]
fn style_keeps_compact_documents_compact() {
    let raw = "{\"AppName\":\"X1\",\"InstallLocation\":\"/games/Foo\"}";
    let manifest = AppManifest::from_json_str(raw).expect("must parse compact manifest");
    assert_eq!(manifest.style().indent(), None);
    assert_eq!(manifest.to_json_string().expect("must render"), raw);
}

#[test]
fn style_round_trips_crlf_and_byte_order_mark() {
    let raw = "\u{feff}{\r\n  \"AppName\": \"X1\",\r\n  \"InstallLocation\": \"/games/Foo\"\r\n}\r\n";
    let manifest = AppManifest::from_json_str(raw).expect("must parse BOM manifest");
    let style = manifest.style();
    assert!(style.byte_order_mark());
    assert_eq!(style.line_ending(), LineEnding::CrLf);
    assert_eq!(style.indent(), Some("  "));
    assert_eq!(manifest.to_json_string().expect("must render"), raw);
}

#[test]
fn sub_path_is_component_wise() {
    assert!(is_sub_path(
        Path::new("/games/Foo"),
        Path::new("/games/Foo/meta/install.manifest")
    ));
    assert!(is_sub_path(Path::new("/games/Foo"), Path::new("/games/Foo")));
    assert!(is_sub_path(Path::new("/games/Foo/"), Path::new("/games/Foo/./a")));
    assert!(!is_sub_path(Path::new("/games/Foo"), Path::new("/games/FooBar/a")));
    assert!(!is_sub_path(Path::new("/games/Foo"), Path::new("/tmp/stage123")));
    assert!(!is_sub_path(Path::new(""), Path::new("/games/Foo")));
}

#[test]
fn sub_path_resolves_parent_segments_lexically() {
    assert!(!is_sub_path(
        Path::new("/games/Foo"),
        Path::new("/games/Foo/../Bar/x")
    ));
    assert_eq!(
        normalize_lexically(Path::new("/games/Foo/../Bar/./x")),
        PathBuf::from("/games/Bar/x")
    );
    assert_eq!(normalize_lexically(Path::new("/../x")), PathBuf::from("/x"));
}

#[test]
fn rebase_moves_remainder_onto_new_base() {
    assert_eq!(
        rebase(
            Path::new("/games/Foo/meta/install.manifest"),
            Path::new("/games/Foo"),
            Path::new("/archive/Foo"),
        ),
        Some(PathBuf::from("/archive/Foo/meta/install.manifest"))
    );
    assert_eq!(
        rebase(
            Path::new("/games/Foo"),
            Path::new("/games/Foo"),
            Path::new("/archive/Foo")
        ),
        Some(PathBuf::from("/archive/Foo"))
    );
    assert_eq!(
        rebase(
            Path::new("/tmp/stage123"),
            Path::new("/games/Foo"),
            Path::new("/archive/Foo")
        ),
        None
    );
}

#[test]
fn same_location_ignores_trailing_separator_and_dots() {
    assert!(same_location(Path::new("/games/Foo/"), Path::new("/games/./Foo")));
    assert!(!same_location(Path::new("/games/Foo"), Path::new("/games/Foo/sub")));
}
