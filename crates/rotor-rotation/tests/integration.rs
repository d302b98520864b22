//! Integration tests for the rotor-rotation crate.
//!
//! These exercise the rotation manager through its public API together with
//! the on-disk state file.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rotor_rotation::{
    Catalogue, Category, ModelStatus, RotationError, RotationManager, StateFile,
};

const CATALOGUE: &str = r#"
[[providers]]
name = "alpha"
base_url = "https://alpha.example.com/v1"
api_key_env = "ALPHA_API_KEY"

[[providers]]
name = "beta"
base_url = "https://beta.example.com/v1"

[[models]]
id = "alpha-large"
provider = "alpha"
display_name = "Alpha Large"
categories = ["dialog", "code"]
is_free = true

[[models]]
id = "beta-small"
provider = "beta"
categories = ["dialog", "simple"]

[[models]]
id = "beta-retired"
provider = "beta"
categories = ["dialog"]
is_active = false
"#;

fn catalogue() -> Catalogue {
    Catalogue::from_toml_str(CATALOGUE).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════
//  Persistence
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rotation_state.json");

    {
        let mgr = RotationManager::with_state_file(catalogue(), StateFile::new(&path)).unwrap();
        mgr.set_state("beta", "beta-small").unwrap();
        mgr.record_usage("alpha-large", false);
        mgr.blacklist("alpha-large", Duration::from_secs(600)).unwrap();
    }

    let mgr = RotationManager::with_state_file(catalogue(), StateFile::new(&path)).unwrap();
    let state = mgr.current_state();
    assert_eq!(state.provider, "beta");
    assert_eq!(state.model_id, "beta-small");

    let usage = mgr.usage("alpha-large").unwrap();
    assert_eq!(usage.calls, 1);
    assert_eq!(usage.failures, 1);
    assert!(matches!(
        mgr.status("alpha-large"),
        Some(ModelStatus::Blacklisted { .. })
    ));
}

#[test]
fn state_file_is_written_on_set_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let mgr = RotationManager::with_state_file(catalogue(), StateFile::new(&path)).unwrap();
    assert!(!path.exists());

    mgr.set_state("beta", "beta-small").unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["provider"], "beta");
    assert_eq!(raw["modelId"], "beta-small");
    assert!(raw["lastUpdated"].is_string());
}

#[test]
fn stale_pointer_falls_back_to_first_model() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(
        &path,
        r#"{"provider":"gone","modelId":"vanished","lastUpdated":"2024-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    let mgr = RotationManager::with_state_file(catalogue(), StateFile::new(&path)).unwrap();
    assert_eq!(mgr.current_state().model_id, "alpha-large");
}

#[test]
fn unknown_override_is_rejected_and_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let mgr = RotationManager::with_state_file(catalogue(), StateFile::new(&path)).unwrap();

    let err = mgr.set_state("alpha", "no-such-model").unwrap_err();
    assert!(matches!(err, RotationError::UnknownModel { .. }));
    assert!(!path.exists());
}

// ═══════════════════════════════════════════════════════════════════════
//  Selection
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn inactive_catalogue_entries_are_never_selected() {
    let mgr = RotationManager::new(catalogue()).unwrap();
    let ids: Vec<String> = mgr
        .available_models(Category::Dialog)
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, ["alpha-large", "beta-small"]);
    assert_eq!(mgr.status("beta-retired"), Some(ModelStatus::Inactive));
}

#[test]
fn rotation_walks_the_category_in_order() {
    let mgr = RotationManager::new(catalogue()).unwrap();
    let mut tried = HashSet::new();

    let first = mgr.select(Category::Dialog).unwrap();
    assert_eq!(first.id, "alpha-large");
    tried.insert(first.id.clone());
    mgr.blacklist(&first.id, Duration::from_secs(60)).unwrap();

    let second = mgr.select_next(Category::Dialog, &tried).unwrap();
    assert_eq!(second.id, "beta-small");
    tried.insert(second.id.clone());

    assert!(mgr.select_next(Category::Dialog, &tried).is_none());
    assert_eq!(mgr.current_state().model_id, "beta-small");
}

#[test]
fn no_model_for_category_when_all_blacklisted() {
    let mgr = RotationManager::new(catalogue()).unwrap();
    mgr.blacklist("beta-small", Duration::from_secs(60)).unwrap();
    assert!(mgr.select(Category::Simple).is_none());
    assert!(mgr.available_models(Category::Simple).is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
//  Concurrency
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn concurrent_bookkeeping_is_serialized() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let mgr = Arc::new(
        RotationManager::with_state_file(catalogue(), StateFile::new(&path)).unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let mgr = Arc::clone(&mgr);
            std::thread::spawn(move || {
                for _ in 0..25 {
                    mgr.record_usage("alpha-large", i % 2 == 0);
                    mgr.blacklist("alpha-large", Duration::from_secs(30)).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let usage = mgr.usage("alpha-large").unwrap();
    assert_eq!(usage.calls, 200);
    assert_eq!(usage.failures, 100);

    // The file on disk is always a complete document.
    let reloaded =
        RotationManager::with_state_file(catalogue(), StateFile::new(&path)).unwrap();
    assert_eq!(reloaded.usage("alpha-large").unwrap().calls, 200);
}
