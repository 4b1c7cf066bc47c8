//! Property-based tests using proptest
//!
//! These tests verify invariants across randomized inputs, helping catch
//! edge cases that might be missed by example-based testing.

use model_host::manifest::{HubSource, Manifest, ModelSource};
use model_host::models::storage;
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;

// =============================================================================
// Arbitrary Implementations
// =============================================================================

/// Generate a declared source as (model_source, base_path, include_filter)
fn arb_source() -> impl Strategy<Value = (String, String, String)> {
    prop_oneof![
        ("[a-z]{2,8}/[a-zA-Z0-9-]{2,20}", "[a-z0-9-]{0,6}")
            .prop_map(|(repo, filter)| ("HuggingFace".to_string(), repo, filter)),
        "/[a-z]{1,8}/[a-z0-9]{1,8}"
            .prop_map(|path| ("Local".to_string(), path, String::new())),
        ("[A-Z][a-z]{2,8}", "[a-z]{1,10}")
            .prop_filter("known kinds", |(kind, _)| kind != "Local")
            .prop_map(|(kind, path)| (kind, path, String::new())),
    ]
}

/// Declarations keyed by unique model ids
fn arb_declarations() -> impl Strategy<Value = BTreeMap<String, (String, String, String)>> {
    prop::collection::btree_map("[a-z][a-z0-9._-]{0,15}", arb_source(), 0..12)
}

// =============================================================================
// Manifest Parsing Properties
// =============================================================================

proptest! {
    /// Every declaration is retrievable by its id with its source preserved
    #[test]
    fn manifest_preserves_declarations(decls in arb_declarations()) {
        let models: Vec<_> = decls
            .iter()
            .map(|(id, (kind, base, filter))| json!({
                "model_id": id,
                "model_source": kind,
                "base_path": base,
                "include_filter": filter,
            }))
            .collect();
        let document = json!({ "models": models }).to_string();

        let manifest = Manifest::parse(&document).unwrap();
        prop_assert_eq!(manifest.len(), decls.len());
        prop_assert_eq!(manifest.model_ids(), decls.keys().cloned().collect::<Vec<_>>());

        for (id, (kind, base, filter)) in &decls {
            let entry = manifest.lookup(id).unwrap();
            match &entry.source {
                ModelSource::RemoteHub(hub) => {
                    prop_assert_eq!(kind.as_str(), "HuggingFace");
                    prop_assert_eq!(&hub.repo, base);
                    prop_assert_eq!(&hub.include_filter, filter);
                }
                ModelSource::LocalPath(path) => {
                    prop_assert_eq!(kind.as_str(), "Local");
                    prop_assert_eq!(path.to_str().unwrap(), base.as_str());
                }
                ModelSource::Unknown { kind: found, base_path } => {
                    prop_assert_eq!(found, kind);
                    prop_assert_eq!(base_path, base);
                }
            }
        }
    }

    /// Ids absent from the document are never found
    #[test]
    fn manifest_lookup_misses_undeclared(decls in arb_declarations(), probe in "[A-Z]{1,8}") {
        let models: Vec<_> = decls
            .iter()
            .map(|(id, (kind, base, _))| json!({
                "model_id": id,
                "model_source": kind,
                "base_path": base,
            }))
            .collect();
        let manifest = Manifest::parse(&json!({ "models": models }).to_string()).unwrap();

        // Generated ids are lowercase, probes uppercase
        prop_assert!(manifest.lookup(&probe).is_none());
    }

    /// Arbitrary input never panics the parser
    #[test]
    fn manifest_parse_never_panics(document in ".{0,200}") {
        let _ = Manifest::parse(&document);
    }

    /// An entry lacking base_path is always rejected
    #[test]
    fn manifest_requires_base_path(id in "[a-z]{1,10}") {
        let document = json!({ "models": [{ "model_id": id, "model_source": "Local" }] });
        prop_assert!(Manifest::parse(&document.to_string()).is_err());
    }
}

// =============================================================================
// Include Filter Properties
// =============================================================================

proptest! {
    /// An empty include filter selects every file
    #[test]
    fn empty_filter_includes_all(name in ".{0,40}") {
        let hub = HubSource { repo: "org/model".to_string(), include_filter: String::new() };
        prop_assert!(hub.includes(&name));
    }

    /// A file is selected exactly when its name contains the filter
    #[test]
    fn filter_is_substring_match(
        prefix in "[a-z/]{0,10}",
        filter in "[a-z0-9-]{1,8}",
        suffix in "[a-z./]{0,10}",
        other in "[A-Z]{1,10}",
    ) {
        let hub = HubSource { repo: "org/model".to_string(), include_filter: filter.clone() };
        let name = format!("{}{}{}", prefix, filter, suffix);
        prop_assert!(hub.includes(&name));
        prop_assert!(!hub.includes(&other));
    }
}

// =============================================================================
// Storage Layout Properties
// =============================================================================

proptest! {
    /// A staging directory is never mistaken for a model directory
    #[test]
    fn staging_never_valid_model(id in "[a-zA-Z0-9_-][a-zA-Z0-9._-]{0,20}") {
        let root = std::path::Path::new("/models");
        let staging = storage::staging_dir(&storage::model_dir(root, &id));
        let name = staging.file_name().unwrap().to_str().unwrap();

        prop_assert!(storage::is_staging_name(name));
        prop_assert!(!storage::is_valid_model_id(name));
    }
}
