//! Versioned migrations of the persisted configuration document.
//!
//! Migrations operate on the untyped document before it is deserialised, so a
//! step can rename tags that the current model no longer accepts. Each step is
//! keyed by the schema version it produces and runs when the stored version is
//! older than that key. A document without a version predates versioning and
//! runs every step.

use serde_json::{Map, Value};
use tracing::info;

use crate::error::MigrationError;
use crate::model::CONFIG_FILE_VERSION;

/// Key holding the schema version.
pub const FILE_VERSION_KEY: &str = "file_version";

type Step = fn(&mut Map<String, Value>) -> Result<usize, MigrationError>;

const MIGRATIONS: &[(u32, Step)] = &[(1, rename_legacy_stores), (2, rename_listener_kinds)];

const LISTENER_RENAMES: &[(&str, &str)] = &[
    ("Listener", "Server"),
    ("SslListener", "SslServer"),
    ("IpcListener", "IpcServer"),
    ("HttpListener", "HttpServer"),
    ("DowserListener", "DowserServer"),
    ("WsgiListener", "WsgiServer"),
    ("StaticFileListener", "StaticFileServer"),
];

/// Outcome of migrating a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    /// Version found in the document; `None` for unversioned documents.
    pub from: Option<u32>,
    /// Number of steps that ran.
    pub steps: usize,
}

impl MigrationReport {
    /// Whether the document changed version.
    #[must_use]
    pub fn upgraded(&self) -> bool {
        self.from != Some(CONFIG_FILE_VERSION)
    }
}

/// Brings `root` up to [`CONFIG_FILE_VERSION`] and stamps the version tag.
///
/// Running it on an already migrated document leaves the document unchanged.
pub fn migrate_document(root: &mut Map<String, Value>) -> Result<MigrationReport, MigrationError> {
    let from = stored_version(root)?;
    let stored = from.unwrap_or(0);
    if stored > CONFIG_FILE_VERSION {
        return Err(MigrationError::FromFuture {
            stored: u64::from(stored),
            current: CONFIG_FILE_VERSION,
        });
    }

    let mut steps = 0;
    for (version, step) in MIGRATIONS {
        if stored < *version && *version <= CONFIG_FILE_VERSION {
            let renamed = step(root)?;
            steps += 1;
            info!(
                from = stored,
                to = *version,
                renamed,
                "migrated configuration document"
            );
        }
    }
    root.insert(
        FILE_VERSION_KEY.to_owned(),
        Value::from(CONFIG_FILE_VERSION),
    );
    Ok(MigrationReport { from, steps })
}

fn stored_version(root: &Map<String, Value>) -> Result<Option<u32>, MigrationError> {
    match root.get(FILE_VERSION_KEY) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => {
            let Some(version) = number.as_u64() else {
                return Err(MigrationError::InvalidVersion {
                    found: number.to_string(),
                });
            };
            u32::try_from(version)
                .map(Some)
                .map_err(|_| MigrationError::FromFuture {
                    stored: version,
                    current: CONFIG_FILE_VERSION,
                })
        }
        Some(other) => Err(MigrationError::InvalidVersion {
            found: other.to_string(),
        }),
    }
}

/// Unversioned documents named relational stores `Relational`.
fn rename_legacy_stores(root: &mut Map<String, Value>) -> Result<usize, MigrationError> {
    rename_tags(root, "stores", &[("Relational", "RelationalStore")])
}

/// Version 2 renamed every `*Listener` kind to `*Server`.
fn rename_listener_kinds(root: &mut Map<String, Value>) -> Result<usize, MigrationError> {
    rename_tags(root, "services", LISTENER_RENAMES)
}

fn rename_tags(
    root: &mut Map<String, Value>,
    section: &'static str,
    renames: &[(&str, &str)],
) -> Result<usize, MigrationError> {
    let entries = match root.get_mut(section) {
        None | Some(Value::Null) => return Ok(0),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(MigrationError::UnexpectedShape {
                section,
                expected: "a list of tagged entries",
            });
        }
    };

    let mut renamed = 0;
    for entry in entries {
        let Value::Object(tagged) = entry else {
            return Err(MigrationError::UnexpectedShape {
                section,
                expected: "a list of tagged entries",
            });
        };
        for (old, new) in renames {
            if let Some(body) = tagged.remove(*old) {
                info!(section, from = old, to = new, "renamed configuration entry kind");
                tagged.insert((*new).to_owned(), body);
                renamed += 1;
            }
        }
    }
    Ok(renamed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn document(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[rstest]
    fn unversioned_documents_run_every_step() {
        let mut root = document(json!({
            "services": [{"HttpListener": {"name": "web", "port": 8080}}],
            "stores": [{"Relational": {"name": "sql_main", "conn_str": "sqlite://"}}],
        }));

        let report = migrate_document(&mut root).expect("migration succeeds");

        assert_eq!(report, MigrationReport { from: None, steps: 2 });
        assert_eq!(
            Value::Object(root),
            json!({
                "services": [{"HttpServer": {"name": "web", "port": 8080}}],
                "stores": [{"RelationalStore": {"name": "sql_main", "conn_str": "sqlite://"}}],
                "file_version": 2,
            })
        );
    }

    #[rstest]
    fn version_one_documents_only_rename_listeners() {
        let mut root = document(json!({
            "file_version": 1,
            "services": [
                {"Listener": {"name": "raw", "backlog": 5}},
                {"SslListener": {"name": "tls", "verify": true}},
            ],
            "stores": [{"Relational": {"name": "kept"}}],
        }));

        let report = migrate_document(&mut root).expect("migration succeeds");

        assert_eq!(report.steps, 1);
        assert_eq!(
            root.get("services"),
            Some(&json!([
                {"Server": {"name": "raw", "backlog": 5}},
                {"SslServer": {"name": "tls", "verify": true}},
            ]))
        );
        assert_eq!(root.get("stores"), Some(&json!([{"Relational": {"name": "kept"}}])));
    }

    #[rstest]
    fn migration_is_idempotent() {
        let mut once = document(json!({
            "services": [{"WsgiListener": {"name": "wsgi"}}],
        }));
        migrate_document(&mut once).expect("first migration");
        let mut twice = once.clone();
        let report = migrate_document(&mut twice).expect("second migration");

        assert_eq!(once, twice);
        assert!(!report.upgraded());
        assert_eq!(report.steps, 0);
    }

    #[rstest]
    fn future_versions_are_rejected() {
        let mut root = document(json!({"file_version": 9}));
        let error = migrate_document(&mut root).expect_err("future version");
        assert!(matches!(error, MigrationError::FromFuture { stored: 9, .. }));
    }

    #[rstest]
    #[case(json!({"file_version": "two"}))]
    #[case(json!({"file_version": -1}))]
    fn malformed_versions_are_rejected(#[case] value: Value) {
        let mut root = document(value);
        let error = migrate_document(&mut root).expect_err("bad version");
        assert!(matches!(error, MigrationError::InvalidVersion { .. }));
    }

    #[rstest]
    fn services_must_be_a_list() {
        let mut root = document(json!({"services": {"web": {}}}));
        let error = migrate_document(&mut root).expect_err("bad shape");
        assert!(matches!(
            error,
            MigrationError::UnexpectedShape { section: "services", .. }
        ));
    }
}
