//! Brings older backup payloads up to the current record shape.
//!
//! Each step is tagged with the schema version it produces and only ever adds
//! a field with a default when the field is missing. Nothing is renamed or
//! removed, and fields this code does not know about are carried over as-is.

use serde_json::Value;
use tracing::info;

use super::{BackupPayload, BackupTables, Record};
use crate::version::{compare_schema, SchemaVersion};

/// Shape of records written by this build.
pub const CURRENT_SCHEMA_VERSION: SchemaVersion = SchemaVersion(4);

type UpgradeFn = fn(&mut BackupTables);

/// `(resulting version, step)`, ascending.
const UPGRADES: &[(SchemaVersion, UpgradeFn)] = &[
    (SchemaVersion(2), v2_task_priority),
    (SchemaVersion(3), v3_transaction_category),
    (SchemaVersion(4), v4_note_pinned),
];

fn set_default(records: &mut [Record], field: &str, default: Value) {
    for record in records {
        record
            .entry(field.to_string())
            .or_insert_with(|| default.clone());
    }
}

fn v2_task_priority(tables: &mut BackupTables) {
    set_default(&mut tables.tasks, "priority", Value::from("medium"));
}

fn v3_transaction_category(tables: &mut BackupTables) {
    set_default(&mut tables.transactions, "category", Value::from("other"));
}

fn v4_note_pinned(tables: &mut BackupTables) {
    set_default(&mut tables.notes, "pinned", Value::Bool(false));
}

/// Return a copy of `payload` reshaped for `target`. The input is never
/// modified; a payload already at or past `target` comes back unchanged.
pub fn upgrade(payload: &BackupPayload, target: SchemaVersion) -> BackupPayload {
    let from = payload.schema_version;
    let mut upgraded = payload.clone();
    if compare_schema(from, target).is_ge() {
        return upgraded;
    }

    for (version, step) in UPGRADES {
        if compare_schema(*version, from).is_gt() && compare_schema(*version, target).is_le() {
            step(&mut upgraded.tables);
        }
    }
    upgraded.schema_version = target;
    info!(
        target: "dayplanner",
        event = "backup_schema_upgraded",
        from = %from,
        to = %target
    );
    upgraded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::parse_backup;
    use serde_json::json;

    fn payload(schema: Option<u32>) -> BackupPayload {
        let mut raw = json!({
            "appName": "dayplanner",
            "appVersion": "0.0.1",
            "exportTimestamp": "2024-05-01T10:00:00.000Z",
            "tables": {
                "tasks": [
                    { "id": "t1", "title": "Water plants" },
                    { "id": "t2", "title": "File taxes", "priority": "high" }
                ],
                "notes": [{ "id": "n1", "title": "Ideas", "mood": "sunny" }],
                "transactions": [{ "id": "x1", "amount": 12.5, "kind": "expense" }],
                "settings": [{ "key": "theme", "value": "dark" }]
            }
        });
        if let Some(v) = schema {
            raw["schemaVersion"] = json!(v);
        }
        parse_backup(raw).expect("valid payload")
    }

    #[test]
    fn absent_schema_version_upgrades_to_three() {
        let p = payload(None);
        let up = upgrade(&p, SchemaVersion(3));
        assert_eq!(up.schema_version, SchemaVersion(3));
        for task in &up.tables.tasks {
            assert!(task.contains_key("priority"));
        }
        assert_eq!(up.tables.tasks[0]["priority"], "medium");
        assert_eq!(up.tables.tasks[1]["priority"], "high");
        assert_eq!(up.tables.transactions[0]["category"], "other");
        // v4 is past the requested target.
        assert!(!up.tables.notes[0].contains_key("pinned"));
    }

    #[test]
    fn input_is_left_untouched() {
        let p = payload(Some(1));
        let before = p.clone();
        let _ = upgrade(&p, CURRENT_SCHEMA_VERSION);
        assert_eq!(p, before);
    }

    #[test]
    fn current_payload_is_returned_as_is() {
        let p = payload(Some(CURRENT_SCHEMA_VERSION.get()));
        let up = upgrade(&p, CURRENT_SCHEMA_VERSION);
        assert_eq!(up, p);
        assert!(!up.tables.tasks[0].contains_key("priority"));
    }

    #[test]
    fn newer_payload_is_not_downgraded() {
        let p = payload(Some(9));
        let up = upgrade(&p, CURRENT_SCHEMA_VERSION);
        assert_eq!(up.schema_version, SchemaVersion(9));
    }

    #[test]
    fn upgrade_is_idempotent() {
        let p = payload(Some(2));
        let once = upgrade(&p, CURRENT_SCHEMA_VERSION);
        let twice = upgrade(&once, CURRENT_SCHEMA_VERSION);
        assert_eq!(once, twice);
    }

    #[test]
    fn gated_steps_skip_already_applied_versions() {
        // Schema 3 already carries priority; a missing priority stays missing.
        let p = payload(Some(3));
        let up = upgrade(&p, CURRENT_SCHEMA_VERSION);
        assert!(!up.tables.tasks[0].contains_key("priority"));
        assert_eq!(up.tables.notes[0]["pinned"], false);
    }

    #[test]
    fn unknown_fields_pass_through() {
        let p = payload(None);
        let up = upgrade(&p, CURRENT_SCHEMA_VERSION);
        assert_eq!(up.tables.notes[0]["mood"], "sunny");
    }
}
