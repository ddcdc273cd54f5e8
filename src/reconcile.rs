//! Diff-based reconciliation of submitted grid edits against persisted
//! attendance rows, and the transactional executor that applies a plan.
//!
//! [`reconcile`] performs no I/O: the caller fetches the overlapping
//! records, the plan is computed purely, then [`apply_plan`] commits it
//! in one transaction. Re-running the same batch is safe — creates skip
//! duplicates and the plan is rebuilt from fresh reads each call.

use crate::model::{AttendanceStatus, CellKey, Session, StoredRecord};
use crate::months::date_key;
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

/// One submitted cell edit. Fields are optional on the wire; items
/// missing any of studentId/day/session are skipped, not rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditItem {
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub day: Option<u32>,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl EditItem {
    fn cell(&self) -> Option<(String, u32, Session)> {
        let student_id = self.student_id.as_deref()?;
        if student_id.is_empty() {
            return None;
        }
        let day = self.day?;
        if day == 0 {
            return None;
        }
        let session = Session::from_code(self.session.as_deref()?)?;
        Some((student_id.to_string(), day, session))
    }
}

#[derive(Debug, Clone)]
pub struct NewRecord {
    pub id: String,
    pub student_id: String,
    pub date: String,
    pub session: Session,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub id: String,
    pub status: AttendanceStatus,
}

/// Three disjoint operation lists; no edit contributes to more than one.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    pub creates: Vec<NewRecord>,
    pub updates: Vec<StatusUpdate>,
    pub deletes: Vec<String>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchCounts {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
}

/// Bounding day range over the valid items, for the overlap query.
pub fn day_bounds(edits: &[EditItem]) -> Option<(u32, u32)> {
    let mut bounds: Option<(u32, u32)> = None;
    for item in edits {
        let Some((_, day, _)) = item.cell() else {
            continue;
        };
        bounds = Some(match bounds {
            Some((lo, hi)) => (lo.min(day), hi.max(day)),
            None => (day, day),
        });
    }
    bounds
}

/// Distinct student ids referenced by the valid items, in first-seen order.
pub fn distinct_student_ids(edits: &[EditItem]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for item in edits {
        let Some((student_id, _, _)) = item.cell() else {
            continue;
        };
        if !seen.contains(&student_id) {
            seen.push(student_id);
        }
    }
    seen
}

/// Classify each edit against the persisted snapshot.
///
/// "A"/"P" map to ABSENT/PERMISSION; anything else (including empty)
/// means clear. A clear against an existing record deletes it; a value
/// against a record with the same status is a no-op.
pub fn reconcile(
    year: i32,
    month: u32,
    edits: &[EditItem],
    existing: &HashMap<CellKey, StoredRecord>,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();

    for item in edits {
        let Some((student_id, day, session)) = item.cell() else {
            continue;
        };
        let key = CellKey {
            student_id: student_id.clone(),
            day,
            session,
        };
        let current = existing.get(&key);
        let target = item
            .value
            .as_deref()
            .and_then(AttendanceStatus::from_grid_value);

        match (target, current) {
            (None, Some(rec)) => plan.deletes.push(rec.id.clone()),
            (None, None) => {}
            (Some(status), Some(rec)) => {
                if rec.status != status {
                    plan.updates.push(StatusUpdate {
                        id: rec.id.clone(),
                        status,
                    });
                }
            }
            (Some(status), None) => plan.creates.push(NewRecord {
                id: Uuid::new_v4().to_string(),
                student_id,
                date: date_key(year, month, day),
                session,
                status,
            }),
        }
    }

    plan
}

/// Apply a plan atomically. All three phases commit together or not at
/// all; duplicate-key collisions on create are skipped so a retried
/// batch cannot fail on rows it already wrote.
pub fn apply_plan(
    conn: &Connection,
    class_id: &str,
    plan: &ReconcilePlan,
) -> anyhow::Result<BatchCounts> {
    let tx = conn.unchecked_transaction()?;
    let now = Utc::now().to_rfc3339();
    let mut counts = BatchCounts::default();

    if !plan.creates.is_empty() {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO attendance_records(id, class_id, student_id, date, session, status, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
        )?;
        for rec in &plan.creates {
            counts.created += stmt.execute((
                &rec.id,
                class_id,
                &rec.student_id,
                &rec.date,
                rec.session.as_db(),
                rec.status.as_db(),
                &now,
            ))? as u64;
        }
    }

    if !plan.updates.is_empty() {
        // One statement per distinct target status, not per row.
        let mut by_status: HashMap<&'static str, Vec<&str>> = HashMap::new();
        for upd in &plan.updates {
            by_status
                .entry(upd.status.as_db())
                .or_default()
                .push(upd.id.as_str());
        }
        for (status, ids) in by_status {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "UPDATE attendance_records SET status = ?, updated_at = ? WHERE id IN ({})",
                placeholders
            );
            let mut params: Vec<Value> = Vec::with_capacity(ids.len() + 2);
            params.push(Value::from(status.to_string()));
            params.push(Value::from(now.clone()));
            params.extend(ids.iter().map(|id| Value::from(id.to_string())));
            counts.updated += tx.execute(&sql, params_from_iter(params))? as u64;
        }
    }

    if !plan.deletes.is_empty() {
        let placeholders = vec!["?"; plan.deletes.len()].join(", ");
        let sql = format!(
            "DELETE FROM attendance_records WHERE id IN ({})",
            placeholders
        );
        let params: Vec<Value> = plan.deletes.iter().map(|id| Value::from(id.clone())).collect();
        counts.deleted += tx.execute(&sql, params_from_iter(params))? as u64;
    }

    tx.commit()?;
    Ok(counts)
}
