//! Month grid builder: reshapes persisted attendance rows into the
//! per-student, per-day, per-session grid the editor renders.
//!
//! Pure over its inputs; the handler does the fetching. Cell lookup is
//! a single map keyed by [`CellKey`], so building stays O(records),
//! not O(students × days × records).

use crate::model::{AttendanceStatus, CellKey, Session, StoredRecord};
use serde_json::json;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct RosterStudent {
    pub id: String,
    pub display_name: String,
    pub gender: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GridCell {
    pub record_id: Option<String>,
    pub status: Option<AttendanceStatus>,
    pub session: Session,
}

impl GridCell {
    fn empty(session: Session) -> GridCell {
        GridCell {
            record_id: None,
            status: None,
            session,
        }
    }

    pub fn display_value(&self) -> &'static str {
        self.status.map(|s| s.display_value()).unwrap_or("")
    }

    pub fn is_saved(&self) -> bool {
        self.record_id.is_some()
    }
}

#[derive(Debug)]
pub struct StudentRow {
    pub student_id: String,
    pub student_name: String,
    pub gender: Option<String>,
    pub cells: HashMap<(u32, Session), GridCell>,
    pub total_absent: u32,
    pub total_permission: u32,
}

pub fn build_grid(
    students: &[RosterStudent],
    records: Vec<StoredRecord>,
    days_in_month: u32,
) -> Vec<StudentRow> {
    let mut by_cell: HashMap<CellKey, StoredRecord> = HashMap::with_capacity(records.len());
    for rec in records {
        let key = CellKey {
            student_id: rec.student_id.clone(),
            day: rec.day,
            session: rec.session,
        };
        by_cell.insert(key, rec);
    }

    students
        .iter()
        .map(|student| {
            let mut cells = HashMap::with_capacity(days_in_month as usize * 2);
            let mut total_absent = 0u32;
            let mut total_permission = 0u32;

            for day in 1..=days_in_month {
                for session in [Session::Morning, Session::Afternoon] {
                    let key = CellKey {
                        student_id: student.id.clone(),
                        day,
                        session,
                    };
                    let cell = match by_cell.get(&key) {
                        Some(rec) => {
                            match rec.status {
                                AttendanceStatus::Absent => total_absent += 1,
                                AttendanceStatus::Permission => total_permission += 1,
                                _ => {}
                            }
                            GridCell {
                                record_id: Some(rec.id.clone()),
                                status: Some(rec.status),
                                session,
                            }
                        }
                        None => GridCell::empty(session),
                    };
                    cells.insert((day, session), cell);
                }
            }

            StudentRow {
                student_id: student.id.clone(),
                student_name: student.display_name.clone(),
                gender: student.gender.clone(),
                cells,
                total_absent,
                total_permission,
            }
        })
        .collect()
}

/// Serialize one student's cells under the wire keys "<day>_M"/"<day>_A".
pub fn cells_json(row: &StudentRow, days_in_month: u32) -> serde_json::Value {
    let mut out = serde_json::Map::new();
    for day in 1..=days_in_month {
        for (session, suffix) in [(Session::Morning, "M"), (Session::Afternoon, "A")] {
            let Some(cell) = row.cells.get(&(day, session)) else {
                continue;
            };
            out.insert(
                format!("{}_{}", day, suffix),
                json!({
                    "id": cell.record_id,
                    "status": cell.status.map(|s| s.as_db()),
                    "displayValue": cell.display_value(),
                    "isSaved": cell.is_saved(),
                    "session": session.as_db(),
                }),
            );
        }
    }
    serde_json::Value::Object(out)
}
