use crate::grid::{build_grid, cells_json, RosterStudent};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{AttendanceStatus, CellKey, Session, StoredRecord};
use crate::months::{date_key, days_in_month, month_number, month_range};
use crate::reconcile::{
    apply_plan, day_bounds, distinct_student_ids, reconcile, EditItem,
};
use chrono::{Datelike, NaiveDate};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use std::time::Instant;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_query_failed(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn resolve_month_name(month: &str) -> Result<u32, HandlerErr> {
    month_number(month).ok_or_else(|| HandlerErr {
        code: "invalid_month",
        message: format!("Invalid month name: {}", month),
        details: None,
    })
}

fn load_class(conn: &Connection, class_id: &str) -> Result<(String, String), HandlerErr> {
    conn.query_row(
        "SELECT id, name FROM classes WHERE id = ?",
        [class_id],
        |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
    )
    .optional()
    .map_err(db_query_failed)?
    .ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "class not found".to_string(),
        details: None,
    })
}

fn list_students_for_class(
    conn: &Connection,
    class_id: &str,
) -> Result<Vec<RosterStudent>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, khmer_name, last_name, first_name, gender
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order",
        )
        .map_err(db_query_failed)?;
    stmt.query_map([class_id], |r| {
        let id: String = r.get(0)?;
        let khmer_name: Option<String> = r.get(1)?;
        let last: String = r.get(2)?;
        let first: String = r.get(3)?;
        let gender: Option<String> = r.get(4)?;
        let display_name = match khmer_name {
            Some(k) if !k.trim().is_empty() => k,
            _ => format!("{} {}", last, first),
        };
        Ok(RosterStudent {
            id,
            display_name,
            gender,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_query_failed)
}

/// One range query over [lo_date, hi_date], optionally narrowed to a
/// student set. Rows whose stored fields don't parse are dropped.
fn fetch_records_in_range(
    conn: &Connection,
    class_id: &str,
    student_ids: Option<&[String]>,
    lo_date: &str,
    hi_date: &str,
) -> Result<Vec<StoredRecord>, HandlerErr> {
    let mut sql = String::from(
        "SELECT id, student_id, date, session, status
         FROM attendance_records
         WHERE class_id = ? AND date >= ? AND date <= ?",
    );
    let mut params: Vec<Value> = vec![
        Value::from(class_id.to_string()),
        Value::from(lo_date.to_string()),
        Value::from(hi_date.to_string()),
    ];
    if let Some(ids) = student_ids {
        let placeholders = vec!["?"; ids.len()].join(", ");
        sql.push_str(&format!(" AND student_id IN ({})", placeholders));
        params.extend(ids.iter().map(|id| Value::from(id.clone())));
    }

    let mut stmt = conn.prepare(&sql).map_err(db_query_failed)?;
    let raw = stmt
        .query_map(params_from_iter(params), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_failed)?;

    let records = raw
        .into_iter()
        .filter_map(|(id, student_id, date, session, status)| {
            let day = NaiveDate::parse_from_str(&date, "%Y-%m-%d").ok()?.day();
            Some(StoredRecord {
                id,
                student_id,
                day,
                session: Session::from_db(&session)?,
                status: AttendanceStatus::from_db(&status)?,
            })
        })
        .collect();
    Ok(records)
}

fn attendance_grid(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let month = get_required_str(params, "month")?;
    let year = get_required_i64(params, "year")? as i32;
    let month_num = resolve_month_name(&month)?;

    let (class_id, class_name) = load_class(conn, &class_id)?;
    let students = list_students_for_class(conn, &class_id)?;

    let days = days_in_month(year, month_num);
    let (lo, hi) = month_range(year, month_num);
    let records = fetch_records_in_range(conn, &class_id, None, &lo, &hi)?;

    let rows = build_grid(&students, records, days);
    let students_json: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            json!({
                "studentId": row.student_id,
                "studentName": row.student_name,
                "gender": row.gender,
                "attendance": cells_json(row, days),
                "totalAbsent": row.total_absent,
                "totalPermission": row.total_permission
            })
        })
        .collect();

    Ok(json!({
        "classId": class_id,
        "className": class_name,
        "month": month,
        "year": year,
        "monthNumber": month_num,
        "daysInMonth": days,
        "days": (1..=days).collect::<Vec<u32>>(),
        "students": students_json
    }))
}

fn attendance_bulk_save(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let year = get_required_i64(params, "year")? as i32;
    let month_num = get_required_i64(params, "monthNumber")?;
    if !(1..=12).contains(&month_num) {
        return Err(HandlerErr {
            code: "bad_params",
            message: "monthNumber must be between 1 and 12".to_string(),
            details: Some(json!({ "monthNumber": month_num })),
        });
    }
    let month_num = month_num as u32;

    let Some(items) = params.get("attendance").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing attendance".to_string(),
            details: None,
        });
    };
    if items.is_empty() {
        return Err(HandlerErr {
            code: "empty_batch",
            message: "No attendance data provided".to_string(),
            details: None,
        });
    }
    let edits: Vec<EditItem> = serde_json::from_value(serde_json::Value::Array(items.clone()))
        .map_err(|e| HandlerErr {
            code: "bad_params",
            message: format!("malformed attendance items: {}", e),
            details: None,
        })?;

    let started = Instant::now();

    // Snapshot only the rows the batch can touch: the referenced
    // students over the bounding day range.
    let mut existing: HashMap<CellKey, StoredRecord> = HashMap::new();
    if let Some((lo_day, hi_day)) = day_bounds(&edits) {
        let student_ids = distinct_student_ids(&edits);
        let lo = date_key(year, month_num, lo_day);
        let hi = date_key(year, month_num, hi_day);
        let records = fetch_records_in_range(conn, &class_id, Some(&student_ids), &lo, &hi)?;
        for rec in records {
            let key = CellKey {
                student_id: rec.student_id.clone(),
                day: rec.day,
                session: rec.session,
            };
            existing.insert(key, rec);
        }
    }

    let plan = reconcile(year, month_num, &edits, &existing);
    let counts = apply_plan(conn, &class_id, &plan).map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let saved = counts.created + counts.updated + counts.deleted;

    Ok(json!({
        "savedCount": saved,
        "errorCount": 0,
        "created": counts.created,
        "updated": counts.updated,
        "deleted": counts.deleted,
        "performanceMs": elapsed_ms
    }))
}

fn attendance_monthly_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let month = get_required_str(params, "month")?;
    let year = get_required_i64(params, "year")? as i32;
    let month_num = resolve_month_name(&month)?;

    let (lo, hi) = month_range(year, month_num);
    let records = fetch_records_in_range(conn, &class_id, None, &lo, &hi)?;

    // Students with no records stay absent from the map; callers read
    // a missing entry as zero.
    let mut summary: HashMap<String, (u32, u32)> = HashMap::new();
    for rec in records {
        let entry = summary.entry(rec.student_id).or_insert((0, 0));
        match rec.status {
            AttendanceStatus::Absent => entry.0 += 1,
            AttendanceStatus::Permission => entry.1 += 1,
            _ => {}
        }
    }

    let mut out = serde_json::Map::new();
    for (student_id, (absent, permission)) in summary {
        out.insert(
            student_id,
            json!({ "absent": absent, "permission": permission }),
        );
    }
    Ok(serde_json::Value::Object(out))
}

fn attendance_day_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_required_str(params, "date")?;
    if NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "date must be YYYY-MM-DD".to_string(),
            details: None,
        });
    }

    let (class_id, class_name) = load_class(conn, &class_id)?;
    let students = list_students_for_class(conn, &class_id)?;
    let records = fetch_records_in_range(conn, &class_id, None, &date, &date)?;

    let mut by_cell: HashMap<(String, Session), StoredRecord> = HashMap::new();
    for rec in records {
        by_cell.insert((rec.student_id.clone(), rec.session), rec);
    }

    let students_json: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            let session_json = |session: Session| {
                by_cell
                    .get(&(s.id.clone(), session))
                    .map(|rec| {
                        json!({
                            "id": rec.id,
                            "status": rec.status.as_db()
                        })
                    })
                    .unwrap_or(serde_json::Value::Null)
            };
            json!({
                "studentId": s.id,
                "studentName": s.display_name,
                "gender": s.gender,
                "morning": session_json(Session::Morning),
                "afternoon": session_json(Session::Afternoon)
            })
        })
        .collect();

    Ok(json!({
        "classId": class_id,
        "className": class_name,
        "date": date,
        "students": students_json
    }))
}

fn attendance_update_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let record_id = get_required_str(params, "id")?;
    let status_raw = get_required_str(params, "status")?;
    let Some(status) = AttendanceStatus::from_db(&status_raw) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("unknown status: {}", status_raw),
            details: None,
        });
    };

    let now = chrono::Utc::now().to_rfc3339();
    let changed = conn
        .execute(
            "UPDATE attendance_records SET status = ?, updated_at = ? WHERE id = ?",
            (status.as_db(), &now, &record_id),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance_records" })),
        })?;
    if changed == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "attendance record not found".to_string(),
            details: None,
        });
    }
    Ok(json!({ "id": record_id, "status": status.as_db() }))
}

fn attendance_delete_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let record_id = get_required_str(params, "id")?;
    let changed = conn
        .execute(
            "DELETE FROM attendance_records WHERE id = ?",
            [&record_id],
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance_records" })),
        })?;
    if changed == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "attendance record not found".to_string(),
            details: None,
        });
    }
    Ok(json!({ "deleted": true }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.grid" => Some(with_conn(state, req, attendance_grid)),
        "attendance.bulkSave" => Some(with_conn(state, req, attendance_bulk_save)),
        "attendance.monthlySummary" => Some(with_conn(state, req, attendance_monthly_summary)),
        "attendance.dayOpen" => Some(with_conn(state, req, attendance_day_open)),
        "attendance.updateRecord" => Some(with_conn(state, req, attendance_update_record)),
        "attendance.deleteRecord" => Some(with_conn(state, req, attendance_delete_record)),
        _ => None,
    }
}
