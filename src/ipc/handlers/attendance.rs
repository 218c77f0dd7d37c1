use crate::calc::{self, AttendanceStatus};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_err, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::validate::{self, FieldErrors};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn joined_attendance_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let first: String = r.get(5)?;
    let last: String = r.get(6)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, String>(1)?,
        "attendanceDate": r.get::<_, String>(2)?,
        "status": r.get::<_, String>(3)?,
        "remarks": r.get::<_, Option<String>>(4)?,
        "rollNumber": r.get::<_, String>(7)?,
        "studentName": format!("{} {}", first, last)
    }))
}

const JOINED_ATTENDANCE_SELECT: &str =
    "SELECT a.id, a.student_id, a.attendance_date, a.status, a.remarks,
            s.first_name, s.last_name, s.roll_number
     FROM attendance a
     JOIN students s ON a.student_id = s.id";

/// Marking a day is an upsert by (student, date): a second submission for
/// the same day overwrites the first instead of adding a row.
fn attendance_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let input = validate::validate_attendance(conn, params)?;
    db::upsert_attendance(
        conn,
        &input.student_id,
        &input.attendance_date,
        input.status,
        input.remarks.as_deref(),
    )
    .map_err(|e| db_err("db_insert_failed", e))?;

    let (record_id, status, remarks): (String, String, Option<String>) = conn
        .query_row(
            "SELECT id, status, remarks FROM attendance
             WHERE student_id = ? AND attendance_date = ?",
            (&input.student_id, &input.attendance_date),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(|e| db_err("db_query_failed", e))?;

    Ok(json!({
        "recordId": record_id,
        "studentId": input.student_id,
        "attendanceDate": input.attendance_date,
        "status": status,
        "remarks": remarks
    }))
}

/// Edits status/remarks on an existing row; the day and student a record
/// belongs to never change after the fact.
fn attendance_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let record_id = get_required_str(params, "recordId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM attendance WHERE id = ?", [&record_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "attendance record not found"));
    }

    let mut errors = FieldErrors::default();
    let status_str = params
        .get("status")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let status = match status_str {
        None => {
            errors.push("status", "Status is required");
            None
        }
        Some(s) => match AttendanceStatus::parse(s) {
            Some(v) => Some(v),
            None => {
                errors.push("status", "Invalid status");
                None
            }
        },
    };
    if !errors.is_empty() {
        return Err(HandlerErr {
            code: "validation_failed",
            message: "validation failed".to_string(),
            details: Some(errors.into_details()),
        });
    }
    let status = status.unwrap_or(AttendanceStatus::Present);
    let remarks = params
        .get("remarks")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE attendance SET status = ?, remarks = ?, updated_at = ? WHERE id = ?",
        (status.as_str(), &remarks, &now, &record_id),
    )
    .map_err(|e| db_err("db_update_failed", e))?;

    Ok(json!({ "ok": true }))
}

fn attendance_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let record_id = get_required_str(params, "recordId")?;
    let deleted = conn
        .execute("DELETE FROM attendance WHERE id = ?", [&record_id])
        .map_err(|e| db_err("db_delete_failed", e))?;
    if deleted == 0 {
        return Err(HandlerErr::new("not_found", "attendance record not found"));
    }
    Ok(json!({ "ok": true }))
}

fn attendance_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let sql = format!(
        "{} ORDER BY a.attendance_date DESC, s.first_name ASC",
        JOINED_ATTENDANCE_SELECT
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| db_err("db_query_failed", e))?;
    let records: Vec<serde_json::Value> = stmt
        .query_map([], |r| joined_attendance_row(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;
    Ok(json!({ "records": records }))
}

fn attendance_list_by_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if !db::student_exists(conn, &student_id).map_err(|e| db_err("db_query_failed", e))? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, attendance_date, status, remarks
             FROM attendance
             WHERE student_id = ?
             ORDER BY attendance_date DESC",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let records: Vec<serde_json::Value> = stmt
        .query_map([&student_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "attendanceDate": r.get::<_, String>(1)?,
                "status": r.get::<_, String>(2)?,
                "remarks": r.get::<_, Option<String>>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;
    Ok(json!({ "records": records }))
}

fn attendance_list_by_date(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_str(params, "date")?;
    let sql = format!(
        "{} WHERE a.attendance_date = ? ORDER BY s.first_name ASC",
        JOINED_ATTENDANCE_SELECT
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| db_err("db_query_failed", e))?;
    let records: Vec<serde_json::Value> = stmt
        .query_map([&date], |r| joined_attendance_row(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;
    Ok(json!({ "records": records }))
}

fn attendance_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if !db::student_exists(conn, &student_id).map_err(|e| db_err("db_query_failed", e))? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let summary =
        calc::attendance_summary_for_student(conn, &student_id).map_err(HandlerErr::from)?;
    serde_json::to_value(&summary).map_err(|e| HandlerErr::new("internal", e.to_string()))
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
        "attendance.mark" => Some(with_conn(state, req, attendance_mark)),
        "attendance.update" => Some(with_conn(state, req, attendance_update)),
        "attendance.delete" => Some(with_conn(state, req, attendance_delete)),
        "attendance.list" => Some(with_conn(state, req, |c, _| attendance_list(c))),
        "attendance.listByStudent" => Some(with_conn(state, req, attendance_list_by_student)),
        "attendance.listByDate" => Some(with_conn(state, req, attendance_list_by_date)),
        "attendance.summary" => Some(with_conn(state, req, attendance_summary)),
        _ => None,
    }
}
