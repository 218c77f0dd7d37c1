use crate::calc;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_err, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::validate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn joined_grade_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let first: String = r.get(9)?;
    let last: String = r.get(10)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, String>(1)?,
        "subject": r.get::<_, String>(2)?,
        "semester": r.get::<_, Option<String>>(3)?,
        "marksObtained": r.get::<_, f64>(4)?,
        "totalMarks": r.get::<_, f64>(5)?,
        "percentage": r.get::<_, f64>(6)?,
        "grade": r.get::<_, String>(7)?,
        "examDate": r.get::<_, String>(8)?,
        "rollNumber": r.get::<_, String>(11)?,
        "studentName": format!("{} {}", first, last)
    }))
}

const JOINED_GRADE_SELECT: &str =
    "SELECT g.id, g.student_id, g.subject, g.semester, g.marks_obtained, g.total_marks,
            g.percentage, g.grade, g.exam_date, s.first_name, s.last_name, s.roll_number
     FROM grades g
     JOIN students s ON g.student_id = s.id";

fn grades_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let sql = format!(
        "{} ORDER BY g.exam_date DESC, s.first_name ASC",
        JOINED_GRADE_SELECT
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| db_err("db_query_failed", e))?;
    let grades: Vec<serde_json::Value> = stmt
        .query_map([], |r| joined_grade_row(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;
    Ok(json!({ "grades": grades }))
}

fn grades_list_by_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if !db::student_exists(conn, &student_id).map_err(|e| db_err("db_query_failed", e))? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, subject, semester, marks_obtained, total_marks, percentage, grade, exam_date
             FROM grades
             WHERE student_id = ?
             ORDER BY exam_date DESC",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let grades: Vec<serde_json::Value> = stmt
        .query_map([&student_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "subject": r.get::<_, String>(1)?,
                "semester": r.get::<_, Option<String>>(2)?,
                "marksObtained": r.get::<_, f64>(3)?,
                "totalMarks": r.get::<_, f64>(4)?,
                "percentage": r.get::<_, f64>(5)?,
                "grade": r.get::<_, String>(6)?,
                "examDate": r.get::<_, String>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;
    Ok(json!({ "grades": grades }))
}

fn grades_list_by_subject(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject = get_required_str(params, "subject")?;
    let sql = format!(
        "{} WHERE g.subject = ? ORDER BY g.percentage DESC",
        JOINED_GRADE_SELECT
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| db_err("db_query_failed", e))?;
    let grades: Vec<serde_json::Value> = stmt
        .query_map([&subject], |r| joined_grade_row(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;
    Ok(json!({ "grades": grades }))
}

fn grades_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let input = validate::validate_grade(conn, params)?;
    let evaluation = calc::evaluate_grade(input.marks_obtained, input.total_marks)
        .map_err(HandlerErr::from)?;

    let grade_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grades
           (id, student_id, subject, semester, marks_obtained, total_marks,
            percentage, grade, exam_date)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &grade_id,
            &input.student_id,
            &input.subject,
            &input.semester,
            input.marks_obtained,
            input.total_marks,
            evaluation.percentage,
            evaluation.letter,
            &input.exam_date,
        ),
    )
    .map_err(|e| db_err("db_insert_failed", e))?;

    Ok(json!({
        "gradeId": grade_id,
        "percentage": evaluation.percentage,
        "grade": evaluation.letter
    }))
}

/// Update runs the same evaluator as create, so the stored percentage and
/// letter always track the edited marks.
fn grades_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let grade_id = get_required_str(params, "gradeId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM grades WHERE id = ?", [&grade_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "grade not found"));
    }

    let input = validate::validate_grade(conn, params)?;
    let evaluation = calc::evaluate_grade(input.marks_obtained, input.total_marks)
        .map_err(HandlerErr::from)?;

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE grades
         SET subject = ?,
             semester = ?,
             marks_obtained = ?,
             total_marks = ?,
             percentage = ?,
             grade = ?,
             exam_date = ?,
             updated_at = ?
         WHERE id = ?",
        (
            &input.subject,
            &input.semester,
            input.marks_obtained,
            input.total_marks,
            evaluation.percentage,
            evaluation.letter,
            &input.exam_date,
            &now,
            &grade_id,
        ),
    )
    .map_err(|e| db_err("db_update_failed", e))?;

    Ok(json!({
        "gradeId": grade_id,
        "percentage": evaluation.percentage,
        "grade": evaluation.letter
    }))
}

fn grades_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let grade_id = get_required_str(params, "gradeId")?;
    let deleted = conn
        .execute("DELETE FROM grades WHERE id = ?", [&grade_id])
        .map_err(|e| db_err("db_delete_failed", e))?;
    if deleted == 0 {
        return Err(HandlerErr::new("not_found", "grade not found"));
    }
    Ok(json!({ "ok": true }))
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
        "grades.list" => Some(with_conn(state, req, |c, _| grades_list(c))),
        "grades.listByStudent" => Some(with_conn(state, req, grades_list_by_student)),
        "grades.listBySubject" => Some(with_conn(state, req, grades_list_by_subject)),
        "grades.create" => Some(with_conn(state, req, grades_create)),
        "grades.update" => Some(with_conn(state, req, grades_update)),
        "grades.delete" => Some(with_conn(state, req, grades_delete)),
        _ => None,
    }
}
