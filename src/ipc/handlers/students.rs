use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_err, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::validate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const SEARCH_MIN_QUERY_LEN: usize = 2;
const SEARCH_MAX_RESULTS: i64 = 20;

#[derive(Debug, Clone)]
struct StudentRow {
    id: String,
    roll_number: String,
    first_name: String,
    last_name: String,
    email: String,
    phone: Option<String>,
    date_of_birth: Option<String>,
    gender: Option<String>,
    address: Option<String>,
    class_name: String,
    enrollment_date: String,
    status: String,
}

const STUDENT_COLUMNS: &str = "id, roll_number, first_name, last_name, email, phone, \
                               date_of_birth, gender, address, class_name, enrollment_date, status";

fn row_to_student(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        roll_number: r.get(1)?,
        first_name: r.get(2)?,
        last_name: r.get(3)?,
        email: r.get(4)?,
        phone: r.get(5)?,
        date_of_birth: r.get(6)?,
        gender: r.get(7)?,
        address: r.get(8)?,
        class_name: r.get(9)?,
        enrollment_date: r.get(10)?,
        status: r.get(11)?,
    })
}

fn student_json(s: &StudentRow) -> serde_json::Value {
    json!({
        "id": s.id,
        "rollNumber": s.roll_number,
        "firstName": s.first_name,
        "lastName": s.last_name,
        "fullName": format!("{} {}", s.first_name, s.last_name),
        "email": s.email,
        "phone": s.phone,
        "dateOfBirth": s.date_of_birth,
        "gender": s.gender,
        "address": s.address,
        "className": s.class_name,
        "enrollmentDate": s.enrollment_date,
        "status": s.status
    })
}

fn load_student(conn: &Connection, student_id: &str) -> Result<Option<StudentRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS),
        [student_id],
        |r| row_to_student(r),
    )
    .optional()
    .map_err(|e| db_err("db_query_failed", e))
}

fn query_students(conn: &Connection, sql: &str, args: &[&str]) -> Result<Vec<StudentRow>, HandlerErr> {
    let mut stmt = conn.prepare(sql).map_err(|e| db_err("db_query_failed", e))?;
    stmt.query_map(rusqlite::params_from_iter(args), |r| row_to_student(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))
}

/// Dashboard listing: every student decorated with the composed summary.
fn students_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let students = query_students(
        conn,
        &format!(
            "SELECT {} FROM students ORDER BY first_name ASC, last_name ASC",
            STUDENT_COLUMNS
        ),
        &[],
    )?;

    let mut out = Vec::with_capacity(students.len());
    for s in &students {
        let summary = calc::student_summary(conn, &s.id).map_err(HandlerErr::from)?;
        let mut v = student_json(s);
        v["averageGrade"] = json!(summary.average_grade);
        v["attendancePercentage"] = json!(summary.attendance_percentage);
        out.push(v);
    }
    Ok(json!({ "students": out }))
}

fn students_list_by_class(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_name = get_required_str(params, "className")?;
    let students = query_students(
        conn,
        &format!(
            "SELECT {} FROM students WHERE class_name = ? ORDER BY first_name ASC, last_name ASC",
            STUDENT_COLUMNS
        ),
        &[class_name.as_str()],
    )?;
    let out: Vec<serde_json::Value> = students.iter().map(student_json).collect();
    Ok(json!({ "students": out }))
}

/// Detail view: the student plus full grade and attendance history and the
/// same composed summary the listing shows.
fn students_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let Some(student) = load_student(conn, &student_id)? else {
        return Err(HandlerErr::new("not_found", "student not found"));
    };

    let mut grades_stmt = conn
        .prepare(
            "SELECT id, subject, semester, marks_obtained, total_marks, percentage, grade, exam_date
             FROM grades
             WHERE student_id = ?
             ORDER BY exam_date DESC",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let grades: Vec<serde_json::Value> = grades_stmt
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

    let mut att_stmt = conn
        .prepare(
            "SELECT id, attendance_date, status, remarks
             FROM attendance
             WHERE student_id = ?
             ORDER BY attendance_date DESC",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let attendance: Vec<serde_json::Value> = att_stmt
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

    let attendance_summary =
        calc::attendance_summary_for_student(conn, &student_id).map_err(HandlerErr::from)?;
    let summary = calc::student_summary(conn, &student_id).map_err(HandlerErr::from)?;

    let mut v = student_json(&student);
    v["grades"] = json!(grades);
    v["attendance"] = json!(attendance);
    v["attendanceSummary"] = serde_json::to_value(&attendance_summary)
        .map_err(|e| HandlerErr::new("internal", e.to_string()))?;
    v["summary"] = serde_json::to_value(&summary)
        .map_err(|e| HandlerErr::new("internal", e.to_string()))?;
    Ok(v)
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let input = validate::validate_student(conn, params, None)?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students
           (id, roll_number, first_name, last_name, email, phone, date_of_birth,
            gender, address, class_name, enrollment_date, status)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &input.roll_number,
            &input.first_name,
            &input.last_name,
            &input.email,
            &input.phone,
            &input.date_of_birth,
            &input.gender,
            &input.address,
            &input.class_name,
            &input.enrollment_date,
            &input.status,
        ),
    )
    .map_err(|e| db_err("db_insert_failed", e))?;

    Ok(json!({ "studentId": student_id }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if load_student(conn, &student_id)?.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let input = validate::validate_student(conn, params, Some(&student_id))?;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE students
         SET roll_number = ?,
             first_name = ?,
             last_name = ?,
             email = ?,
             phone = ?,
             date_of_birth = ?,
             gender = ?,
             address = ?,
             class_name = ?,
             status = ?,
             updated_at = ?
         WHERE id = ?",
        (
            &input.roll_number,
            &input.first_name,
            &input.last_name,
            &input.email,
            &input.phone,
            &input.date_of_birth,
            &input.gender,
            &input.address,
            &input.class_name,
            &input.status,
            &now,
            &student_id,
        ),
    )
    .map_err(|e| db_err("db_update_failed", e))?;

    Ok(json!({ "ok": true }))
}

/// Grades and attendance rows are meaningless without their student, so
/// they go in the same transaction, dependency order first.
fn students_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if load_student(conn, &student_id)?.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err("db_tx_failed", e))?;
    tx.execute("DELETE FROM grades WHERE student_id = ?", [&student_id])
        .map_err(|e| db_err("db_delete_failed", e))?;
    tx.execute("DELETE FROM attendance WHERE student_id = ?", [&student_id])
        .map_err(|e| db_err("db_delete_failed", e))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| db_err("db_delete_failed", e))?;
    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;

    Ok(json!({ "ok": true }))
}

fn students_search(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let query = get_required_str(params, "query")?;
    let query = query.trim();
    if query.chars().count() < SEARCH_MIN_QUERY_LEN {
        return Ok(json!({ "students": [] }));
    }

    let like = format!("%{}%", query);
    let mut stmt = conn
        .prepare(
            "SELECT id, roll_number, first_name, last_name, email, class_name, status
             FROM students
             WHERE first_name LIKE ?1
                OR last_name LIKE ?1
                OR email LIKE ?1
                OR roll_number LIKE ?1
             ORDER BY first_name ASC
             LIMIT ?2",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let students: Vec<serde_json::Value> = stmt
        .query_map((&like, SEARCH_MAX_RESULTS), |r| {
            let first: String = r.get(2)?;
            let last: String = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "rollNumber": r.get::<_, String>(1)?,
                "fullName": format!("{} {}", first, last),
                "email": r.get::<_, String>(4)?,
                "className": r.get::<_, String>(5)?,
                "status": r.get::<_, String>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;

    Ok(json!({ "students": students }))
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
        "students.list" => Some(with_conn(state, req, |c, _| students_list(c))),
        "students.listByClass" => Some(with_conn(state, req, students_list_by_class)),
        "students.get" => Some(with_conn(state, req, students_get)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        "students.search" => Some(with_conn(state, req, students_search)),
        _ => None,
    }
}
