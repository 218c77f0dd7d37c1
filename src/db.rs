use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

use crate::calc::AttendanceStatus;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("records.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            roll_number TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            phone TEXT,
            date_of_birth TEXT,
            gender TEXT,
            address TEXT,
            class_name TEXT NOT NULL,
            enrollment_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Active',
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            semester TEXT,
            marks_obtained REAL NOT NULL,
            total_marks REAL NOT NULL DEFAULT 100,
            percentage REAL NOT NULL,
            grade TEXT NOT NULL,
            exam_date TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_subject ON grades(subject)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            attendance_date TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('Present','Absent','Late')),
            remarks TEXT,
            updated_at TEXT,
            UNIQUE(student_id, attendance_date),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(attendance_date)",
        [],
    )?;

    // Workspaces created before these columns existed get them added here.
    ensure_students_updated_at(conn)?;
    ensure_attendance_remarks(conn)?;

    Ok(())
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn ensure_attendance_remarks(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance", "remarks")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE attendance ADD COLUMN remarks TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn student_exists(conn: &Connection, student_id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

pub fn email_exists(
    conn: &Connection,
    email: &str,
    excluding: Option<&str>,
) -> rusqlite::Result<bool> {
    match excluding {
        Some(id) => conn
            .query_row(
                "SELECT 1 FROM students WHERE email = ? AND id != ?",
                (email, id),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map(|v| v.is_some()),
        None => conn
            .query_row("SELECT 1 FROM students WHERE email = ?", [email], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
            .map(|v| v.is_some()),
    }
}

pub fn roll_number_exists(
    conn: &Connection,
    roll_number: &str,
    excluding: Option<&str>,
) -> rusqlite::Result<bool> {
    match excluding {
        Some(id) => conn
            .query_row(
                "SELECT 1 FROM students WHERE roll_number = ? AND id != ?",
                (roll_number, id),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map(|v| v.is_some()),
        None => conn
            .query_row(
                "SELECT 1 FROM students WHERE roll_number = ?",
                [roll_number],
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map(|v| v.is_some()),
    }
}

/// Insert-or-update by the (student, date) natural key in one statement.
/// A repeat submission overwrites status/remarks on the existing row and
/// keeps its id, so a student can never accumulate two rows for one day.
pub fn upsert_attendance(
    conn: &Connection,
    student_id: &str,
    attendance_date: &str,
    status: AttendanceStatus,
    remarks: Option<&str>,
) -> rusqlite::Result<()> {
    let record_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO attendance(id, student_id, attendance_date, status, remarks, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, attendance_date) DO UPDATE SET
           status = excluded.status,
           remarks = excluded.remarks,
           updated_at = excluded.updated_at",
        (
            &record_id,
            student_id,
            attendance_date,
            status.as_str(),
            remarks,
            &now,
        ),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        init_schema(&conn).expect("schema");
        conn.execute(
            "INSERT INTO students(id, roll_number, first_name, last_name, email, class_name,
                                  enrollment_date, status)
             VALUES('s1', 'R-1', 'Ada', 'Lovelace', 'ada@example.edu', '10-A',
                    '2024-09-01', 'Active')",
            [],
        )
        .expect("insert student");
        conn
    }

    #[test]
    fn init_schema_is_idempotent() {
        let conn = test_conn();
        init_schema(&conn).expect("re-run schema");
    }

    #[test]
    fn upsert_attendance_overwrites_same_day() {
        let conn = test_conn();

        upsert_attendance(&conn, "s1", "2024-01-05", AttendanceStatus::Absent, None)
            .expect("first mark");
        let first_id: String = conn
            .query_row(
                "SELECT id FROM attendance WHERE student_id = 's1' AND attendance_date = '2024-01-05'",
                [],
                |r| r.get(0),
            )
            .expect("row after first mark");

        upsert_attendance(
            &conn,
            "s1",
            "2024-01-05",
            AttendanceStatus::Present,
            Some("arrived after roll call"),
        )
        .expect("second mark");

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM attendance WHERE student_id = 's1' AND attendance_date = '2024-01-05'",
                [],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(count, 1);

        let (id, status, remarks): (String, String, Option<String>) = conn
            .query_row(
                "SELECT id, status, remarks FROM attendance
                 WHERE student_id = 's1' AND attendance_date = '2024-01-05'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .expect("row after second mark");
        assert_eq!(id, first_id);
        assert_eq!(status, "Present");
        assert_eq!(remarks.as_deref(), Some("arrived after roll call"));
    }

    #[test]
    fn upsert_attendance_keeps_distinct_dates_apart() {
        let conn = test_conn();
        upsert_attendance(&conn, "s1", "2024-01-05", AttendanceStatus::Present, None)
            .expect("mark day one");
        upsert_attendance(&conn, "s1", "2024-01-06", AttendanceStatus::Late, None)
            .expect("mark day two");
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM attendance WHERE student_id = 's1'",
                [],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(count, 2);
    }

    #[test]
    fn uniqueness_probes_exclude_own_row() {
        let conn = test_conn();
        assert!(email_exists(&conn, "ada@example.edu", None).expect("probe"));
        assert!(!email_exists(&conn, "ada@example.edu", Some("s1")).expect("probe"));
        assert!(!email_exists(&conn, "other@example.edu", None).expect("probe"));

        assert!(roll_number_exists(&conn, "R-1", None).expect("probe"));
        assert!(!roll_number_exists(&conn, "R-1", Some("s1")).expect("probe"));
        assert!(!roll_number_exists(&conn, "R-2", None).expect("probe"));

        assert!(student_exists(&conn, "s1").expect("probe"));
        assert!(!student_exists(&conn, "missing").expect("probe"));
    }
}
