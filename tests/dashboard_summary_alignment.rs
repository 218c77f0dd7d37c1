use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_studentrecd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn studentrecd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// The listing, the detail view and the attendance endpoint must all report
/// the same numbers for the same rows: they share one composer.
#[test]
fn listing_detail_and_summary_endpoints_agree() {
    let workspace = temp_dir("studentrec-summary-align");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let ada = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "rollNumber": "SR-001",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "email": "ada@example.edu",
            "className": "10-A"
        }),
    );
    let ada_id = ada["studentId"].as_str().expect("studentId").to_string();
    let alan = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "rollNumber": "SR-002",
            "firstName": "Alan",
            "lastName": "Turing",
            "email": "alan@example.edu",
            "className": "10-A"
        }),
    );
    let alan_id = alan["studentId"].as_str().expect("studentId").to_string();

    for (i, (subject, marks)) in [("Mathematics", 80.0), ("Physics", 90.0)].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("g{}", i),
            "grades.create",
            json!({
                "studentId": ada_id,
                "subject": subject,
                "marksObtained": marks,
                "totalMarks": 100,
                "examDate": format!("2024-11-0{}", i + 1)
            }),
        );
    }
    for (i, (date, status)) in [
        ("2024-11-01", "Present"),
        ("2024-11-02", "Late"),
        ("2024-11-03", "Present"),
    ]
    .iter()
    .enumerate()
    {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("a{}", i),
            "attendance.mark",
            json!({
                "studentId": ada_id,
                "attendanceDate": date,
                "status": status
            }),
        );
    }

    // Listing row for Ada.
    let listing = request_ok(&mut stdin, &mut reader, "4", "students.list", json!({}));
    let rows = listing["students"].as_array().expect("array");
    assert_eq!(rows.len(), 2);
    let ada_row = rows
        .iter()
        .find(|r| r["id"].as_str() == Some(ada_id.as_str()))
        .expect("ada in listing");
    assert_eq!(ada_row["averageGrade"].as_f64(), Some(85.0));
    assert_eq!(ada_row["attendancePercentage"].as_f64(), Some(66.67));

    // Detail view carries the same composed summary.
    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.get",
        json!({ "studentId": ada_id }),
    );
    assert_eq!(detail["summary"]["averageGrade"].as_f64(), Some(85.0));
    assert_eq!(
        detail["summary"]["attendancePercentage"].as_f64(),
        Some(66.67)
    );
    assert_eq!(detail["attendanceSummary"]["presentDays"].as_i64(), Some(2));
    assert_eq!(detail["attendanceSummary"]["lateDays"].as_i64(), Some(1));
    assert_eq!(detail["grades"].as_array().expect("grades").len(), 2);
    assert_eq!(detail["attendance"].as_array().expect("attendance").len(), 3);

    // The attendance endpoint agrees with both.
    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.summary",
        json!({ "studentId": ada_id }),
    );
    assert_eq!(summary["attendancePercentage"].as_f64(), Some(66.67));
    assert_eq!(
        summary["attendancePercentage"],
        ada_row["attendancePercentage"]
    );

    // A student with no records composes to zeros everywhere.
    let alan_row = rows
        .iter()
        .find(|r| r["id"].as_str() == Some(alan_id.as_str()))
        .expect("alan in listing");
    assert_eq!(alan_row["averageGrade"].as_f64(), Some(0.0));
    assert_eq!(alan_row["attendancePercentage"].as_f64(), Some(0.0));
    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.get",
        json!({ "studentId": alan_id }),
    );
    assert_eq!(detail["summary"]["averageGrade"].as_f64(), Some(0.0));
    assert_eq!(detail["summary"]["attendancePercentage"].as_f64(), Some(0.0));
}

/// Overwriting a day must flow through every summary consumer identically.
#[test]
fn upsert_changes_propagate_to_all_summary_consumers() {
    let workspace = temp_dir("studentrec-summary-upsert");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "rollNumber": "SR-001",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "email": "ada@example.edu",
            "className": "10-A"
        }),
    );
    let student_id = created["studentId"].as_str().expect("studentId").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.mark",
        json!({
            "studentId": student_id,
            "attendanceDate": "2024-11-01",
            "status": "Absent"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.mark",
        json!({
            "studentId": student_id,
            "attendanceDate": "2024-11-02",
            "status": "Present"
        }),
    );

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.summary",
        json!({ "studentId": student_id }),
    );
    assert_eq!(summary["attendancePercentage"].as_f64(), Some(50.0));

    // Correct the absence; the day count must not grow.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.mark",
        json!({
            "studentId": student_id,
            "attendanceDate": "2024-11-01",
            "status": "Present"
        }),
    );

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.summary",
        json!({ "studentId": student_id }),
    );
    assert_eq!(summary["totalDays"].as_i64(), Some(2));
    assert_eq!(summary["attendancePercentage"].as_f64(), Some(100.0));

    let listing = request_ok(&mut stdin, &mut reader, "8", "students.list", json!({}));
    let row = &listing["students"].as_array().expect("array")[0];
    assert_eq!(row["attendancePercentage"].as_f64(), Some(100.0));
}
