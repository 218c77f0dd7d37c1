use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;

use crate::calc::AttendanceStatus;
use crate::db;

/// One message per offending field, first failure per field wins.
/// BTreeMap keeps the serialized order stable.
#[derive(Debug, Default)]
pub struct FieldErrors(BTreeMap<&'static str, String>);

impl FieldErrors {
    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_details(self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (field, message) in self.0 {
            map.insert(field.to_string(), json!(message));
        }
        serde_json::Value::Object(map)
    }
}

pub enum ValidateError {
    Invalid(FieldErrors),
    Db(rusqlite::Error),
}

impl From<rusqlite::Error> for ValidateError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Db(e)
    }
}

#[derive(Debug, Clone)]
pub struct StudentInput {
    pub roll_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub class_name: String,
    pub enrollment_date: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct GradeInput {
    pub student_id: String,
    pub subject: String,
    pub semester: Option<String>,
    pub marks_obtained: f64,
    pub total_marks: f64,
    pub exam_date: String,
}

#[derive(Debug, Clone)]
pub struct AttendanceInput {
    pub student_id: String,
    pub attendance_date: String,
    pub status: AttendanceStatus,
    pub remarks: Option<String>,
}

fn opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    let s = params.get(key)?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Forms post numbers as strings; accept both.
fn opt_numeric(params: &serde_json::Value, key: &str) -> Option<Result<f64, ()>> {
    let v = params.get(key)?;
    if v.is_null() {
        return None;
    }
    if let Some(n) = v.as_f64() {
        return Some(Ok(n));
    }
    if let Some(s) = v.as_str() {
        let t = s.trim();
        if t.is_empty() {
            return None;
        }
        return Some(t.parse::<f64>().map_err(|_| ()));
    }
    Some(Err(()))
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Strict YYYY-MM-DD: four digit year, two digit month and day, and a real
/// calendar date.
pub fn is_strict_date(s: &str) -> bool {
    let b = s.as_bytes();
    if b.len() != 10 || b[4] != b'-' || b[7] != b'-' {
        return false;
    }
    for (i, c) in b.iter().enumerate() {
        if i == 4 || i == 7 {
            continue;
        }
        if !c.is_ascii_digit() {
            return false;
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

pub fn is_valid_email(s: &str) -> bool {
    if s.chars().any(|c| c.is_whitespace()) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

/// Digits plus dash/plus/space separators, at least 10 characters.
pub fn is_valid_phone(s: &str) -> bool {
    s.len() >= 10
        && s.chars()
            .all(|c| c.is_ascii_digit() || c == '-' || c == '+' || c == ' ')
}

pub fn validate_student(
    conn: &Connection,
    params: &serde_json::Value,
    excluding: Option<&str>,
) -> Result<StudentInput, ValidateError> {
    let mut errors = FieldErrors::default();

    let roll_number = opt_str(params, "rollNumber");
    match &roll_number {
        None => errors.push("rollNumber", "Roll number is required"),
        Some(roll) => {
            if db::roll_number_exists(conn, roll, excluding)? {
                errors.push("rollNumber", "This roll number already exists");
            }
        }
    }

    let first_name = opt_str(params, "firstName");
    match &first_name {
        None => errors.push("firstName", "First name is required"),
        Some(name) if name.chars().count() < 2 => {
            errors.push("firstName", "First name must be at least 2 characters")
        }
        Some(_) => {}
    }

    let last_name = opt_str(params, "lastName");
    match &last_name {
        None => errors.push("lastName", "Last name is required"),
        Some(name) if name.chars().count() < 2 => {
            errors.push("lastName", "Last name must be at least 2 characters")
        }
        Some(_) => {}
    }

    let email = opt_str(params, "email");
    match &email {
        None => errors.push("email", "Email is required"),
        Some(addr) => {
            if !is_valid_email(addr) {
                errors.push("email", "Invalid email format");
            } else if db::email_exists(conn, addr, excluding)? {
                errors.push("email", "This email already exists");
            }
        }
    }

    let phone = opt_str(params, "phone");
    if let Some(p) = &phone {
        if !is_valid_phone(p) {
            errors.push("phone", "Invalid phone number format");
        }
    }

    let class_name = opt_str(params, "className");
    if class_name.is_none() {
        errors.push("className", "Class is required");
    }

    if !errors.is_empty() {
        return Err(ValidateError::Invalid(errors));
    }

    Ok(StudentInput {
        roll_number: roll_number.unwrap_or_default(),
        first_name: first_name.unwrap_or_default(),
        last_name: last_name.unwrap_or_default(),
        email: email.unwrap_or_default(),
        phone,
        date_of_birth: opt_str(params, "dateOfBirth"),
        gender: opt_str(params, "gender"),
        address: opt_str(params, "address"),
        class_name: class_name.unwrap_or_default(),
        enrollment_date: opt_str(params, "enrollmentDate").unwrap_or_else(today),
        status: opt_str(params, "status").unwrap_or_else(|| "Active".to_string()),
    })
}

pub fn validate_grade(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<GradeInput, ValidateError> {
    let mut errors = FieldErrors::default();

    let student_id = opt_str(params, "studentId");
    match &student_id {
        None => errors.push("studentId", "Student is required"),
        Some(id) => {
            if !db::student_exists(conn, id)? {
                errors.push("studentId", "Student not found");
            }
        }
    }

    let subject = opt_str(params, "subject");
    if subject.is_none() {
        errors.push("subject", "Subject is required");
    }

    let marks_obtained = match opt_numeric(params, "marksObtained") {
        None => {
            errors.push("marksObtained", "Marks obtained is required");
            None
        }
        Some(Err(())) => {
            errors.push("marksObtained", "Marks must be a number");
            None
        }
        Some(Ok(n)) if !n.is_finite() || n < 0.0 => {
            errors.push("marksObtained", "Marks cannot be negative");
            None
        }
        Some(Ok(n)) => Some(n),
    };

    let total_marks = match opt_numeric(params, "totalMarks") {
        None => Some(100.0),
        Some(Err(())) => {
            errors.push("totalMarks", "Total marks must be a number");
            None
        }
        Some(Ok(n)) if !n.is_finite() || n <= 0.0 => {
            errors.push("totalMarks", "Total marks must be greater than zero");
            None
        }
        Some(Ok(n)) => Some(n),
    };

    if let (Some(marks), Some(total)) = (marks_obtained, total_marks) {
        if marks > total {
            errors.push("marksObtained", "Marks obtained cannot exceed total marks");
        }
    }

    let exam_date = opt_str(params, "examDate");
    if let Some(d) = &exam_date {
        if !is_strict_date(d) {
            errors.push("examDate", "Invalid date format (use YYYY-MM-DD)");
        }
    }

    if !errors.is_empty() {
        return Err(ValidateError::Invalid(errors));
    }

    Ok(GradeInput {
        student_id: student_id.unwrap_or_default(),
        subject: subject.unwrap_or_default(),
        semester: opt_str(params, "semester"),
        marks_obtained: marks_obtained.unwrap_or(0.0),
        total_marks: total_marks.unwrap_or(100.0),
        exam_date: exam_date.unwrap_or_else(today),
    })
}

pub fn validate_attendance(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<AttendanceInput, ValidateError> {
    let mut errors = FieldErrors::default();

    let student_id = opt_str(params, "studentId");
    match &student_id {
        None => errors.push("studentId", "Student is required"),
        Some(id) => {
            if !db::student_exists(conn, id)? {
                errors.push("studentId", "Student not found");
            }
        }
    }

    let attendance_date = opt_str(params, "attendanceDate");
    match &attendance_date {
        None => errors.push("attendanceDate", "Attendance date is required"),
        Some(d) => {
            if !is_strict_date(d) {
                errors.push("attendanceDate", "Invalid date format (use YYYY-MM-DD)");
            }
        }
    }

    let status = match opt_str(params, "status") {
        None => {
            errors.push("status", "Status is required");
            None
        }
        Some(s) => match AttendanceStatus::parse(&s) {
            Some(v) => Some(v),
            None => {
                errors.push("status", "Invalid status");
                None
            }
        },
    };

    if !errors.is_empty() {
        return Err(ValidateError::Invalid(errors));
    }

    Ok(AttendanceInput {
        student_id: student_id.unwrap_or_default(),
        attendance_date: attendance_date.unwrap_or_default(),
        status: status.unwrap_or(AttendanceStatus::Present),
        remarks: opt_str(params, "remarks"),
    })
}
