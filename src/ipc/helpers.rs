use crate::calc::CalcError;
use crate::ipc::error::err;
use crate::validate::ValidateError;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<ValidateError> for HandlerErr {
    fn from(e: ValidateError) -> Self {
        match e {
            ValidateError::Invalid(fields) => HandlerErr {
                code: "validation_failed",
                message: "validation failed".to_string(),
                details: Some(fields.into_details()),
            },
            ValidateError::Db(e) => db_err("db_query_failed", e),
        }
    }
}

impl From<CalcError> for HandlerErr {
    fn from(e: CalcError) -> Self {
        let code = match e.code.as_str() {
            "invalid_input" => "invalid_input",
            "not_found" => "not_found",
            _ => "db_query_failed",
        };
        if code == "db_query_failed" {
            tracing::warn!(error = %e.message, "summary computation hit a database failure");
        }
        HandlerErr {
            code,
            message: e.message,
            details: e.details,
        }
    }
}

/// Persistence failures are logged here and surfaced as a generic code;
/// stdout only ever carries the driver's one-line message.
pub fn db_err(code: &'static str, e: rusqlite::Error) -> HandlerErr {
    tracing::warn!(code, error = %e, "database operation failed");
    HandlerErr::new(code, e.to_string())
}

pub fn get_required_str(
    params: &serde_json::Value,
    key: &str,
) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}
