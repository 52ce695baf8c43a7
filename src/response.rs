//! Standard response envelope helpers.

use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

#[derive(Serialize)]
pub struct PageMeta {
    pub count: u64,
    pub limit: usize,
    pub offset: usize,
}

/// List envelope: `{"data": [...], "meta": {"count", "limit", "offset"}}`.
pub fn page<T: Serialize>(data: Vec<T>, limit: usize, offset: usize) -> Value {
    let count = data.len() as u64;
    serde_json::to_value(Page {
        data,
        meta: PageMeta { count, limit, offset },
    })
    .unwrap_or(Value::Null)
}

pub fn error_body(code: &str, message: String, details: Option<Value>) -> Value {
    let mut error = serde_json::json!({
        "code": code,
        "message": message,
    });
    if let Some(details) = details {
        error["details"] = details;
    }
    serde_json::json!({ "error": error })
}
