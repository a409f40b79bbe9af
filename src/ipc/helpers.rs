use chrono::{NaiveDate, NaiveTime, Utc};
use serde_json::json;

use crate::ipc::error::HandlerErr;

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Non-empty trimmed string, required.
pub fn get_required_text(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let v = get_required_str(params, key)?;
    let t = v.trim().to_string();
    if t.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(t)
}

pub fn get_str_array(params: &serde_json::Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let arr = params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    Ok(arr
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect())
}

/// Dates on the wire are `YYYY-MM-DD`.
pub fn validate_tanggal(tanggal: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(tanggal, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("tanggal must be YYYY-MM-DD, got {}", tanggal)))
}

/// Times on the wire are `HH:MM`.
pub fn validate_jam(jam: &str) -> Result<NaiveTime, HandlerErr> {
    NaiveTime::parse_from_str(jam, "%H:%M")
        .map_err(|_| HandlerErr::bad_params(format!("jam must be HH:MM, got {}", jam)))
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn pagination_json(page: u64, per_page: u64, total: u64) -> serde_json::Value {
    json!({
        "page": page,
        "perPage": per_page,
        "total": total,
        "totalPages": if per_page == 0 { 0 } else { (total + per_page - 1) / per_page },
    })
}
