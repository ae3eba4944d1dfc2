use crate::calc;
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::model::Teacher;
use crate::store;
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Non-blank string param, trimmed. Numbers are accepted as their decimal text.
pub fn param_str(req: &Request, key: &str) -> Option<String> {
    match req.params.get(key)? {
        serde_json::Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    param_str(req, key).ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Integer param sent either as a JSON number or as form text.
pub fn param_i64(req: &Request, key: &str) -> Option<i64> {
    match req.params.get(key)? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Resolves the session token to its teacher, or an `unauthorized` reply
/// pointing back at the login view.
pub fn require_teacher(conn: &Connection, req: &Request) -> Result<Teacher, serde_json::Value> {
    let Some(token) = req.session_token() else {
        return Err(err(
            &req.id,
            "unauthorized",
            "login required",
            Some(json!({ "redirect": "/login" })),
        ));
    };
    store::session_teacher(conn, token, Utc::now()).map_err(|e| store_err(&req.id, &e))
}

/// Submitted date, or today's UTC date when blank. `None` when malformed.
pub fn resolve_date(req: &Request) -> Option<String> {
    match param_str(req, "date") {
        None => Some(Utc::now().date_naive().format("%Y-%m-%d").to_string()),
        Some(raw) => calc::parse_iso_date(&raw).map(|d| d.format("%Y-%m-%d").to_string()),
    }
}

/// A submission that failed validation: nothing is written and the caller is
/// sent back to the view it came from.
pub fn discarded(req: &Request, redirect: String, reason: &str) -> serde_json::Value {
    tracing::debug!(method = %req.method, reason, "submission discarded");
    ok(&req.id, json!({ "saved": false, "redirect": redirect }))
}
