use crate::ipc::error::{err, ok, store_err};
use crate::ipc::helpers::{db_conn, param_str, require_teacher};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, StoreError};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

use super::setup;

fn validation(req: &Request, message: &str) -> serde_json::Value {
    err(&req.id, "validation_failed", message, None)
}

/// Raw param without trimming; passwords are taken as typed.
fn raw_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

fn start_session(conn: &Connection, req: &Request, teacher_id: &str) -> serde_json::Value {
    let ttl = setup::session_ttl_minutes(conn, teacher_id);
    match store::create_session(conn, teacher_id, Utc::now(), ttl) {
        Ok(token) => ok(
            &req.id,
            json!({
                "sessionToken": token,
                "teacherId": teacher_id,
                "redirect": "/students"
            }),
        ),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (Some(email), Some(password), Some(confirm)) = (
        param_str(req, "email"),
        raw_str(req, "password"),
        raw_str(req, "confirmPassword"),
    ) else {
        return validation(req, "Please fill in all fields.");
    };
    if password != confirm {
        return validation(req, "Passwords do not match.");
    }

    let teacher = match store::register_teacher(conn, &email, password) {
        Ok(t) => t,
        Err(StoreError::Conflict(msg)) => return validation(req, &msg),
        Err(e) => return store_err(&req.id, &e),
    };
    tracing::info!(teacher_id = %teacher.id, "teacher registered");
    start_session(conn, req, &teacher.id)
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let email = param_str(req, "email").unwrap_or_default();
    let password = raw_str(req, "password").unwrap_or_default();

    match store::authenticate(conn, &email, password) {
        Ok(Some(teacher)) => {
            tracing::info!(teacher_id = %teacher.id, "teacher logged in");
            start_session(conn, req, &teacher.id)
        }
        Ok(None) => {
            tracing::debug!("login rejected");
            validation(req, "Incorrect email or password.")
        }
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Some(token) = req.session_token() {
        match store::revoke_session(conn, token) {
            Ok(true) => tracing::info!("session revoked"),
            Ok(false) => {}
            Err(e) => return store_err(&req.id, &e),
        }
    }
    ok(&req.id, json!({ "redirect": "/login" }))
}

fn handle_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match require_teacher(conn, req) {
        Ok(t) => ok(&req.id, json!({ "teacherId": t.id, "email": t.email })),
        Err(e) => e,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.register" => Some(handle_register(state, req)),
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.session" => Some(handle_session(state, req)),
        _ => None,
    }
}
