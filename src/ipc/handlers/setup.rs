use crate::auth::DEFAULT_SESSION_TTL_MINUTES;
use crate::calc::{ReportOptions, DEFAULT_ON_TRACK_PERCENT, DEFAULT_SHORT_DESCRIPTION_CHARS};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, require_teacher};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

pub const DEFAULT_PASSAGE_TEXT: &str = "This is a sample reading passage generated for fluency practice. \
In a real app, this text would match the student's grade level and chosen topic.";

#[derive(Clone, Copy)]
enum SetupSection {
    Reports,
    Sessions,
    Fluency,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "reports" => Some(Self::Reports),
            "sessions" => Some(Self::Sessions),
            "fluency" => Some(Self::Fluency),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Reports => "reports",
            Self::Sessions => "sessions",
            Self::Fluency => "fluency",
        }
    }

    /// Settings are per teacher; one teacher's thresholds never leak into
    /// another's reports.
    fn key(self, teacher_id: &str) -> String {
        format!("setup.{}:{}", self.name(), teacher_id)
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Reports => json!({
            "onTrackPercent": DEFAULT_ON_TRACK_PERCENT as i64,
            "shortDescriptionChars": DEFAULT_SHORT_DESCRIPTION_CHARS
        }),
        SetupSection::Sessions => json!({
            "ttlMinutes": DEFAULT_SESSION_TTL_MINUTES
        }),
        SetupSection::Fluency => json!({
            "passageText": DEFAULT_PASSAGE_TEXT
        }),
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Reports => match k.as_str() {
                "onTrackPercent" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 100)?));
                }
                "shortDescriptionChars" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 10, 200)?));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
            SetupSection::Sessions => match k.as_str() {
                "ttlMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 5, 43_200)?));
                }
                _ => return Err(format!("unknown sessions field: {}", k)),
            },
            SetupSection::Fluency => match k.as_str() {
                "passageText" => {
                    let s = parse_string_max(v, k, 2000)?;
                    if s.is_empty() {
                        return Err(format!("{} must not be empty", k));
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown fluency field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(
    conn: &Connection,
    section: SetupSection,
    teacher_id: &str,
) -> anyhow::Result<Value> {
    let key = section.key(teacher_id);
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, &key)? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults.
            let mut merged = current.clone();
            if merge_section_patch(section, &mut merged, saved_obj).is_ok() {
                current = merged;
            } else {
                tracing::warn!(key = %key, "ignoring malformed saved settings");
            }
        }
    }
    Ok(current)
}

pub fn report_options(conn: &Connection, teacher_id: &str) -> ReportOptions {
    let mut opts = ReportOptions::default();
    if let Ok(v) = load_section(conn, SetupSection::Reports, teacher_id) {
        if let Some(p) = v.get("onTrackPercent").and_then(|v| v.as_i64()) {
            opts.on_track_percent = p as f64;
        }
        if let Some(n) = v.get("shortDescriptionChars").and_then(|v| v.as_u64()) {
            opts.short_description_chars = n as usize;
        }
    }
    opts
}

pub fn session_ttl_minutes(conn: &Connection, teacher_id: &str) -> i64 {
    load_section(conn, SetupSection::Sessions, teacher_id)
        .ok()
        .and_then(|v| v.get("ttlMinutes").and_then(|v| v.as_i64()))
        .unwrap_or(DEFAULT_SESSION_TTL_MINUTES)
}

pub fn passage_text(conn: &Connection, teacher_id: &str) -> String {
    load_section(conn, SetupSection::Fluency, teacher_id)
        .ok()
        .and_then(|v| {
            v.get("passageText")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| DEFAULT_PASSAGE_TEXT.to_string())
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher = match require_teacher(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };

    let mut out = Map::new();
    for section in [
        SetupSection::Reports,
        SetupSection::Sessions,
        SetupSection::Fluency,
    ] {
        match load_section(conn, section, &teacher.id) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher = match require_teacher(conn, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section, &teacher.id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, &section.key(&teacher.id), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(teacher_id = %teacher.id, section = section.name(), "settings updated");
    let mut result = json!({ "ok": true });
    result[section_raw] = current;
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
