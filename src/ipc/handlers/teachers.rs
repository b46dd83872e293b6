use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_bool, parse_opt_string, required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use crate::timetable;
use rusqlite::{params_from_iter, types::Value, Connection};
use serde_json::json;
use uuid::Uuid;

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT
           t.id,
           t.last_name,
           t.first_name,
           t.email,
           t.active,
           (SELECT COUNT(*) FROM course_assignments ca WHERE ca.teacher_id = t.id) AS course_count
         FROM teachers t
         ORDER BY t.last_name, t.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let last_name: String = row.get(1)?;
            let first_name: String = row.get(2)?;
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "lastName": last_name.clone(),
                "firstName": first_name.clone(),
                "displayName": format!("{} {}", first_name, last_name),
                "email": row.get::<_, Option<String>>(3)?,
                "active": row.get::<_, i64>(4)? != 0,
                "courseCount": row.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = match parse_opt_string(req.params.get("email")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("email {}", m), None),
    };
    let active = match parse_bool(req.params.get("active"), true) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("active {}", m), None),
    };

    let teacher_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, last_name, first_name, email, active) VALUES(?, ?, ?, ?, ?)",
        (
            &teacher_id,
            &last_name,
            &first_name,
            email.as_deref(),
            if active { 1 } else { 0 },
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    ok(&req.id, json!({ "teacherId": teacher_id }))
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("firstName") {
        match v.as_str().map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => {
                sets.push("first_name = ?");
                values.push(Value::Text(s.to_string()));
            }
            None => return err(&req.id, "bad_params", "firstName must not be empty", None),
        }
    }
    if let Some(v) = patch.get("lastName") {
        match v.as_str().map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => {
                sets.push("last_name = ?");
                values.push(Value::Text(s.to_string()));
            }
            None => return err(&req.id, "bad_params", "lastName must not be empty", None),
        }
    }
    if let Some(v) = patch.get("email") {
        match parse_opt_string(Some(v)) {
            Ok(Some(s)) => {
                sets.push("email = ?");
                values.push(Value::Text(s));
            }
            Ok(None) => sets.push("email = NULL"),
            Err(m) => return err(&req.id, "bad_params", format!("email {}", m), None),
        }
    }
    if let Some(v) = patch.get("active") {
        match v.as_bool() {
            Some(b) => {
                sets.push("active = ?");
                values.push(Value::Integer(if b { 1 } else { 0 }));
            }
            None => return err(&req.id, "bad_params", "active must be boolean", None),
        }
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "patch has no recognized fields", None);
    }

    let sql = format!("UPDATE teachers SET {} WHERE id = ?", sets.join(", "));
    values.push(Value::Text(teacher_id.clone()));

    let changed = match conn.execute(&sql, params_from_iter(values)) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "teacher not found", None);
    }

    ok(&req.id, json!({ "teacherId": teacher_id }))
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match row_exists(conn, "teachers", &teacher_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "teacher not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let assigned: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM course_assignments WHERE teacher_id = ?",
        [&teacher_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if assigned > 0 {
        return err(
            &req.id,
            "conflict",
            "teacher still has course assignments",
            Some(json!({ "courseAssignments": assigned })),
        );
    }

    match teaches_any_lesson(conn, &teacher_id) {
        Ok(false) => {}
        Ok(true) => {
            return err(
                &req.id,
                "conflict",
                "teacher still appears in a timetable",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

// Timetables are nested JSON documents, so the reference scan parses each
// non-empty one rather than pattern-matching the raw text.
fn teaches_any_lesson(conn: &Connection, teacher_id: &str) -> anyhow::Result<bool> {
    let mut stmt =
        conn.prepare("SELECT timetable_json FROM combinations WHERE timetable_json != '[]'")?;
    let raws = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for raw in raws {
        let days = timetable::parse_timetable(&raw)?;
        let referenced = days
            .iter()
            .flat_map(|d| d.schedule.iter())
            .any(|slot| slot.teacher.id == teacher_id);
        if referenced {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.update" => Some(handle_teachers_update(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        _ => None,
    }
}
