use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_bool, parse_opt_string, required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let combination_id = match parse_opt_string(req.params.get("combinationId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("combinationId {}", m), None),
    };

    let sql = if combination_id.is_some() {
        "SELECT id, last_name, first_name, student_no, combination_id, active, sort_order
         FROM students
         WHERE class_id = ? AND combination_id = ?
         ORDER BY sort_order"
    } else {
        "SELECT id, last_name, first_name, student_no, combination_id, active, sort_order
         FROM students
         WHERE class_id = ?
         ORDER BY sort_order"
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let map_row = |row: &rusqlite::Row| -> rusqlite::Result<serde_json::Value> {
        let id: String = row.get(0)?;
        let last_name: String = row.get(1)?;
        let first_name: String = row.get(2)?;
        let student_no: Option<String> = row.get(3)?;
        let combination_id: Option<String> = row.get(4)?;
        let active: i64 = row.get(5)?;
        let sort_order: i64 = row.get(6)?;

        let display_name = format!("{}, {}", last_name, first_name);
        let student_no = student_no.filter(|s| !s.trim().is_empty());
        Ok(json!({
            "id": id,
            "lastName": last_name,
            "firstName": first_name,
            "displayName": display_name,
            "studentNo": student_no,
            "combinationId": combination_id,
            "active": active != 0,
            "sortOrder": sort_order
        }))
    };

    let rows = if let Some(cb) = combination_id {
        stmt.query_map([&class_id, &cb], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        stmt.query_map([&class_id], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
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
    let student_no = match parse_opt_string(req.params.get("studentNo")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("studentNo {}", m), None),
    };
    let combination_id = match parse_opt_string(req.params.get("combinationId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("combinationId {}", m), None),
    };
    let active = match parse_bool(req.params.get("active"), true) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("active {}", m), None),
    };

    match row_exists(conn, "classes", &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    if let Some(cb) = combination_id.as_deref() {
        match combination_in_class(conn, cb, &class_id) {
            Ok(true) => {}
            Ok(false) => {
                return err(
                    &req.id,
                    "not_found",
                    "combination not found in this class",
                    None,
                )
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let sort_order: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, class_id, combination_id, last_name, first_name, student_no, active, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            combination_id.as_deref(),
            &last_name,
            &first_name,
            student_no.as_deref(),
            if active { 1 } else { 0 },
            sort_order,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
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
    if let Some(v) = patch.get("studentNo") {
        match parse_opt_string(Some(v)) {
            Ok(Some(s)) => {
                sets.push("student_no = ?");
                values.push(Value::Text(s));
            }
            Ok(None) => {
                sets.push("student_no = NULL");
            }
            Err(m) => return err(&req.id, "bad_params", format!("studentNo {}", m), None),
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

    let sql = format!(
        "UPDATE students SET {} WHERE id = ? AND class_id = ?",
        sets.join(", ")
    );
    values.push(Value::Text(student_id.clone()));
    values.push(Value::Text(class_id));

    let changed = match conn.execute(&sql, params_from_iter(values)) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_assign_combination(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let combination_id = match parse_opt_string(req.params.get("combinationId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("combinationId {}", m), None),
    };

    let class_id: Option<String> = match conn
        .query_row(
            "SELECT class_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(class_id) = class_id else {
        return err(&req.id, "not_found", "student not found", None);
    };

    // A null combinationId clears the membership.
    if let Some(cb) = combination_id.as_deref() {
        match combination_in_class(conn, cb, &class_id) {
            Ok(true) => {}
            Ok(false) => {
                return err(
                    &req.id,
                    "not_found",
                    "combination not found in this class",
                    None,
                )
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    if let Err(e) = conn.execute(
        "UPDATE students SET combination_id = ? WHERE id = ?",
        (combination_id.as_deref(), &student_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "studentId": student_id, "combinationId": combination_id }),
    )
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match row_exists(conn, "students", &student_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM fee_payments WHERE student_id = ?",
        [&student_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "fee_payments" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM fee_assignments WHERE student_id = ?",
        [&student_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "fee_assignments" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM library_reservations WHERE student_id = ?",
        [&student_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "library_reservations" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn combination_in_class(
    conn: &rusqlite::Connection,
    combination_id: &str,
    class_id: &str,
) -> Result<bool, rusqlite::Error> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM combinations WHERE id = ? AND class_id = ?",
            [combination_id, class_id],
            |_r| Ok(()),
        )
        .optional()?
        .is_some())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.assignCombination" => Some(handle_students_assign_combination(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
