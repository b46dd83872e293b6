use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_opt_string, required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare("SELECT id, name, code FROM subjects ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "code": row.get::<_, Option<String>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match parse_opt_string(req.params.get("code")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("code {}", m), None),
    };

    let dup: Option<String> = match conn
        .query_row("SELECT id FROM subjects WHERE name = ?", [&name], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if dup.is_some() {
        return err(
            &req.id,
            "conflict",
            format!("subject {} already exists", name),
            None,
        );
    }

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, name, code) VALUES(?, ?, ?)",
        (&subject_id, &name, code.as_deref()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    ok(&req.id, json!({ "subjectId": subject_id, "name": name }))
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match parse_opt_string(req.params.get("code")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("code {}", m), None),
    };

    let changed = match conn.execute(
        "UPDATE subjects SET name = ?, code = ? WHERE id = ?",
        (&name, code.as_deref(), &subject_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "subject not found", None);
    }

    ok(&req.id, json!({ "subjectId": subject_id }))
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match row_exists(conn, "subjects", &subject_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let assigned: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM course_assignments WHERE subject_id = ?",
        [&subject_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if assigned > 0 {
        return err(
            &req.id,
            "conflict",
            "subject still has course assignments",
            Some(json!({ "courseAssignments": assigned })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM subjects WHERE id = ?", [&subject_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_courses_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let combination_id = match required_str(req, "combinationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    for (table, id, label) in [
        ("combinations", &combination_id, "combination"),
        ("subjects", &subject_id, "subject"),
        ("teachers", &teacher_id, "teacher"),
    ] {
        match row_exists(conn, table, id) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", format!("{} not found", label), None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let dup: Option<String> = match conn
        .query_row(
            "SELECT id FROM course_assignments WHERE combination_id = ? AND subject_id = ?",
            [&combination_id, &subject_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if dup.is_some() {
        return err(
            &req.id,
            "conflict",
            "subject already assigned to this combination",
            None,
        );
    }

    let assignment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO course_assignments(id, combination_id, subject_id, teacher_id)
         VALUES(?, ?, ?, ?)",
        (&assignment_id, &combination_id, &subject_id, &teacher_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "course_assignments" })),
        );
    }

    ok(&req.id, json!({ "assignmentId": assignment_id }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let combination_id = match required_str(req, "combinationId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT ca.id, s.id, s.name, s.code, t.id, t.first_name, t.last_name
         FROM course_assignments ca
         JOIN subjects s ON s.id = ca.subject_id
         JOIN teachers t ON t.id = ca.teacher_id
         WHERE ca.combination_id = ?
         ORDER BY s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&combination_id], |row| {
            let teacher_first: String = row.get(5)?;
            let teacher_last: String = row.get(6)?;
            Ok(json!({
                "assignmentId": row.get::<_, String>(0)?,
                "subjectId": row.get::<_, String>(1)?,
                "subject": row.get::<_, String>(2)?,
                "subjectCode": row.get::<_, Option<String>>(3)?,
                "teacherId": row.get::<_, String>(4)?,
                "teacher": format!("{} {}", teacher_first, teacher_last),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_unassign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let changed = match conn.execute(
        "DELETE FROM course_assignments WHERE id = ?",
        [&assignment_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "course assignment not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.update" => Some(handle_subjects_update(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        "courses.assign" => Some(handle_courses_assign(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.unassign" => Some(handle_courses_unassign(state, req)),
        _ => None,
    }
}
