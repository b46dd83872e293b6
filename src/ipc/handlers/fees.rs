use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, parse_opt_iso_date, parse_opt_string, required_f64, required_str, row_exists,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const FREQUENCIES: [&str; 4] = ["once", "term", "monthly", "yearly"];

fn validate_frequency(raw: &str) -> bool {
    FREQUENCIES.contains(&raw)
}

fn handle_categories_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT
           fc.id,
           fc.name,
           fc.description,
           (SELECT COUNT(*) FROM fee_structures fs WHERE fs.category_id = fc.id) AS structure_count
         FROM fee_categories fc
         ORDER BY fc.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "description": row.get::<_, Option<String>>(2)?,
                "structureCount": row.get::<_, i64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(categories) => ok(&req.id, json!({ "categories": categories })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_categories_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let description = match parse_opt_string(req.params.get("description")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("description {}", m), None),
    };

    let dup: Option<String> = match conn
        .query_row("SELECT id FROM fee_categories WHERE name = ?", [&name], |r| {
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
            format!("fee category {} already exists", name),
            None,
        );
    }

    let category_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO fee_categories(id, name, description) VALUES(?, ?, ?)",
        (&category_id, &name, description.as_deref()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "fee_categories" })),
        );
    }

    ok(&req.id, json!({ "categoryId": category_id, "name": name }))
}

fn handle_categories_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let description = match parse_opt_string(req.params.get("description")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("description {}", m), None),
    };

    let changed = match conn.execute(
        "UPDATE fee_categories SET name = ?, description = ? WHERE id = ?",
        (&name, description.as_deref(), &category_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "fee category not found", None);
    }

    ok(&req.id, json!({ "categoryId": category_id }))
}

fn handle_categories_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match row_exists(conn, "fee_categories", &category_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "fee category not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let structures: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM fee_structures WHERE category_id = ?",
        [&category_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if structures > 0 {
        return err(
            &req.id,
            "conflict",
            "fee category still has structures",
            Some(json!({ "structures": structures })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM fee_categories WHERE id = ?", [&category_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "fee_categories" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_structures_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let category_id = match parse_opt_string(req.params.get("categoryId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("categoryId {}", m), None),
    };

    let sql = if category_id.is_some() {
        "SELECT fs.id, fs.category_id, fc.name, fs.name, fs.amount, fs.frequency, fs.academic_year
         FROM fee_structures fs
         JOIN fee_categories fc ON fc.id = fs.category_id
         WHERE fs.category_id = ?
         ORDER BY fs.academic_year DESC, fs.name"
    } else {
        "SELECT fs.id, fs.category_id, fc.name, fs.name, fs.amount, fs.frequency, fs.academic_year
         FROM fee_structures fs
         JOIN fee_categories fc ON fc.id = fs.category_id
         ORDER BY fs.academic_year DESC, fs.name"
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let map_row = |row: &rusqlite::Row| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "categoryId": row.get::<_, String>(1)?,
            "category": row.get::<_, String>(2)?,
            "name": row.get::<_, String>(3)?,
            "amount": row.get::<_, f64>(4)?,
            "frequency": row.get::<_, String>(5)?,
            "academicYear": row.get::<_, String>(6)?,
        }))
    };
    let rows = if let Some(cid) = category_id {
        stmt.query_map([&cid], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        stmt.query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };

    match rows {
        Ok(structures) => ok(&req.id, json!({ "structures": structures })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_structures_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let amount = match required_f64(req, "amount") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if amount <= 0.0 {
        return err(&req.id, "bad_params", "amount must be positive", None);
    }
    let frequency = match required_str(req, "frequency") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(e) => return e,
    };
    if !validate_frequency(&frequency) {
        return err(
            &req.id,
            "bad_params",
            "frequency must be one of: once, term, monthly, yearly",
            None,
        );
    }
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match row_exists(conn, "fee_categories", &category_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "fee category not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let structure_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO fee_structures(id, category_id, name, amount, frequency, academic_year)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &structure_id,
            &category_id,
            &name,
            amount,
            &frequency,
            &academic_year,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "fee_structures" })),
        );
    }

    ok(&req.id, json!({ "structureId": structure_id }))
}

fn handle_structures_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let structure_id = match required_str(req, "structureId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let amount = match required_f64(req, "amount") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if amount <= 0.0 {
        return err(&req.id, "bad_params", "amount must be positive", None);
    }
    let frequency = match required_str(req, "frequency") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(e) => return e,
    };
    if !validate_frequency(&frequency) {
        return err(
            &req.id,
            "bad_params",
            "frequency must be one of: once, term, monthly, yearly",
            None,
        );
    }
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let changed = match conn.execute(
        "UPDATE fee_structures SET name = ?, amount = ?, frequency = ?, academic_year = ?
         WHERE id = ?",
        (&name, amount, &frequency, &academic_year, &structure_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "fee structure not found", None);
    }

    ok(&req.id, json!({ "structureId": structure_id }))
}

fn handle_structures_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let structure_id = match required_str(req, "structureId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match row_exists(conn, "fee_structures", &structure_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "fee structure not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let assignments: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM fee_assignments WHERE structure_id = ?",
        [&structure_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if assignments > 0 {
        return err(
            &req.id,
            "conflict",
            "fee structure still has assignments",
            Some(json!({ "assignments": assignments })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM fee_structures WHERE id = ?", [&structure_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "fee_structures" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_assignments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let structure_id = match required_str(req, "structureId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match parse_opt_string(req.params.get("classId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("classId {}", m), None),
    };
    let student_id = match parse_opt_string(req.params.get("studentId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("studentId {}", m), None),
    };
    let due_date = match parse_opt_iso_date(req.params.get("dueDate")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    // An assignment targets a whole class or one student, never both.
    match (&class_id, &student_id) {
        (Some(_), Some(_)) | (None, None) => {
            return err(
                &req.id,
                "bad_params",
                "exactly one of classId or studentId is required",
                None,
            )
        }
        _ => {}
    }

    match row_exists(conn, "fee_structures", &structure_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "fee structure not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    if let Some(cid) = class_id.as_deref() {
        match row_exists(conn, "classes", cid) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "class not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    if let Some(sid) = student_id.as_deref() {
        match row_exists(conn, "students", sid) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "student not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let assignment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO fee_assignments(id, structure_id, class_id, student_id, due_date)
         VALUES(?, ?, ?, ?, ?)",
        (
            &assignment_id,
            &structure_id,
            class_id.as_deref(),
            student_id.as_deref(),
            due_date.as_deref(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "fee_assignments" })),
        );
    }

    ok(&req.id, json!({ "assignmentId": assignment_id }))
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let structure_id = match parse_opt_string(req.params.get("structureId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("structureId {}", m), None),
    };

    let sql = if structure_id.is_some() {
        "SELECT fa.id, fa.structure_id, fs.name, fs.amount, fa.class_id, fa.student_id, fa.due_date
         FROM fee_assignments fa
         JOIN fee_structures fs ON fs.id = fa.structure_id
         WHERE fa.structure_id = ?
         ORDER BY fa.due_date"
    } else {
        "SELECT fa.id, fa.structure_id, fs.name, fs.amount, fa.class_id, fa.student_id, fa.due_date
         FROM fee_assignments fa
         JOIN fee_structures fs ON fs.id = fa.structure_id
         ORDER BY fa.due_date"
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let map_row = |row: &rusqlite::Row| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "structureId": row.get::<_, String>(1)?,
            "structure": row.get::<_, String>(2)?,
            "amount": row.get::<_, f64>(3)?,
            "classId": row.get::<_, Option<String>>(4)?,
            "studentId": row.get::<_, Option<String>>(5)?,
            "dueDate": row.get::<_, Option<String>>(6)?,
        }))
    };
    let rows = if let Some(sid) = structure_id {
        stmt.query_map([&sid], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        stmt.query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };

    match rows {
        Ok(assignments) => ok(&req.id, json!({ "assignments": assignments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_assignments_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match row_exists(conn, "fee_assignments", &assignment_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "fee assignment not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let payments: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM fee_payments WHERE assignment_id = ?",
        [&assignment_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if payments > 0 {
        return err(
            &req.id,
            "conflict",
            "fee assignment already has recorded payments",
            Some(json!({ "payments": payments })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM fee_assignments WHERE id = ?", [&assignment_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "fee_assignments" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_payments_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let amount = match required_f64(req, "amount") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if amount <= 0.0 {
        return err(&req.id, "bad_params", "amount must be positive", None);
    }
    let method = match required_str(req, "method") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let paid_on = match required_str(req, "paidOn") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let paid_on = match crate::ipc::helpers::parse_iso_date(&paid_on) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let reference = match parse_opt_string(req.params.get("reference")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("reference {}", m), None),
    };

    // Scope check: the payer must be covered by the assignment (its target
    // student, or a member of its target class).
    let scope: Option<(Option<String>, Option<String>, f64)> = match conn
        .query_row(
            "SELECT fa.class_id, fa.student_id, fs.amount
             FROM fee_assignments fa
             JOIN fee_structures fs ON fs.id = fa.structure_id
             WHERE fa.id = ?",
            [&assignment_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((assign_class, assign_student, billed_amount)) = scope else {
        return err(&req.id, "not_found", "fee assignment not found", None);
    };

    match (&assign_class, &assign_student) {
        (Some(class_id), _) => {
            let member: Option<i64> = match conn
                .query_row(
                    "SELECT 1 FROM students WHERE id = ? AND class_id = ?",
                    [&student_id, class_id],
                    |r| r.get(0),
                )
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            if member.is_none() {
                return err(
                    &req.id,
                    "bad_params",
                    "student is not in the assignment's class",
                    None,
                );
            }
        }
        (None, Some(sid)) => {
            if sid != &student_id {
                return err(
                    &req.id,
                    "bad_params",
                    "student does not match the assignment",
                    None,
                );
            }
        }
        (None, None) => {
            return err(&req.id, "db_query_failed", "assignment has no target", None)
        }
    }

    let already_paid: f64 = match conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM fee_payments
         WHERE assignment_id = ? AND student_id = ?",
        [&assignment_id, &student_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if already_paid + amount > billed_amount {
        return err(
            &req.id,
            "conflict",
            "payment exceeds the billed amount",
            Some(json!({
                "billed": billed_amount,
                "alreadyPaid": already_paid,
                "attempted": amount,
            })),
        );
    }

    let payment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO fee_payments(id, assignment_id, student_id, amount, method, paid_on, reference)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &payment_id,
            &assignment_id,
            &student_id,
            amount,
            &method,
            &paid_on,
            reference.as_deref(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "fee_payments" })),
        );
    }

    ok(
        &req.id,
        json!({
            "paymentId": payment_id,
            "outstanding": billed_amount - already_paid - amount,
        }),
    )
}

fn handle_payments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let assignment_id = match parse_opt_string(req.params.get("assignmentId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("assignmentId {}", m), None),
    };
    let student_id = match parse_opt_string(req.params.get("studentId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("studentId {}", m), None),
    };

    let (sql, key) = match (&assignment_id, &student_id) {
        (Some(_), _) => (
            "SELECT fp.id, fp.assignment_id, fp.student_id, s.last_name, s.first_name,
                    fp.amount, fp.method, fp.paid_on, fp.reference
             FROM fee_payments fp
             JOIN students s ON s.id = fp.student_id
             WHERE fp.assignment_id = ?
             ORDER BY fp.paid_on",
            assignment_id.clone().unwrap_or_default(),
        ),
        (None, Some(_)) => (
            "SELECT fp.id, fp.assignment_id, fp.student_id, s.last_name, s.first_name,
                    fp.amount, fp.method, fp.paid_on, fp.reference
             FROM fee_payments fp
             JOIN students s ON s.id = fp.student_id
             WHERE fp.student_id = ?
             ORDER BY fp.paid_on",
            student_id.clone().unwrap_or_default(),
        ),
        (None, None) => {
            return err(
                &req.id,
                "bad_params",
                "assignmentId or studentId is required",
                None,
            )
        }
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&key], |row| {
            let last_name: String = row.get(3)?;
            let first_name: String = row.get(4)?;
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "assignmentId": row.get::<_, String>(1)?,
                "studentId": row.get::<_, String>(2)?,
                "student": format!("{}, {}", last_name, first_name),
                "amount": row.get::<_, f64>(5)?,
                "method": row.get::<_, String>(6)?,
                "paidOn": row.get::<_, String>(7)?,
                "reference": row.get::<_, Option<String>>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(payments) => ok(&req.id, json!({ "payments": payments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Per-structure rollup: billed is the per-student amount times the number
/// of students the assignments cover, collected is the payment sum, and
/// outstanding is their difference.
fn handle_fees_report(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_filter = match parse_opt_string(req.params.get("classId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("classId {}", m), None),
    };

    let sql = "SELECT
                 fs.id,
                 fs.name,
                 fc.name,
                 fs.academic_year,
                 fs.amount,
                 (SELECT COALESCE(SUM(
                    CASE
                      WHEN fa.class_id IS NOT NULL THEN
                        (SELECT COUNT(*) FROM students s
                         WHERE s.class_id = fa.class_id
                           AND (?1 IS NULL OR s.class_id = ?1))
                      WHEN ?1 IS NULL THEN 1
                      ELSE (SELECT COUNT(*) FROM students s
                            WHERE s.id = fa.student_id AND s.class_id = ?1)
                    END), 0)
                  FROM fee_assignments fa
                  WHERE fa.structure_id = fs.id) AS billed_students,
                 (SELECT COALESCE(SUM(fp.amount), 0)
                  FROM fee_payments fp
                  JOIN fee_assignments fa ON fa.id = fp.assignment_id
                  JOIN students s ON s.id = fp.student_id
                  WHERE fa.structure_id = fs.id
                    AND (?1 IS NULL OR s.class_id = ?1)) AS collected
               FROM fee_structures fs
               JOIN fee_categories fc ON fc.id = fs.category_id
               ORDER BY fc.name, fs.name";

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_filter], |row| {
            let amount: f64 = row.get(4)?;
            let billed_students: i64 = row.get(5)?;
            let collected: f64 = row.get(6)?;
            let billed = amount * billed_students as f64;
            Ok(json!({
                "structureId": row.get::<_, String>(0)?,
                "structure": row.get::<_, String>(1)?,
                "category": row.get::<_, String>(2)?,
                "academicYear": row.get::<_, String>(3)?,
                "amount": amount,
                "billedStudents": billed_students,
                "billed": billed,
                "collected": collected,
                "outstanding": billed - collected,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    let lines = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let total_billed: f64 = lines
        .iter()
        .filter_map(|l| l.get("billed").and_then(|v| v.as_f64()))
        .sum();
    let total_collected: f64 = lines
        .iter()
        .filter_map(|l| l.get("collected").and_then(|v| v.as_f64()))
        .sum();

    ok(
        &req.id,
        json!({
            "lines": lines,
            "totals": {
                "billed": total_billed,
                "collected": total_collected,
                "outstanding": total_billed - total_collected,
            }
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.categories.list" => Some(handle_categories_list(state, req)),
        "fees.categories.create" => Some(handle_categories_create(state, req)),
        "fees.categories.update" => Some(handle_categories_update(state, req)),
        "fees.categories.delete" => Some(handle_categories_delete(state, req)),
        "fees.structures.list" => Some(handle_structures_list(state, req)),
        "fees.structures.create" => Some(handle_structures_create(state, req)),
        "fees.structures.update" => Some(handle_structures_update(state, req)),
        "fees.structures.delete" => Some(handle_structures_delete(state, req)),
        "fees.assignments.create" => Some(handle_assignments_create(state, req)),
        "fees.assignments.list" => Some(handle_assignments_list(state, req)),
        "fees.assignments.delete" => Some(handle_assignments_delete(state, req)),
        "fees.payments.record" => Some(handle_payments_record(state, req)),
        "fees.payments.list" => Some(handle_payments_list(state, req)),
        "fees.report" => Some(handle_fees_report(state, req)),
        _ => None,
    }
}
