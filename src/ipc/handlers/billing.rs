use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, json_array_string, parse_bool, parse_json_array_string, parse_string_array,
    required_f64, required_str,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const INTERVALS: [&str; 3] = ["monthly", "term", "yearly"];

fn validate_interval(raw: &str) -> bool {
    INTERVALS.contains(&raw)
}

fn handle_plans_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let include_inactive = match parse_bool(req.params.get("includeInactive"), false) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("includeInactive {}", m), None),
    };

    let sql = if include_inactive {
        "SELECT id, name, amount, interval, features_json, active
         FROM billing_plans
         ORDER BY amount"
    } else {
        "SELECT id, name, amount, interval, features_json, active
         FROM billing_plans
         WHERE active = 1
         ORDER BY amount"
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let features_raw: String = row.get(4)?;
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "amount": row.get::<_, f64>(2)?,
                "interval": row.get::<_, String>(3)?,
                "features": parse_json_array_string(&features_raw),
                "active": row.get::<_, i64>(5)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(plans) => ok(&req.id, json!({ "plans": plans })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_plans_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
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
    if amount < 0.0 {
        return err(&req.id, "bad_params", "amount must not be negative", None);
    }
    let interval = match required_str(req, "interval") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(e) => return e,
    };
    if !validate_interval(&interval) {
        return err(
            &req.id,
            "bad_params",
            "interval must be one of: monthly, term, yearly",
            None,
        );
    }
    let features = match parse_string_array(req.params.get("features")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("features {}", m), None),
    };

    let dup: Option<String> = match conn
        .query_row("SELECT id FROM billing_plans WHERE name = ?", [&name], |r| {
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
            format!("billing plan {} already exists", name),
            None,
        );
    }

    let plan_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO billing_plans(id, name, amount, interval, features_json, active)
         VALUES(?, ?, ?, ?, ?, 1)",
        (
            &plan_id,
            &name,
            amount,
            &interval,
            json_array_string(&features),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "billing_plans" })),
        );
    }

    ok(&req.id, json!({ "planId": plan_id }))
}

fn handle_plans_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let plan_id = match required_str(req, "planId") {
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
    if amount < 0.0 {
        return err(&req.id, "bad_params", "amount must not be negative", None);
    }
    let interval = match required_str(req, "interval") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(e) => return e,
    };
    if !validate_interval(&interval) {
        return err(
            &req.id,
            "bad_params",
            "interval must be one of: monthly, term, yearly",
            None,
        );
    }
    let features = match parse_string_array(req.params.get("features")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("features {}", m), None),
    };

    let changed = match conn.execute(
        "UPDATE billing_plans SET name = ?, amount = ?, interval = ?, features_json = ?
         WHERE id = ?",
        (
            &name,
            amount,
            &interval,
            json_array_string(&features),
            &plan_id,
        ),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "billing plan not found", None);
    }

    ok(&req.id, json!({ "planId": plan_id }))
}

fn handle_plans_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let plan_id = match required_str(req, "planId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let active = match req.params.get("active").and_then(|v| v.as_bool()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing active", None),
    };

    let changed = match conn.execute(
        "UPDATE billing_plans SET active = ? WHERE id = ?",
        (if active { 1 } else { 0 }, &plan_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "billing plan not found", None);
    }

    ok(&req.id, json!({ "planId": plan_id, "active": active }))
}

fn handle_plans_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let plan_id = match required_str(req, "planId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let changed = match conn.execute("DELETE FROM billing_plans WHERE id = ?", [&plan_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "billing plan not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "billing.plans.list" => Some(handle_plans_list(state, req)),
        "billing.plans.create" => Some(handle_plans_create(state, req)),
        "billing.plans.update" => Some(handle_plans_update(state, req)),
        "billing.plans.setActive" => Some(handle_plans_set_active(state, req)),
        "billing.plans.delete" => Some(handle_plans_delete(state, req)),
        _ => None,
    }
}
