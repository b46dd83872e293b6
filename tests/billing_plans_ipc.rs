
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn billing_plans_lifecycle_and_active_filter() {
    let workspace = temp_dir("campus-billing");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let basic = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "billing.plans.create",
        json!({
            "name": "Basic",
            "amount": 25.0,
            "interval": "monthly",
            "features": ["records", "timetable"]
        }),
    );
    let basic_id = str_field(&basic, "planId");
    let premium = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "billing.plans.create",
        json!({
            "name": "Premium",
            "amount": 90.0,
            "interval": "yearly",
            "features": ["records", "timetable", "library", "fees"]
        }),
    );
    let premium_id = str_field(&premium, "planId");

    let _ = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "billing.plans.create",
        json!({ "name": "Basic", "amount": 30.0, "interval": "monthly" }),
        "conflict",
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "billing.plans.create",
        json!({ "name": "Odd", "amount": 10.0, "interval": "daily" }),
        "bad_params",
    );

    let retired = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "billing.plans.setActive",
        json!({ "planId": basic_id, "active": false }),
    );
    assert_eq!(retired.get("active").and_then(|v| v.as_bool()), Some(false));

    let visible = request_ok(&mut stdin, &mut reader, "7", "billing.plans.list", json!({}));
    let plans = visible.get("plans").and_then(|v| v.as_array()).unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].get("name").and_then(|v| v.as_str()), Some("Premium"));
    assert_eq!(
        plans[0]
            .get("features")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(4)
    );

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "billing.plans.list",
        json!({ "includeInactive": true }),
    );
    assert_eq!(
        all.get("plans").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "billing.plans.update",
        json!({
            "name": "Premium Plus",
            "planId": premium_id,
            "amount": 110.0,
            "interval": "yearly",
            "features": ["records", "timetable", "library", "fees", "backup"]
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "billing.plans.delete",
        json!({ "planId": basic_id }),
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "billing.plans.delete",
        json!({ "planId": basic_id }),
        "not_found",
    );
}
