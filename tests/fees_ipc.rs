
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn fee_payments_respect_billing_scope_and_limits() {
    let workspace = temp_dir("campus-fees-ipc");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Form 1" }),
    );
    let class_id = str_field(&class, "classId");
    let other_class = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "name": "Form 2" }),
    );
    let other_class_id = str_field(&other_class, "classId");

    let payer = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "classId": class_id, "lastName": "Abara", "firstName": "Chinedu" }),
    );
    let payer_id = str_field(&payer, "studentId");
    let outsider = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "classId": other_class_id, "lastName": "Banda", "firstName": "Thoko" }),
    );
    let outsider_id = str_field(&outsider, "studentId");

    let category = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "fees.categories.create",
        json!({ "name": "Tuition", "description": "Core fees" }),
    );
    let category_id = str_field(&category, "categoryId");
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "fees.categories.create",
        json!({ "name": "Tuition" }),
        "conflict",
    );

    let structure = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "fees.structures.create",
        json!({
            "categoryId": category_id,
            "name": "Term 1 Tuition",
            "amount": 300.0,
            "frequency": "term",
            "academicYear": "2026"
        }),
    );
    let structure_id = str_field(&structure, "structureId");
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "fees.structures.create",
        json!({
            "categoryId": category_id,
            "name": "Bad",
            "amount": 10.0,
            "frequency": "weekly",
            "academicYear": "2026"
        }),
        "bad_params",
    );
    // A category with live structures cannot be removed.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "fees.categories.delete",
        json!({ "categoryId": category_id }),
        "conflict",
    );

    // An assignment targets a class or a student, never both or neither.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "fees.assignments.create",
        json!({ "structureId": structure_id }),
        "bad_params",
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "12",
        "fees.assignments.create",
        json!({
            "structureId": structure_id,
            "classId": class_id,
            "studentId": payer_id
        }),
        "bad_params",
    );
    let assignment = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "fees.assignments.create",
        json!({
            "structureId": structure_id,
            "classId": class_id,
            "dueDate": "2026-09-30"
        }),
    );
    let assignment_id = str_field(&assignment, "assignmentId");

    // A student from another class is outside the assignment's scope.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "14",
        "fees.payments.record",
        json!({
            "assignmentId": assignment_id,
            "studentId": outsider_id,
            "amount": 100.0,
            "method": "cash",
            "paidOn": "2026-09-01"
        }),
        "bad_params",
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "fees.payments.record",
        json!({
            "assignmentId": assignment_id,
            "studentId": payer_id,
            "amount": 200.0,
            "method": "cash",
            "paidOn": "2026-09-01"
        }),
    );
    assert_eq!(first.get("outstanding").and_then(|v| v.as_f64()), Some(100.0));

    // Paying past the billed amount is refused, a partial top-up is not.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "16",
        "fees.payments.record",
        json!({
            "assignmentId": assignment_id,
            "studentId": payer_id,
            "amount": 150.0,
            "method": "transfer",
            "paidOn": "2026-09-15"
        }),
        "conflict",
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "fees.payments.record",
        json!({
            "assignmentId": assignment_id,
            "studentId": payer_id,
            "amount": 100.0,
            "method": "transfer",
            "paidOn": "2026-09-15",
            "reference": "TX-42"
        }),
    );
    assert_eq!(second.get("outstanding").and_then(|v| v.as_f64()), Some(0.0));

    let payments = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "fees.payments.list",
        json!({ "studentId": payer_id }),
    );
    assert_eq!(
        payments
            .get("payments")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(2)
    );

    // An assignment with recorded payments is locked in place.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "19",
        "fees.assignments.delete",
        json!({ "assignmentId": assignment_id }),
        "conflict",
    );

    let report = request_ok(&mut stdin, &mut reader, "20", "fees.report", json!({}));
    let lines = report.get("lines").and_then(|v| v.as_array()).unwrap();
    assert_eq!(lines.len(), 1);
    let line = &lines[0];
    assert_eq!(line.get("billedStudents").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(line.get("billed").and_then(|v| v.as_f64()), Some(300.0));
    assert_eq!(line.get("collected").and_then(|v| v.as_f64()), Some(300.0));
    assert_eq!(line.get("outstanding").and_then(|v| v.as_f64()), Some(0.0));
    let totals = report.get("totals").unwrap();
    assert_eq!(totals.get("billed").and_then(|v| v.as_f64()), Some(300.0));

    // Scoped to the other class, nothing was billed or collected.
    let scoped = request_ok(
        &mut stdin,
        &mut reader,
        "21",
        "fees.report",
        json!({ "classId": other_class_id }),
    );
    let totals = scoped.get("totals").unwrap();
    assert_eq!(totals.get("billed").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(totals.get("collected").and_then(|v| v.as_f64()), Some(0.0));
}
