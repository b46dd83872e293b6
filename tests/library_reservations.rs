
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn reservations_track_availability_and_status() {
    let workspace = temp_dir("campus-library");
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
        json!({ "name": "Readers" }),
    );
    let class_id = str_field(&class, "classId");
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "classId": class_id, "lastName": "Keita", "firstName": "Awa" }),
    );
    let first_id = str_field(&first, "studentId");
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "classId": class_id, "lastName": "Sow", "firstName": "Ibrahim" }),
    );
    let second_id = str_field(&second, "studentId");

    let book = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "library.books.create",
        json!({ "title": "Things Fall Apart", "author": "Chinua Achebe", "copies": 1 }),
    );
    let book_id = str_field(&book, "bookId");

    let reservation = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "library.reservations.create",
        json!({ "bookId": book_id, "studentId": first_id, "dueOn": "2026-10-01" }),
    );
    let reservation_id = str_field(&reservation, "reservationId");

    // One copy, one live reservation: nothing left to hand out.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "library.reservations.create",
        json!({ "bookId": book_id, "studentId": second_id }),
        "conflict",
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "library.reservations.create",
        json!({ "bookId": book_id, "studentId": first_id }),
        "conflict",
    );

    let books = request_ok(&mut stdin, &mut reader, "9", "library.books.list", json!({}));
    let entry = &books.get("books").and_then(|v| v.as_array()).unwrap()[0];
    assert_eq!(entry.get("copies").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(entry.get("reserved").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(entry.get("available").and_then(|v| v.as_i64()), Some(0));

    // Stock cannot shrink below live reservations, and the book cannot go.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "library.books.update",
        json!({ "bookId": book_id, "title": "Things Fall Apart", "copies": 0 }),
        "bad_params",
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "library.books.delete",
        json!({ "bookId": book_id }),
        "conflict",
    );

    let cancelled = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "library.reservations.cancel",
        json!({ "reservationId": reservation_id }),
    );
    assert_eq!(
        cancelled.get("status").and_then(|v| v.as_str()),
        Some("cancelled")
    );
    // Terminal states stay terminal.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "13",
        "library.reservations.fulfill",
        json!({ "reservationId": reservation_id }),
        "conflict",
    );

    // The freed copy can be reserved again and fulfilled.
    let retry = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "library.reservations.create",
        json!({ "bookId": book_id, "studentId": second_id }),
    );
    let retry_id = str_field(&retry, "reservationId");
    let fulfilled = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "library.reservations.fulfill",
        json!({ "reservationId": retry_id }),
    );
    assert_eq!(
        fulfilled.get("status").and_then(|v| v.as_str()),
        Some("fulfilled")
    );

    // With no live reservations the book can be deleted.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "library.books.delete",
        json!({ "bookId": book_id }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "library.reservations.list",
        json!({}),
    );
    assert_eq!(
        listed
            .get("reservations")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
}
