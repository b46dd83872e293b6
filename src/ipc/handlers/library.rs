use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, parse_opt_iso_date, parse_opt_string, required_str, row_exists,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const STATUS_RESERVED: &str = "reserved";
const STATUS_CANCELLED: &str = "cancelled";
const STATUS_FULFILLED: &str = "fulfilled";

fn handle_books_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT
           b.id,
           b.title,
           b.author,
           b.isbn,
           b.copies,
           (SELECT COUNT(*) FROM library_reservations r
            WHERE r.book_id = b.id AND r.status = 'reserved') AS reserved
         FROM library_books b
         ORDER BY b.title",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let copies: i64 = row.get(4)?;
            let reserved: i64 = row.get(5)?;
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "title": row.get::<_, String>(1)?,
                "author": row.get::<_, Option<String>>(2)?,
                "isbn": row.get::<_, Option<String>>(3)?,
                "copies": copies,
                "reserved": reserved,
                "available": (copies - reserved).max(0),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(books) => ok(&req.id, json!({ "books": books })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_books_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let author = match parse_opt_string(req.params.get("author")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("author {}", m), None),
    };
    let isbn = match parse_opt_string(req.params.get("isbn")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("isbn {}", m), None),
    };
    let copies = match req.params.get("copies") {
        None => 1,
        Some(v) => match v.as_i64().filter(|n| *n >= 1) {
            Some(n) => n,
            None => return err(&req.id, "bad_params", "copies must be a positive integer", None),
        },
    };

    let book_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO library_books(id, title, author, isbn, copies) VALUES(?, ?, ?, ?, ?)",
        (
            &book_id,
            &title,
            author.as_deref(),
            isbn.as_deref(),
            copies,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "library_books" })),
        );
    }

    ok(&req.id, json!({ "bookId": book_id }))
}

fn handle_books_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let book_id = match required_str(req, "bookId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let author = match parse_opt_string(req.params.get("author")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("author {}", m), None),
    };
    let isbn = match parse_opt_string(req.params.get("isbn")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("isbn {}", m), None),
    };
    let copies = match req.params.get("copies").and_then(|v| v.as_i64()) {
        Some(n) if n >= 1 => n,
        _ => return err(&req.id, "bad_params", "copies must be a positive integer", None),
    };

    // Shrinking the stock below the live reservation count would
    // oversubscribe the title.
    let reserved: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM library_reservations WHERE book_id = ? AND status = 'reserved'",
        [&book_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if copies < reserved {
        return err(
            &req.id,
            "conflict",
            "copies cannot drop below active reservations",
            Some(json!({ "reserved": reserved })),
        );
    }

    let changed = match conn.execute(
        "UPDATE library_books SET title = ?, author = ?, isbn = ?, copies = ? WHERE id = ?",
        (
            &title,
            author.as_deref(),
            isbn.as_deref(),
            copies,
            &book_id,
        ),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "book not found", None);
    }

    ok(&req.id, json!({ "bookId": book_id }))
}

fn handle_books_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let book_id = match required_str(req, "bookId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match row_exists(conn, "library_books", &book_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "book not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let active: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM library_reservations WHERE book_id = ? AND status = 'reserved'",
        [&book_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if active > 0 {
        return err(
            &req.id,
            "conflict",
            "book still has active reservations",
            Some(json!({ "reserved": active })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM library_reservations WHERE book_id = ?",
        [&book_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "library_reservations" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM library_books WHERE id = ?", [&book_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "library_books" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_reservations_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let book_id = match required_str(req, "bookId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let due_on = match parse_opt_iso_date(req.params.get("dueOn")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    match row_exists(conn, "students", &student_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let copies: Option<i64> = match conn
        .query_row(
            "SELECT copies FROM library_books WHERE id = ?",
            [&book_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(copies) = copies else {
        return err(&req.id, "not_found", "book not found", None);
    };

    let reserved: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM library_reservations WHERE book_id = ? AND status = 'reserved'",
        [&book_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if reserved >= copies {
        return err(
            &req.id,
            "conflict",
            "no copies available for reservation",
            Some(json!({ "copies": copies, "reserved": reserved })),
        );
    }

    let duplicate: Option<String> = match conn
        .query_row(
            "SELECT id FROM library_reservations
             WHERE book_id = ? AND student_id = ? AND status = 'reserved'",
            [&book_id, &student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if duplicate.is_some() {
        return err(
            &req.id,
            "conflict",
            "student already holds a reservation for this book",
            None,
        );
    }

    let reservation_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO library_reservations(id, book_id, student_id, reserved_on, due_on, status)
         VALUES(?, ?, ?, date('now'), ?, ?)",
        (
            &reservation_id,
            &book_id,
            &student_id,
            due_on.as_deref(),
            STATUS_RESERVED,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "library_reservations" })),
        );
    }

    ok(&req.id, json!({ "reservationId": reservation_id }))
}

fn handle_reservations_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let book_id = match parse_opt_string(req.params.get("bookId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("bookId {}", m), None),
    };

    let sql = if book_id.is_some() {
        "SELECT r.id, r.book_id, b.title, r.student_id, s.last_name, s.first_name,
                r.reserved_on, r.due_on, r.status
         FROM library_reservations r
         JOIN library_books b ON b.id = r.book_id
         JOIN students s ON s.id = r.student_id
         WHERE r.book_id = ?
         ORDER BY r.reserved_on"
    } else {
        "SELECT r.id, r.book_id, b.title, r.student_id, s.last_name, s.first_name,
                r.reserved_on, r.due_on, r.status
         FROM library_reservations r
         JOIN library_books b ON b.id = r.book_id
         JOIN students s ON s.id = r.student_id
         ORDER BY r.reserved_on"
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let map_row = |row: &rusqlite::Row| -> rusqlite::Result<serde_json::Value> {
        let last_name: String = row.get(4)?;
        let first_name: String = row.get(5)?;
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "bookId": row.get::<_, String>(1)?,
            "title": row.get::<_, String>(2)?,
            "studentId": row.get::<_, String>(3)?,
            "student": format!("{}, {}", last_name, first_name),
            "reservedOn": row.get::<_, String>(6)?,
            "dueOn": row.get::<_, Option<String>>(7)?,
            "status": row.get::<_, String>(8)?,
        }))
    };
    let rows = if let Some(bid) = book_id {
        stmt.query_map([&bid], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        stmt.query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };

    match rows {
        Ok(reservations) => ok(&req.id, json!({ "reservations": reservations })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn set_reservation_status(
    state: &mut AppState,
    req: &Request,
    new_status: &str,
) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let reservation_id = match required_str(req, "reservationId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let status: Option<String> = match conn
        .query_row(
            "SELECT status FROM library_reservations WHERE id = ?",
            [&reservation_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(status) = status else {
        return err(&req.id, "not_found", "reservation not found", None);
    };
    // Only a live reservation can move to a terminal status.
    if status != STATUS_RESERVED {
        return err(
            &req.id,
            "conflict",
            format!("reservation is already {}", status),
            None,
        );
    }

    if let Err(e) = conn.execute(
        "UPDATE library_reservations SET status = ? WHERE id = ?",
        (new_status, &reservation_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "reservationId": reservation_id, "status": new_status }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "library.books.list" => Some(handle_books_list(state, req)),
        "library.books.create" => Some(handle_books_create(state, req)),
        "library.books.update" => Some(handle_books_update(state, req)),
        "library.books.delete" => Some(handle_books_delete(state, req)),
        "library.reservations.create" => Some(handle_reservations_create(state, req)),
        "library.reservations.list" => Some(handle_reservations_list(state, req)),
        "library.reservations.cancel" => Some(set_reservation_status(state, req, STATUS_CANCELLED)),
        "library.reservations.fulfill" => {
            Some(set_reservation_status(state, req, STATUS_FULFILLED))
        }
        _ => None,
    }
}
