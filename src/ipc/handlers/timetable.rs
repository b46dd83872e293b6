use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::timetable::{
    is_weekday, load_timetable, view_model, DayEntry, LessonSlot, ScheduleMutationClient,
    SqliteScheduleClient, TeacherRef, TimetableStore,
};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn handle_timetable_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let combination_id = match required_str(req, "combinationId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match load_timetable(conn, &combination_id) {
        Ok(Some(days)) => ok(&req.id, json!({ "timetable": days })),
        Ok(None) => err(&req.id, "not_found", "combination not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_timetable_view_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let combination_id = match required_str(req, "combinationId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match load_timetable(conn, &combination_id) {
        Ok(Some(days)) => ok(&req.id, view_model(&days)),
        Ok(None) => err(&req.id, "not_found", "combination not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Parses the `lesson` param: subject, display time strings, and a teacher
/// id resolved against the teachers table.
fn parse_lesson(
    conn: &Connection,
    req: &Request,
) -> Result<LessonSlot, serde_json::Value> {
    let Some(lesson) = req.params.get("lesson").and_then(|v| v.as_object()) else {
        return Err(err(&req.id, "bad_params", "missing lesson", None));
    };

    let field = |key: &str| -> Result<String, serde_json::Value> {
        lesson
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| err(&req.id, "bad_params", format!("missing lesson.{}", key), None))
    };

    let subject = field("subject")?;
    let start_time = field("startTime")?;
    let end_time = field("endTime")?;
    let teacher_id = field("teacherId")?;

    let teacher: Option<TeacherRef> = conn
        .query_row(
            "SELECT id, first_name, last_name FROM teachers WHERE id = ?",
            [&teacher_id],
            |r| {
                Ok(TeacherRef {
                    id: r.get(0)?,
                    first_name: r.get(1)?,
                    last_name: r.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let Some(teacher) = teacher else {
        return Err(err(&req.id, "not_found", "teacher not found", None));
    };

    Ok(LessonSlot::new(subject, start_time, end_time, teacher))
}

fn required_weekday(req: &Request) -> Result<String, serde_json::Value> {
    let day = required_str(req, "day")?;
    if !is_weekday(&day) {
        return Err(err(
            &req.id,
            "bad_params",
            format!("day must be one of Monday..Friday, got {}", day),
            None,
        ));
    }
    Ok(day)
}

fn handle_timetable_add_lesson(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let combination_id = match required_str(req, "combinationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let day = match required_weekday(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson = match parse_lesson(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_id = lesson.id.clone();

    let days = match load_timetable(conn, &combination_id) {
        Ok(Some(d)) => d,
        Ok(None) => return err(&req.id, "not_found", "combination not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let assigned = days.is_empty();

    let mut client = SqliteScheduleClient::new(conn);
    let mut store = TimetableStore::new(combination_id.as_str(), &mut client);
    store.load(days);
    if let Err(e) = store.add_lesson(&day, lesson) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "lessonId": lesson_id,
            "assigned": assigned,
            "timetable": store.days(),
        }),
    )
}

/// Wholesale timetable write shared by assign and replace. The incoming
/// shape is normalized: weekday names enforced, one entry per day, empty
/// days pruned.
fn handle_timetable_put(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let combination_id = match required_str(req, "combinationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("timetable") else {
        return err(&req.id, "bad_params", "missing timetable", None);
    };
    let days: Vec<DayEntry> = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("invalid timetable: {}", e), None),
    };

    let mut seen: Vec<&str> = Vec::new();
    for entry in &days {
        if !is_weekday(&entry.day) {
            return err(
                &req.id,
                "bad_params",
                format!("day must be one of Monday..Friday, got {}", entry.day),
                None,
            );
        }
        if seen.contains(&entry.day.as_str()) {
            return err(
                &req.id,
                "bad_params",
                format!("duplicate day entry: {}", entry.day),
                None,
            );
        }
        seen.push(entry.day.as_str());
    }
    let days: Vec<DayEntry> = days
        .into_iter()
        .filter(|e| !e.schedule.is_empty())
        .collect();

    let existing = match load_timetable(conn, &combination_id) {
        Ok(Some(d)) => d,
        Ok(None) => return err(&req.id, "not_found", "combination not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut client = SqliteScheduleClient::new(conn);
    let outcome = if existing.is_empty() {
        client.assign(&combination_id, &days)
    } else {
        client.replace(&combination_id, &days)
    };
    if let Err(e) = outcome {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "timetable": days }))
}

fn handle_timetable_update_slot(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let combination_id = match required_str(req, "combinationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let day = match required_weekday(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let slot_id = match required_str(req, "slotId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson = match parse_lesson(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let days = match load_timetable(conn, &combination_id) {
        Ok(Some(d)) => d,
        Ok(None) => return err(&req.id, "not_found", "combination not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !slot_exists(&days, &day, &slot_id) {
        return err(&req.id, "not_found", "lesson slot not found", None);
    }

    let mut client = SqliteScheduleClient::new(conn);
    let mut store = TimetableStore::new(combination_id.as_str(), &mut client);
    store.load(days);
    if let Err(e) = store.update_lesson_by_id(&day, &slot_id, lesson) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "timetable": store.days() }))
}

fn handle_timetable_delete_slot(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let combination_id = match required_str(req, "combinationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let day = match required_weekday(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let slot_id = match required_str(req, "slotId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let days = match load_timetable(conn, &combination_id) {
        Ok(Some(d)) => d,
        Ok(None) => return err(&req.id, "not_found", "combination not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !slot_exists(&days, &day, &slot_id) {
        return err(&req.id, "not_found", "lesson slot not found", None);
    }

    let mut client = SqliteScheduleClient::new(conn);
    let mut store = TimetableStore::new(combination_id.as_str(), &mut client);
    store.load(days);
    if let Err(e) = store.delete_lesson_by_id(&day, &slot_id) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "timetable": store.days() }))
}

fn handle_timetable_delete_day(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let combination_id = match required_str(req, "combinationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let day = match required_weekday(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let days = match load_timetable(conn, &combination_id) {
        Ok(Some(d)) => d,
        Ok(None) => return err(&req.id, "not_found", "combination not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !days.iter().any(|e| e.day == day) {
        return err(&req.id, "not_found", "day entry not found", None);
    }

    let mut client = SqliteScheduleClient::new(conn);
    let mut store = TimetableStore::new(combination_id.as_str(), &mut client);
    store.load(days);
    if let Err(e) = store.delete_day_by_name(&day) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "timetable": store.days() }))
}

fn slot_exists(days: &[DayEntry], day: &str, slot_id: &str) -> bool {
    days.iter()
        .find(|e| e.day == day)
        .map(|e| e.schedule.iter().any(|s| s.id == slot_id))
        .unwrap_or(false)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "timetable.get" => Some(handle_timetable_get(state, req)),
        "timetable.viewModel" => Some(handle_timetable_view_model(state, req)),
        "timetable.addLesson" => Some(handle_timetable_add_lesson(state, req)),
        "timetable.assign" | "timetable.replace" => Some(handle_timetable_put(state, req)),
        "timetable.updateSlot" => Some(handle_timetable_update_slot(state, req)),
        "timetable.deleteSlot" => Some(handle_timetable_delete_slot(state, req)),
        "timetable.deleteDay" => Some(handle_timetable_delete_day(state, req)),
        _ => None,
    }
}
