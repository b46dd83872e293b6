
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn timetable_add_update_delete_over_ipc() {
    let workspace = temp_dir("campus-timetable-ipc");
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
        json!({ "name": "Form 3" }),
    );
    let class_id = str_field(&class, "classId");
    let combination = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "combinations.create",
        json!({ "classId": class_id, "name": "PCM" }),
    );
    let combination_id = str_field(&combination, "combinationId");
    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "teachers.create",
        json!({ "lastName": "Mwangi", "firstName": "Grace" }),
    );
    let teacher_id = str_field(&teacher, "teacherId");

    // First lesson creates the Monday entry and assigns a fresh document.
    let added = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "timetable.addLesson",
        json!({
            "combinationId": combination_id,
            "day": "Monday",
            "lesson": {
                "subject": "Math",
                "startTime": "08:00",
                "endTime": "09:00",
                "teacherId": teacher_id
            }
        }),
    );
    assert_eq!(added.get("assigned").and_then(|v| v.as_bool()), Some(true));
    let first_slot_id = added
        .get("timetable")
        .and_then(|t| t.get(0))
        .and_then(|d| d.get("schedule"))
        .and_then(|s| s.get(0))
        .and_then(|s| s.get("id"))
        .and_then(|v| v.as_str())
        .expect("slot id")
        .to_string();

    // Second lesson lands on the existing Monday entry via replace.
    let added2 = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "timetable.addLesson",
        json!({
            "combinationId": combination_id,
            "day": "Monday",
            "lesson": {
                "subject": "Physics",
                "startTime": "09:00",
                "endTime": "10:00",
                "teacherId": teacher_id
            }
        }),
    );
    assert_eq!(added2.get("assigned").and_then(|v| v.as_bool()), Some(false));
    let timetable = added2.get("timetable").expect("timetable");
    assert_eq!(timetable.as_array().map(|a| a.len()), Some(1));
    let monday = &timetable[0];
    assert_eq!(monday.get("day").and_then(|v| v.as_str()), Some("Monday"));
    let schedule = monday.get("schedule").and_then(|v| v.as_array()).unwrap();
    assert_eq!(schedule.len(), 2);
    assert_eq!(
        schedule[0].get("subject").and_then(|v| v.as_str()),
        Some("Math")
    );
    assert_eq!(
        schedule[1].get("subject").and_then(|v| v.as_str()),
        Some("Physics")
    );

    // Editing a slot keeps its id and leaves the sibling untouched.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "timetable.updateSlot",
        json!({
            "combinationId": combination_id,
            "day": "Monday",
            "slotId": first_slot_id,
            "lesson": {
                "subject": "Further Math",
                "startTime": "08:00",
                "endTime": "09:00",
                "teacherId": teacher_id
            }
        }),
    );
    let schedule = updated
        .get("timetable")
        .and_then(|t| t.get(0))
        .and_then(|d| d.get("schedule"))
        .and_then(|v| v.as_array())
        .unwrap()
        .clone();
    assert_eq!(
        schedule[0].get("id").and_then(|v| v.as_str()),
        Some(first_slot_id.as_str())
    );
    assert_eq!(
        schedule[0].get("subject").and_then(|v| v.as_str()),
        Some("Further Math")
    );
    assert_eq!(
        schedule[1].get("subject").and_then(|v| v.as_str()),
        Some("Physics")
    );
    let second_slot_id = schedule[1]
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let view = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "timetable.viewModel",
        json!({ "combinationId": combination_id }),
    );
    let days = view.get("days").and_then(|v| v.as_array()).unwrap();
    assert_eq!(days.len(), 1);
    assert_eq!(
        days[0].get("lessonCount").and_then(|v| v.as_i64()),
        Some(2)
    );

    // Deleting one of two slots keeps the day entry.
    let after_delete = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "timetable.deleteSlot",
        json!({
            "combinationId": combination_id,
            "day": "Monday",
            "slotId": first_slot_id
        }),
    );
    let timetable = after_delete.get("timetable").and_then(|v| v.as_array()).unwrap();
    assert_eq!(timetable.len(), 1);
    assert_eq!(
        timetable[0]
            .get("schedule")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    // Deleting the last slot prunes the whole day entry.
    let after_prune = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "timetable.deleteSlot",
        json!({
            "combinationId": combination_id,
            "day": "Monday",
            "slotId": second_slot_id
        }),
    );
    assert_eq!(
        after_prune
            .get("timetable")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    // The pruned document is what persisted.
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "timetable.get",
        json!({ "combinationId": combination_id }),
    );
    assert_eq!(
        fetched
            .get("timetable")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    let _ = request_err(
        &mut stdin,
        &mut reader,
        "12",
        "timetable.deleteSlot",
        json!({
            "combinationId": combination_id,
            "day": "Monday",
            "slotId": first_slot_id
        }),
        "not_found",
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "13",
        "timetable.addLesson",
        json!({
            "combinationId": combination_id,
            "day": "Funday",
            "lesson": {
                "subject": "Math",
                "startTime": "08:00",
                "endTime": "09:00",
                "teacherId": teacher_id
            }
        }),
        "bad_params",
    );
}

#[test]
fn timetable_replace_validates_and_delete_day_clears_entry() {
    let workspace = temp_dir("campus-timetable-replace");
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
        json!({ "name": "Form 4" }),
    );
    let class_id = str_field(&class, "classId");
    let combination = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "combinations.create",
        json!({ "classId": class_id, "name": "Arts" }),
    );
    let combination_id = str_field(&combination, "combinationId");
    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "teachers.create",
        json!({ "lastName": "Dube", "firstName": "Sam" }),
    );
    let teacher_id = str_field(&teacher, "teacherId");

    let lesson = |subject: &str| {
        json!({
            "subject": subject,
            "startTime": "10:00",
            "endTime": "11:00",
            "teacher": {
                "id": teacher_id,
                "firstName": "Sam",
                "lastName": "Dube"
            }
        })
    };

    let put = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "timetable.assign",
        json!({
            "combinationId": combination_id,
            "timetable": [
                { "day": "Tuesday", "schedule": [lesson("History")] },
                { "day": "Thursday", "schedule": [lesson("Literature")] },
                { "day": "Friday", "schedule": [] }
            ]
        }),
    );
    // Empty day entries are pruned on write.
    assert_eq!(
        put.get("timetable")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(2)
    );

    let _ = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "timetable.replace",
        json!({
            "combinationId": combination_id,
            "timetable": [
                { "day": "Tuesday", "schedule": [lesson("History")] },
                { "day": "Tuesday", "schedule": [lesson("Civics")] }
            ]
        }),
        "bad_params",
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "timetable.replace",
        json!({
            "combinationId": combination_id,
            "timetable": [
                { "day": "Someday", "schedule": [lesson("History")] }
            ]
        }),
        "bad_params",
    );

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "timetable.deleteDay",
        json!({ "combinationId": combination_id, "day": "Tuesday" }),
    );
    let timetable = after.get("timetable").and_then(|v| v.as_array()).unwrap();
    assert_eq!(timetable.len(), 1);
    assert_eq!(
        timetable[0].get("day").and_then(|v| v.as_str()),
        Some("Thursday")
    );

    let _ = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "timetable.deleteDay",
        json!({ "combinationId": combination_id, "day": "Tuesday" }),
        "not_found",
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "timetable.get",
        json!({ "combinationId": "missing" }),
        "not_found",
    );
}
