
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn teacher_cannot_be_deleted_while_referenced() {
    let workspace = temp_dir("campus-teacher-guards");
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
        json!({ "name": "Form 6" }),
    );
    let class_id = str_field(&class, "classId");
    let combination = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "combinations.create",
        json!({ "classId": class_id, "name": "Commerce" }),
    );
    let combination_id = str_field(&combination, "combinationId");
    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "teachers.create",
        json!({ "lastName": "Nyathi", "firstName": "Busi", "email": "busi@school.test" }),
    );
    let teacher_id = str_field(&teacher, "teacherId");
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "subjects.create",
        json!({ "name": "Accounting" }),
    );
    let subject_id = str_field(&subject, "subjectId");

    let assigned = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "courses.assign",
        json!({
            "combinationId": combination_id,
            "subjectId": subject_id,
            "teacherId": teacher_id
        }),
    );
    let assignment_id = str_field(&assigned, "assignmentId");

    // Held by a course assignment.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "teachers.delete",
        json!({ "teacherId": teacher_id }),
        "conflict",
    );
    // The subject is held by the same assignment.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "subjects.delete",
        json!({ "subjectId": subject_id }),
        "conflict",
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "courses.unassign",
        json!({ "assignmentId": assignment_id }),
    );

    // Still held: the teacher appears in a timetable slot.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "timetable.addLesson",
        json!({
            "combinationId": combination_id,
            "day": "Wednesday",
            "lesson": {
                "subject": "Accounting",
                "startTime": "11:00",
                "endTime": "12:00",
                "teacherId": teacher_id
            }
        }),
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "teachers.delete",
        json!({ "teacherId": teacher_id }),
        "conflict",
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "timetable.deleteDay",
        json!({ "combinationId": combination_id, "day": "Wednesday" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "teachers.delete",
        json!({ "teacherId": teacher_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "subjects.delete",
        json!({ "subjectId": subject_id }),
    );
}
