
use serde_json::json;
use test_support::{request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn import_restores_records_from_an_exported_bundle() {
    let workspace = temp_dir("campus-bundle-ipc");
    let out_dir = temp_dir("campus-bundle-out");
    let bundle = out_dir.join("snapshot.campusbundle.zip");

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
        json!({ "name": "Snapshot Class" }),
    );
    let class_id = str_field(&class, "classId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "classId": class_id, "lastName": "Osei", "firstName": "Kofi" }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("campus-workspace-v1")
    );
    assert_eq!(
        exported
            .get("dbSha256")
            .and_then(|v| v.as_str())
            .map(|s| s.len()),
        Some(64)
    );

    // Wipe the record, then restore the snapshot over the workspace.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "classes.delete",
        json!({ "classId": class_id }),
    );
    let empty = request_ok(&mut stdin, &mut reader, "6", "classes.list", json!({}));
    assert_eq!(
        empty
            .get("classes")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        imported
            .get("bundleFormatDetected")
            .and_then(|v| v.as_str()),
        Some("campus-workspace-v1")
    );

    let restored = request_ok(&mut stdin, &mut reader, "8", "classes.list", json!({}));
    let classes = restored.get("classes").and_then(|v| v.as_array()).unwrap();
    assert_eq!(classes.len(), 1);
    assert_eq!(
        classes[0].get("name").and_then(|v| v.as_str()),
        Some("Snapshot Class")
    );
    assert_eq!(
        classes[0].get("studentCount").and_then(|v| v.as_i64()),
        Some(1)
    );

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}
