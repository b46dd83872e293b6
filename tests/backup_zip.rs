#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("campus-backup-src");
    let workspace2 = temp_dir("campus-backup-dst");
    let out_dir = temp_dir("campus-backup-out");

    let db_src = workspace.join("campus.sqlite3");
    let bytes = b"sqlite-test-payload";
    std::fs::write(&db_src, bytes).expect("write source db");

    let bundle_path = out_dir.join("workspace.campusbundle.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 3);
    assert_eq!(export.db_sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT_V1));
    assert!(manifest.contains(&export.db_sha256));
    archive
        .by_name("db/campus.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);

    let db_dst = workspace2.join("campus.sqlite3");
    let restored = std::fs::read(&db_dst).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn corrupted_database_entry_is_rejected() {
    use std::io::Write;
    use zip::write::FileOptions;

    let out_dir = temp_dir("campus-backup-corrupt");
    let workspace = temp_dir("campus-backup-corrupt-dst");

    // Hand-build a bundle whose manifest checksum does not match the payload.
    let bundle_path = out_dir.join("tampered.campusbundle.zip");
    let f = File::create(&bundle_path).expect("create bundle");
    let mut zip = zip::ZipWriter::new(f);
    let opts = FileOptions::default();
    zip.start_file("manifest.json", opts).expect("manifest");
    zip.write_all(
        format!(
            "{{\"format\":\"{}\",\"version\":1,\"dbSha256\":\"{}\"}}",
            backup::BUNDLE_FORMAT_V1,
            "0".repeat(64)
        )
        .as_bytes(),
    )
    .expect("write manifest");
    zip.start_file("db/campus.sqlite3", opts).expect("db entry");
    zip.write_all(b"tampered-payload").expect("write db entry");
    zip.finish().expect("finish zip");

    let result = backup::import_workspace_bundle(&bundle_path, &workspace);
    let message = format!("{:?}", result.expect_err("tampered bundle must fail"));
    assert!(message.contains("checksum mismatch"));
    assert!(!workspace.join("campus.sqlite3").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn raw_sqlite_import_is_supported() {
    let out_dir = temp_dir("campus-backup-raw");
    let workspace = temp_dir("campus-backup-raw-dst");

    let raw_file = out_dir.join("nightly.sqlite3");
    let bytes = b"raw-sqlite-copy";
    std::fs::write(&raw_file, bytes).expect("write raw sqlite file");

    let import =
        backup::import_workspace_bundle(&raw_file, &workspace).expect("import raw sqlite");
    assert_eq!(import.bundle_format_detected, "raw-sqlite3");

    let restored = std::fs::read(workspace.join("campus.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}
