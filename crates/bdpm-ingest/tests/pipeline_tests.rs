//! End-to-end tests of the batch pipeline on real files

use bdpm_ingest::pipeline::{artifact_path, Artifacts, Pipeline};
use bdpm_ingest::schema::{Column, Schema};
use bdpm_ingest::statement::InsertBuilder;
use bdpm_ingest::Record;
use encoding_rs::UTF_8;
use std::path::PathBuf;
use tempfile::TempDir;

fn medicament_schema() -> Schema {
    Schema::new(vec![
        Column::matching("cis", r"\d{8}").unwrap(),
        Column::raw("nom"),
        Column::float("prix"),
    ])
    .unwrap()
}

fn write_source(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn placeholder_insert(_: &Record) -> Option<String> {
    Some("INSERT INTO t (cis,nom,prix) VALUES (?,?,?)".to_string())
}

#[tokio::test]
async fn test_malformed_line_does_not_abort_the_file() {
    let dir = TempDir::new().unwrap();
    let source = write_source(
        &dir,
        "medicaments.txt",
        b"34009300\tParacetamol\t12,50\nbad\tTest\t\t\n",
    );
    let schema = medicament_schema();

    let output = Pipeline::new("medicaments", &schema)
        .with_builder(&placeholder_insert)
        .process_file(&source, Artifacts::default())
        .await
        .unwrap();

    assert_eq!(output.records.len(), 2);
    assert_eq!(output.diagnostics, 1);

    let json_path = output.artifacts.json.clone().unwrap();
    assert_eq!(json_path, artifact_path(&source, ".json"));
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(
        json,
        serde_json::json!([
            { "cis": "34009300", "nom": "Paracetamol", "prix": 12.5 },
            { "nom": "Test" }
        ])
    );

    let sql = std::fs::read_to_string(output.artifacts.sql.clone().unwrap()).unwrap();
    assert_eq!(sql.matches("BEGIN TRANSACTION;").count(), 1);
    assert_eq!(sql.matches("COMMIT;").count(), 1);
    assert_eq!(sql.matches("INSERT INTO t").count(), 2);
    assert!(sql.starts_with("BEGIN TRANSACTION;"));
    assert!(sql.trim_end().ends_with("COMMIT;"));
}

#[tokio::test]
async fn test_statements_follow_builder_results() {
    let dir = TempDir::new().unwrap();
    let source = write_source(
        &dir,
        "medicaments.txt",
        b"34009300\tParacetamol\t12,50\nbad\tTest\t\t\n",
    );
    let schema = medicament_schema();
    let only_valid = |record: &Record| record.get("cis").map(|_| "INSERT INTO t VALUES (1);".to_string());

    let output = Pipeline::new("medicaments", &schema)
        .with_builder(&only_valid)
        .process_file(&source, Artifacts::default())
        .await
        .unwrap();

    assert_eq!(output.statements.len(), 1);
    let sql = std::fs::read_to_string(output.artifacts.sql.unwrap()).unwrap();
    assert_eq!(sql.matches("INSERT INTO t").count(), 1);
}

#[tokio::test]
async fn test_insert_builder_output_escapes_quotes() {
    let dir = TempDir::new().unwrap();
    // 0x92 is the windows-1252 right quote, 0xE9 is é
    let source = write_source(&dir, "CIS_bdpm.txt", b"60234100\tCr\xe8me d\x92\xe9t\xe9\t3,5\r\n");
    let schema = medicament_schema();
    let builder = InsertBuilder::new("t", schema.field_names());

    let output = Pipeline::new("CIS_bdpm", &schema)
        .with_builder(&builder)
        .process_file(&source, Artifacts { json: false, sql: true })
        .await
        .unwrap();

    assert!(output.artifacts.json.is_none());
    assert!(!dir.path().join("CIS_bdpm.txt.json").exists());
    assert_eq!(
        output.statements,
        vec!["INSERT INTO \"t\" (\"cis\", \"nom\", \"prix\") VALUES ('60234100', 'Crème d''été', 3.5);"]
    );
}

#[tokio::test]
async fn test_blank_lines_are_skipped() {
    let schema = medicament_schema();
    let input: &[u8] = b"\n34009300\tA\t1\n\r\n   \n34009301\tB\t2\n";

    let output = Pipeline::new("inline", &schema).process(input).await.unwrap();

    assert_eq!(output.lines, 2);
    assert_eq!(output.records.len(), 2);
    assert!(output.statements.is_empty());
    assert_eq!(output.diagnostics, 0);
}

#[tokio::test]
async fn test_configured_encoding() {
    let schema = medicament_schema();
    let input = "34009300\tŒstrogel\t1\n".as_bytes();

    let output = Pipeline::new("inline", &schema)
        .with_encoding(UTF_8)
        .process(input)
        .await
        .unwrap();

    assert_eq!(output.records[0].get("nom").unwrap().as_text(), Some("Œstrogel"));
}

#[tokio::test]
async fn test_missing_source_is_io_error() {
    let dir = TempDir::new().unwrap();
    let schema = medicament_schema();

    let err = Pipeline::new("missing", &schema)
        .process_file(&dir.path().join("missing.txt"), Artifacts::default())
        .await
        .unwrap_err();

    assert!(matches!(err, bdpm_common::BdpmError::Io(_)));
}

#[tokio::test]
async fn test_artifacts_replace_previous_run() {
    let dir = TempDir::new().unwrap();
    let source = write_source(&dir, "f.txt", b"34009300\tA\t1\n");
    std::fs::write(dir.path().join("f.txt.json"), "stale").unwrap();
    let schema = medicament_schema();

    Pipeline::new("f", &schema)
        .process_file(&source, Artifacts::default())
        .await
        .unwrap();

    let json = std::fs::read_to_string(dir.path().join("f.txt.json")).unwrap();
    assert!(json.contains("34009300"));
    assert!(!dir.path().join("f.txt.json.tmp").exists());
}

#[tokio::test]
async fn test_artifact_write_failure_is_io_error() {
    let dir = TempDir::new().unwrap();
    let source = write_source(&dir, "f.txt", b"34009300\tA\t1\n");
    std::fs::create_dir(artifact_path(&source, ".json")).unwrap();
    let schema = medicament_schema();
    let builder = InsertBuilder::new("t", schema.field_names());

    let err = Pipeline::new("f", &schema)
        .with_builder(&builder)
        .process_file(&source, Artifacts::default())
        .await
        .unwrap_err();
    assert!(matches!(err, bdpm_common::BdpmError::Io(_)), "{}", err);

    // The SQL artifact is unaffected by the JSON failure
    let sql = std::fs::read_to_string(artifact_path(&source, ".sql")).unwrap();
    assert!(sql.contains("'34009300'"));
    assert!(artifact_path(&source, ".json").is_dir());
    assert!(!artifact_path(&source, ".json.tmp").exists());
    assert!(!artifact_path(&source, ".sql.tmp").exists());
}
