use serde_json::json;
use std::time::Duration;
use tablebridge::testing::{init_logging, scratch_dir, write_file, write_people_csv};
use tablebridge::{
    ConnectionConfig, Endpoint, ErrorKind, FlatFileConfig, IngestOutcome, MemoryStore, Settings,
    Transfer, TransferRequest, TypeTag, Value,
};

fn store_cfg() -> ConnectionConfig {
    ConnectionConfig::new("localhost", "8123").with_credentials("default", "secret")
}

fn file_cfg(path: &std::path::Path) -> FlatFileConfig {
    FlatFileConfig::new(path.to_string_lossy())
}

fn ten_numbers() -> MemoryStore {
    let rows = (0..10).map(|i| vec![json!(i), json!(format!("n{i}"))]).collect();
    MemoryStore::new().with_table("numbers", &[("id", "UInt32"), ("label", "String")], rows)
}

#[test]
fn people_csv_lands_in_a_new_table() -> anyhow::Result<()> {
    init_logging();
    let tmp = scratch_dir()?;
    let path = write_people_csv(tmp.path())?;
    let store = MemoryStore::new();
    let transfer = Transfer::new(store.clone(), Settings::default());

    let req = TransferRequest::new(Endpoint::FlatFile(file_cfg(&path)), Endpoint::Store(store_cfg()))
        .with_table("people_import");
    let outcome = transfer.ingest(&req)?;

    assert_eq!(outcome, IngestOutcome::Written { records: 2 });
    assert_eq!(outcome.record_count(), 2);
    assert_eq!(
        store.schema("people_import"),
        Some(vec![
            ("id".into(), "String".into()),
            ("name".into(), "String".into()),
            ("age".into(), "String".into()),
        ])
    );
    assert_eq!(
        store.rows("people_import"),
        Some(vec![
            vec![json!("1"), json!("Ann"), json!("30")],
            vec![json!("2"), json!("Bo"), json!("41")],
        ])
    );
    assert_eq!(store.open_connections(), 0);
    Ok(())
}

#[test]
fn preview_only_ingest_reports_the_full_count() -> anyhow::Result<()> {
    let tmp = scratch_dir()?;
    let target = tmp.path().join("never.csv");
    let store = ten_numbers();
    let transfer = Transfer::new(store.clone(), Settings::default());

    let req = TransferRequest::new(Endpoint::Store(store_cfg()), Endpoint::FlatFile(file_cfg(&target)))
        .with_table("numbers")
        .with_columns(["id", "label"])
        .preview_only(1);
    let IngestOutcome::Previewed(preview) = transfer.ingest(&req)? else {
        panic!("expected a preview");
    };
    assert_eq!(preview.rows.len(), 1);
    assert_eq!(preview.total, 10);
    assert_eq!(preview.rows[0].get("id"), Some(&Value::UInt32(0)));
    assert!(!target.exists());
    Ok(())
}

#[test]
fn preview_limits_the_read_itself() -> anyhow::Result<()> {
    let tmp = scratch_dir()?;
    let target = tmp.path().join("never.csv");
    let store = ten_numbers();
    let transfer = Transfer::new(store.clone(), Settings::default());

    let mut req = TransferRequest::new(Endpoint::Store(store_cfg()), Endpoint::FlatFile(file_cfg(&target)))
        .with_table("numbers")
        .with_columns(["label"]);
    req.preview_limit = 1;
    let preview = transfer.preview(&req)?;
    assert_eq!((preview.rows.len(), preview.total), (1, 1));
    assert!(store.statements().iter().any(|s| s.contains(" LIMIT 1")));
    assert!(!target.exists());

    req.preview_limit = 0;
    let settings = Settings::default().with_default_preview_limit(4);
    let preview = Transfer::new(store, settings).preview(&req)?;
    assert_eq!(preview.total, 4);
    Ok(())
}

#[test]
fn store_to_file_writes_selected_columns() -> anyhow::Result<()> {
    let tmp = scratch_dir()?;
    let target = tmp.path().join("out/numbers.tsv");
    let transfer = Transfer::new(ten_numbers(), Settings::default());
    let req = TransferRequest::new(
        Endpoint::Store(store_cfg()),
        Endpoint::FlatFile(file_cfg(&target).with_delimiter("\t")),
    )
    .with_table("numbers")
    .with_columns(["label", "id"]);

    assert_eq!(transfer.ingest(&req)?.record_count(), 10);
    let text = std::fs::read_to_string(&target)?;
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("label\tid"));
    assert_eq!(lines.next(), Some("n0\t0"));
    assert_eq!(text.lines().count(), 11);
    Ok(())
}

#[test]
fn file_preview_ignores_selection() -> anyhow::Result<()> {
    let tmp = scratch_dir()?;
    let path = write_people_csv(tmp.path())?;
    let transfer = Transfer::new(MemoryStore::new(), Settings::default());
    let req = TransferRequest::new(Endpoint::FlatFile(file_cfg(&path)), Endpoint::Store(store_cfg()))
        .with_columns(["name"]);
    let preview = transfer.preview(&req)?;
    assert_eq!(preview.total, 2);
    assert_eq!(preview.rows[0].len(), 3);
    Ok(())
}

#[test]
fn join_is_refused_unless_enabled() -> anyhow::Result<()> {
    let tmp = scratch_dir()?;
    let store = ten_numbers();
    let req = TransferRequest::new(
        Endpoint::Store(store_cfg()),
        Endpoint::FlatFile(file_cfg(&tmp.path().join("j.csv"))),
    )
    .with_join(["numbers", "labels"], "numbers.id = labels.id")
    .with_columns(["numbers.id"]);

    let err = Transfer::new(store.clone(), Settings::default()).preview(&req).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(store.statements().is_empty());

    let open = Settings::default().with_raw_join_condition(true);
    let err = Transfer::new(store.clone(), open).preview(&req).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);
    assert_eq!(store.statements().len(), 1);
    Ok(())
}

#[test]
fn store_target_needs_a_table_name() -> anyhow::Result<()> {
    let tmp = scratch_dir()?;
    let path = write_people_csv(tmp.path())?;
    let store = MemoryStore::new();
    let req = TransferRequest::new(Endpoint::FlatFile(file_cfg(&path)), Endpoint::Store(store_cfg()));
    let err = Transfer::new(store.clone(), Settings::default()).ingest(&req).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(store.connects(), 0);
    Ok(())
}

#[test]
fn header_only_file_has_no_data_to_import() -> anyhow::Result<()> {
    let tmp = scratch_dir()?;
    let path = write_file(tmp.path(), "empty.csv", "id,name\n")?;
    let store = MemoryStore::new();
    let req = TransferRequest::new(Endpoint::FlatFile(file_cfg(&path)), Endpoint::Store(store_cfg()))
        .with_table("t");
    let err = Transfer::new(store.clone(), Settings::default()).ingest(&req).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoData);
    assert!(store.statements().is_empty());
    Ok(())
}

#[test]
fn coercion_failure_sends_nothing() -> anyhow::Result<()> {
    let tmp = scratch_dir()?;
    let path = write_file(tmp.path(), "ages.csv", "age\n30\nold\n")?;
    let store = MemoryStore::new().with_table("ages", &[("age", "UInt8")], vec![]);
    let req = TransferRequest::new(Endpoint::FlatFile(file_cfg(&path)), Endpoint::Store(store_cfg()))
        .with_table("ages");
    let err = Transfer::new(store.clone(), Settings::default()).ingest(&req).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.appended(), Some(1));
    assert!(!store.statements().iter().any(|s| s.starts_with("INSERT")));
    assert_eq!(store.rows("ages"), Some(vec![]));
    Ok(())
}

#[test]
fn send_failure_reports_how_far_it_got() -> anyhow::Result<()> {
    let tmp = scratch_dir()?;
    let path = write_people_csv(tmp.path())?;
    let store = MemoryStore::new().failing_send("Code: 241. DB::Exception: Memory limit exceeded");
    let req = TransferRequest::new(Endpoint::FlatFile(file_cfg(&path)), Endpoint::Store(store_cfg()))
        .with_table("people_import");
    let err = Transfer::new(store, Settings::default()).ingest(&req).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);
    assert_eq!(err.appended(), Some(2));
    assert!(err.to_string().contains("Memory limit exceeded"));
    Ok(())
}

#[test]
fn expired_deadline_is_a_timeout() {
    let settings = Settings::default().with_metadata_timeout(Duration::ZERO);
    let err = Transfer::new(ten_numbers(), settings)
        .list_tables(&store_cfg())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[test]
fn metadata_operations() -> anyhow::Result<()> {
    let tmp = scratch_dir()?;
    let path = write_people_csv(tmp.path())?;
    let transfer = Transfer::new(ten_numbers(), Settings::default());

    assert_eq!(transfer.list_tables(&store_cfg())?, vec!["numbers"]);
    let cols = transfer.describe_columns(&store_cfg(), "numbers")?;
    assert_eq!(cols[0].tag, TypeTag::UInt32);
    assert_eq!(cols[0].store_type, "UInt32");

    let schema = transfer.infer_file_schema(&file_cfg(&path))?;
    assert_eq!(schema.len(), 3);
    assert!(schema.iter().all(|c| c.tag == TypeTag::String));

    let missing = transfer
        .infer_file_schema(&file_cfg(&tmp.path().join("missing.csv")))
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);
    Ok(())
}

#[test]
fn request_from_json_runs_end_to_end() -> anyhow::Result<()> {
    let tmp = scratch_dir()?;
    let path = write_people_csv(tmp.path())?;
    let body = json!({
        "source": {"kind": "flatFile", "fileName": path.to_string_lossy(), "delimiter": ","},
        "target": {"kind": "store", "host": "localhost", "port": "8123"},
        "tableName": "people_import",
        "selectedColumns": ["name"],
    });
    let req: TransferRequest = serde_json::from_value(body)?;
    let store = MemoryStore::new();
    Transfer::new(store.clone(), Settings::default()).ingest(&req)?;
    assert_eq!(
        store.schema("people_import"),
        Some(vec![("name".into(), "String".into())])
    );
    Ok(())
}
