use serde_json::json;
use tablebridge::store::{MemoryConnection, QueryResult};
use tablebridge::testing::{init_logging, numbered_rows};
use tablebridge::{
    ConnectionConfig, Connector, Deadline, ErrorKind, MemoryStore, SchemaState, Settings,
    StoreReader, StoreWriter, TransferError, TypeTag, Value, row,
};

fn connect(store: &MemoryStore) -> anyhow::Result<MemoryConnection> {
    Ok(store.connect(&ConnectionConfig::new("localhost", "8123"), Deadline::unbounded())?)
}

fn orders() -> MemoryStore {
    MemoryStore::new().with_table(
        "orders",
        &[
            ("id", "UInt64"),
            ("customer", "LowCardinality(String)"),
            ("amount", "Decimal(18, 2)"),
            ("placed", "DateTime"),
        ],
        vec![
            vec![json!("1"), json!("acme"), json!("12.50"), json!("2024-05-01 09:00:00")],
            vec![json!("2"), json!("globex"), json!("7.25"), json!("2024-05-02 10:30:00")],
        ],
    )
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

#[test]
fn validate_columns_returns_subset_unchanged() -> anyhow::Result<()> {
    let store = orders();
    let conn = connect(&store)?;
    let settings = Settings::default();
    let reader = StoreReader::new(&conn, &settings);
    for subset in [vec!["id"], vec!["amount", "id"], vec!["placed", "customer", "amount", "id"]] {
        let subset = names(&subset);
        assert_eq!(reader.validate_columns("orders", &subset)?, subset);
    }
    Ok(())
}

#[test]
fn validate_columns_lists_exactly_the_missing_names() -> anyhow::Result<()> {
    let store = orders();
    let conn = connect(&store)?;
    let settings = Settings::default();
    let reader = StoreReader::new(&conn, &settings);
    let err = reader
        .validate_columns("orders", &names(&["ghost", "id", "phantom"]))
        .unwrap_err();
    let TransferError::SchemaMismatch { valid, mut missing, .. } = err else {
        panic!("expected a schema mismatch");
    };
    missing.sort();
    assert_eq!(valid, names(&["id"]));
    assert_eq!(missing, names(&["ghost", "phantom"]));
    Ok(())
}

#[test]
fn fetch_decodes_store_types() -> anyhow::Result<()> {
    let store = orders();
    let conn = connect(&store)?;
    let settings = Settings::default();
    let rows = StoreReader::new(&conn, &settings)
        .fetch("orders", &names(&["id", "customer", "amount", "placed"]), 0)?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("id"), Some(&Value::UInt64(1)));
    assert_eq!(rows[0].get("customer"), Some(&Value::from("acme")));
    assert_eq!(rows[0].get("amount"), Some(&Value::Float64(12.5)));
    assert_eq!(rows[1].get("placed").map(ToString::to_string).as_deref(), Some("2024-05-02 10:30:00"));
    Ok(())
}

#[test]
fn fetch_keeps_float32_columns_narrow() -> anyhow::Result<()> {
    let store = MemoryStore::new().with_table(
        "readings",
        &[("f", "Float32"), ("g", "Nullable(Float32)"), ("d", "Float64")],
        vec![vec![json!(1.5), json!(null), json!(2.25)], vec![json!(0.5), json!(3.5), json!(1)]],
    );
    let conn = connect(&store)?;
    let settings = Settings::default();
    let rows = StoreReader::new(&conn, &settings).fetch("readings", &names(&["f", "g", "d"]), 0)?;
    assert_eq!(rows[0].get("f"), Some(&Value::Float32(1.5)));
    assert_eq!(rows[0].get("g"), Some(&Value::Null));
    assert_eq!(rows[1].get("g"), Some(&Value::Float32(3.5)));
    assert_eq!(rows[0].get("d"), Some(&Value::Float64(2.25)));
    Ok(())
}

#[test]
fn fetch_of_missing_table_is_not_found() -> anyhow::Result<()> {
    let store = orders();
    let conn = connect(&store)?;
    let settings = Settings::default();
    let err = StoreReader::new(&conn, &settings)
        .fetch("nope", &names(&["id"]), 0)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[test]
fn join_with_one_table_sends_nothing() -> anyhow::Result<()> {
    let store = orders();
    let conn = connect(&store)?;
    let settings = Settings::default().with_raw_join_condition(true);
    let err = StoreReader::new(&conn, &settings)
        .join(&names(&["orders"]), "1 = 1", &names(&["id"]), 0)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(store.statements().is_empty());
    Ok(())
}

#[test]
fn join_of_three_tables_is_one_statement() -> anyhow::Result<()> {
    let canned = QueryResult::new(
        vec![("orders.id".into(), "UInt64".into())],
        vec![vec![json!(1)], vec![json!(2)]],
    );
    let store = orders().with_canned("JOIN", canned);
    let conn = connect(&store)?;
    let settings = Settings::default().with_raw_join_condition(true);
    let rows = StoreReader::new(&conn, &settings).join(
        &names(&["orders", "customers", "regions"]),
        "orders.customer = customers.name AND customers.region = regions.id",
        &names(&["orders.id"]),
        10,
    )?;
    assert_eq!(rows.len(), 2);
    let sent = store.statements();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with(
        "SELECT orders.id FROM orders JOIN customers JOIN regions ON orders.customer = customers.name"
    ));
    assert!(sent[0].contains(" LIMIT 10"));
    Ok(())
}

#[test]
fn ensure_schema_branches() -> anyhow::Result<()> {
    init_logging();
    let store = orders();
    let conn = connect(&store)?;
    let writer = StoreWriter::new(&conn);

    let (existing, state) = writer.ensure_schema("orders", &[])?;
    assert_eq!(state, SchemaState::Existing);
    assert_eq!(existing.columns()[2].tag, TypeTag::Decimal);

    let rows = vec![row! { "flag" => true, "n" => 3i32 }];
    let (created, state) = writer.ensure_schema("fresh", &rows)?;
    assert_eq!(state, SchemaState::Created);
    let types: Vec<&str> = created.columns().iter().map(|c| c.store_type.as_str()).collect();
    assert_eq!(types, vec!["UInt8", "Int64"]);
    assert_eq!(
        store.schema("fresh"),
        Some(vec![("flag".into(), "UInt8".into()), ("n".into(), "Int64".into())])
    );
    Ok(())
}

#[test]
fn import_into_existing_table_coerces_text() -> anyhow::Result<()> {
    let store = orders();
    let conn = connect(&store)?;
    let rows = vec![row! {
        "id" => "3",
        "customer" => "initech",
        "amount" => "99.95",
        "placed" => "2024-06-01T12:00:00",
    }];
    assert_eq!(StoreWriter::new(&conn).import_rows("orders", &rows)?, 1);
    let stored = store.rows("orders").unwrap_or_default();
    assert_eq!(
        stored.last(),
        Some(&vec![json!(3), json!("initech"), json!(99.95), json!("2024-06-01 12:00:00")])
    );
    Ok(())
}

#[test]
fn empty_import_issues_no_store_calls() -> anyhow::Result<()> {
    let store = orders();
    let conn = connect(&store)?;
    let err = StoreWriter::new(&conn).import_rows("orders", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoData);
    assert!(store.statements().is_empty());
    Ok(())
}

#[test]
fn import_is_one_batch() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let conn = connect(&store)?;
    let n = StoreWriter::new(&conn).import_rows("numbers", &numbered_rows(250))?;
    assert_eq!(n, 250);
    let inserts = store
        .statements()
        .into_iter()
        .filter(|s| s.starts_with("INSERT"))
        .count();
    assert_eq!(inserts, 1);
    assert_eq!(store.rows("numbers").map(|r| r.len()), Some(250));
    Ok(())
}

#[test]
fn failing_connect_is_a_connection_error() {
    let store = MemoryStore::new().failing_connect("connection refused");
    let err = connect(&store).unwrap_err();
    let err = err.downcast::<TransferError>().ok().map(|e| e.kind());
    assert_eq!(err, Some(ErrorKind::Connection));
    assert_eq!(store.open_connections(), 0);
}

#[test]
fn connections_are_released_on_drop() -> anyhow::Result<()> {
    let store = orders();
    {
        let _a = connect(&store)?;
        let _b = connect(&store)?;
        assert_eq!(store.open_connections(), 2);
    }
    assert_eq!(store.open_connections(), 0);
    assert_eq!(store.connects(), 2);
    Ok(())
}

#[test]
fn rejected_select_is_a_query_error() -> anyhow::Result<()> {
    let store = orders().failing_query("SELECT", "Code: 47. DB::Exception: Unknown identifier");
    let conn = connect(&store)?;
    let settings = Settings::default();
    let err = StoreReader::new(&conn, &settings)
        .fetch("orders", &names(&["id"]), 5)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);
    assert_eq!(store.statements().len(), 2);
    Ok(())
}

#[test]
fn describe_lists_columns_in_table_order() -> anyhow::Result<()> {
    let store = orders();
    let conn = connect(&store)?;
    let settings = Settings::default();
    let reader = StoreReader::new(&conn, &settings);
    assert_eq!(reader.list_tables()?, store.table_names());
    let desc = reader.describe("orders")?;
    assert_eq!(desc.name(), "orders");
    assert_eq!(
        desc.column_names().collect::<Vec<_>>(),
        vec!["id", "customer", "amount", "placed"]
    );
    Ok(())
}
