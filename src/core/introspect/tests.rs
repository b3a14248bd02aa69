use super::*;
use crate::core::config::SqliteConfig;
use crate::core::connection::scripted::ScriptedDriver;
use crate::core::connection::SqliteDriver;

fn sqlite() -> SqliteDriver {
    let config = SqliteConfig { path: ":memory:".into(), ..SqliteConfig::default() };
    SqliteDriver::open(&config).unwrap()
}

fn pg_catalog_row(cid: i64, name: &str, ty: &str, notnull: i64, default: Option<&str>, pk: i64) -> NativeRow {
    NativeRow::Named(vec![
        ("cid".to_string(), Value::Integer(cid)),
        ("name".to_string(), Value::from(name)),
        ("type".to_string(), Value::from(ty)),
        ("notnull".to_string(), Value::Integer(notnull)),
        ("dflt_value".to_string(), Value::from(default)),
        ("pk".to_string(), Value::Integer(pk)),
    ])
}

/// Catalog answer for `accounts(id serial pk, email varchar, meta jsonb, created_at timestamp, is_active boolean)`
/// with a dropped column between `id` and `email`.
fn accounts_catalog() -> DriverOutcome {
    DriverOutcome::with_rows(
        Vec::new(),
        vec![
            pg_catalog_row(1, "id", "integer", 1, Some("nextval('accounts_id_seq'::regclass)"), 1),
            pg_catalog_row(3, "email", "character varying", 1, None, 0),
            pg_catalog_row(4, "meta", "jsonb", 0, None, 0),
            pg_catalog_row(5, "created_at", "timestamp without time zone", 0, Some("CURRENT_TIMESTAMP"), 0),
            pg_catalog_row(6, "is_active", "boolean", 0, Some("true"), 0),
        ],
    )
}

#[test]
fn test_normalize_declared_type() {
    assert_eq!(normalize_declared_type("character varying"), "TEXT");
    assert_eq!(normalize_declared_type("VARCHAR(255)"), "TEXT");
    assert_eq!(normalize_declared_type("jsonb"), "TEXT");
    assert_eq!(normalize_declared_type("bigint"), "INTEGER");
    assert_eq!(normalize_declared_type("boolean"), "INTEGER");
    assert_eq!(normalize_declared_type("timestamp without time zone"), "TIMESTAMP");
    assert_eq!(normalize_declared_type("DATETIME"), "TIMESTAMP");
    assert_eq!(normalize_declared_type("real"), "REAL");
    assert_eq!(normalize_declared_type(""), "");
}

#[test]
fn test_describe_columns_sqlite() {
    let mut driver = sqlite();
    driver
        .execute(
            "CREATE TABLE accounts (id INTEGER PRIMARY KEY AUTOINCREMENT, email VARCHAR(120) NOT NULL, \
             meta TEXT, created_at DATETIME DEFAULT CURRENT_TIMESTAMP, is_active BOOLEAN DEFAULT 1)",
            &[],
        )
        .unwrap();

    let columns = describe_columns(&mut driver, "accounts").unwrap();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "email", "meta", "created_at", "is_active"]);
    assert_eq!(columns[0].ordinal, 0);
    assert!(columns[0].is_primary_key);
    assert_eq!(columns[0].declared_type, "INTEGER");
    assert!(columns[1].not_null);
    assert_eq!(columns[1].declared_type, "TEXT");
    assert_eq!(columns[3].declared_type, "TIMESTAMP");
    assert_eq!(columns[3].default_expr.as_deref(), Some("CURRENT_TIMESTAMP"));
    assert_eq!(columns[4].declared_type, "INTEGER");
    assert!(!columns[4].is_primary_key);
}

#[test]
fn test_describe_columns_unknown_table_is_empty() {
    let mut driver = sqlite();
    assert!(describe_columns(&mut driver, "missing").unwrap().is_empty());
}

#[test]
fn test_describe_columns_postgres_renumbers_and_normalizes() {
    let (mut driver, log) = ScriptedDriver::postgres(|_, _| Ok(accounts_catalog()));
    let columns = describe_columns(&mut driver, "accounts").unwrap();

    let ordinals: Vec<i64> = columns.iter().map(|c| c.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1, 2, 3, 4]);
    let types: Vec<&str> = columns.iter().map(|c| c.declared_type.as_str()).collect();
    assert_eq!(types, vec!["INTEGER", "TEXT", "TEXT", "TIMESTAMP", "INTEGER"]);
    assert!(columns[0].is_primary_key);
    assert!(!columns[1].is_primary_key);

    let calls = log.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].sql.contains("information_schema.columns"));
    assert_eq!(calls[0].params, vec![Value::from("accounts")]);
}

#[test]
fn test_introspection_shape_is_backend_independent() {
    let mut lite = sqlite();
    lite.execute(
        "CREATE TABLE accounts (id INTEGER PRIMARY KEY, email TEXT NOT NULL, meta TEXT, \
         created_at TIMESTAMP, is_active BOOLEAN)",
        &[],
    )
    .unwrap();
    let (mut pg, _) = ScriptedDriver::postgres(|_, _| Ok(accounts_catalog()));

    let from_lite = describe_columns(&mut lite, "accounts").unwrap();
    let from_pg = describe_columns(&mut pg, "accounts").unwrap();
    let shape = |cols: &[ColumnDescriptor]| -> Vec<(i64, String, String, bool)> {
        cols.iter().map(|c| (c.ordinal, c.name.clone(), c.declared_type.clone(), c.is_primary_key)).collect()
    };
    assert_eq!(shape(&from_lite), shape(&from_pg));

    let serialized = serde_json::to_value(&from_pg[0]).unwrap();
    let keys: Vec<&str> = serialized.as_object().unwrap().keys().map(String::as_str).collect();
    let mut expected = ColumnDescriptor::FIELD_NAMES.to_vec();
    expected.sort_unstable();
    let mut keys_sorted = keys.clone();
    keys_sorted.sort_unstable();
    assert_eq!(keys_sorted, expected);
}

#[test]
fn test_describe_unique_keys_sqlite() {
    let mut driver = sqlite();
    run_all(
        &mut driver,
        &[
            "CREATE TABLE widgets (id INTEGER PRIMARY KEY, name TEXT UNIQUE, sku TEXT, region TEXT, qty INTEGER)",
            "CREATE UNIQUE INDEX widgets_sku_region ON widgets (sku, region)",
            "CREATE UNIQUE INDEX widgets_lower_name ON widgets (lower(name))",
            "CREATE UNIQUE INDEX widgets_partial ON widgets (qty) WHERE qty > 0",
        ],
    );

    let keys = describe_unique_keys(&mut driver, "widgets").unwrap();
    assert_eq!(keys[0], UniqueKey { primary: true, columns: vec!["id".to_string()] });
    assert!(keys.contains(&UniqueKey { primary: false, columns: vec!["name".to_string()] }));
    assert!(keys.contains(&UniqueKey {
        primary: false,
        columns: vec!["sku".to_string(), "region".to_string()],
    }));
    assert_eq!(keys.len(), 3);
}

#[test]
fn test_describe_unique_keys_composite_primary_key_order() {
    let mut driver = sqlite();
    driver
        .execute("CREATE TABLE links (b TEXT, a TEXT, note TEXT, PRIMARY KEY (a, b))", &[])
        .unwrap();
    let keys = describe_unique_keys(&mut driver, "links").unwrap();
    assert_eq!(keys, vec![UniqueKey { primary: true, columns: vec!["a".to_string(), "b".to_string()] }]);
}

#[test]
fn test_describe_unique_keys_postgres_groups_by_index() {
    let row = |id: i64, primary: bool, column: &str| {
        NativeRow::Named(vec![
            ("index_id".to_string(), Value::Integer(id)),
            ("is_primary".to_string(), Value::Boolean(primary)),
            ("column_name".to_string(), Value::from(column)),
        ])
    };
    let (mut driver, _) = ScriptedDriver::postgres(move |_, _| {
        Ok(DriverOutcome::with_rows(
            Vec::new(),
            vec![row(10, true, "id"), row(11, false, "sku"), row(11, false, "region"), row(12, false, "name")],
        ))
    });
    let keys = describe_unique_keys(&mut driver, "widgets").unwrap();
    assert_eq!(
        keys,
        vec![
            UniqueKey { primary: true, columns: vec!["id".to_string()] },
            UniqueKey { primary: false, columns: vec!["sku".to_string(), "region".to_string()] },
            UniqueKey { primary: false, columns: vec!["name".to_string()] },
        ]
    );
}

#[test]
fn test_intercept_table_info_on_postgres() {
    let (mut driver, log) = ScriptedDriver::postgres(|_, _| Ok(accounts_catalog()));
    let outcome = intercept(&mut driver, "PRAGMA table_info(accounts)").unwrap().unwrap();

    assert_eq!(outcome.columns, ColumnDescriptor::LEGACY_KEYS.to_vec());
    assert_eq!(outcome.rows_affected, None);
    let rows: Vec<CompatRow> = outcome.rows.into_iter().map(|r| r.into_compat(&outcome.columns)).collect();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[1].get::<i64, _>("cid").unwrap(), 1);
    assert_eq!(rows[1].get::<String, _>("type").unwrap(), "TEXT");
    assert_eq!(rows[0].get::<i64, _>("pk").unwrap(), 1);
    assert_eq!(rows[2].value_of("dflt_value").unwrap(), &Value::Null);

    // The pseudo-command itself never reaches the server.
    assert!(log.statements().iter().all(|s| !s.contains("PRAGMA")));
}

#[test]
fn test_intercept_other_pragma_is_empty_on_postgres() {
    let (mut driver, log) = ScriptedDriver::postgres(|_, _| Ok(DriverOutcome::empty()));
    let outcome = intercept(&mut driver, "PRAGMA foreign_keys=ON").unwrap().unwrap();
    assert_eq!(outcome, DriverOutcome::empty());
    assert!(log.calls().is_empty());
}

#[test]
fn test_intercept_passes_everything_through_on_sqlite() {
    let mut driver = sqlite();
    assert!(intercept(&mut driver, "PRAGMA table_info(accounts)").unwrap().is_none());
    assert!(intercept(&mut driver, "PRAGMA foreign_keys=ON").unwrap().is_none());
}

#[test]
fn test_intercept_ignores_ordinary_statements() {
    let (mut driver, log) = ScriptedDriver::postgres(|_, _| Ok(DriverOutcome::empty()));
    assert!(intercept(&mut driver, "SELECT * FROM accounts").unwrap().is_none());
    assert!(log.calls().is_empty());
}

#[test]
fn test_descriptor_legacy_row() {
    let column = ColumnDescriptor {
        ordinal: 2,
        name: "qty".to_string(),
        declared_type: "INTEGER".to_string(),
        not_null: true,
        default_expr: Some("0".to_string()),
        is_primary_key: false,
    };
    let row = column.to_row();
    assert_eq!(row.keys(), ColumnDescriptor::LEGACY_KEYS.map(String::from).as_slice());
    assert_eq!(row.value_at(3).unwrap(), &Value::Integer(1));
    assert_eq!(ColumnDescriptor::from_row(&row).unwrap(), column);
}

fn run_all(driver: &mut SqliteDriver, statements: &[&str]) {
    for sql in statements {
        driver.execute(sql, &[]).unwrap();
    }
}
