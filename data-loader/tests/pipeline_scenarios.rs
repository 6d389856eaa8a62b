//! Pipeline scenarios
//!
//! These tests drive the whole pipeline over real files against an
//! in-memory store that records what the database would have seen.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use data_loader::preprocess::cleaned_path_for;
use data_loader::storage::{PoolStats, StorageResult};
use data_loader::{
    CleanedFile, LoadError, Pipeline, PipelineError, PipelineOptions, PipelineStore, PriceLoader,
    ReferenceError, SymbolInfo,
};

const PRICE_HEADER: &str = "Date,Open,High,Low,Close,Adj Close,Volume";
const METADATA_HEADER: &str = "Nasdaq Traded,Symbol,Security Name,Listing Exchange,Market Category,ETF,Round Lot Size,Test Issue,Financial Status,CQS Symbol,NASDAQ Symbol,NextShares";

/// Store double keeping loaded rows and the order of structural calls
#[derive(Default)]
struct MemoryStore {
    price_rows: Mutex<Vec<Vec<String>>>,
    symbol_info: Mutex<Vec<SymbolInfo>>,
    events: Mutex<Vec<&'static str>>,
    bulk_mode: AtomicBool,
    loads_outside_bulk_mode: Mutex<usize>,
    fail_symbol: Option<String>,
}

impl MemoryStore {
    fn failing_on(symbol: &str) -> Self {
        Self {
            fail_symbol: Some(symbol.to_string()),
            ..Default::default()
        }
    }

    fn events(&self) -> Vec<&'static str> {
        self.events.lock().clone()
    }

    fn price_row_count(&self) -> usize {
        self.price_rows.lock().len()
    }
}

#[async_trait]
impl PriceLoader for MemoryStore {
    async fn load_cleaned_file(&self, file: &CleanedFile) -> Result<u64, LoadError> {
        if !self.bulk_mode.load(Ordering::SeqCst) {
            *self.loads_outside_bulk_mode.lock() += 1;
        }
        if self.fail_symbol.as_deref() == Some(file.symbol.as_str()) {
            return Err(LoadError::Rejected(format!(
                "invalid input syntax in {}",
                file.symbol
            )));
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&file.path)
            .map_err(|e| LoadError::Rejected(e.to_string()))?;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| LoadError::Rejected(e.to_string()))?;
            rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
        }

        let count = rows.len() as u64;
        self.price_rows.lock().extend(rows);
        Ok(count)
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn recreate_tables(&self) -> StorageResult<()> {
        self.price_rows.lock().clear();
        self.symbol_info.lock().clear();
        self.events.lock().push("recreate_tables");
        Ok(())
    }

    async fn enable_bulk_mode(&self) -> StorageResult<()> {
        self.bulk_mode.store(true, Ordering::SeqCst);
        self.events.lock().push("enable_bulk_mode");
        Ok(())
    }

    async fn restore_session_settings(&self) -> StorageResult<()> {
        self.bulk_mode.store(false, Ordering::SeqCst);
        self.events.lock().push("restore_session_settings");
        Ok(())
    }

    async fn replace_symbol_info(&self, rows: &[SymbolInfo]) -> Result<u64, ReferenceError> {
        *self.symbol_info.lock() = rows.to_vec();
        self.events.lock().push("replace_symbol_info");
        Ok(rows.len() as u64)
    }

    async fn create_price_index(&self) -> StorageResult<()> {
        self.events.lock().push("create_price_index");
        Ok(())
    }

    fn pool_stats(&self) -> Option<PoolStats> {
        Some(PoolStats { size: 4, idle: 4 })
    }
}

struct Fixture {
    _dir: TempDir,
    prices_dir: PathBuf,
    metadata_file: PathBuf,
}

impl Fixture {
    /// AAA, BBB and CCC with 7 good rows each, DDD with every open missing
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let prices_dir = dir.path().join("stocks");
        fs::create_dir(&prices_dir).unwrap();

        for symbol in ["AAA", "BBB", "CCC"] {
            write_prices(&prices_dir, symbol, |day| {
                format!("2020-01-{:02},10.0,11.0,9.5,10.5,10.4,{}.0", day, 1000 + day)
            });
        }
        write_prices(&prices_dir, "DDD", |day| {
            format!("2020-01-{:02},,11.0,9.5,10.5,10.4,500", day)
        });

        let metadata_file = dir.path().join("symbols_valid_meta.csv");
        let body: Vec<String> = ["AAA", "BBB", "CCC", "DDD", "EEE"]
            .iter()
            .map(|s| format!("Y,{s},{s} Corp Common Stock,N, ,N,100.0,N,,{s},{s},N"))
            .collect();
        fs::write(
            &metadata_file,
            format!("{}\n{}\n", METADATA_HEADER, body.join("\n")),
        )
        .unwrap();

        Self {
            _dir: dir,
            prices_dir,
            metadata_file,
        }
    }

    fn options(&self) -> PipelineOptions {
        PipelineOptions {
            prices_dir: self.prices_dir.clone(),
            metadata_file: self.metadata_file.clone(),
            workers: 2,
            max_concurrent_loads: 4,
        }
    }

    fn raw(&self, symbol: &str) -> PathBuf {
        self.prices_dir.join(format!("{}.csv", symbol))
    }
}

fn write_prices(dir: &Path, symbol: &str, row: impl Fn(u32) -> String) {
    let mut contents = format!("{}\n", PRICE_HEADER);
    for day in 1..=7 {
        contents.push_str(&row(day));
        contents.push('\n');
    }
    fs::write(dir.join(format!("{}.csv", symbol)), contents).unwrap();
}

#[tokio::test]
async fn test_full_run_loads_prices_and_symbol_info() {
    let fixture = Fixture::new();
    let store = Arc::new(MemoryStore::default());

    let report = Pipeline::new(Arc::clone(&store), fixture.options())
        .run()
        .await
        .unwrap();

    assert_eq!(report.files_discovered, 4);
    assert_eq!(report.files_committed, 3);
    assert_eq!(report.files_empty, 1);
    assert_eq!(report.price_rows, 21);
    assert_eq!(report.rows_dropped, 7);
    assert_eq!(report.symbol_info_rows, 5);
    assert_eq!(store.price_row_count(), 21);

    let stages: Vec<_> = report.stages.iter().map(|s| s.stage).collect();
    assert_eq!(
        stages,
        vec!["recreate_tables", "preprocess", "insert_prices", "load_symbol_info", "create_index"]
    );
    assert_eq!(
        store.events(),
        vec![
            "recreate_tables",
            "enable_bulk_mode",
            "restore_session_settings",
            "replace_symbol_info",
            "create_price_index",
        ]
    );
    assert_eq!(*store.loads_outside_bulk_mode.lock(), 0);
}

#[tokio::test]
async fn test_cleaned_rows_carry_symbol_and_integer_volume() {
    let fixture = Fixture::new();
    let store = Arc::new(MemoryStore::default());

    Pipeline::new(Arc::clone(&store), fixture.options())
        .run()
        .await
        .unwrap();

    let rows = store.price_rows.lock();
    let aaa: Vec<_> = rows.iter().filter(|r| r[7] == "AAA").collect();
    assert_eq!(aaa.len(), 7);
    assert!(rows.iter().all(|r| r.len() == 8));
    assert_eq!(aaa[0][6], "1001");
    assert!(rows.iter().all(|r| r[7] != "DDD"));
}

#[tokio::test]
async fn test_header_only_file_is_kept_and_loaded_files_removed() {
    let fixture = Fixture::new();
    let store = Arc::new(MemoryStore::default());

    Pipeline::new(Arc::clone(&store), fixture.options())
        .run()
        .await
        .unwrap();

    let ddd_cleaned = cleaned_path_for(&fixture.raw("DDD"));
    let contents = fs::read_to_string(&ddd_cleaned).unwrap();
    assert_eq!(contents.trim_end(), PRICE_HEADER);

    for symbol in ["AAA", "BBB", "CCC"] {
        assert!(!cleaned_path_for(&fixture.raw(symbol)).exists());
    }
}

#[tokio::test]
async fn test_symbol_info_ids_are_unique() {
    let fixture = Fixture::new();
    let store = Arc::new(MemoryStore::default());

    Pipeline::new(Arc::clone(&store), fixture.options())
        .run()
        .await
        .unwrap();

    let info = store.symbol_info.lock();
    assert_eq!(info.len(), 5);
    let ids: std::collections::HashSet<_> = info.iter().map(|i| i.symbol_uuid).collect();
    assert_eq!(ids.len(), 5);
    assert!(info.iter().all(|i| !i.symbol_uuid.to_string().is_empty()));
    assert_eq!(info[2].name, "CCC Corp Common Stock");
}

#[tokio::test]
async fn test_failed_load_stops_before_index() {
    let fixture = Fixture::new();
    let store = Arc::new(MemoryStore::failing_on("BBB"));

    let err = Pipeline::new(Arc::clone(&store), fixture.options())
        .run()
        .await
        .unwrap_err();

    match err {
        PipelineError::BatchFailed { failures, total } => {
            assert_eq!(total, 4);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].file.symbol, "BBB");
        }
        other => panic!("unexpected error: {other}"),
    }

    let events = store.events();
    assert!(events.contains(&"restore_session_settings"));
    assert!(!events.contains(&"replace_symbol_info"));
    assert!(!events.contains(&"create_price_index"));
    assert!(!store.bulk_mode.load(Ordering::SeqCst));

    // The failed file stays for inspection
    assert!(cleaned_path_for(&fixture.raw("BBB")).exists());
    assert!(!cleaned_path_for(&fixture.raw("AAA")).exists());
}

#[tokio::test]
async fn test_leftover_cleaned_files_are_not_reloaded() {
    let fixture = Fixture::new();
    fs::write(
        cleaned_path_for(&fixture.raw("ZZZ")),
        format!("{}\n2020-01-01,1,1,1,1,1,1,ZZZ\n", PRICE_HEADER),
    )
    .unwrap();
    let store = Arc::new(MemoryStore::default());

    let report = Pipeline::new(Arc::clone(&store), fixture.options())
        .run()
        .await
        .unwrap();

    assert_eq!(report.files_discovered, 4);
    assert_eq!(store.price_row_count(), 21);
}

#[tokio::test]
async fn test_bad_metadata_aborts_before_index() {
    let fixture = Fixture::new();
    fs::write(
        &fixture.metadata_file,
        format!("{}\nY,AAA,Short Row\n", METADATA_HEADER),
    )
    .unwrap();
    let store = Arc::new(MemoryStore::default());

    let err = Pipeline::new(Arc::clone(&store), fixture.options())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Reference(ReferenceError::FieldCount { found: 3, .. })
    ));
    assert!(!store.events().contains(&"create_price_index"));
}

#[tokio::test]
async fn test_missing_prices_dir_is_fatal() {
    let fixture = Fixture::new();
    let mut options = fixture.options();
    options.prices_dir = fixture.prices_dir.join("missing");
    let store = Arc::new(MemoryStore::default());

    let err = Pipeline::new(Arc::clone(&store), options)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Discovery { .. }));
    assert_eq!(store.events(), vec!["recreate_tables"]);
}

/// Round trip against a real server. Drops and recreates `stocks` and
/// `stocks_info` in the target database.
#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a disposable PostgreSQL database"]
async fn test_postgres_round_trip() {
    use data_loader::config::DatabaseSettings;
    use data_loader::storage::CopySource;
    use data_loader::PgStore;

    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
    let settings = DatabaseSettings {
        url,
        max_connections: Some(4),
        ..Default::default()
    };
    let store = Arc::new(PgStore::connect(&settings, CopySource::Stdin).await.unwrap());
    let fixture = Fixture::new();

    let report = Pipeline::new(Arc::clone(&store), fixture.options())
        .run()
        .await
        .unwrap();

    assert_eq!(report.price_rows, 21);
    assert_eq!(store.count_price_rows().await.unwrap(), 21);
    store.close().await;
}

/// Load transactions run in replica mode while bulk mode is on, so a
/// rejecting row trigger on `stocks` only fires once bulk mode is released.
#[tokio::test]
#[ignore = "requires DATABASE_URL for a disposable PostgreSQL database and a superuser role"]
async fn test_postgres_bulk_mode_suppresses_triggers() {
    use data_loader::config::DatabaseSettings;
    use data_loader::preprocess::preprocess_file;
    use data_loader::storage::CopySource;
    use data_loader::PgStore;

    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
    let settings = DatabaseSettings {
        url,
        max_connections: Some(2),
        ..Default::default()
    };
    let store = PgStore::connect(&settings, CopySource::Stdin).await.unwrap();
    let fixture = Fixture::new();
    let cleaned = preprocess_file(&fixture.raw("AAA"), "AAA").unwrap();

    store.recreate_tables().await.unwrap();
    sqlx::query(
        "CREATE OR REPLACE FUNCTION reject_price_insert() RETURNS trigger AS $$ \
         BEGIN RAISE EXCEPTION 'price trigger fired'; END; $$ LANGUAGE plpgsql",
    )
    .execute(store.pool())
    .await
    .unwrap();
    sqlx::query(
        "CREATE TRIGGER reject_price_insert BEFORE INSERT ON stocks \
         FOR EACH ROW EXECUTE FUNCTION reject_price_insert()",
    )
    .execute(store.pool())
    .await
    .unwrap();

    store.enable_bulk_mode().await.unwrap();
    let rows = store.load_cleaned_file(&cleaned).await.unwrap();
    store.restore_session_settings().await.unwrap();
    assert_eq!(rows, 7);

    // Outside bulk mode the same load hits the trigger and rolls back
    let err = store.load_cleaned_file(&cleaned).await.unwrap_err();
    assert!(err.to_string().contains("price trigger fired"));
    assert_eq!(store.count_price_rows().await.unwrap(), 7);

    sqlx::query("DROP FUNCTION reject_price_insert() CASCADE")
        .execute(store.pool())
        .await
        .unwrap();
    store.close().await;
}
