use std::time::Duration;

use uuid::Uuid;

use ledger_storage::{
	Error,
	blocking::BlockingDb,
	db::{Db, FetchMode, Param, Statement},
	migrations::{self, Migration},
};
use ledger_testkit::TestDatabase;

const VECTOR_DIM: u32 = 8;

#[tokio::test]
#[ignore = "Requires external Postgres. Set LEDGER_PG_DSN to run."]
async fn pending_migrations_apply_once() {
	let Some(base_dsn) = ledger_testkit::env_dsn() else {
		eprintln!("Skipping pending_migrations_apply_once; set LEDGER_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = Db::connect(&test_db.postgres_config(2)).await.expect("Failed to connect to Postgres.");
	let before = migrations::migration_status(&db).await.expect("Failed to read status.");

	assert!(before.applied.is_empty());
	assert!(!before.database_ready);
	assert_eq!(before.pending.len(), migrations::MIGRATIONS.len());
	assert!(matches!(migrations::verify_schema(&db).await, Err(Error::SchemaNotReady(_))));

	let applied =
		migrations::run_pending_migrations(&db, VECTOR_DIM).await.expect("Failed to migrate.");

	assert_eq!(applied.len(), migrations::MIGRATIONS.len());
	assert_eq!(applied.first().map(String::as_str), Some("000"));

	let again =
		migrations::run_pending_migrations(&db, VECTOR_DIM).await.expect("Failed to re-migrate.");

	assert!(again.is_empty());

	let after = migrations::migration_status(&db).await.expect("Failed to read status.");

	assert!(after.database_ready);
	assert!(after.pending.is_empty());
	assert_eq!(after.current_version, migrations::current_version());

	migrations::verify_schema(&db).await.expect("Schema should be ready.");

	db.close().await;
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LEDGER_PG_DSN to run."]
async fn broken_migration_halts_the_queue() {
	let Some(base_dsn) = ledger_testkit::env_dsn() else {
		eprintln!("Skipping broken_migration_halts_the_queue; set LEDGER_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = Db::connect(&test_db.postgres_config(2)).await.expect("Failed to connect to Postgres.");
	let manifest = [
		Migration::new("100", "create_first", "CREATE TABLE first_table (id int)"),
		Migration::new(
			"101",
			"half_done",
			"CREATE TABLE half_done (id int); INSERT INTO missing_table VALUES (1)",
		),
		Migration::new("102", "never_reached", "CREATE TABLE never_reached (id int)"),
	];
	let err = migrations::apply_migrations(&db, &manifest, VECTOR_DIM)
		.await
		.expect_err("Broken migration must fail.");

	assert!(
		matches!(&err, Error::Migration { version, .. } if version == "101"),
		"Unexpected error: {err:?}"
	);

	let versions: Vec<String> =
		sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
			.fetch_all(&db.pool)
			.await
			.expect("Failed to read schema_migrations.");

	assert_eq!(versions, vec!["100".to_string()]);

	for (table, exists) in [("first_table", true), ("half_done", false), ("never_reached", false)] {
		let found: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
			.bind(table)
			.fetch_one(&db.pool)
			.await
			.expect("Failed to look up table.");

		assert_eq!(found, exists, "Unexpected presence for {table}.");
	}

	db.close().await;
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LEDGER_PG_DSN to run."]
async fn cancelled_migration_releases_the_lock() {
	let Some(base_dsn) = ledger_testkit::env_dsn() else {
		eprintln!("Skipping cancelled_migration_releases_the_lock; set LEDGER_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = Db::connect(&test_db.postgres_config(2)).await.expect("Failed to connect to Postgres.");
	let slow = [Migration::new("100", "slow", "SELECT pg_sleep(1)")];
	let cancelled = tokio::time::timeout(
		Duration::from_millis(200),
		migrations::apply_migrations(&db, &slow, VECTOR_DIM),
	)
	.await;

	assert!(cancelled.is_err(), "Slow migration should still be running.");

	let applied = tokio::time::timeout(
		Duration::from_secs(30),
		migrations::run_pending_migrations(&db, VECTOR_DIM),
	)
	.await
	.expect("Migration lock was not released.")
	.expect("Failed to migrate.");

	assert_eq!(applied.len(), migrations::MIGRATIONS.len());

	db.close().await;
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LEDGER_PG_DSN to run."]
async fn failed_transaction_leaves_no_rows() {
	let Some(base_dsn) = ledger_testkit::env_dsn() else {
		eprintln!("Skipping failed_transaction_leaves_no_rows; set LEDGER_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = Db::connect(&test_db.postgres_config(2)).await.expect("Failed to connect to Postgres.");

	migrations::run_pending_migrations(&db, VECTOR_DIM).await.expect("Failed to migrate.");

	let valid = Statement::with_params(
		"INSERT INTO sessions (id, user_id, state) VALUES ($1, $2, $3)",
		vec![
			Param::Uuid(Some(Uuid::new_v4())),
			Param::Text(Some("u1".to_string())),
			Param::Json(serde_json::json!({})),
		],
	);

	// The first statement must succeed on its own so the rollback below is meaningful.
	db.execute_transaction(&[valid]).await.expect("A valid session insert must commit.");

	let statements = vec![
		Statement::with_params(
			"INSERT INTO sessions (id, user_id, state) VALUES ($1, $2, $3)",
			vec![
				Param::Uuid(Some(Uuid::new_v4())),
				Param::Text(Some("u2".to_string())),
				Param::Json(serde_json::json!({})),
			],
		),
		Statement::with_params(
			"INSERT INTO sessions (id, user_id, state) VALUES ($1, $2, $3)",
			vec![
				Param::Uuid(Some(Uuid::new_v4())),
				Param::Text(None),
				Param::Json(serde_json::json!({})),
			],
		),
	];
	let err = db.execute_transaction(&statements).await.expect_err("Null user_id must fail.");

	assert!(matches!(&err, Error::Constraint(message) if message.contains("user_id")));

	let count = db
		.execute("SELECT count(*) AS n FROM sessions", &[], FetchMode::One)
		.await
		.expect("Failed to count sessions.")
		.into_row()
		.map(|row| sqlx::Row::get::<i64, _>(&row, "n"));

	assert_eq!(count, Some(1));

	db.close().await;
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[test]
#[ignore = "Requires external Postgres. Set LEDGER_PG_DSN to run."]
fn blocking_pool_migrates_and_queries() {
	let Some(base_dsn) = ledger_testkit::env_dsn() else {
		eprintln!("Skipping blocking_pool_migrates_and_queries; set LEDGER_PG_DSN to run this test.");

		return;
	};
	let runtime = tokio::runtime::Runtime::new().expect("Failed to build runtime.");
	let test_db =
		runtime.block_on(TestDatabase::new(&base_dsn)).expect("Failed to create test database.");
	let cfg = test_db.postgres_config(1);
	// The blocking pool parks this thread, so it must run outside the test runtime.
	let handle = std::thread::spawn(move || {
		let db = BlockingDb::connect(&cfg).expect("Failed to connect to Postgres.");

		db.run_pending_migrations(VECTOR_DIM).expect("Failed to migrate.");

		let status = db.migration_status().expect("Failed to read status.");
		let inserted = db
			.execute(
				"INSERT INTO sessions (id, user_id, state) VALUES ($1, $2, $3)",
				&[
					Param::Uuid(Some(Uuid::new_v4())),
					Param::Text(Some("u1".to_string())),
					Param::Json(serde_json::json!({"k": 1})),
				],
				FetchMode::None,
			)
			.expect("Failed to insert session.");

		db.close();

		(status.database_ready, inserted.rows_affected())
	});
	let (ready, inserted) = handle.join().expect("Blocking thread panicked.");

	assert!(ready);
	assert_eq!(inserted, 1);

	runtime.block_on(test_db.cleanup()).expect("Failed to cleanup test database.");
}
