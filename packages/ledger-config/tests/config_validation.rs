use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use toml::Value;

use ledger_config::{Config, Error};

const SAMPLE_CONFIG_TEMPLATE_TOML: &str = include_str!("fixtures/sample_config.template.toml");

fn sample_toml_with<F>(edit: F) -> String
where
	F: FnOnce(&mut toml::Table),
{
	let mut value: Value =
		toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse template config.");
	let root = value.as_table_mut().expect("Template config must be a table.");

	edit(root);

	toml::to_string(&value).expect("Failed to render template config.")
}

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("ledger_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn assert_invalid(err: &Error, expected_key: &str) {
	assert!(
		matches!(err, Error::Validation { key, .. } if key == expected_key),
		"Unexpected error: {err:?}"
	);
}

fn base_config() -> Config {
	toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse test config.")
}

#[test]
fn sample_config_loads_and_normalizes() {
	let path = write_temp_config(SAMPLE_CONFIG_TEMPLATE_TOML.to_string());
	let result = ledger_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let cfg = result.expect("Expected sample config to load.");
	let embedding = cfg.providers.embedding.expect("Expected embedding provider.");

	assert_eq!(cfg.storage.postgres.pool_max_conns, 20);
	assert_eq!(cfg.memory.vector_dim, 384);
	assert_eq!(embedding.api_base, "https://api.openai.com");
}

#[test]
fn optional_sections_fall_back_to_defaults() {
	let payload = sample_toml_with(|root| {
		root.remove("service");
		root.remove("memory");
		root.remove("providers");
	});
	let path = write_temp_config(payload);
	let result = ledger_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let cfg = result.expect("Expected minimal config to load.");

	assert_eq!(cfg.service.log_level, "info");
	assert_eq!(cfg.memory.vector_dim, 384);
	assert!(cfg.providers.embedding.is_none());
}

#[test]
fn missing_file_reports_read_error() {
	let mut path = env::temp_dir();

	path.push("ledger_config_test_missing_file.toml");

	let err = ledger_config::load(&path).expect_err("Expected read error.");

	assert!(matches!(err, Error::ReadConfig { .. }), "Unexpected error: {err:?}");
}

#[test]
fn malformed_toml_reports_parse_error() {
	let path = write_temp_config("[storage.postgres\ndsn = ".to_string());
	let result = ledger_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let err = result.expect_err("Expected parse error.");

	assert!(matches!(err, Error::ParseConfig { .. }), "Unexpected error: {err:?}");
}

#[test]
fn pool_max_conns_must_be_positive() {
	let mut cfg = base_config();

	cfg.storage.postgres.pool_max_conns = 0;
	cfg.storage.postgres.pool_min_conns = 0;

	let err = ledger_config::validate(&cfg).expect_err("Expected pool validation error.");

	assert_invalid(&err, "storage.postgres.pool_max_conns");
	assert_eq!(
		err.to_string(),
		"Invalid storage.postgres.pool_max_conns: must be greater than zero."
	);
}

#[test]
fn pool_min_conns_must_not_exceed_max() {
	let mut cfg = base_config();

	cfg.storage.postgres.pool_min_conns = 21;

	let err = ledger_config::validate(&cfg).expect_err("Expected pool bound validation error.");

	assert_invalid(&err, "storage.postgres.pool_min_conns");
	assert!(err.to_string().contains("21 exceeds pool_max_conns (20)."), "Unexpected error: {err}");
}

#[test]
fn embedding_dimensions_must_match_vector_dim() {
	let mut cfg = base_config();

	cfg.memory.vector_dim = 768;

	let err = ledger_config::validate(&cfg).expect_err("Expected dimension validation error.");

	assert_invalid(&err, "providers.embedding.dimensions");
	assert!(err.to_string().contains("(768)"), "Unexpected error: {err}");
}

#[test]
fn embedding_api_key_must_be_non_empty() {
	let payload = sample_toml_with(|root| {
		let embedding = root
			.get_mut("providers")
			.and_then(Value::as_table_mut)
			.and_then(|providers| providers.get_mut("embedding"))
			.and_then(Value::as_table_mut)
			.expect("Template config must include [providers.embedding].");

		embedding.insert("api_key".to_string(), Value::String("   ".to_string()));
	});
	let path = write_temp_config(payload);
	let result = ledger_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let err = result.expect_err("Expected api_key validation error.");

	assert_invalid(&err, "providers.embedding.api_key");
}

#[test]
fn default_headers_must_be_strings() {
	let mut cfg = base_config();
	let embedding = cfg.providers.embedding.as_mut().expect("Expected embedding provider.");

	embedding.default_headers.insert("x-retries".to_string(), serde_json::json!(3));

	let err = ledger_config::validate(&cfg).expect_err("Expected header validation error.");

	assert_invalid(&err, "providers.embedding.default_headers.x-retries");
	assert!(err.to_string().ends_with("must be a string, got 3."), "Unexpected error: {err}");
}
