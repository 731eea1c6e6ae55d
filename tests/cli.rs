use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn shelf_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("shelf");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/shelf.sqlite"

[github]
token_env = "STARSHELF_TEST_UNSET_TOKEN"
max_retries = 0

[enrichment]
chunk_size = 2

[retrieval]
final_limit = 5
"#,
        root.display()
    );

    let config_path = config_dir.join("shelf.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_shelf(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = shelf_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("STARSHELF_TEST_UNSET_TOKEN")
        .env("RUST_LOG", "off")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run shelf binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn bundle_json(version: u32) -> String {
    format!(
        r#"{{
  "version": {version},
  "exported_at": "2026-01-01T00:00:00Z",
  "items": [
    {{
      "id": 1, "name": "ripgrep", "full_name": "BurntSushi/ripgrep", "owner": "BurntSushi",
      "description": "recursively search directories for a regex pattern",
      "stargazers": 50000,
      "starred_at": "2025-06-01T00:00:00Z", "updated_at": "2025-06-01T00:00:00Z"
    }},
    {{
      "id": 2, "name": "fd", "full_name": "sharkdp/fd", "owner": "sharkdp",
      "description": "a simple fast alternative to find",
      "starred_at": "2025-05-01T00:00:00Z", "updated_at": "2025-05-01T00:00:00Z"
    }},
    {{
      "id": 3, "name": "bat", "full_name": "sharkdp/bat", "owner": "sharkdp",
      "description": "a cat clone with wings",
      "starred_at": "2025-04-01T00:00:00Z", "updated_at": "2025-04-01T00:00:00Z"
    }}
  ],
  "jobs": [],
  "settings": [{{ "key": "profile_login", "value": "octo" }}]
}}"#
    )
}

fn import_fixture(tmp: &TempDir, config_path: &Path) {
    let file = tmp.path().join("bundle.json");
    fs::write(&file, bundle_json(1)).unwrap();
    let (stdout, stderr, success) = run_shelf(config_path, &["import", file.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Imported 3 items"), "stdout={}", stdout);
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_shelf(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_shelf(&config_path, &["init"]);
    assert!(first, "First init failed");
    let (_, _, second) = run_shelf(&config_path, &["init"]);
    assert!(second, "Second init failed (not idempotent)");
}

#[test]
fn test_search_empty_shelf() {
    let (_tmp, config_path) = setup_test_env();
    run_shelf(&config_path, &["init"]);

    let (stdout, stderr, success) = run_shelf(&config_path, &["search", "anything"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_status_empty_shelf() {
    let (_tmp, config_path) = setup_test_env();
    run_shelf(&config_path, &["init"]);

    let (stdout, stderr, success) = run_shelf(&config_path, &["status"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("items: 0"));
    assert!(stdout.contains("job: none"));
    assert!(stdout.contains("last sync: never"));
}

#[test]
fn test_import_then_search_ranks_exact_name_first() {
    let (tmp, config_path) = setup_test_env();
    run_shelf(&config_path, &["init"]);
    import_fixture(&tmp, &config_path);

    let (stdout, stderr, success) = run_shelf(&config_path, &["search", "ripgrep"]);
    assert!(success, "search failed: {}", stderr);
    let first = stdout.lines().next().unwrap_or_default();
    assert!(first.starts_with("1. BurntSushi/ripgrep"), "stdout={}", stdout);
}

#[test]
fn test_search_json_output() {
    let (tmp, config_path) = setup_test_env();
    run_shelf(&config_path, &["init"]);
    import_fixture(&tmp, &config_path);

    let (stdout, stderr, success) =
        run_shelf(&config_path, &["search", "cat clone", "--json", "--explain"]);
    assert!(success, "search failed: {}", stderr);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["reset"], false);
    let items = parsed["items"].as_array().unwrap();
    assert_eq!(items[0]["item"]["name"], "bat");
    assert!(items[0]["explain"]["hard_priority"].is_number());
}

#[test]
fn test_empty_query_lists_catalog() {
    let (tmp, config_path) = setup_test_env();
    run_shelf(&config_path, &["init"]);
    import_fixture(&tmp, &config_path);

    let (stdout, _, success) = run_shelf(&config_path, &["search", "", "--json"]);
    assert!(success);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["reset"], true);
    assert_eq!(parsed["items"].as_array().unwrap().len(), 3);
}

#[test]
fn test_export_roundtrip() {
    let (tmp, config_path) = setup_test_env();
    run_shelf(&config_path, &["init"]);
    import_fixture(&tmp, &config_path);

    let out = tmp.path().join("export.json");
    let (_, stderr, success) =
        run_shelf(&config_path, &["export", "--output", out.to_str().unwrap()]);
    assert!(success, "export failed: {}", stderr);

    let exported: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(exported["version"], 1);
    assert_eq!(exported["items"].as_array().unwrap().len(), 3);
    assert_eq!(exported["settings"][0]["value"], "octo");

    let (stdout, _, success) = run_shelf(&config_path, &["import", out.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("Imported 3 items"));
}

#[test]
fn test_import_rejects_other_versions() {
    let (tmp, config_path) = setup_test_env();
    run_shelf(&config_path, &["init"]);
    import_fixture(&tmp, &config_path);

    let file = tmp.path().join("future.json");
    fs::write(&file, bundle_json(2)).unwrap();
    let (_, stderr, success) = run_shelf(&config_path, &["import", file.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("unsupported backup version"), "stderr={}", stderr);

    let (stdout, _, _) = run_shelf(&config_path, &["status"]);
    assert!(stdout.contains("items: 3"));
}

#[test]
fn test_enrich_without_token_keeps_job() {
    let (tmp, config_path) = setup_test_env();
    run_shelf(&config_path, &["init"]);
    import_fixture(&tmp, &config_path);

    let (_, stderr, success) = run_shelf(&config_path, &["enrich", "--progress", "off"]);
    assert!(!success);
    assert!(stderr.contains("authentication failed"), "stderr={}", stderr);

    let (stdout, _, _) = run_shelf(&config_path, &["status"]);
    assert!(stdout.contains("pending: 3"), "stdout={}", stdout);
    assert!(stdout.contains("0/3 done"), "stdout={}", stdout);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_, stderr, success) = run_shelf(&missing, &["status"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
