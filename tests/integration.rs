use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn dmind_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("dmind");
    path
}

fn docx(text: &str) -> Vec<u8> {
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
        text
    );
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

/// Temp root with `files/`, a config pointing the index at `data/index`, and
/// a `sh` worker whose health reply is `check_line`.
fn setup_test_env(check_line: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("sky.txt"), "The sky is blue. Water is wet.").unwrap();
    fs::write(
        files_dir.join("notes.docx"),
        docx("Cargo builds crates and resolves dependencies."),
    )
    .unwrap();
    fs::write(files_dir.join("broken.pdf"), "%PDF-1.4 truncated").unwrap();

    let worker = root.join("worker.sh");
    fs::write(
        &worker,
        format!(
            "#!/bin/sh\n\
             for arg in \"$@\"; do\n\
               if [ \"$arg\" = \"--check\" ]; then echo '{}'; exit 0; fi\n\
             done\n\
             case \"$(cat)\" in\n\
               *'\"mode\":\"summary\"'*) echo '{{\"ok\":true,\"answer\":\"A note about the sky.\"}}' ;;\n\
               *) echo '{{\"ok\":true,\"answer\":\"The sky is blue [1].\"}}' ;;\n\
             esac\n",
            check_line
        ),
    )
    .unwrap();

    let config_content = format!(
        r#"[index]
dir = "{}/data/index"

[chunking]
chunk_size = 200
chunk_overlap = 20

[retrieval]
k = 4

[generation]
command = ["sh", "{}"]
timeout_secs = 10
check_timeout_secs = 5
"#,
        root.display(),
        worker.display()
    );

    let config_path = root.join("documind.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_dmind(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = dmind_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run dmind binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn index_files(tmp: &TempDir, config: &Path) -> String {
    let files = tmp.path().join("files");
    let (stdout, stderr, success) = run_dmind(config, &["index", files.to_str().unwrap()]);
    assert!(success, "index failed: {}", stderr);
    stdout
}

#[test]
fn test_index_reports_each_file() {
    let (tmp, config) = setup_test_env(r#"{"ok":true}"#);
    let stdout = index_files(&tmp, &config);

    assert!(stdout.contains("indexed  sky.txt"), "stdout: {}", stdout);
    assert!(stdout.contains("indexed  notes.docx"), "stdout: {}", stdout);
    assert!(stdout.contains("failed   broken.pdf"), "stdout: {}", stdout);
    assert!(stdout.contains("documents: 2"), "stdout: {}", stdout);
}

#[test]
fn test_search_finds_indexed_text() {
    let (tmp, config) = setup_test_env(r#"{"ok":true}"#);
    index_files(&tmp, &config);

    let (stdout, _, success) = run_dmind(&config, &["search", "sky blue", "--k", "1"]);
    assert!(success);
    assert!(stdout.contains("sky.txt (page 1"), "stdout: {}", stdout);
    assert!(!stdout.contains("notes.docx"), "stdout: {}", stdout);
}

#[test]
fn test_ask_prints_cited_sources() {
    let (tmp, config) = setup_test_env(r#"{"ok":true}"#);
    index_files(&tmp, &config);

    let (stdout, stderr, success) = run_dmind(&config, &["ask", "What color is the sky?"]);
    assert!(success, "ask failed: {}", stderr);
    assert!(stdout.contains("The sky is blue [1]."), "stdout: {}", stdout);
    assert!(stdout.contains("Sources:"), "stdout: {}", stdout);
    assert!(stdout.contains("1. sky.txt (page 1)"), "stdout: {}", stdout);
}

#[test]
fn test_ask_on_empty_index() {
    let (_tmp, config) = setup_test_env(r#"{"ok":true}"#);

    let (stdout, _, success) = run_dmind(&config, &["ask", "What color is the sky?", "--json"]);
    assert!(success);
    let answer: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(
        answer["text"],
        documind_core::prompt::NO_CONTEXT_ANSWER
    );
    assert_eq!(answer["citations"], serde_json::json!([]));
}

#[test]
fn test_summarize_prints_the_summary() {
    let (tmp, config) = setup_test_env(r#"{"ok":true}"#);
    let file = tmp.path().join("files/sky.txt");

    let (stdout, stderr, success) = run_dmind(&config, &["summarize", file.to_str().unwrap()]);
    assert!(success, "summarize failed: {}", stderr);
    assert_eq!(stdout.trim(), "A note about the sky.");

    let (stdout, _, success) =
        run_dmind(&config, &["summarize", file.to_str().unwrap(), "--json"]);
    assert!(success);
    let out: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(out["document_name"], "sky.txt");
    assert_eq!(out["summary"], "A note about the sky.");

    // Summaries never touch the index.
    let (stdout, _, _) = run_dmind(&config, &["status"]);
    assert!(stdout.contains("entries: 0"), "stdout: {}", stdout);
}

#[test]
fn test_summarize_unreadable_pdf_fails() {
    let (tmp, config) = setup_test_env(r#"{"ok":true}"#);
    let file = tmp.path().join("files/broken.pdf");
    let (_, stderr, success) = run_dmind(&config, &["summarize", file.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("extraction failed"), "stderr: {}", stderr);
}

#[test]
fn test_status_lists_documents() {
    let (tmp, config) = setup_test_env(r#"{"ok":true}"#);
    index_files(&tmp, &config);

    let (stdout, _, success) = run_dmind(&config, &["status"]);
    assert!(success);
    assert!(stdout.contains("documents: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("sky.txt"), "stdout: {}", stdout);
    assert!(stdout.contains("generation: ok"), "stdout: {}", stdout);
}

#[test]
fn test_check_exit_code_follows_health() {
    let (_tmp, config) = setup_test_env(r#"{"ok":true}"#);
    let (stdout, _, success) = run_dmind(&config, &["check"]);
    assert!(success);
    assert!(stdout.contains(r#"{"ok":true}"#));

    let (_tmp, config) = setup_test_env(r#"{"ok":false,"error":"ollama is not running"}"#);
    let (stdout, _, success) = run_dmind(&config, &["check"]);
    assert!(!success);
    assert!(stdout.contains("ollama is not running"), "stdout: {}", stdout);
}

#[test]
fn test_reset_clears_index() {
    let (tmp, config) = setup_test_env(r#"{"ok":true}"#);
    index_files(&tmp, &config);

    let (_, _, success) = run_dmind(&config, &["reset"]);
    assert!(success);

    let (stdout, _, success) = run_dmind(&config, &["search", "sky"]);
    assert!(success);
    assert!(stdout.contains("No results."), "stdout: {}", stdout);
}

#[test]
fn test_changing_embedding_width_requires_reset() {
    let (tmp, config) = setup_test_env(r#"{"ok":true}"#);
    index_files(&tmp, &config);

    let (stdout, _, _) = run_dmind(&config, &["status"]);
    assert!(stdout.contains("embedding: hash (384 dims)"), "stdout: {}", stdout);

    let wider = tmp.path().join("wider.toml");
    let content = fs::read_to_string(&config).unwrap() + "\n[embedding]\ndims = 128\n";
    fs::write(&wider, content).unwrap();

    let (_, stderr, success) = run_dmind(&wider, &["search", "sky"]);
    assert!(!success);
    assert!(stderr.contains("reset the index"), "stderr: {}", stderr);

    let (_, _, success) = run_dmind(&wider, &["reset"]);
    assert!(success);
    let (stdout, _, success) = run_dmind(&wider, &["search", "sky"]);
    assert!(success);
    assert!(stdout.contains("No results."), "stdout: {}", stdout);
}

#[test]
fn test_reset_refuses_a_foreign_directory() {
    let (tmp, _) = setup_test_env(r#"{"ok":true}"#);
    let foreign = tmp.path().join("files");
    let config = tmp.path().join("foreign.toml");
    fs::write(
        &config,
        format!("[index]\ndir = \"{}\"\n", foreign.display()),
    )
    .unwrap();

    let (_, stderr, success) = run_dmind(&config, &["reset"]);
    assert!(!success);
    assert!(stderr.contains("not a documind index"), "stderr: {}", stderr);
    assert!(foreign.join("sky.txt").exists());
}

#[test]
fn test_corrupt_manifest_is_recovered() {
    let (tmp, config) = setup_test_env(r#"{"ok":true}"#);
    index_files(&tmp, &config);

    let manifest = tmp.path().join("data/index/MANIFEST.json");
    assert!(manifest.exists());
    fs::write(&manifest, "{ not json").unwrap();

    let (stdout, stderr, success) = run_dmind(&config, &["status"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("recovered from corruption"), "stdout: {}", stdout);
    assert!(stdout.contains("entries: 0"), "stdout: {}", stdout);
}
