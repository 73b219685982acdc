// CLI integration tests
//
// None of these reach the network or need tesseract/pdftoppm installed.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use image::{GrayImage, Luma};
use predicates::prelude::*;
use tempfile::TempDir;

fn invx(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("invx").unwrap();
    cmd.arg("-c").arg(config);
    cmd
}

/// A config file holding only defaults.
fn default_config(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{}").unwrap();
    path
}

fn write_page(path: &Path) {
    let mut img = GrayImage::from_pixel(160, 120, Luma([255]));
    for y in (20..100).step_by(15) {
        for x in 20..140 {
            img.put_pixel(x, y, Luma([0]));
            img.put_pixel(x, y + 1, Luma([0]));
        }
    }
    img.save(path).unwrap();
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("invx")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("process"))
        .stdout(predicate::str::contains("batch"))
        .stdout(predicate::str::contains("inspect"));
}

#[test]
fn test_config_init_set_get() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("nested").join("config.json");

    invx(&config).args(["config", "init"]).assert().success();
    assert!(config.exists());

    invx(&config)
        .args(["config", "set", "batch.concurrency", "8"])
        .assert()
        .success();
    invx(&config)
        .args(["config", "get", "batch.concurrency"])
        .assert()
        .success()
        .stdout(predicate::str::diff("8\n"));

    invx(&config)
        .args(["config", "set", "quality.no_such_key", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
    invx(&config)
        .args(["config", "set", "batch.concurrency", "many"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid value"));
}

#[test]
fn test_config_rejects_unusable_settings() {
    let dir = TempDir::new().unwrap();
    let config = default_config(&dir);

    invx(&config)
        .args(["config", "set", "batch.concurrency", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("batch.concurrency must be at least 1"));
    invx(&config)
        .args(["config", "set", "ocr.table_psm", "14"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ocr.table_psm"));
    invx(&config)
        .args(["config", "get", "batch.concurrency"])
        .assert()
        .success()
        .stdout(predicate::str::diff("4\n"));
    invx(&config).args(["config", "check"]).assert().success();
}

#[test]
fn test_invalid_config_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.json");
    std::fs::write(&config, r#"{"pdf": {"render_dpi": 10}, "ocr": {"language": ""}}"#).unwrap();

    invx(&config)
        .args(["config", "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("pdf.render_dpi"))
        .stderr(predicate::str::contains("ocr.language"));

    invx(&config)
        .args(["config", "set", "pdf.render_dpi", "300"])
        .assert()
        .success();
    invx(&config)
        .args(["config", "reset", "ocr.language"])
        .assert()
        .success();
    invx(&config).args(["config", "check"]).assert().success();

    std::fs::write(&config, r#"{"batch": {"concurrency": 0}}"#).unwrap();
    let page = dir.path().join("page.png");
    write_page(&page);
    invx(&config)
        .arg("inspect")
        .arg(&page)
        .assert()
        .failure()
        .stderr(predicate::str::contains("[config]"));
}

#[test]
fn test_inspect_reports_metrics() {
    let dir = TempDir::new().unwrap();
    let config = default_config(&dir);
    let page = dir.path().join("page.png");
    let cleaned = dir.path().join("cleaned.png");
    write_page(&page);

    invx(&config)
        .arg("inspect")
        .arg(&page)
        .arg("--json")
        .arg("-o")
        .arg(&cleaned)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"brightness\""))
        .stdout(predicate::str::contains("\"strategy\""));
    assert!(cleaned.exists());
}

#[test]
fn test_process_without_api_key() {
    let dir = TempDir::new().unwrap();
    let config = default_config(&dir);
    let page = dir.path().join("page.png");
    write_page(&page);

    invx(&config)
        .env_remove("GEMINI_API_KEY")
        .arg("process")
        .arg(&page)
        .assert()
        .failure()
        .stderr(predicate::str::contains("GEMINI_API_KEY"));
}

#[test]
fn test_process_unsupported_format() {
    let dir = TempDir::new().unwrap();
    let config = default_config(&dir);
    let notes = dir.path().join("notes.pdf");
    std::fs::write(&notes, "not really a pdf").unwrap();

    invx(&config)
        .env("GEMINI_API_KEY", "test-key")
        .arg("process")
        .arg(&notes)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported_format"));
}

#[test]
fn test_batch_summary_records_failures() {
    let dir = TempDir::new().unwrap();
    let config = default_config(&dir);
    let inputs = dir.path().join("in");
    let outputs = dir.path().join("out");
    std::fs::create_dir_all(&inputs).unwrap();
    for name in ["a.pdf", "b.pdf"] {
        std::fs::write(inputs.join(name), "plain text").unwrap();
    }
    let pattern = format!("{}/*.pdf", inputs.display());

    invx(&config)
        .env("GEMINI_API_KEY", "test-key")
        .args(["batch", &pattern, "--summary", "--continue-on-error", "-o"])
        .arg(&outputs)
        .assert()
        .success();

    let summary = std::fs::read_to_string(outputs.join("summary.csv")).unwrap();
    assert!(summary.starts_with("filename,status,error_kind"));
    assert_eq!(summary.matches("unsupported_format").count(), 2);

    invx(&config)
        .env("GEMINI_API_KEY", "test-key")
        .args(["batch", &pattern])
        .assert()
        .failure()
        .stderr(predicate::str::contains("2 of 2 files failed"));
}

#[test]
fn test_batch_summary_follows_input_order() {
    let dir = TempDir::new().unwrap();
    let config = default_config(&dir);
    let inputs = dir.path().join("in");
    std::fs::create_dir_all(inputs.join("b.pdf")).unwrap();
    for name in ["a.pdf", "c.pdf"] {
        std::fs::write(inputs.join(name), "plain text").unwrap();
    }
    let pattern = format!("{}/*.pdf", inputs.display());
    let outputs = dir.path().join("out");

    invx(&config)
        .env("GEMINI_API_KEY", "test-key")
        .args(["batch", &pattern, "--summary", "--continue-on-error", "-o"])
        .arg(&outputs)
        .assert()
        .success();

    // b.pdf is a directory and cannot be read, yet keeps its place.
    let summary = std::fs::read_to_string(outputs.join("summary.csv")).unwrap();
    let names: Vec<&str> = summary
        .lines()
        .skip(1)
        .filter_map(|line| line.split(',').next())
        .collect();
    assert_eq!(names, vec!["a.pdf", "b.pdf", "c.pdf"]);
}

#[test]
fn test_batch_without_matches() {
    let dir = TempDir::new().unwrap();
    let config = default_config(&dir);
    let pattern = format!("{}/*.pdf", dir.path().display());

    invx(&config)
        .args(["batch", &pattern])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No matching files"));
}

#[test]
fn test_doctor_json() {
    let dir = TempDir::new().unwrap();
    let config = default_config(&dir);

    invx(&config)
        .args(["doctor", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"tesseract\""))
        .stdout(predicate::str::contains("\"api key\""));
}
