#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

mod common;

use assert_cmd::Command;
use common::TestProject;
use predicates::prelude::*;

const IMAGES: &str = r#"
images:
  - name: base
  - name: nova-base
    parent: base
  - name: nova-api
    parent: nova-base
  - name: keystone
    parent: base
"#;

fn kiln(project: &TestProject) -> Command {
    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.current_dir(project.path())
        .env_remove("KILN_TARGETS_PATH")
        .env_remove("KILN_NAMESPACE")
        .env_remove("KILN_PUSH")
        .env_remove("KILN_REGISTRY_USERNAME")
        .env_remove("KILN_REGISTRY_PASSWORD");
    cmd
}

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("render"))
        .stdout(predicate::str::contains("df"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("kilnflow"));
}

#[test]
fn test_build_help_lists_config_flags() {
    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.arg("build")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--install-mode"))
        .stdout(predicate::str::contains("--push-threads"))
        .stdout(predicate::str::contains("--logs-dir"))
        .stdout(predicate::str::contains("KILN_REGISTRY_PASSWORD"));
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

#[test]
fn test_render_prints_engine_config() {
    let project = TestProject::new();
    kiln(&project)
        .args(["render", "--namespace", "acme", "--tag", "2024.1", "--push"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[DEFAULT]"))
        .stdout(predicate::str::contains("namespace = acme"))
        .stdout(predicate::str::contains("tag = 2024.1"));
}

#[test]
fn test_render_rejects_empty_namespace() {
    let project = TestProject::new();
    kiln(&project)
        .args(["render", "--namespace", "  "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("エラー"));
}

#[test]
fn test_render_rejects_zero_threads() {
    let project = TestProject::new();
    kiln(&project)
        .args(["render", "--threads", "0"])
        .assert()
        .failure();
}

#[test]
fn test_render_rejects_unknown_install_mode() {
    let project = TestProject::new();
    kiln(&project)
        .args(["render", "--install-mode", "rpm"])
        .assert()
        .failure();
}

#[test]
fn test_list_in_build_order() {
    let project = TestProject::new();
    project.write_images_yaml(IMAGES);

    let output = kiln(&project).arg("list").assert().success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();

    let base = stdout.find("base").unwrap();
    let nova_api = stdout.find("nova-api").unwrap();
    assert!(base < nova_api);
    assert!(stdout.contains("keystone"));
}

#[test]
fn test_list_filter_includes_ancestors() {
    let project = TestProject::new();
    project.write_images_yaml(IMAGES);

    kiln(&project)
        .args(["list", "^nova-api$"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nova-base"))
        .stdout(predicate::str::contains("keystone").not());
}

#[test]
fn test_list_without_targets_file() {
    let project = TestProject::new();
    kiln(&project)
        .env("XDG_CONFIG_HOME", project.path().join("xdg"))
        .env("HOME", project.path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("images.yaml"));
}

#[test]
fn test_list_rejects_cycle() {
    let project = TestProject::new();
    project.write_images_yaml(
        r#"
images:
  - name: a
    parent: b
  - name: b
    parent: a
"#,
    );

    kiln(&project).arg("list").assert().failure();
}

#[cfg(unix)]
#[test]
fn test_build_failure_skips_children_and_exits_non_zero() {
    let project = TestProject::new();
    project.write_images_yaml(IMAGES);
    let engine = project.write_engine("nova-base");
    let logs_dir = project.path().join("logs");

    kiln(&project)
        .arg("build")
        .arg("--engine")
        .arg(&engine)
        .arg("--logs-dir")
        .arg(&logs_dir)
        .arg("--threads")
        .arg("2")
        .arg("--no-progress")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("nova-api"));

    let results = std::fs::read_to_string(logs_dir.join("results.jsonl")).unwrap();
    let last = results.lines().last().unwrap();
    assert!(last.contains("\"kind\":\"summary\""));
    assert!(last.contains("\"failed\":1"));
    assert!(last.contains("\"skipped\":1"));
    assert!(last.contains("\"succeeded\":2"));

    let log = std::fs::read_to_string(logs_dir.join("nova-base.log")).unwrap();
    assert!(log.contains("compile error"));
    assert!(logs_dir.join("kiln-build.conf").exists());
}

#[cfg(unix)]
#[test]
fn test_build_success_exits_zero() {
    let project = TestProject::new();
    project.write_images_yaml(IMAGES);
    let engine = project.write_engine("no-such-image");
    let logs_dir = project.path().join("logs");

    kiln(&project)
        .arg("build")
        .arg("keystone")
        .arg("--engine")
        .arg(&engine)
        .arg("--logs-dir")
        .arg(&logs_dir)
        .arg("--no-progress")
        .assert()
        .success();

    let results = std::fs::read_to_string(logs_dir.join("results.jsonl")).unwrap();
    // keystone とその祖先 base のみ
    assert_eq!(results.lines().count(), 3);
    assert!(!results.contains("nova-api"));
}

#[test]
fn test_build_unmatched_pattern_replaces_stale_results() {
    let project = TestProject::new();
    project.write_images_yaml(IMAGES);
    let logs_dir = project.path().join("logs");
    std::fs::create_dir_all(&logs_dir).unwrap();
    std::fs::write(
        logs_dir.join("results.jsonl"),
        "{\"kind\":\"summary\",\"failed\":3}\n",
    )
    .unwrap();

    kiln(&project)
        .arg("build")
        .arg("^typo$")
        .arg("--engine")
        .arg("true")
        .arg("--logs-dir")
        .arg(&logs_dir)
        .arg("--no-progress")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("^typo$"));

    let results = std::fs::read_to_string(logs_dir.join("results.jsonl")).unwrap();
    assert_eq!(results.lines().count(), 1);
    assert!(results.contains("\"kind\":\"summary\""));
    assert!(results.contains("\"failed\":0"));
}

#[test]
fn test_build_without_images_exits_zero() {
    let project = TestProject::new();
    project.write_images_yaml("images: []\n");
    let logs_dir = project.path().join("logs");

    kiln(&project)
        .arg("build")
        .arg("--engine")
        .arg("true")
        .arg("--logs-dir")
        .arg(&logs_dir)
        .arg("--no-progress")
        .assert()
        .success();

    let results = std::fs::read_to_string(logs_dir.join("results.jsonl")).unwrap();
    assert!(results.contains("\"succeeded\":0"));
}

#[cfg(unix)]
#[test]
fn test_build_passes_engine_args() {
    let project = TestProject::new();
    project.write_images_yaml(IMAGES);
    let engine = project.write_engine("no-such-image");
    let logs_dir = project.path().join("logs");

    kiln(&project)
        .arg("build")
        .arg("^base$")
        .arg("--engine")
        .arg(&engine)
        .arg("--engine-arg")
        .arg("--profile")
        .arg("--engine-arg")
        .arg("ci")
        .arg("--logs-dir")
        .arg(&logs_dir)
        .arg("--no-progress")
        .assert()
        .success();

    let log = std::fs::read_to_string(logs_dir.join("base.log")).unwrap();
    assert!(log.contains("args: --profile ci --config-file"));
}

#[test]
fn test_render_rejects_multiline_maintainer() {
    let project = TestProject::new();
    kiln(&project)
        .arg("render")
        .arg("--maintainer")
        .arg("Ops\npush = false\nnamespace = evil")
        .assert()
        .failure()
        .stdout(predicate::str::contains("namespace = evil").not());
}

#[test]
fn test_list_rejects_path_like_image_name() {
    let project = TestProject::new();
    project.write_images_yaml(
        r#"
images:
  - name: base
  - name: ../escaped
    parent: base
"#,
    );

    kiln(&project).arg("list").assert().failure();
}

#[test]
fn test_render_reads_env_fallback() {
    let project = TestProject::new();
    kiln(&project)
        .env("KILN_NAMESPACE", "from-env")
        .env("KILN_INSTALL_MODE", "SOURCE")
        .arg("render")
        .assert()
        .success()
        .stdout(predicate::str::contains("namespace = from-env"))
        .stdout(predicate::str::contains("install_type = source"));
}
