use std::{fs, path::Path, process::Command};

use serde_json::Value;
use tempdir::TempDir;

fn nodesel(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_nodesel"))
        .args(args)
        .output()
        .expect("failed to run nodesel")
}

fn write(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path.display().to_string()
}

const TREE: &str = r#"{
    "id": "root", "appId": "com.example",
    "children": [
        {"id": "title", "text": "Settings"},
        {"id": "button", "text": "Skip", "clickable": true},
        {"id": "button", "text": "Skip ad", "clickable": true}
    ]
}"#;

#[test]
fn test_fmt_prints_canonical_form() {
    let output = nodesel(&["fmt", "@[ id = 'a' ]<[text^=\"b\"]{,2}"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "@[id=\"a\"] < [text^=\"b\"]{0,2}"
    );
}

#[test]
fn test_check_rejects_unknown_attribute() {
    let output = nodesel(&["check", "[nope=1]"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("nope"));
}

#[test]
fn test_query_snapshot() {
    let dir = TempDir::new("nodesel").unwrap();
    let tree = write(dir.path(), "tree.json", TREE);

    let output = nodesel(&["query", "--tree", &tree, "--all", "[text^=\"Skip\" && clickable=true]"]);
    assert!(output.status.success());
    let found: Vec<Value> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(found.len(), 2);
    assert_eq!(found[0]["index"], 2);
    assert_eq!(found[1]["text"], "Skip ad");

    let output = nodesel(&["query", "--tree", &tree, "--no-cache", "[text=\"Missing\"]"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_rules_report() {
    let dir = TempDir::new("nodesel").unwrap();
    let config = write(
        dir.path(),
        "rules.json",
        r#"{"rules": [
            {"key": "skip", "selector": "[text=\"Skip\"]"},
            {"key": "broken", "selector": "[text=\"Skip\""}
        ]}"#,
    );

    let output = nodesel(&["rules", "--config", &config]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("broken: rejected"), "{stdout}");
    assert!(stdout.contains("skip: Ready"), "{stdout}");
}
