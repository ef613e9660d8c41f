use std::fs;

use predicates::prelude::*;

#[test]
fn normalize_prints_deduplicated_record() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let fic_path = dir.path().join("fic.json");
    fs::write(
        &fic_path,
        r#"{
            "title": "Quest",
            "externals": true,
            "chapters": [
                {"name": "Update", "link": "https://forums.sufficientvelocity.com/threads/q.5/#post-10"},
                {"name": "Update", "link": "https://forums.sufficientvelocity.com/posts/11/"},
                {"name": "Repost", "link": "https://forums.sufficientvelocity.com/posts/10"}
            ]
        }"#,
    )?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("ficpack");
    cmd.args(["normalize", "--fic", fic_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"Update (1)\""))
        .stdout(predicate::str::contains("\"externals\": true"))
        .stdout(predicate::str::contains("Repost").not());
    Ok(())
}

#[test]
fn normalize_writes_output_file_that_reimports() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let fic_path = dir.path().join("fic.json");
    let out_path = dir.path().join("normalized.json");
    fs::write(
        &fic_path,
        r#"{
            "id": "quest-1",
            "title": "Quest",
            "author": "Bob",
            "chapters": [{"name": "One", "link": "https://a.example/1"}],
            "fics": [{"title": "Side", "chapters": [{"name": "One", "link": "https://a.example/2"}]}]
        }"#,
    )?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("ficpack");
    cmd.args([
        "normalize",
        "--fic",
        fic_path.to_str().unwrap(),
        "--out",
        out_path.to_str().unwrap(),
    ])
    .assert()
    .success();

    let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out_path)?)?;
    assert_eq!(written["id"], "quest-1");
    assert_eq!(written["fics"][0]["chapters"][0]["name"], "One");
    assert!(written["fics"][0].get("author").is_none());

    let again = ficpack::fic::Fic::from_json(&fs::read_to_string(&out_path)?)?;
    assert_eq!(again.chapter_count(), 2);
    Ok(())
}

#[test]
fn story_without_chapters_is_a_structural_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let fic_path = dir.path().join("fic.json");
    fs::write(&fic_path, r#"{"title": "A", "chapters": []}"#)?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("ficpack");
    cmd.args(["normalize", "--fic", fic_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is missing any chapters"));
    Ok(())
}

#[test]
fn invalid_concurrency_env_is_reported() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let fic_path = dir.path().join("fic.json");
    fs::write(
        &fic_path,
        r#"{"title": "A", "chapters": [{"name": "1", "link": "https://a.example/1"}]}"#,
    )?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("ficpack");
    cmd.env("FICPACK_CONCURRENCY", "zero")
        .args([
            "build",
            "--fic",
            fic_path.to_str().unwrap(),
            "--out",
            dir.path().join("a.epub").to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("FICPACK_CONCURRENCY"));
    Ok(())
}
