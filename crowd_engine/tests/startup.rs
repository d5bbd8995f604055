use std::fs;
use std::path::Path;
use std::process::Command;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().expect("parent")).expect("create dir");
    fs::write(path, contents).expect("write config");
}

fn engine(root: &Path, game: &str) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_crowd_engine"));
    command
        .arg("--config-root")
        .arg(root)
        .arg("--game")
        .arg(game)
        .arg("--overlay-addr")
        .arg("127.0.0.1:0")
        .arg("--control-addr")
        .arg("127.0.0.1:0")
        .env_remove("ENABLE_ECONOMY")
        .env_remove("VOTE_WINDOW_MS")
        .env("RUST_LOG", "error");
    command
}

#[test]
fn game_without_buttons_aborts_startup() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "systems/bare.json", r#"{"id": "bare", "name": "Bare"}"#);
    write(
        dir.path(),
        "games/empty.json",
        r#"{"id": "empty", "name": "Empty", "system": "bare"}"#,
    );

    let output = engine(dir.path(), "empty").output().expect("run engine");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("game empty has no button map"), "{stderr}");
}

#[test]
fn unknown_game_aborts_startup() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(
        dir.path(),
        "systems/gba.json",
        r#"{"id": "gba", "buttons": {"a": {}}}"#,
    );

    let output = engine(dir.path(), "missing").output().expect("run engine");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("game config not found: missing"), "{stderr}");
}

#[test]
fn missing_system_aborts_startup() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(
        dir.path(),
        "games/orphan.json",
        r#"{"id": "orphan", "name": "Orphan", "system": "snes"}"#,
    );

    let output = engine(dir.path(), "orphan").output().expect("run engine");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("system config not found: snes"), "{stderr}");
}
