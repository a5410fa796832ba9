// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn finds_program_on_path() -> anyhow::Result<()> {
    let path = find_program("sh")?;
    assert!(path.is_absolute(), "path: {}", path.display());
    assert!(path.ends_with("sh"));
    Ok(())
}

#[test]
fn accepts_explicit_path() -> anyhow::Result<()> {
    assert_eq!(find_program("/bin/sh")?, PathBuf::from("/bin/sh"));
    Ok(())
}

#[test]
fn missing_program_is_an_error() {
    let err = find_program("ampbridge-definitely-not-installed").err();
    assert!(err.is_some_and(|e| e.to_string().contains("not found in PATH")));
}

#[test]
fn non_executable_path_is_an_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("script");
    std::fs::write(&file, "#!/bin/sh\n")?;
    let err = find_program(&file.to_string_lossy()).err();
    assert!(err.is_some_and(|e| e.to_string().contains("not an executable")));
    Ok(())
}

#[test]
fn empty_program_is_an_error() {
    assert!(find_program("").is_err());
}

#[yare::parameterized(
    clean       = { ExitStatus { code: Some(0), signal: None }, 0 },
    failed      = { ExitStatus { code: Some(3), signal: None }, 3 },
    hung_up     = { ExitStatus { code: None, signal: Some(1) }, 129 },
    killed      = { ExitStatus { code: None, signal: Some(9) }, 137 },
    unknown     = { ExitStatus::default(), 1 },
)]
fn exit_code_mirrors_child(status: ExitStatus, expected: i32) {
    assert_eq!(status.exit_code(), expected);
}

#[tokio::test]
async fn pending_write_error_is_reported_once() -> anyhow::Result<()> {
    let mut pending = PendingWriteError::default();

    let (tx, rx) = oneshot::channel();
    pending.ack(tx);
    assert!(rx.await?.is_ok());

    pending.record(anyhow::anyhow!("first"));
    pending.record(anyhow::anyhow!("second"));
    let (tx, rx) = oneshot::channel();
    pending.ack(tx);
    let err = rx.await?.err().map(|e| e.to_string());
    assert_eq!(err.as_deref(), Some("first"));

    let (tx, rx) = oneshot::channel();
    pending.ack(tx);
    assert!(rx.await?.is_ok());
    Ok(())
}
