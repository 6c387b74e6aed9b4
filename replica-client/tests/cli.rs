mod common;

use std::{
    path::Path,
    process::{Output, Stdio},
    time::Duration,
};

use anyhow::{Context, Result};
use common::{MockCluster, unused_address};
use tokio::{process::Command, time::timeout};

const RUN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn put_then_get_through_the_binary() -> Result<()> {
    let cluster = MockCluster::spawn(3, Some(0)).await?;
    let binary = assert_cmd::cargo::cargo_bin("replica-client");

    let put = run_client(&binary, &cluster.directory.addr, &["put", "7", "hello"]).await?;
    assert!(put.status.success(), "put failed: {}", String::from_utf8_lossy(&put.stderr));
    assert!(put.stdout.is_empty());

    let get = run_client(&binary, &cluster.directory.addr, &["get", "7"]).await?;
    assert!(get.status.success(), "get failed: {}", String::from_utf8_lossy(&get.stderr));
    assert_eq!(String::from_utf8_lossy(&get.stdout), "hello\n");

    let leader_saw: Vec<_> = cluster.replica(0).seen_ids().await;
    assert_eq!(leader_saw.first(), Some(&1));
    Ok(())
}

#[tokio::test]
async fn unreachable_directory_exits_with_an_error() -> Result<()> {
    let directory = unused_address().await?;
    let binary = assert_cmd::cargo::cargo_bin("replica-client");

    let output = run_client(&binary, &directory, &["get", "1"]).await?;
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to bootstrap"), "unexpected stderr: {stderr}");
    Ok(())
}

async fn run_client(binary: &Path, directory: &str, args: &[&str]) -> Result<Output> {
    let mut cmd = Command::new(binary);
    cmd.arg("--directory")
        .arg(directory)
        .arg("--probe")
        .arg("tcp")
        .args(args)
        .env("RUST_LOG", "warn")
        .env("RUST_LOG_STYLE", "never")
        .stdin(Stdio::null());

    timeout(RUN_TIMEOUT, cmd.output())
        .await
        .context("client did not finish in time")?
        .context("failed to run client")
}
