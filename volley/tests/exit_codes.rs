use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::Context as _;
use volley_testserver::TestServer;

const SETTINGS_VARS: [&str; 14] = [
    "VUS",
    "TEST_DURATION",
    "RAMPING_UP_RATE",
    "RAMPING_UP_TIME",
    "STAY_RATE",
    "STAY_TIME",
    "RAMPING_DOWN_RATE",
    "RAMPING_DOWN_TIME",
    "BASE_URL",
    "AUTH_LOGIN_ENDPOINT",
    "LOGIN_NAME",
    "LOGIN_PASSWORD",
    "INSECURE_SKIP_TLS_VERIFY",
    "RUST_LOG",
];

fn status_code(out: &Output) -> i32 {
    out.status.code().unwrap_or(-1)
}

/// The binary with a clean settings environment.
fn volley() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_volley"));
    for key in SETTINGS_VARS {
        cmd.env_remove(key);
    }
    cmd
}

async fn output(mut cmd: Command) -> anyhow::Result<Output> {
    tokio::task::spawn_blocking(move || cmd.output())
        .await
        .context("spawn_blocking join")?
        .context("run volley binary")
}

fn ensure_code(out: &Output, expected: i32) -> anyhow::Result<()> {
    anyhow::ensure!(
        status_code(out) == expected,
        "expected exit code {expected}, got {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    Ok(())
}

fn write_config(dir: &Path, yaml: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join("volley.yaml");
    std::fs::write(&path, yaml).context("write config")?;
    Ok(path)
}

fn login_config(base_url: &str) -> String {
    format!(
        "baseUrl: {base_url}\nvars:\n  LOGIN_NAME: alice\n  LOGIN_PASSWORD: secret\nscenario:\n  vus: 2\n  duration: 300ms\n  gracefulStop: 5s\n"
    )
}

#[test]
fn invalid_flags_exit_30() -> anyhow::Result<()> {
    let out = volley()
        .args(["run", "auth-login", "--duration", "10x"])
        .output()
        .context("run volley binary")?;

    ensure_code(&out, 30)
}

#[test]
fn unknown_script_exit_30() -> anyhow::Result<()> {
    let out = volley()
        .args(["run", "no-such-script"])
        .output()
        .context("run volley binary")?;

    ensure_code(&out, 30)?;
    anyhow::ensure!(String::from_utf8_lossy(&out.stderr).contains("unknown script"));
    Ok(())
}

#[test]
fn invalid_config_exit_30() -> anyhow::Result<()> {
    let dir = tempfile::tempdir().context("tempdir")?;

    for yaml in [
        // zero VUs
        "baseUrl: http://127.0.0.1:9\nvars: { LOGIN_NAME: a, LOGIN_PASSWORD: b }\nscenario: { vus: 0, duration: 1s }\n",
        // ramping without stages
        "baseUrl: http://127.0.0.1:9\nvars: { LOGIN_NAME: a, LOGIN_PASSWORD: b }\nscenario: { executor: ramping-arrival-rate }\n",
        // unknown key
        "baseUrl: http://127.0.0.1:9\nscenario: { vu: 1 }\n",
        // not yaml at all
        "scenario: [\n",
    ] {
        let path = write_config(dir.path(), yaml)?;
        let out = volley()
            .args(["run", "auth-login", "--config"])
            .arg(&path)
            .output()
            .context("run volley binary")?;
        ensure_code(&out, 30).with_context(|| format!("config:\n{yaml}"))?;
    }

    Ok(())
}

#[test]
fn missing_config_file_exit_30() -> anyhow::Result<()> {
    let out = volley()
        .args(["run", "auth-login", "--config", "./does-not-exist.yaml"])
        .output()
        .context("run volley binary")?;

    ensure_code(&out, 30)
}

#[test]
fn missing_credentials_exit_30() -> anyhow::Result<()> {
    let out = volley()
        .args(["run", "auth-login", "--vus", "1", "--duration", "1s"])
        .env("BASE_URL", "http://127.0.0.1:9")
        .output()
        .context("run volley binary")?;

    ensure_code(&out, 30)?;
    anyhow::ensure!(String::from_utf8_lossy(&out.stderr).contains("LOGIN_NAME"));
    Ok(())
}

#[test]
fn list_exit_0() -> anyhow::Result<()> {
    let out = volley().arg("list").output().context("run volley binary")?;

    ensure_code(&out, 0)?;
    let stdout = String::from_utf8_lossy(&out.stdout);
    anyhow::ensure!(stdout.contains("auth-login "), "stdout:\n{stdout}");
    anyhow::ensure!(stdout.contains("auth-login-ramping"), "stdout:\n{stdout}");
    Ok(())
}

#[tokio::test]
async fn successful_run_emits_json_summary() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir().context("tempdir")?;
    let path = write_config(dir.path(), &login_config(server.base_url()))?;

    let mut cmd = volley();
    cmd.args(["run", "auth-login", "--output", "json", "--fail-on-check-failures", "--config"])
        .arg(&path);
    let out = output(cmd).await?;

    let seen = server.stats().login_requests_total();
    server.shutdown().await;

    ensure_code(&out, 0)?;

    let stdout = String::from_utf8_lossy(&out.stdout);
    let line = stdout.lines().last().context("no output")?;
    let v: serde_json::Value = serde_json::from_str(line).context("summary is not json")?;

    anyhow::ensure!(v["kind"] == "summary", "line: {line}");
    let iterations = v["totals"]["iterations_total"].as_u64().unwrap_or(0);
    anyhow::ensure!(iterations > 0, "line: {line}");
    anyhow::ensure!(iterations == seen, "server saw {seen}, line: {line}");
    anyhow::ensure!(v["totals"]["checks_failed_total"] == 0, "line: {line}");
    anyhow::ensure!(v["scenarios"][0]["scenario"] == "default", "line: {line}");

    Ok(())
}

#[tokio::test]
async fn failed_checks_exit_0_by_default() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir().context("tempdir")?;
    let path = write_config(dir.path(), &login_config(server.base_url()))?;

    let mut cmd = volley();
    cmd.args(["run", "auth-login", "--config"])
        .arg(&path)
        .env("AUTH_LOGIN_ENDPOINT", server.urls().status(500));
    let out = output(cmd).await?;
    let status_requests = server.stats().requests_total();
    let login_requests = server.stats().login_requests_total();
    server.shutdown().await;

    ensure_code(&out, 0)?;
    anyhow::ensure!(status_requests > 0 && login_requests == 0);
    let stdout = String::from_utf8_lossy(&out.stdout);
    anyhow::ensure!(
        stdout.contains("FAIL HTTP status code for login is 200"),
        "stdout:\n{stdout}"
    );
    Ok(())
}

#[tokio::test]
async fn failed_checks_exit_10_when_asked() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir().context("tempdir")?;
    let path = write_config(dir.path(), &login_config(server.base_url()))?;

    let mut cmd = volley();
    cmd.args(["run", "auth-login", "--fail-on-check-failures", "--config"])
        .arg(&path)
        .env("AUTH_LOGIN_ENDPOINT", server.urls().status(500));
    let out = output(cmd).await?;
    server.shutdown().await;

    ensure_code(&out, 10)
}

#[tokio::test]
async fn cli_flags_override_env_and_file() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir().context("tempdir")?;
    // The file's 1h duration would never finish; env and then the CLI shorten it.
    let path = write_config(
        dir.path(),
        "baseUrl: http://127.0.0.1:9\nvars: { LOGIN_NAME: alice, LOGIN_PASSWORD: secret }\nscenario: { vus: 1, duration: 1h }\n",
    )?;

    let mut cmd = volley();
    cmd.args(["run", "auth-login", "--output", "json", "--vus", "3", "--duration", "200ms"])
        .args(["--config"])
        .arg(&path)
        .args(["--env", &format!("BASE_URL={}", server.base_url())])
        .env("TEST_DURATION", "1h")
        .env("VUS", "1");
    let out = output(cmd).await?;
    let in_flight_max = server.stats().in_flight_max();
    server.shutdown().await;

    ensure_code(&out, 0)?;
    let stdout = String::from_utf8_lossy(&out.stdout);
    let line = stdout.lines().last().context("no output")?;
    let v: serde_json::Value = serde_json::from_str(line).context("summary is not json")?;

    anyhow::ensure!(v["scenarios"][0]["duration_secs"] == 0.2, "line: {line}");
    anyhow::ensure!(v["totals"]["checks_failed_total"] == 0, "line: {line}");
    anyhow::ensure!(in_flight_max <= 3);
    Ok(())
}

#[tokio::test]
async fn refused_connections_are_reported_as_network_errors() -> anyhow::Result<()> {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").context("bind")?;
        listener.local_addr().context("local addr")?.port()
    };

    let mut cmd = volley();
    cmd.args(["run", "auth-login", "--output", "json", "--vus", "1", "--duration", "200ms"])
        .env("BASE_URL", format!("http://127.0.0.1:{port}"))
        .env("LOGIN_NAME", "alice")
        .env("LOGIN_PASSWORD", "secret");
    let out = output(cmd).await?;

    ensure_code(&out, 0)?;
    let stdout = String::from_utf8_lossy(&out.stdout);
    let line = stdout.lines().last().context("no output")?;
    let v: serde_json::Value = serde_json::from_str(line).context("summary is not json")?;

    let refused = v["scenarios"][0]["network_errors"]["connection_refused"]
        .as_u64()
        .unwrap_or(0);
    anyhow::ensure!(refused > 0, "line: {line}");
    anyhow::ensure!(v["totals"]["checks_failed_total"] == 0, "line: {line}");
    Ok(())
}

#[tokio::test]
async fn self_signed_endpoint_needs_insecure_skip_tls_verify() -> anyhow::Result<()> {
    let server = TestServer::start_tls().await.context("start tls test server")?;
    let dir = tempfile::tempdir().context("tempdir")?;

    let path = write_config(dir.path(), &login_config(server.base_url()))?;
    let mut cmd = volley();
    cmd.args(["run", "auth-login", "--output", "json", "--config"]).arg(&path);
    let strict = output(cmd).await?;
    let logins_strict = server.stats().login_requests_total();

    let insecure_yaml = format!(
        "{}insecureSkipTlsVerify: true\n",
        login_config(server.base_url())
    );
    let path = write_config(dir.path(), &insecure_yaml)?;
    let mut cmd = volley();
    cmd.args(["run", "auth-login", "--output", "json", "--config"]).arg(&path);
    let insecure = output(cmd).await?;
    let logins_total = server.stats().login_requests_total();
    server.shutdown().await;

    ensure_code(&strict, 0)?;
    ensure_code(&insecure, 0)?;

    let stdout = String::from_utf8_lossy(&strict.stdout);
    let line = stdout.lines().last().context("no output")?;
    let v: serde_json::Value = serde_json::from_str(line).context("summary is not json")?;
    anyhow::ensure!(logins_strict == 0, "strict run reached the server: {line}");
    anyhow::ensure!(
        v["totals"]["network_errors_total"].as_u64().unwrap_or(0) > 0,
        "line: {line}"
    );

    let stdout = String::from_utf8_lossy(&insecure.stdout);
    let line = stdout.lines().last().context("no output")?;
    let v: serde_json::Value = serde_json::from_str(line).context("summary is not json")?;
    let iterations = v["totals"]["iterations_total"].as_u64().unwrap_or(0);
    anyhow::ensure!(iterations > 0, "line: {line}");
    anyhow::ensure!(iterations == logins_total, "server saw {logins_total}, line: {line}");
    anyhow::ensure!(v["totals"]["network_errors_total"] == 0, "line: {line}");
    anyhow::ensure!(v["totals"]["checks_failed_total"] == 0, "line: {line}");
    Ok(())
}
