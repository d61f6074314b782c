use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("chat_relay");

    let (mut relay_child, mut relay_stdout) = spawn_relay(&binary).await?;
    let addr = read_relay_addr(&mut relay_stdout).await?;

    // Drain additional relay logs in the background so the pipe never fills.
    let relay_log_task = tokio::spawn(async move {
        drain_stdout(relay_stdout).await;
    });

    let mut alice = spawn_client(&binary, "alice", &addr).await?;
    let mut bob = spawn_client(&binary, "bob", &addr).await?;

    // Alice sees Bob arrive under his default name, then pick his nickname.
    alice
        .read_until("waiting for alice to see bob rename", |line| {
            line.ends_with("is now known as bob.")
        })
        .await?;
    alice
        .read_until("waiting for roster with bob", |line| {
            line == "*** online: alice, bob"
        })
        .await?;

    // Alice greets Bob; the message reaches both participants.
    alice
        .send_line("Hello from Alice")
        .await
        .context("alice send line")?;
    bob.read_until("waiting for bob to hear alice", |line| {
        line == "<alice> Hello from Alice"
    })
    .await?;
    alice
        .read_until("waiting for alice echo", |line| {
            line == "<alice> Hello from Alice"
        })
        .await?;

    // Bob renames himself mid-session.
    bob.send_line("/nick robert").await.context("bob rename")?;
    alice
        .read_until("waiting for alice to see bob's new name", |line| {
            line == "*** bob is now known as robert."
        })
        .await?;
    bob.read_until("waiting for bob identity refresh", |line| {
        line == "*** you are robert"
    })
    .await?;

    // Alice quits; Bob receives the departure notification.
    alice.send_line("/quit").await.context("alice send quit")?;
    alice
        .read_until("waiting for alice quit confirmation", |line| {
            line == "*** leaving chat"
        })
        .await?;
    bob.read_until("waiting for bob to see alice leave", |line| {
        line == "*** alice has left the chat."
    })
    .await?;
    bob.read_until("waiting for bob's roster", |line| {
        line == "*** online: robert"
    })
    .await?;

    bob.send_line("/quit").await.context("bob send quit")?;
    bob.read_until("waiting for bob quit confirmation", |line| {
        line == "*** leaving chat"
    })
    .await?;

    ensure_success(&mut alice.child, "alice client").await?;
    ensure_success(&mut bob.child, "bob client").await?;

    // The relay stays up after clients disconnect; terminate it manually.
    let _ = relay_child.kill().await;
    let _ = relay_child.wait().await;
    let _ = relay_log_task.await;

    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Reads lines until one satisfies `matches`, skipping unrelated output.
    async fn read_until<F>(&mut self, description: &str, matches: F) -> Result<String>
    where
        F: Fn(&str) -> bool,
    {
        loop {
            let line = read_line_expect(&mut self.stdout, description).await?;
            if matches(&line) {
                return Ok(line);
            }
        }
    }
}

async fn spawn_relay(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("serve")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .arg("--no-web")
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn relay")?;
    let stdout = child
        .stdout
        .take()
        .context("relay stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_relay_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    loop {
        let line = read_line(reader)
            .await?
            .context("relay did not emit listening address")?;
        let trimmed = line.trim();
        if !trimmed.contains("relay listening on") {
            continue;
        }
        let addr = trimmed
            .split_whitespace()
            .last()
            .context("unexpected relay banner format")?;
        if !addr.contains(':') {
            return Err(anyhow!("relay banner missing socket: {trimmed}"));
        }
        return Ok(addr.to_string());
    }
}

async fn spawn_client(binary: &Path, nickname: &str, addr: &str) -> Result<ClientProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg("--nickname")
        .arg(nickname)
        .arg("--server")
        .arg(addr)
        .env("RUST_LOG", "warn")
        .env("NO_COLOR", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn client {nickname}"))?;

    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    let mut process = ClientProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    };

    let expected = format!("*** you are {nickname}");
    process
        .read_until("waiting for nickname confirmation", |line| line == expected)
        .await?;

    Ok(process)
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = child
        .wait()
        .await
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
