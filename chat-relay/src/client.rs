use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    protocol::{self, ClientToServer, ServerToClient, write_message},
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let (reader, mut writer) = establish_connection(&args).await?;
    if let Some(nickname) = &args.nickname {
        request_rename(&mut writer, nickname).await?;
    }

    // `Lines::next_line` is cancel safe, so neither stream loses data inside select!.
    let mut server_lines = reader.lines();
    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();

    run_client_loop(&mut server_lines, &mut writer, &mut stdin_lines).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

async fn request_rename(writer: &mut OwnedWriteHalf, nickname: &str) -> Result<()> {
    write_message(
        writer,
        &ClientToServer::Rename {
            nickname: nickname.to_string(),
        },
    )
    .await?;
    Ok(())
}

async fn run_client_loop(
    server_lines: &mut Lines<BufReader<OwnedReadHalf>>,
    writer: &mut OwnedWriteHalf,
    stdin_lines: &mut Lines<BufReader<Stdin>>,
) -> Result<()> {
    loop {
        select! {
            server_line = server_lines.next_line() => {
                if !handle_server_line(server_line).await? {
                    break;
                }
            }
            input = stdin_lines.next_line() => {
                if !handle_stdin_input(input, writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_line(line: io::Result<Option<String>>) -> Result<bool> {
    match line? {
        Some(line) if line.trim().is_empty() => Ok(true),
        Some(line) => {
            let message = protocol::decode::<ServerToClient>(&line)?;
            render_server_message(message).await?;
            Ok(true)
        }
        None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_input(
    input: io::Result<Option<String>>,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let Some(input) = input? else {
        return Ok(false);
    };

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    if let Some(nickname) = text.strip_prefix("/nick ") {
        request_rename(writer, nickname).await?;
        return Ok(true);
    }

    write_message(
        writer,
        &ClientToServer::Chat {
            text: text.to_string(),
        },
    )
    .await?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

/// Terminal rendering of a server event; `None` for events with no visible effect.
pub fn format_server_message(message: &ServerToClient) -> Option<String> {
    match message {
        ServerToClient::YourIdentity { nickname, .. } => Some(format!("*** you are {nickname}")),
        ServerToClient::SystemMessage { text, .. } => Some(format!("*** {text}")),
        ServerToClient::RosterUpdate { users } => {
            let mut nicknames: Vec<&str> = users.iter().map(|u| u.nickname.as_str()).collect();
            nicknames.sort_unstable();
            Some(format!("*** online: {}", nicknames.join(", ")))
        }
        ServerToClient::ChatMessage { text, sender, .. } => Some(format!("<{sender}> {text}")),
        ServerToClient::Typing { sender } => Some(format!("*** {sender} is typing")),
        ServerToClient::StopTyping { .. } => None,
        ServerToClient::Error { message } => Some(format!("!!! {message}")),
    }
}

async fn render_server_message(message: ServerToClient) -> io::Result<()> {
    let Some(line) = format_server_message(&message) else {
        return Ok(());
    };
    match message {
        ServerToClient::Error { .. } => write_stderr(&line).await,
        _ => write_stdout(&line).await,
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{color::Color, protocol::RosterEntry};

    #[test]
    fn roster_is_rendered_sorted() {
        let message = ServerToClient::RosterUpdate {
            users: vec![
                RosterEntry {
                    nickname: "bob".into(),
                    color: Color::BLACK,
                },
                RosterEntry {
                    nickname: "alice".into(),
                    color: Color::BLACK,
                },
            ],
        };
        assert_eq!(
            format_server_message(&message).as_deref(),
            Some("*** online: alice, bob")
        );
    }

    #[test]
    fn stop_typing_is_not_rendered() {
        let message = ServerToClient::StopTyping {
            sender: "bob".into(),
        };
        assert_eq!(format_server_message(&message), None);
    }
}
