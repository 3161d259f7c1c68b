use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream
    },
    sync::{mpsc, Mutex}
};
use tracing::{debug, error, info, warn};

/// One inbound item from the chat server, already stripped of IRC framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundLine {
    Channel { channel: String, sender: String, text: String },
    Direct { sender: String, text: String },
    /// We left (or were removed from) a multiplayer channel.
    Parted { channel: String },
    /// The server refused a JOIN.
    JoinFailed { channel: String, reason: String }
}

/// Outbound chat surface. The lobby code only ever talks through this, so
/// tests can swap in a recording sink.
#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn send_channel(&self, channel: &str, text: &str) -> Result<()>;
    async fn send_direct(&self, username: &str, text: &str) -> Result<()>;
    async fn join(&self, channel: &str) -> Result<()>;
    async fn part(&self, channel: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct BanchoWriter {
    write_half: Arc<Mutex<OwnedWriteHalf>>
}

impl BanchoWriter {
    async fn send_raw(&self, line: &str) -> Result<()> {
        let mut guard = self.write_half.lock().await;
        guard.write_all(line.as_bytes()).await?;
        guard.write_all(b"\r\n").await?;
        Ok(())
    }
}

#[async_trait]
impl ChatSink for BanchoWriter {
    async fn send_channel(&self, channel: &str, text: &str) -> Result<()> {
        self.send_raw(&format!("PRIVMSG {channel} :{text}")).await
    }

    async fn send_direct(&self, username: &str, text: &str) -> Result<()> {
        // Bancho addresses users by their IRC nick, spaces become
        // underscores.
        let nick = username.replace(' ', "_");
        self.send_raw(&format!("PRIVMSG {nick} :{text}")).await
    }

    async fn join(&self, channel: &str) -> Result<()> {
        self.send_raw(&format!("JOIN {channel}")).await
    }

    async fn part(&self, channel: &str) -> Result<()> {
        self.send_raw(&format!("PART {channel}")).await
    }
}

/// Connects and authenticates, then spawns the read loop. The receiver
/// closing means the transport dropped; there is no in-process reconnect,
/// the caller is expected to exit and be restarted.
pub async fn connect(
    host: &str,
    username: &str,
    password: &str
) -> Result<(BanchoWriter, mpsc::Receiver<InboundLine>)> {
    info!(host, username, "connecting to chat server");
    let stream = TcpStream::connect(host).await?;
    let (read_half, write_half) = stream.into_split();

    let writer = BanchoWriter {
        write_half: Arc::new(Mutex::new(write_half))
    };

    let nick = username.replace(' ', "_");
    writer.send_raw(&format!("PASS {password}")).await?;
    writer.send_raw(&format!("NICK {nick}")).await?;
    writer.send_raw(&format!("USER {nick} 0 * :{nick}")).await?;

    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(read_loop(read_half, writer.clone(), nick, tx));

    Ok((writer, rx))
}

async fn read_loop(
    read_half: OwnedReadHalf,
    writer: BanchoWriter,
    our_nick: String,
    tx: mpsc::Sender<InboundLine>
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                error!("chat server closed the connection");
                break;
            }
            Err(e) => {
                error!(error = %e, "chat read failed");
                break;
            }
        };

        if let Some(token) = line.strip_prefix("PING ") {
            if let Err(e) = writer.send_raw(&format!("PONG {token}")).await {
                error!(error = %e, "failed to answer ping");
                break;
            }
            continue;
        }

        match parse_line(&our_nick, &line) {
            Some(inbound) => {
                if tx.send(inbound).await.is_err() {
                    // Consumer went away, nothing left to do
                    break;
                }
            }
            None => debug!(line, "ignored server line")
        }
    }
    // Dropping tx closes the stream; the consumer treats that as fatal.
    warn!("chat read loop terminated");
}

/// Decodes the small IRC subset Bancho actually uses.
fn parse_line(our_nick: &str, line: &str) -> Option<InboundLine> {
    let rest = line.strip_prefix(':')?;
    let (prefix, rest) = rest.split_once(' ')?;
    let sender = prefix.split('!').next().unwrap_or(prefix).to_string();

    if let Some((target, text)) = rest
        .strip_prefix("PRIVMSG ")
        .and_then(|r| r.split_once(" :"))
    {
        if target.starts_with('#') {
            return Some(InboundLine::Channel {
                channel: target.to_string(),
                sender,
                text: text.to_string()
            });
        }
        return Some(InboundLine::Direct {
            sender,
            text: text.to_string()
        });
    }

    if let Some(channel) = rest.strip_prefix("PART :").or_else(|| rest.strip_prefix("PART ")) {
        if sender == our_nick {
            return Some(InboundLine::Parted {
                channel: channel.to_string()
            });
        }
        return None;
    }

    if let Some(kicked) = rest.strip_prefix("KICK ") {
        let mut parts = kicked.split(' ');
        let channel = parts.next()?;
        let victim = parts.next()?;
        if victim == our_nick {
            return Some(InboundLine::Parted {
                channel: channel.to_string()
            });
        }
        return None;
    }

    // Numeric replies for unjoinable channels
    for code in ["403 ", "473 ", "475 "] {
        if let Some(numeric) = rest.strip_prefix(code) {
            let (_, tail) = numeric.split_once(' ')?;
            let (channel, reason) = tail.split_once(" :").unwrap_or((tail, "unknown"));
            return Some(InboundLine::JoinFailed {
                channel: channel.to_string(),
                reason: reason.to_string()
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_message() {
        let parsed = parse_line("orl_bot", ":BanchoBot!cho@ppy.sh PRIVMSG #mp_123 :The match has started!");
        assert_eq!(
            parsed,
            Some(InboundLine::Channel {
                channel: "#mp_123".to_string(),
                sender: "BanchoBot".to_string(),
                text: "The match has started!".to_string()
            })
        );
    }

    #[test]
    fn test_direct_message() {
        let parsed = parse_line("orl_bot", ":some_player!cho@ppy.sh PRIVMSG orl_bot :!join 123");
        assert_eq!(
            parsed,
            Some(InboundLine::Direct {
                sender: "some_player".to_string(),
                text: "!join 123".to_string()
            })
        );
    }

    #[test]
    fn test_own_part_is_reported() {
        let parsed = parse_line("orl_bot", ":orl_bot!cho@ppy.sh PART :#mp_123");
        assert_eq!(
            parsed,
            Some(InboundLine::Parted {
                channel: "#mp_123".to_string()
            })
        );
        // Somebody else's part is roster business, not transport business
        assert_eq!(parse_line("orl_bot", ":alice!cho@ppy.sh PART :#mp_123"), None);
    }

    #[test]
    fn test_join_failure_numeric() {
        let parsed = parse_line("orl_bot", ":cho.ppy.sh 403 orl_bot #mp_999 :No such channel");
        assert_eq!(
            parsed,
            Some(InboundLine::JoinFailed {
                channel: "#mp_999".to_string(),
                reason: "No such channel".to_string()
            })
        );
    }

    #[test]
    fn test_noise_is_ignored() {
        assert_eq!(parse_line("orl_bot", ":cho.ppy.sh 001 orl_bot :Welcome"), None);
        assert_eq!(parse_line("orl_bot", "garbage"), None);
    }
}
