//! Line-based development gateway.
//!
//! Reads operator input from stdin, one event per line:
//!
//! - `/name arg...` is a command
//! - `!data` presses the button carrying `data` on the most recent message
//!   that has buttons
//!
//! Replies are written to stdout with their message ids. Stdout is reserved
//! for the conversation; logs go to stderr.

use super::{InboundEvent, MessagingGateway, OutboundMessage};
use crate::session::{MessageRef, SessionId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

type Reader = Box<dyn AsyncBufRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Terminal gateway bound to a single session.
pub struct StdioGateway {
    session: SessionId,
    reader: Mutex<Option<Reader>>,
    writer: Mutex<Writer>,
    next_message_id: AtomicI64,
    next_callback_id: AtomicU64,
    /// Most recent message that carries buttons.
    last_with_buttons: Mutex<Option<MessageRef>>,
}

impl StdioGateway {
    /// Gateway over the process's stdin and stdout.
    pub fn new(session: SessionId) -> Self {
        Self::with_io(
            session,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
    }

    /// Gateway over arbitrary streams.
    pub fn with_io(
        session: SessionId,
        reader: impl AsyncBufRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            session,
            reader: Mutex::new(Some(Box::new(reader))),
            writer: Mutex::new(Box::new(writer)),
            next_message_id: AtomicI64::new(1),
            next_callback_id: AtomicU64::new(1),
            last_with_buttons: Mutex::new(None),
        }
    }

    fn allocate_message(&self) -> MessageRef {
        MessageRef::new(
            self.session,
            self.next_message_id.fetch_add(1, Ordering::Relaxed),
        )
    }

    async fn write_block(&self, header: String, message: &OutboundMessage) -> anyhow::Result<()> {
        let mut out = header;
        for line in message.text.lines() {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
        for button in &message.buttons {
            out.push_str(&format!("  [{}] !{}\n", button.label, button.data));
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Translate one input line. Returns `None` for blank or unrecognised lines.
    async fn parse_line(&self, line: &str) -> Option<InboundEvent> {
        let line = line.trim();
        if let Some(command) = line.strip_prefix('/') {
            let mut words = command.split_whitespace();
            let name = words.next()?.to_owned();
            return Some(InboundEvent::Command {
                session: self.session,
                name,
                args: words.map(str::to_owned).collect(),
                message: Some(self.allocate_message()),
            });
        }
        if let Some(data) = line.strip_prefix('!') {
            let data = data.trim();
            if data.is_empty() {
                return None;
            }
            let callback_id = format!(
                "cb-{}",
                self.next_callback_id.fetch_add(1, Ordering::Relaxed)
            );
            return Some(InboundEvent::ButtonPress {
                session: self.session,
                callback_id,
                data: data.to_owned(),
                message: *self.last_with_buttons.lock().await,
            });
        }
        if !line.is_empty() {
            warn!(line, "ignoring input: commands start with '/', button presses with '!'");
        }
        None
    }
}

#[async_trait]
impl MessagingGateway for StdioGateway {
    fn id(&self) -> &'static str {
        "stdio"
    }

    async fn send_message(
        &self,
        session: SessionId,
        message: OutboundMessage,
    ) -> anyhow::Result<MessageRef> {
        if session != self.session {
            anyhow::bail!("stdio gateway is bound to session {}, not {session}", self.session);
        }
        let target = self.allocate_message();
        self.write_block(format!("[#{}]\n", target.message_id), &message)
            .await?;
        if !message.buttons.is_empty() {
            *self.last_with_buttons.lock().await = Some(target);
        }
        Ok(target)
    }

    async fn edit_message(
        &self,
        target: &MessageRef,
        message: OutboundMessage,
    ) -> anyhow::Result<()> {
        if target.message_id >= self.next_message_id.load(Ordering::Relaxed) {
            anyhow::bail!("message #{} does not exist", target.message_id);
        }
        self.write_block(format!("[#{} edited]\n", target.message_id), &message)
            .await?;

        let mut last = self.last_with_buttons.lock().await;
        if message.buttons.is_empty() {
            if *last == Some(*target) {
                *last = None;
            }
        } else {
            *last = Some(*target);
        }
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> anyhow::Result<()> {
        debug!(callback_id, "callback answered");
        Ok(())
    }

    async fn run(&self, inbound_tx: mpsc::Sender<InboundEvent>) -> anyhow::Result<()> {
        let Some(mut reader) = self.reader.lock().await.take() else {
            anyhow::bail!("stdio gateway is already running");
        };
        info!(session = %self.session, "stdio gateway ready");

        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                info!("stdin closed (EOF); stopping stdio gateway");
                break;
            }
            let Some(event) = self.parse_line(&line).await else {
                continue;
            };
            if inbound_tx.send(event).await.is_err() {
                debug!("agent gone; stopping stdio gateway");
                break;
            }
        }
        Ok(())
    }
}
