//! Mail retrieval — IMAP fetch behind the `Mailbox` trait.
//!
//! The engine only sees `Mailbox::fetch_unseen`; the IMAP plumbing below
//! (raw protocol over rustls, parsing via mail-parser) is one
//! implementation of it. The poller retries connection failures with a
//! fixed backoff indefinitely and feeds everything else into the dedup
//! queue.

use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use mail_parser::MessageParser;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::message::EmailMessage;
use super::queue::DedupQueue;
use crate::error::IntakeError;
use crate::graph::mint_id;

/// Fixed pause before retrying a failed mailbox connection.
const CONNECT_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Source of inbound messages. Fetch is blocking; callers run it under
/// `spawn_blocking`.
pub trait Mailbox: Send + Sync {
    /// Fetch unseen messages, marking them seen at the source.
    fn fetch_unseen(&self) -> Result<Vec<EmailMessage>, IntakeError>;
}

// ── Configuration ───────────────────────────────────────────────────

/// IMAP mailbox settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: String,
    pub poll_interval_secs: u64,
}

impl MailboxConfig {
    /// Build config from environment variables.
    /// Returns `None` if `TASKWEAVE_IMAP_HOST` is not set (intake disabled).
    pub fn from_env() -> Option<Self> {
        let imap_host = std::env::var("TASKWEAVE_IMAP_HOST").ok()?;

        let imap_port: u16 = std::env::var("TASKWEAVE_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let username = std::env::var("TASKWEAVE_IMAP_USERNAME").unwrap_or_default();
        let password = std::env::var("TASKWEAVE_IMAP_PASSWORD").unwrap_or_default();

        let poll_interval_secs: u64 = std::env::var("TASKWEAVE_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Some(Self {
            imap_host,
            imap_port,
            username,
            password,
            poll_interval_secs,
        })
    }
}

// ── Poller ──────────────────────────────────────────────────────────

/// Spawn a background task that polls the mailbox and feeds new messages
/// into the dedup queue.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop
/// polling.
pub fn spawn_mail_poller(
    mailbox: Arc<dyn Mailbox>,
    queue: Arc<DedupQueue>,
    poll_interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Mail poller started — polling every {:?}", poll_interval);

        let mut tick = tokio::time::interval(poll_interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Mail poller shutting down");
                return;
            }

            let fetch_mailbox = Arc::clone(&mailbox);
            let fetched =
                tokio::task::spawn_blocking(move || fetch_mailbox.fetch_unseen()).await;

            match fetched {
                Ok(Ok(messages)) => {
                    let mut admitted = 0;
                    for message in messages {
                        if queue.enqueue(message) {
                            admitted += 1;
                        }
                    }
                    if admitted > 0 {
                        info!(count = admitted, "new messages queued");
                    } else {
                        debug!("no new messages");
                    }
                }
                Ok(Err(IntakeError::Connect(reason))) => {
                    error!(reason = %reason, "mailbox connection failed, retrying after backoff");
                    tokio::time::sleep(CONNECT_RETRY_BACKOFF).await;
                }
                Ok(Err(e)) => {
                    error!(error = %e, "mail fetch failed");
                }
                Err(e) => {
                    error!(error = %e, "mail fetch task panicked");
                }
            }
        }
    });

    (handle, shutdown_flag)
}

// ── IMAP implementation ─────────────────────────────────────────────

/// IMAP-over-TLS mailbox.
pub struct ImapMailbox {
    config: MailboxConfig,
}

impl ImapMailbox {
    pub fn new(config: MailboxConfig) -> Self {
        Self { config }
    }
}

impl Mailbox for ImapMailbox {
    fn fetch_unseen(&self) -> Result<Vec<EmailMessage>, IntakeError> {
        fetch_unseen_imap(&self.config)
    }
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

fn read_line(tls: &mut TlsStream) -> Result<String, IntakeError> {
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match std::io::Read::read(tls, &mut byte) {
            Ok(0) => return Err(IntakeError::Protocol("connection closed".into())),
            Ok(_) => {
                buf.push(byte[0]);
                if buf.ends_with(b"\r\n") {
                    return Ok(String::from_utf8_lossy(&buf).to_string());
                }
            }
            Err(e) => return Err(IntakeError::Protocol(e.to_string())),
        }
    }
}

fn send_cmd(tls: &mut TlsStream, tag: &str, cmd: &str) -> Result<Vec<String>, IntakeError> {
    let full = format!("{tag} {cmd}\r\n");
    IoWrite::write_all(tls, full.as_bytes()).map_err(|e| IntakeError::Protocol(e.to_string()))?;
    IoWrite::flush(tls).map_err(|e| IntakeError::Protocol(e.to_string()))?;
    let mut lines = Vec::new();
    loop {
        let line = read_line(tls)?;
        let done = line.starts_with(tag);
        lines.push(line);
        if done {
            return Ok(lines);
        }
    }
}

/// Fetch unseen emails via raw IMAP over TLS (blocking).
fn fetch_unseen_imap(config: &MailboxConfig) -> Result<Vec<EmailMessage>, IntakeError> {
    let tcp = TcpStream::connect((&*config.imap_host, config.imap_port))
        .map_err(|e| IntakeError::Connect(e.to_string()))?;
    tcp.set_read_timeout(Some(Duration::from_secs(30)))
        .map_err(|e| IntakeError::Connect(e.to_string()))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = std::sync::Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name: rustls::pki_types::ServerName<'_> =
        rustls::pki_types::ServerName::try_from(config.imap_host.clone())
            .map_err(|e| IntakeError::Connect(e.to_string()))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| IntakeError::Connect(e.to_string()))?;
    let mut tls = rustls::StreamOwned::new(conn, tcp);

    let _greeting = read_line(&mut tls)?;

    let login_resp = send_cmd(
        &mut tls,
        "A1",
        &format!("LOGIN \"{}\" \"{}\"", config.username, config.password),
    )?;
    if !login_resp.last().is_some_and(|l| l.contains("OK")) {
        return Err(IntakeError::Connect("login rejected".into()));
    }

    let _select = send_cmd(&mut tls, "A2", "SELECT \"INBOX\"")?;

    let search_resp = send_cmd(&mut tls, "A3", "SEARCH UNSEEN")?;
    let mut uids: Vec<&str> = Vec::new();
    for line in &search_resp {
        if line.starts_with("* SEARCH") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() > 2 {
                uids.extend_from_slice(&parts[2..]);
            }
        }
    }

    let mut messages = Vec::new();
    let mut tag_counter = 4_u32;

    for uid in &uids {
        let fetch_tag = format!("A{tag_counter}");
        tag_counter += 1;
        let fetch_resp = send_cmd(&mut tls, &fetch_tag, &format!("FETCH {uid} RFC822"))?;

        let raw: String = fetch_resp
            .iter()
            .skip(1)
            .take(fetch_resp.len().saturating_sub(2))
            .cloned()
            .collect();

        if let Some(message) = decode_message(raw.as_bytes()) {
            messages.push(message);
        }

        let store_tag = format!("A{tag_counter}");
        tag_counter += 1;
        let _ = send_cmd(&mut tls, &store_tag, &format!("STORE {uid} +FLAGS (\\Seen)"));
    }

    let logout_tag = format!("A{tag_counter}");
    let _ = send_cmd(&mut tls, &logout_tag, "LOGOUT");

    Ok(messages)
}

/// Parse a raw RFC822 payload into an `EmailMessage`.
fn decode_message(raw: &[u8]) -> Option<EmailMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let from = address_of(parsed.from());
    let to = address_of(parsed.to());
    let subject = parsed.subject().unwrap_or("(no subject)").to_string();
    let id = parsed
        .message_id()
        .map(str::to_string)
        .unwrap_or_else(|| mint_id("msg"));
    let timestamp = parsed
        .date()
        .and_then(|d| {
            chrono::NaiveDate::from_ymd_opt(d.year as i32, u32::from(d.month), u32::from(d.day))
                .and_then(|date| {
                    date.and_hms_opt(u32::from(d.hour), u32::from(d.minute), u32::from(d.second))
                })
                .map(|naive| naive.and_utc())
        })
        .unwrap_or_else(Utc::now);

    let body = parsed
        .body_text(0)
        .map(|text| text.to_string())
        .unwrap_or_else(|| "(no readable content)".to_string());

    Some(EmailMessage {
        id,
        from,
        to,
        subject,
        timestamp,
        body: strip_signature(&body),
    })
}

fn address_of(header: Option<&mail_parser::Address<'_>>) -> String {
    header
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into())
}

/// Drop everything after the first `--` signature delimiter line.
pub fn strip_signature(body: &str) -> String {
    use std::sync::OnceLock;
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"\r?\n--\r?\n").expect("signature pattern"));
    re.splitn(body, 2)
        .next()
        .unwrap_or(body)
        .trim_end()
        .to_string()
}
