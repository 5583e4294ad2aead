//! Minimal blocking IMAP client over rustls.
//!
//! Implements exactly the commands the gateway needs: LOGIN, SELECT,
//! UID SEARCH, UID FETCH, APPEND, UID MOVE (with a COPY/STORE/UID EXPUNGE
//! fallback), CAPABILITY and LOGOUT. Run it from `spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::TransportError;

/// TLS stream type used for live sessions.
pub type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Socket read timeout.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Completion status of a tagged command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
}

/// One untagged response line, with any literals it carried.
#[derive(Debug, Clone, Default)]
pub struct ResponseLine {
    pub text: String,
    pub literals: Vec<Vec<u8>>,
}

/// Full response to a tagged command.
#[derive(Debug, Clone)]
pub struct Response {
    pub untagged: Vec<ResponseLine>,
    pub status: Status,
    /// Text after the status word on the tagged line.
    pub detail: String,
}

impl Response {
    fn ensure_ok(self, command: &str) -> Result<Self, TransportError> {
        if self.status == Status::Ok {
            Ok(self)
        } else {
            Err(TransportError::Protocol {
                command: command.to_string(),
                reason: format!("{:?} {}", self.status, self.detail),
            })
        }
    }
}

/// An authenticated (or about to be) IMAP session.
pub struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
    capabilities: Option<Vec<String>>,
}

/// Open a TLS connection and read the server greeting.
pub fn connect_tls(host: &str, port: u16) -> Result<ImapSession<TlsStream>, TransportError> {
    let server = format!("{host}:{port}");
    let tcp = TcpStream::connect((host, port)).map_err(|e| TransportError::Connect {
        server: server.clone(),
        reason: e.to_string(),
    })?;
    tcp.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| TransportError::Tls(format!("invalid server name {host}: {e}")))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| TransportError::Tls(e.to_string()))?;

    let mut session = ImapSession::new(rustls::StreamOwned::new(conn, tcp));
    let greeting = session.read_line()?;
    if !greeting.text.starts_with("* OK") && !greeting.text.starts_with("* PREAUTH") {
        return Err(TransportError::Connect {
            server,
            reason: format!("unexpected greeting: {}", greeting.text.trim_end()),
        });
    }
    debug!(server = %server, "IMAP connected");
    Ok(session)
}

impl<S: Read + Write> ImapSession<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_tag: 1,
            capabilities: None,
        }
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<(), TransportError> {
        let response = self.command(&format!("LOGIN {} {}", quote(username), quote(password)))?;
        if response.status != Status::Ok {
            return Err(TransportError::Auth {
                server: "imap".into(),
                reason: response.detail,
            });
        }
        Ok(())
    }

    pub fn select(&mut self, folder: &str) -> Result<(), TransportError> {
        self.command(&format!("SELECT {}", quote(folder)))?
            .ensure_ok("SELECT")?;
        Ok(())
    }

    /// UIDs of every message in the selected folder not flagged `\Deleted`.
    pub fn uid_search_undeleted(&mut self) -> Result<Vec<u32>, TransportError> {
        let response = self.command("UID SEARCH UNDELETED")?.ensure_ok("UID SEARCH")?;
        Ok(parse_search(&response.untagged))
    }

    /// Raw RFC 5322 bytes of one message. Uses `BODY.PEEK[]` so `\Seen` is
    /// left alone.
    pub fn uid_fetch(&mut self, uid: u32) -> Result<Option<Vec<u8>>, TransportError> {
        let response = self
            .command(&format!("UID FETCH {uid} (BODY.PEEK[])"))?
            .ensure_ok("UID FETCH")?;
        Ok(response
            .untagged
            .into_iter()
            .filter(|line| line.text.contains("FETCH"))
            .find_map(|line| line.literals.into_iter().next()))
    }

    /// Append a message to `folder` with the given flags.
    pub fn append(&mut self, folder: &str, flags: &str, message: &[u8]) -> Result<(), TransportError> {
        let tag = self.tag();
        let line = format!(
            "{tag} APPEND {} ({flags}) {{{}}}\r\n",
            quote(folder),
            message.len()
        );
        self.write_all(line.as_bytes())?;

        // Untagged updates may arrive ahead of the continuation.
        let prefix = format!("{tag} ");
        loop {
            let response = self.read_line()?;
            if response.text.starts_with('+') {
                break;
            }
            if let Some(rest) = response.text.strip_prefix(&prefix) {
                return Err(TransportError::Protocol {
                    command: "APPEND".into(),
                    reason: rest.trim_end().to_string(),
                });
            }
            debug!(line = %response.text.trim_end(), "Untagged response before APPEND continuation");
        }

        self.write_all(message)?;
        self.write_all(b"\r\n")?;
        self.read_until_tagged(&tag)?.ensure_ok("APPEND")?;
        Ok(())
    }

    /// Move a message by UID. Without the MOVE extension this falls back to
    /// COPY + `\Deleted`, expunging only `uid` when UIDPLUS is available.
    /// Otherwise the original stays flagged `\Deleted` in the source folder.
    pub fn uid_move(&mut self, uid: u32, folder: &str) -> Result<(), TransportError> {
        let response = self.command(&format!("UID MOVE {uid} {}", quote(folder)))?;
        if response.status == Status::Ok {
            return Ok(());
        }
        warn!(uid, detail = %response.detail, "UID MOVE rejected, falling back to COPY");

        self.command(&format!("UID COPY {uid} {}", quote(folder)))?
            .ensure_ok("UID COPY")?;
        self.command(&format!("UID STORE {uid} +FLAGS.SILENT (\\Deleted)"))?
            .ensure_ok("UID STORE")?;

        if self.has_capability("UIDPLUS")? {
            self.command(&format!("UID EXPUNGE {uid}"))?
                .ensure_ok("UID EXPUNGE")?;
        } else {
            warn!(uid, "Server lacks UIDPLUS, leaving copied message flagged \\Deleted");
        }
        Ok(())
    }

    /// Whether the server advertises `name`. Queried once per session.
    pub fn has_capability(&mut self, name: &str) -> Result<bool, TransportError> {
        if self.capabilities.is_none() {
            let response = self.command("CAPABILITY")?.ensure_ok("CAPABILITY")?;
            self.capabilities = Some(parse_capabilities(&response.untagged));
        }
        Ok(self
            .capabilities
            .as_ref()
            .is_some_and(|caps| caps.iter().any(|c| c.eq_ignore_ascii_case(name))))
    }

    pub fn logout(&mut self) -> Result<(), TransportError> {
        self.command("LOGOUT")?;
        Ok(())
    }

    /// Send one command and collect its response.
    pub fn command(&mut self, command: &str) -> Result<Response, TransportError> {
        let tag = self.tag();
        self.write_all(format!("{tag} {command}\r\n").as_bytes())?;
        self.read_until_tagged(&tag)
    }

    fn tag(&mut self) -> String {
        let tag = format!("A{:04}", self.next_tag);
        self.next_tag += 1;
        tag
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.get_mut();
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    fn read_until_tagged(&mut self, tag: &str) -> Result<Response, TransportError> {
        let prefix = format!("{tag} ");
        let mut untagged = Vec::new();
        loop {
            let line = self.read_line()?;
            if let Some(rest) = line.text.strip_prefix(&prefix) {
                let rest = rest.trim_end();
                let (word, detail) = rest.split_once(' ').unwrap_or((rest, ""));
                let status = match word.to_ascii_uppercase().as_str() {
                    "OK" => Status::Ok,
                    "NO" => Status::No,
                    _ => Status::Bad,
                };
                return Ok(Response {
                    untagged,
                    status,
                    detail: detail.to_string(),
                });
            }
            untagged.push(line);
        }
    }

    /// Read one logical response line, pulling in any `{n}` literals.
    fn read_line(&mut self) -> Result<ResponseLine, TransportError> {
        let mut line = ResponseLine::default();
        loop {
            let mut buf = Vec::new();
            let n = self.stream.read_until(b'\n', &mut buf)?;
            if n == 0 {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "IMAP connection closed",
                )));
            }
            let chunk = String::from_utf8_lossy(&buf).into_owned();
            let literal_len = literal_length(&chunk);
            line.text.push_str(&chunk);

            let Some(len) = literal_len else {
                return Ok(line);
            };
            let mut literal = vec![0u8; len];
            self.stream.read_exact(&mut literal)?;
            line.literals.push(literal);
        }
    }
}

/// Length announced by a trailing `{n}` literal marker, if any.
fn literal_length(chunk: &str) -> Option<usize> {
    let trimmed = chunk.trim_end_matches(['\r', '\n']);
    let inner = trimmed.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].trim_end_matches('+').parse().ok()
}

/// Collect UIDs from `* SEARCH` lines.
fn parse_search(lines: &[ResponseLine]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|line| line.text.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace())
        .filter_map(|uid| uid.parse().ok())
        .collect()
}

/// Collect atoms from `* CAPABILITY` lines.
fn parse_capabilities(lines: &[ResponseLine]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| line.text.strip_prefix("* CAPABILITY"))
        .flat_map(|rest| rest.split_whitespace())
        .map(str::to_string)
        .collect()
}

/// IMAP quoted string.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    /// Scripted server: reads from a canned transcript, records writes.
    struct Scripted {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Scripted {
        fn new(server: &str) -> Self {
            Self {
                input: Cursor::new(server.as_bytes().to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn sent(session: ImapSession<Scripted>) -> String {
        String::from_utf8(session.stream.into_inner().output).unwrap()
    }

    #[test]
    fn quote_escapes() {
        assert_eq!(quote("Sent"), "\"Sent\"");
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    #[test]
    fn literal_length_parsing() {
        assert_eq!(literal_length("* 1 FETCH (UID 5 BODY[] {42}\r\n"), Some(42));
        assert_eq!(literal_length("* OK done\r\n"), None);
        assert_eq!(literal_length("A0001 APPEND \"x\" {7+}\r\n"), Some(7));
    }

    #[test]
    fn login_success() {
        let mut session = ImapSession::new(Scripted::new("A0001 OK LOGIN completed\r\n"));
        session.login("me@example.com", "p\"w").unwrap();
        assert_eq!(sent(session), "A0001 LOGIN \"me@example.com\" \"p\\\"w\"\r\n");
    }

    #[test]
    fn login_failure_is_auth_error() {
        let mut session =
            ImapSession::new(Scripted::new("A0001 NO [AUTHENTICATIONFAILED] bad creds\r\n"));
        let err = session.login("me", "pw").unwrap_err();
        assert!(matches!(err, TransportError::Auth { .. }));
    }

    #[test]
    fn search_collects_uids() {
        let server = "* SEARCH 3 7 12\r\nA0001 OK SEARCH completed\r\n";
        let mut session = ImapSession::new(Scripted::new(server));
        assert_eq!(session.uid_search_undeleted().unwrap(), vec![3, 7, 12]);
        assert_eq!(sent(session), "A0001 UID SEARCH UNDELETED\r\n");
    }

    #[test]
    fn search_empty_folder() {
        let server = "* SEARCH\r\nA0001 OK SEARCH completed\r\n";
        let mut session = ImapSession::new(Scripted::new(server));
        assert!(session.uid_search_undeleted().unwrap().is_empty());
    }

    #[test]
    fn fetch_reads_literal_exactly() {
        let body = "Subject: Hi\r\n\r\nA line with ) and {3}\r\n";
        let server = format!(
            "* 1 FETCH (UID 9 BODY[] {{{}}}\r\n{body})\r\nA0001 OK FETCH completed\r\n",
            body.len()
        );
        let mut session = ImapSession::new(Scripted::new(&server));
        let raw = session.uid_fetch(9).unwrap().unwrap();
        assert_eq!(raw, body.as_bytes());
        assert_eq!(sent(session), "A0001 UID FETCH 9 (BODY.PEEK[])\r\n");
    }

    #[test]
    fn fetch_missing_message() {
        let mut session = ImapSession::new(Scripted::new("A0001 OK FETCH completed\r\n"));
        assert_eq!(session.uid_fetch(4).unwrap(), None);
    }

    #[test]
    fn append_waits_for_continuation() {
        let server = "+ Ready for literal data\r\nA0001 OK APPEND completed\r\n";
        let mut session = ImapSession::new(Scripted::new(server));
        session.append("Sent", "\\Seen", b"hello").unwrap();
        assert_eq!(
            sent(session),
            "A0001 APPEND \"Sent\" (\\Seen) {5}\r\nhello\r\n"
        );
    }

    #[test]
    fn append_skips_untagged_before_continuation() {
        let server = "* 5 EXISTS\r\n\
                      + Ready for literal data\r\n\
                      * 6 EXISTS\r\n\
                      A0001 OK APPEND completed\r\n";
        let mut session = ImapSession::new(Scripted::new(server));
        session.append("Sent", "\\Seen", b"hello").unwrap();
        assert_eq!(
            sent(session),
            "A0001 APPEND \"Sent\" (\\Seen) {5}\r\nhello\r\n"
        );
    }

    #[test]
    fn append_rejected_after_untagged() {
        let server = "* 5 EXISTS\r\nA0001 NO [TRYCREATE] no such mailbox\r\n";
        let mut session = ImapSession::new(Scripted::new(server));
        let err = session.append("Missing", "\\Seen", b"x").unwrap_err();
        assert!(
            matches!(err, TransportError::Protocol { ref reason, .. } if reason.contains("TRYCREATE"))
        );
    }

    #[test]
    fn append_rejected() {
        let server = "A0001 NO [TRYCREATE] no such mailbox\r\n";
        let mut session = ImapSession::new(Scripted::new(server));
        let err = session.append("Missing", "\\Seen", b"x").unwrap_err();
        assert!(matches!(err, TransportError::Protocol { .. }));
    }

    #[test]
    fn move_uses_uid_move() {
        let mut session = ImapSession::new(Scripted::new("A0001 OK MOVE completed\r\n"));
        session.uid_move(5, "Done").unwrap();
        assert_eq!(sent(session), "A0001 UID MOVE 5 \"Done\"\r\n");
    }

    #[test]
    fn move_falls_back_to_copy_and_uid_expunge() {
        let server = "A0001 BAD unknown command\r\n\
                      A0002 OK COPY completed\r\n\
                      A0003 OK STORE completed\r\n\
                      * CAPABILITY IMAP4rev1 UIDPLUS IDLE\r\n\
                      A0004 OK CAPABILITY completed\r\n\
                      A0005 OK EXPUNGE completed\r\n";
        let mut session = ImapSession::new(Scripted::new(server));
        session.uid_move(5, "Done").unwrap();
        assert_eq!(
            sent(session),
            "A0001 UID MOVE 5 \"Done\"\r\n\
             A0002 UID COPY 5 \"Done\"\r\n\
             A0003 UID STORE 5 +FLAGS.SILENT (\\Deleted)\r\n\
             A0004 CAPABILITY\r\n\
             A0005 UID EXPUNGE 5\r\n"
        );
    }

    #[test]
    fn move_fallback_without_uidplus_never_expunges_folder() {
        let server = "A0001 BAD unknown command\r\n\
                      A0002 OK COPY completed\r\n\
                      A0003 OK STORE completed\r\n\
                      * CAPABILITY IMAP4rev1 IDLE\r\n\
                      A0004 OK CAPABILITY completed\r\n";
        let mut session = ImapSession::new(Scripted::new(server));
        session.uid_move(5, "Done").unwrap();
        let written = sent(session);
        assert!(written.ends_with("A0004 CAPABILITY\r\n"));
        assert!(!written.contains("EXPUNGE"));
    }

    #[test]
    fn capabilities_queried_once() {
        let server = "* CAPABILITY IMAP4rev1 MOVE UIDPLUS\r\nA0001 OK done\r\n";
        let mut session = ImapSession::new(Scripted::new(server));
        assert!(session.has_capability("uidplus").unwrap());
        assert!(session.has_capability("MOVE").unwrap());
        assert!(!session.has_capability("CONDSTORE").unwrap());
        assert_eq!(sent(session), "A0001 CAPABILITY\r\n");
    }

    #[test]
    fn closed_connection_is_io_error() {
        let mut session = ImapSession::new(Scripted::new(""));
        assert!(matches!(
            session.command("NOOP").unwrap_err(),
            TransportError::Io(_)
        ));
    }
}
