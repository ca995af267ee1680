//! LineProtocolFramer: bounded-line reader, literal-string handling,
//! UTF-8-without-BOM writer. A single line-oriented reader/writer pair
//! that hand-rolls its own wire codec rather than delegating to a codec
//! crate.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::error::SessionError;
use crate::parser;

/// Lines beyond this many bytes before a CRLF are rejected with
/// `LineTooLong`.
pub const MAX_LINE_LEN: usize = 8192;

pub struct LineProtocolFramer<S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    /// Bytes already read past the terminating CRLF of the previous line,
    /// carried over from a prior `read_line` call (there is none here:
    /// each line read stops exactly at CRLF, so this only ever holds
    /// leftover bytes when a caller mixes `read_line`/`read_exact_bytes`
    /// mid-literal, which does not happen in this engine).
    pending: Vec<u8>,
}

impl<S> LineProtocolFramer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader,
            writer,
            pending: Vec::new(),
        }
    }

    /// Reads one CRLF-terminated line, stripping the CRLF. Returns `Ok(None)`
    /// on clean EOF with no bytes read. Bytes beyond `MAX_LINE_LEN` before a
    /// CRLF is found yield `SessionError::LineTooLong`.
    pub async fn read_line(&mut self) -> Result<Option<String>, SessionError> {
        let mut buf = std::mem::take(&mut self.pending);
        let mut byte = [0u8; 1];
        loop {
            if buf.len() > MAX_LINE_LEN {
                return Err(SessionError::LineTooLong);
            }
            let n = self
                .reader
                .read(&mut byte)
                .await
                .map_err(|e| SessionError::Transport(e.to_string()))?;
            if n == 0 {
                if buf.is_empty() {
                    return Ok(None);
                }
                return Err(SessionError::Transport("connection closed mid-line".into()));
            }
            if byte[0] == b'\n' {
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                return Ok(Some(line));
            }
            buf.push(byte[0]);
        }
    }

    /// Reads exactly `n` bytes for a `{N}` literal.
    pub async fn read_exact_bytes(&mut self, n: usize) -> Result<Vec<u8>, SessionError> {
        let mut buf = vec![0u8; n];
        self.reader
            .read_exact(&mut buf)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        Ok(buf)
    }

    /// Reads one full command line, splicing in any `{N}`/`{N+}` literal
    /// continuations as quoted tokens so the result is a single line
    /// `CommandParser::parse_line` can tokenize directly. A `{N}`
    /// (synchronizing) marker gets a `+ Ready for literal data`
    /// continuation request written before the literal bytes are read; a
    /// `{N+}` (non-synchronizing, `LITERAL+`) marker is read straight
    /// through with no continuation prompt.
    pub async fn read_command_line(&mut self) -> Result<Option<String>, SessionError> {
        let mut assembled = String::new();
        loop {
            let segment = match self.read_line().await? {
                Some(s) => s,
                None => {
                    if assembled.is_empty() {
                        return Ok(None);
                    }
                    return Err(SessionError::Transport("connection closed mid-literal".into()));
                }
            };

            match parser::trailing_literal(&segment) {
                Some((n, non_synchronizing)) => {
                    if n > MAX_LINE_LEN {
                        return Err(SessionError::LineTooLong);
                    }
                    push_segment(&mut assembled, parser::strip_trailing_literal_marker(&segment));
                    if !non_synchronizing {
                        self.write_line("+ Ready for literal data").await?;
                    }
                    let bytes = self.read_exact_bytes(n).await?;
                    let literal = String::from_utf8_lossy(&bytes).into_owned();
                    push_segment(&mut assembled, &quote_literal(&literal));
                }
                None => {
                    push_segment(&mut assembled, &segment);
                    return Ok(Some(assembled));
                }
            }
        }
    }

    /// Writes one line, CRLF-terminated, UTF-8 without BOM, then flushes.
    pub async fn write_line(&mut self, line: &str) -> Result<(), SessionError> {
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        self.writer
            .write_all(b"\r\n")
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    /// Writes a literal-framed payload: `{N}\r\n<bytes>` with no trailing
    /// CRLF of its own (the caller's response line supplies it).
    pub async fn write_literal(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        self.writer
            .write_all(format!("{{{}}}\r\n", payload.len()).as_bytes())
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        self.writer
            .write_all(payload)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    /// Best-effort `* BYE` then flush; broken-pipe errors are swallowed.
    pub async fn close_with_bye(&mut self, message: &str) {
        let line = format!("* BYE {}", message);
        if self.writer.write_all(line.as_bytes()).await.is_err() {
            return;
        }
        let _ = self.writer.write_all(b"\r\n").await;
        let _ = self.writer.flush().await;
    }
}

fn push_segment(assembled: &mut String, segment: &str) {
    if segment.is_empty() {
        return;
    }
    if !assembled.is_empty() {
        assembled.push(' ');
    }
    assembled.push_str(segment);
}

/// Wraps literal content as a double-quoted token, escaping `"` and `\`
/// so `CommandParser`'s tokenizer reads it back as one argument.
fn quote_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_literal_escapes_quotes_and_backslashes() {
        assert_eq!(quote_literal("alice"), "\"alice\"");
        assert_eq!(quote_literal(r#"al"ice\x"#), r#""al\"ice\\x""#);
    }

    #[test]
    fn push_segment_joins_with_single_space() {
        let mut s = String::new();
        push_segment(&mut s, "a1");
        push_segment(&mut s, "LOGIN");
        push_segment(&mut s, "");
        push_segment(&mut s, "\"alice\"");
        assert_eq!(s, "a1 LOGIN \"alice\"");
    }
}
