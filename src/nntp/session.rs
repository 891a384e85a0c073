use std::io::{Read, Write};

use super::connector::{self, NetStream};
use super::framing::{LineReader, encode_block};
use crate::config::NetworkConfig;
use crate::error::{Error, Result};

/// Where a session is in its lifecycle. A dropped or quit session is
/// disconnected; there is no value for that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Authenticated,
    ChannelSelected,
}

/// Result of selecting a newsgroup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
    pub estimated_count: u64,
    pub low: u64,
    pub high: u64,
}

/// A fetched article: headers, blank line and body, lines joined with `\n`.
#[derive(Debug, Clone)]
pub struct Article {
    pub number: u64,
    pub text: String,
}

/// First line of a server reply.
#[derive(Debug, Clone)]
pub struct Response {
    pub code: u16,
    pub line: String,
}

impl Response {
    fn parse(command: &str, line: String) -> Result<Self> {
        let code = line
            .get(..3)
            .and_then(|c| c.parse::<u16>().ok())
            .ok_or_else(|| Error::protocol(command, &line))?;
        Ok(Self { code, line })
    }

    /// Whitespace-separated fields after the status code.
    fn fields(&self) -> Vec<&str> {
        self.line.split_whitespace().skip(1).collect()
    }
}

/// One synchronous NNTP conversation. Commands are strictly sequential; each
/// call blocks until its reply has been read in full.
pub struct Session<S> {
    reader: LineReader<S>,
    state: SessionState,
    channel: Option<ChannelInfo>,
}

impl Session<NetStream> {
    /// Connects, reads the greeting and logs in with the configured credentials.
    pub fn open(config: &NetworkConfig) -> Result<Self> {
        let credentials = config.require_credentials()?;
        tracing::debug!("Connecting to {}:{}", credentials.host, credentials.port);
        let stream = connector::open(credentials, config.timeout())?;
        let mut session = Session::start(stream)?;
        session.authenticate(&credentials.username, &credentials.password)?;
        Ok(session)
    }
}

impl<S: Read + Write> Session<S> {
    /// Wraps an established stream and consumes the server greeting.
    pub fn start(stream: S) -> Result<Self> {
        let mut reader = LineReader::new(stream);
        let greeting = reader.read_line()?;
        let greeting = Response::parse("greeting", greeting)?;
        if greeting.code >= 400 {
            return Err(Error::Connection(format!(
                "server refused service: {}",
                greeting.line
            )));
        }
        tracing::debug!("< {}", greeting.line);

        Ok(Self {
            reader,
            state: SessionState::Connected,
            channel: None,
        })
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn channel(&self) -> Option<&ChannelInfo> {
        self.channel.as_ref()
    }

    /// Gives back the underlying stream without saying goodbye.
    pub fn into_stream(self) -> S {
        self.reader.into_inner()
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
        Ok(())
    }

    /// Sends one command and reads its status line. `shown` is what gets
    /// logged and reported, so secrets never leave the session.
    fn exchange(&mut self, command: &str, shown: &str) -> Result<Response> {
        tracing::debug!("> {shown}");
        self.send_line(command)?;
        let line = self.reader.read_line()?;
        tracing::debug!("< {line}");
        Response::parse(shown, line)
    }

    /// Issues a raw command and returns its status line.
    pub fn command(&mut self, command: &str) -> Result<Response> {
        self.exchange(command, command)
    }

    fn require(&self, allowed: &[SessionState], operation: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::protocol(
                operation,
                &format!("not allowed in state {:?}", self.state),
            ))
        }
    }

    pub fn authenticate(&mut self, username: &str, password: &str) -> Result<()> {
        self.require(&[SessionState::Connected], "AUTHINFO")?;

        let user = self.exchange(&format!("AUTHINFO USER {username}"), "AUTHINFO USER")?;
        match user.code {
            281 => {}
            381 => {
                let pass = self.exchange(&format!("AUTHINFO PASS {password}"), "AUTHINFO PASS")?;
                if pass.code != 281 {
                    return Err(Error::AuthenticationFailed(pass.line));
                }
            }
            _ => return Err(Error::AuthenticationFailed(user.line)),
        }

        self.state = SessionState::Authenticated;
        Ok(())
    }

    /// Selects a newsgroup. A `211` reply too short to carry the watermarks
    /// gives `None`, any other status is a protocol error.
    pub fn select_channel(&mut self, name: &str) -> Result<Option<ChannelInfo>> {
        self.require(
            &[SessionState::Authenticated, SessionState::ChannelSelected],
            "GROUP",
        )?;

        let command = format!("GROUP {}", single_line(name));
        let response = self.command(&command)?;
        if response.code != 211 {
            return Err(Error::protocol(&command, &response.line));
        }

        let info = parse_group(&response, name);
        if info.is_none() {
            tracing::warn!("Malformed GROUP reply: {}", response.line);
        }
        self.channel = info.clone();
        self.state = if info.is_some() {
            SessionState::ChannelSelected
        } else {
            SessionState::Authenticated
        };
        Ok(info)
    }

    /// Posts `text` as a new article. Returns whether the server accepted it.
    pub fn publish(&mut self, text: &str, subject: &str, channel: &str, from: &str) -> Result<bool> {
        self.require(
            &[SessionState::Authenticated, SessionState::ChannelSelected],
            "POST",
        )?;

        let response = self.command("POST")?;
        match response.code {
            340 => {}
            440 => {
                tracing::warn!("Posting not permitted: {}", response.line);
                return Ok(false);
            }
            _ => return Err(Error::protocol("POST", &response.line)),
        }

        let mut article = String::with_capacity(text.len() + 256);
        article.push_str(&format!("From: {}\r\n", single_line(from)));
        article.push_str(&format!("Subject: {}\r\n", single_line(subject)));
        article.push_str(&format!("Newsgroups: {}\r\n", single_line(channel)));
        article.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        article.push_str("\r\n");
        article.push_str(&encode_block(text));

        let stream = self.reader.get_mut();
        stream.write_all(article.as_bytes())?;
        stream.flush()?;

        let line = self.reader.read_line()?;
        tracing::debug!("< {line}");
        let response = Response::parse("POST body", line)?;
        match response.code {
            240 => Ok(true),
            441 => {
                tracing::warn!("Article rejected: {}", response.line);
                Ok(false)
            }
            _ => Err(Error::protocol("POST body", &response.line)),
        }
    }

    /// Fetches one article. `None` when the server has no such article.
    pub fn fetch_article(&mut self, number: u64) -> Result<Option<String>> {
        self.require(
            &[SessionState::Authenticated, SessionState::ChannelSelected],
            "ARTICLE",
        )?;

        let command = format!("ARTICLE {number}");
        let response = self.command(&command)?;
        match response.code {
            220 => {
                let lines = self.reader.read_block()?;
                Ok(Some(lines.join("\n")))
            }
            400..=499 => {
                tracing::debug!("Skipping article {number}: {}", response.line);
                Ok(None)
            }
            _ => Err(Error::protocol(&command, &response.line)),
        }
    }

    /// Walks the selected channel from `high` down, visiting at most `limit`
    /// articles and never going below `low`.
    ///
    /// Articles the server cannot supply are skipped. An I/O or protocol error
    /// is yielded once and ends the walk.
    pub fn fetch_range(&mut self, low: u64, high: u64, limit: u64) -> Articles<'_, S> {
        let floor = low.max(high.saturating_sub(limit.saturating_sub(1)));
        let next = if limit == 0 || high == 0 || high < floor {
            None
        } else {
            Some(high)
        };
        Articles {
            session: self,
            next,
            floor,
        }
    }

    /// Says goodbye and closes the connection.
    pub fn quit(mut self) -> Result<()> {
        let response = self.command("QUIT")?;
        if response.code != 205 {
            tracing::debug!("Unexpected QUIT reply: {}", response.line);
        }
        Ok(())
    }
}

/// Lazy article walk produced by [`Session::fetch_range`]. Not restartable.
pub struct Articles<'a, S> {
    session: &'a mut Session<S>,
    next: Option<u64>,
    floor: u64,
}

impl<S: Read + Write> Iterator for Articles<'_, S> {
    type Item = Result<Article>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let number = self.next?;
            self.next = if number > self.floor {
                Some(number - 1)
            } else {
                None
            };

            match self.session.fetch_article(number) {
                Ok(Some(text)) => return Some(Ok(Article { number, text })),
                Ok(None) => continue,
                Err(e) => {
                    self.next = None;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn parse_group(response: &Response, requested: &str) -> Option<ChannelInfo> {
    let fields = response.fields();
    if fields.len() < 3 {
        return None;
    }
    let estimated_count = fields[0].parse().ok()?;
    let low = fields[1].parse().ok()?;
    let high = fields[2].parse().ok()?;
    let name = fields.get(3).copied().unwrap_or(requested).to_string();
    Some(ChannelInfo {
        name,
        estimated_count,
        low,
        high,
    })
}

/// Header values and command arguments must not carry line breaks.
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}
