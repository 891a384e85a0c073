#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use deepsea::packet::{Packet, pack_with};

/// An in-memory news server: replays a canned reply script in small chunks
/// and records everything the client sends.
pub struct ScriptedServer {
    input: Vec<u8>,
    pos: usize,
    chunk: usize,
    pub written: Vec<u8>,
}

impl ScriptedServer {
    pub fn new(script: &str) -> Self {
        Self {
            input: script.as_bytes().to_vec(),
            pos: 0,
            chunk: 7,
            written: Vec::new(),
        }
    }

    pub fn sent(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }
}

impl Read for ScriptedServer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.chunk).min(self.input.len() - self.pos);
        buf[..n].copy_from_slice(&self.input[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for ScriptedServer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Greeting plus a successful two-step login.
pub const LOGIN: &str = "200 news.example.org ready\r\n381 password required\r\n281 welcome\r\n";

pub fn group_reply(channel: &str, low: u64, high: u64) -> String {
    format!("211 {} {low} {high} {channel}\r\n", high.saturating_sub(low) + 1)
}

/// A `220` reply carrying `body` under packet-style headers, dot-stuffed.
pub fn article_reply(number: u64, subject: &str, body: &str) -> String {
    let mut reply = format!("220 {number} <{number}@example> article\r\n");
    reply.push_str(&format!("Subject: {subject}\r\n"));
    reply.push_str("Newsgroups: alt.test\r\n\r\n");
    for line in body.split('\n') {
        if line.starts_with('.') {
            reply.push('.');
        }
        reply.push_str(line);
        reply.push_str("\r\n");
    }
    reply.push_str(".\r\n");
    reply
}

pub fn packet_reply(number: u64, packet: &Packet) -> String {
    article_reply(number, &packet.subject(), &packet.to_wire().unwrap())
}

pub fn missing_reply() -> String {
    "423 no such article\r\n".to_string()
}

pub fn sample_packet(repo: &str, message: &str) -> Packet {
    let mut files = BTreeMap::new();
    files.insert("README.md".to_string(), b"# hello\n".to_vec());
    files.insert("src/main.rs".to_string(), b"fn main() {}\n".to_vec());
    pack_with(&files, repo, Some("alice"), message).unwrap()
}
