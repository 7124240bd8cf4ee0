//! Admin console client.
//!
//! Minecraft servers expose a remote console on a dedicated TCP port
//! protected by a password; the provisioner enables it in
//! `server.properties` with the vault-held secret. Frames follow the
//! de-facto game-server convention: little-endian `i32` length, request
//! id, packet type, then a NUL-terminated body and a terminating NUL.
//! Authentication failure is reported by the server echoing request id
//! `-1`.
//!
//! The commands this client issues (`list`, kicks, say, whitelist edits)
//! answer in a single frame, so no multi-frame reassembly is attempted.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Error, Result};

const PACKET_TYPE_AUTH: i32 = 3;
const PACKET_TYPE_COMMAND: i32 = 2;
/// Body bytes, ids, type, and the two trailing NULs must fit the frame.
const MAX_FRAME_LEN: i32 = 4096;

/// Parsed result of the `list` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerList {
    /// Players currently online
    pub online: u32,
    /// Configured player slots
    pub max: u32,
    /// Names of the online players
    pub names: Vec<String>,
}

static LIST_RESPONSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^There are (\d+) of a max of (\d+) players online:\s*(.*)$")
        .expect("invalid list response regex")
});

/// Parses the fixed sentence template the `list` command answers with.
pub fn parse_player_list(response: &str) -> Result<PlayerList> {
    let response = response.trim();
    let captures = LIST_RESPONSE.captures(response).ok_or_else(|| {
        Error::Internal(format!("unrecognized list response: {response:?}"))
    })?;

    let online: u32 = captures[1]
        .parse()
        .map_err(|_| Error::Internal(format!("bad player count in: {response:?}")))?;
    let max: u32 = captures[2]
        .parse()
        .map_err(|_| Error::Internal(format!("bad player max in: {response:?}")))?;
    let names: Vec<String> = captures[3]
        .split(',')
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();

    Ok(PlayerList { online, max, names })
}

/// Encodes one console frame.
fn encode_frame(id: i32, kind: i32, body: &str) -> Vec<u8> {
    let len = (4 + 4 + body.len() + 2) as i32;
    let mut buf = Vec::with_capacity(4 + len as usize);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&kind.to_le_bytes());
    buf.extend_from_slice(body.as_bytes());
    buf.extend_from_slice(&[0, 0]);
    buf
}

/// Decodes a frame payload (everything after the length prefix) into
/// (request id, type, body).
fn decode_frame(payload: &[u8]) -> Result<(i32, i32, String)> {
    if payload.len() < 10 {
        return Err(Error::Internal(format!(
            "console frame too short: {} bytes",
            payload.len()
        )));
    }
    let id = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let kind = i32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
    let body = &payload[8..payload.len() - 2];
    let body = String::from_utf8_lossy(body).into_owned();
    Ok((id, kind, body))
}

/// A connected, authenticated console session.
#[derive(Debug)]
pub struct ConsoleClient {
    stream: TcpStream,
    endpoint: String,
    io_timeout: Duration,
    next_id: i32,
}

impl ConsoleClient {
    /// Connects to a server's console port and authenticates. A rejected
    /// password surfaces as `ConnectionFailed`, like every other way of
    /// not reaching the console.
    pub async fn connect(
        addr: &str,
        port: u16,
        password: &str,
        io_timeout: Duration,
    ) -> Result<Self> {
        let endpoint = format!("{addr}:{port}");
        let stream = tokio::time::timeout(io_timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| Error::connection_failed(&endpoint, "console connect timed out"))?
            .map_err(|e| Error::connection_failed(&endpoint, e.to_string()))?;

        let mut client = Self {
            stream,
            endpoint,
            io_timeout,
            next_id: 1,
        };
        client.authenticate(password).await?;
        debug!(endpoint = %client.endpoint, "Console session authenticated");
        Ok(client)
    }

    /// Sends a text command and returns the response body.
    pub async fn command(&mut self, command: &str) -> Result<String> {
        let id = self.send(PACKET_TYPE_COMMAND, command).await?;
        let (response_id, _, body) = self.receive().await?;
        if response_id != id {
            return Err(Error::connection_failed(
                &self.endpoint,
                format!("console answered request {response_id}, expected {id}"),
            ));
        }
        Ok(body)
    }

    /// Issues `list` and parses the player summary.
    pub async fn list_players(&mut self) -> Result<PlayerList> {
        let response = self.command("list").await?;
        parse_player_list(&response)
    }

    async fn authenticate(&mut self, password: &str) -> Result<()> {
        let id = self.send(PACKET_TYPE_AUTH, password).await?;
        let (response_id, _, _) = self.receive().await?;
        if response_id == -1 {
            return Err(Error::connection_failed(
                &self.endpoint,
                "console password rejected",
            ));
        }
        if response_id != id {
            return Err(Error::connection_failed(
                &self.endpoint,
                format!("console auth answered request {response_id}, expected {id}"),
            ));
        }
        Ok(())
    }

    async fn send(&mut self, kind: i32, body: &str) -> Result<i32> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let frame = encode_frame(id, kind, body);
        tokio::time::timeout(self.io_timeout, self.stream.write_all(&frame))
            .await
            .map_err(|_| Error::connection_failed(&self.endpoint, "console write timed out"))?
            .map_err(|e| Error::connection_failed(&self.endpoint, e.to_string()))?;
        Ok(id)
    }

    async fn receive(&mut self) -> Result<(i32, i32, String)> {
        let mut len_buf = [0u8; 4];
        self.read_exact(&mut len_buf).await?;
        let len = i32::from_le_bytes(len_buf);
        if !(10..=MAX_FRAME_LEN).contains(&len) {
            return Err(Error::connection_failed(
                &self.endpoint,
                format!("console sent an invalid frame length {len}"),
            ));
        }

        let mut payload = vec![0u8; len as usize];
        self.read_exact(&mut payload).await?;
        decode_frame(&payload)
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        tokio::time::timeout(self.io_timeout, self.stream.read_exact(buf))
            .await
            .map_err(|_| Error::connection_failed(&self.endpoint, "console read timed out"))?
            .map_err(|e| Error::connection_failed(&self.endpoint, e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_round_trip() {
        let frame = encode_frame(7, PACKET_TYPE_COMMAND, "list");
        // length prefix counts id + type + body + two NULs
        assert_eq!(&frame[0..4], &14i32.to_le_bytes());
        let (id, kind, body) = decode_frame(&frame[4..]).unwrap();
        assert_eq!(id, 7);
        assert_eq!(kind, PACKET_TYPE_COMMAND);
        assert_eq!(body, "list");
    }

    #[test]
    fn empty_body_frame() {
        let frame = encode_frame(1, PACKET_TYPE_AUTH, "");
        assert_eq!(&frame[0..4], &10i32.to_le_bytes());
        let (_, _, body) = decode_frame(&frame[4..]).unwrap();
        assert_eq!(body, "");
    }

    #[test]
    fn short_frames_are_rejected() {
        assert!(decode_frame(&[0, 0, 0]).is_err());
    }

    #[test]
    fn list_response_with_players() {
        let parsed =
            parse_player_list("There are 3 of a max of 20 players online: Alice, bob_2, xX_Creeper_Xx")
                .unwrap();
        assert_eq!(parsed.online, 3);
        assert_eq!(parsed.max, 20);
        assert_eq!(parsed.names, vec!["Alice", "bob_2", "xX_Creeper_Xx"]);
    }

    #[test]
    fn list_response_empty_server() {
        let parsed = parse_player_list("There are 0 of a max of 20 players online:").unwrap();
        assert_eq!(parsed.online, 0);
        assert_eq!(parsed.max, 20);
        assert!(parsed.names.is_empty());

        // Some builds keep a trailing space after the colon.
        let parsed = parse_player_list("There are 0 of a max of 20 players online: \n").unwrap();
        assert!(parsed.names.is_empty());
    }

    #[test]
    fn deviations_from_the_template_fail() {
        for bad in [
            "",
            "3 players online",
            "There are three of a max of 20 players online:",
            "Currently 3 of 20 online: a, b, c",
        ] {
            assert!(parse_player_list(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[tokio::test]
    async fn auth_rejection_is_a_connection_failure() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut len_buf = [0u8; 4];
            socket.read_exact(&mut len_buf).await.unwrap();
            let len = i32::from_le_bytes(len_buf) as usize;
            let mut payload = vec![0u8; len];
            socket.read_exact(&mut payload).await.unwrap();
            // Reply with request id -1: password rejected.
            let reject = encode_frame(-1, PACKET_TYPE_COMMAND, "");
            socket.write_all(&reject).await.unwrap();
        });

        let err = ConsoleClient::connect("127.0.0.1", port, "wrong", Duration::from_secs(2))
            .await
            .unwrap_err();
        match err {
            Error::ConnectionFailed { message, .. } => {
                assert!(message.contains("password rejected"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn command_round_trip_against_a_scripted_server() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Auth frame: echo the request id back.
            let mut len_buf = [0u8; 4];
            socket.read_exact(&mut len_buf).await.unwrap();
            let len = i32::from_le_bytes(len_buf) as usize;
            let mut payload = vec![0u8; len];
            socket.read_exact(&mut payload).await.unwrap();
            let (id, _, body) = decode_frame(&payload).unwrap();
            assert_eq!(body, "hunter2hunter2hunter2hunter2else");
            socket.write_all(&encode_frame(id, 2, "")).await.unwrap();

            // Command frame: answer the list sentence.
            socket.read_exact(&mut len_buf).await.unwrap();
            let len = i32::from_le_bytes(len_buf) as usize;
            let mut payload = vec![0u8; len];
            socket.read_exact(&mut payload).await.unwrap();
            let (id, _, body) = decode_frame(&payload).unwrap();
            assert_eq!(body, "list");
            let answer = "There are 2 of a max of 10 players online: steve, alex";
            socket.write_all(&encode_frame(id, 0, answer)).await.unwrap();
        });

        let mut client = ConsoleClient::connect(
            "127.0.0.1",
            port,
            "hunter2hunter2hunter2hunter2else",
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        let players = client.list_players().await.unwrap();
        assert_eq!(players.online, 2);
        assert_eq!(players.names, vec!["steve", "alex"]);
    }
}
