//! Uploads of large archives to the bulk file drop.
//!
//! `ftp://` drops use a small passive-mode client; `http://` and
//! `https://` drops take a PUT of the file body.

use std::path::Path;

use regex::Regex;
use reqwest::{Client, Url};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::io::ReaderStream;

use super::BulkDrop;
use crate::config::{concat_url, Settings};
use crate::error::ReportError;

const FTP_PORT: u16 = 21;
const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "anonymous@";

/// Uploader for `ftp://`, `http://` and `https://` drop URLs.
#[derive(Debug, Clone)]
pub struct DropUploader {
    client: Client,
}

impl DropUploader {
    pub fn new(settings: &Settings) -> Result<Self, ReportError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!settings.ssl_verify)
            .build()
            .map_err(|e| ReportError::Http(e.to_string()))?;
        Ok(Self { client })
    }

    async fn put(&self, remote: &str, file: &Path) -> Result<(), ReportError> {
        let handle = tokio::fs::File::open(file).await?;
        let len = handle.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(handle));

        let response = self
            .client
            .put(remote)
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await
            .map_err(|e| ReportError::Http(format!("{remote}: {e}")))?;

        if !response.status().is_success() {
            return Err(ReportError::Http(format!(
                "Error in file upload at '{remote}', HTTP code: {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}

impl BulkDrop for DropUploader {
    async fn upload(&self, drop_url: &str, file: &Path) -> Result<String, ReportError> {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ReportError::Http(format!("No file name in '{}'", file.display())))?;
        let remote = concat_url(drop_url, &name);
        let url = Url::parse(drop_url)
            .map_err(|e| ReportError::Config(format!("Invalid upload URL '{drop_url}': {e}")))?;

        eprintln!("Uploading '{}' to '{}'", file.display(), drop_url);
        match url.scheme() {
            "ftp" => ftp_store(&url, &name, file).await?,
            "http" | "https" => self.put(&remote, file).await?,
            scheme => {
                return Err(ReportError::Config(format!(
                    "Unsupported upload URL scheme '{scheme}'"
                )))
            }
        }
        tracing::info!("uploaded {} to {}", file.display(), remote);
        Ok(remote)
    }
}

/// Control connection of an FTP session.
struct FtpControl {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl FtpControl {
    async fn connect(host: &str, port: u16) -> Result<Self, ReportError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| ftp_error(format!("can't connect to {host}:{port}: {e}")))?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer,
        })
    }

    /// Reads one reply, following multi-line `NNN-` continuations.
    async fn reply(&mut self) -> Result<(u16, String), ReportError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(ftp_error("connection closed by server".into()));
        }
        let code = reply_code(&line)?;
        if line.as_bytes().get(3) == Some(&b'-') {
            let last = format!("{code} ");
            loop {
                let mut next = String::new();
                if self.reader.read_line(&mut next).await? == 0 {
                    return Err(ftp_error("connection closed by server".into()));
                }
                if next.starts_with(&last) {
                    line = next;
                    break;
                }
            }
        }
        Ok((code, line.trim_end().to_string()))
    }

    async fn command(&mut self, command: &str) -> Result<(u16, String), ReportError> {
        tracing::debug!("ftp> {}", command.split(' ').next().unwrap_or(command));
        self.writer
            .write_all(format!("{command}\r\n").as_bytes())
            .await?;
        self.reply().await
    }

    async fn expect(&mut self, command: &str, accepted: &[u16]) -> Result<(u16, String), ReportError> {
        let (code, text) = self.command(command).await?;
        if !accepted.contains(&code) {
            let verb = command.split(' ').next().unwrap_or(command);
            return Err(ftp_error(format!("{verb} failed: {text}")));
        }
        Ok((code, text))
    }
}

fn ftp_error(message: String) -> ReportError {
    ReportError::Http(format!("FTP: {message}"))
}

fn reply_code(line: &str) -> Result<u16, ReportError> {
    line.get(..3)
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| ftp_error(format!("malformed reply '{}'", line.trim_end())))
}

/// Host and port from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
fn parse_pasv(reply: &str) -> Option<(String, u16)> {
    let re = Regex::new(r"(\d+),(\d+),(\d+),(\d+),(\d+),(\d+)").unwrap();
    let caps = re.captures(reply)?;
    let n: Vec<u16> = (1..=6)
        .map(|i| caps[i].parse::<u16>().ok().filter(|v| *v <= 255))
        .collect::<Option<_>>()?;
    let host = format!("{}.{}.{}.{}", n[0], n[1], n[2], n[3]);
    Some((host, n[4] * 256 + n[5]))
}

async fn ftp_store(url: &Url, name: &str, file: &Path) -> Result<(), ReportError> {
    let host = url
        .host_str()
        .ok_or_else(|| ReportError::Config(format!("No host in upload URL '{url}'")))?;
    let port = url.port().unwrap_or(FTP_PORT);
    let user = match url.username() {
        "" => ANONYMOUS_USER,
        user => user,
    };
    let password = url.password().unwrap_or(ANONYMOUS_PASSWORD);

    let mut ctrl = FtpControl::connect(host, port).await?;
    let (code, text) = ctrl.reply().await?;
    if code != 220 {
        return Err(ftp_error(format!("unexpected greeting: {text}")));
    }

    let (code, _) = ctrl.expect(&format!("USER {user}"), &[230, 331]).await?;
    if code == 331 {
        ctrl.expect(&format!("PASS {password}"), &[202, 230]).await?;
    }
    ctrl.expect("TYPE I", &[200]).await?;

    let dir = url.path().trim_matches('/');
    if !dir.is_empty() {
        ctrl.expect(&format!("CWD /{dir}"), &[250]).await?;
    }

    let (_, pasv) = ctrl.expect("PASV", &[227]).await?;
    let (mut data_host, data_port) =
        parse_pasv(&pasv).ok_or_else(|| ftp_error(format!("malformed PASV reply '{pasv}'")))?;
    if data_host == "0.0.0.0" {
        data_host = host.to_string();
    }
    let mut data = TcpStream::connect((data_host.as_str(), data_port))
        .await
        .map_err(|e| ftp_error(format!("can't open data connection: {e}")))?;

    ctrl.expect(&format!("STOR {name}"), &[125, 150]).await?;
    let mut source = tokio::fs::File::open(file).await?;
    tokio::io::copy(&mut source, &mut data).await?;
    data.shutdown().await?;
    drop(data);

    let (code, text) = ctrl.reply().await?;
    if code != 226 && code != 250 {
        return Err(ftp_error(format!("upload failed: {text}")));
    }
    let _ = ctrl.command("QUIT").await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn parses_passive_reply() {
        assert_eq!(
            parse_pasv("227 Entering Passive Mode (127,0,0,1,195,80)."),
            Some(("127.0.0.1".to_string(), 195 * 256 + 80))
        );
        assert_eq!(parse_pasv("227 nope"), None);
        assert_eq!(parse_pasv("227 (300,0,0,1,1,1)"), None);
    }

    #[test]
    fn reply_code_requires_three_digits() {
        assert_eq!(reply_code("226 Transfer complete\r\n").unwrap(), 226);
        assert!(reply_code("xx").is_err());
    }

    /// Single-session FTP server accepting one STOR; returns the commands
    /// seen and the stored bytes.
    async fn fake_ftp() -> (u16, tokio::task::JoinHandle<(Vec<String>, Vec<u8>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut commands = Vec::new();
            let mut stored = Vec::new();
            let mut data_listener = None;

            write.write_all(b"220-Welcome\r\n220 Ready\r\n").await.unwrap();
            while let Some(line) = lines.next_line().await.unwrap() {
                commands.push(line.clone());
                let verb = line.split(' ').next().unwrap_or("").to_string();
                match verb.as_str() {
                    "USER" => write.write_all(b"331 Password please\r\n").await.unwrap(),
                    "PASS" => write.write_all(b"230 Logged in\r\n").await.unwrap(),
                    "TYPE" => write.write_all(b"200 Binary\r\n").await.unwrap(),
                    "CWD" => write.write_all(b"250 Ok\r\n").await.unwrap(),
                    "PASV" => {
                        let dl = TcpListener::bind("127.0.0.1:0").await.unwrap();
                        let p = dl.local_addr().unwrap().port();
                        data_listener = Some(dl);
                        let reply = format!(
                            "227 Entering Passive Mode (127,0,0,1,{},{})\r\n",
                            p / 256,
                            p % 256
                        );
                        write.write_all(reply.as_bytes()).await.unwrap();
                    }
                    "STOR" => {
                        write.write_all(b"150 Go ahead\r\n").await.unwrap();
                        let dl = data_listener.take().unwrap();
                        let (mut data, _) = dl.accept().await.unwrap();
                        data.read_to_end(&mut stored).await.unwrap();
                        write.write_all(b"226 Transfer complete\r\n").await.unwrap();
                    }
                    "QUIT" => {
                        write.write_all(b"221 Bye\r\n").await.unwrap();
                        break;
                    }
                    _ => write.write_all(b"502 Not implemented\r\n").await.unwrap(),
                }
            }
            (commands, stored)
        });

        (port, handle)
    }

    #[tokio::test]
    async fn uploads_over_passive_ftp() {
        let (port, server) = fake_ftp().await;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ccpp-2024.tar.gz");
        std::fs::write(&file, b"archive bytes").unwrap();

        let uploader = DropUploader::new(&Settings::default()).unwrap();
        let drop_url = format!("ftp://127.0.0.1:{port}/incoming/");
        let remote = uploader.upload(&drop_url, &file).await.unwrap();

        assert_eq!(remote, format!("{drop_url}ccpp-2024.tar.gz"));
        let (commands, stored) = server.await.unwrap();
        assert_eq!(stored, b"archive bytes");
        assert_eq!(
            commands,
            vec![
                "USER anonymous",
                "PASS anonymous@",
                "TYPE I",
                "CWD /incoming",
                "PASV",
                "STOR ccpp-2024.tar.gz",
                "QUIT",
            ]
        );
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.tar.gz");
        std::fs::write(&file, b"x").unwrap();

        let uploader = DropUploader::new(&Settings::default()).unwrap();
        let err = uploader
            .upload("ftp://127.0.0.1:1/incoming/", &file)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("FTP"));
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.tar.gz");
        std::fs::write(&file, b"x").unwrap();

        let uploader = DropUploader::new(&Settings::default()).unwrap();
        let err = uploader.upload("gopher://drop/", &file).await.unwrap_err();
        assert!(matches!(err, ReportError::Config(_)));
    }
}
