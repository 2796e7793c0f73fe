//! Onion service registration through a running Tor's control port.
//!
//! The service is created with `ADD_ONION` on a control connection that is
//! held open for as long as the [`OnionService`] lives; Tor removes the
//! service when that connection closes.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info, instrument, warn};

use wayback_shared::{OnionConfig, Result, WaybackError, config_dir, read_secret};

/// Key type prefix Tor expects for v3 onion services.
const KEY_TYPE: &str = "ED25519-V3";

/// Key file name in the config directory when `key_file` is not set.
const DEFAULT_KEY_FILE: &str = "onion.key";

/// A registered onion service.
#[derive(Debug)]
pub struct OnionService {
    service_id: String,
    control: ControlConnection,
}

impl OnionService {
    /// Register an onion service forwarding `remote_port` to `target`.
    #[instrument(skip_all, fields(control = %config.control_addr, %target))]
    pub async fn register(config: &OnionConfig, target: SocketAddr) -> Result<Self> {
        let mut control = ControlConnection::connect(&config.control_addr).await?;
        control
            .authenticate(read_secret(&config.control_password_env).as_ref())
            .await?;

        let key = load_key(config)?;
        let key_spec = match &key {
            Some(key) => format!("{KEY_TYPE}:{}", key.expose_secret()),
            None => format!("NEW:{KEY_TYPE}"),
        };
        let reply = control
            .command(&format!(
                "ADD_ONION {key_spec} Port={},{target}",
                config.remote_port
            ))
            .await
            .map_err(|e| WaybackError::startup(format!("onion service registration failed: {e}")))?;

        let service_id = reply_value(&reply, "ServiceID").ok_or_else(|| {
            WaybackError::startup("Tor did not return a ServiceID for ADD_ONION")
        })?;

        if key.is_none() {
            match reply_value(&reply, "PrivateKey") {
                Some(generated) => persist_key(key_path(config).as_deref(), &generated)?,
                None => warn!("Tor did not return the generated onion key"),
            }
        }

        info!(hostname = %format!("{service_id}.onion"), "onion service registered");
        Ok(Self {
            service_id,
            control,
        })
    }

    /// The `<id>.onion` hostname.
    pub fn hostname(&self) -> String {
        format!("{}.onion", self.service_id)
    }

    /// Remove the service and close the control connection.
    pub async fn close(mut self) -> Result<()> {
        let id = self.service_id.clone();
        self.control.command(&format!("DEL_ONION {id}")).await?;
        debug!(service_id = %id, "onion service removed");
        Ok(())
    }
}

/// Private key from the environment, else from the key file.
fn load_key(config: &OnionConfig) -> Result<Option<SecretString>> {
    if let Some(key) = read_secret(&config.private_key_env) {
        return Ok(Some(normalize_key(key.expose_secret())));
    }
    let Some(path) = key_path(config) else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|e| WaybackError::io(&path, e))?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    debug!(path = %path.display(), "loaded onion key from file");
    Ok(Some(normalize_key(trimmed)))
}

/// `key_file`, else `onion.key` in the config directory.
fn key_path(config: &OnionConfig) -> Option<PathBuf> {
    config
        .key_file
        .clone()
        .or_else(|| config_dir().ok().map(|dir| dir.join(DEFAULT_KEY_FILE)))
}

/// Strip an optional `ED25519-V3:` prefix.
fn normalize_key(raw: &str) -> SecretString {
    let raw = raw.trim();
    let key = raw
        .strip_prefix(KEY_TYPE)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(raw);
    SecretString::new(key.to_string())
}

/// Save a Tor-generated key so the hostname survives restarts. The key
/// itself never goes to the log.
fn persist_key(path: Option<&Path>, generated: &str) -> Result<()> {
    let key = normalize_key(generated);
    match path {
        Some(path) => {
            write_key(path, key.expose_secret())?;
            info!(path = %path.display(), "generated onion key saved");
        }
        None => warn!("no config directory to save the generated onion key; the hostname changes on restart"),
    }
    Ok(())
}

fn write_key(path: &Path, key: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| WaybackError::io(parent, e))?;
    }
    std::fs::write(path, format!("{key}\n")).map_err(|e| WaybackError::io(path, e))
}

/// `Key=Value` lookup in a `250-` reply.
fn reply_value(lines: &[String], key: &str) -> Option<String> {
    lines.iter().find_map(|line| {
        line.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
            .map(str::to_string)
    })
}

// ---------------------------------------------------------------------------
// Control protocol
// ---------------------------------------------------------------------------

/// A line-oriented Tor control port session.
#[derive(Debug)]
struct ControlConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ControlConnection {
    async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            WaybackError::startup(format!("cannot reach Tor control port {addr}: {e}"))
        })?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer,
        })
    }

    async fn authenticate(&mut self, password: Option<&SecretString>) -> Result<()> {
        let command = match password {
            Some(password) => format!("AUTHENTICATE \"{}\"", quote(password.expose_secret())),
            None => "AUTHENTICATE".to_string(),
        };
        self.command(&command).await.map(|_| ()).map_err(|e| {
            WaybackError::startup(format!("Tor control authentication failed: {e}"))
        })
    }

    /// Send one command and collect the data of a `250` reply.
    async fn command(&mut self, command: &str) -> Result<Vec<String>> {
        let verb = command.split_whitespace().next().unwrap_or_default();
        debug!(%verb, "tor control command");

        self.writer
            .write_all(format!("{command}\r\n").as_bytes())
            .await
            .map_err(|e| WaybackError::Transport(format!("tor control write failed: {e}")))?;

        let mut data = Vec::new();
        loop {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| WaybackError::Transport(format!("tor control read failed: {e}")))?;
            if read == 0 {
                return Err(WaybackError::Transport(
                    "tor control connection closed".into(),
                ));
            }

            let line = line.trim_end_matches(['\r', '\n']);
            let (Some(code), Some(separator), Some(text)) =
                (line.get(..3), line.get(3..4), line.get(4..))
            else {
                return Err(WaybackError::Transport(format!(
                    "malformed tor control reply: {line}"
                )));
            };
            if code != "250" {
                return Err(WaybackError::Transport(format!(
                    "{verb} rejected: {code} {text}"
                )));
            }
            match separator {
                " " => return Ok(data),
                _ => data.push(text.to_string()),
            }
        }
    }
}

/// Escape a value for a quoted control-port string.
fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
