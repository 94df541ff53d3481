//! SSH session setup
//!
//! Connects to the SSH server, checks its host key against
//! `~/.ssh/known_hosts` and logs in with a password and/or key files.

use async_trait::async_trait;
use dnsupdater_core::resolver::parse_scoped_address;
use dnsupdater_core::{ClientResolver, Error, Result};
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use crate::UPDATER_NAME;
use crate::tunnel::{ForwardStream, SshConnector, SshLink};

/// Key files tried when none is configured, relative to the home directory
const DEFAULT_KEY_FILES: [&str; 2] = [".ssh/id_ed25519", ".ssh/id_rsa"];

/// Where and how to log in
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    /// ⚠️ NEVER log this value
    pub password: Option<String>,
    pub key_files: Vec<PathBuf>,
}

impl Credentials {
    /// Credentials with `key_file`, or the default key files that exist
    pub fn new(user: String, password: Option<String>, key_file: Option<PathBuf>) -> Self {
        let key_files = match key_file {
            Some(key_file) => vec![key_file],
            None => default_key_files(),
        };
        Self {
            user,
            password,
            key_files,
        }
    }
}

// Custom Debug implementation that hides the password
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<REDACTED>"))
            .field("key_files", &self.key_files)
            .finish()
    }
}

fn default_key_files() -> Vec<PathBuf> {
    let Some(home) = std::env::var_os("HOME").map(PathBuf::from) else {
        return Vec::new();
    };
    DEFAULT_KEY_FILES
        .iter()
        .map(|file| home.join(file))
        .filter(|path| path.exists())
        .collect()
}

/// Client handler verifying the server's host key
pub struct HostKeyCheck {
    host: String,
    port: u16,
}

#[async_trait]
impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &key::PublicKey) -> std::result::Result<bool, Self::Error> {
        match russh_keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => Ok(true),
            Ok(false) => {
                tracing::warn!(
                    "Accepting unknown host key {} for {}:{}",
                    server_public_key.fingerprint(),
                    self.host,
                    self.port
                );
                if let Err(e) = russh_keys::learn_known_hosts(&self.host, self.port, server_public_key) {
                    tracing::debug!("Failed to remember host key: {}", e);
                }
                Ok(true)
            }
            Err(e) => {
                tracing::warn!("Rejecting host key for {}:{}: {}", self.host, self.port, e);
                Ok(false)
            }
        }
    }
}

pub type Session = Handle<HostKeyCheck>;

/// Connect to `host:port` and log in
pub async fn connect(host: &str, port: u16, credentials: &Credentials) -> Result<Session> {
    let config = Arc::new(client::Config::default());
    let handler = HostKeyCheck {
        host: host.to_string(),
        port,
    };

    let mut session = client::connect(config, (host, port), handler)
        .await
        .map_err(|e| Error::transport(UPDATER_NAME, format!("Failed to connect to {}:{}: {}", host, port, e)))?;

    if authenticate(&mut session, credentials).await? {
        tracing::debug!("Logged in to {}:{} as {}", host, port, credentials.user);
        Ok(session)
    } else {
        Err(Error::transport(
            UPDATER_NAME,
            format!("Authentication failed for {}@{}:{}", credentials.user, host, port),
        ))
    }
}

async fn authenticate(session: &mut Session, credentials: &Credentials) -> Result<bool> {
    let failed = |e: russh::Error| Error::transport(UPDATER_NAME, e.to_string());

    if let Some(password) = &credentials.password {
        if session
            .authenticate_password(&credentials.user, password)
            .await
            .map_err(failed)?
        {
            return Ok(true);
        }
    }

    for key_file in &credentials.key_files {
        let key_pair = match russh_keys::load_secret_key(key_file, None) {
            Ok(key_pair) => key_pair,
            Err(e) => {
                tracing::warn!("Skipping key {}: {}", key_file.display(), e);
                continue;
            }
        };
        if session
            .authenticate_publickey(&credentials.user, Arc::new(key_pair))
            .await
            .map_err(failed)?
        {
            return Ok(true);
        }
    }

    Ok(false)
}

/// [`SshConnector`] over russh
#[derive(Debug, Default, Clone, Copy)]
pub struct RusshConnector;

#[async_trait]
impl SshConnector for RusshConnector {
    async fn connect(&self, host: &str, port: u16, credentials: &Credentials) -> Result<Arc<dyn SshLink>> {
        let session = connect(host, port, credentials).await?;
        Ok(Arc::new(RusshLink {
            session: Arc::new(session),
        }))
    }
}

/// A logged-in russh session
pub struct RusshLink {
    session: Arc<Session>,
}

#[async_trait]
impl SshLink for RusshLink {
    fn client_resolver(&self) -> Arc<dyn ClientResolver> {
        Arc::new(SessionClient::new(self.session.clone()))
    }

    async fn open_forward(&self, host: &str, port: u16, originator: SocketAddr) -> Result<Box<dyn ForwardStream>> {
        let channel = self
            .session
            .channel_open_direct_tcpip(
                host,
                u32::from(port),
                originator.ip().to_string(),
                u32::from(originator.port()),
            )
            .await
            .map_err(|e| Error::transport(UPDATER_NAME, e.to_string()))?;

        Ok(Box::new(channel.into_stream()))
    }

    async fn disconnect(&self) {
        if let Err(e) = self
            .session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            tracing::debug!("SSH disconnect failed: {}", e);
        }
    }
}

/// First field of `SSH_CLIENT` in the output of `env`
pub fn parse_ssh_client(env: &str) -> Option<IpAddr> {
    env.lines()
        .filter_map(|line| line.split_once('='))
        .find(|(name, _)| *name == "SSH_CLIENT")
        .and_then(|(_, value)| value.split_whitespace().next())
        .and_then(parse_scoped_address)
}

/// Resolves `client` to the address the SSH server sees the session coming from
pub struct SessionClient {
    session: Arc<Session>,
}

impl SessionClient {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    async fn remote_env(&self) -> Result<String> {
        let failed = |e: russh::Error| Error::transport(UPDATER_NAME, e.to_string());

        let mut channel = self.session.channel_open_session().await.map_err(failed)?;
        channel.exec(true, "env").await.map_err(failed)?;

        let mut output = Vec::new();
        while let Some(message) = channel.wait().await {
            match message {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::Eof | ChannelMsg::Close => break,
                _ => {}
            }
        }

        Ok(String::from_utf8_lossy(&output).into_owned())
    }
}

#[async_trait]
impl ClientResolver for SessionClient {
    async fn resolve_client(&self) -> Result<Vec<IpAddr>> {
        let env = self.remote_env().await?;
        parse_ssh_client(&env)
            .map(|address| vec![address])
            .ok_or_else(|| Error::remote(UPDATER_NAME, "SSH_CLIENT is not set on the server"))
    }
}
