// SFTP transfer backend over ssh2

use super::TransferClient;
use crate::config::SftpConfig;
use crate::errors::{ConfigurationError, TransferError};
use async_trait::async_trait;
use ssh2::{Session, Sftp};
use std::fs::File;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// SFTP authentication method
#[derive(Debug, Clone)]
pub enum SftpAuth {
    Password { username: String, password: String },
    SshKey {
        username: String,
        private_key_path: String,
    },
}

impl SftpAuth {
    fn username(&self) -> &str {
        match self {
            SftpAuth::Password { username, .. } | SftpAuth::SshKey { username, .. } => username,
        }
    }
}

/// Delivers files to `<root>/<destination>/<category>` on an SFTP server.
///
/// ssh2 is blocking, so every remote call runs on the blocking thread pool
/// with a clone of the session handle.
pub struct SftpTransfer {
    host: String,
    port: u16,
    auth: SftpAuth,
    root: String,
    category: String,
    timeout: Duration,
    session: Option<Session>,
}

impl SftpTransfer {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        auth: SftpAuth,
        root: impl Into<String>,
        category: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            auth,
            root: root.into(),
            category: category.into(),
            timeout,
            session: None,
        }
    }

    pub fn from_config(config: &SftpConfig, category: &str) -> Result<Self, ConfigurationError> {
        let auth = match (&config.password, &config.private_key_path) {
            (Some(password), _) => SftpAuth::Password {
                username: config.username.clone(),
                password: password.clone(),
            },
            (None, Some(key)) => SftpAuth::SshKey {
                username: config.username.clone(),
                private_key_path: key.clone(),
            },
            (None, None) => {
                return Err(ConfigurationError::MissingCredentials("sftp".to_string()))
            }
        };

        Ok(Self::new(
            config.host.clone(),
            config.port,
            auth,
            config.root.clone(),
            category,
            Duration::from_secs(config.timeout_seconds),
        ))
    }

    /// Run `op` against a fresh SFTP channel of the current session
    async fn with_sftp<T, F>(&self, op: F) -> Result<T, TransferError>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> Result<T, TransferError> + Send + 'static,
    {
        let session = self.session.clone().ok_or(TransferError::NotConnected)?;
        tokio::task::spawn_blocking(move || {
            let sftp = session.sftp().map_err(|e| {
                TransferError::ConnectionFailed(format!("Failed to open SFTP channel: {}", e))
            })?;
            op(&sftp)
        })
        .await
        .map_err(|e| TransferError::ConnectionFailed(format!("SFTP task failed: {}", e)))?
    }
}

#[async_trait]
impl TransferClient for SftpTransfer {
    fn backend(&self) -> &'static str {
        "sftp"
    }

    #[instrument(skip(self), fields(host = %self.host, port = self.port))]
    async fn connect(&mut self) -> bool {
        if self.session.is_some() {
            match self.with_sftp(|sftp| Ok(sftp.stat(Path::new(".")).is_ok())).await {
                Ok(true) => return true,
                _ => {
                    warn!("SFTP session is no longer usable, reconnecting");
                    self.session = None;
                }
            }
        }

        let (host, port, auth, timeout) = (
            self.host.clone(),
            self.port,
            self.auth.clone(),
            self.timeout,
        );
        match tokio::task::spawn_blocking(move || open_session(&host, port, &auth, timeout)).await
        {
            Ok(Ok(session)) => {
                self.session = Some(session);
                true
            }
            Ok(Err(e)) => {
                error!(error = %e, "SFTP connection failed");
                false
            }
            Err(e) => {
                error!(error = %e, "SFTP connect task failed");
                false
            }
        }
    }

    #[instrument(skip(self))]
    async fn ensure_destination(&mut self, remote_path: &str) -> bool {
        let remote_path = remote_path.to_string();
        let result = self
            .with_sftp(move |sftp| {
                create_segments(sftp, &remote_path);
                Ok(())
            })
            .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to prepare SFTP destination");
                false
            }
        }
    }

    fn resolve_destination(&self, destination_name: &str) -> String {
        format!("{}/{}/{}", self.root, destination_name, self.category)
    }

    #[instrument(skip(self, local_path), fields(file = %file_name))]
    async fn upload_file(
        &mut self,
        local_path: &Path,
        remote_path: &str,
        file_name: &str,
    ) -> Result<(), TransferError> {
        let local_path = local_path.to_path_buf();
        let remote_file = PathBuf::from(format!("{}/{}", remote_path, file_name));

        self.with_sftp(move |sftp| {
            let mut local = File::open(&local_path).map_err(|e| {
                TransferError::UploadFailed(format!(
                    "Failed to open {}: {}",
                    local_path.display(),
                    e
                ))
            })?;
            let mut remote = sftp.create(&remote_file).map_err(|e| {
                TransferError::UploadFailed(format!(
                    "Failed to create remote file {}: {}",
                    remote_file.display(),
                    e
                ))
            })?;
            let bytes = std::io::copy(&mut local, &mut remote).map_err(|e| {
                TransferError::UploadFailed(format!(
                    "Failed to write remote file {}: {}",
                    remote_file.display(),
                    e
                ))
            })?;
            debug!(bytes = bytes, remote_file = %remote_file.display(), "File uploaded");
            Ok(())
        })
        .await
    }

    async fn remote_file_size(&mut self, remote_path: &str, file_name: &str) -> Option<u64> {
        let remote_file = PathBuf::from(format!("{}/{}", remote_path, file_name));
        self.with_sftp(move |sftp| Ok(sftp.stat(&remote_file).ok().and_then(|stat| stat.size)))
            .await
            .ok()
            .flatten()
    }

    async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = tokio::task::spawn_blocking(move || {
                if let Err(e) = session.disconnect(None, "closing", None) {
                    debug!(error = %e, "Error while closing SFTP session");
                }
            })
            .await;
            info!(host = %self.host, "SFTP session closed");
        }
    }
}

/// Directory operations needed to lay out a remote destination
trait RemoteDirs {
    fn exists(&self, path: &Path) -> bool;
    fn mkdir(&self, path: &Path) -> Result<(), String>;
}

impl RemoteDirs for Sftp {
    fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_ok()
    }

    fn mkdir(&self, path: &Path) -> Result<(), String> {
        Sftp::mkdir(self, path, 0o755).map_err(|e| e.to_string())
    }
}

/// Create each missing segment of `remote_path` in order.
///
/// Servers that chroot or pre-create folders may reject mkdir on a segment,
/// so a failed mkdir is logged and the walk continues.
fn create_segments(dirs: &impl RemoteDirs, remote_path: &str) -> PathBuf {
    let mut current = PathBuf::new();
    for segment in remote_path.split('/').filter(|s| !s.is_empty()) {
        current.push(segment);
        if dirs.exists(&current) {
            continue;
        }
        if let Err(e) = dirs.mkdir(&current) {
            debug!(path = %current.display(), error = %e, "mkdir failed, continuing");
        }
    }
    if !dirs.exists(&current) {
        warn!(path = %current.display(), "Destination not visible after creation");
    }
    current
}

/// Colon separated hex of a host key hash
fn fingerprint(hash: &[u8]) -> String {
    hash.iter()
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join(":")
}

/// Open and authenticate an SSH session
fn open_session(
    host: &str,
    port: u16,
    auth: &SftpAuth,
    timeout: Duration,
) -> Result<Session, TransferError> {
    info!(host = %host, port = %port, "Establishing SFTP connection");

    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| TransferError::ConnectionFailed(format!("Failed to resolve {}: {}", host, e)))?
        .next()
        .ok_or_else(|| TransferError::ConnectionFailed(format!("No address for {}", host)))?;

    let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
        TransferError::ConnectionFailed(format!("Failed to connect to {}:{}: {}", host, port, e))
    })?;
    tcp.set_read_timeout(Some(timeout)).map_err(|e| {
        TransferError::ConnectionFailed(format!("Failed to set read timeout: {}", e))
    })?;
    tcp.set_write_timeout(Some(timeout)).map_err(|e| {
        TransferError::ConnectionFailed(format!("Failed to set write timeout: {}", e))
    })?;

    let mut session = Session::new().map_err(|e| {
        TransferError::ConnectionFailed(format!("Failed to create SSH session: {}", e))
    })?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));

    session.handshake().map_err(|e| {
        TransferError::ConnectionFailed(format!("SSH handshake failed: {}", e))
    })?;

    if let Some(hash) = session.host_key_hash(ssh2::HashType::Sha256) {
        info!(fingerprint = %fingerprint(hash), "SSH host key");
    }

    match auth {
        SftpAuth::Password { username, password } => {
            session.userauth_password(username, password).map_err(|e| {
                TransferError::AuthenticationFailed(format!(
                    "Password authentication failed for user {}: {}",
                    username, e
                ))
            })?;
        }
        SftpAuth::SshKey {
            username,
            private_key_path,
        } => {
            session
                .userauth_pubkey_file(username, None, Path::new(private_key_path), None)
                .map_err(|e| {
                    TransferError::AuthenticationFailed(format!(
                        "SSH key authentication failed for user {}: {}",
                        username, e
                    ))
                })?;
        }
    }

    if !session.authenticated() {
        return Err(TransferError::AuthenticationFailed(format!(
            "Session not authenticated for user {}",
            auth.username()
        )));
    }

    info!("SFTP connection established");
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeSet;

    fn client(port: u16) -> SftpTransfer {
        SftpTransfer::new(
            "127.0.0.1",
            port,
            SftpAuth::Password {
                username: "uploader".to_string(),
                password: "not-a-real-password".to_string(),
            },
            "ai",
            "data",
            Duration::from_secs(2),
        )
    }

    #[test]
    fn test_destination_layout() {
        assert_eq!(client(22).resolve_destination("DB1"), "ai/DB1/data");
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_returns_false() {
        let mut client = client(1);
        assert!(!client.connect().await);
    }

    #[tokio::test]
    async fn test_upload_without_session_is_not_connected() {
        let mut client = client(1);
        let result = client
            .upload_file(Path::new("missing.parquet"), "ai/DB1/data", "missing.parquet")
            .await;
        assert!(matches!(result, Err(TransferError::NotConnected)));
    }

    #[test]
    fn test_from_config_requires_password_or_key() {
        let config = SftpConfig {
            host: "sftp.example.com".to_string(),
            port: 22,
            username: "uploader".to_string(),
            password: None,
            private_key_path: None,
            root: "ai".to_string(),
            timeout_seconds: 30,
        };
        assert!(SftpTransfer::from_config(&config, "data").is_err());
    }

    #[derive(Default)]
    struct FakeDirs {
        existing: RefCell<BTreeSet<PathBuf>>,
        rejected: BTreeSet<PathBuf>,
        created: RefCell<Vec<PathBuf>>,
    }

    impl FakeDirs {
        fn with_existing(paths: &[&str]) -> Self {
            let dirs = Self::default();
            dirs.existing
                .borrow_mut()
                .extend(paths.iter().map(PathBuf::from));
            dirs
        }
    }

    impl RemoteDirs for FakeDirs {
        fn exists(&self, path: &Path) -> bool {
            self.existing.borrow().contains(path)
        }

        fn mkdir(&self, path: &Path) -> Result<(), String> {
            if self.rejected.contains(path) {
                return Err("permission denied".to_string());
            }
            self.created.borrow_mut().push(path.to_path_buf());
            self.existing.borrow_mut().insert(path.to_path_buf());
            Ok(())
        }
    }

    #[test]
    fn test_create_segments_skips_existing_folders() {
        let dirs = FakeDirs::with_existing(&["ai", "ai/DB1"]);

        let leaf = create_segments(&dirs, "ai/DB1/data");

        assert_eq!(leaf, PathBuf::from("ai/DB1/data"));
        assert_eq!(*dirs.created.borrow(), vec![PathBuf::from("ai/DB1/data")]);
    }

    #[test]
    fn test_create_segments_tolerates_rejected_mkdir() {
        let mut dirs = FakeDirs::default();
        dirs.rejected.insert(PathBuf::from("ai"));

        let leaf = create_segments(&dirs, "/ai/DB1/data/");

        assert_eq!(leaf, PathBuf::from("ai/DB1/data"));
        assert_eq!(
            *dirs.created.borrow(),
            vec![PathBuf::from("ai/DB1"), PathBuf::from("ai/DB1/data")]
        );
    }

    #[test]
    fn test_fingerprint_is_colon_separated_hex() {
        assert_eq!(fingerprint(&[0x0a, 0xff, 0x10]), "0a:ff:10");
    }
}
