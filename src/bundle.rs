//! Candidate configuration bundle: locating, unpacking and reading it.

use crate::error::ValidationError;
use crate::version::{self, ConfigTimestamp};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const DEFAULT_PORT: u16 = 1194;
const BUNDLE_SUBDIR: &str = "server";

/// Transport protocol declared by the server configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Udp,
    Tcp,
}

impl Transport {
    /// Parse an OpenVPN `proto` value, folding address-family and role
    /// variants (`udp6`, `tcp-server`, ...) into their transport.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "udp" | "udp4" | "udp6" => Some(Transport::Udp),
            "tcp" | "tcp4" | "tcp6" | "tcp-server" | "tcp4-server" | "tcp6-server"
            | "tcp-client" | "tcp4-client" | "tcp6-client" => Some(Transport::Tcp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listening parameters read from `port` and `proto` lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerDirectives {
    pub port: u16,
    pub transport: Transport,
}

impl ServerDirectives {
    /// Parse directives, defaulting to OpenVPN's 1194/udp when a line is absent.
    /// The last occurrence of a directive wins, as in OpenVPN itself.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ValidationError> {
        let mut port = DEFAULT_PORT;
        let mut transport = Transport::Udp;

        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("port"), Some(value)) => {
                    port = value
                        .parse::<u16>()
                        .ok()
                        .filter(|p| *p != 0)
                        .ok_or_else(|| ValidationError::InvalidPort {
                            path: path.to_path_buf(),
                            value: value.to_string(),
                        })?;
                }
                (Some("proto"), Some(value)) => {
                    transport = Transport::parse(value).ok_or_else(|| {
                        ValidationError::InvalidProtocol {
                            path: path.to_path_buf(),
                            value: value.to_string(),
                        }
                    })?;
                }
                _ => {}
            }
        }

        Ok(Self { port, transport })
    }

    pub fn read(path: &Path) -> Result<Self, ValidationError> {
        let content = read_text(path)?;
        Self::parse(&content, path)
    }
}

/// A validated candidate bundle ready to be installed
#[derive(Debug)]
pub struct ConfigurationBundle {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub timestamp: ConfigTimestamp,
    pub directives: ServerDirectives,
    pub routes_dir: Option<PathBuf>,
    // Keeps an unpacked archive alive until the bundle has been installed
    _extracted: Option<TempDir>,
}

impl ConfigurationBundle {
    /// Locate and validate a bundle at `path`.
    ///
    /// `path` may be the bundle directory itself, a directory holding it under
    /// `server/`, or a `.zip` archive with either layout. `config_names` lists
    /// accepted configuration file names in order of preference.
    pub fn load(
        path: &Path,
        config_names: &[String],
        routes_dir_name: &str,
    ) -> Result<Self, ValidationError> {
        let (search_root, extracted) = if is_zip(path) {
            let dir = extract_archive(path)?;
            (dir.path().to_path_buf(), Some(dir))
        } else {
            (path.to_path_buf(), None)
        };

        let (root, config_path) = find_config(&search_root, config_names)
            .ok_or_else(|| ValidationError::BundleNotFound(path.to_path_buf()))?;

        let content = read_text(&config_path)?;
        let timestamp = version::extract_timestamp(&content)
            .ok_or_else(|| ValidationError::NoTimestampFound(config_path.clone()))?;
        let directives = ServerDirectives::parse(&content, &config_path)?;

        let routes = root.join(routes_dir_name);
        let routes_dir = routes.is_dir().then_some(routes);

        tracing::debug!(
            root = %root.display(),
            %timestamp,
            port = directives.port,
            proto = %directives.transport,
            "loaded candidate bundle"
        );

        Ok(Self {
            root,
            config_path,
            timestamp,
            directives,
            routes_dir,
            _extracted: extracted,
        })
    }

    /// Top-level entries of the bundle other than the configuration file and
    /// routes directory (certificates, keys, helper files).
    pub fn extra_entries(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path == self.config_path || Some(&path) == self.routes_dir.as_ref() {
                continue;
            }
            entries.push(path);
        }
        entries.sort();
        Ok(entries)
    }
}

fn is_zip(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

fn extract_archive(path: &Path) -> Result<TempDir, ValidationError> {
    let unreadable = |source: std::io::Error| ValidationError::Unreadable {
        path: path.to_path_buf(),
        source,
    };
    let archive_err = |source: zip::result::ZipError| ValidationError::Archive {
        path: path.to_path_buf(),
        source,
    };

    let file = fs::File::open(path).map_err(unreadable)?;
    let dir = tempfile::Builder::new()
        .prefix("ovpn-bundle-")
        .tempdir()
        .map_err(unreadable)?;
    let mut archive = zip::ZipArchive::new(file).map_err(archive_err)?;
    archive.extract(dir.path()).map_err(archive_err)?;

    tracing::info!(archive = %path.display(), "extracted bundle archive");
    Ok(dir)
}

fn find_config(search_root: &Path, config_names: &[String]) -> Option<(PathBuf, PathBuf)> {
    [search_root.to_path_buf(), search_root.join(BUNDLE_SUBDIR)]
        .into_iter()
        .filter(|dir| dir.is_dir())
        .find_map(|dir| {
            config_names
                .iter()
                .map(|name| dir.join(name))
                .find(|candidate| candidate.is_file())
                .map(|config| (dir, config))
        })
}

fn read_text(path: &Path) -> Result<String, ValidationError> {
    let bytes = fs::read(path).map_err(|source| ValidationError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SERVER_CONF: &str = "# OpenVPN Server Configuration\nport 1195\nproto tcp-server\n\
                               dev tun\n### Timestamp of Server Configuration Creation ###\n\
                               # 2025-01-01 00:00:00 #\n";

    fn names() -> Vec<String> {
        vec!["server.conf".to_string(), "server.ovpn".to_string()]
    }

    #[test]
    fn test_directives_default_and_normalize() {
        let path = Path::new("server.conf");
        let d = ServerDirectives::parse("dev tun\n", path).unwrap();
        assert_eq!((d.port, d.transport), (1194, Transport::Udp));

        let d = ServerDirectives::parse("port 443\nproto tcp6-server\n", path).unwrap();
        assert_eq!((d.port, d.transport), (443, Transport::Tcp));

        let d = ServerDirectives::parse(";port 1\n# proto tcp\nproto udp6\n", path).unwrap();
        assert_eq!((d.port, d.transport), (1194, Transport::Udp));
    }

    #[test]
    fn test_directives_reject_bad_values() {
        let path = Path::new("server.conf");
        assert!(matches!(
            ServerDirectives::parse("port 70000\n", path),
            Err(ValidationError::InvalidPort { .. })
        ));
        assert!(matches!(
            ServerDirectives::parse("port 0\n", path),
            Err(ValidationError::InvalidPort { .. })
        ));
        assert!(matches!(
            ServerDirectives::parse("proto sctp\n", path),
            Err(ValidationError::InvalidProtocol { .. })
        ));
    }

    #[test]
    fn test_load_from_server_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        let server = dir.path().join("server");
        fs::create_dir_all(server.join("ccd")).unwrap();
        fs::write(server.join("server.conf"), SERVER_CONF).unwrap();
        fs::write(server.join("ca.crt"), "opaque").unwrap();

        let bundle = ConfigurationBundle::load(dir.path(), &names(), "ccd").unwrap();
        assert_eq!(bundle.root, server);
        assert_eq!(bundle.timestamp.to_string(), "2025-01-01 00:00:00");
        assert_eq!(bundle.directives.port, 1195);
        assert_eq!(bundle.directives.transport, Transport::Tcp);
        assert_eq!(bundle.routes_dir, Some(server.join("ccd")));
        assert_eq!(bundle.extra_entries().unwrap(), vec![server.join("ca.crt")]);
    }

    #[test]
    fn test_load_rejects_unstamped_and_missing_bundles() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ConfigurationBundle::load(dir.path(), &names(), "ccd"),
            Err(ValidationError::BundleNotFound(_))
        ));

        fs::write(dir.path().join("server.conf"), "port 1194\nproto udp\n").unwrap();
        assert!(matches!(
            ConfigurationBundle::load(dir.path(), &names(), "ccd"),
            Err(ValidationError::NoTimestampFound(_))
        ));
    }

    #[test]
    fn test_load_from_zip_archive() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("OpenVPN_Server_Linux.zip");
        {
            let file = fs::File::create(&zip_path).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();
            zip.add_directory("server/ccd/", options).unwrap();
            zip.start_file("server/server.conf", options).unwrap();
            zip.write_all(SERVER_CONF.as_bytes()).unwrap();
            zip.start_file("server/ccd/client1", options).unwrap();
            zip.write_all(b"iroute 10.1.0.0 255.255.255.0\n").unwrap();
            zip.finish().unwrap();
        }

        let bundle = ConfigurationBundle::load(&zip_path, &names(), "ccd").unwrap();
        assert_eq!(bundle.directives.port, 1195);
        let routes = bundle.routes_dir.clone().unwrap();
        assert!(routes.join("client1").is_file());
    }
}
