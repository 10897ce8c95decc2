//! Options for constructing a [`Topology`](crate::Topology), along with server addresses and the
//! handshake metadata sent to each server.

use std::{
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use bson::{doc, Document};
use derivative::Derivative;
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use typed_builder::TypedBuilder;

use crate::{
    cursor::CursorFactory,
    error::{Error, Result},
};

/// The default port a MongoDB server listens on.
pub const DEFAULT_PORT: u16 = 27017;

/// The hostname and port of a MongoDB server.
#[derive(Clone, Debug, Eq)]
pub struct ServerAddress {
    /// The hostname or IP address where the server can be found.
    pub host: String,

    /// The TCP port the server is listening on. The default is 27017.
    pub port: Option<u16>,
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: None,
        }
    }
}

impl PartialEq for ServerAddress {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port.unwrap_or(DEFAULT_PORT) == other.port.unwrap_or(DEFAULT_PORT)
    }
}

impl Hash for ServerAddress {
    fn hash<H>(&self, state: &mut H)
    where
        H: Hasher,
    {
        self.host.hash(state);
        self.port.unwrap_or(DEFAULT_PORT).hash(state);
    }
}

impl FromStr for ServerAddress {
    type Err = Error;
    fn from_str(address: &str) -> Result<Self> {
        ServerAddress::parse(address)
    }
}

impl ServerAddress {
    /// Parses an address string of the form `host[:port]` into a `ServerAddress`.
    pub fn parse(address: impl AsRef<str>) -> Result<Self> {
        let address = address.as_ref();
        let mut parts = address.split(':');

        let hostname = match parts.next() {
            Some(part) if !part.is_empty() => part,
            _ => {
                return Err(Error::invalid_argument(format!(
                    "invalid server address: \"{}\"; hostname cannot be empty",
                    address
                )))
            }
        };

        let port = match parts.next() {
            Some(part) => {
                let port = u16::from_str(part).map_err(|_| {
                    Error::invalid_argument(format!(
                        "port must be valid 16-bit unsigned integer, instead got: {}",
                        part
                    ))
                })?;

                if port == 0 {
                    return Err(Error::invalid_argument(format!(
                        "invalid server address: \"{}\"; port must be non-zero",
                        address
                    )));
                }
                if parts.next().is_some() {
                    return Err(Error::invalid_argument(format!(
                        "address \"{}\" contains more than one unescaped ':'",
                        address
                    )));
                }

                Some(port)
            }
            None => None,
        };

        Ok(ServerAddress {
            host: hostname.to_lowercase(),
            port,
        })
    }

    pub(crate) fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}:{}", self.host, self.port())
    }
}

impl Serialize for ServerAddress {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ServerAddress {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::parse(s.as_str())
            .map_err(|e| <D::Error as serde::de::Error>::custom(format!("{}", e)))
    }
}

/// Parses a comma-delimited seedlist of `host[:port]` entries.
pub fn parse_seedlist(seedlist: impl AsRef<str>) -> Result<Vec<ServerAddress>> {
    let seedlist = seedlist.as_ref();
    if seedlist.is_empty() {
        return Err(Error::invalid_argument("seedlist cannot be empty"));
    }
    seedlist.split(',').map(ServerAddress::parse).collect()
}

/// Options used to configure a [`Topology`](crate::Topology).
#[derive(Clone, Derivative, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
#[derivative(Debug)]
#[non_exhaustive]
pub struct TopologyOptions {
    /// The initial list of seeds the topology should monitor.
    #[builder(default_code = "vec![ServerAddress::default()]")]
    pub hosts: Vec<ServerAddress>,

    /// The application name sent to the server as part of the handshake metadata.
    #[builder(default)]
    pub app_name: Option<String>,

    /// The name of the replica set the topology is connecting to. When present, the initial
    /// topology type is `ReplicaSetNoPrimary`.
    #[builder(default)]
    pub replica_set_name: Option<String>,

    /// The amount of latency beyond that of the suitable server with the minimum latency that is
    /// acceptable for an operation.
    ///
    /// The default value is 15 ms.
    #[builder(default)]
    pub local_threshold: Option<Duration>,

    /// The maximum amount of time to block on server selection before failing with a timeout.
    ///
    /// The default value is 10 seconds.
    #[builder(default)]
    pub server_selection_timeout: Option<Duration>,

    /// The amount of time each monitor waits between server checks.
    ///
    /// The default value is 30 seconds.
    #[builder(default)]
    pub heartbeat_freq: Option<Duration>,

    /// The minimum amount of time a monitor waits before honoring a request for an immediate
    /// check.
    ///
    /// The default value is 500 ms.
    #[builder(default)]
    pub min_heartbeat_freq: Option<Duration>,

    /// The compressor names forwarded to the transport layer, in priority order.
    #[builder(default)]
    pub compressors: Option<Vec<String>>,

    /// Extra information to append to the driver version in the handshake metadata. This should
    /// be used by libraries wrapping this crate, e.g. full drivers or ODMs.
    #[builder(default)]
    pub driver_info: Option<DriverInfo>,

    /// The factory used by [`Topology::cursor`](crate::Topology::cursor) to construct cursors.
    #[derivative(Debug = "ignore")]
    #[builder(default, setter(strip_option))]
    pub cursor_factory: Option<Arc<dyn CursorFactory>>,
}

impl TopologyOptions {
    /// Constructs options from a comma-delimited `host[:port]` seedlist, leaving every other
    /// option at its default.
    pub fn parse(seedlist: impl AsRef<str>) -> Result<Self> {
        let hosts = parse_seedlist(seedlist)?;
        Ok(TopologyOptions::builder().hosts(hosts).build())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(Error::invalid_argument("the seedlist cannot be empty"));
        }
        Ok(())
    }

    /// Resolves the handshake metadata for this configuration.
    pub(crate) fn client_metadata(&self) -> ClientMetadata {
        let mut metadata = BASE_CLIENT_METADATA.clone();
        metadata.application = self
            .app_name
            .as_ref()
            .map(|name| AppMetadata { name: name.clone() });

        if let Some(ref info) = self.driver_info {
            metadata.driver.name = format!("{}|{}", metadata.driver.name, info.name);
            if let Some(ref version) = info.version {
                metadata.driver.version = format!("{}|{}", metadata.driver.version, version);
            }
            if let Some(ref platform) = info.platform {
                metadata.platform = format!("{}|{}", metadata.platform, platform);
            }
        }

        metadata
    }
}

/// Options for a single command dispatch.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
#[non_exhaustive]
pub struct CommandOptions {
    /// The read preference used to select the server the command runs on. Defaults to `Primary`.
    #[builder(default)]
    pub read_preference: Option<crate::selection_criteria::ReadPreference>,

    /// Whether the command is eligible for a single automatic retry on transient failure.
    #[builder(default)]
    pub retry_writes: bool,
}

/// Options for a single write dispatch.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
#[non_exhaustive]
pub struct WriteOptions {
    /// Whether the write is eligible for a single automatic retry on transient failure.
    #[builder(default)]
    pub retry_writes: bool,

    /// Whether the server should stop processing a batch at the first failure.
    #[builder(default)]
    pub ordered: Option<bool>,
}

/// Extra driver information appended to the handshake metadata by wrapping libraries.
#[derive(Clone, Debug, TypedBuilder, PartialEq)]
#[builder(field_defaults(setter(into)))]
#[non_exhaustive]
pub struct DriverInfo {
    /// The name of the wrapping library.
    pub name: String,

    /// The version of the wrapping library.
    #[builder(default)]
    pub version: Option<String>,

    /// Extra platform information from the wrapping library.
    #[builder(default)]
    pub platform: Option<String>,
}

/// The client-info record embedded in handshake options, as described in the MongoDB handshake
/// specification.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ClientMetadata {
    /// The application section, populated from `app_name`.
    pub application: Option<AppMetadata>,

    /// The driver section.
    pub driver: DriverMetadata,

    /// The operating system section.
    pub os: OsMetadata,

    /// The language platform the driver runs on.
    pub platform: String,
}

/// The application section of the handshake metadata.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct AppMetadata {
    /// The configured application name.
    pub name: String,
}

/// The driver section of the handshake metadata.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct DriverMetadata {
    /// The driver name.
    pub name: String,

    /// The driver version.
    pub version: String,
}

/// The operating system section of the handshake metadata.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct OsMetadata {
    /// The operating system type, e.g. "linux".
    pub os_type: String,

    /// The operating system name.
    pub name: Option<String>,

    /// The machine architecture, e.g. "x86_64".
    pub architecture: Option<String>,

    /// The operating system version.
    pub version: Option<String>,
}

static BASE_CLIENT_METADATA: Lazy<ClientMetadata> = Lazy::new(|| {
    let info = os_info::get();
    ClientMetadata {
        application: None,
        driver: DriverMetadata {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        os: OsMetadata {
            os_type: std::env::consts::OS.to_string(),
            name: Some(info.os_type().to_string()),
            architecture: Some(std::env::consts::ARCH.to_string()),
            version: Some(info.version().to_string()),
        },
        platform: rustc_version_runtime::version_meta().short_version_string,
    }
});

impl ClientMetadata {
    /// Renders the metadata as the `client` document included in the handshake.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();

        if let Some(ref application) = self.application {
            doc.insert("application", doc! { "name": application.name.clone() });
        }

        doc.insert(
            "driver",
            doc! {
                "name": self.driver.name.clone(),
                "version": self.driver.version.clone(),
            },
        );

        let mut os = doc! { "type": self.os.os_type.clone() };
        if let Some(ref name) = self.os.name {
            os.insert("name", name.clone());
        }
        if let Some(ref arch) = self.os.architecture {
            os.insert("architecture", arch.clone());
        }
        if let Some(ref version) = self.os.version {
            os.insert("version", version.clone());
        }
        doc.insert("os", os);
        doc.insert("platform", self.platform.clone());

        doc
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn address_parsing() {
        let address = ServerAddress::parse("Example.COM:27018").unwrap();
        assert_eq!(address.host, "example.com");
        assert_eq!(address.port, Some(27018));

        assert!(ServerAddress::parse("").is_err());
        assert!(ServerAddress::parse("host:0").is_err());
        assert!(ServerAddress::parse("host:notaport").is_err());
        assert!(ServerAddress::parse("host:1:2").is_err());
    }

    #[test]
    fn default_port_is_normalized() {
        let implicit = ServerAddress::parse("localhost").unwrap();
        let explicit = ServerAddress::parse("localhost:27017").unwrap();
        assert_eq!(implicit, explicit);
        assert_eq!(implicit.to_string(), "localhost:27017");
    }

    #[test]
    fn seedlist_parsing() {
        let seeds = parse_seedlist("a:1,b,c:3").unwrap();
        assert_eq!(
            seeds,
            vec![
                ServerAddress {
                    host: "a".to_string(),
                    port: Some(1)
                },
                ServerAddress {
                    host: "b".to_string(),
                    port: Some(27017)
                },
                ServerAddress {
                    host: "c".to_string(),
                    port: Some(3)
                },
            ]
        );
        assert!(parse_seedlist("").is_err());
        assert!(parse_seedlist("a,").is_err());
    }

    #[test]
    fn metadata_includes_driver_info() {
        let options = TopologyOptions::builder()
            .app_name(Some("app".to_string()))
            .driver_info(Some(
                DriverInfo::builder().name("wrapper".to_string()).build(),
            ))
            .build();
        let metadata = options.client_metadata();
        assert!(metadata.driver.name.ends_with("|wrapper"));

        let doc = metadata.to_document();
        assert_eq!(
            doc.get_document("application").unwrap().get_str("name").unwrap(),
            "app"
        );
        assert!(doc.get_document("os").unwrap().get_str("type").is_ok());
    }
}
