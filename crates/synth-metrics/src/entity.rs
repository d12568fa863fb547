//! Synthetic entities the generator fabricates data for.
//!
//! The set of entities is fixed at process start. Each entity belongs to one
//! of three closed kinds, and every kind maps to exactly one relational table
//! and one family of exported series.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GeneratorError, Result};

/// Default server names.
pub const DEFAULT_SERVERS: &[&str] = &[
    "web-server-01",
    "web-server-02",
    "api-server-01",
    "api-server-02",
    "db-server-01",
];

/// Default application names.
pub const DEFAULT_APPLICATIONS: &[&str] = &[
    "frontend",
    "backend-api",
    "payment-service",
    "auth-service",
    "notification-service",
];

/// Default business channels.
pub const DEFAULT_BUSINESS_CHANNELS: &[&str] = &["sales"];

/// The kind of a synthetic entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A host with CPU, memory, disk and network usage.
    Server,
    /// A service with request, error and latency figures.
    Application,
    /// A revenue channel with sales figures.
    BusinessChannel,
}

impl EntityKind {
    /// All kinds, in the order they are written each tick.
    pub const ALL: [Self; 3] = [Self::Server, Self::Application, Self::BusinessChannel];

    /// The relational table samples of this kind are inserted into.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Server => "server_metrics",
            Self::Application => "application_metrics",
            Self::BusinessChannel => "business_metrics",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Server => "server",
            Self::Application => "application",
            Self::BusinessChannel => "business_channel",
        };
        f.write_str(s)
    }
}

/// A synthetic entity: one server, application or business channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Entity {
    /// A server, identified by host name.
    Server(String),
    /// An application, identified by service name.
    Application(String),
    /// A business channel, identified by metric type (e.g. `sales`).
    BusinessChannel(String),
}

impl Entity {
    /// Returns the kind of this entity.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Server(_) => EntityKind::Server,
            Self::Application(_) => EntityKind::Application,
            Self::BusinessChannel(_) => EntityKind::BusinessChannel,
        }
    }

    /// Returns the entity's identifier.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Server(name) | Self::Application(name) | Self::BusinessChannel(name) => name,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind(), self.name())
    }
}

/// The fixed set of entities for one process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityCatalog {
    servers: Vec<Entity>,
    applications: Vec<Entity>,
    channels: Vec<Entity>,
}

impl EntityCatalog {
    /// Builds a catalog from entity names.
    ///
    /// # Errors
    ///
    /// Returns an error if any list is empty, or a name is blank or repeated
    /// within its kind.
    pub fn new<S: AsRef<str>>(servers: &[S], applications: &[S], channels: &[S]) -> Result<Self> {
        Ok(Self {
            servers: build(EntityKind::Server, servers, Entity::Server)?,
            applications: build(EntityKind::Application, applications, Entity::Application)?,
            channels: build(EntityKind::BusinessChannel, channels, Entity::BusinessChannel)?,
        })
    }

    /// Returns the entities of one kind.
    #[must_use]
    pub fn of_kind(&self, kind: EntityKind) -> &[Entity] {
        match kind {
            EntityKind::Server => &self.servers,
            EntityKind::Application => &self.applications,
            EntityKind::BusinessChannel => &self.channels,
        }
    }

    /// Iterates over every entity, servers first.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.servers
            .iter()
            .chain(&self.applications)
            .chain(&self.channels)
    }

    /// Total number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len() + self.applications.len() + self.channels.len()
    }

    /// Returns `true` if the catalog has no entities. Never true for a
    /// catalog built through [`EntityCatalog::new`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EntityCatalog {
    fn default() -> Self {
        let owned = |names: &[&str]| names.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
        Self {
            servers: owned(DEFAULT_SERVERS).into_iter().map(Entity::Server).collect(),
            applications: owned(DEFAULT_APPLICATIONS)
                .into_iter()
                .map(Entity::Application)
                .collect(),
            channels: owned(DEFAULT_BUSINESS_CHANNELS)
                .into_iter()
                .map(Entity::BusinessChannel)
                .collect(),
        }
    }
}

fn build<S: AsRef<str>>(
    kind: EntityKind,
    names: &[S],
    make: impl Fn(String) -> Entity,
) -> Result<Vec<Entity>> {
    if names.is_empty() {
        return Err(GeneratorError::config(format!("{kind} list cannot be empty")));
    }

    let mut entities: Vec<Entity> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(GeneratorError::config(format!("{kind} name cannot be blank")));
        }
        if entities.iter().any(|e| e.name() == name) {
            return Err(GeneratorError::config(format!("duplicate {kind} name '{name}'")));
        }
        entities.push(make(name.to_string()));
    }
    Ok(entities)
}
