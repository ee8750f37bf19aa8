//! Download plan: which binaries this host needs, their mirror URLs and on-disk names.

use rand::Rng;

use crate::agent::AgentFlavor;
use crate::platform::Arch;

/// Default mirror; `{arch}` is replaced by `amd64` or `arm64`.
pub const DEFAULT_DOWNLOAD_BASE: &str = "https://{arch}.ssss.nyc.mn";

/// What a downloaded binary is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Relay,
    Tunnel,
    AgentV0,
    AgentV1,
}

impl Role {
    /// Asset name on the mirror.
    pub const fn remote_name(self) -> &'static str {
        match self {
            Self::Relay => "web",
            Self::Tunnel => "bot",
            Self::AgentV0 => "agent",
            Self::AgentV1 => "v1",
        }
    }

    /// File name in the working directory when names are not randomized.
    pub const fn default_file_name(self) -> &'static str {
        match self {
            Self::Relay => "web",
            Self::Tunnel => "bot",
            Self::AgentV0 => "npm",
            Self::AgentV1 => "php",
        }
    }

    pub const fn for_agent(flavor: AgentFlavor) -> Self {
        match flavor {
            AgentFlavor::V0 => Self::AgentV0,
            AgentFlavor::V1 => Self::AgentV1,
        }
    }
}

/// A binary to fetch: where it comes from and what it is called locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub role: Role,
    pub file_name: String,
    pub url: String,
}

/// Local file names for the binaries of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryNames {
    pub relay: String,
    pub tunnel: String,
    pub agent: String,
}

impl BinaryNames {
    /// The well-known names (`web`, `bot`, `npm`/`php`).
    pub fn fixed(agent: Option<AgentFlavor>) -> Self {
        let agent_role = agent.map_or(Role::AgentV1, Role::for_agent);
        Self {
            relay: Role::Relay.default_file_name().to_string(),
            tunnel: Role::Tunnel.default_file_name().to_string(),
            agent: agent_role.default_file_name().to_string(),
        }
    }

    /// Random six-letter names, distinct from each other.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let relay = random_name(rng);
        let mut tunnel = random_name(rng);
        while tunnel == relay {
            tunnel = random_name(rng);
        }
        let mut agent = random_name(rng);
        while agent == relay || agent == tunnel {
            agent = random_name(rng);
        }
        Self {
            relay,
            tunnel,
            agent,
        }
    }

    pub fn for_role(&self, role: Role) -> &str {
        match role {
            Role::Relay => &self.relay,
            Role::Tunnel => &self.tunnel,
            Role::AgentV0 | Role::AgentV1 => &self.agent,
        }
    }
}

/// Six lowercase ASCII letters.
pub fn random_name<R: Rng>(rng: &mut R) -> String {
    (0..6)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect()
}

/// Build the mirror URL for a role on an architecture.
pub fn download_url(base: &str, arch: Arch, role: Role) -> String {
    let base = base.replace("{arch}", &arch.to_string());
    format!("{}/{}", base.trim_end_matches('/'), role.remote_name())
}

/// Everything to download for this host. The agent, when configured, comes
/// first so it starts before the relay.
pub fn plan(base: &str, arch: Arch, agent: Option<AgentFlavor>, names: &BinaryNames) -> Vec<Artifact> {
    let mut roles = Vec::with_capacity(3);
    if let Some(flavor) = agent {
        roles.push(Role::for_agent(flavor));
    }
    roles.push(Role::Relay);
    roles.push(Role::Tunnel);

    roles
        .into_iter()
        .map(|role| Artifact {
            role,
            file_name: names.for_role(role).to_string(),
            url: download_url(base, arch, role),
        })
        .collect()
}
