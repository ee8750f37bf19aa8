/// CPU architecture family of the prebuilt binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Amd64,
    Arm64,
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Amd64 => write!(f, "amd64"),
            Self::Arm64 => write!(f, "arm64"),
        }
    }
}

impl Arch {
    /// Map a machine name (`uname -m`, `std::env::consts::ARCH`) to a build.
    pub fn from_machine(machine: &str) -> Self {
        match machine.to_ascii_lowercase().as_str() {
            "arm" | "arm64" | "aarch64" => Self::Arm64,
            // Everything else gets the x86-64 build, as upstream only ships two.
            _ => Self::Amd64,
        }
    }

    /// Architecture of the running process.
    pub fn current() -> Self {
        Self::from_machine(std::env::consts::ARCH)
    }
}
