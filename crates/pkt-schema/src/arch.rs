//! Host architecture detection.

/// CPU architecture of the running host.
///
/// Hook scripts see it twice: the raw toolchain name (`ARCH`) and the
/// distribution-style short name (`ARCH_NORMALIZED`).
///
/// # Example
///
/// ```
/// use pkt_schema::Arch;
///
/// let current = Arch::current();
/// println!("Running on: {}", current);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// 64-bit x86
    #[default]
    X86_64,
    /// 64-bit ARM
    Aarch64,
    /// 32-bit ARM (hard float)
    Armv7,
    /// 64-bit RISC-V
    Riscv64,
    /// Anything else; hooks get `unknown`.
    Unknown,
}

impl Arch {
    /// Get the current architecture
    pub fn current() -> Self {
        match std::env::consts::ARCH {
            "x86_64" => Self::X86_64,
            "aarch64" => Self::Aarch64,
            "arm" => Self::Armv7,
            "riscv64" => Self::Riscv64,
            _ => Self::Unknown,
        }
    }

    /// Toolchain name (`x86_64`, `aarch64`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
            Self::Armv7 => "armv7",
            Self::Riscv64 => "riscv64",
            Self::Unknown => "unknown",
        }
    }

    /// Distribution-style name (`amd64`, `arm64`, ...).
    pub fn normalized(&self) -> &'static str {
        match self {
            Self::X86_64 => "amd64",
            Self::Aarch64 => "arm64",
            Self::Armv7 => "armhf",
            Self::Riscv64 => "riscv64",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "x86_64" | "amd64" => Ok(Self::X86_64),
            "aarch64" | "arm64" => Ok(Self::Aarch64),
            "armv7" | "armhf" | "arm" => Ok(Self::Armv7),
            "riscv64" => Ok(Self::Riscv64),
            _ => Err(format!("Unknown architecture: {s}")),
        }
    }
}
