use std::env;
use std::sync::OnceLock;

const DUMP_SOURCE_VAR: &str = "LINALG_JIT_DUMP_SOURCE";

static SOURCE_DUMP: OnceLock<SourceDump> = OnceLock::new();

/// Which generated sources are logged at `info` level. A boolean setting
/// turns dumping on or off for every kernel; any other value keeps only the
/// kernels whose prefix starts with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SourceDump {
    Off,
    All,
    Prefix(String),
}

impl SourceDump {
    fn from_setting(setting: Option<&str>) -> Self {
        let Some(setting) = setting.map(str::trim).filter(|value| !value.is_empty()) else {
            return SourceDump::Off;
        };
        match setting.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => SourceDump::All,
            "0" | "false" | "no" | "off" => SourceDump::Off,
            _ => SourceDump::Prefix(setting.to_string()),
        }
    }

    pub(crate) fn covers(&self, prefix: &str) -> bool {
        match self {
            SourceDump::Off => false,
            SourceDump::All => true,
            SourceDump::Prefix(wanted) => prefix.starts_with(wanted.as_str()),
        }
    }
}

/// Read from the environment on first use.
pub(crate) fn source_dump() -> &'static SourceDump {
    SOURCE_DUMP.get_or_init(|| SourceDump::from_setting(env::var(DUMP_SOURCE_VAR).ok().as_deref()))
}
