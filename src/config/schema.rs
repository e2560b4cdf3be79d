use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub links: LinksConfig,

    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Stable alias → obfuscated client symbol.
    #[serde(default = "default_aliases")]
    pub aliases: BTreeMap<String, String>,

    /// Named constant table → obfuscated client symbol.
    #[serde(default = "default_lookups")]
    pub lookups: BTreeMap<String, String>,
}

// ── Resolver ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Delay between resolution attempts for pending aliases.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Attempts before an alias is given up on for the session.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_attempts() -> u32 {
    600
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

// ── Links opened by the login screen overrides ───────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinksConfig {
    #[serde(default = "default_register_url")]
    pub register_url: String,
    #[serde(default = "default_home_url")]
    pub home_url: String,
}

fn default_register_url() -> String {
    "https://highspell.com/register".into()
}

fn default_home_url() -> String {
    "https://highspell.com/".into()
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            register_url: default_register_url(),
            home_url: default_home_url(),
        }
    }
}

// ── Built-in plugins ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Register the login-gated account settings plugin.
    #[serde(default = "default_true")]
    pub account_settings: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            account_settings: true,
        }
    }
}

// ── Client symbol tables ──────────────────────────────────────────

const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("EntityManager", "Bk"),
    ("GroundItemManager", "yN"),
    ("MeshManager", "zF"),
    ("WorldMapManager", "If"),
    ("AtmosphereManager", "zR"),
    ("WorldEntityManager", "aD"),
    ("SpellManager", "CW"),
    ("SpellMeshManager", "$k"),
    ("GameLoop", "SW"),
    ("ChatManager", "jG"),
    ("RangeManager", "_G"),
    ("SocketManager", "$G"),
    ("GameEngine", "xW"),
    ("ItemManager", "KV"),
    ("LoginScreen", "FW"),
    ("PrivateChatMessageList", "aH"),
    ("InventoryManager", "VF"),
    ("HR", "HR"),
    ("InventoryItemSpriteManager", "CH"),
    ("ItemDefMap", "DP"),
    ("BankUIManager", "Oz"),
    ("GameCameraManager", "eR"),
    ("SpriteSheetManager", "xk"),
    ("NpcDefinitionManager", "bB"),
    ("SpellDefinitionManager", "RV"),
    ("QuestDefinitionManager", "bM"),
    ("AppearanceUtils", "sk"),
    ("BlobLoader", "CR"),
    ("HTMLUIManager", "_q"),
    ("ScreenMask", "nX"),
    ("MagicSkillManager", "iB"),
    ("SpellMenuManager", "_z"),
    ("ContextMenuItemManager", "cz"),
    ("TargetActionManager", "GV"),
];

const DEFAULT_LOOKUPS: &[(&str, &str)] = &[
    ("GameWorldActions", "VA"),
    ("InventoryActions", "QA"),
    ("Skills", "bA"),
    ("EquipmentTypes", "oP"),
    ("EntityTypes", "RF"),
    ("AppearanceTypes", "YP"),
    ("RequirementTypes", "KA"),
    ("SpellTypes", "JF"),
];

fn to_table(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(name, symbol)| ((*name).to_string(), (*symbol).to_string()))
        .collect()
}

pub fn default_aliases() -> BTreeMap<String, String> {
    to_table(DEFAULT_ALIASES)
}

pub fn default_lookups() -> BTreeMap<String, String> {
    to_table(DEFAULT_LOOKUPS)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            resolver: ResolverConfig::default(),
            links: LinksConfig::default(),
            plugins: PluginsConfig::default(),
            aliases: default_aliases(),
            lookups: default_lookups(),
        }
    }
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let highlite_dir = home.join(".highlite");
        if !highlite_dir.exists() {
            fs::create_dir_all(&highlite_dir).context("Failed to create .highlite directory")?;
        }

        let mut config = Self::load_from(&highlite_dir.join("config.toml"))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Read `path`, or write defaults there if it does not exist yet.
    /// Environment overrides are not applied.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let mut config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            config.config_path = path.to_path_buf();
            Ok(config)
        } else {
            let config = Config {
                config_path: path.to_path_buf(),
                ..Config::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Same as [`Config::apply_env_overrides`] with an explicit lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Poll interval: HIGHLITE_POLL_INTERVAL_MS
        if let Some(ms) = lookup("HIGHLITE_POLL_INTERVAL_MS").and_then(|v| v.parse::<u64>().ok()) {
            if ms > 0 {
                self.resolver.poll_interval_ms = ms;
            }
        }

        // Attempt budget: HIGHLITE_MAX_ATTEMPTS
        if let Some(attempts) = lookup("HIGHLITE_MAX_ATTEMPTS").and_then(|v| v.parse::<u32>().ok()) {
            if attempts > 0 {
                self.resolver.max_attempts = attempts;
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
        }
        fs::write(&self.config_path, toml_str).context("Failed to write config file")?;
        Ok(())
    }
}
