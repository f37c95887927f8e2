//! Typed configuration, loaded once at startup from a TOML file.
//!
//! Every section has defaults so a missing file still yields a working
//! setup for the stock Gomag admin UI. Admin credentials are never read from
//! the file; see [`AdminCredentials::from_env`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use scraper::Selector;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "importer.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub pricing: PricingConfig,
    pub review: ReviewConfig,
    pub export: ExportConfig,
    pub browser: BrowserSettings,
    pub admin: AdminConfig,
    pub selectors: AutomationSelectors,
    /// Per-domain selector maps, keyed by registered domain
    pub scrapers: BTreeMap<String, SiteSelectors>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    /// Extra attempts after the first failed fetch
    pub retries: u32,
    pub retry_delay_ms: u64,
    /// Rows scraped concurrently
    pub concurrency: usize,
    pub user_agent: String,
    pub accept_language: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retries: 1,
            retry_delay_ms: 1000,
            concurrency: 4,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".to_string(),
            accept_language: "ro-RO,ro;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub multiplier: f64,
    pub default_price: f64,
    pub currency: String,
    pub vat_rate: u32,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            multiplier: 2.0,
            default_price: 1.0,
            currency: "RON".to_string(),
            vat_rate: 21,
        }
    }
}

/// Which review rows are exported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    /// Only rows the operator approved
    #[default]
    Explicit,
    /// Every row the operator did not reject
    AllNonRejected,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub approval: ApprovalPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Store language; pages in another language are flagged for translation
    pub language: String,
    pub sku_max_len: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            language: "ro".to_string(),
            sku_max_len: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub chrome_executable: Option<String>,
    /// Re-fetch blocked pages through the headless browser
    pub render_fallback: bool,
    pub debug_artifacts_dir: String,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            render_fallback: true,
            debug_artifacts_dir: "debug_artifacts".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub login_path: String,
    pub categories_path: String,
    pub import_path: String,
    pub import_list_path: String,
    pub element_timeout_secs: u64,
    pub navigation_timeout_secs: u64,
    /// Lower-case words in an import list row that mean the import failed
    pub failure_markers: Vec<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            login_path: "/gomag/dashboard".to_string(),
            categories_path: "/gomag/product/category/list".to_string(),
            import_path: "/gomag/product/import/add".to_string(),
            import_list_path: "/gomag/product/import/list".to_string(),
            element_timeout_secs: 20,
            navigation_timeout_secs: 60,
            failure_markers: vec!["erori".to_string(), "error".to_string()],
        }
    }
}

/// Selectors for each automation stage, centralized since the admin UI moves
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationSelectors {
    pub login: LoginSelectors,
    pub category_list: CategoryListSelectors,
    pub upload: UploadSelectors,
    pub start_import: StartImportSelectors,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginSelectors {
    pub email: String,
    pub password: String,
    pub submit: String,
    /// Present only once the dashboard rendered for a logged-in user
    pub logged_in: String,
}

impl Default for LoginSelectors {
    fn default() -> Self {
        Self {
            email: r#"input[name="email"], input[type="email"]"#.to_string(),
            password: r#"input[name="password"], input[type="password"]"#.to_string(),
            submit: r#"button[type="submit"]"#.to_string(),
            logged_in: "#content".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryListSelectors {
    /// Matches one element per category name
    pub names: String,
}

impl Default for CategoryListSelectors {
    fn default() -> Self {
        Self {
            names: "table tbody tr td:first-child, #content .-g2-table .-g2-table-row:not(.-g2-table-head) > .-g2-table-col:first-child".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSelectors {
    pub file_input: String,
}

impl Default for UploadSelectors {
    fn default() -> Self {
        Self {
            file_input: r#"input[type="file"]"#.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartImportSelectors {
    pub button: String,
    /// First row of the import history list
    pub import_list_row: String,
}

impl Default for StartImportSelectors {
    fn default() -> Self {
        Self {
            button: r#"#start-import, button[name="start_import"], button[type="submit"]"#.to_string(),
            import_list_row: "table tbody tr, #content .-g2-table .-g2-table-row:not(.-g2-table-head)".to_string(),
        }
    }
}

/// CSS selectors for the fields of one site's product page.
///
/// Any selector left out falls back to the generic heuristics for that field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteSelectors {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<String>,
    pub sku: Option<String>,
    pub images: Option<String>,
    /// Attribute holding the image URL (default `src`, then `data-src`)
    pub image_attr: Option<String>,
    pub spec_rows: Option<String>,
    pub spec_key: Option<String>,
    pub spec_value: Option<String>,
    pub variant_rows: Option<String>,
    pub variant_name: Option<String>,
    pub variant_value: Option<String>,
    pub variant_price: Option<String>,
    /// Always fetch this site through the headless browser
    pub render: bool,
    /// Clicked after navigation when present, to dismiss a cookie banner
    pub cookie_accept: Option<String>,
    /// Page-height scrolls after load, for lazy-loaded images
    pub scroll_steps: u32,
    /// Supplier account needed before prices are shown. Implies `render`.
    pub login: Option<SiteLogin>,
}

impl SiteSelectors {
    /// Pages of this site can only be read through the browser.
    pub fn needs_browser(&self) -> bool {
        self.render || self.login.is_some()
    }
}

/// Login form of a supplier site. The credentials themselves come from the
/// environment variables named here, never from the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteLogin {
    pub url: String,
    pub username: String,
    pub password: String,
    pub submit: String,
    /// Present only once logged in; waited for after submitting
    pub logged_in: Option<String>,
    pub username_env: String,
    pub password_env: String,
}

impl SiteLogin {
    pub fn credentials(&self) -> Result<SiteCredentials, ConfigError> {
        Ok(SiteCredentials {
            username: read_env(&self.username_env)?,
            password: read_env(&self.password_env)?,
        })
    }
}

#[derive(Clone)]
pub struct SiteCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for SiteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl SiteSelectors {
    fn named(&self) -> Vec<(&'static str, &str)> {
        let login = self.login.as_ref();
        [
            ("title", &self.title),
            ("description", &self.description),
            ("price", &self.price),
            ("sku", &self.sku),
            ("images", &self.images),
            ("spec_rows", &self.spec_rows),
            ("spec_key", &self.spec_key),
            ("spec_value", &self.spec_value),
            ("variant_rows", &self.variant_rows),
            ("variant_name", &self.variant_name),
            ("variant_value", &self.variant_value),
            ("variant_price", &self.variant_price),
            ("cookie_accept", &self.cookie_accept),
        ]
        .into_iter()
        .filter_map(|(name, sel)| sel.as_deref().map(|s| (name, s)))
        .chain(login.into_iter().flat_map(|l| {
            [
                ("login.username", l.username.as_str()),
                ("login.password", l.password.as_str()),
                ("login.submit", l.submit.as_str()),
            ]
            .into_iter()
            .chain(l.logged_in.as_deref().map(|s| ("login.logged_in", s)))
        }))
        .collect()
    }
}

impl AppConfig {
    /// Load the config file, or defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        info!(
            "Loaded config from {} ({} site scrapers)",
            path.display(),
            config.scrapers.len()
        );
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Reject selectors that do not parse, so a typo fails at startup rather
    /// than on the hundredth row.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.selectors;
        let mut checks: Vec<(String, &str)> = vec![
            ("selectors.login.email".into(), s.login.email.as_str()),
            ("selectors.login.password".into(), s.login.password.as_str()),
            ("selectors.login.submit".into(), s.login.submit.as_str()),
            ("selectors.login.logged_in".into(), s.login.logged_in.as_str()),
            ("selectors.category_list.names".into(), s.category_list.names.as_str()),
            ("selectors.upload.file_input".into(), s.upload.file_input.as_str()),
            ("selectors.start_import.button".into(), s.start_import.button.as_str()),
            (
                "selectors.start_import.import_list_row".into(),
                s.start_import.import_list_row.as_str(),
            ),
        ];
        for (domain, site) in &self.scrapers {
            for (name, selector) in site.named() {
                checks.push((format!("scrapers.{domain}.{name}"), selector));
            }
        }

        for (field, selector) in checks {
            if Selector::parse(selector).is_err() {
                return Err(ConfigError::Selector {
                    field,
                    selector: selector.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn read_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnv(name.to_string()))
}

/// Admin panel login, supplied out-of-band through the environment.
#[derive(Clone)]
pub struct AdminCredentials {
    pub base_url: String,
    pub email: String,
    pub password: String,
}

impl AdminCredentials {
    /// Reads `GOMAG_BASE_URL`, `GOMAG_EMAIL` and `GOMAG_PASSWORD`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: read_env("GOMAG_BASE_URL")?.trim_end_matches('/').to_string(),
            email: read_env("GOMAG_EMAIL")?,
            password: read_env("GOMAG_PASSWORD")?,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_business_rules() {
        let config = AppConfig::default();
        assert_eq!(config.pricing.multiplier, 2.0);
        assert_eq!(config.pricing.default_price, 1.0);
        assert_eq!(config.http.retries, 1);
        assert_eq!(config.review.approval, ApprovalPolicy::Explicit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let config = AppConfig::from_toml(
            r##"
            [pricing]
            multiplier = 3.0

            [selectors.login]
            email = "#user"

            [scrapers."shop.example.com"]
            title = "h1.product-name"
            price = ".price-now"
            render = true
            "##,
        )
        .unwrap();

        assert_eq!(config.pricing.multiplier, 3.0);
        assert_eq!(config.pricing.default_price, 1.0);
        assert_eq!(config.selectors.login.email, "#user");
        assert_eq!(config.selectors.login.submit, r#"button[type="submit"]"#);
        let site = &config.scrapers["shop.example.com"];
        assert_eq!(site.title.as_deref(), Some("h1.product-name"));
        assert!(site.render);
        assert!(site.sku.is_none());
    }

    #[test]
    fn bad_selector_is_rejected() {
        let config = AppConfig::from_toml(
            r#"
            [scrapers."shop.example.com"]
            price = "div[[["
            "#,
        )
        .unwrap();

        match config.validate() {
            Err(ConfigError::Selector { field, .. }) => {
                assert_eq!(field, "scrapers.shop.example.com.price");
            }
            other => panic!("expected selector error, got {other:?}"),
        }
    }

    #[test]
    fn supplier_login_block() {
        let config = AppConfig::from_toml(
            r##"
            [scrapers."furnizor.example.com"]
            price = ".pret"
            cookie_accept = "#accept-cookies"
            scroll_steps = 3

            [scrapers."furnizor.example.com".login]
            url = "https://furnizor.example.com/login"
            username = "#user"
            password = "#pass"
            submit = "button.login"
            logged_in = "a.logout"
            username_env = "FURNIZOR_USER"
            password_env = "FURNIZOR_PASS"
            "##,
        )
        .unwrap();
        assert!(config.validate().is_ok());

        let site = &config.scrapers["furnizor.example.com"];
        assert!(!site.render);
        assert!(site.needs_browser());
        assert_eq!(site.scroll_steps, 3);
        let login = site.login.as_ref().unwrap();
        assert_eq!(login.logged_in.as_deref(), Some("a.logout"));
        assert_eq!(login.password_env, "FURNIZOR_PASS");

        let broken = AppConfig::from_toml(
            r#"
            [scrapers."furnizor.example.com".login]
            url = "https://furnizor.example.com/login"
            username = "input[["
            "#,
        )
        .unwrap();
        match broken.validate() {
            Err(ConfigError::Selector { field, .. }) => {
                assert_eq!(field, "scrapers.furnizor.example.com.login.username");
            }
            other => panic!("expected selector error, got {other:?}"),
        }
    }

    #[test]
    fn missing_supplier_credentials_name_the_variable() {
        let login = SiteLogin {
            username_env: "GOMAG_IMPORTER_TEST_UNSET_USER".to_string(),
            password_env: "GOMAG_IMPORTER_TEST_UNSET_PASS".to_string(),
            ..SiteLogin::default()
        };
        match login.credentials() {
            Err(ConfigError::MissingEnv(name)) => assert_eq!(name, "GOMAG_IMPORTER_TEST_UNSET_USER"),
            other => panic!("expected missing env, got {other:?}"),
        }
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = AdminCredentials {
            base_url: "https://admin.example.com".to_string(),
            email: "ops@example.com".to_string(),
            password: "hunter2".to_string(),
        };
        let shown = format!("{creds:?}");
        assert!(!shown.contains("hunter2"));
        assert_eq!(
            creds.url("/gomag/dashboard"),
            "https://admin.example.com/gomag/dashboard"
        );
    }
}
