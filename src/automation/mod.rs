//! Gomag admin automation as an explicit state machine.
//!
//! ```text
//! Idle -> LoggedIn -> [CategoriesListed] -> FileUploaded -> ImportStarted
//!                                                            -> ImportConfirmed
//!                                                            -> ImportFailed
//! ```
//!
//! Every step waits for its configured selector with a bounded timeout. A
//! failed step halts the driver: later calls are refused and nothing is
//! retried.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::browser::{BrowserSession, SessionError};
use crate::config::{AdminConfig, AdminCredentials, AutomationSelectors};
use crate::error::{AutomationError, AutomationReason, AutomationStage};

/// Delay between import list reloads while waiting for a new import row.
const IMPORT_POLL: Duration = Duration::from_secs(2);

impl From<SessionError> for AutomationReason {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(selector) => Self::ElementNotFound(selector),
            SessionError::Timeout => Self::Timeout,
            SessionError::Navigation(msg) => Self::Navigation(msg),
            SessionError::Browser(msg) => Self::Browser(msg),
        }
    }
}

/// Outcome of a confirmed import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub stage: AutomationStage,
    /// Text of the newest import list row
    pub status: String,
}

fn allowed(from: AutomationStage, to: AutomationStage) -> bool {
    use AutomationStage::*;
    matches!(
        (from, to),
        (Idle, LoggedIn)
            | (LoggedIn, CategoriesListed)
            | (LoggedIn | CategoriesListed, FileUploaded)
            | (FileUploaded, ImportStarted)
            | (ImportStarted, ImportConfirmed | ImportFailed)
    )
}

pub struct AutomationDriver<S: BrowserSession> {
    session: S,
    credentials: AdminCredentials,
    admin: AdminConfig,
    selectors: AutomationSelectors,
    artifacts_dir: Option<PathBuf>,
    state: AutomationStage,
    halted: bool,
    /// First import list row seen before uploading
    baseline: Option<String>,
}

impl<S: BrowserSession> AutomationDriver<S> {
    pub fn new(
        session: S,
        credentials: AdminCredentials,
        admin: AdminConfig,
        selectors: AutomationSelectors,
    ) -> Self {
        Self {
            session,
            credentials,
            admin,
            selectors,
            artifacts_dir: None,
            state: AutomationStage::Idle,
            halted: false,
            baseline: None,
        }
    }

    /// Save the page HTML under `dir` whenever a stage fails.
    pub fn with_debug_artifacts(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = Some(dir.into());
        self
    }

    pub fn state(&self) -> AutomationStage {
        self.state
    }

    /// Hand the session back, e.g. to close the tab.
    pub fn into_session(self) -> S {
        self.session
    }

    fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.admin.element_timeout_secs)
    }

    fn enter(&self, target: AutomationStage) -> Result<(), AutomationError> {
        if self.halted || !allowed(self.state, target) {
            return Err(AutomationError::new(
                target,
                AutomationReason::InvalidTransition { from: self.state },
            ));
        }
        Ok(())
    }

    /// Halt the driver and record the failure.
    async fn fail(&mut self, stage: AutomationStage, reason: AutomationReason) -> AutomationError {
        self.halted = true;
        let err = AutomationError::new(stage, reason);
        error!("{}", err);
        self.save_artifact(stage).await;
        err
    }

    async fn save_artifact(&self, stage: AutomationStage) {
        let Some(dir) = &self.artifacts_dir else {
            return;
        };
        let html = match self.session.html().await {
            Ok(html) => html,
            Err(e) => {
                warn!("No debug snapshot for {}: {}", stage, e);
                return;
            }
        };
        let path = dir.join(format!("{stage}.html"));
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, html).await
        }
        .await;
        match written {
            Ok(()) => info!("Saved debug snapshot to {}", path.display()),
            Err(e) => warn!("Could not write {}: {}", path.display(), e),
        }
    }

    /// Run `step`, halting with `stage` on any session error.
    async fn step<T>(
        &mut self,
        stage: AutomationStage,
        result: Result<T, SessionError>,
    ) -> Result<T, AutomationError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => Err(self.fail(stage, e.into()).await),
        }
    }

    pub async fn login(&mut self) -> Result<(), AutomationError> {
        let stage = AutomationStage::LoggedIn;
        self.enter(stage)?;
        let sel = self.selectors.login.clone();
        let timeout = self.element_timeout();

        info!("Logging in to {}", self.credentials.base_url);
        let url = self.credentials.url(&self.admin.login_path);
        let r = self.session.navigate(&url).await;
        self.step(stage, r).await?;

        let r = self.session.wait_for(&sel.email, timeout).await;
        self.step(stage, r).await?;
        let r = self.session.fill(&sel.email, &self.credentials.email).await;
        self.step(stage, r).await?;
        let r = self.session.fill(&sel.password, &self.credentials.password).await;
        self.step(stage, r).await?;
        let r = self.session.click(&sel.submit).await;
        self.step(stage, r).await?;

        let r = self.session.wait_for(&sel.logged_in, timeout).await;
        self.step(stage, r).await?;

        self.state = stage;
        info!("Logged in as {}", self.credentials.email);
        Ok(())
    }

    /// Category names as shown in the admin category list.
    pub async fn list_categories(&mut self) -> Result<Vec<String>, AutomationError> {
        let stage = AutomationStage::CategoriesListed;
        self.enter(stage)?;
        let names_sel = self.selectors.category_list.names.clone();

        let url = self.credentials.url(&self.admin.categories_path);
        let r = self.session.navigate(&url).await;
        self.step(stage, r).await?;
        let r = self.session.wait_for(&names_sel, self.element_timeout()).await;
        self.step(stage, r).await?;
        let r = self.session.read_texts(&names_sel).await;
        let texts = self.step(stage, r).await?;

        let mut categories: Vec<String> = Vec::new();
        for name in texts.into_iter().map(|t| t.trim().to_string()) {
            if !name.is_empty() && !categories.contains(&name) {
                categories.push(name);
            }
        }

        self.state = stage;
        info!("Found {} categories", categories.len());
        Ok(categories)
    }

    pub async fn upload_file(&mut self, file: &Path) -> Result<(), AutomationError> {
        let stage = AutomationStage::FileUploaded;
        self.enter(stage)?;

        let file = match std::path::absolute(file) {
            Ok(path) if path.is_file() => path,
            _ => {
                let reason = AutomationReason::Browser(format!("export file {} not found", file.display()));
                return Err(self.fail(stage, reason).await);
            }
        };
        let row_sel = self.selectors.start_import.import_list_row.clone();
        let input_sel = self.selectors.upload.file_input.clone();

        let list_url = self.credentials.url(&self.admin.import_list_path);
        let r = self.session.navigate(&list_url).await;
        self.step(stage, r).await?;
        let r = self.session.read_text(&row_sel).await;
        self.baseline = self.step(stage, r).await?;
        debug!("Import list before upload: {:?}", self.baseline);

        let import_url = self.credentials.url(&self.admin.import_path);
        let r = self.session.navigate(&import_url).await;
        self.step(stage, r).await?;
        let r = self.session.wait_for(&input_sel, self.element_timeout()).await;
        self.step(stage, r).await?;
        let r = self.session.set_input_files(&input_sel, &file).await;
        self.step(stage, r).await?;

        self.state = stage;
        info!("Uploaded {}", file.display());
        Ok(())
    }

    /// Start the import and wait for a new row in the import list.
    pub async fn start_import(&mut self) -> Result<ImportReport, AutomationError> {
        let stage = AutomationStage::ImportStarted;
        self.enter(stage)?;
        let button = self.selectors.start_import.button.clone();
        let row_sel = self.selectors.start_import.import_list_row.clone();
        let timeout = self.element_timeout();

        let r = self.session.wait_for(&button, timeout).await;
        self.step(stage, r).await?;
        let r = self.session.click(&button).await;
        self.step(stage, r).await?;
        self.state = stage;
        info!("Import started");

        let list_url = self.credentials.url(&self.admin.import_list_path);
        let deadline = tokio::time::Instant::now() + timeout;
        let latest = loop {
            let r = self.session.navigate(&list_url).await;
            self.step(stage, r).await?;
            let r = self.session.read_text(&row_sel).await;
            let row = self.step(stage, r).await?;
            if let Some(row) = row
                && Some(&row) != self.baseline.as_ref()
            {
                break row;
            }
            if tokio::time::Instant::now() >= deadline {
                self.state = AutomationStage::ImportFailed;
                return Err(self
                    .fail(AutomationStage::ImportConfirmed, AutomationReason::NoNewImport)
                    .await);
            }
            tokio::time::sleep(IMPORT_POLL).await;
        };

        let lower = latest.to_lowercase();
        if self.admin.failure_markers.iter().any(|m| lower.contains(&m.to_lowercase())) {
            self.state = AutomationStage::ImportFailed;
            return Err(self
                .fail(
                    AutomationStage::ImportConfirmed,
                    AutomationReason::ImportRejected(latest),
                )
                .await);
        }

        self.state = AutomationStage::ImportConfirmed;
        info!("Import confirmed: {}", latest);
        Ok(ImportReport {
            stage: self.state,
            status: latest,
        })
    }

    /// Login, upload and import in one go.
    pub async fn upload_and_import(&mut self, file: &Path) -> Result<ImportReport, AutomationError> {
        if self.state == AutomationStage::Idle {
            self.login().await?;
        }
        self.upload_file(file).await?;
        self.start_import().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    /// Scripted stand-in for a browser tab.
    #[derive(Default)]
    struct FakeSession {
        present: Mutex<HashSet<String>>,
        texts: Mutex<HashMap<String, Vec<String>>>,
        /// Texts swapped in when a selector is clicked
        on_click: HashMap<String, (String, Vec<String>)>,
        filled: Mutex<Vec<(String, String)>>,
        visited: Mutex<Vec<String>>,
        uploaded: Mutex<Option<PathBuf>>,
    }

    impl FakeSession {
        fn with(selectors: &[&str]) -> Self {
            Self {
                present: Mutex::new(selectors.iter().map(|s| s.to_string()).collect()),
                ..Self::default()
            }
        }

        fn text(self, selector: &str, values: &[&str]) -> Self {
            self.texts.lock().unwrap().insert(
                selector.to_string(),
                values.iter().map(|v| v.to_string()).collect(),
            );
            self
        }

        fn has(&self, selector: &str) -> Result<(), SessionError> {
            if self.present.lock().unwrap().contains(selector) {
                Ok(())
            } else {
                Err(SessionError::NotFound(selector.to_string()))
            }
        }
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn navigate(&self, url: &str) -> Result<(), SessionError> {
            self.visited.lock().unwrap().push(url.to_string());
            Ok(())
        }

        async fn wait_for(&self, selector: &str, _timeout: Duration) -> Result<(), SessionError> {
            self.has(selector)
        }

        async fn fill(&self, selector: &str, value: &str) -> Result<(), SessionError> {
            self.has(selector)?;
            self.filled
                .lock()
                .unwrap()
                .push((selector.to_string(), value.to_string()));
            Ok(())
        }

        async fn click(&self, selector: &str) -> Result<(), SessionError> {
            self.has(selector)?;
            if let Some((target, values)) = self.on_click.get(selector) {
                self.texts.lock().unwrap().insert(target.clone(), values.clone());
            }
            Ok(())
        }

        async fn read_text(&self, selector: &str) -> Result<Option<String>, SessionError> {
            Ok(self
                .texts
                .lock()
                .unwrap()
                .get(selector)
                .and_then(|v| v.first().cloned()))
        }

        async fn read_texts(&self, selector: &str) -> Result<Vec<String>, SessionError> {
            Ok(self.texts.lock().unwrap().get(selector).cloned().unwrap_or_default())
        }

        async fn set_input_files(&self, selector: &str, path: &Path) -> Result<(), SessionError> {
            self.has(selector)?;
            *self.uploaded.lock().unwrap() = Some(path.to_path_buf());
            Ok(())
        }

        async fn scroll_page(&self) -> Result<(), SessionError> {
            Ok(())
        }

        async fn html(&self) -> Result<String, SessionError> {
            Ok("<html><body>login form changed</body></html>".to_string())
        }
    }

    fn creds() -> AdminCredentials {
        AdminCredentials {
            base_url: "https://admin.example.com".to_string(),
            email: "ops@example.com".to_string(),
            password: "hunter2".to_string(),
        }
    }

    fn admin() -> AdminConfig {
        AdminConfig {
            element_timeout_secs: 0,
            ..AdminConfig::default()
        }
    }

    fn full_ui() -> FakeSession {
        let s = AutomationSelectors::default();
        FakeSession::with(&[
            &s.login.email,
            &s.login.password,
            &s.login.submit,
            &s.login.logged_in,
            &s.category_list.names,
            &s.upload.file_input,
            &s.start_import.button,
        ])
        .text(&s.category_list.names, &["Bucatarie", " Baie ", "Bucatarie", ""])
        .text(&s.start_import.import_list_row, &["#41 import.xlsx Finalizat"])
    }

    fn driver(session: FakeSession) -> AutomationDriver<FakeSession> {
        AutomationDriver::new(session, creds(), admin(), AutomationSelectors::default())
    }

    #[tokio::test]
    async fn missing_login_field_halts_at_logged_in() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = driver(FakeSession::with(&[])).with_debug_artifacts(dir.path());

        let err = d.login().await.unwrap_err();
        assert_eq!(err.stage, AutomationStage::LoggedIn);
        assert_eq!(err.reason.code(), "element_not_found");
        assert_eq!(d.state(), AutomationStage::Idle);

        let next = d.list_categories().await.unwrap_err();
        assert_eq!(next.stage, AutomationStage::CategoriesListed);
        assert!(matches!(next.reason, AutomationReason::InvalidTransition { .. }));
        assert_eq!(d.state(), AutomationStage::Idle);

        assert!(dir.path().join("LoggedIn.html").exists());
    }

    #[tokio::test]
    async fn categories_are_trimmed_and_deduplicated() {
        let mut d = driver(full_ui());
        d.login().await.unwrap();
        let categories = d.list_categories().await.unwrap();
        assert_eq!(categories, vec!["Bucatarie", "Baie"]);
        assert_eq!(d.state(), AutomationStage::CategoriesListed);

        let session = d.into_session();
        let filled = session.filled.lock().unwrap().clone();
        assert_eq!(filled[0].1, "ops@example.com");
        assert_eq!(
            session.visited.lock().unwrap()[0],
            "https://admin.example.com/gomag/dashboard"
        );
    }

    #[tokio::test]
    async fn upload_requires_login() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut d = driver(full_ui());
        let err = d.upload_file(file.path()).await.unwrap_err();
        assert_eq!(
            err.reason,
            AutomationReason::InvalidTransition {
                from: AutomationStage::Idle
            }
        );
    }

    #[tokio::test]
    async fn new_import_row_confirms_import() {
        let s = AutomationSelectors::default();
        let mut ui = full_ui();
        ui.on_click.insert(
            s.start_import.button.clone(),
            (
                s.start_import.import_list_row.clone(),
                vec!["#42 import.xlsx In asteptare".to_string()],
            ),
        );
        let file = tempfile::NamedTempFile::new().unwrap();

        let mut d = driver(ui);
        let report = d.upload_and_import(file.path()).await.unwrap();
        assert_eq!(report.stage, AutomationStage::ImportConfirmed);
        assert_eq!(report.status, "#42 import.xlsx In asteptare");

        let session = d.into_session();
        assert!(session.uploaded.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn unchanged_import_list_means_failure() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut d = driver(full_ui());
        d.login().await.unwrap();
        d.upload_file(file.path()).await.unwrap();

        let err = d.start_import().await.unwrap_err();
        assert_eq!(err.reason, AutomationReason::NoNewImport);
        assert_eq!(d.state(), AutomationStage::ImportFailed);
    }

    #[tokio::test]
    async fn error_marker_in_new_row_means_failure() {
        let s = AutomationSelectors::default();
        let mut ui = full_ui();
        ui.on_click.insert(
            s.start_import.button.clone(),
            (
                s.start_import.import_list_row.clone(),
                vec!["#42 import.xlsx Finalizat cu erori (3)".to_string()],
            ),
        );
        let file = tempfile::NamedTempFile::new().unwrap();

        let mut d = driver(ui);
        let err = d.upload_and_import(file.path()).await.unwrap_err();
        assert_eq!(err.stage, AutomationStage::ImportConfirmed);
        assert_eq!(err.reason.code(), "import_rejected");
        assert_eq!(d.state(), AutomationStage::ImportFailed);
    }
}
