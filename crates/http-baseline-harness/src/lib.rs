//! Golden-file tests for HTTP handlers.
//!
//! A [`Suite`] sends one canonical request through an axum [`Router`], records
//! or compares the request text, the response text and, when a database is
//! attached, the diff of the tables the handler touched.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use axum::body::Body;
use axum::Router;
use http::header::{CONTENT_TYPE, HOST};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Uri, Version};
use http_baseline_core::{
    build_diff, capture, dependency_graph, render_diff, resolve_order, ActivityCounters,
    CapturedState, DbDiff, SeedFixture,
};
use http_baseline_store_sqlite::SqliteBaselineDb;
use tower::ServiceExt;
use tracing::Instrument;

mod config;
mod format;
mod golden;

pub use config::{BaselineMode, SuiteConfig, DEFAULT_BASELINE_DIR, REBASELINE_ENV, REGENERATE_SEED_ENV};
pub use format::{canonical_header_name, format_body, format_request, format_response, normalize_test_name};
pub use golden::{compare_golden, line_diff, write_golden};

pub const DEFAULT_HOST: &str = "example.com";

pub type BodyValidator = Box<dyn Fn(&[u8]) -> Result<()> + Send + Sync>;
pub type SeedFn = Box<dyn Fn(&SqliteBaselineDb) -> Result<()> + Send + Sync>;
/// Runs before validation with the test name and may rewrite the test.
pub type SetupFn = Box<dyn Fn(&str, &mut BaselineTest) -> Result<()> + Send + Sync>;
/// Runs after the database check.
pub type TeardownFn = Box<dyn Fn(&BaselineTest) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Text(String),
    /// Sent pretty-printed; `Content-Type: application/json` is added unless set.
    Json(serde_json::Value),
}

/// Database attached to a test: how to seed it and which tables to diff row by row.
///
/// With no tracked tables any change to any table fails the test.
pub struct DbFixture {
    pub db: SqliteBaselineDb,
    /// Seed file path, relative to the suite's baseline directory.
    pub seed: Option<PathBuf>,
    pub seed_fn: Option<SeedFn>,
    pub tables: Vec<String>,
}

impl DbFixture {
    #[must_use]
    pub fn new(db: SqliteBaselineDb) -> Self {
        Self { db, seed: None, seed_fn: None, tables: Vec::new() }
    }

    #[must_use]
    pub fn seed(mut self, path: impl Into<PathBuf>) -> Self {
        self.seed = Some(path.into());
        self
    }

    #[must_use]
    pub fn seed_fn<F>(mut self, seed_fn: F) -> Self
    where
        F: Fn(&SqliteBaselineDb) -> Result<()> + Send + Sync + 'static,
    {
        self.seed_fn = Some(Box::new(seed_fn));
        self
    }

    #[must_use]
    pub fn track<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.extend(tables.into_iter().map(Into::into));
        self
    }
}

pub struct BaselineTest {
    pub handler: Router,
    pub method: Method,
    pub path: String,
    pub host: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub request_validator: Option<BodyValidator>,
    pub response_validator: Option<BodyValidator>,
    pub db: Option<DbFixture>,
    pub setup: Option<SetupFn>,
    pub teardown: Option<TeardownFn>,
}

impl BaselineTest {
    pub fn new(handler: Router, method: Method, path: impl Into<String>) -> Self {
        Self {
            handler,
            method,
            path: path.into(),
            host: None,
            headers: Vec::new(),
            body: RequestBody::Empty,
            request_validator: None,
            response_validator: None,
            db: None,
            setup: None,
            teardown: None,
        }
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = RequestBody::Text(body.into());
        self
    }

    #[must_use]
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    #[must_use]
    pub fn db(mut self, fixture: DbFixture) -> Self {
        self.db = Some(fixture);
        self
    }

    #[must_use]
    pub fn validate_request<F>(mut self, validator: F) -> Self
    where
        F: Fn(&[u8]) -> Result<()> + Send + Sync + 'static,
    {
        self.request_validator = Some(Box::new(validator));
        self
    }

    #[must_use]
    pub fn validate_response<F>(mut self, validator: F) -> Self
    where
        F: Fn(&[u8]) -> Result<()> + Send + Sync + 'static,
    {
        self.response_validator = Some(Box::new(validator));
        self
    }

    #[must_use]
    pub fn setup<F>(mut self, setup: F) -> Self
    where
        F: Fn(&str, &mut BaselineTest) -> Result<()> + Send + Sync + 'static,
    {
        self.setup = Some(Box::new(setup));
        self
    }

    #[must_use]
    pub fn teardown<F>(mut self, teardown: F) -> Self
    where
        F: Fn(&BaselineTest) -> Result<()> + Send + Sync + 'static,
    {
        self.teardown = Some(Box::new(teardown));
        self
    }

    fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            bail!("path is not provided");
        }
        if !self.path.starts_with('/') {
            bail!("path must start with '/': {}", self.path);
        }
        Ok(())
    }
}

/// Golden file locations for one test.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GoldenPaths {
    pub request: PathBuf,
    pub response: PathBuf,
    pub db: PathBuf,
    pub seed: PathBuf,
}

impl GoldenPaths {
    #[must_use]
    pub fn new(baseline_dir: &Path, test_name: &str) -> Self {
        let prefix = normalize_test_name(test_name);
        let path = |suffix: &str| baseline_dir.join(format!("{prefix}{suffix}"));
        Self {
            request: path(".req.txt"),
            response: path(".resp.txt"),
            db: path(".db.json"),
            seed: path(".seed.yaml"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Failure {
    Mismatch { path: PathBuf, diff: String },
    RequestValidation(String),
    ResponseValidation(String),
    UnexpectedDbChange { table: String, counters: ActivityCounters },
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mismatch { path, diff } => write!(f, "baseline mismatch for {}:\n{diff}", path.display()),
            Self::RequestValidation(message) => write!(f, "request validation failed: {message}"),
            Self::ResponseValidation(message) => write!(f, "response validation failed: {message}"),
            Self::UnexpectedDbChange { table, counters } => {
                write!(f, "unexpected table change for {table}: {counters}")
            }
        }
    }
}

/// Outcome of one [`Suite::run`]. Failures here are comparison failures; setup
/// and engine errors are returned as `Err` from `run` instead.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RunReport {
    pub name: String,
    pub failures: Vec<Failure>,
    pub written: Vec<PathBuf>,
}

impl RunReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// # Errors
    /// Returns every failure joined into one error message.
    pub fn into_result(self) -> Result<()> {
        if self.failures.is_empty() {
            return Ok(());
        }
        let details: Vec<String> = self.failures.iter().map(ToString::to_string).collect();
        Err(anyhow!("{} failed:\n{}", self.name, details.join("\n")))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Suite {
    config: SuiteConfig,
}

impl Suite {
    #[must_use]
    pub fn new(config: SuiteConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::new(SuiteConfig::from_env())
    }

    #[must_use]
    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    /// Run one test: setup, seed, capture, send the request, record or compare
    /// the request, the response and the database diff, then teardown.
    ///
    /// # Errors
    /// Returns an error for invalid tests, setup or teardown failures, seed or
    /// capture failures, schema drift, handler failures and unreadable golden files.
    pub async fn run(&self, name: &str, mut test: BaselineTest) -> Result<RunReport> {
        if let Some(setup) = test.setup.take() {
            setup(name, &mut test).with_context(|| format!("setup failed for {name}"))?;
        }
        test.validate().with_context(|| format!("invalid baseline test {name}"))?;
        self.run_validated(name, test)
            .instrument(tracing::info_span!("baseline_test", test = name))
            .await
    }

    async fn run_validated(&self, name: &str, test: BaselineTest) -> Result<RunReport> {
        let paths = GoldenPaths::new(&self.config.baseline_dir, name);
        let mut report = RunReport { name: name.to_string(), ..RunReport::default() };

        let before = match &test.db {
            Some(fixture) => Some(self.prepare_db(fixture)?),
            None => None,
        };

        let (request, request_body) = build_request(&test)?;
        let host = test.host.as_deref().unwrap_or(DEFAULT_HOST);
        let formatted_request = format_request(
            request.method(),
            request.uri(),
            request.version(),
            host,
            &without_host(request.headers()),
            &request_body,
        )
        .context("failed to format request")?;
        if let Some(validator) = &test.request_validator {
            if let Err(err) = validator(&request_body) {
                report.failures.push(Failure::RequestValidation(format!("{err:#}")));
            }
        }
        self.check_golden(&paths.request, &formatted_request, &mut report)?;

        let response = test.handler.clone().oneshot(request).await.context("handler failed")?;
        let (parts, body) = response.into_parts();
        let response_body =
            axum::body::to_bytes(body, usize::MAX).await.context("failed to read response body")?;
        let formatted_response =
            format_response(parts.version, parts.status, &parts.headers, &response_body)
                .context("failed to format response")?;
        if let Some(validator) = &test.response_validator {
            if let Err(err) = validator(&response_body) {
                report.failures.push(Failure::ResponseValidation(format!("{err:#}")));
            }
        }
        self.check_golden(&paths.response, &formatted_response, &mut report)?;

        if let (Some(fixture), Some(before)) = (&test.db, &before) {
            let after = capture(&fixture.db, &fixture.tables)
                .context("failed to capture database state after request")?;
            let diff = build_diff(before, &after).context("failed to diff database state")?;

            if fixture.tables.is_empty() {
                assert_no_db_changes(&diff, &mut report);
            } else {
                let rendered = render_diff(&diff).context("failed to render database baseline")?;
                self.check_golden(&paths.db, &rendered, &mut report)?;
                if self.config.regenerate_seed {
                    self.regenerate_seed(fixture, &diff, &paths.seed, &mut report)?;
                }
            }
        }

        if let Some(teardown) = &test.teardown {
            teardown(&test).context("teardown failed")?;
        }

        if !report.is_ok() {
            tracing::warn!(failures = report.failures.len(), "baseline test failed");
        }
        Ok(report)
    }

    fn prepare_db(&self, fixture: &DbFixture) -> Result<CapturedState> {
        if let Some(seed) = &fixture.seed {
            let seed_path = self.config.baseline_dir.join(seed);
            fixture
                .db
                .load_seed_file(&seed_path)
                .with_context(|| format!("failed to seed database from {}", seed_path.display()))?;
        }
        if let Some(seed_fn) = &fixture.seed_fn {
            seed_fn(&fixture.db).context("seed function failed")?;
        }
        capture(&fixture.db, &fixture.tables).context("failed to capture database state before request")
    }

    fn check_golden(&self, path: &Path, actual: &str, report: &mut RunReport) -> Result<()> {
        if self.config.rebaseline() {
            write_golden(path, actual)?;
            report.written.push(path.to_path_buf());
            return Ok(());
        }
        if let Some(diff) = compare_golden(path, actual)? {
            report.failures.push(Failure::Mismatch { path: path.to_path_buf(), diff });
        }
        Ok(())
    }

    fn regenerate_seed(
        &self,
        fixture: &DbFixture,
        diff: &DbDiff,
        path: &Path,
        report: &mut RunReport,
    ) -> Result<()> {
        let graph = dependency_graph(&fixture.db, &fixture.tables)
            .context("failed to read foreign keys for seed regeneration")?;
        let order = resolve_order(&graph).context("failed to order tables for seed regeneration")?;
        let seed = SeedFixture::from_representations(&order, &diff.added_rows())
            .context("failed to build seed fixture")?;
        tracing::info!(tables = seed.tables.len(), rows = seed.row_count(), "regenerating seed fixture");
        write_golden(path, &seed.to_yaml()?)?;
        report.written.push(path.to_path_buf());
        Ok(())
    }
}

fn assert_no_db_changes(diff: &DbDiff, report: &mut RunReport) {
    for (table, table_diff) in diff.changed_tables() {
        report.failures.push(Failure::UnexpectedDbChange {
            table: table.to_string(),
            counters: table_diff.counters,
        });
    }
}

fn without_host(headers: &HeaderMap) -> HeaderMap {
    let mut headers = headers.clone();
    headers.remove(HOST);
    headers
}

fn build_request(test: &BaselineTest) -> Result<(Request<Body>, Vec<u8>)> {
    let uri: Uri = test.path.parse().with_context(|| format!("invalid request path {}", test.path))?;
    let mut headers = HeaderMap::new();
    for (name, value) in &test.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name {name}"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header {name}"))?;
        headers.append(name, value);
    }

    let body = match &test.body {
        RequestBody::Empty => Vec::new(),
        RequestBody::Text(text) => text.clone().into_bytes(),
        RequestBody::Json(value) => {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            serde_json::to_vec_pretty(value).context("failed to serialize JSON body")?
        }
    };

    let host = test.host.as_deref().unwrap_or(DEFAULT_HOST);
    headers.insert(HOST, HeaderValue::from_str(host).with_context(|| format!("invalid host {host}"))?);

    let mut request = Request::builder()
        .method(test.method.clone())
        .uri(uri)
        .version(Version::HTTP_11)
        .body(Body::from(body.clone()))
        .context("failed to build request")?;
    *request.headers_mut() = headers;
    Ok((request, body))
}
