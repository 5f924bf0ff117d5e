use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, bail};
use cachet::data::request::FORM_CONTENT_TYPE;
use cachet::{
    BytesParser, CacheBackend, Connector, ConnectorConfig, FetchResult, FileParser, Method,
    Request, RequestBody,
};
use clap::Args;
use tracing::info;

#[derive(Clone, Debug, Args)]
pub struct GetArg {
    pub url: String,

    /// TOML connector configuration.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Cache responses as files under this directory.
    #[arg(long, conflicts_with = "kv_store")]
    pub cache_dir: Option<PathBuf>,

    /// Cache responses in a key-value database at this directory.
    #[arg(long)]
    pub kv_store: Option<PathBuf>,

    /// Remember content digests in a database at this directory.
    #[arg(long)]
    pub digest_db: Option<PathBuf>,

    #[arg(long)]
    pub ttl_ms: Option<u64>,

    /// Retries after the first attempt.
    #[arg(long)]
    pub retries: Option<u32>,

    #[arg(short = 'X', long, default_value = "GET")]
    pub method: Method,

    /// Extra request header, `Name: value`.
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Form-encoded request body.
    #[arg(short, long)]
    pub data: Option<String>,

    /// Write the body to this file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Read and connect timeout.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

impl GetArg {
    pub fn run(self) -> anyhow::Result<()> {
        let mut config = match &self.config {
            Some(path) => ConnectorConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => ConnectorConfig::default(),
        };
        self.apply_overrides(&mut config);

        let connector = Connector::from_config(&config).context("failed to set up connector")?;
        let request = self.request(&config)?;
        info!(method = %request.method(), url = %request.url(), "fetching");

        match &self.output {
            Some(path) => {
                let result = connector.fetch(&request, &FileParser::new(path))?;
                report(&result);
                eprintln!("saved:    {}", result.value().display());
            }
            None => {
                let result = connector.fetch(&request, &BytesParser)?;
                report(&result);
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(result.value())?;
                stdout.flush()?;
            }
        }
        Ok(())
    }

    /// Command line flags take precedence over the configuration file.
    fn apply_overrides(&self, config: &mut ConnectorConfig) {
        if let Some(dir) = &self.cache_dir {
            config.cache.backend = CacheBackend::File;
            config.cache.directory = Some(dir.clone());
        }
        if let Some(dir) = &self.kv_store {
            config.cache.backend = CacheBackend::Kv;
            config.cache.directory = Some(dir.clone());
        }
        if let Some(dir) = &self.digest_db {
            config.digest.store = Some(dir.clone());
        }
        if let Some(ttl) = self.ttl_ms {
            config.request.ttl_ms = ttl;
        }
        if let Some(retries) = self.retries {
            config.retry.budget = retries;
        }
        if let Some(timeout) = self.timeout_ms {
            config.request.read_timeout_ms = timeout;
            config.request.connect_timeout_ms = timeout;
        }
    }

    fn request(&self, config: &ConnectorConfig) -> anyhow::Result<Request> {
        let mut request = config.request(self.method, &self.url)?;
        for (name, value) in &self.headers {
            request = request.with_header(name.as_str(), value.as_str());
        }
        if let Some(data) = &self.data {
            if !self.method.has_body() {
                bail!("--data needs a POST or PUT request, not {}", self.method);
            }
            request = request.with_body(RequestBody::bytes(FORM_CONTENT_TYPE, data.as_bytes()))?;
        }
        Ok(request)
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in `{raw}`"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn report<T>(result: &FetchResult<T>) {
    let source = if result.has_cache() { "cache" } else { "network" };
    eprintln!("source:   {source}");
    if let Some(digest) = result.digest() {
        eprintln!("digest:   {digest}");
    }
    eprintln!("modified: {}", result.is_modified());

    let profile = result.profile();
    if let Some(connect) = profile.connection_time() {
        eprintln!("connect:  {} ms", connect.as_millis());
    }
    if let Some(turnaround) = profile.turnaround_time() {
        eprintln!(
            "download: {} bytes in {} ms ({:.2} Mbit/s)",
            profile.download_bytes(),
            turnaround.as_millis(),
            profile.network_speed_mbps()
        );
    }
}
