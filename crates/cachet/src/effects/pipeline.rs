//! One `connect` call: cache lookup, bounded network attempts with backoff,
//! parsing through the digest-tracking stream, and digest bookkeeping.

use std::io::{self, Read};
use std::marker::PhantomData;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, debug_span, warn};

use crate::core::{StatusClass, classify_status, digest_key, scale_timeout};
use crate::data::header::HttpHeader;
use crate::data::profile::NetworkProfile;
use crate::data::progress::{CancelPredicate, FetchPhase};
use crate::data::request::Request;
use crate::data::result::FetchResult;
use crate::effects::cache::{CacheError, CacheWriter};
use crate::effects::connector::Connector;
use crate::effects::parse_stream::{Checkpoint, ParseStream, StreamSummary};
use crate::effects::transport::{ExactLength, OutgoingBody, TransportRequest, TransportResponse};
use crate::error::{Error, Result};
use crate::parser::{ParseContext, Parser, Source};

/// How often the cancel predicate is polled while backing off.
const BACKOFF_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    read:    Duration,
    connect: Duration,
}

impl Timeouts {
    fn scaled(self, multiplier: f64) -> Self {
        Self {
            read:    scale_timeout(self.read, multiplier),
            connect: scale_timeout(self.connect, multiplier),
        }
    }
}

struct NetworkOutcome<T> {
    value:   T,
    digest:  String,
    header:  HttpHeader,
    profile: NetworkProfile,
}

pub(crate) struct ResultPipeline<'a, T, P: ?Sized> {
    connector: &'a Connector,
    request:   &'a Request,
    parser:    &'a P,
    cancel:    &'a dyn CancelPredicate,
    cache_key: String,
    _value:    PhantomData<fn() -> T>,
}

impl<'a, T, P: Parser<T> + ?Sized> ResultPipeline<'a, T, P> {
    pub(crate) fn new(
        connector: &'a Connector,
        request: &'a Request,
        parser: &'a P,
        cancel: &'a dyn CancelPredicate,
    ) -> Self {
        Self {
            connector,
            request,
            parser,
            cancel,
            cache_key: request.cache_key(),
            _value: PhantomData,
        }
    }

    pub(crate) fn run(self) -> Result<FetchResult<T>> {
        let span = debug_span!("connect", method = %self.request.method(), url = %self.request.url());
        let _guard = span.enter();

        if let Some(hit) = self.try_cache()? {
            return Ok(hit);
        }

        let previous = self.previous_digest();
        let outcome = self.fetch_with_retry()?;
        let modified = previous.as_deref() != Some(outcome.digest.as_str());
        self.record_digest(&outcome.digest);

        Ok(FetchResult::from_network(
            outcome.value,
            outcome.digest,
            outcome.header,
            outcome.profile,
            modified,
        ))
    }

    fn try_cache(&self) -> Result<Option<FetchResult<T>>> {
        let checkpoint = Checkpoint::new(self.cancel, self.request, FetchPhase::CacheLookup, 0);
        if checkpoint.is_canceled(0) {
            return Err(Error::Interrupted);
        }
        let Some(cache) = self.connector.cache_controller() else {
            return Ok(None);
        };

        let reader = match cache.open_cache(self.request) {
            Ok(Some(reader)) => reader,
            Ok(None) => {
                debug!("cache miss");
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "cache lookup failed, treating as miss");
                return Ok(None);
            }
        };

        let ctx = ParseContext {
            request: self.request,
            header:  None,
            source:  Source::Cache,
            attempt: 0,
        };
        match self.parse(&ctx, ParseStream::new(reader, &checkpoint)) {
            Ok((value, summary)) => {
                debug!(bytes = summary.bytes_read, "cache hit");
                Ok(Some(FetchResult::from_cache(value, summary.digest)))
            }
            Err(Error::Interrupted) => Err(Error::Interrupted),
            Err(e) => {
                debug!(error = %e, "cached entry unusable, falling back to network");
                Ok(None)
            }
        }
    }

    fn fetch_with_retry(&self) -> Result<NetworkOutcome<T>> {
        let policy = self.request.retry_policy();
        let max_attempts = policy.max_attempts();
        let mut timeouts = Timeouts {
            read:    self.request.read_timeout(),
            connect: self.request.connect_timeout(),
        };
        let mut wait_ms = policy.base_wait_ms();
        let mut errors = Vec::new();

        for attempt in 1..=max_attempts {
            let error = match self.attempt(attempt, timeouts) {
                Ok(outcome) => return Ok(outcome),
                Err(e) => e,
            };
            if error.is_interrupted() || !policy.is_retryable(&error) {
                return Err(error);
            }
            if error.is_timeout() {
                timeouts = timeouts.scaled(policy.timeout_backoff());
            }
            warn!(attempt, max_attempts, error = %error, "attempt failed");
            errors.push(error);

            if attempt < max_attempts {
                self.backoff(attempt, Duration::from_millis(wait_ms))?;
                wait_ms = policy.next_backoff_ms(attempt, wait_ms);
            }
        }

        Err(Error::RetryExhausted {
            attempts: max_attempts,
            url: self.request.url().to_string(),
            errors,
        })
    }

    fn attempt(&self, attempt: u32, timeouts: Timeouts) -> Result<NetworkOutcome<T>> {
        let connecting = Checkpoint::new(self.cancel, self.request, FetchPhase::Connecting, attempt);
        if connecting.is_canceled(0) {
            return Err(Error::Interrupted);
        }

        let outgoing = self.transport_request(timeouts)?;
        let mut profile = NetworkProfile::new();
        profile.on_connect_start();
        let response = self.connector.transport().send(outgoing)?;
        profile.on_connection_completed();
        if connecting.is_canceled(0) {
            return Err(Error::Interrupted);
        }

        let receiving = Checkpoint::new(self.cancel, self.request, FetchPhase::Receiving, attempt);
        if classify_status(response.status) != StatusClass::Success {
            return Err(self.status_error(response, &receiving));
        }

        let header: HttpHeader = response.headers.into_iter().collect();
        let mut writer = self.open_writer(&header);
        let ctx = ParseContext {
            request: self.request,
            header: Some(&header),
            source: Source::Network,
            attempt,
        };
        let stream = ParseStream::new(response.body, &receiving)
            .with_cache(writer.as_deref_mut())
            .with_profile(Some(&mut profile));

        match self.parse(&ctx, stream) {
            Ok((value, summary)) => {
                finish_writer(writer, !summary.cache_lost);
                profile.on_download_completed();
                debug!(bytes = summary.bytes_read, digest = %summary.digest, "response parsed");
                Ok(NetworkOutcome {
                    value,
                    digest: summary.digest,
                    header,
                    profile,
                })
            }
            Err(e) => {
                finish_writer(writer, false);
                Err(e)
            }
        }
    }

    /// Run the stream controller and the parser, then settle how the
    /// stream ended. Cancellation wins over whatever the parser reported.
    fn parse<R: Read>(
        &self,
        ctx: &ParseContext<'_>,
        mut stream: ParseStream<'_, R>,
    ) -> Result<(T, StreamSummary)> {
        let outcome = match self.connector.stream_controller().wrap(ctx, &mut stream) {
            Ok(mut reader) => self.parser.parse(ctx, reader.as_mut()).map_err(Error::Parse),
            Err(e) => Err(Error::Io(e)),
        };
        let summary = stream.finish();
        if summary.canceled {
            return Err(Error::Interrupted);
        }

        match outcome {
            Ok(value) => Ok((value, summary)),
            Err(Error::Parse(source)) => match summary.inner_error {
                Some(kind) => Err(Error::Io(io::Error::new(kind, source))),
                None => Err(Error::Parse(source)),
            },
            Err(e) => Err(e),
        }
    }

    fn transport_request(&self, timeouts: Timeouts) -> Result<TransportRequest> {
        let request = self.request;
        let body = match request.body() {
            Some(body) if request.method().has_body() => Some(OutgoingBody {
                content_type: body.content_type().map(str::to_owned),
                length:       body.len(),
                reader:       Box::new(ExactLength::new(body.open()?, body.len())),
            }),
            _ => None,
        };

        Ok(TransportRequest {
            method: request.method(),
            url: request.url().clone(),
            headers: request
                .header()
                .iter()
                .map(|(name, value)| (name.to_owned(), value.to_owned()))
                .collect(),
            body,
            connect_timeout: timeouts.connect,
            read_timeout: timeouts.read,
        })
    }

    fn status_error(&self, response: TransportResponse, checkpoint: &Checkpoint<'_>) -> Error {
        let status = response.status;
        let url = self.request.url().to_string();
        let error_policy = self.request.error_policy();

        let body = if error_policy.captures_error_body() {
            let mut stream = ParseStream::new(response.body, checkpoint);
            let mut captured = Vec::new();
            let read = (&mut stream)
                .take(error_policy.error_body_limit() as u64)
                .read_to_end(&mut captured);
            if stream.finish().canceled {
                return Error::Interrupted;
            }
            if let Err(e) = read {
                debug!(error = %e, "error body capture stopped early");
            }
            Some(captured)
        } else {
            None
        };

        if self.request.retry_policy().is_fatal_status(status) {
            Error::AccessFailed { status, url, body }
        } else if classify_status(status) == StatusClass::ServerError {
            Error::Server { status, url, body }
        } else {
            Error::Status { status, url, body }
        }
    }

    fn open_writer(&self, header: &HttpHeader) -> Option<Box<dyn CacheWriter>> {
        let cache = self.connector.cache_controller()?;
        match cache.new_cache_writer(self.request, header) {
            Ok(writer) => writer,
            Err(e) => {
                warn!(error = %e, "cannot stage cache entry");
                None
            }
        }
    }

    fn backoff(&self, attempt: u32, wait: Duration) -> Result<()> {
        let checkpoint = Checkpoint::new(self.cancel, self.request, FetchPhase::Backoff, attempt);
        let until = Instant::now() + wait;
        debug!(wait_ms = wait.as_millis() as u64, "backing off");
        loop {
            if checkpoint.is_canceled(0) {
                return Err(Error::Interrupted);
            }
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            thread::sleep((until - now).min(BACKOFF_POLL_INTERVAL));
        }
    }

    fn previous_digest(&self) -> Option<String> {
        let store = self.connector.digest_store()?;
        match store.get(&digest_key(&self.cache_key)) {
            Ok(digest) => digest,
            Err(e) => {
                warn!(error = %e, "cannot read recorded digest");
                None
            }
        }
    }

    fn record_digest(&self, digest: &str) {
        let Some(store) = self.connector.digest_store() else {
            return;
        };
        if let Err(e) = store.put(&digest_key(&self.cache_key), digest) {
            warn!(error = %e, "cannot record digest");
        }
    }
}

/// Commit when `keep`, otherwise abort. Finalize failures never fail the call.
fn finish_writer(writer: Option<Box<dyn CacheWriter>>, keep: bool) {
    let Some(writer) = writer else {
        return;
    };
    let result = if keep { writer.commit() } else { writer.abort() };
    match result {
        Ok(()) => {}
        Err(CacheError::TooLarge { size, limit }) => {
            debug!(size, limit, "response too large to cache");
        }
        Err(e) => warn!(error = %e, "cache finalize failed"),
    }
}
