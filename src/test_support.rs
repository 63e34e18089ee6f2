//! In-memory page source shared by unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;

use crate::data::{PageSource, Record, RecordPage, UpstreamError};

/// Builds a record with the given condominium name
pub fn condo(name: &str) -> Record {
    let value = json!({
        "CONDO_NAME": name,
        "OFLEVEL": "1",
        "USE_CATG": "RESIDENTIAL",
        "VAL_AMT_P_MET": 45000,
    });
    match value {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Builds `n` records named `Condo 0` .. `Condo n-1`
pub fn dataset(n: usize) -> Vec<Record> {
    (0..n).map(|i| condo(&format!("Condo {i}"))).collect()
}

#[derive(Debug, Clone, Copy)]
pub enum FakeFailure {
    Status(u16),
    Timeout,
}

pub struct FakeSource {
    records: Mutex<Vec<Record>>,
    failure: Mutex<Option<FakeFailure>>,
    fail_offset: Option<(u64, u16)>,
    delay: Duration,
    calls: AtomicUsize,
    full_fetches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    searches: Mutex<Vec<(u64, u64, Option<String>)>>,
}

impl FakeSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: Mutex::new(records),
            failure: Mutex::new(None),
            fail_offset: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            full_fetches: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            searches: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_at_offset(mut self, offset: u64, status: u16) -> Self {
        self.fail_offset = Some((offset, status));
        self
    }

    pub fn fail_with(&self, failure: Option<FakeFailure>) {
        *self.failure.lock().unwrap() = failure;
    }

    pub fn set_records(&self, records: Vec<Record>) {
        *self.records.lock().unwrap() = records;
    }

    /// Total page requests served
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Unfiltered requests for offset 0, i.e. the start of each refill
    pub fn full_fetches(&self) -> usize {
        self.full_fetches.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// (offset, limit, search) of every request, in arrival order
    pub fn requests(&self) -> Vec<(u64, u64, Option<String>)> {
        self.searches.lock().unwrap().clone()
    }
}

impl PageSource for FakeSource {
    async fn fetch_page(
        &self,
        offset: u64,
        limit: u64,
        search: Option<&str>,
    ) -> Result<RecordPage, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if offset == 0 && search.is_none() {
            self.full_fetches.fetch_add(1, Ordering::SeqCst);
        }
        self.searches
            .lock()
            .unwrap()
            .push((offset, limit, search.map(str::to_string)));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failure = *self.failure.lock().unwrap();
        match failure {
            Some(FakeFailure::Status(status)) => {
                return Err(UpstreamError::Status {
                    offset,
                    status,
                    attempts: 1,
                })
            }
            Some(FakeFailure::Timeout) => {
                return Err(UpstreamError::Timeout {
                    offset,
                    attempts: 1,
                })
            }
            None => {}
        }
        if let Some((fail_offset, status)) = self.fail_offset {
            if fail_offset == offset {
                return Err(UpstreamError::Status {
                    offset,
                    status,
                    attempts: 1,
                });
            }
        }

        let records = self.records.lock().unwrap();
        let needle = search.filter(|s| !s.is_empty()).map(str::to_lowercase);
        let matching: Vec<&Record> = records
            .iter()
            .filter(|r| match &needle {
                Some(needle) => r
                    .get("CONDO_NAME")
                    .and_then(|v| v.as_str())
                    .is_some_and(|name| name.to_lowercase().contains(needle)),
                None => true,
            })
            .collect();
        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();

        Ok(RecordPage {
            records: page,
            total: Some(total),
        })
    }
}
