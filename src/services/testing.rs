//! Scripted fakes shared by service tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::UpstreamError;
use crate::models::{Observation, SourceBundle, SourceKey};
use crate::services::adapters::{
    lake_level_fallback, outflow_fallback, weather_fallback, UpstreamAdapter,
};

/// A non-estimated bundle for `key` whose headline value is `value`
/// (level, discharge or air temperature).
pub fn sample_bundle(key: SourceKey, at: DateTime<Utc>, value: f64) -> SourceBundle {
    match key {
        SourceKey::LakeLevel => {
            let mut b = lake_level_fallback(at);
            b.level = Observation::available(value, at);
            b.estimated = false;
            b.note = None;
            SourceBundle::LakeLevel(b)
        }
        SourceKey::Outflow => {
            let mut b = outflow_fallback(at);
            b.discharge = Observation::available(value, at);
            b.estimated = false;
            b.note = "Projected 6am discharge rate".to_string();
            SourceBundle::Outflow(b)
        }
        SourceKey::Weather => {
            let mut b = weather_fallback(at);
            b.temperature = Observation::available(value, at);
            b.estimated = false;
            b.note = None;
            SourceBundle::Weather(b)
        }
    }
}

/// Adapter that replays queued results, then fails with HTTP 500.
pub struct FakeAdapter {
    key: SourceKey,
    script: Mutex<VecDeque<Result<SourceBundle, UpstreamError>>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl FakeAdapter {
    pub fn new(key: SourceKey) -> Self {
        Self {
            key,
            script: Mutex::new(VecDeque::new()),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, result: Result<SourceBundle, UpstreamError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamAdapter for FakeAdapter {
    async fn fetch(&self, _timeout: Duration) -> Result<SourceBundle, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or(Err(UpstreamError::Http(500)))
    }

    fn fallback(&self, now: DateTime<Utc>) -> SourceBundle {
        match self.key {
            SourceKey::LakeLevel => SourceBundle::LakeLevel(lake_level_fallback(now)),
            SourceKey::Outflow => SourceBundle::Outflow(outflow_fallback(now)),
            SourceKey::Weather => SourceBundle::Weather(weather_fallback(now)),
        }
    }
}
