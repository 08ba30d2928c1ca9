//! Test doubles shared by the integration tests
//! A scripted HTTP target and a browser that records what it was asked to do
#![allow(dead_code)]

use gauntlet::browser::BrowserDriver;
use gauntlet::engine::{HttpTarget, ProbeRequest, ProbeResponse, StepTag};
use gauntlet::error::{BrowserError, EngineError};
use gauntlet::watchers::NavigationTiming;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Handler = dyn Fn(&ProbeRequest, usize) -> Result<ProbeResponse, EngineError> + Send + Sync;

/// Answers every request through a closure that also sees the 0-based call index.
#[derive(Clone)]
pub struct ScriptedTarget {
    handler: Arc<Handler>,
    calls: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<ProbeRequest>>>,
}

impl ScriptedTarget {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ProbeRequest, usize) -> Result<ProbeResponse, EngineError> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            calls: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<ProbeRequest> {
        self.sent.lock().unwrap().clone()
    }
}

impl HttpTarget for ScriptedTarget {
    async fn send(&self, request: ProbeRequest, _tag: StepTag) -> Result<ProbeResponse, EngineError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(request.clone());
        (self.handler)(&request, index)
    }

    fn url_for(&self, path: &str) -> String {
        format!("http://target.test{}", path)
    }
}

/// Attached browser whose every operation succeeds; counts screenshots and records actions.
#[derive(Default)]
pub struct RecordingBrowser {
    pub screenshots: AtomicUsize,
    pub actions: Mutex<Vec<String>>,
}

impl RecordingBrowser {
    pub fn screenshot_count(&self) -> usize {
        self.screenshots.load(Ordering::SeqCst)
    }
}

impl BrowserDriver for RecordingBrowser {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.actions.lock().unwrap().push(format!("navigate {}", url));
        Ok(())
    }

    async fn fill(&self, selector: &str, _value: &str) -> Result<(), BrowserError> {
        self.actions.lock().unwrap().push(format!("fill {}", selector));
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        self.actions.lock().unwrap().push(format!("click {}", selector));
        Ok(())
    }

    async fn wait_for(&self, _selector: &str, _timeout: Duration) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn read_text(&self, _selector: &str) -> Result<Option<String>, BrowserError> {
        Ok(None)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        self.screenshots.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])
    }

    async fn page_content(&self) -> Result<String, BrowserError> {
        Ok("<html><body>recorded</body></html>".to_string())
    }

    async fn navigation_timing(&self) -> Result<NavigationTiming, BrowserError> {
        Ok(NavigationTiming::default())
    }

    async fn reset(&self) -> Result<(), BrowserError> {
        self.actions.lock().unwrap().push("reset".to_string());
        Ok(())
    }
}
