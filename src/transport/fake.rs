//! Scripted transport for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{Transport, WireRequest, WireResponse};
use crate::error::{Error, Result};

/// Replays a fixed list of outcomes and records every request it sees.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<WireResponse>>>,
    requests: Mutex<Vec<(WireRequest, Instant)>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<WireResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<WireRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(r, _)| r.clone())
            .collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.requests.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &WireRequest) -> Result<WireResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((request.clone(), Instant::now()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Other("No more scripted responses".to_string())))
    }
}
