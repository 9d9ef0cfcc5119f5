//! Admission gate with a scripted answer.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use async_trait::async_trait;
use flashsale_core::StoreError;
use flashsale_core::admission::{Admission, AdmissionGate};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
enum Answer {
    Allow,
    Deny(Duration),
    Fail,
}

/// Gate that always gives the same answer and records the keys it saw.
#[derive(Clone)]
pub struct ScriptedGate {
    answer: Arc<Mutex<Answer>>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl ScriptedGate {
    fn with(answer: Answer) -> Self {
        Self {
            answer: Arc::new(Mutex::new(answer)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Admit everything.
    #[must_use]
    pub fn allow() -> Self {
        Self::with(Answer::Allow)
    }

    /// Deny everything with the given retry hint.
    #[must_use]
    pub fn deny(retry_after: Duration) -> Self {
        Self::with(Answer::Deny(retry_after))
    }

    /// Fail every call as if the shared store were down.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::with(Answer::Fail)
    }

    /// Switch to admitting everything.
    pub fn set_allow(&self) {
        *self.answer.lock().unwrap() = Answer::Allow;
    }

    /// Keys passed to `admit`, in order.
    #[must_use]
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl AdmissionGate for ScriptedGate {
    async fn admit(&self, key: &str) -> Result<Admission, StoreError> {
        self.seen.lock().unwrap().push(key.to_string());
        let answer = *self.answer.lock().unwrap();
        match answer {
            Answer::Allow => Ok(Admission::Allowed),
            Answer::Deny(retry_after) => Ok(Admission::Denied { retry_after }),
            Answer::Fail => Err(StoreError::Unavailable("injected fault".to_string())),
        }
    }
}
