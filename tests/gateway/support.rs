//! Shared fixtures: a scripted engine, a capturing audit sink, and the
//! restricted/unrestricted role policy.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use viewguard::audit::AuditLogger;
use viewguard::engine::{
    ChatMessage, ChatRole, EngineError, EngineRequest, EngineResponse, QueryEngine,
};
use viewguard::gateway::{ChatRequest, Gateway};
use viewguard::policy::{DisclaimMode, PolicyRegistry};

/// Restricted role: V1..V8.
pub const RESTRICTED: &str = "patient";
/// Unrestricted role: V1..V9.
pub const UNRESTRICTED: &str = "physician";

/// What the scripted engine does on each call.
#[derive(Debug, Clone)]
pub enum StubReply {
    Answer {
        answer: String,
        tables: Vec<String>,
    },
    Timeout,
    Status(u16),
    Malformed,
}

impl StubReply {
    pub fn answer(answer: &str, tables: &[&str]) -> Self {
        Self::Answer {
            answer: answer.to_owned(),
            tables: tables.iter().map(|t| (*t).to_owned()).collect(),
        }
    }
}

/// Engine double that replays one reply and records requests.
pub struct StubEngine {
    reply: StubReply,
    delay: Duration,
    requests: Mutex<Vec<EngineRequest>>,
}

impl StubEngine {
    pub fn new(reply: StubReply) -> Self {
        Self {
            reply,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<EngineRequest> {
        self.requests.lock().expect("test lock").clone()
    }
}

#[async_trait]
impl QueryEngine for StubEngine {
    async fn answer_question(
        &self,
        request: &EngineRequest,
    ) -> Result<EngineResponse, EngineError> {
        self.requests.lock().expect("test lock").push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.reply {
            StubReply::Answer { answer, tables } => Ok(EngineResponse {
                answer_text: answer.clone(),
                resources_used: tables.clone(),
                structured_query: Some("SELECT 1".to_owned()),
                execution_time: Some(1.25),
                total_tokens: Some(42),
                confidence: None,
            }),
            StubReply::Timeout => Err(EngineError::Timeout),
            StubReply::Status(status) => Err(EngineError::HttpStatus {
                status: *status,
                body: "engine error".to_owned(),
            }),
            StubReply::Malformed => Err(EngineError::Parse("expected value".to_owned())),
        }
    }

    fn endpoint(&self) -> &str {
        "stub://engine"
    }
}

/// Shared buffer for capturing audit output in tests.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Cursor<Vec<u8>>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        let cursor = self.0.lock().expect("test lock");
        String::from_utf8_lossy(cursor.get_ref()).to_string()
    }

    /// Parsed audit entries, one per line.
    pub fn entries(&self) -> Vec<serde_json::Value> {
        self.contents()
            .lines()
            .map(|line| serde_json::from_str(line).expect("audit line should be JSON"))
            .collect()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("test lock").write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().expect("test lock").flush()
    }
}

pub fn policy() -> PolicyRegistry {
    let restricted: Vec<String> = (1..=8).map(|i| format!("labeliq.V{i}")).collect();
    let unrestricted: Vec<String> = (1..=9).map(|i| format!("labeliq.V{i}")).collect();
    let mut roles = BTreeMap::new();
    roles.insert(RESTRICTED.to_owned(), restricted);
    roles.insert(UNRESTRICTED.to_owned(), unrestricted);
    PolicyRegistry::new(&roles, Some(RESTRICTED)).expect("valid policy")
}

pub struct Harness {
    pub gateway: Arc<Gateway>,
    pub engine: Arc<StubEngine>,
    pub audit: SharedBuf,
}

pub fn harness(engine: StubEngine) -> Harness {
    harness_with_mode(engine, DisclaimMode::Disclose)
}

pub fn harness_with_mode(engine: StubEngine, mode: DisclaimMode) -> Harness {
    let audit = SharedBuf::default();
    let engine = Arc::new(engine);
    let dyn_engine: Arc<dyn QueryEngine> = Arc::clone(&engine) as Arc<dyn QueryEngine>;
    let gateway = Gateway::new(
        policy(),
        Some(dyn_engine),
        AuditLogger::from_writer(Box::new(audit.clone())),
    )
    .with_disclaim_mode(mode);
    Harness {
        gateway: Arc::new(gateway),
        engine,
        audit,
    }
}

pub fn unconfigured() -> (Arc<Gateway>, SharedBuf) {
    let audit = SharedBuf::default();
    let gateway = Gateway::new(
        policy(),
        None,
        AuditLogger::from_writer(Box::new(audit.clone())),
    );
    (Arc::new(gateway), audit)
}

pub fn ask(role: &str, question: &str) -> ChatRequest {
    ChatRequest {
        role: role.to_owned(),
        messages: vec![ChatMessage {
            role: ChatRole::User,
            content: question.to_owned(),
        }],
    }
}
