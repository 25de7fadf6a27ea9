//! Grounded answer assembly
//!
//! Turns a retrieval context into an answer whose every claim is traceable
//! to evidence. The generator only ever sees the evidence text, numbered
//! `[1]..[n]`; citations are parsed back out of the generated answer. An
//! empty context short-circuits to a fixed no-evidence reply without calling
//! the generator at all, which is the grounding guarantee: no evidence, no
//! claims.

use crate::config::AnswerConfig;
use crate::error::{Error, Result};
use crate::meta::{Message, MetaDb};
use crate::retrieve::RetrievalContext;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Reply used when retrieval found nothing usable
pub const NO_EVIDENCE_CONTENT: &str =
    "I could not find anything in your documents that answers this question.";

/// A pointer from an answer back to its evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub doc_id: Option<String>,
    pub chunk_id: Option<String>,
    pub page: Option<i64>,
}

/// An assembled answer
#[derive(Debug, Clone)]
pub struct Answer {
    pub content: String,
    pub citations: Vec<Citation>,
}

/// Text generation backend
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, system: &str, user: &str) -> Result<String>;
}

/// OpenAI-compatible chat-completions client
pub struct HttpGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl HttpGenerator {
    pub fn new(config: &AnswerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.generator_url.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, system: &str, user: &str) -> Result<String> {
        debug!("Calling generator at {}", self.url);

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let response = self.client.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(Error::Generation(format!(
                "generator returned {}",
                response.status()
            )));
        }

        let parsed: serde_json::Value = response.json().await?;
        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| Error::Generation("malformed generator response".to_string()))?;

        Ok(content.to_string())
    }
}

const SYSTEM_PROMPT: &str = "You answer questions using only the numbered evidence \
passages provided. Cite the passages you use with bracketed numbers like [1]. \
If the evidence does not answer the question, say so plainly. Never use \
knowledge beyond the evidence.";

/// Assembles grounded answers and persists the conversation
pub struct GroundedAnswerAssembler {
    db: MetaDb,
    generator: Arc<dyn Generator>,
}

impl GroundedAnswerAssembler {
    pub fn new(db: MetaDb, generator: Arc<dyn Generator>) -> Self {
        Self { db, generator }
    }

    /// Answer a question from its retrieval context, then persist both sides
    /// of the exchange
    pub async fn assemble(
        &self,
        workspace_id: &str,
        session_id: &str,
        question: &str,
        context: &RetrievalContext,
    ) -> Result<Answer> {
        let answer = match context {
            RetrievalContext::Empty => Answer {
                content: NO_EVIDENCE_CONTENT.to_string(),
                citations: Vec::new(),
            },
            RetrievalContext::Selection { text, doc_id, page } => {
                let prompt = build_prompt(question, &[text.as_str()]);
                let content = self.generator.generate(SYSTEM_PROMPT, &prompt).await?;
                Answer {
                    content,
                    citations: vec![Citation {
                        doc_id: doc_id.clone(),
                        chunk_id: None,
                        page: *page,
                    }],
                }
            }
            RetrievalContext::VectorSearch { hits } => {
                let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
                let prompt = build_prompt(question, &texts);
                let content = self.generator.generate(SYSTEM_PROMPT, &prompt).await?;

                // Cited markers select citations; an answer that cites
                // nothing explicitly is attributed to all its evidence
                let markers = parse_citation_markers(&content, hits.len());
                let cited: Vec<usize> = if markers.is_empty() {
                    (1..=hits.len()).collect()
                } else {
                    markers.into_iter().collect()
                };

                let citations = cited
                    .into_iter()
                    .filter_map(|n| hits.get(n - 1))
                    .map(|hit| Citation {
                        doc_id: Some(hit.doc_id.clone()),
                        chunk_id: Some(hit.chunk_id.clone()),
                        page: Some(hit.page_start),
                    })
                    .collect();

                Answer { content, citations }
            }
        };

        self.persist(workspace_id, session_id, question, context, &answer)
            .await?;

        info!(
            session_id = %session_id,
            citations = answer.citations.len(),
            "Assembled answer"
        );
        Ok(answer)
    }

    async fn persist(
        &self,
        workspace_id: &str,
        session_id: &str,
        question: &str,
        context: &RetrievalContext,
        answer: &Answer,
    ) -> Result<()> {
        self.db
            .insert_message(&Message {
                id: Uuid::new_v4().to_string(),
                workspace_id: workspace_id.to_string(),
                session_id: session_id.to_string(),
                role: "user".to_string(),
                content: question.to_string(),
                citations_json: None,
                context_json: None,
                created_at: Utc::now().to_rfc3339(),
            })
            .await?;

        // A fresh timestamp keeps the assistant reply ordered after the
        // question within the session
        self.db
            .insert_message(&Message {
                id: Uuid::new_v4().to_string(),
                workspace_id: workspace_id.to_string(),
                session_id: session_id.to_string(),
                role: "assistant".to_string(),
                content: answer.content.clone(),
                citations_json: Some(serde_json::to_string(&answer.citations)?),
                context_json: Some(serde_json::to_string(context)?),
                created_at: Utc::now().to_rfc3339(),
            })
            .await?;

        Ok(())
    }
}

/// Build the user prompt: evidence passages numbered `[1]..[n]`, then the
/// question. Nothing else reaches the generator
fn build_prompt(question: &str, evidence: &[&str]) -> String {
    let mut prompt = String::from("Evidence passages:\n\n");
    for (i, text) in evidence.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n\n", i + 1, text));
    }
    prompt.push_str(&format!("Question: {}", question));
    prompt
}

/// Extract `[n]` citation markers from generated text, keeping only markers
/// that point at actual evidence
fn parse_citation_markers(content: &str, evidence_count: usize) -> BTreeSet<usize> {
    let mut markers = BTreeSet::new();
    let bytes = content.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'[' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && bytes[j] == b']' {
                if let Ok(n) = content[i + 1..j].parse::<usize>() {
                    if n >= 1 && n <= evidence_count {
                        markers.insert(n);
                    }
                }
                i = j;
            }
        }
        i += 1;
    }

    markers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieve::RetrievedChunk;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticGenerator {
        reply: String,
        calls: AtomicUsize,
    }

    impl StaticGenerator {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Generator for StaticGenerator {
        async fn generate(&self, _system: &str, user: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // The prompt must contain only evidence and the question
            assert!(user.starts_with("Evidence passages:"));
            Ok(self.reply.clone())
        }
    }

    async fn setup(reply: &str) -> (GroundedAnswerAssembler, Arc<StaticGenerator>, MetaDb, TempDir)
    {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("test.db")).await.unwrap();
        let generator = StaticGenerator::new(reply);
        let assembler = GroundedAnswerAssembler::new(db.clone(), generator.clone());
        (assembler, generator, db, tmp)
    }

    fn hit(n: i64, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: format!("chunk-{}", n),
            doc_id: format!("doc-{}", n),
            chunk_index: n,
            page_start: n + 1,
            page_end: n + 1,
            score: 0.9,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_marker_parsing() {
        let markers = parse_citation_markers("Answer [1] with more [3]. See [1].", 5);
        assert_eq!(markers.into_iter().collect::<Vec<_>>(), vec![1, 3]);

        // Out-of-range and malformed markers are ignored
        let markers = parse_citation_markers("Nothing real [9] or [x] or [] here", 2);
        assert!(markers.is_empty());
    }

    #[tokio::test]
    async fn test_empty_context_never_calls_generator() {
        let (assembler, generator, db, _tmp) = setup("should never appear").await;

        let answer = assembler
            .assemble("ws1", "s1", "unanswerable?", &RetrievalContext::Empty)
            .await
            .unwrap();

        assert_eq!(answer.content, NO_EVIDENCE_CONTENT);
        assert!(answer.citations.is_empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);

        // Both sides of the exchange are still persisted
        let messages = db.list_messages("s1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[1].citations_json.as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn test_markers_select_citations() {
        let (assembler, _generator, _db, _tmp) =
            setup("The answer comes from [2], as stated there.").await;

        let context = RetrievalContext::VectorSearch {
            hits: vec![hit(0, "first passage"), hit(1, "second passage")],
        };
        let answer = assembler
            .assemble("ws1", "s1", "question?", &context)
            .await
            .unwrap();

        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].chunk_id.as_deref(), Some("chunk-1"));
        assert_eq!(answer.citations[0].page, Some(2));
    }

    #[tokio::test]
    async fn test_no_markers_cites_all_evidence() {
        let (assembler, _generator, _db, _tmp) =
            setup("An answer that never cites anything explicitly.").await;

        let context = RetrievalContext::VectorSearch {
            hits: vec![hit(0, "first"), hit(1, "second"), hit(2, "third")],
        };
        let answer = assembler
            .assemble("ws1", "s1", "question?", &context)
            .await
            .unwrap();

        assert_eq!(answer.citations.len(), 3);
    }

    #[tokio::test]
    async fn test_selection_context_cites_selection() {
        let (assembler, generator, db, _tmp) = setup("Explained from the selection [1].").await;

        let context = RetrievalContext::Selection {
            text: "highlighted passage".to_string(),
            doc_id: Some("doc-7".to_string()),
            page: Some(12),
        };
        let answer = assembler
            .assemble("ws1", "s1", "what does this mean?", &context)
            .await
            .unwrap();

        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            answer.citations,
            vec![Citation {
                doc_id: Some("doc-7".to_string()),
                chunk_id: None,
                page: Some(12),
            }]
        );

        // Context snapshot is stored with the assistant message
        let messages = db.list_messages("s1").await.unwrap();
        let snapshot = messages[1].context_json.as_deref().unwrap();
        assert!(snapshot.contains(r#""type":"selection""#));
    }

    fn generator_config(server: &MockServer) -> AnswerConfig {
        AnswerConfig {
            generator_url: format!("{}/v1/chat/completions", server.uri()),
            model: "test-model".to_string(),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_http_generator_parses_chat_completion() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({ "model": "test-model" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "choices": [
                    { "message": { "role": "assistant", "content": "Grounded reply [1]." } }
                ],
            })))
            .mount(&mock_server)
            .await;

        let generator = HttpGenerator::new(&generator_config(&mock_server)).unwrap();
        let reply = generator.generate("system prompt", "user prompt").await.unwrap();
        assert_eq!(reply, "Grounded reply [1].");
    }

    #[tokio::test]
    async fn test_http_generator_rejects_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let generator = HttpGenerator::new(&generator_config(&mock_server)).unwrap();
        let err = generator.generate("system", "user").await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_http_generator_rejects_malformed_body() {
        let mock_server = MockServer::start().await;

        // Valid JSON, but not a chat completion
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&mock_server)
            .await;

        let generator = HttpGenerator::new(&generator_config(&mock_server)).unwrap();
        let err = generator.generate("system", "user").await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_generator_failure_persists_nothing() {
        struct FailingGenerator;

        #[async_trait]
        impl Generator for FailingGenerator {
            async fn generate(&self, _system: &str, _user: &str) -> Result<String> {
                Err(Error::Generation("backend down".to_string()))
            }
        }

        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("test.db")).await.unwrap();
        let assembler = GroundedAnswerAssembler::new(db.clone(), Arc::new(FailingGenerator));

        let context = RetrievalContext::VectorSearch {
            hits: vec![hit(0, "evidence")],
        };
        let result = assembler.assemble("ws1", "s1", "question?", &context).await;
        assert!(result.is_err());

        assert!(db.list_messages("s1").await.unwrap().is_empty());
    }
}
