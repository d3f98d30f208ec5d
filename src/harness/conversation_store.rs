//! Conversation store (C4): the document store specialized to a reserved
//! `"conversations"` index. Grounded in the donor's `ThoughtChain` (an
//! append-only, timestamp-ordered log with back-reference resolution,
//! `src/cloudllm/thought_chain.rs`) generalized from a single hash-chained
//! log of `Thought`s to role-tagged messages backed by [`DocumentStore`]'s
//! embedding index, so the same structure serves both chronological replay
//! and semantic recall.
//!
//! Embedding is an explicit parameter on every method rather than a field —
//! this is the half of the cyclic-ownership break described in the design
//! notes: the store never reaches back into a service container to find its
//! embedder.

use serde_json::{json, Value as Json};

use crate::harness::document_store::DocumentStore;
use crate::harness::embedding_client::EmbeddingClient;
use crate::harness::error::HarnessError;
use crate::harness::provider::types::{Message, Role, ToolCall};

pub const CONVERSATIONS_INDEX: &str = "conversations";

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
        Role::System => "system",
    }
}

fn role_from_str(s: &str) -> Role {
    match s {
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        "system" => Role::System,
        _ => Role::User,
    }
}

/// One loaded conversation record: the reconstructed [`Message`] plus the
/// document id it was loaded from, needed internally to dedup semantic hits
/// against the chronological tail without re-querying by content equality.
struct Loaded {
    id: u64,
    message: Message,
}

/// The document store specialized to chat history. Holds no embedding client
/// (see module docs); callers pass one into every method that needs it.
pub struct ConversationStore {
    store: DocumentStore,
}

impl ConversationStore {
    pub fn new(store: DocumentStore, dimension: u32) -> Self {
        store.ensure_index(CONVERSATIONS_INDEX, dimension, 1_000_000);
        Self { store }
    }

    pub fn document_store(&self) -> &DocumentStore {
        &self.store
    }

    /// Append one turn. `content` is the literal string to store — for an
    /// assistant message that issued tool calls, the caller passes the full
    /// JSON envelope (§3's `{role, content, tool_calls}` shape) serialized
    /// already; this method does not construct that envelope itself, it
    /// just records whatever it is given plus the structured `tool_calls`
    /// so reconstruction doesn't depend on re-parsing the envelope.
    pub async fn append(
        &self,
        embedder: &EmbeddingClient,
        role: Role,
        content: &str,
        tool_call_id: Option<&str>,
        tool_name: Option<&str>,
        tool_calls: &[ToolCall],
    ) -> Result<u64, HarnessError> {
        let embedding = if embedder.is_configured() {
            embedder.embed(content).await?
        } else {
            embedder.zero_vector()
        };
        let tool_calls_json: Vec<Json> = tool_calls
            .iter()
            .map(|tc| json!({"id": tc.id, "type": "function", "function": {"name": tc.name, "arguments": tc.arguments}}))
            .collect();
        let metadata = json!({
            "role": role_str(role),
            "tool_call_id": tool_call_id,
            "tool_name": tool_name,
            "tool_calls": tool_calls_json,
        });
        self.store.add(
            CONVERSATIONS_INDEX,
            content.to_string(),
            embedding,
            "conversation_message".to_string(),
            "turn_loop".to_string(),
            metadata,
            now(),
        )
    }

    fn to_message(doc: &crate::harness::document_store::Document) -> Message {
        let role = doc
            .metadata
            .get("role")
            .and_then(|v| v.as_str())
            .map(role_from_str)
            .unwrap_or(Role::User);
        let tool_call_id = doc
            .metadata
            .get("tool_call_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let tool_name = doc
            .metadata
            .get("tool_name")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let tool_calls: Vec<ToolCall> = doc
            .metadata
            .get("tool_calls")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|tc| {
                        let id = tc.get("id")?.as_str()?.to_string();
                        let func = tc.get("function")?;
                        let name = func.get("name")?.as_str()?.to_string();
                        let arguments = func.get("arguments")?.as_str()?.to_string();
                        Some(ToolCall { id, name, arguments })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let content = if role == Role::Assistant && !tool_calls.is_empty() && doc.content.is_empty()
        {
            None
        } else {
            Some(doc.content.clone())
        };
        Message {
            role,
            content,
            tool_calls,
            tool_call_id,
            tool_name,
            timestamp: doc.timestamp,
        }
    }

    /// Find the index of the nearest earlier assistant message that
    /// introduced `tool_call_id`, scanning backward from `before`.
    fn find_owner(all: &[Loaded], tool_call_id: &str, before: usize) -> Option<usize> {
        all[..before].iter().rposition(|m| {
            m.message.role == Role::Assistant
                && m.message.tool_calls.iter().any(|tc| tc.id == tool_call_id)
        })
    }

    /// Widen `start` backward until every `tool` message in `all[start..]`
    /// has its owning assistant message inside the window too (§4.4's
    /// pairing invariant).
    fn widen(all: &[Loaded], mut start: usize) -> usize {
        loop {
            let mut min_owner = start;
            for (i, loaded) in all.iter().enumerate().skip(start) {
                if loaded.message.role == Role::Tool {
                    if let Some(id) = &loaded.message.tool_call_id {
                        if let Some(owner) = Self::find_owner(all, id, i) {
                            if owner < min_owner {
                                min_owner = owner;
                            }
                        }
                    }
                }
            }
            if min_owner == start {
                return start;
            }
            start = min_owner;
        }
    }

    fn load_all(&self) -> Vec<Loaded> {
        let docs = self.store.search_by_time(CONVERSATIONS_INDEX, 0, now(), usize::MAX);
        docs.iter()
            .map(|d| Loaded {
                id: d.id,
                message: Self::to_message(d),
            })
            .collect()
    }

    /// The most recent `n_messages`, in chronological order, widened so no
    /// `tool` message appears without its owning assistant message.
    pub fn load_window(&self, n_messages: usize) -> Vec<Message> {
        let all = self.load_all();
        let start = all.len().saturating_sub(n_messages);
        let start = Self::widen(&all, start);
        all[start..].iter().map(|l| l.message.clone()).collect()
    }

    /// The last `recent` chronological messages plus up to `semantic_k`
    /// earlier messages semantically relevant to `query`, deduplicated by
    /// document id, re-sorted chronologically, pairing-invariant preserved.
    pub async fn load_extended(
        &self,
        embedder: &EmbeddingClient,
        recent: usize,
        semantic_k: usize,
        query: &str,
    ) -> Result<Vec<Message>, HarnessError> {
        if !embedder.is_configured() || semantic_k == 0 {
            return Ok(self.load_window(recent));
        }
        let all = self.load_all();
        let tail_start = Self::widen(&all, all.len().saturating_sub(recent));
        let mut selected: Vec<usize> = (tail_start..all.len()).collect();

        let query_embedding = embedder.embed(query).await?;
        let hits = self
            .store
            .search(CONVERSATIONS_INDEX, &query_embedding, semantic_k + recent)?;
        let by_id: std::collections::HashMap<u64, usize> =
            all.iter().enumerate().map(|(i, l)| (l.id, i)).collect();
        let mut added = 0;
        for hit in hits {
            if added >= semantic_k {
                break;
            }
            let Some(&idx) = by_id.get(&hit.document.id) else {
                continue;
            };
            if selected.contains(&idx) {
                continue;
            }
            selected.push(idx);
            added += 1;
        }
        selected.sort_unstable();
        selected.dedup();
        // Re-widen: a semantic hit may itself be an orphaned tool message.
        let min_idx = selected.first().copied().unwrap_or(tail_start);
        let widened = Self::widen(&all, min_idx);
        let mut result: Vec<usize> = (widened..all.len())
            .filter(|i| *i >= widened && (selected.contains(i) || *i >= tail_start))
            .collect();
        result.sort_unstable();
        result.dedup();
        Ok(result.into_iter().map(|i| all[i].message.clone()).collect())
    }

    /// Pure semantic search: messages ordered by similarity, not time.
    pub async fn search(
        &self,
        embedder: &EmbeddingClient,
        query: &str,
        k: usize,
    ) -> Result<Vec<Message>, HarnessError> {
        let query_embedding = embedder.embed(query).await?;
        let hits = self.store.search(CONVERSATIONS_INDEX, &query_embedding, k)?;
        Ok(hits
            .into_iter()
            .map(|hit| {
                let role = hit
                    .document
                    .metadata
                    .get("role")
                    .and_then(|v| v.as_str())
                    .map(role_from_str)
                    .unwrap_or(Role::User);
                Message {
                    role,
                    content: Some(hit.document.content),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                    tool_name: None,
                    timestamp: hit.document.timestamp,
                }
            })
            .collect())
    }

    pub fn clear_conversations(&self) {
        self.store.drop_index(CONVERSATIONS_INDEX);
    }
}
