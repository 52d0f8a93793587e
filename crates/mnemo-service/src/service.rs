//! The memory service: validation, transforms, embedding, storage, filtering.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use mnemo_embed::{EmbedderFactory, EmbedderSpec, SharedEmbedder};
use mnemo_store::validation::{
    DEFAULT_IMPORTANCE, clamp_confidence, clamp_importance, validate_content, validate_id,
};
use mnemo_store::{
    ChatMessage, ChatRole, ChatSession, DEFAULT_SEARCH_LIMIT, Fact, KnowledgeBase, Memory,
    MemoryScope, Metadata, Project, Scored, SharedStore, StoreError, StoreStats,
};

use crate::error::Result;
use crate::filter::{FilterCandidate, ResultFilter};
use crate::transform::TextTransform;

/// Defaults applied when a request leaves a choice open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicePolicy {
    /// Run the text transform on `remember` unless the request says otherwise.
    pub strip_pii_by_default: bool,
    /// Run the result filter on memory search unless the request says otherwise.
    pub filter_by_default: bool,
    pub default_importance: f32,
    pub default_limit: usize,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            strip_pii_by_default: false,
            filter_by_default: false,
            default_importance: DEFAULT_IMPORTANCE,
            default_limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

/// Input for [`MemoryService::remember`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RememberRequest {
    pub user_id: String,
    pub content: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub importance: Option<f32>,
    /// Overrides [`ServicePolicy::strip_pii_by_default`].
    #[serde(default)]
    pub strip_pii: Option<bool>,
}

impl RememberRequest {
    pub fn new(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_strip_pii(mut self, strip: bool) -> Self {
        self.strip_pii = Some(strip);
        self
    }
}

/// Input for [`MemoryService::search_memories`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub user_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Missing or blank lists the scope with a score of 1.
    #[serde(default)]
    pub query: Option<String>,
    /// Applies only when there is a query.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Overrides [`ServicePolicy::filter_by_default`].
    #[serde(default)]
    pub filter: Option<bool>,
    /// Extra text handed to the result filter.
    #[serde(default)]
    pub context: Option<String>,
}

impl SearchRequest {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_filter(mut self, filter: bool) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// One fact to add to a knowledge base.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactInput {
    pub content: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl FactInput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Stores and retrieves memories, facts, and chat messages by meaning.
///
/// Owner checks happen here: an entity that exists but belongs to someone
/// else is reported the same way as one that does not exist.
pub struct MemoryService {
    store: SharedStore,
    embedder: SharedEmbedder,
    transform: Option<Arc<dyn TextTransform>>,
    filter: Option<Arc<dyn ResultFilter>>,
    policy: ServicePolicy,
}

impl MemoryService {
    pub fn new(store: SharedStore, embedder: SharedEmbedder) -> Self {
        Self {
            store,
            embedder,
            transform: None,
            filter: None,
            policy: ServicePolicy::default(),
        }
    }

    /// Build a service whose embedder comes from `factory`.
    ///
    /// Fails if the provider's dimension differs from the store's.
    pub async fn from_factory(
        store: SharedStore,
        factory: &EmbedderFactory,
        spec: &EmbedderSpec,
    ) -> Result<Self> {
        let embedder = factory.create(spec).await?;
        if embedder.dimensions() != store.dimensions() {
            return Err(StoreError::DimensionMismatch {
                expected: store.dimensions(),
                actual: embedder.dimensions(),
            }
            .into());
        }
        info!(
            provider = embedder.name(),
            backend = store.backend_name(),
            "Memory service ready"
        );
        Ok(Self::new(store, embedder))
    }

    pub fn with_transform(mut self, transform: Arc<dyn TextTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn ResultFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_policy(mut self, policy: ServicePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn embedder(&self) -> &SharedEmbedder {
        &self.embedder
    }

    pub fn policy(&self) -> &ServicePolicy {
        &self.policy
    }

    // ─────────────────────────────────────────────────────────────────────
    // Memories
    // ─────────────────────────────────────────────────────────────────────

    /// Store a memory. The content is transformed (if asked) before it is
    /// embedded, so the stored text and its vector always agree.
    pub async fn remember(&self, request: RememberRequest) -> Result<Memory> {
        validate_id(&request.user_id, "user_id")?;
        validate_content(&request.content)?;

        let strip = request
            .strip_pii
            .unwrap_or(self.policy.strip_pii_by_default);
        let content = match (&self.transform, strip) {
            (Some(transform), true) => {
                let rewritten = transform.transform(&request.content).await?;
                validate_content(&rewritten)?;
                rewritten
            }
            _ => request.content,
        };

        let importance =
            clamp_importance(Some(request.importance.unwrap_or(self.policy.default_importance)));
        let embedding = self.embedder.embed(&content).await?;

        let mut memory = Memory::new(request.user_id, content)
            .with_importance(importance)
            .with_embedding(embedding);
        memory.project_id = request.project_id;
        memory.metadata = request.metadata;

        self.store.insert_memory(&memory)?;
        debug!(id = %memory.id, user = %memory.user_id, "Remembered");
        Ok(memory)
    }

    pub async fn search_memories(&self, request: SearchRequest) -> Result<Vec<Scored<Memory>>> {
        validate_id(&request.user_id, "user_id")?;
        let scope = MemoryScope::user(request.user_id).with_project(request.project_id);

        // Without a query the whole scope comes back and the limit does not apply
        let Some(query) = non_blank(request.query.as_deref()) else {
            return Ok(self.store.search_memories(&scope, None, usize::MAX)?);
        };

        let limit = request.limit.unwrap_or(self.policy.default_limit);
        let embedding = self.embedder.embed(query).await?;
        let results = self.store.search_memories(&scope, Some(&embedding), limit)?;

        if request.filter.unwrap_or(self.policy.filter_by_default) {
            Ok(self
                .apply_filter(query, results, request.context.as_deref())
                .await)
        } else {
            Ok(results)
        }
    }

    /// Keep only the results the filter selects, in ranking order.
    /// A failing filter leaves the results untouched.
    async fn apply_filter(
        &self,
        query: &str,
        results: Vec<Scored<Memory>>,
        context: Option<&str>,
    ) -> Vec<Scored<Memory>> {
        let Some(filter) = &self.filter else {
            return results;
        };

        let candidates: Vec<FilterCandidate> = results
            .iter()
            .map(|r| FilterCandidate {
                id: r.item.id.clone(),
                content: r.item.content.clone(),
                similarity_score: r.similarity_score,
            })
            .collect();

        match filter.select(query, &candidates, context).await {
            Ok(selected) => results
                .into_iter()
                .filter(|r| selected.contains(&r.item.id))
                .collect(),
            Err(e) => {
                warn!(filter = filter.name(), error = %e, "Result filter failed, returning unfiltered results");
                results
            }
        }
    }

    pub fn get_memory(&self, user_id: &str, id: &str) -> Result<Option<Memory>> {
        Ok(self
            .store
            .get_memory(id)?
            .filter(|m| m.user_id == user_id))
    }

    pub fn delete_memory(&self, user_id: &str, id: &str) -> Result<bool> {
        if self.get_memory(user_id, id)?.is_none() {
            return Ok(false);
        }
        Ok(self.store.delete_memory(id)?)
    }

    pub fn list_memories(
        &self,
        user_id: &str,
        project_id: Option<&str>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Memory>> {
        let scope = MemoryScope::user(user_id).with_project(project_id.map(str::to_string));
        Ok(self.store.list_memories(&scope, limit, offset)?)
    }

    pub fn delete_user_memories(&self, user_id: &str) -> Result<usize> {
        validate_id(user_id, "user_id")?;
        let removed = self.store.delete_user_memories(user_id)?;
        info!(user = %user_id, removed, "Deleted user memories");
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Projects
    // ─────────────────────────────────────────────────────────────────────

    pub fn create_project(
        &self,
        user_id: &str,
        name: &str,
        description: Option<String>,
        metadata: Option<Metadata>,
    ) -> Result<Project> {
        validate_id(user_id, "user_id")?;
        validate_id(name, "name")?;
        let mut project = Project::new(user_id, name);
        project.description = description;
        project.metadata = metadata;
        self.store.insert_project(&project)?;
        Ok(project)
    }

    pub fn get_project(&self, user_id: &str, id: &str) -> Result<Option<Project>> {
        Ok(self
            .store
            .get_project(id)?
            .filter(|p| p.user_id == user_id))
    }

    pub fn list_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        Ok(self.store.list_projects(user_id)?)
    }

    /// Deletes only the project row; its memories and knowledge bases stay.
    pub fn delete_project(&self, user_id: &str, id: &str) -> Result<bool> {
        if self.get_project(user_id, id)?.is_none() {
            return Ok(false);
        }
        Ok(self.store.delete_project(id)?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Knowledge bases and facts
    // ─────────────────────────────────────────────────────────────────────

    pub fn create_knowledge_base(
        &self,
        project_id: &str,
        name: &str,
        description: Option<String>,
    ) -> Result<KnowledgeBase> {
        validate_id(project_id, "project_id")?;
        validate_id(name, "name")?;
        let mut kb = KnowledgeBase::new(project_id, name);
        kb.description = description;
        self.store.insert_knowledge_base(&kb)?;
        Ok(kb)
    }

    pub fn get_knowledge_base(&self, project_id: &str, id: &str) -> Result<Option<KnowledgeBase>> {
        Ok(self
            .store
            .get_knowledge_base(id)?
            .filter(|kb| kb.project_id == project_id))
    }

    pub fn list_knowledge_bases(&self, project_id: &str) -> Result<Vec<KnowledgeBase>> {
        Ok(self.store.list_knowledge_bases(project_id)?)
    }

    pub fn delete_knowledge_base(&self, project_id: &str, id: &str) -> Result<bool> {
        if self.get_knowledge_base(project_id, id)?.is_none() {
            return Ok(false);
        }
        Ok(self.store.delete_knowledge_base(id)?)
    }

    pub async fn add_fact(&self, kb_id: &str, input: FactInput) -> Result<Fact> {
        validate_id(kb_id, "kb_id")?;
        validate_content(&input.content)?;
        let embedding = self.embedder.embed(&input.content).await?;
        let fact = build_fact(kb_id, input, embedding);
        self.store.insert_fact(&fact)?;
        Ok(fact)
    }

    /// Add several facts with one batch embedding call. Nothing is stored
    /// unless every fact is valid.
    pub async fn add_facts(&self, kb_id: &str, inputs: Vec<FactInput>) -> Result<Vec<Fact>> {
        validate_id(kb_id, "kb_id")?;
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        for input in &inputs {
            validate_content(&input.content)?;
        }

        let texts: Vec<&str> = inputs.iter().map(|i| i.content.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let facts: Vec<Fact> = inputs
            .into_iter()
            .zip(embeddings)
            .map(|(input, embedding)| build_fact(kb_id, input, embedding))
            .collect();
        self.store.insert_facts(&facts)?;
        debug!(kb = %kb_id, count = facts.len(), "Added facts");
        Ok(facts)
    }

    pub async fn search_facts(
        &self,
        kb_id: &str,
        query: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Scored<Fact>>> {
        let Some(query) = non_blank(query) else {
            return Ok(self.store.search_facts(kb_id, None, usize::MAX)?);
        };
        let limit = limit.unwrap_or(self.policy.default_limit);
        let embedding = self.embedder.embed(query).await?;
        Ok(self.store.search_facts(kb_id, Some(&embedding), limit)?)
    }

    pub fn get_fact(&self, kb_id: &str, id: &str) -> Result<Option<Fact>> {
        Ok(self.store.get_fact(id)?.filter(|f| f.kb_id == kb_id))
    }

    pub fn list_facts(&self, kb_id: &str, limit: Option<usize>, offset: usize) -> Result<Vec<Fact>> {
        Ok(self.store.list_facts(kb_id, limit, offset)?)
    }

    pub fn delete_fact(&self, kb_id: &str, id: &str) -> Result<bool> {
        if self.get_fact(kb_id, id)?.is_none() {
            return Ok(false);
        }
        Ok(self.store.delete_fact(id)?)
    }

    pub fn delete_knowledge_base_facts(&self, kb_id: &str) -> Result<usize> {
        Ok(self.store.delete_knowledge_base_facts(kb_id)?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Chat
    // ─────────────────────────────────────────────────────────────────────

    pub fn create_chat_session(
        &self,
        user_id: &str,
        project_id: &str,
        metadata: Option<Metadata>,
    ) -> Result<ChatSession> {
        validate_id(user_id, "user_id")?;
        validate_id(project_id, "project_id")?;
        let mut session = ChatSession::new(user_id, project_id);
        session.metadata = metadata;
        self.store.insert_chat_session(&session)?;
        Ok(session)
    }

    pub fn get_chat_session(&self, user_id: &str, id: &str) -> Result<Option<ChatSession>> {
        Ok(self
            .store
            .get_chat_session(id)?
            .filter(|s| s.user_id == user_id))
    }

    pub fn list_chat_sessions(
        &self,
        user_id: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<ChatSession>> {
        Ok(self.store.list_chat_sessions(user_id, project_id)?)
    }

    /// Append a message. Returns `None` if the session does not exist.
    pub async fn add_chat_message(
        &self,
        session_id: &str,
        role: ChatRole,
        content: &str,
        metadata: Option<Metadata>,
    ) -> Result<Option<ChatMessage>> {
        validate_content(content)?;
        if self.store.get_chat_session(session_id)?.is_none() {
            return Ok(None);
        }

        let embedding = self.embedder.embed(content).await?;
        let mut message = ChatMessage::new(session_id, role, content).with_embedding(embedding);
        message.metadata = metadata;
        self.store.insert_chat_message(&message)?;
        Ok(Some(message))
    }

    pub fn list_chat_messages(
        &self,
        session_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<ChatMessage>> {
        Ok(self.store.list_chat_messages(session_id, limit, offset)?)
    }

    pub async fn search_chat_messages(
        &self,
        session_id: &str,
        query: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Scored<ChatMessage>>> {
        let Some(query) = non_blank(query) else {
            return Ok(self.store.search_chat_messages(session_id, None, usize::MAX)?);
        };
        let limit = limit.unwrap_or(self.policy.default_limit);
        let embedding = self.embedder.embed(query).await?;
        Ok(self.store.search_chat_messages(session_id, Some(&embedding), limit)?)
    }

    pub fn delete_chat_session_messages(&self, session_id: &str) -> Result<usize> {
        Ok(self.store.delete_chat_session_messages(session_id)?)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(self.store.stats()?)
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}

fn build_fact(kb_id: &str, input: FactInput, embedding: Vec<f32>) -> Fact {
    let mut fact = Fact::new(kb_id, input.content)
        .with_confidence(clamp_confidence(input.confidence))
        .with_embedding(embedding);
    fact.metadata = input.metadata;
    fact
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_embed::MockEmbedder;
    use mnemo_embed::Embedder;
    use mnemo_store::InMemoryStore;

    async fn service() -> MemoryService {
        let embedder = Arc::new(MockEmbedder::new(8));
        embedder.initialize().await.unwrap();
        MemoryService::new(Arc::new(InMemoryStore::new(8)), embedder)
    }

    #[tokio::test]
    async fn test_remember_clamps_and_embeds() {
        let svc = service().await;
        let memory = svc
            .remember(RememberRequest::new("u1", "likes tea").with_importance(99.0))
            .await
            .unwrap();
        assert_eq!(memory.importance, 10.0);
        assert_eq!(memory.embedding.as_ref().map(Vec::len), Some(8));

        let default = svc.remember(RememberRequest::new("u1", "x")).await.unwrap();
        assert_eq!(default.importance, 5.0);
    }

    #[tokio::test]
    async fn test_remember_rejects_blank_content() {
        let svc = service().await;
        assert!(svc.remember(RememberRequest::new("u1", "   ")).await.is_err());
        assert!(svc.remember(RememberRequest::new("", "x")).await.is_err());
    }

    #[tokio::test]
    async fn test_foreign_memory_looks_missing() {
        let svc = service().await;
        let memory = svc.remember(RememberRequest::new("u1", "mine")).await.unwrap();
        assert!(svc.get_memory("u2", &memory.id).unwrap().is_none());
        assert!(!svc.delete_memory("u2", &memory.id).unwrap());
        assert!(svc.get_memory("u1", &memory.id).unwrap().is_some());
        assert!(svc.delete_memory("u1", &memory.id).unwrap());
    }

    #[tokio::test]
    async fn test_from_factory_checks_dimensions() {
        let factory = EmbedderFactory::new();
        let store: SharedStore = Arc::new(InMemoryStore::new(16));
        let result = MemoryService::from_factory(store, &factory, &EmbedderSpec::mock(8)).await;
        assert!(matches!(
            result,
            Err(crate::ServiceError::Store(StoreError::DimensionMismatch { .. }))
        ));
    }
}
