//! Memory service for mnemo.
//!
//! [`MemoryService`] ties an [`EntityStore`](mnemo_store::EntityStore) to an
//! [`Embedder`](mnemo_embed::Embedder). It validates input, optionally runs a
//! [`TextTransform`] before storing, embeds content, and optionally narrows
//! search results through a [`ResultFilter`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mnemo_embed::{EmbedderFactory, EmbedderSpec};
//! use mnemo_service::{MemoryService, RememberRequest, SearchRequest};
//! use mnemo_store::InMemoryStore;
//!
//! # async fn example() -> mnemo_service::Result<()> {
//! let factory = EmbedderFactory::new();
//! let store = Arc::new(InMemoryStore::new(384));
//! let service = MemoryService::from_factory(store, &factory, &EmbedderSpec::default()).await?;
//!
//! service.remember(RememberRequest::new("user-1", "Prefers window seats")).await?;
//! let hits = service
//!     .search_memories(SearchRequest::new("user-1").with_query("seating"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod chat_completion;
pub mod error;
pub mod filter;
pub mod service;
pub mod transform;

pub use chat_completion::{
    ChatCompletionClient, ChatCompletionConfig, ChatCompletionFilter, ChatCompletionTransform,
    parse_selected_ids,
};
pub use error::{Result, ServiceError};
pub use filter::{FilterCandidate, PassthroughFilter, ResultFilter};
pub use service::{FactInput, MemoryService, RememberRequest, SearchRequest, ServicePolicy};
pub use transform::{IdentityTransform, TextTransform};
