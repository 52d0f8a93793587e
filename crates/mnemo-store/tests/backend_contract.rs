//! Behaviour every `EntityStore` backend must share.

use mnemo_store::{
    ChatMessage, ChatRole, ChatSession, EntityStore, Fact, InMemoryStore, KnowledgeBase, Memory,
    MemoryScope, Project, SqliteStore, StoreError,
};
use tempfile::TempDir;

const DIMS: usize = 3;

/// Each backend under test. The temp dir keeps the SQLite file alive.
fn backends() -> Vec<(Box<dyn EntityStore>, Option<TempDir>)> {
    let dir = tempfile::tempdir().unwrap();
    let sqlite = SqliteStore::open(dir.path().join("contract.db"), DIMS).unwrap();
    vec![
        (Box::new(InMemoryStore::new(DIMS)), None),
        (Box::new(sqlite), Some(dir)),
    ]
}

#[test]
fn search_ranks_by_cosine_and_keeps_insertion_order_on_ties() {
    for (store, _dir) in backends() {
        let name = store.backend_name();
        let a = Memory::new("u1", "a").with_embedding(vec![1.0, 0.0, 0.0]);
        let b = Memory::new("u1", "b").with_embedding(vec![0.0, 1.0, 0.0]);
        let c = Memory::new("u1", "c").with_embedding(vec![2.0, 0.0, 0.0]);
        let d = Memory::new("u1", "d");
        for m in [&a, &b, &c, &d] {
            store.insert_memory(m).unwrap();
        }

        let hits = store
            .search_memories(&MemoryScope::user("u1"), Some(&[1.0, 0.0, 0.0]), 10)
            .unwrap();
        let order: Vec<&str> = hits.iter().map(|h| h.item.content.as_str()).collect();
        assert_eq!(order, vec!["a", "c", "b"], "{name}");
        assert!((hits[0].similarity_score - 1.0).abs() < 1e-5, "{name}");
        assert!(hits[2].similarity_score.abs() < 1e-5, "{name}");

        let limited = store
            .search_memories(&MemoryScope::user("u1"), Some(&[1.0, 0.0, 0.0]), 1)
            .unwrap();
        assert_eq!(limited.len(), 1, "{name}");
    }
}

#[test]
fn search_without_query_returns_scope_with_perfect_score() {
    for (store, _dir) in backends() {
        let name = store.backend_name();
        store.insert_memory(&Memory::new("u1", "one")).unwrap();
        store
            .insert_memory(&Memory::new("u1", "two").with_embedding(vec![0.0, 0.0, 1.0]))
            .unwrap();
        store.insert_memory(&Memory::new("u2", "other")).unwrap();

        let hits = store.search_memories(&MemoryScope::user("u1"), None, 10).unwrap();
        assert_eq!(hits.len(), 2, "{name}");
        assert!(hits.iter().all(|h| h.similarity_score == 1.0), "{name}");
        assert_eq!(hits[0].item.content, "one", "{name}");
    }
}

#[test]
fn search_without_query_ignores_the_limit() {
    for (store, _dir) in backends() {
        let name = store.backend_name();
        let session = ChatSession::new("u1", "p1");
        store.insert_chat_session(&session).unwrap();
        for i in 0..15 {
            store
                .insert_memory(&Memory::new("u1", format!("m{i}")))
                .unwrap();
            store.insert_fact(&Fact::new("kb", format!("f{i}"))).unwrap();
            store
                .insert_chat_message(&ChatMessage::new(&session.id, ChatRole::User, format!("c{i}")))
                .unwrap();
        }

        let memories = store.search_memories(&MemoryScope::user("u1"), None, 10).unwrap();
        assert_eq!(memories.len(), 15, "{name}");
        assert_eq!(memories[14].item.content, "m14", "{name}");
        assert_eq!(store.search_facts("kb", None, 10).unwrap().len(), 15, "{name}");
        assert_eq!(
            store.search_chat_messages(&session.id, None, 10).unwrap().len(),
            15,
            "{name}"
        );
    }
}

#[test]
fn parallel_vectors_rank_identically_across_backends() {
    let base = [0.3f32, 0.7, 0.1];
    let mut results = Vec::new();
    for (store, _dir) in backends() {
        for (i, scale) in [1.0f32, 2.5, 0.1, 7.0, 3.3, 0.9].iter().enumerate() {
            let embedding = base.iter().map(|x| x * scale).collect();
            store
                .insert_memory(&Memory::new("u1", format!("m{i}")).with_embedding(embedding))
                .unwrap();
        }
        store
            .insert_memory(&Memory::new("u1", "off-axis").with_embedding(vec![0.7, 0.3, 0.1]))
            .unwrap();

        let hits: Vec<(String, f32)> = store
            .search_memories(&MemoryScope::user("u1"), Some(&base), 10)
            .unwrap()
            .into_iter()
            .map(|h| (h.item.content, h.similarity_score))
            .collect();
        results.push(hits);
    }

    let expected: Vec<&str> = vec!["m0", "m1", "m2", "m3", "m4", "m5", "off-axis"];
    let order: Vec<&str> = results[0].iter().map(|(c, _)| c.as_str()).collect();
    assert_eq!(order, expected);
    assert!(results[0][..6].iter().all(|(_, score)| *score == 1.0));
    assert_eq!(results[0], results[1]);
}

#[test]
fn unembedded_entities_are_listable_but_not_searchable() {
    for (store, _dir) in backends() {
        let name = store.backend_name();
        let plain = Memory::new("u1", "plain");
        store.insert_memory(&plain).unwrap();

        assert!(store.get_memory(&plain.id).unwrap().is_some(), "{name}");
        assert_eq!(
            store.list_memories(&MemoryScope::user("u1"), None, 0).unwrap().len(),
            1,
            "{name}"
        );
        let hits = store
            .search_memories(&MemoryScope::user("u1"), Some(&[1.0, 0.0, 0.0]), 10)
            .unwrap();
        assert!(hits.is_empty(), "{name}");
    }
}

#[test]
fn wrong_dimension_is_rejected_everywhere() {
    for (store, _dir) in backends() {
        let name = store.backend_name();
        let memory = Memory::new("u1", "x").with_embedding(vec![1.0, 0.0]);
        assert!(
            matches!(
                store.insert_memory(&memory),
                Err(StoreError::DimensionMismatch {
                    expected: DIMS,
                    actual: 2
                })
            ),
            "{name}"
        );

        let fact = Fact::new("kb", "x").with_embedding(vec![1.0; 4]);
        assert!(store.insert_fact(&fact).is_err(), "{name}");

        let message = ChatMessage::new("s", ChatRole::User, "x").with_embedding(vec![]);
        assert!(store.insert_chat_message(&message).is_err(), "{name}");

        assert!(
            matches!(
                store.search_memories(&MemoryScope::user("u1"), Some(&[1.0]), 5),
                Err(StoreError::DimensionMismatch { .. })
            ),
            "{name}"
        );
    }
}

#[test]
fn bulk_deletes_report_exact_counts_and_do_not_cascade() {
    for (store, _dir) in backends() {
        let name = store.backend_name();
        let project = Project::new("u1", "p");
        store.insert_project(&project).unwrap();
        let kb = KnowledgeBase::new(&project.id, "kb");
        store.insert_knowledge_base(&kb).unwrap();
        store
            .insert_facts(&[Fact::new(&kb.id, "f1"), Fact::new(&kb.id, "f2")])
            .unwrap();
        for i in 0..3 {
            store
                .insert_memory(&Memory::new("u1", format!("m{i}")).with_project(&project.id))
                .unwrap();
        }
        store.insert_memory(&Memory::new("u2", "keep")).unwrap();

        assert!(store.delete_project(&project.id).unwrap(), "{name}");
        assert_eq!(store.list_knowledge_bases(&project.id).unwrap().len(), 1, "{name}");

        assert!(store.delete_knowledge_base(&kb.id).unwrap(), "{name}");
        assert_eq!(store.list_facts(&kb.id, None, 0).unwrap().len(), 2, "{name}");
        assert_eq!(store.delete_knowledge_base_facts(&kb.id).unwrap(), 2, "{name}");

        assert_eq!(store.delete_user_memories("u1").unwrap(), 3, "{name}");
        assert_eq!(store.delete_user_memories("u1").unwrap(), 0, "{name}");
        assert_eq!(store.stats().unwrap().memories, 1, "{name}");
    }
}

#[test]
fn listing_paginates_in_insertion_order() {
    for (store, _dir) in backends() {
        let name = store.backend_name();
        let session = ChatSession::new("u1", "p1");
        store.insert_chat_session(&session).unwrap();
        for i in 0..5 {
            store
                .insert_chat_message(&ChatMessage::new(
                    &session.id,
                    ChatRole::User,
                    format!("msg {i}"),
                ))
                .unwrap();
        }

        let page: Vec<String> = store
            .list_chat_messages(&session.id, Some(2), 2)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(page, vec!["msg 2", "msg 3"], "{name}");
        assert!(store.list_chat_messages(&session.id, Some(2), 9).unwrap().is_empty());
        assert_eq!(store.delete_chat_session_messages(&session.id).unwrap(), 5, "{name}");
    }
}

#[test]
fn replacing_an_entity_keeps_its_position() {
    for (store, _dir) in backends() {
        let name = store.backend_name();
        let mut first = Memory::new("u1", "first");
        let second = Memory::new("u1", "second");
        store.insert_memory(&first).unwrap();
        store.insert_memory(&second).unwrap();

        first.content = "first, edited".into();
        store.insert_memory(&first).unwrap();

        let listed: Vec<String> = store
            .list_memories(&MemoryScope::user("u1"), None, 0)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(listed, vec!["first, edited", "second"], "{name}");
    }
}

#[test]
fn stats_count_rows_and_embeddings() {
    for (store, _dir) in backends() {
        let name = store.backend_name();
        store
            .insert_memory(&Memory::new("u1", "a").with_embedding(vec![1.0, 0.0, 0.0]))
            .unwrap();
        store.insert_memory(&Memory::new("u1", "b")).unwrap();
        store
            .insert_fact(&Fact::new("kb", "f").with_embedding(vec![0.0, 1.0, 0.0]))
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.memories, 2, "{name}");
        assert_eq!(stats.facts, 1, "{name}");
        assert_eq!(stats.embeddings, 2, "{name}");
        assert_eq!(stats.dimensions, DIMS, "{name}");
    }
}
