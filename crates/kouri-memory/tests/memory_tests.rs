#[cfg(test)]
mod tests {
    use kouri_config::{ContextConfig, IndexKind, SummarizerConfig};
    use kouri_core::{KouriError, Role};
    use kouri_llm::{MockEmbedding, MockProvider, MockScorer};
    use kouri_memory::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context(max_pairs: usize) -> ContextManager {
        ContextManager::new(&ContextConfig {
            max_pairs,
            ..Default::default()
        })
        .unwrap()
    }

    // ── Context window ─────────────────────────────────────────

    mod context_window {
        use super::*;

        #[test]
        fn test_salient_pair_survives_eviction() {
            let ctx = context(2);
            let evicted = Arc::new(Mutex::new(Vec::new()));
            let sink = evicted.clone();
            ctx.set_removal_hook(Arc::new(move |user: &str, u: &str, a: &str| {
                sink.lock().push((user.to_string(), u.to_string(), a.to_string()));
            }));

            ctx.record_exchange("u1", "嗯", "好");
            ctx.record_exchange("u1", "今天下午三点开会", "好的");
            ctx.record_exchange("u1", "哦", "嗯");

            assert_eq!(ctx.pair_count("u1"), 2);
            let turns = ctx.messages("u1");
            let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
            assert_eq!(
                contents,
                vec!["当前对话要点：时间：下午", "今天下午三点开会", "好的", "哦", "嗯"]
            );
            assert_eq!(turns[0].role, Role::System);
            assert_eq!(
                *evicted.lock(),
                vec![("u1".to_string(), "嗯".to_string(), "好".to_string())]
            );
        }

        #[test]
        fn test_pair_count_never_exceeds_capacity() {
            let ctx = context(3);
            for i in 0..10 {
                ctx.record_exchange("u1", &format!("第{}条消息内容", i), "收到啦");
                assert!(ctx.pair_count("u1") <= 3);
            }
            assert_eq!(ctx.pair_count("u1"), 3);
        }

        #[test]
        fn test_system_prompt_is_never_evicted() {
            let ctx = ContextManager::new(&ContextConfig {
                max_pairs: 1,
                system_prompt: Some("你是一个温柔的助手".into()),
                ..Default::default()
            })
            .unwrap();
            for _ in 0..4 {
                ctx.record_exchange("u1", "嗯", "好");
            }
            let turns = ctx.messages("u1");
            assert_eq!(turns[0].role, Role::System);
            assert_eq!(turns[0].content, "你是一个温柔的助手");
            assert_eq!(ctx.window("u1").system_offset(), 1);
            assert_eq!(ctx.pair_count("u1"), 1);
        }

        #[test]
        fn test_system_append_replaces_prompt() {
            let ctx = context(5);
            ctx.append("u1", Role::System, "旧设定");
            ctx.append("u1", Role::System, "新设定");
            let turns = ctx.messages("u1");
            assert_eq!(turns.len(), 1);
            assert_eq!(turns[0].content, "新设定");
        }

        #[test]
        fn test_equal_scores_keep_most_recent() {
            let ctx = context(1);
            ctx.record_exchange("u1", "嗯", "好");
            ctx.record_exchange("u1", "哦", "嗯");
            let turns = ctx.messages("u1");
            assert_eq!(turns.len(), 2);
            assert_eq!(turns[0].content, "哦");
            assert!(ctx.window("u1").summary().is_none());
        }

        #[test]
        fn test_malformed_window_heals() {
            let ctx = context(5);
            ctx.append("u1", Role::Assistant, "孤立的回复");
            ctx.append("u1", Role::User, "第一句");
            ctx.append("u1", Role::User, "第二句");
            let turns = ctx.messages("u1");
            assert_eq!(turns.len(), 1);
            assert_eq!(turns[0].role, Role::User);
            assert_eq!(turns[0].content, "第一句\n第二句");
        }

        #[test]
        fn test_trailing_user_turn_kept() {
            let ctx = context(1);
            ctx.record_exchange("u1", "嗯", "好");
            ctx.record_exchange("u1", "哦", "嗯");
            ctx.append("u1", Role::User, "还在吗");
            let turns = ctx.messages("u1");
            assert_eq!(ctx.pair_count("u1"), 1);
            assert_eq!(turns.last().map(|t| t.content.as_str()), Some("还在吗"));
        }

        #[test]
        fn test_record_exchange_sets_last_interaction() {
            let ctx = context(5);
            assert!(ctx.last_interaction("u1").is_none());
            ctx.record_exchange("u1", "你好", "你好呀");
            assert!(ctx.last_interaction("u1").is_some());
        }

        #[test]
        fn test_clear_starts_new_session() {
            let ctx = context(5);
            ctx.record_exchange("u1", "你好", "你好呀");
            ctx.begin_interrupt("u1", "等等");
            ctx.clear("u1");
            assert_eq!(ctx.pair_count("u1"), 0);
            assert!(ctx.pending("u1").is_none());
            assert!(!ctx.is_interrupted("u1"));
        }

        #[test]
        fn test_users_are_isolated() {
            let ctx = context(1);
            ctx.record_exchange("a", "今天在家", "好");
            ctx.record_exchange("b", "嗯", "好");
            ctx.record_exchange("b", "哦", "嗯");
            assert_eq!(ctx.messages("a")[0].content, "今天在家");
            assert_eq!(ctx.pair_count("a"), 1);
        }
    }

    // ── Interrupts ─────────────────────────────────────────────

    mod interrupts {
        use super::*;

        #[test]
        fn test_merge_folds_partial_and_queued_in_order() {
            let ctx = context(5);
            ctx.begin_interrupt("u1", "第一条");
            ctx.begin_interrupt("u1", "第二条");
            ctx.capture_partial("u1", "我正在说");

            let merged = ctx.consume_merge("u1", "原始消息");
            assert!(merged.contains("AI助手之前的回复(未完成): \n我正在说"));
            assert!(merged.contains("用户的新消息: \n第一条\n---\n第二条"));
            assert!(ctx.pending("u1").is_none());
            assert_eq!(ctx.consume_merge("u1", "原始消息"), "原始消息");
        }

        #[test]
        fn test_merge_needs_partial_response() {
            let ctx = context(5);
            ctx.begin_interrupt("u1", "新消息");
            assert_eq!(ctx.consume_merge("u1", "原始消息"), "原始消息");
            assert!(ctx.pending("u1").is_none());
        }

        #[test]
        fn test_answered_message_not_folded_into_later_merge() {
            let ctx = context(5);
            ctx.begin_interrupt("u1", "B");
            assert_eq!(ctx.consume_merge("u1", "B"), "B");

            ctx.capture_partial("u1", "说到一半");
            ctx.begin_interrupt("u1", "C");
            let merged = ctx.consume_merge("u1", "C");
            assert!(merged.contains("用户的新消息: \nC\n"));
            assert!(!merged.contains("B\n---"));
            assert!(ctx.pending("u1").is_none());
        }

        #[test]
        fn test_merge_needs_queued_messages() {
            let ctx = context(5);
            ctx.capture_partial("u1", "说到一半");
            assert_eq!(ctx.consume_merge("u1", "原始消息"), "原始消息");
        }

        #[test]
        fn test_interrupt_flag_read_and_cleared() {
            let ctx = context(5);
            assert!(!ctx.check_and_clear_interrupt("u1"));
            ctx.begin_interrupt("u1", "等一下");
            assert!(ctx.is_interrupted("u1"));
            assert!(ctx.check_and_clear_interrupt("u1"));
            assert!(!ctx.check_and_clear_interrupt("u1"));
        }

        #[test]
        fn test_concurrent_appends_respect_capacity() {
            let ctx = Arc::new(context(4));
            let handles: Vec<_> = (0..8)
                .map(|t| {
                    let ctx = ctx.clone();
                    std::thread::spawn(move || {
                        for i in 0..25 {
                            ctx.record_exchange("shared", &format!("线程{}第{}句话", t, i), "好的收到");
                            ctx.begin_interrupt("shared", "插话");
                            let _ = ctx.check_and_clear_interrupt("shared");
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(ctx.pair_count("shared"), 4);
        }
    }

    // ── Vector index ───────────────────────────────────────────

    mod vector_index {
        use super::*;

        fn docs(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }

        #[tokio::test]
        async fn test_query_returns_subset_of_documents() {
            let index = VectorIndex::new(Arc::new(MockEmbedding::new(8)), IndexKind::Flat);
            let all = docs(&["a", "bb", "ccc", "dddd", "eeeee"]);
            assert_eq!(index.add_documents(&all).await.unwrap(), 5);

            let hits = index.query("xx", 2, false).await;
            assert_eq!(hits.len(), 2);
            assert_eq!(hits[0], "bb");
            assert!(hits.iter().all(|h| all.contains(h)));
        }

        #[tokio::test]
        async fn test_top_k_larger_than_corpus() {
            let index = VectorIndex::new(Arc::new(MockEmbedding::new(8)), IndexKind::Flat);
            index.add_documents(&docs(&["a", "bb"])).await.unwrap();
            assert_eq!(index.query("q", 10, false).await.len(), 2);
            assert_eq!(index.query("q", 10, true).await.len(), 2);
        }

        #[tokio::test]
        async fn test_empty_add_is_noop() {
            let index = VectorIndex::new(Arc::new(MockEmbedding::new(4)), IndexKind::Flat);
            assert_eq!(index.add_documents(&[]).await.unwrap(), 0);
            assert_eq!(index.len(), 0);
            assert!(!index.is_initialized());
        }

        #[tokio::test]
        async fn test_query_on_empty_index_skips_embedding() {
            let embedder = Arc::new(MockEmbedding::new(4));
            let index = VectorIndex::new(embedder.clone(), IndexKind::Flat);
            assert!(index.query("任何问题", 3, true).await.is_empty());
            assert_eq!(embedder.call_count(), 0);
        }

        #[tokio::test]
        async fn test_dimension_frozen_after_first_add() {
            let embedder = MockEmbedding::new(3).with_vector("wide", vec![1.0; 5]);
            let index = VectorIndex::new(Arc::new(embedder), IndexKind::Flat);
            index.add_documents(&docs(&["a"])).await.unwrap();
            assert_eq!(index.dimension(), Some(3));

            let err = index.add_documents(&docs(&["bb", "wide"])).await.unwrap_err();
            assert!(matches!(err, KouriError::DimensionMismatch { .. }));
            let err = index.add_documents(&docs(&["wide"])).await.unwrap_err();
            assert!(matches!(err, KouriError::DimensionMismatch { expected: 3, actual: 5 }));
            assert_eq!(index.len(), 1);
            assert_eq!(index.documents(), docs(&["a"]));
        }

        #[tokio::test]
        async fn test_blank_documents_are_skipped() {
            let index = VectorIndex::new(Arc::new(MockEmbedding::new(4)), IndexKind::Flat);
            assert_eq!(index.add_documents(&docs(&["", "  ", "a"])).await.unwrap(), 1);
            assert_eq!(index.documents(), docs(&["a"]));
        }

        #[tokio::test]
        async fn test_embedding_failure_leaves_index_unchanged() {
            let embedder = MockEmbedding::new(4).failing("bad");
            let index = VectorIndex::new(Arc::new(embedder), IndexKind::Flat);
            index.add_documents(&docs(&["a"])).await.unwrap();
            assert!(index.add_documents(&docs(&["bb", "bad"])).await.is_err());
            assert_eq!(index.len(), 1);
        }

        #[tokio::test]
        async fn test_rerank_reorders_wider_pool() {
            let mut q = vec![0.0; 8];
            q[1] = 1.0;
            q[2] = 1.0;
            let embedder = MockEmbedding::new(8).with_vector("q", q);
            let scorer = Arc::new(MockScorer::new().with_score("a", 0.2).with_score("bb", 0.9));
            let index = VectorIndex::new(Arc::new(embedder), IndexKind::Flat).with_scorer(scorer.clone());
            index.add_documents(&docs(&["a", "bb", "ccc"])).await.unwrap();

            assert_eq!(index.query("q", 1, false).await, docs(&["a"]));
            assert_eq!(index.query("q", 1, true).await, docs(&["bb"]));
            assert_eq!(scorer.call_count(), 1);
        }

        #[tokio::test]
        async fn test_reranked_results_descend_by_score() {
            let scorer = Arc::new(
                MockScorer::new()
                    .with_score("a", 0.1)
                    .with_score("bb", 0.7)
                    .with_score("ccc", 0.4)
                    .with_score("dddd", 0.9)
                    .with_score("eeeee", 0.3),
            );
            let index =
                VectorIndex::new(Arc::new(MockEmbedding::new(8)), IndexKind::Flat).with_scorer(scorer.clone());
            index
                .add_documents(&docs(&["a", "bb", "ccc", "dddd", "eeeee"]))
                .await
                .unwrap();

            let hits = index.query("q", 3, true).await;
            assert_eq!(hits, docs(&["dddd", "bb", "ccc"]));
            let score = |d: &String| match d.as_str() {
                "a" => 0.1,
                "bb" => 0.7,
                "ccc" => 0.4,
                "dddd" => 0.9,
                _ => 0.3,
            };
            assert!(hits.windows(2).all(|w| score(&w[0]) >= score(&w[1])));
        }

        #[tokio::test]
        async fn test_huge_top_k_with_rerank() {
            let scorer = Arc::new(MockScorer::new());
            let index =
                VectorIndex::new(Arc::new(MockEmbedding::new(8)), IndexKind::Flat).with_scorer(scorer.clone());
            index.add_documents(&docs(&["a", "bb", "ccc"])).await.unwrap();
            assert_eq!(index.query("q", usize::MAX, true).await.len(), 3);
            assert_eq!(scorer.call_count(), 1);
        }

        #[tokio::test]
        async fn test_single_candidate_is_not_reranked() {
            let scorer = Arc::new(MockScorer::new());
            let index =
                VectorIndex::new(Arc::new(MockEmbedding::new(4)), IndexKind::Flat).with_scorer(scorer.clone());
            index.add_documents(&docs(&["a"])).await.unwrap();
            assert_eq!(index.query("b", 3, true).await, docs(&["a"]));
            assert_eq!(scorer.call_count(), 0);
        }

        #[tokio::test]
        async fn test_accelerated_kind_keeps_contract() {
            let index = VectorIndex::new(Arc::new(MockEmbedding::new(8)), IndexKind::Accelerated);
            index.add_documents(&docs(&["a", "bb", "ccc"])).await.unwrap();
            assert!(matches!(index.backend_name(), Some("flat") | Some("parallel")));
            assert_eq!(index.query("xx", 1, false).await, docs(&["bb"]));
        }
    }

    // ── Remote embedding into the index ────────────────────────

    mod remote_index {
        use super::*;
        use kouri_llm::RemoteEmbedding;
        use std::time::Duration;
        use wiremock::matchers::{body_partial_json, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        fn embedder(server: &MockServer) -> RemoteEmbedding {
            RemoteEmbedding::new("sk-test".into(), "bge-m3".into())
                .with_base_url(server.uri())
                .with_retries(1, Duration::from_millis(1))
                .with_fallback_dims(8)
        }

        fn body(v: &[f32]) -> serde_json::Value {
            serde_json::json!({ "data": [{ "embedding": v, "index": 0 }] })
        }

        #[tokio::test]
        async fn test_one_failed_embedding_still_indexes_batch() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(body_partial_json(serde_json::json!({ "input": "bad" })))
                .respond_with(ResponseTemplate::new(503))
                .mount(&server)
                .await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(200).set_body_json(body(&[0.0, 1.0, 0.0])))
                .mount(&server)
                .await;

            let index = VectorIndex::new(Arc::new(embedder(&server)), IndexKind::Flat);
            let docs = vec!["good".to_string(), "bad".to_string(), "fine".to_string()];
            assert_eq!(index.add_documents(&docs).await.unwrap(), 3);
            assert_eq!(index.len(), 3);
            assert_eq!(index.dimension(), Some(3));
        }

        #[tokio::test]
        async fn test_failed_first_batch_does_not_fix_width() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(503))
                .up_to_n_times(2)
                .mount(&server)
                .await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(200).set_body_json(body(&[0.0, 1.0, 0.0])))
                .mount(&server)
                .await;

            let index = VectorIndex::new(Arc::new(embedder(&server)), IndexKind::Flat);
            let first = vec!["第一条".to_string()];
            assert!(index.add_documents(&first).await.is_err());
            assert!(!index.is_initialized());

            let second = vec!["第二条".to_string()];
            assert_eq!(index.add_documents(&second).await.unwrap(), 1);
            assert_eq!(index.dimension(), Some(3));
        }
    }

    // ── Fact store ─────────────────────────────────────────────

    mod fact_store {
        use super::*;

        #[test]
        fn test_open_creates_empty_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("nested").join("memory.json");
            let store = MemoryStore::open(&path).unwrap();
            assert!(store.is_empty());
            assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "{}");
        }

        #[test]
        fn test_facts_persist_across_reopen() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("memory.json");
            {
                let store = MemoryStore::open(&path).unwrap();
                store.set("生日", "三月").unwrap();
                store.set("宠物", "一只猫").unwrap();
            }
            let store = MemoryStore::open(&path).unwrap();
            assert_eq!(store.get("生日").as_deref(), Some("三月"));
            let mut pairs = store.get_key_value_pairs();
            pairs.sort();
            assert_eq!(pairs, vec!["宠物:一只猫".to_string(), "生日:三月".to_string()]);
        }

        #[test]
        fn test_corrupted_file_is_moved_aside() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("memory.json");
            std::fs::write(&path, "not json at all").unwrap();
            let store = MemoryStore::open(&path).unwrap();
            assert!(store.is_empty());
            let aside = std::fs::read_dir(dir.path())
                .unwrap()
                .filter_map(|e| e.ok())
                .any(|e| e.file_name().to_string_lossy().contains("corrupt-"));
            assert!(aside);
        }

        #[test]
        fn test_hooks_run_in_order() {
            let dir = tempfile::tempdir().unwrap();
            let store = MemoryStore::open(dir.path().join("memory.json")).unwrap();
            let seen = Arc::new(Mutex::new(Vec::new()));
            for tag in ["first", "second"] {
                let seen = seen.clone();
                store.add_memory_hook(Arc::new(move |k: &str, v: &str| {
                    seen.lock().push(format!("{}:{}:{}", tag, k, v));
                }));
            }
            store.set("爱好", "画画").unwrap();
            assert_eq!(*seen.lock(), vec!["first:爱好:画画", "second:爱好:画画"]);
        }

        #[test]
        fn test_hook_writing_to_store_does_not_recurse() {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(MemoryStore::open(dir.path().join("memory.json")).unwrap());
            let calls = Arc::new(AtomicUsize::new(0));
            let (hook_store, hook_calls) = (store.clone(), calls.clone());
            store.add_memory_hook(Arc::new(move |_k: &str, v: &str| {
                hook_calls.fetch_add(1, Ordering::SeqCst);
                hook_store.set("回声", v).unwrap();
            }));

            store.set("原始", "内容").unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(store.get("回声").as_deref(), Some("内容"));
        }

        #[test]
        fn test_remember_sanitizes_and_dedups() {
            let dir = tempfile::tempdir().unwrap();
            let store = MemoryStore::open(dir.path().join("memory.json")).unwrap();
            assert!(store.remember(" 生日 ", "三月").unwrap());
            assert!(!store.remember("生日", "四月").unwrap());
            assert!(!store.remember("出生月份", "三月").unwrap());
            assert!(store.remember("账号", "password=abc123").unwrap());
            assert_eq!(store.get("账号").as_deref(), Some("[REDACTED]"));
            assert!(!store.remember("空", "   ").unwrap());
            assert_eq!(store.len(), 2);
        }

        #[test]
        fn test_clear_empties_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("memory.json");
            let store = MemoryStore::open(&path).unwrap();
            store.set("a", "b").unwrap();
            store.clear().unwrap();
            assert!(MemoryStore::open(&path).unwrap().is_empty());
        }
    }

    // ── Journals ───────────────────────────────────────────────

    mod journals {
        use super::*;

        #[test]
        fn test_raw_log_lines_and_truncate() {
            let dir = tempfile::tempdir().unwrap();
            let log = ShortTermLog::new(dir.path().join("u1").join("short_memory.txt"));
            assert_eq!(log.line_count().unwrap(), 0);
            log.append_exchange("你好\n在吗", "在的").unwrap();
            assert_eq!(log.line_count().unwrap(), 2);
            assert_eq!(log.read().unwrap(), "用户: 你好 在吗\nAI: 在的\n");
            log.truncate().unwrap();
            assert_eq!(log.line_count().unwrap(), 0);
        }

        #[test]
        fn test_buffer_cap_keeps_newest_entries() {
            let dir = tempfile::tempdir().unwrap();
            let buffer = LongTermBuffer::new(dir.path().join("long_memory_buffer.txt"));
            for i in 0..10 {
                buffer.append("u1", &format!("总结{}", i)).unwrap();
            }
            assert!(!buffer.enforce_cap(1024 * 1024, 3).unwrap());
            assert!(buffer.enforce_cap(10, 3).unwrap());
            let entries = buffer.entries().unwrap();
            assert_eq!(entries.len(), 3);
            assert!(entries[0].ends_with("[用户ID:u1] 总结7"));
            assert!(entries[2].ends_with("总结9"));
        }
    }

    // ── Summarizer ─────────────────────────────────────────────

    mod summarizer {
        use super::*;

        struct Fixture {
            _dir: tempfile::TempDir,
            raw: ShortTermLog,
            buffer: LongTermBuffer,
            store: MemoryStore,
        }

        fn fixture() -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let raw = ShortTermLog::new(dir.path().join("u1").join("short_memory.txt"));
            let buffer = LongTermBuffer::new(dir.path().join("u1").join("long_memory_buffer.txt"));
            let store = MemoryStore::open(dir.path().join("memory.json")).unwrap();
            raw.append_exchange("我超级喜欢猫", "猫咪很可爱").unwrap();
            raw.append_exchange("记住我讨厌下雨", "好的记住了").unwrap();
            Fixture {
                _dir: dir,
                raw,
                buffer,
                store,
            }
        }

        fn target(f: &Fixture) -> SummaryTarget<'_> {
            SummaryTarget {
                user_id: "u1",
                raw_log: &f.raw,
                buffer: &f.buffer,
                store: Some(&f.store),
            }
        }

        #[tokio::test]
        async fn test_retries_sentinel_then_commits() {
            let f = fixture();
            let provider = Arc::new(MockProvider::new("m").with_response("请稍后再试").with_response("喜欢猫，讨厌下雨"));
            let summarizer = Summarizer::new(provider.clone(), "m", SummarizerConfig::default());

            let summary = summarizer.consolidate(target(&f)).await.unwrap();
            assert_eq!(summary.as_deref(), Some("喜欢猫，讨厌下雨"));
            assert_eq!(provider.recorded_requests().lock().len(), 2);

            let entries = f.buffer.entries().unwrap();
            assert_eq!(entries.len(), 1);
            assert!(entries[0].ends_with("[用户ID:u1] 喜欢猫，讨厌下雨"));
            assert_eq!(f.raw.line_count().unwrap(), 0);
            assert!(f.store.get_key_value_pairs()[0].ends_with(":喜欢猫，讨厌下雨"));
        }

        #[tokio::test]
        async fn test_exhausted_attempts_touch_nothing() {
            let f = fixture();
            let provider = Arc::new(
                MockProvider::new("m")
                    .with_error("Connection error")
                    .with_response("无法总结")
                    .with_error("Connection error"),
            );
            let summarizer = Summarizer::new(provider.clone(), "m", SummarizerConfig::default());

            assert!(summarizer.consolidate(target(&f)).await.is_err());
            assert_eq!(provider.recorded_requests().lock().len(), 3);
            assert_eq!(f.raw.line_count().unwrap(), 4);
            assert!(f.buffer.entries().unwrap().is_empty());
            assert!(f.store.is_empty());
        }

        #[tokio::test]
        async fn test_prompt_carries_dialogue_and_priorities() {
            let f = fixture();
            let provider = Arc::new(MockProvider::new("m").with_response("喜欢猫"));
            let summarizer = Summarizer::new(provider.clone(), "summary-model", SummarizerConfig::default());
            summarizer.consolidate(target(&f)).await.unwrap();

            let recorded = provider.recorded_requests();
            let recorded = recorded.lock();
            assert_eq!(recorded[0].model, "summary-model");
            let prompt = &recorded[0].messages[0].content;
            assert!(prompt.contains("强烈情感"));
            assert!(prompt.contains("用户: 我超级喜欢猫"));
        }

        #[tokio::test]
        async fn test_thirty_line_log_is_consolidated() {
            let dir = tempfile::tempdir().unwrap();
            let raw = ShortTermLog::new(dir.path().join("short_memory.txt"));
            let buffer = LongTermBuffer::new(dir.path().join("long_memory_buffer.txt"));
            for i in 0..15 {
                raw.append_exchange(&format!("第{}句", i), "嗯").unwrap();
            }
            assert_eq!(raw.line_count().unwrap(), 30);

            let provider = Arc::new(MockProvider::new("m").with_response("聊了十五轮"));
            let summarizer = Summarizer::new(provider, "m", SummarizerConfig::default());
            assert!(summarizer.should_run(&raw));

            let target = SummaryTarget {
                user_id: "u1",
                raw_log: &raw,
                buffer: &buffer,
                store: None,
            };
            assert_eq!(summarizer.consolidate(target).await.unwrap().as_deref(), Some("聊了十五轮"));
            assert_eq!(raw.line_count().unwrap(), 0);
            assert_eq!(buffer.entries().unwrap().len(), 1);
            assert!(!summarizer.should_run(&raw));
        }

        #[tokio::test]
        async fn test_exchange_logged_during_call_survives() {
            let f = fixture();
            let provider = Arc::new(
                MockProvider::new("m")
                    .with_response("喜欢猫")
                    .with_delay(std::time::Duration::from_millis(200)),
            );
            let summarizer = Summarizer::new(provider, "m", SummarizerConfig::default());

            let late_writer = async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                ShortTermLog::new(f.raw.path()).append_exchange("刚说的话", "收到").unwrap();
            };
            let (summary, ()) = tokio::join!(summarizer.consolidate(target(&f)), late_writer);

            assert_eq!(summary.unwrap().as_deref(), Some("喜欢猫"));
            assert_eq!(f.raw.read().unwrap(), "用户: 刚说的话\nAI: 收到\n");
            assert_eq!(f.buffer.entries().unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_empty_log_is_skipped() {
            let dir = tempfile::tempdir().unwrap();
            let raw = ShortTermLog::new(dir.path().join("short_memory.txt"));
            let buffer = LongTermBuffer::new(dir.path().join("long_memory_buffer.txt"));
            let provider = Arc::new(MockProvider::new("m"));
            let summarizer = Summarizer::new(provider.clone(), "m", SummarizerConfig::default());
            let out = summarizer
                .consolidate(SummaryTarget {
                    user_id: "u1",
                    raw_log: &raw,
                    buffer: &buffer,
                    store: None,
                })
                .await
                .unwrap();
            assert!(out.is_none());
            assert!(provider.recorded_requests().lock().is_empty());
        }

        #[test]
        fn test_threshold_in_lines() {
            let f = fixture();
            let config = SummarizerConfig {
                threshold_pairs: 3,
                ..Default::default()
            };
            let summarizer = Summarizer::new(Arc::new(MockProvider::new("m")), "m", config);
            assert!(!summarizer.should_run(&f.raw));
            f.raw.append_exchange("第三轮", "好").unwrap();
            assert!(summarizer.should_run(&f.raw));
        }
    }

    // ── Index fed by the store ─────────────────────────────────

    mod store_feeds_index {
        use super::*;

        #[tokio::test]
        async fn test_bulk_seed_from_store() {
            let dir = tempfile::tempdir().unwrap();
            let store = MemoryStore::open(dir.path().join("memory.json")).unwrap();
            store.set("喜欢的水果", "苹果").unwrap();
            store.set("生日", "三月十二号").unwrap();

            let index = VectorIndex::new(Arc::new(kouri_llm::LocalEmbedding::new(128)), IndexKind::Flat);
            index.add_documents(&store.get_key_value_pairs()).await.unwrap();
            assert_eq!(index.len(), 2);
            let hits = index.query("喜欢什么水果", 1, false).await;
            assert_eq!(hits, vec!["喜欢的水果:苹果".to_string()]);
        }
    }
}
