//! Integration tests for pipe iteration.

#[cfg(test)]
mod tests {
    use crate::config::{ExtractConfig, NextItemMode};
    use crate::errors::{ExtractError, ExtractionKind};
    use crate::items::{Item, ItemIterSource, Meta, Output, Pull, Source};
    use crate::iterator::PipeIterator;
    use crate::pipe::{ItemContext, Pipe, Stage};
    use crate::testing::{
        collect_by_pipe, collect_values, gated_stage, numbers_pipe, test_config, CountingGate,
        FailingSource, RecordingSource,
    };
    use mockall::mock;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    mock! {
        pub TestSource {}

        impl Source<i64> for TestSource {
            fn next_item(&mut self) -> anyhow::Result<Pull<i64>>;
            fn close(&mut self) -> anyhow::Result<()>;
        }
    }

    fn fifo_config() -> ExtractConfig {
        test_config().with_next_item_mode(NextItemMode::Fifo)
    }

    fn expanding_pipe() -> Pipe<i64> {
        numbers_pipe("pages", vec![1, 2]).with_stage(Stage::flat_map("rows", |x: i64| vec![x * 10, x * 10 + 1]))
    }

    fn two_roots() -> Vec<Arc<Pipe<i64>>> {
        vec![
            Arc::new(numbers_pipe("a", vec![1, 2, 3])),
            Arc::new(numbers_pipe("b", vec![10, 20])),
        ]
    }

    #[test]
    fn test_single_source_yields_in_order() {
        let pipe = numbers_pipe("numbers", (1..=5).collect());
        let mut iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();

        let mut values = Vec::new();
        while let Some(finished) = iter.next_item().unwrap() {
            assert_eq!(finished.pipe_name(), "numbers");
            values.push(finished.item);
        }
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
        assert!(iter.next_item().unwrap().is_none());
        assert!(iter.is_closed());
    }

    #[test]
    fn test_stages_run_in_order() {
        let pipe = numbers_pipe("numbers", vec![1, 2, 3])
            .with_stage(Stage::map("double", |x| x * 2))
            .with_stage(Stage::map("inc", |x| x + 1));
        let iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();
        assert_eq!(collect_values(iter).unwrap(), vec![3, 5, 7]);
    }

    #[test]
    fn test_skipped_items_are_dropped() {
        let pipe = numbers_pipe("numbers", vec![1, 2, 3, 4]).with_stage(Stage::filter("odd", |x: &i64| x % 2 == 1));
        let iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();
        assert_eq!(collect_values(iter).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_round_robin_interleaves_roots() {
        let iter = PipeIterator::from_pipes(&two_roots(), true, &test_config()).unwrap();
        assert_eq!(collect_values(iter).unwrap(), vec![1, 10, 2, 20, 3]);
    }

    #[test]
    fn test_fifo_drains_newest_source_first() {
        let iter = PipeIterator::from_pipes(&two_roots(), true, &fifo_config()).unwrap();
        assert_eq!(collect_values(iter).unwrap(), vec![1, 2, 3, 10, 20]);
    }

    #[test]
    fn test_fifo_flattens_depth_first() {
        let iter = PipeIterator::from_pipe(&expanding_pipe(), &fifo_config()).unwrap();
        assert_eq!(collect_values(iter).unwrap(), vec![10, 11, 20, 21]);
    }

    #[test]
    fn test_round_robin_interleaves_nested_sequences() {
        let iter = PipeIterator::from_pipe(&expanding_pipe(), &test_config()).unwrap();
        assert_eq!(collect_values(iter).unwrap(), vec![10, 20, 11, 21]);
    }

    #[test]
    fn test_round_robin_switches_to_fifo_past_threshold() {
        let config = test_config().with_fifo_switch_threshold(1);
        let mut iter = PipeIterator::from_pipe(&expanding_pipe(), &config).unwrap();

        let mut values = Vec::new();
        while let Some(finished) = iter.next_item().unwrap() {
            values.push(finished.item);
        }
        assert_eq!(values, vec![10, 11, 20, 21]);
        assert!(iter.stats().fifo_switches > 0);
    }

    #[test]
    fn test_fifo_switch_defaults_to_max_parallel_items() {
        let config = test_config().with_max_parallel_items(1);
        let mut iter = PipeIterator::from_pipe(&expanding_pipe(), &config).unwrap();

        let mut values = Vec::new();
        while let Some(finished) = iter.next_item().unwrap() {
            values.push(finished.item);
        }
        assert_eq!(values, vec![10, 11, 20, 21]);
        assert!(iter.stats().fifo_switches > 0);
    }

    #[test]
    fn test_backpressure_limits_running_tasks() {
        let gate = Arc::new(CountingGate::new());
        let pipe = numbers_pipe("numbers", (0..20).collect()).with_stage(gated_stage(
            "gated",
            Arc::clone(&gate),
            Duration::from_millis(10),
        ));
        let config = test_config().with_workers(4).with_max_parallel_items(3);
        let iter = PipeIterator::from_pipe(&pipe, &config).unwrap();

        let mut values = collect_values(iter).unwrap();
        values.sort_unstable();
        assert_eq!(values, (0..20).collect::<Vec<_>>());
        assert_eq!(gate.entered(), 20);
        assert!(gate.peak() <= 3, "peak was {}", gate.peak());
    }

    #[test]
    fn test_deferred_tasks_run_in_parallel() {
        let sleepy = |name: &str, value: i64| {
            Arc::new(numbers_pipe(name, vec![value]).with_stage(Stage::defer("sleep", |x| {
                std::thread::sleep(Duration::from_millis(50));
                Ok(x)
            })))
        };
        let config = test_config().with_workers(2);

        let started = Instant::now();
        let iter = PipeIterator::from_pipes(&[sleepy("a", 1), sleepy("b", 2)], true, &config).unwrap();
        let mut values = collect_values(iter).unwrap();
        let elapsed = started.elapsed();

        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);
        assert!(elapsed < Duration::from_millis(95), "took {elapsed:?}");
    }

    #[test]
    fn test_async_deferred_tasks() {
        let pipe = numbers_pipe("numbers", vec![1, 2, 3]).with_stage(Stage::defer_async("fetch", |x| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(x * 100)
        }));
        let iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();

        let mut values = collect_values(iter).unwrap();
        values.sort_unstable();
        assert_eq!(values, vec![100, 200, 300]);
    }

    #[test]
    fn test_stream_items_become_sources() {
        let pipe: Pipe<i64> = Pipe::from_factory("stream", || {
            let items = vec![Item::stream(futures::stream::iter(vec![1_i64, 2, 3]))];
            Ok(Box::new(ItemIterSource::new(items.into_iter())) as Box<dyn Source<i64>>)
        })
        .with_stage(Stage::map("inc", |x| x + 1));
        let iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();
        assert_eq!(collect_values(iter).unwrap(), vec![2, 3, 4]);
    }

    #[test]
    fn test_stream_keeps_element_order() {
        for _ in 0..20 {
            let pipe: Pipe<i64> = Pipe::from_factory("feed", || {
                let items = vec![Item::stream(futures::stream::iter(1_i64..=50))];
                Ok(Box::new(ItemIterSource::new(items.into_iter())) as Box<dyn Source<i64>>)
            });
            let iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();
            assert_eq!(collect_values(iter).unwrap(), (1..=50).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_stream_error_is_tagged_as_generator() {
        let pipe: Pipe<i64> = Pipe::from_factory("feed", || {
            let stream = futures::stream::iter(vec![Ok(1_i64), Err(anyhow::anyhow!("feed dropped"))]);
            let items = vec![Item::try_stream(stream)];
            Ok(Box::new(ItemIterSource::new(items.into_iter())) as Box<dyn Source<i64>>)
        });
        let mut iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();

        assert_eq!(iter.next_item().unwrap().map(|f| f.item), Some(1));
        let err = iter.next_item().unwrap_err();
        assert!(matches!(
            err,
            ExtractError::ResourceExtraction {
                kind: ExtractionKind::Generator,
                ..
            }
        ));
        assert!(iter.is_closed());
    }

    #[test]
    fn test_fork_yields_parent_and_child() {
        let users = Arc::new(numbers_pipe("users", vec![1, 2]));
        let posts = Arc::new(Pipe::transformer("posts", Arc::clone(&users), Stage::map("posts", |x| x * 10)));

        let iter = PipeIterator::from_pipes(&[users, posts], true, &test_config()).unwrap();
        let mut items = collect_by_pipe(iter).unwrap();
        items.sort();
        assert_eq!(
            items,
            vec![
                ("posts".to_string(), 10),
                ("posts".to_string(), 20),
                ("users".to_string(), 1),
                ("users".to_string(), 2),
            ]
        );
    }

    #[test]
    fn test_fork_without_yield_parents() {
        let users = Arc::new(numbers_pipe("users", vec![1, 2]));
        let posts = Arc::new(Pipe::transformer("posts", Arc::clone(&users), Stage::map("posts", |x| x * 10)));

        let iter = PipeIterator::from_pipes(&[users, posts], false, &test_config()).unwrap();
        let items = collect_by_pipe(iter).unwrap();
        assert_eq!(items, vec![("posts".to_string(), 10), ("posts".to_string(), 20)]);
    }

    #[test]
    fn test_fork_to_grandchild() {
        let root = Arc::new(numbers_pipe("root", vec![1]));
        let mid = Arc::new(Pipe::transformer("mid", root, Stage::map("mid", |x| x + 1)));
        let leaf = Arc::new(Pipe::transformer("leaf", Arc::clone(&mid), Stage::map("leaf", |x| x * 10)));

        let iter = PipeIterator::from_pipes(&[mid, leaf], true, &test_config()).unwrap();
        let mut items = collect_by_pipe(iter).unwrap();
        items.sort();
        assert_eq!(items, vec![("leaf".to_string(), 20), ("mid".to_string(), 2)]);
    }

    fn forked_arcs(copy_on_fork: bool) -> Vec<Arc<Vec<i64>>> {
        let users: Arc<Pipe<Arc<Vec<i64>>>> = Arc::new(Pipe::from_iter("users", vec![Arc::new(vec![1, 2])]));
        let a = Arc::new(Pipe::transformer("a", Arc::clone(&users), Stage::map("a", |x| x)));
        let b = Arc::new(Pipe::transformer("b", Arc::clone(&users), Stage::map("b", |x| x)));
        let config = test_config().with_copy_on_fork(copy_on_fork);

        let iter = PipeIterator::from_pipes(&[users, a, b], true, &config).unwrap();
        collect_values(iter).unwrap()
    }

    #[test]
    fn test_fork_shares_items_by_default() {
        let items = forked_arcs(false);
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|item| Arc::ptr_eq(item, &items[0])));
    }

    #[test]
    fn test_copy_on_fork_copies_items() {
        let items = forked_arcs(true);
        assert_eq!(items.len(), 3);
        assert!(!Arc::ptr_eq(&items[0], &items[1]));
        assert!(!Arc::ptr_eq(&items[0], &items[2]));
        assert!(!Arc::ptr_eq(&items[1], &items[2]));
        assert!(items.iter().all(|item| **item == vec![1, 2]));
    }

    #[test]
    fn test_from_pipe_joins_dependent_pipe() {
        let root = Arc::new(numbers_pipe("root", vec![1, 2]));
        let leaf = Pipe::transformer("leaf", root, Stage::map("leaf", |x| x * 3));

        let iter = PipeIterator::from_pipe(&leaf, &test_config()).unwrap();
        let items = collect_by_pipe(iter).unwrap();
        assert_eq!(items, vec![("leaf".to_string(), 3), ("leaf".to_string(), 6)]);
    }

    #[test]
    fn test_meta_propagates_to_later_stages() {
        let tag = Stage::new("tag", |x: i64, _ctx: &ItemContext<'_>| {
            Ok(Output::value_with_meta(x, serde_json::json!({"table": format!("t{x}")})))
        });
        let read = Stage::new("read", |x: i64, ctx: &ItemContext<'_>| {
            let table = ctx.meta.and_then(|m| m["table"].as_str()).unwrap_or_default();
            anyhow::ensure!(table == format!("t{x}"), "missing meta");
            Ok(Output::value(x))
        });
        let pipe = numbers_pipe("numbers", vec![1, 2]).with_stage(tag).with_stage(read);
        let mut iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();

        let first = iter.next_item().unwrap().unwrap();
        let expected: Meta = serde_json::json!({"table": "t1"});
        assert_eq!(first.meta, Some(expected));
    }

    #[test]
    fn test_transform_error_is_tagged_and_closes() {
        let pipe = numbers_pipe("numbers", vec![1, 2, 3]).with_stage(Stage::try_map("check", |x: i64| {
            anyhow::ensure!(x != 2, "bad row {x}");
            Ok(x)
        }));
        let mut iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();

        assert_eq!(iter.next_item().unwrap().map(|f| f.item), Some(1));
        let err = iter.next_item().unwrap_err();
        let ExtractError::ResourceExtraction {
            pipe, step_name, kind, ..
        } = &err
        else {
            panic!("expected a resource extraction error, got {err}");
        };
        assert_eq!(pipe, "numbers");
        assert_eq!(step_name, "check");
        assert_eq!(*kind, ExtractionKind::Transform);

        assert!(iter.is_closed());
        assert!(iter.next_item().unwrap().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_extract_errors_pass_through_unchanged() {
        let pipe = numbers_pipe("numbers", vec![1]).with_stage(Stage::try_map("raise", |_x: i64| {
            Err(ExtractError::create_pipe("other", "raised by stage").into())
        }));
        let mut iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();
        let err = iter.next_item().unwrap_err();
        assert!(matches!(err, ExtractError::CreatePipe { ref pipe, .. } if pipe == "other"));
    }

    #[test]
    fn test_deferred_error_is_tagged() {
        let pipe = numbers_pipe("numbers", vec![1]).with_stage(Stage::defer("remote", |_x: i64| -> anyhow::Result<i64> {
            anyhow::bail!("timeout")
        }));
        let mut iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();
        let err = iter.next_item().unwrap_err();
        assert!(matches!(
            err,
            ExtractError::ResourceExtraction {
                kind: ExtractionKind::Future,
                ref step_name,
                ..
            } if step_name == "remote"
        ));
    }

    #[test]
    fn test_source_error_is_tagged() {
        let pipe = Pipe::from_source("broken", FailingSource::new(vec![1_i64], "connection reset"));
        let mut iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();

        assert_eq!(iter.next_item().unwrap().map(|f| f.item), Some(1));
        let err = iter.next_item().unwrap_err();
        assert!(matches!(
            err,
            ExtractError::ResourceExtraction {
                kind: ExtractionKind::Generator,
                ..
            }
        ));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_pending_source_is_polled_again() {
        let mut calls = 0;
        let source = crate::items::FnSource::new(move || -> anyhow::Result<Pull<i64>> {
            calls += 1;
            Ok(match calls {
                1 | 2 => Pull::Pending,
                3 => Pull::value(7_i64),
                _ => Pull::Exhausted,
            })
        });
        let pipe = Pipe::from_source("polled", source);
        let iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();
        assert_eq!(collect_values(iter).unwrap(), vec![7]);
    }

    #[test]
    fn test_close_is_idempotent_and_closes_sources() {
        let (source, log) = RecordingSource::new(vec![1_i64, 2, 3]);
        let pipe = Pipe::from_source("recorded", source);
        let mut iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();

        assert_eq!(iter.next_item().unwrap().map(|f| f.item), Some(1));
        iter.close();
        iter.close();
        assert_eq!(log.closes(), 1);
        assert!(iter.next_item().unwrap().is_none());
        assert_eq!(iter.sources_count(), 0);
    }

    #[test]
    fn test_drop_closes_sources() {
        let mut source = MockTestSource::new();
        source.expect_next_item().times(1).returning(|| Ok(Pull::value(1)));
        source.expect_close().times(1).returning(|| Ok(()));

        let pipe = Pipe::from_source("mocked", source);
        let mut iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();
        assert_eq!(iter.next_item().unwrap().map(|f| f.item), Some(1));
        drop(iter);
    }

    #[test]
    fn test_close_error_is_not_raised() {
        let mut source = MockTestSource::new();
        source.expect_next_item().returning(|| Ok(Pull::value(1)));
        source
            .expect_close()
            .times(1)
            .returning(|| Err(anyhow::anyhow!("already gone")));

        let pipe = Pipe::from_source("mocked", source);
        let mut iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();
        assert!(iter.next_item().unwrap().is_some());
        iter.close();
        assert!(iter.is_closed());
    }

    #[test]
    fn test_scope_closes_iterator() {
        let (source, log) = RecordingSource::new(vec![1_i64, 2]);
        let pipe = Pipe::from_source("scoped", source);
        let iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();

        let first = iter.scope(|it| it.next_item().unwrap().map(|f| f.item));
        assert_eq!(first, Some(1));
        assert_eq!(log.closes(), 1);
    }

    #[test]
    fn test_one_shot_pipe_extracts_once() {
        let (source, _log) = RecordingSource::new(vec![1_i64]);
        let pipe = Pipe::from_source("once", source);
        assert!(PipeIterator::from_pipe(&pipe, &test_config()).is_ok());
        let err = PipeIterator::from_pipe(&pipe, &test_config()).err().unwrap();
        assert!(matches!(err, ExtractError::PipeGenInvalid { .. }));
    }

    #[test]
    fn test_reevaluable_pipe_extracts_twice() {
        let pipe = numbers_pipe("numbers", vec![1, 2]);
        for _ in 0..2 {
            let iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();
            assert_eq!(collect_values(iter).unwrap(), vec![1, 2]);
        }
    }

    #[test]
    fn test_configuration_errors_fail_fast() {
        let unbound = Arc::new(Pipe::<i64>::parametrized("pages", "page_source", |_args: &Meta| {
            anyhow::bail!("unused")
        }));
        let err = PipeIterator::from_pipes(&[unbound], true, &test_config()).err().unwrap();
        assert!(matches!(err, ExtractError::ParametrizedResourceUnbound { .. }));

        let empty = Pipe::<i64>::new("empty");
        let err = PipeIterator::from_pipe(&empty, &test_config()).err().unwrap();
        assert!(matches!(err, ExtractError::PipeNotBoundToData { .. }));

        let pipe = numbers_pipe("numbers", vec![1]);
        let err = PipeIterator::from_pipe(&pipe, &test_config().with_workers(0)).err().unwrap();
        assert!(matches!(err, ExtractError::InvalidConfig(_)));
    }

    #[test]
    fn test_stats_and_metrics() {
        let pipe = expanding_pipe().with_stage(Stage::defer("slow", Ok));
        let mut iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();
        let mut count = 0;
        while iter.next_item().unwrap().is_some() {
            count += 1;
        }

        let stats = *iter.stats();
        assert_eq!(count, 4);
        assert_eq!(stats.items_yielded, 4);
        assert_eq!(stats.sources_added, 3);
        assert_eq!(stats.sources_exhausted, 3);
        assert_eq!(stats.tasks_submitted, 4);
        assert_eq!(iter.pool_metrics().completed(), 4);
    }

    #[tokio::test]
    async fn test_usable_inside_async_context() {
        let pipe = numbers_pipe("numbers", vec![1, 2]).with_stage(Stage::defer("slow", Ok));
        let iter = PipeIterator::from_pipe(&pipe, &test_config()).unwrap();
        let mut values = collect_values(iter).unwrap();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);
    }
}
