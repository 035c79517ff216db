// tests/property/purge_equivalence_test.rs

//! Property-based tests for purging
//! Tests that a sequence of writes, rewrites with changed tags, tag purges and
//! wildcard path purges removes exactly what a simple model predicts, whichever
//! index strategy is configured

use crate::test_helpers::{TestContext, body, config_with_strategy};
use pixelcache::config::IndexStrategyKind;
use pixelcache::core::cache::key::TransformParams;
use proptest::prelude::*;
use std::collections::BTreeSet;

const TAGS: [&str; 4] = ["red", "green", "blue", "grey"];
const DIRS: [&str; 2] = ["a", "b"];

#[derive(Debug, Clone)]
struct Item {
    dir: &'static str,
    width: u32,
    tags: Vec<&'static str>,
    large: bool,
}

impl Item {
    fn path(&self, i: usize) -> String {
        format!("/{}/{i}.jpg", self.dir)
    }

    fn params(&self) -> TransformParams {
        TransformParams::new().with("width", self.width)
    }
}

#[derive(Debug, Clone, Copy)]
enum PathGlob {
    UnderA,
    UnderB,
    StartsWithA1,
    NamedThree,
}

impl PathGlob {
    fn pattern(self) -> &'static str {
        match self {
            PathGlob::UnderA => "/a/*",
            PathGlob::UnderB => "/b/*",
            PathGlob::StartsWithA1 => "/a/1*",
            PathGlob::NamedThree => "/*/3.jpg",
        }
    }

    fn matches(self, path: &str) -> bool {
        match self {
            PathGlob::UnderA => path.starts_with("/a/"),
            PathGlob::UnderB => path.starts_with("/b/"),
            PathGlob::StartsWithA1 => path.starts_with("/a/1"),
            PathGlob::NamedThree => path.ends_with("/3.jpg"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Purge {
    Tag(&'static str),
    Path(PathGlob),
}

fn tag_set() -> impl Strategy<Value = Vec<&'static str>> {
    prop::sample::subsequence(TAGS.to_vec(), 0..=2)
}

fn items() -> impl Strategy<Value = Vec<Item>> {
    prop::collection::vec(
        (
            prop::sample::select(DIRS.to_vec()),
            1u32..4000,
            tag_set(),
            any::<bool>(),
        )
            .prop_map(|(dir, width, tags, large)| Item {
                dir,
                width,
                tags,
                large,
            }),
        1..16,
    )
}

/// For some items, the tags they are written with a second time.
fn rewrites(len: usize) -> impl Strategy<Value = Vec<Option<Vec<&'static str>>>> {
    prop::collection::vec(prop::option::weighted(0.4, tag_set()), len)
}

fn purges() -> impl Strategy<Value = Vec<Purge>> {
    let purge = prop_oneof![
        prop::sample::select(TAGS.to_vec()).prop_map(Purge::Tag),
        prop::sample::select(vec![
            PathGlob::UnderA,
            PathGlob::UnderB,
            PathGlob::StartsWithA1,
            PathGlob::NamedThree,
        ])
        .prop_map(Purge::Path),
    ];
    prop::collection::vec(purge, 1..4)
}

fn scenario() -> impl Strategy<Value = (Vec<Item>, Vec<Option<Vec<&'static str>>>, Vec<Purge>)> {
    items().prop_flat_map(|items| {
        let len = items.len();
        (Just(items), rewrites(len), purges())
    })
}

fn contexts() -> Vec<TestContext> {
    let full = TestContext::with_strategy(IndexStrategyKind::Full);

    let mut scanned = config_with_strategy(IndexStrategyKind::Full);
    scanned.purge.small_purge_threshold = 1;

    let mut sampled = config_with_strategy(IndexStrategyKind::Distributed);
    sampled.cache.index_update_frequency = 2;
    sampled.cache.small_file_threshold_bytes = 1024;

    vec![
        full,
        TestContext::with_config(scanned),
        TestContext::with_config(sampled),
    ]
}

/// Applies the purges to the final tag state of every item and returns the
/// per-purge counts plus the surviving item indices.
fn model(items: &[Item], purges: &[Purge]) -> (Vec<usize>, BTreeSet<usize>) {
    let mut alive: BTreeSet<usize> = (0..items.len()).collect();
    let mut counts = Vec::with_capacity(purges.len());
    for purge in purges {
        let hit: Vec<usize> = alive
            .iter()
            .copied()
            .filter(|&i| match purge {
                Purge::Tag(tag) => items[i].tags.contains(tag),
                Purge::Path(glob) => glob.matches(&items[i].path(i)),
            })
            .collect();
        for i in &hit {
            alive.remove(i);
        }
        counts.push(hit.len());
    }
    (counts, alive)
}

async fn run(
    ctx: &TestContext,
    items: &[Item],
    rewrites: &[Option<Vec<&'static str>>],
    purges: &[Purge],
) -> (Vec<usize>, BTreeSet<usize>) {
    for (i, item) in items.iter().enumerate() {
        let size = if item.large { 4096 } else { 16 };
        ctx.put(&item.path(i), &item.params(), body(size), &item.tags)
            .await;
    }
    for (i, (item, tags)) in items.iter().zip(rewrites).enumerate() {
        if let Some(tags) = tags {
            let size = if item.large { 4096 } else { 16 };
            ctx.put(&item.path(i), &item.params(), body(size), tags).await;
        }
    }

    let mut counts = Vec::with_capacity(purges.len());
    for purge in purges {
        let outcome = match purge {
            Purge::Tag(tag) => ctx.engine.purge_by_tag(tag, None).await,
            Purge::Path(glob) => ctx.engine.purge_by_path(glob.pattern(), None).await,
        };
        counts.push(outcome.unwrap().count);
    }

    let mut survivors = BTreeSet::new();
    for (i, item) in items.iter().enumerate() {
        if ctx.is_cached(&item.path(i), &item.params()).await {
            survivors.insert(i);
        }
    }
    (counts, survivors)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 24,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_purges_match_model_for_every_strategy(
        (items, rewrites, purges) in scenario(),
    ) {
        let mut current = items.clone();
        for (item, tags) in current.iter_mut().zip(&rewrites) {
            if let Some(tags) = tags {
                item.tags = tags.clone();
            }
        }
        let expected = model(&current, &purges);

        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            for ctx in contexts() {
                let strategy = ctx.config.cache.index_strategy;
                let actual = run(&ctx, &items, &rewrites, &purges).await;
                assert_eq!(actual, expected, "strategy {strategy:?} purges {purges:?}");
            }
        });
    }
}
