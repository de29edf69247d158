use muninn::error::Result;
use muninn::{IndexProvider, ProviderConfig, XaParticipant};

use std::collections::HashSet;

fn populated(provider: &IndexProvider, count: i64) -> Result<muninn::Index> {
    let things = provider.node_index("things", Some(IndexProvider::exact_config()))?;
    let mut tx = provider.begin()?;
    for entity_id in 0..count {
        things.add(&mut tx, entity_id, "kind", "common")?;
    }
    tx.prepare()?;
    tx.commit()?;
    Ok(things)
}

#[test]
fn test_below_threshold_is_eager() -> Result<()> {
    let tmp = tempfile::tempdir().unwrap();
    let provider = IndexProvider::new(ProviderConfig::new(tmp.path()))?;
    let things = populated(&provider, 99)?;

    let hits = things.get(None, "kind", "common")?;
    assert!(!hits.is_lazy());
    assert_eq!(hits.size(), 99);

    let ids: HashSet<i64> = hits.collect();
    assert_eq!(ids, (0..99).collect());
    Ok(())
}

#[test]
fn test_above_threshold_is_lazy() -> Result<()> {
    let tmp = tempfile::tempdir().unwrap();
    let provider = IndexProvider::new(ProviderConfig::new(tmp.path()))?;
    let things = populated(&provider, 101)?;

    let hits = things.get(None, "kind", "common")?;
    assert!(hits.is_lazy());

    let ids: HashSet<i64> = hits.collect();
    assert_eq!(ids, (0..101).collect());
    Ok(())
}

#[test]
fn test_both_paths_return_the_same_ids() -> Result<()> {
    // The same data queried through a raised and a lowered threshold must
    // produce the identical id set.
    let tmp = tempfile::tempdir().unwrap();
    {
        let provider = IndexProvider::new(ProviderConfig::new(tmp.path()))?;
        populated(&provider, 50)?;
        provider.shutdown()?;
    }

    let mut eager_config = ProviderConfig::new(tmp.path());
    eager_config.lazy_threshold = 1000;
    let eager_provider = IndexProvider::new(eager_config)?;
    let eager_hits = eager_provider
        .node_index("things", None)?
        .get(None, "kind", "common")?;
    assert!(!eager_hits.is_lazy());
    let eager_ids: HashSet<i64> = eager_hits.collect();
    eager_provider.shutdown()?;

    let mut lazy_config = ProviderConfig::new(tmp.path());
    lazy_config.lazy_threshold = 10;
    let lazy_provider = IndexProvider::new(lazy_config)?;
    let lazy_hits = lazy_provider
        .node_index("things", None)?
        .get(None, "kind", "common")?;
    assert!(lazy_hits.is_lazy());
    let lazy_ids: HashSet<i64> = lazy_hits.collect();

    assert_eq!(eager_ids, lazy_ids);
    assert_eq!(eager_ids.len(), 50);
    Ok(())
}

#[test]
fn test_lazy_results_respect_transaction_state() -> Result<()> {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = ProviderConfig::new(tmp.path());
    config.lazy_threshold = 10;
    let provider = IndexProvider::new(config)?;
    let things = populated(&provider, 20)?;

    let mut tx = provider.begin()?;
    things.add(&mut tx, 999, "kind", "common")?;
    things.remove(&mut tx, 3, "kind", "common")?;

    let hits = things.get(Some(&mut tx), "kind", "common")?;
    assert!(hits.is_lazy());

    let ids: HashSet<i64> = hits.collect();
    let mut expected: HashSet<i64> = (0..20).collect();
    expected.remove(&3);
    expected.insert(999);
    assert_eq!(ids, expected);

    tx.rollback()?;
    Ok(())
}

#[test]
fn test_lazy_iteration_outlives_later_commits() -> Result<()> {
    // A lazy result keeps its own searcher view; a commit landing while the
    // iterator is outstanding must not corrupt it.
    let tmp = tempfile::tempdir().unwrap();
    let mut config = ProviderConfig::new(tmp.path());
    config.lazy_threshold = 10;
    let provider = IndexProvider::new(config)?;
    let things = populated(&provider, 20)?;

    let hits = things.get(None, "kind", "common")?;
    assert!(hits.is_lazy());

    let mut tx = provider.begin()?;
    things.add(&mut tx, 500, "kind", "common")?;
    tx.commit()?;

    // The outstanding iterator still sees its original generation.
    let ids: HashSet<i64> = hits.collect();
    assert_eq!(ids, (0..20).collect());

    // A fresh query sees the new commit.
    let fresh: HashSet<i64> = things.get(None, "kind", "common")?.collect();
    assert_eq!(fresh.len(), 21);
    Ok(())
}
