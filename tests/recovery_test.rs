use std::fs;

use muninn::error::Result;
use muninn::index::log::LogicalLog;
use muninn::{
    EntityKind, IndexCommand, IndexIdentifier, IndexProvider, ProviderConfig, XaParticipant,
};

fn sorted(hits: muninn::IndexHits) -> Vec<i64> {
    let mut ids: Vec<i64> = hits.collect();
    ids.sort_unstable();
    ids
}

#[test]
fn test_prepared_transaction_survives_crash() -> Result<()> {
    let tmp = tempfile::tempdir().unwrap();

    // First run: prepare but never commit, then "crash".
    {
        let provider = IndexProvider::new(ProviderConfig::new(tmp.path()))?;
        let people = provider.node_index("people", Some(IndexProvider::exact_config()))?;
        let mut tx = provider.begin()?;
        people.add(&mut tx, 1, "name", "alice")?;
        people.add(&mut tx, 2, "name", "bob")?;
        tx.prepare()?;
        drop(tx);
        drop(provider);
    }

    // Restart: recovery replays the logged commands.
    let provider = IndexProvider::new(ProviderConfig::new(tmp.path()))?;
    let people = provider.node_index("people", None)?;
    assert_eq!(sorted(people.get(None, "name", "alice")?), vec![1]);
    assert_eq!(sorted(people.get(None, "name", "bob")?), vec![2]);

    // The recovered log was retired: another restart changes nothing.
    provider.shutdown()?;
    let provider = IndexProvider::new(ProviderConfig::new(tmp.path()))?;
    let people = provider.node_index("people", None)?;
    assert_eq!(sorted(people.get(None, "name", "alice")?), vec![1]);
    Ok(())
}

#[test]
fn test_truncated_log_replays_only_complete_commands() -> Result<()> {
    let tmp = tempfile::tempdir().unwrap();
    let log_path = tmp.path().join("index").join("lucene.log");

    {
        let provider = IndexProvider::new(ProviderConfig::new(tmp.path()))?;
        let people = provider.node_index("people", Some(IndexProvider::exact_config()))?;
        let mut tx = provider.begin()?;
        people.add(&mut tx, 1, "name", "alice")?;
        people.add(&mut tx, 2, "name", "bob")?;
        tx.prepare()?;
        drop(tx);
        drop(provider);
    }

    // Cut the log mid-way through the second command's bytes.
    let full = fs::read(&log_path).unwrap();
    fs::write(&log_path, &full[..full.len() - 5]).unwrap();

    let provider = IndexProvider::new(ProviderConfig::new(tmp.path()))?;
    let people = provider.node_index("people", None)?;
    assert_eq!(sorted(people.get(None, "name", "alice")?), vec![1]);
    assert!(sorted(people.get(None, "name", "bob")?).is_empty());
    Ok(())
}

#[test]
fn test_duplicate_add_replay_is_idempotent() -> Result<()> {
    let tmp = tempfile::tempdir().unwrap();
    let identifier = IndexIdentifier::new(EntityKind::Node, "people");

    // Create the store and persist the index configuration.
    {
        let provider = IndexProvider::new(ProviderConfig::new(tmp.path()))?;
        provider.node_index("people", Some(IndexProvider::exact_config()))?;
        provider.shutdown()?;
    }

    // A log carrying the same add twice, as a crashed writer might leave it.
    {
        let log = LogicalLog::open(tmp.path().join("index").join("lucene.log"))?;
        let command = IndexCommand::add(identifier.clone(), 1, "name", "alice");
        log.append(&command)?;
        log.append(&command)?;
        log.flush()?;
    }

    let provider = IndexProvider::new(ProviderConfig::new(tmp.path()))?;
    let people = provider.node_index("people", None)?;
    assert_eq!(sorted(people.get(None, "name", "alice")?), vec![1]);

    // No duplicate document drifted into the committed index.
    let searcher = provider
        .data_source()
        .index_searcher(&identifier)?
        .expect("index exists after recovery");
    assert_eq!(searcher.acquire().doc_count(), 1);
    Ok(())
}

#[test]
fn test_recovery_applies_add_and_remove_in_order() -> Result<()> {
    let tmp = tempfile::tempdir().unwrap();

    {
        let provider = IndexProvider::new(ProviderConfig::new(tmp.path()))?;
        let people = provider.node_index("people", Some(IndexProvider::exact_config()))?;
        let mut tx = provider.begin()?;
        people.add(&mut tx, 1, "name", "alice")?;
        people.add(&mut tx, 2, "name", "bob")?;
        people.remove(&mut tx, 1, "name", "alice")?;
        tx.prepare()?;
        drop(tx);
        drop(provider);
    }

    let provider = IndexProvider::new(ProviderConfig::new(tmp.path()))?;
    let people = provider.node_index("people", None)?;
    assert!(sorted(people.get(None, "name", "alice")?).is_empty());
    assert_eq!(sorted(people.get(None, "name", "bob")?), vec![2]);
    Ok(())
}

#[test]
fn test_recovery_bumps_log_version() -> Result<()> {
    let tmp = tempfile::tempdir().unwrap();

    {
        let provider = IndexProvider::new(ProviderConfig::new(tmp.path()))?;
        let people = provider.node_index("people", Some(IndexProvider::exact_config()))?;
        assert_eq!(provider.data_source().log_version(), 0);
        let mut tx = provider.begin()?;
        people.add(&mut tx, 1, "name", "alice")?;
        tx.prepare()?;
        drop(tx);
        drop(provider);
    }

    let provider = IndexProvider::new(ProviderConfig::new(tmp.path()))?;
    assert_eq!(provider.data_source().log_version(), 1);
    Ok(())
}

#[test]
fn test_keep_logical_logs_archives_recovered_log() -> Result<()> {
    let tmp = tempfile::tempdir().unwrap();

    {
        let provider = IndexProvider::new(ProviderConfig::new(tmp.path()))?;
        let people = provider.node_index("people", Some(IndexProvider::exact_config()))?;
        let mut tx = provider.begin()?;
        people.add(&mut tx, 1, "name", "alice")?;
        tx.prepare()?;
        drop(tx);
        drop(provider);
    }

    let mut config = ProviderConfig::new(tmp.path());
    config.keep_logical_logs = true;
    let provider = IndexProvider::new(config)?;
    let people = provider.node_index("people", None)?;
    assert_eq!(sorted(people.get(None, "name", "alice")?), vec![1]);
    assert!(tmp.path().join("index").join("lucene.log.v0").exists());
    Ok(())
}

#[test]
fn test_clean_shutdown_retires_the_log() -> Result<()> {
    let tmp = tempfile::tempdir().unwrap();

    {
        let provider = IndexProvider::new(ProviderConfig::new(tmp.path()))?;
        let people = provider.node_index("people", Some(IndexProvider::exact_config()))?;
        let mut tx = provider.begin()?;
        people.add(&mut tx, 1, "name", "alice")?;
        tx.prepare()?;
        tx.commit()?;
        assert_eq!(sorted(people.get(None, "name", "alice")?), vec![1]);
        provider.shutdown()?;
    }

    let log_path = tmp.path().join("index").join("lucene.log");
    assert_eq!(fs::metadata(&log_path).unwrap().len(), 0);

    let provider = IndexProvider::new(ProviderConfig::new(tmp.path()))?;
    let people = provider.node_index("people", None)?;
    assert_eq!(sorted(people.get(None, "name", "alice")?), vec![1]);
    Ok(())
}
