use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use dcseq::{
    FallbackPolicy, LocalFileStore, MAX_DOCUMENT_NUMBER_LEN, MAX_SEQUENCE_VALUE, Prober,
    SequenceKey, SequenceManager, SequenceSync, versioned_store,
};
use serde_json::json;

use super::config::{Command, Settings};

pub fn run(command: Command, settings: &Settings) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match command {
        Command::Probe => probe(settings, &mut out),
        Command::Generate {
            entity,
            facility,
            hub,
            count,
            allow_unpersisted,
        } => {
            let policy = if allow_unpersisted {
                FallbackPolicy::Unpersisted
            } else {
                FallbackPolicy::Fail
            };
            let manager = manager(settings).with_fallback(policy);
            generate(&manager, &entity, &facility, hub.as_deref(), count, &mut out)
        }
        Command::Current { key } => {
            let value = manager(settings).current_value(&SequenceKey::new(key))?;
            writeln!(out, "{value}")?;
            Ok(())
        }
        Command::List => {
            let values = manager(settings).list()?;
            print_json(&mut out, &values)
        }
        Command::Set { key, value, force } => {
            let manager = manager(settings);
            let key = SequenceKey::new(key);
            if force {
                manager.force_set_value(&key, value)?;
            } else {
                manager.set_value(&key, value)?;
            }
            writeln!(out, "{key} = {value}")?;
            Ok(())
        }
        Command::Health => {
            let report = manager(settings).health_report();
            print_json(&mut out, &report)
        }
        Command::Sync => sync(settings, &mut out),
        Command::CheckCodes => check_codes(settings, &mut out),
    }
}

fn manager(settings: &Settings) -> SequenceManager {
    SequenceManager::from_config(&settings.store, &settings.resolver, settings.tables.clone())
}

fn probe(settings: &Settings, out: &mut impl Write) -> anyhow::Result<()> {
    let selection = Prober::default_chain(&settings.store, &settings.resolver).select();
    let skipped: Vec<_> = selection
        .failures()
        .iter()
        .map(|f| json!({ "backend": f.kind, "error": f.error.to_string() }))
        .collect();
    print_json(
        out,
        &json!({
            "selected": selection.kind(),
            "atomic": selection.kind().is_atomic(),
            "fallback": selection.used_fallback(),
            "skipped": skipped,
        }),
    )
}

fn generate(
    manager: &SequenceManager,
    entity: &str,
    facility: &str,
    hub: Option<&str>,
    count: u32,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    for _ in 0..count {
        let allocation = manager.allocate(entity, facility, hub)?;
        if allocation.persisted {
            writeln!(out, "{}", allocation.number)?;
        } else {
            writeln!(out, "{}\tunpersisted", allocation.number)?;
        }
    }
    Ok(())
}

fn sync(settings: &Settings, out: &mut impl Write) -> anyhow::Result<()> {
    let source = LocalFileStore::new(settings.store.local_path.clone())
        .with_floor(settings.store.floor);
    let target = versioned_store(&settings.store, &settings.resolver)
        .context("the versioned sequence file is not configured")?;
    let report = SequenceSync::new(Arc::new(source), target).run()?;
    print_json(out, &report)
}

fn check_codes(settings: &Settings, out: &mut impl Write) -> anyhow::Result<()> {
    // Tables are validated while building the settings.
    let combinations = settings.tables.combinations();
    let longest = combinations
        .iter()
        .map(|p| p.format(MAX_SEQUENCE_VALUE))
        .max_by_key(|n| n.len());
    writeln!(out, "{} combinations", combinations.len())?;
    if let Some(longest) = longest {
        writeln!(
            out,
            "longest {} ({} of {} characters)",
            longest,
            longest.len(),
            MAX_DOCUMENT_NUMBER_LEN
        )?;
    }
    Ok(())
}

fn print_json(out: &mut impl Write, value: &impl serde::Serialize) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
