//! `credctl export` and `credctl import`.
//!
//! Export reads the records straight from disk so it works without a
//! running daemon. Import goes through the daemon so every record is
//! validated and initialized before it is saved.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{bail, Context as _, Result};
use credctl_core::protocol::{Action, AddPayload, ListResponsePayload};
use credctl_core::{ProviderStore, StoredProvider};

use super::Context;
use crate::client::Client;

pub fn export(ctx: &Context) -> Result<ExitCode> {
    let records = load_records(&ctx.store())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&records).context("Failed to serialize providers")?
    );
    Ok(ExitCode::SUCCESS)
}

pub fn import(ctx: &Context, file: Option<&Path>, overwrite: bool) -> Result<ExitCode> {
    let input = match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        _ => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read stdin")?;
            input
        }
    };
    let records = parse_records(&input)?;

    let client = ctx.client()?;
    let summary = import_records(&client, records, overwrite)?;
    println!(
        "Imported {}, skipped {}, failed {}",
        summary.imported, summary.skipped, summary.failed
    );
    if summary.failed > 0 {
        bail!("{} provider(s) failed to import", summary.failed);
    }
    Ok(ExitCode::SUCCESS)
}

fn load_records(store: &ProviderStore) -> Result<Vec<StoredProvider>> {
    store
        .list()
        .context("Failed to list providers")?
        .iter()
        .map(|name| {
            store
                .load(name)
                .with_context(|| format!("Failed to load provider '{}'", name))
        })
        .collect()
}

fn parse_records(input: &str) -> Result<Vec<StoredProvider>> {
    serde_json::from_str(input).context("Invalid import data: expected a JSON array of providers")
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ImportSummary {
    imported: usize,
    skipped: usize,
    failed: usize,
}

fn import_records(
    client: &Client,
    records: Vec<StoredProvider>,
    overwrite: bool,
) -> Result<ImportSummary> {
    let listed: ListResponsePayload = client.call_for(Action::List, ())?;
    let existing: HashSet<String> = listed.providers.into_iter().map(|p| p.name).collect();

    let mut summary = ImportSummary::default();
    for record in records {
        if existing.contains(&record.name) && !overwrite {
            println!(
                "Skipping '{}': already exists (use --overwrite to replace)",
                record.name
            );
            summary.skipped += 1;
            continue;
        }

        let name = record.name.clone();
        let result = client.call(
            Action::Add,
            AddPayload {
                name: record.name,
                provider_type: record.provider_type,
                metadata: record.data,
                force: overwrite,
            },
        );
        match result {
            Ok(_) => {
                println!("Imported '{}'", name);
                summary.imported += 1;
            }
            Err(e) => {
                eprintln!("Failed to import '{}': {:#}", name, e);
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use credctl_core::protocol::{Request, Response};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixListener;
    use tempfile::tempdir;

    fn record(name: &str) -> StoredProvider {
        StoredProvider::new(
            name,
            "command",
            json!({"command": "echo hi"}).as_object().unwrap().clone(),
        )
    }

    #[test]
    fn export_reads_every_record() {
        let dir = tempdir().unwrap();
        let store = ProviderStore::new(dir.path().join("providers"));
        assert!(load_records(&store).unwrap().is_empty());

        store.save(&record("b"), false).unwrap();
        store.save(&record("a"), false).unwrap();

        let mut names: Vec<String> = load_records(&store)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn export_output_parses_back() {
        let records = vec![record("gh")];
        let text = serde_json::to_string_pretty(&records).unwrap();
        assert_eq!(parse_records(&text).unwrap(), records);

        assert!(parse_records("{\"name\":\"gh\"}").is_err());
    }

    /// Answers `list` with `existing`, fails `add` for "bad" and records
    /// the names it was asked to add.
    fn fake_daemon(
        socket: &Path,
        existing: &'static [&'static str],
        connections: usize,
    ) -> std::thread::JoinHandle<Vec<(String, bool)>> {
        let listener = UnixListener::bind(socket).unwrap();
        std::thread::spawn(move || {
            let mut added = Vec::new();
            for _ in 0..connections {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let request = Request::parse(line.trim()).unwrap();

                let response = match request.action.as_str() {
                    "list" => Response::ok_with(json!({
                        "providers": existing
                            .iter()
                            .map(|n| json!({"name": n, "type": "command"}))
                            .collect::<Vec<_>>(),
                    })),
                    "add" => {
                        let payload: AddPayload = request.payload_as().unwrap();
                        if payload.name == "bad" {
                            Response::generic_error("failed to initialize provider: boom")
                        } else {
                            added.push((payload.name, payload.force));
                            Response::ok()
                        }
                    }
                    other => panic!("unexpected action {other}"),
                };
                let mut stream = stream;
                stream
                    .write_all(response.to_json_line().unwrap().as_bytes())
                    .unwrap();
            }
            added
        })
    }

    #[test]
    fn import_skips_existing_and_counts_failures() {
        let dir = tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        // list + add(new) + add(bad)
        let server = fake_daemon(&socket, &["gh"], 3);

        let summary = import_records(
            &Client::new(&socket),
            vec![record("gh"), record("new"), record("bad")],
            false,
        )
        .unwrap();

        assert_eq!(
            summary,
            ImportSummary {
                imported: 1,
                skipped: 1,
                failed: 1,
            }
        );
        assert_eq!(server.join().unwrap(), vec![("new".to_string(), false)]);
    }

    #[test]
    fn import_overwrite_forces_existing() {
        let dir = tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        let server = fake_daemon(&socket, &["gh"], 2);

        let summary = import_records(&Client::new(&socket), vec![record("gh")], true).unwrap();

        assert_eq!(summary.imported, 1);
        assert_eq!(server.join().unwrap(), vec![("gh".to_string(), true)]);
    }
}
