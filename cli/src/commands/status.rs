use super::Context;
use clap::Args;
use snapferry_core::{humanize, Health, IntegrityChecker, PairResolver, Result};
use std::collections::HashMap;

#[derive(Args, Default)]
pub struct StatusCommand {}

const HEADER: [&str; 6] = ["NAME", "PARENT", "TYPE", "HEALTH", "LOCAL STATE", "SIZE"];

fn label(name: &str) -> &str {
    name.split_once('@').map(|(_, label)| label).unwrap_or(name)
}

impl StatusCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let ctx = Context::build(cli, HashMap::new()).await?;
        let bucket = ctx.settings.require("bucket", Some(&ctx.filesystem))?;
        println!(
            "backup status for {}@{}* on {}/{}",
            ctx.filesystem, ctx.snapshot_prefix, bucket, ctx.s3_prefix
        );

        let checker = IntegrityChecker::new(&ctx.remote);
        let resolver = PairResolver::new(&ctx.local, &ctx.remote);

        let mut listing: Vec<[String; 6]> = Vec::new();
        for (remote, local) in resolver.pairs() {
            let line = match remote {
                None => {
                    // local is always present when the remote side is absent
                    let name = local.map(|l| label(&l.name)).unwrap_or("-");
                    [
                        name.to_string(),
                        "-".to_string(),
                        "missing".to_string(),
                        "-".to_string(),
                        "ok".to_string(),
                        String::new(),
                    ]
                }
                Some(remote) => {
                    let health = match checker.health(remote) {
                        Health::Healthy => "ok".to_string(),
                        Health::Broken(reason) => reason.to_string(),
                    };
                    let parent = if remote.is_full() {
                        String::new()
                    } else {
                        remote.parent_name().map(label).unwrap_or("-").to_string()
                    };
                    let snap_type = if remote.is_full() { "full" } else { "incremental" };
                    let local_state = if local.is_some() { "ok" } else { "missing" };
                    let size = remote.declared_size().map(humanize).unwrap_or_default();
                    [
                        label(&remote.name).to_string(),
                        parent,
                        snap_type.to_string(),
                        health,
                        local_state.to_string(),
                        size,
                    ]
                }
            };
            listing.push(line);
        }
        listing.sort();

        let mut widths: Vec<usize> = HEADER.iter().map(|h| h.len()).collect();
        for line in &listing {
            for (width, value) in widths.iter_mut().zip(line.iter()) {
                *width = (*width).max(value.len());
            }
        }

        print_row(&HEADER.map(String::from), &widths);
        for line in &listing {
            print_row(line, &widths);
        }
        Ok(())
    }
}

fn print_row(values: &[String; 6], widths: &[usize]) {
    let cells: Vec<String> = values
        .iter()
        .zip(widths)
        .map(|(value, width)| format!("{value:<width$}"))
        .collect();
    println!("{}", cells.join(" | "));
}
