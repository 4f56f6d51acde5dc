use std::{
    collections::BTreeMap,
    io::{Read, Write},
};

use eyre::{Result, bail};
use mangrove_common::{
    CascadeAction, CascadeSignaler, KillSignaller, KinshipStore, Link,
    LinkFilter, LinkMutator, LinkPlan, Pid, Signal, StoreError,
    link::parse_pid,
    stdin_args::expand_dash,
};
use tracing::warn;

use crate::cli::{Command, topology};

/// Runs one subcommand against `store`. `input` backs the `-` arguments.
pub fn execute(
    command: Command,
    store: &KinshipStore,
    input: impl Read,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        Command::New { trees } => {
            for tree in expand_dash(trees, input)? {
                store.create_tree(&tree)?;
            }
        }
        Command::Delete { trees } => {
            for tree in expand_dash(trees, input)? {
                store.delete_tree(&tree)?;
            }
        }
        Command::Enable { tree } => store.enable(&tree)?,
        Command::Disable { tree } => store.disable(&tree)?,
        Command::List { json } => list(store, json, out)?,
        Command::Links { raw, json, trees } => {
            print_links(store, &trees, raw, json, out)?;
        }
        Command::Link {
            tree,
            chain,
            ring,
            reverse,
            bidirectional,
            overwrite,
            pids,
        } => {
            let plan = LinkPlan::new(parse_pids(expand_dash(pids, input)?)?)
                .topology(topology(chain, ring))
                .reverse(reverse)
                .bidirectional(bidirectional);
            let mutator = LinkMutator::new(store);
            if overwrite {
                mutator.replace_links(&tree, &plan.links()?)?;
            } else {
                mutator.append_links(&tree, &plan)?;
            }
        }
        Command::Unlink {
            tree,
            parent,
            child,
            either,
            pairs,
        } => {
            let pairs = parse_pids(expand_dash(pairs, input)?)?;
            let filters = unlink_filters(&pairs, &parent, &child, &either)?;
            LinkMutator::new(store).remove_matching(&tree, &filters)?;
        }
        Command::Clear { tree } => LinkMutator::new(store).clear_tree(&tree)?,
        Command::Kill {
            tree,
            signal,
            keep_links,
            json,
            pids,
        } => {
            let roots = parse_pids(expand_dash(pids, input)?)?;
            kill(store, tree, &roots, signal, keep_links, json, out)?;
        }
    }
    Ok(())
}

fn parse_pids(literals: Vec<String>) -> Result<Vec<Pid>> {
    let pids = literals
        .iter()
        .map(|literal| parse_pid(literal))
        .collect::<Result<Vec<Pid>, StoreError>>()?;
    Ok(pids)
}

fn unlink_filters(
    pairs: &[Pid],
    parents: &[Pid],
    children: &[Pid],
    either: &[Pid],
) -> Result<Vec<LinkFilter>> {
    if pairs.len() % 2 != 0 {
        bail!("exact links need PARENT CHILD pairs, got {} pids", pairs.len());
    }
    let filters: Vec<LinkFilter> = pairs
        .chunks_exact(2)
        .map(|pair| LinkFilter::ExactPair {
            parent: pair[0],
            child: pair[1],
        })
        .chain(parents.iter().copied().map(LinkFilter::ByParent))
        .chain(children.iter().copied().map(LinkFilter::ByChild))
        .chain(either.iter().copied().map(LinkFilter::ByEither))
        .collect();
    if filters.is_empty() {
        bail!("nothing to unlink, give PARENT CHILD pairs or a pid filter");
    }
    Ok(filters)
}

fn list(store: &KinshipStore, json: bool, out: &mut impl Write) -> Result<()> {
    let trees = store.list_trees()?;
    if json {
        serde_json::to_writer_pretty(&mut *out, &trees)?;
        writeln!(out)?;
        return Ok(());
    }
    for tree in trees {
        let mark = if tree.enabled { '*' } else { ' ' };
        writeln!(out, "[{mark}] {}", tree.name)?;
    }
    Ok(())
}

fn print_links(
    store: &KinshipStore,
    trees: &[String],
    raw: bool,
    json: bool,
    out: &mut impl Write,
) -> Result<()> {
    if json {
        let all = trees
            .iter()
            .map(|tree| Ok((tree.as_str(), store.list_links(tree)?)))
            .collect::<Result<BTreeMap<&str, Vec<Link>>>>()?;
        serde_json::to_writer_pretty(&mut *out, &all)?;
        writeln!(out)?;
        return Ok(());
    }

    let codec = store.codec();
    let titled = trees.len() > 1;
    for tree in trees {
        let links = store.list_links(tree)?;
        if titled {
            writeln!(out, "{tree}:")?;
        }
        for link in links {
            if raw {
                codec.encode(link, out)?;
            } else if titled {
                writeln!(out, "  {link}")?;
            } else {
                writeln!(out, "{link}")?;
            }
        }
    }
    Ok(())
}

/// Signals `roots` and their descendants over `trees` (every enabled tree
/// when empty), then drops the links out of the signalled pids.
fn kill(
    store: &KinshipStore,
    trees: Vec<String>,
    roots: &[Pid],
    signal: Signal,
    keep_links: bool,
    json: bool,
    out: &mut impl Write,
) -> Result<()> {
    let trees = if trees.is_empty() {
        store.enabled_trees()?
    } else {
        trees
    };
    if trees.is_empty() {
        warn!("no enabled tree, only signalling {roots:?}");
    }

    let mut cascade = CascadeSignaler::new(store, KillSignaller);
    let report = if keep_links {
        cascade.cascade_trees(&trees, roots, CascadeAction::Signal(signal))?
    } else {
        cascade.cascade_and_prune(&trees, roots, signal)?
    };

    if json {
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
    } else {
        for pid in report.delivered() {
            writeln!(out, "{pid}")?;
        }
    }
    if report.delivered().next().is_none() {
        bail!("no process could be sent {signal}");
    }
    Ok(())
}
