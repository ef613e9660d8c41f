//! Re-imports a fic record through the chapter list rules: duplicate links
//! anywhere in the tree are dropped and colliding names get suffixes.

use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;

use crate::build::{load_fic, site_registry};
use crate::cli::NormalizeArgs;
use crate::fic::{Fic, NormalizeLink};

pub fn run(args: NormalizeArgs) -> anyhow::Result<()> {
    let fic = load_fic(Path::new(&args.fic))?;
    let sites = site_registry(&args.forum_hosts);
    let normalized = normalize_fic(&fic, &sites);
    tracing::info!(
        before = fic.chapter_count(),
        after = normalized.chapter_count(),
        "normalized fic record"
    );

    let mut json = normalized.to_json().context("serialize fic record")?;
    json.push('\n');
    match &args.out {
        Some(out) => std::fs::write(out, json).with_context(|| format!("write fic record: {out}"))?,
        None => std::io::stdout()
            .lock()
            .write_all(json.as_bytes())
            .context("write fic record to stdout")?,
    }
    Ok(())
}

/// Rebuilds `fic` chapter by chapter. Sub-stories left without chapters are
/// dropped.
pub fn normalize_fic(fic: &Fic, links: &impl NormalizeLink) -> Fic {
    let mut out = Fic {
        id: fic.id.clone(),
        ..Fic::new(fic.meta.clone())
    };
    for chapter in &fic.chapters {
        if !out.add_chapter(chapter.into(), links) {
            tracing::warn!(name = %chapter.name, link = %chapter.link, "dropping duplicate chapter");
        }
    }

    for sub in &fic.fics {
        let index = out.push_sub_fic(sub.meta.clone());
        for chapter in &sub.chapters {
            if !out.add_sub_chapter(index, chapter.into(), links) {
                tracing::warn!(name = %chapter.name, link = %chapter.link, "dropping duplicate chapter");
            }
        }
    }

    out.fics.retain(|sub| {
        let keep = !sub.chapters.is_empty();
        if !keep {
            tracing::warn!(title = ?sub.meta.title, "dropping sub-story without chapters");
        }
        keep
    });
    out
}
