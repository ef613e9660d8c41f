use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;

use crate::assemble::{Assembler, AssemblyReport, Packager as _};
use crate::cli::BuildArgs;
use crate::config::FetchSettings;
use crate::epub::{EpubMetadata, EpubPackager};
use crate::fetch::FetchScheduler;
use crate::fic::Fic;
use crate::page::{HttpPageSource, PageSource};
use crate::sanitize::HtmlSanitizer;
use crate::site::{SiteRegistry, XenForoSite};

#[derive(Debug, Clone)]
pub struct PackageOptions {
    pub out: PathBuf,
    pub lang: String,
    pub force: bool,
    pub concurrency: usize,
}

pub async fn run(args: BuildArgs) -> anyhow::Result<()> {
    let mut settings = FetchSettings::default()
        .with_env()
        .context("read FICPACK_* environment")?;
    if let Some(concurrency) = args.concurrency {
        settings.concurrency = concurrency.max(1);
    }
    if let Some(timeout_secs) = args.timeout_secs {
        settings.timeout_secs = timeout_secs.max(1);
    }
    if let Some(user_agent) = args.user_agent.clone() {
        settings.user_agent = user_agent;
    }

    let fic = load_fic(Path::new(&args.fic))?;
    let sites = Arc::new(site_registry(&args.forum_hosts));
    let source: Arc<dyn PageSource> =
        Arc::new(HttpPageSource::new(&settings).context("build page source")?);

    let options = PackageOptions {
        out: PathBuf::from(&args.out),
        lang: args.lang.clone(),
        force: args.force,
        concurrency: settings.concurrency,
    };
    tracing::info!(
        fic = %args.fic,
        out = %options.out.display(),
        chapters = fic.chapter_count(),
        "build: package"
    );
    let report = package_fic(&fic, sites, source, &options).await?;

    if report.chapters == 0 {
        tracing::warn!("no chapters could be retrieved; the EPUB holds only front matter");
    }
    Ok(())
}

pub fn load_fic(path: &Path) -> anyhow::Result<Fic> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("read fic record: {}", path.display()))?;
    Fic::from_json(&json).with_context(|| format!("parse fic record: {}", path.display()))
}

/// Built-in site handlers plus a XenForo handler for `forum_hosts`.
pub fn site_registry(forum_hosts: &[String]) -> SiteRegistry {
    let mut sites = SiteRegistry::new();
    if !forum_hosts.is_empty() {
        sites.register(XenForoSite::with_hosts(forum_hosts.iter().cloned()));
    }
    sites
}

/// Fetches every chapter of `fic` and writes the EPUB at `options.out`.
///
/// Chapters that fail to retrieve are logged and left out; only packaging
/// failures are errors.
pub async fn package_fic(
    fic: &Fic,
    sites: Arc<SiteRegistry>,
    source: Arc<dyn PageSource>,
    options: &PackageOptions,
) -> anyhow::Result<AssemblyReport> {
    let metadata = EpubMetadata::from_fic(fic, &options.lang);
    let mut packager = EpubPackager::create(&options.out, metadata, options.force)
        .with_context(|| format!("create epub: {}", options.out.display()))?;

    let root = fic.root();
    let config = sites.sanitize_config_for(root.link().or(fic.meta.update_from.as_deref()));
    let descriptors = fic.descriptors();
    let requested = descriptors.len();

    let scheduler = FetchScheduler::new(sites, source).with_concurrency(options.concurrency);
    let mut stream = scheduler.fetch(descriptors);

    let assembler = Assembler::new(fic, &HtmlSanitizer, config);
    let report = assembler
        .run(&mut stream, &mut packager)
        .await
        .context("assemble epub")?;
    packager.finish().context("finish epub")?;

    tracing::info!(
        requested,
        chapters = report.chapters,
        assets = report.assets,
        skipped = report.skipped,
        pages = scheduler.pages().len(),
        out = %options.out.display(),
        "epub written"
    );
    Ok(report)
}
