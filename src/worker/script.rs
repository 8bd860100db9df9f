//! Download scripts instead of zip files
//!
//! [`DownloadScriptWorker`] turns the same file groups a packaging job would
//! zip into `curl` or `wget` shell scripts, or a plain list of URLs, and
//! publishes each script as a job result.

use crate::config::Config;
use crate::controller::PackagingController;
use crate::error::{Error, JobError, Result};
use crate::file_group::{FileGroup, FileInfo, flatten};
use crate::packager::DownloadUrlResolver;
use crate::utils::hash4;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Job, JobOutcome, JobPhase, JobResult, ProcessorRegistry, Worker, WorkerRequest};

/// Flavor of download script
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    /// `curl` shell script
    Curl,
    /// `wget` shell script
    Wget,
    /// One URL per line
    Urls,
}

impl ScriptType {
    /// Short name, used in result ids and file names
    pub fn name(&self) -> &'static str {
        match self {
            ScriptType::Curl => "curl",
            ScriptType::Wget => "wget",
            ScriptType::Urls => "urls",
        }
    }

    /// File extension of the script
    pub fn extension(&self) -> &'static str {
        match self {
            ScriptType::Curl | ScriptType::Wget => "sh",
            ScriptType::Urls => "txt",
        }
    }
}

/// Stores scripts in the requester's workspace
#[async_trait]
pub trait WorkspaceSink: Send + Sync {
    /// Save `content` under `name`
    async fn save(&self, name: &str, content: &str) -> Result<()>;
}

/// [`WorkspaceSink`] writing into a local directory
#[derive(Clone, Debug)]
pub struct DirectoryWorkspace {
    dir: PathBuf,
}

impl DirectoryWorkspace {
    /// Workspace rooted at `dir` (created on first save)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl WorkspaceSink for DirectoryWorkspace {
    async fn save(&self, name: &str, content: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(name.replace(['/', '\\'], "_")), content).await?;
        Ok(())
    }
}

/// A file as it appears in a script
struct ScriptEntry<'a> {
    name: &'a str,
    url: String,
    file: &'a FileInfo,
}

/// Files left out of a script
#[derive(Default)]
struct Skipped<'a> {
    denied: Vec<&'a str>,
    unservable: Vec<&'a str>,
}

/// Resolve every accessible file to a URL, in package order
///
/// Local files the resolver cannot serve are skipped.
fn script_entries<'a>(
    groups: &'a [FileGroup],
    resolver: &dyn DownloadUrlResolver,
) -> (Vec<ScriptEntry<'a>>, Skipped<'a>) {
    let mut entries = Vec::new();
    let mut skipped = Skipped::default();
    for (group, file) in flatten(groups) {
        if !file.has_access {
            skipped.denied.push(file.external_name.as_str());
            continue;
        }
        let url = if file.is_remote() {
            file.locator.clone()
        } else {
            match resolver.url_for(&group.local_path(file), &file.external_name) {
                Some(url) => url,
                None => {
                    debug!(locator = %file.locator, "no download URL for local file, left out of script");
                    skipped.unservable.push(file.external_name.as_str());
                    continue;
                }
            }
        };
        entries.push(ScriptEntry {
            name: &file.external_name,
            url,
            file,
        });
    }
    (entries, skipped)
}

/// Quote `s` for a POSIX shell
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn header_args(file: &FileInfo, flag: &str) -> String {
    let mut args = String::new();
    if let Some(cookie) = file.cookie_header() {
        args.push_str(&format!(" {} {}", flag, shell_quote(&format!("Cookie: {}", cookie))));
    }
    for (name, value) in &file.headers {
        args.push_str(&format!(" {} {}", flag, shell_quote(&format!("{}: {}", name, value))));
    }
    args
}

/// Render a download script for `groups`
///
/// Files the requester may not access, and local files without a download
/// URL, are left out (listed as comments in shell scripts). Returns the script and the number of files it downloads.
pub fn build_script(
    script_type: ScriptType,
    groups: &[FileGroup],
    resolver: &dyn DownloadUrlResolver,
    title: Option<&str>,
) -> (String, usize) {
    let (entries, skipped) = script_entries(groups, resolver);
    let mut out = String::new();

    if script_type == ScriptType::Urls {
        for entry in &entries {
            out.push_str(&entry.url);
            out.push('\n');
        }
        return (out, entries.len());
    }

    out.push_str("#!/bin/sh\n#\n");
    if let Some(title) = title {
        out.push_str(&format!("# {}\n", title.replace('\n', " ")));
    }
    out.push_str(&format!("# {} files in download script\n#\n", entries.len()));
    for name in &skipped.denied {
        out.push_str(&format!("# skipped, access denied: {}\n", name));
    }
    for name in &skipped.unservable {
        out.push_str(&format!("# skipped, not downloadable: {}\n", name));
    }

    for entry in &entries {
        match script_type {
            ScriptType::Curl => out.push_str(&format!(
                "curl -s -L --create-dirs -o {}{} {}\n",
                shell_quote(entry.name),
                header_args(entry.file, "-H"),
                shell_quote(&entry.url)
            )),
            ScriptType::Wget => {
                if let Some((dir, _)) = entry.name.rsplit_once('/') {
                    out.push_str(&format!("mkdir -p {}\n", shell_quote(dir)));
                }
                out.push_str(&format!(
                    "wget -q -O {}{} {}\n",
                    shell_quote(entry.name),
                    header_args(entry.file, "--header"),
                    shell_quote(&entry.url)
                ));
            }
            ScriptType::Urls => {}
        }
    }
    (out, entries.len())
}

/// Produces download scripts and publishes each as a job result
pub struct DownloadScriptWorker {
    config: Arc<Config>,
    processors: Arc<ProcessorRegistry>,
    resolver: Arc<dyn DownloadUrlResolver>,
    workspace: Option<Arc<dyn WorkspaceSink>>,
    job: Option<Arc<dyn Job>>,
}

impl DownloadScriptWorker {
    /// Create a worker publishing scripts through `resolver`
    pub fn new(
        config: Arc<Config>,
        processors: Arc<ProcessorRegistry>,
        resolver: Arc<dyn DownloadUrlResolver>,
    ) -> Self {
        let workspace: Option<Arc<dyn WorkspaceSink>> = config
            .scripts
            .workspace_dir
            .clone()
            .map(|dir| Arc::new(DirectoryWorkspace::new(dir)) as Arc<dyn WorkspaceSink>);
        Self {
            config,
            processors,
            resolver,
            workspace,
            job: None,
        }
    }

    /// Worker sharing the configuration and URL resolver of `controller`
    pub fn from_controller(controller: &PackagingController, processors: Arc<ProcessorRegistry>) -> Self {
        Self::new(
            controller.config().clone(),
            processors,
            controller.context().url_resolver.clone(),
        )
    }

    /// Replace the workspace
    pub fn with_workspace(mut self, workspace: Arc<dyn WorkspaceSink>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    async fn run(&self, job: &Arc<dyn Job>, request: &WorkerRequest) -> Result<JobOutcome> {
        let processor = self.processors.get(&request.processor_id)?;
        let groups = processor.file_groups(request).await?;
        job.set_phase(JobPhase::Executing);

        let script_types = if request.scripts.is_empty() {
            vec![ScriptType::Curl]
        } else {
            request.scripts.clone()
        };
        let base = if request.base_file_name.is_empty() {
            "DownloadScript"
        } else {
            request.base_file_name.as_str()
        };
        let staging = self.config.staging_dir();
        tokio::fs::create_dir_all(staging).await?;

        let mut results = Vec::new();
        let mut file_count = 0;
        for (i, script_type) in script_types.iter().enumerate() {
            let (content, count) = build_script(
                *script_type,
                &groups,
                self.resolver.as_ref(),
                request.title.as_deref(),
            );
            file_count = count;

            let file_name = format!("{}-{}.{}", base, script_type.name(), script_type.extension());
            let path = staging.join(format!(
                "{}_{}_{}.{}",
                job.job_id(),
                hash4(job.job_id()),
                script_type.name(),
                script_type.extension()
            ));
            tokio::fs::write(&path, &content).await?;
            debug!(job_id = job.job_id(), path = %path.display(), files = count, "download script written");

            let href = self
                .resolver
                .url_for(&path, &file_name)
                .ok_or_else(|| Error::Other(format!("no download URL for {}", path.display())))?;
            let result = JobResult {
                id: script_type.name().to_string(),
                href,
                size_bytes: Some(content.len() as u64),
            };
            job.add_result(result.clone());
            results.push(result);

            if request.save_to_workspace {
                self.save_to_workspace(&file_name, &content).await;
            }
            job.set_progress(
                ((i + 1) * 100 / script_types.len()) as u32,
                Some(format!("{} script ready", script_type.name())),
            );
        }

        let summary = format!("{} files in download script", file_count);
        job.set_progress(100, Some(summary.clone()));
        job.set_summary(summary.clone());
        job.set_phase(JobPhase::Completed);
        info!(job_id = job.job_id(), files = file_count, scripts = results.len(), "download scripts complete");

        Ok(JobOutcome {
            phase: JobPhase::Completed,
            results,
            summary: Some(summary),
        })
    }

    async fn save_to_workspace(&self, name: &str, content: &str) {
        match &self.workspace {
            Some(workspace) => {
                if let Err(e) = workspace.save(name, content).await {
                    warn!(name, error = %e, "could not save download script to workspace");
                }
            }
            None => warn!(name, "no workspace configured, script not saved"),
        }
    }
}

#[async_trait]
impl Worker for DownloadScriptWorker {
    fn set_job(&mut self, job: Arc<dyn Job>) {
        self.job = Some(job);
    }

    async fn do_command(&self, request: &WorkerRequest) -> Result<JobOutcome> {
        let job = self.job.clone().ok_or(JobError::NoJob)?;
        match self.run(&job, request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(job_id = job.job_id(), error = %e, "download script job failed");
                job.set_error(e.to_string());
                job.set_phase(JobPhase::Error);
                Err(e)
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::StagingUrlResolver;
    use crate::worker::MemoryJob;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn resolver() -> StagingUrlResolver {
        StagingUrlResolver::new("http://irsa.example", "/stage")
    }

    fn groups() -> Vec<FileGroup> {
        vec![FileGroup::new(vec![
            FileInfo::new("https://h/data/w1.fits", "wise/w1.fits", 10).with_cookie("session", "abc"),
            FileInfo::new("/stage/cat.tbl", "cat.tbl", 5),
            FileInfo::new("https://h/secret.fits", "secret.fits", 5).denied(),
        ])]
    }

    #[derive(Default)]
    struct RecordingWorkspace {
        saved: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WorkspaceSink for RecordingWorkspace {
        async fn save(&self, name: &str, _content: &str) -> Result<()> {
            self.saved.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    struct BrokenWorkspace;

    #[async_trait]
    impl WorkspaceSink for BrokenWorkspace {
        async fn save(&self, _name: &str, _content: &str) -> Result<()> {
            Err(Error::Other("workspace offline".into()))
        }
    }

    fn worker(staging: &Path) -> (DownloadScriptWorker, Arc<MemoryJob>) {
        let mut config = Config::default();
        config.packaging.staging_dir = staging.to_path_buf();
        let resolver = Arc::new(StagingUrlResolver::new("http://irsa.example", staging));
        let job = Arc::new(MemoryJob::new("job-script-1"));
        let mut worker = DownloadScriptWorker::new(
            Arc::new(config),
            Arc::new(ProcessorRegistry::with_inline()),
            resolver,
        );
        worker.set_job(job.clone());
        (worker, job)
    }

    fn inline_request(groups: &[FileGroup], scripts: Vec<ScriptType>) -> WorkerRequest {
        WorkerRequest {
            processor_id: "inline".into(),
            params: serde_json::json!({ "groups": groups }),
            base_file_name: "wise".into(),
            scripts,
            ..Default::default()
        }
    }

    #[test]
    fn test_curl_script_has_cookies_and_resolved_local_urls() {
        let (script, count) = build_script(ScriptType::Curl, &groups(), &resolver(), Some("WISE"));
        assert_eq!(count, 2);
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("# WISE\n"));
        assert!(script.contains("# skipped, access denied: secret.fits"));
        assert!(script.contains(
            "curl -s -L --create-dirs -o 'wise/w1.fits' -H 'Cookie: session=abc' 'https://h/data/w1.fits'"
        ));
        assert!(script.contains("'http://irsa.example/download?file=cat.tbl&return=cat.tbl'"));
        assert!(!script.contains("https://h/secret.fits"));
    }

    #[test]
    fn test_wget_script_creates_directories() {
        let (script, _) = build_script(ScriptType::Wget, &groups(), &resolver(), None);
        assert!(script.contains("mkdir -p 'wise'\nwget -q -O 'wise/w1.fits' --header 'Cookie: session=abc'"));
    }

    #[test]
    fn test_url_list_is_plain() {
        let (script, count) = build_script(ScriptType::Urls, &groups(), &resolver(), Some("t"));
        assert_eq!(count, 2);
        assert_eq!(script.lines().count(), 2);
        assert_eq!(script.lines().next(), Some("https://h/data/w1.fits"));
    }

    #[test]
    fn test_local_file_outside_staging_is_left_out() {
        let groups = vec![FileGroup::new(vec![
            FileInfo::new("/archive/wise/w1.fits", "w1.fits", 10),
            FileInfo::new("/stage/cat.tbl", "cat.tbl", 5),
        ])];

        let (script, count) = build_script(ScriptType::Curl, &groups, &resolver(), None);
        assert_eq!(count, 1);
        assert!(script.contains("# 1 files in download script\n"));
        assert!(script.contains("# skipped, not downloadable: w1.fits\n"));
        assert!(!script.contains("file=w1.fits"));

        let (urls, count) = build_script(ScriptType::Urls, &groups, &resolver(), None);
        assert_eq!(count, 1);
        assert_eq!(urls, "http://irsa.example/download?file=cat.tbl&return=cat.tbl\n");
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn test_script_job_publishes_each_script() {
        let staging = TempDir::new().unwrap();
        let (worker, job) = worker(staging.path());
        let mut groups = groups();
        groups[0].files[1].locator = staging.path().join("cat.tbl").to_string_lossy().into_owned();

        let outcome = worker
            .do_command(&inline_request(&groups, vec![ScriptType::Curl, ScriptType::Urls]))
            .await
            .unwrap();

        assert_eq!(outcome.phase, JobPhase::Completed);
        let ids: Vec<_> = outcome.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["curl", "urls"]);
        assert!(outcome.results[0].href.contains("return=wise-curl.sh"));
        let status = job.snapshot();
        assert_eq!(status.progress, 100);
        assert_eq!(status.summary.as_deref(), Some("2 files in download script"));
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_zero_files_is_a_valid_script() {
        let staging = TempDir::new().unwrap();
        let (worker, job) = worker(staging.path());

        let outcome = worker.do_command(&inline_request(&[], vec![])).await.unwrap();

        assert_eq!(outcome.phase, JobPhase::Completed);
        assert_eq!(outcome.results.len(), 1);
        let status = job.snapshot();
        assert_eq!(status.progress, 100);
        assert_eq!(status.summary.as_deref(), Some("0 files in download script"));
    }

    #[tokio::test]
    async fn test_workspace_save_and_failure_does_not_fail_job() {
        let staging = TempDir::new().unwrap();
        let workspace = Arc::new(RecordingWorkspace::default());
        let (worker, _) = worker(staging.path());
        let worker = worker.with_workspace(workspace.clone());
        let mut request = inline_request(&groups(), vec![ScriptType::Wget]);
        request.save_to_workspace = true;

        worker.do_command(&request).await.unwrap();
        assert_eq!(*workspace.saved.lock().unwrap(), vec!["wise-wget.sh".to_string()]);

        let (worker, job) = worker_with_broken_workspace(staging.path());
        let outcome = worker.do_command(&request).await.unwrap();
        assert_eq!(outcome.phase, JobPhase::Completed);
        assert_eq!(job.snapshot().phase, JobPhase::Completed);
    }

    fn worker_with_broken_workspace(staging: &Path) -> (DownloadScriptWorker, Arc<MemoryJob>) {
        let (worker, job) = worker(staging);
        (worker.with_workspace(Arc::new(BrokenWorkspace)), job)
    }

    #[tokio::test]
    async fn test_directory_workspace_writes_file() {
        let dir = TempDir::new().unwrap();
        let workspace = DirectoryWorkspace::new(dir.path().join("ws"));
        workspace.save("a/b.sh", "echo").await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("ws/a_b.sh")).unwrap(), "echo");
    }
}
