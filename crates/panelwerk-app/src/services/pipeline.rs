// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer — wires config, restoration client, runner, exporter and
// object store together for the CLI commands.
//
// Output locations are checked before any page is submitted. Once jobs have
// run, a failed write only loses that output: it is recorded in the report
// and every other output is still attempted.

use std::path::{Path, PathBuf};

use chrono::Utc;
use panelwerk_core::AppConfig;
use panelwerk_core::error::{PanelwerkError, Result};
use panelwerk_core::types::{JobStatus, RestoreOptions};
use panelwerk_document::{
    Document, ImageProcessor, PdfExporter, PostProcessor, QaChecker, load_source,
};
use panelwerk_restore::{
    BatchProcessor, BatchSummary, HostedRestorationClient, Job, JobResult, JobRunner,
    RestorationClient, assemble,
};
use panelwerk_store::{LocalObjectStore, ObjectStore, StoredObject};
use tracing::{error, info, instrument, warn};

use super::inputs::{collect_inputs, job_name, job_names, mask_for};

/// Batch invocation settings taken from the command line.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub input_dir: PathBuf,
    pub mask_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
}

/// What a command produced.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<String>,
    pub summary: BatchSummary,
    pub written: Vec<PathBuf>,
    pub staged: Vec<String>,
    /// Outputs that could not be written or staged, with the cause.
    pub write_failures: Vec<String>,
    /// Inputs that never became jobs.
    pub rejected_inputs: usize,
    /// No page was accepted, so nothing was written.
    pub empty_document: bool,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        !self.empty_document
            && self.rejected_inputs == 0
            && self.write_failures.is_empty()
            && self.summary.all_completed()
    }

    fn record_failure(&mut self, target: impl std::fmt::Display, err: &PanelwerkError) {
        error!(target = %target, error = %err, "output not written");
        self.write_failures.push(format!("{target}: {err}"));
    }

    fn record_write(&mut self, path: &Path, outcome: Result<()>) {
        match outcome {
            Ok(()) => self.written.push(path.to_path_buf()),
            Err(e) => self.record_failure(path.display(), &e),
        }
    }
}

/// Everything a restore run needs, built once from validated config.
pub struct Pipeline<C = HostedRestorationClient> {
    config: AppConfig,
    runner: JobRunner<C>,
    store: Option<LocalObjectStore>,
    exporter: PdfExporter,
}

impl Pipeline<HostedRestorationClient> {
    /// Validate `config`, resolve the access token and open the store.
    /// Fails before any job exists.
    pub fn init(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let client = HostedRestorationClient::from_config(&config.service)?;
        info!(endpoint = client.endpoint(), "restoration client ready");
        Self::with_client(config, client)
    }
}

impl<C: RestorationClient> Pipeline<C> {
    /// Build a pipeline around an already constructed client.
    pub fn with_client(config: AppConfig, client: C) -> Result<Self> {
        config.validate()?;
        let runner = JobRunner::new(
            client,
            post_processor(&config.defaults),
            QaChecker::new(config.qa.clone()),
            config.retry.clone(),
        )
        .with_max_pixel_area(config.service.max_pixel_area);

        let store = config
            .store_dir
            .as_deref()
            .map(LocalObjectStore::open)
            .transpose()?;

        Ok(Self {
            config,
            runner,
            store,
            exporter: PdfExporter::new(),
        })
    }

    /// Restore one page into a one-page PDF at `output`.
    #[instrument(skip_all, fields(input = %input.display()))]
    pub async fn restore(
        &self,
        input: &Path,
        mask: Option<&Path>,
        output: &Path,
    ) -> Result<RunReport> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            prepare_output_dir(parent)?;
        }
        let name = job_name(input);
        let source = load_source(input, mask)?;
        let job = Job::new(name.clone(), source, self.config.defaults.clone())?;
        let result = self.runner.run(&job).await;

        let results = [result];
        let mut report = RunReport {
            outcomes: results.iter().map(JobResult::outcome_line).collect(),
            summary: summarize(&results),
            ..Default::default()
        };

        let geometry = &self.config.defaults.geometry;
        let Some(documents) = assembled(assemble(&results, geometry, true, &name), &mut report)
        else {
            return Ok(report);
        };
        for document in &documents {
            let outcome = self.exporter.write_to_file(document, output);
            report.record_write(output, outcome);
        }
        if let Some(text) = results[0].text() {
            let sidecar = output.with_extension("txt");
            let outcome = std::fs::write(&sidecar, text).map_err(PanelwerkError::from);
            report.record_write(&sidecar, outcome);
        }
        self.stage(&results, &mut report);
        Ok(report)
    }

    /// Restore every image in `request.input_dir`, in file-name order.
    #[instrument(skip_all, fields(input_dir = %request.input_dir.display()))]
    pub async fn batch(&self, request: &BatchRequest) -> Result<RunReport> {
        let inputs = collect_inputs(&request.input_dir)?;
        prepare_output_dir(&request.output_dir)?;
        let processor = BatchProcessor::from_config(&self.config.batch)?;

        let mut report = RunReport::default();
        let mut jobs = Vec::new();
        for (input, name) in inputs.iter().zip(job_names(&inputs)) {
            let mask = mask_for(request.mask_dir.as_deref(), input);
            let job = load_source(input, mask.as_deref())
                .and_then(|source| Job::new(name.clone(), source, self.config.defaults.clone()));
            match job {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    error!(input = %input.display(), error = %e, "input rejected");
                    report.outcomes.push(format!("{name}: rejected: {e}"));
                    report.rejected_inputs += 1;
                }
            }
        }

        let stop = processor.stop_handle();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, letting running jobs finish");
                stop.stop();
            }
        });

        let run = processor
            .run(&self.runner, jobs, |event| {
                info!(
                    finished = event.finished,
                    total = event.total,
                    "{}",
                    event.result.outcome_line()
                );
            })
            .await;
        interrupt.abort();

        report.summary = run.summary();
        let results = run.into_jobs();
        report
            .outcomes
            .extend(results.iter().map(JobResult::outcome_line));

        let title = request
            .input_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "panelwerk".to_owned());
        let assembly = assemble(
            &results,
            &self.config.defaults.geometry,
            self.config.batch.combine,
            &title,
        );
        let Some(documents) = assembled(assembly, &mut report) else {
            return Ok(report);
        };
        for document in &documents {
            let path = request.output_dir.join(format!("{}.pdf", document.title));
            let outcome = self.exporter.write_to_file(document, &path);
            report.record_write(&path, outcome);
        }
        for result in &results {
            if let Some(text) = result.text() {
                let path = request.output_dir.join(format!("{}.txt", result.name()));
                let outcome = std::fs::write(&path, text).map_err(PanelwerkError::from);
                report.record_write(&path, outcome);
            }
        }
        self.stage(&results, &mut report);
        Ok(report)
    }

    /// Copy accepted pages and written files into the object store, when one
    /// is configured. Keys are grouped under a per-run timestamp.
    fn stage(&self, results: &[JobResult], report: &mut RunReport) {
        let Some(store) = &self.store else {
            return;
        };
        let run_key = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let mut staged = Vec::new();

        for result in results {
            if let Some(buffer) = result.final_buffer() {
                let key = format!("{run_key}/pages/{}.png", result.name());
                let put = ImageProcessor::new(buffer.clone())
                    .to_png_bytes()
                    .and_then(|png| store.put(&key, &png));
                match put {
                    Ok(url) => staged.push(url),
                    Err(e) => report.record_failure(&key, &e),
                }
            }
        }
        for file in report.written.clone() {
            let Some(file_name) = file.file_name() else {
                continue;
            };
            let key = format!("{run_key}/{}", file_name.to_string_lossy());
            let put = std::fs::read(&file)
                .map_err(PanelwerkError::from)
                .and_then(|bytes| store.put(&key, &bytes));
            match put {
                Ok(url) => staged.push(url),
                Err(e) => report.record_failure(&key, &e),
            }
        }
        info!(objects = staged.len(), run = %run_key, "outputs staged");
        report.staged = staged;
    }
}

/// Create `dir` if needed and make sure files can be created in it.
fn prepare_output_dir(dir: &Path) -> Result<()> {
    let unusable = |e: std::io::Error| {
        PanelwerkError::Config(format!("output directory {} is unusable: {e}", dir.display()))
    };
    std::fs::create_dir_all(dir).map_err(unusable)?;
    tempfile::tempfile_in(dir).map_err(unusable)?;
    Ok(())
}

/// Objects in the configured store whose key starts with `prefix`.
pub fn stored_objects(config: &AppConfig, prefix: &str) -> Result<Vec<StoredObject>> {
    let dir = config.store_dir.as_deref().ok_or_else(|| {
        PanelwerkError::Config("store_dir is not set in the configuration".into())
    })?;
    LocalObjectStore::open(dir)?.list(prefix)
}

/// Documents from an assembly, or `None` when there is nothing to write.
/// Either way the cause ends up in the report.
fn assembled(assembly: Result<Vec<Document>>, report: &mut RunReport) -> Option<Vec<Document>> {
    match assembly {
        Ok(documents) => Some(documents),
        Err(PanelwerkError::EmptyDocument) => {
            error!("no page passed restoration, nothing written");
            report.empty_document = true;
            None
        }
        Err(e) => {
            report.record_failure("document assembly", &e);
            None
        }
    }
}

fn summarize(results: &[JobResult]) -> BatchSummary {
    let count = |status: JobStatus| results.iter().filter(|r| r.status() == status).count();
    BatchSummary {
        total: results.len(),
        completed: count(JobStatus::Completed),
        failed: count(JobStatus::Failed),
        skipped: count(JobStatus::Skipped),
    }
}

fn post_processor(options: &RestoreOptions) -> PostProcessor {
    let post = PostProcessor::new();
    if options.face_restore {
        warn!("no face enhancer is available in this build; pages are left as restored");
    }

    #[cfg(feature = "ocr")]
    let post = if options.ocr {
        match panelwerk_document::OcrTextExtractor::with_default_models() {
            Ok(extractor) => post.with_text_extractor(extractor),
            Err(e) => {
                warn!(error = %e, "OCR models unavailable, text extraction disabled");
                post
            }
        }
    } else {
        post
    };

    #[cfg(not(feature = "ocr"))]
    if options.ocr {
        warn!("built without the `ocr` feature, text extraction disabled");
    }

    post
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use panelwerk_core::types::ScaleFactor;
    use panelwerk_restore::{RestorationOutcome, RestorationRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Restores every page by inverting it. Counts submissions.
    #[derive(Default)]
    struct Inverting {
        calls: AtomicUsize,
    }

    impl RestorationClient for Inverting {
        async fn submit(&self, request: &RestorationRequest<'_>) -> RestorationOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut buffer = request.image.clone();
            image::imageops::invert(&mut buffer);
            RestorationOutcome::Success { buffer }
        }
    }

    fn scan() -> RgbImage {
        RgbImage::from_fn(32, 32, |x, y| {
            if ((x / 4) + (y / 4)) % 2 == 0 {
                Rgb([40, 40, 40])
            } else {
                Rgb([220, 220, 220])
            }
        })
    }

    fn small_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.defaults.scale_factor = ScaleFactor::X1;
        config.defaults.geometry.dpi = 72;
        config
    }

    fn scans(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            scan().save(dir.path().join(name)).unwrap();
        }
        dir
    }

    #[test]
    fn init_fails_without_token() {
        let mut config = AppConfig::default();
        config.service.token_env = "PANELWERK_APP_TEST_TOKEN_NEVER_SET".into();
        assert!(matches!(
            Pipeline::init(config),
            Err(PanelwerkError::Config(_))
        ));
    }

    #[test]
    fn init_rejects_invalid_defaults_before_token() {
        let mut config = AppConfig::default();
        config.defaults.geometry.dpi = 10;
        config.service.token_env = "PANELWERK_APP_TEST_TOKEN_NEVER_SET".into();
        match Pipeline::init(config) {
            Err(PanelwerkError::Config(msg)) => assert!(msg.contains("dpi")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("invalid config accepted"),
        }
    }

    #[test]
    fn stored_requires_store_dir() {
        assert!(stored_objects(&AppConfig::default(), "").is_err());
    }

    #[test]
    fn stored_lists_configured_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::open(dir.path()).unwrap();
        store.put("run/book.pdf", b"%PDF").unwrap();
        drop(store);

        let config = AppConfig {
            store_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let objects = stored_objects(&config, "run/").unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].key, "run/book.pdf");
    }

    #[test]
    fn empty_assembly_is_recorded_not_raised() {
        let mut report = RunReport::default();
        assert!(assembled(Err(PanelwerkError::EmptyDocument), &mut report).is_none());
        assert!(report.empty_document);
        assert!(!report.succeeded());

        let mut report = RunReport::default();
        assert!(assembled(Err(PanelwerkError::PdfError("x".into())), &mut report).is_none());
        assert!(!report.empty_document);
        assert_eq!(report.write_failures.len(), 1);
    }

    #[test]
    fn report_fails_on_rejected_inputs() {
        let report = RunReport {
            summary: BatchSummary {
                total: 1,
                completed: 1,
                ..Default::default()
            },
            rejected_inputs: 1,
            ..Default::default()
        };
        assert!(!report.succeeded());
    }

    #[tokio::test]
    async fn unusable_output_dir_fails_before_any_submission() {
        let input = scans(&["page-01.png"]);
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let pipeline = Pipeline::with_client(small_config(), Inverting::default()).unwrap();

        let request = BatchRequest {
            input_dir: input.path().to_path_buf(),
            mask_dir: None,
            output_dir: blocker.path().to_path_buf(),
        };
        assert!(matches!(
            pipeline.batch(&request).await,
            Err(PanelwerkError::Config(_))
        ));
        assert_eq!(pipeline.runner.client().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn same_stem_inputs_write_separate_documents() {
        let input = scans(&["page-01.png", "page-01.bmp"]);
        let output = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::with_client(small_config(), Inverting::default()).unwrap();

        let request = BatchRequest {
            input_dir: input.path().to_path_buf(),
            mask_dir: None,
            output_dir: output.path().join("restored"),
        };
        let report = pipeline.batch(&request).await.unwrap();

        assert!(report.succeeded(), "{:?}", report.write_failures);
        assert_eq!(
            report.written,
            [
                request.output_dir.join("page-01.bmp.pdf"),
                request.output_dir.join("page-01.png.pdf"),
            ]
        );
        assert!(report.written.iter().all(|path| path.is_file()));
    }

    #[tokio::test]
    async fn failed_write_is_reported_with_every_outcome() {
        let input = scans(&["page-01.png", "page-02.png"]);
        let output = tempfile::tempdir().unwrap();
        // A directory squatting on the first PDF's path makes that write fail.
        std::fs::create_dir(output.path().join("page-01.pdf")).unwrap();
        let pipeline = Pipeline::with_client(small_config(), Inverting::default()).unwrap();

        let request = BatchRequest {
            input_dir: input.path().to_path_buf(),
            mask_dir: None,
            output_dir: output.path().to_path_buf(),
        };
        let report = pipeline.batch(&request).await.unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert!(report.summary.all_completed());
        assert_eq!(report.written, [output.path().join("page-02.pdf")]);
        assert_eq!(report.write_failures.len(), 1);
        assert!(report.write_failures[0].contains("page-01.pdf"));
        assert!(!report.succeeded());
    }
}
