use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;

use crate::archive::ArchiveClient;
use crate::config::ResolvedConfig;
use crate::convert::Converter;
use crate::domain::{RawScan, ScanRef, SubjectRef, TranslationTable};
use crate::error::KiraError;
use crate::pattern::{Decomposition, ScanNameSpec, decompose};
use crate::report::{RunReport, ScanOutcome, ScanRecord, SkipReason, WarningKind};
use crate::session;
use crate::store::{DestinationPath, Layout};

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    pub force: bool,
    // names only: no fetch, no conversion, no directories created
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct ScanAttempt {
    pub outcome: ScanOutcome,
    pub destination: Option<DestinationPath>,
}

impl ScanAttempt {
    fn skipped(reason: SkipReason, destination: Option<DestinationPath>) -> Self {
        Self {
            outcome: ScanOutcome::Skipped(reason),
            destination,
        }
    }
}

pub fn resolve_scan_name(
    raw_label: &str,
    translation: Option<&TranslationTable>,
) -> Result<ScanNameSpec, SkipReason> {
    let desired = match translation {
        Some(table) => table
            .lookup(raw_label)
            .ok_or(SkipReason::NotInTranslationTable)?,
        None => raw_label,
    };
    match decompose(desired) {
        Decomposition::Valid(spec) => Ok(spec),
        Decomposition::NoMatch(reason) => Err(SkipReason::NotExpressible(reason.to_string())),
    }
}

#[derive(Default)]
struct RunState {
    report: RunReport,
    claimed: BTreeMap<Utf8PathBuf, String>,
}

#[derive(Clone)]
pub struct App<A: ArchiveClient, C: Converter> {
    layout: Layout,
    archive: A,
    converter: C,
}

impl<A: ArchiveClient, C: Converter> App<A, C> {
    pub fn new(layout: Layout, archive: A, converter: C) -> Self {
        Self {
            layout,
            archive,
            converter,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn run(
        &self,
        config: &ResolvedConfig,
        options: FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, KiraError> {
        let start = Instant::now();
        if !self.archive.project_exists(&config.project)? {
            return Err(KiraError::ProjectNotFound(config.project.clone()));
        }

        let (subjects, explicit) = match &config.subjects {
            Some(subjects) => (subjects.clone(), true),
            None => (self.archive.list_subjects(&config.project)?, false),
        };
        sink.event(ProgressEvent {
            message: format!(
                "phase=Resolve; project {} with {} subject(s)",
                config.project,
                subjects.len()
            ),
            elapsed: None,
        });

        let mut state = RunState::default();
        for raw_subject in &subjects {
            self.process_subject(raw_subject, explicit, config, options, &mut state, sink);
        }
        let report = state.report;

        sink.event(ProgressEvent {
            message: format!("phase=Done; {} scan(s) processed", report.records.len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(report)
    }

    fn process_subject(
        &self,
        raw_subject: &str,
        explicit: bool,
        config: &ResolvedConfig,
        options: FetchOptions,
        state: &mut RunState,
        sink: &dyn ProgressSink,
    ) {
        let report = &mut state.report;
        let exists = if explicit {
            match self.archive.subject_exists(&config.project, raw_subject) {
                Ok(exists) => exists,
                Err(err) => {
                    tracing::warn!(subject = raw_subject, "subject lookup failed: {err}");
                    report.warn(WarningKind::Listing, Some(raw_subject), err.to_string());
                    return;
                }
            }
        } else {
            true
        };
        if !exists {
            tracing::warn!(subject = raw_subject, "subject does not exist");
            report.warn(
                WarningKind::MissingSubject,
                Some(raw_subject),
                "subject does not exist on archive",
            );
            return;
        }

        let subject = match SubjectRef::resolve(
            raw_subject,
            exists,
            config.subject_translation.as_ref(),
            config.zero_pad,
        ) {
            Ok(subject) => subject,
            Err(err) => {
                tracing::warn!(subject = raw_subject, "{err}");
                report.warn(WarningKind::ResolutionMismatch, Some(raw_subject), err.to_string());
                return;
            }
        };
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; {subject} ({raw_subject})"),
            elapsed: None,
        });

        let raw_sessions = match self.archive.list_sessions(&config.project, raw_subject) {
            Ok(sessions) => sessions,
            Err(err) => {
                tracing::warn!(subject = %subject, "session listing failed: {err}");
                report.warn(WarningKind::Listing, Some(raw_subject), err.to_string());
                return;
            }
        };
        if raw_sessions.is_empty() {
            report.warn(WarningKind::Listing, Some(raw_subject), "no sessions were found");
            return;
        }

        // Canonical session labels feed every destination name below.
        let resolution = session::resolve(
            &subject,
            &raw_sessions,
            config.session_labels.as_deref(),
            config.session_mode,
        );
        for warning in &resolution.warnings {
            report.warn(WarningKind::ResolutionMismatch, Some(raw_subject), warning.clone());
        }

        for session_ref in &resolution.sessions {
            let scans = match self.archive.list_scans(session_ref) {
                Ok(scans) => scans,
                Err(err) => {
                    tracing::warn!(subject = %subject, session = %session_ref, "scan listing failed: {err}");
                    report.warn(WarningKind::Listing, Some(raw_subject), err.to_string());
                    continue;
                }
            };
            for raw_scan in scans {
                let wanted = config
                    .scan_labels
                    .as_ref()
                    .map(|labels| labels.contains(&raw_scan.raw_label))
                    .unwrap_or(true);
                if !wanted {
                    continue;
                }
                let scan = ScanRef::new(raw_scan, session_ref);
                let attempt =
                    self.acquire(&subject, &scan, config, options, &mut state.claimed, sink);
                match &attempt.outcome {
                    ScanOutcome::Skipped(SkipReason::NotInTranslationTable) => report.warn(
                        WarningKind::ResolutionMismatch,
                        Some(raw_subject),
                        format!("scan label \"{}\" is not in the scan translation table", scan.raw_type),
                    ),
                    ScanOutcome::Skipped(SkipReason::DuplicateDestination(other)) => report.warn(
                        WarningKind::ResolutionMismatch,
                        Some(raw_subject),
                        format!(
                            "scan {} ({}) resolves to a destination already used by {other}",
                            scan.numeric_id, scan.raw_type
                        ),
                    ),
                    _ => {}
                }
                report.record(ScanRecord {
                    subject: subject.to_string(),
                    session: session_ref
                        .canonical_label
                        .as_ref()
                        .map(|label| format!("ses-{label}"))
                        .unwrap_or_else(|| session_ref.raw_identifier().to_string()),
                    scan_id: scan.numeric_id.clone(),
                    scan_label: scan.raw_type.clone(),
                    outcome: attempt.outcome,
                    destination: attempt.destination.map(|dest| dest.stem_path().to_string()),
                });
            }
        }
    }

    // Destinations claimed earlier in this run are skipped before any fetch.
    pub fn acquire(
        &self,
        subject: &SubjectRef,
        scan: &ScanRef,
        config: &ResolvedConfig,
        options: FetchOptions,
        claimed: &mut BTreeMap<Utf8PathBuf, String>,
        sink: &dyn ProgressSink,
    ) -> ScanAttempt {
        let session = &scan.source_session;
        if config.reserved_scan_ids.contains(&scan.numeric_id) {
            tracing::info!(subject = %subject, scan = %scan.numeric_id, "scan is a localizer or setup scan");
            return ScanAttempt::skipped(SkipReason::ReservedScanId, None);
        }

        let spec = match resolve_scan_name(&scan.raw_type, config.scan_translation.as_ref()) {
            Ok(spec) => spec,
            Err(reason) => {
                tracing::warn!(
                    subject = %subject,
                    session = %session,
                    scan = %scan.raw_type,
                    "skipping scan: {reason}"
                );
                return ScanAttempt::skipped(reason, None);
            }
        };
        let destination = self.layout.destination(subject, session, &spec);
        let owner = format!("{subject} {session} scan {}", scan.numeric_id);
        if let Some(other) = claimed.get(&destination.stem_path()) {
            tracing::warn!(
                subject = %subject,
                session = %session,
                scan = %scan.raw_type,
                "destination {} already used by {other}",
                destination.basename
            );
            return ScanAttempt::skipped(
                SkipReason::DuplicateDestination(other.clone()),
                Some(destination),
            );
        }
        claimed.insert(destination.stem_path(), owner);
        sink.event(ProgressEvent {
            message: format!(
                "phase=Resolve; {} -> {}",
                scan.raw_type, destination.basename
            ),
            elapsed: None,
        });
        if options.dry_run {
            return ScanAttempt {
                outcome: ScanOutcome::Planned,
                destination: Some(destination),
            };
        }

        let staging = self.layout.staging_dir(subject, scan);
        let fetched = match self.fetch_raw(subject, scan, &staging, config, sink) {
            Ok(fetched) => fetched,
            Err(outcome) => {
                return ScanAttempt {
                    outcome,
                    destination: Some(destination),
                };
            }
        };

        let outcome = self.convert(subject, scan, &staging, &destination, fetched, options, sink);
        ScanAttempt {
            outcome,
            destination: Some(destination),
        }
    }

    fn fetch_raw(
        &self,
        subject: &SubjectRef,
        scan: &ScanRef,
        staging: &Utf8PathBuf,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<bool, ScanOutcome> {
        if Layout::has_staged_files(staging) {
            tracing::debug!(subject = %subject, scan = %scan.raw_type, "raw files already staged at {staging}");
            sink.event(ProgressEvent {
                message: "phase=Fetch; raw files already staged".to_string(),
                elapsed: None,
            });
            return Ok(false);
        }

        sink.event(ProgressEvent {
            message: format!("phase=Fetch; scan {} ({})", scan.numeric_id, scan.raw_type),
            elapsed: None,
        });
        let start = Instant::now();
        let raw = RawScan::new(scan.numeric_id.clone(), scan.raw_type.clone());
        let result = config.retry.run(&scan.numeric_id, |_| {
            // Another run may have staged the files meanwhile.
            if Layout::has_staged_files(staging) {
                return Ok(Vec::new());
            }
            self.archive
                .fetch(&scan.source_session, &raw, staging.as_std_path())
        });

        match result {
            Ok(_) if Layout::has_staged_files(staging) => {
                sink.event(ProgressEvent {
                    message: "phase=Fetch; raw files staged".to_string(),
                    elapsed: Some(start.elapsed()),
                });
                Ok(true)
            }
            Ok(_) => {
                let message = "archive returned no files".to_string();
                tracing::error!(subject = %subject, session = %scan.source_session, scan = %scan.raw_type, "{message}");
                Err(ScanOutcome::FailedFetch(message))
            }
            Err(KiraError::ArchiveNotFound(detail)) => {
                tracing::warn!(subject = %subject, session = %scan.source_session, scan = %scan.raw_type, "scan not found on archive");
                Err(ScanOutcome::Skipped(SkipReason::NotFound(detail)))
            }
            Err(err) => {
                tracing::error!(subject = %subject, session = %scan.source_session, scan = %scan.raw_type, "fetch failed: {err}");
                Err(ScanOutcome::FailedFetch(err.to_string()))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn convert(
        &self,
        subject: &SubjectRef,
        scan: &ScanRef,
        staging: &Utf8PathBuf,
        destination: &DestinationPath,
        fetched: bool,
        options: FetchOptions,
        sink: &dyn ProgressSink,
    ) -> ScanOutcome {
        let extensions = self.converter.output_extensions();
        let existing = Layout::existing_outputs(destination, extensions);
        if !existing.is_empty() {
            if !options.force {
                tracing::info!(subject = %subject, scan = %scan.raw_type, "output already exists: {}", existing[0]);
                sink.event(ProgressEvent {
                    message: "phase=Convert; output already exists".to_string(),
                    elapsed: None,
                });
                return ScanOutcome::ConvertCached { fetched };
            }
            if let Err(err) = Layout::remove_outputs(&existing) {
                return ScanOutcome::FailedConvert(err.to_string());
            }
        }

        if let Err(err) = Layout::ensure_dir(&destination.directory) {
            return ScanOutcome::FailedConvert(err.to_string());
        }
        sink.event(ProgressEvent {
            message: format!("phase=Convert; {}", destination.basename),
            elapsed: None,
        });
        let start = Instant::now();
        if let Err(err) = self.converter.convert(
            staging.as_std_path(),
            destination.directory.as_std_path(),
            &destination.basename,
        ) {
            tracing::error!(subject = %subject, session = %scan.source_session, scan = %scan.raw_type, "conversion failed: {err}");
            return ScanOutcome::FailedConvert(err.to_string());
        }
        if Layout::existing_outputs(destination, extensions).is_empty() {
            let message = format!("converter produced no output for {}", destination.basename);
            tracing::error!(subject = %subject, session = %scan.source_session, scan = %scan.raw_type, "{message}");
            return ScanOutcome::FailedConvert(message);
        }
        sink.event(ProgressEvent {
            message: "phase=Convert; done".to_string(),
            elapsed: Some(start.elapsed()),
        });
        ScanOutcome::Converted { fetched }
    }
}
