//! Execution engine - converges a run list top to bottom
//!
//! Each declaration goes through its guards, then its provider. Changed
//! declarations queue their notifications: immediate ones run before the
//! next declaration, delayed ones once after the whole list.

use crate::context::{ApplyContext, NoProgress, ProgressCallback};
use crate::declaration::{Declaration, ResourceRef, Timing};
use crate::diff::ResourceDiff;
use crate::error::{Failure, FailureKind, Result};
use crate::guard::{GuardEvaluator, GuardVerdict, SystemProbe, evaluate_guards};
use crate::notify::{NotificationQueue, Pending};
use crate::planner::RunList;
use crate::types::{
    ChangeResult, DeclarationState, ExecuteOptions, ExecuteSummary, FailurePolicy,
    GuardErrorPolicy,
};
use serde::Serialize;
use std::collections::HashSet;
use std::time::{Duration, Instant};

const CONVERGE: &str = "converge";

/// Outcome of one declaration in list order
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub address: String,
    pub description: String,
    pub state: DeclarationState,
    pub duration_ms: u64,
    /// Notifications queued by this declaration, e.g. `restart service[nginx] (delayed)`
    pub notified: Vec<String>,
    /// What a dry run found to change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<ResourceDiff>,
}

/// A notification the engine processed
#[derive(Debug, Clone, Serialize)]
pub struct NotificationRecord {
    pub source: String,
    pub target: String,
    pub action: String,
    pub timing: Timing,
    pub state: DeclarationState,
}

/// Everything that happened during one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub entries: Vec<ReportEntry>,
    pub notifications: Vec<NotificationRecord>,
    pub summary: ExecuteSummary,
    /// Failures that were not ignored, in the order they happened
    pub failures: Vec<Failure>,
    /// The failure that stopped the run under fail-fast
    pub halted: Option<Failure>,
}

impl RunReport {
    /// No declaration or notification failed (ignored failures don't count)
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Look up the entry for an address
    pub fn entry(&self, address: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.address == address)
    }

    /// Turn the report into the summary, or the error that should end the process
    pub fn into_result(self) -> Result<ExecuteSummary> {
        if let Some(failure) = self.halted {
            return Err(failure.into());
        }
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.into()),
            None => Ok(self.summary),
        }
    }
}

/// Execute a run list with the given options and callbacks
///
/// # Arguments
/// * `run_list` - Validated declarations, in execution order
/// * `opts` - Execution options (dry run, failure policy, timeouts)
/// * `evaluator` - Probe used for guards
/// * `progress` - Progress callback
///
/// Failures never surface as `Err` here; they are recorded in the report.
pub fn execute<P: ProgressCallback>(
    run_list: &RunList,
    opts: &ExecuteOptions,
    evaluator: &dyn GuardEvaluator,
    progress: &mut P,
) -> RunReport {
    let mut engine = Engine {
        run_list,
        opts,
        evaluator,
        progress,
        queue: NotificationQueue::new(),
        report: RunReport {
            dry_run: opts.dry_run,
            ..RunReport::default()
        },
    };
    engine.run();
    engine.progress.on_run_complete(&engine.report.summary);
    engine.report
}

/// Simple execution against the live system without progress reporting
pub fn execute_simple(run_list: &RunList, opts: &ExecuteOptions) -> RunReport {
    execute(run_list, opts, &SystemProbe, &mut NoProgress)
}

struct Engine<'a, P: ProgressCallback> {
    run_list: &'a RunList,
    opts: &'a ExecuteOptions,
    evaluator: &'a dyn GuardEvaluator,
    progress: &'a mut P,
    queue: NotificationQueue,
    report: RunReport,
}

impl<P: ProgressCallback> Engine<'_, P> {
    fn run(&mut self) {
        let run_list = self.run_list;
        self.progress.on_run_start(run_list.len());

        for (index, declaration) in run_list.iter().enumerate() {
            if self.report.halted.is_some() {
                self.record_not_run(declaration);
                continue;
            }
            self.run_declaration(index, declaration);
            self.drain_immediate();
        }

        if self.report.halted.is_some() {
            let dropped = self.queue.delayed_len();
            if dropped > 0 {
                log::warn!("run halted, dropping {dropped} delayed notification(s)");
            }
        } else {
            self.drain_delayed();
        }
    }

    fn run_declaration(&mut self, index: usize, declaration: &Declaration) {
        let address = declaration.address();
        let label = address.to_string();
        let description = declaration.resource.description();
        self.progress.on_declaration_start(index, &label, &description);

        let started = Instant::now();
        let mut diff = None;
        let mut state = DeclarationState::Pending;

        if declaration.notify_only {
            advance(
                &mut state,
                DeclarationState::Skipped {
                    reason: "runs only when notified".to_string(),
                },
            );
        } else {
            advance(&mut state, DeclarationState::Evaluating);
            let timeout = self.timeout_for(declaration);
            match self.check_guards(declaration, &label, timeout) {
                Err(failure) => {
                    let failed = self.fail(declaration.ignore_failure, failure);
                    advance(&mut state, failed);
                }
                Ok(GuardVerdict::Skip(reason)) => {
                    log::info!("{label}: skipped, {reason}");
                    advance(&mut state, DeclarationState::Skipped { reason });
                }
                Ok(GuardVerdict::Run) => {
                    advance(&mut state, DeclarationState::Converging);
                    let outcome = if self.opts.dry_run {
                        self.check(declaration, &label, &mut diff)
                    } else {
                        self.converge(declaration, &label, timeout)
                    };
                    advance(&mut state, outcome);
                }
            }
        }

        let notified = if matches!(state, DeclarationState::Succeeded { changed: true }) {
            self.enqueue_notifications(&address, declaration)
        } else {
            Vec::new()
        };

        self.progress.on_declaration_complete(&label, &state);
        self.report.summary.add_state(&state);
        self.report.entries.push(ReportEntry {
            address: label,
            description,
            state,
            duration_ms: elapsed_ms(started),
            notified,
            diff,
        });
    }

    fn converge(
        &mut self,
        declaration: &Declaration,
        label: &str,
        timeout: Option<Duration>,
    ) -> DeclarationState {
        let mut ctx = ApplyContext::new(false, self.opts.verbose).with_timeout(timeout);
        match declaration.resource.converge(&mut ctx) {
            Ok(ChangeResult::Failed { reason }) => self.fail(
                declaration.ignore_failure,
                Failure {
                    address: label.to_string(),
                    action: CONVERGE.to_string(),
                    reason,
                    kind: FailureKind::Provider,
                },
            ),
            Ok(result) => {
                log::debug!("{label}: {result:?}");
                DeclarationState::Succeeded {
                    changed: result.is_change(),
                }
            }
            Err(err) => self.fail(
                declaration.ignore_failure,
                Failure::from_error(label, CONVERGE, &err),
            ),
        }
    }

    /// Dry-run counterpart of `converge`: read-only check plus diff
    fn check(
        &mut self,
        declaration: &Declaration,
        label: &str,
        diff: &mut Option<ResourceDiff>,
    ) -> DeclarationState {
        match ResourceDiff::from_resource(declaration.resource.as_ref()) {
            Ok(found) => {
                let changed = found.is_some();
                *diff = found;
                DeclarationState::Succeeded { changed }
            }
            Err(err) => self.fail(
                declaration.ignore_failure,
                Failure::from_error(label, "check", &err),
            ),
        }
    }

    fn check_guards(
        &self,
        declaration: &Declaration,
        label: &str,
        timeout: Option<Duration>,
    ) -> std::result::Result<GuardVerdict, Failure> {
        let policy = self.opts.guard_errors;
        evaluate_guards(&declaration.guards, self.evaluator, timeout, |guard, err| {
            match policy {
                GuardErrorPolicy::TreatAsFalse => {
                    log::warn!("{label}: could not evaluate {guard}, treating it as false: {err:#}");
                    Ok(false)
                }
                GuardErrorPolicy::Fail => Err(err.context(format!("evaluating {guard}"))),
            }
        })
        .map_err(|err| Failure {
            address: label.to_string(),
            action: "guard".to_string(),
            reason: format!("{err:#}"),
            kind: FailureKind::Guard,
        })
    }

    fn enqueue_notifications(&mut self, source: &ResourceRef, declaration: &Declaration) -> Vec<String> {
        declaration
            .notifies
            .iter()
            .map(|notify| {
                self.queue.enqueue(
                    source.clone(),
                    notify.target.clone(),
                    notify.action.clone(),
                    notify.timing,
                );
                format!("{} {} ({})", notify.action, notify.target, notify.timing)
            })
            .collect()
    }

    fn drain_immediate(&mut self) {
        // A (target, action) pair runs at most once per chain, which also
        // breaks notification cycles
        let mut ran: HashSet<(ResourceRef, String)> = HashSet::new();
        while let Some(pending) = self.queue.pop_immediate() {
            if self.report.halted.is_some() {
                self.record_notification(&pending, DeclarationState::NotRun);
                continue;
            }
            if !ran.insert((pending.target.clone(), pending.action.clone())) {
                log::debug!("{} {} already ran in this chain", pending.action, pending.target);
                continue;
            }
            self.run_notification(&pending);
        }
    }

    fn drain_delayed(&mut self) {
        let mut ran: HashSet<(ResourceRef, String)> = HashSet::new();
        loop {
            let batch = self.queue.take_delayed();
            if batch.is_empty() {
                break;
            }
            for pending in batch {
                if self.report.halted.is_some() {
                    self.record_notification(&pending, DeclarationState::NotRun);
                    continue;
                }
                if !ran.insert((pending.target.clone(), pending.action.clone())) {
                    log::debug!("{} {} already ran this run", pending.action, pending.target);
                    continue;
                }
                self.run_notification(&pending);
                self.drain_immediate();
            }
        }
    }

    fn run_notification(&mut self, pending: &Pending) {
        let source = pending.source.to_string();
        let target = pending.target.to_string();
        self.progress
            .on_notification(&source, &target, &pending.action, pending.timing);

        let run_list = self.run_list;
        let state = match run_list.get(&pending.target) {
            Some(declaration) => self.run_action(declaration, pending),
            // Validated run lists never get here
            None => self.fail(
                false,
                Failure {
                    address: target,
                    action: pending.action.clone(),
                    reason: "notification target is not declared".to_string(),
                    kind: FailureKind::Provider,
                },
            ),
        };
        self.record_notification(pending, state);
    }

    /// Run a notified action, re-checking the target's guards first
    fn run_action(&mut self, declaration: &Declaration, pending: &Pending) -> DeclarationState {
        let label = pending.target.to_string();
        if self.opts.dry_run {
            log::info!("{label}: would {} (notified by {})", pending.action, pending.source);
            return DeclarationState::NotRun;
        }

        let mut state = DeclarationState::Pending;
        advance(&mut state, DeclarationState::Evaluating);
        let timeout = self.timeout_for(declaration);
        match self.check_guards(declaration, &label, timeout) {
            Err(failure) => {
                let failed = self.fail(declaration.ignore_failure, failure);
                advance(&mut state, failed);
            }
            Ok(GuardVerdict::Skip(reason)) => {
                log::info!("{label}: {} skipped, {reason}", pending.action);
                advance(&mut state, DeclarationState::Skipped { reason });
            }
            Ok(GuardVerdict::Run) => {
                advance(&mut state, DeclarationState::Converging);
                log::info!("{label}: {} (notified by {})", pending.action, pending.source);
                let mut ctx = ApplyContext::new(false, self.opts.verbose).with_timeout(timeout);
                let outcome = match declaration.resource.run_action(&pending.action, &mut ctx) {
                    Ok(ChangeResult::Failed { reason }) => self.fail(
                        declaration.ignore_failure,
                        Failure {
                            address: label.clone(),
                            action: pending.action.clone(),
                            reason,
                            kind: FailureKind::Provider,
                        },
                    ),
                    Ok(result) => {
                        if result.is_change() {
                            self.enqueue_notifications(&pending.target, declaration);
                        }
                        DeclarationState::Succeeded {
                            changed: result.is_change(),
                        }
                    }
                    Err(err) => self.fail(
                        declaration.ignore_failure,
                        Failure::from_error(&label, &pending.action, &err),
                    ),
                };
                advance(&mut state, outcome);
            }
        }
        state
    }

    fn fail(&mut self, ignore_failure: bool, failure: Failure) -> DeclarationState {
        let reason = failure.reason.clone();
        if ignore_failure {
            log::warn!(
                "{}: {} failed (ignored): {}",
                failure.address,
                failure.action,
                reason
            );
        } else {
            log::error!("{}: {} failed: {}", failure.address, failure.action, reason);
            if self.opts.failure_policy == FailurePolicy::FailFast && self.report.halted.is_none() {
                self.report.halted = Some(failure.clone());
            }
            self.report.failures.push(failure);
        }
        DeclarationState::Failed { reason }
    }

    fn record_not_run(&mut self, declaration: &Declaration) {
        let state = DeclarationState::NotRun;
        let address = declaration.address().to_string();
        self.progress.on_declaration_complete(&address, &state);
        self.report.summary.add_state(&state);
        self.report.entries.push(ReportEntry {
            address,
            description: declaration.resource.description(),
            state,
            duration_ms: 0,
            notified: Vec::new(),
            diff: None,
        });
    }

    fn record_notification(&mut self, pending: &Pending, state: DeclarationState) {
        self.report.summary.notifications += 1;
        self.report.notifications.push(NotificationRecord {
            source: pending.source.to_string(),
            target: pending.target.to_string(),
            action: pending.action.clone(),
            timing: pending.timing,
            state,
        });
    }

    fn timeout_for(&self, declaration: &Declaration) -> Option<Duration> {
        declaration.timeout.or(self.opts.default_timeout)
    }
}

fn advance(state: &mut DeclarationState, next: DeclarationState) {
    debug_assert!(
        state.can_transition_to(&next),
        "illegal transition {} -> {}",
        state.label(),
        next.label()
    );
    *state = next;
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::Notify;
    use crate::error::{Error, ProcessError};
    use crate::guard::{Condition, Guard};
    use crate::resource::Resource;
    use crate::types::ResourceState;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    type Journal = Arc<Mutex<Vec<String>>>;

    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        Converges,
        ReportsFailure,
        TimesOut,
    }

    #[derive(Debug)]
    struct Fake {
        kind: &'static str,
        id: &'static str,
        journal: Journal,
        applied: AtomicBool,
        behavior: Behavior,
    }

    impl Fake {
        fn new(kind: &'static str, id: &'static str, journal: &Journal) -> Self {
            Self {
                kind,
                id,
                journal: Arc::clone(journal),
                applied: AtomicBool::new(false),
                behavior: Behavior::Converges,
            }
        }

        fn behaving(mut self, behavior: Behavior) -> Self {
            self.behavior = behavior;
            self
        }

        fn declare(self) -> Declaration {
            Declaration::new(Box::new(self))
        }

        fn note(&self, event: String) {
            self.journal.lock().unwrap().push(event);
        }
    }

    impl Resource for Fake {
        fn id(&self) -> String {
            self.id.to_string()
        }

        fn description(&self) -> String {
            format!("fake {}", self.id)
        }

        fn resource_type(&self) -> &'static str {
            self.kind
        }

        fn current_state(&self) -> anyhow::Result<ResourceState> {
            if self.applied.load(Ordering::SeqCst) {
                Ok(ResourceState::Present { details: None })
            } else {
                Ok(ResourceState::Absent)
            }
        }

        fn desired_state(&self) -> ResourceState {
            ResourceState::Present { details: None }
        }

        fn converge(&self, _ctx: &mut ApplyContext) -> anyhow::Result<ChangeResult> {
            self.note(format!("converge {}[{}]", self.kind, self.id));
            match self.behavior {
                Behavior::Converges => {
                    let was_applied = self.applied.swap(true, Ordering::SeqCst);
                    Ok(ChangeResult::changed_if(!was_applied))
                }
                Behavior::ReportsFailure => Ok(ChangeResult::Failed {
                    reason: "boom".to_string(),
                }),
                Behavior::TimesOut => Err(anyhow::Error::new(ProcessError::Timeout {
                    command: "rake db:migrate".to_string(),
                    after: Duration::from_secs(2),
                })
                .context("running migrations")),
            }
        }

        fn actions(&self) -> &'static [&'static str] {
            &["restart", "run"]
        }

        fn run_action(&self, action: &str, _ctx: &mut ApplyContext) -> anyhow::Result<ChangeResult> {
            self.note(format!("{action} {}[{}]", self.kind, self.id));
            Ok(ChangeResult::Changed)
        }
    }

    fn r(s: &str) -> ResourceRef {
        s.parse().unwrap()
    }

    fn journal() -> Journal {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn events(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    fn run(list: &RunList, opts: &ExecuteOptions) -> RunReport {
        execute(list, opts, &SystemProbe, &mut NoProgress)
    }

    fn state_of<'a>(report: &'a RunReport, address: &str) -> &'a DeclarationState {
        &report.entry(address).unwrap().state
    }

    #[test]
    fn second_run_is_unchanged() {
        let j = journal();
        let list = RunList::from_declarations(vec![
            Fake::new("user", "git", &j).declare(),
            Fake::new("directory", "/srv/app", &j).declare(),
        ])
        .unwrap();

        let first = run(&list, &ExecuteOptions::default());
        assert_eq!(first.summary.changed, 2);

        let second = run(&list, &ExecuteOptions::default());
        assert_eq!(second.summary.changed, 0);
        assert_eq!(second.summary.unchanged, 2);
        assert!(second.is_success());
    }

    #[test]
    fn not_if_true_never_converges() {
        let j = journal();
        let list = RunList::from_declarations(vec![
            Fake::new("command", "bundle", &j)
                .declare()
                .guard(Guard::not_if(Condition::check(|| Ok(true)))),
        ])
        .unwrap();

        let report = run(&list, &ExecuteOptions::default());
        assert!(events(&j).is_empty());
        assert!(matches!(
            state_of(&report, "command[bundle]"),
            DeclarationState::Skipped { .. }
        ));
        assert_eq!(report.summary.skipped, 1);
    }

    #[test]
    fn declarations_run_in_list_order() {
        let j = journal();
        let list = RunList::from_declarations(vec![
            Fake::new("user", "git", &j).declare(),
            Fake::new("directory", "/home/git", &j).declare(),
            Fake::new("file", "/home/git/.gitconfig", &j).declare(),
        ])
        .unwrap();

        run(&list, &ExecuteOptions::default());
        assert_eq!(
            events(&j),
            vec![
                "converge user[git]",
                "converge directory[/home/git]",
                "converge file[/home/git/.gitconfig]",
            ]
        );
    }

    #[test]
    fn delayed_restart_runs_once_at_the_end() {
        let j = journal();
        let restart = || Notify::delayed(r("service[nginx]"), "restart");
        let list = RunList::from_declarations(vec![
            Fake::new("file", "/etc/nginx/nginx.conf", &j)
                .declare()
                .notify(restart()),
            Fake::new("file", "/etc/nginx/sites/app", &j)
                .declare()
                .notify(restart()),
            Fake::new("service", "nginx", &j).declare(),
        ])
        .unwrap();

        let report = run(&list, &ExecuteOptions::default());
        let events = events(&j);
        assert_eq!(events.iter().filter(|e| *e == "restart service[nginx]").count(), 1);
        assert_eq!(events.last().map(String::as_str), Some("restart service[nginx]"));
        assert_eq!(report.summary.notifications, 1);
        assert_eq!(report.notifications[0].source, "file[/etc/nginx/nginx.conf]");
    }

    #[test]
    fn unchanged_declaration_does_not_notify() {
        let j = journal();
        let list = RunList::from_declarations(vec![
            Fake::new("file", "/etc/app.yml", &j)
                .declare()
                .notify(Notify::delayed(r("service[app]"), "restart")),
            Fake::new("service", "app", &j).declare(),
        ])
        .unwrap();

        run(&list, &ExecuteOptions::default());
        j.lock().unwrap().clear();

        let report = run(&list, &ExecuteOptions::default());
        assert!(!events(&j).contains(&"restart service[app]".to_string()));
        assert_eq!(report.summary.notifications, 0);
    }

    #[test]
    fn immediate_notification_runs_before_next_declaration() {
        let j = journal();
        let list = RunList::from_declarations(vec![
            Fake::new("remote_file", "/tmp/go.tgz", &j)
                .declare()
                .notify(Notify::immediately(r("command[extract]"), "run")),
            Fake::new("command", "extract", &j).declare().notify_only(true),
            Fake::new("file", "/etc/profile.d/go.sh", &j).declare(),
        ])
        .unwrap();

        let report = run(&list, &ExecuteOptions::default());
        assert_eq!(
            events(&j),
            vec![
                "converge remote_file[/tmp/go.tgz]",
                "run command[extract]",
                "converge file[/etc/profile.d/go.sh]",
            ]
        );
        assert!(matches!(
            state_of(&report, "command[extract]"),
            DeclarationState::Skipped { .. }
        ));
    }

    #[test]
    fn fail_fast_stops_at_first_failure() {
        let j = journal();
        let list = RunList::from_declarations(vec![
            Fake::new("package", "git", &j).declare(),
            Fake::new("command", "compile", &j)
                .behaving(Behavior::ReportsFailure)
                .declare(),
            Fake::new("service", "app", &j).declare(),
        ])
        .unwrap();

        let report = run(&list, &ExecuteOptions::default());
        assert!(!events(&j).contains(&"converge service[app]".to_string()));
        assert_eq!(state_of(&report, "service[app]"), &DeclarationState::NotRun);
        assert_eq!(report.summary.not_run, 1);

        let halted = report.halted.clone().unwrap();
        assert_eq!(halted.address, "command[compile]");
        assert_eq!(halted.action, "converge");

        let err = report.into_result().unwrap_err();
        assert_eq!(err.to_string(), "command[compile]: converge failed: boom");
    }

    #[test]
    fn halted_run_drops_delayed_notifications() {
        let j = journal();
        let list = RunList::from_declarations(vec![
            Fake::new("file", "/etc/app.yml", &j)
                .declare()
                .notify(Notify::delayed(r("service[app]"), "restart")),
            Fake::new("command", "migrate", &j)
                .behaving(Behavior::ReportsFailure)
                .declare(),
            Fake::new("service", "app", &j).declare(),
        ])
        .unwrap();

        let report = run(&list, &ExecuteOptions::default());
        assert!(!events(&j).contains(&"restart service[app]".to_string()));
        assert!(report.notifications.is_empty());
    }

    #[test]
    fn continue_policy_runs_everything() {
        let j = journal();
        let list = RunList::from_declarations(vec![
            Fake::new("command", "compile", &j)
                .behaving(Behavior::ReportsFailure)
                .declare(),
            Fake::new("service", "app", &j).declare(),
        ])
        .unwrap();
        let opts = ExecuteOptions {
            failure_policy: FailurePolicy::Continue,
            ..ExecuteOptions::default()
        };

        let report = run(&list, &opts);
        assert!(events(&j).contains(&"converge service[app]".to_string()));
        assert!(report.halted.is_none());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.summary.failed, 1);
        assert!(report.into_result().is_err());
    }

    #[test]
    fn ignored_failure_does_not_halt() {
        let j = journal();
        let list = RunList::from_declarations(vec![
            Fake::new("command", "optional", &j)
                .behaving(Behavior::ReportsFailure)
                .declare()
                .ignore_failure(true),
            Fake::new("service", "app", &j).declare(),
        ])
        .unwrap();

        let report = run(&list, &ExecuteOptions::default());
        assert!(events(&j).contains(&"converge service[app]".to_string()));
        assert_eq!(report.summary.failed, 1);
        assert!(report.is_success());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn process_timeout_is_classified() {
        let j = journal();
        let list = RunList::from_declarations(vec![
            Fake::new("command", "migrate", &j)
                .behaving(Behavior::TimesOut)
                .declare(),
        ])
        .unwrap();

        let report = run(&list, &ExecuteOptions::default());
        let halted = report.halted.clone().unwrap();
        assert_eq!(halted.kind, FailureKind::Timeout { after_secs: 2 });

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, Error::Timeout { after_secs: 2, .. }));
    }

    #[test]
    fn erroring_guards_count_as_false() {
        let j = journal();
        let broken = || Condition::check(|| anyhow::bail!("permission denied"));
        let list = RunList::from_declarations(vec![
            Fake::new("command", "only", &j)
                .declare()
                .guard(Guard::only_if(broken())),
            Fake::new("command", "not", &j)
                .declare()
                .guard(Guard::not_if(broken())),
        ])
        .unwrap();

        let report = run(&list, &ExecuteOptions::default());
        assert_eq!(events(&j), vec!["converge command[not]"]);
        assert!(report.is_success());
    }

    #[test]
    fn guard_errors_can_fail_the_declaration() {
        let j = journal();
        let list = RunList::from_declarations(vec![
            Fake::new("command", "assets", &j)
                .declare()
                .guard(Guard::only_if(Condition::check(|| anyhow::bail!("no access")))),
        ])
        .unwrap();
        let opts = ExecuteOptions {
            guard_errors: GuardErrorPolicy::Fail,
            ..ExecuteOptions::default()
        };

        let report = run(&list, &opts);
        let halted = report.halted.clone().unwrap();
        assert_eq!(halted.kind, FailureKind::Guard);
        assert!(halted.reason.contains("no access"));
        assert!(events(&j).is_empty());
    }

    #[test]
    fn notified_target_rechecks_guards() {
        let j = journal();
        let list = RunList::from_declarations(vec![
            Fake::new("file", "/etc/app.yml", &j)
                .declare()
                .notify(Notify::delayed(r("service[app]"), "restart")),
            Fake::new("service", "app", &j)
                .declare()
                .notify_only(true)
                .guard(Guard::only_if(Condition::check(|| Ok(false)))),
        ])
        .unwrap();

        let report = run(&list, &ExecuteOptions::default());
        assert!(!events(&j).contains(&"restart service[app]".to_string()));
        assert!(matches!(
            report.notifications[0].state,
            DeclarationState::Skipped { .. }
        ));
    }

    #[test]
    fn dry_run_reports_without_converging() {
        let j = journal();
        let list = RunList::from_declarations(vec![
            Fake::new("file", "/etc/app.yml", &j)
                .declare()
                .notify(Notify::delayed(r("service[app]"), "restart")),
            Fake::new("service", "app", &j).declare(),
        ])
        .unwrap();
        let opts = ExecuteOptions {
            dry_run: true,
            ..ExecuteOptions::default()
        };

        let report = run(&list, &opts);
        assert!(events(&j).is_empty());
        assert!(report.dry_run);
        assert!(report.entry("file[/etc/app.yml]").unwrap().diff.is_some());
        assert_eq!(report.notifications.len(), 1);
        assert_eq!(report.notifications[0].state, DeclarationState::NotRun);
    }

    #[cfg(unix)]
    #[test]
    fn slow_command_hits_declaration_timeout() {
        #[derive(Debug)]
        struct Sleeper;

        impl Resource for Sleeper {
            fn id(&self) -> String {
                "sleep".to_string()
            }

            fn description(&self) -> String {
                "sleep for a while".to_string()
            }

            fn resource_type(&self) -> &'static str {
                "command"
            }

            fn current_state(&self) -> anyhow::Result<ResourceState> {
                Ok(ResourceState::Absent)
            }

            fn desired_state(&self) -> ResourceState {
                ResourceState::Present { details: None }
            }

            fn converge(&self, ctx: &mut ApplyContext) -> anyhow::Result<ChangeResult> {
                ctx.shell("sleep 5").run()?;
                Ok(ChangeResult::Changed)
            }
        }

        let list = RunList::from_declarations(vec![
            Declaration::new(Box::new(Sleeper)).timeout(Some(Duration::from_millis(200))),
        ])
        .unwrap();

        let started = Instant::now();
        let report = execute_simple(&list, &ExecuteOptions::default());
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(
            report.halted.map(|f| f.kind),
            Some(FailureKind::Timeout { after_secs: 0 })
        );
    }
}
