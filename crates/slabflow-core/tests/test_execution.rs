mod common;

use std::sync::{Arc, Mutex};

use slabflow_core::compute::DeconBackend;
use slabflow_core::error::{OtfError, PlanError};
use slabflow_core::plan::{AbortHandle, Plan, PlanObserver, PlanState, ProcessPlan};
use slabflow_core::source::DataSource;
use slabflow_core::stage::{DeconSettings, StageSpec};

use common::{
    acquisition, memory_source, otf_dir, Call, CountingBackend, MockSource, Probe, Recorder,
    SHAPE,
};

fn ready_plan(source: Arc<dyn DataSource>, specs: Vec<StageSpec>) -> ProcessPlan {
    let mut plan = ProcessPlan::new(Plan::new(source, specs, None, None).unwrap());
    plan.plan(true).unwrap();
    plan
}

fn scoped_plan(
    source: Arc<dyn DataSource>,
    specs: Vec<StageSpec>,
    c_range: Option<Vec<usize>>,
    backend: &Arc<CountingBackend>,
) -> ProcessPlan {
    let backend: Arc<dyn DeconBackend> = backend.clone();
    let plan = Plan::new(source, specs, None, c_range)
        .unwrap()
        .with_backend(backend);
    let mut plan = ProcessPlan::new(plan);
    plan.plan(true).unwrap();
    plan
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[test]
fn test_every_timepoint_runs_through_every_stage() {
    let rec = Recorder::new();
    let mut plan = ready_plan(
        memory_source(3, 2),
        vec![
            Probe::transform("a", &rec).spec(),
            Probe::writer("w", &rec).spec(),
        ],
    );

    let summary = plan.execute().unwrap();
    assert_eq!(summary.processed, vec![0, 1, 2]);
    assert!(!summary.aborted);
    assert_eq!(plan.state(), PlanState::Completed);
    assert_eq!(rec.processed("w"), vec![0, 1, 2]);

    let first_timepoint: Vec<Call> = rec.calls().into_iter().take(6).collect();
    assert_eq!(
        first_timepoint,
        vec![
            Call::Setup("a".into(), 0),
            Call::Setup("w".into(), 0),
            Call::Process("a".into(), 0),
            Call::Process("w".into(), 0),
            Call::Teardown("a".into(), 0),
            Call::Teardown("w".into(), 0),
        ]
    );
    assert_eq!(rec.calls().len(), 18);
}

#[test]
fn test_timepoints_follow_the_selected_order() {
    let rec = Recorder::new();
    let plan = Plan::new(
        memory_source(4, 1),
        vec![Probe::writer("w", &rec).spec()],
        Some(vec![3, 0, 2]),
        None,
    )
    .unwrap();
    let mut plan = ProcessPlan::new(plan);
    plan.plan(false).unwrap();
    plan.execute().unwrap();
    assert_eq!(rec.processed("w"), vec![3, 0, 2]);
}

#[test]
fn test_meta_records_current_timepoint_and_stage_keys() {
    let rec = Recorder::new();
    let mut plan = ready_plan(
        memory_source(2, 1),
        vec![
            Probe::transform("a", &rec).spec(),
            Probe::writer("w", &rec).spec(),
        ],
    );
    plan.execute().unwrap();

    let meta = plan.meta().unwrap();
    assert_eq!(meta.t, Some(1));
    assert!(meta.get("seen_by_a").is_some());
    assert!(meta.get("seen_by_w").is_some());
}

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<String>>,
}

impl PlanObserver for EventLog {
    fn run_started(&self, timepoints: usize) {
        self.events.lock().unwrap().push(format!("run {timepoints}"));
    }

    fn timepoint_started(&self, t: usize) {
        self.events.lock().unwrap().push(format!("start {t}"));
    }

    fn timepoint_finished(&self, t: usize) {
        self.events.lock().unwrap().push(format!("done {t}"));
    }
}

#[test]
fn test_observer_sees_run_progress() {
    let rec = Recorder::new();
    let log = Arc::new(EventLog::default());
    let plan = Plan::new(
        memory_source(2, 1),
        vec![Probe::writer("w", &rec).spec()],
        None,
        None,
    )
    .unwrap()
    .with_observer(log.clone());
    let mut plan = ProcessPlan::new(plan);
    plan.plan(false).unwrap();
    plan.execute().unwrap();

    assert_eq!(
        *log.events.lock().unwrap(),
        vec!["run 2", "start 0", "done 0", "start 1", "done 1"]
    );
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn test_process_failure_names_stage_and_position() {
    let rec = Recorder::new();
    let mut plan = ready_plan(
        memory_source(3, 1),
        vec![
            Probe::transform("a", &rec).spec(),
            Probe::transform("b", &rec).failing_process_at(1).spec(),
            Probe::writer("w", &rec).spec(),
        ],
    );

    let err = plan.execute().unwrap_err();
    assert!(matches!(err, PlanError::Process { .. }));
    assert_eq!(err.stage(), Some(("b", 2)));
    assert_eq!(err.position(), Some(2));
    assert_eq!(err.to_string(), "ProcessError in stage <b> at position 2");
    assert_eq!(plan.state(), PlanState::Failed);

    assert_eq!(rec.processed("w"), vec![0]);
    assert_eq!(rec.processed("b"), vec![0, 1]);
    let teardowns_at_1: Vec<Call> = rec
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Teardown(_, 1)))
        .collect();
    assert_eq!(teardowns_at_1.len(), 3);
}

#[test]
fn test_setup_failure_skips_chain_but_tears_down() {
    let rec = Recorder::new();
    let mut plan = ready_plan(
        memory_source(2, 1),
        vec![
            Probe::transform("a", &rec).failing_setup_at(0).spec(),
            Probe::writer("w", &rec).spec(),
        ],
    );

    let err = plan.execute().unwrap_err();
    assert!(matches!(err, PlanError::Setup { .. }));
    assert_eq!(err.stage(), Some(("a", 1)));
    assert!(rec.processed("a").is_empty());
    assert!(rec.processed("w").is_empty());
    assert_eq!(rec.teardowns(), vec!["a", "w"]);
}

#[test]
fn test_teardown_failure_is_reported() {
    let rec = Recorder::new();
    let mut plan = ready_plan(
        memory_source(2, 1),
        vec![
            Probe::transform("a", &rec).spec(),
            Probe::writer("w", &rec).failing_teardown_at(0).spec(),
        ],
    );

    let err = plan.execute().unwrap_err();
    assert!(matches!(err, PlanError::Teardown { .. }));
    assert_eq!(err.stage(), Some(("w", 2)));
    assert_eq!(rec.processed("w"), vec![0]);
    assert_eq!(plan.state(), PlanState::Failed);
}

#[test]
fn test_earlier_error_wins_over_teardown_failure() {
    let rec = Recorder::new();
    let mut plan = ready_plan(
        memory_source(2, 1),
        vec![
            Probe::transform("a", &rec).failing_process_at(0).spec(),
            Probe::writer("w", &rec).failing_teardown_at(0).spec(),
        ],
    );

    let err = plan.execute().unwrap_err();
    assert!(matches!(err, PlanError::Process { .. }));
    assert_eq!(err.stage(), Some(("a", 1)));
    assert_eq!(rec.teardowns(), vec!["a", "w"]);
}

#[test]
fn test_source_error_is_not_attributed_to_a_stage() {
    let rec = Recorder::new();
    let source = Arc::new(MockSource::new(acquisition(3, 1)).failing_at(1));
    let mut plan = ready_plan(source.clone(), vec![Probe::writer("w", &rec).spec()]);

    let err = plan.execute().unwrap_err();
    assert!(matches!(err, PlanError::Source(_)));
    assert_eq!(err.stage(), None);
    assert_eq!(rec.processed("w"), vec![0]);
    assert_eq!(source.load_count(), 2);
}

// ---------------------------------------------------------------------------
// Abort and re-execution
// ---------------------------------------------------------------------------

#[test]
fn test_abort_before_execute_processes_nothing() {
    let rec = Recorder::new();
    let source = Arc::new(MockSource::new(acquisition(5, 1)));
    let mut plan = ready_plan(source.clone(), vec![Probe::writer("w", &rec).spec()]);

    plan.abort();
    assert!(plan.is_aborted());
    let summary = plan.execute().unwrap();
    assert!(summary.aborted);
    assert_eq!(summary.processed_count(), 0);
    assert_eq!(source.load_count(), 0);
    assert_eq!(plan.state(), PlanState::Aborted);
}

#[test]
fn test_abort_between_timepoints_finishes_current_one() {
    let rec = Recorder::new();
    let handle = AbortHandle::new();
    let plan = Plan::new(
        memory_source(5, 1),
        vec![
            Probe::transform("a", &rec).aborting(handle.clone(), 1).spec(),
            Probe::writer("w", &rec).spec(),
        ],
        None,
        None,
    )
    .unwrap()
    .with_abort_handle(handle.clone());
    let mut plan = ProcessPlan::new(plan);
    plan.plan(false).unwrap();

    let summary = plan.execute().unwrap();
    assert!(summary.aborted);
    assert_eq!(summary.processed, vec![0, 1]);
    assert_eq!(rec.processed("w"), vec![0, 1]);
    assert_eq!(plan.state(), PlanState::Aborted);
}

#[test]
fn test_execute_again_requires_plan() {
    let rec = Recorder::new();
    let mut plan = ready_plan(memory_source(2, 1), vec![Probe::writer("w", &rec).spec()]);
    plan.execute().unwrap();
    assert!(matches!(plan.execute(), Err(PlanError::NotReady)));

    plan.plan(false).unwrap();
    let summary = plan.execute().unwrap();
    assert_eq!(summary.processed, vec![0, 1]);
    assert_eq!(rec.processed("w"), vec![0, 1, 0, 1]);
}

// ---------------------------------------------------------------------------
// Device scoping
// ---------------------------------------------------------------------------

#[test]
fn test_single_channel_deconvolution_opens_one_scope_per_timepoint() {
    let rec = Recorder::new();
    let otfs = otf_dir(&["488_otf.raw"]);
    let backend = Arc::new(CountingBackend::new());
    let mut plan = scoped_plan(
        memory_source(3, 1),
        vec![
            Probe::deconvolution("d", &rec, otfs.path()).spec(),
            Probe::writer("w", &rec).spec(),
        ],
        None,
        &backend,
    );
    assert!(plan.uses_device_scope());

    plan.execute().unwrap();
    assert_eq!(backend.acquired(), 3);
    assert_eq!(backend.released(), 3);

    let scopes = rec.scopes();
    assert_eq!(scopes.len(), 6);
    assert!(scopes.iter().all(|s| s.open));
    assert!(scopes
        .iter()
        .all(|s| s.out_shape.as_deref() == Some(&SHAPE[..])));

    let requests = backend.requests.lock().unwrap();
    let request = &requests[0];
    assert_eq!(request.shape, SHAPE);
    assert_eq!(request.otf.wavelength, 488);
    assert_eq!(request.otf.path, otfs.path().join("488_otf.raw"));
    assert_eq!(request.width, 0);
    assert_eq!(request.dz, 0.5);
    assert!(!request.deskew);
}

#[test]
fn test_multi_channel_plan_is_not_scoped() {
    let rec = Recorder::new();
    let otfs = otf_dir(&["488_otf.raw", "560_otf.raw"]);
    let backend = Arc::new(CountingBackend::new());
    let mut plan = scoped_plan(
        memory_source(2, 2),
        vec![
            Probe::deconvolution("d", &rec, otfs.path()).spec(),
            Probe::writer("w", &rec).spec(),
        ],
        None,
        &backend,
    );
    assert!(!plan.uses_device_scope());

    plan.execute().unwrap();
    assert_eq!(backend.acquired(), 0);
    assert!(rec.scopes().iter().all(|s| !s.open && s.out_shape.is_none()));
}

#[test]
fn test_selected_channel_picks_its_own_otf() {
    let rec = Recorder::new();
    let otfs = otf_dir(&["488_otf.raw", "560_otf.raw"]);
    let backend = Arc::new(CountingBackend::new());
    let mut plan = scoped_plan(
        memory_source(1, 2),
        vec![
            Probe::deconvolution("d", &rec, otfs.path()).spec(),
            Probe::writer("w", &rec).spec(),
        ],
        Some(vec![1]),
        &backend,
    );
    assert!(plan.uses_device_scope());

    plan.execute().unwrap();
    let requests = backend.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].otf.wavelength, 560);
}

#[test]
fn test_no_deconvolution_stage_means_no_scope() {
    let rec = Recorder::new();
    let backend = Arc::new(CountingBackend::new());
    let mut plan = scoped_plan(
        memory_source(2, 1),
        vec![
            Probe::transform("a", &rec).spec(),
            Probe::writer("w", &rec).spec(),
        ],
        None,
        &backend,
    );
    assert!(!plan.uses_device_scope());
    plan.execute().unwrap();
    assert_eq!(backend.acquired(), 0);
    assert!(rec.scopes().iter().all(|s| !s.open));
}

#[test]
fn test_requested_width_shapes_the_output() {
    let rec = Recorder::new();
    let otfs = otf_dir(&["488_otf.raw"]);
    let backend = Arc::new(CountingBackend::new());
    let mut decon = Probe::deconvolution("d", &rec, otfs.path());
    decon.decon = Some(DeconSettings {
        otf_dir: otfs.path().to_path_buf(),
        width: 5,
    });
    let mut plan = scoped_plan(
        memory_source(1, 1),
        vec![decon.spec(), Probe::writer("w", &rec).spec()],
        None,
        &backend,
    );

    plan.execute().unwrap();
    assert_eq!(plan.meta().unwrap().out_shape, Some(vec![4, 8, 5]));
    assert_eq!(backend.requests.lock().unwrap()[0].width, 5);
}

#[test]
fn test_missing_otf_fails_before_chain_and_tears_down() {
    let rec = Recorder::new();
    let otfs = otf_dir(&[]);
    let backend = Arc::new(CountingBackend::new());
    let mut plan = scoped_plan(
        memory_source(2, 1),
        vec![
            Probe::deconvolution("d", &rec, otfs.path()).spec(),
            Probe::writer("w", &rec).spec(),
        ],
        None,
        &backend,
    );

    let err = plan.execute().unwrap_err();
    assert!(matches!(
        err,
        PlanError::Otf(OtfError::NotFound { wavelength: 488, .. })
    ));
    assert_eq!(backend.acquired(), 0);
    assert!(rec.processed("d").is_empty());
    assert_eq!(rec.teardowns(), vec!["d", "w"]);
    assert_eq!(plan.state(), PlanState::Failed);
}

#[test]
fn test_backend_failure_is_a_context_error() {
    let rec = Recorder::new();
    let otfs = otf_dir(&["488_otf.raw"]);
    let backend = Arc::new(CountingBackend::failing());
    let mut plan = scoped_plan(
        memory_source(1, 1),
        vec![
            Probe::deconvolution("d", &rec, otfs.path()).spec(),
            Probe::writer("w", &rec).spec(),
        ],
        None,
        &backend,
    );

    let err = plan.execute().unwrap_err();
    assert!(matches!(err, PlanError::Context(_)));
    assert_eq!(rec.teardowns(), vec!["d", "w"]);
}

#[test]
fn test_scope_is_released_when_a_stage_fails() {
    let rec = Recorder::new();
    let otfs = otf_dir(&["488_otf.raw"]);
    let backend = Arc::new(CountingBackend::new());
    let mut plan = scoped_plan(
        memory_source(3, 1),
        vec![
            Probe::deconvolution("d", &rec, otfs.path()).spec(),
            Probe::transform("a", &rec).failing_process_at(1).spec(),
            Probe::writer("w", &rec).spec(),
        ],
        None,
        &backend,
    );

    let err = plan.execute().unwrap_err();
    assert_eq!(err.stage(), Some(("a", 2)));
    assert_eq!(backend.acquired(), 2);
    assert_eq!(backend.released(), 2);
}
