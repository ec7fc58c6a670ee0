use std::{cell::RefCell, path::Path, rc::Rc};

use approx::assert_relative_eq;
use fado_core::{
    ChainFunction, EvaluationStep, FunctionRef, Parameter, ParameterRef, StepRef, Variable,
    VariableRef, reader::from_fn,
};

use crate::{
    Direction, DriverBase, Error, EvaluationMode, FailureMode, Storage,
    test_utils::{Journal, MockStep, chained, linear, with_parameter},
};

use super::{Action, Event, ExteriorPenaltyDriver, PenaltyConfig};

fn config(freq: usize) -> PenaltyConfig {
    PenaltyConfig::new(1e-6, freq, 8.0, 1024.0, 4.0, 0.5).unwrap()
}

fn base(dir: &Path) -> DriverBase {
    DriverBase::new().with_storage(Storage::new().user_dir(dir))
}

/// Minimize x² subject to x ≥ 1.
fn scenario(dir: &Path, config: PenaltyConfig) -> (ExteriorPenaltyDriver, VariableRef) {
    let x = VariableRef::new(Variable::new("x", [0.0]).unwrap());
    let mut base = base(dir);
    base.add_objective(Direction::Minimize, &chained("f", &x, &[], &[]), 1.0, 1.0)
        .unwrap();
    base.add_lower_bound(&linear("g", &[&x]), 1.0, 1.0).unwrap();
    (ExteriorPenaltyDriver::new(base, config), x)
}

type Log = Rc<RefCell<Vec<Event>>>;

fn recorder(log: &Log) -> impl FnMut(&Event) -> Option<Action> + use<> {
    let log = Rc::clone(log);
    move |event: &Event| -> Option<Action> {
        log.borrow_mut().push(event.clone());
        None
    }
}

#[test]
fn violated_bound_is_penalized_and_update_escalates() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut driver, _) = scenario(tmp.path(), config(0));

    assert_relative_eq!(driver.fun(&[0.0]).unwrap(), 8.0);
    assert_eq!(driver.inequality_penalties(), &[8.0]);

    assert!(!driver.update().unwrap());
    assert_eq!(driver.inequality_penalties(), &[32.0]);

    // The update forced a fresh evaluation of the same point.
    assert_relative_eq!(driver.fun(&[0.0]).unwrap(), 32.0);
    assert_eq!(driver.base().counters().fun_evals(), 2);
}

#[test]
fn feasible_point_sees_the_plain_objective() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut driver, _) = scenario(tmp.path(), config(0));

    assert_relative_eq!(driver.fun(&[1.5]).unwrap(), 2.25);
    assert_relative_eq!(driver.grad(&[1.5]).unwrap()[0], 3.0);
}

#[test]
fn gradient_includes_active_penalty() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut driver, _) = scenario(tmp.path(), config(0));

    // d/dx [x² + 8·(x - 1)²] at x = 0.
    assert_relative_eq!(driver.grad(&[0.0]).unwrap()[0], -16.0);
}

#[test]
fn repeated_calls_evaluate_once() {
    let tmp = tempfile::tempdir().unwrap();
    let x = VariableRef::new(Variable::new("x", [0.0]).unwrap());
    let solver = Rc::new(RefCell::new(MockStep::new("solver", 2)));
    let adjoint = Rc::new(RefCell::new(MockStep::new("adjoint", 2)));
    let f = chained("f", &x, &[StepRef::from(solver.clone())], &[StepRef::from(adjoint.clone())]);

    let mut base = base(tmp.path());
    base.add_objective(Direction::Minimize, &f, 1.0, 1.0).unwrap();
    let mut driver = ExteriorPenaltyDriver::new(base, config(0));

    for _ in 0..3 {
        driver.fun(&[0.5]).unwrap();
        driver.grad(&[0.5]).unwrap();
    }

    let counters = driver.base().counters();
    assert_eq!(counters.fun_evals(), 1);
    assert_eq!(counters.grad_evals(), 1);
    assert_eq!(solver.borrow().starts(), 1);
    assert_eq!(adjoint.borrow().starts(), 1);
}

#[test]
fn events_follow_the_evaluation() {
    let tmp = tempfile::tempdir().unwrap();
    let log = Log::default();
    let (driver, _) = scenario(tmp.path(), config(0));
    let mut driver = driver.with_observer(recorder(&log));

    driver.ensure_initialized().unwrap();
    driver.ensure_initialized().unwrap();
    driver.fun(&[0.0]).unwrap();
    driver.grad(&[0.0]).unwrap();

    let events = log.borrow();
    assert_eq!(events.len(), 3);

    let Event::Initialized { header } = &events[0] else {
        panic!("expected header first, got {:?}", events[0]);
    };
    assert_eq!(header.objectives, ["f"]);
    assert_eq!(header.inequalities, ["g"]);
    assert!(header.penalties);

    let Event::FunctionsEvaluated { record } = &events[1] else {
        panic!("expected a history record, got {:?}", events[1]);
    };
    assert_eq!(record.index, 1);
    assert_eq!(record.values, [0.0, 0.0]);

    let Event::GradientEvaluated { row } = &events[2] else {
        panic!("expected a log row, got {:?}", events[2]);
    };
    assert_eq!(row.grad_evals, 1);
    assert!(!row.feasible);
    assert_eq!(row.inequalities, [-1.0]);
    assert_eq!(row.inequality_penalties, [8.0]);
}

#[test]
fn penalties_update_every_freq_gradient_passes() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut driver, _) = scenario(tmp.path(), config(2));

    driver.grad(&[0.0]).unwrap();
    assert_eq!(driver.inequality_penalties(), &[8.0]);

    driver.grad(&[0.1]).unwrap();
    assert_eq!(driver.inequality_penalties(), &[32.0]);
    assert!(driver.base().current_x().is_none());
}

#[test]
fn observer_can_request_an_update() {
    let tmp = tempfile::tempdir().unwrap();
    let log = Log::default();
    let (driver, _) = scenario(tmp.path(), config(0));
    let events = Rc::clone(&log);
    let mut driver = driver.with_observer(move |event: &Event| -> Option<Action> {
        events.borrow_mut().push(event.clone());
        matches!(event, Event::GradientEvaluated { .. }).then_some(Action::UpdatePenalties)
    });

    driver.grad(&[0.0]).unwrap();

    assert_eq!(driver.inequality_penalties(), &[32.0]);
    assert!(matches!(
        log.borrow().last(),
        Some(Event::PenaltiesUpdated { row }) if row.inequality_penalties == [32.0]
    ));
}

#[test]
fn equality_penalty_is_quadratic_and_only_capped() {
    let tmp = tempfile::tempdir().unwrap();
    let x = VariableRef::new(Variable::new("x", [0.0]).unwrap());
    let mut base = base(tmp.path());
    base.add_equality(&linear("h", &[&x]), 2.0, 0.5).unwrap();
    let mut driver = ExteriorPenaltyDriver::new(base, PenaltyConfig::new(1e-6, 0, 8.0, 64.0, 4.0, 0.5).unwrap());

    // eq = (3 - 2)·0.5
    assert_relative_eq!(driver.fun(&[3.0]).unwrap(), 8.0 * 0.25);
    assert_relative_eq!(driver.grad(&[3.0]).unwrap()[0], 2.0 * 8.0 * 0.5 * 0.5);

    for _ in 0..3 {
        driver.update().unwrap();
    }
    assert_eq!(driver.equality_penalties(), &[64.0]);

    // Satisfied equalities keep their penalty.
    driver.fun(&[2.0]).unwrap();
    assert!(driver.update().unwrap());
    assert_eq!(driver.equality_penalties(), &[64.0]);
}

#[test]
fn parameters_advance_on_update() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut driver, x) = scenario(tmp.path(), config(0));
    let p = ParameterRef::new(Parameter::new("ramp", [0.0, 0.5, 1.0]).unwrap());
    driver.base_mut().add_monitor(&with_parameter("m", &x, &p));

    driver.fun(&[0.0]).unwrap();
    driver.update().unwrap();
    driver.update().unwrap();
    driver.update().unwrap();

    assert_eq!(p.borrow().value(), 1.0);
}

#[test]
fn parameters_can_wait_for_feasibility() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut driver, x) = scenario(tmp.path(), config(0).with_params_if_feasible(true));
    let p = ParameterRef::new(Parameter::new("ramp", [0.0, 1.0]).unwrap());
    driver.base_mut().add_monitor(&with_parameter("m", &x, &p));

    driver.fun(&[0.0]).unwrap();
    assert!(!driver.update().unwrap());
    assert_eq!(p.borrow().index(), 0);

    driver.fun(&[2.0]).unwrap();
    assert!(driver.update().unwrap());
    assert_eq!(p.borrow().index(), 1);
}

#[test]
fn satisfied_inequalities_skip_their_gradient() {
    for as_needed in [true, false] {
        let tmp = tempfile::tempdir().unwrap();
        let x = VariableRef::new(Variable::new("x", [0.0]).unwrap());
        let adjoint = Rc::new(RefCell::new(MockStep::new("adjoint", 1)));
        let g = chained("g", &x, &[], &[StepRef::from(adjoint.clone())]);

        let mut base = base(tmp.path());
        base.add_objective(Direction::Minimize, &linear("f", &[&x]), 1.0, 1.0)
            .unwrap();
        base.add_lower_bound(&g, 1.0, 1.0).unwrap();
        let mut driver = ExteriorPenaltyDriver::new(base, config(0).with_as_needed(as_needed));

        assert_relative_eq!(driver.grad(&[2.0]).unwrap()[0], 1.0);
        assert_eq!(adjoint.borrow().starts(), usize::from(!as_needed));
    }
}

#[test]
fn design_vector_is_scaled() {
    let tmp = tempfile::tempdir().unwrap();
    let x = Variable::new("x", [1.0])
        .and_then(|v| v.with_scale(2.0))
        .and_then(|v| v.with_bounds([-3.0], [3.0]))
        .map(VariableRef::new)
        .unwrap();
    let mut base = base(tmp.path());
    base.add_objective(Direction::Minimize, &chained("f", &x, &[], &[]), 3.0, 1.0)
        .unwrap();
    let mut driver = ExteriorPenaltyDriver::new(base, config(0));

    assert_eq!(driver.initial().unwrap(), [2.0]);
    assert_eq!(driver.lower_bound().unwrap(), [-6.0]);
    assert_eq!(driver.upper_bound().unwrap(), [6.0]);
    assert_eq!(driver.num_variables().unwrap(), 1);

    // x = 2 internally: f = 3·x², df/dx_opt = 6x / 2.
    assert_relative_eq!(driver.fun(&[4.0]).unwrap(), 12.0);
    assert_eq!(x.borrow().current(), &[2.0]);
    assert_relative_eq!(driver.grad(&[4.0]).unwrap()[0], 6.0);
}

#[test]
fn maximized_objective_is_negated() {
    let tmp = tempfile::tempdir().unwrap();
    let x = VariableRef::new(Variable::new("x", [0.0]).unwrap());
    let mut base = base(tmp.path());
    base.add_objective(Direction::Maximize, &chained("f", &x, &[], &[]), 1.0, 2.0)
        .unwrap();
    let mut driver = ExteriorPenaltyDriver::new(base, config(0));

    assert_relative_eq!(driver.fun(&[3.0]).unwrap(), -18.0);
    assert_relative_eq!(driver.grad(&[3.0]).unwrap()[0], -12.0);
}

fn failing_objective(dir: &Path, mode: FailureMode, default: Option<f64>) -> ExteriorPenaltyDriver {
    let step = StepRef::new(MockStep::new("solver", 1).failing());
    let mut f = ChainFunction::new("f", from_fn(|| Ok(vec![0.0]))).value_step(&step);
    if let Some(default) = default {
        f = f.with_default_value(default);
    }

    let mut base = base(dir).with_failure_mode(mode);
    base.add_objective(Direction::Minimize, &FunctionRef::new(f), 1.0, 1.0)
        .unwrap();
    ExteriorPenaltyDriver::new(base, config(0))
}

#[test]
fn soft_mode_falls_back_to_default_value() {
    let tmp = tempfile::tempdir().unwrap();
    let mut driver = failing_objective(tmp.path(), FailureMode::Soft, Some(100.0));
    assert_relative_eq!(driver.fun(&[]).unwrap(), 100.0);
}

#[test]
fn hard_mode_propagates_failures() {
    let tmp = tempfile::tempdir().unwrap();
    let mut hard = failing_objective(tmp.path(), FailureMode::Hard, Some(100.0));
    assert!(matches!(hard.fun(&[]), Err(Error::Function { name, .. }) if name == "f"));

    let tmp = tempfile::tempdir().unwrap();
    let mut soft = failing_objective(tmp.path(), FailureMode::Soft, None);
    assert!(matches!(soft.fun(&[]), Err(Error::Function { .. })));
}

#[test]
fn soft_mode_reuses_previous_gradient() {
    for mode in [FailureMode::Soft, FailureMode::Hard] {
        let tmp = tempfile::tempdir().unwrap();
        let x = VariableRef::new(Variable::new("x", [0.0]).unwrap());
        let adjoint = Rc::new(RefCell::new(MockStep::new("adjoint", 1)));
        let f = chained("f", &x, &[], &[StepRef::from(adjoint.clone())]);

        let mut base = base(tmp.path()).with_failure_mode(mode);
        base.add_objective(Direction::Minimize, &f, 1.0, 1.0).unwrap();
        let mut driver = ExteriorPenaltyDriver::new(base, config(0));

        assert_relative_eq!(driver.grad(&[1.0]).unwrap()[0], 2.0);
        adjoint.borrow_mut().set_failing(true);

        let result = driver.grad(&[2.0]);
        match mode {
            FailureMode::Soft => assert_relative_eq!(result.unwrap()[0], 2.0),
            FailureMode::Hard => assert!(matches!(result, Err(Error::Gradient { .. }))),
        }
    }
}

#[test]
fn parallel_mode_runs_shared_steps_once() {
    let tmp = tempfile::tempdir().unwrap();
    let x = VariableRef::new(Variable::new("x", [0.0]).unwrap());
    let shared = Rc::new(RefCell::new(MockStep::new("direct", 3)));
    let shared_ref: StepRef = shared.clone().into();
    let f = chained("f", &x, &[shared_ref.clone()], &[]);
    let g = linear("g", &[&x]);
    let mut base = base(tmp.path());
    base.add_objective(Direction::Minimize, &f, 1.0, 1.0).unwrap();
    base.add_lower_bound(&g, 1.0, 1.0).unwrap();
    base.add_monitor(&chained("m", &x, &[shared_ref], &[]));

    let mut driver = ExteriorPenaltyDriver::new(base, config(0));
    driver
        .set_evaluation_mode(EvaluationMode::parallel(0.0).unwrap())
        .unwrap();

    assert_relative_eq!(driver.fun(&[0.5]).unwrap(), 0.25 + 8.0 * 0.25);
    assert_eq!(shared.borrow().starts(), 1);
    assert!(shared.borrow().is_run());
    assert_eq!(driver.eval().raw_values(), &[0.25, 0.5, 0.25]);
}

#[test]
fn parallel_failures_follow_the_failure_mode() {
    for mode in [FailureMode::Hard, FailureMode::Soft] {
        let tmp = tempfile::tempdir().unwrap();
        let mut driver = failing_objective(tmp.path(), mode, Some(7.0));
        driver
            .set_evaluation_mode(EvaluationMode::parallel(0.0).unwrap())
            .unwrap();

        let result = driver.fun(&[]);
        match mode {
            FailureMode::Hard => assert!(matches!(result, Err(Error::Evaluations { .. }))),
            FailureMode::Soft => assert_relative_eq!(result.unwrap(), 7.0),
        }
    }
}

#[test]
fn each_new_point_archives_the_previous_one() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut driver, _) = scenario(tmp.path(), config(0));

    for x in [0.0, 1.0, 2.0] {
        driver.fun(&[x]).unwrap();
    }

    let mut names: Vec<String> = std::fs::read_dir(tmp.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, ["DSN_001", "DSN_002", "__WORKDIR__"]);
}

#[test]
fn preprocessing_again_starts_over() {
    let tmp = tempfile::tempdir().unwrap();
    let log = Log::default();
    let (driver, _) = scenario(tmp.path(), config(0));
    let mut driver = driver.with_observer(recorder(&log));

    driver.fun(&[0.0]).unwrap();
    driver.update().unwrap();
    assert_eq!(driver.inequality_penalties(), &[32.0]);

    driver.preprocess_variables().unwrap();
    driver.ensure_initialized().unwrap();
    assert_eq!(driver.inequality_penalties(), &[8.0]);

    let headers = log
        .borrow()
        .iter()
        .filter(|e| matches!(e, Event::Initialized { .. }))
        .count();
    assert_eq!(headers, 2);
}

#[test]
fn switching_evaluation_mode_keeps_penalties() {
    let tmp = tempfile::tempdir().unwrap();
    let log = Log::default();
    let (driver, _) = scenario(tmp.path(), config(0));
    let mut driver = driver.with_observer(recorder(&log));

    driver.fun(&[0.0]).unwrap();
    driver.update().unwrap();
    driver.update().unwrap();
    assert_eq!(driver.inequality_penalties(), &[128.0]);

    driver
        .set_evaluation_mode(EvaluationMode::parallel(0.0).unwrap())
        .unwrap();
    driver.ensure_initialized().unwrap();
    assert_eq!(driver.inequality_penalties(), &[128.0]);
    assert_relative_eq!(driver.fun(&[0.0]).unwrap(), 128.0);

    let headers = log
        .borrow()
        .iter()
        .filter(|e| matches!(e, Event::Initialized { .. }))
        .count();
    assert_eq!(headers, 1);
}

#[test]
fn sequential_chain_waits_for_each_step() {
    let tmp = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let x = VariableRef::new(Variable::new("x", [0.0]).unwrap());
    // Later steps finish faster, so only the chain keeps them in order.
    let steps: Vec<StepRef> = [("a", 3), ("b", 1), ("c", 2)]
        .into_iter()
        .map(|(name, polls)| StepRef::new(MockStep::new(name, polls).journal(&journal)))
        .collect();

    let mut base = base(tmp.path());
    base.add_objective(Direction::Minimize, &chained("f", &x, &steps, &[]), 1.0, 1.0)
        .unwrap();
    let mut driver = ExteriorPenaltyDriver::new(base, config(0));
    assert_eq!(driver.eval().mode(), EvaluationMode::Sequential);

    assert_relative_eq!(driver.fun(&[2.0]).unwrap(), 4.0);

    assert_eq!(journal.started(), ["a", "b", "c"]);
    assert_eq!(journal.finished(), ["a", "b", "c"]);
    assert_eq!(
        journal.timeline(),
        ["start a", "finish a", "start b", "finish b", "start c", "finish c"]
    );
}
