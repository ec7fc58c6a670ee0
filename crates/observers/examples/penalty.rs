//! Minimizes `x²` subject to `x ≥ 1` with the exterior penalty method.
//!
//! A crude backtracking gradient descent plays the optimizer. The log table
//! goes to stdout and the history file to a temporary study directory.

use std::{error::Error, io, time::Duration};

use fado_core::{ChainFunction, FunctionRef, Variable, VariableRef, reader::from_fn};
use fado_drivers::{Direction, DriverBase, ExteriorPenaltyDriver, PenaltyConfig, Storage};
use fado_observers::{HistoryWriter, LogWriter, Tee};
use tracing::info;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let study = tempfile::tempdir()?;
    let x = VariableRef::new(Variable::new("x", [0.0])?);

    let (vx, gx) = (x.clone(), x.clone());
    let square = FunctionRef::new(
        ChainFunction::new("f", from_fn(move || Ok(vec![vx.borrow().current()[0].powi(2)])))
            .input(&x, from_fn(move || Ok(vec![2.0 * gx.borrow().current()[0]])))
            .poll_interval(Duration::ZERO),
    );
    let vx = x.clone();
    let identity = FunctionRef::new(
        ChainFunction::new("x", from_fn(move || Ok(vec![vx.borrow().current()[0]])))
            .input(&x, from_fn(|| Ok(vec![1.0])))
            .poll_interval(Duration::ZERO),
    );

    let mut base = DriverBase::new().with_storage(Storage::new().user_dir(study.path()).keep_designs(false));
    base.add_objective(Direction::Minimize, &square, 1.0, 1.0)?;
    base.add_lower_bound(&identity, 1.0, 1.0)?;

    let config = PenaltyConfig::new(1e-6, 10, 8.0, 1024.0, 4.0, 0.5)?;
    let observer = Tee(
        LogWriter::new(io::stdout()),
        HistoryWriter::create(study.path().join("history.csv"))?,
    );
    let mut driver = ExteriorPenaltyDriver::new(base, config).with_observer(observer);

    let mut point = driver.initial()?;
    let mut step = 0.1;
    for _ in 0..100 {
        let gradient = driver.grad(&point)?;
        // After the gradient, since an update may have changed the penalties.
        let value = driver.fun(&point)?;
        loop {
            let trial: Vec<f64> = point.iter().zip(&gradient).map(|(x, g)| x - step * g).collect();
            if driver.fun(&trial)? < value || step < 1e-12 {
                point = trial;
                break;
            }
            step *= 0.5;
        }
        step *= 2.0;
    }

    let counters = driver.base().counters();
    info!(
        x = point[0],
        penalty = driver.inequality_penalties()[0],
        fun_evals = counters.fun_evals(),
        grad_evals = counters.grad_evals(),
        "done"
    );
    Ok(())
}
