//! MILP backend for the labeling problem
//!
//! [`SolverSession`] is the process-wide solver handle: create it once at
//! startup, pass it by reference to every solve, drop it at shutdown. Each
//! solve runs on the calling thread. The session's wall-clock limit is handed
//! to the backend, which stops branching once it elapses and reports the best
//! labeling found so far, if any.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use good_lp::{
    constraint, microlp, variable, Expression, ProblemVariables, ResolutionError, Solution,
    SolutionStatus, SolverModel, Variable, WithInitialSolution, WithTimeLimit,
};
use log::{debug, info, warn};

use crate::error::SolverError;
use crate::mask_fusion::labeling::{ConstraintBuilder, LabelingProblem};

/// Solver configuration shared by every solve of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverSettings {
    /// Wall-clock budget of a single solve, model construction included
    pub time_limit: Duration,
    /// Hand the aggregate-mask labeling to the backend as an initial
    /// solution. It is only a hint: the backend may reject it, and a solve
    /// that times out still returns the backend's best labeling, not the hint
    pub warm_start: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(60),
            warm_start: true,
        }
    }
}

/// Counters reported by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub solves: usize,
    pub time_limit_hits: usize,
    pub failures: usize,
}

/// Process-wide MILP solver handle
#[derive(Debug)]
pub struct SolverSession {
    settings: SolverSettings,
    opened: Instant,
    solves: AtomicUsize,
    time_limit_hits: AtomicUsize,
    failures: AtomicUsize,
}

impl SolverSession {
    pub fn new(settings: SolverSettings) -> Self {
        info!(
            "opening solver session (time limit {:?}, warm start {})",
            settings.time_limit, settings.warm_start
        );
        Self {
            settings,
            opened: Instant::now(),
            solves: AtomicUsize::new(0),
            time_limit_hits: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            solves: self.solves.load(Ordering::Relaxed),
            time_limit_hits: self.time_limit_hits.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Solves `problem` within the session time limit.
    ///
    /// Returns the labels and whether optimality was proven. When the limit
    /// elapses after the backend found a feasible labeling, that incumbent is
    /// returned unproven; before that, the result is
    /// `SolverError::TimeoutWithoutIncumbent`.
    pub(crate) fn solve(&self, problem: &LabelingProblem) -> Result<(Vec<u8>, bool), SolverError> {
        self.solves.fetch_add(1, Ordering::Relaxed);
        let limit = self.settings.time_limit;

        let result = match solve_milp(problem, &self.settings) {
            Ok(outcome) => {
                if !outcome.proven {
                    self.time_limit_hits.fetch_add(1, Ordering::Relaxed);
                    warn!("solver hit the {limit:?} time limit, returning its incumbent labeling");
                }
                Ok((outcome.labels, outcome.proven))
            }
            Err(err) => {
                if matches!(err, SolverError::TimeoutWithoutIncumbent(_)) {
                    self.time_limit_hits.fetch_add(1, Ordering::Relaxed);
                }
                Err(err)
            }
        };

        if result.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

impl Drop for SolverSession {
    fn drop(&mut self) {
        let stats = self.stats();
        info!(
            "closing solver session after {:?}: {} solves, {} time-limit hits, {} failures",
            self.opened.elapsed(),
            stats.solves,
            stats.time_limit_hits,
            stats.failures
        );
    }
}

/// Variable bounds and linearization rows collected from a [`LabelingProblem`]
#[derive(Debug, Default)]
pub(crate) struct MilpFormulation {
    bounds: Vec<(f64, f64)>,
    abs_diff: Vec<(usize, usize, usize)>,
}

impl MilpFormulation {
    fn new(pixel_count: usize) -> Self {
        Self {
            bounds: vec![(0.0, 1.0); pixel_count],
            abs_diff: Vec::new(),
        }
    }

    /// Assignment of every variable implied by the pixel labels `labels`
    fn initial_solution(
        &self,
        labels: &[u8],
        z: &[Variable],
        d: &[Variable],
    ) -> Vec<(Variable, f64)> {
        let label = |pixel: usize| f64::from(labels[pixel]);
        z.iter()
            .enumerate()
            .map(|(pixel, &var)| (var, label(pixel)))
            .chain(
                d.iter()
                    .zip(&self.abs_diff)
                    .map(|(&var, &(_, p, q))| (var, (label(p) - label(q)).abs())),
            )
            .collect()
    }
}

impl ConstraintBuilder for MilpFormulation {
    fn add_agreement_constraint(&mut self, pixel: usize, label: u8) {
        let value = f64::from(label);
        self.bounds[pixel] = (value, value);
    }

    fn add_abs_diff_linearization(&mut self, pair: usize, p: usize, q: usize) {
        self.abs_diff.push((pair, p, q));
    }
}

/// Labels read back from the backend
#[derive(Debug)]
struct MilpOutcome {
    labels: Vec<u8>,
    proven: bool,
}

fn solve_milp(
    problem: &LabelingProblem,
    settings: &SolverSettings,
) -> Result<MilpOutcome, SolverError> {
    let started = Instant::now();
    let mut formulation = MilpFormulation::new(problem.pixel_count());
    problem.emit_constraints(&mut formulation);

    let mut variables = ProblemVariables::new();
    let z: Vec<Variable> = formulation
        .bounds
        .iter()
        .map(|&(lower, upper)| variables.add(variable().binary().min(lower).max(upper)))
        .collect();
    let d: Vec<Variable> = formulation
        .abs_diff
        .iter()
        .map(|_| variables.add(variable().binary()))
        .collect();

    // The constant part of the objective does not move the optimum.
    let mut objective = Expression::with_capacity(z.len() + d.len());
    for (&var, &coefficient) in z.iter().zip(problem.unary_coefficients()) {
        objective.add_mul(coefficient, var);
    }
    for (&var, &(pair, _, _)) in d.iter().zip(&formulation.abs_diff) {
        objective.add_mul(problem.pair_coefficient(pair), var);
    }

    let mut model = variables.maximise(objective).using(microlp);
    for (&diff, &(_, p, q)) in d.iter().zip(&formulation.abs_diff) {
        let (zp, zq) = (z[p], z[q]);
        model.add_constraint(constraint!(diff - zp - zq <= 0.0));
        model.add_constraint(constraint!(diff + zp + zq <= 2.0));
        model.add_constraint(constraint!(zp - zq - diff <= 0.0));
        model.add_constraint(constraint!(zq - zp - diff <= 0.0));
    }
    if settings.warm_start {
        let hint = formulation.initial_solution(problem.warm_start(), &z, &d);
        model = model.with_initial_solution(hint);
    }
    let remaining = settings.time_limit.saturating_sub(started.elapsed());
    model = model.with_time_limit(remaining.as_secs_f64());

    let solution = match model.solve() {
        Ok(solution) => solution,
        // microlp reports an interrupted search without incumbent this way.
        Err(ResolutionError::Other(reason)) => {
            debug!("backend stopped without a feasible labeling: {reason}");
            return Err(SolverError::TimeoutWithoutIncumbent(settings.time_limit));
        }
        Err(err) => return Err(err.into()),
    };
    let proven = matches!(solution.status(), SolutionStatus::Optimal);
    debug!(
        "MILP with {} label and {} disagreement variables finished in {:?} (proven optimal: {})",
        z.len(),
        d.len(),
        started.elapsed(),
        proven
    );

    Ok(MilpOutcome {
        labels: z.iter().map(|&var| u8::from(solution.value(var) > 0.5)).collect(),
        proven,
    })
}
